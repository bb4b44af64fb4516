//! Host clock readings used to anchor the virtual clock.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Seconds since an arbitrary, process-local monotonic origin.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd)]
pub(crate) struct Mono(pub(crate) f64);

/// Host monotonic clock, plus a way to pair a monotonic reading with a
/// simultaneous wall-clock one.
pub(crate) struct HostClock {
    origin: Instant,
}

impl HostClock {
    pub(crate) fn new() -> Self {
        HostClock {
            origin: Instant::now(),
        }
    }

    /// Current monotonic time, in seconds since this `HostClock` was created.
    pub(crate) fn mono(&self) -> Mono {
        Mono(self.origin.elapsed().as_secs_f64())
    }

    /// A wall-clock reading (seconds since the Unix epoch) bracketed by two
    /// monotonic readings, so the caller can estimate how stale the wall
    /// reading is relative to `mono()`.
    pub(crate) fn wall_and_mono(&self) -> (Mono, f64, Mono) {
        let before = self.mono();
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let after = self.mono();
        (before, wall, after)
    }
}
