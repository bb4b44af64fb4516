//! Shared clock state: an anchor fixed at startup plus a continuously
//! updated offset, read lock-free from any thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::clock::{HostClock, Mono};
use crate::wire::unix_to_ntp64;

/// Number of wall/mono reading pairs taken when anchoring the clock; the
/// pair with the narrowest bracket is kept.
const ANCHOR_TRIALS: usize = 20;

fn load_f64(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::Acquire))
}

fn store_f64(cell: &AtomicU64, value: f64) {
    cell.store(value.to_bits(), Ordering::Release);
}

/// Anchored clock state shared between the worker thread and API callers.
///
/// `t0_mono`/`t0_wall` are set once, before the worker thread starts, and are
/// never mutated afterwards; everything else is updated by the worker thread
/// via release stores and observed by readers via acquire loads.
pub(crate) struct TimeModel {
    t0_mono: f64,
    t0_wall: f64,
    offset: AtomicU64,
    slewed_offset: AtomicU64,
    synchronized: AtomicBool,
    adjustments: AtomicU64,
    ofs_rel: AtomicU64,
    ofs_rel_min: AtomicU64,
    ofs_rel_max: AtomicU64,
    delay: AtomicU64,
}

impl TimeModel {
    pub(crate) fn new(t0_mono: Mono, t0_wall: f64) -> Self {
        TimeModel {
            t0_mono: t0_mono.0,
            t0_wall,
            offset: AtomicU64::new(0),
            slewed_offset: AtomicU64::new(0),
            synchronized: AtomicBool::new(false),
            adjustments: AtomicU64::new(0),
            ofs_rel: AtomicU64::new(0),
            ofs_rel_min: AtomicU64::new(0),
            ofs_rel_max: AtomicU64::new(0),
            delay: AtomicU64::new(0),
        }
    }

    fn local_offset(&self, m: Mono, offset: f64) -> f64 {
        (m.0 - self.t0_mono) + offset
    }

    pub(crate) fn unix_now(&self, m: Mono) -> f64 {
        self.t0_wall + self.local_offset(m, self.offset())
    }

    pub(crate) fn ntp_now(&self, m: Mono) -> u64 {
        unix_to_ntp64(self.unix_now(m))
    }

    pub(crate) fn slewed_unix_now(&self, m: Mono) -> f64 {
        self.t0_wall + self.local_offset(m, self.slewed_offset())
    }

    pub(crate) fn slewed_ntp_now(&self, m: Mono) -> u64 {
        unix_to_ntp64(self.slewed_unix_now(m))
    }

    pub(crate) fn offset(&self) -> f64 {
        load_f64(&self.offset)
    }

    pub(crate) fn add_offset(&self, delta: f64) {
        store_f64(&self.offset, self.offset() + delta);
    }

    pub(crate) fn slewed_offset(&self) -> f64 {
        load_f64(&self.slewed_offset)
    }

    pub(crate) fn set_slewed_offset(&self, value: f64) {
        store_f64(&self.slewed_offset, value);
    }

    pub(crate) fn synchronized(&self) -> bool {
        self.synchronized.load(Ordering::Acquire)
    }

    pub(crate) fn set_synchronized(&self, value: bool) {
        self.synchronized.store(value, Ordering::Release);
    }

    pub(crate) fn adjustments(&self) -> u64 {
        self.adjustments.load(Ordering::Acquire)
    }

    pub(crate) fn record_adjustment(&self, ofs_rel: f64, delay: f64) {
        let count = self.adjustments.fetch_add(1, Ordering::AcqRel) + 1;
        store_f64(&self.ofs_rel, ofs_rel);
        store_f64(&self.delay, delay);

        if count == 2 {
            store_f64(&self.ofs_rel_min, ofs_rel);
            store_f64(&self.ofs_rel_max, ofs_rel);
        } else if count > 2 {
            if ofs_rel < load_f64(&self.ofs_rel_min) {
                store_f64(&self.ofs_rel_min, ofs_rel);
            }
            if ofs_rel > load_f64(&self.ofs_rel_max) {
                store_f64(&self.ofs_rel_max, ofs_rel);
            }
        }
    }

    pub(crate) fn ofs_rel(&self) -> f64 {
        load_f64(&self.ofs_rel)
    }

    /// Take [`ANCHOR_TRIALS`] wall/mono reading pairs and anchor a fresh
    /// `TimeModel` to the one with the narrowest mono bracket.
    pub(crate) fn anchor(host_clock: &HostClock) -> Self {
        let mut best: Option<(Mono, f64, f64)> = None;

        for _ in 0..ANCHOR_TRIALS {
            let (before, wall, after) = host_clock.wall_and_mono();
            let bracket = after.0 - before.0;

            let improves = match best {
                Some((_, _, best_bracket)) => bracket < best_bracket,
                None => true,
            };

            if improves {
                best = Some((after, wall, bracket));
            }
        }

        let (mono_after, wall, bracket) = best.expect("ANCHOR_TRIALS > 0");
        let t0_mono = Mono(mono_after.0 - bracket / 2.0);

        TimeModel::new(t0_mono, wall)
    }
}
