//! Background NTP client
//!
//! # Overview
//!
//! This crate runs a single background thread that periodically polls an
//! NTP server, filters the resulting samples for quality, and maintains a
//! monotonic virtual clock that is slewed (never stepped) towards the
//! measured offset. [`NtpSync`] is the handle applications hold: start it
//! once, read [`NtpSync::get_time`] as often as needed, stop it when done.
//!
//! # Usage
//!
//! ```no_run
//! use ntpsync::NtpSync;
//!
//! let engine = NtpSync::start("pool.ntp.org", 5.0, 1000.0)?;
//! engine.set_time(0);
//! println!("elapsed: {} ms", engine.get_time());
//! engine.stop();
//! # Ok::<(), ntpsync::Error>(())
//! ```
//!
//! ## Logging
//!
//! Enable the `log` feature (on by default) to see per-cycle diagnostics
//! through the [`log`] facade: discarded samples at `debug`, raw packet
//! bytes at `trace`, terminal errors at `error`.
//!
//! # Non-goals
//!
//! This is a single-peer unicast client. It does not discipline the
//! kernel clock, does not implement the RFC 5905 peer-selection algorithm
//! across multiple servers, and does not speak symmetric, broadcast or
//! authenticated NTP.

mod clock;
mod error;
mod model;
mod sample;
mod slew;
mod socket;
mod sync_loop;
mod wire;

pub use error::{Error, Result};

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

use clock::HostClock;
use model::TimeModel;

const NTP_PORT: u16 = 123;

type ErrorCallback = dyn Fn(Error) + Send + Sync;

/// State shared between the worker thread and every [`NtpSync`] handle
/// clone-equivalent (there is only ever one handle per engine, but the
/// worker thread needs its own `Arc` to this state).
struct Shared {
    model: TimeModel,
    host_clock: HostClock,
    stop: AtomicBool,
    /// `0` means no error; otherwise `Error::ordinal() + 1`.
    error: AtomicU8,
    error_callback: Mutex<Option<Box<ErrorCallback>>>,
    /// Bit pattern of the `f64` unix-ms origin set by [`NtpSync::set_time`].
    user_origin_ms: AtomicU64,
    max_offset_sec: f64,
    inter_sync_delay_ms: u64,
}

impl Shared {
    fn error(&self) -> Option<Error> {
        match self.error.load(Ordering::Acquire) {
            0 => None,
            code => Some(ordinal_to_error(code - 1)),
        }
    }
}

fn ordinal_to_error(ordinal: u8) -> Error {
    match ordinal {
        0 => Error::No,
        1 => Error::Send,
        2 => Error::Receive,
        3 => Error::Version,
        4 => Error::KissOfDeath,
        5 => Error::Unexpected,
        6 => Error::AccuracyBroken,
        _ => Error::InvalidConfig,
    }
}

/// A running (or stopped) NTP synchronization engine.
///
/// Not restartable: once [`NtpSync::stop`] has been called, this handle is
/// spent. Call [`NtpSync::start`] again to sync against the same or a
/// different server.
pub struct NtpSync {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NtpSync {
    /// Resolve `host`, spawn the worker thread and block until the engine
    /// either completes its first adjustment or fails.
    ///
    /// `max_offset_ms` bounds both the slew rate and the accuracy threshold
    /// that must be met for the engine to consider itself synchronized.
    /// `inter_sync_delay_ms` is the steady-state delay between poll batches
    /// once the backoff has ramped all the way up; it must be larger than
    /// one second.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `inter_sync_delay_ms` is too
    /// small, or whatever [`Error`] the worker thread first encountered
    /// while trying to reach its first synchronized state.
    pub fn start(host: &str, max_offset_ms: f64, inter_sync_delay_ms: f64) -> Result<NtpSync> {
        Self::start_on(host, NTP_PORT, max_offset_ms, inter_sync_delay_ms)
    }

    /// Like [`NtpSync::start`], but against an explicit port. Exists so
    /// tests can point the engine at a loopback mock server instead of the
    /// well-known NTP port.
    pub(crate) fn start_on(
        host: &str,
        port: u16,
        max_offset_ms: f64,
        inter_sync_delay_ms: f64,
    ) -> Result<NtpSync> {
        if inter_sync_delay_ms * 1000.0 <= 1_000_000.0 {
            return Err(Error::InvalidConfig);
        }

        let host_clock = HostClock::new();
        let model = TimeModel::anchor(&host_clock);

        let shared = Arc::new(Shared {
            model,
            host_clock,
            stop: AtomicBool::new(false),
            error: AtomicU8::new(0),
            error_callback: Mutex::new(None),
            user_origin_ms: AtomicU64::new(0f64.to_bits()),
            max_offset_sec: max_offset_ms / 1000.0,
            inter_sync_delay_ms: inter_sync_delay_ms as u64,
        });

        let (ready_tx, ready_rx) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let host = host.to_owned();

        let worker = std::thread::Builder::new()
            .name("ntpsync-worker".into())
            .spawn(move || sync_loop::run(worker_shared, host, port, ready_tx))
            .expect("failed to spawn ntpsync worker thread");

        match ready_rx.recv() {
            Ok(Ok(())) => {
                let engine = NtpSync {
                    shared,
                    worker: Mutex::new(Some(worker)),
                };
                engine.set_time(0);
                Ok(engine)
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(Error::Unexpected)
            }
        }
    }

    /// Stop the worker thread and close its socket. Idempotent.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);

        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Define a user epoch: subsequent [`NtpSync::get_time`] calls return
    /// milliseconds elapsed since this moment was `ms` milliseconds in.
    pub fn set_time(&self, ms: u64) {
        let now_ms = self.slewed_unix_now_ms();
        let origin_ms = now_ms - ms as f64;
        self.shared
            .user_origin_ms
            .store(origin_ms.to_bits(), Ordering::Release);
    }

    /// Milliseconds elapsed since the moment established by [`NtpSync::set_time`].
    #[must_use]
    pub fn get_time(&self) -> u64 {
        let origin_ms = f64::from_bits(self.shared.user_origin_ms.load(Ordering::Acquire));
        (self.slewed_unix_now_ms() - origin_ms).max(0.0) as u64
    }

    /// The recorded user epoch, in unix milliseconds.
    #[must_use]
    pub fn start_time(&self) -> u64 {
        f64::from_bits(self.shared.user_origin_ms.load(Ordering::Acquire)) as u64
    }

    /// The terminal error the engine stopped with, if any.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        self.shared.error()
    }

    /// Register a callback invoked once from the worker thread when a
    /// terminal error occurs. Replaces any previously registered callback.
    pub fn on_error(&self, callback: impl Fn(Error) + Send + Sync + 'static) {
        *self.shared.error_callback.lock().unwrap() = Some(Box::new(callback));
    }

    /// Host monotonic clock, in milliseconds, independent of NTP state.
    #[must_use]
    pub fn monotonic_time(&self) -> u64 {
        (self.shared.host_clock.mono().0 * 1000.0) as u64
    }

    /// Whether the engine has completed at least one adjustment that landed
    /// within the configured accuracy bound.
    #[must_use]
    pub fn synchronized(&self) -> bool {
        self.shared.model.synchronized()
    }

    fn slewed_unix_now_ms(&self) -> f64 {
        let mono = self.shared.host_clock.mono();
        self.shared.model.slewed_unix_now(mono) * 1000.0
    }
}

impl Drop for NtpSync {
    fn drop(&mut self) {
        self.stop();
    }
}
