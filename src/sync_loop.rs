//! The worker thread: one poll cycle after another until stopped or a
//! terminal error occurs.

use std::sync::atomic::Ordering;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::sample::{compute_sample, SampleBatch};
use crate::slew;
use crate::socket::UdpChannel;
use crate::wire::{self, NtpPacket};
use crate::Shared;

const SOCKET_TIMEOUT: Duration = Duration::from_millis(500);
/// Floor for the inter-cycle sleep, in microseconds; doubled after every
/// batch until it reaches the configured delay.
const INTER_SYNC_DELAY_MIN_US: u64 = 1_000_000;

/// Runs on a dedicated thread for the lifetime of one [`crate::NtpSync`].
/// `ready_tx` is signalled exactly once: with `Ok(())` at first
/// synchronization, or `Err(e)` if a terminal error occurs first.
pub(crate) fn run(shared: std::sync::Arc<Shared>, host: String, port: u16, ready_tx: Sender<Result<()>>) {
    let mut ready_sent = false;

    let channel = match UdpChannel::open(&host, port, SOCKET_TIMEOUT) {
        Ok(c) => c,
        Err(e) => {
            terminate(&shared, e, &ready_tx, &mut ready_sent);
            return;
        }
    };

    let mut batch = SampleBatch::new();
    let mut previous_xmt: u64 = 0;
    let mut previous_origin: u64 = 0;
    let mut last_reference_ts: u64 = 0;
    let mut backoff_us: u64 = INTER_SYNC_DELAY_MIN_US;
    let cap_us = shared.inter_sync_delay_ms.saturating_mul(1000).max(INTER_SYNC_DELAY_MIN_US);

    loop {
        if shared.stop.load(Ordering::Acquire) {
            return;
        }

        let cycle_start = shared.host_clock.mono();

        let send_begin = shared.host_clock.mono();
        let t1_unix = shared.model.unix_now(send_begin);
        let xmt = wire::unix_to_ntp64(t1_unix);
        let packet = NtpPacket::client_request(xmt, last_reference_ts);
        let buf = packet.encode();

        if let Err(e) = channel.send(&buf) {
            terminate(&shared, e, &ready_tx, &mut ready_sent);
            return;
        }

        let send_end = shared.host_clock.mono();
        let recv_begin = send_end;

        let resp_buf = match channel.receive() {
            Ok(b) => b,
            Err(e) => {
                terminate(&shared, e, &ready_tx, &mut ready_sent);
                return;
            }
        };
        let recv_end = shared.host_clock.mono();
        let response = NtpPacket::decode(&resp_buf);

        if let Some(e) = fatal_error(&response) {
            terminate(&shared, e, &ready_tx, &mut ready_sent);
            return;
        }

        let ignore = is_ignorable(&response, previous_xmt, previous_origin);

        previous_xmt = xmt;
        previous_origin = response.transmit_ts;

        if !ignore {
            let t2_unix = wire::ntp64_to_unix(response.receive_ts);
            let t3_unix = wire::ntp64_to_unix(response.transmit_ts);
            let t4_unix = shared.model.unix_now(recv_end);

            let sample = compute_sample(
                t1_unix,
                t2_unix,
                t3_unix,
                t4_unix,
                send_begin.0,
                send_end.0,
                recv_begin.0,
                recv_end.0,
                response.precision,
            );

            if batch.push(sample) {
                let (accuracy_broken, reference_ts) = apply_batch(&shared, &batch);
                batch.clear();
                last_reference_ts = reference_ts;

                if !ready_sent && shared.model.synchronized() {
                    let _ = ready_tx.send(Ok(()));
                    ready_sent = true;
                }

                if accuracy_broken {
                    terminate(&shared, Error::AccuracyBroken, &ready_tx, &mut ready_sent);
                    return;
                }

                let cycle_cost = shared.host_clock.mono().0 - cycle_start.0;
                let sleep_secs = (backoff_us as f64 / 1e6 - cycle_cost).max(0.0);
                sleep_chunked(sleep_secs, &shared.stop);
                backoff_us = backoff_us.saturating_mul(2).min(cap_us);
            }
        }
    }
}

/// Select the best sample of the batch, apply it to the clock model and run
/// the slewer. Returns whether the engine should terminate with
/// `AccuracyBroken`, and the NTP time at the moment of adjustment (for the
/// next outgoing request's `reference_ts`).
fn apply_batch(shared: &Shared, batch: &SampleBatch) -> (bool, u64) {
    let best = batch.best();
    let was_synchronized = shared.model.synchronized();

    shared.model.add_offset(best.offset);
    shared.model.record_adjustment(best.offset, best.delay);
    let reference_ts = shared.model.ntp_now(shared.host_clock.mono());

    if shared.model.adjustments() == 1 {
        shared.model.set_slewed_offset(shared.model.offset());
    } else {
        slew::run(&shared.model, shared.max_offset_sec);
    }

    let now_synchronized = shared.model.ofs_rel().abs() < shared.max_offset_sec;
    shared.model.set_synchronized(now_synchronized);

    let accuracy_broken = !now_synchronized && (shared.model.adjustments() > 2 || was_synchronized);
    (accuracy_broken, reference_ts)
}

fn sleep_chunked(total_secs: f64, stop: &std::sync::atomic::AtomicBool) {
    let mut remaining = total_secs;

    while remaining > 0.0 {
        if stop.load(Ordering::Acquire) {
            return;
        }

        let chunk = remaining.min(1.0);
        thread::sleep(Duration::from_secs_f64(chunk));
        remaining -= chunk;
    }
}

fn terminate(shared: &Shared, err: Error, ready_tx: &Sender<Result<()>>, ready_sent: &mut bool) {
    #[cfg(feature = "log")]
    log::error!("ntp sync terminated: {err}");

    shared.error.store(err.ordinal() + 1, Ordering::Release);

    if let Some(cb) = shared.error_callback.lock().unwrap().as_ref() {
        cb(err);
    }

    if !*ready_sent {
        let _ = ready_tx.send(Err(err));
        *ready_sent = true;
    }
}

/// Conditions that abort the engine outright.
fn fatal_error(response: &NtpPacket) -> Option<Error> {
    if response.header.version() > wire::VERSION {
        return Some(Error::Version);
    }
    if response.stratum == 0 {
        return Some(Error::KissOfDeath);
    }
    if response.transmit_ts == 0 {
        return Some(Error::Unexpected);
    }

    None
}

/// Conditions that discard a response without aborting the engine.
fn is_ignorable(response: &NtpPacket, previous_xmt: u64, previous_origin: u64) -> bool {
    let root_delay_sec = f64::from(response.root_delay as i32) / 65536.0;
    let root_dispersion_sec = f64::from(response.root_dispersion) / 65536.0;

    response.header.mode() == wire::MODE_BROADCAST
        || response.transmit_ts == previous_xmt
        || response.transmit_ts == previous_origin
        || response.header.li() == wire::LI_NOSYNC
        || response.stratum >= wire::MAXSTRAT
        || root_delay_sec / 2.0 + root_dispersion_sec >= wire::MAXDISP
        || response.reference_ts > response.transmit_ts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::HeaderByte;

    fn good_response() -> NtpPacket {
        NtpPacket {
            header: HeaderByte::new(0, wire::VERSION, 4),
            stratum: 2,
            poll: 6,
            precision: -20,
            root_delay: 0,
            root_dispersion: 0,
            ref_id: 0,
            reference_ts: 0,
            origin_ts: 0,
            receive_ts: 1 << 32,
            transmit_ts: (1 << 32) + 1,
        }
    }

    #[test]
    fn version_above_four_is_fatal() {
        let mut resp = good_response();
        resp.header = HeaderByte::new(0, 5, 4);
        assert_eq!(fatal_error(&resp), Some(Error::Version));
    }

    #[test]
    fn stratum_zero_is_kiss_of_death() {
        let mut resp = good_response();
        resp.stratum = 0;
        assert_eq!(fatal_error(&resp), Some(Error::KissOfDeath));
    }

    #[test]
    fn zero_transmit_timestamp_is_unexpected() {
        let mut resp = good_response();
        resp.transmit_ts = 0;
        assert_eq!(fatal_error(&resp), Some(Error::Unexpected));
    }

    #[test]
    fn good_response_is_not_fatal_and_not_ignored() {
        let resp = good_response();
        assert_eq!(fatal_error(&resp), None);
        assert!(!is_ignorable(&resp, 0, 0));
    }

    #[test]
    fn duplicate_transmit_timestamp_is_ignored() {
        let resp = good_response();
        assert!(is_ignorable(&resp, 0, resp.transmit_ts));
        assert!(is_ignorable(&resp, resp.transmit_ts, 0));
    }

    #[test]
    fn unsynchronized_leap_indicator_is_ignored() {
        let mut resp = good_response();
        resp.header = HeaderByte::new(wire::LI_NOSYNC, wire::VERSION, 4);
        assert!(is_ignorable(&resp, 0, 0));
    }

    #[test]
    fn stratum_at_maxstrat_is_ignored() {
        let mut resp = good_response();
        resp.stratum = wire::MAXSTRAT;
        assert!(is_ignorable(&resp, 0, 0));
    }

    #[test]
    fn reference_after_transmit_is_ignored() {
        let mut resp = good_response();
        resp.reference_ts = resp.transmit_ts + 1;
        assert!(is_ignorable(&resp, 0, 0));
    }

    #[test]
    fn broadcast_mode_is_ignored() {
        let mut resp = good_response();
        resp.header = HeaderByte::new(0, wire::VERSION, wire::MODE_BROADCAST);
        assert!(is_ignorable(&resp, 0, 0));
    }
}
