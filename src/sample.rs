//! Per-poll-cycle measurements and the batch-of-`BATCH_SIZE` quality filter.

/// `CKPRECISION` from RFC 5905: the client's own clock precision, as log2(seconds).
const CKPRECISION: f64 = -18.0;
/// `PHI`: maximum clock drift rate assumed by RFC 5905, in seconds per second.
const PHI: f64 = 15e-6;

/// Number of samples collected before the best of the batch is selected and
/// applied to the clock.
pub(crate) const BATCH_SIZE: usize = 8;

/// One completed request/response round trip.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Sample {
    pub(crate) send_begin: f64,
    pub(crate) send_end: f64,
    pub(crate) recv_begin: f64,
    pub(crate) recv_end: f64,
    pub(crate) offset: f64,
    pub(crate) delay: f64,
    pub(crate) dispersion: f64,
}

impl Sample {
    /// Width of the two local instrumentation windows bracketing the
    /// `send`/`recv` syscalls; the primary sample-quality metric.
    pub(crate) fn uncertainty(&self) -> f64 {
        (self.send_end - self.send_begin) + (self.recv_end - self.recv_begin)
    }
}

/// Compute offset/delay/dispersion for one round trip.
///
/// `t1`..`t4` and `send_begin`..`recv_end` are all seconds on the same
/// (arbitrary, shared) time axis -- the epoch cancels out of every difference
/// used here, so unix-epoch floats work as well as NTP-epoch ones.
#[allow(clippy::too_many_arguments)]
pub(crate) fn compute_sample(
    t1: f64,
    t2: f64,
    t3: f64,
    t4: f64,
    send_begin: f64,
    send_end: f64,
    recv_begin: f64,
    recv_end: f64,
    server_precision: i8,
) -> Sample {
    let offset = ((t2 - t1) + (t3 - t4)) / 2.0;
    let delay = (t4 - t1) - (t3 - t2);
    let dispersion =
        2f64.powi(i32::from(server_precision)) + 2f64.powf(CKPRECISION) + PHI * (t2 - t1);

    Sample {
        send_begin,
        send_end,
        recv_begin,
        recv_end,
        offset,
        delay,
        dispersion,
    }
}

/// Accumulates samples into a fixed-size batch and selects the best one.
#[derive(Default)]
pub(crate) struct SampleBatch {
    samples: Vec<Sample>,
}

impl SampleBatch {
    pub(crate) fn new() -> Self {
        SampleBatch {
            samples: Vec::with_capacity(BATCH_SIZE),
        }
    }

    /// Add a sample; returns `true` once the batch has reached [`BATCH_SIZE`].
    pub(crate) fn push(&mut self, sample: Sample) -> bool {
        self.samples.push(sample);
        self.samples.len() >= BATCH_SIZE
    }

    /// Select the sample with minimal uncertainty, breaking ties by minimal delay.
    pub(crate) fn best(&self) -> &Sample {
        self.samples
            .iter()
            .min_by(|a, b| {
                a.uncertainty()
                    .partial_cmp(&b.uncertainty())
                    .unwrap()
                    .then(a.delay.partial_cmp(&b.delay).unwrap())
            })
            .expect("best() called on an empty batch")
    }

    pub(crate) fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_and_delay_match_rfc5905_formula() {
        // t1=0, t2=5.1, t3=5.1000001, t4=0.2 -> pure 5s clock offset, small delay
        let s = compute_sample(0.0, 5.1, 5.1000001, 0.2, 0.0, 0.0001, 0.1, 0.1001, -20);
        assert!((s.offset - 5.0).abs() < 1e-3);
        assert!(s.delay >= 0.0);
    }

    #[test]
    fn batch_selects_minimum_uncertainty() {
        let mut batch = SampleBatch::new();
        for i in 0..BATCH_SIZE {
            let noisy = i != 3;
            let uncertainty = if noisy { 0.01 } else { 0.0001 };
            let sample = Sample {
                send_begin: 0.0,
                send_end: uncertainty / 2.0,
                recv_begin: 0.0,
                recv_end: uncertainty / 2.0,
                offset: i as f64,
                delay: 0.001,
                dispersion: 0.0,
            };
            batch.push(sample);
        }

        assert_eq!(batch.best().offset, 3.0);
    }

    #[test]
    fn batch_breaks_uncertainty_ties_by_delay() {
        let mut batch = SampleBatch::new();
        for i in 0..BATCH_SIZE {
            let sample = Sample {
                send_begin: 0.0,
                send_end: 0.001,
                recv_begin: 0.0,
                recv_end: 0.001,
                offset: i as f64,
                delay: if i == 5 { 0.0001 } else { 0.01 },
                dispersion: 0.0,
            };
            batch.push(sample);
        }

        assert_eq!(batch.best().offset, 5.0);
    }
}
