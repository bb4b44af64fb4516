//! Converts a discrete offset correction into a bounded-rate ramp so the
//! virtual clock exposed to callers never jumps.

use std::thread;
use std::time::Duration;

use crate::model::TimeModel;

/// Compute the sequence of intermediate `slewed_offset` values that ramps
/// from `start` to `target` in steps no larger than `|target - start| /
/// max_offset_sec * 2000`, with the final element always equal to `target`.
///
/// Pulled out of [`run`] so the ramp shape can be tested without sleeping.
pub(crate) fn slew_steps(start: f64, target: f64, max_offset_sec: f64) -> Vec<f64> {
    let ofs_rel = target - start;

    if ofs_rel == 0.0 {
        return vec![target];
    }

    let num_steps = (ofs_rel.abs() / max_offset_sec) * 2000.0;
    let inc = ofs_rel / num_steps;

    let mut steps = Vec::new();
    let mut current = start;

    loop {
        let next = current + inc;
        let overshot = if ofs_rel > 0.0 {
            next >= target
        } else {
            next <= target
        };

        if overshot {
            steps.push(target);
            break;
        }

        steps.push(next);
        current = next;
    }

    steps
}

/// Run the ramp computed by [`slew_steps`] against `model`, sleeping
/// `max_offset_sec * 2` seconds between steps. Not cancellable: the ramp's
/// total duration is bounded by `2000 * max_offset_sec` seconds.
pub(crate) fn run(model: &TimeModel, max_offset_sec: f64) {
    let steps = slew_steps(model.slewed_offset(), model.offset(), max_offset_sec);
    let step_sleep = Duration::from_secs_f64(max_offset_sec * 2.0);
    let last = steps.len() - 1;

    for (i, value) in steps.into_iter().enumerate() {
        model.set_slewed_offset(value);

        if i != last {
            thread::sleep(step_sleep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_ends_exactly_at_target() {
        let steps = slew_steps(0.0, 0.002, 0.0005);
        assert_eq!(*steps.last().unwrap(), 0.002);
    }

    #[test]
    fn ramp_is_monotonic_towards_a_positive_target() {
        let steps = slew_steps(0.0, 0.002, 0.0005);
        for pair in steps.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn ramp_is_monotonic_towards_a_negative_target() {
        let steps = slew_steps(0.001, -0.001, 0.0005);
        for pair in steps.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
    }

    #[test]
    fn zero_delta_produces_a_single_step() {
        let steps = slew_steps(0.5, 0.5, 0.0005);
        assert_eq!(steps, vec![0.5]);
    }
}
