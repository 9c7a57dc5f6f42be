//! Exact integer conversions between time bases.
//!
//! Output timestamps are counted in output-rate samples. Converting to and
//! from a stream's native time base goes through 128-bit integer arithmetic
//! so long tracks never drift.

use std::time::Duration;

use symphonia::core::units::TimeBase;

use crate::protocol_constants::OUTPUT_SAMPLE_RATE;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Rescales `value` by `num / den`, rounding down and saturating.
#[inline]
pub fn rescale(value: u64, num: u64, den: u64) -> u64 {
    if den == 0 {
        return 0;
    }
    let scaled = value as u128 * num as u128 / den as u128;
    scaled.min(u64::MAX as u128) as u64
}

/// Output-rate samples → ticks of `time_base`.
///
/// One tick lasts `numer / denom` seconds, so
/// `ticks = samples * denom / (rate * numer)`.
pub fn samples_to_ticks(samples: u64, time_base: TimeBase) -> u64 {
    rescale(
        samples,
        time_base.denom as u64,
        OUTPUT_SAMPLE_RATE as u64 * time_base.numer as u64,
    )
}

/// Ticks of `time_base` → output-rate samples.
pub fn ticks_to_samples(ticks: u64, time_base: TimeBase) -> u64 {
    rescale(
        ticks,
        OUTPUT_SAMPLE_RATE as u64 * time_base.numer as u64,
        time_base.denom as u64,
    )
}

/// Frames at `rate` → output-rate samples.
pub fn frames_to_samples(frames: u64, rate: u32) -> u64 {
    rescale(frames, OUTPUT_SAMPLE_RATE as u64, rate as u64)
}

pub fn duration_to_samples(duration: Duration) -> u64 {
    let samples = duration.as_nanos() * OUTPUT_SAMPLE_RATE as u128 / NANOS_PER_SEC;
    samples.min(u64::MAX as u128) as u64
}

pub fn samples_to_duration(samples: u64) -> Duration {
    let nanos = samples as u128 * NANOS_PER_SEC / OUTPUT_SAMPLE_RATE as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}
