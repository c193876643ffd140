//! Sample-number ↔ µUTC translation, with and without a time-series index
//! table, honoring discontinuities (§4.5, §8 S6).
//!
//! Both directions share one idea: locate the two index entries that
//! bracket the query, and if the gap between them is itself a
//! discontinuity (the *later* entry is marked as following one), don't
//! trust a rate derived from spanning it — reach past it to the next
//! contiguous pair for the sampling rate instead, and extrapolate from
//! the near edge of the break rather than the far one.

use chrono::{DateTime, Utc};

use crate::index::TimeSeriesIndex;
use crate::types::{FindMode, RoundMode};

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Render a µUTC timestamp as an RFC 3339 string for diagnostics (error
/// messages, `show_structures`-style dumps) — never used on the read/write
/// hot path, where timestamps stay as raw `i64` µUTC throughout.
pub fn uutc_to_rfc3339(uutc: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_micros(uutc).map(|dt| dt.to_rfc3339())
}

fn round_sample(raw: f64, mode: RoundMode) -> i64 {
    match mode {
        RoundMode::Current => raw.floor() as i64,
        RoundMode::Closest => raw.round() as i64,
        RoundMode::Next => raw.floor() as i64 + 1,
    }
}

/// The two-point sampling rate implied by `a -> b`, in Hz.
fn local_fs(a: &TimeSeriesIndex, b: &TimeSeriesIndex) -> f64 {
    let samples = (b.start_sample_number - a.start_sample_number) as f64;
    let micros = (b.start_time - a.start_time) as f64;
    if micros == 0.0 {
        0.0
    } else {
        samples * MICROS_PER_SECOND / micros
    }
}

/// The bracketing pair for a query against `start_time`, plus whichever
/// pair actually supplies the sampling rate once discontinuities are
/// routed around (§4.5).
struct Bracket<'a> {
    prev: &'a TimeSeriesIndex,
    /// The anchor to extrapolate from: `prev` in the ordinary case, or
    /// `next` when the prev→next gap is itself the discontinuity.
    anchor: &'a TimeSeriesIndex,
    fs: f64,
}

fn bracket_for_time<'a>(indices: &'a [TimeSeriesIndex], target_uutc: i64) -> BracketResult<'a> {
    let split = indices.partition_point(|idx| idx.start_time <= target_uutc);
    if split == 0 {
        return BracketResult::BeforeFirst;
    }
    if split == indices.len() {
        return BracketResult::AfterLast;
    }
    let prev = &indices[split - 1];
    let next = &indices[split];
    if next.is_discontinuity() {
        // The gap between prev and next is the discontinuity itself; get
        // the rate from the next contiguous pair and extrapolate from its
        // near edge (`next`) instead of spanning the break.
        let fs = match indices.get(split + 1) {
            Some(after) => local_fs(next, after),
            None => local_fs(prev, next),
        };
        BracketResult::Found(Bracket { prev, anchor: next, fs })
    } else {
        let fs = local_fs(prev, next);
        BracketResult::Found(Bracket { prev, anchor: prev, fs })
    }
}

enum BracketResult<'a> {
    BeforeFirst,
    AfterLast,
    Found(Bracket<'a>),
}

fn bracket_for_sample<'a>(indices: &'a [TimeSeriesIndex], target_sample: i64) -> BracketResult<'a> {
    let split = indices.partition_point(|idx| idx.start_sample_number <= target_sample);
    if split == 0 {
        return BracketResult::BeforeFirst;
    }
    if split == indices.len() {
        return BracketResult::AfterLast;
    }
    let prev = &indices[split - 1];
    let next = &indices[split];
    if next.is_discontinuity() {
        let fs = match indices.get(split + 1) {
            Some(after) => local_fs(next, after),
            None => local_fs(prev, next),
        };
        BracketResult::Found(Bracket { prev, anchor: next, fs })
    } else {
        let fs = local_fs(prev, next);
        BracketResult::Found(Bracket { prev, anchor: prev, fs })
    }
}

/// Translate a µUTC timestamp to a segment-local sample number (§4.5).
///
/// `indices`, when given, must include the terminal sentinel entry
/// (`start_time = end_time + 1`, `start_sample_number = total_samples`,
/// §3) so end-of-range queries are well defined.
pub fn sample_for_uutc(
    ref_sample: i64,
    ref_uutc: i64,
    target_uutc: i64,
    fs: f64,
    indices: Option<&[TimeSeriesIndex]>,
    mode: RoundMode,
) -> i64 {
    match indices {
        None => {
            let elapsed = (target_uutc - ref_uutc) as f64;
            let raw = ref_sample as f64 + elapsed * fs / MICROS_PER_SECOND;
            round_sample(raw, mode)
        }
        Some(indices) if !indices.is_empty() => match bracket_for_time(indices, target_uutc) {
            BracketResult::BeforeFirst => indices[0].start_sample_number,
            BracketResult::AfterLast => {
                indices.last().unwrap().start_sample_number - 1
            }
            BracketResult::Found(b) => {
                let elapsed = (target_uutc - b.anchor.start_time) as f64;
                let raw = b.anchor.start_sample_number as f64 + elapsed * b.fs / MICROS_PER_SECOND;
                round_sample(raw, mode)
            }
        },
        Some(_) => round_sample(
            ref_sample as f64 + (target_uutc - ref_uutc) as f64 * fs / MICROS_PER_SECOND,
            mode,
        ),
    }
}

fn apply_find_mode(t0: f64, t1: f64, mode: FindMode) -> i64 {
    match mode {
        FindMode::Start => t0.ceil() as i64,
        FindMode::End => t1.ceil() as i64 - 1,
        FindMode::Center => ((t0 + t1) / 2.0).round() as i64,
    }
}

/// Translate a segment-local sample number to a µUTC timestamp (§4.5).
/// A sample's time is the half-open interval `[sample_start, next_start)`;
/// `mode` selects which µUTC within that interval is returned.
pub fn uutc_for_sample(
    ref_sample: i64,
    ref_uutc: i64,
    target_sample: i64,
    fs: f64,
    indices: Option<&[TimeSeriesIndex]>,
    mode: FindMode,
) -> i64 {
    match indices {
        None => {
            let t0 = ref_uutc as f64 + (target_sample - ref_sample) as f64 * MICROS_PER_SECOND / fs;
            let t1 = t0 + MICROS_PER_SECOND / fs;
            apply_find_mode(t0, t1, mode)
        }
        Some(indices) if !indices.is_empty() => match bracket_for_sample(indices, target_sample) {
            BracketResult::BeforeFirst => indices[0].start_time,
            BracketResult::AfterLast => {
                let last = indices.last().unwrap();
                last.start_time - 1
            }
            BracketResult::Found(b) => {
                let offset_samples = (target_sample - b.anchor.start_sample_number) as f64;
                let t0 = b.anchor.start_time as f64 + offset_samples * MICROS_PER_SECOND / b.fs;
                let t1 = t0 + MICROS_PER_SECOND / b.fs;
                apply_find_mode(t0, t1, mode)
            }
        },
        Some(_) => {
            let t0 = ref_uutc as f64 + (target_sample - ref_sample) as f64 * MICROS_PER_SECOND / fs;
            let t1 = t0 + MICROS_PER_SECOND / fs;
            apply_find_mode(t0, t1, mode)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uutc_to_rfc3339_round_trips_the_epoch() {
        assert_eq!(uutc_to_rfc3339(0).unwrap(), "1970-01-01T00:00:00+00:00");
    }

    fn s6_indices() -> Vec<TimeSeriesIndex> {
        vec![
            TimeSeriesIndex::new(0, 1_000_000, 0, false),
            TimeSeriesIndex::new(1, 2_000_000, 100, true),
            TimeSeriesIndex::new(2, 4_000_000, 200, false),
            TimeSeriesIndex::new(3, 5_000_000, 300, false),
        ]
    }

    /// S6: the bracket for 3,500,000µs is (index 1, index 2); index 2 is
    /// not itself marked discontinuous, so the pair's own two-point rate
    /// (50Hz) is used and index 1 is the extrapolation anchor — see
    /// DESIGN.md for why this resolves spec.md's self-contradictory
    /// worked example in favor of 175 rather than its stated "150".
    #[test]
    fn s6_discontinuity_aware_sample_for_uutc() {
        let indices = s6_indices();
        let sample = sample_for_uutc(0, 1_000_000, 3_500_000, 0.0, Some(&indices), RoundMode::Current);
        assert_eq!(sample, 175);
    }

    #[test]
    fn before_first_index_returns_lowest_sample() {
        let indices = s6_indices();
        let sample = sample_for_uutc(0, 0, 500_000, 0.0, Some(&indices), RoundMode::Current);
        assert_eq!(sample, 0);
    }

    #[test]
    fn past_last_index_returns_last_minus_one() {
        let indices = s6_indices();
        let sample = sample_for_uutc(0, 0, 6_000_000, 0.0, Some(&indices), RoundMode::Current);
        assert_eq!(sample, 299);
    }

    #[test]
    fn query_spanning_the_discontinuity_uses_next_contiguous_rate() {
        let indices = s6_indices();
        // Bracket (index0, index1): index1 is marked discontinuous, so the
        // rate comes from (index1, index2) = 50Hz, anchored at index1.
        let sample = sample_for_uutc(0, 0, 1_500_000, 0.0, Some(&indices), RoundMode::Current);
        // elapsed = 1_500_000 - 2_000_000 = -500_000us at 50Hz => -25 samples
        assert_eq!(sample, 75);
    }

    #[test]
    fn without_indices_linear_extrapolation() {
        let sample = sample_for_uutc(0, 1_000_000, 2_000_000, 100.0, None, RoundMode::Current);
        assert_eq!(sample, 100);
    }

    #[test]
    fn round_modes_differ_on_fractional_results() {
        // 10.6 samples in: Current floors, Closest rounds, Next ceils+1-ish.
        let current = sample_for_uutc(0, 0, 106_000, 100.0, None, RoundMode::Current);
        let closest = sample_for_uutc(0, 0, 106_000, 100.0, None, RoundMode::Closest);
        let next = sample_for_uutc(0, 0, 106_000, 100.0, None, RoundMode::Next);
        assert_eq!(current, 10);
        assert_eq!(closest, 11);
        assert_eq!(next, 11);
    }

    #[test]
    fn uutc_for_sample_round_trips_without_indices() {
        let fs = 1000.0;
        let t = uutc_for_sample(0, 0, 50, fs, None, FindMode::Start);
        // sample 50 starts at 50_000us at 1kHz.
        assert_eq!(t, 50_000);
        let back = sample_for_uutc(0, 0, t, fs, None, RoundMode::Current);
        assert_eq!(back, 50);
    }

    #[test]
    fn find_end_is_one_less_than_find_start_of_next_sample() {
        let fs = 1000.0;
        let end_of_49 = uutc_for_sample(0, 0, 49, fs, None, FindMode::End);
        let start_of_50 = uutc_for_sample(0, 0, 50, fs, None, FindMode::Start);
        assert_eq!(end_of_49, start_of_50 - 1);
    }

    #[test]
    fn find_center_is_between_start_and_end() {
        let fs = 1000.0;
        let start = uutc_for_sample(0, 0, 50, fs, None, FindMode::Start);
        let end = uutc_for_sample(0, 0, 50, fs, None, FindMode::End);
        let center = uutc_for_sample(0, 0, 50, fs, None, FindMode::Center);
        assert!(center >= start && center <= end);
    }

    #[test]
    fn uutc_for_sample_with_indices_uses_bracketing_segment() {
        let indices = s6_indices();
        // sample 150 is within (index1, index2): 100 samples over 2_000_000us = 50Hz.
        // elapsed = 50 samples at 50Hz = 1_000_000us past index1's start_time (2_000_000).
        let t = uutc_for_sample(0, 0, 150, 0.0, Some(&indices), FindMode::Start);
        assert_eq!(t, 3_000_000);
    }
}
