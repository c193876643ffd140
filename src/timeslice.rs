//! Time-slice resolution across a channel or session (§4.6, §8 property 7).
//!
//! A [`TimeSlice`] is symmetric: either the time pair or the index pair is
//! given, and [`resolve_slice`] fills in the other along with which
//! segment(s) the window touches. Segment location itself is layered:
//! callers hand in [`SegmentExtent`]s sourced from `Sgmt` records when
//! available (§4.6 strategy 1) or from per-segment metadata otherwise
//! (strategy 2) — this module doesn't care which, it just walks whatever
//! list it's given. Cross-channel resolution (strategy 3) is the tree
//! reader's job: translate once against a reference channel, then either
//! reuse the answer for same-rate channels or call back in per channel.

use crate::time::{sample_for_uutc, uutc_for_sample};
use crate::types::{FindMode, RoundMode, UUTC_NO_ENTRY};
use crate::error::{MedError, Result};

/// One segment's absolute time/sample extent and (if fixed) its sampling
/// rate. `sampling_frequency = None` models §4.6's "variable" or "no
/// entry" case, which forces a fall-through to per-channel resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentExtent {
    pub segment_number: i32,
    pub start_time: i64,
    pub end_time: i64,
    pub absolute_start_sample_number: i64,
    pub absolute_end_sample_number: i64,
    pub sampling_frequency: Option<f64>,
}

impl SegmentExtent {
    pub fn contains_time(&self, t: i64) -> bool {
        t >= self.start_time && t <= self.end_time
    }

    pub fn contains_sample(&self, s: i64) -> bool {
        s >= self.absolute_start_sample_number && s <= self.absolute_end_sample_number
    }
}

/// A time-or-index range request; exactly one pair is supplied, the other
/// is computed by [`resolve_slice`] (§4.6).
#[derive(Debug, Clone, Copy)]
pub enum SliceRequest {
    ByTime { start_time: i64, end_time: i64 },
    ByIndex { start_index: i64, end_index: i64 },
}

/// The resolved window: request and response share one shape (§4.6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSlice {
    pub start_time: i64,
    pub end_time: i64,
    pub start_index: i64,
    pub end_index: i64,
    pub local_start_index: i64,
    pub local_end_index: i64,
    pub number_of_samples: i64,
    pub start_segment_number: i32,
    pub end_segment_number: i32,
    pub session_start_time: i64,
    pub session_end_time: i64,
    pub conditioned: bool,
}

/// Negative values mean "relative to session start" and large positive
/// values that don't land inside the session's own range are corrected by
/// subtracting `recording_time_offset`, when that correction lands the
/// value back inside range (§4.6).
pub fn condition_time(
    raw: i64,
    session_start_time: i64,
    session_end_time: i64,
    recording_time_offset: i64,
) -> (i64, bool) {
    if raw == UUTC_NO_ENTRY {
        return (raw, false);
    }
    if raw < 0 {
        return (session_start_time - raw, true);
    }
    if raw >= session_start_time && raw <= session_end_time {
        return (raw, false);
    }
    if recording_time_offset != 0 {
        let corrected = raw - recording_time_offset;
        if corrected > 0 && corrected >= session_start_time && corrected <= session_end_time {
            return (corrected, true);
        }
    }
    (raw, false)
}

fn find_segment_for_time(segments: &[SegmentExtent], t: i64, snap_forward: bool) -> Option<&SegmentExtent> {
    if let Some(seg) = segments.iter().find(|s| s.contains_time(t)) {
        return Some(seg);
    }
    if snap_forward {
        segments.iter().find(|s| s.start_time > t)
    } else {
        segments.iter().rev().find(|s| s.end_time < t)
    }
}

fn find_segment_for_sample(segments: &[SegmentExtent], s: i64, snap_forward: bool) -> Option<&SegmentExtent> {
    if let Some(seg) = segments.iter().find(|seg| seg.contains_sample(s)) {
        return Some(seg);
    }
    if snap_forward {
        segments.iter().find(|seg| seg.absolute_start_sample_number > s)
    } else {
        segments.iter().rev().find(|seg| seg.absolute_end_sample_number < s)
    }
}

fn require_fs(seg: &SegmentExtent) -> Result<f64> {
    seg.sampling_frequency.ok_or_else(|| {
        MedError::UnsupportedOperation(format!(
            "segment {} has no fixed sampling frequency; falls through to per-channel resolution",
            seg.segment_number
        ))
    })
}

fn absolute_sample_at_time(seg: &SegmentExtent, t: i64) -> Result<i64> {
    let fs = require_fs(seg)?;
    Ok(sample_for_uutc(
        seg.absolute_start_sample_number,
        seg.start_time,
        t,
        fs,
        None,
        RoundMode::Current,
    ))
}

fn time_at_absolute_sample(seg: &SegmentExtent, s: i64) -> Result<i64> {
    let fs = require_fs(seg)?;
    Ok(uutc_for_sample(
        seg.absolute_start_sample_number,
        seg.start_time,
        s,
        fs,
        None,
        FindMode::Start,
    ))
}

/// Resolve a [`SliceRequest`] against an ordered (by segment number) list
/// of segment extents belonging to one channel (or a reference channel of
/// a session), filling in whichever half of the symmetric record wasn't
/// supplied (§4.6).
pub fn resolve_slice(
    segments: &[SegmentExtent],
    request: SliceRequest,
    session_start_time: i64,
    session_end_time: i64,
) -> Result<TimeSlice> {
    if segments.is_empty() {
        return Err(MedError::NotFound("no segments to resolve a slice against".to_string()));
    }

    let (start_time, end_time, start_index, end_index) = match request {
        SliceRequest::ByTime { start_time, end_time } => {
            let start_seg = find_segment_for_time(segments, start_time, true)
                .ok_or_else(|| MedError::NotFound("start_time is after every segment".to_string()))?;
            let end_seg = find_segment_for_time(segments, end_time, false)
                .ok_or_else(|| MedError::NotFound("end_time is before every segment".to_string()))?;
            let start_index = absolute_sample_at_time(start_seg, start_time)?;
            let end_index = absolute_sample_at_time(end_seg, end_time)?;
            (start_time, end_time, start_index, end_index)
        }
        SliceRequest::ByIndex { start_index, end_index } => {
            let start_seg = find_segment_for_sample(segments, start_index, true)
                .ok_or_else(|| MedError::NotFound("start_index is after every segment".to_string()))?;
            let end_seg = find_segment_for_sample(segments, end_index, false)
                .ok_or_else(|| MedError::NotFound("end_index is before every segment".to_string()))?;
            let start_time = time_at_absolute_sample(start_seg, start_index)?;
            let end_time = time_at_absolute_sample(end_seg, end_index)?;
            (start_time, end_time, start_index, end_index)
        }
    };

    let start_seg = find_segment_for_sample(segments, start_index, true)
        .or_else(|| find_segment_for_time(segments, start_time, true))
        .ok_or_else(|| MedError::NotFound("resolved start_index matches no segment".to_string()))?;
    let end_seg = find_segment_for_sample(segments, end_index, false)
        .or_else(|| find_segment_for_time(segments, end_time, false))
        .ok_or_else(|| MedError::NotFound("resolved end_index matches no segment".to_string()))?;

    let local_start_index = start_index - start_seg.absolute_start_sample_number;
    let local_end_index = end_index - end_seg.absolute_start_sample_number;

    Ok(TimeSlice {
        start_time,
        end_time,
        start_index,
        end_index,
        local_start_index,
        local_end_index,
        number_of_samples: (end_index - start_index + 1).max(0),
        start_segment_number: start_seg.segment_number,
        end_segment_number: end_seg.segment_number,
        session_start_time,
        session_end_time,
        conditioned: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_segments() -> Vec<SegmentExtent> {
        vec![
            SegmentExtent {
                segment_number: 0,
                start_time: 0,
                end_time: 999_999,
                absolute_start_sample_number: 0,
                absolute_end_sample_number: 999,
                sampling_frequency: Some(1000.0),
            },
            SegmentExtent {
                segment_number: 1,
                start_time: 2_000_000,
                end_time: 2_999_999,
                absolute_start_sample_number: 1000,
                absolute_end_sample_number: 1999,
                sampling_frequency: Some(1000.0),
            },
        ]
    }

    #[test]
    fn by_time_and_by_index_agree_on_segment_numbers() {
        let segments = two_segments();
        let by_time = resolve_slice(
            &segments,
            SliceRequest::ByTime { start_time: 500_000, end_time: 2_500_000 },
            0,
            3_000_000,
        )
        .unwrap();

        let by_index = resolve_slice(
            &segments,
            SliceRequest::ByIndex {
                start_index: by_time.start_index,
                end_index: by_time.end_index,
            },
            0,
            3_000_000,
        )
        .unwrap();

        assert_eq!(by_time.start_segment_number, by_index.start_segment_number);
        assert_eq!(by_time.end_segment_number, by_index.end_segment_number);
        assert_eq!(by_time.local_start_index, by_index.local_start_index);
        assert_eq!(by_time.local_end_index, by_index.local_end_index);
    }

    #[test]
    fn start_between_segments_snaps_forward() {
        let segments = two_segments();
        let slice = resolve_slice(
            &segments,
            SliceRequest::ByTime { start_time: 1_500_000, end_time: 2_500_000 },
            0,
            3_000_000,
        )
        .unwrap();
        assert_eq!(slice.start_segment_number, 1);
    }

    #[test]
    fn end_between_segments_snaps_backward() {
        let segments = two_segments();
        let slice = resolve_slice(
            &segments,
            SliceRequest::ByTime { start_time: 0, end_time: 1_500_000 },
            0,
            3_000_000,
        )
        .unwrap();
        assert_eq!(slice.end_segment_number, 0);
    }

    #[test]
    fn negative_time_is_relative_to_session_start() {
        let (t, conditioned) = condition_time(-5000, 1_000_000, 9_000_000, 0);
        assert_eq!(t, 1_005_000);
        assert!(conditioned);
    }

    #[test]
    fn un_offset_large_value_is_corrected_when_it_lands_in_range() {
        let (t, conditioned) = condition_time(11_000_000, 1_000_000, 9_000_000, 10_000_000);
        assert_eq!(t, 1_000_000);
        assert!(conditioned);
    }

    #[test]
    fn value_already_in_range_is_untouched() {
        let (t, conditioned) = condition_time(5_000_000, 1_000_000, 9_000_000, 10_000_000);
        assert_eq!(t, 5_000_000);
        assert!(!conditioned);
    }

    #[test]
    fn missing_segments_is_not_found() {
        let err = resolve_slice(&[], SliceRequest::ByTime { start_time: 0, end_time: 1 }, 0, 1).unwrap_err();
        assert!(matches!(err, MedError::NotFound(_)));
    }
}
