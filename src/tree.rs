//! Session → Channel → Segment tree reader (§2.9, §3.9).
//!
//! MED lays a recording out as nested directories rather than a single
//! file: a session directory holding one subdirectory per channel, each
//! holding one subdirectory per segment. This module walks that tree into
//! an ordinary arena of owned values — `Session { channels: Vec<Channel> }`,
//! `Channel { segments: Vec<Segment> }` — rather than a graph of pointers
//! back to parents; anything a segment needs to know about its channel or
//! session is passed down explicitly by the caller, not stored on the
//! segment itself.
//!
//! Files are identified by the `type_code` in their own universal header,
//! not by filename convention — a segment directory is simply scanned for
//! whichever member claims to be metadata, an index, or record data.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MedError, Result};
use crate::fileproc::FileProcessor;
use crate::header::{SegmentLevel, UniversalHeader};
use crate::index::TimeSeriesIndex;
use crate::metadata::{Metadata, Section1, Section2, Section3};
use crate::record::{Record, RecordBody, SgmtV10};
use crate::timeslice::{condition_time, resolve_slice, SegmentExtent, SliceRequest, TimeSlice};
use crate::types::{
    TypeCode, Uid, METADATA_BYTES, METADATA_SECTION_BYTES, RECORD_HEADER_BYTES,
    TIME_SERIES_INDEX_BYTES, UID_NO_ENTRY, UNIVERSAL_HEADER_BYTES,
};

/// Locate the (at most one) file directly inside `dir` whose own universal
/// header claims `type_code`.
fn find_file_by_type(dir: &Path, type_code: TypeCode) -> Result<Option<PathBuf>> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let mut fp = match FileProcessor::open_read_only(&path) {
            Ok(fp) => fp,
            Err(_) => continue,
        };
        if fp.len()? < UNIVERSAL_HEADER_BYTES as u64 {
            continue;
        }
        if let Ok(header) = UniversalHeader::from_bytes(&fp.read_header()?) {
            if header.type_code == type_code {
                return Ok(Some(path));
            }
        }
    }
    Ok(None)
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn read_metadata_file(path: &Path) -> Result<(UniversalHeader, Metadata)> {
    let mut fp = FileProcessor::open_read_only(path)?;
    let header = UniversalHeader::from_bytes(&fp.read_header()?)?;
    let body = fp.read_at(UNIVERSAL_HEADER_BYTES as u64, METADATA_BYTES)?;
    let s1: [u8; METADATA_SECTION_BYTES] = body[0..METADATA_SECTION_BYTES].try_into().unwrap();
    let s2: [u8; METADATA_SECTION_BYTES] =
        body[METADATA_SECTION_BYTES..METADATA_SECTION_BYTES * 2].try_into().unwrap();
    let s3: [u8; METADATA_SECTION_BYTES] =
        body[METADATA_SECTION_BYTES * 2..METADATA_SECTION_BYTES * 3].try_into().unwrap();
    let metadata = Metadata {
        section_1: Section1::from_bytes(&s1),
        section_2: Section2::from_bytes(&s2)?,
        section_3: Section3::from_bytes(&s3),
    };
    Ok((header, metadata))
}

fn read_index_file(path: &Path) -> Result<Vec<TimeSeriesIndex>> {
    let mut fp = FileProcessor::open_read_only(path)?;
    let body_len = fp.len()?.saturating_sub(UNIVERSAL_HEADER_BYTES as u64);
    let body = fp.read_at(UNIVERSAL_HEADER_BYTES as u64, body_len as usize)?;
    let mut out = Vec::with_capacity(body.len() / TIME_SERIES_INDEX_BYTES);
    for chunk in body.chunks_exact(TIME_SERIES_INDEX_BYTES) {
        let arr: [u8; TIME_SERIES_INDEX_BYTES] = chunk.try_into().unwrap();
        out.push(TimeSeriesIndex::from_bytes(&arr));
    }
    Ok(out)
}

fn read_record_file(path: &Path) -> Result<Vec<Record>> {
    let mut fp = FileProcessor::open_read_only(path)?;
    let body_len = fp.len()?.saturating_sub(UNIVERSAL_HEADER_BYTES as u64);
    let body = fp.read_at(UNIVERSAL_HEADER_BYTES as u64, body_len as usize)?;
    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset + RECORD_HEADER_BYTES <= body.len() {
        let record = Record::from_bytes(&body[offset..])?;
        offset += record.header.total_record_bytes as usize;
        records.push(record);
    }
    Ok(records)
}

/// One recorded segment: a fixed time/sample range, its own metadata, its
/// own index table, and whatever records it carries (§2.9, §3.9).
#[derive(Debug, Clone)]
pub struct Segment {
    pub segment_number: i32,
    pub uid: Uid,
    pub header: UniversalHeader,
    pub metadata: Metadata,
    pub index: Vec<TimeSeriesIndex>,
    pub records: Vec<Record>,
    pub data_path: Option<PathBuf>,
}

impl Segment {
    pub fn open(dir: &Path) -> Result<Segment> {
        let metadata_path = match find_file_by_type(dir, TypeCode::TIME_SERIES_METADATA)? {
            Some(path) => path,
            None => find_file_by_type(dir, TypeCode::VIDEO_METADATA)?
                .ok_or_else(|| MedError::NotFound(format!("no metadata file under {}", dir.display())))?,
        };
        let (header, metadata) = read_metadata_file(&metadata_path)?;

        let index = match find_file_by_type(dir, TypeCode::TIME_SERIES_INDEX)? {
            Some(path) => read_index_file(&path)?,
            None => Vec::new(),
        };

        let records = match find_file_by_type(dir, TypeCode::RECORD_DATA)? {
            Some(path) => read_record_file(&path)?,
            None => Vec::new(),
        };

        let data_path = find_file_by_type(dir, TypeCode::TIME_SERIES_DATA)?;

        let segment_number = match header.segment_level {
            SegmentLevel::Segment(n) => n,
            _ => {
                return Err(MedError::MalformedData(format!(
                    "{} is not a segment-level file",
                    metadata_path.display()
                )))
            }
        };

        Ok(Segment {
            segment_number,
            uid: header.segment_uid,
            header,
            metadata,
            index,
            records,
            data_path,
        })
    }

    /// This segment's own `Sgmt` record, if it wrote one (§4.6 strategy 1).
    pub fn sgmt_record(&self) -> Option<&SgmtV10> {
        self.records.iter().find_map(|r| match &r.body {
            RecordBody::Sgmt(s) => Some(s),
            RecordBody::Unknown(_) => None,
        })
    }

    /// The segment's time/sample extent: its own `Sgmt` record when present
    /// (strategy 1), else `TimeSeriesSection2` metadata (strategy 2, §4.6).
    pub fn extent(&self) -> Result<SegmentExtent> {
        if let Some(sgmt) = self.sgmt_record() {
            return Ok(SegmentExtent {
                segment_number: self.segment_number,
                start_time: sgmt.start_time,
                end_time: sgmt.end_time,
                absolute_start_sample_number: sgmt.absolute_start_sample_number,
                absolute_end_sample_number: sgmt.absolute_end_sample_number,
                sampling_frequency: if sgmt.has_no_fixed_rate() {
                    None
                } else {
                    Some(sgmt.sampling_frequency)
                },
            });
        }
        match &self.metadata.section_2 {
            Section2::TimeSeries(ts) => Ok(SegmentExtent {
                segment_number: self.segment_number,
                start_time: self.header.file_start_time,
                end_time: self.header.file_end_time,
                absolute_start_sample_number: ts.absolute_start_sample_number,
                absolute_end_sample_number: ts.absolute_start_sample_number + ts.number_of_samples - 1,
                sampling_frequency: if ts.sampling_frequency > 0.0 {
                    Some(ts.sampling_frequency)
                } else {
                    None
                },
            }),
            Section2::Video(_) => Err(MedError::UnsupportedOperation(
                "time-slice resolution is not defined over video segments".to_string(),
            )),
        }
    }
}

/// One channel: an ordered run of segments (§2.9, §3.9).
#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub uid: Uid,
    pub segments: Vec<Segment>,
}

impl Channel {
    pub fn open(dir: &Path) -> Result<Channel> {
        let mut segments = Vec::new();
        for seg_dir in subdirectories(dir)? {
            segments.push(Segment::open(&seg_dir)?);
        }
        segments.sort_by_key(|s| s.segment_number);
        let name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let uid = segments.first().map(|s| s.header.channel_uid).unwrap_or(UID_NO_ENTRY);
        Ok(Channel { name, uid, segments })
    }

    /// This channel's segments as [`SegmentExtent`]s, in segment-number
    /// order, ready to hand to [`resolve_slice`].
    pub fn extents(&self) -> Result<Vec<SegmentExtent>> {
        self.segments.iter().map(Segment::extent).collect()
    }

    /// Resolve a time/index window against this channel alone (§4.6
    /// strategies 1 and 2; cross-channel reuse is [`Session::read_slice`]'s
    /// job).
    pub fn resolve_slice(
        &self,
        request: SliceRequest,
        session_start_time: i64,
        session_end_time: i64,
    ) -> Result<TimeSlice> {
        let extents = self.extents()?;
        resolve_slice(&extents, request, session_start_time, session_end_time)
    }

    /// Translate an already-resolved time range into this channel's own
    /// segment numbers and local sample indices (§4.6 strategy 3): every
    /// channel in a session shares the same µUTC epoch, so a slice resolved
    /// against one channel is translated into another by resolving the same
    /// time range against that channel's own segments, rather than assuming
    /// a shared sampling rate.
    pub fn local_range_for_time(&self, start_time: i64, end_time: i64) -> Result<(i32, i64, i32, i64)> {
        let extents = self.extents()?;
        let start = resolve_slice(
            &extents,
            SliceRequest::ByTime { start_time, end_time: start_time },
            i64::MIN,
            i64::MAX,
        )?;
        let end = resolve_slice(
            &extents,
            SliceRequest::ByTime { start_time: end_time, end_time },
            i64::MIN,
            i64::MAX,
        )?;
        Ok((start.start_segment_number, start.local_start_index, end.end_segment_number, end.local_end_index))
    }
}

/// A full recording: every channel the session directory holds (§2.9, §3.9).
#[derive(Debug, Clone)]
pub struct Session {
    pub name: String,
    pub channels: Vec<Channel>,
}

impl Session {
    pub fn open(dir: &Path) -> Result<Session> {
        let mut channels = Vec::new();
        for chan_dir in subdirectories(dir)? {
            channels.push(Channel::open(&chan_dir)?);
        }
        let name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        Ok(Session { name, channels })
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// The session's own start/end time: the widest span any channel's
    /// segments cover.
    pub fn time_bounds(&self) -> Result<(i64, i64)> {
        let mut start = i64::MAX;
        let mut end = i64::MIN;
        for channel in &self.channels {
            for extent in channel.extents()? {
                start = start.min(extent.start_time);
                end = end.max(extent.end_time);
            }
        }
        if start > end {
            return Err(MedError::NotFound("session has no segments".to_string()));
        }
        Ok((start, end))
    }

    /// Resolve a time/index window against `reference_channel` (§4.6
    /// strategy 3's entry point): negative or suspiciously-large-positive
    /// time limits are conditioned against the session's own bounds first.
    pub fn read_slice(&self, reference_channel: &str, request: SliceRequest) -> Result<TimeSlice> {
        let (session_start, session_end) = self.time_bounds()?;
        let channel = self
            .channel(reference_channel)
            .ok_or_else(|| MedError::NotFound(format!("no channel named {reference_channel}")))?;
        let recording_time_offset = channel
            .segments
            .first()
            .map(|s| s.metadata.section_3.recording_time_offset)
            .unwrap_or(0);

        let (request, conditioned) = match request {
            SliceRequest::ByTime { start_time, end_time } => {
                let (start_time, c1) = condition_time(start_time, session_start, session_end, recording_time_offset);
                let (end_time, c2) = condition_time(end_time, session_start, session_end, recording_time_offset);
                (SliceRequest::ByTime { start_time, end_time }, c1 || c2)
            }
            by_index => (by_index, false),
        };

        let mut slice = channel.resolve_slice(request, session_start, session_end)?;
        slice.conditioned = conditioned;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc32;
    use crate::metadata::{Section2Common, TimeSeriesSection2};
    use tempfile::tempdir;

    fn write_segment(
        dir: &Path,
        segment_number: i32,
        start_time: i64,
        end_time: i64,
        start_sample: i64,
        n_samples: i64,
        fs: f64,
    ) -> Result<()> {
        fs::create_dir_all(dir)?;

        let mut header = UniversalHeader::new(TypeCode::TIME_SERIES_METADATA, SegmentLevel::Segment(segment_number));
        header.file_start_time = start_time;
        header.file_end_time = end_time;
        let metadata = Metadata {
            section_1: Section1 {
                password_hint_1: String::new(),
                password_hint_2: String::new(),
                section_2_encryption_level: 0,
                section_3_encryption_level: 0,
            },
            section_2: Section2::TimeSeries(TimeSeriesSection2 {
                common: Section2Common::default(),
                sampling_frequency: fs,
                low_frequency_filter_setting: 0.0,
                high_frequency_filter_setting: 0.0,
                notch_filter_frequency: 0.0,
                absolute_start_sample_number: start_sample,
                number_of_samples: n_samples,
                number_of_blocks: 1,
                maximum_sample_value: 0,
                minimum_sample_value: 0,
                maximum_block_bytes: 0,
                number_of_discontinuities: 0,
            }),
            section_3: Section3 {
                recording_time_offset: 0,
                daylight_time_start_code: 0,
                daylight_time_end_code: 0,
                standard_timezone_acronym: String::new(),
                standard_timezone_string: String::new(),
                daylight_timezone_acronym: String::new(),
                daylight_timezone_string: String::new(),
                subject_name_1: String::new(),
                subject_name_2: String::new(),
                subject_id: String::new(),
                recording_location: String::new(),
                geotag: String::new(),
                standard_utc_offset: 0,
            },
        };

        let mut body = Vec::with_capacity(METADATA_BYTES);
        body.extend_from_slice(&metadata.section_1.to_bytes().unwrap());
        body.extend_from_slice(&metadata.section_2.to_bytes().unwrap());
        body.extend_from_slice(&metadata.section_3.to_bytes().unwrap());
        header.body_crc = crc32::calculate(&body);
        header.header_crc = header.compute_header_crc();

        let mut fp = FileProcessor::allocate(dir.join("segment.tmet"), crate::error::Behavior::RETRY_ONCE)?;
        fp.write_body_then_header(&body, &header.to_bytes())?;

        let sgmt = SgmtV10 {
            start_time,
            end_time,
            absolute_start_sample_number: start_sample,
            absolute_end_sample_number: start_sample + n_samples - 1,
            sampling_frequency: fs,
            segment_number,
        };
        let record = Record::new_sgmt(start_time, sgmt, 0).to_bytes();
        let mut rheader = UniversalHeader::new(TypeCode::RECORD_DATA, SegmentLevel::Segment(segment_number));
        rheader.body_crc = crc32::calculate(&record);
        rheader.header_crc = rheader.compute_header_crc();
        let mut rfp = FileProcessor::allocate(dir.join("segment.rdat"), crate::error::Behavior::RETRY_ONCE)?;
        rfp.write_body_then_header(&record, &rheader.to_bytes())?;

        Ok(())
    }

    #[test]
    fn reads_a_channel_with_two_segments() {
        let dir = tempdir().unwrap();
        let chan_dir = dir.path().join("session").join("chan-0");
        write_segment(&chan_dir.join("seg-0"), 0, 0, 999_999, 0, 1000, 1000.0).unwrap();
        write_segment(&chan_dir.join("seg-1"), 1, 2_000_000, 2_999_999, 1000, 1000, 1000.0).unwrap();

        let channel = Channel::open(&chan_dir).unwrap();
        assert_eq!(channel.segments.len(), 2);
        assert_eq!(channel.segments[0].segment_number, 0);
        assert_eq!(channel.segments[1].segment_number, 1);

        let extents = channel.extents().unwrap();
        assert_eq!(extents[0].absolute_end_sample_number, 999);
        assert_eq!(extents[1].absolute_start_sample_number, 1000);
    }

    #[test]
    fn session_resolves_a_slice_against_a_reference_channel() {
        let dir = tempdir().unwrap();
        let session_dir = dir.path().join("session");
        write_segment(&session_dir.join("chan-0").join("seg-0"), 0, 0, 999_999, 0, 1000, 1000.0).unwrap();
        write_segment(&session_dir.join("chan-0").join("seg-1"), 1, 2_000_000, 2_999_999, 1000, 1000, 1000.0).unwrap();

        let session = Session::open(&session_dir).unwrap();
        let slice = session
            .read_slice("chan-0", SliceRequest::ByTime { start_time: 500_000, end_time: 2_500_000 })
            .unwrap();
        assert_eq!(slice.start_segment_number, 0);
        assert_eq!(slice.end_segment_number, 1);
    }

    #[test]
    fn negative_time_request_is_conditioned_against_session_start() {
        let dir = tempdir().unwrap();
        let session_dir = dir.path().join("session");
        write_segment(&session_dir.join("chan-0").join("seg-0"), 0, 1_000_000, 1_999_999, 0, 1000, 1000.0).unwrap();

        let session = Session::open(&session_dir).unwrap();
        let slice = session
            .read_slice("chan-0", SliceRequest::ByTime { start_time: -100_000, end_time: 1_500_000 })
            .unwrap();
        assert!(slice.conditioned);
    }
}
