//! Index tables: 24-byte fixed-width records letting readers locate time
//! series, video, and record payloads without a linear scan (§3, §4.3, §6).

use byteorder::{ByteOrder, LittleEndian};

use crate::types::{RECORD_INDEX_BYTES, TIME_SERIES_INDEX_BYTES, TypeCode, VIDEO_INDEX_BYTES};

/// Sign bit of `file_offset` marking the entry as following a discontinuity.
const DISCONTINUITY_BIT: i64 = i64::MIN;

/// One entry of a time-series index table (24 bytes): where a block starts
/// in the data file, when it starts, and its first segment-local sample
/// number. Entries are strictly ordered by `start_sample_number`; a
/// terminal sentinel entry gives `(end_time + 1, total_samples)` so ranges
/// read as half-open (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSeriesIndex {
    pub file_offset: i64,
    pub start_time: i64,
    pub start_sample_number: i64,
}

impl TimeSeriesIndex {
    pub fn is_discontinuity(&self) -> bool {
        self.file_offset & DISCONTINUITY_BIT != 0
    }

    pub fn raw_file_offset(&self) -> i64 {
        self.file_offset & !DISCONTINUITY_BIT
    }

    pub fn new(file_offset: i64, start_time: i64, start_sample_number: i64, discontinuity: bool) -> TimeSeriesIndex {
        let tagged = if discontinuity {
            file_offset | DISCONTINUITY_BIT
        } else {
            file_offset
        };
        TimeSeriesIndex {
            file_offset: tagged,
            start_time,
            start_sample_number,
        }
    }

    pub fn to_bytes(&self) -> [u8; TIME_SERIES_INDEX_BYTES] {
        let mut buf = [0u8; TIME_SERIES_INDEX_BYTES];
        LittleEndian::write_i64(&mut buf[0..], self.file_offset);
        LittleEndian::write_i64(&mut buf[8..], self.start_time);
        LittleEndian::write_i64(&mut buf[16..], self.start_sample_number);
        buf
    }

    pub fn from_bytes(buf: &[u8; TIME_SERIES_INDEX_BYTES]) -> TimeSeriesIndex {
        TimeSeriesIndex {
            file_offset: LittleEndian::read_i64(&buf[0..]),
            start_time: LittleEndian::read_i64(&buf[8..]),
            start_sample_number: LittleEndian::read_i64(&buf[16..]),
        }
    }
}

/// One entry of a video index table (24 bytes): the video analog of
/// [`TimeSeriesIndex`], keyed by frame number instead of sample number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoIndex {
    pub file_offset: i64,
    pub start_time: i64,
    pub start_frame_number: i64,
}

impl VideoIndex {
    pub fn to_bytes(&self) -> [u8; VIDEO_INDEX_BYTES] {
        let mut buf = [0u8; VIDEO_INDEX_BYTES];
        LittleEndian::write_i64(&mut buf[0..], self.file_offset);
        LittleEndian::write_i64(&mut buf[8..], self.start_time);
        LittleEndian::write_i64(&mut buf[16..], self.start_frame_number);
        buf
    }

    pub fn from_bytes(buf: &[u8; VIDEO_INDEX_BYTES]) -> VideoIndex {
        VideoIndex {
            file_offset: LittleEndian::read_i64(&buf[0..]),
            start_time: LittleEndian::read_i64(&buf[8..]),
            start_frame_number: LittleEndian::read_i64(&buf[16..]),
        }
    }
}

/// One entry of a record index table (24 bytes): where a record starts in
/// its `.rdat` file, when it starts, and its type code — lets a reader
/// find every `Sgmt` record without walking unrelated record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordIndex {
    pub file_offset: i64,
    pub start_time: i64,
    pub type_code: TypeCode,
    pub version_major: u8,
    pub version_minor: u8,
}

impl RecordIndex {
    pub fn to_bytes(&self) -> [u8; RECORD_INDEX_BYTES] {
        let mut buf = [0u8; RECORD_INDEX_BYTES];
        LittleEndian::write_i64(&mut buf[0..], self.file_offset);
        LittleEndian::write_i64(&mut buf[8..], self.start_time);
        buf[16..20].copy_from_slice(&self.type_code.0);
        buf[20] = self.version_major;
        buf[21] = self.version_minor;
        buf
    }

    pub fn from_bytes(buf: &[u8; RECORD_INDEX_BYTES]) -> RecordIndex {
        RecordIndex {
            file_offset: LittleEndian::read_i64(&buf[0..]),
            start_time: LittleEndian::read_i64(&buf[8..]),
            type_code: TypeCode(buf[16..20].try_into().unwrap()),
            version_major: buf[20],
            version_minor: buf[21],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_series_index_round_trips_with_discontinuity_bit() {
        let idx = TimeSeriesIndex::new(4096, 2_000_000, 100, true);
        assert!(idx.is_discontinuity());
        assert_eq!(idx.raw_file_offset(), 4096);

        let back = TimeSeriesIndex::from_bytes(&idx.to_bytes());
        assert_eq!(back, idx);
        assert!(back.is_discontinuity());
    }

    #[test]
    fn time_series_index_without_discontinuity() {
        let idx = TimeSeriesIndex::new(8192, 1_000_000, 0, false);
        assert!(!idx.is_discontinuity());
        assert_eq!(idx.raw_file_offset(), 8192);
    }

    #[test]
    fn record_index_round_trips() {
        let idx = RecordIndex {
            file_offset: 1024,
            start_time: 500,
            type_code: TypeCode(*b"Sgmt"),
            version_major: 1,
            version_minor: 0,
        };
        let back = RecordIndex::from_bytes(&idx.to_bytes());
        assert_eq!(back, idx);
    }
}
