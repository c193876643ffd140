//! Metadata — 3 × 1024-byte sections stored alongside every segment/channel (§3).

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{MedError, Result};
use crate::types::METADATA_SECTION_BYTES;

/// Section 1: password hints and the native/current encryption level of the
/// other two sections. Positive = currently encrypted at that level;
/// negative magnitude = decrypted in memory but natively stored at `|level|`.
#[derive(Debug, Clone)]
pub struct Section1 {
    pub password_hint_1: String,
    pub password_hint_2: String,
    pub section_2_encryption_level: i8,
    pub section_3_encryption_level: i8,
}

/// Common prefix shared by both Section 2 variants.
#[derive(Debug, Clone, Default)]
pub struct Section2Common {
    pub session_description: String,
    pub channel_description: String,
    pub segment_description: String,
    pub equipment_description: String,
    pub acquisition_channel_number: i32,
}

#[derive(Debug, Clone)]
pub struct TimeSeriesSection2 {
    pub common: Section2Common,
    pub sampling_frequency: f64,
    pub low_frequency_filter_setting: f64,
    pub high_frequency_filter_setting: f64,
    pub notch_filter_frequency: f64,
    pub absolute_start_sample_number: i64,
    pub number_of_samples: i64,
    pub number_of_blocks: i64,
    pub maximum_sample_value: i32,
    pub minimum_sample_value: i32,
    pub maximum_block_bytes: u32,
    pub number_of_discontinuities: i64,
}

#[derive(Debug, Clone)]
pub struct VideoSection2 {
    pub common: Section2Common,
    pub frame_rate: f64,
    pub number_of_clips: i64,
    pub maximum_clip_bytes: u32,
    pub horizontal_resolution: u32,
    pub vertical_resolution: u32,
}

/// Section 2 is a tagged sum type: a segment/channel is either time-series
/// or video, never both and never a raw union (§9).
#[derive(Debug, Clone)]
pub enum Section2 {
    TimeSeries(TimeSeriesSection2),
    Video(VideoSection2),
}

/// Section 3: recording time offset, timezone/DST data, subject and location.
#[derive(Debug, Clone)]
pub struct Section3 {
    pub recording_time_offset: i64,
    pub daylight_time_start_code: i64,
    pub daylight_time_end_code: i64,
    pub standard_timezone_acronym: String,
    pub standard_timezone_string: String,
    pub daylight_timezone_acronym: String,
    pub daylight_timezone_string: String,
    pub subject_name_1: String,
    pub subject_name_2: String,
    pub subject_id: String,
    pub recording_location: String,
    pub geotag: String,
    pub standard_utc_offset: i32,
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub section_1: Section1,
    pub section_2: Section2,
    pub section_3: Section3,
}

impl Metadata {
    /// Add `recording_time_offset` to `on_disk_time` to recover absolute
    /// µUTC (§4.5). Values already outside the plausible offset-adjusted
    /// range pass through unchanged — they're treated as already-absolute.
    pub fn apply_recording_time_offset(&self, on_disk_time: i64) -> i64 {
        on_disk_time.saturating_add(self.section_3.recording_time_offset)
    }

    /// Subtract `recording_time_offset` to de-identify an absolute µUTC
    /// before storing it on disk.
    pub fn remove_recording_time_offset(&self, absolute_time: i64) -> i64 {
        absolute_time.saturating_sub(self.section_3.recording_time_offset)
    }
}

fn write_str(buf: &mut Vec<u8>, s: &str, width: usize) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > width {
        return Err(MedError::InvalidArgument(format!(
            "string of {} bytes does not fit in {width}-byte field",
            bytes.len()
        )));
    }
    let start = buf.len();
    buf.resize(start + width, 0);
    buf[start..start + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn read_str(buf: &[u8], offset: usize, width: usize) -> String {
    let field = &buf[offset..offset + width];
    let end = field.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

const HINT_WIDTH: usize = 128;
const DESC_WIDTH: usize = 64;
const TZ_WIDTH: usize = 32;
const SUBJECT_WIDTH: usize = 64;
const LOCATION_WIDTH: usize = 128;

impl Section1 {
    pub fn to_bytes(&self) -> Result<[u8; METADATA_SECTION_BYTES]> {
        let mut buf = Vec::with_capacity(METADATA_SECTION_BYTES);
        write_str(&mut buf, &self.password_hint_1, HINT_WIDTH)?;
        write_str(&mut buf, &self.password_hint_2, HINT_WIDTH)?;
        buf.push(self.section_2_encryption_level as u8);
        buf.push(self.section_3_encryption_level as u8);
        buf.resize(METADATA_SECTION_BYTES, 0);
        Ok(buf.try_into().unwrap())
    }

    pub fn from_bytes(buf: &[u8; METADATA_SECTION_BYTES]) -> Section1 {
        let password_hint_1 = read_str(buf, 0, HINT_WIDTH);
        let password_hint_2 = read_str(buf, HINT_WIDTH, HINT_WIDTH);
        let off = HINT_WIDTH * 2;
        Section1 {
            password_hint_1,
            password_hint_2,
            section_2_encryption_level: buf[off] as i8,
            section_3_encryption_level: buf[off + 1] as i8,
        }
    }
}

const SECTION2_KIND_TIME_SERIES: u8 = 1;
const SECTION2_KIND_VIDEO: u8 = 2;

impl Section2 {
    pub fn to_bytes(&self) -> Result<[u8; METADATA_SECTION_BYTES]> {
        let mut buf = Vec::with_capacity(METADATA_SECTION_BYTES);
        match self {
            Section2::TimeSeries(ts) => {
                buf.push(SECTION2_KIND_TIME_SERIES);
                write_str(&mut buf, &ts.common.session_description, DESC_WIDTH)?;
                write_str(&mut buf, &ts.common.channel_description, DESC_WIDTH)?;
                write_str(&mut buf, &ts.common.segment_description, DESC_WIDTH)?;
                write_str(&mut buf, &ts.common.equipment_description, DESC_WIDTH)?;
                buf.extend_from_slice(&ts.common.acquisition_channel_number.to_le_bytes());
                buf.extend_from_slice(&ts.sampling_frequency.to_le_bytes());
                buf.extend_from_slice(&ts.low_frequency_filter_setting.to_le_bytes());
                buf.extend_from_slice(&ts.high_frequency_filter_setting.to_le_bytes());
                buf.extend_from_slice(&ts.notch_filter_frequency.to_le_bytes());
                buf.extend_from_slice(&ts.absolute_start_sample_number.to_le_bytes());
                buf.extend_from_slice(&ts.number_of_samples.to_le_bytes());
                buf.extend_from_slice(&ts.number_of_blocks.to_le_bytes());
                buf.extend_from_slice(&ts.maximum_sample_value.to_le_bytes());
                buf.extend_from_slice(&ts.minimum_sample_value.to_le_bytes());
                buf.extend_from_slice(&ts.maximum_block_bytes.to_le_bytes());
                buf.extend_from_slice(&ts.number_of_discontinuities.to_le_bytes());
            }
            Section2::Video(v) => {
                buf.push(SECTION2_KIND_VIDEO);
                write_str(&mut buf, &v.common.session_description, DESC_WIDTH)?;
                write_str(&mut buf, &v.common.channel_description, DESC_WIDTH)?;
                write_str(&mut buf, &v.common.segment_description, DESC_WIDTH)?;
                write_str(&mut buf, &v.common.equipment_description, DESC_WIDTH)?;
                buf.extend_from_slice(&v.common.acquisition_channel_number.to_le_bytes());
                buf.extend_from_slice(&v.frame_rate.to_le_bytes());
                buf.extend_from_slice(&v.number_of_clips.to_le_bytes());
                buf.extend_from_slice(&v.maximum_clip_bytes.to_le_bytes());
                buf.extend_from_slice(&v.horizontal_resolution.to_le_bytes());
                buf.extend_from_slice(&v.vertical_resolution.to_le_bytes());
            }
        }
        if buf.len() > METADATA_SECTION_BYTES {
            return Err(MedError::Overflow(
                "section 2 payload exceeds 1024 bytes".to_string(),
            ));
        }
        buf.resize(METADATA_SECTION_BYTES, 0);
        Ok(buf.try_into().unwrap())
    }

    pub fn from_bytes(buf: &[u8; METADATA_SECTION_BYTES]) -> Result<Section2> {
        let mut off = 1;
        let mut next_str = |width: usize| {
            let s = read_str(buf, off, width);
            off += width;
            s
        };
        match buf[0] {
            SECTION2_KIND_TIME_SERIES => {
                let common = Section2Common {
                    session_description: next_str(DESC_WIDTH),
                    channel_description: next_str(DESC_WIDTH),
                    segment_description: next_str(DESC_WIDTH),
                    equipment_description: next_str(DESC_WIDTH),
                    acquisition_channel_number: LittleEndian::read_i32(&buf[off..]),
                };
                off += 4;
                let sampling_frequency = LittleEndian::read_f64(&buf[off..]);
                off += 8;
                let low_frequency_filter_setting = LittleEndian::read_f64(&buf[off..]);
                off += 8;
                let high_frequency_filter_setting = LittleEndian::read_f64(&buf[off..]);
                off += 8;
                let notch_filter_frequency = LittleEndian::read_f64(&buf[off..]);
                off += 8;
                let absolute_start_sample_number = LittleEndian::read_i64(&buf[off..]);
                off += 8;
                let number_of_samples = LittleEndian::read_i64(&buf[off..]);
                off += 8;
                let number_of_blocks = LittleEndian::read_i64(&buf[off..]);
                off += 8;
                let maximum_sample_value = LittleEndian::read_i32(&buf[off..]);
                off += 4;
                let minimum_sample_value = LittleEndian::read_i32(&buf[off..]);
                off += 4;
                let maximum_block_bytes = LittleEndian::read_u32(&buf[off..]);
                off += 4;
                let number_of_discontinuities = LittleEndian::read_i64(&buf[off..]);
                Ok(Section2::TimeSeries(TimeSeriesSection2 {
                    common,
                    sampling_frequency,
                    low_frequency_filter_setting,
                    high_frequency_filter_setting,
                    notch_filter_frequency,
                    absolute_start_sample_number,
                    number_of_samples,
                    number_of_blocks,
                    maximum_sample_value,
                    minimum_sample_value,
                    maximum_block_bytes,
                    number_of_discontinuities,
                }))
            }
            SECTION2_KIND_VIDEO => {
                let common = Section2Common {
                    session_description: next_str(DESC_WIDTH),
                    channel_description: next_str(DESC_WIDTH),
                    segment_description: next_str(DESC_WIDTH),
                    equipment_description: next_str(DESC_WIDTH),
                    acquisition_channel_number: LittleEndian::read_i32(&buf[off..]),
                };
                off += 4;
                let frame_rate = LittleEndian::read_f64(&buf[off..]);
                off += 8;
                let number_of_clips = LittleEndian::read_i64(&buf[off..]);
                off += 8;
                let maximum_clip_bytes = LittleEndian::read_u32(&buf[off..]);
                off += 4;
                let horizontal_resolution = LittleEndian::read_u32(&buf[off..]);
                off += 4;
                let vertical_resolution = LittleEndian::read_u32(&buf[off..]);
                Ok(Section2::Video(VideoSection2 {
                    common,
                    frame_rate,
                    number_of_clips,
                    maximum_clip_bytes,
                    horizontal_resolution,
                    vertical_resolution,
                }))
            }
            other => Err(MedError::MalformedData(format!(
                "unknown metadata section 2 kind tag {other}"
            ))),
        }
    }
}

impl Section3 {
    pub fn to_bytes(&self) -> Result<[u8; METADATA_SECTION_BYTES]> {
        let mut buf = Vec::with_capacity(METADATA_SECTION_BYTES);
        buf.extend_from_slice(&self.recording_time_offset.to_le_bytes());
        buf.extend_from_slice(&self.daylight_time_start_code.to_le_bytes());
        buf.extend_from_slice(&self.daylight_time_end_code.to_le_bytes());
        write_str(&mut buf, &self.standard_timezone_acronym, TZ_WIDTH)?;
        write_str(&mut buf, &self.standard_timezone_string, TZ_WIDTH)?;
        write_str(&mut buf, &self.daylight_timezone_acronym, TZ_WIDTH)?;
        write_str(&mut buf, &self.daylight_timezone_string, TZ_WIDTH)?;
        write_str(&mut buf, &self.subject_name_1, SUBJECT_WIDTH)?;
        write_str(&mut buf, &self.subject_name_2, SUBJECT_WIDTH)?;
        write_str(&mut buf, &self.subject_id, SUBJECT_WIDTH)?;
        write_str(&mut buf, &self.recording_location, LOCATION_WIDTH)?;
        write_str(&mut buf, &self.geotag, LOCATION_WIDTH)?;
        buf.extend_from_slice(&self.standard_utc_offset.to_le_bytes());
        if buf.len() > METADATA_SECTION_BYTES {
            return Err(MedError::Overflow(
                "section 3 payload exceeds 1024 bytes".to_string(),
            ));
        }
        buf.resize(METADATA_SECTION_BYTES, 0);
        Ok(buf.try_into().unwrap())
    }

    pub fn from_bytes(buf: &[u8; METADATA_SECTION_BYTES]) -> Section3 {
        let mut off = 0;
        let recording_time_offset = LittleEndian::read_i64(&buf[off..]);
        off += 8;
        let daylight_time_start_code = LittleEndian::read_i64(&buf[off..]);
        off += 8;
        let daylight_time_end_code = LittleEndian::read_i64(&buf[off..]);
        off += 8;
        let mut next_str = |width: usize| {
            let s = read_str(buf, off, width);
            off += width;
            s
        };
        let standard_timezone_acronym = next_str(TZ_WIDTH);
        let standard_timezone_string = next_str(TZ_WIDTH);
        let daylight_timezone_acronym = next_str(TZ_WIDTH);
        let daylight_timezone_string = next_str(TZ_WIDTH);
        let subject_name_1 = next_str(SUBJECT_WIDTH);
        let subject_name_2 = next_str(SUBJECT_WIDTH);
        let subject_id = next_str(SUBJECT_WIDTH);
        let recording_location = next_str(LOCATION_WIDTH);
        let geotag = next_str(LOCATION_WIDTH);
        let standard_utc_offset = LittleEndian::read_i32(&buf[off..]);
        Section3 {
            recording_time_offset,
            daylight_time_start_code,
            daylight_time_end_code,
            standard_timezone_acronym,
            standard_timezone_string,
            daylight_timezone_acronym,
            daylight_timezone_string,
            subject_name_1,
            subject_name_2,
            subject_id,
            recording_location,
            geotag,
            standard_utc_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section1_round_trips() {
        let s1 = Section1 {
            password_hint_1: "pet name".to_string(),
            password_hint_2: "".to_string(),
            section_2_encryption_level: 1,
            section_3_encryption_level: -1,
        };
        let back = Section1::from_bytes(&s1.to_bytes().unwrap());
        assert_eq!(back.password_hint_1, s1.password_hint_1);
        assert_eq!(back.section_2_encryption_level, 1);
        assert_eq!(back.section_3_encryption_level, -1);
    }

    #[test]
    fn section2_time_series_round_trips() {
        let ts = TimeSeriesSection2 {
            common: Section2Common {
                session_description: "sess".to_string(),
                channel_description: "chan".to_string(),
                segment_description: "seg".to_string(),
                equipment_description: "amp".to_string(),
                acquisition_channel_number: 3,
            },
            sampling_frequency: 1000.0,
            low_frequency_filter_setting: 0.1,
            high_frequency_filter_setting: 300.0,
            notch_filter_frequency: 60.0,
            absolute_start_sample_number: 0,
            number_of_samples: 100_000,
            number_of_blocks: 10,
            maximum_sample_value: 32767,
            minimum_sample_value: -32768,
            maximum_block_bytes: 4096,
            number_of_discontinuities: 0,
        };
        let section = Section2::TimeSeries(ts.clone());
        let back = Section2::from_bytes(&section.to_bytes().unwrap()).unwrap();
        match back {
            Section2::TimeSeries(back_ts) => {
                assert_eq!(back_ts.sampling_frequency, ts.sampling_frequency);
                assert_eq!(back_ts.number_of_samples, ts.number_of_samples);
            }
            Section2::Video(_) => panic!("expected TimeSeries"),
        }
    }

    #[test]
    fn recording_time_offset_round_trips() {
        let md = Metadata {
            section_1: Section1 {
                password_hint_1: String::new(),
                password_hint_2: String::new(),
                section_2_encryption_level: 0,
                section_3_encryption_level: 0,
            },
            section_2: Section2::TimeSeries(TimeSeriesSection2 {
                common: Section2Common::default(),
                sampling_frequency: 1.0,
                low_frequency_filter_setting: 0.0,
                high_frequency_filter_setting: 0.0,
                notch_filter_frequency: 0.0,
                absolute_start_sample_number: 0,
                number_of_samples: 0,
                number_of_blocks: 0,
                maximum_sample_value: 0,
                minimum_sample_value: 0,
                maximum_block_bytes: 0,
                number_of_discontinuities: 0,
            }),
            section_3: Section3 {
                recording_time_offset: 86_400_000_000,
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
        let stored = md.remove_recording_time_offset(1_000_000_000);
        assert_eq!(md.apply_recording_time_offset(stored), 1_000_000_000);
    }
}
