//! Records — RECORD_HEADER plus a type_code-keyed body (§3, §4.3).

use byteorder::{ByteOrder, LittleEndian};

use crate::crc32;
use crate::error::{MedError, Result};
use crate::types::{TypeCode, RECORD_HEADER_BYTES};

const OFF_RECORD_CRC: usize = 0;
const OFF_TOTAL_RECORD_BYTES: usize = 4;
const OFF_START_TIME: usize = 8;
const OFF_TYPE_CODE: usize = 16;
const OFF_VERSION_MAJOR: usize = 20;
const OFF_VERSION_MINOR: usize = 21;
const OFF_ENCRYPTION_LEVEL: usize = 22;

/// Record type code for the segment-range record described at the channel
/// or session level (§4.6's Sgmt-record search).
pub const RECORD_TYPE_SGMT: TypeCode = TypeCode(*b"Sgmt");

#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub record_crc: u32,
    pub total_record_bytes: u32,
    pub start_time: i64,
    pub type_code: TypeCode,
    pub version_major: u8,
    pub version_minor: u8,
    pub encryption_level: i8,
}

impl RecordHeader {
    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_BYTES] {
        let mut buf = [0u8; RECORD_HEADER_BYTES];
        LittleEndian::write_u32(&mut buf[OFF_RECORD_CRC..], self.record_crc);
        LittleEndian::write_u32(&mut buf[OFF_TOTAL_RECORD_BYTES..], self.total_record_bytes);
        LittleEndian::write_i64(&mut buf[OFF_START_TIME..], self.start_time);
        buf[OFF_TYPE_CODE..OFF_TYPE_CODE + 4].copy_from_slice(&self.type_code.0);
        buf[OFF_VERSION_MAJOR] = self.version_major;
        buf[OFF_VERSION_MINOR] = self.version_minor;
        buf[OFF_ENCRYPTION_LEVEL] = self.encryption_level as u8;
        buf
    }

    pub fn from_bytes(buf: &[u8; RECORD_HEADER_BYTES]) -> RecordHeader {
        RecordHeader {
            record_crc: LittleEndian::read_u32(&buf[OFF_RECORD_CRC..]),
            total_record_bytes: LittleEndian::read_u32(&buf[OFF_TOTAL_RECORD_BYTES..]),
            start_time: LittleEndian::read_i64(&buf[OFF_START_TIME..]),
            type_code: TypeCode(buf[OFF_TYPE_CODE..OFF_TYPE_CODE + 4].try_into().unwrap()),
            version_major: buf[OFF_VERSION_MAJOR],
            version_minor: buf[OFF_VERSION_MINOR],
            encryption_level: buf[OFF_ENCRYPTION_LEVEL] as i8,
        }
    }
}

/// The `Sgmt_v10` record body (§3, §4.6): a segment's time/sample range and
/// sampling rate, letting callers locate it without opening per-segment
/// metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SgmtV10 {
    pub start_time: i64,
    pub end_time: i64,
    pub absolute_start_sample_number: i64,
    pub absolute_end_sample_number: i64,
    pub sampling_frequency: f64,
    pub segment_number: i32,
}

pub const SGMT_V10_BODY_BYTES: usize = 8 * 4 + 8 + 4;

impl SgmtV10 {
    pub fn to_bytes(&self) -> [u8; SGMT_V10_BODY_BYTES] {
        let mut buf = [0u8; SGMT_V10_BODY_BYTES];
        LittleEndian::write_i64(&mut buf[0..], self.start_time);
        LittleEndian::write_i64(&mut buf[8..], self.end_time);
        LittleEndian::write_i64(&mut buf[16..], self.absolute_start_sample_number);
        LittleEndian::write_i64(&mut buf[24..], self.absolute_end_sample_number);
        LittleEndian::write_f64(&mut buf[32..], self.sampling_frequency);
        LittleEndian::write_i32(&mut buf[40..], self.segment_number);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<SgmtV10> {
        if buf.len() < SGMT_V10_BODY_BYTES {
            return Err(MedError::MalformedData(
                "Sgmt_v10 body truncated".to_string(),
            ));
        }
        Ok(SgmtV10 {
            start_time: LittleEndian::read_i64(&buf[0..]),
            end_time: LittleEndian::read_i64(&buf[8..]),
            absolute_start_sample_number: LittleEndian::read_i64(&buf[16..]),
            absolute_end_sample_number: LittleEndian::read_i64(&buf[24..]),
            sampling_frequency: LittleEndian::read_f64(&buf[32..]),
            segment_number: LittleEndian::read_i32(&buf[40..]),
        })
    }

    /// `true` if `sampling_frequency` marks this segment as having no fixed
    /// rate — callers fall through to per-channel resolution (§4.6).
    pub fn has_no_fixed_rate(&self) -> bool {
        !self.sampling_frequency.is_finite() || self.sampling_frequency <= 0.0
    }
}

/// A record body, keyed by the header's `type_code`. Types this crate does
/// not model round-trip losslessly as raw bytes rather than being rejected —
/// the spec does not enumerate every record type (§9, SPEC_FULL §3.5).
#[derive(Debug, Clone)]
pub enum RecordBody {
    Sgmt(SgmtV10),
    Unknown(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Record {
    pub header: RecordHeader,
    pub body: RecordBody,
}

impl Record {
    pub fn new_sgmt(start_time: i64, body: SgmtV10, encryption_level: i8) -> Record {
        let total_record_bytes = (RECORD_HEADER_BYTES + SGMT_V10_BODY_BYTES) as u32;
        let header = RecordHeader {
            record_crc: crc32::CRC_START_VALUE,
            total_record_bytes,
            start_time,
            type_code: RECORD_TYPE_SGMT,
            version_major: 1,
            version_minor: 0,
            encryption_level,
        };
        Record {
            header,
            body: RecordBody::Sgmt(body),
        }
    }

    fn body_bytes(&self) -> Vec<u8> {
        match &self.body {
            RecordBody::Sgmt(s) => s.to_bytes().to_vec(),
            RecordBody::Unknown(bytes) => bytes.clone(),
        }
    }

    /// Serialize header + body and stamp `record_crc` (covering everything
    /// from just past the CRC field through `total_record_bytes`, §4.3).
    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self.body_bytes();
        let mut header = self.header;
        header.total_record_bytes = (RECORD_HEADER_BYTES + body.len()) as u32;

        let mut buf = Vec::with_capacity(header.total_record_bytes as usize);
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(&body);

        let crc = crc32::calculate(&buf[4..]);
        LittleEndian::write_u32(&mut buf[0..4], crc);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Record> {
        if buf.len() < RECORD_HEADER_BYTES {
            return Err(MedError::MalformedData("record header truncated".to_string()));
        }
        let header_bytes: [u8; RECORD_HEADER_BYTES] = buf[..RECORD_HEADER_BYTES].try_into().unwrap();
        let header = RecordHeader::from_bytes(&header_bytes);
        if (header.total_record_bytes as usize) > buf.len() {
            return Err(MedError::MalformedData(
                "record total_record_bytes exceeds buffer".to_string(),
            ));
        }
        let body_buf = &buf[RECORD_HEADER_BYTES..header.total_record_bytes as usize];
        let body = if header.type_code == RECORD_TYPE_SGMT {
            RecordBody::Sgmt(SgmtV10::from_bytes(body_buf)?)
        } else {
            RecordBody::Unknown(body_buf.to_vec())
        };
        Ok(Record { header, body })
    }

    /// `true` if `calculate(bytes[4..total_record_bytes]) == record_crc`.
    pub fn validate_crc(&self, full_bytes: &[u8]) -> bool {
        let n = self.header.total_record_bytes as usize;
        if full_bytes.len() < n {
            return false;
        }
        crc32::validate(&full_bytes[4..n], self.header.record_crc)
    }
}

/// Compose the file-wide `body_CRC` out of a sequence of already-serialized
/// records without rescanning earlier ones (§4.3): each record's CRC is
/// combined into a running prefix using [`crc32::combine`].
pub fn combine_record_crcs<'a>(records: impl IntoIterator<Item = &'a [u8]>) -> u32 {
    let mut prefix = crc32::calculate(&[]);
    let mut has_any = false;
    for record_bytes in records {
        has_any = true;
        let full_crc = crc32::calculate(record_bytes);
        prefix = crc32::combine(prefix, full_crc, record_bytes.len() as u64);
    }
    if has_any {
        prefix
    } else {
        crc32::CRC_START_VALUE ^ crc32::CRC_START_VALUE
    }
}
