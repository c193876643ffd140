//! Universal Header — the fixed 1024-byte prologue shared by every MED file (§3, §4.3, §6).
//!
//! ```text
//! Offset  Size  Field
//!    0      4   header_CRC           CRC32 of bytes [16, 1024)
//!    4      4   body_CRC             CRC32 of bytes [1024, file_length)
//!    8      8   reserved             zero
//!   16      4   type_code            4 ASCII bytes, e.g. "tdat"
//!   20      1   med_version_major
//!   21      1   med_version_minor
//!   22      1   byte_order_code      always 1 (little-endian)
//!   23      1   reserved
//!   24      8   session_start_time   µUTC
//!   32      8   file_start_time      µUTC
//!   40      8   file_end_time        µUTC
//!   48      8   number_of_entries
//!   56      8   maximum_entry_size
//!   64      4   segment_number       or CHANNEL_LEVEL/SESSION_LEVEL sentinel
//!   68      4   reserved
//!   72      8   session_uid
//!   80      8   channel_uid
//!   88      8   segment_uid
//!   96      8   file_uid
//!  104      8   provenance_uid       == file_uid iff this file is originating data
//!  112     16   password_validation_field_level_1
//!  128     16   password_validation_field_level_2   (all-zero == absent)
//!  144     16   password_validation_field_level_3   (all-zero == absent)
//!  160    256   session_name         fixed-width zero-padded UTF-8
//!  416    256   channel_name         fixed-width zero-padded UTF-8
//!  672     64   anonymized_subject_id fixed-width zero-padded UTF-8
//!  736    288   reserved
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::crc32;
use crate::error::{MedError, Result};
use crate::types::{
    TypeCode, UID_NO_ENTRY, UNIVERSAL_HEADER_BYTES,
};

pub const HEADER_CRC_COVERAGE_START: usize = 16;
pub const SESSION_NAME_BYTES: usize = 256;
pub const CHANNEL_NAME_BYTES: usize = 256;
pub const SUBJECT_ID_BYTES: usize = 64;

const OFF_HEADER_CRC: usize = 0;
const OFF_BODY_CRC: usize = 4;
const OFF_TYPE_CODE: usize = 16;
const OFF_VERSION_MAJOR: usize = 20;
const OFF_VERSION_MINOR: usize = 21;
const OFF_BYTE_ORDER_CODE: usize = 22;
const OFF_SESSION_START_TIME: usize = 24;
const OFF_FILE_START_TIME: usize = 32;
const OFF_FILE_END_TIME: usize = 40;
const OFF_NUMBER_OF_ENTRIES: usize = 48;
const OFF_MAXIMUM_ENTRY_SIZE: usize = 56;
const OFF_SEGMENT_NUMBER: usize = 64;
const OFF_SESSION_UID: usize = 72;
const OFF_CHANNEL_UID: usize = 80;
const OFF_SEGMENT_UID: usize = 88;
const OFF_FILE_UID: usize = 96;
const OFF_PROVENANCE_UID: usize = 104;
const OFF_PW_LEVEL_1: usize = 112;
const OFF_PW_LEVEL_2: usize = 128;
const OFF_PW_LEVEL_3: usize = 144;
const OFF_SESSION_NAME: usize = 160;
const OFF_CHANNEL_NAME: usize = OFF_SESSION_NAME + SESSION_NAME_BYTES;
const OFF_SUBJECT_ID: usize = OFF_CHANNEL_NAME + CHANNEL_NAME_BYTES;

pub const MED_VERSION_MAJOR: u8 = 1;
pub const MED_VERSION_MINOR: u8 = 0;
pub const BYTE_ORDER_CODE_LITTLE_ENDIAN: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentLevel {
    Segment(i32),
    Channel,
    Session,
}

impl SegmentLevel {
    fn to_raw(self) -> i32 {
        match self {
            SegmentLevel::Segment(n) => n,
            SegmentLevel::Channel => crate::types::CHANNEL_LEVEL_SEGMENT_NUMBER,
            SegmentLevel::Session => crate::types::SESSION_LEVEL_SEGMENT_NUMBER,
        }
    }

    fn from_raw(raw: i32) -> SegmentLevel {
        match raw {
            crate::types::CHANNEL_LEVEL_SEGMENT_NUMBER => SegmentLevel::Channel,
            crate::types::SESSION_LEVEL_SEGMENT_NUMBER => SegmentLevel::Session,
            n => SegmentLevel::Segment(n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UniversalHeader {
    pub header_crc: u32,
    pub body_crc: u32,
    pub type_code: TypeCode,
    pub version_major: u8,
    pub version_minor: u8,
    pub byte_order_code: u8,
    pub session_start_time: i64,
    pub file_start_time: i64,
    pub file_end_time: i64,
    pub number_of_entries: u64,
    pub maximum_entry_size: u64,
    pub segment_level: SegmentLevel,
    pub session_uid: u64,
    pub channel_uid: u64,
    pub segment_uid: u64,
    pub file_uid: u64,
    pub provenance_uid: u64,
    pub password_validation_field_level_1: [u8; 16],
    pub password_validation_field_level_2: [u8; 16],
    pub password_validation_field_level_3: [u8; 16],
    pub session_name: String,
    pub channel_name: String,
    pub anonymized_subject_id: String,
}

fn write_fixed_str(buf: &mut [u8], s: &str) {
    buf.fill(0);
    let bytes = s.as_bytes();
    let n = bytes.len().min(buf.len());
    buf[..n].copy_from_slice(&bytes[..n]);
}

fn read_fixed_str(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

impl UniversalHeader {
    /// A freshly allocated header with random, non-sentinel UIDs and
    /// CRC fields set to `CRC_START_VALUE` until the first write.
    pub fn new(type_code: TypeCode, segment_level: SegmentLevel) -> UniversalHeader {
        UniversalHeader {
            header_crc: crc32::CRC_START_VALUE,
            body_crc: crc32::CRC_START_VALUE,
            type_code,
            version_major: MED_VERSION_MAJOR,
            version_minor: MED_VERSION_MINOR,
            byte_order_code: BYTE_ORDER_CODE_LITTLE_ENDIAN,
            session_start_time: crate::types::UUTC_NO_ENTRY,
            file_start_time: crate::types::UUTC_NO_ENTRY,
            file_end_time: crate::types::UUTC_NO_ENTRY,
            number_of_entries: 0,
            maximum_entry_size: 0,
            segment_level,
            session_uid: new_uid(),
            channel_uid: new_uid(),
            segment_uid: new_uid(),
            file_uid: new_uid(),
            provenance_uid: UID_NO_ENTRY,
            password_validation_field_level_1: [0; 16],
            password_validation_field_level_2: [0; 16],
            password_validation_field_level_3: [0; 16],
            session_name: String::new(),
            channel_name: String::new(),
            anonymized_subject_id: String::new(),
        }
    }

    pub fn to_bytes(&self) -> [u8; UNIVERSAL_HEADER_BYTES] {
        let mut buf = [0u8; UNIVERSAL_HEADER_BYTES];
        LittleEndian::write_u32(&mut buf[OFF_HEADER_CRC..], self.header_crc);
        LittleEndian::write_u32(&mut buf[OFF_BODY_CRC..], self.body_crc);
        buf[OFF_TYPE_CODE..OFF_TYPE_CODE + 4].copy_from_slice(&self.type_code.0);
        buf[OFF_VERSION_MAJOR] = self.version_major;
        buf[OFF_VERSION_MINOR] = self.version_minor;
        buf[OFF_BYTE_ORDER_CODE] = self.byte_order_code;
        LittleEndian::write_i64(&mut buf[OFF_SESSION_START_TIME..], self.session_start_time);
        LittleEndian::write_i64(&mut buf[OFF_FILE_START_TIME..], self.file_start_time);
        LittleEndian::write_i64(&mut buf[OFF_FILE_END_TIME..], self.file_end_time);
        LittleEndian::write_u64(&mut buf[OFF_NUMBER_OF_ENTRIES..], self.number_of_entries);
        LittleEndian::write_u64(&mut buf[OFF_MAXIMUM_ENTRY_SIZE..], self.maximum_entry_size);
        LittleEndian::write_i32(&mut buf[OFF_SEGMENT_NUMBER..], self.segment_level.to_raw());
        LittleEndian::write_u64(&mut buf[OFF_SESSION_UID..], self.session_uid);
        LittleEndian::write_u64(&mut buf[OFF_CHANNEL_UID..], self.channel_uid);
        LittleEndian::write_u64(&mut buf[OFF_SEGMENT_UID..], self.segment_uid);
        LittleEndian::write_u64(&mut buf[OFF_FILE_UID..], self.file_uid);
        LittleEndian::write_u64(&mut buf[OFF_PROVENANCE_UID..], self.provenance_uid);
        buf[OFF_PW_LEVEL_1..OFF_PW_LEVEL_1 + 16]
            .copy_from_slice(&self.password_validation_field_level_1);
        buf[OFF_PW_LEVEL_2..OFF_PW_LEVEL_2 + 16]
            .copy_from_slice(&self.password_validation_field_level_2);
        buf[OFF_PW_LEVEL_3..OFF_PW_LEVEL_3 + 16]
            .copy_from_slice(&self.password_validation_field_level_3);
        write_fixed_str(
            &mut buf[OFF_SESSION_NAME..OFF_SESSION_NAME + SESSION_NAME_BYTES],
            &self.session_name,
        );
        write_fixed_str(
            &mut buf[OFF_CHANNEL_NAME..OFF_CHANNEL_NAME + CHANNEL_NAME_BYTES],
            &self.channel_name,
        );
        write_fixed_str(
            &mut buf[OFF_SUBJECT_ID..OFF_SUBJECT_ID + SUBJECT_ID_BYTES],
            &self.anonymized_subject_id,
        );
        buf
    }

    pub fn from_bytes(buf: &[u8; UNIVERSAL_HEADER_BYTES]) -> Result<UniversalHeader> {
        let type_code = TypeCode(buf[OFF_TYPE_CODE..OFF_TYPE_CODE + 4].try_into().unwrap());
        let byte_order_code = buf[OFF_BYTE_ORDER_CODE];
        if byte_order_code != BYTE_ORDER_CODE_LITTLE_ENDIAN {
            return Err(MedError::MalformedData(format!(
                "unsupported byte_order_code {byte_order_code}"
            )));
        }
        Ok(UniversalHeader {
            header_crc: LittleEndian::read_u32(&buf[OFF_HEADER_CRC..]),
            body_crc: LittleEndian::read_u32(&buf[OFF_BODY_CRC..]),
            type_code,
            version_major: buf[OFF_VERSION_MAJOR],
            version_minor: buf[OFF_VERSION_MINOR],
            byte_order_code,
            session_start_time: LittleEndian::read_i64(&buf[OFF_SESSION_START_TIME..]),
            file_start_time: LittleEndian::read_i64(&buf[OFF_FILE_START_TIME..]),
            file_end_time: LittleEndian::read_i64(&buf[OFF_FILE_END_TIME..]),
            number_of_entries: LittleEndian::read_u64(&buf[OFF_NUMBER_OF_ENTRIES..]),
            maximum_entry_size: LittleEndian::read_u64(&buf[OFF_MAXIMUM_ENTRY_SIZE..]),
            segment_level: SegmentLevel::from_raw(LittleEndian::read_i32(
                &buf[OFF_SEGMENT_NUMBER..],
            )),
            session_uid: LittleEndian::read_u64(&buf[OFF_SESSION_UID..]),
            channel_uid: LittleEndian::read_u64(&buf[OFF_CHANNEL_UID..]),
            segment_uid: LittleEndian::read_u64(&buf[OFF_SEGMENT_UID..]),
            file_uid: LittleEndian::read_u64(&buf[OFF_FILE_UID..]),
            provenance_uid: LittleEndian::read_u64(&buf[OFF_PROVENANCE_UID..]),
            password_validation_field_level_1: buf[OFF_PW_LEVEL_1..OFF_PW_LEVEL_1 + 16]
                .try_into()
                .unwrap(),
            password_validation_field_level_2: buf[OFF_PW_LEVEL_2..OFF_PW_LEVEL_2 + 16]
                .try_into()
                .unwrap(),
            password_validation_field_level_3: buf[OFF_PW_LEVEL_3..OFF_PW_LEVEL_3 + 16]
                .try_into()
                .unwrap(),
            session_name: read_fixed_str(&buf[OFF_SESSION_NAME..OFF_SESSION_NAME + SESSION_NAME_BYTES]),
            channel_name: read_fixed_str(&buf[OFF_CHANNEL_NAME..OFF_CHANNEL_NAME + CHANNEL_NAME_BYTES]),
            anonymized_subject_id: read_fixed_str(
                &buf[OFF_SUBJECT_ID..OFF_SUBJECT_ID + SUBJECT_ID_BYTES],
            ),
        })
    }

    /// Recompute `header_crc` from the serialized form, covering
    /// `[HEADER_CRC_COVERAGE_START, UNIVERSAL_HEADER_BYTES)`.
    pub fn compute_header_crc(&self) -> u32 {
        let buf = self.to_bytes();
        crc32::calculate(&buf[HEADER_CRC_COVERAGE_START..])
    }
}

/// A fresh, non-sentinel random 64-bit UID, also excluding the reserved
/// CMP block magic value (§3, §6).
pub fn new_uid() -> u64 {
    loop {
        let candidate: u64 = rand::random();
        if candidate != UID_NO_ENTRY && candidate != crate::types::CMP_BLOCK_START_UID {
            return candidate;
        }
    }
}
