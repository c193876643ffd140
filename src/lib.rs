//! # medformat — MED 1.0 reference implementation
//!
//! Format guarantees (MED 1.0):
//! - Every on-disk field is little-endian; `byte_order_code` pins this and a
//!   mismatched value is a hard read failure, never a byte-swap fallback.
//! - Every file opens with a 1024-byte universal header, and the header is
//!   always the last thing written — a reader never observes one that
//!   claims a body that isn't fully on disk yet (§5).
//! - Every header and every record carries its own CRC32; corrupted headers
//!   and corrupted records are detected, not silently trusted.
//! - Compressed sample blocks (CMP) are a closed, versioned set of three
//!   encodings — RED, PRED, MBE — never an open codec registry; a block
//!   naming an encoding this crate doesn't know is a decode error, not a
//!   pass-through.
//! - Encryption, when present, is AES-128 over whole 16-byte blocks only,
//!   gated by a two-level password scheme with an independent recovery
//!   path; neither AES nor SHA-256 is reimplemented here, only composed.
//! - The on-disk tree (session → channel → segment) is read into an
//!   ordinary arena of owned values, never a graph of parent pointers.

pub mod types;
pub mod error;
pub mod crc32;
pub mod crypto;
pub mod password;
pub mod header;
pub mod metadata;
pub mod record;
pub mod index;
pub mod cmp;
pub mod fileproc;
pub mod time;
pub mod timeslice;
pub mod tree;

// Flat re-exports for the most common types.
pub use error::{Behavior, MedError, Result};
pub use header::{SegmentLevel, UniversalHeader};
pub use metadata::{Metadata, Section1, Section2, Section2Common, Section3, TimeSeriesSection2, VideoSection2};
pub use record::{Record, RecordBody, SgmtV10, RECORD_TYPE_SGMT};
pub use index::{RecordIndex, TimeSeriesIndex, VideoIndex};
pub use cmp::{decode_block, encode_block, CmpEncoding, DecodedBlock, EncodeOptions};
pub use password::{
    recover_with_l3, resolve_read_access, DerivedKeys, PasswordValidationFields, PasswordWriteSet,
    RecoveredPasswordBytes,
};
pub use time::{sample_for_uutc, uutc_for_sample, uutc_to_rfc3339};
pub use timeslice::{resolve_slice, SegmentExtent, SliceRequest, TimeSlice};
pub use tree::{Channel, Segment, Session};
pub use types::{FindMode, RoundMode, TypeCode, Uid};
