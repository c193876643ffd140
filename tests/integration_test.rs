//! End-to-end exercise of the on-disk tree: write a two-channel session by
//! hand (the way a writer would), then open it back through [`medformat::Session`]
//! and confirm slicing, record recovery, and block decoding all agree.

use std::fs;
use std::path::Path;

use medformat::cmp::{decode_block, encode_block, EncodeOptions};
use medformat::crc32;
use medformat::crypto::AesKey;
use medformat::error::Behavior;
use medformat::fileproc::FileProcessor;
use medformat::header::SegmentLevel;
use medformat::metadata::{Metadata, Section1, Section2, Section2Common, Section3, TimeSeriesSection2};
use medformat::password::PasswordWriteSet;
use medformat::record::{Record, SgmtV10};
use medformat::{SliceRequest, TypeCode, UniversalHeader};

fn write_metadata(dir: &Path, segment_number: i32, start_time: i64, end_time: i64, start_sample: i64, n_samples: i64, fs: f64) {
    fs_create(dir);
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

    let mut body = Vec::new();
    body.extend_from_slice(&metadata.section_1.to_bytes().unwrap());
    body.extend_from_slice(&metadata.section_2.to_bytes().unwrap());
    body.extend_from_slice(&metadata.section_3.to_bytes().unwrap());
    header.body_crc = crc32::calculate(&body);
    header.header_crc = header.compute_header_crc();

    let mut fp = FileProcessor::allocate(dir.join("segment.tmet"), Behavior::RETRY_ONCE).unwrap();
    fp.write_body_then_header(&body, &header.to_bytes()).unwrap();
}

fn write_sgmt_record(dir: &Path, segment_number: i32, start_time: i64, end_time: i64, start_sample: i64, n_samples: i64, fs: f64) {
    let sgmt = SgmtV10 {
        start_time,
        end_time,
        absolute_start_sample_number: start_sample,
        absolute_end_sample_number: start_sample + n_samples - 1,
        sampling_frequency: fs,
        segment_number,
    };
    let record = Record::new_sgmt(start_time, sgmt, 0).to_bytes();
    let mut header = UniversalHeader::new(TypeCode::RECORD_DATA, SegmentLevel::Segment(segment_number));
    header.body_crc = crc32::calculate(&record);
    header.header_crc = header.compute_header_crc();
    let mut fp = FileProcessor::allocate(dir.join("segment.rdat"), Behavior::RETRY_ONCE).unwrap();
    fp.write_body_then_header(&record, &header.to_bytes()).unwrap();
}

fn write_data_block(dir: &Path, segment_number: i32, start_time: i64, samples: &[i32], key: Option<&AesKey>) {
    let block = encode_block(samples, start_time, 0, &EncodeOptions::default(), key).unwrap();
    let mut header = UniversalHeader::new(TypeCode::TIME_SERIES_DATA, SegmentLevel::Segment(segment_number));
    header.body_crc = crc32::calculate(&block);
    header.header_crc = header.compute_header_crc();
    let mut fp = FileProcessor::allocate(dir.join("segment.tdat"), Behavior::RETRY_ONCE).unwrap();
    fp.write_body_then_header(&block, &header.to_bytes()).unwrap();
}

fn fs_create(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
}

#[test]
fn session_round_trips_through_a_real_directory_tree() {
    let dir = tempfile::tempdir().unwrap();
    let session_dir = dir.path().join("my-session.medd");
    let chan_dir = session_dir.join("eeg1.ticd");

    let seg0 = chan_dir.join("seg-0.tisd");
    write_metadata(&seg0, 0, 0, 999_999, 0, 1000, 1000.0);
    write_sgmt_record(&seg0, 0, 0, 999_999, 0, 1000, 1000.0);
    let samples0: Vec<i32> = (0..1000).collect();
    write_data_block(&seg0, 0, 0, &samples0, None);

    let seg1 = chan_dir.join("seg-1.tisd");
    write_metadata(&seg1, 1, 2_000_000, 2_999_999, 1000, 1000, 1000.0);
    write_sgmt_record(&seg1, 1, 2_000_000, 2_999_999, 1000, 1000, 1000.0);
    let samples1: Vec<i32> = (1000..2000).collect();
    write_data_block(&seg1, 1, 2_000_000, &samples1, None);

    let session = medformat::Session::open(&session_dir).unwrap();
    assert_eq!(session.channels.len(), 1);
    let channel = session.channel("eeg1.ticd").unwrap();
    assert_eq!(channel.segments.len(), 2);

    let slice = session
        .read_slice("eeg1.ticd", SliceRequest::ByTime { start_time: 500_000, end_time: 2_500_000 })
        .unwrap();
    assert_eq!(slice.start_segment_number, 0);
    assert_eq!(slice.end_segment_number, 1);
    assert_eq!(slice.local_start_index, 500);

    let raw0 = fs::read(seg0.join("segment.tdat")).unwrap();
    let decoded0 = decode_block(&raw0[medformat::types::UNIVERSAL_HEADER_BYTES..], None).unwrap();
    assert_eq!(decoded0.samples, samples0);
}

#[test]
fn session_round_trips_an_encrypted_segment() {
    let write = PasswordWriteSet { l1: "clinician", l2: None, l3_recovery: None };
    let (fields, _write_keys) = write.derive().unwrap();
    let read_keys = medformat::password::resolve_read_access(&fields, "clinician").unwrap();
    let key = read_keys.k1.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let seg_dir = dir.path().join("session.medd").join("eeg1.ticd").join("seg-0.tisd");
    write_metadata(&seg_dir, 0, 0, 999_999, 0, 4, 1000.0);
    write_sgmt_record(&seg_dir, 0, 0, 999_999, 0, 4, 1000.0);
    let samples: Vec<i32> = vec![10, 20, 30, 40];
    write_data_block(&seg_dir, 0, 0, &samples, Some(&key));

    let raw = fs::read(seg_dir.join("segment.tdat")).unwrap();
    let decoded = decode_block(&raw[medformat::types::UNIVERSAL_HEADER_BYTES..], Some(&key)).unwrap();
    assert_eq!(decoded.samples, samples);

    assert!(decode_block(&raw[medformat::types::UNIVERSAL_HEADER_BYTES..], None).is_err());
}
