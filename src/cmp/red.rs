//! RED — range-coded first differences with a KEYSAMPLE escape for
//! differences too large to fit in a byte (§4.4.4).

use byteorder::{ByteOrder, LittleEndian};

use super::rangecoder::{RangeDecoder, RangeEncoder, RED_TOTAL_COUNTS};
use super::stats::ScaledBins;
use crate::error::{MedError, Result};

/// Marks an out-of-range difference; the true value follows as 4 raw
/// little-endian bytes immediately after the range-coded stream.
pub const KEYSAMPLE_ESCAPE: i8 = -0x80;

const MODEL_BASE_BYTES: usize = 12;
const BIN_ENTRY_BYTES: usize = 3; // u16 count + i8 symbol

#[derive(Debug, Clone)]
pub struct RedModel {
    pub initial_sample_value: i32,
    pub difference_bytes: u32,
    pub derivative_level: u8,
    pub no_zero_counts_flag: u8,
    pub bins: ScaledBins,
}

impl RedModel {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; MODEL_BASE_BYTES + self.bins.len() * BIN_ENTRY_BYTES];
        LittleEndian::write_i32(&mut buf[0..4], self.initial_sample_value);
        LittleEndian::write_u32(&mut buf[4..8], self.difference_bytes);
        buf[8] = self.derivative_level;
        buf[9] = self.no_zero_counts_flag;
        LittleEndian::write_u16(&mut buf[10..12], self.bins.len() as u16);
        let mut off = MODEL_BASE_BYTES;
        for i in 0..self.bins.len() {
            LittleEndian::write_u16(&mut buf[off..off + 2], self.bins.counts[i]);
            buf[off + 2] = self.bins.symbols[i] as u8;
            off += BIN_ENTRY_BYTES;
        }
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<RedModel> {
        if buf.len() < MODEL_BASE_BYTES {
            return Err(MedError::MalformedData("RED model truncated".to_string()));
        }
        let initial_sample_value = LittleEndian::read_i32(&buf[0..4]);
        let difference_bytes = LittleEndian::read_u32(&buf[4..8]);
        let derivative_level = buf[8];
        let no_zero_counts_flag = buf[9];
        let number_of_statistics_bins = LittleEndian::read_u16(&buf[10..12]) as usize;

        let needed = MODEL_BASE_BYTES + number_of_statistics_bins * BIN_ENTRY_BYTES;
        if buf.len() < needed {
            return Err(MedError::MalformedData("RED model bins truncated".to_string()));
        }
        let mut counts = Vec::with_capacity(number_of_statistics_bins);
        let mut symbols = Vec::with_capacity(number_of_statistics_bins);
        let mut off = MODEL_BASE_BYTES;
        for _ in 0..number_of_statistics_bins {
            counts.push(LittleEndian::read_u16(&buf[off..off + 2]));
            symbols.push(buf[off + 2] as i8);
            off += BIN_ENTRY_BYTES;
        }

        Ok(RedModel {
            initial_sample_value,
            difference_bytes,
            derivative_level,
            no_zero_counts_flag,
            bins: ScaledBins::from_stored(symbols, counts),
        })
    }
}

fn diff_to_byte(diff: i64) -> Option<i8> {
    if (i8::MIN as i64 + 1..=i8::MAX as i64).contains(&diff) {
        Some(diff as i8)
    } else {
        None
    }
}

/// Encode `samples` as a RED block: an initial value plus a range-coded
/// stream of first differences, with large jumps escaped as the raw
/// 4-byte current sample value (the literal S3 oracle: `[0,1,2,300,301]`,
/// where the `2 -> 300` step of 298 triggers the escape and 300 itself is
/// what lands in the escape stream).
pub fn encode(samples: &[i32]) -> (RedModel, Vec<u8>) {
    if samples.is_empty() {
        let model = RedModel {
            initial_sample_value: 0,
            difference_bytes: 0,
            derivative_level: 1,
            no_zero_counts_flag: 1,
            bins: ScaledBins::build(&[]),
        };
        return (model, Vec::new());
    }

    let initial = samples[0];
    let mut coded_bytes = Vec::with_capacity(samples.len() - 1);
    let mut escapes: Vec<u8> = Vec::new();

    for w in samples.windows(2) {
        let diff = w[1] as i64 - w[0] as i64;
        match diff_to_byte(diff) {
            Some(b) => coded_bytes.push(b as u8),
            None => {
                coded_bytes.push(KEYSAMPLE_ESCAPE as u8);
                let mut raw = [0u8; 4];
                LittleEndian::write_i32(&mut raw, w[1]);
                escapes.extend_from_slice(&raw);
            }
        }
    }

    let bins = ScaledBins::build(&coded_bytes);
    let model = RedModel {
        initial_sample_value: initial,
        difference_bytes: coded_bytes.len() as u32,
        derivative_level: 1,
        no_zero_counts_flag: 1,
        bins,
    };

    let mut payload = Vec::new();
    if model.bins.len() > 1 {
        let mut enc = RangeEncoder::new();
        for &byte in &coded_bytes {
            let bin = model.bins.bin_for_symbol(byte);
            let (lo, hi) = model.bins.bounds(bin);
            enc.encode(lo, hi, model.bins.total());
        }
        let coded = enc.finish();
        let mut len_prefix = [0u8; 4];
        LittleEndian::write_u32(&mut len_prefix, coded.len() as u32);
        payload.extend_from_slice(&len_prefix);
        payload.extend_from_slice(&coded);
    } else {
        // a single distinct difference value needs no coded stream at all
        payload.extend_from_slice(&0u32.to_le_bytes());
    }
    payload.extend_from_slice(&escapes);

    (model, payload)
}

/// Decode `n` samples from a RED model + payload.
pub fn decode(model: &RedModel, payload: &[u8], n: usize) -> Result<Vec<i32>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    if payload.len() < 4 {
        return Err(MedError::MalformedData("RED payload truncated".to_string()));
    }
    let coded_len = LittleEndian::read_u32(&payload[0..4]) as usize;
    if payload.len() < 4 + coded_len {
        return Err(MedError::MalformedData("RED coded stream truncated".to_string()));
    }
    let coded = &payload[4..4 + coded_len];
    let mut escapes = &payload[4 + coded_len..];

    let mut coded_bytes = Vec::with_capacity(model.difference_bytes as usize);
    if model.bins.len() > 1 {
        let mut dec = RangeDecoder::new(coded);
        for _ in 0..model.difference_bytes {
            let freq = dec.get_freq(model.bins.total().max(1));
            let bin = model.bins.bin_for_freq(freq);
            let (lo, hi) = model.bins.bounds(bin);
            dec.decode(lo, hi, model.bins.total());
            coded_bytes.push(model.bins.symbols[bin] as u8);
        }
    } else if model.bins.len() == 1 {
        for _ in 0..model.difference_bytes {
            coded_bytes.push(model.bins.symbols[0] as u8);
        }
    }

    let mut out = Vec::with_capacity(n);
    out.push(model.initial_sample_value);
    for &byte in &coded_bytes {
        let prev = *out.last().unwrap();
        if byte as i8 == KEYSAMPLE_ESCAPE {
            if escapes.len() < 4 {
                return Err(MedError::MalformedData("RED escape value truncated".to_string()));
            }
            let v = LittleEndian::read_i32(&escapes[0..4]);
            escapes = &escapes[4..];
            out.push(v);
        } else {
            out.push((prev as i64 + byte as i8 as i64) as i32);
        }
    }

    if out.len() != n {
        return Err(MedError::MalformedData(format!(
            "RED decode produced {} samples, expected {}",
            out.len(),
            n
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_red_escape_round_trip() {
        let samples = [0, 1, 2, 300, 301];
        let (model, payload) = encode(&samples);
        assert_eq!(model.initial_sample_value, 0);
        assert_eq!(model.difference_bytes, 4);

        // the escape stream is appended after the coded stream; its last
        // (only) entry must be the raw current sample value, 300, not the
        // difference that triggered the escape.
        let raw_start = payload.len() - 4;
        assert_eq!(&payload[raw_start..], &[0x2C, 0x01, 0x00, 0x00]);

        let back = decode(&model, &payload, samples.len()).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn small_diffs_need_no_escapes() {
        let samples = [10, 11, 9, 12, 8, 13];
        let (model, payload) = encode(&samples);
        let back = decode(&model, &payload, samples.len()).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn constant_signal_round_trips() {
        let samples = [5; 20];
        let (model, payload) = encode(&samples);
        assert_eq!(model.bins.len(), 1);
        let back = decode(&model, &payload, samples.len()).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn single_sample_round_trips() {
        let samples = [42];
        let (model, payload) = encode(&samples);
        let back = decode(&model, &payload, 1).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn negative_diffs_and_repeated_escapes_round_trip() {
        let samples = [0, -500, 500, -1000, 1000, 0];
        let (model, payload) = encode(&samples);
        let back = decode(&model, &payload, samples.len()).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn model_round_trips_through_bytes() {
        let samples = [0, 1, 2, 300, 301];
        let (model, _) = encode(&samples);
        let bytes = model.to_bytes();
        let back = RedModel::from_bytes(&bytes).unwrap();
        assert_eq!(back.initial_sample_value, model.initial_sample_value);
        assert_eq!(back.difference_bytes, model.difference_bytes);
        assert_eq!(back.bins.symbols, model.bins.symbols);
        assert_eq!(back.bins.counts, model.bins.counts);
    }
}
