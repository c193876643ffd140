//! PRED — RED's range coding split across three sign-dependent contexts, so
//! a monotonic run needs fewer bits than a signal that keeps changing sign
//! (§4.4.4).

use byteorder::{ByteOrder, LittleEndian};

use super::rangecoder::{RangeDecoder, RangeEncoder};
use super::red::KEYSAMPLE_ESCAPE;
use super::stats::ScaledBins;
use crate::error::{MedError, Result};

const MODEL_BASE_BYTES: usize = 14;
const BIN_ENTRY_BYTES: usize = 3;

/// The context a difference byte is coded under, selected by the sign of
/// the *previous* difference. Coding starts in `Nil`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    Nil,
    Pos,
    Neg,
}

/// `CAT(byte)`: which context a just-coded byte transitions into, by the
/// sign of the emitted byte itself — not the difference it represents.
/// This matters on an escape: the emitted byte is `KEYSAMPLE_ESCAPE`
/// (negative), even though the raw sample jump it carries may be positive.
fn cat(byte: i64) -> Context {
    if byte > 0 {
        Context::Pos
    } else if byte < 0 {
        Context::Neg
    } else {
        Context::Nil
    }
}

#[derive(Debug, Clone)]
pub struct PredModel {
    pub initial_sample_value: i32,
    pub difference_bytes: u32,
    pub derivative_level: u8,
    pub no_zero_counts_flag: u8,
    pub nil_bins: ScaledBins,
    pub pos_bins: ScaledBins,
    pub neg_bins: ScaledBins,
}

impl PredModel {
    fn bins_for(&self, ctx: Context) -> &ScaledBins {
        match ctx {
            Context::Nil => &self.nil_bins,
            Context::Pos => &self.pos_bins,
            Context::Neg => &self.neg_bins,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let total_bins = self.nil_bins.len() + self.pos_bins.len() + self.neg_bins.len();
        let mut buf = vec![0u8; MODEL_BASE_BYTES + total_bins * BIN_ENTRY_BYTES];
        LittleEndian::write_i32(&mut buf[0..4], self.initial_sample_value);
        LittleEndian::write_u32(&mut buf[4..8], self.difference_bytes);
        buf[8] = self.derivative_level;
        buf[9] = self.no_zero_counts_flag;
        buf[10] = self.nil_bins.len() as u8;
        buf[11] = self.pos_bins.len() as u8;
        buf[12] = self.neg_bins.len() as u8;
        buf[13] = 0; // pad

        let mut off = MODEL_BASE_BYTES;
        for bins in [&self.nil_bins, &self.pos_bins, &self.neg_bins] {
            for i in 0..bins.len() {
                LittleEndian::write_u16(&mut buf[off..off + 2], bins.counts[i]);
                buf[off + 2] = bins.symbols[i] as u8;
                off += BIN_ENTRY_BYTES;
            }
        }
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<PredModel> {
        if buf.len() < MODEL_BASE_BYTES {
            return Err(MedError::MalformedData("PRED model truncated".to_string()));
        }
        let initial_sample_value = LittleEndian::read_i32(&buf[0..4]);
        let difference_bytes = LittleEndian::read_u32(&buf[4..8]);
        let derivative_level = buf[8];
        let no_zero_counts_flag = buf[9];
        let counts = [buf[10] as usize, buf[11] as usize, buf[12] as usize];

        let needed = MODEL_BASE_BYTES + counts.iter().sum::<usize>() * BIN_ENTRY_BYTES;
        if buf.len() < needed {
            return Err(MedError::MalformedData("PRED model bins truncated".to_string()));
        }

        let mut off = MODEL_BASE_BYTES;
        let mut read_bins = |n: usize| -> ScaledBins {
            let mut symbols = Vec::with_capacity(n);
            let mut values = Vec::with_capacity(n);
            for _ in 0..n {
                values.push(LittleEndian::read_u16(&buf[off..off + 2]));
                symbols.push(buf[off + 2] as i8);
                off += BIN_ENTRY_BYTES;
            }
            ScaledBins::from_stored(symbols, values)
        };
        let nil_bins = read_bins(counts[0]);
        let pos_bins = read_bins(counts[1]);
        let neg_bins = read_bins(counts[2]);

        Ok(PredModel {
            initial_sample_value,
            difference_bytes,
            derivative_level,
            no_zero_counts_flag,
            nil_bins,
            pos_bins,
            neg_bins,
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

/// Encode `samples` with context-switched range coding. The literal S4
/// oracle `[0,1,0,1,0,1,0,1]` alternates sign every step, so every coded
/// byte after the first gets coded under a different context than the one
/// before it.
pub fn encode(samples: &[i32]) -> (PredModel, Vec<u8>) {
    if samples.is_empty() {
        let empty = ScaledBins::build(&[]);
        let model = PredModel {
            initial_sample_value: 0,
            difference_bytes: 0,
            derivative_level: 1,
            no_zero_counts_flag: 1,
            nil_bins: empty.clone(),
            pos_bins: empty.clone(),
            neg_bins: empty,
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

    // partition coded bytes by the context active when each was coded
    let mut nil_bytes = Vec::new();
    let mut pos_bytes = Vec::new();
    let mut neg_bytes = Vec::new();
    let mut ctx = Context::Nil;
    for &byte in &coded_bytes {
        match ctx {
            Context::Nil => nil_bytes.push(byte),
            Context::Pos => pos_bytes.push(byte),
            Context::Neg => neg_bytes.push(byte),
        }
        ctx = cat(byte as i8 as i64);
    }

    let nil_bins = ScaledBins::build(&nil_bytes);
    let pos_bins = ScaledBins::build(&pos_bytes);
    let neg_bins = ScaledBins::build(&neg_bytes);

    let model = PredModel {
        initial_sample_value: initial,
        difference_bytes: coded_bytes.len() as u32,
        derivative_level: 1,
        no_zero_counts_flag: 1,
        nil_bins,
        pos_bins,
        neg_bins,
    };

    let mut enc = RangeEncoder::new();
    let mut ctx = Context::Nil;
    for &byte in &coded_bytes {
        let bins = model.bins_for(ctx);
        if bins.len() > 1 {
            let bin = bins.bin_for_symbol(byte);
            let (lo, hi) = bins.bounds(bin);
            enc.encode(lo, hi, bins.total());
        }
        ctx = cat(byte as i8 as i64);
    }
    let coded = enc.finish();

    let mut payload = Vec::new();
    let mut len_prefix = [0u8; 4];
    LittleEndian::write_u32(&mut len_prefix, coded.len() as u32);
    payload.extend_from_slice(&len_prefix);
    payload.extend_from_slice(&coded);
    payload.extend_from_slice(&escapes);

    (model, payload)
}

/// Decode `n` samples from a PRED model + payload.
pub fn decode(model: &PredModel, payload: &[u8], n: usize) -> Result<Vec<i32>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    if payload.len() < 4 {
        return Err(MedError::MalformedData("PRED payload truncated".to_string()));
    }
    let coded_len = LittleEndian::read_u32(&payload[0..4]) as usize;
    if payload.len() < 4 + coded_len {
        return Err(MedError::MalformedData("PRED coded stream truncated".to_string()));
    }
    let coded = &payload[4..4 + coded_len];
    let mut escapes = &payload[4 + coded_len..];

    let mut dec = RangeDecoder::new(coded);
    let mut out = Vec::with_capacity(n);
    out.push(model.initial_sample_value);
    let mut ctx = Context::Nil;

    for _ in 0..model.difference_bytes {
        let bins = model.bins_for(ctx);
        let byte = if bins.len() > 1 {
            let freq = dec.get_freq(bins.total());
            let bin = bins.bin_for_freq(freq);
            let (lo, hi) = bins.bounds(bin);
            dec.decode(lo, hi, bins.total());
            bins.symbols[bin] as u8
        } else if bins.len() == 1 {
            bins.symbols[0] as u8
        } else {
            return Err(MedError::MalformedData("PRED context has no symbols".to_string()));
        };

        let prev = *out.last().unwrap();
        if byte as i8 == KEYSAMPLE_ESCAPE {
            if escapes.len() < 4 {
                return Err(MedError::MalformedData("PRED escape value truncated".to_string()));
            }
            let v = LittleEndian::read_i32(&escapes[0..4]);
            escapes = &escapes[4..];
            out.push(v);
        } else {
            out.push((prev as i64 + byte as i8 as i64) as i32);
        }
        ctx = cat(byte as i8 as i64);
    }

    if out.len() != n {
        return Err(MedError::MalformedData(format!(
            "PRED decode produced {} samples, expected {}",
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
    fn s4_alternating_signal_round_trips() {
        let samples = [0, 1, 0, 1, 0, 1, 0, 1];
        let (model, payload) = encode(&samples);
        assert_eq!(model.initial_sample_value, 0);
        let back = decode(&model, &payload, samples.len()).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn monotonic_ramp_round_trips() {
        let samples: Vec<i32> = (0..200).collect();
        let (model, payload) = encode(&samples);
        let back = decode(&model, &payload, samples.len()).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn constant_signal_round_trips() {
        let samples = [9; 30];
        let (model, payload) = encode(&samples);
        let back = decode(&model, &payload, samples.len()).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn large_excursions_trigger_escapes_and_round_trip() {
        let samples = [0, 5, -3, 2000, -2000, 1, 0, 400];
        let (model, payload) = encode(&samples);
        let back = decode(&model, &payload, samples.len()).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn escape_carries_the_raw_current_sample_value() {
        let samples = [2, 300];
        let (_, payload) = encode(&samples);
        // the escape stream holds the raw sample (300), not the
        // triggering difference (298)
        let raw_start = payload.len() - 4;
        assert_eq!(&payload[raw_start..], &300i32.to_le_bytes());
    }

    #[test]
    fn single_sample_round_trips() {
        let samples = [123];
        let (model, payload) = encode(&samples);
        let back = decode(&model, &payload, 1).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn model_round_trips_through_bytes() {
        let samples = [0, 1, 0, 1, 0, 1, 0, 1];
        let (model, _) = encode(&samples);
        let bytes = model.to_bytes();
        let back = PredModel::from_bytes(&bytes).unwrap();
        assert_eq!(back.initial_sample_value, model.initial_sample_value);
        assert_eq!(back.difference_bytes, model.difference_bytes);
        assert_eq!(back.nil_bins.symbols, model.nil_bins.symbols);
        assert_eq!(back.pos_bins.symbols, model.pos_bins.symbols);
        assert_eq!(back.neg_bins.symbols, model.neg_bins.symbols);
    }
}
