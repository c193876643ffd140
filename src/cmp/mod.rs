//! CMP — the compressed sample-block codec (§4.4).
//!
//! A CMP block is a 56-byte fixed header, a record region, a parameter
//! region (protected + discretionary sub-regions), a model region sized by
//! whichever encoding was chosen, and finally the encoded payload itself.
//! Three encodings exist — [`mbe`] (fixed-width bit packing), [`red`]
//! (range-coded first differences), [`pred`] (RED split across
//! sign-dependent contexts) — plus two optional pre-encoding transforms in
//! [`transforms`]. [`rangecoder`] and [`stats`] are the machinery RED and
//! PRED share.

pub mod mbe;
pub mod pred;
pub mod rangecoder;
pub mod red;
pub mod stats;
pub mod transforms;

use byteorder::{ByteOrder, LittleEndian};

use crate::crc32;
use crate::crypto::AesKey;
use crate::error::{MedError, Result};
use crate::types::{
    CMP_BLOCK_START_UID, CMP_FIXED_HEADER_BYTES, ENCRYPTION_BLOCK_BYTES, PARAMETER_FLAG_AMPLITUDE_SCALE,
    PARAMETER_FLAG_GRADIENT, PARAMETER_FLAG_INTERCEPT,
};

/// Byte offset of `block_CRC`; the CRC covers everything from here to
/// `total_block_bytes` (§4.4, §9).
pub const CMP_BLOCK_CRC_START_OFFSET: usize = 12;

/// Byte offset of `start_time`; encryption (when applied) covers everything
/// from here to `total_block_bytes` — `block_start_UID`, `block_CRC`, and
/// `block_flags` stay in the clear so a reader can locate and validate a
/// block before deciding whether it needs a key (§9).
pub const CMP_BLOCK_ENCRYPTION_START_OFFSET: usize = 24;

const OFF_BLOCK_START_UID: usize = 0;
const OFF_BLOCK_CRC: usize = 8;
const OFF_BLOCK_FLAGS: usize = 12;
const OFF_START_TIME: usize = 16;
const OFF_ACQUISITION_CHANNEL_NUMBER: usize = 24;
const OFF_TOTAL_BLOCK_BYTES: usize = 28;
const OFF_NUMBER_OF_SAMPLES: usize = 32;
const OFF_NUMBER_OF_RECORDS: usize = 36;
const OFF_RECORD_REGION_BYTES: usize = 38;
const OFF_PARAMETER_FLAGS: usize = 40;
const OFF_PARAMETER_REGION_BYTES: usize = 44;
const OFF_PROTECTED_REGION_BYTES: usize = 46;
const OFF_DISCRETIONARY_REGION_BYTES: usize = 48;
const OFF_MODEL_REGION_BYTES: usize = 50;
const OFF_TOTAL_HEADER_BYTES: usize = 52;

const FLAG_ENCODING_MASK: u32 = 0b11;
const FLAG_ENCODING_MBE: u32 = 0;
const FLAG_ENCODING_RED: u32 = 1;
const FLAG_ENCODING_PRED: u32 = 2;
const FLAG_DETREND: u32 = 1 << 2;
const FLAG_AMPLITUDE_SCALED: u32 = 1 << 3;
const FLAG_DISCONTINUITY: u32 = 1 << 4;
const FLAG_FALLBACK_TO_MBE: u32 = 1 << 5;
const FLAG_ENCRYPTED: u32 = 1 << 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpEncoding {
    Mbe,
    Red,
    Pred,
}

/// Everything about how a block was built that the writer needs to know and
/// the reader needs to reconstruct it: which encoding won, which optional
/// transforms ran, whether it carries a discontinuity or is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFlags {
    pub encoding: CmpEncoding,
    pub detrended: bool,
    pub amplitude_scaled: bool,
    pub discontinuity: bool,
    pub fallback_to_mbe: bool,
    pub encrypted: bool,
}

impl BlockFlags {
    fn to_u32(self) -> u32 {
        let mut v = match self.encoding {
            CmpEncoding::Mbe => FLAG_ENCODING_MBE,
            CmpEncoding::Red => FLAG_ENCODING_RED,
            CmpEncoding::Pred => FLAG_ENCODING_PRED,
        };
        if self.detrended {
            v |= FLAG_DETREND;
        }
        if self.amplitude_scaled {
            v |= FLAG_AMPLITUDE_SCALED;
        }
        if self.discontinuity {
            v |= FLAG_DISCONTINUITY;
        }
        if self.fallback_to_mbe {
            v |= FLAG_FALLBACK_TO_MBE;
        }
        if self.encrypted {
            v |= FLAG_ENCRYPTED;
        }
        v
    }

    fn from_u32(v: u32) -> Result<BlockFlags> {
        let encoding = match v & FLAG_ENCODING_MASK {
            FLAG_ENCODING_MBE => CmpEncoding::Mbe,
            FLAG_ENCODING_RED => CmpEncoding::Red,
            FLAG_ENCODING_PRED => CmpEncoding::Pred,
            other => return Err(MedError::MalformedData(format!("unknown CMP encoding tag {other}"))),
        };
        Ok(BlockFlags {
            encoding,
            detrended: v & FLAG_DETREND != 0,
            amplitude_scaled: v & FLAG_AMPLITUDE_SCALED != 0,
            discontinuity: v & FLAG_DISCONTINUITY != 0,
            fallback_to_mbe: v & FLAG_FALLBACK_TO_MBE != 0,
            encrypted: v & FLAG_ENCRYPTED != 0,
        })
    }
}

/// Options governing how [`encode_block`] builds a block.
#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    pub detrend: bool,
    pub amplitude_scale_target: Option<i32>,
    pub discontinuity: bool,
    pub records: Vec<Vec<u8>>,
    pub protected_region: Vec<u8>,
    pub discretionary_region: Vec<u8>,
}

pub struct DecodedBlock {
    pub samples: Vec<i32>,
    pub start_time: i64,
    pub acquisition_channel_number: i32,
    pub discontinuity: bool,
    pub records: Vec<Vec<u8>>,
    pub protected_region: Vec<u8>,
    pub discretionary_region: Vec<u8>,
}

fn round_up(n: usize, multiple: usize) -> usize {
    n.div_ceil(multiple) * multiple
}

/// How many bytes starting at `CMP_BLOCK_ENCRYPTION_START_OFFSET` get
/// encrypted, per §4.4.7. MBE covers the whole remaining block — the
/// payload is fixed-width packed and there's no structure left to protect
/// piecemeal. RED/PRED cover only the header and model region, rounded up
/// by one extra 16-byte block: the range-coded payload tail is left in the
/// clear. Capped to what's actually in the block, so a malformed/truncated
/// `total_header_bytes` can't walk the slice past `total_block_bytes`.
fn encrypted_span_len(encoding: CmpEncoding, total_header_bytes: usize, total_block_bytes: usize) -> usize {
    let available = total_block_bytes.saturating_sub(CMP_BLOCK_ENCRYPTION_START_OFFSET);
    match encoding {
        CmpEncoding::Mbe => available,
        CmpEncoding::Red | CmpEncoding::Pred => {
            let header_span = total_header_bytes.saturating_sub(CMP_BLOCK_ENCRYPTION_START_OFFSET);
            let span = round_up(header_span, ENCRYPTION_BLOCK_BYTES) + ENCRYPTION_BLOCK_BYTES;
            span.min(available)
        }
    }
}

/// Encode `samples` into a complete, framed CMP block, optionally detrending
/// and amplitude-scaling first, choosing whichever of MBE/RED/PRED produces
/// the smallest encoded payload, and encrypting the post-header region when
/// `key` is given.
pub fn encode_block(
    samples: &[i32],
    start_time: i64,
    acquisition_channel_number: i32,
    options: &EncodeOptions,
    key: Option<&AesKey>,
) -> Result<Vec<u8>> {
    let mut working = samples.to_vec();

    let detrend_model = if options.detrend {
        let (model, residuals) = transforms::detrend_encode(&working);
        working = residuals;
        Some(model)
    } else {
        None
    };

    let scale_model = if let Some(target) = options.amplitude_scale_target {
        let (model, scaled) = transforms::scale_amplitude_auto(&working, target);
        working = scaled;
        Some(model)
    } else {
        None
    };

    // Parameter region: a packed array of 4-byte slots selected by
    // `parameter_flags`, in increasing bit order (§4.4.1, §6) — gradient and
    // intercept are two independent slots, not one combined blob.
    let mut parameter_flags = 0u32;
    let mut parameter_region = Vec::new();
    if let Some(model) = &detrend_model {
        parameter_flags |= PARAMETER_FLAG_GRADIENT | PARAMETER_FLAG_INTERCEPT;
        parameter_region.extend_from_slice(&model.gradient_bytes());
        parameter_region.extend_from_slice(&model.intercept_bytes());
    }
    if let Some(model) = &scale_model {
        parameter_flags |= PARAMETER_FLAG_AMPLITUDE_SCALE;
        parameter_region.extend_from_slice(&model.to_bytes());
    }

    let (red_model, red_payload) = red::encode(&working);
    let (pred_model, pred_payload) = pred::encode(&working);
    let (mbe_model, mbe_payload) = mbe::encode(&working);

    let red_total = red_model.to_bytes().len() + red_payload.len();
    let pred_total = pred_model.to_bytes().len() + pred_payload.len();
    let mbe_total = mbe_model.to_bytes().len() + mbe_payload.len();

    let (encoding, model_region, mut payload, fallback_to_mbe) =
        if red_total <= pred_total && red_total <= mbe_total {
            (CmpEncoding::Red, red_model.to_bytes(), red_payload, false)
        } else if pred_total <= mbe_total {
            (CmpEncoding::Pred, pred_model.to_bytes(), pred_payload, false)
        } else {
            (CmpEncoding::Mbe, mbe_model.to_bytes().to_vec(), mbe_payload, true)
        };

    let mut record_region = Vec::new();
    for r in &options.records {
        record_region.extend_from_slice(r);
    }
    if record_region.len() > u16::MAX as usize {
        return Err(MedError::Overflow("CMP record region too large".to_string()));
    }
    if parameter_region.len() > u16::MAX as usize {
        return Err(MedError::Overflow("CMP parameter region too large".to_string()));
    }
    if model_region.len() > u16::MAX as usize {
        return Err(MedError::Overflow("CMP model region too large".to_string()));
    }

    let header_len = CMP_FIXED_HEADER_BYTES;
    let variable_region_len = record_region.len()
        + parameter_region.len()
        + options.protected_region.len()
        + options.discretionary_region.len();
    // §4.4.1: total_header_bytes = fixed_header + variable_region + model_region;
    // this is also where the encoded payload begins. It doesn't depend on
    // the payload's own padding, so it's fixed before that's decided.
    let total_header_bytes = header_len + variable_region_len + model_region.len();
    let unpadded_total = total_header_bytes + payload.len();

    // Only the encoded payload gets stretched; fixed regions are already
    // whole numbers of bytes and the reader locates them by stored sizes.
    // Plaintext blocks (and the RED/PRED payload tail of encrypted ones)
    // just need `total_block_bytes` to be an 8-byte multiple (§4.4.1). MBE
    // encrypts clear through to the end of the block, so when it's
    // encrypted the padded total must also leave a whole number of AES
    // blocks from `CMP_BLOCK_ENCRYPTION_START_OFFSET` onward (§4.4.7) — a
    // stronger constraint, since that offset isn't itself 16-byte aligned.
    // RED/PRED encrypt only the header span (see `encrypted_span_len`),
    // which rounds to a whole AES block on its own regardless of
    // `total_block_bytes`'s alignment, except when the payload is so short
    // that span would overrun the block — pad enough to avoid that too.
    let target_total = match (key.is_some(), encoding) {
        (true, CmpEncoding::Mbe) => {
            let encrypted_len = unpadded_total.saturating_sub(CMP_BLOCK_ENCRYPTION_START_OFFSET);
            CMP_BLOCK_ENCRYPTION_START_OFFSET + round_up(encrypted_len, ENCRYPTION_BLOCK_BYTES)
        }
        (true, CmpEncoding::Red | CmpEncoding::Pred) => {
            let header_span = total_header_bytes.saturating_sub(CMP_BLOCK_ENCRYPTION_START_OFFSET);
            let min_encrypted_total = CMP_BLOCK_ENCRYPTION_START_OFFSET
                + round_up(header_span, ENCRYPTION_BLOCK_BYTES)
                + ENCRYPTION_BLOCK_BYTES;
            round_up(unpadded_total, 8).max(min_encrypted_total)
        }
        (false, _) => round_up(unpadded_total, 8),
    };
    let pad_needed = target_total - unpadded_total;
    payload.resize(payload.len() + pad_needed, 0);

    let total_block_bytes = total_header_bytes + payload.len();

    let flags = BlockFlags {
        encoding,
        detrended: detrend_model.is_some(),
        amplitude_scaled: scale_model.is_some(),
        discontinuity: options.discontinuity,
        fallback_to_mbe,
        encrypted: key.is_some(),
    };

    let mut buf = vec![0u8; total_block_bytes];
    LittleEndian::write_u64(&mut buf[OFF_BLOCK_START_UID..], CMP_BLOCK_START_UID);
    LittleEndian::write_u32(&mut buf[OFF_BLOCK_FLAGS..], flags.to_u32());
    LittleEndian::write_i64(&mut buf[OFF_START_TIME..], start_time);
    LittleEndian::write_i32(&mut buf[OFF_ACQUISITION_CHANNEL_NUMBER..], acquisition_channel_number);
    LittleEndian::write_u32(&mut buf[OFF_TOTAL_BLOCK_BYTES..], total_block_bytes as u32);
    LittleEndian::write_u32(&mut buf[OFF_NUMBER_OF_SAMPLES..], samples.len() as u32);
    LittleEndian::write_u16(&mut buf[OFF_NUMBER_OF_RECORDS..], options.records.len() as u16);
    LittleEndian::write_u16(&mut buf[OFF_RECORD_REGION_BYTES..], record_region.len() as u16);
    LittleEndian::write_u32(&mut buf[OFF_PARAMETER_FLAGS..], parameter_flags);
    LittleEndian::write_u16(&mut buf[OFF_PARAMETER_REGION_BYTES..], parameter_region.len() as u16);
    LittleEndian::write_u16(&mut buf[OFF_PROTECTED_REGION_BYTES..], options.protected_region.len() as u16);
    LittleEndian::write_u16(&mut buf[OFF_DISCRETIONARY_REGION_BYTES..], options.discretionary_region.len() as u16);
    LittleEndian::write_u16(&mut buf[OFF_MODEL_REGION_BYTES..], model_region.len() as u16);
    LittleEndian::write_u32(&mut buf[OFF_TOTAL_HEADER_BYTES..], total_header_bytes as u32);

    // Variable region layout per §4.4.1: records, parameter array, protected
    // bytes, discretionary bytes — then the model region, then the payload.
    let mut off = header_len;
    buf[off..off + record_region.len()].copy_from_slice(&record_region);
    off += record_region.len();
    buf[off..off + parameter_region.len()].copy_from_slice(&parameter_region);
    off += parameter_region.len();
    buf[off..off + options.protected_region.len()].copy_from_slice(&options.protected_region);
    off += options.protected_region.len();
    buf[off..off + options.discretionary_region.len()].copy_from_slice(&options.discretionary_region);
    off += options.discretionary_region.len();
    buf[off..off + model_region.len()].copy_from_slice(&model_region);
    off += model_region.len();
    buf[off..off + payload.len()].copy_from_slice(&payload);

    if let Some(key) = key {
        let span = encrypted_span_len(encoding, total_header_bytes, total_block_bytes);
        key.encrypt_blocks(&mut buf[CMP_BLOCK_ENCRYPTION_START_OFFSET..CMP_BLOCK_ENCRYPTION_START_OFFSET + span]);
    }

    let crc = crc32::calculate(&buf[CMP_BLOCK_CRC_START_OFFSET..]);
    LittleEndian::write_u32(&mut buf[OFF_BLOCK_CRC..], crc);

    Ok(buf)
}

/// Validate and decode a framed CMP block, decrypting first if `key` is
/// given.
pub fn decode_block(block: &[u8], key: Option<&AesKey>) -> Result<DecodedBlock> {
    if block.len() < CMP_FIXED_HEADER_BYTES {
        return Err(MedError::MalformedData("CMP block shorter than its fixed header".to_string()));
    }
    let uid = LittleEndian::read_u64(&block[OFF_BLOCK_START_UID..]);
    if uid != CMP_BLOCK_START_UID {
        return Err(MedError::MalformedData("CMP block missing start UID".to_string()));
    }
    let stored_crc = LittleEndian::read_u32(&block[OFF_BLOCK_CRC..]);
    if !crc32::validate(&block[CMP_BLOCK_CRC_START_OFFSET..], stored_crc) {
        return Err(MedError::Integrity("CMP block CRC mismatch".to_string()));
    }

    let flags = BlockFlags::from_u32(LittleEndian::read_u32(&block[OFF_BLOCK_FLAGS..]))?;
    let start_time = LittleEndian::read_i64(&block[OFF_START_TIME..]);
    let acquisition_channel_number = LittleEndian::read_i32(&block[OFF_ACQUISITION_CHANNEL_NUMBER..]);
    let total_block_bytes = LittleEndian::read_u32(&block[OFF_TOTAL_BLOCK_BYTES..]) as usize;
    let number_of_samples = LittleEndian::read_u32(&block[OFF_NUMBER_OF_SAMPLES..]) as usize;
    let number_of_records = LittleEndian::read_u16(&block[OFF_NUMBER_OF_RECORDS..]) as usize;
    let record_region_bytes = LittleEndian::read_u16(&block[OFF_RECORD_REGION_BYTES..]) as usize;
    let parameter_flags = LittleEndian::read_u32(&block[OFF_PARAMETER_FLAGS..]);
    let parameter_region_bytes = LittleEndian::read_u16(&block[OFF_PARAMETER_REGION_BYTES..]) as usize;
    let protected_region_bytes = LittleEndian::read_u16(&block[OFF_PROTECTED_REGION_BYTES..]) as usize;
    let discretionary_region_bytes = LittleEndian::read_u16(&block[OFF_DISCRETIONARY_REGION_BYTES..]) as usize;
    let model_region_bytes = LittleEndian::read_u16(&block[OFF_MODEL_REGION_BYTES..]) as usize;
    let total_header_bytes = LittleEndian::read_u32(&block[OFF_TOTAL_HEADER_BYTES..]) as usize;

    if total_block_bytes > block.len() {
        return Err(MedError::MalformedData("CMP total_block_bytes exceeds buffer".to_string()));
    }

    let mut plain = block[..total_block_bytes].to_vec();
    if flags.encrypted {
        let key = key.ok_or_else(|| {
            MedError::PermissionDenied("CMP block is encrypted but no key was supplied".to_string())
        })?;
        let span = encrypted_span_len(flags.encoding, total_header_bytes, total_block_bytes);
        key.decrypt_blocks(&mut plain[CMP_BLOCK_ENCRYPTION_START_OFFSET..CMP_BLOCK_ENCRYPTION_START_OFFSET + span]);
    }

    // Variable region lives between the fixed header and `total_header_bytes`
    // (which also marks the model region's end and the payload's start),
    // laid out as records, parameter array, protected bytes, discretionary
    // bytes (§4.4.1).
    let mut off = CMP_FIXED_HEADER_BYTES;
    let record_region = plain[off..off + record_region_bytes].to_vec();
    off += record_region_bytes;
    let parameter_region = &plain[off..off + parameter_region_bytes];
    off += parameter_region_bytes;
    let protected_region = plain[off..off + protected_region_bytes].to_vec();
    off += protected_region_bytes;
    let discretionary_region = plain[off..off + discretionary_region_bytes].to_vec();
    off += discretionary_region_bytes;
    let model_bytes = &plain[off..off + model_region_bytes];
    off += model_region_bytes;
    if off != total_header_bytes {
        return Err(MedError::MalformedData(
            "CMP region sizes do not sum to total_header_bytes".to_string(),
        ));
    }
    let payload = &plain[off..total_block_bytes];

    // Parameter slots are packed in increasing bit-index order: gradient,
    // intercept, amplitude_scale, frequency_scale, noise_scores (§6).
    let mut param_off = 0usize;
    let mut take_slot = |present: bool| -> Result<Option<[u8; 4]>> {
        if !present {
            return Ok(None);
        }
        let slot: [u8; 4] = parameter_region
            .get(param_off..param_off + 4)
            .ok_or_else(|| MedError::MalformedData("CMP parameter region truncated".to_string()))?
            .try_into()
            .unwrap();
        param_off += 4;
        Ok(Some(slot))
    };
    let gradient = take_slot(parameter_flags & PARAMETER_FLAG_GRADIENT != 0)?;
    let intercept = take_slot(parameter_flags & PARAMETER_FLAG_INTERCEPT != 0)?;
    let amplitude_scale = take_slot(parameter_flags & PARAMETER_FLAG_AMPLITUDE_SCALE != 0)?;

    let detrend_model = match (gradient, intercept) {
        (Some(g), Some(i)) => Some(transforms::DetrendModel::from_parts(g, i)),
        (None, None) => None,
        _ => {
            return Err(MedError::MalformedData(
                "CMP block has only one of gradient/intercept".to_string(),
            ))
        }
    };
    if detrend_model.is_some() != flags.detrended {
        return Err(MedError::MalformedData(
            "CMP block_flags DETREND bit disagrees with parameter_flags".to_string(),
        ));
    }
    let scale_model = amplitude_scale.map(transforms::AmplitudeScaleModel::from_bytes);
    if scale_model.is_some() != flags.amplitude_scaled {
        return Err(MedError::MalformedData(
            "CMP block_flags AMPLITUDE_SCALED bit disagrees with parameter_flags".to_string(),
        ));
    }

    let codec_model_bytes = model_bytes;

    let mut working = match flags.encoding {
        CmpEncoding::Mbe => {
            let model_arr: [u8; mbe::MBE_MODEL_BYTES] = codec_model_bytes
                .try_into()
                .map_err(|_| MedError::MalformedData("MBE model truncated".to_string()))?;
            let model = mbe::MbeModel::from_bytes(&model_arr);
            mbe::decode(&model, payload, number_of_samples)
        }
        CmpEncoding::Red => {
            let model = red::RedModel::from_bytes(codec_model_bytes)?;
            red::decode(&model, payload, number_of_samples)?
        }
        CmpEncoding::Pred => {
            let model = pred::PredModel::from_bytes(codec_model_bytes)?;
            pred::decode(&model, payload, number_of_samples)?
        }
    };

    if let Some(model) = scale_model {
        working = transforms::scale_amplitude_decode(&model, &working);
    }
    if let Some(model) = detrend_model {
        working = transforms::detrend_decode(&model, &working);
    }

    let mut records = Vec::with_capacity(number_of_records);
    let mut roff = 0usize;
    for _ in 0..number_of_records {
        if roff + crate::types::RECORD_HEADER_BYTES > record_region.len() {
            return Err(MedError::MalformedData("CMP record region truncated".to_string()));
        }
        let header_bytes: [u8; crate::types::RECORD_HEADER_BYTES] =
            record_region[roff..roff + crate::types::RECORD_HEADER_BYTES].try_into().unwrap();
        let header = crate::record::RecordHeader::from_bytes(&header_bytes);
        let rec_len = header.total_record_bytes as usize;
        if roff + rec_len > record_region.len() {
            return Err(MedError::MalformedData("CMP record length exceeds region".to_string()));
        }
        records.push(record_region[roff..roff + rec_len].to_vec());
        roff += rec_len;
    }

    Ok(DecodedBlock {
        samples: working,
        start_time,
        acquisition_channel_number,
        discontinuity: flags.discontinuity,
        records,
        protected_region,
        discretionary_region,
    })
}
