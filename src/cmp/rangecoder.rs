//! The 48-bit carry-less range coder shared by RED and PRED (§4.4.4).
//!
//! Cumulative-frequency bounds are always expressed out of a 16-bit total
//! (`2^16`), matching `RED_TOTAL_COUNTS`. Renormalization follows the
//! classic carry-less scheme: once the top byte of `low` and of
//! `low + range` agree, that byte is final and can be emitted immediately;
//! an underflow guard keeps `range` from shrinking below the point where
//! 16-bit frequency precision would be lost.

/// `2^16`: every model's scaled bin counts sum to `RED_TOTAL_COUNTS - 1`.
pub const RED_TOTAL_COUNTS: u32 = 1 << 16;

const WINDOW_BYTES: u32 = 6; // 48-bit window
const TOP: u64 = 1 << 40; // boundary of the window's top byte
const BOTTOM: u64 = 1 << 24; // minimum range before the underflow guard kicks in
const MASK: u64 = (1u64 << 48) - 1;

pub struct RangeEncoder {
    low: u64,
    range: u64,
    out: Vec<u8>,
}

impl RangeEncoder {
    pub fn new() -> RangeEncoder {
        RangeEncoder {
            low: 0,
            range: MASK,
            out: Vec::new(),
        }
    }

    /// Narrow the current interval to `[cum_lo, cum_hi)` out of `total`.
    pub fn encode(&mut self, cum_lo: u32, cum_hi: u32, total: u32) {
        let r = self.range / total as u64;
        self.low = self.low.wrapping_add(r * cum_lo as u64);
        self.range = r * (cum_hi - cum_lo) as u64;
        self.normalize();
    }

    fn normalize(&mut self) {
        loop {
            if (self.low ^ self.low.wrapping_add(self.range)) < TOP {
                // top byte settled
            } else if self.range < BOTTOM {
                self.range = 0u64.wrapping_sub(self.low) & (BOTTOM - 1);
            } else {
                break;
            }
            self.out.push((self.low >> 40) as u8);
            self.low = (self.low << 8) & MASK;
            self.range <<= 8;
        }
    }

    /// Flush the final `low` and return the encoded byte stream.
    pub fn finish(mut self) -> Vec<u8> {
        for i in 0..WINDOW_BYTES {
            self.out.push((self.low >> (40 - 8 * i)) as u8);
        }
        self.out
    }
}

pub struct RangeDecoder<'a> {
    low: u64,
    range: u64,
    code: u64,
    input: &'a [u8],
    pos: usize,
}

impl<'a> RangeDecoder<'a> {
    pub fn new(input: &'a [u8]) -> RangeDecoder<'a> {
        let mut code = 0u64;
        let mut pos = 0usize;
        for _ in 0..WINDOW_BYTES {
            code = (code << 8) | input.get(pos).copied().unwrap_or(0) as u64;
            pos += 1;
        }
        RangeDecoder {
            low: 0,
            range: MASK,
            code,
            input,
            pos,
        }
    }

    fn next_byte(&mut self) -> u8 {
        let b = self.input.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        b
    }

    /// The cumulative-frequency value (out of `total`) the next symbol must
    /// contain, used by the caller to look up which bin it falls in.
    pub fn get_freq(&self, total: u32) -> u32 {
        let r = self.range / total as u64;
        if r == 0 {
            return total - 1;
        }
        let value = (self.code.wrapping_sub(self.low)) / r;
        value.min((total - 1) as u64) as u32
    }

    /// Commit to the bin identified by `[cum_lo, cum_hi)` and consume the
    /// bits it accounted for.
    pub fn decode(&mut self, cum_lo: u32, cum_hi: u32, total: u32) {
        let r = self.range / total as u64;
        self.low = self.low.wrapping_add(r * cum_lo as u64);
        self.range = r * (cum_hi - cum_lo) as u64;
        self.normalize();
    }

    fn normalize(&mut self) {
        loop {
            if (self.low ^ self.low.wrapping_add(self.range)) < TOP {
                // top byte settled
            } else if self.range < BOTTOM {
                self.range = 0u64.wrapping_sub(self.low) & (BOTTOM - 1);
            } else {
                break;
            }
            self.low = (self.low << 8) & MASK;
            self.range <<= 8;
            self.code = ((self.code << 8) | self.next_byte() as u64) & MASK;
        }
    }
}
