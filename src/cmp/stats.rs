//! Statistics-bin construction shared by RED and PRED (§4.4.4).

use super::rangecoder::RED_TOTAL_COUNTS;

/// A byte-value histogram scaled so its counts sum to `RED_TOTAL_COUNTS - 1`,
/// sorted by decreasing original frequency, ready to drive a range coder.
#[derive(Debug, Clone)]
pub struct ScaledBins {
    pub symbols: Vec<i8>,
    pub counts: Vec<u16>,
    cum: Vec<u32>,
}

impl ScaledBins {
    /// Build bins from raw bytes: count each value, drop zero-count bins,
    /// sort by decreasing count, then scale to `RED_TOTAL_COUNTS - 1` with
    /// ±1 redistribution so the scaled sum is exact.
    pub fn build(bytes: &[u8]) -> ScaledBins {
        let mut raw_counts = [0u32; 256];
        for &b in bytes {
            raw_counts[b as usize] += 1;
        }
        let mut pairs: Vec<(u8, u32)> = (0..256)
            .filter(|&v| raw_counts[v] > 0)
            .map(|v| (v as u8, raw_counts[v]))
            .collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1));

        if pairs.is_empty() {
            return ScaledBins {
                symbols: Vec::new(),
                counts: Vec::new(),
                cum: vec![0],
            };
        }

        let target: i64 = (RED_TOTAL_COUNTS - 1) as i64;
        let total_raw: u64 = pairs.iter().map(|&(_, c)| c as u64).sum();
        let mut scaled: Vec<i64> = pairs
            .iter()
            .map(|&(_, c)| (((c as u128) * target as u128) / total_raw as u128).max(1) as i64)
            .collect();

        let mut diff = target - scaled.iter().sum::<i64>();
        let mut i = 0usize;
        while diff != 0 {
            let idx = i % scaled.len();
            if diff > 0 {
                scaled[idx] += 1;
                diff -= 1;
            } else if scaled[idx] > 1 {
                scaled[idx] -= 1;
                diff += 1;
            }
            i += 1;
        }

        let counts: Vec<u16> = scaled.iter().map(|&s| s as u16).collect();
        let mut cum = vec![0u32; counts.len() + 1];
        for i in 0..counts.len() {
            cum[i + 1] = cum[i] + counts[i] as u32;
        }
        let symbols: Vec<i8> = pairs.iter().map(|&(v, _)| v as i8).collect();

        ScaledBins { symbols, counts, cum }
    }

    /// Rebuild from the stored (symbols, counts) pair as read off disk —
    /// no rescaling, the counts are already exact.
    pub fn from_stored(symbols: Vec<i8>, counts: Vec<u16>) -> ScaledBins {
        let mut cum = vec![0u32; counts.len() + 1];
        for i in 0..counts.len() {
            cum[i + 1] = cum[i] + counts[i] as u32;
        }
        ScaledBins { symbols, counts, cum }
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> u32 {
        *self.cum.last().unwrap_or(&0)
    }

    pub fn bounds(&self, bin: usize) -> (u32, u32) {
        (self.cum[bin], self.cum[bin + 1])
    }

    pub fn bin_for_symbol(&self, byte: u8) -> usize {
        self.symbols
            .iter()
            .position(|&s| s as u8 == byte)
            .expect("byte value not present in statistics table")
    }

    pub fn bin_for_freq(&self, freq: u32) -> usize {
        let idx = self.cum.partition_point(|&c| c <= freq);
        idx.saturating_sub(1).min(self.counts.len().saturating_sub(1))
    }
}
