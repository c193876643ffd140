//! Optional pre-encoding transforms: detrending and amplitude scaling
//! (§4.4.2). Both run before RED/PRED/MBE see the samples and are reversed
//! after decoding; frequency scaling is named by the format but not
//! implemented here (see [`scale_frequency_encode`]).

use crate::error::{MedError, Result};

/// `(m, b)` demoted to `(f32, i32)` per §4.4.2 — these exact demoted values,
/// not the higher-precision fit, are what both sides use to regenerate the
/// trend line, so the round-trip only needs to agree on `f32`/`i32` math.
/// Stored as two separate 4-byte parameter-region slots (`gradient`,
/// `intercept`), not a single blob — §6 lists them as distinct parameter
/// bits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetrendModel {
    pub slope: f32,
    pub intercept: i32,
}

/// Width of a single parameter-region slot (§6: every slot is 4 bytes).
pub const PARAMETER_SLOT_BYTES: usize = 4;

impl DetrendModel {
    pub fn gradient_bytes(&self) -> [u8; PARAMETER_SLOT_BYTES] {
        self.slope.to_le_bytes()
    }

    pub fn intercept_bytes(&self) -> [u8; PARAMETER_SLOT_BYTES] {
        self.intercept.to_le_bytes()
    }

    pub fn from_parts(gradient: [u8; PARAMETER_SLOT_BYTES], intercept: [u8; PARAMETER_SLOT_BYTES]) -> DetrendModel {
        DetrendModel {
            slope: f32::from_le_bytes(gradient),
            intercept: i32::from_le_bytes(intercept),
        }
    }

    fn trend_at(&self, i: usize) -> i32 {
        (self.slope as f64 * i as f64).round() as i32 + self.intercept
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = values.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Least-absolute-deviations line fit via bisection on the slope: at each
/// trial slope the optimal intercept is the median residual, and the
/// weighted-sign derivative of the L1 cost with respect to slope changes
/// sign exactly once, so plain bisection converges to the LAD slope.
fn lad_line(samples: &[i32]) -> (f64, f64) {
    if samples.len() < 2 {
        return (0.0, samples.first().copied().unwrap_or(0) as f64);
    }

    let xs: Vec<f64> = (0..samples.len()).map(|i| i as f64).collect();
    let ys: Vec<f64> = samples.iter().map(|&s| s as f64).collect();

    let eval = |slope: f64| -> (f64, f64) {
        let mut resid: Vec<f64> = ys.iter().zip(&xs).map(|(&y, &x)| y - slope * x).collect();
        let intercept = median(&mut resid.clone());
        let mut deriv = 0.0;
        for (i, &x) in xs.iter().enumerate() {
            let r = resid[i] - intercept;
            if r > 0.0 {
                deriv -= x;
            } else if r < 0.0 {
                deriv += x;
            }
        }
        (intercept, deriv)
    };

    let max_x = samples.len() as f64;
    let max_y = ys.iter().cloned().fold(0.0f64, |a, b| a.max(b.abs()));
    let bound = (2.0 * (max_y + 1.0) / max_x).max(1.0);

    let mut lo = -bound;
    let mut hi = bound;
    let (_, dlo) = eval(lo);

    for _ in 0..60 {
        let mid = (lo + hi) / 2.0;
        let (_, dmid) = eval(mid);
        if dmid == 0.0 {
            lo = mid;
            hi = mid;
            break;
        }
        if dmid.signum() == dlo.signum() {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let slope = (lo + hi) / 2.0;
    let (intercept, _) = eval(slope);
    (slope, intercept)
}

/// Fit and subtract a LAD trend line, returning the model and the integer
/// residuals that RED/PRED/MBE actually see.
pub fn detrend_encode(samples: &[i32]) -> (DetrendModel, Vec<i32>) {
    if samples.len() < 2 {
        let model = DetrendModel {
            slope: 0.0,
            intercept: samples.first().copied().unwrap_or(0),
        };
        let residuals = samples.iter().enumerate().map(|(i, &s)| s - model.trend_at(i)).collect();
        return (model, residuals);
    }
    let (slope, intercept) = lad_line(samples);
    let model = DetrendModel {
        slope: slope as f32,
        intercept: intercept.round() as i32,
    };
    let residuals = samples.iter().enumerate().map(|(i, &s)| s - model.trend_at(i)).collect();
    (model, residuals)
}

/// Reverse [`detrend_encode`]: add the trend line back onto the residuals.
/// Exact, since both sides round the same `f32` slope/intercept the same
/// way.
pub fn detrend_decode(model: &DetrendModel, residuals: &[i32]) -> Vec<i32> {
    residuals.iter().enumerate().map(|(i, &r)| model.trend_at(i) + r).collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplitudeScaleModel {
    pub factor: f32,
}

pub const AMPLITUDE_SCALE_MODEL_BYTES: usize = 4;

impl AmplitudeScaleModel {
    pub fn to_bytes(&self) -> [u8; AMPLITUDE_SCALE_MODEL_BYTES] {
        self.factor.to_le_bytes()
    }

    pub fn from_bytes(buf: &[u8; AMPLITUDE_SCALE_MODEL_BYTES]) -> AmplitudeScaleModel {
        AmplitudeScaleModel {
            factor: f32::from_le_bytes(*buf),
        }
    }
}

/// Scale every sample by an explicit factor, rounding to the nearest
/// integer. Lossy unless `factor` happens to divide every sample exactly;
/// callers trade this loss for a narrower post-transform value range.
pub fn scale_amplitude_encode(samples: &[i32], factor: f64) -> (AmplitudeScaleModel, Vec<i32>) {
    let scaled = samples
        .iter()
        .map(|&s| (s as f64 * factor).round() as i32)
        .collect();
    (AmplitudeScaleModel { factor: factor as f32 }, scaled)
}

pub fn scale_amplitude_decode(model: &AmplitudeScaleModel, scaled: &[i32]) -> Vec<i32> {
    let factor = model.factor as f64;
    if factor == 0.0 {
        return vec![0; scaled.len()];
    }
    scaled.iter().map(|&s| (s as f64 / factor).round() as i32).collect()
}

/// A crude normality score (excess-kurtosis proxy): near 0 for a
/// roughly-Gaussian signal, large for peaky or heavy-tailed ones. Used to
/// decide whether auto amplitude scaling is worth attempting at all — a
/// strongly non-Gaussian signal rarely benefits from it.
fn normality_score(samples: &[i32]) -> f64 {
    if samples.len() < 4 {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
    let variance = samples.iter().map(|&s| (s as f64 - mean).powi(2)).sum::<f64>() / n;
    if variance <= 0.0 {
        return 0.0;
    }
    let m4 = samples.iter().map(|&s| (s as f64 - mean).powi(4)).sum::<f64>() / n;
    (m4 / variance.powi(2) - 3.0).abs()
}

/// Binary-search a scale factor so the scaled signal's peak magnitude lands
/// near `target_max_abs`, skipping the search (factor 1.0) when the signal
/// is too non-Gaussian for scaling to reliably help.
pub fn scale_amplitude_auto(samples: &[i32], target_max_abs: i32) -> (AmplitudeScaleModel, Vec<i32>) {
    if samples.is_empty() || normality_score(samples) > 10.0 {
        return (AmplitudeScaleModel { factor: 1.0 }, samples.to_vec());
    }
    let peak = samples.iter().map(|&s| (s as i64).unsigned_abs()).max().unwrap_or(0);
    if peak == 0 {
        return (AmplitudeScaleModel { factor: 1.0 }, samples.to_vec());
    }

    let mut lo = 0.0f64;
    let mut hi = target_max_abs as f64 * 4.0 / peak as f64 + 1.0;
    for _ in 0..40 {
        let mid = (lo + hi) / 2.0;
        let scaled_peak = (peak as f64 * mid).round();
        if scaled_peak > target_max_abs as f64 {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    scale_amplitude_encode(samples, lo)
}

/// Frequency (resampling) scaling is named by the format but changes the
/// sample count, which needs the index and Sgmt-record machinery above
/// this layer to stay consistent; this crate does not implement it.
pub fn scale_frequency_encode(_samples: &[i32], _target_hz: f64) -> Result<Vec<i32>> {
    Err(MedError::UnsupportedOperation(
        "frequency scaling is not implemented".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detrend_round_trips_a_linear_ramp() {
        let samples: Vec<i32> = (0..100).map(|i| 5 + i * 3).collect();
        let (model, residuals) = detrend_encode(&samples);
        let back = detrend_decode(&model, &residuals);
        assert_eq!(back, samples);
    }

    #[test]
    fn detrend_round_trips_noisy_signal() {
        let samples: Vec<i32> = (0..200)
            .map(|i| 1000 + i * 2 + if i % 7 == 0 { 50 } else { -3 })
            .collect();
        let (model, residuals) = detrend_encode(&samples);
        let back = detrend_decode(&model, &residuals);
        assert_eq!(back, samples);
    }

    #[test]
    fn detrend_reduces_residual_magnitude_for_a_ramp() {
        let samples: Vec<i32> = (0..100).map(|i| 5 + i * 3).collect();
        let (_, residuals) = detrend_encode(&samples);
        let max_residual = residuals.iter().map(|&r| r.abs()).max().unwrap();
        let max_original = samples.iter().map(|&s| s.abs()).max().unwrap();
        assert!(max_residual < max_original);
    }

    #[test]
    fn amplitude_scale_round_trips_when_factor_divides_evenly() {
        let samples: Vec<i32> = (0..50).map(|i| i * 4).collect();
        let (model, scaled) = scale_amplitude_encode(&samples, 0.25);
        let back = scale_amplitude_decode(&model, &scaled);
        assert_eq!(back, samples);
    }

    #[test]
    fn amplitude_auto_respects_target_peak() {
        let samples: Vec<i32> = (0..500).map(|i| ((i as f64 * 0.1).sin() * 10000.0) as i32).collect();
        let (_, scaled) = scale_amplitude_auto(&samples, 127);
        let peak = scaled.iter().map(|&s| s.abs()).max().unwrap();
        assert!(peak <= 200);
    }

    #[test]
    fn frequency_scaling_is_unsupported() {
        assert!(scale_frequency_encode(&[1, 2, 3], 500.0).is_err());
    }

    #[test]
    fn detrend_model_round_trips_through_separate_gradient_and_intercept_slots() {
        let samples: Vec<i32> = (0..100).map(|i| 5 + i * 3 + (i % 5)).collect();
        let (model, _) = detrend_encode(&samples);
        let rebuilt = DetrendModel::from_parts(model.gradient_bytes(), model.intercept_bytes());
        assert_eq!(rebuilt, model);
    }
}
