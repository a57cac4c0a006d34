//! Mel filterbank construction and feature mapping.
//!
//! The filterbank is a dense `(n_mel_filters, n_freq_bins)` matrix of
//! triangular filters centered on points equally spaced on the mel scale,
//! built once per dataset instance. Its Moore-Penrose pseudo-inverse is
//! retained so magnitude spectra can be approximated back from mel features
//! when reconstructing audio.

use ndarray::Array2;

use crate::config::{FeatureConfig, FeatureType};
use crate::error::{DatasetResult, FeatureError};

/// Converts frequency in Hz to mel scale: `mel = 2595 * log10(1 + hz/700)`.
fn hz_to_mel(freq_hz: f64) -> f64 {
    2595.0 * (1.0 + freq_hz / 700.0).log10()
}

/// Converts mel scale back to Hz: `hz = 700 * (10^(mel/2595) - 1)`.
fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0f64.powf(mel / 2595.0) - 1.0)
}

fn linspace(start: f64, end: f64, num: usize) -> Vec<f64> {
    if num == 0 {
        return Vec::new();
    }
    if num == 1 {
        return vec![start];
    }
    let step = (end - start) / (num - 1) as f64;
    (0..num).map(|i| start + i as f64 * step).collect()
}

fn build_filterbank(
    n_mels: usize,
    frame_len: usize,
    sample_rate: f64,
    f_min: f64,
    f_max: f64,
) -> Array2<f64> {
    let n_freqs = frame_len / 2 + 1;

    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|i| i as f64 * sample_rate / frame_len as f64)
        .collect();

    // n_mels triangles need n_mels + 2 edge points on the mel scale.
    let mel_points = linspace(hz_to_mel(f_min), hz_to_mel(f_max), n_mels + 2);
    let hz_points: Vec<f64> = mel_points.into_iter().map(mel_to_hz).collect();

    let mut filterbank = Array2::<f64>::zeros((n_mels, n_freqs));
    for m in 0..n_mels {
        let f_left = hz_points[m];
        let f_center = hz_points[m + 1];
        let f_right = hz_points[m + 2];

        // Area normalization: peak 2 / (f_right - f_left).
        let enorm = 2.0 / (f_right - f_left);

        for (k, &freq) in fft_freqs.iter().enumerate() {
            if freq >= f_left && freq < f_center {
                filterbank[[m, k]] = enorm * (freq - f_left) / (f_center - f_left);
            } else if freq >= f_center && freq <= f_right {
                filterbank[[m, k]] = enorm * (f_right - freq) / (f_right - f_center);
            }
        }
    }

    filterbank
}

/// Inverts a square matrix in place via Gauss-Jordan elimination with
/// partial pivoting. The mel Gram matrix is small (`n_mels x n_mels`),
/// symmetric and well conditioned for any sane filterbank.
fn invert_square(matrix: &Array2<f64>) -> DatasetResult<Array2<f64>> {
    let n = matrix.nrows();
    let mut work = matrix.clone();
    let mut inverse = Array2::<f64>::eye(n);

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&a, &b| {
                work[[a, col]]
                    .abs()
                    .total_cmp(&work[[b, col]].abs())
            })
            .unwrap_or(col);
        let pivot = work[[pivot_row, col]];
        if pivot.abs() < 1e-12 {
            return Err(FeatureError::SingularFilterbank(format!(
                "Gram matrix pivot {pivot:e} at column {col}"
            ))
            .into());
        }
        if pivot_row != col {
            for k in 0..n {
                work.swap([pivot_row, k], [col, k]);
                inverse.swap([pivot_row, k], [col, k]);
            }
        }
        for k in 0..n {
            work[[col, k]] /= pivot;
            inverse[[col, k]] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for k in 0..n {
                let w = work[[col, k]];
                let i = inverse[[col, k]];
                work[[row, k]] -= factor * w;
                inverse[[row, k]] -= factor * i;
            }
        }
    }

    Ok(inverse)
}

/// Projects magnitude spectra onto the mel scale and derives the configured
/// feature representation.
#[derive(Debug, Clone)]
pub struct MelFeatureExtractor {
    filterbank: Array2<f32>,
    inverse: Array2<f32>,
    feature_type: FeatureType,
}

impl MelFeatureExtractor {
    /// Builds the filterbank and its pseudo-inverse from the configuration.
    ///
    /// # Errors
    /// Fails if the filterbank rows are linearly dependent (degenerate
    /// frequency range or far more filters than frequency bins).
    pub fn from_config(config: &FeatureConfig) -> DatasetResult<Self> {
        let filterbank = build_filterbank(
            config.n_mel_filters,
            config.frame_len(),
            f64::from(config.sampling_rate),
            config.mel_min_freq_hz,
            config.mel_max_freq_hz,
        );

        // Moore-Penrose for a full-row-rank matrix: F^T (F F^T)^-1.
        let gram = filterbank.dot(&filterbank.t());
        let gram_inv = invert_square(&gram)?;
        let pseudo_inverse = filterbank.t().dot(&gram_inv);

        Ok(Self {
            filterbank: filterbank.mapv(|v| v as f32),
            inverse: pseudo_inverse.mapv(|v| v as f32),
            feature_type: config.feature_type,
        })
    }

    /// The `(n_mel_filters, n_freq_bins)` filterbank matrix.
    pub fn filterbank(&self) -> &Array2<f32> {
        &self.filterbank
    }

    /// The `(n_freq_bins, n_mel_filters)` pseudo-inverse.
    pub fn inverse_filterbank(&self) -> &Array2<f32> {
        &self.inverse
    }

    /// Number of mel filters.
    pub fn n_mels(&self) -> usize {
        self.filterbank.nrows()
    }

    /// Projects a `(n_freq_bins, n_frames)` magnitude spectrogram onto the
    /// mel scale.
    ///
    /// # Errors
    /// Fails if the spectrogram's bin count does not match the filterbank.
    pub fn project(&self, magnitude: &Array2<f32>) -> DatasetResult<Array2<f32>> {
        if magnitude.nrows() != self.filterbank.ncols() {
            return Err(FeatureError::DimensionMismatch(format!(
                "magnitude has {} frequency bins, filterbank expects {}",
                magnitude.nrows(),
                self.filterbank.ncols()
            ))
            .into());
        }
        Ok(self.filterbank.dot(magnitude))
    }

    /// Derives the configured feature representation from a magnitude
    /// spectrogram.
    ///
    /// For log-mel features, `10 * log10(x)` is taken only where the mel
    /// magnitude is strictly positive; non-positive cells pass through
    /// unchanged. Zero-energy cells therefore stay exactly 0 rather than
    /// collapsing to -inf, at the cost of mixing scales within one frame.
    /// Compatibility behaviour, kept as-is.
    pub fn to_features(&self, magnitude: &Array2<f32>) -> DatasetResult<Array2<f32>> {
        let mel = self.project(magnitude)?;
        Ok(match self.feature_type {
            FeatureType::Mel => mel,
            FeatureType::LogMel => mel.mapv(|x| if x > 0.0 { 10.0 * x.log10() } else { x }),
        })
    }

    /// Approximates a `(n_freq_bins, n_frames)` magnitude spectrogram from
    /// mel magnitudes via the pseudo-inverse.
    ///
    /// # Errors
    /// Fails if the mel row count does not match the filterbank.
    pub fn reconstruct(&self, mel_magnitude: &Array2<f32>) -> DatasetResult<Array2<f32>> {
        if mel_magnitude.nrows() != self.filterbank.nrows() {
            return Err(FeatureError::DimensionMismatch(format!(
                "mel magnitude has {} rows, filterbank has {} filters",
                mel_magnitude.nrows(),
                self.filterbank.nrows()
            ))
            .into());
        }
        Ok(self.inverse.dot(mel_magnitude))
    }
}
