//! Short-time spectral transform.
//!
//! Implements the framed one-sided Fourier transform used for feature
//! extraction and its overlap-add inverse. Frames are taken without any
//! padding or boundary extension: a signal shorter than one frame is an
//! error, and trailing samples that do not fill a frame are dropped.

use ndarray::Array2;
use num_complex::Complex;
use rustfft::FftPlanner;
use std::f64::consts::PI;

use crate::error::{DatasetResult, FeatureError, ParameterError};

/// One-sided complex spectrum cell type.
pub type Complex32 = Complex<f32>;

/// Window functions for spectral analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowType {
    /// Rectangular window (no windowing).
    Rectangular,
    /// Hanning window.
    Hanning,
    /// Hamming window.
    Hamming,
    /// Blackman window.
    Blackman,
}

impl WindowType {
    /// Resolves a window function from its configuration name.
    ///
    /// # Errors
    /// Unsupported names fail here, at construction time, so a bad
    /// configuration never reaches per-frame processing.
    pub fn from_name(name: &str) -> DatasetResult<Self> {
        match name {
            "rectangular" => Ok(Self::Rectangular),
            "hann" | "hanning" => Ok(Self::Hanning),
            "hamming" => Ok(Self::Hamming),
            "blackman" => Ok(Self::Blackman),
            other => Err(ParameterError::invalid_value(
                "window",
                format!("unsupported window function '{other}'"),
            )
            .into()),
        }
    }
}

fn generate_window(size: usize, window_type: WindowType) -> Vec<f64> {
    match window_type {
        WindowType::Rectangular => vec![1.0; size],
        WindowType::Hanning => (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (size - 1) as f64).cos()))
            .collect(),
        WindowType::Hamming => (0..size)
            .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (size - 1) as f64).cos())
            .collect(),
        WindowType::Blackman => (0..size)
            .map(|i| {
                let n = i as f64;
                let n_max = (size - 1) as f64;
                0.42 - 0.5 * (2.0 * PI * n / n_max).cos() + 0.08 * (4.0 * PI * n / n_max).cos()
            })
            .collect(),
    }
}

/// Forward/inverse short-time Fourier transform with a fixed window,
/// frame length and hop length.
#[derive(Debug, Clone)]
pub struct StftTransform {
    window: Vec<f64>,
    frame_len: usize,
    hop_len: usize,
}

impl StftTransform {
    /// Builds a transform for the given window and framing parameters.
    ///
    /// # Errors
    /// Fails if either length is zero or the hop exceeds the frame.
    pub fn new(window_type: WindowType, frame_len: usize, hop_len: usize) -> DatasetResult<Self> {
        if frame_len == 0 || hop_len == 0 {
            return Err(ParameterError::invalid_value(
                "frame_len",
                "frame and hop lengths must be greater than 0",
            )
            .into());
        }
        if hop_len > frame_len {
            return Err(ParameterError::invalid_value(
                "hop_len",
                "hop length cannot be larger than the frame length",
            )
            .into());
        }
        Ok(Self {
            window: generate_window(frame_len, window_type),
            frame_len,
            hop_len,
        })
    }

    /// Frame length in samples.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Hop length in samples.
    pub fn hop_len(&self) -> usize {
        self.hop_len
    }

    /// Number of one-sided frequency bins per frame.
    pub fn n_freq_bins(&self) -> usize {
        self.frame_len / 2 + 1
    }

    /// Number of full frames extracted from a signal of `len` samples.
    pub fn n_frames(&self, len: usize) -> usize {
        if len < self.frame_len {
            0
        } else {
            (len - self.frame_len) / self.hop_len + 1
        }
    }

    /// Computes the one-sided magnitude and unit-phase spectra of `signal`.
    ///
    /// Both outputs have shape `(n_freq_bins, n_frames)`. The phase is the
    /// complex spectrum divided by its magnitude; bins with zero magnitude
    /// divide by zero and yield non-finite phase values, which callers must
    /// tolerate (silent frames are a normal input, not an error).
    ///
    /// # Errors
    /// Fails if the signal is shorter than one frame.
    pub fn forward(&self, signal: &[f32]) -> DatasetResult<(Array2<f32>, Array2<Complex32>)> {
        let num_frames = self.n_frames(signal.len());
        if num_frames == 0 {
            return Err(FeatureError::DimensionMismatch(format!(
                "signal of {} samples is shorter than one frame of {}",
                signal.len(),
                self.frame_len
            ))
            .into());
        }

        let n_bins = self.n_freq_bins();
        let mut magnitude = Array2::<f32>::zeros((n_bins, num_frames));
        let mut phase = Array2::<Complex32>::zeros((n_bins, num_frames));

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(self.frame_len);

        for frame_idx in 0..num_frames {
            let start = frame_idx * self.hop_len;
            let mut buffer: Vec<Complex<f64>> = signal[start..start + self.frame_len]
                .iter()
                .zip(self.window.iter())
                .map(|(&sample, &w)| Complex::new(f64::from(sample) * w, 0.0))
                .collect();

            fft.process(&mut buffer);

            for (freq_idx, &value) in buffer.iter().take(n_bins).enumerate() {
                let mag = value.norm();
                let unit = value / mag;
                magnitude[[freq_idx, frame_idx]] = mag as f32;
                phase[[freq_idx, frame_idx]] = Complex32::new(unit.re as f32, unit.im as f32);
            }
        }

        Ok((magnitude, phase))
    }

    /// Reconstructs a time-domain signal from a one-sided complex spectrum
    /// using windowed overlap-add, normalized by the summed squared window.
    ///
    /// The reconstructed length is `(n_frames - 1) * hop + frame`; samples
    /// the forward pass truncated away are not recovered.
    ///
    /// # Errors
    /// Fails if the spectrum's bin count does not match this transform.
    pub fn inverse(&self, spectrum: &Array2<Complex32>) -> DatasetResult<Vec<f32>> {
        let (n_bins, num_frames) = spectrum.dim();
        if n_bins != self.n_freq_bins() || num_frames == 0 {
            return Err(FeatureError::DimensionMismatch(format!(
                "expected a ({}, >0) one-sided spectrum, got ({}, {})",
                self.n_freq_bins(),
                n_bins,
                num_frames
            ))
            .into());
        }

        let output_len = (num_frames - 1) * self.hop_len + self.frame_len;
        let mut output = vec![0.0f64; output_len];
        let mut window_sq_sum = vec![0.0f64; output_len];

        let mut planner = FftPlanner::<f64>::new();
        let ifft = planner.plan_fft_inverse(self.frame_len);

        for frame_idx in 0..num_frames {
            // Rebuild the full conjugate-symmetric spectrum of the frame.
            let mut buffer = vec![Complex::new(0.0f64, 0.0); self.frame_len];
            for freq_idx in 0..n_bins {
                let c = spectrum[[freq_idx, frame_idx]];
                buffer[freq_idx] = Complex::new(f64::from(c.re), f64::from(c.im));
            }
            for freq_idx in 1..self.frame_len - n_bins + 1 {
                buffer[self.frame_len - freq_idx] = buffer[freq_idx].conj();
            }

            ifft.process(&mut buffer);

            let start = frame_idx * self.hop_len;
            let scale = self.frame_len as f64;
            for (i, value) in buffer.iter().enumerate() {
                output[start + i] += value.re / scale * self.window[i];
                window_sq_sum[start + i] += self.window[i] * self.window[i];
            }
        }

        Ok(output
            .iter()
            .zip(window_sq_sum.iter())
            .map(|(&out, &w2)| if w2 > 0.0 { (out / w2) as f32 } else { 0.0 })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx_eq::assert_approx_eq;

    fn sine(freq: f64, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f64 / f64::from(rate)).sin() as f32)
            .collect()
    }

    #[test]
    fn hamming_window_shape() {
        let window = generate_window(1024, WindowType::Hamming);
        assert_eq!(window.len(), 1024);
        assert_approx_eq!(window[0], 0.08, 1e-9);
        assert!((window[512] - 1.0).abs() < 0.01);
    }

    #[test]
    fn window_names_resolve() {
        assert_eq!(WindowType::from_name("hamming").unwrap(), WindowType::Hamming);
        assert_eq!(WindowType::from_name("hann").unwrap(), WindowType::Hanning);
        assert!(WindowType::from_name("kaiser").is_err());
    }

    #[test]
    fn forward_shapes_match_framing() {
        let stft = StftTransform::new(WindowType::Hamming, 1024, 512).unwrap();
        let signal = sine(440.0, 16_000, 16_000);
        let (magnitude, phase) = stft.forward(&signal).unwrap();

        let expected_frames = (16_000 - 1024) / 512 + 1;
        assert_eq!(magnitude.dim(), (513, expected_frames));
        assert_eq!(phase.dim(), magnitude.dim());
        assert!(magnitude.iter().all(|&m| m >= 0.0));
    }

    #[test]
    fn silent_signal_has_zero_magnitude_and_nonfinite_phase() {
        let stft = StftTransform::new(WindowType::Hamming, 64, 32).unwrap();
        let (magnitude, phase) = stft.forward(&vec![0.0f32; 256]).unwrap();

        assert!(magnitude.iter().all(|&m| m == 0.0));
        // 0 / 0 is allowed to propagate; callers must tolerate it.
        assert!(phase.iter().all(|p| p.re.is_nan() || p.im.is_nan()));
    }

    #[test]
    fn round_trip_reconstructs_the_signal() {
        let stft = StftTransform::new(WindowType::Hanning, 1024, 512).unwrap();
        let signal = sine(440.0, 16_000, 8_000);
        let (magnitude, phase) = stft.forward(&signal).unwrap();

        let spectrum = ndarray::Zip::from(&magnitude)
            .and(&phase)
            .map_collect(|&m, &p| if m > 0.0 { p * m } else { Complex32::new(0.0, 0.0) });
        let reconstructed = stft.inverse(&spectrum).unwrap();

        // Everything but the samples truncated by framing comes back.
        assert_eq!(reconstructed.len(), 13 * 512 + 1024);
        for (i, (&a, &b)) in signal.iter().zip(reconstructed.iter()).enumerate() {
            assert!(
                (a - b).abs() < 1e-4,
                "sample {i} diverged: expected {a}, got {b}"
            );
        }
    }

    #[test]
    fn hop_larger_than_frame_is_rejected() {
        assert!(StftTransform::new(WindowType::Hamming, 256, 512).is_err());
        assert!(StftTransform::new(WindowType::Hamming, 0, 0).is_err());
    }

    #[test]
    fn short_signal_is_rejected() {
        let stft = StftTransform::new(WindowType::Hamming, 1024, 512).unwrap();
        assert!(stft.forward(&vec![0.0f32; 100]).is_err());
    }

    #[test]
    fn inverse_rejects_mismatched_bins() {
        let stft = StftTransform::new(WindowType::Hamming, 1024, 512).unwrap();
        let spectrum = Array2::<Complex32>::zeros((100, 4));
        assert!(stft.inverse(&spectrum).is_err());
    }
}
