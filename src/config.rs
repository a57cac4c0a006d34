//! Configuration structures for the dataset builders.
//!
//! Each dataset variant owns an immutable config struct validated at
//! construction time. Defaults mirror the parameters the remixed corpus was
//! produced with: 16 kHz audio, 64/32 ms Hamming frames, 64 mel filters
//! spanning 0-8000 Hz, log-mel features, standardization scaling.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, DatasetResult, ParameterError};

/// Kind of spectral feature derived from the magnitude spectrogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureType {
    /// Mel-projected magnitude.
    #[serde(rename = "mel")]
    Mel,
    /// `10 * log10` of the mel magnitude, non-positive cells passed through.
    #[serde(rename = "log-mel")]
    LogMel,
}

/// Identifier for the available dataset builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    /// Remixed corpus built from raw audio plus a weak-label table.
    Remixed,
    /// Pre-packed feature archive with companion mixture audio.
    Packed,
}

impl FromStr for DatasetKind {
    type Err = DatasetError;

    fn from_str(s: &str) -> DatasetResult<Self> {
        match s {
            "remixed" => Ok(Self::Remixed),
            "packed" => Ok(Self::Packed),
            other => Err(DatasetError::UnknownKind(other.to_string())),
        }
    }
}

/// Audio processing parameters shared by every dataset variant.
///
/// `scaling_type` is deliberately a free string rather than an enum: the
/// normalization statistics of [`crate::dataset::DatasetStorage`] reproduce
/// the historical behaviour where an unrecognized name silently yields NaN
/// statistics instead of an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Target sampling rate in Hz; input audio is resampled to this rate.
    pub sampling_rate: u32,

    /// Feature derived from the magnitude spectrogram.
    pub feature_type: FeatureType,

    /// STFT frame width in milliseconds.
    pub frame_width_ms: f64,

    /// STFT frame shift (hop) in milliseconds.
    pub frame_shift_ms: f64,

    /// Window function name ("rectangular", "hanning", "hamming",
    /// "blackman"). Unsupported names fail when the transform is built.
    pub window: String,

    /// Number of mel filters.
    pub n_mel_filters: usize,

    /// Lower edge of the mel filterbank in Hz.
    pub mel_min_freq_hz: f64,

    /// Upper edge of the mel filterbank in Hz.
    pub mel_max_freq_hz: f64,

    /// Feature normalization: "standardization", "min-max", or empty to
    /// disable normalization.
    pub scaling_type: String,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 16_000,
            feature_type: FeatureType::LogMel,
            frame_width_ms: 64.0,
            frame_shift_ms: 32.0,
            window: "hamming".to_string(),
            n_mel_filters: 64,
            mel_min_freq_hz: 0.0,
            mel_max_freq_hz: 8_000.0,
            scaling_type: "standardization".to_string(),
        }
    }
}

impl FeatureConfig {
    /// STFT frame length in samples at the configured rate.
    pub fn frame_len(&self) -> usize {
        (self.frame_width_ms * f64::from(self.sampling_rate) / 1000.0).round() as usize
    }

    /// STFT hop length in samples at the configured rate.
    pub fn hop_len(&self) -> usize {
        (self.frame_shift_ms * f64::from(self.sampling_rate) / 1000.0).round() as usize
    }

    /// Checks the joint invariants of the audio parameters.
    ///
    /// # Errors
    /// Returns a [`ParameterError`] naming the first offending field.
    pub fn validate(&self) -> DatasetResult<()> {
        if self.sampling_rate == 0 {
            return Err(ParameterError::invalid_value("sampling_rate", "must be > 0").into());
        }
        if !self.frame_width_ms.is_finite() || self.frame_width_ms < 0.0 {
            return Err(ParameterError::invalid_value(
                "frame_width_ms",
                "must be finite and non-negative",
            )
            .into());
        }
        if !self.frame_shift_ms.is_finite() || self.frame_shift_ms < 0.0 {
            return Err(ParameterError::invalid_value(
                "frame_shift_ms",
                "must be finite and non-negative",
            )
            .into());
        }
        if self.frame_shift_ms > self.frame_width_ms {
            return Err(ParameterError::invalid_value(
                "frame_shift_ms",
                "must not exceed frame_width_ms",
            )
            .into());
        }
        if self.frame_len() == 0 {
            return Err(ParameterError::invalid_value(
                "frame_width_ms",
                "yields an empty frame at the configured sampling rate",
            )
            .into());
        }
        if self.hop_len() == 0 {
            return Err(ParameterError::invalid_value(
                "frame_shift_ms",
                "yields an empty hop at the configured sampling rate",
            )
            .into());
        }
        if self.n_mel_filters == 0 {
            return Err(ParameterError::invalid_value("n_mel_filters", "must be > 0").into());
        }
        if self.mel_min_freq_hz < 0.0 || self.mel_min_freq_hz >= self.mel_max_freq_hz {
            return Err(ParameterError::invalid_value(
                "mel_min_freq_hz",
                "must satisfy 0 <= min < max",
            )
            .into());
        }
        Ok(())
    }
}

/// Configuration of the remixed-corpus builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemixedConfig {
    /// Shared audio processing parameters.
    pub features: FeatureConfig,

    /// Folder holding the split subfolders, each with its audio files and
    /// a `weak_labels.csv` table.
    pub data_folder: PathBuf,

    /// Folder to persist a freshly built dataset archive into, if any.
    pub save_folder: Option<PathBuf>,

    /// Folder to look up a cached dataset archive in, if any.
    pub load_folder: Option<PathBuf>,

    /// Worker count for parallel audio loading; 0 uses one worker per core.
    pub max_workers: usize,
}

impl Default for RemixedConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            data_folder: PathBuf::from("data/remixed"),
            save_folder: None,
            load_folder: None,
            max_workers: 3,
        }
    }
}

impl RemixedConfig {
    /// Validates the embedded feature parameters.
    pub fn validate(&self) -> DatasetResult<()> {
        self.features.validate()
    }

    /// Returns a copy pointed at `subfolder` of the data folder.
    pub(crate) fn for_subfolder(&self, subfolder: &str) -> Self {
        let mut config = self.clone();
        config.data_folder = self.data_folder.join(subfolder);
        config
    }
}

/// Configuration of the pre-packed-archive builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackedConfig {
    /// Shared audio processing parameters.
    pub features: FeatureConfig,

    /// Folder holding the pre-extracted feature archives
    /// (`training.h5`, `testing.h5`).
    pub features_folder: PathBuf,

    /// Folder holding the mixture audio, one subfolder per split.
    pub audio_folder: PathBuf,

    /// Worker count for parallel audio loading; 0 uses one worker per core.
    pub max_workers: usize,
}

impl Default for PackedConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            features_folder: PathBuf::from("data/packed_features"),
            audio_folder: PathBuf::from("data/mixed_audio"),
            max_workers: 3,
        }
    }
}

impl PackedConfig {
    /// Validates the embedded feature parameters.
    pub fn validate(&self) -> DatasetResult<()> {
        self.features.validate()
    }
}
