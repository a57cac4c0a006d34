//! Pre-packed-archive dataset builder.
//!
//! Features and labels come straight from an externally produced archive
//! (`na_list` / `x` / `y` entries); this builder never recomputes them.
//! The raw 0 dB mixture audio is still decoded so magnitude and phase
//! spectra are available for source reconstruction and inspection, but
//! those spectra do not feed the feature path.

use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use tracing::{info, warn};

use crate::archive::{Archive, Entry};
use crate::config::PackedConfig;
use crate::dataset::{AudioDataset, DatasetStorage, SplitSet};
use crate::error::{DatasetError, DatasetResult, FeatureError};
use crate::loader::load_many;
use crate::mel::MelFeatureExtractor;
use crate::stft::{StftTransform, WindowType};

/// Filename suffix marking the 0 dB mixture variant of a clip.
const MIXTURE_SUFFIX: &str = ".mix_0db.wav";

/// The fixed class set of the packed corpus.
const PACKED_CLASSES: [&str; 4] = ["babycry", "glassbreak", "gunshot", "background"];

/// Dataset over a pre-packed feature archive with companion mixture audio.
#[derive(Debug)]
pub struct PackedDataset {
    config: PackedConfig,
    stft: StftTransform,
    mel: MelFeatureExtractor,
    storage: DatasetStorage,
}

impl PackedDataset {
    /// Instantiates datasets for the requested split.
    ///
    /// `train` maps to `training.h5` and the `training/` audio subfolder.
    /// This corpus ships no distinct development split: `dev` and `test`
    /// both map to `testing.h5` and `testing/`, and `"all"` yields
    /// `(train, test, test)`.
    ///
    /// # Errors
    /// Unknown identifiers fail with [`DatasetError::InvalidSplit`];
    /// construction failures propagate.
    pub fn split(config: &PackedConfig, which: &str) -> DatasetResult<SplitSet<Self>> {
        match which {
            "all" => Ok(SplitSet::Three {
                train: Box::new(Self::for_subset(config, "training")?),
                dev: Box::new(Self::for_subset(config, "testing")?),
                test: Box::new(Self::for_subset(config, "testing")?),
            }),
            "train" => Ok(SplitSet::One(Box::new(Self::for_subset(
                config, "training",
            )?))),
            "dev" | "test" => {
                warn!("development and validation sets are the same for this data set");
                Ok(SplitSet::One(Box::new(Self::for_subset(config, "testing")?)))
            }
            other => Err(DatasetError::InvalidSplit(other.to_string())),
        }
    }

    fn for_subset(config: &PackedConfig, subset: &str) -> DatasetResult<Self> {
        Self::from_archive(
            config,
            &config.features_folder.join(format!("{subset}.h5")),
            &config.audio_folder.join(subset),
        )
    }

    /// Builds a dataset from one feature archive and its audio subfolder.
    ///
    /// # Errors
    /// An unreadable feature archive is fatal here — unlike the remixed
    /// builder there is no way to rebuild pre-extracted features from
    /// source. Unreadable mixture audio is fatal as well.
    pub fn from_archive(
        config: &PackedConfig,
        features_file: &Path,
        audio_folder: &Path,
    ) -> DatasetResult<Self> {
        config.validate()?;

        let window = WindowType::from_name(&config.features.window)?;
        let stft = StftTransform::new(
            window,
            config.features.frame_len(),
            config.features.hop_len(),
        )?;
        let mel = MelFeatureExtractor::from_config(&config.features)?;

        let mut archive = Archive::read(features_file).map_err(DatasetError::Archive)?;

        let filenames = match archive.take("na_list").map_err(DatasetError::Archive)? {
            Entry::StrList(names) => names,
            _ => {
                return Err(FeatureError::DimensionMismatch(
                    "entry 'na_list' is not a string list".to_string(),
                )
                .into());
            }
        };
        let features = match archive.take("x").map_err(DatasetError::Archive)? {
            Entry::F32Array { dims, data } if dims.len() == 3 => {
                // Archive layout is (examples, frames, mel bins); training
                // consumes (examples, 1 channel, mel bins, frames).
                Tensor::from_vec(data, (dims[0], dims[1], dims[2]), &Device::Cpu)?
                    .unsqueeze(1)?
                    .permute((0, 1, 3, 2))?
                    .contiguous()?
            }
            Entry::F32Array { dims, .. } => {
                return Err(FeatureError::DimensionMismatch(format!(
                    "entry 'x' must be 3-dimensional, got {dims:?}"
                ))
                .into());
            }
            _ => {
                return Err(FeatureError::DimensionMismatch(
                    "entry 'x' is not a float array".to_string(),
                )
                .into());
            }
        };
        let labels = match archive.take("y").map_err(DatasetError::Archive)? {
            Entry::F32Array { dims, data } if dims.len() == 2 => {
                Tensor::from_vec(data, (dims[0], dims[1]), &Device::Cpu)?
            }
            _ => {
                return Err(FeatureError::DimensionMismatch(
                    "entry 'y' must be a 2-dimensional float array".to_string(),
                )
                .into());
            }
        };

        info!(
            examples = filenames.len(),
            archive = %features_file.display(),
            "loaded pre-packed features"
        );

        // Decode only the 0 dB mixtures; their spectra are kept for
        // reconstruction and inspection, never for features.
        let mixture_paths: Vec<PathBuf> = filenames
            .iter()
            .filter(|name| name.ends_with(MIXTURE_SUFFIX))
            .map(|name| audio_folder.join(name))
            .collect();
        let audios = load_many(
            &mixture_paths,
            config.features.sampling_rate,
            config.max_workers,
        )?;

        let mut magnitudes = Vec::with_capacity(audios.len());
        let mut phases = Vec::with_capacity(audios.len());
        for audio in &audios {
            let (magnitude, phase) = stft.forward(audio)?;
            magnitudes.push(magnitude);
            phases.push(phase);
        }

        let storage = DatasetStorage {
            magnitudes,
            phases,
            features,
            labels,
            classes: PACKED_CLASSES.iter().map(|s| s.to_string()).collect(),
            filenames,
        };

        Ok(Self {
            config: config.clone(),
            stft,
            mel,
            storage,
        })
    }

    /// The configuration this dataset was built with.
    pub fn config(&self) -> &PackedConfig {
        &self.config
    }

    /// The spectral transform owned by this dataset.
    pub fn stft(&self) -> &StftTransform {
        &self.stft
    }

    /// The mel extractor owned by this dataset, kept so mixture magnitudes
    /// can be approximated back from archived mel features.
    pub fn mel(&self) -> &MelFeatureExtractor {
        &self.mel
    }

    /// The assembled storage: tensors, raw spectra, classes, filenames.
    pub fn storage(&self) -> &DatasetStorage {
        &self.storage
    }
}

impl AudioDataset for PackedDataset {
    fn len(&self) -> usize {
        self.storage.n_examples()
    }

    fn get(&self, index: usize) -> DatasetResult<(Tensor, Tensor)> {
        self.storage.get(index)
    }

    fn features_shape(&self) -> Vec<usize> {
        self.storage.features_shape()
    }

    fn n_classes(&self) -> usize {
        self.storage.n_classes()
    }

    fn to_device(&mut self, device: &Device) -> DatasetResult<()> {
        self.storage.to_device(device)
    }

    fn compute_shift_and_scaling(&self) -> DatasetResult<(Vec<f32>, Vec<f32>)> {
        self.storage
            .compute_shift_and_scaling(&self.config.features.scaling_type)
    }

    fn shift_and_scale(&mut self, shift: &[f32], scale: &[f32]) -> DatasetResult<()> {
        self.storage.shift_and_scale(shift, scale)
    }
}
