//! Shared dataset storage and the training-loop facing contract.
//!
//! Both dataset builders assemble a [`DatasetStorage`]: features and labels
//! as tensors ready for a training loop, plus the per-example raw magnitude
//! and phase spectra kept around for reconstruction and inspection. The
//! [`AudioDataset`] trait is the whole surface a training loop consumes.

use std::path::Path;

use candle_core::{Device, IndexOp, Tensor};
use ndarray::Array2;
use tracing::warn;

use crate::archive::{Archive, Entry};
use crate::error::{ArchiveError, DatasetResult, FeatureError};
use crate::stft::Complex32;

/// Contract between a built dataset and the training loop that consumes it.
///
/// Normalization statistics are computed once, on one designated split
/// (typically training), and reapplied verbatim to every other split;
/// recomputing them per split leaks evaluation data into the scaling.
pub trait AudioDataset {
    /// Number of examples.
    fn len(&self) -> usize;

    /// Whether the dataset holds no examples.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the `(feature, label)` tensors of one example.
    ///
    /// # Errors
    /// Fails if `index` is out of range.
    fn get(&self, index: usize) -> DatasetResult<(Tensor, Tensor)>;

    /// Shape of a single feature tensor, without the example dimension.
    fn features_shape(&self) -> Vec<usize>;

    /// Width of the label vectors (equals the class count).
    fn n_classes(&self) -> usize;

    /// Moves features and labels to `device` in place. Raw spectra and
    /// filenames stay on the host.
    ///
    /// # Errors
    /// Fails if the tensor transfer fails.
    fn to_device(&mut self, device: &Device) -> DatasetResult<()>;

    /// Computes per-channel `(shift, scale)` statistics over the whole
    /// feature set, according to the configured scaling type.
    ///
    /// # Errors
    /// Fails if the feature tensor cannot be read back.
    fn compute_shift_and_scaling(&self) -> DatasetResult<(Vec<f32>, Vec<f32>)>;

    /// Applies `feature = (feature - shift[c]) / scale[c]` per channel,
    /// in place.
    ///
    /// # Errors
    /// Fails if the statistics length does not match the channel count.
    fn shift_and_scale(&mut self, shift: &[f32], scale: &[f32]) -> DatasetResult<()>;
}

/// Result of instantiating datasets for one or all splits.
#[derive(Debug)]
pub enum SplitSet<D> {
    /// A single requested split.
    One(Box<D>),
    /// All three splits.
    Three {
        /// Training split.
        train: Box<D>,
        /// Development split.
        dev: Box<D>,
        /// Validation/test split.
        test: Box<D>,
    },
}

impl<D> SplitSet<D> {
    /// Unwraps a single-split result.
    pub fn into_one(self) -> Option<D> {
        match self {
            Self::One(dataset) => Some(*dataset),
            Self::Three { .. } => None,
        }
    }

    /// Unwraps an all-splits result as `(train, dev, test)`.
    pub fn into_three(self) -> Option<(D, D, D)> {
        match self {
            Self::One(_) => None,
            Self::Three { train, dev, test } => Some((*train, *dev, *test)),
        }
    }
}

/// Outcome of probing a cache archive: either a fully deserialized storage
/// or the reason the cache is unusable. The caller decides whether to
/// rebuild; nothing about a miss is fatal.
#[derive(Debug)]
pub enum CacheOutcome {
    /// The archive was readable and structurally sound.
    Hit(Box<DatasetStorage>),
    /// The archive is absent, unreadable or corrupt.
    Miss(String),
}

/// In-memory representation of a built dataset.
///
/// The four per-example collections (`magnitudes`, `phases`, the example
/// dimension of `features`, the rows of `labels`) and `filenames` are
/// parallel: index `i` everywhere refers to the same source file.
#[derive(Debug, Clone)]
pub struct DatasetStorage {
    /// Per-example raw magnitude spectra `(n_freq_bins, n_frames)`.
    pub magnitudes: Vec<Array2<f32>>,
    /// Per-example raw unit-phase spectra, same shapes as `magnitudes`.
    pub phases: Vec<Array2<Complex32>>,
    /// Feature tensor `(n_examples, n_channels, n_mel, n_frames)`.
    pub features: Tensor,
    /// Label tensor `(n_examples, n_classes)`.
    pub labels: Tensor,
    /// Ordered class names; one label column per class.
    pub classes: Vec<String>,
    /// Source filename per example.
    pub filenames: Vec<String>,
}

impl DatasetStorage {
    /// Number of examples (the leading feature dimension).
    pub fn n_examples(&self) -> usize {
        self.features.dims().first().copied().unwrap_or(0)
    }

    /// Per-example feature shape.
    pub fn features_shape(&self) -> Vec<usize> {
        self.features.dims().iter().skip(1).copied().collect()
    }

    /// Label vector width.
    pub fn n_classes(&self) -> usize {
        self.labels.dims().get(1).copied().unwrap_or(0)
    }

    /// Number of feature channels (dimension 1 of the feature tensor).
    pub fn n_channels(&self) -> usize {
        self.features.dims().get(1).copied().unwrap_or(0)
    }

    /// `(feature, label)` of one example.
    ///
    /// # Errors
    /// Fails if `index` is out of range.
    pub fn get(&self, index: usize) -> DatasetResult<(Tensor, Tensor)> {
        Ok((self.features.i(index)?, self.labels.i(index)?))
    }

    /// Moves features and labels to `device`.
    ///
    /// # Errors
    /// Fails if the tensor transfer fails.
    pub fn to_device(&mut self, device: &Device) -> DatasetResult<()> {
        self.features = self.features.to_device(device)?;
        self.labels = self.labels.to_device(device)?;
        Ok(())
    }

    /// Checks the parallel-collection invariant.
    ///
    /// # Errors
    /// Reports the first mismatched length.
    pub fn validate(&self) -> DatasetResult<()> {
        let n = self.n_examples();
        if self.magnitudes.len() != n
            || self.phases.len() != n
            || self.filenames.len() != n
            || self.labels.dims().first().copied().unwrap_or(0) != n
        {
            return Err(FeatureError::DimensionMismatch(format!(
                "parallel collections diverge: {} features, {} magnitudes, {} phases, \
                 {} label rows, {} filenames",
                n,
                self.magnitudes.len(),
                self.phases.len(),
                self.labels.dims().first().copied().unwrap_or(0),
                self.filenames.len()
            ))
            .into());
        }
        if self.n_classes() != self.classes.len() {
            return Err(FeatureError::DimensionMismatch(format!(
                "label width {} does not match {} classes",
                self.n_classes(),
                self.classes.len()
            ))
            .into());
        }
        Ok(())
    }

    /// Computes per-channel `(shift, scale)` statistics.
    ///
    /// `"standardization"` yields (mean, standard deviation), `"min-max"`
    /// yields (min, max - min), and an empty scaling type warns and yields
    /// the identity (0, 1). Any other value leaves the channel's statistics
    /// as NaN, which then propagates through [`Self::shift_and_scale`] —
    /// a historical fall-through that is kept, not fixed.
    ///
    /// # Errors
    /// Fails if the feature tensor cannot be read back to the host.
    pub fn compute_shift_and_scaling(
        &self,
        scaling_type: &str,
    ) -> DatasetResult<(Vec<f32>, Vec<f32>)> {
        let n_channels = self.n_channels();
        let mut shift = vec![f32::NAN; n_channels];
        let mut scale = vec![f32::NAN; n_channels];

        for channel in 0..n_channels {
            let values = self
                .features
                .narrow(1, channel, 1)?
                .contiguous()?
                .flatten_all()?
                .to_vec1::<f32>()?;
            let n = values.len() as f32;

            match scaling_type {
                "standardization" => {
                    let mean = values.iter().sum::<f32>() / n;
                    let variance =
                        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
                    shift[channel] = mean;
                    scale[channel] = variance.sqrt();
                }
                "min-max" => {
                    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
                    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    shift[channel] = min;
                    scale[channel] = max - min;
                }
                "" => {
                    warn!("no normalization procedure is specified");
                    shift[channel] = 0.0;
                    scale[channel] = 1.0;
                }
                _ => {}
            }
        }

        Ok((shift, scale))
    }

    /// Applies `(x - shift[c]) / scale[c]` to every channel in place.
    ///
    /// # Errors
    /// Fails if the statistics length does not match the channel count.
    pub fn shift_and_scale(&mut self, shift: &[f32], scale: &[f32]) -> DatasetResult<()> {
        let n_channels = self.n_channels();
        if shift.len() != n_channels || scale.len() != n_channels {
            return Err(FeatureError::DimensionMismatch(format!(
                "expected {} per-channel statistics, got shift={} scale={}",
                n_channels,
                shift.len(),
                scale.len()
            ))
            .into());
        }

        let mut scaled = Vec::with_capacity(n_channels);
        for channel in 0..n_channels {
            let mul = 1.0 / f64::from(scale[channel]);
            let add = -f64::from(shift[channel]) / f64::from(scale[channel]);
            scaled.push(self.features.narrow(1, channel, 1)?.affine(mul, add)?);
        }
        self.features = Tensor::cat(&scaled, 1)?;
        Ok(())
    }

    /// Serializes the storage into an [`Archive`] with the canonical entry
    /// names `magnitudes`, `phases`, `features`, `labels`, `classes`,
    /// `filenames`.
    ///
    /// # Errors
    /// Fails if the tensors cannot be read back to the host.
    pub fn to_archive(&self) -> DatasetResult<Archive> {
        let mut archive = Archive::new();
        archive.insert("magnitudes", Entry::F32Matrices(self.magnitudes.clone()));
        archive.insert("phases", Entry::ComplexMatrices(self.phases.clone()));
        archive.insert(
            "features",
            Entry::F32Array {
                dims: self.features.dims().to_vec(),
                data: self.features.flatten_all()?.to_vec1::<f32>()?,
            },
        );
        archive.insert(
            "labels",
            Entry::F32Array {
                dims: self.labels.dims().to_vec(),
                data: self.labels.flatten_all()?.to_vec1::<f32>()?,
            },
        );
        archive.insert("classes", Entry::StrList(self.classes.clone()));
        archive.insert("filenames", Entry::StrList(self.filenames.clone()));
        Ok(archive)
    }

    /// Rebuilds a storage from an [`Archive`] written by
    /// [`Self::to_archive`].
    ///
    /// # Errors
    /// Missing entries, wrong entry kinds and malformed shapes are all
    /// reported as [`ArchiveError`], so callers can treat every failure as
    /// a cache miss.
    pub fn from_archive(mut archive: Archive) -> Result<Self, ArchiveError> {
        let magnitudes = match archive.take("magnitudes")? {
            Entry::F32Matrices(matrices) => matrices,
            _ => return Err(wrong_kind("magnitudes")),
        };
        let phases = match archive.take("phases")? {
            Entry::ComplexMatrices(matrices) => matrices,
            _ => return Err(wrong_kind("phases")),
        };
        let features = match archive.take("features")? {
            Entry::F32Array { dims, data } => tensor_from(data, dims)?,
            _ => return Err(wrong_kind("features")),
        };
        let labels = match archive.take("labels")? {
            Entry::F32Array { dims, data } => tensor_from(data, dims)?,
            _ => return Err(wrong_kind("labels")),
        };
        let classes = match archive.take("classes")? {
            Entry::StrList(strings) => strings,
            _ => return Err(wrong_kind("classes")),
        };
        let filenames = match archive.take("filenames")? {
            Entry::StrList(strings) => strings,
            _ => return Err(wrong_kind("filenames")),
        };

        Ok(Self {
            magnitudes,
            phases,
            features,
            labels,
            classes,
            filenames,
        })
    }

    /// Probes a cache archive file.
    pub fn from_cache_file(path: &Path) -> CacheOutcome {
        match Archive::read(path).and_then(Self::from_archive) {
            Ok(storage) => CacheOutcome::Hit(Box::new(storage)),
            Err(e) => CacheOutcome::Miss(format!("{}: {e}", path.display())),
        }
    }
}

fn wrong_kind(name: &str) -> ArchiveError {
    ArchiveError::Corrupt(format!("entry '{name}' has an unexpected kind"))
}

fn tensor_from(data: Vec<f32>, dims: Vec<usize>) -> Result<Tensor, ArchiveError> {
    Tensor::from_vec(data, dims, &Device::Cpu).map_err(|e| ArchiveError::Corrupt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::fs;
    use std::path::PathBuf;

    /// Two examples, two channels, 1x2 feature maps with easy statistics.
    fn storage() -> DatasetStorage {
        let features = Tensor::from_vec(
            vec![
                0.0f32, 2.0, // example 0, channel 0
                10.0, 10.0, // example 0, channel 1
                4.0, 6.0, // example 1, channel 0
                10.0, 10.0, // example 1, channel 1
            ],
            (2, 2, 1, 2),
            &Device::Cpu,
        )
        .unwrap();
        let labels = Tensor::from_vec(vec![1.0f32, 0.0], (2, 1), &Device::Cpu).unwrap();
        DatasetStorage {
            magnitudes: vec![array![[1.0f32]], array![[2.0f32]]],
            phases: vec![
                array![[Complex32::new(1.0, 0.0)]],
                array![[Complex32::new(0.0, 1.0)]],
            ],
            features,
            labels,
            classes: vec!["gunshot".to_string()],
            filenames: vec!["a.wav".to_string(), "b.wav".to_string()],
        }
    }

    #[test]
    fn parallel_lengths_and_shapes() {
        let storage = storage();
        storage.validate().unwrap();
        assert_eq!(storage.n_examples(), 2);
        assert_eq!(storage.features_shape(), vec![2, 1, 2]);
        assert_eq!(storage.n_classes(), 1);

        let (feature, label) = storage.get(1).unwrap();
        assert_eq!(feature.dims(), &[2, 1, 2]);
        assert_eq!(label.dims(), &[1]);
        assert_eq!(label.to_vec1::<f32>().unwrap(), vec![0.0]);
    }

    #[test]
    fn standardization_statistics_per_channel() {
        let storage = storage();
        let (shift, scale) = storage.compute_shift_and_scaling("standardization").unwrap();
        // Channel 0 holds [0, 2, 4, 6]: mean 3, population std sqrt(5).
        assert!((shift[0] - 3.0).abs() < 1e-6);
        assert!((scale[0] - 5.0f32.sqrt()).abs() < 1e-6);
        // Channel 1 is constant 10: mean 10, std 0.
        assert!((shift[1] - 10.0).abs() < 1e-6);
        assert!(scale[1].abs() < 1e-6);
    }

    #[test]
    fn standardization_is_idempotent_under_reapplication() {
        let mut storage = storage();
        let (shift, scale) = storage.compute_shift_and_scaling("standardization").unwrap();
        storage.shift_and_scale(&[shift[0], 0.0], &[scale[0], 1.0]).unwrap();

        let channel = storage
            .features
            .narrow(1, 0, 1)
            .unwrap()
            .contiguous()
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        let n = channel.len() as f32;
        let mean = channel.iter().sum::<f32>() / n;
        let std =
            (channel.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n).sqrt();
        assert!(mean.abs() < 1e-6);
        assert!((std - 1.0).abs() < 1e-5);
    }

    #[test]
    fn min_max_statistics() {
        let storage = storage();
        let (shift, scale) = storage.compute_shift_and_scaling("min-max").unwrap();
        assert!((shift[0] - 0.0).abs() < 1e-6);
        assert!((scale[0] - 6.0).abs() < 1e-6);
    }

    #[test]
    fn empty_scaling_type_disables_normalization() {
        let storage = storage();
        let (shift, scale) = storage.compute_shift_and_scaling("").unwrap();
        assert_eq!(shift, vec![0.0, 0.0]);
        assert_eq!(scale, vec![1.0, 1.0]);
    }

    #[test]
    fn unrecognized_scaling_type_leaves_nan_statistics() {
        let mut storage = storage();
        let (shift, scale) = storage.compute_shift_and_scaling("median").unwrap();
        assert!(shift.iter().all(|s| s.is_nan()));
        assert!(scale.iter().all(|s| s.is_nan()));

        // NaN statistics poison the features; this propagates by design.
        storage.shift_and_scale(&shift, &scale).unwrap();
        let values = storage
            .features
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!(values.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn shift_and_scale_rejects_mismatched_statistics() {
        let mut storage = storage();
        assert!(storage.shift_and_scale(&[0.0], &[1.0]).is_err());
    }

    #[test]
    fn archive_round_trip_is_faithful() {
        let path = PathBuf::from("/tmp/audio_datasets_storage_roundtrip.h5");
        let storage = storage();
        storage.to_archive().unwrap().write(&path).unwrap();

        let outcome = DatasetStorage::from_cache_file(&path);
        let loaded = match outcome {
            CacheOutcome::Hit(storage) => *storage,
            CacheOutcome::Miss(reason) => panic!("unexpected miss: {reason}"),
        };

        assert_eq!(loaded.classes, storage.classes);
        assert_eq!(loaded.filenames, storage.filenames);
        assert_eq!(loaded.magnitudes, storage.magnitudes);
        assert_eq!(loaded.phases, storage.phases);
        assert_eq!(
            loaded.features.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            storage.features.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );
        assert_eq!(
            loaded.labels.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            storage.labels.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );

        let _ = fs::remove_file(path);
    }

    #[test]
    fn absent_cache_is_a_miss_not_an_error() {
        let outcome =
            DatasetStorage::from_cache_file(Path::new("/tmp/audio_datasets_storage_absent.h5"));
        assert!(matches!(outcome, CacheOutcome::Miss(_)));
    }

    #[test]
    fn validate_catches_diverging_collections() {
        let mut storage = storage();
        storage.filenames.pop();
        assert!(storage.validate().is_err());
    }
}
