//! Remixed-corpus dataset builder.
//!
//! Builds an in-memory dataset from a folder of remixed audio clips and a
//! `weak_labels.csv` table, or from a previously cached archive when one is
//! readable. All audio processing happens at construction time so training
//! iterates over ready tensors.

use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use tracing::{debug, info, warn};

use crate::config::RemixedConfig;
use crate::dataset::{AudioDataset, CacheOutcome, DatasetStorage, SplitSet};
use crate::error::{DatasetError, DatasetResult, FeatureError, LabelTableError, ParameterError};
use crate::loader::load_many;
use crate::mel::MelFeatureExtractor;
use crate::stft::{StftTransform, WindowType};

/// Name of the label table expected inside each split's data folder.
const LABEL_TABLE_NAME: &str = "weak_labels.csv";

/// Parsed `weak_labels.csv`: ordered filenames, class names and one label
/// row per file.
struct LabelTable {
    classes: Vec<String>,
    filenames: Vec<String>,
    rows: Vec<Vec<f32>>,
}

fn read_label_table(path: &Path) -> DatasetResult<LabelTable> {
    let content = std::fs::read_to_string(path).map_err(|e| LabelTableError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut lines = content.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| LabelTableError::Header("table is empty".to_string()))?;
    let mut columns = header.split(',').map(str::trim);
    match columns.next() {
        Some("filename") => {}
        other => {
            return Err(LabelTableError::Header(format!(
                "first column must be 'filename', got {other:?}"
            ))
            .into());
        }
    }
    let classes: Vec<String> = columns.map(str::to_string).collect();
    if classes.is_empty() {
        return Err(LabelTableError::Header("no class columns".to_string()).into());
    }

    let mut filenames = Vec::new();
    let mut rows = Vec::new();
    for (line_idx, line) in lines {
        let mut cells = line.split(',').map(str::trim);
        let filename = cells
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| LabelTableError::Row {
                line: line_idx + 1,
                reason: "missing filename".to_string(),
            })?;

        let values = cells
            .map(|cell| {
                cell.parse::<f32>().map_err(|e| LabelTableError::Row {
                    line: line_idx + 1,
                    reason: format!("'{cell}': {e}"),
                })
            })
            .collect::<Result<Vec<f32>, _>>()?;
        if values.len() != classes.len() {
            return Err(LabelTableError::Row {
                line: line_idx + 1,
                reason: format!(
                    "expected {} label values, got {}",
                    classes.len(),
                    values.len()
                ),
            }
            .into());
        }

        filenames.push(filename.to_string());
        rows.push(values);
    }

    Ok(LabelTable {
        classes,
        filenames,
        rows,
    })
}

/// Dataset over a remixed corpus: raw clips plus a weak-label table,
/// processed to log-mel (or mel) features at construction time.
#[derive(Debug)]
pub struct RemixedDataset {
    config: RemixedConfig,
    stft: StftTransform,
    mel: MelFeatureExtractor,
    storage: DatasetStorage,
}

impl RemixedDataset {
    /// Instantiates datasets for the requested split.
    ///
    /// Split identifiers map onto subfolders of the data folder:
    /// `train` → `training/`, `dev` → `development/`, `test` →
    /// `validation/`. `"all"` builds all three.
    ///
    /// # Errors
    /// Unknown identifiers fail with [`DatasetError::InvalidSplit`];
    /// construction failures propagate.
    pub fn split(config: &RemixedConfig, which: &str) -> DatasetResult<SplitSet<Self>> {
        match which {
            "all" => Ok(SplitSet::Three {
                train: Box::new(Self::new(config.for_subfolder("training"))?),
                dev: Box::new(Self::new(config.for_subfolder("development"))?),
                test: Box::new(Self::new(config.for_subfolder("validation"))?),
            }),
            "train" => Ok(SplitSet::One(Box::new(Self::new(
                config.for_subfolder("training"),
            )?))),
            "dev" => Ok(SplitSet::One(Box::new(Self::new(
                config.for_subfolder("development"),
            )?))),
            "test" => Ok(SplitSet::One(Box::new(Self::new(
                config.for_subfolder("validation"),
            )?))),
            other => Err(DatasetError::InvalidSplit(other.to_string())),
        }
    }

    /// Builds the dataset for the folder named by `config.data_folder`.
    ///
    /// Tries the cache archive first when a load folder is configured; any
    /// cache problem is logged and answered by rebuilding from the audio
    /// files. A configured save folder receives a fresh archive.
    ///
    /// # Errors
    /// Invalid configuration, a malformed label table and unreadable audio
    /// files are all fatal; no partial dataset is produced.
    pub fn new(config: RemixedConfig) -> DatasetResult<Self> {
        config.validate()?;

        let window = WindowType::from_name(&config.features.window)?;
        let stft = StftTransform::new(
            window,
            config.features.frame_len(),
            config.features.hop_len(),
        )?;
        let mel = MelFeatureExtractor::from_config(&config.features)?;

        let storage = match Self::cache_path(&config) {
            Some(cache) => match DatasetStorage::from_cache_file(&cache) {
                CacheOutcome::Hit(storage) => {
                    info!(path = %cache.display(), "loaded data set from cache");
                    *storage
                }
                CacheOutcome::Miss(reason) => {
                    warn!(%reason, "cache unusable, building data set from audio files");
                    Self::build_from_audio_files(&config, &stft, &mel)?
                }
            },
            None => {
                debug!("no cache load folder configured, building from audio files");
                Self::build_from_audio_files(&config, &stft, &mel)?
            }
        };

        let dataset = Self {
            config,
            stft,
            mel,
            storage,
        };
        if let Some(save_folder) = dataset.config.save_folder.clone() {
            dataset.save_to_folder(&save_folder)?;
        }
        Ok(dataset)
    }

    /// The configuration this dataset was built with.
    pub fn config(&self) -> &RemixedConfig {
        &self.config
    }

    /// The spectral transform owned by this dataset.
    pub fn stft(&self) -> &StftTransform {
        &self.stft
    }

    /// The mel extractor (filterbank and pseudo-inverse) owned by this
    /// dataset.
    pub fn mel(&self) -> &MelFeatureExtractor {
        &self.mel
    }

    /// The assembled storage: tensors, raw spectra, classes, filenames.
    pub fn storage(&self) -> &DatasetStorage {
        &self.storage
    }

    /// Persists the dataset archive into `folder`, creating it if needed.
    ///
    /// # Errors
    /// Fails on I/O errors or when the data folder has no usable basename
    /// for the archive file.
    pub fn save_to_folder(&self, folder: &Path) -> DatasetResult<()> {
        let name = Self::archive_name(&self.config).ok_or_else(|| {
            ParameterError::invalid_value(
                "data_folder",
                "has no basename to derive the archive name from",
            )
        })?;
        std::fs::create_dir_all(folder)?;
        let path = folder.join(name);
        self.storage.to_archive()?.write(&path)?;
        info!(path = %path.display(), "saved data set archive");
        Ok(())
    }

    fn archive_name(config: &RemixedConfig) -> Option<String> {
        config
            .data_folder
            .file_name()
            .map(|base| format!("{}.h5", base.to_string_lossy()))
    }

    fn cache_path(config: &RemixedConfig) -> Option<PathBuf> {
        let folder = config.load_folder.as_ref()?;
        Some(folder.join(Self::archive_name(config)?))
    }

    fn build_from_audio_files(
        config: &RemixedConfig,
        stft: &StftTransform,
        mel: &MelFeatureExtractor,
    ) -> DatasetResult<DatasetStorage> {
        let table = read_label_table(&config.data_folder.join(LABEL_TABLE_NAME))?;
        info!(
            files = table.filenames.len(),
            classes = table.classes.len(),
            folder = %config.data_folder.display(),
            "building data set from audio files"
        );

        let paths: Vec<PathBuf> = table
            .filenames
            .iter()
            .map(|name| config.data_folder.join(name))
            .collect();
        let audios = load_many(&paths, config.features.sampling_rate, config.max_workers)?;

        let mut magnitudes = Vec::with_capacity(audios.len());
        let mut phases = Vec::with_capacity(audios.len());
        let mut flat_features = Vec::new();
        let mut feature_dim: Option<(usize, usize)> = None;

        for (audio, filename) in audios.iter().zip(table.filenames.iter()) {
            let (magnitude, phase) = stft.forward(audio)?;
            let features = mel.to_features(&magnitude)?;

            let dim = features.dim();
            match feature_dim {
                None => feature_dim = Some(dim),
                Some(expected) if expected == dim => {}
                Some(expected) => {
                    return Err(FeatureError::DimensionMismatch(format!(
                        "'{filename}' yields a {dim:?} feature map, expected {expected:?}; \
                         all clips must share one duration"
                    ))
                    .into());
                }
            }

            flat_features.extend(features.iter().copied());
            magnitudes.push(magnitude);
            phases.push(phase);
        }

        let n = table.filenames.len();
        let (n_mel, n_frames) = feature_dim.unwrap_or((mel.n_mels(), 0));
        let features = Tensor::from_vec(flat_features, (n, 1, n_mel, n_frames), &Device::Cpu)?;
        let labels = Tensor::from_vec(
            table.rows.concat(),
            (n, table.classes.len()),
            &Device::Cpu,
        )?;

        let storage = DatasetStorage {
            magnitudes,
            phases,
            features,
            labels,
            classes: table.classes,
            filenames: table.filenames,
        };
        storage.validate()?;
        Ok(storage)
    }
}

impl AudioDataset for RemixedDataset {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_wav(path: &Path, amplitude: i16, samples: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..samples {
            writer.write_sample(amplitude).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn fixture_folder(name: &str, files: &[(&str, i16)], table: &str) -> PathBuf {
        let dir = PathBuf::from(format!("/tmp/audio_datasets_remixed_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        for (filename, amplitude) in files {
            write_wav(&dir.join(filename), *amplitude, 4_000);
        }
        fs::write(dir.join(LABEL_TABLE_NAME), table).unwrap();
        dir
    }

    fn config_for(data_folder: &Path) -> RemixedConfig {
        RemixedConfig {
            data_folder: data_folder.to_path_buf(),
            ..RemixedConfig::default()
        }
    }

    fn feature_peak(dataset: &RemixedDataset, index: usize) -> f32 {
        let (feature, _) = dataset.get(index).unwrap();
        feature
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()
            .into_iter()
            .fold(f32::NEG_INFINITY, f32::max)
    }

    #[test]
    fn silent_clips_yield_exactly_zero_log_mel_features() {
        let dir = fixture_folder(
            "silent",
            &[("a.wav", 0), ("b.wav", 0), ("c.wav", 0)],
            "filename,gunshot\na.wav,1.0\nb.wav,1.0\nc.wav,1.0\n",
        );

        let dataset = RemixedDataset::new(config_for(&dir)).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.n_classes(), 1);
        // 4000 samples, 1024/512 framing: (4000 - 1024) / 512 + 1 frames.
        assert_eq!(dataset.features_shape(), vec![1, 64, 6]);

        // Zero magnitude projects to zero mel energy, and the log-mel
        // mapping passes non-positive cells through unchanged.
        for index in 0..dataset.len() {
            let (feature, label) = dataset.get(index).unwrap();
            assert!(feature
                .flatten_all()
                .unwrap()
                .to_vec1::<f32>()
                .unwrap()
                .iter()
                .all(|&x| x == 0.0));
            assert_eq!(label.to_vec1::<f32>().unwrap(), vec![1.0]);
        }

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn example_order_follows_the_label_table() {
        // The table deliberately does not order files by loudness.
        let dir = fixture_folder(
            "order",
            &[("quiet.wav", 800), ("mid.wav", 8_000), ("loud.wav", 24_000)],
            "filename,gunshot\nmid.wav,1.0\nquiet.wav,0.0\nloud.wav,1.0\n",
        );

        let dataset = RemixedDataset::new(config_for(&dir)).unwrap();
        assert_eq!(
            dataset.storage().filenames,
            vec!["mid.wav", "quiet.wav", "loud.wav"]
        );

        let mid = feature_peak(&dataset, 0);
        let quiet = feature_peak(&dataset, 1);
        let loud = feature_peak(&dataset, 2);
        assert!(quiet < mid && mid < loud);

        let labels = dataset
            .storage()
            .labels
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(labels, vec![1.0, 0.0, 1.0]);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn shape_invariant_holds_for_built_datasets() {
        let dir = fixture_folder(
            "shapes",
            &[("a.wav", 1_000), ("b.wav", 2_000)],
            "filename,babycry,gunshot\na.wav,1.0,0.0\nb.wav,0.0,1.0\n",
        );

        let dataset = RemixedDataset::new(config_for(&dir)).unwrap();
        let storage = dataset.storage();
        storage.validate().unwrap();
        assert_eq!(storage.magnitudes.len(), 2);
        assert_eq!(storage.phases.len(), 2);
        assert_eq!(storage.classes, vec!["babycry", "gunshot"]);
        assert_eq!(dataset.n_classes(), 2);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn cache_archive_round_trips_and_survives_source_deletion() {
        let dir = fixture_folder(
            "cache",
            &[("a.wav", 5_000), ("b.wav", 9_000)],
            "filename,gunshot\na.wav,1.0\nb.wav,0.0\n",
        );
        let cache_dir = PathBuf::from("/tmp/audio_datasets_remixed_cache_store");
        let _ = fs::remove_dir_all(&cache_dir);

        let mut config = config_for(&dir);
        config.save_folder = Some(cache_dir.clone());
        let built = RemixedDataset::new(config).unwrap();

        // Remove the audio so a rebuild would fail; only the cache remains.
        for name in ["a.wav", "b.wav"] {
            fs::remove_file(dir.join(name)).unwrap();
        }

        let mut config = config_for(&dir);
        config.load_folder = Some(cache_dir.clone());
        let cached = RemixedDataset::new(config).unwrap();

        assert_eq!(cached.storage().filenames, built.storage().filenames);
        assert_eq!(cached.storage().classes, built.storage().classes);
        assert_eq!(cached.storage().magnitudes, built.storage().magnitudes);
        // Phases may hold NaN at zero-magnitude bins; compare bit patterns.
        for (a, b) in cached.storage().phases.iter().zip(built.storage().phases.iter()) {
            assert_eq!(a.dim(), b.dim());
            for (x, y) in a.iter().zip(b.iter()) {
                assert_eq!(x.re.to_bits(), y.re.to_bits());
                assert_eq!(x.im.to_bits(), y.im.to_bits());
            }
        }
        assert_eq!(
            cached
                .storage()
                .features
                .flatten_all()
                .unwrap()
                .to_vec1::<f32>()
                .unwrap(),
            built
                .storage()
                .features
                .flatten_all()
                .unwrap()
                .to_vec1::<f32>()
                .unwrap()
        );

        let _ = fs::remove_dir_all(dir);
        let _ = fs::remove_dir_all(cache_dir);
    }

    #[test]
    fn corrupt_cache_falls_back_to_audio_files() {
        let dir = fixture_folder(
            "corrupt_cache",
            &[("a.wav", 4_000)],
            "filename,gunshot\na.wav,1.0\n",
        );
        let cache_dir = PathBuf::from("/tmp/audio_datasets_remixed_corrupt_store");
        let _ = fs::remove_dir_all(&cache_dir);
        fs::create_dir_all(&cache_dir).unwrap();
        let archive_name = format!(
            "{}.h5",
            dir.file_name().unwrap().to_string_lossy()
        );
        fs::write(cache_dir.join(archive_name), b"not an archive").unwrap();

        let mut config = config_for(&dir);
        config.load_folder = Some(cache_dir.clone());
        let dataset = RemixedDataset::new(config).unwrap();
        assert_eq!(dataset.len(), 1);

        let _ = fs::remove_dir_all(dir);
        let _ = fs::remove_dir_all(cache_dir);
    }

    #[test]
    fn split_routes_to_the_expected_subfolders() {
        let root = PathBuf::from("/tmp/audio_datasets_remixed_split");
        let _ = fs::remove_dir_all(&root);
        for (subfolder, filename) in [
            ("training", "tr.wav"),
            ("development", "dv.wav"),
            ("validation", "va.wav"),
        ] {
            let dir = root.join(subfolder);
            fs::create_dir_all(&dir).unwrap();
            write_wav(&dir.join(filename), 1_000, 4_000);
            fs::write(
                dir.join(LABEL_TABLE_NAME),
                format!("filename,gunshot\n{filename},1.0\n"),
            )
            .unwrap();
        }

        let config = config_for(&root);
        let dev = RemixedDataset::split(&config, "dev")
            .unwrap()
            .into_one()
            .unwrap();
        assert!(dev.config().data_folder.ends_with("development"));
        assert_eq!(dev.storage().filenames, vec!["dv.wav"]);

        let (train, dev, test) = RemixedDataset::split(&config, "all")
            .unwrap()
            .into_three()
            .unwrap();
        assert_eq!(train.storage().filenames, vec!["tr.wav"]);
        assert_eq!(dev.storage().filenames, vec!["dv.wav"]);
        assert_eq!(test.storage().filenames, vec!["va.wav"]);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn unknown_split_identifier_is_fatal() {
        let config = RemixedConfig::default();
        assert!(matches!(
            RemixedDataset::split(&config, "validation"),
            Err(DatasetError::InvalidSplit(name)) if name == "validation"
        ));
    }

    #[test]
    fn missing_audio_file_is_fatal() {
        let dir = fixture_folder(
            "missing_audio",
            &[("present.wav", 100)],
            "filename,gunshot\npresent.wav,1.0\nabsent.wav,1.0\n",
        );
        assert!(matches!(
            RemixedDataset::new(config_for(&dir)),
            Err(DatasetError::Audio(_))
        ));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn malformed_label_table_is_fatal() {
        let dir = fixture_folder(
            "bad_table",
            &[("a.wav", 100)],
            "filename,gunshot\na.wav,not-a-number\n",
        );
        assert!(matches!(
            RemixedDataset::new(config_for(&dir)),
            Err(DatasetError::LabelTable(LabelTableError::Row { line: 2, .. }))
        ));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn unsupported_window_fails_at_construction() {
        let dir = fixture_folder(
            "bad_window",
            &[("a.wav", 100)],
            "filename,gunshot\na.wav,1.0\n",
        );
        let mut config = config_for(&dir);
        config.features.window = "kaiser".to_string();
        assert!(matches!(
            RemixedDataset::new(config),
            Err(DatasetError::Parameter(_))
        ));
        let _ = fs::remove_dir_all(dir);
    }
}
