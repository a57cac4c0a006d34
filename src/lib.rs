// Correctness and logic
#![warn(clippy::unit_cmp)]
#![warn(clippy::match_same_arms)]
// Performance-focused
#![warn(clippy::inefficient_to_string)]
#![warn(clippy::map_clone)]
#![warn(clippy::unnecessary_to_owned)]
#![warn(clippy::needless_collect)]
// Style and idiomatic Rust
#![warn(clippy::redundant_clone)]
#![warn(clippy::needless_return)]
#![warn(clippy::manual_map)]
#![warn(clippy::unwrap_used)]
// Maintainability
#![warn(clippy::missing_panics_doc)]
#![deny(missing_docs)]

//! # audio_datasets
//!
//! Preparation of audio classification training data: decode raw waveform
//! clips (or consume pre-extracted feature archives), turn them into
//! time-frequency representations, reduce those to mel-scaled spectral
//! features, and hand `(feature, label)` tensors to a training loop through
//! an indexable, length-known dataset.
//!
//! ## Pipeline
//!
//! Data flows one way: audio files → [`loader`] → [`StftTransform`] →
//! [`MelFeatureExtractor`] → assembled feature/label tensors → a dataset
//! builder ([`RemixedDataset`] or [`PackedDataset`], with archive caching)
//! → per-channel normalization → consumed through the [`AudioDataset`]
//! trait.
//!
//! Two builders cover the two corpus layouts:
//!
//! - [`RemixedDataset`]: a folder of remixed clips plus a `weak_labels.csv`
//!   table. Clips are decoded in parallel on a bounded pool, features are
//!   computed here, and the finished dataset can be cached to (and reloaded
//!   from) a binary archive.
//! - [`PackedDataset`]: features arrive pre-extracted in an archive
//!   (`na_list` / `x` / `y`); only the 0 dB mixture audio is decoded, for
//!   reconstruction and inspection purposes.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use audio_datasets::{AudioDataset, RemixedConfig, RemixedDataset};
//!
//! fn main() -> audio_datasets::DatasetResult<()> {
//!     let config = RemixedConfig {
//!         data_folder: "data/remixed_corpus".into(),
//!         ..RemixedConfig::default()
//!     };
//!
//!     let (mut train, mut dev, mut test) = RemixedDataset::split(&config, "all")?
//!         .into_three()
//!         .expect("'all' yields three splits");
//!
//!     // Statistics come from the training split only and are reapplied
//!     // verbatim everywhere else.
//!     let (shift, scale) = train.compute_shift_and_scaling()?;
//!     train.shift_and_scale(&shift, &scale)?;
//!     dev.shift_and_scale(&shift, &scale)?;
//!     test.shift_and_scale(&shift, &scale)?;
//!
//!     let (feature, label) = train.get(0)?;
//!     println!(
//!         "{} examples of shape {:?}, {} classes, first label {:?}",
//!         train.len(),
//!         feature.dims(),
//!         train.n_classes(),
//!         label.to_vec1::<f32>()?,
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Error handling
//!
//! Everything fallible returns [`DatasetResult`]. Decode failures, a
//! malformed label table and unknown split identifiers are fatal; an
//! unusable cache archive is not — it is logged and answered by rebuilding
//! from source.

pub mod archive;
pub mod config;
pub mod dataset;
mod error;
pub mod loader;
pub mod mel;
pub mod packed;
pub mod remixed;
pub mod stft;

pub use crate::archive::{Archive, Entry};
pub use crate::config::{DatasetKind, FeatureConfig, FeatureType, PackedConfig, RemixedConfig};
pub use crate::dataset::{AudioDataset, CacheOutcome, DatasetStorage, SplitSet};
pub use crate::error::{
    ArchiveError, AudioError, DatasetError, DatasetResult, FeatureError, LabelTableError,
    ParameterError,
};
pub use crate::loader::{load_audio, load_many};
pub use crate::mel::MelFeatureExtractor;
pub use crate::packed::PackedDataset;
pub use crate::remixed::RemixedDataset;
pub use crate::stft::{Complex32, StftTransform, WindowType};
