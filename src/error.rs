//! Error types and result utilities for dataset construction.

use std::path::Path;
use thiserror::Error;

/// Convenience type alias for results that may contain [`DatasetError`].
pub type DatasetResult<T> = Result<T, DatasetError>;

/// Top-level error type for dataset preparation operations.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// An invalid parameter was supplied to an operation.
    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    /// Decoding or resampling an audio file failed.
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    /// The weak-label table could not be read or parsed.
    #[error("Label table error: {0}")]
    LabelTable(#[from] LabelTableError),

    /// A dataset archive could not be read or written.
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Feature assembly failed (shape mismatch, singular filterbank, ...).
    #[error("Feature error: {0}")]
    Feature(#[from] FeatureError),

    /// An unknown split identifier was requested.
    #[error("Split identifier '{0}' is not valid")]
    InvalidSplit(String),

    /// An unknown dataset kind was requested.
    #[error("Data set kind '{0}' is not available")]
    UnknownKind(String),

    /// Tensor operations on features or labels failed.
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// I/O errors outside of archive handling.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error for invalid parameter values.
#[derive(Error, Debug)]
pub enum ParameterError {
    /// A named parameter holds a value the operation cannot work with.
    #[error("invalid value for '{name}': {reason}")]
    InvalidValue {
        /// Parameter name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ParameterError {
    /// Build an [`ParameterError::InvalidValue`] from a name and reason.
    pub fn invalid_value(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while loading a waveform file.
#[derive(Error, Debug)]
pub enum AudioError {
    /// The file could not be opened or is not a readable WAV container.
    #[error("failed to open '{path}': {reason}")]
    Open {
        /// Path of the offending file.
        path: String,
        /// Decoder message.
        reason: String,
    },

    /// Samples could not be decoded from an open container.
    #[error("failed to decode '{path}': {reason}")]
    Decode {
        /// Path of the offending file.
        path: String,
        /// Decoder message.
        reason: String,
    },

    /// Resampling to the target rate failed.
    #[error("resampling failed: {0}")]
    Resample(String),
}

impl AudioError {
    /// Open failure for `path`.
    pub fn open(path: &Path, reason: impl ToString) -> Self {
        Self::Open {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Decode failure for `path`.
    pub fn decode(path: &Path, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised while parsing the weak-label CSV table.
#[derive(Error, Debug)]
pub enum LabelTableError {
    /// The table file could not be read.
    #[error("failed to read '{path}': {reason}")]
    Read {
        /// Path of the table.
        path: String,
        /// I/O message.
        reason: String,
    },

    /// The header row is missing or malformed.
    #[error("bad header: {0}")]
    Header(String),

    /// A data row could not be parsed.
    #[error("bad row {line}: {reason}")]
    Row {
        /// 1-based line number inside the table.
        line: usize,
        /// Why the row was rejected.
        reason: String,
    },
}

/// Errors raised by the binary archive container.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Reading or writing the archive file failed at the I/O level.
    #[error("archive io: {0}")]
    Io(String),

    /// The file is shorter than the fixed header.
    #[error("file too short for archive header")]
    TooShort,

    /// The file does not start with the archive magic bytes.
    #[error("invalid magic bytes")]
    BadMagic,

    /// The archive was written by an unsupported format version.
    #[error("unsupported archive version {0}")]
    BadVersion(u32),

    /// A named dataset expected by the reader is absent.
    #[error("missing entry '{0}'")]
    MissingEntry(String),

    /// The payload is internally inconsistent (truncated data, bad
    /// lengths, non-UTF-8 strings).
    #[error("corrupt archive: {0}")]
    Corrupt(String),
}

/// Errors raised during feature extraction and assembly.
#[derive(Error, Debug)]
pub enum FeatureError {
    /// Array dimensions do not match what the operation expects.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// The mel filterbank Gram matrix could not be inverted.
    #[error("filterbank is singular: {0}")]
    SingularFilterbank(String),
}
