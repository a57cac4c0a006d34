//! Binary archive container for cached and pre-packed datasets.
//!
//! Layout: magic bytes + version word, then a sequence of named datasets.
//! Four payload kinds cover everything the dataset builders persist:
//! n-dimensional `f32` arrays (features, labels), lists of `f32` and
//! complex matrices (per-example magnitude and phase spectra, which may
//! have differing frame counts), and UTF-8 string lists (class names,
//! filenames). All integers and floats are little-endian.
//!
//! Every read failure maps to an [`ArchiveError`]; the remixed builder
//! treats any of them as a cache miss and rebuilds from source.

use std::fs;
use std::path::Path;

use ndarray::Array2;

use crate::error::ArchiveError;
use crate::stft::Complex32;

const ARCHIVE_MAGIC: &[u8; 4] = b"ADS\x01";
const FORMAT_VERSION: u32 = 1;

const KIND_F32_ARRAY: u8 = 1;
const KIND_F32_MATRICES: u8 = 2;
const KIND_COMPLEX_MATRICES: u8 = 3;
const KIND_STR_LIST: u8 = 4;

/// One named dataset inside an archive.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Dense n-dimensional `f32` array in row-major order.
    F32Array {
        /// Dimensions, outermost first.
        dims: Vec<usize>,
        /// Row-major payload; length is the product of `dims`.
        data: Vec<f32>,
    },
    /// List of independently shaped `f32` matrices.
    F32Matrices(Vec<Array2<f32>>),
    /// List of independently shaped complex matrices.
    ComplexMatrices(Vec<Array2<Complex32>>),
    /// List of UTF-8 strings.
    StrList(Vec<String>),
}

/// An ordered collection of named datasets, readable and writable as one
/// binary file.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    entries: Vec<(String, Entry)>,
}

impl Archive {
    /// Creates an empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a named dataset.
    pub fn insert(&mut self, name: impl Into<String>, entry: Entry) {
        self.entries.push((name.into(), entry));
    }

    /// Borrows a dataset by name.
    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, entry)| entry)
    }

    /// Removes and returns a dataset by name.
    ///
    /// # Errors
    /// [`ArchiveError::MissingEntry`] if no dataset has that name.
    pub fn take(&mut self, name: &str) -> Result<Entry, ArchiveError> {
        let index = self
            .entries
            .iter()
            .position(|(entry_name, _)| entry_name == name)
            .ok_or_else(|| ArchiveError::MissingEntry(name.to_string()))?;
        Ok(self.entries.remove(index).1)
    }

    /// Serializes the archive to `path`, replacing any existing file.
    ///
    /// # Errors
    /// Fails on I/O errors only; every entry kind is encodable.
    pub fn write(&self, path: &Path) -> Result<(), ArchiveError> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(ARCHIVE_MAGIC);
        buffer.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buffer.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());

        for (name, entry) in &self.entries {
            buffer.extend_from_slice(&(name.len() as u32).to_le_bytes());
            buffer.extend_from_slice(name.as_bytes());
            encode_entry(&mut buffer, entry);
        }

        fs::write(path, buffer).map_err(|e| ArchiveError::Io(e.to_string()))
    }

    /// Reads an archive from `path`.
    ///
    /// # Errors
    /// Any structural problem (short file, bad magic, unsupported version,
    /// truncated payload, invalid UTF-8) is reported as an [`ArchiveError`].
    pub fn read(path: &Path) -> Result<Self, ArchiveError> {
        let data = fs::read(path).map_err(|e| ArchiveError::Io(e.to_string()))?;
        let mut reader = ByteReader::new(&data);

        let magic = reader.take_bytes(4)?;
        if magic != ARCHIVE_MAGIC {
            return Err(ArchiveError::BadMagic);
        }
        let version = reader.take_u32()?;
        if version != FORMAT_VERSION {
            return Err(ArchiveError::BadVersion(version));
        }

        let entry_count = reader.take_u32()? as usize;
        // Counts come from the file; grow as entries actually decode.
        let mut entries = Vec::new();
        for _ in 0..entry_count {
            let name = reader.take_string()?;
            let entry = decode_entry(&mut reader)?;
            entries.push((name, entry));
        }

        Ok(Self { entries })
    }
}

fn encode_entry(buffer: &mut Vec<u8>, entry: &Entry) {
    match entry {
        Entry::F32Array { dims, data } => {
            buffer.push(KIND_F32_ARRAY);
            buffer.push(dims.len() as u8);
            for &dim in dims {
                buffer.extend_from_slice(&(dim as u64).to_le_bytes());
            }
            for &value in data {
                buffer.extend_from_slice(&value.to_le_bytes());
            }
        }
        Entry::F32Matrices(matrices) => {
            buffer.push(KIND_F32_MATRICES);
            buffer.extend_from_slice(&(matrices.len() as u64).to_le_bytes());
            for matrix in matrices {
                let (rows, cols) = matrix.dim();
                buffer.extend_from_slice(&(rows as u64).to_le_bytes());
                buffer.extend_from_slice(&(cols as u64).to_le_bytes());
                for &value in matrix.iter() {
                    buffer.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
        Entry::ComplexMatrices(matrices) => {
            buffer.push(KIND_COMPLEX_MATRICES);
            buffer.extend_from_slice(&(matrices.len() as u64).to_le_bytes());
            for matrix in matrices {
                let (rows, cols) = matrix.dim();
                buffer.extend_from_slice(&(rows as u64).to_le_bytes());
                buffer.extend_from_slice(&(cols as u64).to_le_bytes());
                for value in matrix.iter() {
                    buffer.extend_from_slice(&value.re.to_le_bytes());
                    buffer.extend_from_slice(&value.im.to_le_bytes());
                }
            }
        }
        Entry::StrList(strings) => {
            buffer.push(KIND_STR_LIST);
            buffer.extend_from_slice(&(strings.len() as u64).to_le_bytes());
            for string in strings {
                buffer.extend_from_slice(&(string.len() as u32).to_le_bytes());
                buffer.extend_from_slice(string.as_bytes());
            }
        }
    }
}

fn decode_entry(reader: &mut ByteReader<'_>) -> Result<Entry, ArchiveError> {
    match reader.take_u8()? {
        KIND_F32_ARRAY => {
            let ndim = reader.take_u8()? as usize;
            let mut dims = Vec::with_capacity(ndim);
            for _ in 0..ndim {
                dims.push(reader.take_u64()? as usize);
            }
            let len = dims
                .iter()
                .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
                .ok_or_else(|| ArchiveError::Corrupt("dimensions overflow".to_string()))?;
            let data = reader.take_f32_slice(len)?;
            Ok(Entry::F32Array { dims, data })
        }
        KIND_F32_MATRICES => {
            let count = reader.take_u64()? as usize;
            let mut matrices = Vec::new();
            for _ in 0..count {
                let rows = reader.take_u64()? as usize;
                let cols = reader.take_u64()? as usize;
                let len = rows
                    .checked_mul(cols)
                    .ok_or_else(|| ArchiveError::Corrupt("matrix shape overflows".to_string()))?;
                let data = reader.take_f32_slice(len)?;
                let matrix = Array2::from_shape_vec((rows, cols), data)
                    .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
                matrices.push(matrix);
            }
            Ok(Entry::F32Matrices(matrices))
        }
        KIND_COMPLEX_MATRICES => {
            let count = reader.take_u64()? as usize;
            let mut matrices = Vec::new();
            for _ in 0..count {
                let rows = reader.take_u64()? as usize;
                let cols = reader.take_u64()? as usize;
                let len = rows
                    .checked_mul(cols)
                    .and_then(|n| n.checked_mul(2))
                    .ok_or_else(|| ArchiveError::Corrupt("matrix shape overflows".to_string()))?;
                let raw = reader.take_f32_slice(len)?;
                let data = raw
                    .chunks_exact(2)
                    .map(|pair| Complex32::new(pair[0], pair[1]))
                    .collect();
                let matrix = Array2::from_shape_vec((rows, cols), data)
                    .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
                matrices.push(matrix);
            }
            Ok(Entry::ComplexMatrices(matrices))
        }
        KIND_STR_LIST => {
            let count = reader.take_u64()? as usize;
            let mut strings = Vec::new();
            for _ in 0..count {
                strings.push(reader.take_string()?);
            }
            Ok(Entry::StrList(strings))
        }
        other => Err(ArchiveError::Corrupt(format!("unknown entry kind {other}"))),
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take_bytes(&mut self, len: usize) -> Result<&'a [u8], ArchiveError> {
        let end = self.pos.checked_add(len).ok_or(ArchiveError::TooShort)?;
        if end > self.data.len() {
            return Err(ArchiveError::TooShort);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, ArchiveError> {
        Ok(self.take_bytes(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32, ArchiveError> {
        let bytes = self.take_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take_u64(&mut self) -> Result<u64, ArchiveError> {
        let bytes = self.take_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    fn take_f32_slice(&mut self, len: usize) -> Result<Vec<f32>, ArchiveError> {
        let byte_len = len
            .checked_mul(4)
            .ok_or_else(|| ArchiveError::Corrupt("element count overflows".to_string()))?;
        let bytes = self.take_bytes(byte_len)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    fn take_string(&mut self) -> Result<String, ArchiveError> {
        let len = self.take_u32()? as usize;
        let bytes = self.take_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ArchiveError::Corrupt(format!("invalid UTF-8: {e}")))
    }
}
