//! Waveform loading: WAV decode, mono mixdown, resampling.
//!
//! Every loaded file comes back as a single-channel `f32` signal at the
//! dataset's configured sampling rate, whatever rate and channel count the
//! container carried. Decode failures propagate to the caller; the dataset
//! builders never produce a partial dataset from unreadable audio.

use std::path::{Path, PathBuf};

use hound::WavReader;
use rayon::prelude::*;
use rubato::{FftFixedInOut, Resampler};

use crate::error::{AudioError, DatasetResult, ParameterError};

const RESAMPLE_BLOCK: usize = 4096;

/// Decodes a WAV file to a mono `f32` signal at `target_rate` Hz.
///
/// Integer samples are scaled to `[-1, 1]`; multi-channel audio is
/// collapsed by averaging the channels of each frame.
///
/// # Errors
/// Missing, unreadable or non-WAV files fail with an [`AudioError`].
pub fn load_audio(path: &Path, target_rate: u32) -> DatasetResult<Vec<f32>> {
    let reader = WavReader::open(path).map_err(|e| AudioError::open(path, e))?;

    let spec = reader.spec();
    let channels = spec.channels as usize;
    let source_rate = spec.sample_rate;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AudioError::decode(path, e))?,
        hound::SampleFormat::Int => {
            let max_val = (1u32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AudioError::decode(path, e))?
        }
    };

    let mono = to_mono(&samples, channels);
    resample(&mono, source_rate, target_rate)
}

/// Loads many files in parallel on a bounded pool, preserving input order.
///
/// `max_workers` bounds the pool; 0 means one worker per core. The pool
/// lives only for this call. Results come back in the order of `paths`
/// regardless of which file finishes decoding first.
///
/// # Errors
/// The first decode failure aborts the whole load.
pub fn load_many(
    paths: &[PathBuf],
    target_rate: u32,
    max_workers: usize,
) -> DatasetResult<Vec<Vec<f32>>> {
    let workers = if max_workers == 0 {
        num_cpus::get()
    } else {
        max_workers
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| ParameterError::invalid_value("max_workers", e.to_string()))?;

    pool.install(|| {
        paths
            .par_iter()
            .map(|path| load_audio(path, target_rate))
            .collect::<DatasetResult<Vec<_>>>()
    })
}

fn to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample(signal: &[f32], source_rate: u32, target_rate: u32) -> DatasetResult<Vec<f32>> {
    if source_rate == target_rate || signal.is_empty() {
        return Ok(signal.to_vec());
    }

    let block = signal.len().min(RESAMPLE_BLOCK);
    let mut resampler = FftFixedInOut::<f64>::new(
        source_rate as usize,
        target_rate as usize,
        block,
        1,
    )
    .map_err(|e| AudioError::Resample(e.to_string()))?;

    let expected = (signal.len() as f64 * f64::from(target_rate) / f64::from(source_rate)).round()
        as usize;
    let mut output = Vec::with_capacity(expected);
    let mut pos = 0;

    // Feed fixed-size chunks; the tail (and, if the resampler still owes us
    // samples, a few extra chunks) is zero-padded and trimmed afterwards.
    while pos < signal.len() || output.len() < expected {
        let needed = resampler.input_frames_next();
        let take = needed.min(signal.len().saturating_sub(pos));
        let mut chunk = vec![0.0f64; needed];
        for (slot, &sample) in chunk.iter_mut().zip(signal[pos..pos + take].iter()) {
            *slot = f64::from(sample);
        }
        pos += take;

        let processed = resampler
            .process(&[chunk], None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        output.extend(processed[0].iter().map(|&v| v as f32));
    }

    output.truncate(expected);
    Ok(output)
}
