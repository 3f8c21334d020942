//! WAV read/write helpers shared by the live recorder and the batch path.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::{Path, PathBuf};

/// One chunk of a long file split for batch transcription.
#[derive(Debug, Clone)]
pub struct ChunkFile {
    pub index: usize,
    pub path: PathBuf,
    /// Offset of this chunk's first sample within the original file.
    pub start_secs: f64,
}

pub fn write_samples(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {:?}", path))?;
    for &sample in samples {
        let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        writer.write_sample(s)?;
    }
    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(())
}

/// Read a mono or multi-channel WAV into mono f32 samples.
pub fn read_samples(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        WavReader::open(path).with_context(|| format!("Failed to open WAV file: {:?}", path))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to read float samples")?,
        SampleFormat::Int => {
            let max = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("Failed to read integer samples")?
        }
    };

    let mono = if channels <= 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok((mono, spec.sample_rate))
}

pub fn duration_secs(path: &Path) -> Result<f64> {
    let reader =
        WavReader::open(path).with_context(|| format!("Failed to open WAV file: {:?}", path))?;
    let spec = reader.spec();
    let frames = reader.duration() as f64;
    Ok(frames / spec.sample_rate as f64)
}

/// Split a file into fixed-length chunks written under `out_dir`.
///
/// The final chunk carries the remainder and may be shorter.
pub fn split_into_chunks(path: &Path, chunk_secs: f64, out_dir: &Path) -> Result<Vec<ChunkFile>> {
    let (samples, sample_rate) = read_samples(path)?;
    let chunk_len = (chunk_secs * sample_rate as f64) as usize;
    if chunk_len == 0 {
        anyhow::bail!("chunk duration too small");
    }

    let mut chunks = Vec::new();
    for (index, piece) in samples.chunks(chunk_len).enumerate() {
        let chunk_path = out_dir.join(format!("chunk-{:03}.wav", index));
        write_samples(&chunk_path, piece, sample_rate)?;
        chunks.push(ChunkFile {
            index,
            path: chunk_path,
            start_secs: index as f64 * chunk_secs,
        });
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wav");
        let samples = vec![0.0, 0.25, -0.25, 0.5];

        write_samples(&path, &samples, 16_000).unwrap();
        let (read, rate) = read_samples(&path).unwrap();

        assert_eq!(rate, 16_000);
        assert_eq!(read.len(), samples.len());
        for (a, b) in read.iter().zip(samples.iter()) {
            assert!((a - b).abs() < 0.001);
        }
    }

    #[test]
    fn duration_matches_sample_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wav");
        write_samples(&path, &vec![0.1; 32_000], 16_000).unwrap();

        let secs = duration_secs(&path).unwrap();
        assert!((secs - 2.0).abs() < 0.01);
    }

    #[test]
    fn split_produces_expected_chunk_count_and_offsets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("long.wav");
        // 5 seconds split into 2-second chunks -> 3 chunks.
        write_samples(&path, &vec![0.1; 80_000], 16_000).unwrap();

        let chunks = split_into_chunks(&path, 2.0, dir.path()).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start_secs, 0.0);
        assert_eq!(chunks[1].start_secs, 2.0);
        assert_eq!(chunks[2].start_secs, 4.0);

        let last = duration_secs(&chunks[2].path).unwrap();
        assert!((last - 1.0).abs() < 0.01);
    }
}
