//! Conversion of arbitrary media into engine-ready wave audio.
//!
//! Inference consumes 16 kHz PCM only. Inputs that already parse as such
//! pass through untouched; everything else is rewritten by the `ffmpeg`
//! binary on `PATH`.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::task;
use tracing::{debug, info};

use crate::error::{MurmurError, Result};
use crate::wave::WaveReader;

/// Produces a readable wave file for a media input.
#[async_trait]
pub trait Transcoder {
    /// Returns the path to use for decoding and whether a new file was
    /// written. When the flag is `true` the caller owns the returned file
    /// and should remove it once done.
    async fn to_wave(&self, input: &Path) -> Result<(PathBuf, bool)>;
}

/// Transcoder backed by the `ffmpeg` executable.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    base_dir: PathBuf,
}

impl FfmpegTranscoder {
    /// Creates a transcoder that writes into the system temp directory.
    pub fn new() -> Self {
        Self {
            base_dir: std::env::temp_dir(),
        }
    }

    /// Set the directory transcoded files are written into.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Directory transcoded files are written into.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn to_wave(&self, input: &Path) -> Result<(PathBuf, bool)> {
        if !input.exists() {
            return Err(MurmurError::Transcode(format!(
                "input file not found: {}",
                input.display()
            )));
        }

        if probe_wave(input).await? {
            debug!("{} already decodes as 16 kHz PCM, skipping transcode", input.display());
            return Ok((input.to_path_buf(), false));
        }

        let target = self.base_dir.join(random_wave_name());
        info!("transcoding {} to {}", input.display(), target.display());

        let input_arg = input.to_string_lossy();
        let target_arg = target.to_string_lossy();
        let output = Command::new("ffmpeg")
            .args([
                "-loglevel",
                "error",
                "-y",
                "-i",
                &input_arg,
                "-ar",
                "16000",
                "-ac",
                "1",
                "-acodec",
                "pcm_s16le",
                &target_arg,
            ])
            .output()
            .await
            .map_err(|e| MurmurError::Transcode(format!("failed to run ffmpeg: {}", e)))?;

        if !output.status.success() {
            return Err(MurmurError::Transcode(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok((target, true))
    }
}

/// Whether the file parses as a wave container the decoder accepts as-is.
async fn probe_wave(path: &Path) -> Result<bool> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || {
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(_) => return false,
        };
        WaveReader::new(BufReader::new(file)).initialize().is_ok()
    })
    .await
    .map_err(|e| MurmurError::Transcode(format!("probe task failed: {}", e)))
}

fn random_wave_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("murmur-{}-{:08x}.wav", std::process::id(), nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wave(dir: &tempfile::TempDir, name: &str, sample_rate: u32) -> PathBuf {
        let path = dir.path().join(name);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..640i16 {
            writer.write_sample(i).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[tokio::test]
    async fn valid_wave_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wave(&dir, "ok.wav", 16_000);

        let (out, transcoded) = FfmpegTranscoder::new().to_wave(&path).await.unwrap();
        assert_eq!(out, path);
        assert!(!transcoded);
    }

    #[tokio::test]
    async fn missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FfmpegTranscoder::new()
            .to_wave(&dir.path().join("nope.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, MurmurError::Transcode(_)));
    }

    #[tokio::test]
    async fn probe_rejects_wrong_sample_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wave(&dir, "44k.wav", 44_100);
        assert!(!probe_wave(&path).await.unwrap());
    }

    #[test]
    fn base_dir_is_configurable() {
        let t = FfmpegTranscoder::new().with_base_dir("/tmp/murmur-out");
        assert_eq!(t.base_dir(), Path::new("/tmp/murmur-out"));
    }
}
