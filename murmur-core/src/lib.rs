//! Murmur Core Library
//!
//! Streaming speech-to-text plumbing: RIFF/WAVE parsing and PCM decoding,
//! a one-pass-at-a-time inference processor with live segment streaming,
//! model management, subtitle rendering and media transcoding. The native
//! whisper.cpp backend lives behind the `whisper-cpp` feature; everything
//! else builds without a native toolchain.

pub mod engine;
pub mod error;
pub mod model;
pub mod params;
pub mod processor;
mod registry;
pub mod segment;
pub mod signal;
pub mod subtitle;
pub mod transcode;
pub mod wave;
#[cfg(feature = "whisper-cpp")]
pub mod whisper;

pub use engine::{EngineError, PassCallbacks, SegmentSource, SpeechEngine};
pub use error::{MurmurError, Result};
pub use model::{GgmlModel, ModelManager, Quantization};
pub use params::{ContextParams, DecodeParams, SamplingStrategy};
pub use processor::{SegmentStream, SpeechProcessor};
pub use segment::Segment;
pub use signal::ResetSignal;
pub use subtitle::{SubtitleCue, SubtitleFormat, SubtitleTrack};
pub use transcode::{FfmpegTranscoder, Transcoder};
pub use wave::WaveReader;
#[cfg(feature = "whisper-cpp")]
pub use whisper::{system_info, WhisperEngine, WhisperModel};

#[cfg(feature = "whisper-cpp")]
use tracing::info;

/// High-level one-shot transcription: load a model, decode a wave file and
/// collect every segment of the single pass.
#[cfg(feature = "whisper-cpp")]
pub async fn transcribe_file(
    model_path: impl AsRef<std::path::Path>,
    audio_path: impl AsRef<std::path::Path>,
    params: DecodeParams,
) -> Result<Vec<Segment>> {
    use futures::StreamExt;

    let mut stream = transcribe_stream(
        model_path,
        audio_path,
        params,
        tokio_util::sync::CancellationToken::new(),
    )
    .await?;

    let mut segments = Vec::new();
    while let Some(segment) = stream.next().await {
        segments.push(segment?);
    }
    Ok(segments)
}

/// High-level streaming transcription: load a model, start a pass over a
/// wave file and hand back the live segment stream. The backing processor
/// shuts itself down once the pass completes.
#[cfg(feature = "whisper-cpp")]
pub async fn transcribe_stream(
    model_path: impl AsRef<std::path::Path>,
    audio_path: impl AsRef<std::path::Path>,
    params: DecodeParams,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<SegmentStream> {
    use std::sync::Arc;

    let model_path = model_path.as_ref().to_path_buf();
    let model = tokio::task::spawn_blocking(move || WhisperModel::from_file(&model_path))
        .await
        .map_err(|e| MurmurError::Configuration(format!("model load task failed: {}", e)))??;

    let engine = Arc::new(WhisperEngine::new(Arc::new(model)));
    let processor = SpeechProcessor::new(engine, params);

    info!("Transcribing audio file: {}", audio_path.as_ref().display());
    let file = tokio::fs::File::open(audio_path.as_ref()).await?;
    let stream = processor.process_wave(file, cancel).await?;

    // The stream drains independently of the processor; retire the session
    // once the worker releases the pass gate.
    tokio::spawn(async move {
        let _ = processor.shutdown().await;
    });

    Ok(stream)
}
