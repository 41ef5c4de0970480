//! Speech engine abstraction.
//!
//! `SpeechEngine` decouples the streaming processor from any specific native
//! backend (whisper.cpp behind the `whisper-cpp` feature, fakes in tests).
//! The boundary mirrors a C callback ABI: hooks are plain `fn` pointers that
//! receive a process-unique session id plus primitive arguments, never a
//! closure environment. Routing back to the owning processor goes through
//! the global session registry.

use thiserror::Error;

use crate::params::DecodeParams;

/// Failure surface of a native inference backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Failed to create inference state")]
    StateInit,

    /// The full decode call returned a non-zero status.
    #[error("Inference failed with status {0}")]
    Inference(i32),

    #[error("Engine fault: {0}")]
    Fault(String),
}

/// Read-only view of the segments an engine has decoded so far during one
/// pass. Implementations wrap whatever state handle the backend keeps; all
/// indices are backend indices, valid only for the duration of the callback
/// that handed the source out.
pub trait SegmentSource {
    /// Total number of segments decoded so far.
    fn segment_count(&self) -> i32;

    /// UTF-8 text of a segment, as produced by the backend (untrimmed).
    fn segment_text(&self, segment: i32) -> String;

    /// Segment start, in centiseconds from the start of the audio.
    fn segment_start_cs(&self, segment: i32) -> i64;

    /// Segment end, in centiseconds from the start of the audio.
    fn segment_end_cs(&self, segment: i32) -> i64;

    /// Number of tokens in a segment.
    fn token_count(&self, segment: i32) -> i32;

    /// Probability of one token of a segment.
    fn token_probability(&self, segment: i32, token: i32) -> f32;

    /// Language detected for the pass, e.g. "en".
    fn language(&self) -> String;

    /// Whether the speaker changes after this segment (tinydiarize models).
    fn speaker_turn_next(&self, segment: i32) -> bool;
}

/// Flat hook table an engine invokes from inside a pass.
///
/// Every hook receives the session id it was built with; implementations
/// resolve the owning processor through the session registry. The fields are
/// plain function pointers and cannot capture state.
#[derive(Clone, Copy)]
pub struct PassCallbacks {
    /// Process-unique id of the session this table belongs to.
    pub session: i64,
    /// Called once before encoding starts. Return `false` to refuse the pass.
    pub on_encoder_begin: fn(session: i64) -> bool,
    /// Called with overall pass progress, 0..=100.
    pub on_progress: fn(session: i64, progress: i32),
    /// Called after the backend commits `n_new` fresh segments.
    pub on_new_segment: fn(session: i64, source: &dyn SegmentSource, n_new: i32),
    /// Polled during decoding. Return `true` to abort the pass.
    pub on_abort: fn(session: i64) -> bool,
}

impl std::fmt::Debug for PassCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassCallbacks")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Contract for speech inference backends.
///
/// One call to [`run_pass`](SpeechEngine::run_pass) is one full inference
/// pass: the engine creates whatever per-pass state it needs, decodes the
/// whole sample buffer while firing the callbacks, and tears the state down
/// before returning. The call blocks for the duration of the pass and is
/// always made from a blocking-capable thread, never from an async task.
pub trait SpeechEngine: Send + Sync + 'static {
    fn run_pass(
        &self,
        samples: &[f32],
        params: &DecodeParams,
        callbacks: PassCallbacks,
    ) -> std::result::Result<(), EngineError>;
}
