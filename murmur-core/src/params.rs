//! Decode and context parameters for inference passes

use serde::{Deserialize, Serialize};

/// Token sampling strategy for decoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SamplingStrategy {
    /// Greedy decoding, keeping the best of `best_of` candidates
    Greedy { best_of: i32 },

    /// Beam search with `beam_size` beams
    BeamSearch { beam_size: i32, patience: f32 },
}

impl Default for SamplingStrategy {
    fn default() -> Self {
        SamplingStrategy::Greedy { best_of: 5 }
    }
}

/// Parameters for one full decode pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeParams {
    /// Sampling strategy
    pub strategy: SamplingStrategy,

    /// Number of threads to use (None = backend default)
    pub threads: Option<usize>,

    /// Language code (e.g., "en", "es"), None for auto-detection
    pub language: Option<String>,

    /// Translate the result to English
    pub translate: bool,

    /// Do not carry decoder context between audio windows (backend default)
    pub no_context: bool,

    /// Maximum tokens of past text used as decoder context (None = backend
    /// default)
    pub max_text_ctx: Option<i32>,

    /// Start offset into the audio, in milliseconds
    pub offset_ms: u32,

    /// Length of audio to decode, in milliseconds (0 = to the end)
    pub duration_ms: u32,

    /// Compute token-level timestamps
    pub token_timestamps: bool,

    /// Temperature for sampling (0.0 = deterministic)
    pub temperature: f32,

    /// Suppress blank outputs at the beginning of a segment
    pub suppress_blank: bool,

    /// Suppress non-speech tokens (music, sound effects)
    pub suppress_non_speech: bool,

    /// Initial prompt fed to the decoder
    pub initial_prompt: Option<String>,

    /// Enable tinydiarize speaker-turn detection (requires a tdrz model)
    pub diarize: bool,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            strategy: SamplingStrategy::default(),
            threads: None, // Backend picks
            language: None, // Auto-detect
            translate: false,
            no_context: true,
            max_text_ctx: None,
            offset_ms: 0,
            duration_ms: 0,
            token_timestamps: false,
            temperature: 0.0,
            suppress_blank: true,
            suppress_non_speech: false,
            initial_prompt: None,
            diarize: false,
        }
    }
}

impl DecodeParams {
    /// Create parameters with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the language
    pub fn with_language<S: Into<String>>(mut self, language: S) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the number of threads
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Enable or disable translation to English
    pub fn with_translate(mut self, translate: bool) -> Self {
        self.translate = translate;
        self
    }

    /// Enable or disable speaker-turn detection
    pub fn with_diarize(mut self, diarize: bool) -> Self {
        self.diarize = diarize;
        self
    }

    /// Set the sampling strategy
    pub fn with_strategy(mut self, strategy: SamplingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the initial decoder prompt
    pub fn with_initial_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.initial_prompt = Some(prompt.into());
        self
    }
}

/// Parameters for loading a model context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextParams {
    /// Use GPU acceleration if the build supports it
    pub use_gpu: bool,

    /// GPU device index
    pub gpu_device: i32,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            use_gpu: true,
            gpu_device: 0,
        }
    }
}

impl ContextParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable GPU acceleration
    pub fn with_gpu(mut self, use_gpu: bool) -> Self {
        self.use_gpu = use_gpu;
        self
    }

    /// Select the GPU device
    pub fn with_gpu_device(mut self, device: i32) -> Self {
        self.gpu_device = device;
        self
    }
}
