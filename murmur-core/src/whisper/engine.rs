//! `SpeechEngine` implementation over whisper.cpp's full-pass API.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::ptr;
use std::sync::Arc;

use tracing::debug;
use whisper_rs::whisper_rs_sys as sys;

use crate::engine::{EngineError, PassCallbacks, SegmentSource, SpeechEngine};
use crate::params::{DecodeParams, SamplingStrategy};

use super::WhisperModel;

/// Runs full decode passes against a shared [`WhisperModel`].
pub struct WhisperEngine {
    model: Arc<WhisperModel>,
}

impl WhisperEngine {
    pub fn new(model: Arc<WhisperModel>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Arc<WhisperModel> {
        &self.model
    }
}

/// Per-pass bridge between the C callbacks and a [`PassCallbacks`] table.
/// Lives on the `run_pass` stack for the duration of the native call.
struct PassRelay {
    callbacks: PassCallbacks,
}

/// Frees the pass state on every exit path.
struct StateGuard(*mut sys::whisper_state);

impl Drop for StateGuard {
    fn drop(&mut self) {
        unsafe { sys::whisper_free_state(self.0) };
    }
}

impl SpeechEngine for WhisperEngine {
    fn run_pass(
        &self,
        samples: &[f32],
        params: &DecodeParams,
        callbacks: PassCallbacks,
    ) -> std::result::Result<(), EngineError> {
        // The C strings handed to the native params must outlive the full
        // call, so they are bound here rather than inside the setup below.
        let language = match &params.language {
            Some(lang) => Some(CString::new(lang.as_str()).map_err(|_| {
                EngineError::Fault(format!("language contains a NUL byte: {lang:?}"))
            })?),
            None => None,
        };
        let initial_prompt = match &params.initial_prompt {
            Some(prompt) => Some(CString::new(prompt.as_str()).map_err(|_| {
                EngineError::Fault("initial prompt contains a NUL byte".to_string())
            })?),
            None => None,
        };

        let strategy = match params.strategy {
            SamplingStrategy::Greedy { .. } => sys::whisper_sampling_strategy_WHISPER_SAMPLING_GREEDY,
            SamplingStrategy::BeamSearch { .. } => {
                sys::whisper_sampling_strategy_WHISPER_SAMPLING_BEAM_SEARCH
            }
        };
        let mut fp = unsafe { sys::whisper_full_default_params(strategy) };
        match params.strategy {
            SamplingStrategy::Greedy { best_of } => fp.greedy.best_of = best_of,
            SamplingStrategy::BeamSearch { beam_size, patience } => {
                fp.beam_search.beam_size = beam_size;
                fp.beam_search.patience = patience;
            }
        }

        if let Some(threads) = params.threads {
            fp.n_threads = threads as c_int;
        }
        fp.translate = params.translate;
        fp.no_context = params.no_context;
        if let Some(max_text_ctx) = params.max_text_ctx {
            fp.n_max_text_ctx = max_text_ctx;
        }
        fp.offset_ms = params.offset_ms as c_int;
        fp.duration_ms = params.duration_ms as c_int;
        fp.token_timestamps = params.token_timestamps;
        fp.temperature = params.temperature;
        fp.suppress_blank = params.suppress_blank;
        fp.suppress_nst = params.suppress_non_speech;
        fp.tdrz_enable = params.diarize;
        // Null means auto-detect; the native default is a static "en".
        fp.language = language.as_ref().map_or(ptr::null(), |c| c.as_ptr());
        fp.initial_prompt = initial_prompt.as_ref().map_or(ptr::null(), |c| c.as_ptr());

        // All native output goes through the logging hooks instead.
        fp.print_special = false;
        fp.print_progress = false;
        fp.print_realtime = false;
        fp.print_timestamps = false;

        let relay = PassRelay { callbacks };
        let relay_ptr = &relay as *const PassRelay as *mut c_void;
        fp.new_segment_callback = Some(new_segment_trampoline);
        fp.new_segment_callback_user_data = relay_ptr;
        fp.progress_callback = Some(progress_trampoline);
        fp.progress_callback_user_data = relay_ptr;
        fp.encoder_begin_callback = Some(encoder_begin_trampoline);
        fp.encoder_begin_callback_user_data = relay_ptr;
        fp.abort_callback = Some(abort_trampoline);
        fp.abort_callback_user_data = relay_ptr;

        let state = unsafe { sys::whisper_init_state(self.model.as_ptr()) };
        if state.is_null() {
            return Err(EngineError::StateInit);
        }
        let _state_guard = StateGuard(state);

        debug!(
            "Running full pass over {} samples for session {}",
            samples.len(),
            callbacks.session
        );
        let status = unsafe {
            sys::whisper_full_with_state(
                self.model.as_ptr(),
                state,
                fp,
                samples.as_ptr(),
                samples.len() as c_int,
            )
        };
        if status != 0 {
            return Err(EngineError::Inference(status));
        }

        Ok(())
    }
}

// The trampolines run on whisper.cpp's calling thread. A panic inside them
// (such as a session registry miss) hits the C boundary and aborts the
// process instead of unwinding into native frames.

unsafe extern "C" fn encoder_begin_trampoline(
    _ctx: *mut sys::whisper_context,
    _state: *mut sys::whisper_state,
    user_data: *mut c_void,
) -> bool {
    let relay = &*(user_data as *const PassRelay);
    (relay.callbacks.on_encoder_begin)(relay.callbacks.session)
}

unsafe extern "C" fn progress_trampoline(
    _ctx: *mut sys::whisper_context,
    _state: *mut sys::whisper_state,
    progress: c_int,
    user_data: *mut c_void,
) {
    let relay = &*(user_data as *const PassRelay);
    (relay.callbacks.on_progress)(relay.callbacks.session, progress);
}

unsafe extern "C" fn new_segment_trampoline(
    _ctx: *mut sys::whisper_context,
    state: *mut sys::whisper_state,
    n_new: c_int,
    user_data: *mut c_void,
) {
    let relay = &*(user_data as *const PassRelay);
    let source = StateSegments { state };
    (relay.callbacks.on_new_segment)(relay.callbacks.session, &source, n_new);
}

unsafe extern "C" fn abort_trampoline(user_data: *mut c_void) -> bool {
    let relay = &*(user_data as *const PassRelay);
    (relay.callbacks.on_abort)(relay.callbacks.session)
}

/// [`SegmentSource`] over a live pass state. Handed out only inside the
/// new-segment callback, which bounds its lifetime to the state's.
struct StateSegments {
    state: *mut sys::whisper_state,
}

impl SegmentSource for StateSegments {
    fn segment_count(&self) -> i32 {
        unsafe { sys::whisper_full_n_segments_from_state(self.state) }
    }

    fn segment_text(&self, segment: i32) -> String {
        let ptr = unsafe { sys::whisper_full_get_segment_text_from_state(self.state, segment) };
        c_str_to_string(ptr)
    }

    fn segment_start_cs(&self, segment: i32) -> i64 {
        unsafe { sys::whisper_full_get_segment_t0_from_state(self.state, segment) }
    }

    fn segment_end_cs(&self, segment: i32) -> i64 {
        unsafe { sys::whisper_full_get_segment_t1_from_state(self.state, segment) }
    }

    fn token_count(&self, segment: i32) -> i32 {
        unsafe { sys::whisper_full_n_tokens_from_state(self.state, segment) }
    }

    fn token_probability(&self, segment: i32, token: i32) -> f32 {
        unsafe { sys::whisper_full_get_token_p_from_state(self.state, segment, token) }
    }

    fn language(&self) -> String {
        let id = unsafe { sys::whisper_full_lang_id_from_state(self.state) };
        if id < 0 {
            return String::new();
        }
        let ptr = unsafe { sys::whisper_lang_str(id) };
        c_str_to_string(ptr)
    }

    fn speaker_turn_next(&self, segment: i32) -> bool {
        unsafe {
            sys::whisper_full_get_segment_speaker_turn_next_from_state(self.state, segment)
        }
    }
}

fn c_str_to_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_c_strings_become_empty() {
        assert_eq!(c_str_to_string(ptr::null()), "");
    }

    #[test]
    fn c_strings_round_trip() {
        let owned = CString::new("hello").unwrap();
        assert_eq!(c_str_to_string(owned.as_ptr()), "hello");
    }
}
