use std::ffi::CString;
use std::path::Path;

use tracing::info;
use whisper_rs::whisper_rs_sys as sys;

use crate::engine::EngineError;
use crate::error::Result;
use crate::params::ContextParams;

/// A loaded whisper.cpp model.
///
/// Owns the native context without any decode state. Every pass creates and
/// frees its own state, so one model can back any number of passes, including
/// concurrent ones from separate processors.
pub struct WhisperModel {
    ctx: *mut sys::whisper_context,
}

// A loaded context is immutable; all per-pass mutability lives in the
// states created from it.
unsafe impl Send for WhisperModel {}
unsafe impl Sync for WhisperModel {}

impl WhisperModel {
    /// Load a ggml model file with default context parameters.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file_with_params(path, &ContextParams::default())
    }

    /// Load a ggml model file.
    pub fn from_file_with_params(path: impl AsRef<Path>, params: &ContextParams) -> Result<Self> {
        whisper_rs::install_logging_hooks();

        let path = path.as_ref();
        let c_path = CString::new(path.to_string_lossy().as_bytes()).map_err(|_| {
            EngineError::ModelLoad(format!("model path contains a NUL byte: {}", path.display()))
        })?;

        let mut native = unsafe { sys::whisper_context_default_params() };
        native.use_gpu = params.use_gpu;
        native.gpu_device = params.gpu_device;

        info!("Loading model: {}", path.display());
        let ctx =
            unsafe { sys::whisper_init_from_file_with_params_no_state(c_path.as_ptr(), native) };
        if ctx.is_null() {
            return Err(EngineError::ModelLoad(path.display().to_string()).into());
        }

        Ok(Self { ctx })
    }

    pub(super) fn as_ptr(&self) -> *mut sys::whisper_context {
        self.ctx
    }
}

impl Drop for WhisperModel {
    fn drop(&mut self) {
        unsafe { sys::whisper_free(self.ctx) };
    }
}
