//! whisper.cpp inference backend.
//!
//! Compiled only with the `whisper-cpp` feature so default builds carry no
//! native toolchain requirement. [`WhisperModel`] owns the loaded network,
//! [`WhisperEngine`] runs full decode passes against it.

mod engine;
mod model;

pub use engine::WhisperEngine;
pub use model::WhisperModel;

use std::ffi::CStr;

use whisper_rs::whisper_rs_sys as sys;

/// Capability summary of the compiled whisper.cpp build (SIMD, BLAS, GPU).
pub fn system_info() -> String {
    // Despite the name this returns a pointer to a static buffer.
    let ptr = unsafe { sys::whisper_print_system_info() };
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}
