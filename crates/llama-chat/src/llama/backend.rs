//! Process-wide llama.cpp setup.

use std::ffi::{CStr, c_char, c_void};
use std::sync::Once;

use tracing::{debug, error, info, warn};

static INIT: Once = Once::new();

/// Proof that [`LlamaBackend::init`] has run. The C backend lives until
/// process exit.
#[derive(Debug, Clone, Copy)]
pub struct LlamaBackend(());

impl LlamaBackend {
    /// Initialize llama.cpp once per process and route its log output into
    /// `tracing` under the `llama.cpp` target.
    pub fn init() -> Self {
        INIT.call_once(|| {
            unsafe {
                llama_sys::llama_backend_init();
                llama_sys::llama_log_set(Some(forward_log), std::ptr::null_mut());
            }
            info!("llama.cpp backend initialized");
            let system = unsafe { CStr::from_ptr(llama_sys::llama_print_system_info()) };
            debug!(system = %system.to_string_lossy(), "llama.cpp system info");
        });
        Self(())
    }
}

unsafe extern "C" fn forward_log(
    level: llama_sys::ggml_log_level,
    text: *const c_char,
    _user_data: *mut c_void,
) {
    if text.is_null() {
        return;
    }
    let text = unsafe { CStr::from_ptr(text) }.to_string_lossy();
    let text = text.trim_end();
    if text.is_empty() {
        return;
    }
    match level {
        llama_sys::ggml_log_level_GGML_LOG_LEVEL_ERROR => error!(target: "llama.cpp", "{text}"),
        llama_sys::ggml_log_level_GGML_LOG_LEVEL_WARN => warn!(target: "llama.cpp", "{text}"),
        llama_sys::ggml_log_level_GGML_LOG_LEVEL_INFO => info!(target: "llama.cpp", "{text}"),
        _ => debug!(target: "llama.cpp", "{text}"),
    }
}
