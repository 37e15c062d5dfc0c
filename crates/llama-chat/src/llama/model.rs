//! Loaded GGUF weights.

use std::ffi::{CStr, CString, c_char};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{ChatError, Result};

/// A `llama_model`, freed on drop after every context using it.
pub struct LlamaModel {
    raw: *mut llama_sys::llama_model,
}

// Safety: the model is immutable once loaded; contexts only read it.
unsafe impl Send for LlamaModel {}
unsafe impl Sync for LlamaModel {}

impl LlamaModel {
    /// Load `path`, offloading `n_gpu_layers` layers (-1 = all).
    pub fn load(path: &Path, n_gpu_layers: i32) -> Result<Self> {
        let fail = |reason: &str| ChatError::ModelLoadFailed {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };

        if !path.is_file() {
            return Err(fail("not a readable file"));
        }
        let c_path = path
            .to_str()
            .and_then(|p| CString::new(p).ok())
            .ok_or_else(|| fail("path is not valid UTF-8 without NUL bytes"))?;

        let mut params = unsafe { llama_sys::llama_model_default_params() };
        params.n_gpu_layers = n_gpu_layers;

        debug!(path = %path.display(), n_gpu_layers, "Loading model");
        let raw = unsafe { llama_sys::llama_model_load_from_file(c_path.as_ptr(), params) };
        if raw.is_null() {
            return Err(fail("unsupported or corrupt GGUF file"));
        }

        let model = Self { raw };
        info!(
            path = %path.display(),
            desc = %model.describe(),
            n_ctx_train = model.n_ctx_train(),
            "Model loaded"
        );
        Ok(model)
    }

    pub(crate) fn as_ptr(&self) -> *mut llama_sys::llama_model {
        self.raw
    }

    /// Vocabulary owned by the model.
    pub(crate) fn vocab(&self) -> *const llama_sys::llama_vocab {
        unsafe { llama_sys::llama_model_get_vocab(self.raw) }
    }

    /// Short description such as `"llama 8B Q4_K - Medium"`.
    pub fn describe(&self) -> String {
        let mut buf = [0u8; 128];
        let n = unsafe {
            llama_sys::llama_model_desc(self.raw, buf.as_mut_ptr() as *mut c_char, buf.len())
        };
        let n = usize::try_from(n).unwrap_or(0).min(buf.len());
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    /// Context length the model was trained with.
    pub fn n_ctx_train(&self) -> u32 {
        let n = unsafe { llama_sys::llama_model_n_ctx_train(self.raw) };
        u32::try_from(n).unwrap_or(0)
    }

    /// The chat template embedded in the GGUF metadata.
    pub fn chat_template(&self) -> Option<CString> {
        let p = unsafe { llama_sys::llama_model_chat_template(self.raw, std::ptr::null()) };
        (!p.is_null()).then(|| unsafe { CStr::from_ptr(p) }.to_owned())
    }
}

impl Drop for LlamaModel {
    fn drop(&mut self) {
        unsafe { llama_sys::llama_model_free(self.raw) }
        debug!("Model freed");
    }
}
