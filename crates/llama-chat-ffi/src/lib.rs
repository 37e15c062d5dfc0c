//! C ABI over [`llama_chat::ChatSession`].
//!
//! Sessions are opaque `LlmSession*` handles. Strings returned by
//! `llm_respond` / `llm_generate` belong to the caller and must be released
//! with `llm_free_string`. Turn failures come back as bracketed sentinel
//! strings such as `"[Error: tokenization failed]"`. A session must not be
//! used from two threads at once.
//!
//! See `include/llama_chat.h` for the C declarations.

use std::ffi::{CStr, CString, c_char, c_float, c_int, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;

use llama_chat::{ChatError, ChatSession, SessionConfig, TurnOptions};
use tracing::{error, warn};

/// Receives one NUL-terminated piece per generated token. The pointer is
/// only valid during the call.
pub type LlmTokenCallback = Option<unsafe extern "C" fn(piece: *const c_char, user_data: *mut c_void)>;

/// Opaque session handle.
pub struct LlmSession {
    session: ChatSession,
}

impl LlmSession {
    pub fn new(session: ChatSession) -> Self {
        Self { session }
    }

    /// Move onto the heap and hand ownership to the caller.
    pub fn into_raw(self) -> *mut LlmSession {
        Box::into_raw(Box::new(self))
    }
}

//  Boundary helpers

/// Run `f`; a panic is logged and replaced by `fallback()`.
fn guard<T>(fallback: impl FnOnce() -> T, f: impl FnOnce() -> T) -> T {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        error!("{}", ChatError::FfiPanic(msg));
        fallback()
    })
}

fn panic_sentinel() -> *mut c_char {
    to_c_string(ChatError::FfiPanic(String::new()).sentinel().into()).into_raw()
}

unsafe fn session_mut<'a>(s: *mut LlmSession) -> Option<&'a mut ChatSession> {
    unsafe { s.as_mut() }.map(|s| &mut s.session)
}

unsafe fn text_arg(p: *const c_char) -> Option<String> {
    if p.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
}

/// NUL-terminated copy of `bytes`, cut at the first interior NUL.
fn to_c_string(bytes: Vec<u8>) -> CString {
    CString::new(bytes).unwrap_or_else(|e| {
        let pos = e.nul_position();
        let mut bytes = e.into_vec();
        bytes.truncate(pos);
        CString::new(bytes).unwrap_or_default()
    })
}

fn turn(max_tokens: c_int, temperature: c_float) -> TurnOptions {
    TurnOptions {
        max_tokens: max_tokens.max(0) as u32,
        temperature,
    }
}

fn reply_or_sentinel(result: llama_chat::Result<llama_chat::Reply>) -> *mut c_char {
    let bytes = match result {
        Ok(reply) => reply.into_bytes(),
        Err(e) => {
            warn!("Turn failed: {e}");
            e.sentinel().as_bytes().to_vec()
        }
    };
    to_c_string(bytes).into_raw()
}

fn stream_turn(
    session: &mut ChatSession,
    opts: &TurnOptions,
    callback: LlmTokenCallback,
    user_data: *mut c_void,
) {
    let result = session.respond_stream(opts, |piece| {
        if let Some(cb) = callback {
            let piece = to_c_string(piece.to_vec());
            unsafe { cb(piece.as_ptr(), user_data) };
        }
    });
    if let Err(e) = result {
        warn!("Streaming turn failed: {e}");
    }
}

fn open_session(path: *const c_char, config: &SessionConfig) -> *mut LlmSession {
    let Some(path) = (unsafe { text_arg(path) }) else {
        warn!("llm_open called with a null path");
        return ptr::null_mut();
    };
    match ChatSession::open(&path, config) {
        Ok(session) => LlmSession::new(session).into_raw(),
        Err(e) => {
            warn!("{e}");
            ptr::null_mut()
        }
    }
}

//  Lifecycle

/// Load a model with the default configuration. Null on failure.
///
/// # Safety
/// `model_path` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llm_open(model_path: *const c_char) -> *mut LlmSession {
    guard(ptr::null_mut, || {
        open_session(model_path, &SessionConfig::default())
    })
}

/// Load a model configured by a JSON object (`n_ctx`, `n_batch`,
/// `n_threads`, `n_gpu_layers`, `seed`; missing keys keep their defaults).
/// A null `config_json` means defaults. Null on failure.
///
/// # Safety
/// Both arguments must be null or valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llm_open_with_config(
    model_path: *const c_char,
    config_json: *const c_char,
) -> *mut LlmSession {
    guard(ptr::null_mut, || {
        let config = match unsafe { text_arg(config_json) } {
            None => SessionConfig::default(),
            Some(json) => match SessionConfig::from_json(&json) {
                Ok(c) => c,
                Err(e) => {
                    warn!("{e}");
                    return ptr::null_mut();
                }
            },
        };
        open_session(model_path, &config)
    })
}

/// Release a session: context first, then model.
///
/// # Safety
/// `s` must be null or a handle from `llm_open*` not yet closed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llm_close(s: *mut LlmSession) {
    if s.is_null() {
        return;
    }
    guard(|| (), || drop(unsafe { Box::from_raw(s) }));
}

//  History & cache

/// # Safety
/// `s` must be null or a live session handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llm_clear_history(s: *mut LlmSession) {
    guard(|| (), || {
        if let Some(session) = unsafe { session_mut(s) } {
            session.clear_history();
        }
    })
}

/// # Safety
/// `s` must be null or a live session handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llm_kv_clear(s: *mut LlmSession) {
    guard(|| (), || {
        if let Some(session) = unsafe { session_mut(s) } {
            session.kv_clear();
        }
    })
}

/// Tokens in the key-value cache; 0 for a null handle.
///
/// # Safety
/// `s` must be null or a live session handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llm_kv_tokens(s: *mut LlmSession) -> c_int {
    guard(|| 0, || unsafe { session_mut(s) }.map_or(0, |session| session.kv_tokens()))
}

/// # Safety
/// `s` must be null or a live session handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llm_history_len(s: *mut LlmSession) -> c_int {
    guard(|| 0, || {
        unsafe { session_mut(s) }.map_or(0, |session| session.history().len() as c_int)
    })
}

/// Append a user message (copied).
///
/// # Safety
/// `s` must be null or a live session handle; `text` null or a valid
/// NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llm_append_user(s: *mut LlmSession, text: *const c_char) {
    guard(|| (), || {
        if let (Some(session), Some(text)) = unsafe { (session_mut(s), text_arg(text)) } {
            session.append_user(text);
        }
    })
}

/// # Safety
/// As for `llm_append_user`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llm_append_system(s: *mut LlmSession, text: *const c_char) {
    guard(|| (), || {
        if let (Some(session), Some(text)) = unsafe { (session_mut(s), text_arg(text)) } {
            session.append_system(text);
        }
    })
}

/// # Safety
/// As for `llm_append_user`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llm_append_assistant(s: *mut LlmSession, text: *const c_char) {
    guard(|| (), || {
        if let (Some(session), Some(text)) = unsafe { (session_mut(s), text_arg(text)) } {
            session.append_assistant(text);
        }
    })
}

//  Turns

/// Reply to the current history. The reply is not added to the history.
/// Release the result with `llm_free_string`. Null for a null handle.
///
/// # Safety
/// `s` must be null or a live session handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llm_respond(
    s: *mut LlmSession,
    max_tokens: c_int,
    temperature: c_float,
) -> *mut c_char {
    guard(panic_sentinel, || {
        let Some(session) = (unsafe { session_mut(s) }) else {
            return ptr::null_mut();
        };
        reply_or_sentinel(session.respond(&turn(max_tokens, temperature)))
    })
}

/// Reply to the current history, handing each piece to `callback` before
/// the next token is decoded. Failures are logged, not delivered.
///
/// # Safety
/// `s` must be null or a live session handle; `callback` must be safe to
/// call with `user_data`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llm_respond_stream(
    s: *mut LlmSession,
    max_tokens: c_int,
    temperature: c_float,
    callback: LlmTokenCallback,
    user_data: *mut c_void,
) {
    guard(|| (), || {
        if let Some(session) = unsafe { session_mut(s) } {
            stream_turn(session, &turn(max_tokens, temperature), callback, user_data);
        }
    })
}

/// Clear the history, append `prompt` as the only user message and reply.
///
/// # Safety
/// As for `llm_append_user`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llm_generate(
    s: *mut LlmSession,
    prompt: *const c_char,
    max_tokens: c_int,
    temperature: c_float,
) -> *mut c_char {
    unsafe {
        llm_clear_history(s);
        llm_append_user(s, prompt);
        llm_respond(s, max_tokens, temperature)
    }
}

/// Streaming variant of `llm_generate`.
///
/// # Safety
/// As for `llm_append_user` and `llm_respond_stream`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llm_generate_stream(
    s: *mut LlmSession,
    prompt: *const c_char,
    max_tokens: c_int,
    temperature: c_float,
    callback: LlmTokenCallback,
    user_data: *mut c_void,
) {
    unsafe {
        llm_clear_history(s);
        llm_append_user(s, prompt);
        llm_respond_stream(s, max_tokens, temperature, callback, user_data);
    }
}

/// Release a string returned by this library. Null is ignored.
///
/// # Safety
/// `p` must be null or a pointer returned by `llm_respond`/`llm_generate`
/// that has not been freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llm_free_string(p: *mut c_char) {
    if !p.is_null() {
        drop(unsafe { CString::from_raw(p) });
    }
}

/// Send library and llama.cpp logs to stderr, filtered by `RUST_LOG`
/// (default `warn`). Later calls are no-ops.
#[unsafe(no_mangle)]
pub extern "C" fn llm_init_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use llama_chat::Engine;
    use llama_chat::mock::MockEngine;

    use super::*;

    fn mock_session(n_ctx: u32) -> *mut LlmSession {
        let engine: Box<dyn Engine + Send> = Box::new(MockEngine::new(n_ctx));
        LlmSession::new(ChatSession::with_engine(engine, &SessionConfig::default())).into_raw()
    }

    /// Copy and free a string returned by the library.
    fn take(p: *mut c_char) -> String {
        assert!(!p.is_null());
        let text = unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned();
        unsafe { llm_free_string(p) };
        text
    }

    unsafe extern "C" fn collect(piece: *const c_char, user_data: *mut c_void) {
        let out = unsafe { &mut *(user_data as *mut Vec<u8>) };
        out.extend_from_slice(unsafe { CStr::from_ptr(piece) }.to_bytes());
    }

    #[test]
    fn missing_model_gives_a_null_handle() {
        let path = CString::new("/nonexistent/model.gguf").unwrap();
        assert!(unsafe { llm_open(path.as_ptr()) }.is_null());
        assert!(unsafe { llm_open(ptr::null()) }.is_null());
    }

    #[test]
    fn malformed_config_gives_a_null_handle() {
        let path = CString::new("/nonexistent/model.gguf").unwrap();
        let json = CString::new("{ not json").unwrap();
        assert!(unsafe { llm_open_with_config(path.as_ptr(), json.as_ptr()) }.is_null());
    }

    #[test]
    fn null_handles_are_ignored() {
        let null = ptr::null_mut();
        let text = CString::new("hi").unwrap();
        unsafe {
            llm_append_user(null, text.as_ptr());
            llm_clear_history(null);
            llm_kv_clear(null);
            assert_eq!(llm_kv_tokens(null), 0);
            assert_eq!(llm_history_len(null), 0);
            assert!(llm_respond(null, 8, 0.0).is_null());
            llm_respond_stream(null, 8, 0.0, Some(collect), ptr::null_mut());
            llm_free_string(ptr::null_mut());
            llm_close(null);
        }
    }

    #[test]
    fn respond_returns_text_and_leaves_history_alone() {
        let s = mock_session(256);
        let text = CString::new("hello").unwrap();
        unsafe {
            llm_append_user(s, text.as_ptr());
            let reply = take(llm_respond(s, 64, 0.0));
            assert!(!reply.is_empty());
            assert_eq!(llm_history_len(s), 1);
            assert!(llm_kv_tokens(s) > 0);

            llm_clear_history(s);
            assert_eq!(llm_kv_tokens(s), 0);
            assert_eq!(llm_history_len(s), 0);
            llm_close(s);
        }
    }

    #[test]
    fn streamed_pieces_match_the_direct_reply() {
        let a = mock_session(256);
        let b = mock_session(256);
        let text = CString::new("stream me").unwrap();
        let mut streamed: Vec<u8> = Vec::new();
        unsafe {
            llm_append_user(a, text.as_ptr());
            llm_respond_stream(
                a,
                64,
                0.0,
                Some(collect),
                &mut streamed as *mut Vec<u8> as *mut c_void,
            );

            llm_append_user(b, text.as_ptr());
            let direct = take(llm_respond(b, 64, 0.0));
            assert_eq!(String::from_utf8(streamed).unwrap(), direct);
            llm_close(a);
            llm_close(b);
        }
    }

    #[test]
    fn generate_replaces_the_history() {
        let a = mock_session(256);
        let b = mock_session(256);
        let old = CString::new("old").unwrap();
        let prompt = CString::new("fresh").unwrap();
        unsafe {
            llm_append_user(a, old.as_ptr());
            let via_generate = take(llm_generate(a, prompt.as_ptr(), 16, 0.0));
            assert_eq!(llm_history_len(a), 1);

            llm_append_user(b, prompt.as_ptr());
            let via_steps = take(llm_respond(b, 16, 0.0));
            assert_eq!(via_generate, via_steps);

            let mut streamed: Vec<u8> = Vec::new();
            llm_generate_stream(
                b,
                prompt.as_ptr(),
                16,
                0.0,
                Some(collect),
                &mut streamed as *mut Vec<u8> as *mut c_void,
            );
            assert_eq!(String::from_utf8(streamed).unwrap(), via_steps);
            llm_close(a);
            llm_close(b);
        }
    }

    #[test]
    fn failures_come_back_as_sentinels() {
        let s = mock_session(32);
        unsafe {
            assert_eq!(take(llm_respond(s, 8, 0.0)), "[Error: chat history is empty]");

            let long = CString::new("x".repeat(64)).unwrap();
            llm_append_user(s, long.as_ptr());
            assert_eq!(
                take(llm_respond(s, 8, 0.0)),
                "[Error: prompt exceeds context window]"
            );
            llm_close(s);
        }
    }

    #[test]
    fn negative_max_tokens_generates_nothing() {
        let s = mock_session(256);
        let text = CString::new("hi").unwrap();
        unsafe {
            llm_append_user(s, text.as_ptr());
            assert_eq!(take(llm_respond(s, -5, 0.0)), "");
            llm_close(s);
        }
    }

    #[test]
    fn roles_are_appended_in_order() {
        let s = mock_session(256);
        let sys = CString::new("be brief").unwrap();
        let user = CString::new("hi").unwrap();
        let assistant = CString::new("hello").unwrap();
        unsafe {
            llm_append_system(s, sys.as_ptr());
            llm_append_user(s, user.as_ptr());
            llm_append_assistant(s, assistant.as_ptr());
            assert_eq!(llm_history_len(s), 3);
            llm_close(s);
        }
    }

    #[test]
    fn interior_nul_truncates_the_c_string() {
        assert_eq!(to_c_string(b"ab\0cd".to_vec()).as_bytes(), b"ab");
        assert_eq!(to_c_string(b"plain".to_vec()).as_bytes(), b"plain");
    }
}
