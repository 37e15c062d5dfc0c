//! Chat-template rendering.

use std::ffi::{CStr, CString};

use crate::engine::{ChatMessage, Role};

/// Render `messages` into `buf` with `template` (`None` = llama.cpp's
/// built-in default).
///
/// Returns the full rendered length, which may exceed `buf.len()`; negative
/// when the template cannot be applied or a message holds a NUL byte.
pub fn apply_into(
    template: Option<&CStr>,
    messages: &[ChatMessage],
    add_assistant: bool,
    buf: &mut [u8],
) -> i32 {
    // The CStrings must live until the call completes.
    let Ok(c_contents) = messages
        .iter()
        .map(|m| CString::new(m.content.as_str()))
        .collect::<Result<Vec<_>, _>>()
    else {
        return -1;
    };
    let c_roles: Vec<&'static CStr> = messages
        .iter()
        .map(|m| match m.role {
            Role::User => c"user",
            Role::Assistant => c"assistant",
            Role::System => c"system",
        })
        .collect();
    let c_msgs: Vec<llama_sys::llama_chat_message> = c_roles
        .iter()
        .zip(c_contents.iter())
        .map(|(r, c)| llama_sys::llama_chat_message {
            role: r.as_ptr(),
            content: c.as_ptr(),
        })
        .collect();

    let tmpl_ptr = template.map_or(std::ptr::null(), CStr::as_ptr);
    unsafe {
        llama_sys::llama_chat_apply_template(
            tmpl_ptr,
            c_msgs.as_ptr(),
            c_msgs.len(),
            add_assistant,
            buf.as_mut_ptr() as *mut std::ffi::c_char,
            buf.len().min(i32::MAX as usize) as i32,
        )
    }
}
