//! Tokenization / detokenization into caller-owned buffers.

use crate::engine::Token;

/// Tokenize `text` into `buf`. Negative when `buf` is too small.
pub fn tokenize_into(
    vocab: *const llama_sys::llama_vocab,
    text: &[u8],
    buf: &mut [Token],
    add_special: bool,
    parse_special: bool,
) -> i32 {
    let Ok(text_len) = i32::try_from(text.len()) else {
        return i32::MIN;
    };
    unsafe {
        llama_sys::llama_tokenize(
            vocab,
            text.as_ptr() as *const std::ffi::c_char,
            text_len,
            buf.as_mut_ptr(),
            buf.len().min(i32::MAX as usize) as i32,
            add_special,
            parse_special,
        )
    }
}

/// Write the piece of `token` into `buf`. Negated required size when `buf`
/// is too small.
pub fn token_to_piece_into(
    vocab: *const llama_sys::llama_vocab,
    token: Token,
    buf: &mut [u8],
    special: bool,
) -> i32 {
    unsafe {
        llama_sys::llama_token_to_piece(
            vocab,
            token,
            buf.as_mut_ptr() as *mut std::ffi::c_char,
            buf.len().min(i32::MAX as usize) as i32,
            0, // lstrip
            special,
        )
    }
}

pub fn is_eog(vocab: *const llama_sys::llama_vocab, token: Token) -> bool {
    unsafe { llama_sys::llama_vocab_is_eog(vocab, token) }
}
