use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Failed to load model from '{path}': {reason}")]
    ModelLoadFailed { path: String, reason: String },

    #[error("Failed to create context: {0}")]
    ContextCreationFailed(String),

    #[error("Built without the llama.cpp backend (enable the `llama` feature)")]
    BackendUnavailable,

    #[error("Invalid session config: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    #[error("Chat history is empty")]
    EmptyHistory,

    #[error("Chat template failed: {0}")]
    Template(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Prompt of {prompt_tokens} tokens exceeds the context window of {n_ctx}")]
    ContextOverflow { prompt_tokens: usize, n_ctx: u32 },

    #[error("Decode failed with code {0}")]
    Decode(i32),

    #[error("FFI panic: {0}")]
    FfiPanic(String),
}

impl ChatError {
    /// Bracketed text handed back across the C ABI in place of a reply.
    pub fn sentinel(&self) -> &'static str {
        match self {
            Self::ModelLoadFailed { .. }
            | Self::ContextCreationFailed(_)
            | Self::BackendUnavailable
            | Self::InvalidConfig(_) => "[Error: model not loaded]",
            Self::EmptyHistory => "[Error: chat history is empty]",
            Self::Template(_) => "[Error: chat template failed]",
            Self::Tokenization(_) => "[Error: tokenization failed]",
            Self::ContextOverflow { .. } => "[Error: prompt exceeds context window]",
            Self::Decode(_) => "[Error: decode failed]",
            Self::FfiPanic(_) => "[Error: internal panic]",
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
