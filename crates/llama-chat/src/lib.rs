//! Multi-turn chat sessions over llama.cpp.
//!
//! A [`ChatSession`] owns the conversation history and an [`Engine`]. Each
//! turn renders the history with the model's chat template, tokenizes it,
//! prefills the engine and then samples, streams and decodes one token at a
//! time until an end-of-generation token, `max_tokens`, or a full context.
//!
//! The llama.cpp engine is compiled in with the `llama` feature; the
//! [`mock`] engine is always available for tests.

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod generate;
#[cfg(feature = "llama")]
pub mod llama;
pub mod mock;
pub mod prefill;
pub mod prompt;
pub mod sampler;
pub mod session;
pub mod shared;

pub use batch::TokenBatch;
pub use config::SessionConfig;
pub use engine::{ChatMessage, Engine, Role, SamplingParams, Token};
pub use error::{ChatError, Result};
pub use generate::{FinishReason, GenerateEvent, Reply, TurnOptions};
pub use session::ChatSession;
pub use shared::SharedChatSession;
