//! Chat session: conversation history bound to one loaded engine.

use std::ops::ControlFlow;
use std::path::Path;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::engine::{ChatMessage, Engine, Role};
use crate::error::Result;
use crate::generate::{self, GenerateEvent, Reply, TurnOptions};
use crate::prefill::prefill;
use crate::prompt;

/// One conversation over one engine.
///
/// Methods take `&mut self`; a session is driven by one thread at a time.
/// Dropping the session releases the engine (context, then model).
pub struct ChatSession<E: Engine = Box<dyn Engine + Send>> {
    engine: E,
    history: Vec<ChatMessage>,
    context_limit: u32,
    seed: u32,
}

impl ChatSession {
    /// Load the model at `path` and create its inference context.
    pub fn open(path: impl AsRef<Path>, config: &SessionConfig) -> Result<Self> {
        #[cfg(feature = "llama")]
        {
            let engine = crate::llama::LlamaEngine::load(path.as_ref(), config)?;
            Ok(Self::with_engine(Box::new(engine), config))
        }
        #[cfg(not(feature = "llama"))]
        {
            let _ = (path, config);
            Err(crate::error::ChatError::BackendUnavailable)
        }
    }
}

impl<E: Engine> ChatSession<E> {
    pub fn with_engine(engine: E, config: &SessionConfig) -> Self {
        let context_limit = engine.n_ctx();
        info!(context_limit, seed = config.seed, "Chat session ready");
        Self {
            engine,
            history: Vec::new(),
            context_limit,
            seed: config.seed,
        }
    }

    //  Accessors

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn context_limit(&self) -> u32 {
        self.context_limit
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    //  History

    pub fn push(&mut self, message: ChatMessage) {
        self.history.push(message);
    }

    pub fn append_user(&mut self, text: impl Into<String>) {
        self.push(ChatMessage::new(Role::User, text));
    }

    pub fn append_system(&mut self, text: impl Into<String>) {
        self.push(ChatMessage::new(Role::System, text));
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.push(ChatMessage::new(Role::Assistant, text));
    }

    /// Drop all messages and the key-value cache with them.
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.engine.kv_clear();
        debug!("History and KV cache cleared");
    }

    //  KV cache

    pub fn kv_tokens(&self) -> i32 {
        self.engine.kv_tokens()
    }

    /// Clear the key-value cache, keeping the history.
    pub fn kv_clear(&mut self) {
        self.engine.kv_clear();
        debug!("KV cache cleared");
    }

    //  Turns

    /// Generate the assistant's reply to the current history.
    ///
    /// The reply is returned, not appended to the history.
    pub fn respond(&mut self, opts: &TurnOptions) -> Result<Reply> {
        self.respond_with(opts, |_| ControlFlow::Continue(()))
    }

    /// Like [`ChatSession::respond`], handing each piece to `on_piece` as it
    /// is produced.
    pub fn respond_stream<F>(&mut self, opts: &TurnOptions, mut on_piece: F) -> Result<Reply>
    where
        F: FnMut(&[u8]),
    {
        self.respond_with(opts, |p| {
            on_piece(p);
            ControlFlow::Continue(())
        })
    }

    /// Run a turn with a sink that may stop generation early.
    ///
    /// The cache is cleared before the prompt is prefilled, so every turn
    /// starts from the full rendered history.
    pub fn respond_with<F>(&mut self, opts: &TurnOptions, mut sink: F) -> Result<Reply>
    where
        F: FnMut(&[u8]) -> ControlFlow<()>,
    {
        let tokens = prompt::build(&self.engine, &self.history)?;

        self.engine.kv_clear();
        prefill(&mut self.engine, &tokens)?;

        generate::decode_loop(&mut self.engine, tokens.len(), opts, self.seed, &mut sink)
    }

    /// Blocking turn that reports progress over `tx`.
    ///
    /// Call from a blocking thread. Generation stops early once the receiver
    /// is dropped.
    pub fn respond_events(
        &mut self,
        opts: &TurnOptions,
        tx: mpsc::Sender<GenerateEvent>,
    ) -> Result<Reply> {
        let result = self.respond_with(opts, |p| {
            match tx.blocking_send(GenerateEvent::Token(p.to_vec())) {
                Ok(()) => ControlFlow::Continue(()),
                Err(_) => {
                    debug!("Generation cancelled (receiver dropped)");
                    ControlFlow::Break(())
                }
            }
        });

        let event = match &result {
            Ok(reply) => GenerateEvent::Done {
                finish_reason: reply.finish_reason,
                prompt_tokens: reply.prompt_tokens,
                completion_tokens: reply.completion_tokens,
            },
            Err(e) => GenerateEvent::Error(e.to_string()),
        };
        let _ = tx.blocking_send(event);
        result
    }

    /// Start over with a single user message and respond to it.
    pub fn generate(&mut self, prompt: impl Into<String>, opts: &TurnOptions) -> Result<Reply> {
        self.clear_history();
        self.append_user(prompt);
        self.respond(opts)
    }

    /// Streaming variant of [`ChatSession::generate`].
    pub fn generate_stream<F>(
        &mut self,
        prompt: impl Into<String>,
        opts: &TurnOptions,
        on_piece: F,
    ) -> Result<Reply>
    where
        F: FnMut(&[u8]),
    {
        self.clear_history();
        self.append_user(prompt);
        self.respond_stream(opts, on_piece)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::mock::MockEngine;

    fn session(n_ctx: u32) -> ChatSession<MockEngine> {
        ChatSession::with_engine(MockEngine::new(n_ctx), &SessionConfig::default())
    }

    #[test]
    fn context_limit_comes_from_the_engine() {
        let s = session(300);
        assert_eq!(s.context_limit(), 300);
        assert_eq!(s.seed(), crate::config::DEFAULT_SEED);
    }

    #[test]
    fn history_keeps_append_order() {
        let mut s = session(64);
        s.append_system("sys");
        s.append_user("u1");
        s.append_assistant("a1");
        s.append_user("u2");
        let roles: Vec<Role> = s.history().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(s.history()[3].content, "u2");
    }

    #[test]
    fn respond_does_not_append_the_reply() {
        let mut s = session(256);
        s.append_user("hi");
        s.respond(&TurnOptions::default()).unwrap();
        assert_eq!(s.history().len(), 1);
    }

    #[test]
    fn respond_on_empty_history_fails_without_touching_the_engine() {
        let mut s = session(64);
        let err = s.respond(&TurnOptions::default()).unwrap_err();
        assert!(matches!(err, ChatError::EmptyHistory));
        assert_eq!(s.engine().decode_calls(), 0);
    }

    #[test]
    fn each_turn_starts_from_an_empty_cache() {
        let mut s = session(512);
        s.append_user("one");
        s.respond(&TurnOptions::default()).unwrap();
        let clears = s.engine().kv_clears();
        s.append_user("two");
        let reply = s.respond(&TurnOptions::default()).unwrap();
        assert_eq!(s.engine().kv_clears(), clears + 1);
        assert_eq!(
            s.kv_tokens() as u32,
            reply.prompt_tokens + reply.completion_tokens
        );
    }

    #[test]
    fn kv_clear_keeps_history() {
        let mut s = session(256);
        s.append_user("hi");
        s.respond(&TurnOptions::default()).unwrap();
        s.kv_clear();
        assert_eq!(s.kv_tokens(), 0);
        assert_eq!(s.history().len(), 1);
    }

    #[test]
    fn events_end_with_done() {
        let mut s = session(256);
        s.append_user("ab");
        let (tx, mut rx) = mpsc::channel(1024);
        let opts = TurnOptions {
            max_tokens: 3,
            temperature: 0.0,
        };
        let reply = s.respond_events(&opts, tx).unwrap();

        let mut streamed = Vec::new();
        let mut done = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                GenerateEvent::Token(p) => streamed.extend(p),
                GenerateEvent::Done { finish_reason, .. } => done = Some(finish_reason),
                GenerateEvent::Error(e) => panic!("unexpected error event: {e}"),
            }
        }
        assert_eq!(streamed, reply.bytes);
        assert_eq!(done, Some(reply.finish_reason));
    }

    #[test]
    fn dropped_receiver_cancels_the_turn() {
        let mut s = session(256);
        s.append_user("a long enough prompt");
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let reply = s.respond_events(&TurnOptions::default(), tx).unwrap();
        assert_eq!(reply.finish_reason, generate::FinishReason::Cancelled);
        assert_eq!(reply.completion_tokens, 1);
    }

    #[test]
    fn failed_turn_reports_an_error_event() {
        let mut engine = MockEngine::new(256);
        engine.fail_template();
        let mut s = ChatSession::with_engine(engine, &SessionConfig::default());
        s.append_user("hi");
        let (tx, mut rx) = mpsc::channel(4);
        assert!(s.respond_events(&TurnOptions::default(), tx).is_err());
        assert!(matches!(rx.try_recv(), Ok(GenerateEvent::Error(_))));
    }
}
