//! Clonable, thread-safe session handle.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::SessionConfig;
use crate::error::Result;
use crate::generate::TurnOptions;
use crate::session::ChatSession;

/// A [`ChatSession`] behind `Arc<Mutex<_>>`.
///
/// Clones share one conversation. Each call holds the lock for the whole
/// turn, so turns on clones run one after another.
#[derive(Clone)]
pub struct SharedChatSession {
    inner: Arc<Mutex<ChatSession>>,
}

impl SharedChatSession {
    pub fn open(path: impl AsRef<Path>, config: &SessionConfig) -> Result<Self> {
        Ok(Self::from_session(ChatSession::open(path, config)?))
    }

    pub fn from_session(session: ChatSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Direct access for operations not mirrored here.
    pub fn lock(&self) -> MutexGuard<'_, ChatSession> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `message` as a user turn and return the reply text.
    pub fn send(&self, message: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let mut session = self.lock();
        session.append_user(message);
        let reply = session.respond(&TurnOptions {
            max_tokens,
            temperature,
        })?;
        Ok(reply.text())
    }

    /// Like [`SharedChatSession::send`], calling `on_text` with each chunk of
    /// complete UTF-8 text as it is generated.
    pub fn send_stream<F>(
        &self,
        message: &str,
        max_tokens: u32,
        temperature: f32,
        mut on_text: F,
    ) -> Result<String>
    where
        F: FnMut(&str),
    {
        let mut session = self.lock();
        session.append_user(message);

        let mut pending = Utf8Pending::default();
        let reply = session.respond_stream(
            &TurnOptions {
                max_tokens,
                temperature,
            },
            |piece| pending.push(piece, &mut on_text),
        )?;
        pending.flush(&mut on_text);
        Ok(reply.text())
    }

    pub fn clear(&self) {
        self.lock().clear_history();
    }

    pub fn token_count(&self) -> i32 {
        self.lock().kv_tokens()
    }
}

/// Holds back the tail of a UTF-8 sequence split across pieces.
#[derive(Default)]
struct Utf8Pending {
    buf: Vec<u8>,
}

impl Utf8Pending {
    fn push(&mut self, piece: &[u8], out: &mut impl FnMut(&str)) {
        self.buf.extend_from_slice(piece);
        match std::str::from_utf8(&self.buf) {
            Ok(text) => {
                out(text);
                self.buf.clear();
            }
            Err(e) if e.error_len().is_none() => {
                // incomplete sequence at the end: emit the valid prefix
                let valid = e.valid_up_to();
                if valid > 0 {
                    let text = String::from_utf8_lossy(&self.buf[..valid]).into_owned();
                    out(&text);
                    self.buf = self.buf.split_off(valid);
                }
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.buf).into_owned();
                out(&text);
                self.buf.clear();
            }
        }
    }

    fn flush(&mut self, out: &mut impl FnMut(&str)) {
        if !self.buf.is_empty() {
            let text = String::from_utf8_lossy(&self.buf).into_owned();
            out(&text);
            self.buf.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::mock::{MockEngine, text_tokens};

    fn shared(reply: &[u8]) -> SharedChatSession {
        let engine: Box<dyn Engine + Send> =
            Box::new(MockEngine::new(512).with_reply(text_tokens(reply)));
        SharedChatSession::from_session(ChatSession::with_engine(engine, &SessionConfig::default()))
    }

    #[test]
    fn clones_share_one_conversation() {
        let a = shared(b"ok");
        let b = a.clone();
        assert_eq!(a.send("hello", 8, 0.0).unwrap(), "ok");
        assert_eq!(b.lock().history().len(), 1);
        assert!(b.token_count() > 0);
        b.clear();
        assert_eq!(a.token_count(), 0);
        assert!(a.lock().history().is_empty());
    }

    #[test]
    fn multibyte_text_is_never_split() {
        let s = shared("héllo ✓".as_bytes());
        let mut chunks = Vec::new();
        let text = s.send_stream("hi", 64, 0.0, |t| chunks.push(t.to_string())).unwrap();
        assert_eq!(text, "héllo ✓");
        assert_eq!(chunks.concat(), text);
        // the mock emits one byte per token, so 'é' and '✓' arrive in pieces
        assert!(chunks.iter().any(|c| c == "é"));
        assert!(chunks.iter().any(|c| c == "✓"));
    }

    #[test]
    fn usable_from_another_thread() {
        let s = shared(b"x");
        let t = s.clone();
        let out = std::thread::spawn(move || t.send("ping", 4, 0.0))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(out, "x");
        assert_eq!(s.lock().history().len(), 1);
    }
}
