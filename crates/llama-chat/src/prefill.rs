//! Prompt prefill.

use tracing::debug;

use crate::batch::TokenBatch;
use crate::engine::{Engine, Token};
use crate::error::Result;

/// Decode `tokens` at positions `0..len`, requesting logits only for the
/// final position.
///
/// The prompt goes to the engine in one call when it fits in `n_batch`,
/// otherwise in consecutive `n_batch`-sized chunks.
pub fn prefill<E: Engine + ?Sized>(engine: &mut E, tokens: &[Token]) -> Result<()> {
    let chunk_len = (engine.n_batch() as usize).max(1);
    let last = tokens.len().saturating_sub(1);

    for (c, chunk) in tokens.chunks(chunk_len).enumerate() {
        let offset = c * chunk_len;
        let mut batch = TokenBatch::with_capacity(chunk.len());
        for (i, &tok) in chunk.iter().enumerate() {
            let pos = offset + i;
            batch.add(tok, pos as i32, pos == last);
        }
        engine.decode(&batch)?;
    }

    debug!(n_prompt = tokens.len(), "Prefill complete");
    Ok(())
}
