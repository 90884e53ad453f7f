use tiktoken_rs::{CoreBPE, cl100k_base};
use tracing::warn;

use crate::application::ports::TokenCounter;

/// Token estimates with the cl100k_base encoding. Local models use other
/// tokenizers, so counts are estimates; the answer reserve absorbs the drift.
pub struct TiktokenCounter {
    bpe: Option<CoreBPE>,
}

impl TiktokenCounter {
    pub fn new() -> Self {
        match cl100k_base() {
            Ok(bpe) => Self { bpe: Some(bpe) },
            Err(e) => {
                warn!(
                    "Failed to load cl100k_base tokenizer, falling back to character estimate: {}",
                    e
                );
                Self { bpe: None }
            }
        }
    }
}

impl Default for TiktokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Roughly four characters per token for English text.
fn estimate_from_chars(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => estimate_from_chars(text),
        }
    }
}
