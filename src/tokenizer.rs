//! # Tokenizer
//!
//! The prompt engine only needs one capability from a tokenizer: turn a string
//! into a sequence of tokens so the sequence length can be measured. That
//! capability is the [`Tokenizer`] trait. The concrete implementation used by
//! the CLI is [`TiktokenTokenizer`], backed by `tiktoken_rs::cl100k_base`
//! (the same BPE the rest of the crate family counts with).
//!
//! Tokenizers are called dozens of times per prompt build (the budget search
//! re-tokenizes the whole template on every probe), so implementations must be
//! pure, synchronous and cheap to share. Strategies hold them behind an
//! [`Arc`](std::sync::Arc).
//!
//! ```rust
//! use awful_rp::tokenizer::{TiktokenTokenizer, Tokenizer};
//!
//! let tokenizer = TiktokenTokenizer::new().unwrap();
//! assert!(tokenizer.count("Hello there") > 0);
//! ```

use std::fmt;
use std::sync::Arc;

use tiktoken_rs::{CoreBPE, cl100k_base};

use crate::error::RpError;

/// Maps text to tokens. Only the length of the result is used by the engine.
pub trait Tokenizer: Send + Sync {
    /// Encode `text` into token ids.
    fn encode(&self, text: &str) -> Vec<u32>;

    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

/// `cl100k_base` BPE tokenizer. Special tokens in the text are encoded as
/// single tokens.
pub struct TiktokenTokenizer {
    bpe: CoreBPE,
}

impl TiktokenTokenizer {
    /// Load the `cl100k_base` ranks.
    ///
    /// # Errors
    /// Returns [`RpError::Tokenizer`] if the BPE tables cannot be built.
    pub fn new() -> Result<Self, RpError> {
        let bpe = cl100k_base().map_err(|e| RpError::Tokenizer(e.to_string()))?;
        Ok(Self { bpe })
    }

    /// Convenience constructor returning a shareable handle.
    pub fn shared() -> Result<Arc<dyn Tokenizer>, RpError> {
        Ok(Arc::new(Self::new()?))
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe
            .encode_with_special_tokens(text)
            .into_iter()
            .map(|token| token as u32)
            .collect()
    }
}

impl fmt::Debug for TiktokenTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TiktokenTokenizer(cl100k_base)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_deterministic() {
        let tokenizer = TiktokenTokenizer::new().expect("cl100k_base loads");
        let text = "Nala looks down at the floor, her tail swaying.";
        assert_eq!(tokenizer.encode(text), tokenizer.encode(text));
        assert_eq!(tokenizer.count(text), tokenizer.encode(text).len());
    }

    #[test]
    fn test_empty_text_has_no_tokens() {
        let tokenizer = TiktokenTokenizer::new().expect("cl100k_base loads");
        assert_eq!(tokenizer.count(""), 0);
    }

    #[test]
    fn test_special_tokens_are_single_tokens() {
        let tokenizer = TiktokenTokenizer::new().expect("cl100k_base loads");
        assert_eq!(tokenizer.count("<|endoftext|>"), 1);
    }
}
