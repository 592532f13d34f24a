//! Hashing whitespace tokenizer.

use super::{Encoding, Tokenizer};
use crate::Result;
use tch::Tensor;

const PAD_ID: i64 = 0;
const UNK_ID: i64 = 1;
const RESERVED: i64 = 2;

/// A dependency-free tokenizer that hashes whitespace-split words into a
/// fixed-size vocabulary. Good enough to drive the loop; swap in a real
/// subword tokenizer through the [`Tokenizer`] trait for serious use.
pub struct HashTokenizer {
    vocab_size: i64,
}

impl HashTokenizer {
    pub fn new(vocab_size: i64) -> Self {
        Self {
            vocab_size: vocab_size.max(RESERVED + 1),
        }
    }

    pub fn vocab_size(&self) -> i64 {
        self.vocab_size
    }

    fn word_id(&self, word: &str) -> i64 {
        if word.is_empty() {
            return UNK_ID;
        }
        // FNV-1a
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in word.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        RESERVED + (hash % (self.vocab_size - RESERVED) as u64) as i64
    }
}

impl Tokenizer for HashTokenizer {
    fn tokenize(&self, texts: &[String], pad: bool) -> Result<Encoding> {
        let tokenized: Vec<Vec<i64>> = texts
            .iter()
            .map(|t| self.words(t).iter().map(|w| self.word_id(w)).collect())
            .collect();

        let max_len = if pad {
            tokenized.iter().map(|t| t.len()).max().unwrap_or(1).max(1)
        } else {
            tokenized.first().map(|t| t.len()).unwrap_or(1).max(1)
        };

        let b = tokenized.len();
        let mut ids = vec![PAD_ID; b * max_len];
        let mut mask = vec![0i64; b * max_len];
        for (row, tokens) in tokenized.iter().enumerate() {
            for (col, &id) in tokens.iter().take(max_len).enumerate() {
                ids[row * max_len + col] = id;
                mask[row * max_len + col] = 1;
            }
        }

        Ok(Encoding {
            token_ids: Tensor::from_slice(&ids).reshape([b as i64, max_len as i64]),
            attention_mask: Tensor::from_slice(&mask).reshape([b as i64, max_len as i64]),
        })
    }

    fn words(&self, text: &str) -> Vec<String> {
        text.split_whitespace()
            .map(|w| {
                w.chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect()
    }
}
