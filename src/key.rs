//! HMAC key parsing and generation

use crate::compression::{Variant, BLOCK_WORDS};
use crate::error::AttackError;
use rand::Rng;

/// One HMAC key block, already padded to the variant's block width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    variant: Variant,
    words: [u64; BLOCK_WORDS],
}

impl Key {
    pub fn from_words(variant: Variant, words: [u64; BLOCK_WORDS]) -> Self {
        let mask = variant.mask();
        Self {
            variant,
            words: words.map(|w| w & mask),
        }
    }

    /// Parses a hex key, right-padding it with zero nibbles to one block.
    pub fn from_hex(input: &str, variant: Variant) -> Result<Self, AttackError> {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AttackError::InvalidKey(
                "must be hexadecimal".to_string(),
            ));
        }
        let max = variant.nibbles_in_block();
        if digits.len() > max {
            return Err(AttackError::KeyTooLong {
                len: digits.len(),
                max,
                bits: variant.bits(),
            });
        }

        let padded = format!("{digits:0<max$}");
        let bytes = hex::decode(padded).map_err(|e| AttackError::InvalidKey(e.to_string()))?;

        let word_bytes = variant.bits() as usize / 8;
        let mut words = [0u64; BLOCK_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks(word_bytes)) {
            *word = chunk.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
        }
        Ok(Self { variant, words })
    }

    /// Draws every key word uniformly at the variant's width.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, variant: Variant) -> Self {
        let mut words = [0u64; BLOCK_WORDS];
        for word in words.iter_mut() {
            *word = rng.random::<u64>();
        }
        Self::from_words(variant, words)
    }

    pub fn words(&self) -> &[u64; BLOCK_WORDS] {
        &self.words
    }

    pub fn xor_pad(&self, pad: u64) -> [u64; BLOCK_WORDS] {
        self.words.map(|w| w ^ pad)
    }

    pub fn to_hex(&self) -> String {
        self.variant.format_words(&self.words)
    }
}
