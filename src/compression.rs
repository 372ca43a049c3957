//! SHA-2 compression with per-round Hamming weight leakage
//!
//! Words of both variants are carried as `u64`. For SHA-256 only the low 32
//! bits are significant.

use crate::error::AttackError;
use crate::math::hamming_weight;
use std::fmt;
use std::ops::{BitAnd, BitXor, Not, Shr};

const K512: [u64; 80] = [
    0x428a2f98d728ae22, 0x7137449123ef65cd, 0xb5c0fbcfec4d3b2f, 0xe9b5dba58189dbbc,
    0x3956c25bf348b538, 0x59f111f1b605d019, 0x923f82a4af194f9b, 0xab1c5ed5da6d8118,
    0xd807aa98a3030242, 0x12835b0145706fbe, 0x243185be4ee4b28c, 0x550c7dc3d5ffb4e2,
    0x72be5d74f27b896f, 0x80deb1fe3b1696b1, 0x9bdc06a725c71235, 0xc19bf174cf692694,
    0xe49b69c19ef14ad2, 0xefbe4786384f25e3, 0x0fc19dc68b8cd5b5, 0x240ca1cc77ac9c65,
    0x2de92c6f592b0275, 0x4a7484aa6ea6e483, 0x5cb0a9dcbd41fbd4, 0x76f988da831153b5,
    0x983e5152ee66dfab, 0xa831c66d2db43210, 0xb00327c898fb213f, 0xbf597fc7beef0ee4,
    0xc6e00bf33da88fc2, 0xd5a79147930aa725, 0x06ca6351e003826f, 0x142929670a0e6e70,
    0x27b70a8546d22ffc, 0x2e1b21385c26c926, 0x4d2c6dfc5ac42aed, 0x53380d139d95b3df,
    0x650a73548baf63de, 0x766a0abb3c77b2a8, 0x81c2c92e47edaee6, 0x92722c851482353b,
    0xa2bfe8a14cf10364, 0xa81a664bbc423001, 0xc24b8b70d0f89791, 0xc76c51a30654be30,
    0xd192e819d6ef5218, 0xd69906245565a910, 0xf40e35855771202a, 0x106aa07032bbd1b8,
    0x19a4c116b8d2d0c8, 0x1e376c085141ab53, 0x2748774cdf8eeb99, 0x34b0bcb5e19b48a8,
    0x391c0cb3c5c95a63, 0x4ed8aa4ae3418acb, 0x5b9cca4f7763e373, 0x682e6ff3d6b2b8a3,
    0x748f82ee5defb2fc, 0x78a5636f43172f60, 0x84c87814a1f0ab72, 0x8cc702081a6439ec,
    0x90befffa23631e28, 0xa4506cebde82bde9, 0xbef9a3f7b2c67915, 0xc67178f2e372532b,
    0xca273eceea26619c, 0xd186b8c721c0c207, 0xeada7dd6cde0eb1e, 0xf57d4f7fee6ed178,
    0x06f067aa72176fba, 0x0a637dc5a2c898a6, 0x113f9804bef90dae, 0x1b710b35131c471b,
    0x28db77f523047d84, 0x32caab7b40c72493, 0x3c9ebe0a15c9bebc, 0x431d67c49c100d4c,
    0x4cc5d4becb3e42b6, 0x597f299cfc657e2a, 0x5fcb6fab3ad6faec, 0x6c44198c4a475817,
];

const IV512: [u64; 8] = [
    0x6a09e667f3bcc908, 0xbb67ae8584caa73b, 0x3c6ef372fe94f82b, 0xa54ff53a5f1d36f1,
    0x510e527fade682d1, 0x9b05688c2b3e6c1f, 0x1f83d9abfb41bd6b, 0x5be0cd19137e2179,
];

// SHA-256 constants are the high halves of the SHA-512 ones.
const K256: [u32; 64] = high_halves::<64>(&K512);
const IV256: [u32; 8] = high_halves::<8>(&IV512);

const fn high_halves<const N: usize>(words: &[u64]) -> [u32; N] {
    let mut out = [0u32; N];
    let mut i = 0;
    while i < N {
        out[i] = (words[i] >> 32) as u32;
        i += 1;
    }
    out
}

/// Number of words in one compression-function input block.
pub const BLOCK_WORDS: usize = 16;

/// Number of words in a hash state.
pub const STATE_WORDS: usize = 8;

/// An 8-word SHA-2 chaining state (IV, HMAC secret, or digest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HashState(pub [u64; STATE_WORDS]);

impl HashState {
    pub fn words(&self) -> &[u64; STATE_WORDS] {
        &self.0
    }

    /// Space-separated hex words at the variant's width.
    pub fn to_hex(&self, variant: Variant) -> String {
        variant.format_words(&self.0)
    }
}

/// SHA-2 family member, selected by word width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Sha256,
    Sha512,
}

impl Variant {
    pub fn from_bits(bits: u32) -> Result<Self, AttackError> {
        match bits {
            32 => Ok(Variant::Sha256),
            64 => Ok(Variant::Sha512),
            other => Err(AttackError::UnsupportedWordWidth(other)),
        }
    }

    pub fn bits(&self) -> u32 {
        match self {
            Variant::Sha256 => 32,
            Variant::Sha512 => 64,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Variant::Sha256 => "SHA-256",
            Variant::Sha512 => "SHA-512",
        }
    }

    pub fn rounds(&self) -> usize {
        match self {
            Variant::Sha256 => K256.len(),
            Variant::Sha512 => K512.len(),
        }
    }

    pub fn mask(&self) -> u64 {
        match self {
            Variant::Sha256 => u32::MAX as u64,
            Variant::Sha512 => u64::MAX,
        }
    }

    pub fn nibbles_per_word(&self) -> usize {
        self.bits() as usize / 4
    }

    pub fn nibbles_in_block(&self) -> usize {
        BLOCK_WORDS * self.nibbles_per_word()
    }

    pub fn block_bits(&self) -> u64 {
        BLOCK_WORDS as u64 * self.bits() as u64
    }

    pub fn iv(&self) -> HashState {
        match self {
            Variant::Sha256 => HashState(IV256.map(u64::from)),
            Variant::Sha512 => HashState(IV512),
        }
    }

    pub fn ipad(&self) -> u64 {
        0x3636_3636_3636_3636 & self.mask()
    }

    pub fn opad(&self) -> u64 {
        0x5c5c_5c5c_5c5c_5c5c & self.mask()
    }

    fn pad_marker(&self) -> u64 {
        1 << (self.bits() - 1)
    }

    /// Second HMAC block of the inner hash: two message words after the
    /// key block, then standard padding.
    pub fn inner_block(&self, d0: u64, d1: u64) -> [u64; BLOCK_WORDS] {
        let mut block = [0u64; BLOCK_WORDS];
        block[0] = d0 & self.mask();
        block[1] = d1 & self.mask();
        block[2] = self.pad_marker();
        block[BLOCK_WORDS - 1] = self.block_bits() + 2 * self.bits() as u64;
        block
    }

    /// Second HMAC block of the outer hash: the inner digest, then standard
    /// padding.
    pub fn outer_block(&self, inner_digest: &HashState) -> [u64; BLOCK_WORDS] {
        let mut block = [0u64; BLOCK_WORDS];
        block[..STATE_WORDS].copy_from_slice(&inner_digest.0);
        block[STATE_WORDS] = self.pad_marker();
        block[BLOCK_WORDS - 1] = self.block_bits() + (STATE_WORDS as u64) * self.bits() as u64;
        block
    }

    /// Runs one compression over `block` from `state`.
    ///
    /// Writes one leakage sample per round into `leakage`, up to
    /// `min(leakage.len(), rounds)` samples. Each sample is the Hamming
    /// weight of the new `a` plus that of the new `e`.
    pub fn compress_into(
        &self,
        block: &[u64; BLOCK_WORDS],
        state: &HashState,
        leakage: &mut [f64],
    ) -> HashState {
        match self {
            Variant::Sha256 => compress_words::<u32>(block, state, &K256, &SHA256_ROT, leakage),
            Variant::Sha512 => compress_words::<u64>(block, state, &K512, &SHA512_ROT, leakage),
        }
    }

    pub fn compress(&self, block: &[u64; BLOCK_WORDS], state: &HashState) -> HashState {
        self.compress_into(block, state, &mut [])
    }

    pub fn format_word(&self, word: u64) -> String {
        format!("{:0width$x}", word & self.mask(), width = self.nibbles_per_word())
    }

    pub fn format_words(&self, words: &[u64]) -> String {
        words
            .iter()
            .map(|w| self.format_word(*w))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct Rotations {
    big_sigma0: [u32; 3],
    big_sigma1: [u32; 3],
    // two rotations and a shift
    small_sigma0: [u32; 3],
    small_sigma1: [u32; 3],
}

const SHA256_ROT: Rotations = Rotations {
    big_sigma0: [2, 13, 22],
    big_sigma1: [6, 11, 25],
    small_sigma0: [7, 18, 3],
    small_sigma1: [17, 19, 10],
};

const SHA512_ROT: Rotations = Rotations {
    big_sigma0: [28, 34, 39],
    big_sigma1: [14, 18, 41],
    small_sigma0: [1, 8, 7],
    small_sigma1: [19, 61, 6],
};

trait Word:
    Copy + BitXor<Output = Self> + BitAnd<Output = Self> + Not<Output = Self> + Shr<u32, Output = Self>
{
    fn from_u64(v: u64) -> Self;
    fn to_u64(self) -> u64;
    fn rotr(self, n: u32) -> Self;
    fn add(self, other: Self) -> Self;
}

impl Word for u32 {
    fn from_u64(v: u64) -> Self {
        v as u32
    }
    fn to_u64(self) -> u64 {
        self as u64
    }
    fn rotr(self, n: u32) -> Self {
        self.rotate_right(n)
    }
    fn add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
}

impl Word for u64 {
    fn from_u64(v: u64) -> Self {
        v
    }
    fn to_u64(self) -> u64 {
        self
    }
    fn rotr(self, n: u32) -> Self {
        self.rotate_right(n)
    }
    fn add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
}

fn big_sigma<W: Word>(x: W, r: &[u32; 3]) -> W {
    x.rotr(r[0]) ^ x.rotr(r[1]) ^ x.rotr(r[2])
}

fn small_sigma<W: Word>(x: W, r: &[u32; 3]) -> W {
    x.rotr(r[0]) ^ x.rotr(r[1]) ^ (x >> r[2])
}

fn compress_words<W: Word>(
    block: &[u64; BLOCK_WORDS],
    state: &HashState,
    k: &[W],
    rot: &Rotations,
    leakage: &mut [f64],
) -> HashState {
    let rounds = k.len();
    let mut w: Vec<W> = Vec::with_capacity(rounds);
    w.extend(block.iter().map(|&x| W::from_u64(x)));
    for t in BLOCK_WORDS..rounds {
        let next = small_sigma(w[t - 2], &rot.small_sigma1)
            .add(w[t - 7])
            .add(small_sigma(w[t - 15], &rot.small_sigma0))
            .add(w[t - 16]);
        w.push(next);
    }

    let init = state.0.map(W::from_u64);
    let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut h] = init;
    let samples = leakage.len().min(rounds);

    for t in 0..rounds {
        let ch = (e & f) ^ (!e & g);
        let maj = (a & b) ^ (a & c) ^ (b & c);
        let t1 = h
            .add(big_sigma(e, &rot.big_sigma1))
            .add(ch)
            .add(k[t])
            .add(w[t]);
        let t2 = big_sigma(a, &rot.big_sigma0).add(maj);
        h = g;
        g = f;
        f = e;
        e = d.add(t1);
        d = c;
        c = b;
        b = a;
        a = t1.add(t2);

        if t < samples {
            leakage[t] = (hamming_weight(a.to_u64()) + hamming_weight(e.to_u64())) as f64;
        }
    }

    let out = [a, b, c, d, e, f, g, h];
    let mut result = [0u64; STATE_WORDS];
    for i in 0..STATE_WORDS {
        result[i] = init[i].add(out[i]).to_u64();
    }
    HashState(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256, Sha512};

    fn single_block(variant: Variant, msg: &[u8]) -> [u64; BLOCK_WORDS] {
        let word_bytes = variant.bits() as usize / 8;
        let block_bytes = BLOCK_WORDS * word_bytes;
        let mut bytes = vec![0u8; block_bytes];
        bytes[..msg.len()].copy_from_slice(msg);
        bytes[msg.len()] = 0x80;
        let bit_len = (msg.len() as u64 * 8).to_be_bytes();
        bytes[block_bytes - 8..].copy_from_slice(&bit_len);

        let mut block = [0u64; BLOCK_WORDS];
        for (i, chunk) in bytes.chunks(word_bytes).enumerate() {
            block[i] = chunk.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
        }
        block
    }

    fn digest_words(bytes: &[u8], word_bytes: usize) -> [u64; STATE_WORDS] {
        let mut words = [0u64; STATE_WORDS];
        for (i, chunk) in bytes.chunks(word_bytes).enumerate() {
            words[i] = chunk.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
        }
        words
    }

    #[test]
    fn test_sha256_compression_matches_reference() {
        let variant = Variant::Sha256;
        let block = single_block(variant, b"abc");
        let state = variant.compress(&block, &variant.iv());
        let expected = digest_words(&Sha256::digest(b"abc"), 4);
        assert_eq!(state.0, expected);
    }

    #[test]
    fn test_sha512_compression_matches_reference() {
        let variant = Variant::Sha512;
        let block = single_block(variant, b"abc");
        let state = variant.compress(&block, &variant.iv());
        let expected = digest_words(&Sha512::digest(b"abc"), 8);
        assert_eq!(state.0, expected);
    }

    #[test]
    fn test_sha256_iv_is_standard() {
        assert_eq!(Variant::Sha256.iv().0[0], 0x6a09e667);
        assert_eq!(Variant::Sha256.iv().0[7], 0x5be0cd19);
        assert_eq!(K256[63], 0xc67178f2);
    }

    #[test]
    fn test_leakage_samples_bounded_and_clamped() {
        let variant = Variant::Sha256;
        let block = variant.inner_block(0x01234567, 0x89abcdef);
        let mut leakage = vec![-1.0; 100];
        variant.compress_into(&block, &variant.iv(), &mut leakage);
        for sample in &leakage[..64] {
            assert!(*sample >= 0.0 && *sample <= 64.0);
        }
        assert!(leakage[64..].iter().all(|s| *s == -1.0));
    }

    #[test]
    fn test_leakage_does_not_change_digest() {
        let variant = Variant::Sha512;
        let block = variant.inner_block(1, 2);
        let mut leakage = [0.0; 2];
        let with = variant.compress_into(&block, &variant.iv(), &mut leakage);
        let without = variant.compress(&block, &variant.iv());
        assert_eq!(with, without);
    }

    #[test]
    fn test_padding_length_fields() {
        let inner = Variant::Sha256.inner_block(0, 0);
        assert_eq!(inner[2], 0x8000_0000);
        assert_eq!(inner[15], 0x240);
        let outer = Variant::Sha256.outer_block(&HashState::default());
        assert_eq!(outer[8], 0x8000_0000);
        assert_eq!(outer[15], 0x300);

        let inner = Variant::Sha512.inner_block(0, 0);
        assert_eq!(inner[2], 0x8000_0000_0000_0000);
        assert_eq!(inner[15], 0x480);
        let outer = Variant::Sha512.outer_block(&HashState::default());
        assert_eq!(outer[15], 0x600);
    }

    #[test]
    fn test_unsupported_word_width() {
        assert!(Variant::from_bits(16).is_err());
        assert_eq!(Variant::from_bits(64).unwrap(), Variant::Sha512);
    }

    #[test]
    fn test_format_words_width() {
        assert_eq!(Variant::Sha256.format_words(&[0xab, 1]), "000000ab 00000001");
        assert_eq!(Variant::Sha512.format_word(0xff), "00000000000000ff");
    }
}
