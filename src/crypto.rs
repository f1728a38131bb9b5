//! Symmetric cryptography used by the OT extension and the sharings.
//!
//! One [`Crypto`] context exists per party. It bundles the PRG, the hash
//! function selected by the [`SecLevel`] and helpers to derive keyed ciphers.
use rand::{Rng, RngCore, SeedableRng, seq::SliceRandom};
use sha2::{Digest, Sha256, Sha512};

use crate::{block::Block, channel::Channel, error::Error};

mod aes_hash;
mod aes_rng;
mod cipher;
mod seclvl;

pub(crate) use aes_hash::FIXED_KEY_HASH;
pub use aes_rng::{AES_PAR_BLOCKS, AesRng};
pub use cipher::{Mode, SymCipher};
pub use seclvl::SecLevel;

/// The hash function selected by a security level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashFunction {
    /// SHA-256 truncated to 160 bits, used for short-term security.
    Sha256Trunc160,
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
}

impl HashFunction {
    /// Picks the hash function for a security level.
    pub fn for_level(seclvl: &SecLevel) -> Self {
        match seclvl.symbits {
            0..=80 => Self::Sha256Trunc160,
            81..=128 => Self::Sha256,
            _ => Self::Sha512,
        }
    }

    /// Output length in bytes.
    pub fn output_bytes(&self) -> usize {
        match self {
            Self::Sha256Trunc160 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    fn digest(&self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            Self::Sha256Trunc160 | Self::Sha256 => {
                let mut h = Sha256::new();
                parts.iter().for_each(|p| h.update(p));
                let mut out = h.finalize().to_vec();
                out.truncate(self.output_bytes());
                out
            }
            Self::Sha512 => {
                let mut h = Sha512::new();
                parts.iter().for_each(|p| h.update(p));
                h.finalize().to_vec()
            }
        }
    }

    /// Hashes `input`.
    pub fn hash(&self, input: &[u8]) -> Vec<u8> {
        self.digest(&[input])
    }

    /// Hashes `counter || input` with the counter as little-endian `u64`.
    pub fn hash_ctr(&self, counter: u64, input: &[u8]) -> Vec<u8> {
        self.digest(&[&counter.to_le_bytes(), input])
    }
}

/// Per-party cryptographic context.
pub struct Crypto {
    seclvl: SecLevel,
    hash: HashFunction,
    rng: AesRng,
}

impl std::fmt::Debug for Crypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crypto")
            .field("seclvl", &self.seclvl)
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

impl Crypto {
    /// Creates a context whose PRG is seeded with `seed`.
    pub fn new(seclvl: SecLevel, seed: Block) -> Self {
        Self {
            seclvl,
            hash: HashFunction::for_level(&seclvl),
            rng: AesRng::from_seed(seed),
        }
    }

    /// Creates a context with a fresh random seed.
    pub fn from_entropy(seclvl: SecLevel) -> Self {
        Self::new(seclvl, rand::random())
    }

    /// The security level of this context.
    pub fn seclvl(&self) -> SecLevel {
        self.seclvl
    }

    /// The hash function of this context.
    pub fn hash_function(&self) -> HashFunction {
        self.hash
    }

    /// Length of AES keys at this security level.
    pub fn aes_key_bytes(&self) -> usize {
        self.seclvl.aes_key_bytes()
    }

    /// Output length of [`Crypto::hash`].
    pub fn hash_bytes(&self) -> usize {
        self.hash.output_bytes()
    }

    /// Fills `buf` with pseudorandom bytes.
    pub fn gen_rnd(&mut self, buf: &mut [u8]) {
        self.rng.fill_bytes(buf);
    }

    /// A uniformly random permutation of `0..n`.
    pub fn gen_rnd_perm(&mut self, n: usize) -> Vec<usize> {
        let mut perm: Vec<usize> = (0..n).collect();
        perm.shuffle(&mut self.rng);
        perm
    }

    /// Derives a new independent PRG from this context.
    pub fn fork_rng(&mut self) -> AesRng {
        self.rng.fork()
    }

    /// Agrees on a common random seed with the peer.
    ///
    /// Both parties send a random seed and XOR both seeds. This is only
    /// meaningful against semi-honest peers.
    pub(crate) fn gen_common_seed(&mut self, channel: &Channel) -> Result<Block, Error> {
        let mine: Block = self.rng.random();
        channel.send("common seed", mine.as_bytes().to_vec())?;
        let theirs = channel.recv_exact("common seed", Block::BYTES)?;
        Ok(mine ^ Block::from_prefix(&theirs))
    }

    /// Hashes `input` with the hash function of this level.
    pub fn hash(&self, input: &[u8]) -> Vec<u8> {
        self.hash.hash(input)
    }

    /// Hashes `counter || input` with the hash function of this level.
    pub fn hash_ctr(&self, counter: u64, input: &[u8]) -> Vec<u8> {
        self.hash.hash_ctr(counter, input)
    }

    /// Fixed-key AES hash `π(x) ^ x` of a single block.
    pub fn fixed_key_aes_hash(&self, x: Block) -> Block {
        FIXED_KEY_HASH.cr_hash_block(x)
    }

    /// Creates a cipher keyed with `key`, which must be [`Crypto::aes_key_bytes`] long.
    pub fn sym_cipher(&self, key: &[u8], mode: Mode) -> Result<SymCipher, Error> {
        if key.len() != self.aes_key_bytes() {
            return Err(Error::Crypto(format!(
                "expected a {} byte key, got {}",
                self.aes_key_bytes(),
                key.len()
            )));
        }
        SymCipher::new(key, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_lengths_by_level() {
        let lens: Vec<_> = [SecLevel::ST, SecLevel::MT, SecLevel::LT, SecLevel::XLT, SecLevel::XXLT]
            .into_iter()
            .map(|lvl| {
                let c = Crypto::new(lvl, Block::ZERO);
                assert_eq!(c.hash_bytes(), c.hash(b"abc").len());
                c.hash_bytes()
            })
            .collect();
        assert_eq!(vec![20, 32, 32, 64, 64], lens);
    }

    #[test]
    fn test_hash_ctr_binds_counter() {
        let c = Crypto::new(SecLevel::LT, Block::ZERO);
        assert_ne!(c.hash_ctr(0, b"x"), c.hash_ctr(1, b"x"));
        assert_ne!(c.hash_ctr(0, b"x"), c.hash(b"x"));
    }

    #[test]
    fn test_rnd_perm_is_permutation() {
        let mut c = Crypto::new(SecLevel::LT, Block::from(5_u128));
        let mut perm = c.gen_rnd_perm(100);
        assert_ne!((0..100).collect::<Vec<_>>(), perm);
        perm.sort_unstable();
        assert_eq!((0..100).collect::<Vec<_>>(), perm);
    }

    #[test]
    fn test_rnd_perm_follows_seed() {
        let mut a = Crypto::new(SecLevel::LT, Block::from(6_u128));
        let mut b = Crypto::new(SecLevel::LT, Block::from(6_u128));
        assert_eq!(a.gen_rnd_perm(50), b.gen_rnd_perm(50));
        assert_ne!(a.gen_rnd_perm(50), a.gen_rnd_perm(50));
        assert!(a.gen_rnd_perm(0).is_empty());
        assert_eq!(vec![0], a.gen_rnd_perm(1));
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = Crypto::new(SecLevel::ST, Block::from(9_u128));
        let mut b = Crypto::new(SecLevel::ST, Block::from(9_u128));
        let (mut x, mut y) = ([0; 33], [0; 33]);
        a.gen_rnd(&mut x);
        b.gen_rnd(&mut y);
        assert_eq!(x, y);
    }

    #[test]
    fn test_sym_cipher_key_size_follows_level() {
        let c = Crypto::new(SecLevel::XLT, Block::ZERO);
        assert!(c.sym_cipher(&[0; 24], Mode::Ecb).is_ok());
        assert!(c.sym_cipher(&[0; 16], Mode::Ecb).is_err());
    }
}
