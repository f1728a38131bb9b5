//! RNG based on AES in CTR mode.
//!
//! Every [`crate::crypto::Crypto`] context draws its randomness from an
//! [`AesRng`], and each sharing forks its own generator from it so that the
//! sharings never contend for a shared PRG state.
use aes::{
    Aes128,
    cipher::{Array, BlockCipherEncrypt, KeyInit},
};
use rand::{CryptoRng, Rng, RngCore, SeedableRng};

use crate::block::Block;

const BUF_BYTES: usize = AES_PAR_BLOCKS * Block::BYTES;

/// This uses AES in a counter-mode to implement a PRG.
///
/// The keystream is `E_seed(0), E_seed(1), ...` with the counter encoded as a
/// little-endian `u128`.
#[derive(Clone)]
pub struct AesRng {
    aes: Aes128,
    counter: u128,
    buf: [u8; BUF_BYTES],
    /// Position of the next unused byte in `buf`.
    pos: usize,
}

impl std::fmt::Debug for AesRng {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "AesRng {{ counter: {} }}", self.counter)
    }
}

impl AesRng {
    /// Create a new random number generator using a random seed from
    /// `rand::random`.
    #[inline]
    pub fn new() -> Self {
        AesRng::from_seed(rand::random::<Block>())
    }

    /// Create an RNG whose keystream starts at AES block `counter`.
    ///
    /// `AesRng::from_seed_at(seed, n)` produces the same bytes as
    /// `AesRng::from_seed(seed)` after skipping `16 * n` bytes.
    #[inline]
    pub fn from_seed_at(seed: Block, counter: u128) -> Self {
        Self {
            aes: Aes128::new(&seed.into()),
            counter,
            buf: [0; BUF_BYTES],
            pos: BUF_BYTES,
        }
    }

    /// Create a new RNG using a random seed from this one.
    #[inline]
    pub fn fork(&mut self) -> Self {
        let seed = self.random::<Block>();
        AesRng::from_seed(seed)
    }

    /// Encrypts the next counter values into `blocks`.
    #[inline]
    fn keystream(&mut self, blocks: &mut [aes::Block]) {
        for chunk in blocks.chunks_mut(AES_PAR_BLOCKS) {
            for block in chunk.iter_mut() {
                *block = Array(self.counter.to_le_bytes());
                self.counter += 1;
            }
            self.aes.encrypt_blocks(chunk);
        }
    }

    fn refill(&mut self) {
        let mut buf = self.buf;
        self.keystream(bytemuck::cast_slice_mut(&mut buf));
        self.buf = buf;
        self.pos = 0;
    }
}

impl RngCore for AesRng {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        let mut bytes = [0; 4];
        self.fill_bytes(&mut bytes);
        u32::from_le_bytes(bytes)
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        let mut bytes = [0; 8];
        self.fill_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }

    fn fill_bytes(&mut self, mut dest: &mut [u8]) {
        // drain buffered bytes first so the stream stays contiguous
        let buffered = (BUF_BYTES - self.pos).min(dest.len());
        dest[..buffered].copy_from_slice(&self.buf[self.pos..self.pos + buffered]);
        self.pos += buffered;
        dest = &mut dest[buffered..];

        // fast path: encrypt whole blocks directly into dest
        let block_len = dest.len() / Block::BYTES * Block::BYTES;
        let (blocks, rest) = dest.split_at_mut(block_len);
        self.keystream(bytemuck::cast_slice_mut(blocks));

        if !rest.is_empty() {
            self.refill();
            rest.copy_from_slice(&self.buf[..rest.len()]);
            self.pos = rest.len();
        }
    }
}

impl SeedableRng for AesRng {
    type Seed = Block;

    #[inline]
    fn from_seed(seed: Self::Seed) -> Self {
        Self::from_seed_at(seed, 0)
    }
}

impl CryptoRng for AesRng {}

impl Default for AesRng {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Number of Blocks for which hardware accelerated AES can make use of ILP.
///
/// This corresponds to `ParBlocksSize` in [`aes::cipher::ParBlocksSizeUser`]
/// for the SIMD backend on the target architecture.
/// Using this constant must not result in any observable differences in the
/// execution except performance.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub const AES_PAR_BLOCKS: usize = 9;
#[cfg(target_arch = "aarch64")]
pub const AES_PAR_BLOCKS: usize = 21;
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
pub const AES_PAR_BLOCKS: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate() {
        let mut rng = AesRng::new();
        let a = rng.random::<[Block; 8]>();
        let b = rng.random::<[Block; 8]>();
        assert_ne!(a, b);
    }

    #[test]
    fn test_seed_at_skips_keystream() {
        let seed = Block::from(1234_u128);
        let mut full = vec![0_u8; 16 * 40];
        AesRng::from_seed(seed).fill_bytes(&mut full);
        let mut skipped = vec![0_u8; 16 * 8];
        AesRng::from_seed_at(seed, 32).fill_bytes(&mut skipped);
        assert_eq!(&full[16 * 32..], skipped.as_slice());
    }

    #[test]
    fn test_unaligned_reads_are_contiguous() {
        let seed = Block::from(77_u128);
        let mut whole = vec![0_u8; 300];
        AesRng::from_seed(seed).fill_bytes(&mut whole);

        let mut rng = AesRng::from_seed(seed);
        let mut pieces = vec![0_u8; 300];
        let mut off = 0;
        for len in [3, 17, 1, 64, 15, 200] {
            rng.fill_bytes(&mut pieces[off..off + len]);
            off += len;
        }
        assert_eq!(whole, pieces);
    }
}
