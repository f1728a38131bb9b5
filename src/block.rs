//! A 128-bit [`Block`] type, used for wire keys, OT pads and PRG seeds.
//!
//! Operations on [`Block`]s will use SIMD instructions where possible.
use std::{
    fmt,
    ops::{BitAnd, BitAndAssign, BitXor, BitXorAssign},
};

use aes::cipher::{self, array::sizes};
use bytemuck::{Pod, Zeroable};
use rand::{Rng, distr::StandardUniform, prelude::Distribution};
use serde::{Deserialize, Serialize};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};
use thiserror::Error;
use wide::u8x16;

/// A 128-bit block. Uses SIMD operations where available.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, Pod, Zeroable)]
#[repr(transparent)]
pub struct Block(u8x16);

impl Block {
    /// All bits set to 0.
    pub const ZERO: Self = Self(u8x16::ZERO);
    /// Lsb set to 1, all others zero.
    pub const ONE: Self = Self::new(1_u128.to_le_bytes());

    /// 16 bytes in a Block.
    pub const BYTES: usize = 16;
    /// 128 bits in a block.
    pub const BITS: usize = 128;

    /// Create a new block from bytes.
    #[inline]
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(u8x16::new(bytes))
    }

    /// Bytes of the block.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_array_ref()
    }

    /// Mutable bytes of the block.
    #[inline]
    pub fn as_mut_bytes(&mut self) -> &mut [u8; 16] {
        self.0.as_array_mut()
    }

    /// Least significant bit of the block.
    ///
    /// For wire keys this is the point-and-permute bit.
    #[inline]
    pub fn lsb(&self) -> bool {
        self.as_bytes()[0] & 1 == 1
    }

    /// Computes self * b, where b is `bool` in constant time.
    #[inline]
    pub fn const_mul(&self, b: bool) -> Block {
        Block::conditional_select(&Block::ZERO, self, Choice::from(u8::from(b)))
    }

    /// Reads a block from the first 16 bytes of `bytes`.
    ///
    /// # Panics
    /// If `bytes` is shorter than 16 bytes.
    #[inline]
    pub(crate) fn from_prefix(bytes: &[u8]) -> Self {
        let mut arr = [0; 16];
        arr.copy_from_slice(&bytes[..Self::BYTES]);
        Self::new(arr)
    }

    /// Reinterprets a byte buffer as a sequence of blocks.
    ///
    /// # Panics
    /// If `bytes.len()` is not a multiple of 16.
    pub(crate) fn vec_from_bytes(bytes: &[u8]) -> Vec<Block> {
        assert_eq!(0, bytes.len() % Self::BYTES, "bytes must be whole blocks");
        bytes.chunks_exact(Self::BYTES).map(Self::from_prefix).collect()
    }
}

impl BitAnd for Block {
    type Output = Self;

    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for Block {
    #[inline]
    fn bitand_assign(&mut self, rhs: Self) {
        *self = *self & rhs;
    }
}

impl BitXor for Block {
    type Output = Self;

    #[inline]
    fn bitxor(self, rhs: Self) -> Self {
        Self(self.0 ^ rhs.0)
    }
}

impl BitXorAssign for Block {
    #[inline]
    fn bitxor_assign(&mut self, rhs: Self) {
        *self = *self ^ rhs;
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        let a: u128 = (*self).into();
        let b: u128 = (*other).into();
        a.ct_eq(&b).into()
    }
}

impl Eq for Block {}

impl Distribution<Block> for StandardUniform {
    #[inline]
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Block {
        let mut bytes = [0; 16];
        rng.fill_bytes(&mut bytes);
        Block::new(bytes)
    }
}

impl AsRef<[u8]> for Block {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsMut<[u8]> for Block {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_bytes()
    }
}

impl From<Block> for cipher::Array<u8, sizes::U16> {
    #[inline]
    fn from(value: Block) -> Self {
        Self(*value.as_bytes())
    }
}

impl From<cipher::Array<u8, sizes::U16>> for Block {
    #[inline]
    fn from(value: cipher::Array<u8, sizes::U16>) -> Self {
        Self::new(value.0)
    }
}

impl From<[u8; 16]> for Block {
    #[inline]
    fn from(value: [u8; 16]) -> Self {
        Self::new(value)
    }
}

impl From<Block> for [u8; 16] {
    fn from(value: Block) -> Self {
        *value.as_bytes()
    }
}

impl From<Block> for u128 {
    #[inline]
    fn from(value: Block) -> Self {
        u128::from_le_bytes(*value.as_bytes())
    }
}

impl From<u128> for Block {
    #[inline]
    fn from(value: u128) -> Self {
        Self::new(value.to_le_bytes())
    }
}

impl From<u64> for Block {
    #[inline]
    fn from(value: u64) -> Self {
        u128::from(value).into()
    }
}

/// Error returned when converting a slice of the wrong length into a [`Block`].
#[derive(Debug, Error)]
#[error("slice must have length of 16")]
pub struct WrongLength;

impl TryFrom<&[u8]> for Block {
    type Error = WrongLength;

    #[inline]
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let arr = value.try_into().map_err(|_| WrongLength)?;
        Ok(Self::new(arr))
    }
}

impl ConditionallySelectable for Block {
    #[inline]
    fn conditional_select(a: &Self, b: &Self, choice: Choice) -> Self {
        // if choice = 0, mask = (-0) = 0000...0000
        // if choice = 1, mask = (-1) = 1111...1111
        let mask = Block::new((-(choice.unwrap_u8() as i128)).to_le_bytes());
        *a ^ (mask & (*a ^ *b))
    }
}

impl fmt::Binary for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Binary::fmt(&u128::from(*self), f)
    }
}
