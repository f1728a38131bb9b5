//! Security parameter presets.
use serde::{Deserialize, Serialize};

/// A bundle of security parameters, in bits.
///
/// `symbits` drives everything symmetric in this crate: the number of base
/// OTs, the AES key size and the hash function. The remaining fields are
/// carried for completeness and describe the equivalent strength of
/// integer-factorization and elliptic-curve primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecLevel {
    /// Statistical security parameter.
    pub statbits: usize,
    /// Symmetric security parameter.
    pub symbits: usize,
    /// Equivalent modulus size for integer-factorization cryptography.
    pub ifcbits: usize,
    /// Equivalent prime-field elliptic curve size.
    pub eccpfbits: usize,
    /// Equivalent Koblitz-curve size.
    pub ecckcbits: usize,
}

impl SecLevel {
    /// Short-term security.
    pub const ST: Self = Self::preset(80, 1024, 160, 163);
    /// Medium-term security.
    pub const MT: Self = Self::preset(112, 2048, 192, 233);
    /// Long-term security.
    pub const LT: Self = Self::preset(128, 3072, 256, 283);
    /// Extra long-term security.
    pub const XLT: Self = Self::preset(192, 7680, 384, 409);
    /// Extra extra long-term security.
    pub const XXLT: Self = Self::preset(256, 15360, 512, 571);

    const fn preset(symbits: usize, ifcbits: usize, eccpfbits: usize, ecckcbits: usize) -> Self {
        Self {
            statbits: 40,
            symbits,
            ifcbits,
            eccpfbits,
            ecckcbits,
        }
    }

    /// Looks up the preset with the given symmetric security.
    ///
    /// Unknown values fall back to [`SecLevel::LT`].
    pub fn from_symbits(symbits: usize) -> Self {
        match symbits {
            80 => Self::ST,
            112 => Self::MT,
            192 => Self::XLT,
            256 => Self::XXLT,
            _ => Self::LT,
        }
    }

    /// Length of AES keys derived at this level.
    pub fn aes_key_bytes(&self) -> usize {
        match self.symbits {
            0..=128 => 16,
            129..=192 => 24,
            _ => 32,
        }
    }

    /// Number of base OTs (and rows of the OT extension matrix).
    pub fn num_base_ots(&self) -> usize {
        self.symbits
    }
}

impl Default for SecLevel {
    fn default() -> Self {
        Self::LT
    }
}
