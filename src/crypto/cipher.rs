//! Keyed AES with a key size chosen by the security level.
use aes::{
    Aes128, Aes192, Aes256,
    cipher::{Array, BlockCipherDecrypt, BlockCipherEncrypt, KeyInit},
};

use crate::{block::Block, error::Error};

/// Block cipher mode of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Every block is encrypted independently.
    Ecb,
    /// Cipher block chaining with an explicit IV.
    Cbc,
}

#[derive(Clone)]
enum Aes {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

/// An AES instance keyed with 16, 24 or 32 bytes.
#[derive(Clone)]
pub struct SymCipher {
    aes: Aes,
    mode: Mode,
}

impl std::fmt::Debug for SymCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymCipher {{ mode: {:?} }}", self.mode)
    }
}

impl SymCipher {
    /// Creates a cipher from a 16, 24 or 32 byte key.
    pub fn new(key: &[u8], mode: Mode) -> Result<Self, Error> {
        let invalid = |_| Error::Crypto(format!("invalid AES key length {}", key.len()));
        let aes = match key.len() {
            16 => Aes::Aes128(Aes128::new_from_slice(key).map_err(invalid)?),
            24 => Aes::Aes192(Aes192::new_from_slice(key).map_err(invalid)?),
            32 => Aes::Aes256(Aes256::new_from_slice(key).map_err(invalid)?),
            n => return Err(Error::Crypto(format!("invalid AES key length {n}"))),
        };
        Ok(Self { aes, mode })
    }

    /// The mode this cipher was created with.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn encrypt_blocks(&self, blocks: &mut [aes::Block]) {
        match &self.aes {
            Aes::Aes128(aes) => aes.encrypt_blocks(blocks),
            Aes::Aes192(aes) => aes.encrypt_blocks(blocks),
            Aes::Aes256(aes) => aes.encrypt_blocks(blocks),
        }
    }

    fn decrypt_blocks(&self, blocks: &mut [aes::Block]) {
        match &self.aes {
            Aes::Aes128(aes) => aes.decrypt_blocks(blocks),
            Aes::Aes192(aes) => aes.decrypt_blocks(blocks),
            Aes::Aes256(aes) => aes.decrypt_blocks(blocks),
        }
    }

    fn as_blocks(data: &mut [u8]) -> Result<&mut [aes::Block], Error> {
        if data.len() % Block::BYTES != 0 {
            return Err(Error::Crypto(format!(
                "{} bytes is not a whole number of AES blocks",
                data.len()
            )));
        }
        Ok(bytemuck::cast_slice_mut(data))
    }

    /// Encrypts `data` in place. `iv` is ignored in ECB mode.
    pub fn encrypt(&self, iv: Block, data: &mut [u8]) -> Result<(), Error> {
        let blocks = Self::as_blocks(data)?;
        match self.mode {
            Mode::Ecb => self.encrypt_blocks(blocks),
            Mode::Cbc => {
                let mut chain = iv;
                for block in blocks {
                    let mut b = (Block::from(*block) ^ chain).into();
                    self.encrypt_blocks(std::slice::from_mut(&mut b));
                    chain = Block::from(b);
                    *block = b;
                }
            }
        }
        Ok(())
    }

    /// Decrypts `data` in place. `iv` is ignored in ECB mode.
    pub fn decrypt(&self, iv: Block, data: &mut [u8]) -> Result<(), Error> {
        let blocks = Self::as_blocks(data)?;
        match self.mode {
            Mode::Ecb => self.decrypt_blocks(blocks),
            Mode::Cbc => {
                let mut chain = iv;
                for block in blocks {
                    let ct = Block::from(*block);
                    self.decrypt_blocks(std::slice::from_mut(block));
                    *block = (Block::from(*block) ^ chain).into();
                    chain = ct;
                }
            }
        }
        Ok(())
    }

    /// Fills `out` with the keystream `E(start), E(start + 1), ...`.
    ///
    /// # Panics
    /// If `out.len()` is not a multiple of 16.
    pub(crate) fn fill_ctr(&self, start: u128, out: &mut [u8]) {
        assert_eq!(0, out.len() % Block::BYTES, "keystream must be whole blocks");
        let blocks: &mut [aes::Block] = bytemuck::cast_slice_mut(out);
        for (i, block) in blocks.iter_mut().enumerate() {
            *block = Array((start + i as u128).to_le_bytes());
        }
        self.encrypt_blocks(blocks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aes128_known_answer() {
        // FIPS-197 appendix C.1
        let key: Vec<u8> = (0..16).collect();
        let mut data: Vec<u8> = (0..16).map(|i| i * 0x11).collect();
        let cipher = SymCipher::new(&key, Mode::Ecb).unwrap();
        cipher.encrypt(Block::ZERO, &mut data).unwrap();
        assert_eq!(
            [
                0x69, 0xc4, 0xe0, 0xd8, 0x6a, 0x7b, 0x04, 0x30, 0xd8, 0xcd, 0xb7, 0x80, 0x70, 0xb4,
                0xc5, 0x5a
            ],
            data.as_slice()
        );
    }

    #[test]
    fn test_roundtrip_all_key_sizes_and_modes() {
        for key_len in [16, 24, 32] {
            for mode in [Mode::Ecb, Mode::Cbc] {
                let key = vec![7_u8; key_len];
                let cipher = SymCipher::new(&key, mode).unwrap();
                let plain: Vec<u8> = (0..64).collect();
                let mut data = plain.clone();
                let iv = Block::from(42_u128);
                cipher.encrypt(iv, &mut data).unwrap();
                assert_ne!(plain, data);
                cipher.decrypt(iv, &mut data).unwrap();
                assert_eq!(plain, data);
            }
        }
    }

    #[test]
    fn test_cbc_chains_blocks() {
        let cipher = SymCipher::new(&[1; 16], Mode::Cbc).unwrap();
        let mut data = vec![0_u8; 32];
        cipher.encrypt(Block::ZERO, &mut data).unwrap();
        assert_ne!(data[..16], data[16..]);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(SymCipher::new(&[0; 20], Mode::Ecb), Err(Error::Crypto(_))));
        let cipher = SymCipher::new(&[0; 16], Mode::Ecb).unwrap();
        assert!(cipher.encrypt(Block::ZERO, &mut [0; 15]).is_err());
    }

    #[test]
    fn test_fill_ctr_matches_ecb() {
        let cipher = SymCipher::new(&[3; 32], Mode::Ecb).unwrap();
        let mut stream = vec![0_u8; 48];
        cipher.fill_ctr(5, &mut stream);
        let mut expected: Vec<u8> = (5_u128..8).flat_map(|c| c.to_le_bytes()).collect();
        cipher.encrypt(Block::ZERO, &mut expected).unwrap();
        assert_eq!(expected, stream);
    }
}
