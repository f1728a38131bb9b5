//! Masking functions: how OT pads turn into the sender's messages and the
//! correction bits sent to the receiver.
//!
//! All functions operate on block-local buffers: bit `i * bitlen` of every
//! buffer belongs to the `i`-th OT of the block.
use aes::{
    Aes128,
    cipher::{Array, BlockCipherEncrypt, KeyInit},
};

use crate::{
    bitvec::{get_bit, get_bits, get_int, set_bits, set_int, xor_bits},
    block::Block,
    error::Error,
    ot::OtFlavor,
    utils::{mask_bits, xor_bytes_inplace},
};

/// Strategy deriving the sender's messages from the OT pads.
pub(crate) trait MaskingFunction: Send + Sync {
    /// Fills `x1` with the message correlated to `x0` for the OTs
    /// `first_ot..first_ot + num_ots` of the task.
    fn correlate(&self, first_ot: usize, num_ots: usize, bitlen: usize, x0: &[u8], x1: &mut [u8]);

    /// Sender side: derives `x0`/`x1` from the pads (or masks the given
    /// messages) and returns the correction message for the receiver.
    #[allow(clippy::too_many_arguments)]
    fn mask(
        &self,
        flavor: OtFlavor,
        first_ot: usize,
        num_ots: usize,
        bitlen: usize,
        pads: [&[u8]; 2],
        x0: &mut [u8],
        x1: &mut [u8],
    ) -> Vec<u8> {
        let nbytes = (num_ots * bitlen).div_ceil(8);
        let [p0, p1] = pads;
        match flavor {
            OtFlavor::General => {
                let mut msg = Vec::with_capacity(2 * nbytes);
                msg.extend_from_slice(&x0[..nbytes]);
                msg.extend_from_slice(&x1[..nbytes]);
                xor_bytes_inplace(&mut msg[..nbytes], &p0[..nbytes]);
                xor_bytes_inplace(&mut msg[nbytes..], &p1[..nbytes]);
                msg
            }
            OtFlavor::Correlated => {
                x0[..nbytes].copy_from_slice(&p0[..nbytes]);
                self.correlate(first_ot, num_ots, bitlen, x0, x1);
                let mut msg = x1[..nbytes].to_vec();
                xor_bytes_inplace(&mut msg, &p1[..nbytes]);
                msg
            }
            OtFlavor::Random => {
                x0[..nbytes].copy_from_slice(&p0[..nbytes]);
                x1[..nbytes].copy_from_slice(&p1[..nbytes]);
                vec![]
            }
        }
    }

    /// Receiver side: recovers the chosen messages from the pads and the
    /// sender's correction message.
    fn unmask(
        &self,
        flavor: OtFlavor,
        num_ots: usize,
        bitlen: usize,
        choices: &[u8],
        pad: &[u8],
        msg: &[u8],
        out: &mut [u8],
    ) -> Result<(), Error> {
        let nbytes = (num_ots * bitlen).div_ceil(8);
        let expected = match flavor {
            OtFlavor::General => 2 * nbytes,
            OtFlavor::Correlated => nbytes,
            OtFlavor::Random => 0,
        };
        if msg.len() != expected {
            return Err(Error::violation(format!(
                "OT correction of {} bytes, expected {expected}",
                msg.len()
            )));
        }
        out[..nbytes].copy_from_slice(&pad[..nbytes]);
        if flavor == OtFlavor::Random {
            return Ok(());
        }
        let mut scratch = vec![0; bitlen.div_ceil(8)];
        for i in 0..num_ots {
            let c = get_bit(choices, i);
            let half = match (flavor, c) {
                (OtFlavor::General, false) => &msg[..nbytes],
                (OtFlavor::General, true) => &msg[nbytes..],
                (_, true) => msg,
                (_, false) => continue,
            };
            get_bits(half, &mut scratch, i * bitlen, bitlen);
            xor_bits(out, &scratch, i * bitlen, bitlen);
        }
        Ok(())
    }
}

/// Expands a 128-bit seed into a `bitlen`-bit pad written at bit `pos` of `dst`.
///
/// Up to 128 bits the seed is used directly, longer pads are the AES-CTR
/// keystream under the seed.
pub(crate) fn expand(seed: Block, bitlen: usize, dst: &mut [u8], pos: usize) {
    if bitlen <= Block::BITS {
        set_bits(dst, seed.as_bytes(), pos, bitlen);
        return;
    }
    let aes = Aes128::new(&seed.into());
    let mut stream: Vec<aes::Block> = (0..bitlen.div_ceil(Block::BITS) as u128)
        .map(|ctr| Array(ctr.to_le_bytes()))
        .collect();
    aes.encrypt_blocks(&mut stream);
    set_bits(dst, bytemuck::cast_slice(&stream), pos, bitlen);
}

/// XOR correlation `x1 = x0 ^ delta` with one `bitlen`-bit delta for all OTs.
pub(crate) struct XorMasking {
    delta: Vec<u8>,
}

impl XorMasking {
    /// Creates the masking for `bitlen`-bit messages with the given delta.
    ///
    /// # Panics
    /// If `delta` holds fewer than `bitlen` bits.
    pub(crate) fn new(bitlen: usize, delta: &[u8]) -> Self {
        assert!(delta.len() * 8 >= bitlen, "delta shorter than {bitlen} bits");
        Self {
            delta: delta[..bitlen.div_ceil(8)].to_vec(),
        }
    }

    /// A masking without correlation, for general and random OT.
    pub(crate) fn uncorrelated(bitlen: usize) -> Self {
        Self {
            delta: vec![0; bitlen.div_ceil(8)],
        }
    }
}

impl MaskingFunction for XorMasking {
    fn correlate(&self, _first_ot: usize, num_ots: usize, bitlen: usize, x0: &[u8], x1: &mut [u8]) {
        let nbytes = (num_ots * bitlen).div_ceil(8);
        x1[..nbytes].copy_from_slice(&x0[..nbytes]);
        for i in 0..num_ots {
            xor_bits(x1, &self.delta, i * bitlen, bitlen);
        }
    }
}

/// Correlation for arithmetic multiplication triples.
///
/// OT `k * l + j` carries the correlation `x1 = x0 + b_k * 2^j mod 2^l`, so a
/// receiver choosing bit `j` of `a` learns a share of `a * b_k`.
pub(crate) struct ArithMtMasking {
    bitlen: usize,
    b: Vec<u64>,
}

impl ArithMtMasking {
    pub(crate) fn new(bitlen: usize, b: Vec<u64>) -> Self {
        Self { bitlen, b }
    }
}

impl MaskingFunction for ArithMtMasking {
    fn correlate(&self, first_ot: usize, num_ots: usize, bitlen: usize, x0: &[u8], x1: &mut [u8]) {
        debug_assert_eq!(self.bitlen, bitlen);
        for i in 0..num_ots {
            let ot = first_ot + i;
            let (k, j) = (ot / self.bitlen, ot % self.bitlen);
            let v = get_int(x0, i * bitlen, bitlen).wrapping_add(self.b[k] << j);
            set_int(x1, mask_bits(v, bitlen), i * bitlen, bitlen);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitvec::BitVector;

    fn bits_of(buf: &[u8], i: usize, bitlen: usize) -> BitVector {
        let mut out = vec![0; bitlen.div_ceil(8)];
        get_bits(buf, &mut out, i * bitlen, bitlen);
        BitVector::attach(out, bitlen)
    }

    #[test]
    fn test_xor_correlation() {
        let m = XorMasking::new(5, &[0b10110]);
        let x0 = [0xff_u8, 0x03];
        let mut x1 = [0_u8; 2];
        m.correlate(0, 2, 5, &x0, &mut x1);
        assert_eq!(bits_of(&x1, 0, 5), bits_of(&[0b01001], 0, 5));
        assert_eq!(bits_of(&x1, 1, 5), bits_of(&[0b01001], 0, 5));
    }

    #[test]
    fn test_arith_correlation() {
        let l = 8;
        let m = ArithMtMasking::new(l, vec![3, 5]);
        let x0: Vec<u8> = vec![250, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];
        let mut x1 = vec![0; 16];
        m.correlate(0, 16, l, &x0, &mut x1);
        assert_eq!(250_u8.wrapping_add(3), x1[0]);
        assert_eq!(1 + (3 << 1), x1[1]);
        assert_eq!((7 + (3_u64 << 7)) as u8, x1[7]);
        assert_eq!(8 + 5, x1[8]);
        assert_eq!(10 + (5 << 2), x1[10]);
    }

    #[test]
    fn test_mask_unmask_all_flavors() {
        let bitlen = 13;
        let n = 11;
        let nbytes = (n * bitlen as usize).div_ceil(8);
        let p0: Vec<u8> = (0..nbytes as u8).map(|i| i.wrapping_mul(31)).collect();
        let p1: Vec<u8> = (0..nbytes as u8).map(|i| i.wrapping_mul(17) ^ 0x5a).collect();
        let choices = [0b1011_0101_u8, 0b101];
        let m = XorMasking::new(bitlen, &[0x34, 0x12]);
        for flavor in [OtFlavor::General, OtFlavor::Correlated, OtFlavor::Random] {
            let mut x0: Vec<u8> = (0..nbytes as u8).collect();
            let mut x1: Vec<u8> = (0..nbytes as u8).map(|i| !i).collect();
            let msg = m.mask(flavor, 0, n, bitlen, [p0.as_slice(), p1.as_slice()], &mut x0, &mut x1);
            for i in 0..n {
                let c = get_bit(&choices, i);
                let pad = if c { &p1 } else { &p0 };
                let mut out = vec![0; nbytes];
                m.unmask(flavor, n, bitlen, &choices, pad, &msg, &mut out).unwrap();
                let expected = if c { &x1 } else { &x0 };
                assert_eq!(bits_of(expected, i, bitlen), bits_of(&out, i, bitlen), "{flavor:?} OT {i}");
            }
        }
    }

    #[test]
    fn test_unmask_rejects_wrong_length() {
        let m = XorMasking::uncorrelated(8);
        let mut out = [0; 1];
        let r = m.unmask(OtFlavor::Correlated, 1, 8, &[0], &[0], &[1, 2], &mut out);
        assert!(matches!(r, Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn test_expand_mask() {
        let seed = Block::from(0x0102_0304_u128);
        let mut short = [0_u8; 4];
        expand(seed, 20, &mut short, 4);
        assert_eq!(bits_of(&short[..], 0, 24).get_int(4, 20), 0x0304 | (0x02 << 16));

        let mut long = vec![0_u8; 64];
        expand(seed, 512, &mut long, 0);
        let mut again = vec![0_u8; 64];
        expand(seed, 512, &mut again, 0);
        assert_eq!(long, again);
        assert_ne!(long[..16], long[16..32]);
    }
}
