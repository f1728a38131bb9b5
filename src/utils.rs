use std::ops::BitXorAssign;

use crate::error::Error;

mod rand_compat;

pub(crate) use rand_compat::RngCompat;

pub(crate) fn xor_inplace<T: Copy + BitXorAssign>(a: &mut [T], b: &[T]) {
    a.iter_mut().zip(b).for_each(|(a, b)| {
        *a ^= *b;
    });
}

/// XORs `b` into `a`, eight bytes at a time with a byte-wise tail.
pub(crate) fn xor_bytes_inplace(a: &mut [u8], b: &[u8]) {
    let n = a.len().min(b.len());
    let words = n / 8 * 8;
    for (a, b) in a[..words].chunks_exact_mut(8).zip(b[..words].chunks_exact(8)) {
        let mut x = [0; 8];
        x.copy_from_slice(a);
        let mut y = [0; 8];
        y.copy_from_slice(b);
        a.copy_from_slice(&(u64::from_le_bytes(x) ^ u64::from_le_bytes(y)).to_le_bytes());
    }
    xor_inplace(&mut a[words..n], &b[words..n]);
}

/// Masks `v` to its lowest `bitlen` bits.
#[inline]
pub(crate) fn mask_bits(v: u64, bitlen: usize) -> u64 {
    if bitlen >= 64 { v } else { v & ((1 << bitlen) - 1) }
}

/// Sequential reader over a received message.
///
/// Running out of data means the peer sent less than the circuit requires.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(Error::violation(format!(
                "message too short: needed {end} bytes, got {}",
                self.buf.len()
            )));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_bytes_inplace_with_tail() {
        let mut a: Vec<u8> = (0..19).collect();
        let b: Vec<u8> = (0..19).map(|i| i * 3).collect();
        let expected: Vec<u8> = a.iter().zip(&b).map(|(x, y)| x ^ y).collect();
        xor_bytes_inplace(&mut a, &b);
        assert_eq!(expected, a);
    }

    #[test]
    fn test_mask_bits() {
        assert_eq!(0xff, mask_bits(0x1ff, 8));
        assert_eq!(u64::MAX, mask_bits(u64::MAX, 64));
    }

    #[test]
    fn test_byte_reader_detects_short_message() {
        let mut r = ByteReader::new(&[1, 2, 3]);
        assert_eq!(&[1, 2], r.take(2).unwrap());
        assert_eq!(1, r.remaining());
        assert!(matches!(r.take(2), Err(Error::ProtocolViolation(_))));
    }
}
