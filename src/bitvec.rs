//! Packed bit buffers.
//!
//! Bit `i` of a buffer lives in byte `i / 8` at position `i % 8` (LSB first).
//! Besides the owning [`BitVector`], this module offers the same bit-level
//! accessors as free functions over byte slices, so that worker threads can
//! fill disjoint parts of one buffer.
use std::fmt;

use rand::Rng;

use crate::transpose::eklundh_transpose;

/// Byte masks selecting the lowest `k` bits, for `k` in `0..=8`.
const LOW_MASK: [u8; 9] = [0x00, 0x01, 0x03, 0x07, 0x0f, 0x1f, 0x3f, 0x7f, 0xff];
/// Byte masks selecting all bits from position `k` upwards, for `k` in `0..=8`.
const HIGH_MASK: [u8; 9] = [0xff, 0xfe, 0xfc, 0xf8, 0xf0, 0xe0, 0xc0, 0x80, 0x00];

/// Buffers are always allocated in multiples of one AES block.
const ALLOC_BYTES: usize = 16;

fn alloc_len(bits: usize) -> usize {
    bits.div_ceil(8 * ALLOC_BYTES) * ALLOC_BYTES
}

/// Returns bit `idx` of `buf`.
#[inline]
pub(crate) fn get_bit(buf: &[u8], idx: usize) -> bool {
    (buf[idx / 8] >> (idx % 8)) & 1 == 1
}

/// Sets bit `idx` of `buf` to `bit`.
#[inline]
pub(crate) fn set_bit(buf: &mut [u8], idx: usize, bit: bool) {
    let mask = 1 << (idx % 8);
    if bit {
        buf[idx / 8] |= mask;
    } else {
        buf[idx / 8] &= !mask;
    }
}

/// XORs `bit` into bit `idx` of `buf`.
#[inline]
pub(crate) fn xor_bit(buf: &mut [u8], idx: usize, bit: bool) {
    buf[idx / 8] ^= u8::from(bit) << (idx % 8);
}

#[derive(Clone, Copy)]
enum Write {
    Set,
    Xor,
}

#[inline]
fn merge(dst: &mut [u8], idx: usize, val: u8, mask: u8, op: Write) {
    match op {
        Write::Set => dst[idx] = (dst[idx] & !mask) | (val & mask),
        Write::Xor => dst[idx] ^= val & mask,
    }
}

fn write_bits(dst: &mut [u8], src: &[u8], pos: usize, len: usize, op: Write) {
    if len == 0 {
        return;
    }
    assert!(
        pos + len <= dst.len() * 8,
        "bit range {pos}..{} exceeds destination of {} bits",
        pos + len,
        dst.len() * 8
    );
    assert!(len <= src.len() * 8, "source holds fewer than {len} bits");

    let start = pos / 8;
    let full = len / 8;
    let tail = len % 8;
    if pos % 8 == 0 && tail == 0 {
        let dst = &mut dst[start..start + full];
        match op {
            Write::Set => dst.copy_from_slice(&src[..full]),
            Write::Xor => dst.iter_mut().zip(src).for_each(|(d, s)| *d ^= s),
        }
        return;
    }

    let shift = pos % 8;
    for (i, &s) in src[..full].iter().enumerate() {
        merge(dst, start + i, s << shift, HIGH_MASK[shift], op);
        if shift != 0 {
            merge(dst, start + i + 1, s >> (8 - shift), LOW_MASK[shift], op);
        }
    }
    if tail != 0 {
        let val = u16::from(src[full] & LOW_MASK[tail]) << shift;
        let mask = u16::from(LOW_MASK[tail]) << shift;
        merge(dst, start + full, val as u8, mask as u8, op);
        if mask > 0xff {
            merge(dst, start + full + 1, (val >> 8) as u8, (mask >> 8) as u8, op);
        }
    }
}

/// Writes the first `len` bits of `src` into `dst` at bit offset `pos`.
///
/// # Panics
/// If the range does not fit into `dst` or `src` holds fewer than `len` bits.
pub(crate) fn set_bits(dst: &mut [u8], src: &[u8], pos: usize, len: usize) {
    write_bits(dst, src, pos, len, Write::Set);
}

/// XORs the first `len` bits of `src` into `dst` at bit offset `pos`.
///
/// # Panics
/// If the range does not fit into `dst` or `src` holds fewer than `len` bits.
pub(crate) fn xor_bits(dst: &mut [u8], src: &[u8], pos: usize, len: usize) {
    write_bits(dst, src, pos, len, Write::Xor);
}

/// Copies bits `pos..pos + len` of `src` into the first `len` bits of `dst`.
///
/// Bits of `dst` beyond `len` are left untouched.
///
/// # Panics
/// If the range does not fit into `src` or `dst` holds fewer than `len` bits.
pub(crate) fn get_bits(src: &[u8], dst: &mut [u8], pos: usize, len: usize) {
    if len == 0 {
        return;
    }
    assert!(
        pos + len <= src.len() * 8,
        "bit range {pos}..{} exceeds source of {} bits",
        pos + len,
        src.len() * 8
    );
    assert!(len <= dst.len() * 8, "destination holds fewer than {len} bits");

    let start = pos / 8;
    let full = len / 8;
    let tail = len % 8;
    let shift = pos % 8;
    if shift == 0 {
        dst[..full].copy_from_slice(&src[start..start + full]);
        if tail != 0 {
            merge(dst, full, src[start + full], LOW_MASK[tail], Write::Set);
        }
        return;
    }

    let byte_at = |i: usize| {
        let lo = src[start + i] >> shift;
        let hi = src.get(start + i + 1).map_or(0, |b| b << (8 - shift));
        lo | hi
    };
    for (i, d) in dst[..full].iter_mut().enumerate() {
        *d = byte_at(i);
    }
    if tail != 0 {
        merge(dst, full, byte_at(full), LOW_MASK[tail], Write::Set);
    }
}

/// Reads an integer of `len <= 64` bits starting at bit `pos`.
pub(crate) fn get_int(src: &[u8], pos: usize, len: usize) -> u64 {
    assert!(len <= 64, "integers are at most 64 bits");
    let mut bytes = [0; 8];
    get_bits(src, &mut bytes, pos, len);
    u64::from_le_bytes(bytes)
}

/// Writes the lowest `len <= 64` bits of `value` starting at bit `pos`.
pub(crate) fn set_int(dst: &mut [u8], value: u64, pos: usize, len: usize) {
    assert!(len <= 64, "integers are at most 64 bits");
    set_bits(dst, &value.to_le_bytes(), pos, len);
}

/// A heap allocated, packed bit buffer.
///
/// The buffer is always a multiple of 16 bytes long, the logical length is
/// tracked separately in bits.
#[derive(Clone, Default)]
pub struct BitVector {
    buf: Vec<u8>,
    bits: usize,
}

impl BitVector {
    /// Creates a zeroed bit vector holding `bits` bits.
    pub fn new(bits: usize) -> Self {
        Self {
            buf: vec![0; alloc_len(bits)],
            bits,
        }
    }

    /// Creates a bit vector with random content.
    pub fn random<R: Rng + ?Sized>(bits: usize, rng: &mut R) -> Self {
        let mut v = Self::new(bits);
        rng.fill_bytes(&mut v.buf);
        v.clear_padding();
        v
    }

    /// Takes ownership of `bytes` and interprets them as `bits` bits.
    ///
    /// The buffer is grown to the allocation granularity if needed.
    ///
    /// # Panics
    /// If `bytes` holds fewer than `bits` bits.
    pub fn attach(mut bytes: Vec<u8>, bits: usize) -> Self {
        assert!(bits <= bytes.len() * 8, "buffer holds fewer than {bits} bits");
        bytes.resize(alloc_len(bits).max(bytes.len()), 0);
        Self { buf: bytes, bits }
    }

    /// Gives up ownership of the underlying buffer.
    pub fn detach(self) -> Vec<u8> {
        self.buf
    }

    /// Re-creates the vector with `bits` zero bits. The old content is not preserved.
    pub fn create(&mut self, bits: usize) {
        self.buf.clear();
        self.buf.resize(alloc_len(bits), 0);
        self.bits = bits;
    }

    /// Grows or shrinks the logical length, keeping existing bits.
    pub fn resize(&mut self, bits: usize) {
        let needed = alloc_len(bits);
        if needed > self.buf.len() {
            self.buf.resize(needed, 0);
        }
        self.bits = bits;
    }

    /// Number of bits.
    pub fn len(&self) -> usize {
        self.bits
    }

    /// Whether the vector holds no bits.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Number of bytes needed for the logical length.
    pub fn byte_len(&self) -> usize {
        self.bits.div_ceil(8)
    }

    /// The bytes covering the logical length.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.byte_len()]
    }

    /// The whole underlying buffer, including allocation padding.
    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// The whole underlying buffer, including allocation padding.
    pub(crate) fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Zeroes all bits beyond the logical length.
    pub(crate) fn clear_padding(&mut self) {
        let bits = self.bits;
        let first = bits.div_ceil(8);
        if bits % 8 != 0 {
            self.buf[bits / 8] &= LOW_MASK[bits % 8];
        }
        self.buf[first..].fill(0);
    }

    fn check(&self, idx: usize) {
        assert!(idx < self.bits, "bit {idx} out of range for {} bits", self.bits);
    }

    /// Returns bit `idx`.
    pub fn get_bit(&self, idx: usize) -> bool {
        self.check(idx);
        get_bit(&self.buf, idx)
    }

    /// Sets bit `idx`.
    pub fn set_bit(&mut self, idx: usize, bit: bool) {
        self.check(idx);
        set_bit(&mut self.buf, idx, bit);
    }

    /// XORs `bit` into bit `idx`.
    pub fn xor_bit(&mut self, idx: usize, bit: bool) {
        self.check(idx);
        xor_bit(&mut self.buf, idx, bit);
    }

    /// Writes the first `len` bits of `src` at bit offset `pos`.
    pub fn set_bits(&mut self, src: &[u8], pos: usize, len: usize) {
        assert!(pos + len <= self.bits, "bit range exceeds vector length");
        set_bits(&mut self.buf, src, pos, len);
    }

    /// XORs the first `len` bits of `src` in at bit offset `pos`.
    pub fn xor_bits(&mut self, src: &[u8], pos: usize, len: usize) {
        assert!(pos + len <= self.bits, "bit range exceeds vector length");
        xor_bits(&mut self.buf, src, pos, len);
    }

    /// Copies bits `pos..pos + len` into the beginning of `dst`.
    pub fn get_bits(&self, dst: &mut [u8], pos: usize, len: usize) {
        assert!(pos + len <= self.bits, "bit range exceeds vector length");
        get_bits(&self.buf, dst, pos, len);
    }

    /// Reads the `len <= 64` bit integer stored at bit offset `pos`.
    pub fn get_int(&self, pos: usize, len: usize) -> u64 {
        assert!(pos + len <= self.bits, "bit range exceeds vector length");
        get_int(&self.buf, pos, len)
    }

    /// Stores the lowest `len <= 64` bits of `value` at bit offset `pos`.
    pub fn set_int(&mut self, value: u64, pos: usize, len: usize) {
        assert!(pos + len <= self.bits, "bit range exceeds vector length");
        set_int(&mut self.buf, value, pos, len);
    }

    /// Appends the first `len` bits of `src`, growing the vector.
    pub fn append_bits(&mut self, src: &[u8], len: usize) {
        let pos = self.bits;
        self.resize(pos + len);
        set_bits(&mut self.buf, src, pos, len);
    }

    /// Appends all bits of `other`.
    pub fn append(&mut self, other: &BitVector) {
        self.append_bits(&other.buf, other.bits);
    }

    /// Copies `src` into the buffer starting at byte `byte_pos`.
    pub fn copy_from(&mut self, src: &[u8], byte_pos: usize) {
        self.buf[byte_pos..byte_pos + src.len()].copy_from_slice(src);
    }

    /// XORs `other` into `self` byte-wise.
    pub fn xor(&mut self, other: &BitVector) {
        self.xor_bytes_at(other.as_bytes(), 0);
    }

    /// ANDs `other` into `self` byte-wise.
    pub fn and(&mut self, other: &BitVector) {
        let n = self.buf.len().min(other.buf.len());
        let (head, tail) = self.buf[..n].split_at_mut(n / 8 * 8);
        for (a, b) in head.chunks_exact_mut(8).zip(other.buf.chunks_exact(8)) {
            let v = u64::from_le_bytes((&*a).try_into().expect("chunk of 8"))
                & u64::from_le_bytes(b.try_into().expect("chunk of 8"));
            a.copy_from_slice(&v.to_le_bytes());
        }
        for (a, b) in tail.iter_mut().zip(&other.buf[n / 8 * 8..]) {
            *a &= b;
        }
    }

    /// XORs `src` into the buffer starting at byte `byte_pos`, word-at-a-time.
    pub fn xor_bytes_at(&mut self, src: &[u8], byte_pos: usize) {
        let dst = &mut self.buf[byte_pos..byte_pos + src.len()];
        crate::utils::xor_bytes_inplace(dst, src);
    }

    /// Transposes the `rows x cols` bit matrix stored in row-major order in place.
    ///
    /// Afterwards the buffer holds the `cols x rows` matrix.
    ///
    /// # Panics
    /// If `rows` or `cols` is not a multiple of 64 or the matrix exceeds the vector.
    pub fn eklundh_bit_transpose(&mut self, rows: usize, cols: usize) {
        assert!(rows * cols <= self.buf.len() * 8, "matrix exceeds vector");
        eklundh_transpose(&mut self.buf[..rows * cols / 8], rows, cols);
    }

    /// Iterates over all bits.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.bits).map(|i| get_bit(&self.buf, i))
    }
}

impl PartialEq for BitVector {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits && self.iter().eq(other.iter())
    }
}

impl Eq for BitVector {}

impl fmt::Debug for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitVector({} bits: ", self.bits)?;
        for bit in self.iter().take(256) {
            write!(f, "{}", u8::from(bit))?;
        }
        if self.bits > 256 {
            write!(f, "...")?;
        }
        write!(f, ")")
    }
}

impl FromIterator<bool> for BitVector {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let bits: Vec<bool> = iter.into_iter().collect();
        let mut v = BitVector::new(bits.len());
        for (i, bit) in bits.into_iter().enumerate() {
            set_bit(&mut v.buf, i, bit);
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    proptest! {
        #[test]
        fn set_then_get_bits_roundtrips(
            len in 1_usize..=256,
            offset in 0_usize..64,
            seed in any::<u64>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let src = BitVector::random(len, &mut rng);
            let mut target = BitVector::random(len + offset + 64, &mut rng);
            let before = target.clone();

            target.set_bits(src.as_bytes(), offset, len);
            let mut out = vec![0_u8; len.div_ceil(8)];
            target.get_bits(&mut out, offset, len);
            prop_assert_eq!(BitVector::attach(out, len), src.clone());

            for i in (0..offset).chain(offset + len..target.len()) {
                prop_assert_eq!(before.get_bit(i), target.get_bit(i));
            }
        }

        #[test]
        fn xor_bits_matches_bitwise_xor(
            len in 1_usize..=200,
            offset in 0_usize..64,
            seed in any::<u64>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let src = BitVector::random(len, &mut rng);
            let mut target = BitVector::random(len + offset, &mut rng);
            let before = target.clone();
            target.xor_bits(src.as_bytes(), offset, len);
            for i in 0..len {
                prop_assert_eq!(before.get_bit(offset + i) ^ src.get_bit(i), target.get_bit(offset + i));
            }
        }
    }

    #[test]
    fn test_alloc_granularity() {
        assert_eq!(16, BitVector::new(1).buffer().len());
        assert_eq!(16, BitVector::new(128).buffer().len());
        assert_eq!(32, BitVector::new(129).buffer().len());
        assert_eq!(0, BitVector::new(0).buffer().len());
    }

    #[test]
    fn test_create_does_not_preserve_content() {
        let mut v = BitVector::new(10);
        v.set_bit(3, true);
        v.create(10);
        assert!(!v.get_bit(3));
    }

    #[test]
    fn test_int_access() {
        let mut v = BitVector::new(3 * 13);
        v.set_int(0x1abc, 13, 13);
        v.set_int(0x1fff, 26, 13);
        assert_eq!(0, v.get_int(0, 13));
        assert_eq!(0x1abc, v.get_int(13, 13));
        assert_eq!(0x1fff, v.get_int(26, 13));
        let mut w = BitVector::new(64);
        w.set_int(u64::MAX - 1, 0, 64);
        assert_eq!(u64::MAX - 1, w.get_int(0, 64));
    }

    #[test]
    fn test_append() {
        let mut v = BitVector::default();
        v.append_bits(&[0b101], 3);
        v.append_bits(&[0b11], 2);
        assert_eq!(5, v.len());
        assert_eq!(vec![true, false, true, true, true], v.iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_xor_and() {
        let mut a: BitVector = [true, true, false, false].into_iter().collect();
        let b: BitVector = [true, false, true, false].into_iter().collect();
        let mut c = a.clone();
        a.xor(&b);
        c.and(&b);
        assert_eq!(vec![false, true, true, false], a.iter().collect::<Vec<_>>());
        assert_eq!(vec![true, false, false, false], c.iter().collect::<Vec<_>>());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_panics() {
        BitVector::new(8).get_bit(8);
    }

    #[test]
    fn test_attach_detach() {
        let v = BitVector::attach(vec![0xff, 0x01], 9);
        assert!(v.get_bit(8));
        assert_eq!(16, v.detach().len());
    }
}
