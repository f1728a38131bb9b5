//! Transpose bit-matrices fast.
//!
//! The matrix is split into 64x64 tiles that are loaded into registers and
//! transposed by Eklundh's recursive doubling: in round `j` (32, 16, ..., 1)
//! the off-diagonal `j x j` sub-blocks of every `2j x 2j` block are swapped.
//! A post-pass then moves every tile to its transposed position, which is what
//! makes non-square matrices work.

/// Side length of a register tile.
const TILE: usize = 64;

/// Masks selecting the low half of every `2j`-bit group, indexed by `log2(j)`.
const SWAP_MASKS: [u64; 6] = [
    0x5555_5555_5555_5555,
    0x3333_3333_3333_3333,
    0x0f0f_0f0f_0f0f_0f0f,
    0x00ff_00ff_00ff_00ff,
    0x0000_ffff_0000_ffff,
    0x0000_0000_ffff_ffff,
];

/// Transposes a single 64x64 tile where row `i` is `tile[i]` and column `c`
/// is bit `c` of each row.
#[inline]
fn transpose_tile(tile: &mut [u64; TILE]) {
    for level in (0..SWAP_MASKS.len()).rev() {
        let j = 1 << level;
        let mask = SWAP_MASKS[level];
        for k in (0..TILE).filter(|k| k & j == 0) {
            let t = ((tile[k] >> j) ^ tile[k + j]) & mask;
            tile[k + j] ^= t;
            tile[k] ^= t << j;
        }
    }
}

#[inline]
fn load_word(buf: &[u8], word: usize) -> u64 {
    let mut bytes = [0; 8];
    bytes.copy_from_slice(&buf[word * 8..word * 8 + 8]);
    u64::from_le_bytes(bytes)
}

/// Transposes the row-major `rows x cols` bit matrix in `buf` in place.
///
/// Afterwards `buf` holds the `cols x rows` matrix in row-major order.
///
/// # Panics
/// - If `rows` or `cols` is not a multiple of 64
/// - If `buf.len() * 8 != rows * cols`
pub(crate) fn eklundh_transpose(buf: &mut [u8], rows: usize, cols: usize) {
    assert_eq!(0, rows % TILE, "rows must be a multiple of {TILE}");
    assert_eq!(0, cols % TILE, "columns must be a multiple of {TILE}");
    assert_eq!(rows * cols, buf.len() * 8, "buffer must hold exactly rows * cols bits");

    let row_words = cols / TILE;
    let col_words = rows / TILE;
    let mut words: Vec<u64> = (0..buf.len() / 8).map(|w| load_word(buf, w)).collect();

    let mut tile = [0_u64; TILE];
    for bi in 0..col_words {
        for bj in 0..row_words {
            for (t, word) in tile.iter_mut().enumerate() {
                *word = words[(bi * TILE + t) * row_words + bj];
            }
            transpose_tile(&mut tile);
            for (t, word) in tile.iter().enumerate() {
                words[(bi * TILE + t) * row_words + bj] = *word;
            }
        }
    }

    // Tile (bi, bj) now holds the transposed content of the output tile (bj, bi).
    for bi in 0..col_words {
        for bj in 0..row_words {
            for t in 0..TILE {
                let word = words[(bi * TILE + t) * row_words + bj];
                let out = (bj * TILE + t) * col_words + bi;
                buf[out * 8..out * 8 + 8].copy_from_slice(&word.to_le_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::bitvec::get_bit;

    fn arbitrary_bitmat(max_tiles: usize) -> BoxedStrategy<(Vec<u8>, usize, usize)> {
        ((1..=max_tiles), (1..=max_tiles))
            .prop_flat_map(|(r, c)| {
                let (rows, cols) = (r * TILE, c * TILE);
                (vec![any::<u8>(); rows * cols / 8], Just(rows), Just(cols))
            })
            .boxed()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn test_double_transpose((v, rows, cols) in arbitrary_bitmat(6)) {
            let mut m = v.clone();
            eklundh_transpose(&mut m, rows, cols);
            eklundh_transpose(&mut m, cols, rows);
            prop_assert_eq!(v, m);
        }
    }

    fn check_transpose(rows: usize, cols: usize) {
        let v: Vec<u8> = (0..rows * cols / 8).map(|i| (i * 37 + 11) as u8).collect();
        let mut t = v.clone();
        eklundh_transpose(&mut t, rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                assert_eq!(
                    get_bit(&v, r * cols + c),
                    get_bit(&t, c * rows + r),
                    "mismatch at ({r}, {c}) for {rows}x{cols}"
                );
            }
        }
        eklundh_transpose(&mut t, cols, rows);
        assert_eq!(v, t);
    }

    #[test]
    fn test_transpose_shapes() {
        check_transpose(128, 128);
        check_transpose(256, 64);
        check_transpose(64, 256);
        check_transpose(512, 128);
    }

    #[test]
    fn test_identity_is_fixed_point() {
        let mut m = vec![0_u8; 64 * 64 / 8];
        for i in 0..64 {
            m[i * 8 + i / 8] |= 1 << (i % 8);
        }
        let expected = m.clone();
        eklundh_transpose(&mut m, 64, 64);
        assert_eq!(expected, m);
    }
}
