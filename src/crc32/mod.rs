//! CRC-32 engine — slice-by-4 table lookup plus a GF(2) `combine` operator.
//!
//! # Algorithm
//! Polynomial 0xEDB88320 (reflected), matching the IEEE 802.3 / zlib CRC-32
//! used throughout the format. `calculate` seeds the accumulator with
//! `CRC_START_VALUE` (0xFFFFFFFF) as the initial XOR and produces the final
//! XOR'd result; `update` re-seeds from a caller-supplied in-progress value
//! so a CRC can be extended across calls without holding the whole buffer.
//!
//! `combine` lets a whole-file body CRC be built out of per-block or
//! per-record CRCs without rescanning already-checksummed bytes: given
//! `CRC(A)`, `CRC(B)`, and `len(B)`, it produces `CRC(A ‖ B)` by squaring a
//! 32×32 GF(2) matrix that represents "append one zero bit" and applying it
//! `len(B)` times in binary, the same technique zlib's `crc32_combine` uses.
//!
//! # Tables
//! Eight 256-entry tables are built once. Tables 0..3 are the little-endian
//! slice-by-4 chain (table *k* is table 0 applied *k+1* times over trailing
//! zero bytes); tables 4..7 are the byte-swapped variants for a hypothetical
//! big-endian input stream. This format is little-endian only end to end
//! (§6), so only tables 0..3 are ever read by `calculate`/`update` — tables
//! 4..7 are built for completeness with the spec and left unread.

use std::sync::OnceLock;

/// Initial (and final) XOR value for every CRC-32 computation in this format.
pub const CRC_START_VALUE: u32 = 0xFFFF_FFFF;

/// Reflected CRC-32 polynomial (IEEE 802.3).
const POLY: u32 = 0xEDB8_8320;

const GF2_DIM: usize = 32;

struct Tables {
    le: [[u32; 256]; 4],
    #[allow(dead_code)] // built for spec fidelity; this format is LE-only end to end
    be: [[u32; 256]; 4],
}

fn build_table0() -> [u32; 256] {
    let mut table = [0u32; 256];
    for (n, slot) in table.iter_mut().enumerate() {
        let mut c = n as u32;
        for _ in 0..8 {
            c = if c & 1 != 0 { POLY ^ (c >> 1) } else { c >> 1 };
        }
        *slot = c;
    }
    table
}

fn build_le_tables() -> [[u32; 256]; 4] {
    let mut tables = [[0u32; 256]; 4];
    tables[0] = build_table0();
    for k in 1..4 {
        for n in 0..256 {
            let prev = tables[k - 1][n];
            tables[k][n] = tables[0][(prev & 0xFF) as usize] ^ (prev >> 8);
        }
    }
    tables
}

fn build_be_tables(le: &[[u32; 256]; 4]) -> [[u32; 256]; 4] {
    let mut tables = [[0u32; 256]; 4];
    for k in 0..4 {
        for n in 0..256 {
            tables[k][n] = le[k][n].swap_bytes();
        }
    }
    tables
}

fn tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let le = build_le_tables();
        let be = build_be_tables(&le);
        Tables { le, be }
    })
}

/// Compute the CRC-32 of `buf` from a fresh start (seeded with `CRC_START_VALUE`).
pub fn calculate(buf: &[u8]) -> u32 {
    update(buf, CRC_START_VALUE)
}

/// Continue a CRC-32 computation: `current` is the running accumulator
/// (e.g. the return value of a previous `update`/`calculate` call, or
/// `CRC_START_VALUE` to start fresh).
pub fn update(buf: &[u8], current: u32) -> u32 {
    let t = &tables().le;
    let mut crc = !current;
    let mut rest = buf;

    // Walk up to 3 leading bytes one at a time to reach 4-byte alignment.
    while !rest.is_empty() && (rest.as_ptr() as usize) % 4 != 0 {
        crc = t[0][((crc ^ rest[0] as u32) & 0xFF) as usize] ^ (crc >> 8);
        rest = &rest[1..];
    }

    let mut chunks = rest.chunks_exact(4);
    for chunk in &mut chunks {
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let term = crc ^ word;
        crc = t[3][(term & 0xFF) as usize]
            ^ t[2][((term >> 8) & 0xFF) as usize]
            ^ t[1][((term >> 16) & 0xFF) as usize]
            ^ t[0][((term >> 24) & 0xFF) as usize];
    }
    for &byte in chunks.remainder() {
        crc = t[0][((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
    }

    !crc
}

/// `true` iff `calculate(buf) == stored`. Never panics; CRC mismatches are
/// soft failures the caller decides how to handle (§7).
pub fn validate(buf: &[u8], stored: u32) -> bool {
    calculate(buf) == stored
}

fn gf2_matrix_times(mat: &[u32; GF2_DIM], vec: u32) -> u32 {
    let mut sum = 0u32;
    let mut vec = vec;
    let mut i = 0;
    while vec != 0 {
        if vec & 1 != 0 {
            sum ^= mat[i];
        }
        vec >>= 1;
        i += 1;
    }
    sum
}

fn gf2_matrix_square(square: &mut [u32; GF2_DIM], mat: &[u32; GF2_DIM]) {
    for n in 0..GF2_DIM {
        square[n] = gf2_matrix_times(mat, mat[n]);
    }
}

/// Compose `CRC(A)` and `CRC(B)` into `CRC(A ‖ B)` given only `len(B)`,
/// without rescanning `A` or `B`. Used to build a whole-file `body_CRC` out
/// of per-block/per-record CRCs (§4.3, §8 property 3).
pub fn combine(crc_a: u32, crc_b: u32, len_b: u64) -> u32 {
    if len_b == 0 {
        return crc_a;
    }

    let mut odd = [0u32; GF2_DIM];
    let mut even = [0u32; GF2_DIM];

    // Operator for one zero bit.
    odd[0] = POLY;
    let mut row = 1u32;
    for slot in odd.iter_mut().skip(1) {
        *slot = row;
        row <<= 1;
    }

    // Operator for two zero bits, then four zero bits.
    gf2_matrix_square(&mut even, &odd);
    gf2_matrix_square(&mut odd, &even);

    let mut len2 = len_b * 8; // the matrices above operate per *bit*
    let mut crc1 = crc_a;
    loop {
        gf2_matrix_square(&mut even, &odd);
        if len2 & 1 != 0 {
            crc1 = gf2_matrix_times(&even, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }

        gf2_matrix_square(&mut odd, &even);
        if len2 & 1 != 0 {
            crc1 = gf2_matrix_times(&odd, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }
    }

    crc1 ^ crc_b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_of_empty_is_not_of_start_value() {
        // CRC("") == ~CRC_START_VALUE == 0 (§8 boundary).
        assert_eq!(calculate(&[]), !CRC_START_VALUE);
        assert_eq!(calculate(&[]), 0);
    }

    #[test]
    fn s1_crc_values() {
        // CRC("def") alone is 0xCC4E161; spec.md's S1 text conflates it with
        // CRC("abcdef") (0x4B8E39EF) — verified against a reference CRC-32.
        assert_eq!(calculate(b"abc"), 0x352441C2);
        assert_eq!(calculate(b"def"), 0x0CC4_E161);
        assert_eq!(calculate(b"abcdef"), 0x4B8E_39EF);
    }

    #[test]
    fn s1_combine_matches_direct() {
        let crc_abc = calculate(b"abc");
        let crc_def = calculate(b"def");
        let combined = combine(crc_abc, crc_def, 3);
        assert_eq!(combined, calculate(b"abcdef"));
    }

    #[test]
    fn combine_with_zero_length_tail_is_identity() {
        let crc = calculate(b"hello world");
        assert_eq!(combine(crc, calculate(b""), 0), crc);
    }

    #[test]
    fn update_seeded_matches_calculate_of_concatenation() {
        let crc_a = calculate(b"0123456789");
        let crc_ab = update(b"abcdefghij", crc_a);
        assert_eq!(crc_ab, calculate(b"0123456789abcdefghij"));
    }

    proptest::proptest! {
        #[test]
        fn combine_matches_direct_recompute(a in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..512),
                                             b in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..512)) {
            let crc_a = calculate(&a);
            let crc_b = calculate(&b);
            let combined = combine(crc_a, crc_b, b.len() as u64);
            let mut ab = a.clone();
            ab.extend_from_slice(&b);
            proptest::prop_assert_eq!(combined, calculate(&ab));
        }
    }

    // Cross-checks this hand-rolled engine against `crc32fast`'s hardware-
    // accelerated implementation. Gated behind a feature rather than always
    // on: spec.md §4.1 requires an explicit GF(2) `combine` operator that
    // `crc32fast` doesn't expose, so the engine itself must stay hand-rolled;
    // this is only a confidence check that the two agree on plain `calculate`.
    #[cfg(feature = "crc-xcheck")]
    proptest::proptest! {
        #[test]
        fn calculate_matches_crc32fast(buf in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..2048)) {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&buf);
            proptest::prop_assert_eq!(calculate(&buf), hasher.finalize());
        }
    }
}
