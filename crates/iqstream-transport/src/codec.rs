//! # Block Erasure Codec
//!
//! A frame of `k` original blocks is protected by `r` recovery blocks. Any
//! `k` distinct blocks of the `k + r` are enough to rebuild the frame.
//!
//! The codec sits behind [`ErasureDecoder`] / [`ErasureEncoder`] so the
//! playout buffer does not care which code produced the recovery blocks:
//!
//! - [`CauchyCodec`]: Cauchy Reed-Solomon over GF(2^8), polynomial 0x14D,
//!   with the cm256 coefficient matrix (first recovery row is plain XOR
//!   parity). This is the default and matches existing senders.
//! - [`RsSimdCodec`]: the `reed-solomon-simd` Leopard code. Both ends of the
//!   link must agree on it.
//!
//! ## GF(2^8) Arithmetic
//!
//! Addition is XOR. Multiplication uses full 256×256 tables generated at
//! compile time from log/exp tables (2 generates the multiplicative group of
//! x^8 + x^6 + x^3 + x^2 + 1).

use thiserror::Error;

use crate::wire::MAX_BLOCKS_PER_FRAME;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Why a frame could not be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid coding parameters")]
    InvalidParams,
    #[error("original + recovery blocks exceed {MAX_BLOCKS_PER_FRAME}")]
    TooManyBlocks,
    #[error("block index {0} out of range")]
    IndexOutOfRange(u8),
    #[error("duplicate block index {0}")]
    DuplicateIndex(u8),
    #[error("{erased} blocks erased but only {available} recovery blocks")]
    InsufficientBlocks { erased: usize, available: usize },
    #[error("block is {actual} bytes, expected {expected}")]
    BlockSize { expected: usize, actual: usize },
    #[error("erasure matrix is singular")]
    Singular,
    #[error("codec backend: {0}")]
    Backend(String),
}

/// Why recovery blocks could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("invalid coding parameters")]
    InvalidParams,
    #[error("original + recovery blocks exceed {MAX_BLOCKS_PER_FRAME}")]
    TooManyBlocks,
    #[error("expected {expected} original blocks, got {actual}")]
    OriginalCount { expected: usize, actual: usize },
    #[error("frame is {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },
    #[error("block is {actual} bytes, expected {expected}")]
    BlockSize { expected: usize, actual: usize },
    #[error("codec backend: {0}")]
    Backend(String),
}

// ─── Parameters & Blocks ─────────────────────────────────────────────────────

/// Shape of one coded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodingParams {
    original_count: usize,
    recovery_count: usize,
    block_bytes: usize,
}

impl CodingParams {
    pub fn new(
        original_count: usize,
        recovery_count: usize,
        block_bytes: usize,
    ) -> Result<Self, DecodeError> {
        if original_count == 0 || recovery_count == 0 || block_bytes == 0 {
            return Err(DecodeError::InvalidParams);
        }
        if original_count + recovery_count > MAX_BLOCKS_PER_FRAME {
            return Err(DecodeError::TooManyBlocks);
        }
        Ok(CodingParams {
            original_count,
            recovery_count,
            block_bytes,
        })
    }

    #[inline]
    pub fn original_count(&self) -> usize {
        self.original_count
    }

    #[inline]
    pub fn recovery_count(&self) -> usize {
        self.recovery_count
    }

    #[inline]
    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Block index of the `n`-th recovery block.
    #[inline]
    pub fn recovery_block_index(&self, n: usize) -> u8 {
        debug_assert!(n < self.recovery_count);
        (self.original_count + n) as u8
    }
}

/// An original block that arrived intact.
#[derive(Debug, Clone, Copy)]
pub struct OriginalBlock<'a> {
    pub index: u8,
    pub data: &'a [u8],
}

/// A received recovery block. Decoding rewrites it in place.
#[derive(Debug)]
pub struct RecoveryBlock<'a> {
    pub index: u8,
    pub data: &'a mut [u8],
}

/// Rebuilds erased original blocks from recovery blocks.
pub trait ErasureDecoder: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Recover the original blocks missing from `originals`.
    ///
    /// On success the first `n` entries of `recovery` hold the recovered
    /// originals and their `index` is rewritten to the original block index,
    /// where `n` (the return value) is the number of erased originals.
    fn decode(
        &self,
        params: &CodingParams,
        originals: &[OriginalBlock<'_>],
        recovery: &mut [RecoveryBlock<'_>],
    ) -> Result<usize, DecodeError>;
}

/// Produces the recovery blocks of a frame.
pub trait ErasureEncoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// `originals` must hold exactly `params.original_count()` blocks in
    /// index order. Returns `params.recovery_count()` blocks.
    fn encode(
        &self,
        params: &CodingParams,
        originals: &[&[u8]],
    ) -> Result<Vec<Vec<u8>>, EncodeError>;
}

/// Erased original indices after checking indices, duplicates and sizes.
fn erased_indices(
    params: &CodingParams,
    originals: &[OriginalBlock<'_>],
    recovery: &[RecoveryBlock<'_>],
) -> Result<Vec<u8>, DecodeError> {
    let k = params.original_count;
    let bb = params.block_bytes;
    let mut seen = [false; MAX_BLOCKS_PER_FRAME];

    for b in originals {
        let idx = b.index as usize;
        if idx >= k {
            return Err(DecodeError::IndexOutOfRange(b.index));
        }
        if seen[idx] {
            return Err(DecodeError::DuplicateIndex(b.index));
        }
        if b.data.len() != bb {
            return Err(DecodeError::BlockSize {
                expected: bb,
                actual: b.data.len(),
            });
        }
        seen[idx] = true;
    }
    for b in recovery {
        let idx = b.index as usize;
        if idx < k || idx >= k + params.recovery_count {
            return Err(DecodeError::IndexOutOfRange(b.index));
        }
        if seen[idx] {
            return Err(DecodeError::DuplicateIndex(b.index));
        }
        if b.data.len() != bb {
            return Err(DecodeError::BlockSize {
                expected: bb,
                actual: b.data.len(),
            });
        }
        seen[idx] = true;
    }

    let erased: Vec<u8> = (0..k).filter(|&i| !seen[i]).map(|i| i as u8).collect();
    if erased.len() > recovery.len() {
        return Err(DecodeError::InsufficientBlocks {
            erased: erased.len(),
            available: recovery.len(),
        });
    }
    Ok(erased)
}

fn check_encode_input(params: &CodingParams, originals: &[&[u8]]) -> Result<(), EncodeError> {
    if originals.len() != params.original_count {
        return Err(EncodeError::OriginalCount {
            expected: params.original_count,
            actual: originals.len(),
        });
    }
    if let Some(bad) = originals.iter().find(|b| b.len() != params.block_bytes) {
        return Err(EncodeError::BlockSize {
            expected: params.block_bytes,
            actual: bad.len(),
        });
    }
    Ok(())
}

// ─── GF(2^8) Arithmetic ────────────────────────────────────────────────────

/// Multiplication and inverse tables for GF(2^8) with polynomial 0x14D.
struct Gf256Tables {
    mul: [[u8; 256]; 256],
    inv: [u8; 256],
}

impl Gf256Tables {
    const fn generate() -> Self {
        let mut mul = [[0u8; 256]; 256];
        let mut inv = [0u8; 256];

        let mut exp = [0u8; 256];
        let mut log = [0u8; 256];
        let mut val: u16 = 1;
        let mut i: usize = 0;
        while i < 255 {
            exp[i] = val as u8;
            log[val as usize] = i as u8;
            val <<= 1;
            if val & 0x100 != 0 {
                val ^= 0x14D;
            }
            i += 1;
        }
        exp[255] = exp[0];

        let mut a = 1usize;
        while a < 256 {
            let mut b = 1usize;
            while b < 256 {
                let log_sum = (log[a] as u16 + log[b] as u16) % 255;
                mul[a][b] = exp[log_sum as usize];
                b += 1;
            }
            a += 1;
        }

        // inv[0] stays 0: zero has no inverse
        i = 1;
        while i < 256 {
            let l = log[i] as u16;
            inv[i] = exp[((255 - l) % 255) as usize];
            i += 1;
        }

        Gf256Tables { mul, inv }
    }
}

static GF: Gf256Tables = Gf256Tables::generate();

#[inline]
fn gf_mul(a: u8, b: u8) -> u8 {
    GF.mul[a as usize][b as usize]
}

#[inline]
fn gf_inv(a: u8) -> u8 {
    GF.inv[a as usize]
}

#[inline]
fn gf_div(a: u8, b: u8) -> u8 {
    gf_mul(a, gf_inv(b))
}

/// `dst += coeff * src`
fn gf_muladd_mem(dst: &mut [u8], src: &[u8], coeff: u8) {
    match coeff {
        0 => {}
        1 => dst.iter_mut().zip(src).for_each(|(d, s)| *d ^= *s),
        c => {
            let row = &GF.mul[c as usize];
            dst.iter_mut()
                .zip(src)
                .for_each(|(d, s)| *d ^= row[*s as usize]);
        }
    }
}

/// `dst *= coeff`
fn gf_mul_mem_inplace(dst: &mut [u8], coeff: u8) {
    if coeff == 1 {
        return;
    }
    let row = &GF.mul[coeff as usize];
    dst.iter_mut().for_each(|d| *d = row[*d as usize]);
}

// ─── Cauchy Reed-Solomon ─────────────────────────────────────────────────────

/// Cauchy matrix element for recovery row `x_i`, original column `y_j`,
/// normalized so that the first recovery row is all ones:
/// `(y_j + x_0) / (x_i + y_j)` with `x_0 = original_count`.
#[inline]
fn cauchy_element(params: &CodingParams, x_i: u8, y_j: u8) -> u8 {
    if params.original_count == 1 {
        return 1;
    }
    let x_0 = params.original_count as u8;
    gf_div(y_j ^ x_0, x_i ^ y_j)
}

/// Cauchy Reed-Solomon codec compatible with cm256 senders.
#[derive(Debug, Default, Clone, Copy)]
pub struct CauchyCodec;

impl CauchyCodec {
    pub fn new() -> Self {
        CauchyCodec
    }
}

impl ErasureEncoder for CauchyCodec {
    fn name(&self) -> &'static str {
        "cauchy"
    }

    fn encode(
        &self,
        params: &CodingParams,
        originals: &[&[u8]],
    ) -> Result<Vec<Vec<u8>>, EncodeError> {
        check_encode_input(params, originals)?;

        let mut out = Vec::with_capacity(params.recovery_count);
        for n in 0..params.recovery_count {
            let x_i = params.recovery_block_index(n);
            let mut block = vec![0u8; params.block_bytes];
            for (j, orig) in originals.iter().enumerate() {
                gf_muladd_mem(&mut block, orig, cauchy_element(params, x_i, j as u8));
            }
            out.push(block);
        }
        Ok(out)
    }
}

impl ErasureDecoder for CauchyCodec {
    fn name(&self) -> &'static str {
        "cauchy"
    }

    fn decode(
        &self,
        params: &CodingParams,
        originals: &[OriginalBlock<'_>],
        recovery: &mut [RecoveryBlock<'_>],
    ) -> Result<usize, DecodeError> {
        let erased = erased_indices(params, originals, recovery)?;
        let n = erased.len();
        if n == 0 {
            return Ok(0);
        }
        let rows = &mut recovery[..n];

        // Remove the contribution of every original that arrived.
        for row in rows.iter_mut() {
            for orig in originals {
                let c = cauchy_element(params, row.index, orig.index);
                gf_muladd_mem(row.data, orig.data, c);
            }
        }

        // What remains is an n×n Cauchy system over the erased columns.
        let mut matrix: Vec<Vec<u8>> = rows
            .iter()
            .map(|row| {
                erased
                    .iter()
                    .map(|&y| cauchy_element(params, row.index, y))
                    .collect()
            })
            .collect();

        // Gauss-Jordan; `order[col]` is the row holding the pivot of `col`.
        let mut order: Vec<usize> = (0..n).collect();
        for col in 0..n {
            let found = (col..n)
                .find(|&r| matrix[order[r]][col] != 0)
                .ok_or(DecodeError::Singular)?;
            order.swap(col, found);
            let prow = order[col];

            let inv = gf_inv(matrix[prow][col]);
            for c in &mut matrix[prow][col..] {
                *c = gf_mul(*c, inv);
            }
            gf_mul_mem_inplace(rows[prow].data, inv);

            let pivot: Vec<u8> = matrix[prow].clone();
            for r in 0..n {
                if r == prow {
                    continue;
                }
                let factor = matrix[r][col];
                if factor == 0 {
                    continue;
                }
                for (c, p) in matrix[r][col..].iter_mut().zip(&pivot[col..]) {
                    *c ^= gf_mul(factor, *p);
                }
                let (src, dst) = if prow < r {
                    let (head, tail) = rows.split_at_mut(r);
                    (&*head[prow].data, &mut *tail[0].data)
                } else {
                    let (head, tail) = rows.split_at_mut(prow);
                    (&*tail[0].data, &mut *head[r].data)
                };
                gf_muladd_mem(dst, src, factor);
            }
        }

        // Row `order[col]` now holds erased column `col`; put it in place.
        let mut placed: Vec<Option<Vec<u8>>> = vec![None; n];
        for (col, &row) in order.iter().enumerate() {
            if row != col {
                placed[col] = Some(rows[row].data.to_vec());
            }
        }
        for (col, data) in placed.into_iter().enumerate() {
            if let Some(data) = data {
                rows[col].data.copy_from_slice(&data);
            }
            rows[col].index = erased[col];
        }

        Ok(n)
    }
}

// ─── reed-solomon-simd ───────────────────────────────────────────────────────

/// Leopard-style Reed-Solomon from `reed-solomon-simd`.
///
/// Block size must be even. Recovery indices on the wire start at
/// `original_count`, as with [`CauchyCodec`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RsSimdCodec;

impl RsSimdCodec {
    pub fn new() -> Self {
        RsSimdCodec
    }
}

impl ErasureEncoder for RsSimdCodec {
    fn name(&self) -> &'static str {
        "rs-simd"
    }

    fn encode(
        &self,
        params: &CodingParams,
        originals: &[&[u8]],
    ) -> Result<Vec<Vec<u8>>, EncodeError> {
        check_encode_input(params, originals)?;
        reed_solomon_simd::encode(
            params.original_count,
            params.recovery_count,
            originals.iter().copied(),
        )
        .map_err(|e| EncodeError::Backend(e.to_string()))
    }
}

impl ErasureDecoder for RsSimdCodec {
    fn name(&self) -> &'static str {
        "rs-simd"
    }

    fn decode(
        &self,
        params: &CodingParams,
        originals: &[OriginalBlock<'_>],
        recovery: &mut [RecoveryBlock<'_>],
    ) -> Result<usize, DecodeError> {
        let erased = erased_indices(params, originals, recovery)?;
        if erased.is_empty() {
            return Ok(0);
        }

        let k = params.original_count;
        let mut restored = reed_solomon_simd::decode(
            k,
            params.recovery_count,
            originals.iter().map(|b| (b.index as usize, b.data)),
            recovery
                .iter()
                .map(|b| (b.index as usize - k, &*b.data)),
        )
        .map_err(|e| DecodeError::Backend(e.to_string()))?;

        for (slot, &idx) in recovery.iter_mut().zip(&erased) {
            let data = restored
                .remove(&(idx as usize))
                .ok_or(DecodeError::Singular)?;
            slot.data.copy_from_slice(&data);
            slot.index = idx;
        }
        Ok(erased.len())
    }
}
