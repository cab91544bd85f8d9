//! XOR parity codec.
//!
//! Scheme `ecc/NxN` splits a padded block into N equally sized data
//! segments and emits N parity segments, where parity `j` is
//! `data[j] ^ data[(j + 1) % N]`. A missing data segment is recovered from
//! any parity that covers it once the other covered segment is known, so
//! fixability is decided by iterative peeling:
//!
//! ```text
//! repeat until no progress:
//!     for each parity j on hand:
//!         if exactly one of data[j], data[j+1] is missing -> recover it
//! fixable <=> every data segment is known
//! ```

use super::{BlockFragments, CodecError, ErasureCodec, SchemeInfo};

/// Schemes this codec knows about, by supplier count.
pub const SCHEMES: &[&str] = &["ecc/2x2", "ecc/4x4", "ecc/7x7", "ecc/13x13"];

/// XOR parity codec over the `ecc/NxN` schemes.
#[derive(Debug, Clone, Copy, Default)]
pub struct XorParityCodec;

impl XorParityCodec {
    pub fn new() -> Self {
        Self
    }

    /// Default scheme for a given number of suppliers.
    pub fn scheme_for_suppliers(suppliers: usize) -> Option<&'static str> {
        SCHEMES
            .iter()
            .copied()
            .find(|name| parse_segments(name) == Some(suppliers))
    }

    /// Data segments covered by parity `j`.
    fn covered(n: usize, j: usize) -> (usize, usize) {
        (j, (j + 1) % n)
    }

    /// Run the peeling pass over a bitmap and return the recovered bitmap.
    fn peel(n: usize, data: &[bool], parity: &[bool]) -> Vec<bool> {
        let mut known = data.to_vec();
        loop {
            let mut progress = false;
            for (j, on_hand) in parity.iter().enumerate() {
                if !on_hand {
                    continue;
                }
                let (a, b) = Self::covered(n, j);
                if known[a] != known[b] {
                    known[a] = true;
                    known[b] = true;
                    progress = true;
                }
            }
            if !progress {
                return known;
            }
        }
    }
}

fn parse_segments(name: &str) -> Option<usize> {
    let dims = name.strip_prefix("ecc/")?;
    let (d, p) = dims.split_once('x')?;
    let d: usize = d.parse().ok()?;
    let p: usize = p.parse().ok()?;
    (d == p && d >= 2).then_some(d)
}

/// Correctable-error budget for a supplier count.
pub fn correctable_errors(suppliers: usize) -> usize {
    match suppliers {
        0 | 1 => 0,
        2 | 4 => 1,
        7 | 13 => 2,
        n => (n / 5).max(1),
    }
}

fn xor_into(target: &mut [u8], other: &[u8]) {
    for (t, o) in target.iter_mut().zip(other) {
        *t ^= o;
    }
}

impl ErasureCodec for XorParityCodec {
    fn scheme(&self, name: &str) -> Result<SchemeInfo, CodecError> {
        let n = parse_segments(name).ok_or_else(|| CodecError::UnknownScheme(name.to_string()))?;
        Ok(SchemeInfo {
            name: name.to_string(),
            data_segments: n,
            parity_segments: n,
            suppliers: n,
            correctable_errors: correctable_errors(n),
        })
    }

    fn is_fixable(&self, scheme: &str, data: &[bool], parity: &[bool]) -> bool {
        let Some(n) = parse_segments(scheme) else {
            return false;
        };
        if data.len() != n || parity.len() != n {
            return false;
        }
        Self::peel(n, data, parity).iter().all(|k| *k)
    }

    fn decode(&self, scheme: &str, fragments: BlockFragments) -> Result<Vec<u8>, CodecError> {
        let info = self.scheme(scheme)?;
        let n = info.data_segments;
        for (expected, actual) in [(n, fragments.data.len()), (n, fragments.parity.len())] {
            if expected != actual {
                return Err(CodecError::SegmentCount { expected, actual });
            }
        }
        if !self.is_fixable(scheme, &fragments.data_bitmap(), &fragments.parity_bitmap()) {
            return Err(CodecError::NotFixable);
        }

        let segment_len = fragments
            .data
            .iter()
            .chain(fragments.parity.iter())
            .flatten()
            .map(Vec::len)
            .next()
            .ok_or(CodecError::NotFixable)?;
        for fragment in fragments.data.iter().chain(fragments.parity.iter()).flatten() {
            if fragment.len() != segment_len {
                return Err(CodecError::SizeMismatch {
                    expected: segment_len,
                    actual: fragment.len(),
                });
            }
        }

        let BlockFragments { mut data, parity } = fragments;
        loop {
            let mut progress = false;
            for (j, p) in parity.iter().enumerate() {
                let Some(p) = p else { continue };
                let (a, b) = Self::covered(n, j);
                let (missing, present) = match (data[a].is_some(), data[b].is_some()) {
                    (false, true) => (a, b),
                    (true, false) => (b, a),
                    _ => continue,
                };
                let mut recovered = p.clone();
                if let Some(other) = &data[present] {
                    xor_into(&mut recovered, other);
                }
                data[missing] = Some(recovered);
                progress = true;
            }
            if !progress {
                break;
            }
        }

        let mut block = Vec::with_capacity(segment_len * n);
        for segment in data {
            block.extend(segment.ok_or(CodecError::NotFixable)?);
        }
        Ok(block)
    }

    fn encode(&self, scheme: &str, block: &[u8]) -> Result<BlockFragments, CodecError> {
        let info = self.scheme(scheme)?;
        let n = info.data_segments;
        let segment_len = block.len().div_ceil(n).max(1);

        let mut padded = block.to_vec();
        padded.resize(segment_len * n, 0);

        let data: Vec<Vec<u8>> = padded.chunks(segment_len).map(<[u8]>::to_vec).collect();
        let parity = (0..n)
            .map(|j| {
                let (a, b) = Self::covered(n, j);
                let mut p = data[a].clone();
                if a != b {
                    xor_into(&mut p, &data[b]);
                }
                Some(p)
            })
            .collect();

        Ok(BlockFragments {
            data: data.into_iter().map(Some).collect(),
            parity,
        })
    }
}
