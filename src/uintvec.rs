//! Component A: a fixed-width-per-entry packed integer array, `1..=64` bits
//! wide, growable like a `Vec`. Every other component in this crate (the
//! CBT's `base`/`extra` arrays, the hash vector, `SortedUintVec`'s small-
//! unit area) is a `UintVecMin0` or is laid out identically by hand.
//!
//! Storage is a `Cow<'a, [u8]>`: a builder owns its bytes and grows them in
//! place, while a reader opened over a memory map borrows directly into
//! the mapped region with no copy. This is the idiomatic-Rust rendering of
//! the "owned-plus-viewed memory" design note in `SPEC_FULL.md` §9 — a
//! single tagged representation (`Cow`'s own `Owned`/`Borrowed` variants)
//! instead of a hand-rolled enum, and `risk_release_ownership` becomes
//! simply swapping in `Cow::Borrowed(&[])`.
use std::borrow::Cow;

use crate::bits::{get_bits, set_bits};
use crate::error::{Result, Status, StatusCode};

/// Seven bytes of tail slack after the last packed entry so that a
/// two-machine-word read (see `bits::get_bits`) never runs past the
/// allocation, matching the invariant in `SPEC_FULL.md` component A.
const TAIL_SLACK: usize = 7;

#[derive(Debug, Clone)]
pub struct UintVecMin0<'a> {
    data: Cow<'a, [u8]>,
    size: usize,
    bits: usize,
}

fn bytes_needed(n: usize, bits: usize) -> usize {
    (n * bits + 7) / 8 + TAIL_SLACK
}

impl<'a> UintVecMin0<'a> {
    /// An empty, owned vector that will take on `bits` once sized.
    pub fn with_bits(bits: usize) -> Self {
        UintVecMin0 {
            data: Cow::Owned(vec![0u8; TAIL_SLACK]),
            size: 0,
            bits,
        }
    }

    /// Allocates storage for `n` values of `bits` bits each.
    pub fn resize_with_uintbits(n: usize, bits: usize) -> Result<Self> {
        if bits == 0 || bits > 64 {
            return Err(Status::new(
                StatusCode::InvalidArgument,
                "bits must be in 1..=64",
            ));
        }
        if n.checked_mul(bits).is_none() {
            return Err(Status::new(StatusCode::Unsupported, "size*bits overflow"));
        }
        Ok(UintVecMin0 {
            data: Cow::Owned(vec![0u8; bytes_needed(n, bits)]),
            size: n,
            bits,
        })
    }

    /// Takes a non-owning view over `n` values of `bits` bits each, already
    /// packed at the start of `bytes` (the mmap-load path).
    pub fn risk_set_data(bytes: &'a [u8], n: usize, bits: usize) -> Self {
        UintVecMin0 {
            data: Cow::Borrowed(bytes),
            size: n,
            bits,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn uintbits(&self) -> usize {
        self.bits
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn mem_size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn get(&self, i: usize) -> u64 {
        debug_assert!(i < self.size, "UintVecMin0::get: {i} >= {}", self.size);
        fast_get(&self.data, self.bits, i)
    }

    /// Writes `v` at slot `i`. `v` must fit in `self.uintbits()` bits
    /// (caller obligation, matching `set_wire`'s contract). Clones the
    /// backing storage to owned on first write if this vector was
    /// constructed over a borrowed (mmap) region.
    #[inline]
    pub fn set_wire(&mut self, i: usize, v: u64) {
        debug_assert!(i < self.size);
        set_bits(self.data.to_mut(), i * self.bits, self.bits, v);
    }

    pub fn push_back(&mut self, v: u64) -> Result<()> {
        if self.bits == 0 {
            return Err(Status::new(
                StatusCode::InvalidState,
                "push_back called before bits were established",
            ));
        }
        if self.bits < 64 && v >= (1u64 << self.bits) {
            return Err(Status::new(
                StatusCode::LengthError,
                "value does not fit in configured bit width",
            ));
        }
        let needed = bytes_needed(self.size + 1, self.bits);
        if needed > self.data.len() {
            let grown = (self.data.len() as f64 * 1.6).ceil() as usize;
            self.data.to_mut().resize(grown.max(needed), 0);
        }
        let pos = self.size;
        self.size += 1;
        set_bits(self.data.to_mut(), pos * self.bits, self.bits, v);
        Ok(())
    }

    pub fn shrink_to_fit(&mut self) {
        let keep = bytes_needed(self.size, self.bits.max(1));
        self.data.to_mut().truncate(keep);
        self.data.to_mut().shrink_to_fit();
    }

    /// Hands ownership of the backing bytes out by swapping in an empty
    /// borrowed slice, the Rust analogue of `risk_release_ownership`.
    pub fn risk_release_ownership(&mut self) {
        self.data = Cow::Borrowed(&[]);
        self.size = 0;
    }
}

impl<'a> Default for UintVecMin0<'a> {
    fn default() -> Self {
        UintVecMin0::with_bits(0)
    }
}

/// Free function for hot-path inlining: the read half of `UintVecMin0`
/// without needing a whole vector in scope.
#[inline]
pub fn fast_get(data: &[u8], bits: usize, i: usize) -> u64 {
    get_bits(data, i * bits, bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::random_u64s;

    #[test]
    fn test_push_back_and_get() {
        let mut v = UintVecMin0::with_bits(17);
        let mask = (1u64 << 17) - 1;
        let values: Vec<u64> = random_u64s(3, 300).into_iter().map(|x| x & mask).collect();
        for &x in &values {
            v.push_back(x).unwrap();
        }
        assert_eq!(v.len(), values.len());
        for (i, &x) in values.iter().enumerate() {
            assert_eq!(v.get(i), x);
        }
    }

    #[test]
    fn test_resize_then_set_wire() {
        let mut v = UintVecMin0::resize_with_uintbits(10, 6).unwrap();
        for i in 0..10 {
            v.set_wire(i, (i as u64 * 3) % 64);
        }
        for i in 0..10 {
            assert_eq!(v.get(i), (i as u64 * 3) % 64);
        }
    }

    #[test]
    fn test_push_back_rejects_oversized_value() {
        let mut v = UintVecMin0::with_bits(3);
        assert!(v.push_back(8).is_err());
        assert!(v.push_back(7).is_ok());
    }

    #[test]
    fn test_zero_width_vector_is_empty() {
        let v = UintVecMin0::with_bits(0);
        assert_eq!(v.len(), 0);
    }

    #[test]
    fn test_risk_set_data_reads_borrowed() {
        let mut owned = UintVecMin0::with_bits(9);
        for i in 0..20u64 {
            owned.push_back(i * 2).unwrap();
        }
        let bytes = owned.data().to_vec();
        let view = UintVecMin0::risk_set_data(&bytes, 20, 9);
        for i in 0..20u64 {
            assert_eq!(view.get(i as usize), i * 2);
        }
    }

    #[test]
    fn test_risk_release_ownership() {
        let mut v = UintVecMin0::with_bits(4);
        v.push_back(5).unwrap();
        v.risk_release_ownership();
        assert_eq!(v.len(), 0);
    }
}
