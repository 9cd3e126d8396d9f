//! Shared fixtures for the `#[cfg(test)]` modules scattered across this
//! crate: random sorted key sets and random `u64` sequences, generated
//! from a fixed seed so failures reproduce across runs.
#![cfg(test)]

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::io::{self, Write};
use std::rc::Rc;

pub fn rng(seed: u64) -> StdRng {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&seed.to_le_bytes());
    StdRng::from_seed(bytes)
}

/// Generates `n` distinct random byte strings, sorted lexicographically.
pub fn random_sorted_keys(seed: u64, n: usize, max_len: usize) -> Vec<Vec<u8>> {
    let mut r = rng(seed);
    let mut set: BTreeSet<Vec<u8>> = BTreeSet::new();
    while set.len() < n {
        let len = r.gen_range(1..=max_len.max(1));
        let key: Vec<u8> = (0..len).map(|_| r.gen::<u8>()).collect();
        set.insert(key);
    }
    set.into_iter().collect()
}

/// Generates a non-decreasing sequence of `n` random `u64`s, each step
/// advancing by `0..=max_step`.
pub fn random_monotone_u64s(seed: u64, n: usize, max_step: u64) -> Vec<u64> {
    let mut r = rng(seed);
    let mut v = Vec::with_capacity(n);
    let mut cur = 0u64;
    for _ in 0..n {
        v.push(cur);
        cur += r.gen_range(0..=max_step);
    }
    v
}

/// Generates `n` uniformly random `u64`s with no monotonicity guarantee.
pub fn random_u64s(seed: u64, n: usize) -> Vec<u64> {
    let mut r = rng(seed);
    (0..n).map(|_| r.gen::<u64>()).collect()
}

/// `Write` sink that appends into a shared buffer, so a test can assert on
/// what a `Logger` wrote without capturing real stderr.
pub struct SharedBuf(pub Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_sorted_keys_distinct_and_sorted() {
        let keys = random_sorted_keys(1, 200, 12);
        assert_eq!(keys.len(), 200);
        for w in keys.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn test_random_monotone_u64s() {
        let v = random_monotone_u64s(2, 500, 7);
        assert_eq!(v.len(), 500);
        for w in v.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }
}
