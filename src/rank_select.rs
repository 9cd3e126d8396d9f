//! Component B: a bit vector with O(1)-amortized `rank`/`select`, used by
//! the crit-bit trie to turn a node's BFS position into the index of its
//! two children (`CritBitTrie::index`) and by the extra-bit-width array to
//! tell large deltas from small ones.
//!
//! Grounded on `examples/original_source/src/terark/rank_select.hpp`'s
//! `rank_select_il` (interleaved line cache): the bitmap is partitioned
//! into 256-bit lines, each with a running popcount base computed once by
//! `build_cache`. A rank query adds that line's base to a scan of at most
//! three trailing words, and a select query binary-searches the line
//! bases before a final linear scan — the scalar fallback this crate's
//! design notes call out as a conforming substitute for the SIMD
//! `popcount_intrinsic` path used by the original.
use std::borrow::Cow;

use crate::error::{Result, Status, StatusCode};

const BITS_PER_WORD: usize = 64;
const WORDS_PER_LINE: usize = 4;
const BITS_PER_LINE: usize = BITS_PER_WORD * WORDS_PER_LINE;

#[derive(Debug, Clone)]
pub struct RankSelect<'a> {
    words: Cow<'a, [u8]>,
    size: usize,
    /// `line_base[k]` = number of set bits in `[0, BITS_PER_LINE * k)`.
    /// Rebuilt by `build_cache`, never serialized (see the derived-cache
    /// note in `SPEC_FULL.md` §9).
    line_base: Vec<u32>,
}

fn num_words(bits: usize) -> usize {
    (bits + BITS_PER_WORD - 1) / BITS_PER_WORD
}

fn num_lines(bits: usize) -> usize {
    (bits + BITS_PER_LINE - 1) / BITS_PER_LINE
}

impl<'a> RankSelect<'a> {
    pub fn new(size: usize) -> Self {
        let mut rs = RankSelect {
            words: Cow::Owned(vec![0u8; num_words(size) * 8]),
            size,
            line_base: Vec::new(),
        };
        rs.build_cache();
        rs
    }

    /// Non-owning view over an already-packed bitmap (the mmap-load path).
    /// Rebuilds the rank cache immediately, matching the "derived caches
    /// rebuilt after load" treatment applied to every cache in this crate.
    pub fn risk_set_data(bytes: &'a [u8], size: usize) -> Self {
        let mut rs = RankSelect {
            words: Cow::Borrowed(bytes),
            size,
            line_base: Vec::new(),
        };
        rs.build_cache();
        rs
    }

    fn word(&self, idx: usize) -> u64 {
        let b = idx * 8;
        let mut buf = [0u8; 8];
        let avail = self.words.len().saturating_sub(b);
        let take = avail.min(8);
        buf[..take].copy_from_slice(&self.words[b..b + take]);
        u64::from_le_bytes(buf)
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.words
    }

    pub fn mem_size(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is1(&self, i: usize) -> bool {
        debug_assert!(i < self.size);
        (self.word(i / BITS_PER_WORD) >> (i % BITS_PER_WORD)) & 1 == 1
    }

    #[inline]
    pub fn is0(&self, i: usize) -> bool {
        !self.is1(i)
    }

    pub fn set1(&mut self, i: usize) {
        debug_assert!(i < self.size);
        let word_idx = i / BITS_PER_WORD;
        let bit = i % BITS_PER_WORD;
        let b = word_idx * 8;
        let data = self.words.to_mut();
        let mut w = u64::from_le_bytes(data[b..b + 8].try_into().unwrap());
        w |= 1u64 << bit;
        data[b..b + 8].copy_from_slice(&w.to_le_bytes());
    }

    pub fn set0(&mut self, i: usize) {
        debug_assert!(i < self.size);
        let word_idx = i / BITS_PER_WORD;
        let bit = i % BITS_PER_WORD;
        let b = word_idx * 8;
        let data = self.words.to_mut();
        let mut w = u64::from_le_bytes(data[b..b + 8].try_into().unwrap());
        w &= !(1u64 << bit);
        data[b..b + 8].copy_from_slice(&w.to_le_bytes());
    }

    pub fn set(&mut self, i: usize, bit: bool) {
        if bit {
            self.set1(i)
        } else {
            self.set0(i)
        }
    }

    /// Recomputes `line_base` from the current bit contents. Must be
    /// called after any batch of `set`/`set1`/`set0` calls and before any
    /// `rank`/`select` query; building once after a borrowed load or a
    /// builder's final pass is the intended usage.
    pub fn build_cache(&mut self) {
        let lines = num_lines(self.size);
        let mut bases = Vec::with_capacity(lines + 1);
        let mut running: u32 = 0;
        for line in 0..lines {
            bases.push(running);
            for w in 0..WORDS_PER_LINE {
                running += self.word(line * WORDS_PER_LINE + w).count_ones();
            }
        }
        bases.push(running);
        self.line_base = bases;
    }

    /// Total number of set bits, i.e. `rank1(len())`.
    pub fn max_rank1(&self) -> u64 {
        *self.line_base.last().unwrap_or(&0) as u64
    }

    /// Number of set bits in `[0, i)`.
    pub fn rank1(&self, i: usize) -> Result<u64> {
        if i > self.size {
            return Err(Status::new(
                StatusCode::OutOfRange,
                "rank1: position past end of bitmap",
            ));
        }
        Ok(self.rank1_unchecked(i))
    }

    #[inline]
    fn rank1_unchecked(&self, i: usize) -> u64 {
        let word_idx = i / BITS_PER_WORD;
        let bit_idx = i % BITS_PER_WORD;
        let line = word_idx / WORDS_PER_LINE;
        let mut cnt = self.line_base[line] as u64;
        for w in (line * WORDS_PER_LINE)..word_idx {
            cnt += self.word(w).count_ones() as u64;
        }
        if bit_idx > 0 {
            let mask = (1u64 << bit_idx) - 1;
            cnt += (self.word(word_idx) & mask).count_ones() as u64;
        }
        cnt
    }

    /// Number of clear bits in `[0, i)`.
    pub fn rank0(&self, i: usize) -> Result<u64> {
        Ok(i as u64 - self.rank1(i)?)
    }

    /// Position of the `k`-th set bit (0-indexed): the smallest `p` with
    /// `rank1(p) == k` and `is1(p)`.
    pub fn select1(&self, k: u64) -> Result<usize> {
        if k >= self.max_rank1() {
            return Err(Status::new(
                StatusCode::OutOfRange,
                "select1: rank past total population count",
            ));
        }
        let line = self.find_line(k, false);
        let mut rank = self.line_base[line] as u64;
        for w in (line * WORDS_PER_LINE)..num_words(self.size) {
            let word = self.word(w);
            let pc = word.count_ones() as u64;
            if rank + pc > k {
                let mut remaining = k - rank;
                let mut bit = word;
                loop {
                    let tz = bit.trailing_zeros() as usize;
                    if remaining == 0 {
                        return Ok(w * BITS_PER_WORD + tz);
                    }
                    bit &= bit - 1;
                    remaining -= 1;
                }
            }
            rank += pc;
        }
        unreachable!("select1: k < max_rank1 but no word satisfied it")
    }

    /// Position of the `k`-th clear bit (0-indexed).
    pub fn select0(&self, k: u64) -> Result<usize> {
        let total0 = self.size as u64 - self.max_rank1();
        if k >= total0 {
            return Err(Status::new(
                StatusCode::OutOfRange,
                "select0: rank past total zero count",
            ));
        }
        let line = self.find_line(k, true);
        let mut rank0 = (line * BITS_PER_LINE) as u64 - self.line_base[line] as u64;
        for w in (line * WORDS_PER_LINE)..num_words(self.size) {
            let word = !self.word(w);
            let pc = word.count_ones() as u64;
            if rank0 + pc > k {
                let mut remaining = k - rank0;
                let mut bit = word;
                loop {
                    let tz = bit.trailing_zeros() as usize;
                    if remaining == 0 {
                        return Ok(w * BITS_PER_WORD + tz);
                    }
                    bit &= bit - 1;
                    remaining -= 1;
                }
            }
            rank0 += pc;
        }
        unreachable!("select0: k < total0 but no word satisfied it")
    }

    /// Binary search over `line_base` (or its zero-count complement) for
    /// the line containing the bit of rank `k`.
    fn find_line(&self, k: u64, zero: bool) -> usize {
        let lines = self.line_base.len() - 1;
        let count_at = |line: usize| -> u64 {
            if zero {
                (line * BITS_PER_LINE) as u64 - self.line_base[line] as u64
            } else {
                self.line_base[line] as u64
            }
        };
        let mut lo = 0usize;
        let mut hi = lines;
        while lo + 1 < hi {
            let mid = lo + (hi - lo) / 2;
            if count_at(mid) <= k {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    }

    pub fn risk_release_ownership(&mut self) {
        self.words = Cow::Borrowed(&[]);
        self.size = 0;
        self.line_base.clear();
    }
}
