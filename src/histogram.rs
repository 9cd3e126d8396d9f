//! Component C: value-to-frequency counting used by
//! `CritBitTrieBuilder::compress_diff_bit_array` to pick the `base_bit_num`
//! that minimizes total encoded size across the observed diff-bit deltas.
//!
//! Grounded on `examples/original_source/src/terark/histogram.hpp`: a dense
//! array for values below `max_small_value` and a hash map overflow for the
//! rest, so a histogram over (mostly small) bit-width deltas stays cheap
//! without bounding the domain.
use std::collections::HashMap;

const DEFAULT_MAX_SMALL_VALUE: usize = 256;

#[derive(Debug, Clone)]
pub struct Histogram {
    small_cnt: Vec<u64>,
    large_cnt: HashMap<usize, u64>,
    max_small_value: usize,
    finished: bool,

    pub m_distinct_key_cnt: usize,
    pub m_cnt_sum: u64,
    pub m_total_key_len: u64,
    pub m_min_key_len: usize,
    pub m_max_key_len: usize,
    pub m_min_cnt_key: usize,
    pub m_max_cnt_key: usize,
    pub m_cnt_of_min_cnt_key: u64,
    pub m_cnt_of_max_cnt_key: u64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_max_small_value(DEFAULT_MAX_SMALL_VALUE)
    }

    pub fn with_max_small_value(max_small_value: usize) -> Self {
        Histogram {
            small_cnt: vec![0u64; max_small_value],
            large_cnt: HashMap::new(),
            max_small_value,
            finished: false,
            m_distinct_key_cnt: 0,
            m_cnt_sum: 0,
            m_total_key_len: 0,
            m_min_key_len: 0,
            m_max_key_len: 0,
            m_min_cnt_key: 0,
            m_max_cnt_key: 0,
            m_cnt_of_min_cnt_key: 0,
            m_cnt_of_max_cnt_key: 0,
        }
    }

    /// Records one occurrence of `val`.
    pub fn add(&mut self, val: usize) {
        self.bump(val, 1);
    }

    /// Records `count` occurrences of `val` in one step.
    pub fn bump(&mut self, val: usize, count: u64) {
        if val < self.max_small_value {
            self.small_cnt[val] += count;
        } else {
            *self.large_cnt.entry(val).or_insert(0) += count;
        }
    }

    pub fn get(&self, val: usize) -> u64 {
        if val < self.max_small_value {
            self.small_cnt[val]
        } else {
            *self.large_cnt.get(&val).unwrap_or(&0)
        }
    }

    /// Visits every `(value, count)` pair with a nonzero count, ascending
    /// by value within the dense region, then in hash-map order for the
    /// overflow region (matching the source's `for_each` two-pass order).
    pub fn for_each(&self, mut op: impl FnMut(usize, u64)) {
        for (val, &cnt) in self.small_cnt.iter().enumerate() {
            if cnt != 0 {
                op(val, cnt);
            }
        }
        for (&val, &cnt) in self.large_cnt.iter() {
            if cnt != 0 {
                op(val, cnt);
            }
        }
    }

    /// Computes the summary statistics. Must be called before any of the
    /// `m_*` fields are trusted; re-running it after further `add`/`bump`
    /// calls recomputes them from scratch.
    pub fn finish(&mut self) {
        let mut distinct = 0usize;
        let mut cnt_sum = 0u64;
        let mut total_key_len = 0u64;
        let mut min_key_len = usize::MAX;
        let mut max_key_len = 0usize;
        let mut min_cnt_key = 0usize;
        let mut max_cnt_key = 0usize;
        let mut cnt_of_min_cnt_key = u64::MAX;
        let mut cnt_of_max_cnt_key = 0u64;

        self.for_each(|val, cnt| {
            distinct += 1;
            cnt_sum += cnt;
            total_key_len += val as u64 * cnt;
            if val < min_key_len {
                min_key_len = val;
            }
            if val > max_key_len {
                max_key_len = val;
            }
            if cnt < cnt_of_min_cnt_key {
                cnt_of_min_cnt_key = cnt;
                min_cnt_key = val;
            }
            if cnt > cnt_of_max_cnt_key {
                cnt_of_max_cnt_key = cnt;
                max_cnt_key = val;
            }
        });

        if distinct == 0 {
            min_key_len = 0;
            cnt_of_min_cnt_key = 0;
        }

        self.m_distinct_key_cnt = distinct;
        self.m_cnt_sum = cnt_sum;
        self.m_total_key_len = total_key_len;
        self.m_min_key_len = min_key_len;
        self.m_max_key_len = max_key_len;
        self.m_min_cnt_key = min_cnt_key;
        self.m_max_cnt_key = max_cnt_key;
        self.m_cnt_of_min_cnt_key = cnt_of_min_cnt_key;
        self.m_cnt_of_max_cnt_key = cnt_of_max_cnt_key;
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Histogram::new()
    }
}
