//! Component D: the sort/lookup substrates trie builders consume before a
//! `CritBitTrieBuilder` ever sees a key. Grounded on
//! `examples/original_source/src/terark/util/sortable_strvec.{hpp,cpp}`.
//!
//! Every variant here presents the same logical surface (`len`,
//! `nth_data`, `lower_bound`, `upper_bound`, `find`, `max_strlen`) even
//! though each packs its index differently — a plain struct per variant
//! rather than a shared trait object, since callers always know which
//! concrete substrate they built and the packing differences (seq_id or
//! not, fixed length or not, `UintVecMin0` offsets or not) are exactly
//! what each variant exists to specialize.
use std::cell::RefCell;
use std::cmp::Ordering;

use crate::error::{Result, Status, StatusCode};
use crate::infolog::Logger;
use crate::options::BuildOptions;
use crate::uintvec::UintVecMin0;

/// Maximum string count/pool size before `push_back` fails, matching the
/// `2^32` ceiling the original enforces via `MAX_STR_NUM`/`MAX_STR_LEN`.
const MAX_STR_NUM: u64 = 1 << 32;
const MAX_STR_LEN: u64 = 1 << 32;

/// First index `i` in `0..n` for which `pred(i)` is false, assuming `pred`
/// is true on a prefix of `0..n` and false afterward (the shape every
/// `lower_bound`/`upper_bound` here reduces to).
fn partition_point(n: usize, pred: impl Fn(usize) -> bool) -> usize {
    let mut lo = 0usize;
    let mut hi = n;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

#[derive(Debug, Clone, Copy)]
struct SEntry {
    offset: u32,
    length: u32,
    seq_id: u32,
}

fn entry_bytes(pool: &[u8], e: &SEntry) -> &[u8] {
    &pool[e.offset as usize..e.offset as usize + e.length as usize]
}

fn cmp_entry(pool: &[u8], x: &SEntry, y: &SEntry) -> Ordering {
    entry_bytes(pool, x).cmp(entry_bytes(pool, y))
}

/// MSD radix sort of `order` (indices into `entries`) by the bytes at
/// increasing positions, recursing per 257-way bucket (256 byte values
/// plus "string ended here"). `order` is partitioned in place.
fn msd_radix_sort(order: &mut [usize], entries: &[SEntry], pool: &[u8], depth: usize) {
    if order.len() <= 1 {
        return;
    }
    let byte_at = |i: usize| -> Option<u8> {
        let e = &entries[i];
        if (depth as u32) < e.length {
            Some(pool[e.offset as usize + depth])
        } else {
            None
        }
    };
    let mut counts = [0usize; 257];
    for &i in order.iter() {
        let bucket = byte_at(i).map(|b| b as usize + 1).unwrap_or(0);
        counts[bucket] += 1;
    }
    let mut starts = [0usize; 257];
    let mut acc = 0usize;
    for b in 0..257 {
        starts[b] = acc;
        acc += counts[b];
    }
    let mut cursor = starts;
    let mut out = vec![0usize; order.len()];
    for &i in order.iter() {
        let bucket = byte_at(i).map(|b| b as usize + 1).unwrap_or(0);
        out[cursor[bucket]] = i;
        cursor[bucket] += 1;
    }
    order.copy_from_slice(&out);
    for b in 1..257 {
        let lo = starts[b];
        let hi = lo + counts[b];
        if hi - lo > 1 {
            msd_radix_sort(&mut order[lo..hi], entries, pool, depth + 1);
        }
    }
}

/// K-way merge of chunks that are each already sorted by `cmp_entry`. A
/// linear scan over the (small, `available_parallelism`-bounded) chunk
/// count per output element; not a heap, since the chunk count here never
/// justifies one.
fn merge_sorted_chunks(chunks: Vec<Vec<SEntry>>, pool: &[u8]) -> Vec<SEntry> {
    let total: usize = chunks.iter().map(|c| c.len()).sum();
    let mut heads: Vec<usize> = vec![0; chunks.len()];
    let mut out = Vec::with_capacity(total);

    loop {
        let mut best: Option<usize> = None;
        for (c, chunk) in chunks.iter().enumerate() {
            if heads[c] >= chunk.len() {
                continue;
            }
            best = match best {
                None => Some(c),
                Some(b) => {
                    if cmp_entry(pool, &chunk[heads[c]], &chunks[b][heads[b]]) == Ordering::Less {
                        Some(c)
                    } else {
                        Some(b)
                    }
                }
            };
        }
        match best {
            None => break,
            Some(c) => {
                out.push(chunks[c][heads[c]]);
                heads[c] += 1;
            }
        }
    }
    out
}

/// `(offset, length, seq_id)` index over a single shared byte pool.
/// Supports arbitrary insertion order followed by a sort, and the
/// suffix-dedup passes described in `compress_strpool`.
#[derive(Debug, Clone, Default)]
pub struct SortableStrVec {
    index: Vec<SEntry>,
    strpool: Vec<u8>,
}

impl SortableStrVec {
    pub fn new() -> Self {
        SortableStrVec::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn nth_data(&self, i: usize) -> &[u8] {
        let e = &self.index[i];
        &self.strpool[e.offset as usize..e.offset as usize + e.length as usize]
    }

    pub fn nth_seq_id(&self, i: usize) -> u32 {
        self.index[i].seq_id
    }

    pub fn max_strlen(&self) -> usize {
        self.index.iter().map(|e| e.length as usize).max().unwrap_or(0)
    }

    pub fn push_back(&mut self, s: &[u8]) -> Result<()> {
        if s.len() as u64 >= MAX_STR_LEN {
            return Err(Status::new(StatusCode::LengthError, "string too long"));
        }
        if self.index.len() as u64 >= MAX_STR_NUM {
            return Err(Status::new(StatusCode::LengthError, "too many strings"));
        }
        let entry = SEntry {
            offset: self.strpool.len() as u32,
            length: s.len() as u32,
            seq_id: self.index.len() as u32,
        };
        self.index.push(entry);
        self.strpool.extend_from_slice(s);
        Ok(())
    }

    /// Sorts the index by the referenced bytes, choosing a strategy from
    /// `opts`: below `min_radix_sort_str_len` average key length, an MSD
    /// radix pass (`SortableStrVec_minRadixSortStrLen`'s fast path);
    /// otherwise a comparison sort, parallelized across
    /// `std::thread::available_parallelism` workers when
    /// `enable_parallel_sort` is set, and stable (`use_merge_sort`) or not
    /// per the flag of the same name.
    pub fn sort(&mut self, opts: &BuildOptions) {
        if self.index.len() < 2 {
            return;
        }
        let avg_len = self.strpool.len() / self.index.len();
        if avg_len < opts.min_radix_sort_str_len {
            self.radix_sort();
        } else if opts.enable_parallel_sort {
            self.parallel_sort(opts.use_merge_sort);
        } else {
            let pool = &self.strpool;
            if opts.use_merge_sort {
                self.index.sort_by(|x, y| cmp_entry(pool, x, y));
            } else {
                self.index.sort_unstable_by(|x, y| cmp_entry(pool, x, y));
            }
        }
    }

    /// MSD radix sort over the pool bytes, falling back to nothing special
    /// at the leaves (buckets of size <= 1 are already sorted); a byte
    /// position past a string's end sorts before any actual byte, since a
    /// prefix of a string is its immediate lexicographic predecessor.
    fn radix_sort(&mut self) {
        let entries: Vec<SEntry> = self.index.clone();
        let pool = std::mem::take(&mut self.strpool);
        let mut order: Vec<usize> = (0..entries.len()).collect();
        msd_radix_sort(&mut order, &entries, &pool, 0);
        self.index = order.iter().map(|&i| entries[i]).collect();
        self.strpool = pool;
    }

    /// Splits the index into `available_parallelism` chunks, sorts each on
    /// its own thread, then merges the sorted chunks.
    fn parallel_sort(&mut self, stable: bool) {
        let n = self.index.len();
        let workers = std::thread::available_parallelism().map(|p| p.get()).unwrap_or(1).min(n);
        if workers <= 1 {
            let pool = &self.strpool;
            if stable {
                self.index.sort_by(|x, y| cmp_entry(pool, x, y));
            } else {
                self.index.sort_unstable_by(|x, y| cmp_entry(pool, x, y));
            }
            return;
        }
        let chunk_size = (n + workers - 1) / workers;
        let mut chunks: Vec<Vec<SEntry>> = self.index.chunks(chunk_size).map(|c| c.to_vec()).collect();
        let pool = &self.strpool;
        std::thread::scope(|scope| {
            let handles: Vec<_> = chunks
                .iter_mut()
                .map(|chunk| {
                    scope.spawn(move || {
                        if stable {
                            chunk.sort_by(|x, y| cmp_entry(pool, x, y));
                        } else {
                            chunk.sort_unstable_by(|x, y| cmp_entry(pool, x, y));
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        });
        self.index = merge_sorted_chunks(chunks, pool);
    }

    pub fn sort_by_seq_id(&mut self) {
        self.index.sort_by_key(|e| e.seq_id);
    }

    /// Renumbers offsets to ascending, physically compacting the pool in
    /// index order. Requires the index already be in its final order
    /// (typically just after `sort`).
    pub fn compact(&mut self) {
        let entries: Vec<SEntry> = self.index.clone();
        let mut new_pool = Vec::with_capacity(self.strpool.len());
        let mut new_index = Vec::with_capacity(entries.len());
        for e in &entries {
            let bytes = &self.strpool[e.offset as usize..e.offset as usize + e.length as usize];
            let new_offset = new_pool.len() as u32;
            new_pool.extend_from_slice(bytes);
            new_index.push(SEntry {
                offset: new_offset,
                length: e.length,
                seq_id: e.seq_id,
            });
        }
        self.strpool = new_pool;
        self.index = new_index;
    }

    /// Level 1: sorts descending lexicographically and merges each entry
    /// into its predecessor's storage when it is an exact byte-prefix of
    /// it (the common case once sorted, since a prefix of a string is its
    /// immediate lexicographic predecessor whenever no other key falls
    /// between them). Levels 2/3 add a whole-string hash dedup pass on
    /// top; the original's byte-level *substring* overlap dedup (any
    /// string appearing as a substring of another, not just as its
    /// prefix) is not reproduced here — see `DESIGN.md`.
    pub fn compress_strpool(&mut self, opts: &BuildOptions, logger: Option<&RefCell<Logger>>) {
        let level = opts.stat_compress_level1;
        if let Some(l) = logger {
            crate::log!(l, "compress_strpool: level={} entries={}", level, self.index.len());
        }
        if self.index.is_empty() || level == 0 {
            return;
        }
        self.sort(opts);
        self.index.reverse();

        let mut new_pool: Vec<u8> = Vec::with_capacity(self.strpool.len());
        let mut offset = 0u32;
        for i in 0..self.index.len() {
            let e = self.index[i];
            let bytes = self.strpool[e.offset as usize..e.offset as usize + e.length as usize].to_vec();
            if i > 0 {
                let prev = self.index[i - 1];
                if prev.length >= e.length {
                    let prev_bytes = &new_pool[prev.offset as usize..prev.offset as usize + e.length as usize];
                    if prev_bytes == bytes.as_slice() {
                        self.index[i].offset = prev.offset;
                        continue;
                    }
                }
            }
            self.index[i].offset = offset;
            new_pool.extend_from_slice(&bytes);
            offset += e.length;
        }
        self.strpool = new_pool;
        self.index.reverse();

        if level >= 2 {
            if let Some(l) = logger {
                crate::log!(l, "compress_strpool: level {} -> whole-string dedup pass", level);
            }
            self.dedup_whole_strings();
        }
    }

    fn dedup_whole_strings(&mut self) {
        use std::collections::HashMap;
        let mut seen: HashMap<Vec<u8>, u32> = HashMap::new();
        let mut new_pool = Vec::with_capacity(self.strpool.len());
        for e in self.index.iter_mut() {
            let bytes = self.strpool[e.offset as usize..e.offset as usize + e.length as usize].to_vec();
            let offset = *seen.entry(bytes.clone()).or_insert_with(|| {
                let o = new_pool.len() as u32;
                new_pool.extend_from_slice(&bytes);
                o
            });
            e.offset = offset;
        }
        self.strpool = new_pool;
    }

    pub fn lower_bound(&self, key: &[u8]) -> usize {
        partition_point(self.index.len(), |i| self.nth_data(i) < key)
    }

    pub fn upper_bound(&self, key: &[u8]) -> usize {
        partition_point(self.index.len(), |i| self.nth_data(i) <= key)
    }

    pub fn find(&self, key: &[u8]) -> usize {
        let i = self.lower_bound(key);
        if i < self.len() && self.nth_data(i) == key {
            i
        } else {
            self.len()
        }
    }

    /// First index in `[lo, hi)` whose byte at `pos` exceeds `ch`.
    /// Precondition (debug-checked): `nth_data(lo)[pos] == ch`.
    pub fn upper_bound_at_pos(&self, lo: usize, hi: usize, pos: usize, ch: u8) -> Result<usize> {
        if lo >= hi || self.nth_data(lo).get(pos) != Some(&ch) {
            return Err(Status::new(
                StatusCode::InvalidArgument,
                "upper_bound_at_pos: precondition violated",
            ));
        }
        Ok(lo + partition_point(hi - lo, |i| {
            self.nth_data(lo + i).get(pos).copied().unwrap_or(0) <= ch
        }))
    }
}

/// `(offset, length)` pairs only, no `seq_id`. Identical semantics to
/// `SortableStrVec` minus the stable-sequence bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct SortThinStrVec {
    offsets: Vec<u32>,
    lengths: Vec<u32>,
    strpool: Vec<u8>,
}

impl SortThinStrVec {
    pub fn new() -> Self {
        SortThinStrVec::default()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn nth_data(&self, i: usize) -> &[u8] {
        let o = self.offsets[i] as usize;
        let l = self.lengths[i] as usize;
        &self.strpool[o..o + l]
    }

    pub fn max_strlen(&self) -> usize {
        self.lengths.iter().copied().max().unwrap_or(0) as usize
    }

    pub fn push_back(&mut self, s: &[u8]) -> Result<()> {
        if s.len() as u64 >= MAX_STR_LEN {
            return Err(Status::new(StatusCode::LengthError, "string too long"));
        }
        self.offsets.push(self.strpool.len() as u32);
        self.lengths.push(s.len() as u32);
        self.strpool.extend_from_slice(s);
        Ok(())
    }

    pub fn sort(&mut self) {
        let mut order: Vec<usize> = (0..self.offsets.len()).collect();
        let pool = &self.strpool;
        let offs = &self.offsets;
        let lens = &self.lengths;
        let bytes_of = |i: usize| -> &[u8] {
            &pool[offs[i] as usize..offs[i] as usize + lens[i] as usize]
        };
        order.sort_by(|&a, &b| bytes_of(a).cmp(bytes_of(b)));
        self.offsets = order.iter().map(|&i| self.offsets[i]).collect();
        self.lengths = order.iter().map(|&i| self.lengths[i]).collect();
    }

    pub fn lower_bound(&self, key: &[u8]) -> usize {
        partition_point(self.len(), |i| self.nth_data(i) < key)
    }

    pub fn upper_bound(&self, key: &[u8]) -> usize {
        partition_point(self.len(), |i| self.nth_data(i) <= key)
    }

    pub fn find(&self, key: &[u8]) -> usize {
        let i = self.lower_bound(key);
        if i < self.len() && self.nth_data(i) == key {
            i
        } else {
            self.len()
        }
    }
}

/// Fixed-length entries, implicit index: `nth_data(i)` is just
/// `pool[i*fixlen .. (i+1)*fixlen]`. `lower_bound`/`upper_bound` against a
/// key shorter than `fixlen` zero-pad the key for `lower_bound` but
/// require `key.len() >= fixlen` for `upper_bound`, per `spec.md` §4.D.
#[derive(Debug, Clone)]
pub struct FixedLenStrVec {
    fixlen: usize,
    pool: Vec<u8>,
}

impl FixedLenStrVec {
    pub fn new(fixlen: usize) -> Self {
        FixedLenStrVec { fixlen, pool: Vec::new() }
    }

    pub fn fixlen(&self) -> usize {
        self.fixlen
    }

    pub fn len(&self) -> usize {
        if self.fixlen == 0 {
            0
        } else {
            self.pool.len() / self.fixlen
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_strlen(&self) -> usize {
        self.fixlen
    }

    pub fn nth_data(&self, i: usize) -> &[u8] {
        &self.pool[i * self.fixlen..(i + 1) * self.fixlen]
    }

    pub fn push_back(&mut self, s: &[u8]) -> Result<()> {
        if s.len() != self.fixlen {
            return Err(Status::new(
                StatusCode::InvalidArgument,
                "FixedLenStrVec::push_back: length does not match fixlen",
            ));
        }
        self.pool.extend_from_slice(s);
        Ok(())
    }

    /// Comparison sort over fixed-size chunks. The original specializes
    /// `fixlen ∈ {1,2,4,8}` to a branch-free byte-swapped integer compare;
    /// a plain `memcmp`-equivalent slice compare is behaviorally identical
    /// and is what this crate uses uniformly.
    pub fn sort(&mut self) {
        let fixlen = self.fixlen;
        if fixlen == 0 {
            return;
        }
        let mut rows: Vec<Vec<u8>> = self.pool.chunks(fixlen).map(|c| c.to_vec()).collect();
        rows.sort();
        self.pool = rows.concat();
    }

    fn padded_key(&self, key: &[u8]) -> Vec<u8> {
        let mut padded = vec![0u8; self.fixlen];
        let take = key.len().min(self.fixlen);
        padded[..take].copy_from_slice(&key[..take]);
        padded
    }

    pub fn lower_bound(&self, key: &[u8]) -> usize {
        let padded = self.padded_key(key);
        partition_point(self.len(), |i| self.nth_data(i) < padded.as_slice())
    }

    pub fn upper_bound(&self, key: &[u8]) -> Result<usize> {
        if key.len() < self.fixlen {
            return Err(Status::new(
                StatusCode::InvalidArgument,
                "FixedLenStrVec::upper_bound requires |key| >= fixlen",
            ));
        }
        let key = &key[..self.fixlen];
        Ok(partition_point(self.len(), |i| self.nth_data(i) <= key))
    }

    pub fn find(&self, key: &[u8]) -> usize {
        if key.len() != self.fixlen {
            return self.len();
        }
        let i = self.lower_bound(key);
        if i < self.len() && self.nth_data(i) == key {
            i
        } else {
            self.len()
        }
    }
}

/// Append-only, offsets packed width-minimally in a `UintVecMin0`. Sorting
/// is forbidden: callers must push keys already in final sorted order
/// (the crit-bit trie builder's own usage pattern).
#[derive(Debug, Clone)]
pub struct SortedStrVec {
    offsets: UintVecMin0<'static>,
    pool: Vec<u8>,
    count: usize,
}

impl SortedStrVec {
    pub fn new() -> Self {
        SortedStrVec {
            offsets: UintVecMin0::with_bits(32),
            pool: Vec::new(),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn max_strlen(&self) -> usize {
        (0..self.count)
            .map(|i| self.entry_span(i).1)
            .max()
            .unwrap_or(0)
    }

    fn entry_span(&self, i: usize) -> (usize, usize) {
        let start = self.offsets.get(i) as usize;
        let end = self.offsets.get(i + 1) as usize;
        (start, end - start)
    }

    pub fn nth_data(&self, i: usize) -> &[u8] {
        let (start, len) = self.entry_span(i);
        &self.pool[start..start + len]
    }

    /// Appends `s`; it must be `>=` the previously pushed string
    /// (`sort()` is unavailable on this variant).
    pub fn push_back(&mut self, s: &[u8]) -> Result<()> {
        if s.len() as u64 >= MAX_STR_LEN {
            return Err(Status::new(StatusCode::LengthError, "string too long"));
        }
        if self.count > 0 && s < self.nth_data(self.count - 1) {
            return Err(Status::new(
                StatusCode::InvalidArgument,
                "SortedStrVec::push_back requires non-decreasing input",
            ));
        }
        if self.offsets.is_empty() {
            self.offsets.push_back(0).map_err(|e| e.annotate("SortedStrVec::push_back"))?;
        }
        self.pool.extend_from_slice(s);
        self.offsets
            .push_back(self.pool.len() as u64)
            .map_err(|e| e.annotate("SortedStrVec::push_back"))?;
        self.count += 1;
        Ok(())
    }

    pub fn sort(&self) -> Result<()> {
        Err(Status::new(
            StatusCode::InvalidState,
            "SortedStrVec does not support sort(); push keys pre-sorted",
        ))
    }

    pub fn lower_bound(&self, key: &[u8]) -> usize {
        partition_point(self.count, |i| self.nth_data(i) < key)
    }

    pub fn upper_bound(&self, key: &[u8]) -> usize {
        partition_point(self.count, |i| self.nth_data(i) <= key)
    }

    pub fn find(&self, key: &[u8]) -> usize {
        let i = self.lower_bound(key);
        if i < self.count && self.nth_data(i) == key {
            i
        } else {
            self.count
        }
    }
}

impl Default for SortedStrVec {
    fn default() -> Self {
        SortedStrVec::new()
    }
}

/// Plain `u32`/`u64` offsets (no bit-packing), with an optional implicit
/// inter-record delimiter (e.g. a trailing `\0`) whose length is folded
/// into the stride between offsets. Used when the offset domain is known
/// to need the full native width, so `UintVecMin0`'s per-entry packing
/// would add bit-shift overhead without saving space.
#[derive(Debug, Clone)]
pub struct SortedStrVecUintTpl<T> {
    offsets: Vec<T>,
    pool: Vec<u8>,
    delim_len: usize,
}

pub trait OffsetInt: Copy + Ord + TryFrom<usize> + TryInto<usize> {}
impl OffsetInt for u32 {}
impl OffsetInt for u64 {}

impl<T: OffsetInt> SortedStrVecUintTpl<T> {
    pub fn new(delim_len: usize) -> Self {
        SortedStrVecUintTpl {
            offsets: vec![T::try_from(0).ok().unwrap()],
            pool: Vec::new(),
            delim_len,
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn off(&self, i: usize) -> usize {
        self.offsets[i].try_into().ok().unwrap()
    }

    pub fn nth_data(&self, i: usize) -> &[u8] {
        let start = self.off(i);
        let end = self.off(i + 1) - self.delim_len;
        &self.pool[start..end]
    }

    pub fn max_strlen(&self) -> usize {
        (0..self.len()).map(|i| self.nth_data(i).len()).max().unwrap_or(0)
    }

    pub fn push_back(&mut self, s: &[u8]) -> Result<()> {
        self.pool.extend_from_slice(s);
        self.pool.extend(std::iter::repeat(0u8).take(self.delim_len));
        let off = T::try_from(self.pool.len())
            .ok()
            .ok_or_else(|| Status::new(StatusCode::LengthError, "offset exceeds integer width"))?;
        self.offsets.push(off);
        Ok(())
    }

    pub fn lower_bound(&self, key: &[u8]) -> usize {
        partition_point(self.len(), |i| self.nth_data(i) < key)
    }

    pub fn upper_bound(&self, key: &[u8]) -> usize {
        partition_point(self.len(), |i| self.nth_data(i) <= key)
    }

    pub fn find(&self, key: &[u8]) -> usize {
        let i = self.lower_bound(key);
        if i < self.len() && self.nth_data(i) == key {
            i
        } else {
            self.len()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::random_sorted_keys;

    fn lvl(stat_compress_level1: u8) -> BuildOptions {
        BuildOptions { stat_compress_level1, ..BuildOptions::default() }
    }

    #[test]
    fn test_sortable_strvec_sort_and_find() {
        let mut v = SortableStrVec::new();
        for k in [b"banana".as_slice(), b"apple", b"cherry"] {
            v.push_back(k).unwrap();
        }
        v.sort(&BuildOptions::default());
        assert_eq!(v.nth_data(0), b"apple");
        assert_eq!(v.nth_data(1), b"banana");
        assert_eq!(v.nth_data(2), b"cherry");
        assert_eq!(v.find(b"banana"), 1);
        assert_eq!(v.find(b"missing"), 3);
    }

    #[test]
    fn test_sortable_strvec_lower_upper_bound() {
        let mut v = SortableStrVec::new();
        for k in [b"a".as_slice(), b"c", b"e"] {
            v.push_back(k).unwrap();
        }
        v.sort(&BuildOptions::default());
        assert_eq!(v.lower_bound(b"b"), 1);
        assert_eq!(v.upper_bound(b"c"), 2);
    }

    #[test]
    fn test_compress_strpool_level1_dedups_prefixes() {
        let mut v = SortableStrVec::new();
        for k in [b"abc".as_slice(), b"ab", b"abd"] {
            v.push_back(k).unwrap();
        }
        v.compress_strpool(&lvl(1), None);
        assert!(v.strpool.len() <= 3 + 2 + 3);
        let mut got: Vec<Vec<u8>> = (0..v.len()).map(|i| v.nth_data(i).to_vec()).collect();
        got.sort();
        assert_eq!(got, vec![b"ab".to_vec(), b"abc".to_vec(), b"abd".to_vec()]);
    }

    #[test]
    fn test_compress_strpool_level2_dedups_exact_duplicates() {
        let mut v = SortableStrVec::new();
        for k in [b"same".as_slice(), b"same", b"other"] {
            v.push_back(k).unwrap();
        }
        v.compress_strpool(&lvl(2), None);
        assert_eq!(v.index[0].offset, v.index[1].offset);
    }

    #[test]
    fn test_compress_strpool_logs_level_transitions() {
        let captured = std::rc::Rc::new(RefCell::new(Vec::new()));
        let logger = RefCell::new(Logger(Box::new(crate::test_util::SharedBuf(captured.clone()))));
        let mut v = SortableStrVec::new();
        for k in [b"same".as_slice(), b"same", b"other"] {
            v.push_back(k).unwrap();
        }
        v.compress_strpool(&lvl(2), Some(&logger));
        let logged = String::from_utf8(captured.borrow().clone()).unwrap();
        assert!(logged.contains("level=2"));
        assert!(logged.contains("whole-string dedup"));
    }

    #[test]
    fn test_sort_radix_matches_comparison_sort() {
        let keys = random_sorted_keys(50, 500, 6);
        let mut shuffled = keys.clone();
        // Reverse so the starting order is not already sorted.
        shuffled.reverse();

        let mut v = SortableStrVec::new();
        for k in &shuffled {
            v.push_back(k).unwrap();
        }
        let opts = BuildOptions { min_radix_sort_str_len: 64, ..BuildOptions::default() };
        v.sort(&opts);
        let got: Vec<Vec<u8>> = (0..v.len()).map(|i| v.nth_data(i).to_vec()).collect();
        assert_eq!(got, keys);
    }

    #[test]
    fn test_sort_parallel_matches_comparison_sort() {
        let keys = random_sorted_keys(51, 500, 20);
        let mut shuffled = keys.clone();
        shuffled.reverse();

        let mut v = SortableStrVec::new();
        for k in &shuffled {
            v.push_back(k).unwrap();
        }
        let opts = BuildOptions { enable_parallel_sort: true, ..BuildOptions::default() };
        v.sort(&opts);
        let got: Vec<Vec<u8>> = (0..v.len()).map(|i| v.nth_data(i).to_vec()).collect();
        assert_eq!(got, keys);
    }

    #[test]
    fn test_fixed_len_strvec_sort_and_bounds() {
        let mut v = FixedLenStrVec::new(3);
        for k in [b"ccc".as_slice(), b"aaa", b"bbb"] {
            v.push_back(k).unwrap();
        }
        v.sort();
        assert_eq!(v.nth_data(0), b"aaa");
        assert_eq!(v.upper_bound(b"bbb").unwrap(), 2);
        assert!(v.upper_bound(b"bb").is_err());
        assert_eq!(v.lower_bound(b"bb"), 1);
    }

    #[test]
    fn test_sorted_strvec_rejects_out_of_order_push() {
        let mut v = SortedStrVec::new();
        v.push_back(b"b").unwrap();
        assert!(v.push_back(b"a").is_err());
        assert!(v.sort().is_err());
    }

    #[test]
    fn test_sorted_strvec_find_matches_linear_scan() {
        let keys = random_sorted_keys(41, 300, 20);
        let mut v = SortedStrVec::new();
        for k in &keys {
            v.push_back(k).unwrap();
        }
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(v.find(k), i);
        }
        assert_eq!(v.lower_bound(&[0xff; 1]).min(v.len()), v.lower_bound(&[0xff]));
    }

    #[test]
    fn test_sorted_strvec_uint_tpl_u32() {
        let mut v: SortedStrVecUintTpl<u32> = SortedStrVecUintTpl::new(1);
        for k in [b"aa".as_slice(), b"bb", b"cc"] {
            v.push_back(k).unwrap();
        }
        assert_eq!(v.len(), 3);
        assert_eq!(v.nth_data(1), b"bb");
        assert_eq!(v.find(b"cc"), 2);
    }

    #[test]
    fn test_upper_bound_at_pos() {
        let mut v = SortableStrVec::new();
        for k in [b"aaa".as_slice(), b"aab", b"aac", b"aba"] {
            v.push_back(k).unwrap();
        }
        v.sort(&BuildOptions::default());
        let r = v.upper_bound_at_pos(0, 4, 1, b'a').unwrap();
        assert_eq!(r, 3);
    }
}
