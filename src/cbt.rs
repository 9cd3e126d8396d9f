//! Components F, G, H: the crit-bit trie (CBT) block, its packed
//! collection, and their builders. Grounded on
//! `examples/original_source/src/terark/fsa/crit_bit_trie.{hpp,cpp}`.
//!
//! A block stores `N` keys as `N-1` internal crit-bit nodes flattened
//! breadth-first into a rank/select bitmap (two bits per node: which
//! children exist), with each node's diff-bit position chained as a
//! base/extra-split delta from its parent. `CritBitTriePacked` bundles
//! many such blocks behind a single packed header (itself a
//! `SortedUintVec`) so a caller partitions a large sorted key set across
//! blocks of `entry_per_trie` keys each.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path as FsPath;
use std::rc::Rc;

use crate::bits::compute_uintbits;
use crate::error::{Result, Status, StatusCode};
use crate::histogram::Histogram;
use crate::infolog::Logger;
use crate::mmap::MmapSource;
use crate::options::{BuildOptions, DuplicateKeyPolicy, ReaderOptions};
use crate::rank_select::RankSelect;
use crate::sorted_uint_vec::{Builder as SuvBuilder, SortedUintVec};
use crate::uintvec::UintVecMin0;

const INVALID_POS: u32 = u32::MAX;

/// 4-byte magic placed at offset 0 of a packed CBT's prefix header (see
/// the Open Question resolution in `DESIGN.md`: the legacy single zero
/// byte is replaced with an unambiguous tag).
pub const CBT_MAGIC: [u8; 4] = *b"CBT\0";
const PREFIX_HEADER_LEN: usize = 16;

/// Unspecified-but-consistent string hash, standing in for `std::hash`
/// (whose concrete algorithm the original never pins either — any hash
/// both sides of the builder/reader agree on satisfies `hash_match`'s
/// contract).
fn hash_key(key: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in key {
        h ^= b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}

fn crc16_ccitt(bytes: &[u8]) -> u16 {
    crc::crc16::checksum_x25(bytes)
}

/// Returns `true` if the bit at `bit_pos` (0 = "key too short", then 1..8
/// count down from the MSB of `key[bit_pos/9]`) is set, per the `byte*9 +
/// bit-in-byte` packing `comp_key` produces.
fn test_key(key: &[u8], bit_pos: u64) -> bool {
    let byte = (bit_pos / 9) as usize;
    let rem = bit_pos % 9;
    if byte >= key.len() {
        return false;
    }
    if rem == 0 {
        return true;
    }
    ((key[byte] >> (8 - rem)) & 1) == 1
}

/// Position of the first bit at which `key` and `key2` diverge, in the
/// `byte*9 + bit` space `test_key` reads. When one is a prefix of the
/// other, returns the length-boundary sentinel `diff_byte*9`.
pub fn comp_key(key: &[u8], key2: &[u8]) -> u64 {
    let min_len = key.len().min(key2.len());
    let mut diff_byte = 0usize;
    while diff_byte < min_len && key[diff_byte] == key2[diff_byte] {
        diff_byte += 1;
    }
    if diff_byte == min_len {
        (diff_byte * 9) as u64
    } else {
        let b: u32 = ((key[diff_byte] ^ key2[diff_byte]) as u32) << 23;
        (diff_byte * 9) as u64 + b.leading_zeros() as u64
    }
}

/// One step of a traversal recorded by [`CritBitTrie::index`], replayed
/// by [`CritBitTrie::lower_bound`].
#[derive(Debug, Clone, Copy)]
pub struct PathElement {
    pub is_right: bool,
    pub id: u64,
}

pub type Path = Vec<PathElement>;

/// A single crit-bit trie block: `base_size - 1` internal nodes over
/// `base_size` keys, bit-packed with no pointers (component F).
#[derive(Debug, Clone)]
pub struct CritBitTrie<'a> {
    base_bit_num: u8,
    extra_bit_num: u8,
    layer: u64,
    encoded_trie: RankSelect<'a>,
    base: UintVecMin0<'a>,
    bitmap: RankSelect<'a>,
    extra: UintVecMin0<'a>,
    hash_vec: UintVecMin0<'a>,
    /// `layer_id[l]` / `layer_rank[l]`: first node-id / bitmap zero-rank
    /// at BFS depth `l`. Rebuilt by `calculat_layer_pos`, never
    /// serialized.
    layer_id: Vec<u64>,
    layer_rank: Vec<u64>,
}

impl<'a> CritBitTrie<'a> {
    pub fn base_bit_num(&self) -> u8 {
        self.base_bit_num
    }

    pub fn extra_bit_num(&self) -> u8 {
        self.extra_bit_num
    }

    pub fn layer(&self) -> u64 {
        self.layer
    }

    /// Rebuilds `layer_id`/`layer_rank` from `encoded_trie`. Must be
    /// called once after construction (by a builder's `newcbt` or a
    /// reader's `load`) before `index`/`lower_bound` are usable.
    fn calculat_layer_pos(&mut self) {
        let len = (self.layer + 1) as usize;
        self.layer_id = vec![0u64; len];
        self.layer_rank = vec![0u64; len];
        if self.encoded_trie.len() == 0 {
            return;
        }
        let mut id = 0u64;
        for layer in 1..len {
            let pos = (id + 1) * 2;
            let rank = self.encoded_trie.rank0(pos as usize).unwrap_or(0);
            id = pos - rank;
            self.layer_id[layer] = id;
            self.layer_rank[layer] = rank;
        }
    }

    #[inline]
    fn make_diff_bit(&self, rank: u64, diff_base: u64) -> u64 {
        let base_val = self.base.get(rank as usize) + diff_base;
        if self.bitmap.is0(rank as usize) {
            base_val
        } else {
            let idx = self.bitmap.rank1(rank as usize).unwrap();
            (self.extra.get(idx as usize) << self.base_bit_num) + base_val
        }
    }

    /// Descends from the root, returning the leaf's rank within the block
    /// (`[0, base_size)`) and, if `path` is given, the sequence of branch
    /// decisions taken (for a later `lower_bound` replay).
    pub fn index(&self, key: &[u8], mut path: Option<&mut Path>) -> usize {
        if let Some(p) = path.as_deref_mut() {
            p.clear();
        }
        if self.base.is_empty() {
            return 0;
        }
        let mut id = 0u64;
        let mut rank = 0u64;
        let mut diff_base = 0u64;
        let mut layer = 0usize;
        loop {
            let diff_bit = self.make_diff_bit(id, diff_base);
            diff_base = diff_bit;
            let is_right = test_key(key, diff_bit);
            if let Some(p) = path.as_deref_mut() {
                p.push(PathElement { is_right, id });
            }
            let pos = id * 2 + is_right as u64;
            id = self.encoded_trie.rank1(pos as usize).unwrap();
            rank += (pos - id) - self.layer_rank[layer];
            if self.encoded_trie.is1(pos as usize) {
                layer += 1;
                id += 1;
            } else {
                break;
            }
        }
        loop {
            let not_equal = id != self.layer_id[layer];
            layer += 1;
            if !not_equal {
                break;
            }
            let pos = (id + 1) * 2;
            id = self.encoded_trie.rank1(pos as usize).unwrap();
            rank += (pos - id) - self.layer_rank[layer];
        }
        rank as usize
    }

    /// Replays `path` (produced by `index(best_match_key, Some(path))` on
    /// this same block) to find where `key` would sort, given the
    /// three-way comparison `c = sign(key.cmp(best_match_key))`.
    pub fn lower_bound(&self, key: &[u8], best_match_key: &[u8], path: &Path, c: i32) -> usize {
        let common_bits = comp_key(key, best_match_key);
        let rank_inc: u64 = if c > 0 { 1 } else { 0 };
        if path.is_empty() {
            return rank_inc as usize;
        }
        debug_assert_eq!(path[0].id, 0);
        let mut id = 0u64;
        let mut rank = 0u64;
        let mut diff_base = 0u64;
        let mut layer = 0usize;
        loop {
            let diff_bit = self.make_diff_bit(id, diff_base);
            diff_base = diff_bit;
            if diff_bit > common_bits {
                loop {
                    let pos = id * 2 + rank_inc;
                    id = self.encoded_trie.rank1(pos as usize).unwrap();
                    rank += (pos - id) - self.layer_rank[layer];
                    if self.encoded_trie.is1(pos as usize) {
                        layer += 1;
                        id += 1;
                    } else {
                        break;
                    }
                }
                break;
            } else {
                let pos = id * 2 + path[layer].is_right as u64;
                if layer + 1 < path.len() {
                    id = path[layer + 1].id;
                    rank += (pos - id) - self.layer_rank[layer] + 1;
                    layer += 1;
                } else {
                    id = self.encoded_trie.rank1(pos as usize).unwrap();
                    rank += (pos - id) - self.layer_rank[layer];
                    break;
                }
            }
        }
        loop {
            let not_equal = id != self.layer_id[layer];
            layer += 1;
            if !not_equal {
                break;
            }
            let pos = (id + 1) * 2;
            id = self.encoded_trie.rank1(pos as usize).unwrap();
            rank += (pos - id) - self.layer_rank[layer];
        }
        (rank + rank_inc) as usize
    }

    /// Whether `key`'s hash matches the stored suffix for leaf `id`,
    /// modulo `2^hash_bit_num`. A `false` conclusively rejects `key`; a
    /// `true` is a candidate that still needs a full key comparison.
    pub fn hash_match(&self, key: &[u8], id: usize, hash_bit_num: u8) -> bool {
        debug_assert!(hash_bit_num <= 64);
        let mask = if hash_bit_num >= 64 {
            u64::MAX
        } else {
            (1u64 << hash_bit_num) - 1
        };
        (hash_key(key) & mask) == self.hash_vec.get(id)
    }

    pub fn risk_release_ownership(&mut self) {
        self.encoded_trie.risk_release_ownership();
        self.base.risk_release_ownership();
        self.bitmap.risk_release_ownership();
        self.extra.risk_release_ownership();
        self.hash_vec.risk_release_ownership();
    }
}

#[derive(Clone, Copy, Default)]
struct Node {
    child: [u32; 2],
    diff_bit: u64,
}

/// Builds one [`CritBitTrie`] block from a stream of sorted, distinct
/// keys (component H, half of the pipeline).
pub struct CritBitTrieBuilder {
    is_reverse: bool,
    hash_bit_num: u8,
    hash_mask: u64,
    opts: BuildOptions,
    logger: Option<Rc<RefCell<Logger>>>,
    node_storage: Vec<Node>,
    root_pos: u32,
    prev_key: Vec<u8>,
    smallest_key: Vec<u8>,
    hash_vec: UintVecMin0<'static>,

    encoded_trie: RankSelect<'static>,
    diff_bit_array: Vec<u64>,
    diff_bit_delta: Vec<u64>,
    layer: u64,
    base_bit_num: u8,
    extra_bit_num: u8,
    base: UintVecMin0<'static>,
    bitmap: RankSelect<'static>,
    extra: UintVecMin0<'static>,
}

impl CritBitTrieBuilder {
    pub fn new(is_reverse: bool, hash_bit_num: u8, opts: BuildOptions, logger: Option<Rc<RefCell<Logger>>>) -> Self {
        let hash_mask = if hash_bit_num == 0 {
            0
        } else if hash_bit_num >= 64 {
            u64::MAX
        } else {
            (1u64 << hash_bit_num) - 1
        };
        CritBitTrieBuilder {
            is_reverse,
            hash_bit_num,
            hash_mask,
            opts,
            logger,
            node_storage: Vec::new(),
            root_pos: INVALID_POS,
            prev_key: Vec::new(),
            smallest_key: Vec::new(),
            hash_vec: UintVecMin0::with_bits(hash_bit_num.max(1) as usize),
            encoded_trie: RankSelect::new(0),
            diff_bit_array: Vec::new(),
            diff_bit_delta: Vec::new(),
            layer: 0,
            base_bit_num: 0,
            extra_bit_num: 0,
            base: UintVecMin0::with_bits(0),
            bitmap: RankSelect::new(0),
            extra: UintVecMin0::with_bits(0),
        }
    }

    /// Inserts `key`, which must be strictly greater (by whatever
    /// direction `is_reverse` implies) than every previously inserted key
    /// except possibly for an exact repeat, handled per
    /// `self.opts.duplicate_key_policy`.
    pub fn insert(&mut self, key: &[u8]) -> Result<()> {
        if !self.node_storage.is_empty() && self.prev_key == key {
            return match self.opts.duplicate_key_policy {
                DuplicateKeyPolicy::Reject => Err(Status::new(
                    StatusCode::DuplicateKey,
                    "CritBitTrieBuilder::insert: duplicate key",
                )),
                DuplicateKeyPolicy::Collapse => Ok(()),
            };
        }
        if self.hash_bit_num != 0 {
            self.hash_vec.push_back(hash_key(key) & self.hash_mask)?;
        }
        if self.node_storage.is_empty() {
            self.prev_key = key.to_vec();
            self.smallest_key = key.to_vec();
            self.node_storage.push(Node::default());
            return Ok(());
        }

        let new_node_pos = (self.node_storage.len() - 1) as u32;
        let diff_bit = comp_key(key, &self.prev_key);
        {
            let new_node = &mut self.node_storage[new_node_pos as usize];
            new_node.diff_bit = diff_bit;
            new_node.child = [INVALID_POS, INVALID_POS];
        }

        if self.root_pos == INVALID_POS {
            self.root_pos = new_node_pos;
            self.prev_key = key.to_vec();
            self.node_storage.push(Node::default());
            return Ok(());
        }

        let side = (!self.is_reverse) as usize;
        let other_side = self.is_reverse as usize;
        let mut parent = INVALID_POS;
        let mut child = self.root_pos;
        let is_leaf;
        loop {
            let node_diff_bit = self.node_storage[child as usize].diff_bit;
            if diff_bit < node_diff_bit {
                is_leaf = false;
                break;
            }
            let next_child = self.node_storage[child as usize].child[side];
            if next_child == INVALID_POS {
                is_leaf = true;
                break;
            }
            parent = child;
            child = next_child;
        }
        if is_leaf {
            self.node_storage[child as usize].child[side] = new_node_pos;
        } else {
            if parent == INVALID_POS {
                self.root_pos = new_node_pos;
            } else {
                self.node_storage[parent as usize].child[side] = new_node_pos;
            }
            self.node_storage[new_node_pos as usize].child[other_side] = child;
        }
        self.prev_key = key.to_vec();
        self.node_storage.push(Node::default());
        Ok(())
    }

    /// Drops the trailing placeholder node every `insert` call leaves
    /// behind. Must be called exactly once, before `encode`.
    pub fn drop_trailing_placeholder(&mut self) {
        self.node_storage.pop();
    }

    /// Flattens `node_storage` breadth-first into `encoded_trie` (two
    /// bits per node) and `diff_bit_array` (one `u64` per node, BFS
    /// order).
    pub fn encode(&mut self) {
        let n = self.node_storage.len();
        self.encoded_trie = RankSelect::new(n * 2 + 1);
        let mut queue: VecDeque<u32> = VecDeque::new();
        if !self.node_storage.is_empty() {
            queue.push_back(self.root_pos);
        }
        let mut bit_pos = 0usize;
        self.layer = 0;
        while !queue.is_empty() {
            let queue_size = queue.len();
            for _ in 0..queue_size {
                let front = queue.pop_front().unwrap();
                self.diff_bit_array.push(self.node_storage[front as usize].diff_bit);
                for child_pos in self.node_storage[front as usize].child {
                    if child_pos != INVALID_POS {
                        self.encoded_trie.set(bit_pos, true);
                        queue.push_back(child_pos);
                    } else {
                        self.encoded_trie.set(bit_pos, false);
                    }
                    bit_pos += 1;
                }
            }
            self.layer += 1;
        }
        self.encoded_trie.build_cache();
        self.node_storage = Vec::new();
    }

    /// Splits each node's parent-relative diff-bit delta into a
    /// `base_bit_num`-wide small field plus an overflow `extra` entry,
    /// choosing `base_bit_num` to minimize total bits via a histogram
    /// over the observed deltas.
    pub fn compress_diff_bit_array(&mut self) {
        let mut hist = Histogram::new();
        if !self.diff_bit_array.is_empty() {
            self.diff_bit_delta.push(self.diff_bit_array[0]);
            hist.add(self.diff_bit_array[0] as usize);
        }
        for i in 0..self.diff_bit_array.len() {
            let parent_rank = i as u64;
            for side in [0u64, 1u64] {
                let child_pos = parent_rank * 2 + side;
                if self.encoded_trie.is1(child_pos as usize) {
                    let child_rank = self.encoded_trie.rank1(child_pos as usize + 1).unwrap();
                    let delta = self.diff_bit_array[child_rank as usize] - self.diff_bit_array[parent_rank as usize];
                    self.diff_bit_delta.push(delta);
                    hist.add(delta as usize);
                }
            }
        }
        hist.finish();
        let max_delta = hist.m_max_key_len as u64;
        let max_delta_bit_num = compute_uintbits(max_delta);

        let mut best_base_bit_num = 0usize;
        let mut total_storage_size = u64::MAX;
        for i in 1..=max_delta_bit_num {
            let max_base = if i >= 64 { u64::MAX } else { (1u64 << i) - 1 };
            let mut below_num = 0u64;
            hist.for_each(|key, num| {
                if (key as u64) < max_base {
                    below_num += num;
                }
            });
            let upper_num = hist.m_cnt_sum - below_num;
            let tmp = hist.m_cnt_sum * i as u64 + upper_num * (max_delta_bit_num - i) as u64;
            if tmp < total_storage_size {
                total_storage_size = tmp;
                best_base_bit_num = i;
            }
        }
        self.base_bit_num = best_base_bit_num as u8;
        self.extra_bit_num = (max_delta_bit_num - best_base_bit_num) as u8;

        if self.opts.print_histogram {
            if let Some(logger) = &self.logger {
                crate::log!(
                    logger,
                    "cbt diff-bit histogram: entries={} max_delta_bit_num={} base_bit_num={} extra_bit_num={}",
                    hist.m_cnt_sum,
                    max_delta_bit_num,
                    self.base_bit_num,
                    self.extra_bit_num
                );
            }
        }

        let base_max = if self.base_bit_num >= 64 {
            u64::MAX
        } else {
            (1u64 << self.base_bit_num) - 1
        };
        self.base = UintVecMin0::resize_with_uintbits(self.diff_bit_delta.len(), self.base_bit_num.max(1) as usize)
            .expect("base_bit_num fits in 1..=64");
        self.extra = UintVecMin0::with_bits(self.extra_bit_num.max(1) as usize);
        self.bitmap = RankSelect::new(self.diff_bit_delta.len());
        for (i, &delta) in self.diff_bit_delta.iter().enumerate() {
            if delta <= base_max {
                self.base.set_wire(i, delta);
                self.bitmap.set0(i);
            } else {
                self.base.set_wire(i, delta & base_max);
                self.bitmap.set1(i);
                self.extra
                    .push_back(delta >> self.base_bit_num)
                    .expect("overflow delta fits in extra_bit_num bits by construction");
            }
        }
        self.bitmap.build_cache();
    }
}

/// A collection of CBT blocks behind one packed header (component G).
#[derive(Debug, Clone)]
pub struct CritBitTriePacked<'a> {
    num_words: u64,
    trie_nums: u64,
    entry_per_trie: u64,
    hash_bit_num: u8,
    max_layer: u64,
    header_vec: SortedUintVec<'a>,
    trie_list: Vec<CritBitTrie<'a>>,
}

impl<'a> CritBitTriePacked<'a> {
    pub fn num_words(&self) -> u64 {
        self.num_words
    }

    pub fn trie_nums(&self) -> u64 {
        self.trie_nums
    }

    pub fn entry_per_trie(&self) -> u64 {
        self.entry_per_trie
    }

    pub fn hash_bit_num(&self) -> u8 {
        self.hash_bit_num
    }

    pub fn max_layer(&self) -> u64 {
        self.max_layer
    }

    pub fn block(&self, i: usize) -> &CritBitTrie<'a> {
        &self.trie_list[i]
    }

    /// Global rank of the first key of block `trie_index`.
    pub fn base_rank_id(&self, trie_index: usize) -> u64 {
        self.entry_per_trie * trie_index as u64
    }

    /// Global rank of the last key of block `trie_index`.
    pub fn get_largest_id(&self, trie_index: usize) -> u64 {
        let rank = self.entry_per_trie * (trie_index as u64 + 1) - 1;
        rank.min(self.num_words - 1)
    }

    pub fn get_smallest_id(&self, trie_index: usize) -> u64 {
        self.base_rank_id(trie_index)
    }

    pub fn clear(&mut self) {
        self.header_vec = SortedUintVec::default();
        self.trie_list.clear();
    }

    /// Severs every block's borrow of a memory-mapped region so it can be
    /// safely unmapped.
    pub fn risk_release(&mut self) {
        self.header_vec.risk_release_ownership();
        for trie in &mut self.trie_list {
            trie.risk_release_ownership();
        }
        self.trie_list.clear();
    }

    /// Serializes the prefix header plus every block's sub-arrays, each
    /// block's payload padded to an 8-byte boundary (`spec.md` §6).
    pub fn save(&self) -> Vec<u8> {
        let header_bytes = self.header_vec.save();
        let crc = crc16_ccitt(&header_bytes);

        let mut out = Vec::new();
        out.extend_from_slice(&CBT_MAGIC);
        out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // version:4 | reserved:11 | extra_header:1
        out.extend_from_slice(&0u32.to_le_bytes()); // padding to a 16-byte, 8-aligned prefix
        out.extend_from_slice(&header_bytes);
        while out.len() % 8 != 0 {
            out.push(0);
        }
        for trie in &self.trie_list {
            out.extend_from_slice(trie.encoded_trie.data());
            out.extend_from_slice(trie.base.data());
            out.extend_from_slice(trie.bitmap.data());
            out.extend_from_slice(trie.extra.data());
            out.extend_from_slice(trie.hash_vec.data());
        }
        out
    }

    /// Inverse of [`save`](Self::save): verifies the magic and (unless
    /// `opts.verify_checksums` is false) the header CRC16/CCITT, then
    /// takes a non-owning view over every block's sub-arrays directly into
    /// `mem` (the mmap-load path). Any corruption found is narrated through
    /// `logger`, when given, before the `Status` is returned.
    pub fn load(mem: &'a [u8], opts: ReaderOptions, logger: Option<&RefCell<Logger>>) -> Result<Self> {
        macro_rules! fail {
            ($code:expr, $msg:expr) => {{
                if let Some(l) = logger {
                    crate::log!(l, "CritBitTriePacked::load: {}", $msg);
                }
                return Err(Status::new($code, $msg));
            }};
        }

        if mem.len() < PREFIX_HEADER_LEN {
            fail!(StatusCode::CorruptHeader, "truncated prefix header");
        }
        if mem[0..4] != CBT_MAGIC {
            fail!(StatusCode::CorruptHeader, "bad magic");
        }
        let header_size = u32::from_le_bytes(mem[4..8].try_into().unwrap()) as usize;
        let header_crc16 = u16::from_le_bytes(mem[8..10].try_into().unwrap());
        if mem.len() < PREFIX_HEADER_LEN + header_size {
            fail!(StatusCode::CorruptHeader, "truncated header_vec");
        }
        let header_bytes = &mem[PREFIX_HEADER_LEN..PREFIX_HEADER_LEN + header_size];
        if opts.verify_checksums && crc16_ccitt(header_bytes) != header_crc16 {
            fail!(StatusCode::CorruptHeader, "header CRC16 mismatch");
        }
        let header_vec = SortedUintVec::load(header_bytes)?;
        let num_words = header_vec.get(0);
        let trie_nums = header_vec.get(1);
        let entry_per_trie = header_vec.get(2);
        let hash_bit_num = header_vec.get(3) as u8;

        let mut data_pos = PREFIX_HEADER_LEN + header_size;
        while data_pos % 8 != 0 {
            data_pos += 1;
        }

        const MEM_INDEX_BEGIN: usize = 4;
        const NUM_EACH_GROUP: usize = 8;
        let mut trie_list = Vec::with_capacity(trie_nums as usize);
        let mut max_layer = 0u64;

        for i in 0..trie_nums as usize {
            let begin = MEM_INDEX_BEGIN + i * NUM_EACH_GROUP;
            // The number of keys in this block: every block but the last
            // holds exactly `entry_per_trie`; the last holds the
            // remainder (computed, not `num_words % entry_per_trie`,
            // which is wrong when the count divides evenly).
            let base_size = if (i as u64 + 1) < trie_nums {
                entry_per_trie
            } else {
                num_words - entry_per_trie * (trie_nums - 1)
            };
            let n_internal = base_size.saturating_sub(1);

            let base_bit_num = header_vec.get(begin) as u8;
            let extra_bit_num = header_vec.get(begin + 1) as u8;
            let layer = header_vec.get(begin + 2);
            max_layer = max_layer.max(layer);
            let encoded_trie_mem_size = header_vec.get(begin + 3) as usize;
            let base_mem_size = header_vec.get(begin + 4) as usize;
            let bitmap_mem_size = header_vec.get(begin + 5) as usize;
            let extra_mem_size = header_vec.get(begin + 6) as usize;
            let hash_vec_mem_size = header_vec.get(begin + 7) as usize;

            let take = |pos: &mut usize, len: usize| -> Result<&'a [u8]> {
                if *pos + len > mem.len() {
                    if let Some(l) = logger {
                        crate::log!(l, "CritBitTriePacked::load: truncated block {} payload", i);
                    }
                    return Err(Status::new(
                        StatusCode::CorruptHeader,
                        "CritBitTriePacked::load: truncated block payload",
                    ));
                }
                let slice = &mem[*pos..*pos + len];
                *pos += len;
                Ok(slice)
            };

            let encoded_trie_bytes = take(&mut data_pos, encoded_trie_mem_size)?;
            let encoded_trie = RankSelect::risk_set_data(encoded_trie_bytes, (n_internal * 2 + 1) as usize);

            let base_bytes = take(&mut data_pos, base_mem_size)?;
            let base = UintVecMin0::risk_set_data(base_bytes, n_internal as usize, base_bit_num.max(1) as usize);

            let bitmap_bytes = take(&mut data_pos, bitmap_mem_size)?;
            let bitmap = RankSelect::risk_set_data(bitmap_bytes, n_internal as usize);

            let extra_bytes = take(&mut data_pos, extra_mem_size)?;
            let extra = UintVecMin0::risk_set_data(
                extra_bytes,
                bitmap.max_rank1() as usize,
                extra_bit_num.max(1) as usize,
            );

            // Always consume the hash-vector bytes, even when `hash_bit_num`
            // is 0 (an empty-but-present array), so later blocks stay
            // aligned on the byte offsets `save` actually wrote.
            let hash_bytes = take(&mut data_pos, hash_vec_mem_size)?;
            let hash_vec = if hash_bit_num != 0 {
                UintVecMin0::risk_set_data(hash_bytes, base_size as usize, hash_bit_num as usize)
            } else {
                UintVecMin0::with_bits(0)
            };

            let mut trie = CritBitTrie {
                base_bit_num,
                extra_bit_num,
                layer,
                encoded_trie,
                base,
                bitmap,
                extra,
                hash_vec,
                layer_id: Vec::new(),
                layer_rank: Vec::new(),
            };
            trie.calculat_layer_pos();
            trie_list.push(trie);
        }

        Ok(CritBitTriePacked {
            num_words,
            trie_nums,
            entry_per_trie,
            hash_bit_num,
            max_layer,
            header_vec,
            trie_list,
        })
    }

    /// Writes [`save`](Self::save)'s bytes to `path`.
    pub fn save_to_path(&self, path: &FsPath) -> Result<()> {
        std::fs::write(path, self.save())
            .map_err(|e| Status::from(e).annotate(format!("CritBitTriePacked::save_to_path: writing {}", path.display())))
    }

    /// Parses a packed index out of an already memory-mapped file. The
    /// caller owns `source` and must keep it alive for as long as the
    /// returned value is in use, the same borrowing contract every other
    /// `risk_set_data` view in this crate follows.
    pub fn load_from_path(source: &'a MmapSource, opts: ReaderOptions, logger: Option<&RefCell<Logger>>) -> Result<Self> {
        Self::load(source.as_bytes(), opts, logger)
    }
}

/// Drives `trie_nums` independent [`CritBitTrieBuilder`]s, one per block
/// of a row-major partition of a sorted key set, then packs them into a
/// [`CritBitTriePacked`] (component H).
pub struct CritBitTriePackedBuilder {
    entry_per_trie: u64,
    trie_nums: u64,
    num_words: u64,
    hash_bit_num: u8,
    is_reverse: bool,
    builder_list: Vec<CritBitTrieBuilder>,
}

impl CritBitTriePackedBuilder {
    pub fn new(
        num_keys: u64,
        entry_per_trie: u64,
        _sum_key_len: u64,
        is_reverse: bool,
        hash_bit_num: u8,
        opts: BuildOptions,
        logger: Option<Rc<RefCell<Logger>>>,
    ) -> Self {
        let trie_nums = (num_keys + entry_per_trie - 1) / entry_per_trie;
        let builder_list = (0..trie_nums)
            .map(|_| CritBitTrieBuilder::new(is_reverse, hash_bit_num, opts, logger.clone()))
            .collect();
        CritBitTriePackedBuilder {
            entry_per_trie,
            trie_nums,
            num_words: num_keys,
            hash_bit_num,
            is_reverse,
            builder_list,
        }
    }

    /// Appends `key` into block `block_index`'s sub-builder. The caller
    /// (invariably an outer trie builder) supplies `block_index` by
    /// row-major partition of the sorted key set.
    pub fn insert(&mut self, key: &[u8], block_index: usize) -> Result<()> {
        self.builder_list[block_index].insert(key)
    }

    /// Finalizes every sub-builder's tree into its bit-packed form.
    pub fn encode(&mut self) {
        for b in &mut self.builder_list {
            b.drop_trailing_placeholder();
            b.encode();
            b.compress_diff_bit_array();
        }
    }

    /// Exports the smallest (if `reverse`) or largest key of each block,
    /// for use as an outer trie's block separators. Works before
    /// `newcbt` consumes the builder: `prev_key` always holds the last
    /// key a sub-builder saw, which is the block's true smallest key
    /// under `is_reverse` insertion order and its true largest key
    /// otherwise; `smallest_key` (the first key a sub-builder saw) is the
    /// other extreme.
    pub fn get_bounds(&self, reverse: bool) -> Vec<Vec<u8>> {
        self.builder_list
            .iter()
            .map(|b| {
                if reverse == self.is_reverse {
                    b.prev_key.clone()
                } else {
                    b.smallest_key.clone()
                }
            })
            .collect()
    }

    /// Consumes the builder, materializing the packed header and every
    /// block's sub-arrays by swapping them out of the sub-builders.
    pub fn newcbt(self) -> Result<CritBitTriePacked<'static>> {
        let mut header_builder = SuvBuilder::new(6, false)?;
        header_builder.push_back(self.num_words)?;
        header_builder.push_back(self.trie_nums)?;
        header_builder.push_back(self.entry_per_trie)?;
        header_builder.push_back(self.hash_bit_num as u64)?;

        let mut trie_list = Vec::with_capacity(self.trie_nums as usize);
        let mut max_layer = 0u64;

        for b in self.builder_list {
            max_layer = max_layer.max(b.layer);

            let mut extra = b.extra;
            extra.shrink_to_fit();

            header_builder.push_back(b.base_bit_num as u64)?;
            header_builder.push_back(b.extra_bit_num as u64)?;
            header_builder.push_back(b.layer)?;
            header_builder.push_back(b.encoded_trie.mem_size() as u64)?;
            header_builder.push_back(b.base.mem_size() as u64)?;
            header_builder.push_back(b.bitmap.mem_size() as u64)?;
            header_builder.push_back(extra.mem_size() as u64)?;

            let hash_vec = if self.hash_bit_num != 0 {
                let mut hv = b.hash_vec;
                if self.is_reverse {
                    let n = hv.len();
                    let mut reversed = UintVecMin0::resize_with_uintbits(n, self.hash_bit_num as usize)?;
                    for i in 0..n {
                        reversed.set_wire(n - 1 - i, hv.get(i));
                    }
                    reversed
                } else {
                    hv.shrink_to_fit();
                    hv
                }
            } else {
                UintVecMin0::with_bits(0)
            };
            header_builder.push_back(hash_vec.mem_size() as u64)?;

            let mut trie = CritBitTrie {
                base_bit_num: b.base_bit_num,
                extra_bit_num: b.extra_bit_num,
                layer: b.layer,
                encoded_trie: b.encoded_trie,
                base: b.base,
                bitmap: b.bitmap,
                extra,
                hash_vec,
                layer_id: Vec::new(),
                layer_rank: Vec::new(),
            };
            trie.calculat_layer_pos();
            trie_list.push(trie);
        }

        let mut header_vec = SortedUintVec::default();
        header_builder.finish(Some(&mut header_vec))?;

        Ok(CritBitTriePacked {
            num_words: self.num_words,
            trie_nums: self.trie_nums,
            entry_per_trie: self.entry_per_trie,
            hash_bit_num: self.hash_bit_num,
            max_layer,
            header_vec,
            trie_list,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::random_sorted_keys;

    fn build_single_block(keys: &[Vec<u8>], hash_bit_num: u8) -> CritBitTriePacked<'static> {
        let sum_len: u64 = keys.iter().map(|k| k.len() as u64).sum();
        let mut pb = CritBitTriePackedBuilder::new(
            keys.len() as u64,
            keys.len() as u64,
            sum_len,
            false,
            hash_bit_num,
            BuildOptions::default(),
            None,
        );
        for k in keys {
            pb.insert(k, 0).unwrap();
        }
        pb.encode();
        pb.newcbt().unwrap()
    }

    #[test]
    fn test_two_key_cbt() {
        let keys: Vec<Vec<u8>> = vec![b"a".to_vec(), b"b".to_vec()];
        let packed = build_single_block(&keys, 0);
        assert_eq!(packed.num_words(), 2);
        assert_eq!(packed.trie_nums(), 1);
        let block = packed.block(0);
        assert_eq!(block.index(b"a", None), 0);
        assert_eq!(block.index(b"b", None), 1);
    }

    #[test]
    fn test_shared_prefixes_single_block() {
        let keys: Vec<Vec<u8>> = vec![b"abc".to_vec(), b"abd".to_vec(), b"abe".to_vec(), b"abf".to_vec()];
        let packed = build_single_block(&keys, 0);
        assert_eq!(packed.trie_nums(), 1);
        let block = packed.block(0);
        for (expected_rank, key) in keys.iter().enumerate() {
            assert_eq!(block.index(key, None), expected_rank);
        }
        assert!(block.layer() >= 2);
    }

    #[test]
    fn test_index_matches_sorted_position_for_random_keys() {
        let keys = random_sorted_keys(30, 200, 24);
        let packed = build_single_block(&keys, 0);
        let block = packed.block(0);
        for (expected_rank, key) in keys.iter().enumerate() {
            assert_eq!(block.index(key, None), expected_rank, "key={key:?}");
        }
    }

    #[test]
    fn test_duplicate_key_rejected_by_default() {
        let mut pb = CritBitTriePackedBuilder::new(2, 2, 2, false, 0, BuildOptions::default(), None);
        pb.insert(b"a", 0).unwrap();
        assert!(pb.insert(b"a", 0).is_err());
    }

    #[test]
    fn test_duplicate_key_collapsed_when_configured() {
        let opts = BuildOptions {
            duplicate_key_policy: DuplicateKeyPolicy::Collapse,
            ..BuildOptions::default()
        };
        let mut pb = CritBitTriePackedBuilder::new(2, 2, 2, false, 0, opts, None);
        pb.insert(b"a", 0).unwrap();
        assert!(pb.insert(b"a", 0).is_ok());
    }

    #[test]
    fn test_lower_bound_self_path_matches_index() {
        let keys = random_sorted_keys(31, 64, 16);
        let packed = build_single_block(&keys, 0);
        let block = packed.block(0);
        for key in &keys {
            let mut path = Path::new();
            let rank = block.index(key, Some(&mut path));
            let lb = block.lower_bound(key, key, &path, 0);
            assert_eq!(lb, rank);
        }
    }

    #[test]
    fn test_multi_block_packing_and_bounds() {
        let keys = random_sorted_keys(32, 400, 20);
        let entry_per_trie = 128u64;
        let sum_len: u64 = keys.iter().map(|k| k.len() as u64).sum();
        let mut pb = CritBitTriePackedBuilder::new(
            keys.len() as u64,
            entry_per_trie,
            sum_len,
            false,
            0,
            BuildOptions::default(),
            None,
        );
        for (i, k) in keys.iter().enumerate() {
            let block_index = i / entry_per_trie as usize;
            pb.insert(k, block_index).unwrap();
        }
        let bounds_before = pb.get_bounds(false);
        pb.encode();
        let packed = pb.newcbt().unwrap();
        assert_eq!(packed.trie_nums(), 4);
        for (block_index, bound) in bounds_before.iter().enumerate() {
            let global_last = packed.get_largest_id(block_index) as usize;
            assert_eq!(bound, &keys[global_last]);
        }
        for (i, k) in keys.iter().enumerate() {
            let block_index = i / entry_per_trie as usize;
            let within = i % entry_per_trie as usize;
            assert_eq!(packed.block(block_index).index(k, None), within);
        }
    }

    #[test]
    fn test_save_load_round_trip_with_hash_filter() {
        let keys = random_sorted_keys(33, 1000, 24);
        let entry_per_trie = 128u64;
        let sum_len: u64 = keys.iter().map(|k| k.len() as u64).sum();
        let mut pb = CritBitTriePackedBuilder::new(
            keys.len() as u64,
            entry_per_trie,
            sum_len,
            false,
            8,
            BuildOptions::default(),
            None,
        );
        for (i, k) in keys.iter().enumerate() {
            let block_index = i / entry_per_trie as usize;
            pb.insert(k, block_index).unwrap();
        }
        pb.encode();
        let packed = pb.newcbt().unwrap();
        let bytes = packed.save();
        let loaded = CritBitTriePacked::load(&bytes, ReaderOptions::default(), None).unwrap();
        assert_eq!(loaded.num_words(), keys.len() as u64);

        for (i, k) in keys.iter().enumerate() {
            let block_index = i / entry_per_trie as usize;
            let within = i % entry_per_trie as usize;
            let block = loaded.block(block_index);
            assert_eq!(block.index(k, None), within);
            let global_rank = loaded.base_rank_id(block_index) as usize + within;
            assert!(block.hash_match(k, within, loaded.hash_bit_num()));
            let _ = global_rank;
        }

        let mut false_positives = 0u32;
        let absent_keys = random_sorted_keys(34, 200, 24);
        let present: std::collections::BTreeSet<&Vec<u8>> = keys.iter().collect();
        let mut checked = 0u32;
        for k in &absent_keys {
            if present.contains(k) {
                continue;
            }
            checked += 1;
            let block_index = 0usize;
            if loaded.block(block_index).hash_match(k, 0, loaded.hash_bit_num()) {
                false_positives += 1;
            }
        }
        assert!(checked > 0);
        assert!((false_positives as f64 / checked as f64) < 0.5);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let keys = random_sorted_keys(35, 10, 8);
        let packed = build_single_block(&keys, 0);
        let mut bytes = packed.save();
        bytes[0] = b'X';
        assert!(CritBitTriePacked::load(&bytes, ReaderOptions::default(), None).is_err());
    }

    #[test]
    fn test_load_logs_corruption_diagnostics() {
        let keys = random_sorted_keys(37, 10, 8);
        let packed = build_single_block(&keys, 0);
        let mut bytes = packed.save();
        bytes[0] = b'X';

        let captured: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let logger = RefCell::new(Logger(Box::new(crate::test_util::SharedBuf(captured.clone()))));
        assert!(CritBitTriePacked::load(&bytes, ReaderOptions::default(), Some(&logger)).is_err());
        let logged = String::from_utf8(captured.borrow().clone()).unwrap();
        assert!(logged.contains("bad magic"), "logged: {logged:?}");
    }

    #[test]
    fn test_load_can_skip_checksum_verification() {
        let keys = random_sorted_keys(38, 10, 8);
        let packed = build_single_block(&keys, 0);
        let mut bytes = packed.save();
        // Corrupt only the stored CRC16 field itself (not the header bytes
        // it covers), so a trusting reader that skips verification still
        // decodes a structurally valid header.
        bytes[8] ^= 0xff;
        let opts = ReaderOptions { verify_checksums: false };
        assert!(CritBitTriePacked::load(&bytes, opts, None).is_ok());
        assert!(CritBitTriePacked::load(&bytes, ReaderOptions::default(), None).is_err());
    }

    #[test]
    fn test_risk_release_keeps_metadata_but_drops_blocks() {
        let keys = random_sorted_keys(36, 10, 8);
        let mut packed = build_single_block(&keys, 0);
        let trie_nums_before = packed.trie_nums();
        packed.risk_release();
        assert_eq!(packed.trie_nums(), trie_nums_before);
        assert_eq!(packed.block(0).base.len(), 0);
    }

    #[test]
    fn test_get_bounds_before_newcbt_for_forward_and_reverse() {
        let keys = random_sorted_keys(39, 300, 20);
        let entry_per_trie = 64u64;
        let sum_len: u64 = keys.iter().map(|k| k.len() as u64).sum();

        let mut pb = CritBitTriePackedBuilder::new(
            keys.len() as u64,
            entry_per_trie,
            sum_len,
            false,
            0,
            BuildOptions::default(),
            None,
        );
        for (i, k) in keys.iter().enumerate() {
            pb.insert(k, i / entry_per_trie as usize).unwrap();
        }
        let largest = pb.get_bounds(false);
        let n_blocks = largest.len();
        for (block_index, bound) in largest.iter().enumerate() {
            let end = ((block_index + 1) * entry_per_trie as usize).min(keys.len());
            assert_eq!(bound, &keys[end - 1]);
        }

        let mut rev_keys = keys.clone();
        rev_keys.reverse();
        let mut pb_rev = CritBitTriePackedBuilder::new(
            rev_keys.len() as u64,
            entry_per_trie,
            sum_len,
            true,
            0,
            BuildOptions::default(),
            None,
        );
        for (i, k) in rev_keys.iter().enumerate() {
            pb_rev.insert(k, i / entry_per_trie as usize).unwrap();
        }
        let smallest = pb_rev.get_bounds(true);
        assert_eq!(smallest.len(), n_blocks);
        for (block_index, bound) in smallest.iter().enumerate() {
            let end = ((block_index + 1) * entry_per_trie as usize).min(rev_keys.len());
            assert_eq!(bound, &rev_keys[end - 1]);
        }
    }

    #[test]
    fn test_compress_diff_bit_array_logs_histogram_when_enabled() {
        let keys = random_sorted_keys(40, 200, 24);
        let opts = BuildOptions { print_histogram: true, ..BuildOptions::default() };
        let captured: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let logger = Rc::new(RefCell::new(Logger(Box::new(crate::test_util::SharedBuf(captured.clone())))));

        let sum_len: u64 = keys.iter().map(|k| k.len() as u64).sum();
        let mut pb = CritBitTriePackedBuilder::new(
            keys.len() as u64,
            keys.len() as u64,
            sum_len,
            false,
            0,
            opts,
            Some(logger),
        );
        for k in &keys {
            pb.insert(k, 0).unwrap();
        }
        pb.encode();
        let logged = String::from_utf8(captured.borrow().clone()).unwrap();
        assert!(logged.contains("histogram"), "logged: {logged:?}");
    }

    #[test]
    fn test_save_to_path_and_load_from_path_round_trip() {
        let keys = random_sorted_keys(41, 500, 20);
        let entry_per_trie = 64u64;
        let sum_len: u64 = keys.iter().map(|k| k.len() as u64).sum();
        let mut pb = CritBitTriePackedBuilder::new(
            keys.len() as u64,
            entry_per_trie,
            sum_len,
            false,
            8,
            BuildOptions::default(),
            None,
        );
        for (i, k) in keys.iter().enumerate() {
            pb.insert(k, i / entry_per_trie as usize).unwrap();
        }
        pb.encode();
        let packed = pb.newcbt().unwrap();

        let mut path = std::env::temp_dir();
        path.push(format!("succinct-index-cbt-roundtrip-{}.bin", std::process::id()));
        packed.save_to_path(&path).unwrap();

        let source = MmapSource::open(&path).unwrap();
        let loaded = CritBitTriePacked::load_from_path(&source, ReaderOptions::default(), None).unwrap();

        for (i, k) in keys.iter().enumerate() {
            let block_index = i / entry_per_trie as usize;
            let within = i % entry_per_trie as usize;
            let block = loaded.block(block_index);
            assert_eq!(block.index(k, None), within);
            assert!(block.hash_match(k, within, loaded.hash_bit_num()));
        }

        std::fs::remove_file(&path).unwrap();
    }
}
