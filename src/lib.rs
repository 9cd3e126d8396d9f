//! Succinct, memory-mapped string-indexing data structures: a packed
//! crit-bit trie index built from sorted string pools, backed by
//! rank/select bitmaps and block-compressed uint vectors.
#![allow(dead_code)]

pub mod bits;
pub mod cbt;
pub mod error;
pub mod histogram;
#[macro_use]
pub mod infolog;
pub mod mmap;
pub mod options;
pub mod rank_select;
pub mod sorted_uint_vec;
pub mod strvec;
mod test_util;
pub mod uintvec;

pub use cbt::{CritBitTrie, CritBitTrieBuilder, CritBitTriePacked, CritBitTriePackedBuilder};
pub use error::{Result, Status, StatusCode};
pub use mmap::MmapSource;
pub use options::{BuildOptions, DuplicateKeyPolicy, ReaderOptions};
pub use rank_select::RankSelect;
pub use sorted_uint_vec::SortedUintVec;
pub use strvec::SortableStrVec;
pub use uintvec::UintVecMin0;
