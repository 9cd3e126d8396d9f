//! Build- and read-time configuration. Mirrors the `Options`/`ReadOptions`
//! split of a table builder/reader: one struct influences how a builder
//! chooses an encoding, the other how a reader trusts what it's given.

/// What a `CritBitTrieBuilder` does when the same key is inserted twice
/// into the same block. The legacy implementation this crate is modeled on
/// only asserted in debug builds and left release behavior undefined; we
/// pin one policy so behavior is reproducible across builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKeyPolicy {
    /// Fail the `insert` with `StatusCode::DuplicateKey`.
    Reject,
    /// Silently keep only the first of the two nodes (the duplicate is
    /// dropped from the tree, matching the original's "redundant insert is
    /// a no-op after the debug assert" practice).
    Collapse,
}

/// Tunables that influence how [`crate::strvec`] sorts its pool and how
/// much diagnostic output a build emits. These correspond 1:1 to the
/// `SortableStrVec_*` environment variables of the reference
/// implementation; exposing them as struct fields keeps the behavior
/// explicit and testable instead of implicit global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Below this average string length, `SortableStrVec::sort` prefers a
    /// radix pass over a comparison sort.
    pub min_radix_sort_str_len: usize,
    /// Force a merge sort instead of the default unstable sort.
    pub use_merge_sort: bool,
    /// Allow the sort to run across multiple threads.
    pub enable_parallel_sort: bool,
    /// `compress_strpool` dedup level to apply after sorting (0 = off,
    /// 1..=3 as described by `SortableStrVec::compress_strpool`).
    pub stat_compress_level1: u8,
    /// Dump the diff-bit delta histogram through `infolog` while choosing
    /// `base_bit_num` in `compress_diff_bit_array`.
    pub print_histogram: bool,
    /// What to do about duplicate keys inserted into the same CBT block.
    pub duplicate_key_policy: DuplicateKeyPolicy,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            min_radix_sort_str_len: 4,
            use_merge_sort: false,
            enable_parallel_sort: false,
            stat_compress_level1: 0,
            print_histogram: false,
            duplicate_key_policy: DuplicateKeyPolicy::Reject,
        }
    }
}

/// Supplied when opening a previously-built index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Re-verify the prefix header's CRC16 on every `load`, even if the
    /// caller already verified the bytes (e.g. because they were just
    /// produced by this process's own builder).
    pub verify_checksums: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            verify_checksums: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_options_default() {
        let o = BuildOptions::default();
        assert_eq!(o.duplicate_key_policy, DuplicateKeyPolicy::Reject);
        assert!(!o.print_histogram);
    }

    #[test]
    fn test_reader_options_default() {
        assert!(ReaderOptions::default().verify_checksums);
    }
}
