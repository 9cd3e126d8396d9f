//! Component L: memory-mapped file access. Plays the role `RandomAccess`
//! plays for the teacher's SSTable reader (`src/env.rs`, `src/disk_env.rs`),
//! but generalized to "the whole file is the address space" since every
//! decoder here takes a `&[u8]` and computes offsets into it directly,
//! rather than issuing seeks.
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Result, Status, StatusCode};

/// Owns a memory-mapped file and exposes it as a byte slice with the same
/// lifetime as the map itself. Kept alive for as long as any borrowed
/// sub-array (`UintVecMin0`, `RankSelect`, ...) built over it is in use.
pub struct MmapSource {
    mmap: Mmap,
}

impl MmapSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Status::from(e).annotate(format!("opening {}", path.display())))?;
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| Status::from(e).annotate(format!("mmap of {}", path.display())))?;
        Ok(MmapSource { mmap })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

/// Tags where a sub-array's backing bytes came from, the concrete form of
/// the "owned-plus-viewed memory" design note: destruction never needs to
/// branch on this directly in Rust (the `Cow`/lifetime already encode it),
/// but callers that need to report provenance (diagnostics, `risk_release`)
/// can still ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySource {
    /// Heap-allocated, owned by the struct holding it.
    Malloc,
    /// Borrowed from a `MmapSource` that must outlive this view.
    Mmap,
    /// Borrowed from a caller-supplied buffer of unspecified origin.
    User,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_and_read_back() {
        let mut path = std::env::temp_dir();
        path.push(format!("succinct-index-mmap-test-{}.bin", std::process::id()));
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(b"hello mapped world").unwrap();
        }
        let src = MmapSource::open(&path).unwrap();
        assert_eq!(src.as_bytes(), b"hello mapped world");
        assert_eq!(src.len(), 19);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_open_missing_file_fails() {
        let path = Path::new("/nonexistent/succinct-index-does-not-exist.bin");
        assert!(MmapSource::open(path).is_err());
    }
}
