//! Lookup throughput for the packed crit-bit trie and its underlying
//! sorted uint vector, mirroring the teacher's `maps_bench` shape (one
//! `Bencher` function per operation, grouped with `benchmark_group!`).
#[macro_use]
extern crate bencher;

use bencher::{black_box, Bencher};

use succinct_index::cbt::CritBitTriePackedBuilder;
use succinct_index::options::BuildOptions;
use succinct_index::sorted_uint_vec::Builder as SortedUintVecBuilder;

fn sorted_keys(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("key-{i:08}").into_bytes()).collect()
}

fn build_packed_index(keys: &[Vec<u8>], entry_per_trie: u64) -> succinct_index::cbt::CritBitTriePacked<'static> {
    let sum_len: u64 = keys.iter().map(|k| k.len() as u64).sum();
    let mut builder = CritBitTriePackedBuilder::new(
        keys.len() as u64,
        entry_per_trie,
        sum_len,
        false,
        8,
        BuildOptions::default(),
        None,
    );
    for (i, key) in keys.iter().enumerate() {
        let block = i / entry_per_trie as usize;
        builder.insert(key, block).unwrap();
    }
    builder.encode();
    builder.newcbt().unwrap()
}

fn bench_cbt_index_lookup(b: &mut Bencher) {
    let keys = sorted_keys(4096);
    let packed = build_packed_index(&keys, 256);
    let mut i = 0usize;
    b.iter(|| {
        let key = &keys[i % keys.len()];
        let block = (i % keys.len()) / 256;
        black_box(packed.block(block).index(key, None));
        i = i.wrapping_add(1);
    });
}

fn bench_cbt_hash_match(b: &mut Bencher) {
    let keys = sorted_keys(4096);
    let packed = build_packed_index(&keys, 256);
    let mut i = 0usize;
    b.iter(|| {
        let idx = i % keys.len();
        let key = &keys[idx];
        let block = idx / 256;
        let within = idx % 256;
        black_box(packed.block(block).hash_match(key, within, packed.hash_bit_num()));
        i = i.wrapping_add(1);
    });
}

fn bench_sorted_uint_vec_get(b: &mut Bencher) {
    let n = 64 * 200;
    let mut builder = SortedUintVecBuilder::new(6, true).unwrap();
    for i in 0..n as u64 {
        builder.push_back(i * 3).unwrap();
    }
    let mut vec = succinct_index::sorted_uint_vec::SortedUintVec::default();
    builder.finish(Some(&mut vec)).unwrap();
    let mut i = 0usize;
    b.iter(|| {
        black_box(vec.get(i % n));
        i = i.wrapping_add(1);
    });
}

benchmark_group!(
    benches,
    bench_cbt_index_lookup,
    bench_cbt_hash_match,
    bench_sorted_uint_vec_get
);
benchmark_main!(benches);
