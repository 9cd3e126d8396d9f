//! Component E: a block-compressed representation of a near-sorted `u64`
//! sequence. Grounded on
//! `examples/original_source/src/terark/util/sorted_uint_vec.hpp`.
//!
//! Each block of `block_units` (64 or 128) values is encoded relative to
//! its first value (the "sample", kept in the block index) as a
//! low-water-shifted, width-typed array of deltas with an overflow region
//! for outliers, or — when the block isn't monotone — as a quadratic
//! Lagrange curve plus a per-value residual. `width_type` 11's
//! no-overflow-ever dense packing and `width_type` 15's dense-2-bit
//! sub-case are folded into the general small-width encoder here (see
//! `DESIGN.md`): they decode identically to `width_type` 1/2 with zero
//! overflow entries, so giving them their own type code would only save a
//! few header bits, not change the decode algorithm.
use std::borrow::Cow;

use crate::bits::{BitReader, BitWriter};
use crate::error::{Result, Status, StatusCode};

/// Candidate small widths searched for types 1..10 (direct) and 12/13/14
/// (wide). Type 0 (constant) and 15 (Lagrange) are handled separately.
const CANDIDATE_WIDTHS: [usize; 13] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 12, 16, 20];

fn type_for_width(w: usize) -> u8 {
    match w {
        1..=10 => w as u8,
        12 => 12,
        16 => 13,
        20 => 14,
        _ => unreachable!("width {w} is not a candidate width"),
    }
}

fn width_for_type(t: u8) -> usize {
    match t {
        1..=10 => t as usize,
        12 => 12,
        13 => 16,
        14 => 20,
        _ => unreachable!("type {t} has no direct small width"),
    }
}

fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Evaluates the quadratic interpolating `(0, y0)`, `(mid, y1)`, `(last,
/// y2)` at integer `x`, rounding to the nearest integer. Both encoder and
/// decoder call this same function, so any floating-point rounding is
/// consistent between them; the residual stored alongside corrects
/// whatever error remains.
fn lagrange_eval(x: usize, mid: usize, last: usize, y0: u64, y1: u64, y2: u64) -> i64 {
    let (x, mid, last) = (x as f64, mid as f64, last as f64);
    let (y0, y1, y2) = (y0 as f64, y1 as f64, y2 as f64);
    let l0 = ((x - mid) * (x - last)) / ((0.0 - mid) * (0.0 - last));
    let l1 = ((x - 0.0) * (x - last)) / ((mid - 0.0) * (mid - last));
    let l2 = ((x - 0.0) * (x - mid)) / ((last - 0.0) * (last - mid));
    (y0 * l0 + y1 * l1 + y2 * l2).round() as i64
}

/// One decoded block's worth of values, plus which width type encoded it
/// (exposed mainly for tests that pin the expected encoding per scenario).
#[derive(Debug, Clone)]
pub struct EncodedBlock {
    pub width_type: u8,
    pub bytes: Vec<u8>,
}

/// Encodes `values` (length `n = block_units`, `values[0]` is the external
/// sample) into its on-disk byte form. `input_sorted` selects the
/// monotone small/large-width path; callers should fall back to this
/// function with `input_sorted = false` whenever the builder observes a
/// sort violation in an `input_sorted = true` stream.
pub fn encode_block(values: &[u64], input_sorted: bool) -> EncodedBlock {
    let n = values.len();
    let diffs: Vec<i64> = (0..n - 1)
        .map(|i| values[i + 1] as i64 - values[i] as i64)
        .collect();
    let monotone = input_sorted && diffs.iter().all(|&d| d >= 0);

    if monotone {
        if let Some(block) = try_encode_arithmetic(values, &diffs) {
            return block;
        }
    }
    encode_lagrange(values)
}

fn try_encode_arithmetic(values: &[u64], diffs: &[i64]) -> Option<EncodedBlock> {
    let low_water = *diffs.iter().min().unwrap_or(&0);
    if low_water < 0 || low_water as u64 > (1u64 << 50) {
        return None;
    }
    let shifted: Vec<u64> = diffs.iter().map(|&d| (d - low_water) as u64).collect();

    if shifted.iter().all(|&d| d == 0) {
        let mut w = BitWriter::new();
        write_header(&mut w, 0, low_water as u64);
        return Some(EncodedBlock { width_type: 0, bytes: w.into_bytes() });
    }

    let mut best: Option<(usize, u64)> = None;
    for &width in &CANDIDATE_WIDTHS {
        let small_max = (1u64 << width) - 2;
        let overflow_count = shifted.iter().filter(|&&d| d > small_max).count();
        let max_overflow = shifted.iter().filter(|&&d| d > small_max).max().copied().unwrap_or(0);
        let extra_bits = if overflow_count > 0 {
            (64 - max_overflow.leading_zeros() as usize).max(1).saturating_sub(width).max(1)
        } else {
            0
        };
        let cost = (shifted.len() * width) as u64
            + 16
            + overflow_count as u64 * (width + extra_bits) as u64;
        if best.map(|(_, c)| cost < c).unwrap_or(true) {
            best = Some((width, cost));
        }
    }
    let (width, _) = best.unwrap();
    let small_max = (1u64 << width) - 2;

    let mut overflow_vals: Vec<u64> = Vec::new();
    let mut small_vals: Vec<u64> = Vec::with_capacity(shifted.len());
    for &d in &shifted {
        if d <= small_max {
            small_vals.push(d + 1);
        } else {
            small_vals.push(0);
            overflow_vals.push(d);
        }
    }
    let max_overflow = overflow_vals.iter().max().copied().unwrap_or(0);
    let extra_bits = if overflow_vals.is_empty() {
        0
    } else {
        (64 - max_overflow.leading_zeros() as usize).max(1).saturating_sub(width).max(1)
    };

    let mut w = BitWriter::new();
    write_header(&mut w, type_for_width(width), low_water as u64);
    for v in &small_vals {
        w.write(width, *v);
    }
    w.write(8, overflow_vals.len() as u64);
    w.write(8, extra_bits as u64);
    let large_width = width + extra_bits;
    for v in &overflow_vals {
        w.write(large_width, *v);
    }
    Some(EncodedBlock { width_type: type_for_width(width), bytes: w.into_bytes() })
}

fn encode_lagrange(values: &[u64]) -> EncodedBlock {
    let n = values.len();
    let mid = n / 2;
    let last = n - 1;
    let (y0, y1, y2) = (values[0], values[mid], values[last]);

    let residuals: Vec<i64> = (0..n)
        .map(|x| values[x] as i64 - lagrange_eval(x, mid, last, y0, y1, y2))
        .collect();
    let max_zigzag = residuals.iter().map(|&r| zigzag_encode(r)).max().unwrap_or(0);
    let width = (64 - max_zigzag.leading_zeros() as usize).max(1);

    let mut w = BitWriter::new();
    write_header(&mut w, 15, 0);
    w.write(64, y1);
    w.write(64, y2);
    w.write(8, width as u64);
    for &r in &residuals {
        w.write(width, zigzag_encode(r));
    }
    EncodedBlock { width_type: 15, bytes: w.into_bytes() }
}

/// Writes the common 8-bit-minimum header: `type:4, low_water_len_type:2,
/// low_water_low2:2`, followed by the high bits of `low_water` sized per
/// `low_water_len_type` (8/16/24/48 bits), per `spec.md` §6's block-header
/// bit layout. `low_water` is ignored (written as 0) for type 15.
fn write_header(w: &mut BitWriter, width_type: u8, low_water: u64) {
    let len_type: u8 = if low_water < (1 << 8) {
        0
    } else if low_water < (1 << 16) {
        1
    } else if low_water < (1 << 24) {
        2
    } else {
        3
    };
    let high_bits = [8usize, 16, 24, 48][len_type as usize];
    w.write(4, width_type as u64);
    w.write(2, len_type as u64);
    w.write(2, low_water & 0b11);
    w.write(high_bits, low_water >> 2);
}

fn read_header(r: &mut BitReader) -> (u8, u64) {
    let width_type = r.read(4) as u8;
    let len_type = r.read(2);
    let low2 = r.read(2);
    let high_bits = [8usize, 16, 24, 48][len_type as usize];
    let high = r.read(high_bits);
    (width_type, (high << 2) | low2)
}

/// Decodes a block payload into `n` values, given the block's external
/// sample (`values[0]`).
pub fn decode_block(bytes: &[u8], n: usize, sample: u64) -> Vec<u64> {
    let mut r = BitReader::new(bytes);
    let (width_type, low_water) = read_header(&mut r);

    if width_type == 15 {
        let mid = n / 2;
        let last = n - 1;
        let y1 = r.read(64);
        let y2 = r.read(64);
        let width = r.read(8) as usize;
        let mut out = Vec::with_capacity(n);
        for x in 0..n {
            let residual = zigzag_decode(r.read(width));
            let base = lagrange_eval(x, mid, last, sample, y1, y2);
            out.push((base + residual) as u64);
        }
        return out;
    }

    if width_type == 0 {
        let mut out = Vec::with_capacity(n);
        out.push(sample);
        for i in 1..n {
            out.push(out[i - 1].wrapping_add(low_water));
        }
        return out;
    }

    let width = width_for_type(width_type);
    let small_vals: Vec<u64> = (0..n - 1).map(|_| r.read(width)).collect();
    let overflow_count = r.read(8) as usize;
    let extra_bits = r.read(8) as usize;
    let large_width = width + extra_bits;
    let overflow_vals: Vec<u64> = (0..overflow_count).map(|_| r.read(large_width)).collect();

    let mut overflow_iter = overflow_vals.into_iter();
    let mut out = Vec::with_capacity(n);
    out.push(sample);
    for &stored in &small_vals {
        let delta = if stored == 0 {
            overflow_iter.next().unwrap_or(0)
        } else {
            stored - 1
        };
        let prev = *out.last().unwrap();
        out.push(prev.wrapping_add(low_water).wrapping_add(delta));
    }
    out
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FinishStats {
    pub size: u64,
    pub mem_size: u64,
}

/// Single-pass builder: buffers one block at a time, encodes it on fill,
/// and concatenates block payloads with 8-byte alignment exactly as
/// `spec.md` §6 requires for `risk_mmap_from` to rely on aligned offsets.
pub struct Builder {
    block_units: usize,
    input_sorted: bool,
    pending: Vec<u64>,
    block_payloads: Vec<u8>,
    block_offsets: Vec<u64>,
    samples: Vec<u64>,
    total_pushed: u64,
    prev: Option<u64>,
}

impl Builder {
    pub fn new(log2_block_units: u8, input_sorted: bool) -> Result<Self> {
        if log2_block_units != 6 && log2_block_units != 7 {
            return Err(Status::new(
                StatusCode::InvalidArgument,
                "SortedUintVec::Builder: log2_block_units must be 6 or 7",
            ));
        }
        Ok(Builder {
            block_units: 1usize << log2_block_units,
            input_sorted,
            pending: Vec::new(),
            block_payloads: Vec::new(),
            block_offsets: vec![0],
            samples: Vec::new(),
            total_pushed: 0,
            prev: None,
        })
    }

    pub fn push_back(&mut self, v: u64) -> Result<()> {
        if self.input_sorted {
            if let Some(p) = self.prev {
                if v < p {
                    return Err(Status::new(
                        StatusCode::InvalidArgument,
                        "SortedUintVec::Builder::push_back: value decreases but input_sorted was set",
                    ));
                }
            }
        }
        self.prev = Some(v);
        self.pending.push(v);
        self.total_pushed += 1;
        if self.pending.len() == self.block_units {
            self.flush_block();
        }
        Ok(())
    }

    fn flush_block(&mut self) {
        self.samples.push(self.pending[0]);
        let block = encode_block(&self.pending, self.input_sorted);
        let mut bytes = block.bytes;
        while bytes.len() % 8 != 0 {
            bytes.push(0);
        }
        self.block_payloads.extend_from_slice(&bytes);
        self.block_offsets.push(self.block_payloads.len() as u64);
        self.pending.clear();
    }

    /// Pads and flushes the in-progress block (by repeating the last
    /// pushed value, so `get_block` can always return `block_units`
    /// entries), writes the block index, and returns size/mem_size
    /// stats. Fills `out` with the finished vector when provided.
    pub fn finish(mut self, out: Option<&mut SortedUintVec<'static>>) -> Result<FinishStats> {
        if self.total_pushed == 0 {
            return Err(Status::new(
                StatusCode::InvalidState,
                "SortedUintVec::Builder::finish: no values were pushed",
            ));
        }
        if !self.pending.is_empty() {
            let last = *self.pending.last().unwrap();
            while self.pending.len() < self.block_units {
                self.pending.push(last);
            }
            self.flush_block();
        }
        // Final index entry stores the true last value of the vector, not
        // merely the last block's first value.
        self.samples.push(self.prev.unwrap_or(0));

        let mem_size = self.block_payloads.len() as u64;
        let size = self.total_pushed;

        if let Some(out) = out {
            *out = SortedUintVec {
                num_units: self.total_pushed,
                block_units: self.block_units,
                payload: Cow::Owned(self.block_payloads),
                block_offsets: self.block_offsets,
                samples: self.samples,
            };
        }
        Ok(FinishStats { size, mem_size })
    }
}

/// A loaded (or in-memory-built) `SortedUintVec`. `payload` is a `Cow` so
/// an mmap-backed open borrows directly into the mapped bytes.
#[derive(Debug, Clone)]
pub struct SortedUintVec<'a> {
    num_units: u64,
    block_units: usize,
    payload: Cow<'a, [u8]>,
    /// Byte offset of block `i` within `payload`; length `num_blocks + 1`.
    block_offsets: Vec<u64>,
    /// First value of block `i`; length `num_blocks + 1`, with the final
    /// entry holding the true last value of the vector.
    samples: Vec<u64>,
}

impl<'a> SortedUintVec<'a> {
    pub fn len(&self) -> usize {
        self.num_units as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_units == 0
    }

    pub fn block_units(&self) -> usize {
        self.block_units
    }

    fn num_blocks(&self) -> usize {
        self.block_offsets.len() - 1
    }

    fn last_block_len(&self) -> usize {
        let full_blocks = self.num_blocks().saturating_sub(1);
        let counted = full_blocks * self.block_units;
        (self.num_units as usize - counted).min(self.block_units)
    }

    fn block_values(&self, block_idx: usize) -> Vec<u64> {
        let start = self.block_offsets[block_idx] as usize;
        let end = self.block_offsets[block_idx + 1] as usize;
        let sample = self.samples[block_idx];
        decode_block(&self.payload[start..end], self.block_units, sample)
    }

    pub fn get(&self, i: usize) -> u64 {
        let block_idx = i / self.block_units;
        let within = i % self.block_units;
        self.block_values(block_idx)[within]
    }

    /// Fills `out[0] = get(i)`, `out[1] = get(i+1)` (or the final sample
    /// sentinel when `i+1 == len()`).
    pub fn get2(&self, i: usize, out: &mut [u64; 2]) {
        out[0] = self.get(i);
        out[1] = if i + 1 < self.len() {
            self.get(i + 1)
        } else {
            self.samples[self.num_blocks()]
        };
    }

    /// Decodes block `block_idx` fully into `out`, which must have room
    /// for `block_units()` entries; only the first `num_in_block` are
    /// meaningful for the final (padded) block.
    pub fn get_block(&self, block_idx: usize, out: &mut [u64]) {
        let vals = self.block_values(block_idx);
        out[..vals.len()].copy_from_slice(&vals);
    }

    fn num_in_block(&self, block_idx: usize) -> usize {
        if block_idx + 1 == self.num_blocks() {
            self.last_block_len()
        } else {
            self.block_units
        }
    }

    pub fn lower_bound(&self, lo: usize, hi: usize, key: u64) -> usize {
        let mut l = lo;
        let mut h = hi;
        while l < h {
            let mid = l + (h - l) / 2;
            if self.get(mid) < key {
                l = mid + 1;
            } else {
                h = mid;
            }
        }
        l
    }

    pub fn upper_bound(&self, lo: usize, hi: usize, key: u64) -> usize {
        let mut l = lo;
        let mut h = hi;
        while l < h {
            let mid = l + (h - l) / 2;
            if self.get(mid) <= key {
                l = mid + 1;
            } else {
                h = mid;
            }
        }
        l
    }

    pub fn equal_range(&self, lo: usize, hi: usize, key: u64) -> (usize, usize) {
        (self.lower_bound(lo, hi, key), self.upper_bound(lo, hi, key))
    }

    pub fn mem_size(&self) -> usize {
        self.payload.len()
    }

    /// Serializes the whole vector (block index plus payload) into one
    /// buffer self-describing enough for [`SortedUintVec::load`] to parse
    /// back without any side-channel arguments. This is a simplified
    /// stand-in for the bit-packed `ObjectHeader` in `spec.md` §6 (see
    /// `DESIGN.md`): same conceptual shape (header, block payloads, block
    /// index) but laid out as plain little-endian fields rather than
    /// sub-byte bitfields, since nothing outside this crate parses the
    /// format directly.
    pub fn save(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24 + self.block_offsets.len() * 16 + self.payload.len());
        out.extend_from_slice(&self.num_units.to_le_bytes());
        out.extend_from_slice(&(self.block_units as u64).to_le_bytes());
        out.extend_from_slice(&(self.block_offsets.len() as u64).to_le_bytes());
        for &o in &self.block_offsets {
            out.extend_from_slice(&o.to_le_bytes());
        }
        for &s in &self.samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out.extend_from_slice(&self.payload);
        out
    }

    /// Inverse of [`save`](Self::save); borrows its payload out of `bytes`.
    pub fn load(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < 24 {
            return Err(Status::new(
                StatusCode::CorruptHeader,
                "SortedUintVec::load: truncated header",
            ));
        }
        let num_units = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let block_units = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
        let index_len = u64::from_le_bytes(bytes[16..24].try_into().unwrap()) as usize;
        let mut pos = 24usize;
        let need = index_len
            .checked_mul(16)
            .ok_or_else(|| Status::new(StatusCode::CorruptHeader, "SortedUintVec::load: index length overflow"))?;
        if bytes.len() < pos + need {
            return Err(Status::new(
                StatusCode::CorruptHeader,
                "SortedUintVec::load: truncated block index",
            ));
        }
        let mut block_offsets = Vec::with_capacity(index_len);
        for _ in 0..index_len {
            block_offsets.push(u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap()));
            pos += 8;
        }
        let mut samples = Vec::with_capacity(index_len);
        for _ in 0..index_len {
            samples.push(u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap()));
            pos += 8;
        }
        Ok(SortedUintVec {
            num_units,
            block_units,
            payload: Cow::Borrowed(&bytes[pos..]),
            block_offsets,
            samples,
        })
    }

    /// Hands ownership of the payload out by swapping in an empty
    /// borrowed slice, the Rust analogue of `risk_release_ownership`.
    pub fn risk_release_ownership(&mut self) {
        self.payload = Cow::Borrowed(&[]);
        self.num_units = 0;
        self.block_offsets = vec![0];
        self.samples = vec![0];
    }

    /// Non-owning view over an already-built payload (the mmap-load
    /// path). `block_offsets`/`samples` are small and always owned.
    pub fn risk_set_data(
        bytes: &'a [u8],
        num_units: u64,
        block_units: usize,
        block_offsets: Vec<u64>,
        samples: Vec<u64>,
    ) -> Self {
        SortedUintVec {
            num_units,
            block_units,
            payload: Cow::Borrowed(bytes),
            block_offsets,
            samples,
        }
    }
}

impl<'a> Default for SortedUintVec<'a> {
    fn default() -> Self {
        SortedUintVec {
            num_units: 0,
            block_units: 64,
            payload: Cow::Owned(Vec::new()),
            block_offsets: vec![0],
            samples: vec![0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{random_monotone_u64s, rng};
    use rand::Rng;

    fn build(values: &[u64], log2_block_units: u8, input_sorted: bool) -> SortedUintVec<'static> {
        let mut b = Builder::new(log2_block_units, input_sorted).unwrap();
        for &v in values {
            b.push_back(v).unwrap();
        }
        let mut out = SortedUintVec::default();
        b.finish(Some(&mut out)).unwrap();
        out
    }

    #[test]
    fn test_monotone_small_width_round_trip() {
        let values: Vec<u64> = (0..128).map(|i| 100 + 2 * i).collect();
        let v = build(&values, 7, true);
        for (i, &val) in values.iter().enumerate() {
            assert_eq!(v.get(i), val);
        }
    }

    #[test]
    fn test_sparse_overflow_round_trip() {
        let mut values: Vec<u64> = (0..127).collect();
        values.push(1000);
        let v = build(&values, 7, true);
        assert_eq!(v.get(127), 1000);
        for i in 0..127 {
            assert_eq!(v.get(i), i as u64);
        }
    }

    #[test]
    fn test_non_monotone_lagrange_round_trip() {
        let mut r = rng(5);
        let n = 128;
        let values: Vec<u64> = (0..n)
            .map(|i| {
                let x = i as f64 - n as f64 / 2.0;
                let parabola = 10_000.0 - x * x * 2.0;
                (parabola.max(0.0) as i64 + r.gen_range(-5..=5)).max(0) as u64
            })
            .collect();
        let v = build(&values, 7, false);
        for (i, &val) in values.iter().enumerate() {
            assert_eq!(v.get(i), val, "mismatch at {i}");
        }
    }

    #[test]
    fn test_random_monotone_round_trip_multi_block() {
        let values = random_monotone_u64s(9, 10 * 64, 50);
        let v = build(&values, 6, true);
        for (i, &val) in values.iter().enumerate() {
            assert_eq!(v.get(i), val);
        }
    }

    #[test]
    fn test_get2_crosses_block_boundary() {
        let values = random_monotone_u64s(10, 64 * 3, 20);
        let v = build(&values, 6, true);
        let mut out = [0u64; 2];
        v.get2(63, &mut out);
        assert_eq!(out[0], values[63]);
        assert_eq!(out[1], values[64]);
    }

    #[test]
    fn test_lower_upper_bound_match_linear_scan() {
        let values = random_monotone_u64s(11, 20 * 64, 30);
        let v = build(&values, 6, true);
        let mut r = rng(12);
        for _ in 0..2000 {
            let key = r.gen_range(0..*values.last().unwrap() + 10);
            let expect_lo = values.partition_point(|&x| x < key);
            let expect_hi = values.partition_point(|&x| x <= key);
            assert_eq!(v.lower_bound(0, values.len(), key), expect_lo);
            assert_eq!(v.upper_bound(0, values.len(), key), expect_hi);
        }
    }

    #[test]
    fn test_push_back_rejects_decreasing_when_sorted() {
        let mut b = Builder::new(6, true).unwrap();
        b.push_back(5).unwrap();
        assert!(b.push_back(4).is_err());
    }

    #[test]
    fn test_builder_rejects_bad_log2_block_units() {
        assert!(Builder::new(5, true).is_err());
    }

    #[test]
    fn test_finish_on_empty_builder_fails() {
        let b = Builder::new(6, true).unwrap();
        assert!(b.finish(None).is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let values = random_monotone_u64s(20, 5 * 64, 40);
        let original = build(&values, 6, true);
        let bytes = original.save();
        let loaded = SortedUintVec::load(&bytes).unwrap();
        assert_eq!(loaded.len(), original.len());
        for (i, &val) in values.iter().enumerate() {
            assert_eq!(loaded.get(i), val);
        }
    }
}
