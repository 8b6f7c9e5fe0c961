//! Binary shard image codec.
//!
//! A shard serializes to a self-describing little-endian buffer: a fixed
//! 64-byte header, the external-id table, the vector arena, optional
//! cosine norms, per-slot levels, and one block per adjacency layer. A
//! well-formed image ends exactly after the final adjacency block — there
//! is no trailer.
//!
//! Decoding is tight: the rebuilt index has `capacity == count` and zero
//! tombstones. Tombstones are not represented in the image at all, so
//! encoding a shard that has deletions resurrects them on the next decode;
//! compact before persisting when deletions must stick.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::hnsw::distance::DistanceMetric;
use crate::hnsw::graph::{HnswConfig, HnswIndex, LayerAdjacency};
use crate::hnsw::visited::Bitset;

/// Shard image magic number: "HNSW" read as a little-endian u32.
pub const SHARD_MAGIC: u32 = 0x574E_5348;

/// Current shard image format version.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 64;

const FLAG_NORMS: u8 = 1;
const FLAG_HEURISTIC: u8 = 1 << 1;
const FLAG_KEEP_PRUNED: u8 = 1 << 2;

/// Header fields available without parsing the full image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardHeader {
    /// Vector dimension.
    pub dim: u32,
    /// Number of encoded slots.
    pub count: u32,
    /// Distance metric of the encoded index.
    pub metric: DistanceMetric,
    /// The `M` graph parameter.
    pub m: u32,
}

fn metric_to_byte(metric: DistanceMetric) -> u8 {
    match metric {
        DistanceMetric::Euclidean => 0,
        DistanceMetric::Cosine => 1,
        DistanceMetric::InnerProduct => 2,
    }
}

fn metric_from_byte(byte: u8) -> Result<DistanceMetric> {
    match byte {
        0 => Ok(DistanceMetric::Euclidean),
        1 => Ok(DistanceMetric::Cosine),
        2 => Ok(DistanceMetric::InnerProduct),
        other => Err(Error::Corrupted(format!("invalid metric byte {other}"))),
    }
}

/// Serializes an index into a shard image.
///
/// The output is byte-deterministic for a given index state, so two
/// indexes built from the same seed, insert order, and configuration
/// encode identically.
#[must_use]
pub fn encode(index: &HnswIndex) -> Vec<u8> {
    let count = index.count;
    let dim = index.dim;
    let num_layers = if count == 0 { 0 } else { index.max_level + 1 };

    let mut buf = Vec::with_capacity(HEADER_LEN + count * (dim * 4 + 16));

    // Header
    buf.extend_from_slice(&SHARD_MAGIC.to_le_bytes());
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(dim as u32).to_le_bytes());
    buf.extend_from_slice(&(count as u32).to_le_bytes());
    let max_level: i32 = index.entry_point.map_or(-1, |_| index.max_level as i32);
    buf.extend_from_slice(&max_level.to_le_bytes());
    let entry: i32 = index.entry_point.map_or(-1, |e| e as i32);
    buf.extend_from_slice(&entry.to_le_bytes());
    buf.extend_from_slice(&(index.config.m as u32).to_le_bytes());
    buf.extend_from_slice(&(index.m_max0 as u32).to_le_bytes());
    buf.push(metric_to_byte(index.config.metric));
    let mut flags = 0u8;
    if index.config.metric.requires_norms() {
        flags |= FLAG_NORMS;
    }
    if index.config.use_heuristic {
        flags |= FLAG_HEURISTIC;
    }
    if index.config.keep_pruned_connections {
        flags |= FLAG_KEEP_PRUNED;
    }
    buf.push(flags);
    buf.extend_from_slice(&(index.config.ef_construction as u32).to_le_bytes());
    buf.extend_from_slice(&(index.config.ef_search as u32).to_le_bytes());
    buf.resize(HEADER_LEN, 0);

    // ID table, padded so the vector region starts 8-byte aligned
    for ext in &index.int_to_ext {
        buf.extend_from_slice(&(ext.len() as u32).to_le_bytes());
        buf.extend_from_slice(ext.as_bytes());
    }
    buf.resize(buf.len().next_multiple_of(8), 0);

    // Vectors
    for &x in &index.vectors[..count * dim] {
        buf.extend_from_slice(&x.to_le_bytes());
    }

    // Norms (cosine only)
    if flags & FLAG_NORMS != 0 {
        for &n in &index.norms[..count] {
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }

    // Levels, region padded to a multiple of 8
    buf.extend_from_slice(&index.levels[..count]);
    buf.resize(buf.len() + (count.next_multiple_of(8) - count), 0);

    // Adjacency
    buf.extend_from_slice(&(num_layers as u32).to_le_bytes());
    for (l, layer) in index.layers.iter().enumerate().take(num_layers) {
        buf.extend_from_slice(&(l as u32).to_le_bytes());
        buf.extend_from_slice(&(count as u32).to_le_bytes());
        buf.extend_from_slice(&(layer.max_neighbors as u32).to_le_bytes());
        buf.extend_from_slice(&layer.counts[..count]);
        buf.resize(buf.len() + (count.next_multiple_of(4) - count), 0);
        for slot in 0..count {
            for &id in layer.row(slot as u32) {
                buf.extend_from_slice(&id.to_le_bytes());
            }
        }
    }

    tracing::debug!(
        vectors = count,
        layers = num_layers,
        bytes = buf.len(),
        "encoded shard image"
    );
    buf
}

/// Deserializes a shard image into an index.
///
/// The returned index is tight (`capacity == count`), carries zero
/// tombstones, and has been structurally validated.
///
/// # Errors
///
/// [`Error::BadMagic`], [`Error::UnsupportedVersion`], [`Error::Truncated`]
/// for framing problems; [`Error::Corrupted`] for structural ones.
pub fn decode(bytes: &[u8]) -> Result<HnswIndex> {
    let mut r = Reader::new(bytes);

    let magic = r.u32()?;
    if magic != SHARD_MAGIC {
        return Err(Error::BadMagic(magic));
    }
    let version = r.u32()?;
    if version != FORMAT_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let dim = r.u32()? as usize;
    let count = r.u32()? as usize;
    let max_level = r.i32()?;
    let entry = r.i32()?;
    let m = r.u32()? as usize;
    let m_max0 = r.u32()? as usize;
    let metric = metric_from_byte(r.u8()?)?;
    let flags = r.u8()?;
    let ef_construction = r.u32()? as usize;
    let ef_search = r.u32()? as usize;
    r.seek(HEADER_LEN)?;

    // ID table
    let mut int_to_ext = Vec::with_capacity(count);
    let mut ext_to_int = HashMap::with_capacity(count);
    for slot in 0..count {
        let len = r.u32()? as usize;
        let raw = r.take(len)?;
        let ext = std::str::from_utf8(raw)
            .map_err(|_| Error::Corrupted(format!("external id at slot {slot} is not UTF-8")))?;
        if ext_to_int.insert(ext.to_string(), slot as u32).is_some() {
            return Err(Error::Corrupted(format!("duplicate external id '{ext}'")));
        }
        int_to_ext.push(ext.to_string());
    }
    r.align(8)?;

    // Vectors
    let vectors = r.f32_vec(count * dim)?;

    // Norms
    let norms = if flags & FLAG_NORMS != 0 {
        r.f32_vec(count)?
    } else {
        Vec::new()
    };
    if metric.requires_norms() && flags & FLAG_NORMS == 0 {
        return Err(Error::Corrupted(
            "cosine shard image without a norms region".to_string(),
        ));
    }

    // Levels
    let levels = r.take(count)?.to_vec();
    r.skip(count.next_multiple_of(8) - count)?;

    // Adjacency
    let num_layers = r.u32()? as usize;
    let expected_layers = if count == 0 {
        0
    } else {
        (max_level.max(0) as usize) + 1
    };
    if num_layers != expected_layers {
        return Err(Error::Corrupted(format!(
            "adjacency has {num_layers} layers, header implies {expected_layers}"
        )));
    }
    let mut layers = Vec::with_capacity(num_layers.max(1));
    for l in 0..num_layers {
        let layer_index = r.u32()? as usize;
        if layer_index != l {
            return Err(Error::Corrupted(format!(
                "adjacency block {l} labeled {layer_index}"
            )));
        }
        let node_count = r.u32()? as usize;
        if node_count != count {
            return Err(Error::Corrupted(format!(
                "adjacency block {l} covers {node_count} nodes, expected {count}"
            )));
        }
        let max_neighbors = r.u32()? as usize;
        let counts = r.take(node_count)?.to_vec();
        r.skip(node_count.next_multiple_of(4) - node_count)?;
        let links = r.u32_vec(node_count * max_neighbors)?;
        layers.push(LayerAdjacency {
            max_neighbors,
            links,
            counts,
        });
    }
    if layers.is_empty() {
        layers.push(LayerAdjacency::new(m_max0, count));
    }
    if r.remaining() != 0 {
        return Err(Error::Corrupted(format!(
            "{} trailing bytes after the final adjacency block",
            r.remaining()
        )));
    }

    let config = HnswConfig {
        m,
        m_max0: Some(m_max0),
        ef_construction,
        ef_search,
        metric,
        m_l: None,
        use_heuristic: flags & FLAG_HEURISTIC != 0,
        keep_pruned_connections: flags & FLAG_KEEP_PRUNED != 0,
        seed: None,
    };
    let mut index = HnswIndex::new(dim, config);
    index.capacity = count;
    index.count = count;
    index.vectors = vectors;
    index.norms = norms;
    index.levels = levels;
    index.layers = layers;
    index.deleted = Bitset::new(count);
    index.int_to_ext = int_to_ext;
    index.ext_to_int = ext_to_int;
    index.entry_point = if entry < 0 { None } else { Some(entry as u32) };
    index.max_level = max_level.max(0) as usize;

    index.validate().map_err(Error::Corrupted)?;
    tracing::debug!(vectors = count, dim, "decoded shard image");
    Ok(index)
}

/// Reads the header fields of a shard image without parsing the body.
///
/// # Errors
///
/// [`Error::BadMagic`], [`Error::UnsupportedVersion`], or
/// [`Error::Truncated`] when the header itself is malformed.
pub fn read_header(bytes: &[u8]) -> Result<ShardHeader> {
    let mut r = Reader::new(bytes);
    let magic = r.u32()?;
    if magic != SHARD_MAGIC {
        return Err(Error::BadMagic(magic));
    }
    let version = r.u32()?;
    if version != FORMAT_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let dim = r.u32()?;
    let count = r.u32()?;
    r.skip(8)?; // max_level + entry_point
    let m = r.u32()?;
    r.skip(4)?; // m_max0
    let metric = metric_from_byte(r.u8()?)?;
    Ok(ShardHeader {
        dim,
        count,
        metric,
        m,
    })
}

/// Cursor over a shard image with truncation-checked reads.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::Truncated(self.pos));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            return Err(Error::Truncated(self.pos));
        }
        self.pos = pos;
        Ok(())
    }

    fn align(&mut self, to: usize) -> Result<()> {
        self.seek(self.pos.next_multiple_of(to))
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32_vec(&mut self, len: usize) -> Result<Vec<f32>> {
        let raw = self.take(len * 4)?;
        Ok(raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn u32_vec(&mut self, len: usize) -> Result<Vec<u32>> {
        let raw = self.take(len * 4)?;
        Ok(raw
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index(seed: u32) -> HnswIndex {
        let mut idx = HnswIndex::new(
            4,
            HnswConfig {
                seed: Some(seed),
                ..HnswConfig::default()
            },
        );
        for i in 0..40 {
            let v = [
                (i as f32 * 0.3).sin(),
                (i as f32 * 0.7).cos(),
                i as f32 / 40.0,
                1.0 - i as f32 / 40.0,
            ];
            idx.insert(&format!("vec-{i}"), &v).unwrap();
        }
        idx
    }

    #[test]
    fn test_header_layout_is_64_bytes() {
        let idx = HnswIndex::with_default_config(3);
        let bytes = encode(&idx);
        assert!(bytes.len() >= HEADER_LEN);
        assert_eq!(&bytes[0..4], &SHARD_MAGIC.to_le_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        // Reserved pad runs to byte 64
        assert!(bytes[42..64].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_round_trip_preserves_search_results() {
        let mut idx = sample_index(5);
        let query = [0.1, -0.2, 0.5, 0.5];
        let before = idx.search(&query, 10).unwrap();

        let bytes = encode(&idx);
        let mut decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.len(), idx.len());
        assert_eq!(decoded.capacity(), decoded.slot_count(), "decode is tight");
        assert_eq!(decoded.deleted_count(), 0);

        let after = decoded.search(&query, 10).unwrap();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(&after) {
            assert_eq!(b.id, a.id);
            assert!((b.distance - a.distance).abs() < 1e-6);
        }
    }

    #[test]
    fn test_round_trip_unicode_ids() {
        let mut idx = HnswIndex::with_default_config(2);
        idx.insert("日本語", &[0.25, -0.75]).unwrap();
        idx.insert("emoji-🎉", &[1.5, 2.5]).unwrap();

        let decoded = decode(&encode(&idx)).unwrap();
        assert_eq!(decoded.get_vector("日本語"), Some(&[0.25, -0.75][..]));
        assert_eq!(decoded.get_vector("emoji-🎉"), Some(&[1.5, 2.5][..]));
    }

    #[test]
    fn test_round_trip_empty_index() {
        let idx = HnswIndex::with_default_config(8);
        let decoded = decode(&encode(&idx)).unwrap();
        assert_eq!(decoded.len(), 0);
        assert_eq!(decoded.dim(), 8);
        assert!(decoded.entry_point.is_none());
    }

    #[test]
    fn test_round_trip_cosine_norms() {
        let mut idx = HnswIndex::new(
            3,
            HnswConfig {
                metric: DistanceMetric::Cosine,
                seed: Some(2),
                ..HnswConfig::default()
            },
        );
        idx.insert("a", &[3.0, 4.0, 0.0]).unwrap();
        idx.insert("b", &[0.0, 1.0, 0.0]).unwrap();
        let decoded = decode(&encode(&idx)).unwrap();
        assert_eq!(decoded.norms[0], 5.0, "norms survive bitwise");
        assert_eq!(decoded.metric(), DistanceMetric::Cosine);
    }

    #[test]
    fn test_read_header() {
        let idx = sample_index(8);
        let header = read_header(&encode(&idx)).unwrap();
        assert_eq!(header.dim, 4);
        assert_eq!(header.count, 40);
        assert_eq!(header.metric, DistanceMetric::Euclidean);
        assert_eq!(header.m, 16);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = encode(&sample_index(1));
        bytes[0] ^= 0xFF;
        assert!(matches!(decode(&bytes), Err(Error::BadMagic(_))));
        assert!(matches!(read_header(&bytes), Err(Error::BadMagic(_))));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes = encode(&sample_index(1));
        bytes[4] = 9;
        assert!(matches!(decode(&bytes), Err(Error::UnsupportedVersion(9))));
    }

    #[test]
    fn test_truncated_image_rejected() {
        let bytes = encode(&sample_index(1));
        for cut in [3, 40, 63, bytes.len() / 2, bytes.len() - 1] {
            let result = decode(&bytes[..cut]);
            assert!(
                matches!(result, Err(Error::Truncated(_))),
                "cut at {cut} must report truncation"
            );
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&sample_index(1));
        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(Error::Corrupted(_))));
    }

    #[test]
    fn test_out_of_range_neighbor_rejected() {
        let mut idx = HnswIndex::with_default_config(2);
        idx.insert("a", &[0.0, 0.0]).unwrap();
        idx.insert("b", &[1.0, 0.0]).unwrap();
        let mut bytes = encode(&idx);
        // Corrupt the last adjacency word to a huge id
        let n = bytes.len();
        bytes[n - 4..].copy_from_slice(&0x0000_FFFFu32.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(Error::Corrupted(_))));
    }

    #[test]
    fn test_deterministic_encode_for_same_seed() {
        let a = sample_index(77);
        let b = sample_index(77);
        assert_eq!(encode(&a), encode(&b), "same seed + order → same bytes");

        let c = sample_index(78);
        assert_ne!(encode(&a), encode(&c));
    }

    #[test]
    fn test_tombstones_are_not_persisted() {
        let mut idx = sample_index(4);
        idx.delete("vec-3");
        assert_eq!(idx.len(), 39);
        let decoded = decode(&encode(&idx)).unwrap();
        // The image has no tombstone region: the deleted slot comes back.
        assert_eq!(decoded.len(), 40);
        assert!(decoded.contains("vec-3"));
    }
}
