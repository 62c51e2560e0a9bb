//! Versioned on-disk format for [`VectorIndex`].
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! header (32 bytes)
//!   magic        [u8; 4]  "RGIX"
//!   version      u32
//!   dim          u32
//!   metric       u8       0 = cosine, 1 = euclidean
//!   reserved     [u8; 3]
//!   count        u64
//!   payload_len  u64      bytes following the header
//! record × count
//!   vector       dim × f32
//!   chunk_id     u32 length + utf-8
//!   text         u32 length + utf-8
//!   document_id  u32 length + utf-8
//!   start_offset u64
//!   end_offset   u64
//! ```
//!
//! Files are replaced atomically: the new state is written to a uniquely
//! named temporary file in the destination directory, flushed, then renamed
//! over the destination.
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, info};

use super::search::Entry;
use super::{ApproximateConfig, SimilarityMetric, VectorIndex, metric};
use crate::error::{RagError, Result};
use crate::models::Chunk;

pub const FORMAT_VERSION: u32 = 1;

const MAGIC: [u8; 4] = *b"RGIX";
const HEADER_LEN: usize = std::mem::size_of::<RawHeader>();
/// Three length prefixes plus two offsets.
const RECORD_FIXED_LEN: u64 = 3 * 4 + 2 * 8;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawHeader {
    magic: [u8; 4],
    version: u32,
    dim: u32,
    metric: u8,
    reserved: [u8; 3],
    count: u64,
    payload_len: u64,
}

impl VectorIndex {
    /// Serialize the whole index to `path`, atomically replacing any previous file.
    ///
    /// Every call writes its own temporary file, so concurrent persists to the
    /// same path never interfere: each one renames a complete file into place
    /// and the last rename wins. Readers see either the old or a new file.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.encode();
        write_atomic(path, &bytes).map_err(|e| RagError::io(path, e))?;

        info!(
            "persisted index to {} ({} entries, {} bytes)",
            path.display(),
            self.len(),
            bytes.len()
        );
        Ok(())
    }

    /// Load an index written by [`VectorIndex::persist`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with(path, ApproximateConfig::default())
    }

    /// Load an index and apply approximate-search settings. Partitions are
    /// retrained from the stored vectors, never read from disk.
    pub fn load_with(path: impl AsRef<Path>, approximate: ApproximateConfig) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| RagError::io(path, e))?;
        let index = decode(path, &bytes)?.with_approximate(approximate);
        info!(
            "loaded index from {} ({} entries, metric={})",
            path.display(),
            index.len(),
            index.metric()
        );
        Ok(index)
    }

    fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        for entry in &self.entries {
            for v in &entry.vector {
                payload.extend_from_slice(&v.to_le_bytes());
            }
            put_str(&mut payload, &entry.chunk.id);
            put_str(&mut payload, &entry.chunk.text);
            put_str(&mut payload, &entry.chunk.document_id);
            payload.extend_from_slice(&(entry.chunk.start_offset as u64).to_le_bytes());
            payload.extend_from_slice(&(entry.chunk.end_offset as u64).to_le_bytes());
        }

        let header = RawHeader {
            magic: MAGIC,
            version: FORMAT_VERSION.to_le(),
            dim: (self.dim.unwrap_or(0) as u32).to_le(),
            metric: self.metric.tag(),
            reserved: [0; 3],
            count: (self.entries.len() as u64).to_le(),
            payload_len: (payload.len() as u64).to_le(),
        };

        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(bytemuck::bytes_of(&header));
        bytes.extend_from_slice(&payload);
        bytes
    }
}

fn decode(path: &Path, bytes: &[u8]) -> Result<VectorIndex> {
    let corrupt = |reason: String| RagError::CorruptIndex {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.len() < HEADER_LEN {
        return Err(corrupt(format!(
            "file is {} bytes, shorter than the {HEADER_LEN}-byte header",
            bytes.len()
        )));
    }
    let header: RawHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_LEN]);
    if header.magic != MAGIC {
        return Err(corrupt("bad magic, not an index file".to_string()));
    }

    let version = u32::from_le(header.version);
    if version != FORMAT_VERSION {
        return Err(RagError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: version,
            supported: FORMAT_VERSION,
        });
    }

    let metric = SimilarityMetric::from_tag(header.metric)
        .ok_or_else(|| corrupt(format!("unknown metric tag {}", header.metric)))?;
    let dim = u32::from_le(header.dim) as usize;
    let count = u64::from_le(header.count);
    let payload_len = u64::from_le(header.payload_len);

    // Validate the header against the payload before trusting any record.
    let payload = &bytes[HEADER_LEN..];
    if payload_len != payload.len() as u64 {
        return Err(corrupt(format!(
            "header declares {payload_len} payload bytes, file has {}",
            payload.len()
        )));
    }
    if count > 0 && dim == 0 {
        return Err(corrupt(format!("{count} records with dimension 0")));
    }
    let min_payload = (dim as u64)
        .checked_mul(4)
        .and_then(|v| v.checked_add(RECORD_FIXED_LEN))
        .and_then(|v| v.checked_mul(count));
    match min_payload {
        Some(min) if min <= payload_len => {}
        _ => {
            return Err(corrupt(format!(
                "{count} records of dimension {dim} cannot fit in {payload_len} bytes"
            )));
        }
    }

    let mut reader = Reader {
        buf: payload,
        pos: 0,
    };
    let mut entries = Vec::with_capacity(count as usize);
    for record in 0..count {
        let entry = read_entry(&mut reader, dim)
            .ok_or_else(|| corrupt(format!("record {record} is truncated or malformed")))?;
        entries.push(entry);
    }
    if reader.pos != payload.len() {
        return Err(corrupt(format!(
            "{} trailing bytes after {count} records",
            payload.len() - reader.pos
        )));
    }

    debug!("decoded {count} records (dim={dim}, metric={metric})");
    Ok(VectorIndex {
        dim: if dim == 0 { None } else { Some(dim) },
        metric,
        entries,
        approximate: ApproximateConfig::default(),
        ivf: None,
    })
}

fn read_entry(reader: &mut Reader<'_>, dim: usize) -> Option<Entry> {
    let raw = reader.take(dim * 4)?;
    let vector: Vec<f32> = raw
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let id = reader.string()?;
    let text = reader.string()?;
    let document_id = reader.string()?;
    let start_offset = usize::try_from(reader.u64()?).ok()?;
    let end_offset = usize::try_from(reader.u64()?).ok()?;
    if start_offset > end_offset {
        return None;
    }

    Some(Entry {
        norm: metric::magnitude(&vector),
        vector,
        chunk: Chunk {
            id,
            document_id,
            text,
            start_offset,
            end_offset,
        },
    })
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u32(&mut self) -> Option<u32> {
        let b = self.take(4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Option<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Some(u64::from_le_bytes(arr))
    }

    fn string(&mut self) -> Option<String> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).ok()
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// Write `bytes` to a fresh temporary file next to `path` and rename it over
/// `path`. The temporary file is removed if any step fails.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut prefix = std::ffi::OsString::from(".");
    prefix.push(path.file_name().unwrap_or_default());
    prefix.push(".");
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir);
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::super::tests::entry;
    use super::*;
    use tempfile::tempdir;

    fn stray_temp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect()
    }

    fn sample_index(metric: SimilarityMetric) -> VectorIndex {
        let entries = (0..12).map(|i| {
            let x = i as f32;
            entry(i, vec![x.sin(), x.cos(), 0.5 * x, 1.0])
        });
        VectorIndex::build(metric, entries).unwrap()
    }

    #[test]
    fn test_header_is_32_bytes() {
        assert_eq!(HEADER_LEN, 32);
    }

    #[test]
    fn test_roundtrip_preserves_search() {
        let dir = tempdir().unwrap();
        for metric in [SimilarityMetric::Cosine, SimilarityMetric::Euclidean] {
            let index = sample_index(metric);
            let path = dir.path().join(format!("{metric}.rgix"));
            index.persist(&path).unwrap();
            let loaded = VectorIndex::load(&path).unwrap();

            assert_eq!(loaded.len(), index.len());
            assert_eq!(loaded.dim(), Some(4));
            assert_eq!(loaded.metric(), metric);
            for q in [[0.1, 0.9, 2.0, 1.0], [-0.5, 0.2, 4.0, 1.0]] {
                let a = index.search(&q, 5).unwrap();
                let b = loaded.search(&q, 5).unwrap();
                assert_eq!(a.chunk_ids(), b.chunk_ids());
                for (x, y) in a.iter().zip(b.iter()) {
                    assert!((x.score - y.score).abs() < 1e-6);
                    assert_eq!(x.chunk, y.chunk);
                }
            }
        }
    }

    #[test]
    fn test_persist_twice_is_idempotent() {
        let dir = tempdir().unwrap();
        let index = sample_index(SimilarityMetric::Cosine);
        let first = dir.path().join("a.rgix");
        let second = dir.path().join("b.rgix");
        index.persist(&first).unwrap();
        index.persist(&second).unwrap();
        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());

        // Overwriting in place leaves a loadable file and no temp file behind.
        index.persist(&first).unwrap();
        assert!(VectorIndex::load(&first).is_ok());
        assert!(stray_temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_concurrent_persists_to_one_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.rgix");
        let index = sample_index(SimilarityMetric::Cosine);
        let expected = index.encode();

        let failures: usize = std::thread::scope(|scope| {
            let mut workers = Vec::new();
            for _ in 0..4 {
                workers.push(scope.spawn(|| {
                    (0..25)
                        .filter(|_| index.persist(&path).is_err())
                        .count()
                }));
            }
            workers.into_iter().map(|w| w.join().unwrap()).sum()
        });
        assert_eq!(failures, 0);

        assert_eq!(fs::read(&path).unwrap(), expected);
        assert_eq!(VectorIndex::load(&path).unwrap().len(), index.len());
        assert!(stray_temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_empty_index_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/empty.rgix");
        let index = VectorIndex::build(SimilarityMetric::Euclidean, Vec::new()).unwrap();
        index.persist(&path).unwrap();
        let loaded = VectorIndex::load(&path).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dim(), None);
        assert_eq!(loaded.metric(), SimilarityMetric::Euclidean);
    }

    #[test]
    fn test_unicode_text_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("u.rgix");
        let (v, mut c) = entry(0, vec![1.0, 0.0]);
        c.text = "日本語のテキスト ✓".to_string();
        let index = VectorIndex::build(SimilarityMetric::Cosine, vec![(v, c.clone())]).unwrap();
        index.persist(&path).unwrap();
        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.chunks().next().unwrap(), &c);
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.rgix");
        sample_index(SimilarityMetric::Cosine).persist(&path).unwrap();
        let bytes = fs::read(&path).unwrap();

        fs::write(&path, &bytes[..bytes.len() - 7]).unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RagError::CorruptIndex { .. })
        ));

        fs::write(&path, &bytes[..10]).unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RagError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn test_count_disagreeing_with_payload_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.rgix");
        sample_index(SimilarityMetric::Cosine).persist(&path).unwrap();
        let mut bytes = fs::read(&path).unwrap();

        // count lives at byte 16
        bytes[16..24].copy_from_slice(&1000u64.to_le_bytes());
        fs::write(&path, &bytes).unwrap();
        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, RagError::CorruptIndex { .. }), "{err}");

        // One record fewer than stored leaves trailing bytes.
        bytes[16..24].copy_from_slice(&11u64.to_le_bytes());
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RagError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn test_dim_disagreeing_with_payload_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.rgix");
        sample_index(SimilarityMetric::Cosine).persist(&path).unwrap();
        let mut bytes = fs::read(&path).unwrap();

        // dim lives at byte 8
        bytes[8..12].copy_from_slice(&5u32.to_le_bytes());
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RagError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v.rgix");
        sample_index(SimilarityMetric::Cosine).persist(&path).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        match VectorIndex::load(&path) {
            Err(RagError::UnsupportedVersion { found, supported, .. }) => {
                assert_eq!(found, 99);
                assert_eq!(supported, FORMAT_VERSION);
            }
            other => panic!("expected UnsupportedVersion, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.rgix");
        fs::write(&path, vec![0u8; 64]).unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RagError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            VectorIndex::load(dir.path().join("nope.rgix")),
            Err(RagError::Io { .. })
        ));
    }

    #[test]
    fn test_failed_persist_cleans_up_temp_file() {
        let dir = tempdir().unwrap();
        // A non-empty directory at the destination makes the final rename fail.
        let path = dir.path().join("occupied.rgix");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("marker"), b"keep").unwrap();

        let mut index = sample_index(SimilarityMetric::Cosine);
        let (v, c) = entry(99, vec![0.0, 0.0, 0.0, 1.0]);
        index.append(v, c).unwrap();
        assert!(matches!(index.persist(&path), Err(RagError::Io { .. })));

        assert!(path.is_dir());
        assert_eq!(fs::read(path.join("marker")).unwrap(), b"keep");
        assert!(stray_temp_files(dir.path()).is_empty());
    }
}
