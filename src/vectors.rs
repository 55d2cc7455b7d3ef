//! Embedding sidecar storage.
//!
//! Item rows live in items.csv; their embeddings live here, in an in-memory
//! map persisted to a checksummed binary file (vectors.bin). Keeping the
//! vectors out of the CSV means an embedding write touches exactly one slot
//! and can never clobber a concurrent edit to the row itself.
//!
//! File format:
//!
//! Header (15 bytes):
//! - version: u8 (1)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of the header fields before checksum)
//!
//! Entries (repeated):
//! - item id: u128 ULID (little-endian)
//! - content_hash: u64 (little-endian)
//! - embedding: [f32; dimensions] (little-endian)

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::items::ItemId;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 15;

/// A stored embedding together with the hash of the text it was derived from.
#[derive(Debug, Clone)]
pub struct StoredVector {
    /// Hash of the composed description at embed time
    pub content_hash: u64,
    /// The embedding vector
    pub embedding: Vec<f32>,
}

/// In-memory map of item id to embedding, with a fixed dimensionality.
///
/// Vectors of the wrong length or with zero norm are rejected at insert so
/// they can never be persisted or ranked against.
pub struct VectorIndex {
    entries: HashMap<ItemId, StoredVector>,
    dimensions: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum VectorIndexError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("cannot store a zero-norm vector")]
    ZeroNormVector,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: HashMap::new(),
            dimensions,
        }
    }

    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace the embedding for an item.
    ///
    /// The whole slot is written at once; there is no partial update.
    pub fn insert(
        &mut self,
        id: ItemId,
        content_hash: u64,
        embedding: Vec<f32>,
    ) -> Result<(), VectorIndexError> {
        if embedding.len() != self.dimensions {
            return Err(VectorIndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < f32::EPSILON {
            return Err(VectorIndexError::ZeroNormVector);
        }

        self.entries.insert(
            id,
            StoredVector {
                content_hash,
                embedding,
            },
        );

        Ok(())
    }

    pub fn remove(&mut self, id: &ItemId) -> Option<StoredVector> {
        self.entries.remove(id)
    }

    pub fn get(&self, id: &ItemId) -> Option<&StoredVector> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &StoredVector)> {
        self.entries.iter()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VectorFileError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Reader/writer for the vectors.bin sidecar.
pub struct VectorFile {
    path: PathBuf,
}

impl VectorFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the index, validating version, checksum and dimensionality.
    pub fn load(&self, expected_dimensions: usize) -> Result<VectorIndex, VectorFileError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        if header.dimensions as usize != expected_dimensions {
            return Err(VectorFileError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        let mut index =
            VectorIndex::with_capacity(header.dimensions as usize, header.entry_count as usize);

        for _ in 0..header.entry_count {
            let (id, content_hash, embedding) =
                read_entry(&mut reader, header.dimensions as usize)?;
            // entries that fail validation (e.g. zero norm) are dropped on load
            let _ = index.insert(id, content_hash, embedding);
        }

        Ok(index)
    }

    /// Save the index: temp file, fsync, rename.
    pub fn save(&self, index: &VectorIndex) -> Result<(), VectorFileError> {
        let temp_path = self.path.with_extension("tmp");

        let result = write_to_file(&temp_path, index);
        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    pub fn delete(&self) -> Result<(), VectorFileError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

struct Header {
    dimensions: u16,
    entry_count: u64,
}

fn write_to_file(path: &Path, index: &VectorIndex) -> Result<(), VectorFileError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let mut header = [0u8; HEADER_SIZE];
    header[0] = FORMAT_VERSION;
    header[1..3].copy_from_slice(&(index.dimensions() as u16).to_le_bytes());
    header[3..11].copy_from_slice(&(index.len() as u64).to_le_bytes());
    let checksum = crc32fast::hash(&header[0..11]);
    header[11..15].copy_from_slice(&checksum.to_le_bytes());
    writer.write_all(&header)?;

    for (id, entry) in index.iter() {
        writer.write_all(&id.to_u128().to_le_bytes())?;
        writer.write_all(&entry.content_hash.to_le_bytes())?;
        for &value in &entry.embedding {
            writer.write_all(&value.to_le_bytes())?;
        }
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    Ok(())
}

fn read_header(reader: &mut BufReader<File>) -> Result<Header, VectorFileError> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let version = header[0];
    if version > FORMAT_VERSION {
        return Err(VectorFileError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes([header[11], header[12], header[13], header[14]]);
    if stored_checksum != crc32fast::hash(&header[0..11]) {
        return Err(VectorFileError::ChecksumMismatch);
    }

    let dimensions = u16::from_le_bytes([header[1], header[2]]);
    let entry_count = u64::from_le_bytes([
        header[3], header[4], header[5], header[6], header[7], header[8], header[9], header[10],
    ]);

    Ok(Header {
        dimensions,
        entry_count,
    })
}

fn read_entry(
    reader: &mut BufReader<File>,
    dimensions: usize,
) -> Result<(ItemId, u64, Vec<f32>), VectorFileError> {
    let mut id_bytes = [0u8; 16];
    reader.read_exact(&mut id_bytes)?;
    let id = ItemId::from_u128(u128::from_le_bytes(id_bytes));

    let mut hash_bytes = [0u8; 8];
    reader.read_exact(&mut hash_bytes)?;
    let content_hash = u64::from_le_bytes(hash_bytes);

    let mut embedding = Vec::with_capacity(dimensions);
    let mut float_bytes = [0u8; 4];
    for _ in 0..dimensions {
        reader.read_exact(&mut float_bytes)?;
        embedding.push(f32::from_le_bytes(float_bytes));
    }

    Ok((id, content_hash, embedding))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("vectors.bin")
    }

    #[test]
    fn insert_and_get() {
        let mut index = VectorIndex::new(3);
        let id = ItemId::new();

        index.insert(id.clone(), 12345, vec![1.0, 0.0, 0.0]).unwrap();

        assert_eq!(index.len(), 1);
        assert!(index.contains(&id));

        let entry = index.get(&id).unwrap();
        assert_eq!(entry.content_hash, 12345);
        assert_eq!(entry.embedding, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn insert_rejects_wrong_dimensions() {
        let mut index = VectorIndex::new(3);
        let result = index.insert(ItemId::new(), 1, vec![1.0, 0.0, 0.0, 0.0]);
        assert!(matches!(
            result,
            Err(VectorIndexError::DimensionMismatch { expected: 3, got: 4 })
        ));
    }

    #[test]
    fn insert_rejects_zero_norm() {
        let mut index = VectorIndex::new(3);
        let result = index.insert(ItemId::new(), 1, vec![0.0, 0.0, 0.0]);
        assert!(matches!(result, Err(VectorIndexError::ZeroNormVector)));
    }

    #[test]
    fn remove_clears_entry() {
        let mut index = VectorIndex::new(3);
        let id = ItemId::new();
        index.insert(id.clone(), 1, vec![1.0, 0.0, 0.0]).unwrap();

        assert!(index.remove(&id).is_some());
        assert!(!index.contains(&id));
        assert!(index.is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = VectorFile::new(temp_path(&dir));

        let a = ItemId::new();
        let b = ItemId::new();

        let mut index = VectorIndex::new(3);
        index.insert(a.clone(), 100, vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(b.clone(), 200, vec![0.0, 1.0, 0.0]).unwrap();

        file.save(&index).unwrap();
        assert!(file.exists());

        let loaded = file.load(3).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(&a).unwrap().content_hash, 100);
        assert_eq!(loaded.get(&a).unwrap().embedding, vec![1.0, 0.0, 0.0]);
        assert_eq!(loaded.get(&b).unwrap().content_hash, 200);
    }

    #[test]
    fn load_rejects_wrong_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let file = VectorFile::new(temp_path(&dir));

        let index = VectorIndex::new(3);
        file.save(&index).unwrap();

        let result = file.load(1536);
        assert!(matches!(
            result,
            Err(VectorFileError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn checksum_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir);
        let file = VectorFile::new(path.clone());

        let mut index = VectorIndex::new(3);
        index
            .insert(ItemId::new(), 100, vec![1.0, 0.0, 0.0])
            .unwrap();
        file.save(&index).unwrap();

        // flip a byte inside the header
        let mut raw = std::fs::read(&path).unwrap();
        raw[5] ^= 0xFF;
        std::fs::write(&path, raw).unwrap();

        let result = file.load(3);
        assert!(matches!(result, Err(VectorFileError::ChecksumMismatch)));
    }

    #[test]
    fn save_cleans_up_temp_on_error() {
        let path = PathBuf::from("/nonexistent/directory/vectors.bin");
        let file = VectorFile::new(path.clone());

        let index = VectorIndex::new(3);
        assert!(file.save(&index).is_err());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = VectorFile::new(temp_path(&dir));

        file.save(&VectorIndex::new(3)).unwrap();
        assert!(file.exists());

        file.delete().unwrap();
        assert!(!file.exists());
    }
}
