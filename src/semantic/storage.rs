//! Binary storage for one collection of the embedded vector store.
//!
//! File format: `<collection>.bin`
//!
//! Header (15 bytes):
//! - version: u8 (1)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - point_id: u64 (little-endian)
//! - embedding: [f32; dimensions] (little-endian)
//! - payload_len: u32 (little-endian)
//! - payload: [u8; payload_len] (JSON)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::semantic::index::{VectorEntry, VectorIndex};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 15;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,
}

/// Storage manager for one collection file.
#[derive(Debug, Clone)]
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    /// Create a new storage manager for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[cfg(test)]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the vector index from storage.
    ///
    /// The dimensionality comes from the file header.
    pub fn load(&self) -> Result<VectorIndex, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        let dimensions = header.dimensions as usize;

        let mut index = VectorIndex::with_capacity(dimensions, header.entry_count as usize);

        for _ in 0..header.entry_count {
            let (id, embedding, payload) = read_entry(&mut reader, dimensions)?;
            index.insert(id, embedding, payload).map_err(|e| {
                VectorStorageError::InvalidFormat(format!("point {id}: {e}"))
            })?;
        }

        Ok(index)
    }

    /// Save the vector index to storage.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(&self, index: &VectorIndex) -> Result<(), VectorStorageError> {
        let temp_path = self.path.with_extension("tmp");

        let result = write_to_file(&temp_path, index);

        if result.is_err() {
            // Clean up temp file on error
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Delete the storage file if it exists.
    pub fn delete(&self) -> Result<(), VectorStorageError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

fn write_to_file(path: &Path, index: &VectorIndex) -> Result<(), VectorStorageError> {
    let dimensions = u16::try_from(index.dimensions()).map_err(|_| {
        VectorStorageError::InvalidFormat(format!(
            "{} dimensions do not fit the file format",
            index.dimensions()
        ))
    })?;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    write_header(&mut writer, dimensions, index.len() as u64)?;

    // sorted so identical indexes produce identical files
    let mut entries: Vec<_> = index.iter().collect();
    entries.sort_by_key(|(id, _)| *id);
    for (id, entry) in entries {
        write_entry(&mut writer, id, entry)?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    Ok(())
}

fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let version = header_bytes[0];
    if version != FORMAT_VERSION {
        return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    let dimensions = u16::from_le_bytes([header_bytes[1], header_bytes[2]]);
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header_bytes[3..11]);
    let entry_count = u64::from_le_bytes(count_bytes);
    let stored_checksum = u32::from_le_bytes([
        header_bytes[11],
        header_bytes[12],
        header_bytes[13],
        header_bytes[14],
    ]);

    if stored_checksum != crc32fast::hash(&header_bytes[0..11]) {
        return Err(VectorStorageError::ChecksumMismatch);
    }

    Ok(Header {
        dimensions,
        entry_count,
    })
}

fn write_header(
    writer: &mut impl Write,
    dimensions: u16,
    entry_count: u64,
) -> Result<(), VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes[0] = FORMAT_VERSION;
    header_bytes[1..3].copy_from_slice(&dimensions.to_le_bytes());
    header_bytes[3..11].copy_from_slice(&entry_count.to_le_bytes());
    let checksum = crc32fast::hash(&header_bytes[0..11]);
    header_bytes[11..15].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header_bytes)?;
    Ok(())
}

fn read_entry(
    reader: &mut impl Read,
    dimensions: usize,
) -> Result<(u64, Vec<f32>, serde_json::Value), VectorStorageError> {
    let mut id_bytes = [0u8; 8];
    reader.read_exact(&mut id_bytes)?;
    let id = u64::from_le_bytes(id_bytes);

    let mut embedding = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        let mut float_bytes = [0u8; 4];
        reader.read_exact(&mut float_bytes)?;
        embedding.push(f32::from_le_bytes(float_bytes));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let mut payload_bytes = vec![0u8; u32::from_le_bytes(len_bytes) as usize];
    reader.read_exact(&mut payload_bytes)?;
    let payload = serde_json::from_slice(&payload_bytes)
        .map_err(|e| VectorStorageError::InvalidFormat(format!("point {id} payload: {e}")))?;

    Ok((id, embedding, payload))
}

fn write_entry(
    writer: &mut impl Write,
    id: u64,
    entry: &VectorEntry,
) -> Result<(), VectorStorageError> {
    writer.write_all(&id.to_le_bytes())?;

    for &value in &entry.embedding {
        writer.write_all(&value.to_le_bytes())?;
    }

    let payload = serde_json::to_vec(&entry.payload)
        .map_err(|e| VectorStorageError::InvalidFormat(format!("point {id} payload: {e}")))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;

    Ok(())
}

#[derive(Debug)]
struct Header {
    dimensions: u16,
    entry_count: u64,
}
