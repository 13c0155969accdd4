//! On-disk layout of a knowledge base.
//!
//! Two artifacts live in the data directory:
//!
//! * `index.bin`: little-endian header (magic `PQIX`, format version,
//!   dimension, entry count, generation) followed by the raw `f32` vectors.
//! * `metadata-<generation>.jsonl`: one JSON record per entry, in index order.
//!
//! A save writes the metadata file of the new generation first and then
//! renames a fresh `index.bin` into place. That rename is the commit point:
//! until it happens, the previous header still names the previous metadata
//! file, which is left untouched.
//!
//! Saves hold an exclusive lock on `.lock` in the data directory and refuse to
//! replace a generation they did not start from, so two processes writing to
//! the same directory cannot commit over each other.


use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{ChunkMetadata, FlatIndex, KnowledgeBase};
use crate::{RagError, Result};

pub const INDEX_FILE: &str = "index.bin";
pub const LOCK_FILE: &str = ".lock";
const METADATA_PREFIX: &str = "metadata-";
const METADATA_SUFFIX: &str = ".jsonl";

const MAGIC: &[u8; 4] = b"PQIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 28;
const F32_LEN: usize = std::mem::size_of::<f32>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    dimension: u32,
    count: u64,
    generation: u64,
}

#[inline]
pub fn metadata_file_name(generation: u64) -> String {
    format!("{METADATA_PREFIX}{generation}{METADATA_SUFFIX}")
}

#[inline]
pub fn index_path(dir: &Path) -> PathBuf {
    dir.join(INDEX_FILE)
}

/// Write `kb` to `dir`, replacing whatever generation was there
#[inline]
pub fn save(dir: &Path, kb: &KnowledgeBase) -> Result<()> {
    if kb.index.len() != kb.metadata.len() {
        return Err(RagError::Index(format!(
            "refusing to persist {} vectors with {} metadata records",
            kb.index.len(),
            kb.metadata.len()
        )));
    }

    fs::create_dir_all(dir)?;
    let lock = open_lock(dir)?;
    lock.lock()?;

    if let Some(committed) = committed_generation(dir)? {
        if committed >= kb.generation {
            return Err(RagError::Index(format!(
                "knowledge base in {} is already at generation {}, cannot commit generation {}; \
                 it was changed by another process",
                dir.display(),
                committed,
                kb.generation
            )));
        }
    }

    let metadata_path = dir.join(metadata_file_name(kb.generation));
    write_atomically(dir, &metadata_path, |writer| {
        for record in &kb.metadata {
            let line = serde_json::to_string(record)
                .map_err(|e| RagError::Index(format!("failed to encode metadata: {e}")))?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    })?;

    let header = Header {
        dimension: u32::try_from(kb.index.dimension())
            .map_err(|_| RagError::Index("vector dimension too large".to_string()))?,
        count: kb.index.len() as u64,
        generation: kb.generation,
    };
    write_atomically(dir, &index_path(dir), |writer| {
        writer.write_all(&encode_header(header))?;
        for value in kb.index.as_slice() {
            writer.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    })?;

    remove_stale_metadata(dir, kb.generation);
    sync_dir(dir);

    debug!(
        "Persisted generation {} with {} entries to {}",
        kb.generation,
        kb.len(),
        dir.display()
    );
    Ok(())
}

/// Read the committed knowledge base from `dir`.
///
/// Returns `Ok(None)` when nothing has been committed yet. Any damage to the
/// committed pair is reported as [`RagError::IndexCorrupt`].
#[inline]
pub fn load(dir: &Path) -> Result<Option<KnowledgeBase>> {
    let _lock = match open_lock(dir).and_then(|lock| lock.lock_shared().map(|()| lock)) {
        Ok(lock) => Some(lock),
        Err(e) => {
            debug!("Loading {} without a lock: {}", dir.display(), e);
            None
        }
    };

    let path = index_path(dir);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let header = decode_header(&bytes)?;
    let dimension = header.dimension as usize;
    let count = usize::try_from(header.count)
        .map_err(|_| corrupt(format!("entry count {} is too large", header.count)))?;

    if count > 0 && dimension == 0 {
        return Err(corrupt("non-empty index with zero dimension"));
    }

    let expected_len = count
        .checked_mul(dimension)
        .and_then(|values| values.checked_mul(F32_LEN))
        .and_then(|body| body.checked_add(HEADER_LEN))
        .ok_or_else(|| corrupt("index size overflows"))?;
    if bytes.len() != expected_len {
        return Err(corrupt(format!(
            "{} is {} bytes, expected {} for {} vectors of dimension {}",
            INDEX_FILE,
            bytes.len(),
            expected_len,
            count,
            dimension
        )));
    }

    let data: Vec<f32> = bytes
        .get(HEADER_LEN..)
        .unwrap_or_default()
        .chunks_exact(F32_LEN)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if data.iter().any(|value| !value.is_finite()) {
        return Err(corrupt("index contains non-finite values"));
    }

    let index = FlatIndex::from_raw(dimension, data)
        .ok_or_else(|| corrupt("vector data is not a whole number of vectors"))?;

    let metadata = read_metadata(dir, header.generation)?;
    if metadata.len() != count {
        return Err(corrupt(format!(
            "index holds {} vectors but metadata holds {} records",
            count,
            metadata.len()
        )));
    }

    Ok(Some(KnowledgeBase {
        index,
        metadata,
        generation: header.generation,
    }))
}

fn read_metadata(dir: &Path, generation: u64) -> Result<Vec<ChunkMetadata>> {
    let path = dir.join(metadata_file_name(generation));
    let file = File::open(&path).map_err(|e| {
        corrupt(format!(
            "metadata file {} for generation {} is unreadable: {}",
            path.display(),
            generation,
            e
        ))
    })?;

    let mut records = Vec::new();
    for (line_number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            return Err(corrupt(format!(
                "metadata line {} is blank",
                line_number + 1
            )));
        }
        let record: ChunkMetadata = serde_json::from_str(&line).map_err(|e| {
            corrupt(format!(
                "metadata record on line {} is invalid: {}",
                line_number + 1,
                e
            ))
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Generation named by the committed index header, if there is one
fn committed_generation(dir: &Path) -> Result<Option<u64>> {
    let mut file = match File::open(index_path(dir)) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header)
        .map_err(|_| corrupt(format!("{INDEX_FILE} is truncated")))?;
    Ok(Some(decode_header(&header)?.generation))
}

fn open_lock(dir: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join(LOCK_FILE))
}

fn encode_header(header: Header) -> [u8; HEADER_LEN] {
    let mut bytes = [0u8; HEADER_LEN];
    bytes[0..4].copy_from_slice(MAGIC);
    bytes[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes[8..12].copy_from_slice(&header.dimension.to_le_bytes());
    bytes[12..20].copy_from_slice(&header.count.to_le_bytes());
    bytes[20..28].copy_from_slice(&header.generation.to_le_bytes());
    bytes
}

fn decode_header(bytes: &[u8]) -> Result<Header> {
    let Some(header) = bytes.first_chunk::<HEADER_LEN>() else {
        return Err(corrupt(format!(
            "{} is truncated ({} bytes)",
            INDEX_FILE,
            bytes.len()
        )));
    };

    if &header[0..4] != MAGIC {
        return Err(corrupt(format!("{INDEX_FILE} has an unknown file signature")));
    }

    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != FORMAT_VERSION {
        return Err(corrupt(format!(
            "{INDEX_FILE} has unsupported format version {version}"
        )));
    }

    let mut dimension = [0u8; 4];
    dimension.copy_from_slice(&header[8..12]);
    let mut count = [0u8; 8];
    count.copy_from_slice(&header[12..20]);
    let mut generation = [0u8; 8];
    generation.copy_from_slice(&header[20..28]);

    Ok(Header {
        dimension: u32::from_le_bytes(dimension),
        count: u64::from_le_bytes(count),
        generation: u64::from_le_bytes(generation),
    })
}

fn write_atomically<F>(dir: &Path, target: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> Result<()>,
{
    let mut temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| RagError::Io(e.error))?;
    Ok(())
}

/// Delete metadata files of every generation other than `keep`
fn remove_stale_metadata(dir: &Path, keep: u64) {
    let keep_name = metadata_file_name(keep);
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(METADATA_PREFIX) && name.ends_with(METADATA_SUFFIX) && name != keep_name
        {
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!("Failed to remove stale metadata file {}: {}", name, e);
            }
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!("Could not sync directory {}: {}", dir.display(), e);
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

fn corrupt(reason: impl Into<String>) -> RagError {
    RagError::IndexCorrupt(reason.into())
}
