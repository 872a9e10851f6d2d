//! Snapshot-based persistence for cellstore.
//!
//! A snapshot is a point-in-time copy of every record. Snapshots are written
//! synchronously to a temporary file which then atomically replaces the
//! previous snapshot.

use crate::error::{CellStoreError, Result};
use crate::storage::Record;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const SNAPSHOT_MAGIC: &[u8] = b"CELLSTORE_SNAPSHOT";
const SNAPSHOT_VERSION: u8 = 1;
/// Magic, version byte and a 12-byte timestamp.
const HEADER_LEN: u64 = SNAPSHOT_MAGIC.len() as u64 + 1 + 12;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotConfig {
    /// Committed write transactions between automatic snapshots
    #[serde(default)]
    pub auto_snapshot_ops: Option<usize>,
}

#[derive(Debug)]
pub struct SnapshotFile {
    path: PathBuf,
    config: SnapshotConfig,
    ops_since_snapshot: usize,
}

impl SnapshotFile {
    pub fn new<P: AsRef<Path>>(path: P, config: SnapshotConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config,
            ops_since_snapshot: 0,
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<Vec<Record>> {
        if !self.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        if file_len == 0 {
            return Ok(Vec::new());
        }

        let mut reader = BufReader::new(file);

        let mut magic = vec![0u8; SNAPSHOT_MAGIC.len()];
        reader.read_exact(&mut magic)?;
        if magic != SNAPSHOT_MAGIC {
            return Err(CellStoreError::InvalidFormat);
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_VERSION {
            return Err(CellStoreError::InvalidFormat);
        }

        let mut timestamp_bytes = [0u8; 12];
        reader.read_exact(&mut timestamp_bytes)?;

        let count = read_u64(&mut reader)?;
        let mut remaining = file_len
            .checked_sub(HEADER_LEN + 8)
            .ok_or(CellStoreError::InvalidFormat)?;
        // every record needs at least its length prefix
        if count > remaining / 8 {
            return Err(CellStoreError::InvalidFormat);
        }

        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            remaining = remaining
                .checked_sub(8)
                .ok_or(CellStoreError::InvalidFormat)?;
            let len = read_u64(&mut reader)?;
            if len > remaining {
                return Err(CellStoreError::InvalidFormat);
            }
            remaining -= len;
            let len = usize::try_from(len).map_err(|_| CellStoreError::InvalidFormat)?;
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf)?;
            records.push(bincode::deserialize(&buf)?);
        }

        log::info!(
            "Loaded {} records from snapshot {}",
            records.len(),
            self.path.display()
        );
        Ok(records)
    }

    pub fn save<'a>(&mut self, records: impl Iterator<Item = &'a Record>) -> Result<()> {
        let encoded = records
            .map(bincode::serialize)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let temp_path = self.temp_path();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(SNAPSHOT_MAGIC)?;
        writer.write_all(&[SNAPSHOT_VERSION])?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| CellStoreError::Serialization(e.to_string()))?;
        writer.write_all(&timestamp.as_secs().to_le_bytes())?;
        writer.write_all(&timestamp.subsec_nanos().to_le_bytes())?;

        write_u64(&mut writer, encoded.len() as u64)?;
        for bytes in &encoded {
            write_u64(&mut writer, bytes.len() as u64)?;
            writer.write_all(bytes)?;
        }

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, &self.path)?;
        self.sync_parent_dir()?;

        self.ops_since_snapshot = 0;
        log::info!(
            "Wrote snapshot of {} records to {}",
            encoded.len(),
            self.path.display()
        );
        Ok(())
    }

    pub fn record_operation(&mut self) {
        self.ops_since_snapshot += 1;
    }

    pub fn should_snapshot(&self) -> bool {
        self.config
            .auto_snapshot_ops
            .is_some_and(|threshold| self.ops_since_snapshot >= threshold)
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        if let Some(name) = temp.file_name() {
            let mut new_name = name.to_string_lossy().into_owned();
            new_name.push_str(".tmp");
            temp.set_file_name(new_name);
        }
        temp
    }

    fn sync_parent_dir(&self) -> Result<()> {
        #[cfg(unix)]
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }
}

fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
