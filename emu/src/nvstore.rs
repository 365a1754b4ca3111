// SPDX-License-Identifier: MIT

//! The durable blob store behind the emulator.
//!
//! Three named blobs carry all persistent state. The contract is atomic
//! replace at key granularity: `write` returns only after a durable commit,
//! and a half-written blob must never be observable after a restart.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use log::debug;
use thiserror::Error;

/// The named blobs of the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NvKey {
    /// Permanent flags, permanent data and the NV index table.
    Permanent,
    /// Session table and volatile NV bits.
    Volatile,
    /// Saved-state snapshot consumed by `TPM_Startup(ST_STATE)`.
    SaveState,
}

impl NvKey {
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            NvKey::Permanent => "permanent.bin",
            NvKey::Volatile => "volatile.bin",
            NvKey::SaveState => "savestate.bin",
        }
    }
}

/// Storage backend failure.
#[derive(Debug, Error)]
pub enum NvStoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// The durable key/value capability.
pub trait NvStore {
    /// Read a blob; `None` when the key has never been written.
    fn read(&self, key: NvKey) -> Result<Option<Vec<u8>>, NvStoreError>;

    /// Atomically replace a blob; returns only after a durable commit.
    fn write(&mut self, key: NvKey, data: &[u8]) -> Result<(), NvStoreError>;

    /// Remove a blob.
    fn truncate(&mut self, key: NvKey) -> Result<(), NvStoreError>;
}

/// File-backed store: one file per blob inside a directory, replaced via
/// write-to-temporary plus rename.
#[derive(Debug)]
pub struct FileNvStore {
    dir: PathBuf,
}

impl FileNvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, NvStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileNvStore { dir })
    }

    fn path(&self, key: NvKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

impl NvStore for FileNvStore {
    fn read(&self, key: NvKey) -> Result<Option<Vec<u8>>, NvStoreError> {
        match fs::read(self.path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, key: NvKey, data: &[u8]) -> Result<(), NvStoreError> {
        let path = self.path(key);
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        if let Ok(dir) = fs::File::open(&self.dir) {
            // directory entry durability; failure here is not observable
            let _ = dir.sync_all();
        }
        debug!("nvstore: wrote {} ({} bytes)", key.file_name(), data.len());
        Ok(())
    }

    fn truncate(&mut self, key: NvKey) -> Result<(), NvStoreError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Memory-backed store for tests and throwaway instances.
#[derive(Debug, Default)]
pub struct MemNvStore {
    blobs: HashMap<NvKey, Vec<u8>>,
}

impl MemNvStore {
    #[must_use]
    pub fn new() -> Self {
        MemNvStore::default()
    }
}

impl NvStore for MemNvStore {
    fn read(&self, key: NvKey) -> Result<Option<Vec<u8>>, NvStoreError> {
        Ok(self.blobs.get(&key).cloned())
    }

    fn write(&mut self, key: NvKey, data: &[u8]) -> Result<(), NvStoreError> {
        self.blobs.insert(key, data.to_vec());
        Ok(())
    }

    fn truncate(&mut self, key: NvKey) -> Result<(), NvStoreError> {
        self.blobs.remove(&key);
        Ok(())
    }
}
