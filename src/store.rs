//! Snapshot store.
//!
//! Owns the single on-disk snapshot file and the in-memory `RefreshStatus`
//! that describes it. Both sit behind one `RwLock`: the write lock covers
//! replacing the file and updating the status together, the read lock covers
//! reading the file bytes and cloning the status, so a reader always gets a
//! matching pair. Readers share the lock with each other.
//!
//! The file is replaced by writing a temp file in the same directory and
//! renaming it over the old one, so a crash mid-write leaves the previous
//! snapshot intact.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tempfile::NamedTempFile;

use crate::logging::{self, DataSource};
use crate::model::{
    CycleError, CycleSummary, MergedSnapshot, RefreshErrorRecord, RefreshStatus, ServiceError,
};

#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    status: RwLock<RefreshStatus>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            status: RwLock::new(RefreshStatus::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a snapshot has ever been written to this path.
    pub fn exists(&self) -> bool {
        let _guard = self.status.read();
        self.path.is_file()
    }

    /// Replace the snapshot and record the success.
    ///
    /// Serialization happens before the lock is taken; only the file swap
    /// and the status update run under it. On error the old file and the
    /// status are left as they were.
    pub fn write(
        &self,
        snapshot: &MergedSnapshot,
        summary: CycleSummary,
        at: DateTime<Utc>,
    ) -> Result<(), CycleError> {
        let bytes = snapshot
            .to_json_bytes()
            .map_err(|e| CycleError::Serialization(e.to_string()))?;

        let mut status = self.status.write();
        self.replace_file(&bytes)
            .map_err(|e| CycleError::Serialization(format!("{}: {}", self.path.display(), e)))?;
        status.last_success = Some(at);
        status.last_cycle = Some(summary);
        drop(status);

        logging::debug(
            DataSource::Store,
            None,
            &format!(
                "wrote {} readings ({} bytes) to {}",
                snapshot.len(),
                bytes.len(),
                self.path.display()
            ),
        );
        Ok(())
    }

    /// Record a failed cycle. The snapshot file is not touched.
    pub fn record_failure(&self, err: &CycleError, summary: CycleSummary, at: DateTime<Utc>) {
        let mut status = self.status.write();
        status.last_error = Some(RefreshErrorRecord {
            message: err.to_string(),
            at,
        });
        status.last_cycle = Some(summary);
    }

    /// Raw snapshot bytes together with the status that describes them.
    pub fn read(&self) -> Result<(Vec<u8>, RefreshStatus), ServiceError> {
        let status = self.status.read();
        match fs::read(&self.path) {
            Ok(bytes) => Ok((bytes, status.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ServiceError::NotAvailable(
                "no snapshot has been written yet".to_string(),
            )),
            Err(e) => Err(ServiceError::NotAvailable(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    pub fn status(&self) -> RefreshStatus {
        self.status.read().clone()
    }

    fn replace_file(&self, bytes: &[u8]) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
