//! Durable read offset.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// On-disk shape: `{"last_update_id": N}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRecord {
    pub last_update_id: i64,
}

/// Single-record file store for the last consumed Telegram update id.
///
/// Writes go to a sibling temp file which is synced and renamed over the
/// target, so readers only ever observe a complete record.
#[derive(Clone, Debug)]
pub struct OffsetStore {
    path: PathBuf,
}

impl OffsetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last committed offset, or 0 when the record is missing or unreadable.
    pub fn read(&self) -> i64 {
        match self.try_read() {
            Ok(Some(rec)) => rec.last_update_id,
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(error = %e, "offset record unreadable; starting from 0");
                0
            }
        }
    }

    fn try_read(&self) -> Result<Option<OffsetRecord>> {
        let txt = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        if txt.trim().is_empty() {
            return Ok(None);
        }
        let rec: OffsetRecord =
            serde_json::from_str(&txt).map_err(|e| Error::StateCorruption {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        if rec.last_update_id < 0 {
            return Err(Error::StateCorruption {
                path: self.path.clone(),
                reason: format!("negative offset {}", rec.last_update_id),
            });
        }
        Ok(Some(rec))
    }

    /// Durably persist `offset`. Values below the committed one are ignored.
    pub fn write(&self, offset: i64) -> Result<()> {
        let current = self.read();
        if offset < current {
            tracing::warn!(offset, current, "refusing to move offset backwards");
            return Ok(());
        }
        if offset == current && self.path.exists() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.tmp_path();
        let data = serde_json::to_vec(&OffsetRecord {
            last_update_id: offset,
        })?;
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&data)?;
            f.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::Io(e));
        }
        sync_parent_dir(&self.path);

        tracing::debug!(offset, path = %self.path.display(), "offset committed");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "offset".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    // Best effort: persists the rename itself on filesystems that need it.
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(d) = fs::File::open(dir) {
            let _ = d.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
