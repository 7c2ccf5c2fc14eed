//! Durable persistence of the per-folder cursor

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Result, SyncError};
use crate::models::Cursor;

/// Name of the cursor file inside a mailbox root
pub const CURSOR_FILE: &str = ".imap-uids";

/// Reads and atomically replaces a cursor file
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for the default cursor file of a mailbox root
    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join(CURSOR_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cursor; a missing file yields an empty cursor
    pub fn load(&self) -> Result<Cursor> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No cursor at {}, starting fresh", self.path.display());
                return Ok(Cursor::new());
            }
            Err(e) => return Err(SyncError::io(&self.path, e)),
        };

        serde_json::from_slice(&data).map_err(|e| {
            SyncError::io(&self.path, io::Error::new(io::ErrorKind::InvalidData, e))
        })
    }

    /// Replace the cursor file with `cursor`.
    ///
    /// Readers see either the previous or the new contents, never a mix.
    pub fn save(&self, cursor: &Cursor) -> Result<()> {
        let data = serde_json::to_vec_pretty(cursor).map_err(|e| {
            SyncError::io(&self.path, io::Error::new(io::ErrorKind::InvalidData, e))
        })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }

        let tmp = self.temp_path();
        let result = write_synced(&tmp, &data).and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(SyncError::io(&self.path, e));
        }

        debug!("Saved cursor to {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| CURSOR_FILE.to_string());
        self.path
            .with_file_name(format!("{}.tmp.{}", name, std::process::id()))
    }
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file: File = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = CursorStore::in_root(dir.path());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = CursorStore::in_root(dir.path());

        let mut cursor = Cursor::new();
        cursor.advance("INBOX", 42);
        cursor.advance("Work", 7);
        store.save(&cursor).unwrap();

        assert_eq!(store.load().unwrap(), cursor);
        assert_eq!(store.path(), dir.path().join(".imap-uids"));
    }

    #[test]
    fn test_save_replaces_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let store = CursorStore::in_root(dir.path());

        let mut cursor = Cursor::new();
        cursor.advance("INBOX", 1);
        store.save(&cursor).unwrap();
        cursor.advance("INBOX", 2);
        store.save(&cursor).unwrap();

        assert_eq!(store.load().unwrap().get("INBOX"), 2);
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_corrupt_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let store = CursorStore::in_root(dir.path());
        fs::write(store.path(), b"not json").unwrap();

        match store.load() {
            Err(SyncError::Io { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::InvalidData)
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_reads_plain_json_format() {
        let dir = TempDir::new().unwrap();
        let store = CursorStore::in_root(dir.path());
        fs::write(store.path(), br#"{"last_seen_uid":{"INBOX":9}}"#).unwrap();
        assert_eq!(store.load().unwrap().get("INBOX"), 9);
    }

    #[test]
    fn test_save_into_unwritable_location_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();

        let store = CursorStore::new(blocker.join(".imap-uids"));
        assert!(matches!(
            store.save(&Cursor::new()),
            Err(SyncError::Io { .. })
        ));
    }
}
