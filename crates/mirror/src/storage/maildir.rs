//! Local maildir-style message store
//!
//! Layout under a mailbox root:
//! ```text
//! {root}/
//!   .imap-uids                 # cursor
//!   INBOX/
//!     tmp/                     # staging, never read by consumers
//!     cur/
//!       1700000000_0.123.host,U=15,FSHA256=ab12...
//!   Lists/rust/
//!     tmp/
//!     cur/
//! ```
//! A file only ever appears in `cur` through a rename, so its presence means
//! the whole message was written and synced.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use log::{debug, warn};
use sha2::{Digest, Sha256};

use super::naming::UniqueNames;
use crate::error::{Result, SyncError};
use crate::models::DeliveredFile;

/// Staging directory name
pub const TMP_DIR: &str = "tmp";
/// Committed messages directory name
pub const CUR_DIR: &str = "cur";

/// Writes message bodies into the local store
pub struct Maildir {
    root: PathBuf,
    names: UniqueNames,
}

impl Maildir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_names(root, UniqueNames::new())
    }

    pub fn with_names(root: impl Into<PathBuf>, names: UniqueNames) -> Self {
        Self {
            root: root.into(),
            names,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a remote folder.
    ///
    /// Folder hierarchy separators become directory levels. Names that
    /// would escape the root are rejected.
    pub fn folder_dir(&self, folder: &str) -> Result<PathBuf> {
        let relative = Path::new(folder);
        let mut dir = self.root.clone();
        let mut components = 0;

        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    dir.push(part);
                    components += 1;
                }
                _ => {
                    return Err(SyncError::Protocol(format!(
                        "refusing unsafe folder name {:?}",
                        folder
                    )));
                }
            }
        }

        // `components()` silently drops empty segments such as "a//b"
        if components == 0 || folder.split('/').any(str::is_empty) {
            return Err(SyncError::Protocol(format!(
                "refusing unsafe folder name {:?}",
                folder
            )));
        }
        Ok(dir)
    }

    /// Create the staging and committed directories of a folder
    pub fn ensure_dirs(&self, folder: &str) -> Result<PathBuf> {
        let dir = self.folder_dir(folder)?;
        for sub in [TMP_DIR, CUR_DIR] {
            let path = dir.join(sub);
            fs::create_dir_all(&path).map_err(|e| SyncError::io(&path, e))?;
        }
        Ok(dir)
    }

    /// Stream `body` into the folder and commit it.
    ///
    /// The body is hashed while it is copied. On any failure the staging
    /// file is removed and nothing appears in `cur`.
    pub fn deliver(&self, folder: &str, uid: u32, body: &mut dyn Read) -> Result<DeliveredFile> {
        let dir = self.ensure_dirs(folder)?;
        let (tmp_path, file) = self.create_staging(&dir, uid)?;
        let mut guard = UnlinkOnError {
            path: Some(tmp_path.clone()),
        };

        let mut writer = HashingWriter::new(file);
        io::copy(body, &mut writer).map_err(|e| SyncError::io(&tmp_path, e))?;
        let (file, content_hash) = writer.finish();
        file.sync_all().map_err(|e| SyncError::io(&tmp_path, e))?;
        drop(file);

        let file_name = tmp_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let final_path = dir
            .join(CUR_DIR)
            .join(format!("{},FSHA256={}", file_name, content_hash));

        fs::rename(&tmp_path, &final_path).map_err(|e| SyncError::io(&final_path, e))?;
        guard.path = None;

        debug!("Delivered UID {} of {} to {}", uid, folder, final_path.display());
        Ok(DeliveredFile {
            path: final_path,
            content_hash,
        })
    }

    fn create_staging(&self, dir: &Path, uid: u32) -> Result<(PathBuf, File)> {
        let tmp_dir = dir.join(TMP_DIR);
        // A fresh counter value is drawn each attempt; a collision only
        // happens if another process reuses our pid on the same host.
        let mut last_err = None;
        for _ in 0..3 {
            let path = tmp_dir.join(self.names.next(uid));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    warn!("Staging name {} already taken", path.display());
                    last_err = Some((path, e));
                }
                Err(e) => return Err(SyncError::io(&path, e)),
            }
        }
        match last_err {
            Some((path, e)) => Err(SyncError::io(path, e)),
            None => Err(SyncError::io(
                &tmp_dir,
                io::Error::other("could not allocate a staging file"),
            )),
        }
    }
}

/// Removes a staging file unless disarmed
struct UnlinkOnError {
    path: Option<PathBuf>,
}

impl Drop for UnlinkOnError {
    fn drop(&mut self) {
        if let Some(path) = self.path.take()
            && let Err(e) = fs::remove_file(&path)
        {
            warn!("Could not remove staging file {}: {}", path.display(), e);
        }
    }
}

/// Writer that hashes everything passing through it
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> (W, String) {
        (self.inner, hex::encode(self.hasher.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// SHA-256 of everything `reader` yields, as lowercase hex
pub(crate) fn hash_reader(reader: &mut dyn Read) -> io::Result<String> {
    let mut writer = HashingWriter::new(io::sink());
    io::copy(reader, &mut writer)?;
    Ok(writer.finish().1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::naming::{AtomicSequence, FixedClock};
    use tempfile::TempDir;

    const SHA_HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn maildir(root: &Path) -> Maildir {
        Maildir::with_names(
            root,
            UniqueNames::with_parts(
                99,
                "host",
                Box::new(AtomicSequence::new()),
                Box::new(FixedClock(1_700_000_000)),
            ),
        )
    }

    fn dir_len(path: &Path) -> usize {
        fs::read_dir(path).map(|d| d.count()).unwrap_or(0)
    }

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            self.served = true;
            buf[..4].copy_from_slice(b"From");
            Ok(4)
        }
    }

    #[test]
    fn test_deliver_commits_into_cur() {
        let dir = TempDir::new().unwrap();
        let store = maildir(dir.path());

        let delivered = store
            .deliver("INBOX", 15, &mut io::Cursor::new(b"hello".to_vec()))
            .unwrap();

        assert_eq!(delivered.content_hash, SHA_HELLO);
        assert_eq!(
            delivered.path,
            dir.path()
                .join("INBOX/cur")
                .join(format!("1700000000_0.99.host,U=15,FSHA256={}", SHA_HELLO))
        );
        assert_eq!(fs::read(&delivered.path).unwrap(), b"hello");
        assert_eq!(dir_len(&dir.path().join("INBOX/tmp")), 0);
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let store = maildir(dir.path());

        let result = store.deliver("INBOX", 1, &mut FailingReader { served: false });

        assert!(matches!(result, Err(SyncError::Io { .. })));
        assert_eq!(dir_len(&dir.path().join("INBOX/tmp")), 0);
        assert_eq!(dir_len(&dir.path().join("INBOX/cur")), 0);
    }

    #[test]
    fn test_failed_rename_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let store = maildir(dir.path());
        let target = dir
            .path()
            .join("INBOX/cur")
            .join(format!("1700000000_0.99.host,U=7,FSHA256={}", SHA_HELLO));
        fs::create_dir_all(target.join("occupied")).unwrap();

        let result = store.deliver("INBOX", 7, &mut io::Cursor::new(b"hello".to_vec()));

        assert!(matches!(result, Err(SyncError::Io { .. })));
        assert_eq!(dir_len(&dir.path().join("INBOX/tmp")), 0);
        assert_eq!(dir_len(&dir.path().join("INBOX/cur")), 1);
        assert_eq!(dir_len(&target), 1);
    }

    #[test]
    fn test_nested_folder() {
        let dir = TempDir::new().unwrap();
        let store = maildir(dir.path());

        let delivered = store
            .deliver("Lists/rust", 3, &mut io::Cursor::new(b"x".to_vec()))
            .unwrap();
        assert!(delivered.path.starts_with(dir.path().join("Lists/rust/cur")));
    }

    #[test]
    fn test_unsafe_folder_names() {
        let dir = TempDir::new().unwrap();
        let store = maildir(dir.path());

        for name in ["", "..", "a/../b", "/etc", "a//b", "."] {
            assert!(
                matches!(store.folder_dir(name), Err(SyncError::Protocol(_))),
                "{:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_ensure_dirs_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = maildir(dir.path());
        store.ensure_dirs("INBOX").unwrap();
        store.ensure_dirs("INBOX").unwrap();
        assert!(dir.path().join("INBOX/tmp").is_dir());
        assert!(dir.path().join("INBOX/cur").is_dir());
    }

    #[test]
    fn test_hash_reader() {
        let hash = hash_reader(&mut io::Cursor::new(b"hello".to_vec())).unwrap();
        assert_eq!(hash, SHA_HELLO);
    }
}
