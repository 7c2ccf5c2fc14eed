//! Re-indexing of the local store
//!
//! Walks a maildir tree and hands every message file changed since a given
//! instant to the index. Files the index already knows are reported as
//! duplicates and otherwise ignored, so re-running is harmless.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, SyncError};
use crate::index::{AddOutcome, MessageIndex};
use crate::models::MessageId;
use crate::storage::{TMP_DIR, hash_reader};

/// Statistics from a re-indexing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexStats {
    /// Message files found
    pub scanned: usize,
    /// Files older than the cutoff
    pub unchanged: usize,
    /// Files whose Message-ID was new to the index
    pub added: usize,
    /// Files whose Message-ID was already indexed
    pub duplicates: usize,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Files sitting directly in a folder's `tmp` directory.
///
/// A remote folder may itself be called `tmp`, so only the immediate parent
/// of a file decides; its committed files live one level down in `cur`.
fn is_staging(entry: &DirEntry) -> bool {
    entry
        .path()
        .parent()
        .and_then(Path::file_name)
        .is_some_and(|name| name == TMP_DIR)
}

/// Index every file under `root` modified after `since`.
///
/// Dot entries (index database, cursor file) and staging files are
/// skipped. With `since == None` every file is considered.
pub fn reindex_since(
    index: &dyn MessageIndex,
    root: &Path,
    since: Option<DateTime<Utc>>,
) -> Result<ReindexStats> {
    let mut stats = ReindexStats::default();
    if !root.is_dir() {
        debug!("{} does not exist, nothing to index", root.display());
        return Ok(stats);
    }

    let walker = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_hidden(e));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            SyncError::io(path, io::Error::from(e))
        })?;
        if !entry.file_type().is_file() || is_staging(&entry) {
            continue;
        }
        stats.scanned += 1;

        let path = entry.path();
        if let Some(since) = since {
            let modified = entry
                .metadata()
                .map_err(|e| SyncError::io(path, io::Error::from(e)))?
                .modified()
                .map_err(|e| SyncError::io(path, e))?;
            if DateTime::<Utc>::from(modified) <= since {
                stats.unchanged += 1;
                continue;
            }
        }

        let message_id = message_id_of(path)?;
        match index.add_message(path, &message_id)? {
            AddOutcome::Added(_) => {
                debug!("Indexed {} as {}", path.display(), message_id);
                stats.added += 1;
            }
            AddOutcome::Duplicate(_) => stats.duplicates += 1,
        }
    }

    info!(
        "Re-indexed {}: {} files, {} added, {} duplicates, {} unchanged",
        root.display(),
        stats.scanned,
        stats.added,
        stats.duplicates,
        stats.unchanged
    );
    Ok(stats)
}

/// Message-ID header of a file, or a synthetic id from its content
fn message_id_of(path: &Path) -> Result<MessageId> {
    let headers = read_headers(path).map_err(|e| SyncError::io(path, e))?;
    if let Some(id) = find_message_id(&String::from_utf8_lossy(&headers)) {
        return Ok(id);
    }

    let mut file = File::open(path).map_err(|e| SyncError::io(path, e))?;
    let hash = hash_reader(&mut file).map_err(|e| SyncError::io(path, e))?;
    Ok(MessageId::synthetic(&hash))
}

/// Raw header block, up to and including the blank separator line
fn read_headers(path: &Path) -> io::Result<Vec<u8>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut headers = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        headers.extend_from_slice(&line);
        if line == b"\n" || line == b"\r\n" {
            break;
        }
    }
    Ok(headers)
}

/// Find the Message-ID in a header block, unfolding continuation lines
fn find_message_id(headers: &str) -> Option<MessageId> {
    let mut fields: Vec<String> = Vec::new();
    for line in headers.lines() {
        if line.is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            if let Some(last) = fields.last_mut() {
                last.push(' ');
                last.push_str(line.trim());
            }
            continue;
        }
        fields.push(line.to_string());
    }

    fields.iter().find_map(|field| {
        let (name, value) = field.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("message-id") {
            MessageId::parse(value)
        } else {
            None
        }
    })
}
