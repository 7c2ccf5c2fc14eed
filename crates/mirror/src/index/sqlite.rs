//! SQLite-backed message index

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::debug;
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::{AddOutcome, IndexError, MessageHandle, MessageIndex, check_tag};
use crate::models::MessageId;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- One row per distinct Message-ID
            CREATE TABLE messages (
                id INTEGER PRIMARY KEY,
                message_id TEXT NOT NULL UNIQUE,
                indexed_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Every local file holding a copy of a message
            CREATE TABLE message_files (
                message INTEGER NOT NULL,
                path TEXT NOT NULL,
                PRIMARY KEY (message, path),
                FOREIGN KEY (message) REFERENCES messages(id) ON DELETE CASCADE
            );

            CREATE TABLE message_tags (
                message INTEGER NOT NULL,
                tag TEXT NOT NULL,
                PRIMARY KEY (message, tag),
                FOREIGN KEY (message) REFERENCES messages(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_message_tags_tag ON message_tags(tag);
            "#,
        ),
    ])
}

/// SQLite implementation of [`MessageIndex`]
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    /// Open (creating if needed) the index database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let conn = Connection::open(path.as_ref())?;
        debug!("Opened index at {}", path.as_ref().display());
        Self::init(conn, true)
    }

    /// Open a private in-memory database
    pub fn in_memory() -> Result<Self, IndexError> {
        Self::init(Connection::open_in_memory()?, false)
    }

    fn init(mut conn: Connection, on_disk: bool) -> Result<Self, IndexError> {
        // WAL lets the re-indexer and a sync run read while the other writes
        if on_disk {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA temp_store = MEMORY;
                "#,
            )?;
        }
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        migrations().to_latest(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, IndexError> {
        self.conn.lock().map_err(|_| IndexError::Poisoned)
    }

    fn ensure_exists(conn: &Connection, handle: MessageHandle) -> Result<(), IndexError> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM messages WHERE id = ?1",
                params![handle.0],
                |row| row.get(0),
            )
            .optional()?;
        found
            .map(|_| ())
            .ok_or(IndexError::UnknownHandle(handle.0))
    }
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl MessageIndex for SqliteIndex {
    fn add_message(
        &self,
        path: &Path,
        message_id: &MessageId,
    ) -> Result<AddOutcome, IndexError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM messages WHERE message_id = ?1",
                params![message_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match existing {
            Some(id) => AddOutcome::Duplicate(MessageHandle(id)),
            None => {
                tx.execute(
                    "INSERT INTO messages (message_id) VALUES (?1)",
                    params![message_id.as_str()],
                )?;
                AddOutcome::Added(MessageHandle(tx.last_insert_rowid()))
            }
        };

        tx.execute(
            "INSERT OR IGNORE INTO message_files (message, path) VALUES (?1, ?2)",
            params![outcome.handle().0, path_text(path)],
        )?;
        tx.commit()?;

        Ok(outcome)
    }

    fn count_by_message_id(&self, message_id: &MessageId) -> Result<usize, IndexError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE message_id = ?1",
            params![message_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn add_tag(&self, handle: MessageHandle, tag: &str) -> Result<(), IndexError> {
        check_tag(tag)?;
        let conn = self.conn()?;
        Self::ensure_exists(&conn, handle)?;
        conn.execute(
            "INSERT OR IGNORE INTO message_tags (message, tag) VALUES (?1, ?2)",
            params![handle.0, tag],
        )?;
        Ok(())
    }

    fn remove_tag(&self, handle: MessageHandle, tag: &str) -> Result<(), IndexError> {
        check_tag(tag)?;
        let conn = self.conn()?;
        Self::ensure_exists(&conn, handle)?;
        conn.execute(
            "DELETE FROM message_tags WHERE message = ?1 AND tag = ?2",
            params![handle.0, tag],
        )?;
        Ok(())
    }

    fn tags(&self, handle: MessageHandle) -> Result<Vec<String>, IndexError> {
        let conn = self.conn()?;
        Self::ensure_exists(&conn, handle)?;
        let mut stmt = conn.prepare("SELECT tag FROM message_tags WHERE message = ?1 ORDER BY tag")?;
        let tags = stmt
            .query_map(params![handle.0], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tags)
    }

    fn files(&self, handle: MessageHandle) -> Result<Vec<PathBuf>, IndexError> {
        let conn = self.conn()?;
        Self::ensure_exists(&conn, handle)?;
        let mut stmt =
            conn.prepare("SELECT path FROM message_files WHERE message = ?1 ORDER BY rowid")?;
        let files = stmt
            .query_map(params![handle.0], |row| row.get::<_, String>(0))?
            .map(|r| r.map(PathBuf::from))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(files)
    }

    fn find(&self, message_id: &MessageId) -> Result<Option<MessageHandle>, IndexError> {
        let conn = self.conn()?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM messages WHERE message_id = ?1",
                params![message_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(MessageHandle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TagPolicy;
    use tempfile::TempDir;

    #[test]
    fn test_add_and_count() {
        let index = SqliteIndex::in_memory().unwrap();
        let id = MessageId::new("<a@example.com>");

        assert_eq!(index.count_by_message_id(&id).unwrap(), 0);
        let outcome = index.add_message(Path::new("/m/cur/1"), &id).unwrap();
        assert!(matches!(outcome, AddOutcome::Added(_)));
        assert_eq!(index.count_by_message_id(&id).unwrap(), 1);
        assert_eq!(index.find(&id).unwrap(), Some(outcome.handle()));
    }

    #[test]
    fn test_duplicate_records_extra_file() {
        let index = SqliteIndex::in_memory().unwrap();
        let id = MessageId::new("a@example.com");

        let first = index.add_message(Path::new("/m/1"), &id).unwrap();
        let second = index.add_message(Path::new("/m/2"), &id).unwrap();
        let again = index.add_message(Path::new("/m/2"), &id).unwrap();

        assert!(second.is_duplicate());
        assert!(again.is_duplicate());
        assert_eq!(
            index.files(first.handle()).unwrap(),
            vec![PathBuf::from("/m/1"), PathBuf::from("/m/2")]
        );
    }

    #[test]
    fn test_tags() {
        let index = SqliteIndex::in_memory().unwrap();
        let handle = index
            .add_message(Path::new("/m/1"), &MessageId::new("x"))
            .unwrap()
            .handle();

        let tags = index
            .apply_policy(handle, &TagPolicy::parse("project,-unread").with_defaults())
            .unwrap();
        assert_eq!(tags, vec!["inbox", "project"]);

        index.remove_tag(handle, "missing").unwrap();
        assert_eq!(index.tags(handle).unwrap(), vec!["inbox", "project"]);
    }

    #[test]
    fn test_unknown_handle() {
        let index = SqliteIndex::in_memory().unwrap();
        assert!(matches!(
            index.tags(MessageHandle(7)),
            Err(IndexError::UnknownHandle(7))
        ));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("index.db");
        let id = MessageId::new("<persist@example.com>");

        {
            let index = SqliteIndex::open(&db).unwrap();
            let handle = index.add_message(Path::new("/m/1"), &id).unwrap().handle();
            index.add_tag(handle, "inbox").unwrap();
        }

        let index = SqliteIndex::open(&db).unwrap();
        let handle = index.find(&id).unwrap().unwrap();
        assert_eq!(index.tags(handle).unwrap(), vec!["inbox"]);
        assert!(index.add_message(Path::new("/m/2"), &id).unwrap().is_duplicate());
    }
}
