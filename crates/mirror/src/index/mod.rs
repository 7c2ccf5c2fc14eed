//! Message index
//!
//! Remembers which Message-IDs have been mirrored, the files that hold them
//! and the tags attached to each message. The synchronization engine only
//! ever asks three things of it: has this id been seen, add this file, and
//! add or remove a tag.

mod memory;
mod sqlite;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use memory::InMemoryIndex;
pub use sqlite::SqliteIndex;

use crate::models::{MessageId, TagOp, TagPolicy};

/// Opaque handle to an indexed message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageHandle(pub i64);

/// Result of adding a file to the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// First file for this Message-ID
    Added(MessageHandle),
    /// The Message-ID was already indexed; the file was recorded as another copy
    Duplicate(MessageHandle),
}

impl AddOutcome {
    pub fn handle(&self) -> MessageHandle {
        match self {
            Self::Added(h) | Self::Duplicate(h) => *h,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Errors reported by an index backend
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("unknown message handle {0}")]
    UnknownHandle(i64),

    #[error("invalid tag {0:?}")]
    InvalidTag(String),

    #[error("index lock poisoned")]
    Poisoned,
}

/// Storage of indexed messages and their tags
///
/// Implementations use interior mutability so one index can be shared by
/// several mailbox runs.
pub trait MessageIndex: Send + Sync {
    /// Record `path` as a copy of the message identified by `message_id`
    fn add_message(&self, path: &Path, message_id: &MessageId)
    -> Result<AddOutcome, IndexError>;

    /// Number of messages indexed under `message_id` (0 or 1)
    fn count_by_message_id(&self, message_id: &MessageId) -> Result<usize, IndexError>;

    fn add_tag(&self, handle: MessageHandle, tag: &str) -> Result<(), IndexError>;

    fn remove_tag(&self, handle: MessageHandle, tag: &str) -> Result<(), IndexError>;

    /// Tags of a message, sorted
    fn tags(&self, handle: MessageHandle) -> Result<Vec<String>, IndexError>;

    /// Files recorded for a message, in insertion order
    fn files(&self, handle: MessageHandle) -> Result<Vec<PathBuf>, IndexError>;

    /// Handle of an indexed message, if any
    fn find(&self, message_id: &MessageId) -> Result<Option<MessageHandle>, IndexError>;

    /// Apply a policy front to back and return the resulting tags
    fn apply_policy(
        &self,
        handle: MessageHandle,
        policy: &TagPolicy,
    ) -> Result<Vec<String>, IndexError> {
        for action in policy.actions() {
            match action.op {
                TagOp::Add => self.add_tag(handle, &action.tag)?,
                TagOp::Remove => self.remove_tag(handle, &action.tag)?,
            }
        }
        self.tags(handle)
    }
}

/// Tags are non-empty and contain no whitespace
pub(crate) fn check_tag(tag: &str) -> Result<(), IndexError> {
    if tag.is_empty() || tag.contains(char::is_whitespace) {
        return Err(IndexError::InvalidTag(tag.to_string()));
    }
    Ok(())
}
