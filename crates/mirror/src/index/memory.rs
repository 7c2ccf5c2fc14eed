//! In-memory index implementation
//!
//! Used by tests and by dry runs that should not touch the on-disk index.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::{AddOutcome, IndexError, MessageHandle, MessageIndex, check_tag};
use crate::models::MessageId;

#[derive(Default)]
struct Entry {
    files: Vec<PathBuf>,
    tags: BTreeSet<String>,
}

/// In-memory implementation of [`MessageIndex`]
#[derive(Default)]
pub struct InMemoryIndex {
    by_id: RwLock<HashMap<MessageId, MessageHandle>>,
    entries: RwLock<HashMap<MessageHandle, Entry>>,
}

impl InMemoryIndex {
    /// Create a new empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct messages
    pub fn len(&self) -> usize {
        self.by_id.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_entry<R>(
        &self,
        handle: MessageHandle,
        f: impl FnOnce(&mut Entry) -> R,
    ) -> Result<R, IndexError> {
        let mut entries = self.entries.write().map_err(|_| IndexError::Poisoned)?;
        entries
            .get_mut(&handle)
            .map(f)
            .ok_or(IndexError::UnknownHandle(handle.0))
    }
}

impl MessageIndex for InMemoryIndex {
    fn add_message(
        &self,
        path: &Path,
        message_id: &MessageId,
    ) -> Result<AddOutcome, IndexError> {
        let mut by_id = self.by_id.write().map_err(|_| IndexError::Poisoned)?;
        let mut entries = self.entries.write().map_err(|_| IndexError::Poisoned)?;

        if let Some(&handle) = by_id.get(message_id) {
            let entry = entries.entry(handle).or_default();
            if !entry.files.iter().any(|p| p == path) {
                entry.files.push(path.to_path_buf());
            }
            return Ok(AddOutcome::Duplicate(handle));
        }

        let handle = MessageHandle(by_id.len() as i64 + 1);
        by_id.insert(message_id.clone(), handle);
        entries.insert(
            handle,
            Entry {
                files: vec![path.to_path_buf()],
                tags: BTreeSet::new(),
            },
        );
        Ok(AddOutcome::Added(handle))
    }

    fn count_by_message_id(&self, message_id: &MessageId) -> Result<usize, IndexError> {
        let by_id = self.by_id.read().map_err(|_| IndexError::Poisoned)?;
        Ok(usize::from(by_id.contains_key(message_id)))
    }

    fn add_tag(&self, handle: MessageHandle, tag: &str) -> Result<(), IndexError> {
        check_tag(tag)?;
        self.with_entry(handle, |entry| {
            entry.tags.insert(tag.to_string());
        })
    }

    fn remove_tag(&self, handle: MessageHandle, tag: &str) -> Result<(), IndexError> {
        check_tag(tag)?;
        self.with_entry(handle, |entry| {
            entry.tags.remove(tag);
        })
    }

    fn tags(&self, handle: MessageHandle) -> Result<Vec<String>, IndexError> {
        self.with_entry(handle, |entry| entry.tags.iter().cloned().collect())
    }

    fn files(&self, handle: MessageHandle) -> Result<Vec<PathBuf>, IndexError> {
        self.with_entry(handle, |entry| entry.files.clone())
    }

    fn find(&self, message_id: &MessageId) -> Result<Option<MessageHandle>, IndexError> {
        let by_id = self.by_id.read().map_err(|_| IndexError::Poisoned)?;
        Ok(by_id.get(message_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TagPolicy;

    #[test]
    fn test_add_then_duplicate() {
        let index = InMemoryIndex::new();
        let id = MessageId::new("<a@example.com>");

        let first = index.add_message(Path::new("/m/1"), &id).unwrap();
        let second = index.add_message(Path::new("/m/2"), &id).unwrap();

        assert!(matches!(first, AddOutcome::Added(_)));
        assert!(second.is_duplicate());
        assert_eq!(first.handle(), second.handle());
        assert_eq!(index.count_by_message_id(&id).unwrap(), 1);
        assert_eq!(index.files(first.handle()).unwrap().len(), 2);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_count_unknown_id() {
        let index = InMemoryIndex::new();
        assert_eq!(
            index.count_by_message_id(&MessageId::new("nope")).unwrap(),
            0
        );
        assert!(index.is_empty());
    }

    #[test]
    fn test_apply_policy() {
        let index = InMemoryIndex::new();
        let handle = index
            .add_message(Path::new("/m/1"), &MessageId::new("x"))
            .unwrap()
            .handle();

        let tags = index
            .apply_policy(handle, &TagPolicy::parse("project,-unread").with_defaults())
            .unwrap();
        assert_eq!(tags, vec!["inbox", "project"]);
    }

    #[test]
    fn test_unknown_handle() {
        let index = InMemoryIndex::new();
        assert!(matches!(
            index.add_tag(MessageHandle(99), "inbox"),
            Err(IndexError::UnknownHandle(99))
        ));
    }

    #[test]
    fn test_invalid_tag() {
        let index = InMemoryIndex::new();
        let handle = index
            .add_message(Path::new("/m/1"), &MessageId::new("x"))
            .unwrap()
            .handle();
        assert!(matches!(
            index.add_tag(handle, "two words"),
            Err(IndexError::InvalidTag(_))
        ));
    }
}
