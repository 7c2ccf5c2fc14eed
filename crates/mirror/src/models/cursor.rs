//! Per-folder cursor of the last fully processed UID

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Last seen UID for every folder of one mailbox
///
/// Values only ever move forward: [`Cursor::advance`] ignores attempts to
/// lower a folder's position, so a persisted cursor never decreases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(default, alias = "LastSeenUID")]
    last_seen_uid: BTreeMap<String, u32>,
}

impl Cursor {
    /// Create an empty cursor (every folder starts from the beginning)
    pub fn new() -> Self {
        Self::default()
    }

    /// Last processed UID for `folder`, 0 when the folder was never synced
    pub fn get(&self, folder: &str) -> u32 {
        self.last_seen_uid.get(folder).copied().unwrap_or(0)
    }

    /// Move the folder's position forward to `uid`.
    ///
    /// Returns `true` when the stored value changed.
    pub fn advance(&mut self, folder: &str, uid: u32) -> bool {
        match self.last_seen_uid.get(folder) {
            Some(&current) if uid <= current => false,
            _ => {
                self.last_seen_uid.insert(folder.to_string(), uid);
                true
            }
        }
    }

    /// Folders with a recorded position
    pub fn folders(&self) -> impl Iterator<Item = (&str, u32)> {
        self.last_seen_uid.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen_uid.is_empty()
    }
}
