//! Per-folder tag policy
//!
//! A policy is written in configuration as a comma-separated list such as
//! `"project,-unread"`: a leading `-` removes the tag, anything else adds it.

use std::fmt;

/// Tags every newly indexed message receives before the folder policy
pub const DEFAULT_TAGS: [&str; 2] = ["unread", "inbox"];

/// What to do with a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOp {
    Add,
    Remove,
}

/// A single tag operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagAction {
    pub tag: String,
    pub op: TagOp,
}

impl TagAction {
    pub fn add(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            op: TagOp::Add,
        }
    }

    pub fn remove(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            op: TagOp::Remove,
        }
    }
}

impl fmt::Display for TagAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            TagOp::Add => write!(f, "{}", self.tag),
            TagOp::Remove => write!(f, "-{}", self.tag),
        }
    }
}

/// Ordered list of tag operations, applied front to back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagPolicy {
    actions: Vec<TagAction>,
}

impl TagPolicy {
    /// Policy that does nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a comma-separated policy.
    ///
    /// Whitespace around entries is ignored, as are empty entries and a
    /// bare `-`.
    pub fn parse(list: &str) -> Self {
        let actions = list
            .split(',')
            .map(str::trim)
            .filter_map(|entry| match entry.strip_prefix('-') {
                Some(tag) => {
                    let tag = tag.trim();
                    (!tag.is_empty()).then(|| TagAction::remove(tag))
                }
                None => (!entry.is_empty()).then(|| TagAction::add(entry)),
            })
            .collect();
        Self { actions }
    }

    /// The implicit `unread` + `inbox` additions followed by `self`
    pub fn with_defaults(&self) -> Self {
        let actions = DEFAULT_TAGS
            .iter()
            .map(|tag| TagAction::add(*tag))
            .chain(self.actions.iter().cloned())
            .collect();
        Self { actions }
    }

    pub fn actions(&self) -> &[TagAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl fmt::Display for TagPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.actions.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(","))
    }
}
