//! Delivery of a single message: fetch, commit to disk, index, tag

use log::{debug, info};

use crate::error::{Result, SyncError};
use crate::index::{AddOutcome, MessageIndex};
use crate::models::{CandidateMessage, IndexUpdate, MessageId, TagPolicy};
use crate::session::RemoteSession;
use crate::storage::Maildir;

/// What happened to a delivered message in the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Newly indexed, with the resulting tags
    Indexed { tags: Vec<String> },
    /// The index already knew the Message-ID; the file is an extra copy
    Duplicate,
}

/// Delivers candidates of one mailbox into its local store and index
pub struct Deliverer<'a> {
    maildir: &'a Maildir,
    index: &'a dyn MessageIndex,
}

impl<'a> Deliverer<'a> {
    pub fn new(maildir: &'a Maildir, index: &'a dyn MessageIndex) -> Self {
        Self { maildir, index }
    }

    /// Fetch and commit one message, then hand it to the index.
    ///
    /// Once the file is committed the message counts as mirrored even if a
    /// later step fails; a rerun will see it as a duplicate.
    ///
    /// # Arguments
    /// * `session` - Remote session with the candidate's folder selected
    /// * `candidate` - Message to deliver
    /// * `policy` - Folder tag policy, applied after the default tags
    pub fn deliver(
        &self,
        session: &mut dyn RemoteSession,
        candidate: &CandidateMessage,
        policy: &TagPolicy,
    ) -> Result<Delivery> {
        let folder = candidate.folder.as_str();
        let uid = candidate.uid;

        // 1. Fetch the body
        let Some(mut body) = session.fetch_body(uid)? else {
            return Err(SyncError::NotFound {
                folder: folder.to_string(),
                uid,
            });
        };

        // 2. Stream it into the store; the rename inside is the commit point
        let delivered = self.maildir.deliver(folder, uid, &mut body)?;
        drop(body);

        // 3. Index it
        let update = IndexUpdate {
            message_id: candidate
                .message_id
                .clone()
                .unwrap_or_else(|| MessageId::synthetic(&delivered.content_hash)),
            path: delivered.path,
            tags: policy.with_defaults(),
        };
        self.index_update(folder, uid, update)
    }

    fn index_update(&self, folder: &str, uid: u32, update: IndexUpdate) -> Result<Delivery> {
        match self.index.add_message(&update.path, &update.message_id)? {
            AddOutcome::Added(handle) => {
                let tags = self.index.apply_policy(handle, &update.tags)?;
                info!(
                    "{}: UID {} indexed as {} [{}]",
                    folder,
                    uid,
                    update.message_id,
                    tags.join(",")
                );
                Ok(Delivery::Indexed { tags })
            }
            AddOutcome::Duplicate(_) => {
                debug!(
                    "{}: UID {} is a duplicate of {}, not tagging",
                    folder, uid, update.message_id
                );
                Ok(Delivery::Duplicate)
            }
        }
    }
}
