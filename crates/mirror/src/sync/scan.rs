//! Envelope scanning: which messages newer than the cursor still need
//! mirroring

use log::{debug, info};

use crate::error::{Result, SyncError};
use crate::index::MessageIndex;
use crate::models::{CandidateMessage, MessageId};
use crate::session::{RemoteSession, UidRange};

/// Result of scanning one folder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Messages to deliver, ascending by UID
    pub candidates: Vec<CandidateMessage>,
    /// Highest UID the server reported above the cursor, seen or not
    pub max_seen: Option<u32>,
    /// Messages skipped because the index already has them
    pub already_seen: usize,
}

impl ScanOutcome {
    /// Total entries considered
    pub fn scanned(&self) -> usize {
        self.candidates.len() + self.already_seen
    }
}

/// Scan the currently selected folder for messages with UID above `cursor`.
///
/// The caller must have selected `folder` and checked it is non-empty.
///
/// # Arguments
/// * `session` - Remote session with `folder` selected
/// * `index` - Index consulted for already-seen Message-IDs
/// * `folder` - Name of the selected folder
/// * `cursor` - Last fully processed UID of the folder
pub fn scan_folder(
    session: &mut dyn RemoteSession,
    index: &dyn MessageIndex,
    folder: &str,
    cursor: u32,
) -> Result<ScanOutcome> {
    let mut outcome = ScanOutcome::default();

    let Some(range) = UidRange::after(cursor) else {
        debug!("{}: cursor at the last possible UID, nothing to scan", folder);
        return Ok(outcome);
    };

    debug!("{}: fetching envelopes in {}", folder, range);
    let mut entries = session.fetch_envelopes(range)?;

    for entry in entries.by_ref() {
        let (Some(uid), Some(envelope)) = (entry.uid, entry.envelope) else {
            return Err(SyncError::Protocol(format!(
                "{}: envelope response without UID or envelope data",
                folder
            )));
        };

        if uid <= cursor {
            debug!("{}: ignoring UID {} at or below cursor {}", folder, uid, cursor);
            continue;
        }
        outcome.max_seen = Some(outcome.max_seen.map_or(uid, |max| max.max(uid)));

        let message_id = envelope.message_id.as_deref().and_then(MessageId::parse);
        if let Some(id) = &message_id
            && index.count_by_message_id(id)? > 0
        {
            info!("{}: UID {} ({}) already seen", folder, uid, id);
            outcome.already_seen += 1;
            continue;
        }

        outcome.candidates.push(CandidateMessage {
            folder: folder.to_string(),
            uid,
            message_id,
        });
    }
    entries.finish()?;

    outcome.candidates.sort_by_key(|c| c.uid);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::InMemoryIndex;
    use crate::session::{Connector, Endpoint, InMemoryServer, MAX_UID, StoredMessage, TlsMode};
    use std::path::Path;

    fn session(server: &InMemoryServer) -> Box<dyn RemoteSession> {
        let endpoint = Endpoint {
            server: "test".into(),
            port: 143,
            tls: TlsMode::Plain,
        };
        let mut session = server.connect(&endpoint).unwrap();
        session.login("user", "pass").unwrap();
        session.select_folder("INBOX").unwrap();
        session
    }

    fn server_with(uids: &[u32]) -> InMemoryServer {
        let server = InMemoryServer::new();
        for &uid in uids {
            server.add_message(
                "INBOX",
                StoredMessage::new(uid, &format!("<{}@example.com>", uid), "body"),
            );
        }
        server
    }

    #[test]
    fn test_new_messages_become_candidates() {
        let server = server_with(&[3, 1, 2]);
        let index = InMemoryIndex::new();
        let mut session = session(&server);

        let outcome = scan_folder(session.as_mut(), &index, "INBOX", 0).unwrap();

        let uids: Vec<u32> = outcome.candidates.iter().map(|c| c.uid).collect();
        assert_eq!(uids, vec![1, 2, 3]);
        assert_eq!(outcome.max_seen, Some(3));
        assert_eq!(
            outcome.candidates[0].message_id,
            Some(MessageId::new("1@example.com"))
        );
    }

    #[test]
    fn test_seen_messages_are_filtered() {
        let server = server_with(&[1, 2, 3]);
        let index = InMemoryIndex::new();
        index
            .add_message(Path::new("/x"), &MessageId::new("<2@example.com>"))
            .unwrap();
        let mut session = session(&server);

        let outcome = scan_folder(session.as_mut(), &index, "INBOX", 0).unwrap();

        let uids: Vec<u32> = outcome.candidates.iter().map(|c| c.uid).collect();
        assert_eq!(uids, vec![1, 3]);
        assert_eq!(outcome.already_seen, 1);
        assert_eq!(outcome.max_seen, Some(3));
        assert_eq!(outcome.scanned(), 3);
    }

    #[test]
    fn test_nothing_newer_than_cursor() {
        let server = server_with(&[1, 2, 3, 4, 5]);
        let index = InMemoryIndex::new();
        let mut session = session(&server);

        let outcome = scan_folder(session.as_mut(), &index, "INBOX", 5).unwrap();

        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.max_seen, None);
        let ranges = server.requested_ranges();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].1, UidRange { start: 6, end: MAX_UID });
    }

    #[test]
    fn test_cursor_at_max_issues_no_request() {
        let server = server_with(&[1]);
        let index = InMemoryIndex::new();
        let mut session = session(&server);

        let outcome = scan_folder(session.as_mut(), &index, "INBOX", MAX_UID).unwrap();

        assert_eq!(outcome, ScanOutcome::default());
        assert!(server.requested_ranges().is_empty());
    }

    #[test]
    fn test_missing_envelope_is_protocol_error() {
        let server = server_with(&[1, 2]);
        server.drop_envelope("INBOX", 2);
        let index = InMemoryIndex::new();
        let mut session = session(&server);

        let err = scan_folder(session.as_mut(), &index, "INBOX", 0).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[test]
    fn test_stream_failure_is_reported() {
        let server = server_with(&[1]);
        server.fail_envelope_streams("connection dropped");
        let index = InMemoryIndex::new();
        let mut session = session(&server);

        let err = scan_folder(session.as_mut(), &index, "INBOX", 0).unwrap_err();
        assert!(matches!(err, SyncError::Session(_)));
    }

    #[test]
    fn test_missing_message_id_is_still_a_candidate() {
        let server = InMemoryServer::new();
        server.add_message(
            "INBOX",
            StoredMessage {
                uid: 4,
                message_id: None,
                body: b"no id".to_vec(),
            },
        );
        let index = InMemoryIndex::new();
        let mut session = session(&server);

        let outcome = scan_folder(session.as_mut(), &index, "INBOX", 0).unwrap();
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].message_id, None);
    }
}
