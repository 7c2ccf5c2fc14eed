//! In-memory remote server
//!
//! Scriptable stand-in for an IMAP server, used by tests and for dry runs.
//! Every session opened through the [`Connector`] impl shares the same
//! state, so a test can add mail between runs and inspect what was asked.

use std::collections::{BTreeMap, HashSet};
use std::io::{self, Read};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    Connector, Endpoint, Envelope, FetchedEnvelope, FolderInfo, ItemStream, RemoteSession,
    SessionError, UidRange,
};

/// A message stored on the fake server
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub uid: u32,
    pub message_id: Option<String>,
    pub body: Vec<u8>,
}

impl StoredMessage {
    pub fn new(uid: u32, message_id: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            uid,
            message_id: Some(message_id.to_string()),
            body: body.into(),
        }
    }
}

#[derive(Default)]
struct ServerState {
    folders: BTreeMap<String, Vec<StoredMessage>>,
    credentials: Option<(String, String)>,
    refuse_connections: bool,
    missing_envelopes: HashSet<(String, u32)>,
    missing_bodies: HashSet<(String, u32)>,
    broken_bodies: HashSet<(String, u32)>,
    envelope_failure: Option<String>,
    requested_ranges: Vec<(String, UidRange)>,
    fetched_bodies: Vec<(String, u32)>,
    logouts: usize,
}

/// Shared handle to the fake server state
#[derive(Clone, Default)]
pub struct InMemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl InMemoryServer {
    /// Create a server that accepts any credentials
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        // A panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Only accept this username/password pair
    pub fn require_credentials(&self, username: &str, password: &str) {
        self.state().credentials = Some((username.to_string(), password.to_string()));
    }

    /// Make every connection attempt fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.state().refuse_connections = refuse;
    }

    /// Create an empty folder
    pub fn add_folder(&self, folder: &str) {
        self.state().folders.entry(folder.to_string()).or_default();
    }

    /// Store a message, creating the folder if needed
    pub fn add_message(&self, folder: &str, message: StoredMessage) {
        let mut state = self.state();
        let messages = state.folders.entry(folder.to_string()).or_default();
        messages.push(message);
        messages.sort_by_key(|m| m.uid);
    }

    /// Answer envelope fetches for this message without envelope data
    pub fn drop_envelope(&self, folder: &str, uid: u32) {
        self.state().missing_envelopes.insert((folder.to_string(), uid));
    }

    /// Answer body fetches for this message with nothing
    pub fn drop_body(&self, folder: &str, uid: u32) {
        self.state().missing_bodies.insert((folder.to_string(), uid));
    }

    /// Cut the body stream of this message in half with an I/O error
    pub fn break_body(&self, folder: &str, uid: u32) {
        self.state().broken_bodies.insert((folder.to_string(), uid));
    }

    /// Stop serving bodies with errors
    pub fn heal(&self) {
        let mut state = self.state();
        state.missing_envelopes.clear();
        state.missing_bodies.clear();
        state.broken_bodies.clear();
        state.envelope_failure = None;
    }

    /// End envelope streams with a terminal error after their items
    pub fn fail_envelope_streams(&self, reason: &str) {
        self.state().envelope_failure = Some(reason.to_string());
    }

    /// Ranges requested through envelope fetches, in order
    pub fn requested_ranges(&self) -> Vec<(String, UidRange)> {
        self.state().requested_ranges.clone()
    }

    /// Bodies fetched so far, in order
    pub fn fetched_bodies(&self) -> Vec<(String, u32)> {
        self.state().fetched_bodies.clone()
    }

    pub fn logouts(&self) -> usize {
        self.state().logouts
    }
}

impl Connector for InMemoryServer {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn RemoteSession>, SessionError> {
        if self.state().refuse_connections {
            return Err(SessionError::Connection(format!(
                "connection to {} refused",
                endpoint
            )));
        }
        Ok(Box::new(InMemorySession {
            server: self.clone(),
            authenticated: false,
            selected: None,
        }))
    }
}

struct InMemorySession {
    server: InMemoryServer,
    authenticated: bool,
    selected: Option<String>,
}

impl InMemorySession {
    fn ensure_authenticated(&self) -> Result<(), SessionError> {
        if self.authenticated {
            Ok(())
        } else {
            Err(SessionError::NotAuthenticated)
        }
    }

    fn selected(&self) -> Result<&str, SessionError> {
        self.selected
            .as_deref()
            .ok_or_else(|| SessionError::Protocol("no folder selected".to_string()))
    }
}

impl RemoteSession for InMemorySession {
    fn login(&mut self, username: &str, password: &str) -> Result<(), SessionError> {
        if let Some((user, pass)) = &self.server.state().credentials
            && (user != username || pass != password)
        {
            return Err(SessionError::Authentication(format!(
                "invalid credentials for {}",
                username
            )));
        }
        self.authenticated = true;
        Ok(())
    }

    fn list_folders(&mut self) -> Result<ItemStream<'_, String>, SessionError> {
        self.ensure_authenticated()?;
        let names: Vec<String> = self.server.state().folders.keys().cloned().collect();
        Ok(ItemStream::from_items(names))
    }

    fn select_folder(&mut self, name: &str) -> Result<FolderInfo, SessionError> {
        self.ensure_authenticated()?;
        let exists = match self.server.state().folders.get(name) {
            Some(messages) => messages.len() as u32,
            None => return Err(SessionError::NoSuchFolder(name.to_string())),
        };
        self.selected = Some(name.to_string());
        Ok(FolderInfo {
            exists,
            uid_validity: Some(1),
        })
    }

    fn fetch_envelopes(
        &mut self,
        range: UidRange,
    ) -> Result<ItemStream<'_, FetchedEnvelope>, SessionError> {
        self.ensure_authenticated()?;
        let folder = self.selected()?.to_string();
        let mut state = self.server.state();
        state.requested_ranges.push((folder.clone(), range));

        let mut results: Vec<Result<FetchedEnvelope, SessionError>> = state
            .folders
            .get(&folder)
            .into_iter()
            .flatten()
            .filter(|m| range.contains(m.uid))
            .map(|m| {
                let envelope = if state.missing_envelopes.contains(&(folder.clone(), m.uid)) {
                    None
                } else {
                    Some(Envelope {
                        message_id: m.message_id.clone(),
                        subject: None,
                    })
                };
                Ok(FetchedEnvelope {
                    uid: Some(m.uid),
                    envelope,
                })
            })
            .collect();

        if let Some(reason) = &state.envelope_failure {
            results.push(Err(SessionError::Protocol(reason.clone())));
        }

        Ok(ItemStream::new(results))
    }

    fn fetch_body(&mut self, uid: u32) -> Result<Option<Box<dyn Read + '_>>, SessionError> {
        self.ensure_authenticated()?;
        let folder = self.selected()?.to_string();
        let mut state = self.server.state();
        state.fetched_bodies.push((folder.clone(), uid));

        let key = (folder.clone(), uid);
        if state.missing_bodies.contains(&key) {
            return Ok(None);
        }
        let body = state
            .folders
            .get(&folder)
            .and_then(|messages| messages.iter().find(|m| m.uid == uid))
            .map(|m| m.body.clone());

        Ok(body.map(|body| -> Box<dyn Read> {
            if state.broken_bodies.contains(&key) {
                Box::new(BrokenReader::new(body))
            } else {
                Box::new(io::Cursor::new(body))
            }
        }))
    }

    fn logout(&mut self) -> Result<(), SessionError> {
        self.server.state().logouts += 1;
        self.authenticated = false;
        self.selected = None;
        Ok(())
    }
}

/// Yields the first half of a body, then fails like a dropped connection
struct BrokenReader {
    data: io::Cursor<Vec<u8>>,
}

impl BrokenReader {
    fn new(mut body: Vec<u8>) -> Self {
        body.truncate(body.len() / 2);
        Self {
            data: io::Cursor::new(body),
        }
    }
}

impl Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.data.read(buf)? {
            0 => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset while reading body",
            )),
            n => Ok(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TlsMode;

    fn endpoint() -> Endpoint {
        Endpoint {
            server: "mail.example.com".into(),
            port: 993,
            tls: TlsMode::Tls,
        }
    }

    #[test]
    fn test_login_checks_credentials() {
        let server = InMemoryServer::new();
        server.require_credentials("alice", "secret");

        let mut session = server.connect(&endpoint()).unwrap();
        assert!(matches!(
            session.login("alice", "wrong"),
            Err(SessionError::Authentication(_))
        ));
        assert!(session.login("alice", "secret").is_ok());
    }

    #[test]
    fn test_requires_login() {
        let server = InMemoryServer::new();
        let mut session = server.connect(&endpoint()).unwrap();
        assert!(matches!(
            session.list_folders(),
            Err(SessionError::NotAuthenticated)
        ));
    }

    #[test]
    fn test_envelope_range_is_respected() {
        let server = InMemoryServer::new();
        for uid in 1..=5 {
            server.add_message("INBOX", StoredMessage::new(uid, &format!("<m{}@x>", uid), "body"));
        }

        let mut session = server.connect(&endpoint()).unwrap();
        session.login("a", "b").unwrap();
        assert_eq!(session.select_folder("INBOX").unwrap().exists, 5);

        let uids: Vec<u32> = session
            .fetch_envelopes(UidRange::after(3).unwrap())
            .unwrap()
            .filter_map(|e| e.uid)
            .collect();
        assert_eq!(uids, vec![4, 5]);
        assert_eq!(server.requested_ranges().len(), 1);
    }

    #[test]
    fn test_broken_body_fails_midway() {
        let server = InMemoryServer::new();
        server.add_message("INBOX", StoredMessage::new(1, "<a@x>", "0123456789"));
        server.break_body("INBOX", 1);

        let mut session = server.connect(&endpoint()).unwrap();
        session.login("a", "b").unwrap();
        session.select_folder("INBOX").unwrap();

        let mut reader = session.fetch_body(1).unwrap().unwrap();
        let mut buf = Vec::new();
        let err = reader.read_to_end(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(buf, b"01234");
    }

    #[test]
    fn test_refused_connection() {
        let server = InMemoryServer::new();
        server.refuse_connections(true);
        assert!(matches!(
            server.connect(&endpoint()),
            Err(SessionError::Connection(_))
        ));
    }
}
