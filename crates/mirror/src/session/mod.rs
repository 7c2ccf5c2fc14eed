//! Remote mail session abstraction
//!
//! The synchronization engine talks to the server exclusively through the
//! [`Connector`] and [`RemoteSession`] traits. Listing and fetch results
//! are exposed as [`ItemStream`]s: blocking, finite, non-restartable
//! sequences whose terminal status is checked once they are exhausted.
//!
//! Two implementations are provided:
//! - [`ImapConnector`] speaks IMAP through the `imap` crate
//! - [`InMemoryServer`] is a scriptable fake used by tests

mod imap_session;
mod memory;

use std::fmt;
use std::io::{self, Read};

use thiserror::Error;

pub use imap_session::ImapConnector;
pub use memory::{InMemoryServer, StoredMessage};

/// Largest UID the protocol allows; used as the explicit upper bound of
/// "everything newer than the cursor" ranges
pub const MAX_UID: u32 = u32::MAX;

/// Errors reported by a remote session
#[derive(Debug, Error)]
pub enum SessionError {
    /// Transport could not be established
    #[error("connection failed: {0}")]
    Connection(String),

    /// Credentials were rejected
    #[error("authentication rejected: {0}")]
    Authentication(String),

    /// The requested folder does not exist
    #[error("no such folder: {0}")]
    NoSuchFolder(String),

    /// The server answered with something unusable
    #[error("malformed server response: {0}")]
    Protocol(String),

    /// An operation that requires a logged-in session was attempted
    #[error("session is not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Transport security for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Cleartext for the whole session
    Plain,
    /// Implicit TLS from the first byte
    Tls,
    /// Cleartext greeting upgraded with STARTTLS
    StartTls,
}

/// Where and how to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub server: String,
    pub port: u16,
    pub tls: TlsMode,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({:?})", self.server, self.port, self.tls)
    }
}

/// Metadata returned when a folder is selected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderInfo {
    /// Number of messages in the folder
    pub exists: u32,
    /// UIDVALIDITY of the folder, when reported
    pub uid_validity: Option<u32>,
}

/// Inclusive UID range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UidRange {
    pub start: u32,
    pub end: u32,
}

impl UidRange {
    /// Every UID strictly greater than `cursor`, bounded by [`MAX_UID`].
    ///
    /// Returns `None` when nothing can be newer than the cursor.
    pub fn after(cursor: u32) -> Option<Self> {
        cursor.checked_add(1).map(|start| Self {
            start,
            end: MAX_UID,
        })
    }

    pub fn contains(&self, uid: u32) -> bool {
        self.start <= uid && uid <= self.end
    }
}

impl fmt::Display for UidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// Lightweight message metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Raw `Message-ID` value, possibly bracketed or quoted
    pub message_id: Option<String>,
    pub subject: Option<String>,
}

/// One entry of an envelope fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedEnvelope {
    pub uid: Option<u32>,
    pub envelope: Option<Envelope>,
}

/// Blocking sequence of results pushed by the server
///
/// Iterating yields items until the server finishes or fails; a failure
/// ends the sequence and is reported by [`ItemStream::finish`].
pub struct ItemStream<'a, T> {
    inner: Box<dyn Iterator<Item = Result<T, SessionError>> + 'a>,
    failure: Option<SessionError>,
    done: bool,
}

impl<'a, T: 'a> ItemStream<'a, T> {
    /// Build a stream from raw results; the first `Err` terminates it
    pub fn new<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<T, SessionError>>,
        I::IntoIter: 'a,
    {
        Self {
            inner: Box::new(results.into_iter()),
            failure: None,
            done: false,
        }
    }

    /// Build a stream that yields `items` and then succeeds
    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'a,
    {
        Self::new(items.into_iter().map(Ok))
    }

    /// Drain what is left and return the terminal status
    pub fn finish(mut self) -> Result<(), SessionError> {
        for _ in self.by_ref() {}
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<T> Iterator for ItemStream<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok(item)) => Some(item),
            Some(Err(err)) => {
                self.failure = Some(err);
                self.done = true;
                None
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// Opens sessions against a remote server
pub trait Connector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn RemoteSession>, SessionError>;
}

/// An open connection to a remote mail server
pub trait RemoteSession: Send {
    fn login(&mut self, username: &str, password: &str) -> Result<(), SessionError>;

    /// Names of every folder on the server
    fn list_folders(&mut self) -> Result<ItemStream<'_, String>, SessionError>;

    /// Make `name` the current folder
    fn select_folder(&mut self, name: &str) -> Result<FolderInfo, SessionError>;

    /// Envelopes of the current folder's messages with UIDs in `range`
    fn fetch_envelopes(
        &mut self,
        range: UidRange,
    ) -> Result<ItemStream<'_, FetchedEnvelope>, SessionError>;

    /// Full raw body of a message in the current folder, `None` if the
    /// server returned nothing for it
    fn fetch_body(&mut self, uid: u32) -> Result<Option<Box<dyn Read + '_>>, SessionError>;

    fn logout(&mut self) -> Result<(), SessionError>;
}
