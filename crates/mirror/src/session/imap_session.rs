//! IMAP implementation of the remote session traits

use std::io::{self, Read, Write};
use std::mem;
use std::net::TcpStream;

use imap::types::{Fetch, ZeroCopy};
use log::{debug, warn};

use super::{
    Connector, Endpoint, Envelope, FetchedEnvelope, FolderInfo, ItemStream, RemoteSession,
    SessionError, TlsMode, UidRange,
};

/// Opens IMAP sessions over TCP, optionally wrapped in TLS
#[derive(Debug, Clone, Copy, Default)]
pub struct ImapConnector;

impl ImapConnector {
    pub fn new() -> Self {
        Self
    }
}

fn tls_connector() -> Result<native_tls::TlsConnector, SessionError> {
    native_tls::TlsConnector::builder()
        .build()
        .map_err(|e| SessionError::Connection(format!("TLS setup failed: {}", e)))
}

fn connection_error(endpoint: &Endpoint, err: imap::Error) -> SessionError {
    SessionError::Connection(format!("{}: {}", endpoint, err))
}

impl Connector for ImapConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn RemoteSession>, SessionError> {
        let addr = (endpoint.server.as_str(), endpoint.port);
        debug!("Connecting to {}", endpoint);

        match endpoint.tls {
            TlsMode::Tls => {
                let tls = tls_connector()?;
                let client = imap::connect(addr, &endpoint.server, &tls)
                    .map_err(|e| connection_error(endpoint, e))?;
                Ok(Box::new(ImapSession::new(client)))
            }
            TlsMode::StartTls => {
                let tls = tls_connector()?;
                let client = imap::connect_starttls(addr, &endpoint.server, &tls)
                    .map_err(|e| connection_error(endpoint, e))?;
                Ok(Box::new(ImapSession::new(client)))
            }
            TlsMode::Plain => {
                let stream = TcpStream::connect(addr)
                    .map_err(|e| SessionError::Connection(format!("{}: {}", endpoint, e)))?;
                let mut client = imap::Client::new(stream);
                client
                    .read_greeting()
                    .map_err(|e| connection_error(endpoint, e))?;
                Ok(Box::new(ImapSession::new(client)))
            }
        }
    }
}

enum State<T: Read + Write> {
    Connected(imap::Client<T>),
    Authenticated(imap::Session<T>),
    Closed,
}

/// A live IMAP connection, before or after login
struct ImapSession<T: Read + Write> {
    state: State<T>,
}

impl<T: Read + Write> ImapSession<T> {
    fn new(client: imap::Client<T>) -> Self {
        Self {
            state: State::Connected(client),
        }
    }

    fn session(&mut self) -> Result<&mut imap::Session<T>, SessionError> {
        match &mut self.state {
            State::Authenticated(session) => Ok(session),
            _ => Err(SessionError::NotAuthenticated),
        }
    }
}

/// Turn an `imap` error into a session error
fn session_error(err: imap::Error) -> SessionError {
    match err {
        imap::Error::Io(e) => SessionError::Io(e),
        imap::Error::No(msg) | imap::Error::Bad(msg) => SessionError::Protocol(msg),
        imap::Error::ConnectionLost => {
            SessionError::Io(io::Error::new(io::ErrorKind::ConnectionAborted, "connection lost"))
        }
        other => SessionError::Protocol(other.to_string()),
    }
}

fn lossy(bytes: Option<&[u8]>) -> Option<String> {
    bytes.map(|b| String::from_utf8_lossy(b).into_owned())
}

impl<T: Read + Write + Send> RemoteSession for ImapSession<T> {
    fn login(&mut self, username: &str, password: &str) -> Result<(), SessionError> {
        let client = match mem::replace(&mut self.state, State::Closed) {
            State::Connected(client) => client,
            State::Authenticated(session) => {
                self.state = State::Authenticated(session);
                return Ok(());
            }
            State::Closed => return Err(SessionError::NotAuthenticated),
        };

        match client.login(username, password) {
            Ok(session) => {
                self.state = State::Authenticated(session);
                Ok(())
            }
            Err((err, client)) => {
                self.state = State::Connected(client);
                Err(SessionError::Authentication(err.to_string()))
            }
        }
    }

    fn list_folders(&mut self) -> Result<ItemStream<'_, String>, SessionError> {
        let names = self
            .session()?
            .list(Some(""), Some("*"))
            .map_err(session_error)?;
        let folders: Vec<String> = names.iter().map(|n| n.name().to_string()).collect();
        Ok(ItemStream::from_items(folders))
    }

    fn select_folder(&mut self, name: &str) -> Result<FolderInfo, SessionError> {
        let mailbox = self.session()?.select(name).map_err(|err| match err {
            imap::Error::No(_) => SessionError::NoSuchFolder(name.to_string()),
            other => session_error(other),
        })?;
        Ok(FolderInfo {
            exists: mailbox.exists,
            uid_validity: mailbox.uid_validity,
        })
    }

    fn fetch_envelopes(
        &mut self,
        range: UidRange,
    ) -> Result<ItemStream<'_, FetchedEnvelope>, SessionError> {
        let fetches = self
            .session()?
            .uid_fetch(range.to_string(), "(UID ENVELOPE)")
            .map_err(session_error)?;

        let entries: Vec<FetchedEnvelope> = fetches
            .iter()
            .map(|fetch| FetchedEnvelope {
                uid: fetch.uid,
                envelope: fetch.envelope().map(|env| Envelope {
                    message_id: lossy(env.message_id),
                    subject: lossy(env.subject),
                }),
            })
            .collect();
        Ok(ItemStream::from_items(entries))
    }

    fn fetch_body(&mut self, uid: u32) -> Result<Option<Box<dyn Read + '_>>, SessionError> {
        // imap 2.x reads the whole response before returning; the body is
        // served from that buffer rather than copied again.
        let fetches = self
            .session()?
            .uid_fetch(uid.to_string(), "BODY.PEEK[]")
            .map_err(session_error)?;

        let index = fetches
            .iter()
            .position(|fetch| fetch.uid.is_none_or(|u| u == uid) && fetch.body().is_some());

        Ok(index.map(|index| {
            Box::new(FetchedBody {
                fetches,
                index,
                pos: 0,
            }) as Box<dyn Read>
        }))
    }

    fn logout(&mut self) -> Result<(), SessionError> {
        match mem::replace(&mut self.state, State::Closed) {
            State::Authenticated(mut session) => session.logout().map_err(session_error),
            State::Connected(_) | State::Closed => Ok(()),
        }
    }
}

/// Reader over the body of one fetched message
struct FetchedBody {
    fetches: ZeroCopy<Vec<Fetch>>,
    index: usize,
    pos: usize,
}

impl Read for FetchedBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let body = self
            .fetches
            .get(self.index)
            .and_then(Fetch::body)
            .unwrap_or_default();
        Ok(read_from(body, &mut self.pos, buf))
    }
}

/// Copy from `body` at `pos` into `buf`, advancing `pos`
fn read_from(body: &[u8], pos: &mut usize, buf: &mut [u8]) -> usize {
    let rest = body.get(*pos..).unwrap_or_default();
    let n = rest.len().min(buf.len());
    buf[..n].copy_from_slice(&rest[..n]);
    *pos += n;
    n
}

impl<T: Read + Write> Drop for ImapSession<T> {
    fn drop(&mut self) {
        if let State::Authenticated(session) = &mut self.state
            && let Err(e) = session.logout()
        {
            warn!("Logout on drop failed: {}", e);
        }
    }
}
