//! Mirror configuration
//!
//! Loaded from the first file found among:
//! 1. An explicitly given path
//! 2. `~/.config/mr/config.json`
//! 3. `./config.json`
//!
//! ```json
//! {
//!   "maildir": "$HOME/.mail",
//!   "mailboxes": {
//!     "work": {
//!       "server": "imap.example.com",
//!       "username": "me",
//!       "password": "secret",
//!       "use_tls": true,
//!       "folders": { "include": [], "exclude": ["Spam"] },
//!       "folder_tags": { "Lists/rust": "rust,-inbox" }
//!     }
//!   }
//! }
//! ```

use anyhow::{Context, Result, bail};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::index::check_tag;
use crate::models::TagPolicy;
use crate::session::{Endpoint, TlsMode};

/// Config filename in the mr config directory
pub const CONFIG_FILE: &str = "config.json";

/// Default maildir root
pub const DEFAULT_MAILDIR: &str = "$HOME/.mail";

/// Default IMAP ports
pub const IMAP_PORT: u16 = 143;
pub const IMAPS_PORT: u16 = 993;

fn default_maildir() -> String {
    DEFAULT_MAILDIR.to_string()
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the local store, before path expansion
    #[serde(default = "default_maildir")]
    pub maildir: String,

    /// Mailboxes to mirror, by name
    #[serde(default)]
    pub mailboxes: BTreeMap<String, MailboxConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            maildir: default_maildir(),
            mailboxes: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default locations
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::find().context("No configuration file found")?,
        };
        debug!("Loading configuration from {}", path.display());
        config::load_json_file(&path)
    }

    /// First existing config file among the default locations
    pub fn find() -> Option<PathBuf> {
        config::config_path(CONFIG_FILE)
            .into_iter()
            .chain(std::iter::once(PathBuf::from(CONFIG_FILE)))
            .find(|p| p.is_file())
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse configuration JSON")
    }

    /// Expanded, absolute maildir root
    pub fn maildir_path(&self) -> Result<PathBuf> {
        config::expand_path(&self.maildir)
            .with_context(|| format!("Invalid maildir setting: {}", self.maildir))
    }

    /// Directory a mailbox mirrors into
    pub fn mailbox_root(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            bail!("Invalid mailbox name: {:?}", name);
        }
        Ok(self.maildir_path()?.join(name))
    }
}

/// Folder filter rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Folders {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Settings of one remote mailbox
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailboxConfig {
    #[serde(default)]
    pub server: String,

    /// 0 selects the default for the transport
    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub use_tls: bool,

    #[serde(default)]
    pub use_starttls: bool,

    #[serde(default)]
    pub folders: Folders,

    /// Folder name to comma-separated tag policy
    #[serde(default)]
    pub folder_tags: HashMap<String, String>,
}

impl MailboxConfig {
    /// Check the settings required to connect are present
    pub fn validate(&self) -> Result<(), SyncError> {
        let missing: Vec<&str> = [
            ("server", &self.server),
            ("username", &self.username),
            ("password", &self.password),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(SyncError::Config(format!(
                "missing {}",
                missing.join(", ")
            )));
        }
        if self.use_tls && self.use_starttls {
            return Err(SyncError::Config(
                "use_tls and use_starttls are mutually exclusive".to_string(),
            ));
        }
        for (folder, list) in &self.folder_tags {
            for action in TagPolicy::parse(list).actions() {
                check_tag(&action.tag).map_err(|_| {
                    SyncError::Config(format!(
                        "invalid tag {:?} in folder_tags for {:?}",
                        action.tag, folder
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Configured port, or the transport default when unset
    pub fn effective_port(&self) -> u16 {
        match self.port {
            0 if self.use_tls => IMAPS_PORT,
            0 => IMAP_PORT,
            port => port,
        }
    }

    pub fn tls_mode(&self) -> TlsMode {
        if self.use_tls {
            TlsMode::Tls
        } else if self.use_starttls {
            TlsMode::StartTls
        } else {
            TlsMode::Plain
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            server: self.server.clone(),
            port: self.effective_port(),
            tls: self.tls_mode(),
        }
    }

    /// Tag policy configured for `folder`, empty when none
    pub fn tag_policy(&self, folder: &str) -> TagPolicy {
        self.folder_tags
            .get(folder)
            .map(|list| TagPolicy::parse(list))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TagAction;
    use tempfile::TempDir;

    fn mailbox() -> MailboxConfig {
        MailboxConfig {
            server: "imap.example.com".into(),
            username: "me".into(),
            password: "secret".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "maildir": "/var/mail/me",
            "mailboxes": {
                "work": {
                    "server": "imap.example.com",
                    "port": 1993,
                    "username": "me",
                    "password": "secret",
                    "use_tls": true,
                    "folders": { "include": ["INBOX"], "exclude": ["Spam"] },
                    "folder_tags": { "INBOX": "work,-unread" }
                }
            }
        }"#;

        let config = Config::from_json(json).unwrap();
        let work = &config.mailboxes["work"];
        assert_eq!(work.effective_port(), 1993);
        assert_eq!(work.tls_mode(), TlsMode::Tls);
        assert_eq!(work.folders.include, vec!["INBOX"]);
        assert_eq!(work.folders.exclude, vec!["Spam"]);
        assert_eq!(
            config.mailbox_root("work").unwrap(),
            PathBuf::from("/var/mail/me/work")
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_json(r#"{"mailboxes": {"m": {}}}"#).unwrap();
        assert_eq!(config.maildir, "$HOME/.mail");
        let m = &config.mailboxes["m"];
        assert_eq!(m.effective_port(), 143);
        assert_eq!(m.tls_mode(), TlsMode::Plain);
        assert!(m.folders.include.is_empty());
    }

    #[test]
    fn test_default_tls_port() {
        let m = MailboxConfig {
            use_tls: true,
            ..mailbox()
        };
        assert_eq!(m.effective_port(), 993);
        assert_eq!(m.endpoint().port, 993);
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        assert!(mailbox().validate().is_ok());

        let err = MailboxConfig {
            server: String::new(),
            password: " ".into(),
            ..mailbox()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, SyncError::Config(msg) if msg == "missing server, password"));
    }

    #[test]
    fn test_validate_rejects_both_tls_modes() {
        let m = MailboxConfig {
            use_tls: true,
            use_starttls: true,
            ..mailbox()
        };
        assert!(matches!(m.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_folder_tags() {
        let mut m = mailbox();
        m.folder_tags.insert("INBOX".into(), "project,-unread".into());
        assert!(m.validate().is_ok());

        m.folder_tags.insert("Work".into(), "project,my tag".into());
        let err = m.validate().unwrap_err();
        assert!(matches!(err, SyncError::Config(msg) if msg.contains("my tag")));
    }

    #[test]
    fn test_tag_policy_lookup() {
        let mut m = mailbox();
        m.folder_tags
            .insert("Work".into(), "project,-unread".into());

        assert_eq!(
            m.tag_policy("Work").actions(),
            &[TagAction::add("project"), TagAction::remove("unread")]
        );
        assert!(m.tag_policy("INBOX").is_empty());
    }

    #[test]
    fn test_invalid_mailbox_names() {
        let config = Config {
            maildir: "/m".into(),
            ..Default::default()
        };
        assert!(config.mailbox_root("").is_err());
        assert!(config.mailbox_root("../x").is_err());
        assert!(config.mailbox_root(".hidden").is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mr.json");
        std::fs::write(&path, r#"{"maildir": "/tmp/mail"}"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.maildir, "/tmp/mail");
        assert!(config.mailboxes.is_empty());
    }

    #[test]
    fn test_load_missing_path_fails() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.json"))).is_err());
    }
}
