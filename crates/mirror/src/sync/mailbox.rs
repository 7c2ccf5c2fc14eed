//! Mailbox synchronization run
//!
//! One run mirrors one configured mailbox: connect, log in, pick folders,
//! then for every folder scan for new mail, deliver it and move the cursor.
//! The cursor of a folder only advances once every candidate of that folder
//! has been delivered, so an interrupted run is picked up where it stopped
//! on the next one.

use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use log::{debug, error, info, warn};

use super::deliver::{Deliverer, Delivery};
use super::folders::select_folders;
use super::scan::scan_folder;
use crate::config::MailboxConfig;
use crate::error::{ErrorScope, Result, SyncError};
use crate::index::MessageIndex;
use crate::models::Cursor;
use crate::session::{Connector, RemoteSession};
use crate::storage::{CursorStore, Maildir, UniqueNames};

/// Options for a synchronization run
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Keep going with the next folder when one fails with a folder-scoped
    /// error; the run then ends with [`SyncError::FoldersFailed`]
    pub continue_on_folder_error: bool,
}

/// Where a run currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Connecting,
    Authenticating,
    SelectingFolders,
    Scanning(String),
    Delivering(String),
    AdvancingCursor(String),
    LoggingOut,
    Done,
    Failed(String),
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Authenticating => f.write_str("authenticating"),
            Self::SelectingFolders => f.write_str("selecting folders"),
            Self::Scanning(folder) => write!(f, "scanning {}", folder),
            Self::Delivering(folder) => write!(f, "delivering {}", folder),
            Self::AdvancingCursor(folder) => write!(f, "advancing cursor of {}", folder),
            Self::LoggingOut => f.write_str("logging out"),
            Self::Done => f.write_str("done"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Statistics for one folder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderReport {
    pub folder: String,
    /// Envelopes above the cursor
    pub scanned: usize,
    /// Skipped because the index already had them
    pub already_seen: usize,
    /// Files written to the local store
    pub delivered: usize,
    /// Delivered files whose Message-ID turned out to be indexed already
    pub duplicates: usize,
    pub cursor_before: u32,
    pub cursor_after: u32,
}

/// Statistics from a synchronization run
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub mailbox: String,
    pub folders: Vec<FolderReport>,
    /// Duration of the run
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn delivered(&self) -> usize {
        self.folders.iter().map(|f| f.delivered).sum()
    }

    pub fn already_seen(&self) -> usize {
        self.folders.iter().map(|f| f.already_seen).sum()
    }

    pub fn duplicates(&self) -> usize {
        self.folders.iter().map(|f| f.duplicates).sum()
    }

    /// Report for `folder`, if it was synchronized
    pub fn folder(&self, folder: &str) -> Option<&FolderReport> {
        self.folders.iter().find(|f| f.folder == folder)
    }
}

/// Synchronizes one remote mailbox into its local root
pub struct MailboxSync<'a> {
    name: String,
    config: &'a MailboxConfig,
    maildir: Maildir,
    cursor_store: CursorStore,
    index: &'a dyn MessageIndex,
    options: SyncOptions,
    phase: RefCell<SyncPhase>,
}

impl<'a> MailboxSync<'a> {
    /// # Arguments
    /// * `name` - Mailbox name, used in logs and reports
    /// * `config` - Mailbox settings
    /// * `root` - Local root the mailbox mirrors into
    /// * `index` - Message index shared by all mailboxes
    pub fn new(
        name: impl Into<String>,
        config: &'a MailboxConfig,
        root: impl Into<PathBuf>,
        index: &'a dyn MessageIndex,
    ) -> Self {
        let root = root.into();
        Self {
            name: name.into(),
            config,
            cursor_store: CursorStore::in_root(&root),
            maildir: Maildir::new(root),
            index,
            options: SyncOptions::default(),
            phase: RefCell::new(SyncPhase::Idle),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a specific filename generator for delivered files
    pub fn with_names(mut self, names: UniqueNames) -> Self {
        self.maildir = Maildir::with_names(self.maildir.root().to_path_buf(), names);
        self
    }

    /// Phase the last run reached
    pub fn phase(&self) -> SyncPhase {
        self.phase.borrow().clone()
    }

    fn enter(&self, phase: SyncPhase) {
        debug!("[{}] {}", self.name, phase);
        *self.phase.borrow_mut() = phase;
    }

    fn fail(&self, err: &SyncError) {
        error!("[{}] sync failed: {}", self.name, err);
        *self.phase.borrow_mut() = SyncPhase::Failed(err.to_string());
    }

    /// Run a full synchronization of the mailbox.
    ///
    /// On failure, cursor positions reached by folders that completed are
    /// still persisted and the session is logged out.
    pub fn run(&self, connector: &dyn Connector) -> Result<SyncReport> {
        let start = Instant::now();
        let mut report = SyncReport {
            mailbox: self.name.clone(),
            ..Default::default()
        };

        let result = self.run_inner(connector, &mut report);
        report.duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                self.enter(SyncPhase::Done);
                info!(
                    "[{}] sync complete: {} delivered, {} already seen, {} duplicates in {}ms",
                    self.name,
                    report.delivered(),
                    report.already_seen(),
                    report.duplicates(),
                    report.duration_ms
                );
                Ok(report)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn run_inner(&self, connector: &dyn Connector, report: &mut SyncReport) -> Result<()> {
        // 1. Validate before touching the network
        self.config.validate()?;
        let mut cursor = self.cursor_store.load()?;

        // 2. Connect and log in
        self.enter(SyncPhase::Connecting);
        let endpoint = self.config.endpoint();
        let mut session = connector.connect(&endpoint).map_err(SyncError::Connect)?;

        self.enter(SyncPhase::Authenticating);
        if let Err(e) = session.login(&self.config.username, &self.config.password) {
            self.logout(session.as_mut());
            return Err(SyncError::Auth(e));
        }
        info!("[{}] logged in to {}", self.name, endpoint);

        // 3. Mirror folders
        let outcome = self.sync_folders(session.as_mut(), &mut cursor, report);

        // 4. Controlled shutdown, whatever happened
        self.enter(SyncPhase::LoggingOut);
        self.logout(session.as_mut());
        let saved = self.cursor_store.save(&cursor);

        match (outcome, saved) {
            (Err(e), Err(save_err)) => {
                error!("[{}] could not save cursor: {}", self.name, save_err);
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    fn logout(&self, session: &mut dyn RemoteSession) {
        if let Err(e) = session.logout() {
            warn!("[{}] logout failed: {}", self.name, e);
        }
    }

    fn sync_folders(
        &self,
        session: &mut dyn RemoteSession,
        cursor: &mut Cursor,
        report: &mut SyncReport,
    ) -> Result<()> {
        self.enter(SyncPhase::SelectingFolders);
        let remote = {
            let mut listing = session.list_folders()?;
            let names: Vec<String> = listing.by_ref().collect();
            listing.finish()?;
            names
        };
        let folders = select_folders(
            &remote,
            &self.config.folders.include,
            &self.config.folders.exclude,
        )?;
        debug!("[{}] folders to sync: {:?}", self.name, folders);

        let mut failures = Vec::new();
        for folder in &folders {
            match self.sync_folder(session, folder, cursor) {
                Ok(folder_report) => report.folders.push(folder_report),
                Err(e) if self.options.continue_on_folder_error && e.scope() != ErrorScope::Run => {
                    warn!("[{}] skipping folder {}: {}", self.name, folder, e);
                    failures.push((folder.clone(), e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SyncError::FoldersFailed(failures))
        }
    }

    fn sync_folder(
        &self,
        session: &mut dyn RemoteSession,
        folder: &str,
        cursor: &mut Cursor,
    ) -> Result<FolderReport> {
        let before = cursor.get(folder);
        let mut folder_report = FolderReport {
            folder: folder.to_string(),
            cursor_before: before,
            cursor_after: before,
            ..Default::default()
        };

        let info = session.select_folder(folder)?;
        if info.exists == 0 {
            debug!("[{}] {} is empty", self.name, folder);
            return Ok(folder_report);
        }

        self.enter(SyncPhase::Scanning(folder.to_string()));
        let scan = scan_folder(session, self.index, folder, before)?;
        folder_report.scanned = scan.scanned();
        folder_report.already_seen = scan.already_seen;

        self.enter(SyncPhase::Delivering(folder.to_string()));
        let policy = self.config.tag_policy(folder);
        let deliverer = Deliverer::new(&self.maildir, self.index);
        for candidate in &scan.candidates {
            folder_report.delivered += 1;
            if deliverer.deliver(session, candidate, &policy)? == Delivery::Duplicate {
                folder_report.duplicates += 1;
            }
        }

        if let Some(max_seen) = scan.max_seen {
            self.enter(SyncPhase::AdvancingCursor(folder.to_string()));
            cursor.advance(folder, max_seen);
        }
        folder_report.cursor_after = cursor.get(folder);

        info!(
            "[{}] {}: {} new, {} already seen, cursor {} -> {}",
            self.name,
            folder,
            folder_report.delivered,
            folder_report.already_seen,
            folder_report.cursor_before,
            folder_report.cursor_after
        );
        Ok(folder_report)
    }
}
