//! Sync engine for mirroring remote mailboxes
//!
//! Provides idempotent sync operations that can be safely retried: a rerun
//! after any failure neither loses nor double-indexes a message.

mod deliver;
mod folders;
mod mailbox;
mod reindex;
mod scan;

pub use deliver::{Deliverer, Delivery};
pub use folders::select_folders;
pub use mailbox::{FolderReport, MailboxSync, SyncOptions, SyncPhase, SyncReport};
pub use reindex::{ReindexStats, reindex_since};
pub use scan::{ScanOutcome, scan_folder};
