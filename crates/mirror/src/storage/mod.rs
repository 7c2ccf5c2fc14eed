//! Local storage for mirrored mail
//!
//! - [`Maildir`] writes message bodies with a tmp → cur rename commit
//! - [`CursorStore`] persists the per-folder cursor atomically
//! - [`UniqueNames`] produces collision-free filenames

mod cursor_store;
mod maildir;
mod naming;

pub use cursor_store::{CURSOR_FILE, CursorStore};
pub use maildir::{CUR_DIR, Maildir, TMP_DIR};
pub use naming::{AtomicSequence, Clock, FixedClock, Sequence, SystemClock, UniqueNames};

pub(crate) use maildir::hash_reader;
