//! Domain models for the mirror pipeline

mod cursor;
mod message;
mod tags;

pub use cursor::Cursor;
pub use message::{CandidateMessage, DeliveredFile, IndexUpdate, MessageId};
pub use tags::{DEFAULT_TAGS, TagAction, TagOp, TagPolicy};
