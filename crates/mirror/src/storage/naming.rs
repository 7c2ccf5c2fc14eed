//! Collision-free local filenames
//!
//! Names follow the classic maildir recipe of time, counter, process and
//! host, with the remote UID appended:
//! `{unix-timestamp}_{counter}.{pid}.{hostname},U={uid}`.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use gethostname::gethostname;

/// Source of per-process unique counter values
pub trait Sequence: Send + Sync {
    fn next(&self) -> u64;
}

/// Process-wide counter backed by an atomic fetch-add
#[derive(Debug, Default)]
pub struct AtomicSequence {
    counter: AtomicU64,
}

impl AtomicSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting from `start`
    pub fn starting_at(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
        }
    }
}

impl Sequence for AtomicSequence {
    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }
}

/// Wall clock in whole seconds since the epoch
pub trait Clock: Send + Sync {
    fn unix_seconds(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Clock frozen at a given instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn unix_seconds(&self) -> i64 {
        self.0
    }
}

/// Generates unique filename fragments for delivered messages
pub struct UniqueNames {
    pid: u32,
    hostname: String,
    sequence: Box<dyn Sequence>,
    clock: Box<dyn Clock>,
}

impl Default for UniqueNames {
    fn default() -> Self {
        Self::new()
    }
}

impl UniqueNames {
    /// Names for this process and host, with a fresh counter
    pub fn new() -> Self {
        Self::with_parts(
            std::process::id(),
            local_hostname(),
            Box::new(AtomicSequence::new()),
            Box::new(SystemClock),
        )
    }

    pub fn with_parts(
        pid: u32,
        hostname: impl Into<String>,
        sequence: Box<dyn Sequence>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            pid,
            hostname: sanitize_hostname(&hostname.into()),
            sequence,
            clock,
        }
    }

    /// Fragment for a message with the given remote UID
    pub fn next(&self, uid: u32) -> String {
        let counter = self.sequence.next();
        format!(
            "{}_{}.{}.{},U={}",
            self.clock.unix_seconds(),
            counter,
            self.pid,
            self.hostname,
            uid
        )
    }
}

fn local_hostname() -> String {
    gethostname()
        .into_string()
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// `/` would create a path and `:` clashes with maildir info separators
fn sanitize_hostname(hostname: &str) -> String {
    hostname.replace('/', "\\057").replace(':', "\\072")
}
