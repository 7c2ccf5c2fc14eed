//! mr - mirror IMAP mailboxes into a local maildir
//!
//! Loads the configuration, opens the message index and synchronizes every
//! configured mailbox (or the ones named on the command line).

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Parser;
use log::{error, info, warn};
use mirror::{Config, ImapConnector, MailboxSync, SqliteIndex, SyncOptions, reindex_since};

/// Index database filename inside the maildir root
const INDEX_FILE: &str = ".mr-index.db";

/// Last re-index timestamp, in the config directory
const LAST_INDEXED_FILE: &str = "lastindexed.json";

#[derive(Parser, Debug)]
#[command(name = "mr", version, about = "Mirror IMAP mailboxes into a local maildir")]
struct Args {
    /// Configuration file (defaults to ~/.config/mr/config.json, then ./config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only sync these mailboxes
    #[arg(short, long = "mailbox", value_name = "NAME")]
    mailboxes: Vec<String>,

    /// Index files changed since the last re-index before syncing
    #[arg(long)]
    reindex: bool,

    /// Keep syncing the remaining folders when one fails
    #[arg(long)]
    continue_on_error: bool,
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(Args::parse()) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    // Bootstrap config directory
    if let Err(e) = config::init() {
        warn!("Failed to initialize config directory: {}", e);
    }

    let cfg = Config::load(args.config.as_deref())?;
    let maildir = cfg.maildir_path()?;
    fs::create_dir_all(&maildir)
        .with_context(|| format!("Failed to create maildir: {}", maildir.display()))?;

    let index = SqliteIndex::open(maildir.join(INDEX_FILE))
        .with_context(|| format!("Failed to open index in {}", maildir.display()))?;

    if args.reindex {
        reindex(&index, &maildir)?;
    }

    let selected: Vec<&String> = if args.mailboxes.is_empty() {
        cfg.mailboxes.keys().collect()
    } else {
        for name in &args.mailboxes {
            if !cfg.mailboxes.contains_key(name) {
                bail!("Unknown mailbox: {}", name);
            }
        }
        args.mailboxes.iter().collect()
    };
    if selected.is_empty() {
        warn!("No mailboxes configured");
    }

    let options = SyncOptions {
        continue_on_folder_error: args.continue_on_error,
    };
    let connector = ImapConnector::new();
    let mut failed = Vec::new();

    for name in selected {
        let mailbox = &cfg.mailboxes[name];
        let root = cfg.mailbox_root(name)?;
        let sync = MailboxSync::new(name.as_str(), mailbox, root, &index).with_options(options);

        match sync.run(&connector) {
            Ok(report) => info!(
                "{}: {} new message(s) in {} folder(s)",
                name,
                report.delivered(),
                report.folders.len()
            ),
            Err(e) => {
                error!("{}: {}", name, e);
                failed.push(name.clone());
            }
        }
    }

    if !failed.is_empty() {
        bail!("Sync failed for: {}", failed.join(", "));
    }
    Ok(())
}

/// Re-index files changed since the last recorded run, then record this one
fn reindex(index: &SqliteIndex, maildir: &std::path::Path) -> Result<()> {
    let since: Option<DateTime<Utc>> = if config::config_exists(LAST_INDEXED_FILE) {
        Some(config::load_json(LAST_INDEXED_FILE)?)
    } else {
        None
    };

    let now = Utc::now();
    info!("Indexing mail files...");
    let stats = reindex_since(index, maildir, since).context("Could not index maildir")?;
    info!("{} file(s) added to the index", stats.added);

    config::save_json(LAST_INDEXED_FILE, &now)
        .context("Could not update last indexed timestamp")?;
    Ok(())
}
