//! Configuration helpers for the mr mail mirror
//!
//! Provides utilities for locating and loading configuration files from the
//! shared config directory (~/.config/mr/), and for expanding the path
//! settings found inside them.
//!
//! Call [`init`] at application startup to bootstrap the config directory.

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use std::path::{Component, Path, PathBuf};

/// Name of the directory inside the platform config dir
const APP_DIR: &str = "mr";

/// Initialize the config directory.
///
/// Creates ~/.config/mr/ if it doesn't exist.
/// Call this once at application startup.
pub fn init() -> Result<PathBuf> {
    ensure_config_dir()
}

/// Get the config directory (~/.config/mr/)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

/// Get the path to a config file within the config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Load and parse a JSON config file from the config directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Check if a config file exists in the config directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

/// Ensure the config directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}

/// Save a value as JSON to a config file in the config directory
pub fn save_json<T: serde::Serialize>(filename: &str, value: &T) -> Result<()> {
    let dir = ensure_config_dir()?;
    save_json_file(&dir.join(filename), value)
}

/// Save a value as JSON to an arbitrary path
pub fn save_json_file<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}

/// Expand a path setting into an absolute, normalized path.
///
/// Supported forms:
/// - `~` and `$HOME` prefixes resolve to the user's home directory
/// - a leading `$VAR` resolves to the value of the environment variable
/// - relative paths are resolved against the current directory
pub fn expand_path(input: &str) -> Result<PathBuf> {
    let expanded = if let Some(rest) = strip_home(input) {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        join_rest(home, rest)
    } else if let Some(var_path) = input.strip_prefix('$') {
        let (var, rest) = match var_path.find(['/', std::path::MAIN_SEPARATOR]) {
            Some(end) => var_path.split_at(end),
            None => (var_path, ""),
        };
        if var.is_empty() {
            bail!("Empty variable name in path: {}", input);
        }
        let value = std::env::var(var)
            .with_context(|| format!("Environment variable {} referenced by {} is not set", var, input))?;
        join_rest(PathBuf::from(value), rest)
    } else {
        PathBuf::from(input)
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .context("Could not determine current directory")?
            .join(expanded)
    };

    Ok(normalize(&absolute))
}

/// Returns the remainder of `input` after a `$HOME` or `~` prefix
fn strip_home(input: &str) -> Option<&str> {
    ["$HOME", "~"].iter().find_map(|prefix| {
        input
            .strip_prefix(prefix)
            .filter(|rest| rest.is_empty() || rest.starts_with(['/', std::path::MAIN_SEPARATOR]))
    })
}

fn join_rest(base: PathBuf, rest: &str) -> PathBuf {
    let rest = rest.trim_start_matches(['/', std::path::MAIN_SEPARATOR]);
    if rest.is_empty() { base } else { base.join(rest) }
}

/// Lexically clean a path: drop `.` components and fold `..` into the parent
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
