//! Include/exclude resolution of remote folders

use std::collections::HashSet;

use crate::error::{Result, SyncError};

/// Pick the folders to mirror from the server's listing.
///
/// Exclusion wins over inclusion. With an empty `include` every folder that
/// is not excluded is selected; otherwise only included ones are. An
/// included folder missing from the listing is an error, reported for the
/// first such folder in configured order. The server's order is preserved.
///
/// # Arguments
/// * `remote` - Folder names as listed by the server
/// * `include` - Folders to mirror (empty means all)
/// * `exclude` - Folders never to mirror
pub fn select_folders(
    remote: &[String],
    include: &[String],
    exclude: &[String],
) -> Result<Vec<String>> {
    let excluded: HashSet<&str> = exclude.iter().map(String::as_str).collect();
    let included: HashSet<&str> = include.iter().map(String::as_str).collect();

    if !include.is_empty() {
        let present: HashSet<&str> = remote.iter().map(String::as_str).collect();
        if let Some(missing) = include
            .iter()
            .find(|name| !excluded.contains(name.as_str()) && !present.contains(name.as_str()))
        {
            return Err(SyncError::FolderNotFound(missing.clone()));
        }
    }

    Ok(remote
        .iter()
        .filter(|name| !excluded.contains(name.as_str()))
        .filter(|name| include.is_empty() || included.contains(name.as_str()))
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_everything_when_no_rules() {
        let remote = names(&["INBOX", "Sent", "Work"]);
        assert_eq!(select_folders(&remote, &[], &[]).unwrap(), remote);
    }

    #[test]
    fn test_exclude_only() {
        let remote = names(&["INBOX", "Spam", "Work"]);
        let selected = select_folders(&remote, &[], &names(&["Spam"])).unwrap();
        assert_eq!(selected, names(&["INBOX", "Work"]));
    }

    #[test]
    fn test_include_preserves_server_order() {
        let remote = names(&["Archive", "INBOX", "Work"]);
        let selected = select_folders(&remote, &names(&["Work", "INBOX"]), &[]).unwrap();
        assert_eq!(selected, names(&["INBOX", "Work"]));
    }

    #[test]
    fn test_missing_include_is_error() {
        let remote = names(&["INBOX"]);
        let err = select_folders(&remote, &names(&["INBOX", "Work", "Later"]), &[]).unwrap_err();
        assert!(matches!(err, SyncError::FolderNotFound(name) if name == "Work"));
    }

    #[test]
    fn test_excluded_wins_and_is_not_missing() {
        let remote = names(&["INBOX", "Work"]);
        let selected = select_folders(
            &remote,
            &names(&["INBOX", "Work", "Gone"]),
            &names(&["Work", "Gone"]),
        )
        .unwrap();
        assert_eq!(selected, names(&["INBOX"]));
    }

    #[test]
    fn test_empty_listing() {
        assert!(select_folders(&[], &[], &[]).unwrap().is_empty());
    }
}
