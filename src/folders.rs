//! Folder naming conventions of the remote store.

use inflections::case::to_title_case;

use crate::remote::RemoteFolder;

const TRASH_NAMES: &[&str] = &[
    "INBOX.Trash",
    "Trash",
    "Papperskorg",
    "INBOX.Papperskorg",
    "Deleted Items",
    "Deleted Messages",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    Inbox,
    Sent,
    Drafts,
    Trash,
    Spam,
    Ads,
    Other,
}

impl FolderKind {
    pub fn of(name: &str) -> Self {
        let n = name.to_lowercase();
        if n == "inbox" {
            Self::Inbox
        } else if n.contains("sent") || n.contains("skickat") {
            Self::Sent
        } else if n.contains("draft") || n.contains("utkast") {
            Self::Drafts
        } else if n.contains("trash") || n.contains("bin") || n.contains("papperskorg") {
            Self::Trash
        } else if n.contains("spam") || n.contains("junk") || n.contains("skräppost") {
            Self::Spam
        } else if n.contains("reklam") {
            Self::Ads
        } else {
            Self::Other
        }
    }
}

pub fn is_drafts(name: &str) -> bool {
    FolderKind::of(name) == FolderKind::Drafts
}

pub fn is_sent(name: &str) -> bool {
    FolderKind::of(name) == FolderKind::Sent
}

fn first_containing<'a>(folders: &'a [RemoteFolder], needles: &[&str]) -> Option<&'a str> {
    folders
        .iter()
        .map(|f| f.name.as_str())
        .find(|name| {
            let lower = name.to_lowercase();
            needles.iter().any(|n| lower.contains(n))
        })
}

pub fn find_spam(folders: &[RemoteFolder]) -> Option<&str> {
    first_containing(folders, &["spam", "junk", "skräppost"])
}

pub fn find_ads(folders: &[RemoteFolder]) -> Option<&str> {
    first_containing(folders, &["reklam"])
}

/// Well-known trash names first, then any folder that looks like one.
pub fn find_trash(folders: &[RemoteFolder]) -> Option<&str> {
    TRASH_NAMES
        .iter()
        .find_map(|known| folders.iter().find(|f| f.name == *known))
        .map(|f| f.name.as_str())
        .or_else(|| first_containing(folders, &["trash", "papperskorg", "bin", "deleted"]))
}

/// Delimiter the store uses, `.` when it reported none.
pub fn delimiter_of(folders: &[RemoteFolder]) -> String {
    folders
        .iter()
        .rev()
        .find_map(|f| f.delimiter.clone())
        .unwrap_or_else(|| ".".to_string())
}

/// Name to create `requested` under.
///
/// Stores that keep user folders below the inbox (siblings already live under
/// `INBOX<delim>`, or there are no other root folders and the delimiter is `.`)
/// get the name qualified with that prefix.
pub fn qualified_name(requested: &str, folders: &[RemoteFolder]) -> String {
    let delimiter = delimiter_of(folders);
    let prefix = format!("INBOX{}", delimiter);

    let mut under_inbox = false;
    let mut root_folders = 0;
    for folder in folders {
        let upper = folder.name.to_uppercase();
        if upper == "INBOX" {
            continue;
        }
        if upper.starts_with(&prefix) {
            under_inbox = true;
        } else {
            root_folders += 1;
        }
    }

    let upper = requested.to_uppercase();
    let already = upper == "INBOX" || upper.starts_with(&prefix);
    if !already && (under_inbox || (root_folders == 0 && delimiter == ".")) {
        format!("{}{}", prefix, requested)
    } else {
        requested.to_string()
    }
}

/// `requested` forced under the inbox, for the retry after a namespace refusal.
pub fn inbox_qualified(requested: &str, folders: &[RemoteFolder]) -> String {
    format!("INBOX{}{}", delimiter_of(folders), requested)
}

pub fn display_name(name: &str, delimiter: Option<&str>) -> String {
    match FolderKind::of(name) {
        FolderKind::Inbox => "Inbox".to_string(),
        FolderKind::Sent => "Sent".to_string(),
        FolderKind::Drafts => "Drafts".to_string(),
        FolderKind::Trash => "Trash".to_string(),
        FolderKind::Spam => "Spam".to_string(),
        FolderKind::Ads => "Ads".to_string(),
        FolderKind::Other => {
            let delimiter = delimiter.unwrap_or(".");
            let prefix = format!("INBOX{}", delimiter);
            let short = if name.to_uppercase().starts_with(&prefix) {
                &name[prefix.len()..]
            } else {
                name
            };
            to_title_case(&short.replace(delimiter, " "))
        }
    }
}
