use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::document::JsonDocument;
use crate::error::Result;

/// folder -> (remote id -> flag)
type FlagMap = BTreeMap<String, BTreeMap<u32, bool>>;

/// Read and starred overlays, kept apart from the message cache so they
/// survive cache rebuilds and apply to live messages too.
pub struct StatusStore {
    read: JsonDocument<FlagMap>,
    starred: JsonDocument<FlagMap>,
}

fn apply(map: &mut FlagMap, folder: &str, updates: impl IntoIterator<Item = (u32, bool)>) -> bool {
    let entries = map.entry(folder.to_string()).or_default();
    let mut changed = false;
    for (uid, value) in updates {
        if uid == 0 {
            continue;
        }
        if entries.insert(uid, value) != Some(value) {
            changed = true;
        }
    }
    changed
}

impl StatusStore {
    pub async fn open(dir: &Path) -> Self {
        Self {
            read: JsonDocument::open(dir.join("read_status.json")).await,
            starred: JsonDocument::open(dir.join("star_status.json")).await,
        }
    }

    pub async fn set_read(&self, folder: &str, uids: &[u32], read: bool) -> Result<()> {
        self.set_read_batch(folder, uids.iter().map(|&uid| (uid, read)))
            .await
    }

    pub async fn set_read_batch(
        &self,
        folder: &str,
        updates: impl IntoIterator<Item = (u32, bool)>,
    ) -> Result<()> {
        self.read
            .update(|map| (apply(map, folder, updates), ()))
            .await
    }

    pub async fn set_starred(&self, folder: &str, uid: u32, starred: bool) -> Result<()> {
        self.set_starred_batch(folder, [(uid, starred)]).await
    }

    pub async fn set_starred_batch(
        &self,
        folder: &str,
        updates: impl IntoIterator<Item = (u32, bool)>,
    ) -> Result<()> {
        self.starred
            .update(|map| (apply(map, folder, updates), ()))
            .await
    }

    pub async fn read_map(&self, folder: &str) -> HashMap<u32, bool> {
        self.read
            .read(|map| flags_of(map, folder))
            .await
    }

    pub async fn star_map(&self, folder: &str) -> HashMap<u32, bool> {
        self.starred
            .read(|map| flags_of(map, folder))
            .await
    }

    /// Every (folder, id) currently starred.
    pub async fn starred_entries(&self) -> Vec<(String, u32)> {
        self.starred
            .read(|map| {
                map.iter()
                    .flat_map(|(folder, entries)| {
                        entries
                            .iter()
                            .filter(|(_, starred)| **starred)
                            .map(move |(uid, _)| (folder.clone(), *uid))
                    })
                    .collect()
            })
            .await
    }

    /// Every folder where this id is starred. Ids are only unique within a
    /// folder, so there can be more than one.
    pub async fn starred_folders(&self, uid: u32) -> Vec<String> {
        self.starred
            .read(|map| {
                map.iter()
                    .filter(|(_, entries)| entries.get(&uid) == Some(&true))
                    .map(|(folder, _)| folder.clone())
                    .collect()
            })
            .await
    }

    /// Re-file overlay entries of `uids` from `from` to `to`, following a
    /// local move of the cached rows.
    pub async fn move_entries(&self, from: &str, uids: &[u32], to: &str) -> Result<()> {
        let relocate = |map: &mut FlagMap| {
            let moved: Vec<(u32, bool)> = match map.get_mut(from) {
                Some(entries) => uids
                    .iter()
                    .filter_map(|uid| entries.remove(uid).map(|value| (*uid, value)))
                    .collect(),
                None => Vec::new(),
            };
            if moved.is_empty() {
                return (false, ());
            }
            map.entry(to.to_string()).or_default().extend(moved);
            (true, ())
        };
        self.read.update(relocate).await?;
        self.starred.update(relocate).await
    }

    /// Drop overlay entries for ids that no longer exist in `folder`.
    pub async fn forget(&self, folder: &str, uids: &[u32]) -> Result<()> {
        let remove = |map: &mut FlagMap| {
            let Some(entries) = map.get_mut(folder) else {
                return (false, ());
            };
            let before = entries.len();
            entries.retain(|uid, _| !uids.contains(uid));
            (entries.len() != before, ())
        };
        self.read.update(remove).await?;
        self.starred.update(remove).await
    }
}

fn flags_of(map: &FlagMap, folder: &str) -> HashMap<u32, bool> {
    map.get(folder)
        .map(|entries| entries.iter().map(|(k, v)| (*k, *v)).collect())
        .unwrap_or_default()
}
