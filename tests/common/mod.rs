#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone};
use tempfile::TempDir;

use mailmirror::remote::{
    Address, FetchedMessage, Flag, MessagePart, RemoteFlags, RemoteFolder, RemoteHeader,
    RemoteSession, RemoteStore,
};
use mailmirror::{Config, MailEngine};

#[derive(Debug, Clone, Default)]
pub struct FakeMessage {
    pub from: Option<Address>,
    pub to: Vec<Address>,
    pub subject: Option<String>,
    pub date: Option<DateTime<FixedOffset>>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub parts: Vec<MessagePart>,
    pub seen: bool,
    pub flagged: bool,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub folders: BTreeMap<String, BTreeMap<u32, FakeMessage>>,
    pub next_uid: u32,
    pub fail_connect: bool,
    pub fail_move: bool,
    pub fail_copy: bool,
    pub fail_fetch_full: bool,
    /// Make the id listing slow so concurrent syncs overlap.
    pub uid_delay: Option<Duration>,
    pub connects: usize,
    pub header_fetches: usize,
    pub full_fetches: usize,
}

/// In-memory mail store. Every session shares one state.
#[derive(Debug, Clone, Default)]
pub struct FakeStore {
    pub state: Arc<Mutex<FakeState>>,
}

fn address(raw: &str) -> Address {
    match (raw.find('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if end > start => Address {
            name: Some(raw[..start].trim().to_string()),
            email: raw[start + 1..end].trim().to_string(),
        },
        _ => Address {
            name: None,
            email: raw.trim().to_string(),
        },
    }
}

/// `minutes` after 2024-01-01 00:00 UTC.
pub fn at(minutes: i64) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(0).unwrap();
    offset.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

pub fn message(from: &str, subject: &str, body: &str, minutes: i64) -> FakeMessage {
    FakeMessage {
        from: Some(address(from)),
        to: vec![address("Me <me@example.com>")],
        subject: Some(subject.to_string()),
        date: Some(at(minutes)),
        text: Some(body.to_string()),
        html: Some(format!("<p>{}</p>", body)),
        ..Default::default()
    }
}

impl FakeStore {
    pub fn with_folders(names: &[&str]) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            state.next_uid = 1;
            for name in names {
                state.folders.insert(name.to_string(), BTreeMap::new());
            }
        }
        store
    }

    pub fn deliver(&self, folder: &str, message: FakeMessage) -> u32 {
        let mut state = self.state.lock().unwrap();
        let uid = state.next_uid.max(1);
        state.next_uid = uid + 1;
        state
            .folders
            .get_mut(folder)
            .expect("folder exists")
            .insert(uid, message);
        uid
    }

    pub fn uids(&self, folder: &str) -> Vec<u32> {
        let state = self.state.lock().unwrap();
        state
            .folders
            .get(folder)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn folder_names(&self) -> Vec<String> {
        self.state.lock().unwrap().folders.keys().cloned().collect()
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut *self.state.lock().unwrap());
    }

    pub fn get(&self, folder: &str, uid: u32) -> Option<FakeMessage> {
        let state = self.state.lock().unwrap();
        state.folders.get(folder).and_then(|m| m.get(&uid)).cloned()
    }
}

#[async_trait]
impl RemoteStore for FakeStore {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_connect {
            bail!("connection refused");
        }
        state.connects += 1;
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
            selected: None,
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    selected: Option<String>,
}

impl FakeSession {
    fn selected(&self) -> Result<String> {
        self.selected.clone().ok_or_else(|| anyhow!("no folder selected"))
    }

    fn with_selected<R>(
        &self,
        f: impl FnOnce(&mut FakeState, &str) -> Result<R>,
    ) -> Result<R> {
        let folder = self.selected()?;
        let mut state = self.state.lock().unwrap();
        f(&mut *state, &folder)
    }

    fn transfer(&self, uids: &[u32], dest: &str, remove: bool) -> Result<()> {
        self.with_selected(|state, folder| {
            if !state.folders.contains_key(dest) {
                bail!("[TRYCREATE] no such mailbox {}", dest);
            }
            let mut moving = Vec::new();
            for uid in uids {
                let source = state.folders.get_mut(folder).expect("selected folder");
                let message = if remove {
                    source.remove(uid)
                } else {
                    source.get(uid).cloned()
                };
                if let Some(message) = message {
                    moving.push(message);
                }
            }
            for message in moving {
                let uid = state.next_uid;
                state.next_uid += 1;
                state
                    .folders
                    .get_mut(dest)
                    .expect("destination exists")
                    .insert(uid, message);
            }
            Ok(())
        })
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .folders
            .keys()
            .map(|name| RemoteFolder {
                name: name.clone(),
                delimiter: Some(".".to_string()),
            })
            .collect())
    }

    async fn select(&mut self, folder: &str) -> Result<()> {
        if !self.state.lock().unwrap().folders.contains_key(folder) {
            bail!("no such mailbox {}", folder);
        }
        self.selected = Some(folder.to_string());
        Ok(())
    }

    async fn check(&mut self) -> Result<()> {
        Ok(())
    }

    async fn uids(&mut self) -> Result<Vec<u32>> {
        let delay = self.state.lock().unwrap().uid_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with_selected(|state, folder| Ok(state.folders[folder].keys().copied().collect()))
    }

    async fn fetch_headers(&mut self, uids: &[u32]) -> Result<Vec<RemoteHeader>> {
        self.with_selected(|state, folder| {
            state.header_fetches += 1;
            Ok(uids
                .iter()
                .filter_map(|uid| {
                    state.folders[folder].get(uid).map(|m| RemoteHeader {
                        uid: Some(*uid),
                        subject: m.subject.clone(),
                        from: m.from.clone(),
                        to: m.to.clone(),
                        date: m.date,
                    })
                })
                .collect())
        })
    }

    async fn fetch_full(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>> {
        self.with_selected(|state, folder| {
            if state.fail_fetch_full {
                bail!("connection reset during FETCH");
            }
            state.full_fetches += 1;
            Ok(uids
                .iter()
                .filter_map(|uid| {
                    state.folders[folder].get(uid).map(|m| FetchedMessage {
                        uid: *uid,
                        text: m.text.clone(),
                        html: m.html.clone(),
                        parts: m.parts.clone(),
                    })
                })
                .collect())
        })
    }

    async fn fetch_flags(&mut self, uids: &[u32]) -> Result<Vec<RemoteFlags>> {
        self.with_selected(|state, folder| {
            Ok(uids
                .iter()
                .filter_map(|uid| {
                    state.folders[folder].get(uid).map(|m| RemoteFlags {
                        uid: *uid,
                        seen: m.seen,
                        flagged: m.flagged,
                    })
                })
                .collect())
        })
    }

    async fn set_flag(&mut self, uids: &[u32], flag: Flag, value: bool) -> Result<()> {
        self.with_selected(|state, folder| {
            let messages = state.folders.get_mut(folder).expect("selected folder");
            for uid in uids {
                if let Some(m) = messages.get_mut(uid) {
                    match flag {
                        Flag::Seen => m.seen = value,
                        Flag::Flagged => m.flagged = value,
                        Flag::Draft => {}
                    }
                }
            }
            Ok(())
        })
    }

    async fn move_to(&mut self, uids: &[u32], dest: &str) -> Result<()> {
        if self.state.lock().unwrap().fail_move {
            bail!("MOVE not supported");
        }
        self.transfer(uids, dest, true)
    }

    async fn copy_to(&mut self, uids: &[u32], dest: &str) -> Result<()> {
        if self.state.lock().unwrap().fail_copy {
            bail!("COPY failed");
        }
        self.transfer(uids, dest, false)
    }

    async fn delete(&mut self, uids: &[u32]) -> Result<()> {
        self.with_selected(|state, folder| {
            let messages = state.folders.get_mut(folder).expect("selected folder");
            for uid in uids {
                messages.remove(uid);
            }
            Ok(())
        })
    }

    async fn expunge(&mut self) -> Result<()> {
        Ok(())
    }

    async fn create_folder(&mut self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.folders.contains_key(name) {
            bail!("mailbox {} already exists", name);
        }
        state.folders.insert(name.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn delete_folder(&mut self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.folders.remove(name).is_none() {
            bail!("no such mailbox {}", name);
        }
        Ok(())
    }

    async fn subscribe(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn append(&mut self, raw: &[u8], folder: &str, flags: &[Flag]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let uid = state.next_uid;
        state.next_uid += 1;
        let text = String::from_utf8_lossy(raw).to_string();
        let messages = state
            .folders
            .get_mut(folder)
            .ok_or_else(|| anyhow!("no such mailbox {}", folder))?;
        messages.insert(
            uid,
            FakeMessage {
                from: Some(address("me@example.com")),
                subject: text.lines().next().map(str::to_string),
                date: Some(at(0)),
                text: Some(text),
                seen: flags.contains(&Flag::Seen),
                ..Default::default()
            },
        );
        Ok(())
    }
}

/// Engine over a fresh temp directory. Background follow-up syncs are off so
/// tests decide when each folder is synced.
pub async fn engine(store: &FakeStore) -> (TempDir, MailEngine) {
    engine_with(store, |_| {}).await
}

pub async fn engine_with(store: &FakeStore, adjust: impl FnOnce(&mut Config)) -> (TempDir, MailEngine) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    config.sync.follow_routed = false;
    config.sync.sync_on_view = false;
    adjust(&mut config);
    let engine = MailEngine::open(config, Arc::new(store.clone())).await.unwrap();
    (dir, engine)
}
