//! The API the calling layer talks to.
//!
//! `MailEngine` owns the cache, the overlays and the filter document, and
//! hands folder syncs off to background tasks. Remote work started by a user
//! action (move, delete, block) reports remote failures to the caller; syncs
//! only log them.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::filters::{FilterSet, FilterStore, bare_address};
use crate::folders::{self, FolderKind};
use crate::models::{CheckField, Contact, Folder, Label, LiveMessage, MessageFlags, MessageView, Rule};
use crate::query::{Page, QueryService, STARRED, View};
use crate::remote::{self, Flag, RemoteSession, RemoteStore};
use crate::status::StatusStore;
use crate::sync::{SyncOutcome, SyncRegistry, Synchronizer};
use crate::threads::ThreadMember;

const CONTACT_SUGGESTIONS: usize = 10;

pub struct MailEngine {
    config: Arc<Config>,
    remote: Arc<dyn RemoteStore>,
    db: Arc<Database>,
    status: Arc<StatusStore>,
    filters: Arc<FilterStore>,
    synchronizer: Synchronizer,
    query: QueryService,
}

/// Run a sync of `folder` in the background. With `follow` set, folders that
/// received routed mail are synced next.
fn spawn_sync(synchronizer: Synchronizer, folder: String, follow: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        match synchronizer.sync(&folder).await {
            Ok(SyncOutcome::Completed(report)) if follow => {
                for dest in report.routed {
                    debug!("Following routed mail from {} to {}", folder, dest);
                    spawn_sync(synchronizer.clone(), dest, false);
                }
            }
            Ok(_) => {}
            Err(e) => error!("Sync of {} failed: {}", folder, e),
        }
    })
}

/// Recompute every label assignment from the label keywords.
async fn apply_labels(db: &Database) -> Result<usize> {
    let labelled = db.reapply_labels().await?;
    info!("Labels applied to {} message(s)", labelled);
    Ok(labelled)
}

/// Split off zero ids; the flag tells whether any were seen.
fn valid_ids(uids: &[u32]) -> (Vec<u32>, bool) {
    let valid: Vec<u32> = uids.iter().copied().filter(|uid| *uid != 0).collect();
    let had_invalid = valid.len() != uids.len();
    (valid, had_invalid)
}

impl MailEngine {
    /// Open the cache and documents under `config.data_dir`.
    pub async fn open(config: Config, remote: Arc<dyn RemoteStore>) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let db = Arc::new(Database::open(&config.database_path()).await?);
        db.run_migrations().await?;
        let status = Arc::new(StatusStore::open(&config.data_dir).await);
        let filters = Arc::new(FilterStore::open(&config.data_dir).await);
        let config = Arc::new(config);

        let synchronizer = Synchronizer::new(
            Arc::clone(&remote),
            Arc::clone(&db),
            Arc::clone(&status),
            Arc::clone(&filters),
            Arc::new(SyncRegistry::default()),
            Arc::clone(&config),
        );
        let query = QueryService::new(Arc::clone(&db), Arc::clone(&status));

        Ok(Self {
            config,
            remote,
            db,
            status,
            filters,
            synchronizer,
            query,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn session(&self) -> Result<Box<dyn RemoteSession>> {
        Ok(self.remote.connect().await?)
    }

    /// The folder an action from the starred view really applies to. Callers
    /// that know the message's own folder should pass it instead of `STARRED`.
    async fn resolve_folder(&self, folder: &str, uid: u32) -> Result<String> {
        if folder != STARRED {
            return Ok(folder.to_string());
        }
        let mut folders = self.status.starred_folders(uid).await;
        match folders.len() {
            0 => Err(Error::NotFound(format!("starred message {}", uid))),
            1 => Ok(folders.remove(0)),
            _ => Err(Error::AmbiguousStarred { uid, folders }),
        }
    }

    /// Sync `folder` now and wait for it.
    pub async fn sync(&self, folder: &str) -> Result<SyncOutcome> {
        let outcome = self.synchronizer.sync(folder).await?;
        if let SyncOutcome::Completed(report) = &outcome {
            if self.config.sync.follow_routed {
                for dest in &report.routed {
                    spawn_sync(self.synchronizer.clone(), dest.clone(), false);
                }
            }
        }
        Ok(outcome)
    }

    /// Start a background sync of `folder`; the task outlives the caller.
    pub fn trigger_sync(&self, folder: &str) -> JoinHandle<()> {
        spawn_sync(
            self.synchronizer.clone(),
            folder.to_string(),
            self.config.sync.follow_routed,
        )
    }

    /// Sync several folders concurrently.
    pub async fn sync_many(&self, folders: &[String]) -> Vec<Result<SyncOutcome>> {
        join_all(folders.iter().map(|folder| self.synchronizer.sync(folder))).await
    }

    pub fn currently_syncing(&self) -> Vec<String> {
        self.synchronizer.registry().currently_syncing()
    }

    /// One page of `view`. Loading a folder view also refreshes that folder
    /// in the background when `sync_on_view` is set.
    pub async fn query(&self, view: &View, page: i64) -> Result<Page> {
        if let View::Folder(folder) = view {
            if self.config.sync.sync_on_view {
                self.trigger_sync(folder);
            }
        }
        self.query.view(view, page).await
    }

    /// A single message with its flags resolved. Rows whose body has not been
    /// backfilled yet are fetched live from the store when it is reachable.
    pub async fn open_message(&self, folder: &str, uid: u32) -> Result<Option<ThreadMember>> {
        if uid == 0 {
            return Err(Error::InvalidIdentity {
                folder: folder.to_string(),
            });
        }
        let folder = self.resolve_folder(folder, uid).await?;
        let cached = self.db.message(&folder, uid).await?;

        let view: Option<MessageView> = match cached {
            Some(message) if !message.is_header_only() => Some(message.into()),
            cached => match self.fetch_live(&folder, uid).await {
                Ok(Some(live)) => Some(live.into()),
                Ok(None) => cached.map(Into::into),
                Err(e) => {
                    warn!("Live fetch of {}/{} failed: {:#}", folder, uid, e);
                    cached.map(Into::into)
                }
            },
        };

        let Some(view) = view else {
            return Ok(None);
        };
        Ok(self.query.annotate(vec![view], false).await.into_iter().next())
    }

    async fn fetch_live(&self, folder: &str, uid: u32) -> anyhow::Result<Option<LiveMessage>> {
        let mut session = self.remote.connect().await?;
        session.select(folder).await?;

        let header = session
            .fetch_headers(&[uid])
            .await?
            .into_iter()
            .find(|h| h.uid == Some(uid));
        let full = session
            .fetch_full(&[uid])
            .await?
            .into_iter()
            .find(|m| m.uid == uid);
        let (Some(header), Some(full)) = (header, full) else {
            return Ok(None);
        };
        let flags = session
            .fetch_flags(&[uid])
            .await?
            .into_iter()
            .find(|f| f.uid == uid)
            .map(|f| MessageFlags {
                seen: f.seen,
                flagged: f.flagged,
            })
            .unwrap_or_default();

        Ok(Some(LiveMessage::from_remote(folder, &header, &full, flags)))
    }

    pub async fn search_suggestions(&self, query: &str) -> Result<Vec<(String, String, String)>> {
        self.query.search_suggestions(query).await
    }

    pub async fn contact_suggestions(&self, query: &str) -> Result<Vec<String>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.db.contact_suggestions(query, CONTACT_SUGGESTIONS).await
    }

    /// Set the read overlay and, best-effort, the remote Seen flag.
    pub async fn mark_read(&self, folder: &str, uids: &[u32], read: bool) -> Result<()> {
        let (uids, _) = valid_ids(uids);
        let mut by_folder: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for uid in uids {
            let real = self.resolve_folder(folder, uid).await?;
            by_folder.entry(real).or_default().push(uid);
        }

        for (folder, uids) in &by_folder {
            self.status.set_read(folder, uids, read).await?;
            if let Err(e) = self.set_remote_flag(folder, uids, Flag::Seen, read).await {
                warn!("Could not update Seen in {}: {:#}", folder, e);
            }
        }
        Ok(())
    }

    /// Set the starred overlay and, best-effort, the remote Flagged flag.
    pub async fn toggle_star(&self, folder: &str, uid: u32, starred: bool) -> Result<()> {
        if uid == 0 {
            return Err(Error::InvalidIdentity {
                folder: folder.to_string(),
            });
        }
        let folder = self.resolve_folder(folder, uid).await?;
        self.status.set_starred(&folder, uid, starred).await?;
        if let Err(e) = self
            .set_remote_flag(&folder, &[uid], Flag::Flagged, starred)
            .await
        {
            warn!("Could not update Flagged in {}: {:#}", folder, e);
        }
        Ok(())
    }

    async fn set_remote_flag(
        &self,
        folder: &str,
        uids: &[u32],
        flag: Flag,
        value: bool,
    ) -> anyhow::Result<()> {
        let mut session = self.remote.connect().await?;
        session.select(folder).await?;
        session.set_flag(uids, flag, value).await
    }

    /// The cached folder list, refreshed from the store when it is empty.
    pub async fn folders(&self) -> Result<Vec<Folder>> {
        let cached = self.db.get_folders().await?;
        if !cached.is_empty() {
            return Ok(cached);
        }
        match self.refresh_folders().await {
            Ok(folders) => Ok(folders),
            Err(Error::Remote(e)) => {
                warn!("Could not load the folder list: {:#}", e);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Subscribe to every folder, make sure an ad folder exists and replace
    /// the cached folder list.
    pub async fn refresh_folders(&self) -> Result<Vec<Folder>> {
        let mut session = self.session().await?;
        for folder in session.list_folders().await? {
            if let Err(e) = session.subscribe(&folder.name).await {
                debug!("Could not subscribe to {}: {:#}", folder.name, e);
            }
        }

        let mut listing = session.list_folders().await?;
        if folders::find_ads(&listing).is_none() {
            let name = &self.config.sync.ad_folder_fallback;
            match session.create_folder(name).await {
                Ok(()) => {
                    info!("Created ad folder {}", name);
                    if let Err(e) = session.subscribe(name).await {
                        debug!("Could not subscribe to {}: {:#}", name, e);
                    }
                    listing = session.list_folders().await?;
                }
                Err(e) => warn!("Could not create ad folder {}: {:#}", name, e),
            }
        }

        self.db.replace_folders(&listing).await?;
        self.db.get_folders().await
    }

    /// Create a folder and return the name it was created under.
    pub async fn create_folder(&self, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidName(name.to_string()));
        }

        let mut session = self.session().await?;
        let listing = match session.list_folders().await {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Could not list folders before creating {}: {:#}", name, e);
                Vec::new()
            }
        };

        let mut target = folders::qualified_name(name, &listing);
        if let Err(e) = session.create_folder(&target).await {
            let reason = format!("{:#}", e).to_lowercase();
            let namespace_refusal = ["nonexistent namespace", "prefixed with: inbox", "permission denied"]
                .iter()
                .any(|r| reason.contains(r));
            if target != name || !namespace_refusal {
                return Err(e.into());
            }
            target = folders::inbox_qualified(name, &listing);
            info!("Retrying folder creation as {}", target);
            session.create_folder(&target).await?;
        }
        if let Err(e) = session.subscribe(&target).await {
            debug!("Could not subscribe to {}: {:#}", target, e);
        }
        drop(session);

        if let Err(e) = self.refresh_folders().await {
            warn!("Folder list refresh after creating {} failed: {}", target, e);
        }
        Ok(target)
    }

    pub async fn delete_folder(&self, name: &str) -> Result<()> {
        let mut session = self.session().await?;
        session.delete_folder(name).await?;
        drop(session);

        self.db.clear_folder(name).await?;
        if let Err(e) = self.refresh_folders().await {
            warn!("Folder list refresh after deleting {} failed: {}", name, e);
        }
        Ok(())
    }

    /// Move messages on the store, then mirror the move in the cache.
    pub async fn move_messages(&self, from: &str, uids: &[u32], dest: &str) -> Result<()> {
        let (uids, had_invalid) = valid_ids(uids);
        if had_invalid {
            self.db.purge_invalid_ids().await?;
        }
        if uids.is_empty() {
            return Ok(());
        }

        let mut session = self.session().await?;
        session.select(from).await?;
        remote::move_with_fallback(session.as_mut(), from, &uids, dest).await?;
        drop(session);

        self.move_local(from, &uids, dest).await?;
        self.trigger_sync(dest);
        Ok(())
    }

    /// Re-file cached rows without touching the store.
    pub async fn move_local(&self, from: &str, uids: &[u32], to: &str) -> Result<()> {
        let (uids, _) = valid_ids(uids);
        self.db.move_local(from, &uids, to).await?;
        self.status.move_entries(from, &uids, to).await
    }

    /// Move messages to the trash, or delete them for good when they already
    /// are in the trash or there is none. The cache forgets them either way.
    pub async fn delete_messages(&self, folder: &str, uids: &[u32]) -> Result<()> {
        let (uids, had_invalid) = valid_ids(uids);
        if had_invalid {
            self.db.purge_invalid_ids().await?;
        }
        if uids.is_empty() {
            return Ok(());
        }

        let trashed = match self.delete_remote(folder, &uids).await {
            Ok(trashed) => trashed,
            Err(e) => {
                warn!("Remote delete in {} failed, removing locally only: {}", folder, e);
                None
            }
        };

        self.db.delete_messages(folder, &uids).await?;
        self.status.forget(folder, &uids).await?;
        if let Some(trash) = trashed {
            self.trigger_sync(&trash);
        }
        Ok(())
    }

    /// Returns the trash folder the messages were moved to, if any.
    async fn delete_remote(&self, folder: &str, uids: &[u32]) -> Result<Option<String>> {
        let mut session = self.session().await?;
        let listing = match session.list_folders().await {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Could not list folders to find the trash: {:#}", e);
                Vec::new()
            }
        };
        let trash = folders::find_trash(&listing)
            .filter(|t| *t != folder && FolderKind::of(folder) != FolderKind::Trash)
            .map(str::to_string);

        session.select(folder).await?;
        let moved = match &trash {
            Some(trash) => {
                match remote::move_with_fallback(session.as_mut(), folder, uids, trash).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("{}, deleting instead", e);
                        false
                    }
                }
            }
            None => false,
        };
        if !moved {
            session.delete(uids).await?;
        }
        if let Err(e) = session.expunge().await {
            warn!("EXPUNGE in {} failed: {:#}", folder, e);
        }

        Ok(if moved { trash } else { None })
    }

    /// Permanently delete everything in the trash. Returns how many messages
    /// were removed from the store.
    pub async fn empty_trash(&self) -> Result<usize> {
        let mut session = self.session().await?;
        let listing = session.list_folders().await?;
        let trash = folders::find_trash(&listing)
            .map(str::to_string)
            .ok_or_else(|| Error::NotFound("trash folder".to_string()))?;

        session.select(&trash).await?;
        let (uids, _) = valid_ids(&session.uids().await?);
        if !uids.is_empty() {
            session.delete(&uids).await?;
            if let Err(e) = session.expunge().await {
                warn!("EXPUNGE in {} failed: {:#}", trash, e);
            }
        }
        drop(session);

        self.db.clear_folder(&trash).await?;
        info!("Emptied {} ({} message(s))", trash, uids.len());
        Ok(uids.len())
    }

    /// Append an already composed message to `folder`.
    pub async fn store_raw(&self, folder: &str, raw: &[u8], flags: &[Flag]) -> Result<()> {
        let mut session = self.session().await?;
        session.append(raw, folder, flags).await?;
        drop(session);
        self.trigger_sync(folder);
        Ok(())
    }

    pub async fn filters(&self) -> FilterSet {
        self.filters.filters().await
    }

    /// Block a sender and move their inbox mail to the spam folder.
    /// Returns how many messages were moved.
    pub async fn block_sender(&self, sender: &str) -> Result<usize> {
        let address = bare_address(sender);
        if address.is_empty() {
            return Ok(0);
        }
        self.filters.block_sender(&address).await?;
        self.move_existing(&address, FolderKind::Spam).await
    }

    /// Mark a sender as advertising and move their inbox mail to the ad folder.
    pub async fn mark_as_ad(&self, sender: &str) -> Result<usize> {
        let address = bare_address(sender);
        if address.is_empty() {
            return Ok(0);
        }
        self.filters.mark_ad_sender(&address).await?;
        self.move_existing(&address, FolderKind::Ads).await
    }

    pub async fn whitelist_sender(&self, sender: &str) -> Result<()> {
        self.filters.whitelist_sender(sender).await?;
        Ok(())
    }

    async fn move_existing(&self, address: &str, kind: FolderKind) -> Result<usize> {
        let inbox = self.config.inbox.clone();
        let uids = self.db.ids_from_sender(&inbox, address).await?;
        if uids.is_empty() {
            return Ok(0);
        }

        let mut session = self.session().await?;
        let listing = session.list_folders().await?;
        let dest = match kind {
            FolderKind::Spam => folders::find_spam(&listing).map(str::to_string),
            _ => match folders::find_ads(&listing) {
                Some(ads) => Some(ads.to_string()),
                None => {
                    let fallback = self.config.sync.ad_folder_fallback.clone();
                    if let Err(e) = session.create_folder(&fallback).await {
                        warn!("Could not create ad folder {}: {:#}", fallback, e);
                    }
                    Some(fallback)
                }
            },
        };
        let Some(dest) = dest else {
            warn!("No {:?} folder on the store, leaving mail from {} in place", kind, address);
            return Ok(0);
        };

        session.select(&inbox).await?;
        remote::move_with_fallback(session.as_mut(), &inbox, &uids, &dest).await?;
        drop(session);

        self.db.delete_messages(&inbox, &uids).await?;
        self.status.forget(&inbox, &uids).await?;
        info!("Moved {} message(s) from {} to {}", uids.len(), address, dest);
        self.trigger_sync(&dest);
        Ok(uids.len())
    }

    /// Create a label, then re-apply all labels in the background.
    pub async fn create_label(
        &self,
        name: &str,
        color: &str,
        keyword: &str,
        check_field: CheckField,
    ) -> Result<i64> {
        let id = self.db.add_label(name, color, keyword, check_field).await?;

        let db = Arc::clone(&self.db);
        tokio::spawn(async move {
            if let Err(e) = apply_labels(&db).await {
                error!("Applying labels failed: {}", e);
            }
        });
        self.trigger_sync(&self.config.inbox);
        Ok(id)
    }

    pub async fn labels(&self) -> Result<Vec<Label>> {
        self.db.get_labels().await
    }

    pub async fn delete_label(&self, id: i64) -> Result<bool> {
        self.db.delete_label(id).await
    }

    pub async fn assign_label(&self, label_id: i64, keys: &[(String, u32)]) -> Result<()> {
        let keys: Vec<(String, u32)> = keys.iter().filter(|(_, uid)| *uid != 0).cloned().collect();
        self.db.assign_label(label_id, &keys).await
    }

    /// Recompute label membership for the whole cache. Returns the number of
    /// labelled messages.
    pub async fn apply_labels_to_all(&self) -> Result<usize> {
        apply_labels(&self.db).await
    }

    pub async fn add_rule(
        &self,
        keyword: &str,
        target_folder: &str,
        check_field: CheckField,
    ) -> Result<i64> {
        self.db.add_rule(keyword, target_folder, check_field).await
    }

    pub async fn rules(&self) -> Result<Vec<Rule>> {
        self.db.get_rules().await
    }

    pub async fn delete_rule(&self, id: i64) -> Result<bool> {
        self.db.delete_rule(id).await
    }

    pub async fn add_contact(&self, name: &str, email: &str) -> Result<()> {
        let email = bare_address(email);
        if email.is_empty() {
            return Err(Error::InvalidName(email));
        }
        self.db.upsert_contact(name.trim(), &email).await
    }

    pub async fn contacts(&self) -> Result<Vec<Contact>> {
        self.db.get_contacts().await
    }

    pub async fn delete_contact(&self, id: i64) -> Result<bool> {
        self.db.delete_contact(id).await
    }
}
