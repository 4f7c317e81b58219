use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

use crate::classifier::{self, Disposition};
use crate::config::Config;
use crate::db::{BodyRecord, Database, HeaderRecord};
use crate::error::Result;
use crate::filters::FilterStore;
use crate::folders;
use crate::models::{Label, format_display_date};
use crate::remote::{self, RemoteHeader, RemoteSession, RemoteStore};
use crate::status::StatusStore;

/// Folders with a sync in progress, and since when.
#[derive(Debug, Default)]
pub struct SyncRegistry {
    running: Mutex<HashMap<String, Instant>>,
}

impl SyncRegistry {
    /// Claim `folder` for a sync. `None` while another sync holds it.
    pub fn try_acquire(self: &Arc<Self>, folder: &str) -> Option<SyncSlot> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.contains_key(folder) {
            return None;
        }
        running.insert(folder.to_string(), Instant::now());
        Some(SyncSlot {
            registry: Arc::clone(self),
            folder: folder.to_string(),
        })
    }

    pub fn is_syncing(&self, folder: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(folder)
    }

    pub fn currently_syncing(&self) -> Vec<String> {
        let mut folders: Vec<String> = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        folders.sort();
        folders
    }
}

/// Held for the duration of one folder sync; releases the folder on drop.
#[derive(Debug)]
pub struct SyncSlot {
    registry: Arc<SyncRegistry>,
    folder: String,
}

impl Drop for SyncSlot {
    fn drop(&mut self) {
        let mut running = self
            .registry
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(started) = running.remove(&self.folder) {
            debug!("Released {} after {:?}", self.folder, started.elapsed());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another sync of the folder was in progress; nothing was done.
    AlreadyRunning,
    Completed(SyncReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Cached rows removed because the store no longer has them.
    pub removed: usize,
    /// Header rows written in phase 1.
    pub stored: usize,
    /// Folders that received mail moved out of this one.
    pub routed: BTreeSet<String>,
    pub moved: usize,
    pub spam: usize,
    pub ads: usize,
    /// Rows backfilled in phase 2.
    pub bodies: usize,
    /// Ids whose flags were refreshed in phase 3.
    pub flags: usize,
    /// Remote failures swallowed along the way.
    pub errors: usize,
}

/// Where the inbox sends spam and ads this cycle.
#[derive(Debug, Default)]
struct SpecialFolders {
    spam: Option<String>,
    ads: Option<String>,
}

/// Reconciles the cache of one folder at a time against the remote store.
#[derive(Clone)]
pub struct Synchronizer {
    remote: Arc<dyn RemoteStore>,
    db: Arc<Database>,
    status: Arc<StatusStore>,
    filters: Arc<FilterStore>,
    registry: Arc<SyncRegistry>,
    config: Arc<Config>,
}

impl Synchronizer {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        db: Arc<Database>,
        status: Arc<StatusStore>,
        filters: Arc<FilterStore>,
        registry: Arc<SyncRegistry>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            remote,
            db,
            status,
            filters,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SyncRegistry> {
        &self.registry
    }

    /// One reconciliation cycle for `folder`.
    ///
    /// Returns immediately when the folder is already being synced. Remote
    /// failures end the affected step early and are counted in the report;
    /// cache write failures are returned.
    pub async fn sync(&self, folder: &str) -> Result<SyncOutcome> {
        let Some(_slot) = self.registry.try_acquire(folder) else {
            debug!("Sync of {} already running, skipping", folder);
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let started = Instant::now();
        let mut report = SyncReport::default();
        self.run(folder, &mut report).await?;
        info!(
            "Synced {} in {:?}: {} new, {} removed, {} moved, {} bodies, {} errors",
            folder,
            started.elapsed(),
            report.stored,
            report.removed,
            report.moved,
            report.bodies,
            report.errors
        );
        Ok(SyncOutcome::Completed(report))
    }

    async fn run(&self, folder: &str, report: &mut SyncReport) -> Result<()> {
        let mut session = match self.remote.connect().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Could not connect to sync {}: {:#}", folder, e);
                report.errors += 1;
                return Ok(());
            }
        };
        if let Err(e) = session.select(folder).await {
            warn!("Could not select {}: {:#}", folder, e);
            report.errors += 1;
            return Ok(());
        }
        if let Err(e) = session.check().await {
            debug!("CHECK on {} failed: {:#}", folder, e);
        }

        let is_inbox = self.config.is_inbox(folder);
        let special = if is_inbox {
            self.special_folders(session.as_mut()).await
        } else {
            SpecialFolders::default()
        };

        let remote_ids = match session.uids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Could not list ids of {}: {:#}", folder, e);
                report.errors += 1;
                return Ok(());
            }
        };
        if remote_ids.contains(&0) {
            warn!("{} reported an invalid id 0, ignoring it", folder);
        }
        let remote_ids: HashSet<u32> = remote_ids.into_iter().filter(|id| *id != 0).collect();

        let local_ids: HashSet<u32> = self.db.folder_ids(folder).await?.into_iter().collect();
        let incomplete = self.db.incomplete_ids(folder).await?;

        let vanished: Vec<u32> = local_ids.difference(&remote_ids).copied().collect();
        if !vanished.is_empty() {
            report.removed = self.db.delete_messages(folder, &vanished).await? as usize;
            self.status.forget(folder, &vanished).await?;
            debug!("Removed {} vanished message(s) from {}", vanished.len(), folder);
        }
        self.db.purge_invalid_ids().await?;

        let mut new_ids: Vec<u32> = remote_ids.difference(&local_ids).copied().collect();
        new_ids.sort_unstable_by(|a, b| b.cmp(a));

        let stored = self
            .fetch_headers(session.as_mut(), folder, &new_ids, is_inbox, &special, report)
            .await?;

        let mut backfill: Vec<u32> = incomplete
            .into_iter()
            .chain(stored)
            .filter(|id| remote_ids.contains(id))
            .collect::<BTreeSet<u32>>()
            .into_iter()
            .collect();
        backfill.reverse();
        self.fetch_bodies(session.as_mut(), folder, &backfill, report)
            .await?;

        self.refresh_flags(session.as_mut(), folder, report).await?;
        Ok(())
    }

    async fn special_folders(&self, session: &mut dyn RemoteSession) -> SpecialFolders {
        match session.list_folders().await {
            Ok(listing) => SpecialFolders {
                spam: folders::find_spam(&listing).map(str::to_string),
                ads: folders::find_ads(&listing).map(str::to_string),
            },
            Err(e) => {
                warn!("Could not list folders, spam and ads stay in the inbox: {:#}", e);
                SpecialFolders::default()
            }
        }
    }

    /// Phase 1: header rows for new ids, newest first. Inbox mail matched by a
    /// rule, the spam filter or the ad filter is moved away instead of stored.
    /// Returns the ids that were stored.
    async fn fetch_headers(
        &self,
        session: &mut dyn RemoteSession,
        folder: &str,
        new_ids: &[u32],
        is_inbox: bool,
        special: &SpecialFolders,
        report: &mut SyncReport,
    ) -> Result<Vec<u32>> {
        if new_ids.is_empty() {
            return Ok(Vec::new());
        }
        info!("Fetching headers of {} new message(s) in {}", new_ids.len(), folder);

        let labels = self.db.get_labels().await?;
        let rules = if is_inbox {
            self.db.get_rules().await?
        } else {
            Vec::new()
        };
        let filters = self.filters.filters().await;

        let mut stored_ids = Vec::new();
        for chunk in new_ids.chunks(self.config.sync.header_chunk.max(1)) {
            let headers = match session.fetch_headers(chunk).await {
                Ok(headers) => headers,
                Err(e) => {
                    warn!("Header fetch in {} failed: {:#}", folder, e);
                    report.errors += 1;
                    continue;
                }
            };

            let mut keep: Vec<HeaderRecord> = Vec::new();
            let mut outgoing: BTreeMap<String, Vec<(Disposition, HeaderRecord)>> = BTreeMap::new();

            for header in &headers {
                let Some(uid) = header.uid.filter(|uid| *uid != 0) else {
                    warn!("Skipping a header without id in {}", folder);
                    continue;
                };
                let record = header_record(uid, header, &labels);
                if !is_inbox {
                    keep.push(record);
                    continue;
                }

                let disposition =
                    classifier::classify(&record.sender, &record.subject, &rules, &filters);
                let dest = match &disposition {
                    Disposition::Route(target) => Some(target.clone()),
                    Disposition::Spam => special.spam.clone(),
                    Disposition::Ad => Some(
                        special
                            .ads
                            .clone()
                            .unwrap_or_else(|| self.config.sync.ad_folder_fallback.clone()),
                    ),
                    Disposition::Keep => None,
                };
                match dest {
                    Some(dest) if !dest.eq_ignore_ascii_case(folder) => {
                        outgoing.entry(dest).or_default().push((disposition, record))
                    }
                    _ => keep.push(record),
                }
            }

            for (dest, items) in outgoing {
                let uids: Vec<u32> = items.iter().map(|(_, r)| r.uid).collect();
                let create_missing = special.ads.is_none()
                    && items.iter().any(|(d, _)| *d == Disposition::Ad);
                match self
                    .move_out(session, folder, &uids, &dest, create_missing)
                    .await
                {
                    Ok(()) => {
                        for (disposition, _) in &items {
                            match disposition {
                                Disposition::Spam => report.spam += 1,
                                Disposition::Ad => report.ads += 1,
                                _ => {}
                            }
                        }
                        report.moved += uids.len();
                        report.routed.insert(dest);
                    }
                    Err(e) => {
                        warn!("Keeping {} message(s) in {}: {}", uids.len(), folder, e);
                        report.errors += 1;
                        keep.extend(items.into_iter().map(|(_, r)| r));
                    }
                }
            }

            let stored = self.db.insert_headers(folder, &keep).await?;
            report.stored += stored;
            stored_ids.extend(keep.iter().map(|r| r.uid).filter(|uid| *uid != 0));
        }

        Ok(stored_ids)
    }

    async fn move_out(
        &self,
        session: &mut dyn RemoteSession,
        folder: &str,
        uids: &[u32],
        dest: &str,
        create_missing: bool,
    ) -> Result<()> {
        match remote::move_with_fallback(session, folder, uids, dest).await {
            Ok(()) => Ok(()),
            Err(e) if create_missing => {
                info!("Creating missing folder {} and retrying", dest);
                if let Err(create_err) = session.create_folder(dest).await {
                    warn!("Could not create {}: {:#}", dest, create_err);
                    return Err(e);
                }
                if let Err(sub_err) = session.subscribe(dest).await {
                    debug!("Could not subscribe to {}: {:#}", dest, sub_err);
                }
                remote::move_with_fallback(session, folder, uids, dest).await
            }
            Err(e) => Err(e),
        }
    }

    /// Phase 2: full bodies for rows still missing them.
    async fn fetch_bodies(
        &self,
        session: &mut dyn RemoteSession,
        folder: &str,
        ids: &[u32],
        report: &mut SyncReport,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        info!("Backfilling {} bodies in {}", ids.len(), folder);

        for chunk in ids.chunks(self.config.sync.body_chunk.max(1)) {
            let messages = match session.fetch_full(chunk).await {
                Ok(messages) => messages,
                Err(e) => {
                    warn!("Body fetch in {} failed: {:#}", folder, e);
                    report.errors += 1;
                    continue;
                }
            };

            let records: Vec<BodyRecord> = messages
                .iter()
                .filter(|m| m.uid != 0 && chunk.contains(&m.uid))
                .map(|m| BodyRecord {
                    uid: m.uid,
                    body: m.text.clone().unwrap_or_default(),
                    html: remote::render_html(m),
                    attachments: remote::attachment_metadata(&m.parts),
                })
                .collect();
            report.bodies += self.db.fill_bodies(folder, &records).await? as usize;
        }
        Ok(())
    }

    /// Phase 3: seen/flagged of the newest cached ids into the overlays.
    async fn refresh_flags(
        &self,
        session: &mut dyn RemoteSession,
        folder: &str,
        report: &mut SyncReport,
    ) -> Result<()> {
        let window = self
            .db
            .recent_ids(folder, self.config.sync.flag_window)
            .await?;
        if window.is_empty() {
            return Ok(());
        }

        let flags = match session.fetch_flags(&window).await {
            Ok(flags) => flags,
            Err(e) => {
                warn!("Flag fetch in {} failed: {:#}", folder, e);
                report.errors += 1;
                return Ok(());
            }
        };
        let by_id: HashMap<u32, (bool, bool)> = flags
            .into_iter()
            .map(|f| (f.uid, (f.seen, f.flagged)))
            .collect();

        let resolved: Vec<(u32, bool, bool)> = window
            .iter()
            .map(|uid| {
                let (seen, flagged) = by_id.get(uid).copied().unwrap_or_default();
                (*uid, seen, flagged)
            })
            .collect();
        self.status
            .set_read_batch(folder, resolved.iter().map(|(uid, seen, _)| (*uid, *seen)))
            .await?;
        self.status
            .set_starred_batch(folder, resolved.iter().map(|(uid, _, flagged)| (*uid, *flagged)))
            .await?;
        report.flags = resolved.len();
        Ok(())
    }
}

fn header_record(uid: u32, header: &RemoteHeader, labels: &[Label]) -> HeaderRecord {
    let subject = header.subject.clone().unwrap_or_default();
    let sender = header.sender_display();
    let (date_iso, date_str) = match header.date {
        Some(date) => {
            let utc = date.with_timezone(&Utc);
            (
                utc.to_rfc3339_opts(SecondsFormat::Secs, true),
                format_display_date(&utc),
            )
        }
        None => (String::new(), String::new()),
    };

    HeaderRecord {
        uid,
        labels: classifier::match_labels(&sender, &subject, labels),
        subject,
        sender,
        recipients: header.recipients_display(),
        date_iso,
        date_str,
    }
}
