use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::db::{Database, Search};
use crate::error::Result;
use crate::models::{MailItem, MessageView};
use crate::status::StatusStore;
use crate::threads::{self, Thread, ThreadMember};

pub const PAGE_SIZE: i64 = 50;

/// Name of the starred pseudo-folder.
pub const STARRED: &str = "STARRED";

/// What a page is drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Folder(String),
    Label(i64),
    Starred,
    /// Free text, or `*.ext` for messages with such an attachment.
    Search(String),
}

impl View {
    /// `STARRED` and `LABEL:<id>` name pseudo-folders; anything else is a folder.
    pub fn from_folder_name(name: &str) -> Self {
        if name == STARRED {
            return Self::Starred;
        }
        match name.strip_prefix("LABEL:").map(|id| id.trim().parse()) {
            Some(Ok(id)) => Self::Label(id),
            _ => Self::Folder(name.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub threads: Vec<Thread>,
    /// Matching messages across all pages.
    pub total: i64,
    pub total_pages: i64,
    pub page: i64,
}

fn total_pages(total: i64) -> i64 {
    ((total + PAGE_SIZE - 1) / PAGE_SIZE).max(1)
}

/// FTS5 expression for a free-text query: every word quoted, the last one
/// matched as a prefix. `None` when nothing searchable is left.
pub fn fts_query(query: &str) -> Option<String> {
    let words: Vec<String> = query
        .split_whitespace()
        .map(|w| w.replace('"', ""))
        .filter(|w| !w.is_empty())
        .collect();
    let (last, rest) = words.split_last()?;

    let mut terms: Vec<String> = rest.iter().map(|w| format!("\"{}\"", w)).collect();
    terms.push(format!("\"{}\"*", last));
    Some(terms.join(" "))
}

/// Paged, thread-grouped views over the cache with read/starred overlays applied.
pub struct QueryService {
    db: Arc<Database>,
    status: Arc<StatusStore>,
}

impl QueryService {
    pub fn new(db: Arc<Database>, status: Arc<StatusStore>) -> Self {
        Self { db, status }
    }

    /// One page (1-based) of `view`. Pages past the end are empty.
    pub async fn view(&self, view: &View, page: i64) -> Result<Page> {
        let page = page.max(1);
        let Some(offset) = (page - 1).checked_mul(PAGE_SIZE) else {
            return Ok(empty_page(page));
        };

        let (messages, total) = match view {
            View::Folder(folder) => (
                self.db.page_folder(folder, PAGE_SIZE, offset).await?,
                self.db.count_folder(folder).await?,
            ),
            View::Label(label_id) => (
                self.db.page_label(*label_id, PAGE_SIZE, offset).await?,
                self.db.count_label(*label_id).await?,
            ),
            View::Starred => {
                let keys = self.status.starred_entries().await;
                let mut starred = self.db.messages_by_keys(&keys).await?;
                starred.sort_by(|a, b| {
                    b.date_iso
                        .cmp(&a.date_iso)
                        .then_with(|| b.uid.cmp(&a.uid))
                });
                let total = starred.len() as i64;
                let page_rows = starred
                    .into_iter()
                    .skip(offset as usize)
                    .take(PAGE_SIZE as usize)
                    .collect();
                (page_rows, total)
            }
            View::Search(query) => {
                let query = query.replace('"', "");
                let query = query.trim();
                let fts;
                let search = if let Some(ext) = query.strip_prefix('*') {
                    if ext.len() < 2 || !ext.starts_with('.') {
                        return Ok(empty_page(page));
                    }
                    Search::Extension(ext)
                } else {
                    match fts_query(query) {
                        Some(q) => {
                            fts = q;
                            Search::FullText(&fts)
                        }
                        None => return Ok(empty_page(page)),
                    }
                };
                (
                    self.db.page_search(search, PAGE_SIZE, offset).await?,
                    self.db.count_search(search).await?,
                )
            }
        };

        debug!("{:?} page {}: {} of {} message(s)", view, page, messages.len(), total);
        let messages = messages.into_iter().map(MessageView::from).collect();
        let members = self.annotate(messages, *view == View::Starred).await;
        Ok(Page {
            threads: threads::group(members),
            total,
            total_pages: total_pages(total),
            page,
        })
    }

    /// Resolve read/starred for each message: the overlay when it has an
    /// entry, else the flags the store reported, else unread and unstarred.
    pub async fn annotate(&self, messages: Vec<MessageView>, all_starred: bool) -> Vec<ThreadMember> {
        let mut overlays: HashMap<String, (HashMap<u32, bool>, HashMap<u32, bool>)> =
            HashMap::new();
        let mut members = Vec::with_capacity(messages.len());

        for message in messages {
            let folder = message.folder().to_string();
            if !overlays.contains_key(&folder) {
                let read = self.status.read_map(&folder).await;
                let starred = self.status.star_map(&folder).await;
                overlays.insert(folder.clone(), (read, starred));
            }
            let Some((read_map, star_map)) = overlays.get(&folder) else {
                continue;
            };

            let remote = message.flags();
            let read = read_map
                .get(&message.uid())
                .copied()
                .or(remote.map(|f| f.seen))
                .unwrap_or(false);
            let starred = all_starred
                || star_map
                    .get(&message.uid())
                    .copied()
                    .or(remote.map(|f| f.flagged))
                    .unwrap_or(false);

            members.push(ThreadMember {
                message,
                read,
                starred,
            });
        }
        members
    }

    /// Up to five full-text hits as (subject, sender, date) for type-ahead.
    pub async fn search_suggestions(&self, query: &str) -> Result<Vec<(String, String, String)>> {
        if query.trim().chars().count() < 2 {
            return Ok(Vec::new());
        }
        match fts_query(query) {
            Some(q) => self.db.search_suggestions(&q, 5).await,
            None => Ok(Vec::new()),
        }
    }
}

fn empty_page(page: i64) -> Page {
    Page {
        threads: Vec::new(),
        total: 0,
        total_pages: 1,
        page,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fts_query() {
        assert_eq!(fts_query("zebra").as_deref(), Some("\"zebra\"*"));
        assert_eq!(
            fts_query(" quarterly  \"report ").as_deref(),
            Some("\"quarterly\" \"report\"*")
        );
        assert_eq!(fts_query("  \" "), None);
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0), 1);
        assert_eq!(total_pages(50), 1);
        assert_eq!(total_pages(51), 2);
        assert_eq!(total_pages(120), 3);
    }

    #[test]
    fn test_view_from_folder_name() {
        assert_eq!(View::from_folder_name("STARRED"), View::Starred);
        assert_eq!(View::from_folder_name("LABEL:7"), View::Label(7));
        assert_eq!(
            View::from_folder_name("LABEL:x"),
            View::Folder("LABEL:x".to_string())
        );
    }
}
