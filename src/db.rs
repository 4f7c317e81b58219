use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, warn};

use crate::classifier;
use crate::error::Result;
use crate::folders;
use crate::models::{Attachment, CachedMessage, CheckField, Contact, Folder, Label, Rule};
use crate::remote::RemoteFolder;

const MESSAGE_COLUMNS: &str = "e.remote_id, e.folder, e.subject, e.sender, e.recipients, e.body, e.html, \
     e.date_iso, e.date_str, e.attachments_json, \
     (SELECT group_concat(l.label_id) FROM email_labels l \
      WHERE l.remote_id = e.remote_id AND l.folder = e.folder)";

const LABEL_QUERY: &str = "SELECT id, name, color, keyword, check_field FROM labels ORDER BY id ASC";

/// Header-only row written by phase 1.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderRecord {
    pub uid: u32,
    pub subject: String,
    pub sender: String,
    pub recipients: String,
    pub date_iso: String,
    pub date_str: String,
    pub labels: Vec<i64>,
}

/// Body data written onto an existing row by phase 2.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyRecord {
    pub uid: u32,
    pub body: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

/// Which rows a search page is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Search<'a> {
    /// An already sanitized FTS5 match expression.
    FullText(&'a str),
    /// Attachment file extension including the dot, e.g. `.pdf`.
    Extension(&'a str),
}

impl Search<'_> {
    fn condition(&self) -> &'static str {
        match self {
            Self::FullText(_) => {
                "e.id IN (SELECT rowid FROM emails_fts WHERE emails_fts MATCH ?)"
            }
            Self::Extension(_) => "e.attachments_json LIKE ?",
        }
    }

    fn argument(&self) -> String {
        match self {
            Self::FullText(q) => q.to_string(),
            Self::Extension(ext) => format!("%{}\"%", ext.replace('%', "").replace('_', "")),
        }
    }
}

fn message_from_row(row: &SqliteRow) -> CachedMessage {
    let attachments: String = row.get(9);
    let labels: Option<String> = row.get(10);

    CachedMessage {
        uid: row.get(0),
        folder: row.get(1),
        subject: row.get(2),
        sender: row.get(3),
        recipients: row.get(4),
        body: row.get(5),
        html: row.get(6),
        date_iso: row.get(7),
        date_str: row.get(8),
        attachments: serde_json::from_str(&attachments).unwrap_or_default(),
        labels: labels
            .unwrap_or_default()
            .split(',')
            .filter_map(|id| id.trim().parse().ok())
            .collect(),
    }
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?;
        Self::connect(options).await
    }

    pub async fn open(path: &Path) -> Result<Self> {
        Self::connect(SqliteConnectOptions::new().filename(path)).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");
        sqlx::query(schema).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn folder_ids(&self, folder: &str) -> Result<Vec<u32>> {
        let rows = sqlx::query("SELECT remote_id FROM emails WHERE folder = ? AND remote_id > 0")
            .bind(folder)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }

    /// Ids whose body has not been backfilled yet.
    pub async fn incomplete_ids(&self, folder: &str) -> Result<Vec<u32>> {
        let rows = sqlx::query(
            "SELECT remote_id FROM emails WHERE folder = ? AND remote_id > 0 AND html = ''",
        )
        .bind(folder)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }

    /// The newest `limit` ids of a folder.
    pub async fn recent_ids(&self, folder: &str, limit: usize) -> Result<Vec<u32>> {
        let rows = sqlx::query(
            "SELECT remote_id FROM emails WHERE folder = ? AND remote_id > 0 \
             ORDER BY date_iso DESC, remote_id DESC LIMIT ?",
        )
        .bind(folder)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }

    /// Remove rows carrying an invalid remote id.
    pub async fn purge_invalid_ids(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM emails WHERE remote_id IS NULL OR remote_id <= 0")
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            warn!("Purged {} row(s) with an invalid remote id", result.rows_affected());
        }
        Ok(result.rows_affected())
    }

    pub async fn delete_messages(&self, folder: &str, uids: &[u32]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for uid in uids {
            deleted += sqlx::query("DELETE FROM emails WHERE remote_id = ? AND folder = ?")
                .bind(uid)
                .bind(folder)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(deleted)
    }

    pub async fn clear_folder(&self, folder: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM emails WHERE folder = ?")
            .bind(folder)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Persist a batch of header-only rows and their labels in one transaction.
    /// Rows with a remote id of zero are skipped.
    pub async fn insert_headers(&self, folder: &str, headers: &[HeaderRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut stored = 0;
        for header in headers {
            if header.uid == 0 {
                warn!("Refusing to store a message without id in {}", folder);
                continue;
            }
            sqlx::query(
                "INSERT INTO emails (remote_id, folder, subject, sender, recipients, date_iso, date_str)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(remote_id, folder) DO UPDATE SET subject=excluded.subject,
                 sender=excluded.sender, recipients=excluded.recipients,
                 date_iso=excluded.date_iso, date_str=excluded.date_str",
            )
            .bind(header.uid)
            .bind(folder)
            .bind(&header.subject)
            .bind(&header.sender)
            .bind(&header.recipients)
            .bind(&header.date_iso)
            .bind(&header.date_str)
            .execute(&mut *tx)
            .await?;

            set_labels(&mut tx, folder, header.uid, &header.labels).await?;
            stored += 1;
        }
        tx.commit().await?;
        Ok(stored)
    }

    /// Write backfilled bodies onto existing rows. Returns the rows updated.
    pub async fn fill_bodies(&self, folder: &str, bodies: &[BodyRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;
        for record in bodies {
            let attachments = serde_json::to_string(&record.attachments)?;
            updated += sqlx::query(
                "UPDATE emails SET body = ?, html = ?, attachments_json = ?
                 WHERE remote_id = ? AND folder = ?",
            )
            .bind(&record.body)
            .bind(&record.html)
            .bind(attachments)
            .bind(record.uid)
            .bind(folder)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(updated)
    }

    pub async fn message(&self, folder: &str, uid: u32) -> Result<Option<CachedMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM emails e WHERE e.folder = ? AND e.remote_id = ?",
            MESSAGE_COLUMNS
        ))
        .bind(folder)
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(message_from_row))
    }

    /// Cached rows for the given (folder, id) keys; keys without a row are skipped.
    pub async fn messages_by_keys(&self, keys: &[(String, u32)]) -> Result<Vec<CachedMessage>> {
        let mut messages = Vec::with_capacity(keys.len());
        for (folder, uid) in keys {
            if let Some(message) = self.message(folder, *uid).await? {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    pub async fn count_folder(&self, folder: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM emails WHERE folder = ? AND remote_id > 0")
            .bind(folder)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get(0))
    }

    pub async fn page_folder(
        &self,
        folder: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CachedMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM emails e WHERE e.folder = ? AND e.remote_id > 0
             ORDER BY e.date_iso DESC, e.remote_id DESC LIMIT ? OFFSET ?",
            MESSAGE_COLUMNS
        ))
        .bind(folder)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    pub async fn count_search(&self, search: Search<'_>) -> Result<i64> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) FROM emails e WHERE e.remote_id > 0 AND {}",
            search.condition()
        ))
        .bind(search.argument())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get(0))
    }

    pub async fn page_search(
        &self,
        search: Search<'_>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CachedMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM emails e WHERE e.remote_id > 0 AND {}
             ORDER BY e.date_iso DESC, e.remote_id DESC LIMIT ? OFFSET ?",
            MESSAGE_COLUMNS,
            search.condition()
        ))
        .bind(search.argument())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    pub async fn count_label(&self, label_id: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM emails e
             JOIN email_labels l ON l.remote_id = e.remote_id AND l.folder = e.folder
             WHERE l.label_id = ? AND e.remote_id > 0",
        )
        .bind(label_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get(0))
    }

    pub async fn page_label(
        &self,
        label_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CachedMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM emails e
             JOIN email_labels m ON m.remote_id = e.remote_id AND m.folder = e.folder
             WHERE m.label_id = ? AND e.remote_id > 0
             ORDER BY e.date_iso DESC, e.remote_id DESC LIMIT ? OFFSET ?",
            MESSAGE_COLUMNS
        ))
        .bind(label_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    /// Top full-text hits as (subject, sender, date_str).
    pub async fn search_suggestions(
        &self,
        fts_query: &str,
        limit: i64,
    ) -> Result<Vec<(String, String, String)>> {
        let rows = sqlx::query(
            "SELECT subject, sender, date_str FROM emails
             WHERE id IN (SELECT rowid FROM emails_fts WHERE emails_fts MATCH ?)
             ORDER BY date_iso DESC LIMIT ?",
        )
        .bind(fts_query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get(0), r.get(1), r.get(2)))
            .collect())
    }

    /// Contacts matching `needle` first, then distinct cached senders.
    pub async fn contact_suggestions(&self, needle: &str, limit: usize) -> Result<Vec<String>> {
        let pattern = format!("%{}%", needle);
        let mut suggestions: Vec<String> = Vec::new();

        let rows = sqlx::query(
            "SELECT name, email FROM contacts WHERE name LIKE ? OR email LIKE ? ORDER BY name LIMIT ?",
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let name: String = row.get(0);
            let email: String = row.get(1);
            let entry = if name.trim().is_empty() {
                email
            } else {
                format!("{} <{}>", name.trim(), email)
            };
            if !suggestions.contains(&entry) {
                suggestions.push(entry);
            }
        }

        if suggestions.len() < limit {
            let rows = sqlx::query(
                "SELECT DISTINCT sender FROM emails WHERE sender LIKE ? ORDER BY sender LIMIT ?",
            )
            .bind(&pattern)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            for row in rows {
                let sender: String = row.get(0);
                if suggestions.len() >= limit {
                    break;
                }
                if !sender.is_empty() && !suggestions.contains(&sender) {
                    suggestions.push(sender);
                }
            }
        }

        Ok(suggestions)
    }

    /// Ids in `folder` whose sender contains `address`.
    pub async fn ids_from_sender(&self, folder: &str, address: &str) -> Result<Vec<u32>> {
        let rows = sqlx::query(
            "SELECT remote_id FROM emails WHERE folder = ? AND remote_id > 0 AND sender LIKE ?",
        )
        .bind(folder)
        .bind(format!("%{}%", address))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }

    /// Re-file rows after a successful remote move. Rows whose key already
    /// exists in `to` are dropped from `from` instead.
    pub async fn move_local(&self, from: &str, uids: &[u32], to: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for uid in uids {
            sqlx::query("UPDATE OR IGNORE emails SET folder = ? WHERE folder = ? AND remote_id = ?")
                .bind(to)
                .bind(from)
                .bind(uid)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM emails WHERE folder = ? AND remote_id = ?")
                .bind(from)
                .bind(uid)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!("Moved {} cached row(s) {} -> {}", uids.len(), from, to);
        Ok(())
    }

    /// Recompute every label assignment from the label keywords, in one
    /// transaction. The assignments are cleared before anything is read so the
    /// transaction already holds the write lock; rows inserted by a concurrent
    /// sync either land before the read or wait for the commit.
    /// Returns the number of labelled rows.
    pub async fn reapply_labels(&self) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM email_labels")
            .execute(&mut *tx)
            .await?;

        let labels: Vec<Label> = sqlx::query(LABEL_QUERY)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(label_from_row)
            .collect();
        let rows = sqlx::query("SELECT folder, remote_id, sender, subject FROM emails WHERE remote_id > 0")
            .fetch_all(&mut *tx)
            .await?;

        let mut labelled = 0;
        for row in rows {
            let folder: String = row.get(0);
            let uid: u32 = row.get(1);
            let ids = classifier::match_labels(&row.get::<String, _>(2), &row.get::<String, _>(3), &labels);
            if !ids.is_empty() {
                set_labels(&mut tx, &folder, uid, &ids).await?;
                labelled += 1;
            }
        }
        tx.commit().await?;
        Ok(labelled)
    }

    pub async fn assign_label(&self, label_id: i64, keys: &[(String, u32)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (folder, uid) in keys {
            sqlx::query(
                "INSERT OR IGNORE INTO email_labels (remote_id, folder, label_id)
                 SELECT remote_id, folder, ? FROM emails WHERE remote_id = ? AND folder = ?",
            )
            .bind(label_id)
            .bind(uid)
            .bind(folder)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn add_label(
        &self,
        name: &str,
        color: &str,
        keyword: &str,
        check_field: CheckField,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO labels (name, color, keyword, check_field) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(color)
        .bind(keyword)
        .bind(check_field.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_labels(&self) -> Result<Vec<Label>> {
        let rows = sqlx::query(LABEL_QUERY).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(label_from_row).collect())
    }

    pub async fn delete_label(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM labels WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_rule(
        &self,
        keyword: &str,
        target_folder: &str,
        check_field: CheckField,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO rules (keyword, target_folder, check_field) VALUES (?, ?, ?)",
        )
        .bind(keyword)
        .bind(target_folder)
        .bind(check_field.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_rules(&self) -> Result<Vec<Rule>> {
        let rows = sqlx::query("SELECT id, keyword, target_folder, check_field FROM rules ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Rule {
                id: row.get(0),
                keyword: row.get(1),
                target_folder: row.get(2),
                check_field: CheckField::parse(&row.get::<String, _>(3)),
            })
            .collect())
    }

    pub async fn delete_rule(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn upsert_contact(&self, name: &str, email: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO contacts (name, email) VALUES (?, ?)
             ON CONFLICT(email) DO UPDATE SET name=excluded.name",
        )
        .bind(name)
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_contacts(&self) -> Result<Vec<Contact>> {
        let rows = sqlx::query("SELECT id, name, email FROM contacts ORDER BY name ASC, email ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Contact {
                id: row.get(0),
                name: row.get(1),
                email: row.get(2),
            })
            .collect())
    }

    pub async fn delete_contact(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM contacts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn replace_folders(&self, remote: &[RemoteFolder]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM local_folders")
            .execute(&mut *tx)
            .await?;
        for folder in remote {
            sqlx::query("INSERT OR IGNORE INTO local_folders (name, delimiter) VALUES (?, ?)")
                .bind(&folder.name)
                .bind(&folder.delimiter)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_folders(&self) -> Result<Vec<Folder>> {
        let rows = sqlx::query("SELECT name, delimiter FROM local_folders ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut folders: Vec<Folder> = rows
            .into_iter()
            .map(|row| {
                let name: String = row.get(0);
                let delimiter: Option<String> = row.get(1);
                Folder {
                    display_name: folders::display_name(&name, delimiter.as_deref()),
                    name,
                    delimiter,
                }
            })
            .collect();

        // INBOX first, the rest by name
        folders.sort_by(|a, b| {
            let a_inbox = a.name.eq_ignore_ascii_case("INBOX");
            let b_inbox = b.name.eq_ignore_ascii_case("INBOX");
            b_inbox.cmp(&a_inbox).then_with(|| a.name.cmp(&b.name))
        });

        Ok(folders)
    }
}

fn label_from_row(row: &SqliteRow) -> Label {
    Label {
        id: row.get(0),
        name: row.get(1),
        color: row.get(2),
        keyword: row.get(3),
        check_field: CheckField::parse(&row.get::<String, _>(4)),
    }
}

async fn set_labels(
    tx: &mut Transaction<'_, Sqlite>,
    folder: &str,
    uid: u32,
    labels: &[i64],
) -> Result<()> {
    sqlx::query("DELETE FROM email_labels WHERE remote_id = ? AND folder = ?")
        .bind(uid)
        .bind(folder)
        .execute(&mut **tx)
        .await?;
    for label_id in labels {
        sqlx::query("INSERT OR IGNORE INTO email_labels (remote_id, folder, label_id) VALUES (?, ?, ?)")
            .bind(uid)
            .bind(folder)
            .bind(label_id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn database() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).await.unwrap();
        db.run_migrations().await.unwrap();
        (dir, db)
    }

    fn header(uid: u32, subject: &str, date_iso: &str) -> HeaderRecord {
        HeaderRecord {
            uid,
            subject: subject.to_string(),
            sender: "Alice <alice@example.com>".to_string(),
            recipients: "Bob".to_string(),
            date_iso: date_iso.to_string(),
            date_str: date_iso.to_string(),
            labels: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_header_then_body_backfill() {
        let (_dir, db) = database().await;
        db.insert_headers("INBOX", &[header(1, "Hello", "2024-01-01T10:00:00Z")])
            .await
            .unwrap();
        assert_eq!(db.incomplete_ids("INBOX").await.unwrap(), vec![1]);

        db.fill_bodies(
            "INBOX",
            &[BodyRecord {
                uid: 1,
                body: "zebra crossing".to_string(),
                html: "<p>zebra crossing</p>".to_string(),
                attachments: vec![Attachment {
                    filename: "plan.pdf".to_string(),
                    size: 10,
                    content_type: "application/pdf".to_string(),
                }],
            }],
        )
        .await
        .unwrap();

        assert!(db.incomplete_ids("INBOX").await.unwrap().is_empty());
        let found = db
            .page_search(Search::FullText("\"zebra\"*"), 50, 0)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].attachments[0].filename, "plan.pdf");

        let by_ext = db.count_search(Search::Extension(".pdf")).await.unwrap();
        assert_eq!(by_ext, 1);
    }

    #[tokio::test]
    async fn test_zero_id_never_stored() {
        let (_dir, db) = database().await;
        let stored = db
            .insert_headers(
                "INBOX",
                &[header(0, "bad", "2024-01-01T10:00:00Z"), header(2, "ok", "2024-01-01T10:00:00Z")],
            )
            .await
            .unwrap();
        assert_eq!(stored, 1);
        assert_eq!(db.folder_ids("INBOX").await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_labels_follow_moves_and_deletes() {
        let (_dir, db) = database().await;
        let label = db
            .add_label("Work", "#fff", "report", CheckField::Subject)
            .await
            .unwrap();
        let mut row = header(3, "Weekly report", "2024-01-02T10:00:00Z");
        row.labels = vec![label];
        db.insert_headers("INBOX", &[row]).await.unwrap();
        assert_eq!(db.count_label(label).await.unwrap(), 1);

        db.move_local("INBOX", &[3], "INBOX.Work").await.unwrap();
        let moved = db.page_label(label, 50, 0).await.unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].folder, "INBOX.Work");
        assert_eq!(moved[0].labels, vec![label]);

        db.delete_messages("INBOX.Work", &[3]).await.unwrap();
        assert_eq!(db.count_label(label).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reapply_labels_keeps_concurrent_inserts() {
        let (_dir, db) = database().await;
        let label = db
            .add_label("Work", "#fff", "report", CheckField::Subject)
            .await
            .unwrap();
        db.insert_headers("INBOX", &[header(1, "Monthly report", "2024-01-01T10:00:00Z")])
            .await
            .unwrap();

        let mut row = header(2, "Weekly report", "2024-01-02T10:00:00Z");
        row.labels = vec![label];
        let rows = [row];
        let (labelled, stored) = tokio::join!(db.reapply_labels(), db.insert_headers("INBOX", &rows));
        assert!(labelled.unwrap() >= 1);
        assert_eq!(stored.unwrap(), 1);
        assert_eq!(db.count_label(label).await.unwrap(), 2);

        assert_eq!(db.reapply_labels().await.unwrap(), 2);
        assert_eq!(db.count_label(label).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_page_order_newest_first() {
        let (_dir, db) = database().await;
        db.insert_headers(
            "INBOX",
            &[
                header(1, "old", "2024-01-01T10:00:00Z"),
                header(2, "new", "2024-03-01T10:00:00Z"),
                header(3, "same time", "2024-03-01T10:00:00Z"),
            ],
        )
        .await
        .unwrap();

        let page = db.page_folder("INBOX", 2, 0).await.unwrap();
        let ids: Vec<u32> = page.iter().map(|m| m.uid).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(db.count_folder("INBOX").await.unwrap(), 3);
        assert_eq!(db.recent_ids("INBOX", 1).await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_contact_upsert_and_suggestions() {
        let (_dir, db) = database().await;
        db.upsert_contact("Ann", "ann@example.com").await.unwrap();
        db.upsert_contact("Ann Smith", "ann@example.com").await.unwrap();
        let contacts = db.get_contacts().await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name, "Ann Smith");

        let mut row = header(1, "hi", "2024-01-01T10:00:00Z");
        row.sender = "Annika <annika@example.com>".to_string();
        db.insert_headers("INBOX", &[row]).await.unwrap();

        let suggestions = db.contact_suggestions("ann", 10).await.unwrap();
        assert_eq!(
            suggestions,
            vec![
                "Ann Smith <ann@example.com>".to_string(),
                "Annika <annika@example.com>".to_string()
            ]
        );
    }
}
