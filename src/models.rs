use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::remote::{self, FetchedMessage, RemoteHeader};

/// Which header a rule or label keyword is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckField {
    #[default]
    Subject,
    Sender,
    Both,
}

impl CheckField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Sender => "sender",
            Self::Both => "both",
        }
    }

    /// Unknown or empty values fall back to `Subject`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "sender" => Self::Sender,
            "both" => Self::Both,
            _ => Self::Subject,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub keyword: String,
    pub target_folder: String,
    pub check_field: CheckField,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: i64,
    pub name: String,
    pub color: String,
    /// One or more comma-separated keywords.
    pub keyword: String,
    pub check_field: CheckField,
}

impl Label {
    pub fn keywords(&self) -> impl Iterator<Item = String> + '_ {
        self.keyword
            .split(',')
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub name: String,
    pub email: String,
}

/// A mail folder as mirrored in `local_folders`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub name: String,
    pub delimiter: Option<String>,
    pub display_name: String,
}

/// Metadata of a non-inline, non-image attachment, as serialized in `attachments_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub content_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageFlags {
    pub seen: bool,
    pub flagged: bool,
}

/// A row of the `emails` table plus its label ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMessage {
    pub uid: u32,
    pub folder: String,
    pub subject: String,
    pub sender: String,
    pub recipients: String,
    pub body: String,
    pub html: String,
    pub date_iso: String,
    pub date_str: String,
    pub attachments: Vec<Attachment>,
    pub labels: Vec<i64>,
}

impl CachedMessage {
    /// Rows written by phase 1 and not yet backfilled.
    pub fn is_header_only(&self) -> bool {
        self.html.is_empty()
    }
}

/// A message fetched straight from the remote store, never written to the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveMessage {
    pub uid: u32,
    pub folder: String,
    pub subject: String,
    pub sender: String,
    pub recipients: String,
    pub text: String,
    pub html: String,
    pub date: Option<DateTime<Utc>>,
    pub flags: MessageFlags,
    pub attachments: Vec<Attachment>,
    pub labels: Vec<i64>,
}

impl LiveMessage {
    pub fn from_remote(
        folder: &str,
        header: &RemoteHeader,
        message: &FetchedMessage,
        flags: MessageFlags,
    ) -> Self {
        Self {
            uid: message.uid,
            folder: folder.to_string(),
            subject: header.subject.clone().unwrap_or_default(),
            sender: header.sender_display(),
            recipients: header.recipients_display(),
            text: message.text.clone().unwrap_or_default(),
            html: remote::render_html(message),
            date: header.date.map(|d| d.with_timezone(&Utc)),
            flags,
            attachments: remote::attachment_metadata(&message.parts),
            labels: Vec::new(),
        }
    }
}

/// Uniform read access to cached rows and live remote messages.
pub trait MailItem {
    fn uid(&self) -> u32;
    fn folder(&self) -> &str;
    fn sender(&self) -> &str;
    fn recipients(&self) -> &str;
    fn subject(&self) -> &str;
    fn body(&self) -> &str;
    fn html(&self) -> &str;
    fn date(&self) -> Option<DateTime<Utc>>;
    /// Flags resolved by the remote store itself, if this item came from it.
    fn flags(&self) -> Option<MessageFlags>;
    fn attachments(&self) -> &[Attachment];
    fn labels(&self) -> &[i64];
}

impl MailItem for CachedMessage {
    fn uid(&self) -> u32 {
        self.uid
    }

    fn folder(&self) -> &str {
        &self.folder
    }

    fn sender(&self) -> &str {
        &self.sender
    }

    fn recipients(&self) -> &str {
        &self.recipients
    }

    fn subject(&self) -> &str {
        &self.subject
    }

    fn body(&self) -> &str {
        &self.body
    }

    fn html(&self) -> &str {
        &self.html
    }

    fn date(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.date_iso)
            .ok()
            .map(|d| d.with_timezone(&Utc))
    }

    fn flags(&self) -> Option<MessageFlags> {
        None
    }

    fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    fn labels(&self) -> &[i64] {
        &self.labels
    }
}

impl MailItem for LiveMessage {
    fn uid(&self) -> u32 {
        self.uid
    }

    fn folder(&self) -> &str {
        &self.folder
    }

    fn sender(&self) -> &str {
        &self.sender
    }

    fn recipients(&self) -> &str {
        &self.recipients
    }

    fn subject(&self) -> &str {
        &self.subject
    }

    fn body(&self) -> &str {
        &self.text
    }

    fn html(&self) -> &str {
        &self.html
    }

    fn date(&self) -> Option<DateTime<Utc>> {
        self.date
    }

    fn flags(&self) -> Option<MessageFlags> {
        Some(self.flags)
    }

    fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    fn labels(&self) -> &[i64] {
        &self.labels
    }
}

/// Either a cache row or a live remote message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageView {
    Cached(CachedMessage),
    Live(LiveMessage),
}

impl MessageView {
    fn item(&self) -> &dyn MailItem {
        match self {
            Self::Cached(m) => m as &dyn MailItem,
            Self::Live(m) => m as &dyn MailItem,
        }
    }

    /// Display timestamp; live messages are formatted on the fly.
    pub fn date_str(&self) -> String {
        match self {
            Self::Cached(m) => m.date_str.clone(),
            Self::Live(m) => m.date.map(|d| format_display_date(&d)).unwrap_or_default(),
        }
    }
}

impl MailItem for MessageView {
    fn uid(&self) -> u32 {
        self.item().uid()
    }

    fn folder(&self) -> &str {
        self.item().folder()
    }

    fn sender(&self) -> &str {
        self.item().sender()
    }

    fn recipients(&self) -> &str {
        self.item().recipients()
    }

    fn subject(&self) -> &str {
        self.item().subject()
    }

    fn body(&self) -> &str {
        self.item().body()
    }

    fn html(&self) -> &str {
        self.item().html()
    }

    fn date(&self) -> Option<DateTime<Utc>> {
        self.item().date()
    }

    fn flags(&self) -> Option<MessageFlags> {
        self.item().flags()
    }

    fn attachments(&self) -> &[Attachment] {
        self.item().attachments()
    }

    fn labels(&self) -> &[i64] {
        self.item().labels()
    }
}

impl From<CachedMessage> for MessageView {
    fn from(m: CachedMessage) -> Self {
        Self::Cached(m)
    }
}

impl From<LiveMessage> for MessageView {
    fn from(m: LiveMessage) -> Self {
        Self::Live(m)
    }
}

pub fn format_display_date(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M").to_string()
}
