//! Interface to the remote mail store.
//!
//! The transport (IMAP session, TLS, auth) lives outside this crate. It is
//! consumed through [`RemoteStore`], which hands out one [`RemoteSession`] per
//! unit of work. Every session call may fail; callers in this crate treat
//! those failures as transient.

use anyhow::Result;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, FixedOffset};
use tracing::warn;

use crate::error::Error;
use crate::models::Attachment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    pub name: String,
    /// Hierarchy delimiter reported by the store for this folder.
    pub delimiter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub name: Option<String>,
    pub email: String,
}

/// Header-only fetch result. `uid` is `None` when the store omitted it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteHeader {
    pub uid: Option<u32>,
    pub subject: Option<String>,
    pub from: Option<Address>,
    pub to: Vec<Address>,
    pub date: Option<DateTime<FixedOffset>>,
}

impl RemoteHeader {
    /// `Name <addr>` when the sender has a display name, the bare address otherwise.
    pub fn sender_display(&self) -> String {
        match &self.from {
            Some(Address {
                name: Some(name),
                email,
            }) if !name.trim().is_empty() => format!("{} <{}>", name.trim(), email),
            Some(addr) => addr.email.clone(),
            None => String::new(),
        }
    }

    pub fn recipients_display(&self) -> String {
        self.to
            .iter()
            .map(|a| match &a.name {
                Some(name) if !name.trim().is_empty() => name.trim().to_string(),
                _ => a.email.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessagePart {
    pub filename: Option<String>,
    pub content_type: String,
    pub content_id: Option<String>,
    pub disposition: Option<String>,
    pub size: u64,
    pub payload: Vec<u8>,
}

impl MessagePart {
    pub fn is_inline(&self) -> bool {
        self.content_id.is_some()
            || self
                .disposition
                .as_deref()
                .is_some_and(|d| d.eq_ignore_ascii_case("inline"))
    }

    pub fn is_image(&self) -> bool {
        self.content_type.to_lowercase().starts_with("image/")
    }
}

/// Full fetch result including attachment payloads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchedMessage {
    pub uid: u32,
    pub text: Option<String>,
    pub html: Option<String>,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteFlags {
    pub uid: u32,
    pub seen: bool,
    pub flagged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Seen,
    Flagged,
    Draft,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Open and authenticate a new session.
    async fn connect(&self) -> Result<Box<dyn RemoteSession>>;
}

#[async_trait]
pub trait RemoteSession: Send {
    async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>>;
    async fn select(&mut self, folder: &str) -> Result<()>;
    /// Ask the server to refresh the selected folder's state.
    async fn check(&mut self) -> Result<()>;
    async fn uids(&mut self) -> Result<Vec<u32>>;
    async fn fetch_headers(&mut self, uids: &[u32]) -> Result<Vec<RemoteHeader>>;
    async fn fetch_full(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>>;
    async fn fetch_flags(&mut self, uids: &[u32]) -> Result<Vec<RemoteFlags>>;
    async fn set_flag(&mut self, uids: &[u32], flag: Flag, value: bool) -> Result<()>;
    async fn move_to(&mut self, uids: &[u32], dest: &str) -> Result<()>;
    async fn copy_to(&mut self, uids: &[u32], dest: &str) -> Result<()>;
    async fn delete(&mut self, uids: &[u32]) -> Result<()>;
    async fn expunge(&mut self) -> Result<()>;
    async fn create_folder(&mut self, name: &str) -> Result<()>;
    async fn delete_folder(&mut self, name: &str) -> Result<()>;
    async fn subscribe(&mut self, name: &str) -> Result<()>;
    async fn append(&mut self, raw: &[u8], folder: &str, flags: &[Flag]) -> Result<()>;
}

/// Move `uids` from the selected folder `from` to `dest`.
///
/// Falls back to copy + delete when the server refuses MOVE. When both fail the
/// messages are left where they are and `Error::MoveFailed` is returned.
pub async fn move_with_fallback(
    session: &mut dyn RemoteSession,
    from: &str,
    uids: &[u32],
    dest: &str,
) -> crate::error::Result<()> {
    if uids.is_empty() {
        return Ok(());
    }

    let move_err = match session.move_to(uids, dest).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    warn!(
        "MOVE of {} message(s) {} -> {} failed ({:#}), trying COPY + DELETE",
        uids.len(),
        from,
        dest,
        move_err
    );

    let copied = async {
        session.copy_to(uids, dest).await?;
        session.delete(uids).await
    }
    .await;

    match copied {
        Ok(()) => {
            if let Err(e) = session.expunge().await {
                warn!("EXPUNGE after copy fallback in {} failed: {:#}", from, e);
            }
            Ok(())
        }
        Err(e) => {
            warn!(
                "COPY + DELETE {} -> {} failed, leaving messages in place: {:#}",
                from, dest, e
            );
            Err(Error::MoveFailed {
                from: from.to_string(),
                dest: dest.to_string(),
                count: uids.len(),
            })
        }
    }
}

/// HTML body with every `cid:` reference replaced by an inline data URI.
/// Messages without an HTML part get their plain text wrapped in `<pre>`.
pub fn render_html(message: &FetchedMessage) -> String {
    let mut html = match &message.html {
        Some(html) if !html.is_empty() => html.clone(),
        _ => format!("<pre>{}</pre>", message.text.as_deref().unwrap_or_default()),
    };

    for part in &message.parts {
        let Some(cid) = &part.content_id else {
            continue;
        };
        let cid = cid.trim_matches(|c| c == '<' || c == '>');
        if cid.is_empty() {
            continue;
        }
        let data = general_purpose::STANDARD.encode(&part.payload);
        html = html.replace(
            &format!("cid:{}", cid),
            &format!("data:{};base64,{}", part.content_type, data),
        );
    }

    html
}

/// Attachment list shown to the user: inline parts and images are left out.
pub fn attachment_metadata(parts: &[MessagePart]) -> Vec<Attachment> {
    parts
        .iter()
        .filter(|p| !p.is_inline() && !p.is_image())
        .map(|p| Attachment {
            filename: p
                .filename
                .clone()
                .filter(|f| !f.is_empty())
                .unwrap_or_else(|| "noname".to_string()),
            size: p.size,
            content_type: p.content_type.clone(),
        })
        .collect()
}
