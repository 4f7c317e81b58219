//! Conversation grouping of a page of messages.
//!
//! Grouping is a pure function of the input: the same members always produce
//! the same thread keys and the same order.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use inflections::case::to_title_case;
use sha2::{Digest, Sha256};

use crate::folders;
use crate::models::{Attachment, MailItem, MessageView};

const GENERIC_LOCAL_PARTS: &[&str] = &[
    "info",
    "kontakt",
    "contact",
    "support",
    "admin",
    "noreply",
    "no-reply",
    "hello",
    "hej",
    "order",
    "sales",
    "salj",
    "faktura",
    "invoice",
    "team",
    "nyhetsbrev",
    "kundservice",
    "kundtjanst",
];

const REPLY_PREFIXES: &[&str] = &["re:", "sv:", "fw:", "fwd:", "aw:"];

/// A message with its resolved read/starred state.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadMember {
    pub message: MessageView,
    pub read: bool,
    pub starred: bool,
}

impl ThreadMember {
    pub fn display_sender(&self) -> String {
        let folder = self.message.folder();
        if folders::is_sent(folder) && !self.message.recipients().is_empty() {
            return format!("To: {}", self.message.recipients());
        }
        display_sender(self.message.sender())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    /// Hex SHA-256 grouping key.
    pub key: String,
    pub subject: String,
    /// Display sender of the newest member.
    pub sender: String,
    pub latest: Option<DateTime<Utc>>,
    /// Newest first.
    pub members: Vec<ThreadMember>,
    pub unread: bool,
    pub starred: bool,
    pub attachments: Vec<Attachment>,
    pub labels: Vec<i64>,
}

/// Subject with leading reply/forward markers removed.
pub fn normalize_subject(subject: &str) -> String {
    let mut rest = subject.trim();
    while let Some(prefix) = REPLY_PREFIXES.iter().find(|p| {
        rest.get(..p.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(p))
    }) {
        rest = rest[prefix.len()..].trim_start();
    }
    rest.trim().to_string()
}

/// Human-facing sender name.
///
/// `Name <addr>` shows the name. Role addresses such as `info@` or `noreply@`
/// show the company from the domain instead, and a bare address shows its
/// local part title-cased.
pub fn display_sender(sender: &str) -> String {
    let sender = sender.trim();
    let (name, address) = match (sender.find('<'), sender.rfind('>')) {
        (Some(start), Some(end)) if end > start => {
            let name = sender[..start].trim().replace('"', "");
            let address = sender[start + 1..end].trim().to_string();
            (name, address)
        }
        _ => (String::new(), sender.to_string()),
    };
    let shown = if name.is_empty() { address.clone() } else { name };

    let Some((local, domain)) = address.split_once('@') else {
        return shown;
    };
    let local_lower = local.to_lowercase();
    let shown_lower = shown.to_lowercase();
    let generic = GENERIC_LOCAL_PARTS.contains(&shown_lower.as_str())
        || ((shown_lower == local_lower || shown_lower == address.to_lowercase())
            && GENERIC_LOCAL_PARTS.contains(&local_lower.as_str()));

    if generic {
        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() >= 2 {
            let mut company = labels[0];
            if ["mail", "smtp", "webmail"].contains(&company.to_lowercase().as_str())
                && labels.len() > 2
            {
                company = labels[1];
            }
            return to_title_case(&company.to_lowercase());
        }
        shown
    } else if shown == address {
        to_title_case(&local.replace(['.', '_'], " ").to_lowercase())
    } else {
        shown
    }
}

fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Drafts and subject-less messages each get a thread of their own. Other
/// messages are keyed on the sender shown, which in sent folders is the
/// recipient list.
pub fn thread_key(member: &ThreadMember) -> String {
    let message = &member.message;
    let subject = normalize_subject(message.subject());
    if folders::is_drafts(message.folder()) || subject.is_empty() {
        sha256_hex(&format!("{}_{}", message.uid(), message.folder()))
    } else {
        sha256_hex(&format!("{}-{}", subject, member.display_sender()))
    }
}

fn merge_attachments(into: &mut Vec<Attachment>, from: &[Attachment]) {
    for attachment in from {
        match into.iter_mut().find(|a| a.filename == attachment.filename) {
            Some(existing) if existing.size == 0 && attachment.size > 0 => {
                *existing = attachment.clone();
            }
            Some(_) => {}
            None => into.push(attachment.clone()),
        }
    }
}

pub fn group(members: Vec<ThreadMember>) -> Vec<Thread> {
    let mut members = members;
    members.sort_by(|a, b| {
        b.message
            .date()
            .cmp(&a.message.date())
            .then_with(|| b.message.uid().cmp(&a.message.uid()))
            .then_with(|| a.message.folder().cmp(b.message.folder()))
    });

    let mut order: Vec<String> = Vec::new();
    let mut threads: HashMap<String, Thread> = HashMap::new();

    for member in members {
        let key = thread_key(&member);
        let thread = threads.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            let subject = normalize_subject(member.message.subject());
            Thread {
                key: key.clone(),
                subject: if subject.is_empty() {
                    "(no subject)".to_string()
                } else {
                    subject
                },
                sender: member.display_sender(),
                latest: member.message.date(),
                members: Vec::new(),
                unread: false,
                starred: false,
                attachments: Vec::new(),
                labels: Vec::new(),
            }
        });

        thread.unread |= !member.read;
        thread.starred |= member.starred;
        merge_attachments(&mut thread.attachments, member.message.attachments());
        let labels: BTreeSet<i64> = thread
            .labels
            .iter()
            .chain(member.message.labels())
            .copied()
            .collect();
        thread.labels = labels.into_iter().collect();
        thread.members.push(member);
    }

    let mut grouped: Vec<Thread> = order
        .into_iter()
        .filter_map(|key| threads.remove(&key))
        .collect();
    grouped.sort_by(|a, b| b.latest.cmp(&a.latest).then_with(|| a.key.cmp(&b.key)));
    grouped
}
