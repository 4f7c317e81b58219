use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::document::JsonDocument;
use crate::error::Result;

/// Keyword lists driving spam and advertisement classification.
///
/// A sender address lives in at most one of `senders`, `ads_senders` and
/// `whitelist`; the `FilterStore` mutators maintain that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSet {
    /// Blocked senders.
    pub senders: Vec<String>,
    /// Spam subject keywords.
    pub subjects: Vec<String>,
    pub whitelist: Vec<String>,
    pub ads_senders: Vec<String>,
    pub ads_subjects: Vec<String>,
}

impl Default for FilterSet {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            senders: Vec::new(),
            subjects: owned(&["casino", "viagra", "lån", "vinst", "bitcoin"]),
            whitelist: Vec::new(),
            ads_subjects: owned(&[
                "reklam",
                "erbjudande",
                "nyhetsbrev",
                "unsubscribe",
                "kampanj",
                "rea",
                "rabatt",
                "utförsäljning",
            ]),
            ads_senders: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SenderList {
    Blocked,
    Ads,
    Whitelist,
}

impl FilterSet {
    fn list_mut(&mut self, list: SenderList) -> &mut Vec<String> {
        match list {
            SenderList::Blocked => &mut self.senders,
            SenderList::Ads => &mut self.ads_senders,
            SenderList::Whitelist => &mut self.whitelist,
        }
    }

    /// Put `sender` in `list` and take it out of the other two.
    fn place_sender(&mut self, sender: &str, list: SenderList) -> bool {
        let mut changed = false;
        for other in [SenderList::Blocked, SenderList::Ads, SenderList::Whitelist] {
            let entries = self.list_mut(other);
            if other == list {
                if !entries.iter().any(|s| s == sender) {
                    entries.push(sender.to_string());
                    changed = true;
                }
            } else {
                let before = entries.len();
                entries.retain(|s| s != sender);
                changed |= entries.len() != before;
            }
        }
        changed
    }
}

/// `Name <addr>` -> `addr`; anything else is trimmed and returned as is.
pub fn bare_address(sender: &str) -> String {
    let sender = sender.trim();
    match (sender.rfind('<'), sender.rfind('>')) {
        (Some(start), Some(end)) if end > start => sender[start + 1..end].trim().to_string(),
        (Some(start), None) => sender[start + 1..].trim().to_string(),
        _ => sender.to_string(),
    }
}

/// The persisted filter set (`spam_filters.json`).
pub struct FilterStore {
    doc: JsonDocument<FilterSet>,
}

impl FilterStore {
    pub async fn open(dir: &Path) -> Self {
        Self {
            doc: JsonDocument::open(dir.join("spam_filters.json")).await,
        }
    }

    pub async fn filters(&self) -> FilterSet {
        self.doc.read(|f| f.clone()).await
    }

    pub async fn block_sender(&self, sender: &str) -> Result<bool> {
        self.place(sender, SenderList::Blocked).await
    }

    pub async fn mark_ad_sender(&self, sender: &str) -> Result<bool> {
        self.place(sender, SenderList::Ads).await
    }

    pub async fn whitelist_sender(&self, sender: &str) -> Result<bool> {
        self.place(sender, SenderList::Whitelist).await
    }

    async fn place(&self, sender: &str, list: SenderList) -> Result<bool> {
        let sender = bare_address(sender);
        if sender.is_empty() {
            return Ok(false);
        }
        let changed = self
            .doc
            .update(|f| {
                let changed = f.place_sender(&sender, list);
                (changed, changed)
            })
            .await?;
        if changed {
            info!("Sender {} moved to {:?} list", sender, list);
        }
        Ok(changed)
    }
}
