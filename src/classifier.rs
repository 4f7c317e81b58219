//! Disposition of incoming mail: rule routing, spam, advertisement, labels.
//!
//! Everything here is a pure function of the sender/subject strings and the
//! rule set. Matching is case-insensitive substring containment.

use crate::filters::FilterSet;
use crate::models::{CheckField, Label, Rule};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// A user rule matched; move to this folder.
    Route(String),
    Spam,
    Ad,
    Keep,
}

fn field_matches(field: CheckField, keyword: &str, sender: &str, subject: &str) -> bool {
    match field {
        CheckField::Subject => subject.contains(keyword),
        CheckField::Sender => sender.contains(keyword),
        CheckField::Both => subject.contains(keyword) || sender.contains(keyword),
    }
}

fn any_keyword(keywords: &[String], haystack: &str) -> bool {
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .any(|k| !k.is_empty() && haystack.contains(&k))
}

/// First rule whose keyword matches, if any.
pub fn route<'a>(sender: &str, subject: &str, rules: &'a [Rule]) -> Option<&'a Rule> {
    let sender = sender.to_lowercase();
    let subject = subject.to_lowercase();

    rules.iter().find(|rule| {
        let keyword = rule.keyword.trim().to_lowercase();
        !keyword.is_empty() && field_matches(rule.check_field, &keyword, &sender, &subject)
    })
}

pub fn is_whitelisted(sender: &str, filters: &FilterSet) -> bool {
    any_keyword(&filters.whitelist, &sender.to_lowercase())
}

pub fn is_spam(sender: &str, subject: &str, filters: &FilterSet) -> bool {
    if is_whitelisted(sender, filters) {
        return false;
    }
    any_keyword(&filters.senders, &sender.to_lowercase())
        || any_keyword(&filters.subjects, &subject.to_lowercase())
}

pub fn is_ad(sender: &str, subject: &str, filters: &FilterSet) -> bool {
    if is_whitelisted(sender, filters) {
        return false;
    }
    any_keyword(&filters.ads_senders, &sender.to_lowercase())
        || any_keyword(&filters.ads_subjects, &subject.to_lowercase())
}

/// Rules first, then the whitelist, then spam, then ads.
pub fn classify(sender: &str, subject: &str, rules: &[Rule], filters: &FilterSet) -> Disposition {
    if let Some(rule) = route(sender, subject, rules) {
        return Disposition::Route(rule.target_folder.clone());
    }
    if is_whitelisted(sender, filters) {
        return Disposition::Keep;
    }
    if is_spam(sender, subject, filters) {
        Disposition::Spam
    } else if is_ad(sender, subject, filters) {
        Disposition::Ad
    } else {
        Disposition::Keep
    }
}

/// Ids of every label with at least one matching keyword, in label order.
pub fn match_labels(sender: &str, subject: &str, labels: &[Label]) -> Vec<i64> {
    let sender = sender.to_lowercase();
    let subject = subject.to_lowercase();

    labels
        .iter()
        .filter(|label| {
            label
                .keywords()
                .any(|k| field_matches(label.check_field, &k, &sender, &subject))
        })
        .map(|label| label.id)
        .collect()
}
