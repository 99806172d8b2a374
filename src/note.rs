use crate::cipher::EncryptedEnvelope;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use url::Url;

pub const BUILTIN_CATEGORIES: [&str; 5] =
    ["sql", "url", "snippet", "command", "other"];

/// Snippet category. Unknown names become custom categories rather than
/// parse errors so older collections keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Sql,
    Url,
    Snippet,
    Command,
    Other,
    Custom(String),
}

impl Category {
    pub fn parse(name: &str) -> Category {
        let trimmed = name.trim().to_lowercase();
        match trimmed.as_str() {
            "sql" => Category::Sql,
            "url" => Category::Url,
            "snippet" => Category::Snippet,
            "command" => Category::Command,
            "other" | "" => Category::Other,
            _ => Category::Custom(trimmed),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Category::Sql => "sql",
            Category::Url => "url",
            Category::Snippet => "snippet",
            Category::Command => "command",
            Category::Other => "other",
            Category::Custom(name) => name,
        }
    }
}

impl From<String> for Category {
    fn from(name: String) -> Self {
        Category::parse(&name)
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.name().to_string()
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Default category from the environment, `other` when unset.
pub fn default_category() -> Category {
    std::env::var("SNIP_NOTES_DEFAULT_CATEGORY")
        .map(|v| Category::parse(&v))
        .unwrap_or(Category::Other)
}

/// Custom categories pinned via the environment (comma separated), shown by
/// `categories` even when no note uses them yet.
pub fn pinned_categories() -> Vec<Category> {
    std::env::var("SNIP_NOTES_CATEGORIES")
        .unwrap_or_default()
        .split(',')
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(Category::parse)
        .collect()
}

/// Auto-detect pasted links so they land in the `url` category.
pub fn looks_like_url(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.contains("://") && Url::parse(trimmed).is_ok()
}

/// One stored snippet. `text` is always an encrypted envelope above the
/// codec layer; plaintext only exists transiently in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub text: EncryptedEnvelope,
    pub category: Category,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Current time as an RFC 3339 UTC string with millisecond precision, the
/// format every stored timestamp uses.
pub fn timestamp_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(ts: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(ts).ok()
}

pub fn cmp_ts(a: &str, b: &str) -> Ordering {
    let a_dt = parse_timestamp(a);
    let b_dt = parse_timestamp(b);
    match (a_dt, b_dt) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// Insertion order is newest-first; this re-derives it from timestamps when
/// the persisted order is inconsistent. Defensive, not authoritative.
pub fn sort_newest_first(notes: &mut [Note]) {
    notes.sort_by(|a, b| cmp_ts(&b.timestamp, &a.timestamp));
}

/// Creation-timestamp id in milliseconds, bumped past any existing id so
/// two saves within one millisecond still get unique ids.
pub fn next_note_id(existing: &[Note]) -> i64 {
    let now = Utc::now().timestamp_millis();
    match existing.iter().map(|n| n.id).max() {
        Some(max) if max >= now => max + 1,
        _ => now,
    }
}
