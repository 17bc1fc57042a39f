//! Persisted entity records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A forum container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: u64,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

/// A conversation under a channel. Carries the starter message's rendered
/// body inline; `reply_count` is maintained separately from upserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: u64,
    pub channel_id: u64,
    pub slug: String,
    pub title: String,
    pub author_alias: String,
    pub body_html: String,
    pub tags: Vec<String>,
    pub reply_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message within a thread (the starter included).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: u64,
    pub thread_id: u64,
    pub author_alias: String,
    pub body_html: String,
    /// Referenced post, when the referent exists in the store. Both reply
    /// fields are null otherwise; deferred repair fills them in later.
    pub reply_to_id: Option<u64>,
    pub reply_to_author_alias: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PostRecord {
    /// Whether an upsert of `other` over `self` would change stored
    /// content (timestamps aside).
    pub fn content_differs(&self, other: &PostRecord) -> bool {
        self.author_alias != other.author_alias
            || self.body_html != other.body_html
            || self.reply_to_id != other.reply_to_id
            || self.reply_to_author_alias != other.reply_to_author_alias
    }
}

impl ThreadRecord {
    /// Whether an upsert of `other` over `self` would change stored
    /// content (`reply_count` and timestamps aside).
    pub fn content_differs(&self, other: &ThreadRecord) -> bool {
        self.channel_id != other.channel_id
            || self.slug != other.slug
            || self.title != other.title
            || self.author_alias != other.author_alias
            || self.body_html != other.body_html
            || self.tags != other.tags
    }
}

/// Optional public label attached to an identity hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffRole {
    pub user_id_hash: String,
    pub public_tag: String,
    pub added_by: String,
    pub added_at: DateTime<Utc>,
}
