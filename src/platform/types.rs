//! Internal representations of platform entities.
//!
//! Everything downstream of the traversal consumes these fully-fetched
//! records; serenity types never cross this boundary.

use chrono::{DateTime, Utc};

/// A guild (top-level tenant) visible to the client.
#[derive(Debug, Clone)]
pub struct GuildRef {
    pub id: u64,
    pub name: String,
}

/// A forum channel within a guild.
#[derive(Debug, Clone)]
pub struct ForumChannelRef {
    pub id: u64,
    pub guild_id: u64,
    pub name: String,
    pub topic: Option<String>,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

/// A thread under a forum channel.
#[derive(Debug, Clone)]
pub struct ThreadRef {
    pub id: u64,
    /// Parent forum channel.
    pub channel_id: u64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Set once the thread is archived; used by delta filtering.
    pub archive_timestamp: Option<DateTime<Utc>>,
    /// Resolved tag names, in application order.
    pub tags: Vec<String>,
}

/// Attachment metadata as observed on a message.
#[derive(Debug, Clone)]
pub struct SourceAttachment {
    pub url: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: u64,
}

/// A message observed in a thread.
#[derive(Debug, Clone)]
pub struct SourceMessage {
    pub id: u64,
    /// The thread the message belongs to.
    pub thread_id: u64,
    pub author_id: u64,
    pub author_is_bot: bool,
    pub content: String,
    pub attachments: Vec<SourceAttachment>,
    /// `reference.message_id` on the wire; resolved against the store
    /// during reconciliation.
    pub reply_to_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

impl SourceMessage {
    /// Timestamp reflecting the latest content revision.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.edited_at.unwrap_or(self.created_at)
    }
}
