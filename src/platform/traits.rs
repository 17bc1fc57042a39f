//! The narrow platform-client trait.
//!
//! The traversal engine and reconciler only ever see this interface, so
//! the SDK can be swapped (or mocked in tests) without touching them.

use crate::error::PlatformError;
use crate::platform::types::{ForumChannelRef, GuildRef, SourceMessage, ThreadRef};
use async_trait::async_trait;

#[async_trait]
pub trait Platform: Send + Sync {
    /// Guilds currently visible to the client.
    async fn list_guilds(&self) -> Result<Vec<GuildRef>, PlatformError>;

    /// Forum-type channels in a guild.
    async fn list_forum_channels(&self, guild_id: u64)
        -> Result<Vec<ForumChannelRef>, PlatformError>;

    /// Active (unarchived) threads across a guild.
    async fn list_active_threads(&self, guild_id: u64) -> Result<Vec<ThreadRef>, PlatformError>;

    /// Archived public threads under one forum channel.
    async fn list_archived_threads(&self, channel_id: u64)
        -> Result<Vec<ThreadRef>, PlatformError>;

    /// One page of messages in a thread, newest first, optionally bounded
    /// above by `before` (exclusive).
    async fn list_messages(
        &self,
        thread_id: u64,
        before: Option<u64>,
        limit: u8,
    ) -> Result<Vec<SourceMessage>, PlatformError>;

    /// The thread's starter message (shares the thread's ID). `None` when
    /// it was deleted upstream.
    async fn fetch_starter_message(
        &self,
        thread_id: u64,
    ) -> Result<Option<SourceMessage>, PlatformError>;
}
