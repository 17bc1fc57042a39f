//! The typed store gateway.
//!
//! Every operation maps to parameterized SQL in the production
//! implementation; the trait exists so the sync engine can run against an
//! in-memory fake in tests.

use crate::error::StoreError;
use crate::store::cursor::SyncCursor;
use crate::store::types::{ChannelRecord, PostRecord, StaffRole, ThreadRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert the channel or update it when name, description, or
    /// position changed. Never deletes.
    async fn upsert_channel(&self, channel: &ChannelRecord) -> Result<(), StoreError>;

    /// Insert-or-update the thread row. `reply_count` is never touched by
    /// this call.
    async fn upsert_thread(&self, thread: &ThreadRecord) -> Result<(), StoreError>;

    /// Atomically upsert the thread row together with its starter post
    /// (and the initial reply count on insert). Rolls back as a unit.
    async fn upsert_thread_with_starter(
        &self,
        thread: &ThreadRecord,
        starter: &PostRecord,
    ) -> Result<(), StoreError>;

    async fn upsert_post(&self, post: &PostRecord) -> Result<(), StoreError>;

    async fn count_posts(&self, thread_id: u64) -> Result<i64, StoreError>;

    async fn set_thread_reply_count(&self, thread_id: u64, count: i64) -> Result<(), StoreError>;

    async fn find_thread(&self, id: u64) -> Result<Option<ThreadRecord>, StoreError>;

    /// Thread currently holding `slug`, if any. Used for collision-safe
    /// slug assignment.
    async fn find_thread_by_slug(&self, slug: &str) -> Result<Option<u64>, StoreError>;

    async fn update_thread_body(
        &self,
        thread_id: u64,
        body_html: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Delete the thread, cascading to its posts. Returns whether a row
    /// was removed.
    async fn delete_thread(&self, id: u64) -> Result<bool, StoreError>;

    async fn find_post(&self, id: u64) -> Result<Option<PostRecord>, StoreError>;

    /// Deferred-reference repair write: point the post at its referent.
    async fn set_post_reply(
        &self,
        post_id: u64,
        reply_to_id: u64,
        reply_to_author_alias: &str,
    ) -> Result<(), StoreError>;

    async fn update_post_body(
        &self,
        post_id: u64,
        body_html: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Delete the post; referring posts' reply fields null out. Returns
    /// whether a row was removed.
    async fn delete_post(&self, id: u64) -> Result<bool, StoreError>;

    async fn get_cursor(&self) -> Result<SyncCursor, StoreError>;

    /// Persist the watermark and clear the first-run flag.
    async fn set_cursor(&self, last_sync: DateTime<Utc>) -> Result<(), StoreError>;

    /// Public staff tag for an identity hash, if one exists.
    async fn staff_tag(&self, user_id_hash: &str) -> Result<Option<String>, StoreError>;

    /// Insert or overwrite a staff role keyed by identity hash.
    async fn upsert_staff_role(&self, role: &StaffRole) -> Result<(), StoreError>;
}
