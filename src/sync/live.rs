//! Live-update path: applies gateway events through the same reconciler
//! primitives as the batch sync. Handlers are idempotent and never touch
//! the sync cursor.

use crate::error::SyncError;
use crate::platform::{Platform, SourceMessage, ThreadRef};
use crate::store::Store;
use crate::sync::reconcile::Reconciler;
use crate::sync::traversal::{SyncMode, Traversal};

use std::sync::Arc;

/// Applies platform push events to the store.
pub struct LiveHandler {
    platform: Arc<dyn Platform>,
    store: Arc<dyn Store>,
    reconciler: Arc<Reconciler>,
    traversal: Traversal,
}

impl LiveHandler {
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<dyn Store>,
        reconciler: Arc<Reconciler>,
        traversal: Traversal,
    ) -> Self {
        Self {
            platform,
            store,
            reconciler,
            traversal,
        }
    }

    /// `message_create` in a forum thread: post reconciliation plus a
    /// reply-count bump. A message in a thread the mirror has not seen
    /// yet triggers full thread reconciliation instead.
    pub async fn message_created(&self, message: &SourceMessage) -> Result<(), SyncError> {
        if message.author_is_bot {
            return Ok(());
        }

        if self.store.find_thread(message.thread_id).await?.is_none() {
            return self.reconcile_thread_by_id(message.thread_id).await;
        }

        self.reconciler
            .reconcile_post(message.thread_id, message)
            .await?;
        self.reconciler.refresh_reply_count(message.thread_id).await?;

        tracing::debug!(message_id = message.id, thread_id = message.thread_id, "live post created");
        Ok(())
    }

    /// `message_update`: refresh the stored post body; when the ID names
    /// a thread, the starter was edited and the inline thread body
    /// refreshes too.
    pub async fn message_updated(&self, message: &SourceMessage) -> Result<(), SyncError> {
        let body_html = self.reconciler.render_message_body(message).await;
        let updated_at = message.updated_at();

        if self.store.find_post(message.id).await?.is_some() {
            self.store
                .update_post_body(message.id, &body_html, updated_at)
                .await?;
        }
        if self.store.find_thread(message.id).await?.is_some() {
            self.store
                .update_thread_body(message.id, &body_html, updated_at)
                .await?;
        }

        tracing::debug!(message_id = message.id, "live post updated");
        Ok(())
    }

    /// `message_delete`: remove the post and recompute the thread's
    /// reply count when a row actually went away.
    pub async fn message_deleted(&self, thread_id: u64, message_id: u64) -> Result<(), SyncError> {
        if self.store.delete_post(message_id).await? {
            self.reconciler.refresh_reply_count(thread_id).await?;
            tracing::debug!(message_id, thread_id, "live post deleted");
        }
        Ok(())
    }

    /// `thread_create` / `thread_update`: full thread-starter
    /// reconciliation.
    pub async fn thread_upserted(&self, thread: &ThreadRef) -> Result<(), SyncError> {
        self.reconcile_thread(thread).await
    }

    /// `thread_delete`: remove the thread; posts cascade.
    pub async fn thread_deleted(&self, thread_id: u64) -> Result<(), SyncError> {
        if self.store.delete_thread(thread_id).await? {
            tracing::info!(thread_id, "live thread deleted");
        }
        Ok(())
    }

    async fn reconcile_thread_by_id(&self, thread_id: u64) -> Result<(), SyncError> {
        let active = match self.guild_active_thread(thread_id).await? {
            Some(thread) => thread,
            None => return Ok(()),
        };
        self.reconcile_thread(&active).await
    }

    async fn reconcile_thread(&self, thread: &ThreadRef) -> Result<(), SyncError> {
        let Some(starter) = self.platform.fetch_starter_message(thread.id).await? else {
            return Ok(());
        };

        let pages = self
            .traversal
            .thread_messages(thread.id, SyncMode::Full)
            .await?;
        self.reconciler
            .reconcile_thread(thread, &starter, &pages.messages)
            .await?;
        Ok(())
    }

    /// Locate a thread ref by scanning the active thread lists of every
    /// visible guild. Live events carry only the channel ID, so an
    /// unmirrored thread has to be looked up before reconciliation.
    async fn guild_active_thread(&self, thread_id: u64) -> Result<Option<ThreadRef>, SyncError> {
        for guild in self.platform.list_guilds().await? {
            let active = self.platform.list_active_threads(guild.id).await?;
            if let Some(thread) = active.into_iter().find(|thread| thread.id == thread_id) {
                return Ok(Some(thread));
            }
        }
        Ok(None)
    }
}
