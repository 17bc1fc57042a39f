//! Per-entity reconciliation: normalized thread and post writes, slug
//! assignment, deferred-reference repair, and reply-count maintenance.

use crate::error::SyncError;
use crate::identity::IdentityHasher;
use crate::media::MediaPipeline;
use crate::platform::{SourceMessage, ThreadRef};
use crate::sanitize::sanitize;
use crate::store::{PostRecord, Store, ThreadRecord};

use std::sync::Arc;

/// Result of reconciling one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadOutcome {
    /// Thread written; `posts` messages were upserted this pass.
    Reconciled { posts: u64 },
    /// Thread skipped (bot-authored starter).
    Skipped,
}

/// Normalizes observed entities into store writes.
pub struct Reconciler {
    store: Arc<dyn Store>,
    hasher: IdentityHasher,
    media: Option<Arc<MediaPipeline>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        hasher: IdentityHasher,
        media: Option<Arc<MediaPipeline>>,
    ) -> Self {
        Self {
            store,
            hasher,
            media,
        }
    }

    /// Thread-starter reconciliation: upsert the thread row and its
    /// starter post atomically, apply post reconciliation to the
    /// remaining messages in chronological order, repair deferred
    /// references, and refresh the reply count.
    ///
    /// `messages` must be chronological ascending and may be a suffix of
    /// the thread (delta mode, cancelled pagination); the starter is
    /// fetched separately and skipped when it reappears in the slice.
    pub async fn reconcile_thread(
        &self,
        thread: &ThreadRef,
        starter: &SourceMessage,
        messages: &[SourceMessage],
    ) -> Result<ThreadOutcome, SyncError> {
        // Bot filtering applies to the starter exactly as to replies.
        if starter.author_is_bot {
            tracing::debug!(thread_id = thread.id, "skipping bot-authored thread");
            return Ok(ThreadOutcome::Skipped);
        }

        let author_alias = self.author_alias(starter.author_id).await?;
        let body_html = self.render_message_body(starter).await;
        let slug = self.assign_slug(&thread.title, thread.id).await?;

        let record = ThreadRecord {
            id: thread.id,
            channel_id: thread.channel_id,
            slug,
            title: thread.title.clone(),
            author_alias: author_alias.clone(),
            body_html: body_html.clone(),
            tags: thread.tags.clone(),
            reply_count: 0,
            created_at: thread.created_at,
            updated_at: starter.updated_at(),
        };
        let starter_post = PostRecord {
            id: starter.id,
            thread_id: thread.id,
            author_alias,
            body_html,
            reply_to_id: None,
            reply_to_author_alias: None,
            created_at: starter.created_at,
            updated_at: starter.updated_at(),
        };

        self.store
            .upsert_thread_with_starter(&record, &starter_post)
            .await?;

        let mut posts = 0u64;
        for message in messages {
            if message.id == starter.id || message.author_is_bot {
                continue;
            }
            self.reconcile_post(thread.id, message).await?;
            posts += 1;
        }

        self.repair_deferred_references(messages).await?;
        self.refresh_reply_count(thread.id).await?;

        Ok(ThreadOutcome::Reconciled { posts })
    }

    /// Post reconciliation: resolve the reply reference against the
    /// store (nulling both fields when the referent has not arrived yet)
    /// and upsert.
    pub async fn reconcile_post(
        &self,
        thread_id: u64,
        message: &SourceMessage,
    ) -> Result<(), SyncError> {
        let author_alias = self.author_alias(message.author_id).await?;
        let (reply_to_id, reply_to_author_alias) = self.resolve_reply(message).await?;
        let body_html = self.render_message_body(message).await;

        self.store
            .upsert_post(&PostRecord {
                id: message.id,
                thread_id,
                author_alias,
                body_html,
                reply_to_id,
                reply_to_author_alias,
                created_at: message.created_at,
                updated_at: message.updated_at(),
            })
            .await?;
        Ok(())
    }

    /// Second pass over the messages that carried a reference: any whose
    /// stored post still has null reply fields is re-checked now that the
    /// whole slice has been upserted.
    pub async fn repair_deferred_references(
        &self,
        messages: &[SourceMessage],
    ) -> Result<(), SyncError> {
        for message in messages {
            let Some(referenced_id) = message.reply_to_id else {
                continue;
            };
            // Bot-skipped messages have no stored post to repair.
            let Some(stored) = self.store.find_post(message.id).await? else {
                continue;
            };
            if stored.reply_to_id.is_some() {
                continue;
            }

            if let Some(referent) = self.store.find_post(referenced_id).await? {
                self.store
                    .set_post_reply(message.id, referenced_id, &referent.author_alias)
                    .await?;
                tracing::debug!(
                    post_id = message.id,
                    referenced_id,
                    "deferred reference repaired"
                );
            }
        }
        Ok(())
    }

    /// Recompute `reply_count` from the store, excluding the starter.
    pub async fn refresh_reply_count(&self, thread_id: u64) -> Result<(), SyncError> {
        let count = self.store.count_posts(thread_id).await?;
        self.store
            .set_thread_reply_count(thread_id, (count - 1).max(0))
            .await?;
        Ok(())
    }

    /// Resolve a message's reply reference against the store. Both fields
    /// stay null when the referent has not been inserted yet; the
    /// deferred-repair pass picks it up once it exists.
    async fn resolve_reply(
        &self,
        message: &SourceMessage,
    ) -> Result<(Option<u64>, Option<String>), SyncError> {
        let Some(referenced_id) = message.reply_to_id else {
            return Ok((None, None));
        };
        match self.store.find_post(referenced_id).await? {
            Some(referent) => Ok((Some(referenced_id), Some(referent.author_alias))),
            None => Ok((None, None)),
        }
    }

    /// Alias with the staff tag applied when one exists for this identity.
    pub async fn author_alias(&self, author_id: u64) -> Result<String, SyncError> {
        let alias = self.hasher.alias(author_id);
        let tag = self.store.staff_tag(&alias).await?;
        Ok(self.hasher.tagged_alias(author_id, tag.as_deref()))
    }

    /// Sanitized content with processed images appended.
    pub async fn render_message_body(&self, message: &SourceMessage) -> String {
        let sanitized = sanitize(&message.content);

        if sanitized.had_script || sanitized.redacted_pii {
            tracing::debug!(
                message_id = message.id,
                had_script = sanitized.had_script,
                redacted_pii = sanitized.redacted_pii,
                "content sanitized"
            );
        }

        let mut parts = Vec::new();
        if !sanitized.html.is_empty() {
            parts.push(sanitized.html);
        }

        if let Some(media) = &self.media {
            let images = media
                .process_attachments(&message.attachments, message.created_at)
                .await;
            for image in images {
                parts.push(format!(
                    "<img src=\"{}\" width=\"{}\" height=\"{}\">",
                    image.url, image.width, image.height
                ));
            }
        }

        parts.join("<br>")
    }

    /// Slug for the thread, with a deterministic suffix when the base
    /// slug is already held by a different thread.
    async fn assign_slug(&self, title: &str, thread_id: u64) -> Result<String, SyncError> {
        let base = slugify(title);
        match self.store.find_thread_by_slug(&base).await? {
            Some(holder) if holder != thread_id => {
                // Suffix is the last 6 hex digits of the thread ID; the
                // low bits of a snowflake stay distinct where the
                // timestamp-derived high bits repeat.
                let suffixed = format!(
                    "{}-{:06x}",
                    &base[..base.len().min(248)],
                    thread_id & 0xff_ffff
                );
                tracing::warn!(thread_id, slug = %base, "slug collision, suffixing");
                Ok(suffixed)
            }
            _ => Ok(base),
        }
    }
}

/// URL-safe slug: lowercase, strip everything outside `[a-z0-9 -]`,
/// collapse whitespace runs to `-`, collapse `-` runs, trim, truncate
/// to 255.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == ' ' || *c == '-')
        .collect();

    let mut slug = String::with_capacity(stripped.len());
    let mut previous_dash = false;
    for c in stripped.chars() {
        let dash = c == ' ' || c == '-';
        if dash {
            if !previous_dash && !slug.is_empty() {
                slug.push('-');
            }
            previous_dash = true;
        } else {
            slug.push(c);
            previous_dash = false;
        }
    }

    while slug.ends_with('-') {
        slug.pop();
    }
    slug.truncate(255);
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
