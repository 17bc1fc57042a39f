//! Rate-aware traversal of guilds → forum channels → threads → messages.

use crate::error::SyncError;
use crate::platform::{ForumChannelRef, Platform, SourceMessage, ThreadRef};

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Messages per page; the platform maximum.
const PAGE_SIZE: u8 = 100;

/// Cooperative inter-page delay.
const PAGE_DELAY: Duration = Duration::from_millis(100);

/// Traversal parameterization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// All archived threads, all messages.
    Full,
    /// Only threads and messages newer than the watermark.
    Delta { since: DateTime<Utc> },
}

/// Collected messages of one thread, chronological ascending.
#[derive(Debug, Default)]
pub struct ThreadMessages {
    pub messages: Vec<SourceMessage>,
    /// Set when cancellation arrived mid-pagination: the collected prefix
    /// is still flushed downstream before the run aborts.
    pub cancelled: bool,
}

/// Walks the platform hierarchy with cooperative rate limiting.
pub struct Traversal {
    platform: Arc<dyn Platform>,
    cancel: CancellationToken,
    page_delay: Duration,
}

impl Traversal {
    pub fn new(platform: Arc<dyn Platform>, cancel: CancellationToken) -> Self {
        Self {
            platform,
            cancel,
            page_delay: PAGE_DELAY,
        }
    }

    /// Override the inter-page delay (tests run at zero).
    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    /// Threads to reconcile for one channel: the guild's active threads
    /// under it, unioned with its archived threads, last write wins.
    ///
    /// In delta mode only archived threads are filtered by the watermark;
    /// active threads always traverse, since an old thread can still take
    /// new replies (the per-message watermark keeps that cheap).
    pub async fn channel_threads(
        &self,
        channel: &ForumChannelRef,
        active: &[ThreadRef],
        mode: SyncMode,
    ) -> Result<Vec<ThreadRef>, SyncError> {
        let mut by_id: BTreeMap<u64, ThreadRef> = active
            .iter()
            .filter(|thread| thread.channel_id == channel.id)
            .cloned()
            .map(|thread| (thread.id, thread))
            .collect();

        let archived = self.platform.list_archived_threads(channel.id).await?;
        for thread in archived {
            if let SyncMode::Delta { since } = mode {
                let fresh = thread.created_at > since
                    || thread.archive_timestamp.is_some_and(|ts| ts > since);
                if !fresh {
                    continue;
                }
            }
            by_id.insert(thread.id, thread);
        }

        Ok(by_id.into_values().collect())
    }

    /// Page backwards through a thread's messages until an empty page
    /// (or the delta watermark), returning them chronological ascending.
    pub async fn thread_messages(
        &self,
        thread_id: u64,
        mode: SyncMode,
    ) -> Result<ThreadMessages, SyncError> {
        let mut collected: Vec<SourceMessage> = Vec::new();
        let mut before: Option<u64> = None;
        let mut cancelled = false;

        loop {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let page = self
                .platform
                .list_messages(thread_id, before, PAGE_SIZE)
                .await?;
            let Some(oldest) = page.last() else {
                break;
            };
            before = Some(oldest.id);

            match mode {
                SyncMode::Full => collected.extend(page),
                SyncMode::Delta { since } => {
                    // Pages walk backwards: once this page's oldest
                    // message is at or behind the watermark, every
                    // remaining page is too.
                    let reached_watermark = oldest.created_at <= since;
                    collected.extend(
                        page.into_iter().filter(|message| message.created_at > since),
                    );
                    if reached_watermark {
                        break;
                    }
                }
            }

            tokio::time::sleep(self.page_delay).await;
        }

        // Pages arrive newest-first; flip to source-chronological order.
        collected.reverse();
        Ok(ThreadMessages {
            messages: collected,
            cancelled,
        })
    }
}
