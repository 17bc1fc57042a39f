//! Top-level sync driver: cursor-based mode selection, traversal,
//! bounded-parallel reconciliation, and cursor bookkeeping.

use crate::error::{PlatformError, SyncError};
use crate::platform::{ForumChannelRef, GuildRef, Platform, ThreadRef};
use crate::store::{ChannelRecord, Store};
use crate::sync::reconcile::{Reconciler, ThreadOutcome, slugify};
use crate::sync::traversal::{SyncMode, Traversal};

use chrono::Utc;
use futures::StreamExt as _;
use std::sync::Arc;

/// Independent threads reconciled concurrently. Parallelism never crosses
/// one thread's message stream.
const THREAD_WORKERS: usize = 4;

/// Scope and behavior overrides for one run.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub force_full: bool,
    pub guild: Option<u64>,
    pub channel: Option<u64>,
    pub thread: Option<u64>,
    /// Cap on threads processed across the whole run.
    pub limit: Option<usize>,
    /// Skip threads already present in the store.
    pub skip_existing: bool,
}

/// Aggregate counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub guilds: u64,
    pub channels: u64,
    pub threads: u64,
    pub posts: u64,
    pub errors: u64,
}

/// Drives a full or delta sync end to end.
pub struct SyncOrchestrator {
    platform: Arc<dyn Platform>,
    store: Arc<dyn Store>,
    reconciler: Arc<Reconciler>,
    traversal: Traversal,
}

impl SyncOrchestrator {
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

    /// Run one sync. The cursor advances (to the timestamp captured
    /// before traversal) only on a clean return; any error leaves it
    /// untouched so the next run re-executes the same window.
    pub async fn run(&self, options: &SyncOptions) -> Result<SyncStats, SyncError> {
        let start_ts = Utc::now();
        let cursor = self.store.get_cursor().await?;

        let mode = if options.force_full || cursor.is_first_run {
            SyncMode::Full
        } else {
            SyncMode::Delta {
                since: cursor.last_sync,
            }
        };
        tracing::info!(?mode, "sync starting");

        let mut stats = SyncStats::default();
        let mut remaining_limit = options.limit;

        let guilds = self.platform.list_guilds().await?;
        for guild in scoped(guilds, options.guild, |guild| guild.id) {
            if let Err(error) = self
                .sync_guild(&guild, mode, options, &mut stats, &mut remaining_limit)
                .await
            {
                match error {
                    SyncError::Cancelled => return Err(SyncError::Cancelled),
                    SyncError::Store(store_error) => return Err(SyncError::Store(store_error)),
                    other => {
                        tracing::warn!(error = %other, guild_id = guild.id, "guild sync failed");
                        stats.errors += 1;
                    }
                }
            }
            if remaining_limit == Some(0) {
                break;
            }
        }

        self.store.set_cursor(start_ts).await?;
        tracing::info!(
            guilds = stats.guilds,
            channels = stats.channels,
            threads = stats.threads,
            posts = stats.posts,
            errors = stats.errors,
            "sync complete"
        );
        Ok(stats)
    }

    async fn sync_guild(
        &self,
        guild: &GuildRef,
        mode: SyncMode,
        options: &SyncOptions,
        stats: &mut SyncStats,
        remaining_limit: &mut Option<usize>,
    ) -> Result<(), SyncError> {
        stats.guilds += 1;

        let channels = self.platform.list_forum_channels(guild.id).await?;
        let active = self.platform.list_active_threads(guild.id).await?;

        for channel in scoped(channels, options.channel, |channel| channel.id) {
            match self
                .sync_channel(&channel, &active, mode, options, stats, remaining_limit)
                .await
            {
                Ok(()) => {}
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(SyncError::Store(store_error)) => return Err(SyncError::Store(store_error)),
                Err(SyncError::Platform(PlatformError::RateLimited { channel_id })) => {
                    // Cooperative backoff: give up on this channel for the
                    // run and move on; the unadvanced window retries it.
                    tracing::warn!(channel_id, "rate limited, aborting channel");
                    stats.errors += 1;
                }
                Err(other) => {
                    tracing::warn!(error = %other, channel_id = channel.id, "channel sync failed");
                    stats.errors += 1;
                }
            }
            if *remaining_limit == Some(0) {
                break;
            }
        }
        Ok(())
    }

    async fn sync_channel(
        &self,
        channel: &ForumChannelRef,
        active: &[ThreadRef],
        mode: SyncMode,
        options: &SyncOptions,
        stats: &mut SyncStats,
        remaining_limit: &mut Option<usize>,
    ) -> Result<(), SyncError> {
        stats.channels += 1;

        self.store
            .upsert_channel(&ChannelRecord {
                id: channel.id,
                slug: slugify(&channel.name),
                name: channel.name.clone(),
                description: channel.topic.clone(),
                position: channel.position,
                created_at: channel.created_at,
            })
            .await?;

        let mut threads = self.traversal.channel_threads(channel, active, mode).await?;
        if let Some(thread_id) = options.thread {
            threads.retain(|thread| thread.id == thread_id);
        }
        if options.skip_existing {
            let mut kept = Vec::with_capacity(threads.len());
            for thread in threads {
                if self.store.find_thread(thread.id).await?.is_none() {
                    kept.push(thread);
                }
            }
            threads = kept;
        }
        if let Some(limit) = remaining_limit {
            threads.truncate(*limit);
            *limit -= threads.len();
        }

        // Bounded worker pool; each thread's message stream stays inside
        // a single worker so the deferred-reference repair never races.
        let results: Vec<(u64, Result<ThreadOutcome, SyncError>)> =
            futures::stream::iter(threads.into_iter().map(|thread| {
                async move { (thread.id, self.sync_thread(&thread, mode).await) }
            }))
            .buffer_unordered(THREAD_WORKERS)
            .collect()
            .await;

        let mut cancelled = false;
        for (thread_id, result) in results {
            match result {
                Ok(ThreadOutcome::Reconciled { posts }) => {
                    stats.threads += 1;
                    stats.posts += posts;
                }
                Ok(ThreadOutcome::Skipped) => {}
                Err(SyncError::Cancelled) => cancelled = true,
                Err(SyncError::Store(store_error)) => return Err(SyncError::Store(store_error)),
                Err(error) => {
                    tracing::warn!(%error, thread_id, "thread sync failed");
                    stats.errors += 1;
                }
            }
        }

        if cancelled {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    async fn sync_thread(
        &self,
        thread: &ThreadRef,
        mode: SyncMode,
    ) -> Result<ThreadOutcome, SyncError> {
        let Some(starter) = self.platform.fetch_starter_message(thread.id).await? else {
            // Starter deleted upstream; nothing to anchor the thread on.
            tracing::debug!(thread_id = thread.id, "starter message missing, skipping");
            return Ok(ThreadOutcome::Skipped);
        };

        let pages = self.traversal.thread_messages(thread.id, mode).await?;
        let outcome = self
            .reconciler
            .reconcile_thread(thread, &starter, &pages.messages)
            .await?;

        // Writes for the collected prefix are flushed before the run
        // aborts; the unadvanced cursor re-covers the remainder.
        if pages.cancelled {
            return Err(SyncError::Cancelled);
        }
        Ok(outcome)
    }
}

fn scoped<T>(items: Vec<T>, filter: Option<u64>, id: impl Fn(&T) -> u64) -> Vec<T> {
    match filter {
        Some(wanted) => items.into_iter().filter(|item| id(item) == wanted).collect(),
        None => items,
    }
}
