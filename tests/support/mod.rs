//! Shared test doubles: an in-memory store fake mirroring the MySQL
//! gateway's semantics, a scripted platform mock, and a capturing object
//! store.
#![allow(dead_code)]

use forum_mirror::error::{MediaError, PlatformError, StoreError};
use forum_mirror::media::{ObjectStore, Upload};
use forum_mirror::platform::{
    ForumChannelRef, GuildRef, Platform, SourceAttachment, SourceMessage, ThreadRef,
};
use forum_mirror::store::{ChannelRecord, PostRecord, StaffRole, Store, SyncCursor, ThreadRecord};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio_util::sync::CancellationToken;

// -- In-memory store --

#[derive(Default)]
struct MemoryState {
    channels: HashMap<u64, ChannelRecord>,
    threads: HashMap<u64, ThreadRecord>,
    posts: HashMap<u64, PostRecord>,
    staff: HashMap<String, StaffRole>,
    cursor: Option<SyncCursor>,
    /// `"{action} {table}"` per mutation, mirroring the audit log.
    write_log: Vec<String>,
}

/// Store fake with the same change-detection and cascade semantics as the
/// MySQL gateway.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread(&self, id: u64) -> Option<ThreadRecord> {
        self.state.lock().unwrap().threads.get(&id).cloned()
    }

    pub fn post(&self, id: u64) -> Option<PostRecord> {
        self.state.lock().unwrap().posts.get(&id).cloned()
    }

    pub fn channel(&self, id: u64) -> Option<ChannelRecord> {
        self.state.lock().unwrap().channels.get(&id).cloned()
    }

    pub fn posts_in_thread(&self, thread_id: u64) -> Vec<PostRecord> {
        let state = self.state.lock().unwrap();
        let mut posts: Vec<_> = state
            .posts
            .values()
            .filter(|post| post.thread_id == thread_id)
            .cloned()
            .collect();
        posts.sort_by_key(|post| post.id);
        posts
    }

    pub fn cursor(&self) -> SyncCursor {
        self.state.lock().unwrap().cursor.unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().write_log.len()
    }

    /// Stable snapshot of every row, for byte-identity assertions.
    pub fn snapshot(&self) -> (Vec<ChannelRecord>, Vec<ThreadRecord>, Vec<PostRecord>) {
        let state = self.state.lock().unwrap();
        let mut channels: Vec<_> = state.channels.values().cloned().collect();
        let mut threads: Vec<_> = state.threads.values().cloned().collect();
        let mut posts: Vec<_> = state.posts.values().cloned().collect();
        channels.sort_by_key(|row| row.id);
        threads.sort_by_key(|row| row.id);
        posts.sort_by_key(|row| row.id);
        (channels, threads, posts)
    }

    pub fn insert_staff(&self, role: StaffRole) {
        let mut state = self.state.lock().unwrap();
        state.staff.insert(role.user_id_hash.clone(), role);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_channel(&self, channel: &ChannelRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        match state.channels.get(&channel.id) {
            None => {
                state.channels.insert(channel.id, channel.clone());
                state.write_log.push("INSERT channels".into());
            }
            Some(existing)
                if existing.name != channel.name
                    || existing.description != channel.description
                    || existing.position != channel.position
                    || existing.slug != channel.slug =>
            {
                state.channels.insert(channel.id, channel.clone());
                state.write_log.push("UPDATE channels".into());
            }
            Some(_) => {}
        }
        Ok(())
    }

    async fn upsert_thread(&self, thread: &ThreadRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        upsert_thread_locked(&mut state, thread);
        Ok(())
    }

    async fn upsert_thread_with_starter(
        &self,
        thread: &ThreadRecord,
        starter: &PostRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        upsert_thread_locked(&mut state, thread);
        upsert_post_locked(&mut state, starter);
        Ok(())
    }

    async fn upsert_post(&self, post: &PostRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        upsert_post_locked(&mut state, post);
        Ok(())
    }

    async fn count_posts(&self, thread_id: u64) -> Result<i64, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .posts
            .values()
            .filter(|post| post.thread_id == thread_id)
            .count() as i64)
    }

    async fn set_thread_reply_count(&self, thread_id: u64, count: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(thread) = state.threads.get_mut(&thread_id) {
            thread.reply_count = count;
        }
        Ok(())
    }

    async fn find_thread(&self, id: u64) -> Result<Option<ThreadRecord>, StoreError> {
        Ok(self.state.lock().unwrap().threads.get(&id).cloned())
    }

    async fn find_thread_by_slug(&self, slug: &str) -> Result<Option<u64>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .threads
            .values()
            .find(|thread| thread.slug == slug)
            .map(|thread| thread.id))
    }

    async fn update_thread_body(
        &self,
        thread_id: u64,
        body_html: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let Some(thread) = state.threads.get_mut(&thread_id) else {
            return Ok(());
        };
        if thread.body_html != body_html {
            thread.body_html = body_html.to_string();
            thread.updated_at = updated_at;
            state.write_log.push("UPDATE threads".into());
        }
        Ok(())
    }

    async fn delete_thread(&self, id: u64) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.threads.remove(&id).is_none() {
            return Ok(false);
        }
        state.posts.retain(|_, post| post.thread_id != id);
        state.write_log.push("DELETE threads".into());
        Ok(true)
    }

    async fn find_post(&self, id: u64) -> Result<Option<PostRecord>, StoreError> {
        Ok(self.state.lock().unwrap().posts.get(&id).cloned())
    }

    async fn set_post_reply(
        &self,
        post_id: u64,
        reply_to_id: u64,
        reply_to_author_alias: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(post) = state.posts.get_mut(&post_id) {
            post.reply_to_id = Some(reply_to_id);
            post.reply_to_author_alias = Some(reply_to_author_alias.to_string());
            state.write_log.push("UPDATE posts".into());
        }
        Ok(())
    }

    async fn update_post_body(
        &self,
        post_id: u64,
        body_html: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let Some(post) = state.posts.get_mut(&post_id) else {
            return Ok(());
        };
        if post.body_html != body_html {
            post.body_html = body_html.to_string();
            post.updated_at = updated_at;
            state.write_log.push("UPDATE posts".into());
        }
        Ok(())
    }

    async fn delete_post(&self, id: u64) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.posts.remove(&id).is_none() {
            return Ok(false);
        }
        // Referring posts' reply fields null out, as the FK does.
        for post in state.posts.values_mut() {
            if post.reply_to_id == Some(id) {
                post.reply_to_id = None;
                post.reply_to_author_alias = None;
            }
        }
        state.write_log.push("DELETE posts".into());
        Ok(true)
    }

    async fn get_cursor(&self) -> Result<SyncCursor, StoreError> {
        Ok(self.cursor())
    }

    async fn set_cursor(&self, last_sync: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.cursor = Some(SyncCursor {
            last_sync,
            is_first_run: false,
        });
        Ok(())
    }

    async fn staff_tag(&self, user_id_hash: &str) -> Result<Option<String>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .staff
            .get(user_id_hash)
            .map(|role| role.public_tag.clone()))
    }

    async fn upsert_staff_role(&self, role: &StaffRole) -> Result<(), StoreError> {
        self.insert_staff(role.clone());
        Ok(())
    }
}

fn upsert_thread_locked(state: &mut MemoryState, thread: &ThreadRecord) {
    match state.threads.get(&thread.id) {
        None => {
            state.threads.insert(thread.id, thread.clone());
            state.write_log.push("INSERT threads".into());
        }
        Some(existing) if existing.content_differs(thread) => {
            let mut next = thread.clone();
            // reply_count is never touched by upserts.
            next.reply_count = existing.reply_count;
            state.threads.insert(thread.id, next);
            state.write_log.push("UPDATE threads".into());
        }
        Some(_) => {}
    }
}

fn upsert_post_locked(state: &mut MemoryState, post: &PostRecord) {
    match state.posts.get(&post.id) {
        None => {
            state.posts.insert(post.id, post.clone());
            state.write_log.push("INSERT posts".into());
        }
        Some(existing) if existing.content_differs(post) => {
            let mut next = post.clone();
            // created_at is immutable after insert.
            next.created_at = existing.created_at;
            state.posts.insert(post.id, next);
            state.write_log.push("UPDATE posts".into());
        }
        Some(_) => {}
    }
}

// -- Scripted platform mock --

#[derive(Default)]
struct MockData {
    guilds: Vec<GuildRef>,
    forums: HashMap<u64, Vec<ForumChannelRef>>,
    active: HashMap<u64, Vec<ThreadRef>>,
    archived: HashMap<u64, Vec<ThreadRef>>,
    /// All messages per thread, including the starter; any insertion order.
    messages: HashMap<u64, Vec<SourceMessage>>,
}

#[derive(Default)]
pub struct MockPlatform {
    data: Mutex<MockData>,
    /// When set, the token cancels after the first `list_messages` call,
    /// simulating SIGINT mid-pagination.
    pub cancel_after_first_page: Mutex<Option<CancellationToken>>,
    messages_calls: AtomicU32,
    pub fail_guilds: AtomicBool,
    rate_limited_channels: Mutex<HashSet<u64>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_guild(&self, id: u64, name: &str) {
        self.data.lock().unwrap().guilds.push(GuildRef {
            id,
            name: name.into(),
        });
    }

    pub fn add_forum(&self, guild_id: u64, forum: ForumChannelRef) {
        self.data
            .lock()
            .unwrap()
            .forums
            .entry(guild_id)
            .or_default()
            .push(forum);
    }

    pub fn add_active_thread(&self, guild_id: u64, thread: ThreadRef) {
        self.data
            .lock()
            .unwrap()
            .active
            .entry(guild_id)
            .or_default()
            .push(thread);
    }

    pub fn add_archived_thread(&self, channel_id: u64, thread: ThreadRef) {
        self.data
            .lock()
            .unwrap()
            .archived
            .entry(channel_id)
            .or_default()
            .push(thread);
    }

    pub fn push_message(&self, message: SourceMessage) {
        self.data
            .lock()
            .unwrap()
            .messages
            .entry(message.thread_id)
            .or_default()
            .push(message);
    }

    pub fn rate_limit_channel(&self, channel_id: u64) {
        self.rate_limited_channels
            .lock()
            .unwrap()
            .insert(channel_id);
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn list_guilds(&self) -> Result<Vec<GuildRef>, PlatformError> {
        if self.fail_guilds.load(Ordering::SeqCst) {
            return Err(PlatformError::Request("guild listing unavailable".into()));
        }
        Ok(self.data.lock().unwrap().guilds.clone())
    }

    async fn list_forum_channels(
        &self,
        guild_id: u64,
    ) -> Result<Vec<ForumChannelRef>, PlatformError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .forums
            .get(&guild_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_active_threads(&self, guild_id: u64) -> Result<Vec<ThreadRef>, PlatformError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .active
            .get(&guild_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_archived_threads(
        &self,
        channel_id: u64,
    ) -> Result<Vec<ThreadRef>, PlatformError> {
        if self
            .rate_limited_channels
            .lock()
            .unwrap()
            .contains(&channel_id)
        {
            return Err(PlatformError::RateLimited { channel_id });
        }
        Ok(self
            .data
            .lock()
            .unwrap()
            .archived
            .get(&channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_messages(
        &self,
        thread_id: u64,
        before: Option<u64>,
        limit: u8,
    ) -> Result<Vec<SourceMessage>, PlatformError> {
        self.messages_calls.fetch_add(1, Ordering::SeqCst);
        if self.messages_calls.load(Ordering::SeqCst) == 1 {
            if let Some(token) = self.cancel_after_first_page.lock().unwrap().as_ref() {
                token.cancel();
            }
        }

        let mut messages = self
            .data
            .lock()
            .unwrap()
            .messages
            .get(&thread_id)
            .cloned()
            .unwrap_or_default();
        messages.sort_by(|a, b| b.id.cmp(&a.id));

        Ok(messages
            .into_iter()
            .filter(|message| before.is_none_or(|bound| message.id < bound))
            .take(limit as usize)
            .collect())
    }

    async fn fetch_starter_message(
        &self,
        thread_id: u64,
    ) -> Result<Option<SourceMessage>, PlatformError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .messages
            .get(&thread_id)
            .and_then(|messages| messages.iter().find(|message| message.id == thread_id))
            .cloned())
    }
}

// -- Capturing object store --

/// Object store fake that records uploads and mints public URLs the way
/// the S3 implementation does.
pub struct FakeObjectStore {
    pub bucket: String,
    pub region: String,
    pub uploads: Mutex<Vec<Upload>>,
}

impl FakeObjectStore {
    pub fn new(bucket: &str, region: &str) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn last_upload(&self) -> Option<Upload> {
        self.uploads.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn put(&self, upload: Upload) -> Result<String, MediaError> {
        let url = format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket, self.region, upload.key
        );
        self.uploads.lock().unwrap().push(upload);
        Ok(url)
    }
}

// -- Builders --

pub const PEPPER: [u8; 32] = [0x5a; 32];

pub fn ts_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes)
}

pub fn forum(guild_id: u64, id: u64, name: &str) -> ForumChannelRef {
    ForumChannelRef {
        id,
        guild_id,
        name: name.into(),
        topic: Some(format!("{name} topic")),
        position: 1,
        created_at: ts_ago(600),
    }
}

pub fn thread_ref(channel_id: u64, id: u64, title: &str, created_at: DateTime<Utc>) -> ThreadRef {
    ThreadRef {
        id,
        channel_id,
        title: title.into(),
        created_at,
        archive_timestamp: None,
        tags: vec!["help".into()],
    }
}

pub fn message(
    thread_id: u64,
    id: u64,
    author_id: u64,
    content: &str,
    reply_to: Option<u64>,
    created_at: DateTime<Utc>,
) -> SourceMessage {
    SourceMessage {
        id,
        thread_id,
        author_id,
        author_is_bot: false,
        content: content.into(),
        attachments: Vec::new(),
        reply_to_id: reply_to,
        created_at,
        edited_at: None,
    }
}

pub fn attachment(url: &str, filename: &str) -> SourceAttachment {
    SourceAttachment {
        url: url.into(),
        filename: filename.into(),
        content_type: Some("image/png".into()),
        size_bytes: 0,
    }
}
