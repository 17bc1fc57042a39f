//! Discord adapter: serenity-backed `Platform` implementation plus the
//! gateway event handler that feeds the live-update path.

use crate::error::PlatformError;
use crate::platform::traits::Platform;
use crate::platform::types::{ForumChannelRef, GuildRef, SourceAttachment, SourceMessage, ThreadRef};
use crate::sync::live::LiveHandler;

use async_trait::async_trait;
use serenity::all::{
    ChannelId, ChannelType, Context, EventHandler, GatewayIntents, GetMessages, GuildChannel,
    GuildId, Http, Message, MessageId, MessageUpdateEvent, PartialGuildChannel, Ready, UserId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// HTTP-API-backed platform client.
pub struct DiscordPlatform {
    http: Arc<Http>,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    pub fn from_token(token: &str) -> Self {
        Self::new(Arc::new(Http::new(token)))
    }

    /// Tag-ID → tag-name map across every forum channel in a guild.
    async fn guild_tag_names(&self, guild_id: u64) -> Result<HashMap<u64, String>, PlatformError> {
        let channels = GuildId::new(guild_id)
            .channels(&*self.http)
            .await
            .map_err(|error| request_error(guild_id, error))?;

        let mut names = HashMap::new();
        for channel in channels.values() {
            for tag in &channel.available_tags {
                names.insert(tag.id.get(), tag.name.clone());
            }
        }
        Ok(names)
    }

    /// Tag-ID → tag-name map for one forum channel.
    async fn channel_tag_names(&self, channel_id: u64) -> Result<HashMap<u64, String>, PlatformError> {
        let channel = self
            .http
            .get_channel(ChannelId::new(channel_id))
            .await
            .map_err(|error| request_error(channel_id, error))?;

        let mut names = HashMap::new();
        if let Some(guild_channel) = channel.guild() {
            for tag in &guild_channel.available_tags {
                names.insert(tag.id.get(), tag.name.clone());
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl Platform for DiscordPlatform {
    async fn list_guilds(&self) -> Result<Vec<GuildRef>, PlatformError> {
        let guilds = self
            .http
            .get_guilds(None, None)
            .await
            .map_err(|error| request_error(0, error))?;

        Ok(guilds
            .into_iter()
            .map(|guild| GuildRef {
                id: guild.id.get(),
                name: guild.name,
            })
            .collect())
    }

    async fn list_forum_channels(
        &self,
        guild_id: u64,
    ) -> Result<Vec<ForumChannelRef>, PlatformError> {
        let channels = GuildId::new(guild_id)
            .channels(&*self.http)
            .await
            .map_err(|error| request_error(guild_id, error))?;

        let mut forums: Vec<ForumChannelRef> = channels
            .values()
            .filter(|channel| channel.kind == ChannelType::Forum)
            .map(convert_forum_channel)
            .collect();
        forums.sort_by_key(|forum| forum.position);
        Ok(forums)
    }

    async fn list_active_threads(&self, guild_id: u64) -> Result<Vec<ThreadRef>, PlatformError> {
        let tag_names = self.guild_tag_names(guild_id).await?;
        let threads = GuildId::new(guild_id)
            .get_active_threads(&*self.http)
            .await
            .map_err(|error| request_error(guild_id, error))?;

        Ok(threads
            .threads
            .iter()
            .map(|thread| convert_thread(thread, &tag_names))
            .collect())
    }

    async fn list_archived_threads(
        &self,
        channel_id: u64,
    ) -> Result<Vec<ThreadRef>, PlatformError> {
        let tag_names = self.channel_tag_names(channel_id).await?;
        let threads = ChannelId::new(channel_id)
            .get_archived_public_threads(&*self.http, None, None)
            .await
            .map_err(|error| request_error(channel_id, error))?;

        Ok(threads
            .threads
            .iter()
            .map(|thread| convert_thread(thread, &tag_names))
            .collect())
    }

    async fn list_messages(
        &self,
        thread_id: u64,
        before: Option<u64>,
        limit: u8,
    ) -> Result<Vec<SourceMessage>, PlatformError> {
        let mut builder = GetMessages::new().limit(limit);
        if let Some(before_id) = before {
            builder = builder.before(MessageId::new(before_id));
        }

        let messages = ChannelId::new(thread_id)
            .messages(&*self.http, builder)
            .await
            .map_err(|error| request_error(thread_id, error))?;

        // Discord returns newest-first, which is the order the traversal
        // pages in.
        Ok(messages
            .iter()
            .map(|message| convert_message(message, thread_id))
            .collect())
    }

    async fn fetch_starter_message(
        &self,
        thread_id: u64,
    ) -> Result<Option<SourceMessage>, PlatformError> {
        // In a forum thread the starter message shares the thread's ID.
        match ChannelId::new(thread_id)
            .message(&*self.http, MessageId::new(thread_id))
            .await
        {
            Ok(message) => Ok(Some(convert_message(&message, thread_id))),
            Err(error) if is_not_found(&error) => Ok(None),
            Err(error) => Err(request_error(thread_id, error)),
        }
    }
}

// -- Serenity → internal conversions --

fn convert_forum_channel(channel: &GuildChannel) -> ForumChannelRef {
    ForumChannelRef {
        id: channel.id.get(),
        guild_id: channel.guild_id.get(),
        name: channel.name.clone(),
        topic: channel.topic.clone(),
        position: channel.position as i32,
        created_at: *channel.id.created_at(),
    }
}

fn convert_thread(thread: &GuildChannel, tag_names: &HashMap<u64, String>) -> ThreadRef {
    let metadata = thread.thread_metadata.as_ref();

    ThreadRef {
        id: thread.id.get(),
        channel_id: thread.parent_id.map(|id| id.get()).unwrap_or_default(),
        title: thread.name.clone(),
        created_at: metadata
            .and_then(|m| m.create_timestamp)
            .map(|ts| *ts)
            .unwrap_or_else(|| *thread.id.created_at()),
        archive_timestamp: metadata.and_then(|m| m.archive_timestamp).map(|ts| *ts),
        tags: thread
            .applied_tags
            .iter()
            .filter_map(|tag_id| tag_names.get(&tag_id.get()).cloned())
            .collect(),
    }
}

pub(crate) fn convert_message(message: &Message, thread_id: u64) -> SourceMessage {
    SourceMessage {
        id: message.id.get(),
        thread_id,
        author_id: message.author.id.get(),
        author_is_bot: message.author.bot,
        content: message.content.clone(),
        attachments: message
            .attachments
            .iter()
            .map(|attachment| SourceAttachment {
                url: attachment.url.clone(),
                filename: attachment.filename.clone(),
                content_type: attachment.content_type.clone(),
                size_bytes: attachment.size as u64,
            })
            .collect(),
        reply_to_id: message
            .message_reference
            .as_ref()
            .and_then(|reference| reference.message_id)
            .map(|id| id.get()),
        created_at: *message.timestamp,
        edited_at: message.edited_timestamp.map(|ts| *ts),
    }
}

fn request_error(channel_id: u64, error: serenity::Error) -> PlatformError {
    if is_rate_limited(&error) {
        PlatformError::RateLimited { channel_id }
    } else {
        PlatformError::Request(error.to_string())
    }
}

fn is_rate_limited(error: &serenity::Error) -> bool {
    matches!(
        error,
        serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 429
    )
}

fn is_not_found(error: &serenity::Error) -> bool {
    matches!(
        error,
        serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 404
    )
}

// -- Gateway event handler --

/// Serenity event handler that converts gateway payloads to internal types
/// and forwards them to the live-update path. Filters to forum threads and
/// never touches the sync cursor.
pub struct ForumEventHandler {
    live: Arc<LiveHandler>,
    bot_user_id: RwLock<Option<UserId>>,
}

impl ForumEventHandler {
    pub fn new(live: Arc<LiveHandler>) -> Self {
        Self {
            live,
            bot_user_id: RwLock::new(None),
        }
    }

    /// The thread's parent forum channel ID, or `None` when the channel is
    /// not a thread under a forum.
    async fn forum_parent(&self, ctx: &Context, channel_id: ChannelId) -> Option<ChannelId> {
        let thread = ctx.http.get_channel(channel_id).await.ok()?.guild()?;
        thread.thread_metadata.as_ref()?;
        let parent_id = thread.parent_id?;

        let parent = ctx.http.get_channel(parent_id).await.ok()?.guild()?;
        (parent.kind == ChannelType::Forum).then_some(parent_id)
    }

    async fn thread_ref(&self, ctx: &Context, thread: &GuildChannel) -> Option<ThreadRef> {
        let parent_id = thread.parent_id?;
        let parent = ctx.http.get_channel(parent_id).await.ok()?.guild()?;
        if parent.kind != ChannelType::Forum {
            return None;
        }

        let tag_names: HashMap<u64, String> = parent
            .available_tags
            .iter()
            .map(|tag| (tag.id.get(), tag.name.clone()))
            .collect();
        Some(convert_thread(thread, &tag_names))
    }
}

#[async_trait]
impl EventHandler for ForumEventHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        *self.bot_user_id.write().await = Some(ready.user.id);
        tracing::info!(
            bot_name = %ready.user.name,
            guild_count = ready.guilds.len(),
            "gateway connected"
        );
    }

    async fn message(&self, ctx: Context, message: Message) {
        // Never mirror our own gateway traffic.
        if self.bot_user_id.read().await.is_some_and(|id| message.author.id == id) {
            return;
        }

        if self.forum_parent(&ctx, message.channel_id).await.is_none() {
            return;
        }

        let source = convert_message(&message, message.channel_id.get());
        if let Err(error) = self.live.message_created(&source).await {
            tracing::warn!(%error, message_id = source.id, "live message_create failed");
        }
    }

    async fn message_update(
        &self,
        ctx: Context,
        _old_if_available: Option<Message>,
        new: Option<Message>,
        event: MessageUpdateEvent,
    ) {
        if self.forum_parent(&ctx, event.channel_id).await.is_none() {
            return;
        }

        // The gateway payload is partial; fall back to a fetch when the
        // cache did not hand us the full message.
        let message = match new {
            Some(message) => message,
            None => match event.channel_id.message(&ctx.http, event.id).await {
                Ok(message) => message,
                Err(error) => {
                    tracing::warn!(%error, message_id = event.id.get(), "failed to fetch updated message");
                    return;
                }
            },
        };

        let source = convert_message(&message, event.channel_id.get());
        if let Err(error) = self.live.message_updated(&source).await {
            tracing::warn!(%error, message_id = source.id, "live message_update failed");
        }
    }

    async fn message_delete(
        &self,
        ctx: Context,
        channel_id: ChannelId,
        deleted_message_id: MessageId,
        _guild_id: Option<GuildId>,
    ) {
        if self.forum_parent(&ctx, channel_id).await.is_none() {
            return;
        }

        if let Err(error) = self
            .live
            .message_deleted(channel_id.get(), deleted_message_id.get())
            .await
        {
            tracing::warn!(%error, message_id = deleted_message_id.get(), "live message_delete failed");
        }
    }

    async fn thread_create(&self, ctx: Context, thread: GuildChannel) {
        let Some(thread_ref) = self.thread_ref(&ctx, &thread).await else {
            return;
        };

        if let Err(error) = self.live.thread_upserted(&thread_ref).await {
            tracing::warn!(%error, thread_id = thread_ref.id, "live thread_create failed");
        }
    }

    async fn thread_update(&self, ctx: Context, _old: Option<GuildChannel>, new: GuildChannel) {
        let Some(thread_ref) = self.thread_ref(&ctx, &new).await else {
            return;
        };

        if let Err(error) = self.live.thread_upserted(&thread_ref).await {
            tracing::warn!(%error, thread_id = thread_ref.id, "live thread_update failed");
        }
    }

    async fn thread_delete(
        &self,
        _ctx: Context,
        thread: PartialGuildChannel,
        _full_thread_data: Option<GuildChannel>,
    ) {
        if let Err(error) = self.live.thread_deleted(thread.id.get()).await {
            tracing::warn!(%error, thread_id = thread.id.get(), "live thread_delete failed");
        }
    }
}

/// Build the gateway client wired to the live handler.
pub async fn build_gateway_client(
    token: &str,
    live: Arc<LiveHandler>,
) -> crate::Result<serenity::Client> {
    let intents =
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;

    let client = serenity::Client::builder(token, intents)
        .event_handler(ForumEventHandler::new(live))
        .await
        .map_err(|error| PlatformError::Request(error.to_string()))?;

    Ok(client)
}
