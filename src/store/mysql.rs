//! MySQL store gateway.
//!
//! Each trait operation maps to parameterized SQL. Upserts compare against
//! the stored row first so unchanged observations write nothing; every
//! actual mutation appends an audit row inside the same connection.

use crate::config::MysqlConfig;
use crate::error::StoreError;
use crate::store::cursor::{CURSOR_KEY, SyncCursor};
use crate::store::gateway::Store;
use crate::store::types::{ChannelRecord, PostRecord, StaffRole, ThreadRecord};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::types::Json;
use sqlx::Row as _;

/// Shared pool size; FIFO checkout, connections returned on every op.
const POOL_SIZE: u32 = 10;

/// Connect to MySQL and run pending migrations.
pub async fn connect_and_migrate(config: &MysqlConfig) -> crate::Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(POOL_SIZE)
        .connect(&config.url())
        .await
        .map_err(StoreError::Connect)?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|error| StoreError::Migration(error.to_string()))?;

    Ok(pool)
}

/// MySQL-backed store.
#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
    /// Audit-log actor label (`"sync"` for the orchestrator, `"live"` for
    /// the gateway handler).
    actor: String,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool, actor: impl Into<String>) -> Self {
        Self {
            pool,
            actor: actor.into(),
        }
    }

    async fn audit<'e, E>(
        &self,
        executor: E,
        action: &str,
        table: &str,
        old_val: Option<serde_json::Value>,
        new_val: Option<serde_json::Value>,
    ) -> Result<(), StoreError>
    where
        E: sqlx::Executor<'e, Database = sqlx::MySql>,
    {
        sqlx::query(
            "INSERT INTO audit_log (actor, action, table_name, old_val, new_val) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&self.actor)
        .bind(action)
        .bind(table)
        .bind(old_val.map(Json))
        .bind(new_val.map(Json))
        .execute(executor)
        .await?;
        Ok(())
    }

    async fn find_channel(&self, id: u64) -> Result<Option<ChannelRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, slug, name, description, position, created_at \
             FROM channels WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(channel_from_row).transpose()
    }
}

#[async_trait]
impl Store for MySqlStore {
    async fn upsert_channel(&self, channel: &ChannelRecord) -> Result<(), StoreError> {
        match self.find_channel(channel.id).await? {
            None => {
                sqlx::query(
                    "INSERT INTO channels (id, slug, name, description, position, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(channel.id)
                .bind(&channel.slug)
                .bind(&channel.name)
                .bind(&channel.description)
                .bind(channel.position)
                .bind(channel.created_at)
                .execute(&self.pool)
                .await?;

                self.audit(&self.pool, "INSERT", "channels", None, to_json(channel))
                    .await
            }
            Some(existing)
                if existing.name != channel.name
                    || existing.description != channel.description
                    || existing.position != channel.position
                    || existing.slug != channel.slug =>
            {
                sqlx::query(
                    "UPDATE channels SET slug = ?, name = ?, description = ?, position = ? \
                     WHERE id = ?",
                )
                .bind(&channel.slug)
                .bind(&channel.name)
                .bind(&channel.description)
                .bind(channel.position)
                .bind(channel.id)
                .execute(&self.pool)
                .await?;

                self.audit(
                    &self.pool,
                    "UPDATE",
                    "channels",
                    to_json(&existing),
                    to_json(channel),
                )
                .await
            }
            Some(_) => Ok(()),
        }
    }

    async fn upsert_thread(&self, thread: &ThreadRecord) -> Result<(), StoreError> {
        match self.find_thread(thread.id).await? {
            None => {
                insert_thread(&self.pool, thread).await?;
                self.audit(&self.pool, "INSERT", "threads", None, to_json(thread))
                    .await
            }
            Some(existing) if existing.content_differs(thread) => {
                update_thread(&self.pool, thread).await?;
                self.audit(
                    &self.pool,
                    "UPDATE",
                    "threads",
                    to_json(&existing),
                    to_json(thread),
                )
                .await
            }
            Some(_) => Ok(()),
        }
    }

    async fn upsert_thread_with_starter(
        &self,
        thread: &ThreadRecord,
        starter: &PostRecord,
    ) -> Result<(), StoreError> {
        let existing_thread = self.find_thread(thread.id).await?;
        let existing_starter = self.find_post(starter.id).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to open thread upsert transaction")?;

        match &existing_thread {
            None => {
                insert_thread(&mut *tx, thread).await?;
                self.audit(&mut *tx, "INSERT", "threads", None, to_json(thread))
                    .await?;
            }
            Some(existing) if existing.content_differs(thread) => {
                update_thread(&mut *tx, thread).await?;
                self.audit(&mut *tx, "UPDATE", "threads", to_json(existing), to_json(thread))
                    .await?;
            }
            Some(_) => {}
        }

        match &existing_starter {
            None => {
                insert_post(&mut *tx, starter).await?;
                self.audit(&mut *tx, "INSERT", "posts", None, to_json(starter))
                    .await?;
            }
            Some(existing) if existing.content_differs(starter) => {
                update_post(&mut *tx, starter).await?;
                self.audit(&mut *tx, "UPDATE", "posts", to_json(existing), to_json(starter))
                    .await?;
            }
            Some(_) => {}
        }

        tx.commit()
            .await
            .context("failed to commit thread upsert transaction")?;
        Ok(())
    }

    async fn upsert_post(&self, post: &PostRecord) -> Result<(), StoreError> {
        match self.find_post(post.id).await? {
            None => {
                insert_post(&self.pool, post).await?;
                self.audit(&self.pool, "INSERT", "posts", None, to_json(post))
                    .await
            }
            Some(existing) if existing.content_differs(post) => {
                update_post(&self.pool, post).await?;
                self.audit(
                    &self.pool,
                    "UPDATE",
                    "posts",
                    to_json(&existing),
                    to_json(post),
                )
                .await
            }
            Some(_) => Ok(()),
        }
    }

    async fn count_posts(&self, thread_id: u64) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn set_thread_reply_count(&self, thread_id: u64, count: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE threads SET reply_count = ? WHERE id = ?")
            .bind(count)
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_thread(&self, id: u64) -> Result<Option<ThreadRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, channel_id, slug, title, author_alias, body_html, tags, reply_count, \
             created_at, updated_at FROM threads WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(thread_from_row).transpose()
    }

    async fn find_thread_by_slug(&self, slug: &str) -> Result<Option<u64>, StoreError> {
        let id: Option<u64> = sqlx::query_scalar("SELECT id FROM threads WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn update_thread_body(
        &self,
        thread_id: u64,
        body_html: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let Some(existing) = self.find_thread(thread_id).await? else {
            return Ok(());
        };
        if existing.body_html == body_html {
            return Ok(());
        }

        sqlx::query("UPDATE threads SET body_html = ?, updated_at = ? WHERE id = ?")
            .bind(body_html)
            .bind(updated_at)
            .bind(thread_id)
            .execute(&self.pool)
            .await?;

        let mut updated = existing.clone();
        updated.body_html = body_html.to_string();
        updated.updated_at = updated_at;
        self.audit(
            &self.pool,
            "UPDATE",
            "threads",
            to_json(&existing),
            to_json(&updated),
        )
        .await
    }

    async fn delete_thread(&self, id: u64) -> Result<bool, StoreError> {
        let Some(existing) = self.find_thread(id).await? else {
            return Ok(false);
        };

        // Posts cascade via the FK.
        let result = sqlx::query("DELETE FROM threads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            self.audit(&self.pool, "DELETE", "threads", to_json(&existing), None)
                .await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn find_post(&self, id: u64) -> Result<Option<PostRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, thread_id, author_alias, body_html, reply_to_id, reply_to_author_alias, \
             created_at, updated_at FROM posts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(post_from_row).transpose()
    }

    async fn set_post_reply(
        &self,
        post_id: u64,
        reply_to_id: u64,
        reply_to_author_alias: &str,
    ) -> Result<(), StoreError> {
        let existing = self.find_post(post_id).await?;

        sqlx::query("UPDATE posts SET reply_to_id = ?, reply_to_author_alias = ? WHERE id = ?")
            .bind(reply_to_id)
            .bind(reply_to_author_alias)
            .bind(post_id)
            .execute(&self.pool)
            .await?;

        if let Some(existing) = existing {
            let mut updated = existing.clone();
            updated.reply_to_id = Some(reply_to_id);
            updated.reply_to_author_alias = Some(reply_to_author_alias.to_string());
            self.audit(
                &self.pool,
                "UPDATE",
                "posts",
                to_json(&existing),
                to_json(&updated),
            )
            .await?;
        }
        Ok(())
    }

    async fn update_post_body(
        &self,
        post_id: u64,
        body_html: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let Some(existing) = self.find_post(post_id).await? else {
            return Ok(());
        };
        if existing.body_html == body_html {
            return Ok(());
        }

        sqlx::query("UPDATE posts SET body_html = ?, updated_at = ? WHERE id = ?")
            .bind(body_html)
            .bind(updated_at)
            .bind(post_id)
            .execute(&self.pool)
            .await?;

        let mut updated = existing.clone();
        updated.body_html = body_html.to_string();
        updated.updated_at = updated_at;
        self.audit(
            &self.pool,
            "UPDATE",
            "posts",
            to_json(&existing),
            to_json(&updated),
        )
        .await
    }

    async fn delete_post(&self, id: u64) -> Result<bool, StoreError> {
        let Some(existing) = self.find_post(id).await? else {
            return Ok(false);
        };

        // Referring posts' reply fields null out via the FK.
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            self.audit(&self.pool, "DELETE", "posts", to_json(&existing), None)
                .await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn get_cursor(&self) -> Result<SyncCursor, StoreError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM config WHERE key_name = ?")
                .bind(CURSOR_KEY)
                .fetch_optional(&self.pool)
                .await?;

        match value {
            Some(blob) => SyncCursor::from_wire(&blob),
            None => Ok(SyncCursor::default()),
        }
    }

    async fn set_cursor(&self, last_sync: DateTime<Utc>) -> Result<(), StoreError> {
        let cursor = SyncCursor {
            last_sync,
            is_first_run: false,
        };

        sqlx::query(
            "INSERT INTO config (key_name, value) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE value = VALUES(value)",
        )
        .bind(CURSOR_KEY)
        .bind(cursor.to_wire())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn staff_tag(&self, user_id_hash: &str) -> Result<Option<String>, StoreError> {
        let tag: Option<String> =
            sqlx::query_scalar("SELECT public_tag FROM staff_roles WHERE user_id_hash = ?")
                .bind(user_id_hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(tag)
    }

    async fn upsert_staff_role(&self, role: &StaffRole) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO staff_roles (user_id_hash, public_tag, added_by, added_at) \
             VALUES (?, ?, ?, ?) \
             ON DUPLICATE KEY UPDATE public_tag = VALUES(public_tag), \
             added_by = VALUES(added_by), added_at = VALUES(added_at)",
        )
        .bind(&role.user_id_hash)
        .bind(&role.public_tag)
        .bind(&role.added_by)
        .bind(role.added_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// -- Row mapping and shared statements --

async fn insert_thread<'e, E>(executor: E, thread: &ThreadRecord) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::MySql>,
{
    sqlx::query(
        "INSERT INTO threads (id, channel_id, slug, title, author_alias, body_html, tags, \
         reply_count, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(thread.id)
    .bind(thread.channel_id)
    .bind(&thread.slug)
    .bind(&thread.title)
    .bind(&thread.author_alias)
    .bind(&thread.body_html)
    .bind(Json(&thread.tags))
    .bind(thread.reply_count)
    .bind(thread.created_at)
    .bind(thread.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn update_thread<'e, E>(executor: E, thread: &ThreadRecord) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::MySql>,
{
    // reply_count deliberately untouched; it is maintained by
    // set_thread_reply_count.
    sqlx::query(
        "UPDATE threads SET channel_id = ?, slug = ?, title = ?, author_alias = ?, \
         body_html = ?, tags = ?, updated_at = ? WHERE id = ?",
    )
    .bind(thread.channel_id)
    .bind(&thread.slug)
    .bind(&thread.title)
    .bind(&thread.author_alias)
    .bind(&thread.body_html)
    .bind(Json(&thread.tags))
    .bind(thread.updated_at)
    .bind(thread.id)
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_post<'e, E>(executor: E, post: &PostRecord) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::MySql>,
{
    sqlx::query(
        "INSERT INTO posts (id, thread_id, author_alias, body_html, reply_to_id, \
         reply_to_author_alias, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(post.id)
    .bind(post.thread_id)
    .bind(&post.author_alias)
    .bind(&post.body_html)
    .bind(post.reply_to_id)
    .bind(&post.reply_to_author_alias)
    .bind(post.created_at)
    .bind(post.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn update_post<'e, E>(executor: E, post: &PostRecord) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::MySql>,
{
    // created_at is immutable after insert.
    sqlx::query(
        "UPDATE posts SET author_alias = ?, body_html = ?, reply_to_id = ?, \
         reply_to_author_alias = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&post.author_alias)
    .bind(&post.body_html)
    .bind(post.reply_to_id)
    .bind(&post.reply_to_author_alias)
    .bind(post.updated_at)
    .bind(post.id)
    .execute(executor)
    .await?;
    Ok(())
}

fn channel_from_row(row: MySqlRow) -> Result<ChannelRecord, StoreError> {
    Ok(ChannelRecord {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        position: row.try_get("position")?,
        created_at: row.try_get("created_at")?,
    })
}

fn thread_from_row(row: MySqlRow) -> Result<ThreadRecord, StoreError> {
    let tags: Json<Vec<String>> = row.try_get("tags")?;
    Ok(ThreadRecord {
        id: row.try_get("id")?,
        channel_id: row.try_get("channel_id")?,
        slug: row.try_get("slug")?,
        title: row.try_get("title")?,
        author_alias: row.try_get("author_alias")?,
        body_html: row.try_get("body_html")?,
        tags: tags.0,
        reply_count: row.try_get("reply_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn post_from_row(row: MySqlRow) -> Result<PostRecord, StoreError> {
    Ok(PostRecord {
        id: row.try_get("id")?,
        thread_id: row.try_get("thread_id")?,
        author_alias: row.try_get("author_alias")?,
        body_html: row.try_get("body_html")?,
        reply_to_id: row.try_get("reply_to_id")?,
        reply_to_author_alias: row.try_get("reply_to_author_alias")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Option<serde_json::Value> {
    serde_json::to_value(value).ok()
}
