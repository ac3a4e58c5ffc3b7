//! Persistence gateway.
//!
//! The engine consumes the `Gateway` trait; `Store` implements it on top of
//! a local turso database. Every insert is insert-or-ignore keyed by the
//! record's unique constraint, so re-ingesting the same remote data is a
//! no-op and duplicate detection lives in the database, not the engine.

#[cfg(test)]
pub mod memory;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use turso::{Builder, Connection, Database, Value};

/// Identity and one-time metadata of a mirrored channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelRecord {
    pub channel_id: i64,
    pub url: String,
    pub username: Option<String>,
    pub title: String,
    pub subscriber_count: i64,
    /// Inferred from the first service message; `None` when unknown.
    pub created_at: Option<DateTime<Utc>>,
    pub scam: bool,
    pub verified: bool,
    pub fake: bool,
}

/// Tagged media summary carried on a message row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaDescriptor {
    None,
    Photo {
        photo_id: i64,
    },
    Document {
        file_name: String,
        mime_type: String,
        size: u64,
    },
}

/// A normalized message, unique per `(channel_id, message_id)`.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub message_id: i64,
    pub channel_id: i64,
    pub channel_username: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub text: String,
    pub detected_language: Option<String>,
    pub pinned: bool,
    pub views: i64,
    pub forwards: i64,
    pub edit_date: Option<DateTime<Utc>>,
    pub extracted_urls: Vec<String>,
    pub fwd_source_channel_id: Option<i64>,
    pub fwd_source_username: Option<String>,
    pub fwd_link: Option<String>,
    pub fwd_date: Option<DateTime<Utc>>,
    pub media: MediaDescriptor,
}

/// Aggregate reaction count, unique per `(message_id, channel_id, emoticon)`.
#[derive(Debug, Clone, Serialize)]
pub struct ReactionRecord {
    pub message_id: i64,
    pub channel_id: i64,
    /// Plain emoticon, or `custom:<document_id>` for custom-emoji reactions.
    pub emoticon: String,
    pub count: i64,
    /// Base64 of the big-endian custom-emoji document id.
    pub custom_payload: Option<String>,
}

/// Persistence capability consumed by the engine.
///
/// All writes must stay safe under concurrent insert-or-ignore; the store's
/// unique constraints are the source of mutual exclusion.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn channel_exists(&self, channel_id: i64) -> Result<bool>;
    async fn insert_channel(&self, record: &ChannelRecord) -> Result<()>;

    /// Highest message id durably processed for the channel, 0 when the
    /// channel has never been synced.
    async fn checkpoint(&self, channel_id: i64) -> Result<i64>;

    /// Advance the checkpoint. Never moves backwards: a smaller id than the
    /// stored one leaves the row untouched.
    async fn advance_checkpoint(&self, channel_id: i64, message_id: i64) -> Result<()>;

    async fn insert_message_if_absent(&self, record: &MessageRecord) -> Result<()>;
    async fn insert_reaction_if_absent(&self, record: &ReactionRecord) -> Result<()>;
    /// Overwriting variant used when live reaction counts are wanted.
    async fn upsert_reaction(&self, record: &ReactionRecord) -> Result<()>;

    async fn insert_document_if_absent(
        &self,
        message_id: i64,
        channel_id: i64,
        file_name: &str,
        mime_type: &str,
        data: &[u8],
    ) -> Result<()>;

    async fn image_exists(&self, message_id: i64, photo_id: i64) -> Result<bool>;
    async fn insert_image(
        &self,
        message_id: i64,
        photo_id: i64,
        channel_id: i64,
        data: &[u8],
    ) -> Result<()>;
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub async fn open(store_dir: &str) -> Result<Self> {
        std::fs::create_dir_all(store_dir)?;
        let db_path = Path::new(store_dir).join("tgmirror.db");
        let db_path_str = db_path.to_string_lossy();
        let db: Database = Builder::new_local(&db_path_str)
            .build()
            .await
            .context("Failed to open database")?;
        let conn = db.connect().context("Failed to connect to database")?;

        // PRAGMAs that set values return the new value, so query and ignore.
        let _ = conn.query("PRAGMA journal_mode=WAL", ()).await;
        let _ = conn.query("PRAGMA busy_timeout=5000", ()).await;

        let store = Store { conn };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        // turso execute takes one statement at a time.
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS channels (
                    channel_id INTEGER PRIMARY KEY,
                    url TEXT NOT NULL DEFAULT '',
                    username TEXT,
                    title TEXT NOT NULL DEFAULT '',
                    subscriber_count INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT,
                    scam INTEGER NOT NULL DEFAULT 0,
                    verified INTEGER NOT NULL DEFAULT 0,
                    fake INTEGER NOT NULL DEFAULT 0
                )",
                (),
            )
            .await
            .context("Failed to create channels table")?;

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS checkpoints (
                    channel_id INTEGER PRIMARY KEY,
                    last_message_id INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL
                )",
                (),
            )
            .await
            .context("Failed to create checkpoints table")?;

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS messages (
                    message_id INTEGER NOT NULL,
                    channel_id INTEGER NOT NULL,
                    channel_username TEXT,
                    date TEXT,
                    text TEXT NOT NULL DEFAULT '',
                    detected_language TEXT,
                    pinned INTEGER NOT NULL DEFAULT 0,
                    views INTEGER NOT NULL DEFAULT 0,
                    forwards INTEGER NOT NULL DEFAULT 0,
                    edit_date TEXT,
                    extracted_urls TEXT,
                    fwd_source_channel_id INTEGER,
                    fwd_source_username TEXT,
                    fwd_link TEXT,
                    fwd_date TEXT,
                    media TEXT,
                    PRIMARY KEY (channel_id, message_id)
                )",
                (),
            )
            .await
            .context("Failed to create messages table")?;

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS reactions (
                    message_id INTEGER NOT NULL,
                    channel_id INTEGER NOT NULL,
                    emoticon TEXT NOT NULL,
                    count INTEGER NOT NULL DEFAULT 0,
                    custom_payload TEXT,
                    PRIMARY KEY (message_id, channel_id, emoticon)
                )",
                (),
            )
            .await
            .context("Failed to create reactions table")?;

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS images (
                    message_id INTEGER NOT NULL,
                    photo_id INTEGER NOT NULL,
                    channel_id INTEGER NOT NULL,
                    data BLOB,
                    PRIMARY KEY (message_id, photo_id)
                )",
                (),
            )
            .await
            .context("Failed to create images table")?;

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS documents (
                    message_id INTEGER PRIMARY KEY,
                    channel_id INTEGER NOT NULL,
                    file_name TEXT NOT NULL DEFAULT '',
                    mime_type TEXT NOT NULL DEFAULT '',
                    data BLOB
                )",
                (),
            )
            .await
            .context("Failed to create documents table")?;

        self.conn
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_messages_channel_date ON messages(channel_id, date)",
                (),
            )
            .await?;
        self.conn
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_reactions_message ON reactions(channel_id, message_id)",
                (),
            )
            .await?;

        Ok(())
    }

    /// Row counts per mirrored table, used by `clear` and tests.
    pub async fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            channels: self.count_table("channels").await?,
            messages: self.count_table("messages").await?,
            reactions: self.count_table("reactions").await?,
            images: self.count_table("images").await?,
            documents: self.count_table("documents").await?,
        })
    }

    async fn count_table(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let mut rows = self.conn.query(&sql, ()).await?;
        Ok(rows
            .next()
            .await?
            .map(|r| r.get(0).unwrap_or(0))
            .unwrap_or(0))
    }

    /// Drop all mirrored data. The session lives elsewhere and survives.
    pub async fn wipe(&self) -> Result<()> {
        for table in [
            "reactions",
            "images",
            "documents",
            "messages",
            "checkpoints",
            "channels",
        ] {
            let sql = format!("DELETE FROM {}", table);
            self.conn.execute(&sql, ()).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreCounts {
    pub channels: i64,
    pub messages: i64,
    pub reactions: i64,
    pub images: i64,
    pub documents: i64,
}

impl StoreCounts {
    pub fn total(&self) -> i64 {
        self.channels + self.messages + self.reactions + self.images + self.documents
    }
}

fn ts(t: &Option<DateTime<Utc>>) -> Option<String> {
    t.map(|t| t.to_rfc3339())
}

fn media_json(media: &MediaDescriptor) -> Option<String> {
    match media {
        MediaDescriptor::None => None,
        other => serde_json::to_string(other).ok(),
    }
}

fn opt_text(s: Option<&str>) -> Value {
    match s {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

#[async_trait]
impl Gateway for Store {
    async fn channel_exists(&self, channel_id: i64) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM channels WHERE channel_id = ?1", [channel_id])
            .await?;
        Ok(rows.next().await?.is_some())
    }

    async fn insert_channel(&self, record: &ChannelRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO channels
                 (channel_id, url, username, title, subscriber_count, created_at, scam, verified, fake)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                (
                    record.channel_id,
                    record.url.as_str(),
                    record.username.as_deref(),
                    record.title.as_str(),
                    record.subscriber_count,
                    ts(&record.created_at),
                    record.scam as i64,
                    record.verified as i64,
                    record.fake as i64,
                ),
            )
            .await
            .context("Failed to insert channel record")?;
        Ok(())
    }

    async fn checkpoint(&self, channel_id: i64) -> Result<i64> {
        let mut rows = self
            .conn
            .query(
                "SELECT last_message_id FROM checkpoints WHERE channel_id = ?1",
                [channel_id],
            )
            .await?;
        if let Some(row) = rows.next().await? {
            Ok(row.get(0)?)
        } else {
            Ok(0)
        }
    }

    async fn advance_checkpoint(&self, channel_id: i64, message_id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO checkpoints (channel_id, last_message_id, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(channel_id) DO UPDATE SET
                    last_message_id = CASE WHEN excluded.last_message_id > last_message_id
                        THEN excluded.last_message_id ELSE last_message_id END,
                    updated_at = excluded.updated_at",
                (channel_id, message_id, now.as_str()),
            )
            .await
            .context("Failed to advance checkpoint")?;
        Ok(())
    }

    async fn insert_message_if_absent(&self, record: &MessageRecord) -> Result<()> {
        let urls = if record.extracted_urls.is_empty() {
            None
        } else {
            serde_json::to_string(&record.extracted_urls).ok()
        };
        let params: Vec<Value> = vec![
            Value::Integer(record.message_id),
            Value::Integer(record.channel_id),
            opt_text(record.channel_username.as_deref()),
            opt_text(ts(&record.date).as_deref()),
            Value::Text(record.text.clone()),
            opt_text(record.detected_language.as_deref()),
            Value::Integer(record.pinned as i64),
            Value::Integer(record.views),
            Value::Integer(record.forwards),
            opt_text(ts(&record.edit_date).as_deref()),
            opt_text(urls.as_deref()),
            record
                .fwd_source_channel_id
                .map(Value::Integer)
                .unwrap_or(Value::Null),
            opt_text(record.fwd_source_username.as_deref()),
            opt_text(record.fwd_link.as_deref()),
            opt_text(ts(&record.fwd_date).as_deref()),
            opt_text(media_json(&record.media).as_deref()),
        ];
        self.conn
            .execute(
                "INSERT OR IGNORE INTO messages
                 (message_id, channel_id, channel_username, date, text, detected_language,
                  pinned, views, forwards, edit_date, extracted_urls,
                  fwd_source_channel_id, fwd_source_username, fwd_link, fwd_date, media)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                turso::params_from_iter(params),
            )
            .await
            .context("Failed to insert message record")?;
        Ok(())
    }

    async fn insert_reaction_if_absent(&self, record: &ReactionRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO reactions
                 (message_id, channel_id, emoticon, count, custom_payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    record.message_id,
                    record.channel_id,
                    record.emoticon.as_str(),
                    record.count,
                    record.custom_payload.as_deref(),
                ),
            )
            .await
            .context("Failed to insert reaction record")?;
        Ok(())
    }

    async fn upsert_reaction(&self, record: &ReactionRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO reactions
                 (message_id, channel_id, emoticon, count, custom_payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(message_id, channel_id, emoticon) DO UPDATE SET
                    count = excluded.count",
                (
                    record.message_id,
                    record.channel_id,
                    record.emoticon.as_str(),
                    record.count,
                    record.custom_payload.as_deref(),
                ),
            )
            .await
            .context("Failed to upsert reaction record")?;
        Ok(())
    }

    async fn insert_document_if_absent(
        &self,
        message_id: i64,
        channel_id: i64,
        file_name: &str,
        mime_type: &str,
        data: &[u8],
    ) -> Result<()> {
        let params: Vec<Value> = vec![
            Value::Integer(message_id),
            Value::Integer(channel_id),
            Value::Text(file_name.to_string()),
            Value::Text(mime_type.to_string()),
            Value::Blob(data.to_vec()),
        ];
        self.conn
            .execute(
                "INSERT OR IGNORE INTO documents
                 (message_id, channel_id, file_name, mime_type, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                turso::params_from_iter(params),
            )
            .await
            .context("Failed to insert document record")?;
        Ok(())
    }

    async fn image_exists(&self, message_id: i64, photo_id: i64) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM images WHERE message_id = ?1 AND photo_id = ?2",
                (message_id, photo_id),
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    async fn insert_image(
        &self,
        message_id: i64,
        photo_id: i64,
        channel_id: i64,
        data: &[u8],
    ) -> Result<()> {
        let params: Vec<Value> = vec![
            Value::Integer(message_id),
            Value::Integer(photo_id),
            Value::Integer(channel_id),
            Value::Blob(data.to_vec()),
        ];
        self.conn
            .execute(
                "INSERT OR IGNORE INTO images (message_id, photo_id, channel_id, data)
                 VALUES (?1, ?2, ?3, ?4)",
                turso::params_from_iter(params),
            )
            .await
            .context("Failed to insert image record")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(channel_id: i64, message_id: i64) -> MessageRecord {
        MessageRecord {
            message_id,
            channel_id,
            channel_username: Some("example".into()),
            date: Some(Utc::now()),
            text: "hello".into(),
            detected_language: Some("en".into()),
            pinned: false,
            views: 10,
            forwards: 2,
            edit_date: None,
            extracted_urls: vec!["https://example.org".into()],
            fwd_source_channel_id: None,
            fwd_source_username: None,
            fwd_link: None,
            fwd_date: None,
            media: MediaDescriptor::None,
        }
    }

    #[tokio::test]
    async fn insert_or_ignore_and_checkpoint_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).await.unwrap();

        store.insert_message_if_absent(&message(7, 1)).await.unwrap();
        store.insert_message_if_absent(&message(7, 1)).await.unwrap();
        assert_eq!(store.counts().await.unwrap().messages, 1);

        store.advance_checkpoint(7, 1).await.unwrap();
        store.advance_checkpoint(7, 5).await.unwrap();
        // A stale advance must not move the checkpoint backwards.
        store.advance_checkpoint(7, 3).await.unwrap();
        assert_eq!(store.checkpoint(7).await.unwrap(), 5);
        assert_eq!(store.checkpoint(999).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reaction_snapshot_vs_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).await.unwrap();

        let mut r = ReactionRecord {
            message_id: 1,
            channel_id: 7,
            emoticon: "👍".into(),
            count: 3,
            custom_payload: None,
        };
        store.insert_reaction_if_absent(&r).await.unwrap();
        r.count = 9;
        store.insert_reaction_if_absent(&r).await.unwrap();
        assert_eq!(store.counts().await.unwrap().reactions, 1);

        store.upsert_reaction(&r).await.unwrap();
        assert_eq!(store.counts().await.unwrap().reactions, 1);
    }
}
