//! Capability interface for the messaging backend.
//!
//! The ingestion engine never talks to Telegram directly; it consumes this
//! trait. The production implementation lives in `crate::tg`, tests use
//! scripted fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Closed error surface of the messaging backend.
///
/// `RateLimited`, `Server` and `BadRequest` are retryable; `Transport` is
/// retryable only inside the chunked large-file loop and fatal for the
/// current item everywhere else.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),
    #[error("server error: {0}")]
    Server(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("cannot resolve channel reference: {0}")]
    EntityResolution(String),
    #[error("entity is private or unreadable: {0}")]
    MalformedEntity(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::RateLimited(_) | ClientError::Server(_) | ClientError::BadRequest(_)
        )
    }

    /// Source-specified wait, when the backend told us how long to back off.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ClientError::RateLimited(d) => Some(*d),
            _ => None,
        }
    }
}

/// A validated channel identity plus the one-time metadata captured at
/// registration.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    pub id: i64,
    pub username: Option<String>,
    pub title: String,
    pub subscriber_count: i64,
    pub scam: bool,
    pub verified: bool,
    pub fake: bool,
}

/// Forward header of a message, before provenance resolution.
#[derive(Debug, Clone, Default)]
pub struct RawForward {
    pub channel_id: Option<i64>,
    pub from_name: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// Remote handle of a photo, sufficient to download it.
#[derive(Debug, Clone)]
pub struct PhotoHandle {
    pub photo_id: i64,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
    /// Type string of the largest available size.
    pub thumb: String,
}

/// Remote handle of a document, sufficient to download it in chunks.
#[derive(Debug, Clone)]
pub struct DocumentHandle {
    pub doc_id: i64,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
    pub file_name: Option<String>,
    pub mime_type: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub enum RawMedia {
    Photo(PhotoHandle),
    Document(DocumentHandle),
}

/// Aggregate reaction entry as reported by the backend.
#[derive(Debug, Clone)]
pub struct RawReaction {
    pub emoticon: Option<String>,
    pub custom_document_id: Option<i64>,
    pub count: i64,
}

/// A message as fetched from the backend, not yet normalized.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub id: i64,
    pub date: Option<DateTime<Utc>>,
    pub text: String,
    pub pinned: bool,
    pub views: i64,
    pub forwards: i64,
    pub edit_date: Option<DateTime<Utc>>,
    /// Urls of text-url entities, in message order.
    pub link_urls: Vec<String>,
    pub forward: Option<RawForward>,
    pub media: Option<RawMedia>,
    pub reactions: Vec<RawReaction>,
    /// Service messages carry no content but their date marks channel events
    /// (the first one is the channel creation).
    pub service: bool,
}

/// Messaging-backend capability consumed by the engine.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Resolve a channel reference (url, @username, bare username) to a
    /// stable identity. Fails with `EntityResolution` for unknown channels.
    async fn resolve_channel(&self, reference: &str) -> Result<ChannelHandle, ClientError>;

    /// Resolve a channel id to its public username, used for forward
    /// provenance. `Ok(None)` when the channel has no username.
    async fn resolve_channel_username(&self, channel_id: i64)
        -> Result<Option<String>, ClientError>;

    /// The earliest message of the channel, if any.
    async fn first_message(&self, channel: &ChannelHandle)
        -> Result<Option<RawMessage>, ClientError>;

    /// Highest message id currently present in the channel (0 when empty).
    async fn highest_message_id(&self, channel: &ChannelHandle) -> Result<i64, ClientError>;

    /// One page of messages with id strictly greater than `after_id`, in
    /// ascending id order. An empty page means the channel is exhausted.
    async fn fetch_page(
        &self,
        channel: &ChannelHandle,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<RawMessage>, ClientError>;

    /// Fetch one message by id, used to re-hydrate queued large files.
    async fn fetch_message(
        &self,
        channel: &ChannelHandle,
        message_id: i64,
    ) -> Result<Option<RawMessage>, ClientError>;

    /// Download a photo fully, returning its bytes.
    async fn download_photo(&self, photo: &PhotoHandle) -> Result<Vec<u8>, ClientError>;

    /// Download one chunk of a document starting at `offset`. The returned
    /// buffer is empty at end of file.
    async fn download_chunk(
        &self,
        doc: &DocumentHandle,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<u8>, ClientError>;
}
