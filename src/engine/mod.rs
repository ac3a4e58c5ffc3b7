//! Incremental mirroring engine.
//!
//! One `mirror` call takes a channel reference through the whole pipeline:
//! registration, checkpoint-driven page fetching, per-message normalization
//! and persistence, inline media, and the deferred large-file queue. The
//! engine only sees the `ChannelClient` and `Gateway` capabilities, never
//! the concrete backend or database.

pub mod media;
pub mod normalize;
pub mod retry;

use crate::client::{
    ChannelClient, ChannelHandle, ClientError, DocumentHandle, PhotoHandle, RawMedia, RawMessage,
};
use crate::shutdown::ShutdownController;
use crate::store::{ChannelRecord, Gateway};
use anyhow::{Context, Result};
use media::{ChunkTransfer, MediaClass, PendingLargeFiles};
use normalize::Normalizer;
use retry::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// How many consecutive retryable page-fetch failures are tolerated before
/// the channel run aborts. Rate limits do not count, they wait as told.
const PAGE_FETCH_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub page_limit: usize,
    pub media_dir: PathBuf,
    /// Documents strictly above this many bytes go to the deferred queue.
    pub large_file_threshold: u64,
    pub transfer: ChunkTransfer,
    pub retry: RetryPolicy,
    /// Overwrite stored reaction counts instead of keeping the first
    /// snapshot.
    pub refresh_reactions: bool,
}

impl EngineOptions {
    /// Defaults rooted under `store_dir`.
    pub fn rooted_at(store_dir: &str) -> Self {
        EngineOptions {
            page_limit: 1000,
            media_dir: PathBuf::from(store_dir).join("media"),
            large_file_threshold: 500 * 1024 * 1024,
            transfer: ChunkTransfer::default(),
            retry: RetryPolicy::default(),
            refresh_reactions: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Backfill,
    Incremental,
    UpToDate,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Backfill => write!(f, "backfill"),
            SyncMode::Incremental => write!(f, "incremental"),
            SyncMode::UpToDate => write!(f, "up-to-date"),
        }
    }
}

/// Outcome of one channel run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub channel_id: i64,
    pub title: String,
    pub mode: SyncMode,
    pub messages: u64,
    pub images: u64,
    pub documents: u64,
    /// Large documents queued for deferred download this run.
    pub queued: u64,
    /// Large documents completed from the queue this run.
    pub drained: u64,
    pub interrupted: bool,
}

impl SyncReport {
    fn new(channel: &ChannelHandle, mode: SyncMode) -> Self {
        SyncReport {
            channel_id: channel.id,
            title: channel.title.clone(),
            mode,
            messages: 0,
            images: 0,
            documents: 0,
            queued: 0,
            drained: 0,
            interrupted: false,
        }
    }
}

pub struct Engine<'a, C, G> {
    client: &'a C,
    gateway: &'a G,
    opts: EngineOptions,
    normalizer: Normalizer,
    pending: PendingLargeFiles,
    shutdown: ShutdownController,
}

impl<'a, C: ChannelClient, G: Gateway> Engine<'a, C, G> {
    pub fn new(
        client: &'a C,
        gateway: &'a G,
        opts: EngineOptions,
        pending_path: PathBuf,
        shutdown: ShutdownController,
    ) -> Result<Self> {
        let pending = PendingLargeFiles::load(pending_path)?;
        Ok(Engine {
            client,
            gateway,
            opts,
            normalizer: Normalizer::default(),
            pending,
            shutdown,
        })
    }

    /// Mirror one channel: register it if new, ingest everything newer than
    /// the checkpoint, then drain its deferred large files.
    pub async fn mirror(&mut self, reference: &str) -> Result<SyncReport> {
        let channel = self
            .client
            .resolve_channel(reference)
            .await
            .with_context(|| format!("Cannot mirror '{}'", reference))?;

        self.register(&channel).await?;

        let last = self.gateway.checkpoint(channel.id).await?;
        let highest = self.client.highest_message_id(&channel).await?;
        let mode = if last == 0 {
            SyncMode::Backfill
        } else if highest <= last {
            SyncMode::UpToDate
        } else {
            SyncMode::Incremental
        };
        log::info!(
            "channel {} ({}): checkpoint {}, remote head {}, {}",
            channel.title,
            channel.id,
            last,
            highest,
            mode
        );

        let mut report = SyncReport::new(&channel, mode);
        if mode != SyncMode::UpToDate {
            self.ingest(&channel, last, &mut report).await?;
        }
        if !report.interrupted {
            self.drain_pending(&channel, &mut report).await?;
        }
        Ok(report)
    }

    /// Store the channel row once. Re-runs are a lookup and nothing else.
    async fn register(&self, channel: &ChannelHandle) -> Result<()> {
        if self.gateway.channel_exists(channel.id).await? {
            return Ok(());
        }

        // The very first entry of an intact channel is the creation service
        // message; its date is the channel age. Absent that, unknown.
        let created_at = self
            .client
            .first_message(channel)
            .await?
            .filter(|m| m.service)
            .and_then(|m| m.date);

        let record = ChannelRecord {
            channel_id: channel.id,
            url: channel
                .username
                .as_deref()
                .map(normalize::telegram_link)
                .unwrap_or_default(),
            username: channel.username.clone(),
            title: channel.title.clone(),
            subscriber_count: channel.subscriber_count,
            created_at,
            scam: channel.scam,
            verified: channel.verified,
            fake: channel.fake,
        };
        retry::retry(
            self.opts.retry,
            |e| persistence_retryable(e),
            || async { self.gateway.insert_channel(&record).await },
        )
        .await?;
        log::info!("registered channel {} ({})", channel.title, channel.id);
        Ok(())
    }

    async fn ingest(
        &mut self,
        channel: &ChannelHandle,
        mut after_id: i64,
        report: &mut SyncReport,
    ) -> Result<()> {
        'pages: loop {
            if self.shutdown.is_triggered() {
                report.interrupted = true;
                break;
            }

            let page = self.fetch_page_patiently(channel, after_id).await?;
            if page.is_empty() {
                break;
            }

            for raw in &page {
                if self.shutdown.is_triggered() {
                    report.interrupted = true;
                    break 'pages;
                }
                after_id = raw.id;

                if raw.service {
                    // Nothing to store, but the checkpoint moves past it.
                    self.gateway.advance_checkpoint(channel.id, raw.id).await?;
                    continue;
                }

                self.persist_message(channel, raw).await.with_context(|| {
                    format!("Failed to persist message {} of {}", raw.id, channel.id)
                })?;
                report.messages += 1;

                self.archive_media(channel, raw, report).await;
            }
        }
        Ok(())
    }

    /// One page of messages after `after_id`. Rate limits wait as long as
    /// the backend asks; other retryable errors get a bounded number of
    /// fixed-delay attempts.
    async fn fetch_page_patiently(
        &self,
        channel: &ChannelHandle,
        after_id: i64,
    ) -> Result<Vec<RawMessage>> {
        let mut retries_left = PAGE_FETCH_RETRIES;
        loop {
            match self
                .client
                .fetch_page(channel, after_id, self.opts.page_limit)
                .await
            {
                Ok(page) => return Ok(page),
                Err(ClientError::RateLimited(wait)) => {
                    log::warn!(
                        "rate limited fetching {} after id {}, waiting {:?}",
                        channel.id,
                        after_id,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) if err.is_retryable() && retries_left > 0 => {
                    retries_left -= 1;
                    log::warn!(
                        "page fetch for {} failed ({}), {} retries left",
                        channel.id,
                        err,
                        retries_left
                    );
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("Failed to fetch page for {}", channel.id))
                }
            }
        }
    }

    /// The retried persistence unit: normalize, store the message and its
    /// reactions, advance the checkpoint. Every step is idempotent, so a
    /// retry that repeats completed steps is harmless.
    async fn persist_message(&self, channel: &ChannelHandle, raw: &RawMessage) -> Result<()> {
        retry::retry(self.opts.retry, |e| persistence_retryable(e), || async {
            let record = self
                .normalizer
                .normalize(self.client, raw, channel.id, channel.username.as_deref())
                .await;
            self.gateway.insert_message_if_absent(&record).await?;

            for reaction in &raw.reactions {
                let rec = normalize::reaction_record(reaction, raw.id, channel.id);
                if self.opts.refresh_reactions {
                    self.gateway.upsert_reaction(&rec).await?;
                } else {
                    self.gateway.insert_reaction_if_absent(&rec).await?;
                }
            }

            self.gateway.advance_checkpoint(channel.id, raw.id).await?;
            Ok(())
        })
        .await
    }

    /// Media runs after the checkpoint moved: a failure here is logged and
    /// never re-fetches the message.
    async fn archive_media(
        &mut self,
        channel: &ChannelHandle,
        raw: &RawMessage,
        report: &mut SyncReport,
    ) {
        match &raw.media {
            None => {}
            Some(RawMedia::Photo(photo)) => {
                match self.archive_photo(channel, raw.id, photo).await {
                    Ok(true) => report.images += 1,
                    Ok(false) => {}
                    Err(err) => log::error!(
                        "photo of message {} in {} failed: {:#}",
                        raw.id,
                        channel.id,
                        err
                    ),
                }
            }
            Some(RawMedia::Document(doc)) => {
                match classify_and_fetch(self, channel, raw.id, doc).await {
                    Ok(Fetched::Document) => report.documents += 1,
                    Ok(Fetched::Queued) => report.queued += 1,
                    Ok(Fetched::Skipped) => {}
                    Err(err) => log::error!(
                        "document of message {} in {} failed: {:#}",
                        raw.id,
                        channel.id,
                        err
                    ),
                }
            }
        }
    }

    async fn archive_photo(
        &self,
        channel: &ChannelHandle,
        message_id: i64,
        photo: &PhotoHandle,
    ) -> Result<bool> {
        if self.gateway.image_exists(message_id, photo.photo_id).await? {
            return Ok(false);
        }
        let bytes = self.client.download_photo(photo).await?;
        self.gateway
            .insert_image(message_id, photo.photo_id, channel.id, &bytes)
            .await?;
        Ok(true)
    }

    fn document_path(&self, channel_id: i64, message_id: i64, doc: &DocumentHandle) -> PathBuf {
        let name = media::safe_file_name(doc.file_name.as_deref().unwrap_or("file"));
        self.opts
            .media_dir
            .join(channel_id.to_string())
            .join(format!("{}_{}", message_id, name))
    }

    /// Retry every queued large file of the channel. Deleted messages are
    /// dropped from the queue; transfer failures stay queued for next run.
    async fn drain_pending(
        &mut self,
        channel: &ChannelHandle,
        report: &mut SyncReport,
    ) -> Result<()> {
        for message_id in self.pending.ids(channel.id) {
            if self.shutdown.is_triggered() {
                report.interrupted = true;
                break;
            }

            let raw = match self.client.fetch_message(channel, message_id).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    log::warn!(
                        "queued message {} of {} no longer exists, dropping",
                        message_id,
                        channel.id
                    );
                    self.pending.mark_done(channel.id, message_id)?;
                    continue;
                }
                Err(err) => {
                    log::error!(
                        "cannot re-fetch queued message {} of {}: {}",
                        message_id,
                        channel.id,
                        err
                    );
                    continue;
                }
            };
            let Some(RawMedia::Document(doc)) = &raw.media else {
                self.pending.mark_done(channel.id, message_id)?;
                continue;
            };

            let dest = self.document_path(channel.id, message_id, doc);
            match media::download_large(self.client, doc, &dest, self.opts.transfer).await {
                Ok(()) => {
                    self.pending.mark_done(channel.id, message_id)?;
                    report.drained += 1;
                    log::info!("finished large file {}", dest.display());
                }
                Err(err) => {
                    log::error!(
                        "large file {} still incomplete: {}",
                        dest.display(),
                        err
                    );
                }
            }
        }
        Ok(())
    }
}

enum Fetched {
    Document,
    Queued,
    Skipped,
}

async fn classify_and_fetch<C: ChannelClient, G: Gateway>(
    engine: &mut Engine<'_, C, G>,
    channel: &ChannelHandle,
    message_id: i64,
    doc: &DocumentHandle,
) -> Result<Fetched> {
    match media::classify(doc.size, engine.opts.large_file_threshold) {
        MediaClass::Small => {
            let dest = engine.document_path(channel.id, message_id, doc);
            let bytes =
                media::download_small(engine.client, doc, &dest, engine.opts.transfer.chunk_size)
                    .await?;
            let name = media::safe_file_name(doc.file_name.as_deref().unwrap_or("file"));
            engine
                .gateway
                .insert_document_if_absent(message_id, channel.id, &name, &doc.mime_type, &bytes)
                .await?;
            Ok(Fetched::Document)
        }
        MediaClass::Large => {
            engine.pending.push(channel.id, message_id)?;
            log::info!(
                "queued large document ({} bytes) of message {} in {}",
                doc.size,
                message_id,
                channel.id
            );
            Ok(Fetched::Queued)
        }
    }
}

/// Storage errors are treated as transient unless the backend said
/// otherwise.
fn persistence_retryable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ClientError>()
        .map(ClientError::is_retryable)
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RawReaction;
    use crate::store::memory::MemoryGateway;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted backend for one channel.
    struct FakeClient {
        handle: ChannelHandle,
        messages: Vec<RawMessage>,
        blobs: HashMap<i64, Vec<u8>>,
        page_requests: Mutex<Vec<i64>>,
        first_calls: AtomicU32,
    }

    impl FakeClient {
        fn new(messages: Vec<RawMessage>) -> Self {
            FakeClient {
                handle: ChannelHandle {
                    id: 7,
                    username: Some("mirrored".into()),
                    title: "Mirrored".into(),
                    subscriber_count: 1234,
                    scam: false,
                    verified: true,
                    fake: false,
                },
                messages,
                blobs: HashMap::new(),
                page_requests: Mutex::new(Vec::new()),
                first_calls: AtomicU32::new(0),
            }
        }

        fn page_requests(&self) -> Vec<i64> {
            self.page_requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChannelClient for FakeClient {
        async fn resolve_channel(&self, reference: &str) -> Result<ChannelHandle, ClientError> {
            if reference == "mirrored" {
                Ok(self.handle.clone())
            } else {
                Err(ClientError::EntityResolution(reference.to_string()))
            }
        }
        async fn resolve_channel_username(
            &self,
            _: i64,
        ) -> Result<Option<String>, ClientError> {
            Ok(None)
        }
        async fn first_message(
            &self,
            _: &ChannelHandle,
        ) -> Result<Option<RawMessage>, ClientError> {
            self.first_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.messages.iter().min_by_key(|m| m.id).cloned())
        }
        async fn highest_message_id(&self, _: &ChannelHandle) -> Result<i64, ClientError> {
            Ok(self.messages.iter().map(|m| m.id).max().unwrap_or(0))
        }
        async fn fetch_page(
            &self,
            _: &ChannelHandle,
            after_id: i64,
            limit: usize,
        ) -> Result<Vec<RawMessage>, ClientError> {
            self.page_requests.lock().unwrap().push(after_id);
            let mut page: Vec<RawMessage> = self
                .messages
                .iter()
                .filter(|m| m.id > after_id)
                .cloned()
                .collect();
            page.sort_by_key(|m| m.id);
            page.truncate(limit);
            Ok(page)
        }
        async fn fetch_message(
            &self,
            _: &ChannelHandle,
            message_id: i64,
        ) -> Result<Option<RawMessage>, ClientError> {
            Ok(self.messages.iter().find(|m| m.id == message_id).cloned())
        }
        async fn download_photo(&self, photo: &PhotoHandle) -> Result<Vec<u8>, ClientError> {
            Ok(self.blobs.get(&photo.photo_id).cloned().unwrap_or_default())
        }
        async fn download_chunk(
            &self,
            doc: &DocumentHandle,
            offset: u64,
            limit: usize,
        ) -> Result<Vec<u8>, ClientError> {
            let blob = self
                .blobs
                .get(&doc.doc_id)
                .ok_or_else(|| ClientError::BadRequest("unknown document".into()))?;
            let start = offset as usize;
            if start >= blob.len() {
                return Ok(Vec::new());
            }
            let end = (start + limit).min(blob.len());
            Ok(blob[start..end].to_vec())
        }
    }

    fn text_message(id: i64) -> RawMessage {
        RawMessage {
            id,
            date: Utc.timestamp_opt(1_700_000_000 + id, 0).single(),
            text: format!("post number {}", id),
            ..Default::default()
        }
    }

    fn service_message(id: i64) -> RawMessage {
        RawMessage {
            id,
            date: Utc.timestamp_opt(1_600_000_000, 0).single(),
            service: true,
            ..Default::default()
        }
    }

    struct Rig {
        dir: tempfile::TempDir,
    }

    impl Rig {
        fn new() -> Self {
            Rig {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn options(&self) -> EngineOptions {
            EngineOptions {
                page_limit: 2,
                media_dir: self.dir.path().join("media"),
                large_file_threshold: 100,
                transfer: ChunkTransfer {
                    chunk_size: 16,
                    retry_delay: Duration::from_millis(1),
                    retry_budget: 3,
                },
                retry: RetryPolicy {
                    max_attempts: 3,
                    initial_delay: Duration::from_millis(1),
                    backoff_factor: 2,
                },
                refresh_reactions: false,
            }
        }

        fn engine<'a>(
            &self,
            client: &'a FakeClient,
            gateway: &'a MemoryGateway,
        ) -> Engine<'a, FakeClient, MemoryGateway> {
            Engine::new(
                client,
                gateway,
                self.options(),
                self.dir.path().join("pending.json"),
                ShutdownController::new(),
            )
            .unwrap()
        }
    }

    #[tokio::test]
    async fn backfill_advances_checkpoint_to_head() {
        let client = FakeClient::new(vec![
            service_message(1),
            text_message(2),
            text_message(3),
            text_message(5),
            text_message(8),
        ]);
        let gateway = MemoryGateway::new();
        let rig = Rig::new();

        let report = rig.engine(&client, &gateway).mirror("mirrored").await.unwrap();

        assert_eq!(report.mode, SyncMode::Backfill);
        assert_eq!(report.messages, 4);
        assert_eq!(gateway.message_count(), 4);
        assert_eq!(gateway.checkpoint(7).await.unwrap(), 8);
        // Channel creation date comes from the service message.
        let inner = gateway.inner.lock().unwrap();
        assert!(inner.channels.get(&7).unwrap().created_at.is_some());
    }

    #[tokio::test]
    async fn rerun_is_idempotent_and_fetches_nothing() {
        let client = FakeClient::new(vec![text_message(1), text_message(2), text_message(3)]);
        let gateway = MemoryGateway::new();
        let rig = Rig::new();

        rig.engine(&client, &gateway).mirror("mirrored").await.unwrap();
        let pages_first = client.page_requests().len();
        let report = rig.engine(&client, &gateway).mirror("mirrored").await.unwrap();

        assert_eq!(report.mode, SyncMode::UpToDate);
        assert_eq!(report.messages, 0);
        assert_eq!(client.page_requests().len(), pages_first);
        assert_eq!(gateway.message_count(), 3);
        // Channel metadata is captured once, never re-fetched.
        assert_eq!(client.first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.channel_count(), 1);
    }

    #[tokio::test]
    async fn incremental_resumes_from_checkpoint() {
        let client = FakeClient::new(vec![
            text_message(1),
            text_message(2),
            text_message(3),
            text_message(4),
        ]);
        let gateway = MemoryGateway::new();
        gateway.advance_checkpoint(7, 2).await.unwrap();
        // Pretend registration happened on an earlier run.
        gateway
            .insert_channel(&ChannelRecord {
                channel_id: 7,
                url: "https://t.me/mirrored".into(),
                username: Some("mirrored".into()),
                title: "Mirrored".into(),
                subscriber_count: 0,
                created_at: None,
                scam: false,
                verified: false,
                fake: false,
            })
            .await
            .unwrap();
        let rig = Rig::new();

        let report = rig.engine(&client, &gateway).mirror("mirrored").await.unwrap();

        assert_eq!(report.mode, SyncMode::Incremental);
        assert_eq!(report.messages, 2);
        // The first page was requested strictly after the checkpoint.
        assert_eq!(client.page_requests().first(), Some(&2));
        assert_eq!(gateway.checkpoint(7).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn transient_storage_failure_is_retried() {
        let client = FakeClient::new(vec![text_message(1)]);
        let gateway = MemoryGateway::new();
        let rig = Rig::new();

        let mut engine = rig.engine(&client, &gateway);
        gateway.fail_next_writes(2);
        let report = engine.mirror("mirrored").await.unwrap();

        assert_eq!(report.messages, 1);
        assert_eq!(gateway.message_count(), 1);
        assert_eq!(gateway.checkpoint(7).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_reference_is_rejected() {
        let client = FakeClient::new(Vec::new());
        let gateway = MemoryGateway::new();
        let rig = Rig::new();

        let err = rig.engine(&client, &gateway).mirror("nosuch").await.unwrap_err();
        assert!(err
            .chain()
            .any(|e| e.downcast_ref::<ClientError>().is_some()));
        assert_eq!(gateway.channel_count(), 0);
    }

    #[tokio::test]
    async fn reactions_snapshot_by_default() {
        let mut msg = text_message(1);
        msg.reactions = vec![RawReaction {
            emoticon: Some("👍".into()),
            custom_document_id: None,
            count: 5,
        }];
        let client = FakeClient::new(vec![msg]);
        let gateway = MemoryGateway::new();
        let rig = Rig::new();

        rig.engine(&client, &gateway).mirror("mirrored").await.unwrap();
        assert_eq!(gateway.reaction_count(), 1);
        let count = gateway
            .inner
            .lock()
            .unwrap()
            .reactions
            .get(&(1, 7, "👍".to_string()))
            .unwrap()
            .count;
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn small_document_stored_large_document_queued_and_drained() {
        let mut small = text_message(1);
        small.media = Some(RawMedia::Document(DocumentHandle {
            doc_id: 10,
            access_hash: 0,
            file_reference: Vec::new(),
            file_name: Some("notes.txt".into()),
            mime_type: "text/plain".into(),
            size: 40,
        }));
        let mut large = text_message(2);
        large.media = Some(RawMedia::Document(DocumentHandle {
            doc_id: 11,
            access_hash: 0,
            file_reference: Vec::new(),
            file_name: Some("video.mp4".into()),
            mime_type: "video/mp4".into(),
            size: 200,
        }));

        let mut client = FakeClient::new(vec![small, large]);
        client.blobs.insert(10, vec![1u8; 40]);
        client.blobs.insert(11, vec![2u8; 200]);
        let gateway = MemoryGateway::new();
        let rig = Rig::new();

        let report = rig.engine(&client, &gateway).mirror("mirrored").await.unwrap();

        assert_eq!(report.documents, 1);
        assert_eq!(report.queued, 1);
        // The queue drains within the same run.
        assert_eq!(report.drained, 1);
        assert_eq!(gateway.inner.lock().unwrap().documents.len(), 1);
        let large_path = rig.dir.path().join("media").join("7").join("2_video.mp4");
        assert_eq!(std::fs::read(large_path).unwrap(), vec![2u8; 200]);
        assert!(PendingLargeFiles::load(rig.dir.path().join("pending.json"))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn photo_downloaded_once() {
        let mut msg = text_message(1);
        msg.media = Some(RawMedia::Photo(PhotoHandle {
            photo_id: 77,
            access_hash: 0,
            file_reference: Vec::new(),
            thumb: "y".into(),
        }));
        let mut client = FakeClient::new(vec![msg]);
        client.blobs.insert(77, vec![9u8; 64]);
        let gateway = MemoryGateway::new();
        let rig = Rig::new();

        let report = rig.engine(&client, &gateway).mirror("mirrored").await.unwrap();
        assert_eq!(report.images, 1);
        assert_eq!(
            gateway.inner.lock().unwrap().images.get(&(1, 77)).unwrap(),
            &vec![9u8; 64]
        );
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_run() {
        let client = FakeClient::new(vec![text_message(1), text_message(2)]);
        let gateway = MemoryGateway::new();
        let rig = Rig::new();

        let shutdown = ShutdownController::new();
        shutdown.trigger();
        let mut engine = Engine::new(
            &client,
            &gateway,
            rig.options(),
            rig.dir.path().join("pending.json"),
            shutdown,
        )
        .unwrap();

        let report = engine.mirror("mirrored").await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.messages, 0);
    }
}
