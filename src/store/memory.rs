//! In-memory `Gateway` used by engine tests.

use super::{ChannelRecord, Gateway, MessageRecord, ReactionRecord};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct Inner {
    pub channels: BTreeMap<i64, ChannelRecord>,
    pub checkpoints: BTreeMap<i64, i64>,
    pub messages: BTreeMap<(i64, i64), MessageRecord>,
    pub reactions: BTreeMap<(i64, i64, String), ReactionRecord>,
    pub images: BTreeMap<(i64, i64), Vec<u8>>,
    pub documents: BTreeMap<i64, (String, String, Vec<u8>)>,
    /// When set, every write fails this many more times. Exercises the
    /// retry path around the persistence unit.
    pub failures_left: u32,
}

#[derive(Default)]
pub struct MemoryGateway {
    pub inner: Mutex<Inner>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.inner.lock().unwrap().failures_left = n;
    }

    fn check_failure(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failures_left > 0 {
            inner.failures_left -= 1;
            anyhow::bail!("injected storage failure");
        }
        Ok(())
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    pub fn reaction_count(&self) -> usize {
        self.inner.lock().unwrap().reactions.len()
    }

    pub fn channel_count(&self) -> usize {
        self.inner.lock().unwrap().channels.len()
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn channel_exists(&self, channel_id: i64) -> Result<bool> {
        Ok(self.inner.lock().unwrap().channels.contains_key(&channel_id))
    }

    async fn insert_channel(&self, record: &ChannelRecord) -> Result<()> {
        self.check_failure()?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .channels
            .entry(record.channel_id)
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn checkpoint(&self, channel_id: i64) -> Result<i64> {
        Ok(*self
            .inner
            .lock()
            .unwrap()
            .checkpoints
            .get(&channel_id)
            .unwrap_or(&0))
    }

    async fn advance_checkpoint(&self, channel_id: i64, message_id: i64) -> Result<()> {
        self.check_failure()?;
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.checkpoints.entry(channel_id).or_insert(0);
        if message_id > *entry {
            *entry = message_id;
        }
        Ok(())
    }

    async fn insert_message_if_absent(&self, record: &MessageRecord) -> Result<()> {
        self.check_failure()?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .messages
            .entry((record.channel_id, record.message_id))
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn insert_reaction_if_absent(&self, record: &ReactionRecord) -> Result<()> {
        self.check_failure()?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .reactions
            .entry((record.message_id, record.channel_id, record.emoticon.clone()))
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn upsert_reaction(&self, record: &ReactionRecord) -> Result<()> {
        self.check_failure()?;
        let mut inner = self.inner.lock().unwrap();
        inner.reactions.insert(
            (record.message_id, record.channel_id, record.emoticon.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn insert_document_if_absent(
        &self,
        message_id: i64,
        _channel_id: i64,
        file_name: &str,
        mime_type: &str,
        data: &[u8],
    ) -> Result<()> {
        self.check_failure()?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .documents
            .entry(message_id)
            .or_insert_with(|| (file_name.to_string(), mime_type.to_string(), data.to_vec()));
        Ok(())
    }

    async fn image_exists(&self, message_id: i64, photo_id: i64) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .images
            .contains_key(&(message_id, photo_id)))
    }

    async fn insert_image(
        &self,
        message_id: i64,
        photo_id: i64,
        _channel_id: i64,
        data: &[u8],
    ) -> Result<()> {
        self.check_failure()?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .images
            .entry((message_id, photo_id))
            .or_insert_with(|| data.to_vec());
        Ok(())
    }
}
