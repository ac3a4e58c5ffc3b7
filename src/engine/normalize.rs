//! Message normalization.
//!
//! Converts a raw backend message plus channel context into a
//! `MessageRecord`. Pure except for one conditional remote lookup (forward
//! source resolution) and the language-detection call.

use crate::client::{ChannelClient, RawMedia, RawMessage, RawReaction};
use crate::lang;
use crate::store::{MediaDescriptor, MessageRecord, ReactionRecord};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

pub struct Normalizer {
    detect: lang::Detector,
}

impl Default for Normalizer {
    fn default() -> Self {
        Normalizer { detect: lang::detect }
    }
}

impl Normalizer {
    /// Use a non-default language detector.
    #[allow(dead_code)]
    pub fn with_detector(detect: lang::Detector) -> Self {
        Normalizer { detect }
    }

    /// Build the canonical record for one message.
    ///
    /// Forward provenance needs a remote lookup; when the source channel is
    /// private or otherwise unreadable the provenance fields degrade to
    /// `None` instead of failing the message.
    pub async fn normalize<C: ChannelClient>(
        &self,
        client: &C,
        raw: &RawMessage,
        channel_id: i64,
        channel_username: Option<&str>,
    ) -> MessageRecord {
        let (fwd_source_username, fwd_link) = match &raw.forward {
            Some(fwd) => self.resolve_forward(client, fwd.channel_id, raw.id).await,
            None => (None, None),
        };

        let detected_language = if raw.text.is_empty() {
            None
        } else {
            (self.detect)(&raw.text)
        };

        MessageRecord {
            message_id: raw.id,
            channel_id,
            channel_username: channel_username.map(|s| s.to_string()),
            date: raw.date,
            text: raw.text.clone(),
            detected_language,
            pinned: raw.pinned,
            views: raw.views,
            forwards: raw.forwards,
            edit_date: raw.edit_date,
            extracted_urls: raw.link_urls.clone(),
            fwd_source_channel_id: raw.forward.as_ref().and_then(|f| f.channel_id),
            fwd_source_username,
            fwd_link,
            fwd_date: raw.forward.as_ref().and_then(|f| f.date),
            media: media_descriptor(raw),
        }
    }

    async fn resolve_forward<C: ChannelClient>(
        &self,
        client: &C,
        source_channel_id: Option<i64>,
        message_id: i64,
    ) -> (Option<String>, Option<String>) {
        let Some(source_id) = source_channel_id else {
            return (None, None);
        };
        match client.resolve_channel_username(source_id).await {
            Ok(Some(username)) => {
                let link = telegram_link(&username);
                (Some(username), Some(link))
            }
            Ok(None) => (None, None),
            Err(err) => {
                log::warn!(
                    "forward source {} of message {} unreadable ({}), keeping null provenance",
                    source_id,
                    message_id,
                    err
                );
                (None, None)
            }
        }
    }
}

pub fn telegram_link(username: &str) -> String {
    format!("https://t.me/{}", username)
}

fn media_descriptor(raw: &RawMessage) -> MediaDescriptor {
    match &raw.media {
        None => MediaDescriptor::None,
        Some(RawMedia::Photo(p)) => MediaDescriptor::Photo {
            photo_id: p.photo_id,
        },
        Some(RawMedia::Document(d)) => MediaDescriptor::Document {
            file_name: d.file_name.clone().unwrap_or_else(|| raw.id.to_string()),
            mime_type: d.mime_type.clone(),
            size: d.size,
        },
    }
}

/// Convert one backend reaction entry into a record.
///
/// Custom-emoji reactions have no emoticon; they are synthesized as
/// `custom:<document_id>` with the big-endian document id kept as a base64
/// payload, matching what the archive stores for standard glyphs.
pub fn reaction_record(
    raw: &RawReaction,
    message_id: i64,
    channel_id: i64,
) -> ReactionRecord {
    let (emoticon, custom_payload) = match (&raw.emoticon, raw.custom_document_id) {
        (Some(e), _) => (e.clone(), None),
        (None, Some(doc_id)) => (
            format!("custom:{}", doc_id),
            Some(STANDARD.encode(doc_id.to_be_bytes())),
        ),
        (None, None) => ("unknown".to_string(), None),
    };
    ReactionRecord {
        message_id,
        channel_id,
        emoticon,
        count: raw.count,
        custom_payload,
    }
}
