//! `ChannelClient` implementation over the raw Telegram API.
//!
//! Everything here speaks TL directly and translates both the data and the
//! failures into the engine's types. Peer access hashes come from the
//! session cache, which `resolve_username` populates.

use crate::client::{
    ChannelClient, ChannelHandle, ClientError, DocumentHandle, PhotoHandle, RawForward, RawMedia,
    RawMessage, RawReaction,
};
use crate::tg::TgClient;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use grammers_mtsender::InvocationError;
use grammers_session::defs::{PeerId, PeerRef};
use grammers_session::Session;
use grammers_tl_types as tl;
use std::time::Duration;

pub struct TgBackend<'a> {
    tg: &'a TgClient,
}

impl<'a> TgBackend<'a> {
    pub fn new(tg: &'a TgClient) -> Self {
        TgBackend { tg }
    }

    /// Access-hash-bearing input peer for a channel we have seen before.
    fn input_peer(&self, channel_id: i64) -> Result<tl::enums::InputPeer, ClientError> {
        let peer_id = PeerId::channel(channel_id);
        match self.tg.session.peer(peer_id) {
            Some(info) => Ok(PeerRef {
                id: peer_id,
                auth: info.auth(),
            }
            .into()),
            None => Err(ClientError::MalformedEntity(format!(
                "channel {} is not in the session cache",
                channel_id
            ))),
        }
    }

    fn input_channel(&self, channel_id: i64) -> Result<tl::enums::InputChannel, ClientError> {
        match self.input_peer(channel_id)? {
            tl::enums::InputPeer::Channel(c) => {
                Ok(tl::enums::InputChannel::Channel(tl::types::InputChannel {
                    channel_id: c.channel_id,
                    access_hash: c.access_hash,
                }))
            }
            _ => Err(ClientError::MalformedEntity(format!(
                "peer {} is not a channel",
                channel_id
            ))),
        }
    }

    async fn channel_info(&self, channel_id: i64) -> Result<tl::types::Channel, ClientError> {
        let request = tl::functions::channels::GetChannels {
            id: vec![self.input_channel(channel_id)?],
        };
        let chats = match self.tg.client.invoke(&request).await.map_err(map_invocation)? {
            tl::enums::messages::Chats::Chats(c) => c.chats,
            tl::enums::messages::Chats::Slice(s) => s.chats,
        };
        chats
            .into_iter()
            .find_map(|chat| match chat {
                tl::enums::Chat::Channel(c) if c.id == channel_id => Some(c),
                _ => None,
            })
            .ok_or_else(|| {
                ClientError::MalformedEntity(format!("channel {} not returned", channel_id))
            })
    }

    /// One history window. `offset_id`/`add_offset` select the `limit`
    /// messages immediately newer than the anchor; `min_id` filters
    /// server-side, the caller still filters and sorts.
    async fn history(
        &self,
        channel_id: i64,
        offset_id: i32,
        add_offset: i32,
        limit: i32,
        min_id: i32,
    ) -> Result<Vec<RawMessage>, ClientError> {
        let request = tl::functions::messages::GetHistory {
            peer: self.input_peer(channel_id)?,
            offset_id,
            offset_date: 0,
            add_offset,
            limit,
            max_id: 0,
            min_id,
            hash: 0,
        };
        let messages = match self.tg.client.invoke(&request).await.map_err(map_invocation)? {
            tl::enums::messages::Messages::Messages(m) => m.messages,
            tl::enums::messages::Messages::Slice(m) => m.messages,
            tl::enums::messages::Messages::ChannelMessages(m) => m.messages,
            tl::enums::messages::Messages::NotModified(_) => Vec::new(),
        };
        Ok(messages.into_iter().filter_map(map_message).collect())
    }

    async fn get_file(
        &self,
        location: tl::enums::InputFileLocation,
        offset: i64,
        limit: i32,
    ) -> Result<Vec<u8>, ClientError> {
        let request = tl::functions::upload::GetFile {
            precise: true,
            cdn_supported: false,
            location,
            offset,
            limit,
        };
        match self.tg.client.invoke(&request).await.map_err(map_invocation)? {
            tl::enums::upload::File::File(f) => Ok(f.bytes),
            tl::enums::upload::File::CdnRedirect(_) => Err(ClientError::Transport(
                "file served from CDN, not supported".into(),
            )),
        }
    }
}

#[async_trait]
impl ChannelClient for TgBackend<'_> {
    async fn resolve_channel(&self, reference: &str) -> Result<ChannelHandle, ClientError> {
        let username = parse_reference(reference)?;
        let peer = self
            .tg
            .client
            .resolve_username(&username)
            .await
            .map_err(map_invocation)?
            .ok_or_else(|| ClientError::EntityResolution(reference.to_string()))?;

        let channel_id = match tl::enums::InputPeer::from(PeerRef::from(peer)) {
            tl::enums::InputPeer::Channel(c) => c.channel_id,
            _ => {
                return Err(ClientError::MalformedEntity(format!(
                    "{} is not a broadcast channel",
                    reference
                )))
            }
        };

        let info = self.channel_info(channel_id).await?;
        if !info.broadcast {
            return Err(ClientError::MalformedEntity(format!(
                "{} is a group, not a broadcast channel",
                reference
            )));
        }
        Ok(ChannelHandle {
            id: info.id,
            username: info.username,
            title: info.title,
            subscriber_count: info.participants_count.unwrap_or(0) as i64,
            scam: info.scam,
            verified: info.verified,
            fake: info.fake,
        })
    }

    async fn resolve_channel_username(
        &self,
        channel_id: i64,
    ) -> Result<Option<String>, ClientError> {
        Ok(self.channel_info(channel_id).await?.username)
    }

    async fn first_message(
        &self,
        channel: &ChannelHandle,
    ) -> Result<Option<RawMessage>, ClientError> {
        // Anchor below the oldest position, then take the bottom few: some
        // channels have their very first ids deleted.
        let mut page = self.history(channel.id, 1, -5, 5, 0).await?;
        page.sort_by_key(|m| m.id);
        Ok(page.into_iter().next())
    }

    async fn highest_message_id(&self, channel: &ChannelHandle) -> Result<i64, ClientError> {
        let page = self.history(channel.id, 0, 0, 1, 0).await?;
        Ok(page.into_iter().map(|m| m.id).max().unwrap_or(0))
    }

    async fn fetch_page(
        &self,
        channel: &ChannelHandle,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<RawMessage>, ClientError> {
        let limit = limit.clamp(1, 100) as i32;
        let mut page = self
            .history(
                channel.id,
                after_id.max(1) as i32,
                -limit,
                limit,
                after_id as i32,
            )
            .await?;
        page.retain(|m| m.id > after_id);
        page.sort_by_key(|m| m.id);
        Ok(page)
    }

    async fn fetch_message(
        &self,
        channel: &ChannelHandle,
        message_id: i64,
    ) -> Result<Option<RawMessage>, ClientError> {
        let page = self
            .history(channel.id, (message_id + 1) as i32, 0, 1, 0)
            .await?;
        Ok(page.into_iter().find(|m| m.id == message_id))
    }

    async fn download_photo(&self, photo: &PhotoHandle) -> Result<Vec<u8>, ClientError> {
        let chunk_size = 256 * 1024;
        let mut bytes = Vec::new();
        loop {
            let location = tl::enums::InputFileLocation::InputPhotoFileLocation(
                tl::types::InputPhotoFileLocation {
                    id: photo.photo_id,
                    access_hash: photo.access_hash,
                    file_reference: photo.file_reference.clone(),
                    thumb_size: photo.thumb.clone(),
                },
            );
            let chunk = self
                .get_file(location, bytes.len() as i64, chunk_size)
                .await?;
            let done = (chunk.len() as i32) < chunk_size;
            bytes.extend_from_slice(&chunk);
            if done {
                break;
            }
        }
        Ok(bytes)
    }

    async fn download_chunk(
        &self,
        doc: &DocumentHandle,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<u8>, ClientError> {
        let location = tl::enums::InputFileLocation::InputDocumentFileLocation(
            tl::types::InputDocumentFileLocation {
                id: doc.doc_id,
                access_hash: doc.access_hash,
                file_reference: doc.file_reference.clone(),
                thumb_size: String::new(),
            },
        );
        self.get_file(location, offset as i64, limit as i32).await
    }
}

/// Accept `https://t.me/name`, `t.me/name`, `@name`, or a bare username.
fn parse_reference(reference: &str) -> Result<String, ClientError> {
    let mut name = reference.trim();
    for prefix in ["https://t.me/", "http://t.me/", "t.me/", "@"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            name = rest;
            break;
        }
    }
    let name = name.trim_end_matches('/');
    if name.is_empty() || name.contains('/') || !name.chars().all(|c| c.is_alphanumeric() || c == '_')
    {
        return Err(ClientError::EntityResolution(reference.to_string()));
    }
    Ok(name.to_string())
}

fn map_invocation(err: InvocationError) -> ClientError {
    match err {
        InvocationError::Rpc(rpc) => {
            if rpc.name.starts_with("FLOOD_WAIT") {
                ClientError::RateLimited(Duration::from_secs(rpc.value.unwrap_or(30) as u64))
            } else if rpc.name.starts_with("CHANNEL_PRIVATE") {
                ClientError::MalformedEntity(rpc.to_string())
            } else if rpc.code >= 500 {
                ClientError::Server(rpc.to_string())
            } else {
                ClientError::BadRequest(rpc.to_string())
            }
        }
        other => ClientError::Transport(other.to_string()),
    }
}

fn timestamp(ts: i32) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts as i64, 0).single()
}

fn map_message(message: tl::enums::Message) -> Option<RawMessage> {
    match message {
        tl::enums::Message::Message(m) => Some(map_full_message(m)),
        tl::enums::Message::Service(s) => Some(RawMessage {
            id: s.id as i64,
            date: timestamp(s.date),
            service: true,
            ..Default::default()
        }),
        tl::enums::Message::Empty(_) => None,
    }
}

fn map_full_message(m: tl::types::Message) -> RawMessage {
    let link_urls = m
        .entities
        .iter()
        .flatten()
        .filter_map(|e| match e {
            tl::enums::MessageEntity::TextUrl(u) => Some(u.url.clone()),
            _ => None,
        })
        .collect();

    let forward = m.fwd_from.map(|fwd| {
        let tl::enums::MessageFwdHeader::Header(h) = fwd;
        RawForward {
            channel_id: h.from_id.and_then(|peer| match peer {
                tl::enums::Peer::Channel(c) => Some(c.channel_id),
                _ => None,
            }),
            from_name: h.from_name,
            date: timestamp(h.date),
        }
    });

    let reactions = m
        .reactions
        .map(|r| {
            let tl::enums::MessageReactions::Reactions(r) = r;
            r.results
                .into_iter()
                .filter_map(|rc| {
                    let tl::enums::ReactionCount::Count(rc) = rc;
                    match rc.reaction {
                        tl::enums::Reaction::Emoji(e) => Some(RawReaction {
                            emoticon: Some(e.emoticon),
                            custom_document_id: None,
                            count: rc.count as i64,
                        }),
                        tl::enums::Reaction::CustomEmoji(c) => Some(RawReaction {
                            emoticon: None,
                            custom_document_id: Some(c.document_id),
                            count: rc.count as i64,
                        }),
                        tl::enums::Reaction::Empty => None,
                        _ => None,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    RawMessage {
        id: m.id as i64,
        date: timestamp(m.date),
        text: m.message,
        pinned: m.pinned,
        views: m.views.unwrap_or(0) as i64,
        forwards: m.forwards.unwrap_or(0) as i64,
        edit_date: m.edit_date.and_then(timestamp),
        link_urls,
        forward,
        media: m.media.and_then(map_media),
        reactions,
        service: false,
    }
}

fn map_media(media: tl::enums::MessageMedia) -> Option<RawMedia> {
    match media {
        tl::enums::MessageMedia::Photo(mp) => {
            let tl::enums::Photo::Photo(p) = mp.photo? else {
                return None;
            };
            let thumb = largest_size(&p.sizes)?;
            Some(RawMedia::Photo(PhotoHandle {
                photo_id: p.id,
                access_hash: p.access_hash,
                file_reference: p.file_reference,
                thumb,
            }))
        }
        tl::enums::MessageMedia::Document(md) => {
            let tl::enums::Document::Document(d) = md.document? else {
                return None;
            };
            let file_name = d.attributes.iter().find_map(|a| match a {
                tl::enums::DocumentAttribute::Filename(f) => Some(f.file_name.clone()),
                _ => None,
            });
            Some(RawMedia::Document(DocumentHandle {
                doc_id: d.id,
                access_hash: d.access_hash,
                file_reference: d.file_reference,
                file_name,
                mime_type: d.mime_type,
                size: d.size.max(0) as u64,
            }))
        }
        _ => None,
    }
}

/// Type string of the biggest downloadable photo size.
fn largest_size(sizes: &[tl::enums::PhotoSize]) -> Option<String> {
    sizes
        .iter()
        .filter_map(|s| match s {
            tl::enums::PhotoSize::Size(x) => Some((x.size, x.r#type.clone())),
            tl::enums::PhotoSize::Progressive(x) => {
                Some((x.sizes.last().copied().unwrap_or(0), x.r#type.clone()))
            }
            _ => None,
        })
        .max_by_key(|(size, _)| *size)
        .map(|(_, t)| t)
}
