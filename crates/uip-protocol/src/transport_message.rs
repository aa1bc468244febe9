//! Generic message frame exchanged with the backend over the push and poll
//! transports.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stamp::{unix_timestamp_ms, new_uuid};
use crate::{CanonicalInteractionEvent, ConversationKind, OutboundCallback, UipError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TransportSender {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransportConversation {
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TransportAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Message frame used by the webhook body and both push transports.
pub struct TransportMessage {
    pub message_id: String,
    pub timestamp: u64,
    pub sender: TransportSender,
    pub conversation: TransportConversation,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<TransportAttachment>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
}

impl TransportMessage {
    /// Frames an inbound event for the backend. The conversation id is the
    /// event's conversation id so replies can be addressed back to it.
    pub fn from_event(event: &CanonicalInteractionEvent) -> Self {
        let mut meta = BTreeMap::new();
        meta.insert(
            "sessionId".to_string(),
            Value::String(event.session_id().to_string()),
        );
        meta.insert(
            "traceId".to_string(),
            Value::String(event.meta.trace_id.clone()),
        );
        meta.insert(
            "interactionId".to_string(),
            Value::String(event.interaction_id.clone()),
        );
        meta.insert(
            "inputType".to_string(),
            Value::String(event.input.kind.as_str().to_string()),
        );
        if let Some(channel_id) = event.channel_id() {
            meta.insert("channelId".to_string(), Value::String(channel_id.to_string()));
        }
        Self {
            message_id: event.interaction_id.clone(),
            timestamp: event.meta.timestamp,
            sender: TransportSender {
                id: event.user_id().to_string(),
                name: Some(event.user_id().to_string()),
                ..TransportSender::default()
            },
            conversation: TransportConversation {
                kind: event.conversation_kind(),
                id: event.conversation_id().to_string(),
                name: None,
                thread_id: None,
            },
            text: event.text().to_string(),
            attachments: event
                .input
                .payload
                .attachments
                .iter()
                .map(|attachment| TransportAttachment {
                    kind: attachment.kind.clone(),
                    url: attachment.url.clone(),
                    content_type: attachment.content_type.clone(),
                    file_name: attachment.file_name.clone(),
                })
                .collect(),
            meta,
        }
    }

    /// Frames an outbound reply so push and poll clients can render it.
    pub fn from_callback(callback: &OutboundCallback) -> Self {
        let target = callback.target();
        let kind = match target.kind {
            crate::TargetKind::Channel => ConversationKind::Channel,
            crate::TargetKind::Group => ConversationKind::Group,
            _ => ConversationKind::Direct,
        };
        Self {
            message_id: new_uuid(),
            timestamp: unix_timestamp_ms(),
            sender: TransportSender {
                id: "assistant".to_string(),
                is_bot: true,
                ..TransportSender::default()
            },
            conversation: TransportConversation {
                kind,
                id: target.id,
                name: None,
                thread_id: callback.thread_id.clone(),
            },
            text: callback.text.clone(),
            attachments: callback
                .media_url
                .iter()
                .map(|url| TransportAttachment {
                    kind: "media".to_string(),
                    url: Some(url.clone()),
                    ..TransportAttachment::default()
                })
                .collect(),
            meta: BTreeMap::new(),
        }
    }

    /// Converts a backend-originated frame into an outbound callback:
    /// `user:{id}` for direct conversations, `channel:`/`group:` otherwise.
    pub fn to_callback(&self) -> OutboundCallback {
        let to = match self.conversation.kind {
            ConversationKind::Direct => format!("user:{}", self.conversation.id),
            ConversationKind::Channel => format!("channel:{}", self.conversation.id),
            ConversationKind::Group => format!("group:{}", self.conversation.id),
        };
        OutboundCallback {
            to,
            text: self.text.clone(),
            media_url: self
                .attachments
                .iter()
                .find_map(|attachment| attachment.url.clone()),
            reply_to_id: self
                .meta
                .get("replyToId")
                .and_then(Value::as_str)
                .map(str::to_string),
            thread_id: self.conversation.thread_id.clone(),
        }
    }
}

/// Parses a raw transport frame, rejecting frames without a conversation id.
pub fn parse_transport_message(raw: &str) -> Result<TransportMessage, UipError> {
    let message: TransportMessage = serde_json::from_str(raw)
        .map_err(|error| UipError::protocol(format!("invalid transport message: {error}")))?;
    if message.conversation.id.trim().is_empty() {
        return Err(UipError::protocol("transport message is missing conversation id"));
    }
    Ok(message)
}
