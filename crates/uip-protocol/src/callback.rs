//! Out-of-band reply payloads posted back by the backend.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::UipError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
/// Callback body accepted on the outbound endpoint. The older snake_case
/// shape (`chat_id`, `reply_to_message_id`, `media_url`) is accepted too.
pub struct OutboundCallback {
    #[serde(default, alias = "chat_id", alias = "chatId")]
    pub to: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, alias = "media_url", skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(
        default,
        alias = "reply_to_message_id",
        alias = "replyToMessageId",
        skip_serializing_if = "Option::is_none"
    )]
    pub reply_to_id: Option<String>,
    #[serde(default, alias = "thread_id", skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl OutboundCallback {
    pub fn new(to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn target(&self) -> CallbackTarget {
        parse_callback_target(&self.to)
    }

    pub fn validate(&self) -> Result<(), UipError> {
        if self.to.trim().is_empty() {
            return Err(UipError::protocol("callback is missing 'to'"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Enumerates supported `TargetKind` values.
pub enum TargetKind {
    User,
    Channel,
    Group,
    /// No `:` prefix was present.
    Bare,
    Other(String),
}

impl TargetKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "user",
            Self::Channel => "channel",
            Self::Group => "group",
            Self::Bare => "",
            Self::Other(prefix) => prefix,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallbackTarget {
    pub kind: TargetKind,
    pub id: String,
}

impl fmt::Display for CallbackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TargetKind::Bare => write!(f, "{}", self.id),
            _ => write!(f, "{}:{}", self.kind.as_str(), self.id),
        }
    }
}

/// Splits a `to` value on its first `:` into a type prefix and id.
pub fn parse_callback_target(raw: &str) -> CallbackTarget {
    let raw = raw.trim();
    let Some((prefix, id)) = raw.split_once(':') else {
        return CallbackTarget {
            kind: TargetKind::Bare,
            id: raw.to_string(),
        };
    };
    let kind = match prefix.trim().to_ascii_lowercase().as_str() {
        "user" => TargetKind::User,
        "channel" => TargetKind::Channel,
        "group" => TargetKind::Group,
        other => TargetKind::Other(other.to_string()),
    };
    CallbackTarget {
        kind,
        id: id.trim().to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
/// Routing metadata recovered for a callback from the correlation registry.
pub struct OutboundRouting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl OutboundRouting {
    pub fn is_empty(&self) -> bool {
        self.channel_id.is_none() && self.user_id.is_none() && self.session_id.is_none()
    }
}
