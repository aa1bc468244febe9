//! Canonical interaction event (CIE) model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stamp::{unix_timestamp_ms, new_uuid};
use crate::{SurfaceCapabilities, UipError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
/// Enumerates supported `InputType` values.
pub enum InputType {
    #[default]
    Text,
    Event,
    Command,
}

impl InputType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Event => "event",
            Self::Command => "command",
        }
    }

    /// Parses a wire label. Empty input maps to [`InputType::Text`].
    pub fn parse(raw: &str) -> Result<Self, UipError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "text" => Ok(Self::Text),
            "event" => Ok(Self::Event),
            "command" => Ok(Self::Command),
            other => Err(UipError::protocol(format!("unsupported input type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
/// Enumerates supported `ParticipantType` values.
pub enum ParticipantType {
    #[default]
    Human,
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
/// Enumerates supported `ConversationKind` values.
pub enum ConversationKind {
    Direct,
    Group,
    Channel,
}

impl ConversationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, UipError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "direct" | "dm" => Ok(Self::Direct),
            "group" => Ok(Self::Group),
            "channel" => Ok(Self::Channel),
            other => Err(UipError::protocol(format!(
                "unsupported conversation type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Conversation identity of one event. `external_session_id` is the
/// correlation key and stays stable across turns.
pub struct Session {
    pub external_session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub participant_type: ParticipantType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct InputAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
/// Typed view over the input payload. Well-known keys are fields; any other
/// key a front-end supplies is kept in `extra`.
pub struct InputPayload {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_type: Option<ConversationKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<InputAttachment>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl InputPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        let channel_id = channel_id.into();
        if !channel_id.trim().is_empty() {
            self.channel_id = Some(channel_id);
        }
        self
    }

    pub fn with_conversation_type(mut self, kind: ConversationKind) -> Self {
        self.conversation_type = Some(kind);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionInput {
    #[serde(rename = "type")]
    pub kind: InputType,
    pub payload: InputPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub timestamp: u64,
    pub trace_id: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub adapter_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Immutable record of one inbound interaction.
pub struct CanonicalInteractionEvent {
    pub interaction_id: String,
    pub session: Session,
    pub input: InteractionInput,
    pub capabilities: SurfaceCapabilities,
    pub meta: EventMeta,
}

impl CanonicalInteractionEvent {
    /// Builds an event with a fresh interaction id and trace id.
    /// `source` doubles as the adapter name until
    /// [`CanonicalInteractionEvent::with_adapter_name`] overrides it.
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        kind: InputType,
        payload: InputPayload,
        capabilities: SurfaceCapabilities,
        source: impl Into<String>,
    ) -> Self {
        let source = source.into();
        Self {
            interaction_id: new_uuid(),
            session: Session {
                external_session_id: session_id.into(),
                user_id: user_id.into(),
                participant_type: ParticipantType::Human,
            },
            input: InteractionInput { kind, payload },
            capabilities,
            meta: EventMeta {
                timestamp: unix_timestamp_ms(),
                trace_id: new_uuid(),
                adapter_name: source.clone(),
                source,
            },
        }
    }

    pub fn with_adapter_name(mut self, adapter_name: impl Into<String>) -> Self {
        self.meta.adapter_name = adapter_name.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session.external_session_id
    }

    pub fn user_id(&self) -> &str {
        &self.session.user_id
    }

    pub fn text(&self) -> &str {
        &self.input.payload.text
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.input
            .payload
            .channel_id
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }

    /// Conversation kind from the payload; falls back to `channel` when a
    /// channel id is present and `direct` otherwise.
    pub fn conversation_kind(&self) -> ConversationKind {
        match (self.input.payload.conversation_type, self.channel_id()) {
            (Some(kind), _) => kind,
            (None, Some(_)) => ConversationKind::Channel,
            (None, None) => ConversationKind::Direct,
        }
    }

    /// Identifier the backend addresses replies to: the channel id for
    /// channel and group conversations, the user id otherwise.
    pub fn conversation_id(&self) -> &str {
        match (self.conversation_kind(), self.channel_id()) {
            (ConversationKind::Direct, _) | (_, None) => self.user_id(),
            (_, Some(channel_id)) => channel_id,
        }
    }

    /// Entry check for the dispatch core.
    pub fn validate(&self) -> Result<(), UipError> {
        if self.session.external_session_id.trim().is_empty() {
            return Err(UipError::protocol("event is missing externalSessionId")
                .with_trace_id(self.meta.trace_id.clone()));
        }
        if self.interaction_id.trim().is_empty() {
            return Err(UipError::protocol("event is missing interactionId")
                .with_trace_id(self.meta.trace_id.clone()));
        }
        Ok(())
    }
}

/// Resolves the correlation key for an inbound message: an explicit session
/// id wins, then the channel id, then a freshly generated id.
pub fn resolve_session_key(session_id: Option<&str>, channel_id: Option<&str>) -> String {
    let non_empty = |value: Option<&str>| {
        value
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    non_empty(session_id)
        .or_else(|| non_empty(channel_id))
        .unwrap_or_else(new_uuid)
}
