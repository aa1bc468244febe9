//! Interaction intents produced by the backend or by the gateway error path.

use serde::{Deserialize, Serialize};

use crate::stamp::new_uuid;
use crate::{CanonicalInteractionEvent, UipError};

/// Text of the terminal intent sent when the backend call fails.
pub const PROCESSING_ERROR_TEXT: &str =
    "Sorry, I encountered an error processing your request. Please try again.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
/// Enumerates supported `IntentType` values.
pub enum IntentType {
    #[default]
    Reply,
    Ask,
    Notify,
    Noop,
}

impl IntentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reply => "reply",
            Self::Ask => "ask",
            Self::Notify => "notify",
            Self::Noop => "noop",
        }
    }

    /// Maps a backend response label; anything unrecognised is a reply.
    pub fn from_backend_label(label: Option<&str>) -> Self {
        match label.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("ask") => Self::Ask,
            Some("notify") => Self::Notify,
            _ => Self::Reply,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IntentAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IntentContent {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<IntentAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntentConstraints {
    #[serde(default)]
    pub requires_ack: bool,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl Default for IntentConstraints {
    fn default() -> Self {
        Self {
            requires_ack: false,
            confidence: 1.0,
            priority: None,
            expires_at: None,
        }
    }
}

impl IntentConstraints {
    /// Returns a copy with `confidence` clamped into `[0, 1]`; NaN becomes 0.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Normalized outbound reply. `target_session_id` always equals the
/// triggering event's external session id.
pub struct InteractionIntent {
    pub intent_id: String,
    pub intent_type: IntentType,
    pub content: IntentContent,
    #[serde(default)]
    pub constraints: IntentConstraints,
    pub target_session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

impl InteractionIntent {
    pub fn new(
        intent_type: IntentType,
        text: impl Into<String>,
        target_session_id: impl Into<String>,
        in_reply_to: Option<String>,
    ) -> Self {
        Self {
            intent_id: new_uuid(),
            intent_type,
            content: IntentContent {
                text: text.into(),
                ..IntentContent::default()
            },
            constraints: IntentConstraints::default(),
            target_session_id: target_session_id.into(),
            in_reply_to,
        }
    }

    /// Reply addressed back to the session that produced `event`.
    pub fn reply_to(event: &CanonicalInteractionEvent, text: impl Into<String>) -> Self {
        Self::typed_reply_to(event, IntentType::Reply, text)
    }

    pub fn typed_reply_to(
        event: &CanonicalInteractionEvent,
        intent_type: IntentType,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            intent_type,
            text,
            event.session.external_session_id.clone(),
            Some(event.interaction_id.clone()),
        )
    }

    /// Terminal apology intent used when the backend call fails.
    pub fn processing_error(event: &CanonicalInteractionEvent) -> Self {
        let mut intent = Self::reply_to(event, PROCESSING_ERROR_TEXT);
        intent.constraints = intent.constraints.with_confidence(0.0);
        intent
    }

    /// Acknowledgement that carries nothing to render; the reply arrives
    /// later through the delivery path.
    pub fn noop_for(event: &CanonicalInteractionEvent) -> Self {
        Self::typed_reply_to(event, IntentType::Noop, String::new())
    }

    pub fn is_noop(&self) -> bool {
        self.intent_type == IntentType::Noop
    }

    pub fn validate(&self) -> Result<(), UipError> {
        if self.target_session_id.trim().is_empty() {
            return Err(UipError::protocol("intent is missing targetSessionId"));
        }
        if !(0.0..=1.0).contains(&self.constraints.confidence) {
            return Err(UipError::protocol(format!(
                "intent confidence {} is outside [0, 1]",
                self.constraints.confidence
            )));
        }
        Ok(())
    }
}
