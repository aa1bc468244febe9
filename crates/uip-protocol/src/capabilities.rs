use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "camelCase", default)]
/// Rendering features a front-end surface declares for itself.
///
/// Declared once per adapter and copied onto every event so that the
/// dispatch core can degrade the reply without looking the adapter up.
pub struct SurfaceCapabilities {
    pub supports_reply: bool,
    pub supports_edit: bool,
    pub supports_reaction: bool,
    pub supports_thread: bool,
    pub supports_attachment: bool,
    pub supports_markdown: bool,
}

impl SurfaceCapabilities {
    /// Every feature enabled.
    pub fn all() -> Self {
        Self {
            supports_reply: true,
            supports_edit: true,
            supports_reaction: true,
            supports_thread: true,
            supports_attachment: true,
            supports_markdown: true,
        }
    }

    /// Plain text replies only.
    pub fn text_only() -> Self {
        Self {
            supports_reply: true,
            ..Self::default()
        }
    }

    /// Expands a six-bit mask (reply, edit, reaction, thread, attachment,
    /// markdown from the lowest bit up). Used to enumerate combinations.
    pub fn from_bits(bits: u8) -> Self {
        Self {
            supports_reply: bits & 0b00_0001 != 0,
            supports_edit: bits & 0b00_0010 != 0,
            supports_reaction: bits & 0b00_0100 != 0,
            supports_thread: bits & 0b00_1000 != 0,
            supports_attachment: bits & 0b01_0000 != 0,
            supports_markdown: bits & 0b10_0000 != 0,
        }
    }
}
