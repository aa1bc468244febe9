//! Canonical interaction protocol shared by every gateway component.
//!
//! Front-ends translate native messages into [`CanonicalInteractionEvent`]s,
//! the backend answers with [`InteractionIntent`]s, and
//! [`degrade_intent`] strips content a surface cannot render according to
//! its [`SurfaceCapabilities`].
//!
//! ```rust
//! use uip_protocol::{
//!     degrade_intent, CanonicalInteractionEvent, InputPayload, InputType, InteractionIntent,
//!     IntentType, SurfaceCapabilities,
//! };
//!
//! let event = CanonicalInteractionEvent::new(
//!     "s1",
//!     "u1",
//!     InputType::Text,
//!     InputPayload::text("hello"),
//!     SurfaceCapabilities::default(),
//!     "local-adapter",
//! );
//! let mut intent = InteractionIntent::reply_to(&event, "hi there");
//! intent.content.markdown = Some("**hi there**".to_string());
//!
//! let degraded = degrade_intent(&event.capabilities, intent);
//! assert_eq!(degraded.intent_type, IntentType::Reply);
//! assert_eq!(degraded.target_session_id, "s1");
//! assert!(degraded.content.markdown.is_none());
//! ```

pub mod callback;
pub mod capabilities;
pub mod degradation;
pub mod error;
pub mod event;
pub mod intent;
pub mod stamp;
pub mod transport_message;

pub use callback::*;
pub use capabilities::*;
pub use degradation::*;
pub use error::*;
pub use event::*;
pub use intent::*;
pub use stamp::{new_uuid, unix_timestamp_ms};
pub use transport_message::*;
