//! Capability-aware intent degradation.

use crate::{InteractionIntent, SurfaceCapabilities};

/// Strips content the surface cannot render.
///
/// Markdown is cleared when unsupported and attachments are cleared when
/// unsupported. Edit downgrade is a no-op: intents carry no edit target yet,
/// so the intent type is never rewritten. The function is idempotent and
/// never touches `intent_type`, `target_session_id` or `in_reply_to`.
pub fn degrade_intent(
    capabilities: &SurfaceCapabilities,
    mut intent: InteractionIntent,
) -> InteractionIntent {
    degrade_intent_in_place(capabilities, &mut intent);
    intent
}

pub fn degrade_intent_in_place(capabilities: &SurfaceCapabilities, intent: &mut InteractionIntent) {
    if !capabilities.supports_markdown {
        intent.content.markdown = None;
    }
    if !capabilities.supports_attachment {
        intent.content.attachments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::degrade_intent;
    use crate::{
        CanonicalInteractionEvent, InputPayload, InputType, IntentAttachment, IntentType,
        InteractionIntent, SurfaceCapabilities,
    };

    fn rich_intent(intent_type: IntentType) -> InteractionIntent {
        let event = CanonicalInteractionEvent::new(
            "s1",
            "u1",
            InputType::Text,
            InputPayload::text("hello"),
            SurfaceCapabilities::default(),
            "local-adapter",
        );
        let mut intent = InteractionIntent::typed_reply_to(&event, intent_type, "plain");
        intent.content.markdown = Some("**bold**".to_string());
        intent.content.attachments.push(IntentAttachment {
            kind: "image".to_string(),
            url: Some("https://example.invalid/cat.png".to_string()),
            ..IntentAttachment::default()
        });
        intent
    }

    #[test]
    fn unit_markdown_cleared_when_unsupported() {
        let caps = SurfaceCapabilities {
            supports_attachment: true,
            ..SurfaceCapabilities::default()
        };
        let degraded = degrade_intent(&caps, rich_intent(IntentType::Reply));
        assert!(degraded.content.markdown.is_none());
        assert_eq!(degraded.content.attachments.len(), 1);
        assert_eq!(degraded.intent_type, IntentType::Reply);
    }

    #[test]
    fn unit_attachments_cleared_when_unsupported() {
        let caps = SurfaceCapabilities {
            supports_markdown: true,
            ..SurfaceCapabilities::default()
        };
        let degraded = degrade_intent(&caps, rich_intent(IntentType::Notify));
        assert_eq!(degraded.content.markdown.as_deref(), Some("**bold**"));
        assert!(degraded.content.attachments.is_empty());
    }

    #[test]
    fn unit_edit_capability_does_not_rewrite_intent_type() {
        let caps = SurfaceCapabilities {
            supports_edit: false,
            ..SurfaceCapabilities::all()
        };
        let original = rich_intent(IntentType::Ask);
        let degraded = degrade_intent(&caps, original.clone());
        assert_eq!(degraded, original);
    }

    #[test]
    fn functional_degradation_is_idempotent_and_preserves_routing_for_every_combination() {
        for bits in 0u8..64 {
            let caps = SurfaceCapabilities::from_bits(bits);
            for intent_type in [
                IntentType::Reply,
                IntentType::Ask,
                IntentType::Notify,
                IntentType::Noop,
            ] {
                let original = rich_intent(intent_type);
                let once = degrade_intent(&caps, original.clone());
                let twice = degrade_intent(&caps, once.clone());
                assert_eq!(once, twice, "caps bits {bits:#08b}");
                assert_eq!(once.intent_type, original.intent_type);
                assert_eq!(once.target_session_id, original.target_session_id);
                assert_eq!(once.in_reply_to, original.in_reply_to);
                assert_eq!(once.content.text, original.content.text);
            }
        }
    }
}
