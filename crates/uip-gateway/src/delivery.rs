//! Sink for callbacks that no synchronous caller picked up.

use std::sync::Arc;

use uip_backend::{DeliveryHandler, ImWebhookNotifier, OutboundDelivery, OutboundTransport};
use uip_protocol::TransportMessage;

/// Builds the delivery handler handed to the backend client: late or
/// unmatched callbacks go to the IM webhook (when configured) and are
/// pushed as transport frames to every configured transport.
pub fn build_delivery_fanout(
    notifier: Option<Arc<ImWebhookNotifier>>,
    transports: Vec<Arc<dyn OutboundTransport>>,
) -> DeliveryHandler {
    Arc::new(move |delivery: OutboundDelivery| {
        tracing::info!(
            to = %delivery.callback.to,
            outcome = delivery.outcome.as_str(),
            session_id = delivery.routing.session_id.as_deref().unwrap_or_default(),
            "delivering out-of-band callback"
        );
        let mut frame = TransportMessage::from_callback(&delivery.callback);
        if let Some(session_id) = &delivery.routing.session_id {
            frame
                .meta
                .insert("sessionId".to_string(), session_id.clone().into());
        }
        if let Some(reply_to_id) = &delivery.callback.reply_to_id {
            frame
                .meta
                .insert("replyToId".to_string(), reply_to_id.clone().into());
        }
        for transport in &transports {
            if let Err(error) = transport.push(frame.clone()) {
                tracing::warn!(transport = transport.name(), error = %error, "failed to push callback frame");
            }
        }
        if let Some(notifier) = &notifier {
            notifier.spawn_notify(delivery);
        }
    })
}
