#![no_main]

use libfuzzer_sys::fuzz_target;
use uip_gateway::{parse_message_request, LocalAdapter, LocalAdapterConfig};

fuzz_target!(|data: &[u8]| {
    let Ok(request) = parse_message_request(data) else {
        return;
    };
    assert!(!request.text.trim().is_empty());

    let adapter = LocalAdapter::new(LocalAdapterConfig::default());
    let event = adapter
        .event_from_request(&request)
        .expect("validated request converts to an event");
    assert!(!event.session_id().is_empty());
    assert!(!event.user_id().is_empty());
    assert!(event.validate().is_ok());
});
