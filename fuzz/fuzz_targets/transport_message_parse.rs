#![no_main]

use libfuzzer_sys::fuzz_target;
use uip_protocol::{parse_callback_target, parse_transport_message};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Ok(message) = parse_transport_message(&raw) else {
        return;
    };
    assert!(!message.conversation.id.trim().is_empty());

    let callback = message.to_callback();
    let target = parse_callback_target(&callback.to);
    assert_eq!(target.id, message.conversation.id.trim());
});
