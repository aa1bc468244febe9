#![no_main]

use libfuzzer_sys::fuzz_target;
use uip_protocol::{parse_callback_target, TargetKind};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let target = parse_callback_target(&raw);

    assert_eq!(target.id, target.id.trim());
    match &target.kind {
        TargetKind::Bare => {
            assert!(!raw.contains(':'));
            assert_eq!(target.id, raw.trim());
        }
        TargetKind::Other(prefix) => {
            assert!(!matches!(prefix.as_str(), "user" | "channel" | "group"));
            assert!(!prefix.contains(':'));
        }
        TargetKind::User | TargetKind::Channel | TargetKind::Group => {
            assert!(raw.contains(':'));
        }
    }

    let reparsed = parse_callback_target(&target.to_string());
    if !matches!(target.kind, TargetKind::Bare) && !target.kind.as_str().is_empty() {
        assert_eq!(reparsed.id, target.id);
    }
});
