#![no_main]

use libfuzzer_sys::fuzz_target;
use mentorline_sla::{parse_announcement_created_event, parse_message_created_event};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);

    if let Ok(event) = parse_message_created_event(&raw) {
        assert!(!event.conversation_id.is_empty());
        assert!(!event.message_id.is_empty());
        assert_eq!(event.conversation_id, event.conversation_id.trim());
        assert_eq!(event.message.conversation_id, event.conversation_id);
        assert_eq!(event.message.message_id, event.message_id);
        if let Some(fields) = event.message.sla_fields() {
            assert_eq!(Some(fields.timestamp), event.message.timestamp);
        }
    }

    if let Ok(announcement) = parse_announcement_created_event(&raw) {
        assert!(!announcement.announcement_id.trim().is_empty());
    }
});
