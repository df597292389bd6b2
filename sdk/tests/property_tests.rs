use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use tera_sdk::errors::{EngineError, TeraErrorExt};
use tera_sdk::types::{BlockRef, Message, Role};

// Hints are static strings: whatever detail the error carries must not leak
// into what the terminal prints as advice.
proptest! {
    #[test]
    fn test_error_user_hint_never_echoes_detail(detail in "[a-zA-Z0-9_]{12,40}") {
        let errs = vec![
            EngineError::Config(detail.clone()),
            EngineError::Database(detail.clone()),
            EngineError::Upstream(detail.clone()),
            EngineError::InvalidTranscript(detail.clone()),
            EngineError::Memory(detail.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&detail));
        }
    }
}

proptest! {
    #[test]
    fn test_message_json_roundtrip(
        ordinal in 1u64..1_000_000,
        content in "\\PC{0,200}",
        block_index in 0usize..8,
        secs in 0i64..4_000_000_000,
        is_tool in any::<bool>(),
    ) {
        let msg = Message {
            ordinal,
            role: if is_tool { Role::Tool } else { Role::Assistant },
            content,
            origin: is_tool.then_some(BlockRef {
                assistant_ordinal: ordinal.saturating_sub(1),
                block_index,
            }),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, msg);
    }
}
