use chrono::Utc;
use proptest::prelude::*;
use tera_engine::agent::WorkingMemory;
use tera_engine::memory::{Embedder, HashingEmbedder, Metric, VectorMemory, VectorStore};
use tera_engine::response_parser::parse_reply;
use tera_sdk::types::{ChatMessage, Message, Role};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

// Parser: arbitrary input never panics and fence indices are dense
proptest! {
    #[test]
    fn test_parse_reply_indices_are_dense(text in "(\\PC|\n|`){0,400}") {
        let parsed = parse_reply(&text);
        let mut indices: Vec<usize> = parsed
            .blocks
            .iter()
            .map(|b| b.index)
            .chain(parsed.malformed.iter().map(|m| m.index))
            .collect();
        indices.sort_unstable();
        let expected: Vec<usize> = (0..parsed.fence_count()).collect();
        prop_assert_eq!(indices, expected);
    }
}

proptest! {
    #[test]
    fn test_text_without_backticks_has_no_fences(text in "[^`]{0,400}") {
        let parsed = parse_reply(&text);
        prop_assert_eq!(parsed.fence_count(), 0);
    }
}

// Well-formed replies: every block comes back in order with its exact body
proptest! {
    #[test]
    fn test_well_formed_blocks_are_extracted(
        blocks in prop::collection::vec(
            (
                prop::sample::select(vec!["python", "sh", "bash", "ruby", ""]),
                prop::collection::vec("[a-z0-9 =+()]{0,30}", 1..5),
            ),
            0..5,
        ),
        prose in "[a-zA-Z ,.]{0,40}",
    ) {
        let mut text = String::new();
        for (tag, lines) in &blocks {
            text.push_str(&prose);
            text.push_str("\n```");
            text.push_str(tag);
            text.push('\n');
            text.push_str(&lines.join("\n"));
            text.push_str("\n```\n");
        }
        text.push_str(&prose);

        let parsed = parse_reply(&text);
        prop_assert!(parsed.malformed.is_empty());
        prop_assert_eq!(parsed.blocks.len(), blocks.len());
        for (i, (block, (tag, lines))) in parsed.blocks.iter().zip(&blocks).enumerate() {
            prop_assert_eq!(block.index, i);
            let expected_tag = (!tag.is_empty()).then(|| tag.to_string());
            prop_assert_eq!(&block.language, &expected_tag);
            prop_assert_eq!(&block.source, &lines.join("\n"));
        }
    }
}

fn transcript(specs: &[(u8, usize)]) -> Vec<Message> {
    specs
        .iter()
        .enumerate()
        .map(|(i, (role, len))| Message {
            ordinal: i as u64 + 1,
            role: match role % 3 {
                0 => Role::User,
                1 => Role::Assistant,
                _ => Role::Tool,
            },
            content: "x".repeat(*len),
            origin: None,
            created_at: Utc::now(),
        })
        .collect()
}

// Window: a suffix that keeps the current turn, fits when it reaches back,
// and never opens on a tool message it could have dropped
proptest! {
    #[test]
    fn test_window_invariants(
        specs in prop::collection::vec((0u8..3, 0usize..400), 0..40),
        pinned_back in 0usize..5,
        limit in 0usize..2000,
        preamble_len in 0usize..800,
    ) {
        let messages = transcript(&specs);
        let pinned_from = messages.len().saturating_sub(pinned_back);
        let preamble = vec![ChatMessage::system("p".repeat(preamble_len))];
        let memory = WorkingMemory::with_limit(limit);

        let window = memory.window(&preamble, &messages, pinned_from);
        let start = messages.len() - window.len();

        prop_assert_eq!(window, &messages[start..]);
        prop_assert!(start <= pinned_from);

        if start < pinned_from {
            let cost: usize = preamble
                .iter()
                .map(|m| WorkingMemory::estimate_tokens(&m.content))
                .chain(window.iter().map(|m| WorkingMemory::estimate_tokens(&m.content)))
                .sum();
            prop_assert!(cost <= limit);
            prop_assert!(window[0].role != Role::Tool);
        }
    }
}

// Store: at most k hits, best first
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    #[test]
    fn test_query_returns_best_first(
        vectors in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 4), 0..30),
        query in prop::collection::vec(-1.0f32..1.0, 4),
        k in 0usize..10,
        capacity in 1usize..40,
    ) {
        let rt = runtime();
        let hits = rt.block_on(async {
            let store = VectorStore::new("prop", 4, Metric::Cosine, capacity, None);
            for (i, v) in vectors.iter().enumerate() {
                store.insert(format!("fact {}", i), v.clone()).await.unwrap();
            }
            assert!(store.len().await <= capacity);
            store.query(&query, k).await.unwrap()
        });

        let stored = vectors.len().min(capacity);
        prop_assert_eq!(hits.len(), k.min(stored));
        for pair in hits.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
    }
}

proptest! {
    #[test]
    fn test_hashing_embedder_is_deterministic(text in "\\PC{0,200}", dimension in 1usize..128) {
        let rt = runtime();
        let embedder = HashingEmbedder::new(dimension);
        let (a, b) = rt.block_on(async {
            (embedder.embed(&text).await.unwrap(), embedder.embed(&text).await.unwrap())
        });
        prop_assert_eq!(a.len(), dimension);
        prop_assert_eq!(a, b);
    }
}
