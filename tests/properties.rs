use proptest::prelude::*;

use taskvisor::engine::{OutcomeLatch, Resolution, Terminal};
use taskvisor::progress::{self, COMPLETE};
use taskvisor::protocol::{DecodedLine, LineDecoder, ProtocolMessage, StreamChunk, StreamContent};

// Lines a program might print: protocol events, plain text, non-ASCII text,
// blank lines and JSON that is not an object.
fn line_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(r#"{"event":"run_started","session_id":"s"}"#.to_string()),
        Just(r#"{"event":"stream","payload":{"type":"text","content":"hé"}}"#.to_string()),
        Just(r#"{"event":"stream","payload":{"type":"tool_use","content":[{"type":"tool_use"}]}}"#.to_string()),
        Just(r#"{"event":"run_completed"}"#.to_string()),
        Just(r#"{"event":"error","payload":{"message":"x"}}"#.to_string()),
        Just("[1, 2, 3]".to_string()),
        Just(String::new()),
        "[a-z ]{1,12}",
        "\\PC{1,6}",
    ]
}

fn decode_all(bytes: &[u8], cuts: &[usize]) -> Vec<DecodedLine> {
    let mut decoder = LineDecoder::new();
    let mut lines = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        let end = cut.clamp(start, bytes.len());
        lines.extend(decoder.push(&bytes[start..end]));
        start = end;
    }
    lines.extend(decoder.push(&bytes[start..]));
    lines.extend(decoder.finish());
    lines
}

fn message_strategy() -> impl Strategy<Value = ProtocolMessage> {
    prop_oneof![
        Just(ProtocolMessage::RunStarted { session_id: None }),
        Just(ProtocolMessage::Stream(StreamChunk {
            kind: Some("text".into()),
            content: StreamContent::Text("t".into()),
        })),
        Just(ProtocolMessage::Stream(StreamChunk {
            kind: Some("tool_use".into()),
            content: StreamContent::Unrecognized,
        })),
        Just(ProtocolMessage::LimitNotice {
            message: "limit".into()
        }),
        Just(ProtocolMessage::RunCompleted { session_id: None }),
        Just(ProtocolMessage::RunFailed { error: None }),
        Just(ProtocolMessage::Error { message: None }),
        Just(ProtocolMessage::Other { event: None }),
    ]
}

proptest! {
    #[test]
    fn decoding_is_independent_of_chunk_boundaries(
        lines in proptest::collection::vec(line_strategy(), 0..12),
        trailing_newline in any::<bool>(),
        mut cuts in proptest::collection::vec(0usize..512, 0..16),
    ) {
        let mut text = lines.join("\n");
        if trailing_newline {
            text.push('\n');
        }
        let bytes = text.as_bytes();
        cuts.sort_unstable();

        let whole = decode_all(bytes, &[]);
        let chunked = decode_all(bytes, &cuts);
        prop_assert_eq!(chunked, whole);
    }

    #[test]
    fn progress_never_decreases_and_stays_in_range(
        start in 0u8..=100,
        messages in proptest::collection::vec(message_strategy(), 0..40),
    ) {
        let mut current = start;
        for message in &messages {
            let next = progress::apply(current, message);
            prop_assert!(next >= current);
            prop_assert!(next <= COMPLETE);
            current = next;
        }
    }

    #[test]
    fn exactly_one_terminal_outcome(order in Just(vec![
        Terminal::TimedOut,
        Terminal::Completed,
        Terminal::Failed("late".into()),
    ]).prop_shuffle()) {
        let mut latch = OutcomeLatch::new();
        let resolved = order
            .iter()
            .cloned()
            .map(|t| latch.resolve(t))
            .filter(|r| *r == Resolution::Resolved)
            .count();

        prop_assert_eq!(resolved, 1);
        prop_assert_eq!(latch.terminal(), order.first());
    }
}
