// src/progress.rs

//! Mapping from protocol events to a job progress percentage.
//!
//! [`apply`] is pure and monotonic: the result is never below the current
//! value and never above [`COMPLETE`].

use crate::protocol::ProtocolMessage;

pub const COMPLETE: u8 = 100;

const RUN_STARTED_FLOOR: u8 = 20;
const TOOL_STEP: u8 = 10;
const TOOL_CEILING: u8 = 90;
const TEXT_STEP: u8 = 5;
const TEXT_CEILING: u8 = 85;

pub fn apply(current: u8, message: &ProtocolMessage) -> u8 {
    let current = current.min(COMPLETE);

    let candidate = match message {
        ProtocolMessage::RunStarted { .. } => RUN_STARTED_FLOOR,
        ProtocolMessage::Stream(chunk) if chunk.is_tool_invocation() => {
            current.saturating_add(TOOL_STEP).min(TOOL_CEILING)
        }
        ProtocolMessage::Stream(_) => current.saturating_add(TEXT_STEP).min(TEXT_CEILING),
        ProtocolMessage::RunCompleted { .. } => COMPLETE,
        ProtocolMessage::RunFailed { .. }
        | ProtocolMessage::Error { .. }
        | ProtocolMessage::LimitNotice { .. }
        | ProtocolMessage::CancelAcknowledged
        | ProtocolMessage::Other { .. } => current,
    };

    candidate.max(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{StreamChunk, StreamContent};

    fn text_chunk() -> ProtocolMessage {
        ProtocolMessage::Stream(StreamChunk {
            kind: Some("text".into()),
            content: StreamContent::Text("hi".into()),
        })
    }

    fn tool_chunk() -> ProtocolMessage {
        ProtocolMessage::Stream(StreamChunk {
            kind: Some("tool_use".into()),
            content: StreamContent::Unrecognized,
        })
    }

    #[test]
    fn follows_the_run_curve() {
        let mut p = 0;
        p = apply(p, &ProtocolMessage::RunStarted { session_id: None });
        assert_eq!(p, 20);
        p = apply(p, &text_chunk());
        assert_eq!(p, 25);
        p = apply(p, &tool_chunk());
        assert_eq!(p, 35);
        p = apply(p, &ProtocolMessage::RunCompleted { session_id: None });
        assert_eq!(p, 100);
    }

    #[test]
    fn ceilings_never_pull_progress_down() {
        let mut p = 0;
        for _ in 0..20 {
            p = apply(p, &tool_chunk());
        }
        assert_eq!(p, 90);

        // Text is capped at 85 but must not lower an already higher value.
        assert_eq!(apply(p, &text_chunk()), 90);
        assert_eq!(apply(p, &ProtocolMessage::RunStarted { session_id: None }), 90);
    }

    #[test]
    fn non_advancing_events_keep_progress() {
        for msg in [
            ProtocolMessage::RunFailed { error: None },
            ProtocolMessage::Error { message: None },
            ProtocolMessage::LimitNotice { message: "x".into() },
            ProtocolMessage::CancelAcknowledged,
            ProtocolMessage::Other { event: None },
        ] {
            assert_eq!(apply(40, &msg), 40);
        }
    }

    #[test]
    fn clamps_out_of_range_input() {
        assert_eq!(apply(250, &text_chunk()), 100);
    }
}
