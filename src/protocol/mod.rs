// src/protocol/mod.rs

//! Line-delimited JSON protocol spoken with the supervised program.
//!
//! - [`command`] builds the single run command written to stdin.
//! - [`message`] models the events read back from stdout.
//! - [`content`] extracts text from the loosely shaped stream payloads.
//! - [`decoder`] turns raw stdout chunks into complete lines and messages.

pub mod command;
pub mod content;
pub mod decoder;
pub mod message;

pub use command::{RunCommand, RunCommandOptions};
pub use content::StreamContent;
pub use decoder::{DecodedLine, LineDecoder};
pub use message::{ProtocolMessage, StreamChunk};
