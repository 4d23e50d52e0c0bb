//! Conversation message decoding
//!
//! Turns the JSON frames the CLI prints on stdout into typed [`Message`]
//! values. Control frames never reach this module; the engine routes them
//! first.
//!
//! [`Message`]: crate::types::Message

pub mod parser;

pub use parser::{parse_message, KNOWN_MESSAGE_TYPES};
