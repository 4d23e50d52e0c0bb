//! Decoder for conversation frames

use crate::error::{ClaudeError, Result};
use crate::types::Message;

/// Message `type` discriminators the decoder understands
pub const KNOWN_MESSAGE_TYPES: &[&str] = &["user", "assistant", "system", "result", "stream_event"];

/// Parse a JSON value into a typed Message
///
/// Field names are accepted in both snake_case and camelCase. Unknown extra
/// fields are ignored; an unknown content-block type fails the whole message.
///
/// # Errors
/// Returns `ClaudeError::MessageParse` carrying the raw value when the frame
/// is not an object, has no `type`, has an unknown `type`, or does not match
/// the shape of its type.
pub fn parse_message(data: serde_json::Value) -> Result<Message> {
    let Some(obj) = data.as_object() else {
        return Err(ClaudeError::message_parse(
            "Invalid message data type (expected object)",
            Some(data),
        ));
    };

    let kind = match obj.get("type") {
        Some(serde_json::Value::String(kind)) => kind.clone(),
        Some(_) => {
            return Err(ClaudeError::message_parse(
                "Message 'type' field is not a string",
                Some(data),
            ))
        }
        None => {
            return Err(ClaudeError::message_parse(
                "Message missing 'type' field",
                Some(data),
            ))
        }
    };

    if !KNOWN_MESSAGE_TYPES.contains(&kind.as_str()) {
        return Err(ClaudeError::message_parse(
            format!("Unknown message type: {kind}"),
            Some(data),
        ));
    }

    serde_json::from_value(data.clone()).map_err(|e| {
        ClaudeError::message_parse(format!("Failed to parse {kind} message: {e}"), Some(data))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentBlock, UserContent};
    use serde_json::json;

    #[test]
    fn test_parse_user_message() {
        let data = json!({
            "type": "user",
            "message": {
                "role": "user",
                "content": "Hello, Claude!"
            },
            "uuid": "msg-1"
        });

        match parse_message(data).unwrap() {
            Message::User { message, uuid, .. } => {
                assert_eq!(uuid.as_deref(), Some("msg-1"));
                assert_eq!(
                    message.content,
                    Some(UserContent::String("Hello, Claude!".to_string()))
                );
            }
            other => panic!("Expected user message, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_assistant_with_blocks() {
        let data = json!({
            "type": "assistant",
            "message": {
                "model": "claude-sonnet",
                "content": [
                    {"type": "text", "text": "Let me check."},
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "tool_use", "id": "tu_1", "name": "Bash", "input": {"command": "ls"}}
                ]
            },
            "parent_tool_use_id": null
        });

        match parse_message(data).unwrap() {
            Message::Assistant { message, .. } => {
                assert_eq!(message.content.len(), 3);
                assert!(matches!(
                    &message.content[1],
                    ContentBlock::Thinking { signature, .. } if signature.is_empty()
                ));
            }
            other => panic!("Expected assistant message, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_camel_case_fields() {
        let data = json!({
            "type": "result",
            "subtype": "success",
            "durationMs": 120,
            "durationApiMs": 80,
            "isError": false,
            "numTurns": 2,
            "sessionId": "s-1",
            "totalCostUsd": 0.01
        });

        match parse_message(data).unwrap() {
            Message::Result {
                duration_ms,
                num_turns,
                session_id,
                total_cost_usd,
                ..
            } => {
                assert_eq!(duration_ms, 120);
                assert_eq!(num_turns, 2);
                assert_eq!(session_id.as_str(), "s-1");
                assert_eq!(total_cost_usd, Some(0.01));
            }
            other => panic!("Expected result message, got {other:?}"),
        }
    }

    #[test]
    fn test_system_message_keeps_extra_fields() {
        let data = json!({
            "type": "system",
            "subtype": "init",
            "session_id": "s-1",
            "tools": ["Bash"]
        });

        match parse_message(data).unwrap() {
            Message::System { subtype, data } => {
                assert_eq!(subtype, "init");
                assert_eq!(data["tools"], json!(["Bash"]));
            }
            other => panic!("Expected system message, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_invalid_message() {
        let data = json!({
            "type": "invalid_type",
            "data": "some data"
        });

        match parse_message(data) {
            Err(ClaudeError::MessageParse { message, data }) => {
                assert!(message.contains("invalid_type"));
                assert_eq!(data.unwrap()["data"], "some data");
            }
            other => panic!("Expected MessageParse error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_type_and_non_object() {
        assert!(matches!(
            parse_message(json!({"message": {}})),
            Err(ClaudeError::MessageParse { .. })
        ));
        assert!(matches!(
            parse_message(json!([1, 2, 3])),
            Err(ClaudeError::MessageParse { .. })
        ));
    }

    #[test]
    fn test_unknown_content_block_fails_message() {
        let data = json!({
            "type": "assistant",
            "message": {
                "model": "m",
                "content": [{"type": "hologram", "payload": 1}]
            }
        });

        assert!(matches!(
            parse_message(data),
            Err(ClaudeError::MessageParse { .. })
        ));
    }

    #[test]
    fn test_encoded_messages_decode_to_equal_values() {
        let frames = [
            json!({"type": "system", "subtype": "init", "cwd": "/tmp", "tools": ["Bash"]}),
            json!({
                "type": "result",
                "subtype": "success",
                "duration_ms": 5,
                "duration_api_ms": 4,
                "is_error": false,
                "num_turns": 1,
                "session_id": "s1"
            }),
            json!({
                "type": "user",
                "message": {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "ok"}
                ]}
            }),
            json!({"type": "stream_event", "uuid": "u1", "session_id": "s1", "event": {"delta": "x"}}),
            json!({
                "type": "assistant",
                "message": {"model": "claude-test", "content": [
                    {"type": "text", "text": "Checking"},
                    {"type": "thinking", "thinking": "list files first", "signature": "sig"},
                    {"type": "tool_use", "id": "toolu_2", "name": "Bash", "input": {"command": "ls"}},
                    {"type": "tool_result", "tool_use_id": "toolu_2", "content": "denied", "is_error": true}
                ]},
                "parent_tool_use_id": "toolu_1",
                "session_id": "s1"
            }),
        ];

        for frame in frames {
            let message = parse_message(frame).unwrap();
            let encoded = serde_json::to_value(&message).unwrap();
            assert_eq!(parse_message(encoded).unwrap(), message);
        }
    }
}
