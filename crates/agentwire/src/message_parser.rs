//! Message parsing for the stream-json protocol.
//!
//! Turns the JSON values the transport reads from the CLI's stdout into typed
//! [`Message`]s. The CLI wraps user and assistant turns in a nested `message`
//! object and puts everything else at the top level, keyed by `type`.
//!
//! # Message Types
//!
//! - `user`: User turns echoed by the CLI, including tool results
//! - `assistant`: Assistant responses
//! - `system`: System messages (init, status), kept as raw data
//! - `result`: Final message of a response cycle
//!
//! # Example
//!
//! ```ignore
//! use agentwire::message_parser::parse_message;
//! use serde_json::json;
//!
//! let msg = parse_message(json!({
//!     "type": "user",
//!     "message": {"content": "Hello"}
//! }))?;
//! ```

use agentwire_protocol::{
    AssistantMessage, ContentBlock, Message, MessageContent, ResultMessage, SystemMessage,
    UserMessage,
};
use serde_json::Value;

/// What was wrong with a message
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseErrorKind {
    /// Text that is not JSON at all
    #[error("Invalid JSON: {0}")]
    Json(String),

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Field present with the wrong type
    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// Unknown message type
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Content neither a string nor an array
    #[error("Invalid content: {0}")]
    InvalidContent(String),

    /// Invalid content block type
    #[error("Invalid content block type: {0}")]
    InvalidContentBlock(String),
}

/// A value that could not be decoded into a [`Message`]
///
/// Carries the offending value so callers can log or inspect it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}")]
pub struct MessageParseError {
    /// What went wrong
    pub kind: ParseErrorKind,

    /// The value as received
    pub data: Value,
}

type Decode<T> = std::result::Result<T, ParseErrorKind>;

/// Parse a JSON value into a typed Message
///
/// # Errors
///
/// Returns `MessageParseError` if:
/// - The value is not an object or has no `type` field
/// - The message type is unknown
/// - Required fields are missing or have the wrong type
/// - Content is neither a string nor an array of known blocks
pub fn parse_message(data: Value) -> Result<Message, MessageParseError> {
    match decode(&data) {
        Ok(message) => Ok(message),
        Err(kind) => Err(MessageParseError { kind, data }),
    }
}

/// Parse a JSON string into a typed Message
///
/// Text that is not JSON fails with [`ParseErrorKind::Json`], carrying the
/// text as a JSON string.
pub fn parse_message_str(s: &str) -> Result<Message, MessageParseError> {
    match serde_json::from_str(s) {
        Ok(value) => parse_message(value),
        Err(err) => Err(MessageParseError {
            kind: ParseErrorKind::Json(err.to_string()),
            data: Value::String(s.to_string()),
        }),
    }
}

fn decode(data: &Value) -> Decode<Message> {
    if !data.is_object() {
        return Err(ParseErrorKind::InvalidFormat(format!(
            "expected object, got {}",
            kind_of(data)
        )));
    }

    let message_type = data
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ParseErrorKind::MissingField("type".into()))?;

    match message_type {
        "user" => decode_user(data),
        "assistant" => decode_assistant(data),
        "system" => decode_system(data),
        "result" => decode_result(data),
        other => Err(ParseErrorKind::UnknownType(other.into())),
    }
}

fn decode_user(data: &Value) -> Decode<Message> {
    let message = field(data, "message")?;
    let content = decode_content(field(message, "content")?)?;

    Ok(Message::User(UserMessage {
        content,
        parent_tool_use_id: optional_str(data, "parent_tool_use_id")?,
    }))
}

fn decode_assistant(data: &Value) -> Decode<Message> {
    let message = field(data, "message")?;
    let content = decode_content(field(message, "content")?)?;
    let model = str_field(message, "model")?;

    Ok(Message::Assistant(AssistantMessage {
        content,
        model,
        parent_tool_use_id: optional_str(data, "parent_tool_use_id")?,
    }))
}

fn decode_system(data: &Value) -> Decode<Message> {
    Ok(Message::System(SystemMessage {
        subtype: str_field(data, "subtype")?,
        data: data.clone(),
    }))
}

fn decode_result(data: &Value) -> Decode<Message> {
    let num_turns = u64_field(data, "num_turns")?;
    let num_turns = u32::try_from(num_turns)
        .map_err(|_| ParseErrorKind::InvalidField(format!("num_turns out of range: {}", num_turns)))?;

    let total_cost_usd = match data.get("total_cost_usd") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_f64()
                .ok_or_else(|| ParseErrorKind::InvalidField("total_cost_usd".into()))?,
        ),
    };

    Ok(Message::Result(ResultMessage {
        subtype: str_field(data, "subtype")?,
        duration_ms: u64_field(data, "duration_ms")?,
        duration_api_ms: u64_field(data, "duration_api_ms")?,
        is_error: bool_field(data, "is_error")?,
        num_turns,
        session_id: str_field(data, "session_id")?,
        total_cost_usd,
        usage: data.get("usage").filter(|usage| !usage.is_null()).cloned(),
        result: optional_str(data, "result")?,
    }))
}

/// Content is text when it is a string and blocks when it is an array
fn decode_content(content: &Value) -> Decode<MessageContent> {
    match content {
        Value::String(text) => Ok(MessageContent::Text(text.clone())),
        Value::Array(blocks) => blocks
            .iter()
            .map(decode_block)
            .collect::<Decode<Vec<_>>>()
            .map(MessageContent::Blocks),
        other => Err(ParseErrorKind::InvalidContent(format!(
            "expected string or array, got {}",
            kind_of(other)
        ))),
    }
}

fn decode_block(block: &Value) -> Decode<ContentBlock> {
    let block_type = block
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ParseErrorKind::MissingField("content block type".into()))?;

    match block_type {
        "text" => Ok(ContentBlock::text(str_field(block, "text")?)),
        "tool_use" => Ok(ContentBlock::tool_use(
            str_field(block, "id")?,
            str_field(block, "name")?,
            field(block, "input")?.clone(),
        )),
        "tool_result" => {
            let is_error = match block.get("is_error") {
                None | Some(Value::Null) => None,
                Some(value) => Some(
                    value
                        .as_bool()
                        .ok_or_else(|| ParseErrorKind::InvalidField("is_error".into()))?,
                ),
            };
            Ok(ContentBlock::ToolResult {
                tool_use_id: str_field(block, "tool_use_id")?,
                content: block.get("content").filter(|c| !c.is_null()).cloned(),
                is_error,
            })
        }
        other => Err(ParseErrorKind::InvalidContentBlock(other.to_string())),
    }
}

fn field<'a>(data: &'a Value, name: &str) -> Decode<&'a Value> {
    data.get(name)
        .ok_or_else(|| ParseErrorKind::MissingField(name.into()))
}

fn str_field(data: &Value, name: &str) -> Decode<String> {
    field(data, name)?
        .as_str()
        .map(String::from)
        .ok_or_else(|| ParseErrorKind::InvalidField(format!("{} must be a string", name)))
}

fn u64_field(data: &Value, name: &str) -> Decode<u64> {
    field(data, name)?
        .as_u64()
        .ok_or_else(|| ParseErrorKind::InvalidField(format!("{} must be a non-negative integer", name)))
}

fn bool_field(data: &Value, name: &str) -> Decode<bool> {
    field(data, name)?
        .as_bool()
        .ok_or_else(|| ParseErrorKind::InvalidField(format!("{} must be a boolean", name)))
}

/// Absent and null both mean `None`
fn optional_str(data: &Value, name: &str) -> Decode<Option<String>> {
    match data.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(ParseErrorKind::InvalidField(format!(
            "{} must be a string",
            name
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
