//! Control sub-protocol
//!
//! Control messages travel on the same stdio streams as content messages and
//! are told apart by their `type` field. Requests carry a `request_id`; the
//! matching response echoes it inside `response.request_id`.
//!
//! ```text
//! -> {"type":"control_request","request_id":"req_1_ab12cd34","request":{"subtype":"interrupt"}}
//! <- {"type":"control_response","response":{"subtype":"success","request_id":"req_1_ab12cd34","response":{}}}
//! ```

use crate::error::{ProtocolError, Result};
use crate::types::PermissionMode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `type` value of a control request
pub const CONTROL_REQUEST: &str = "control_request";

/// `type` value of a control response
pub const CONTROL_RESPONSE: &str = "control_response";

/// Read the `type` discriminator of a raw protocol value
pub fn message_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

/// Whether a raw value is a control response
pub fn is_control_response(value: &Value) -> bool {
    message_type(value) == Some(CONTROL_RESPONSE)
}

/// Whether a raw value is a control request sent by the CLI
pub fn is_control_request(value: &Value) -> bool {
    message_type(value) == Some(CONTROL_REQUEST)
}

/// Control commands the client can send to the CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Stop the running turn
    Interrupt,

    /// Change the permission mode
    SetPermissionMode {
        /// The new mode
        mode: PermissionMode,
    },

    /// Change the model; `None` restores the CLI default
    SetModel {
        /// The new model
        model: Option<String>,
    },
}

impl ControlCommand {
    /// Convert to the `request` payload of a control request
    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Outgoing control request envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlRequest {
    /// Always "control_request"
    #[serde(rename = "type")]
    pub message_type: String,

    /// Correlation identifier
    pub request_id: String,

    /// Request payload; carries its own `subtype`
    pub request: Value,
}

impl ControlRequest {
    /// Wrap a payload with a correlation identifier
    pub fn new(request_id: impl Into<String>, request: Value) -> Self {
        Self {
            message_type: CONTROL_REQUEST.to_string(),
            request_id: request_id.into(),
            request,
        }
    }

    /// Parse a control request received from the CLI
    pub fn from_value(value: Value) -> Result<Self> {
        if !is_control_request(&value) {
            return Err(ProtocolError::InvalidControlMessage(format!(
                "expected {}, got {}",
                CONTROL_REQUEST, value
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Subtype of the payload, if present
    pub fn subtype(&self) -> Option<&str> {
        self.request.get("subtype").and_then(Value::as_str)
    }

    /// Convert to a JSON value
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Outcome carried by a control response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlResponse {
    /// The request was handled
    Success {
        /// Correlation identifier of the request
        request_id: String,
        /// Optional response payload
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },

    /// The request failed
    Error {
        /// Correlation identifier of the request
        request_id: String,
        /// Failure description
        error: String,
    },
}

impl ControlResponse {
    /// Correlation identifier this response answers
    pub fn request_id(&self) -> &str {
        match self {
            Self::Success { request_id, .. } | Self::Error { request_id, .. } => request_id,
        }
    }

    /// Build an error response
    pub fn error(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Error {
            request_id: request_id.into(),
            error: error.into(),
        }
    }

    /// Build a success response
    pub fn success(request_id: impl Into<String>, response: Option<Value>) -> Self {
        Self::Success {
            request_id: request_id.into(),
            response,
        }
    }

    /// Parse the envelope `{"type":"control_response","response":{…}}`
    pub fn from_value(value: &Value) -> Result<Self> {
        if !is_control_response(value) {
            return Err(ProtocolError::InvalidControlMessage(format!(
                "expected {}, got {}",
                CONTROL_RESPONSE, value
            )));
        }
        let inner = value
            .get("response")
            .ok_or_else(|| ProtocolError::MissingField("response".to_string()))?;
        Ok(ControlResponse::deserialize(inner)?)
    }

    /// Wrap in the response envelope
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::json!({
            "type": CONTROL_RESPONSE,
            "response": serde_json::to_value(self)?,
        }))
    }
}
