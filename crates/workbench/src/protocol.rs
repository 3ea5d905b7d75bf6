//! Newline-delimited JSON codec.
//!
//! Every message is one JSON object on one line. Embedded line breaks in
//! command text travel as JSON `\n` escapes, so a line is always exactly one
//! message.
//!
//! ```text
//! agent → workbench   {"type":"command","environment":"bash","command":"ls"}
//! workbench → agent   {"type":"response","response":{"output":"..","success":true},"screen":{..}}
//! workbench → agent   {"type":"error","message":".."}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::screen::Screen;
use crate::types::{CommandResponse, EnvironmentName};

/// Errors decoding or encoding a message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The line is not JSON at all.
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    /// The line is JSON but not a message we understand.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    /// A reply could not be serialized.
    #[error("failed to encode reply: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A message from the agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Run `command` in the named environment.
    Command {
        /// Target environment.
        #[serde(alias = "env")]
        environment: EnvironmentName,
        /// Raw command text, possibly multi-line.
        command: String,
    },
}

/// A message to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    /// Result of a command plus the screen of every environment.
    Response {
        /// The addressed environment's result.
        response: CommandResponse,
        /// One section per registered environment.
        screen: Screen,
    },
    /// The inbound line could not be decoded.
    Error {
        /// What went wrong.
        message: String,
    },
}

/// Decode one inbound line.
pub fn decode_request(line: &str) -> Result<Request, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(ProtocolError::InvalidJson)?;

    if !value.is_object() {
        return Err(ProtocolError::InvalidMessage(format!(
            "message must be a JSON object, got {}",
            json_type_name(&value)
        )));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
}

/// Encode one outbound reply as a single line (without the newline).
pub fn encode_reply(reply: &Reply) -> Result<String, ProtocolError> {
    serde_json::to_string(reply).map_err(ProtocolError::Encode)
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::{Value, json};

    use super::*;
    use crate::types::ScreenSection;

    fn name(s: &str) -> EnvironmentName {
        EnvironmentName::new(s).unwrap()
    }

    #[test]
    fn test_decode_command() {
        let request =
            decode_request(r#"{"type":"command","environment":"bash","command":"ls -la"}"#)
                .unwrap();

        assert_eq!(
            request,
            Request::Command {
                environment: name("bash"),
                command: "ls -la".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_multiline_command() {
        let line = json!({
            "type": "command",
            "environment": "editor",
            "command": "create notes.txt\nfirst\nsecond",
        })
        .to_string();
        assert!(!line.contains('\n'));

        let Request::Command { command, .. } = decode_request(&line).unwrap();
        assert_eq!(command, "create notes.txt\nfirst\nsecond");
    }

    #[test]
    fn test_decode_env_alias() {
        let Request::Command { environment, .. } =
            decode_request(r#"{"type":"command","env":"python","command":"1+1"}"#).unwrap();
        assert_eq!(environment, name("python"));
    }

    #[test]
    fn test_decode_invalid_json() {
        let err = decode_request("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
        assert!(err.to_string().starts_with("Invalid JSON"));
    }

    #[test]
    fn test_decode_non_object() {
        let err = decode_request("[1, 2]").unwrap_err();
        assert!(err.to_string().contains("got array"));
    }

    #[test]
    fn test_decode_missing_fields() {
        let err = decode_request(r#"{"type":"command","environment":"bash"}"#).unwrap_err();
        assert!(err.to_string().contains("command"), "{err}");

        let err = decode_request(r#"{"environment":"bash","command":"ls"}"#).unwrap_err();
        assert!(err.to_string().contains("type"), "{err}");
    }

    #[test]
    fn test_decode_wrong_types() {
        let err =
            decode_request(r#"{"type":"command","environment":"bash","command":42}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessage(_)));
    }

    #[test]
    fn test_decode_invalid_environment_name() {
        let err = decode_request(r#"{"type":"command","environment":"my-env","command":"x"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid environment name"), "{err}");
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = decode_request(r#"{"type":"shutdown"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessage(_)));
    }

    #[test]
    fn test_encode_response() {
        let mut screen = BTreeMap::new();
        screen.insert(name("bash"), ScreenSection::new("Ready"));
        screen.insert(name("editor"), ScreenSection::new("Views:").with_max_lines(100));

        let line = encode_reply(&Reply::Response {
            response: CommandResponse::ok("hello\nworld"),
            screen,
        })
        .unwrap();
        assert!(!line.contains('\n'));

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "response",
                "response": {"output": "hello\nworld", "success": true},
                "screen": {
                    "bash": {"content": "Ready", "max_lines": 50},
                    "editor": {"content": "Views:", "max_lines": 100},
                },
            })
        );
    }

    #[test]
    fn test_encode_error() {
        let line = encode_reply(&Reply::Error {
            message: "Invalid JSON: oops".to_string(),
        })
        .unwrap();

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, json!({"type": "error", "message": "Invalid JSON: oops"}));
    }
}
