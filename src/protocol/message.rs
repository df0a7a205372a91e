//! Payload decoding and command message extraction.
//!
//! A payload is decoded into a JSON object in one of two ways:
//! - `Strict`: the trimmed payload must parse as a JSON object as-is.
//! - `Lenient`: strict first; on failure, cut the text after the last
//!   balanced top-level `}` and parse once more.
//!
//! Command messages look like:
//!
//! ```text
//! {"command": "ping", "params": {}}
//! {"type": "ping", "params": {}}      (legacy)
//! ```

use crate::protocol::frame::FrameError;
use crate::protocol::recovery;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// A decoded JSON object.
pub type Document = Map<String, Value>;

/// How frame payloads are turned into documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoding {
    Strict,
    Lenient,
}

impl Decoding {
    /// Decode a raw payload into a JSON object.
    ///
    /// Invalid UTF-8 sequences are replaced rather than rejected; the
    /// recovery pass then gets a chance to cut them off.
    pub fn decode(self, payload: &[u8]) -> Result<Document, FrameError> {
        let text = String::from_utf8_lossy(payload);
        let text = trim_noise(&text);

        match self {
            Decoding::Strict => parse_object(text),
            Decoding::Lenient => decode_lenient(text),
        }
    }
}

fn decode_lenient(text: &str) -> Result<Document, FrameError> {
    let first_error = match parse_object(text) {
        Ok(document) => return Ok(document),
        Err(e) => e,
    };

    // Skip anything ahead of the opening brace (BOMs, stray bytes).
    let Some(start) = text.find('{') else {
        return Err(first_error);
    };
    let candidate = &text[start..];
    let Some(end) = recovery::balanced_end(candidate) else {
        return Err(first_error);
    };

    debug!(
        skipped_prefix = start,
        dropped_suffix = candidate.len() - end,
        "Recovering payload after failed parse"
    );
    parse_object(&candidate[..end])
}

fn parse_object(text: &str) -> Result<Document, FrameError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(FrameError::Parse {
            reason: format!("expected an object, found {}", kind_of(&other)),
        }),
        Err(e) => Err(FrameError::Parse {
            reason: e.to_string(),
        }),
    }
}

fn trim_noise(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || c.is_control())
}

/// JSON type name used in error messages.
pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Problems with the shape of an otherwise valid document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message has no 'command' field")]
    MissingCommand,

    #[error("'{field}' must be a string, found {found}")]
    InvalidCommand { field: &'static str, found: &'static str },

    #[error("'params' must be an object, found {found}")]
    InvalidParams { found: &'static str },
}

/// A request to run one named command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMessage {
    pub command: String,
    pub params: Document,
}

impl CommandMessage {
    /// Extract the command name and parameters from a decoded document.
    ///
    /// `command` is preferred; `type` is accepted when `command` is absent.
    /// A missing or null `params` becomes an empty object. Other fields are
    /// ignored.
    pub fn from_document(mut document: Document) -> Result<Self, MessageError> {
        let (field, value) = match document.remove("command") {
            Some(value) => ("command", value),
            None => match document.remove("type") {
                Some(value) => ("type", value),
                None => return Err(MessageError::MissingCommand),
            },
        };

        let command = match value {
            Value::String(name) => name,
            other => {
                return Err(MessageError::InvalidCommand {
                    field,
                    found: kind_of(&other),
                })
            }
        };

        let params = match document.remove("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(params)) => params,
            Some(other) => {
                return Err(MessageError::InvalidParams {
                    found: kind_of(&other),
                })
            }
        };

        Ok(CommandMessage { command, params })
    }
}
