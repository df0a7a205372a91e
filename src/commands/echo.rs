//! `echo` command: returns its params unchanged.
//!
//! Handy for checking payload integrity end to end, since whatever object
//! goes in as `params` comes back as the response body.

use crate::bridge::CommandError;
use crate::protocol::Document;
use serde_json::Value;

pub const NAME: &str = "echo";

pub fn handle(params: Document) -> Result<Value, CommandError> {
    Ok(Value::Object(params))
}
