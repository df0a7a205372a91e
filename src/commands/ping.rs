//! `ping` command.
//!
//! Used by clients to check the server and owner context are responsive
//! without touching any host state.
//!
//! ```text
//! Request:  {"command": "ping"}
//! Response: {"success": true, "message": "pong"}
//! ```

use crate::bridge::CommandError;
use crate::protocol::Document;
use serde_json::{json, Value};

pub const NAME: &str = "ping";

pub fn handle(_params: Document) -> Result<Value, CommandError> {
    Ok(json!({
        "success": true,
        "message": "pong",
    }))
}
