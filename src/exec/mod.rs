//! Tool-execution client.
//!
//! Owns the lifecycle of one external execution process (the browser
//! automation server), detects readiness from its startup output, and relays
//! individual tool calls as request/response exchanges against its HTTP API.
//! One client instance supervises at most one process; all concurrently
//! running tasks share it, and calls serialize only on the process itself.

mod catalog;
mod client;

pub use catalog::catalog_definitions;
pub use client::{ExecClient, ExecError, SessionState};

/// Wire-level prefix the execution server expects on tool names.
pub const WIRE_PREFIX: &str = "browser_";

/// Normalize a logical tool name into the wire naming convention.
///
/// Already-prefixed names pass through unchanged.
pub fn wire_tool_name(name: &str) -> String {
    if name.starts_with(WIRE_PREFIX) {
        name.to_string()
    } else {
        format!("{}{}", WIRE_PREFIX, name)
    }
}
