//! API request and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{TaskId, TaskStatus};

/// Request to submit a new task.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    /// The task description / user prompt
    pub prompt: String,

    /// Ad hoc tool definitions registered before the pipeline starts
    #[serde(default)]
    pub tools: Vec<Value>,
}

/// Response after creating a task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskResponse {
    /// Unique task identifier
    pub task_id: TaskId,

    /// Current task status
    pub status: TaskStatus,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    /// Model used for all four role agents
    pub model: String,

    /// Registered tool count, built-in plus ad hoc
    pub tools: usize,
}
