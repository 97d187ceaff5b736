//! # Quartet
//!
//! A four-role agent pipeline that drives a supervised browser automation
//! process.
//!
//! Every task flows through the same fixed sequence of role agents:
//!
//! ```text
//!   prompt ──► Thinker ──► Planner ──► Executor ──► Reviewer ──► result
//!                                        │
//!                                        ▼
//!                              ┌──────────────────┐
//!                              │   ExecClient     │
//!                              │ (browser-agent   │
//!                              │  child process)  │
//!                              └──────────────────┘
//! ```
//!
//! Each phase sees the original prompt plus every previous phase's output;
//! any phase error fails the task immediately. Tool access is gated per role
//! through the registry, and tool calls are forwarded over HTTP to the
//! supervised execution process.
//!
//! ## Modules
//! - `agents`: the four role agents and their tool-call loop
//! - `orchestrator`: task lifecycle, phase sequencing, event publication
//! - `registry`: capability-gated tool registry
//! - `schema`: tool parameter schemas, validation and normalization
//! - `exec`: execution-process supervision and the built-in tool catalog
//! - `llm`: OpenRouter chat-completion client
//! - `events`: publish/subscribe hub for task status transitions
//! - `api`: HTTP surface (task submission, snapshots, SSE events)

pub mod agents;
pub mod api;
pub mod config;
pub mod events;
pub mod exec;
pub mod llm;
pub mod orchestrator;
pub mod registry;
pub mod schema;
pub mod task;

pub use config::Config;
pub use orchestrator::AgentSystem;
pub use registry::ToolRegistry;
pub use task::{Task, TaskId, TaskStatus};
