//! HTTP API for the quartet orchestrator.
//!
//! ## Endpoints
//!
//! - `POST /api/task` - Submit a new task
//! - `GET /api/task/{id}` - Get task status, result, and phase history
//! - `GET /api/events` - Stream task status transitions via SSE
//! - `GET /api/health` - Health check

mod routes;
pub mod types;

pub use routes::serve;
pub use types::*;
