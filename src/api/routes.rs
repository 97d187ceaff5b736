//! HTTP route handlers.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::llm::{LlmClient, OpenRouterClient};
use crate::orchestrator::AgentSystem;
use crate::task::{Task, TaskId, TaskStatus};

use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub system: Arc<AgentSystem>,
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let llm: Arc<dyn LlmClient> = Arc::new(OpenRouterClient::new(config.api_key.clone()));
    let system = AgentSystem::new(&config, llm).await;

    let state = Arc::new(AppState {
        config: config.clone(),
        system,
    });

    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/task", post(create_task))
        .route("/api/task/:id", get(get_task))
        .route("/api/events", get(stream_events))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    // Setup graceful shutdown on SIGTERM/SIGINT
    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal(shutdown_state).await;
        })
        .await?;

    Ok(())
}

/// Wait for shutdown signal and stop the supervised execution process.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping execution process...");
    state.system.exec().stop().await;
    tracing::info!("Graceful shutdown complete");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let tools = state.system.registry().read().await.len();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.config.default_model.clone(),
        tools,
    })
}

/// Create a new task.
///
/// Ad hoc tool definitions are validated and registered before the task is
/// created; a malformed definition rejects the whole request.
async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<CreateTaskResponse>, (StatusCode, String)> {
    if req.prompt.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "prompt is required".to_string()));
    }

    let task_id = state
        .system
        .start_task(req.prompt, req.tools)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    Ok(Json(CreateTaskResponse {
        task_id,
        status: TaskStatus::Pending,
    }))
}

/// Get a task snapshot by id.
async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, (StatusCode, String)> {
    let id = TaskId::from_str(&id)
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("Invalid task id: {}", id)))?;

    state
        .system
        .task_snapshot(id)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))
}

/// Stream task status transitions via SSE.
///
/// Every event carries its kind in the payload's `type` field; the stream
/// covers all tasks and stays open until the client disconnects.
async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (subscriber, mut rx) = state.system.subscribe().await;

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match Event::default().json_data(&event) {
                Ok(sse_event) => yield Ok(sse_event),
                Err(e) => {
                    tracing::error!(subscriber = %subscriber, "dropping unserializable event: {}", e);
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
