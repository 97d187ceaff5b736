//! Supervision of the execution process and the tool wire calls against it.

use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::ExecConfig;
use crate::registry::ToolRegistry;

use super::{catalog_definitions, wire_tool_name};

/// Phrases in the process's startup output that signal it is accepting
/// requests. Matched case-insensitively against whole stdout lines.
const READY_MARKERS: &[&str] = &["listening", "server started", "ready on port"];

/// Grace window between the termination signal and a force kill.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Errors from the execution client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecError {
    #[error("execution process failed to start: {stderr}")]
    ProcessStartup { stderr: String },

    #[error(
        "execution process produced no readiness marker within {waited:?} \
         (binary installed: {})",
        .binary_installed.map(|b| if b { "yes" } else { "no" }).unwrap_or("unknown")
    )]
    ProcessStartupTimeout {
        waited: Duration,
        binary_installed: Option<bool>,
    },

    #[error("tool execution failed: {message}")]
    ToolExecution { message: String },
}

/// Lifecycle state of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Stopping,
    StartFailed,
}

/// One line of supervised startup output.
enum StartupLine {
    Out(String),
    Err(String),
    Exited,
}

struct Session {
    state: SessionState,
    child: Option<Child>,
}

/// Client supervising one execution process and relaying tool calls to it.
pub struct ExecClient {
    config: ExecConfig,
    http: reqwest::Client,
    // One lock guards both the state tag and the child handle, which is what
    // upholds the at-most-one-process invariant under concurrent callers.
    session: Mutex<Session>,
}

impl ExecClient {
    pub fn new(config: ExecConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            session: Mutex::new(Session {
                state: SessionState::Stopped,
                child: None,
            }),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.session.lock().await.state
    }

    /// Start the execution process and wait for readiness.
    ///
    /// No-op when already running with a live child. A child that exited
    /// since the last start is reaped here and a fresh one spawned, so tool
    /// calls recover from a crashed process on their next lazy start. On
    /// failure the client ends in `StartFailed`; the next `execute_tool`
    /// retries lazily.
    ///
    /// # Errors
    /// `ExecError::ProcessStartup` when the spawn fails, the process exits,
    /// or it writes to stderr before readiness; `ProcessStartupTimeout` when
    /// no readiness marker appears within the configured window.
    pub async fn start(&self) -> Result<(), ExecError> {
        let mut session = self.session.lock().await;
        if session.state == SessionState::Running {
            let alive = match session.child.as_mut() {
                Some(child) => matches!(child.try_wait(), Ok(None)),
                None => false,
            };
            if alive {
                return Ok(());
            }
            warn!("execution process exited since startup, respawning");
            if let Some(mut child) = session.child.take() {
                let _ = child.wait().await;
            }
            session.state = SessionState::Stopped;
        }
        session.state = SessionState::Starting;

        let binary = self.config.binary();
        let mut cmd = Command::new(&binary);
        cmd.arg("serve")
            .arg("--browser")
            .arg(&self.config.browser)
            .arg("--port")
            .arg(self.config.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.config.headless {
            cmd.arg("--headless");
        }
        if let Some(ref dir) = self.config.profile_dir {
            cmd.arg("--profile-dir").arg(dir);
        }
        if self.config.vision {
            cmd.arg("--vision");
        }

        info!(
            binary = %binary.display(),
            browser = %self.config.browser,
            port = self.config.port,
            headless = self.config.headless,
            "spawning execution process"
        );

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                session.state = SessionState::StartFailed;
                return Err(ExecError::ProcessStartup {
                    stderr: format!("failed to spawn '{}': {}", binary.display(), e),
                });
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (tx, mut rx) = mpsc::channel::<StartupLine>(64);

        if let Some(stdout) = stdout {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    // After startup the receiver is gone; keep draining so
                    // the pipe never fills up.
                    if tx.send(StartupLine::Out(line.clone())).await.is_err() {
                        debug!("exec stdout: {}", line);
                    }
                }
                let _ = tx.send(StartupLine::Exited).await;
            });
        }
        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(StartupLine::Err(line.clone())).await.is_err() {
                        warn!("exec stderr: {}", line);
                    }
                }
            });
        }

        let waited = self.config.startup_timeout;
        let readiness = tokio::time::timeout(waited, async {
            while let Some(line) = rx.recv().await {
                match line {
                    StartupLine::Out(l) => {
                        debug!("exec startup: {}", l);
                        let lower = l.to_lowercase();
                        if READY_MARKERS.iter().any(|m| lower.contains(m)) {
                            return Ok(l);
                        }
                    }
                    StartupLine::Err(l) if !l.trim().is_empty() => {
                        return Err(ExecError::ProcessStartup { stderr: l });
                    }
                    StartupLine::Err(_) => {}
                    StartupLine::Exited => {
                        return Err(ExecError::ProcessStartup {
                            stderr: "process exited before becoming ready".to_string(),
                        });
                    }
                }
            }
            Err(ExecError::ProcessStartup {
                stderr: "startup output closed before readiness".to_string(),
            })
        })
        .await;

        match readiness {
            Ok(Ok(marker)) => {
                info!("execution process ready: {}", marker);
                session.child = Some(child);
                session.state = SessionState::Running;
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                session.state = SessionState::StartFailed;
                Err(e)
            }
            Err(_elapsed) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                session.state = SessionState::StartFailed;
                let binary_installed = self.probe_binary().await;
                warn!(
                    ?waited,
                    ?binary_installed,
                    "execution process never reached readiness"
                );
                Err(ExecError::ProcessStartupTimeout {
                    waited,
                    binary_installed,
                })
            }
        }
    }

    /// Diagnostic probe: is the automation binary runnable at all?
    async fn probe_binary(&self) -> Option<bool> {
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            Command::new(self.config.binary())
                .arg("--version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status(),
        )
        .await;
        match result {
            Ok(Ok(status)) => Some(status.success()),
            Ok(Err(_)) => Some(false),
            Err(_) => None,
        }
    }

    /// Stop the execution process.
    ///
    /// No-op when not running. Sends a graceful termination signal first and
    /// force-kills after the grace window; always ends `Stopped`.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        if let Some(mut child) = session.child.take() {
            session.state = SessionState::Stopping;
            if let Some(pid) = child.id() {
                // kill(1) sends SIGTERM.
                let _ = Command::new("kill").arg(pid.to_string()).status().await;
                match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                    Ok(_) => debug!("execution process exited gracefully"),
                    Err(_) => {
                        warn!("execution process ignored SIGTERM, force killing");
                        let _ = child.kill().await;
                        let _ = child.wait().await;
                    }
                }
            } else {
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
            info!("execution process stopped");
        }
        session.state = SessionState::Stopped;
    }

    /// Execute a tool against the running process, starting it lazily when
    /// needed. Callers never pre-start the session.
    ///
    /// # Errors
    /// Startup errors from the lazy start; `ExecError::ToolExecution` on a
    /// non-2xx response, transport failure, or timeout. Never retried here.
    pub async fn execute_tool(&self, name: &str, args: Value) -> Result<Value, ExecError> {
        self.start().await?;

        let wire_name = wire_tool_name(name);
        let url = format!(
            "{}/api/tools/{}",
            self.config.base_endpoint(),
            wire_name
        );
        debug!(tool = %wire_name, %url, "executing tool");

        let response = self
            .http
            .post(&url)
            .json(&args)
            .timeout(self.config.tool_timeout)
            .send()
            .await
            .map_err(|e| ExecError::ToolExecution {
                message: if e.is_timeout() {
                    format!("tool '{}' timed out", wire_name)
                } else {
                    format!("tool '{}' request failed: {}", wire_name, e)
                },
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ExecError::ToolExecution {
                message: format!("tool '{}' returned {}: {}", wire_name, status, body),
            });
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ExecError::ToolExecution {
            message: format!("tool '{}' returned unparseable body: {}", wire_name, e),
        })
    }

    /// The built-in action catalog this client can execute: the base set
    /// always, the vision set only when vision mode is configured.
    pub fn tool_definitions(&self) -> Vec<crate::schema::ToolDefinition> {
        catalog_definitions(self.config.vision)
    }

    /// Register the built-in catalog into a registry.
    pub fn register_tools(&self, registry: &mut ToolRegistry) {
        for def in self.tool_definitions() {
            if let Err(e) = registry.register(def) {
                warn!("skipping catalog definition: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("fake-browser-agent");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn config_with(executable: PathBuf, startup_timeout: Duration) -> ExecConfig {
        ExecConfig {
            executable: Some(executable),
            startup_timeout,
            tool_timeout: Duration::from_millis(500),
            ..ExecConfig::default()
        }
    }

    #[tokio::test]
    async fn new_client_is_stopped() {
        let client = ExecClient::new(ExecConfig::default());
        assert_eq!(client.state().await, SessionState::Stopped);
    }

    #[tokio::test]
    async fn stop_without_process_is_noop() {
        let client = ExecClient::new(ExecConfig::default());
        client.stop().await;
        assert_eq!(client.state().await, SessionState::Stopped);
    }

    #[tokio::test]
    async fn start_reaches_running_on_readiness_marker() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(&dir, "echo \"Listening on port 3456\"\nsleep 30");
        let client = ExecClient::new(config_with(exe, Duration::from_secs(5)));

        client.start().await.unwrap();
        assert_eq!(client.state().await, SessionState::Running);

        // Second start is a no-op.
        client.start().await.unwrap();

        client.stop().await;
        assert_eq!(client.state().await, SessionState::Stopped);
    }

    #[tokio::test]
    async fn stderr_before_readiness_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(&dir, "echo \"cannot open display\" 1>&2\nsleep 30");
        let client = ExecClient::new(config_with(exe, Duration::from_secs(5)));

        let err = client.start().await.unwrap_err();
        match err {
            ExecError::ProcessStartup { stderr } => {
                assert!(stderr.contains("cannot open display"))
            }
            other => panic!("expected ProcessStartup, got {:?}", other),
        }
        assert_eq!(client.state().await, SessionState::StartFailed);
    }

    #[tokio::test]
    async fn silent_process_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(&dir, "sleep 30");
        let client = ExecClient::new(config_with(exe, Duration::from_millis(300)));

        let err = client.start().await.unwrap_err();
        assert!(matches!(err, ExecError::ProcessStartupTimeout { .. }));
        assert_eq!(client.state().await, SessionState::StartFailed);
    }

    #[tokio::test]
    async fn exit_before_readiness_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(&dir, "true");
        let client = ExecClient::new(config_with(exe, Duration::from_secs(5)));

        let err = client.start().await.unwrap_err();
        assert!(matches!(err, ExecError::ProcessStartup { .. }));
    }

    #[tokio::test]
    async fn execute_tool_lazy_start_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(&dir, "sleep 30");
        let client = ExecClient::new(config_with(exe, Duration::from_millis(300)));

        let err = client
            .execute_tool("navigate", serde_json::json!({ "url": "https://example.com" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::ProcessStartupTimeout { .. }));
        assert_ne!(client.state().await, SessionState::Running);
    }

    #[tokio::test]
    async fn crashed_process_respawned_on_next_start() {
        let dir = tempfile::tempdir().unwrap();
        let runs = dir.path().join("runs");
        let exe = script(
            &dir,
            &format!(
                "echo run >> {}\necho \"Listening on port 3456\"",
                runs.display()
            ),
        );
        let client = ExecClient::new(config_with(exe, Duration::from_secs(5)));

        client.start().await.unwrap();
        assert_eq!(client.state().await, SessionState::Running);

        // The script exits right after readiness; give it time to die.
        tokio::time::sleep(Duration::from_millis(200)).await;

        client.start().await.unwrap();
        assert_eq!(client.state().await, SessionState::Running);

        let recorded = std::fs::read_to_string(&runs).unwrap();
        assert_eq!(recorded.lines().count(), 2);
        client.stop().await;
    }

    #[tokio::test]
    async fn execute_tool_round_trips_wire_results() {
        use axum::{http::StatusCode, response::Json, routing::post, Router};

        let app = Router::new()
            .route(
                "/api/tools/browser_navigate",
                post(|Json(args): Json<Value>| async move {
                    Json(serde_json::json!({ "ok": true, "echo": args }))
                }),
            )
            .route("/api/tools/browser_back", post(|| async { StatusCode::OK }))
            .route(
                "/api/tools/browser_click",
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "no such element") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let runs = dir.path().join("runs");
        let exe = script(
            &dir,
            &format!("echo run >> {}\necho \"Listening\"\nsleep 30", runs.display()),
        );
        let client = ExecClient::new(ExecConfig {
            executable: Some(exe),
            port,
            startup_timeout: Duration::from_secs(5),
            tool_timeout: Duration::from_secs(2),
            ..ExecConfig::default()
        });

        let result = client
            .execute_tool("navigate", serde_json::json!({ "url": "https://example.com" }))
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(result["echo"]["url"], "https://example.com");

        // Empty success body maps to Null.
        let empty = client
            .execute_tool("back", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(empty, Value::Null);

        // Non-2xx carries the wire name and the response body.
        let err = client
            .execute_tool("click", serde_json::json!({ "selector": "#missing" }))
            .await
            .unwrap_err();
        match err {
            ExecError::ToolExecution { message } => {
                assert!(message.contains("browser_click"));
                assert!(message.contains("no such element"));
            }
            other => panic!("expected ToolExecution, got {:?}", other),
        }

        // All three calls shared a single process start.
        let recorded = std::fs::read_to_string(&runs).unwrap();
        assert_eq!(recorded.lines().count(), 1);
        client.stop().await;
    }

    #[tokio::test]
    async fn missing_binary_reports_startup_error() {
        let config = ExecConfig {
            executable: Some(PathBuf::from("/nonexistent/browser-agent")),
            ..ExecConfig::default()
        };
        let client = ExecClient::new(config);

        let err = client.start().await.unwrap_err();
        assert!(matches!(err, ExecError::ProcessStartup { .. }));
        assert_eq!(client.state().await, SessionState::StartFailed);
    }
}
