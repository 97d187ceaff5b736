//! The task orchestrator: owns the per-task phase state machine, sequences
//! the four role agents, and publishes every status transition.
//!
//! Phases within one task are strictly ordered; tasks are independent and
//! interleave freely. Any phase error is caught once here, turned into the
//! task's `failed` status with `{error}`, and broadcast — never swallowed,
//! never retried.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use crate::agents::RoleAgent;
use crate::config::Config;
use crate::events::{Broadcaster, SubscriberId, TaskEvent};
use crate::exec::ExecClient;
use crate::llm::LlmClient;
use crate::registry::{RegistryError, SharedRegistry, ToolRegistry};
use crate::schema::ToolDefinition;
use crate::task::{Phase, Task, TaskError, TaskId};

/// The orchestration engine shared by the API surface.
pub struct AgentSystem {
    model: String,
    max_retained_tasks: usize,
    registry: SharedRegistry,
    exec: Arc<ExecClient>,
    llm: Arc<dyn LlmClient>,
    broadcaster: Broadcaster,
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl AgentSystem {
    /// Build the system: shared registry seeded with the execution client's
    /// built-in catalog, one execution client shared by all tasks.
    pub async fn new(config: &Config, llm: Arc<dyn LlmClient>) -> Arc<Self> {
        let exec = Arc::new(ExecClient::new(config.exec.clone()));
        let registry = ToolRegistry::shared();
        {
            let mut reg = registry.write().await;
            exec.register_tools(&mut reg);
            info!("registry seeded with {} built-in tools", reg.len());
        }

        Arc::new(Self {
            model: config.default_model.clone(),
            max_retained_tasks: config.max_retained_tasks.max(1),
            registry,
            exec,
            llm,
            broadcaster: Broadcaster::new(),
            tasks: RwLock::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn exec(&self) -> &Arc<ExecClient> {
        &self.exec
    }

    /// Subscribe to live status-transition events.
    pub async fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<TaskEvent>) {
        self.broadcaster.subscribe().await
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        self.broadcaster.unsubscribe(id).await
    }

    /// Submit a task: register ad hoc tools, create the task, broadcast
    /// `task_started`, and launch the phase sequence in the background.
    ///
    /// Returns the new task id immediately; the sequence runs independently.
    ///
    /// # Errors
    /// `RegistryError::InvalidToolDefinition` when an ad hoc definition is
    /// malformed — returned synchronously, no task is created.
    pub async fn start_task(
        self: &Arc<Self>,
        prompt: impl Into<String>,
        extra_tools: Vec<Value>,
    ) -> Result<TaskId, RegistryError> {
        let definitions: Vec<ToolDefinition> = extra_tools
            .iter()
            .map(ToolDefinition::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| RegistryError::InvalidToolDefinition(e.to_string()))?;

        {
            let mut registry = self.registry.write().await;
            for def in definitions {
                registry.register(def)?;
            }
        }

        let task = Task::new(prompt);
        let id = task.id();
        {
            let mut tasks = self.tasks.write().await;
            tasks.insert(id, task);
            Self::evict_terminal(&mut tasks, self.max_retained_tasks);
        }

        info!(task = %id, "task created");
        self.broadcaster.broadcast(TaskEvent::started(id)).await;

        let system = Arc::clone(self);
        tokio::spawn(async move {
            system.run_pipeline(id).await;
        });

        Ok(id)
    }

    /// Point-in-time snapshot of a task's status, result, history, and
    /// timestamps.
    ///
    /// # Errors
    /// `TaskError::NotFound` for unknown ids.
    pub async fn task_snapshot(&self, id: TaskId) -> Result<Task, TaskError> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(TaskError::NotFound(id))
    }

    /// Drive one task through all four phases.
    async fn run_pipeline(self: Arc<Self>, id: TaskId) {
        for phase in Phase::SEQUENCE {
            let (prompt, previous, partial) = {
                let mut tasks = self.tasks.write().await;
                let Some(task) = tasks.get_mut(&id) else {
                    warn!(task = %id, "task vanished mid-pipeline");
                    return;
                };
                if let Err(e) = task.enter_phase(phase) {
                    error!(task = %id, "refusing phase transition: {}", e);
                    return;
                }
                (
                    task.prompt().to_string(),
                    task.history().to_vec(),
                    task.result().cloned(),
                )
            };
            self.broadcaster
                .broadcast(TaskEvent::update(id, phase.status(), partial))
                .await;

            let agent = RoleAgent::new(
                phase.role(),
                self.model.clone(),
                Arc::clone(&self.llm),
                self.registry.clone(),
                Arc::clone(&self.exec),
            );

            match agent.process(&prompt, &previous).await {
                Ok(output) => {
                    let mut tasks = self.tasks.write().await;
                    if let Some(task) = tasks.get_mut(&id) {
                        if let Err(e) = task.record_phase(phase, output) {
                            error!(task = %id, "could not record phase: {}", e);
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(task = %id, phase = %phase, "phase failed: {}", e);
                    let (status, result) = {
                        let mut tasks = self.tasks.write().await;
                        let Some(task) = tasks.get_mut(&id) else { return };
                        if let Err(te) = task.fail(e.to_string()) {
                            error!(task = %id, "could not fail task: {}", te);
                            return;
                        }
                        (task.status(), task.result().cloned())
                    };
                    self.broadcaster
                        .broadcast(TaskEvent::update(id, status, result))
                        .await;
                    return;
                }
            }
        }

        let (status, result) = {
            let mut tasks = self.tasks.write().await;
            let Some(task) = tasks.get_mut(&id) else { return };
            // History already carries all four outputs; the aggregate result
            // is exactly the folded partial.
            let aggregate = task
                .result()
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));
            if let Err(e) = task.complete(aggregate) {
                error!(task = %id, "could not complete task: {}", e);
                return;
            }
            (task.status(), task.result().cloned())
        };
        info!(task = %id, "task completed");
        self.broadcaster
            .broadcast(TaskEvent::update(id, status, result))
            .await;
    }

    /// Evict oldest terminal tasks once the map exceeds the retention cap.
    /// In-flight tasks are never evicted.
    fn evict_terminal(tasks: &mut HashMap<TaskId, Task>, cap: usize) {
        if tasks.len() <= cap {
            return;
        }
        let mut terminal: Vec<(TaskId, chrono::DateTime<chrono::Utc>)> = tasks
            .values()
            .filter(|t| t.status().is_terminal())
            .map(|t| (t.id(), t.end_time().unwrap_or(t.start_time())))
            .collect();
        terminal.sort_by_key(|(_, end)| *end);

        let excess = tasks.len() - cap;
        for (id, _) in terminal.into_iter().take(excess) {
            tasks.remove(&id);
            info!(task = %id, "evicted terminal task past retention cap");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ChatResponse, LlmError, ToolDefinition as WireToolDefinition};
    use crate::task::TaskStatus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Model that answers each call with the next canned outcome.
    struct Scripted {
        script: Mutex<VecDeque<Result<String, String>>>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<&str, &str>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(
                    outcomes
                        .into_iter()
                        .map(|r| r.map(String::from).map_err(String::from))
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl LlmClient for Scripted {
        async fn chat_completion(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _tools: Option<&[WireToolDefinition]>,
        ) -> Result<ChatResponse, LlmError> {
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(content)) => Ok(ChatResponse {
                    content: Some(content),
                    tool_calls: None,
                    finish_reason: Some("stop".to_string()),
                    usage: None,
                    model: None,
                }),
                Some(Err(message)) => Err(LlmError::server_error(500, message)),
                None => Err(LlmError::network_error("script exhausted".to_string())),
            }
        }
    }

    fn test_config() -> Config {
        Config::new("test-key".to_string(), "test-model".to_string())
    }

    async fn wait_terminal(system: &Arc<AgentSystem>, id: TaskId) -> Task {
        for _ in 0..200 {
            let snapshot = system.task_snapshot(id).await.unwrap();
            if snapshot.status().is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached a terminal status", id);
    }

    #[tokio::test]
    async fn pipeline_runs_all_four_phases_to_completion() {
        let llm = Scripted::new(vec![
            Ok("the analysis"),
            Ok("the plan"),
            Ok("the execution report"),
            Ok("the review"),
        ]);
        let system = AgentSystem::new(&test_config(), llm).await;

        let id = system.start_task("book a table", vec![]).await.unwrap();
        let task = wait_terminal(&system, id).await;

        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.history().len(), 4);
        let phases: Vec<Phase> = task.history().iter().map(|r| r.phase).collect();
        assert_eq!(phases, Phase::SEQUENCE.to_vec());

        let result = task.result().unwrap();
        assert_eq!(result["thinking"], "the analysis");
        assert_eq!(result["planning"], "the plan");
        assert_eq!(result["execution"], "the execution report");
        assert_eq!(result["review"], "the review");
        assert!(task.end_time().is_some());
    }

    #[tokio::test]
    async fn phase_failure_short_circuits_to_failed() {
        let llm = Scripted::new(vec![Ok("the analysis"), Err("planner model on fire")]);
        let system = AgentSystem::new(&test_config(), llm).await;

        let id = system.start_task("book a table", vec![]).await.unwrap();
        let task = wait_terminal(&system, id).await;

        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.history().len(), 1);
        let error = task.result().unwrap()["error"].as_str().unwrap();
        assert!(error.contains("planner"));
        assert!(error.contains("planner model on fire"));
        assert!(task.end_time().is_some());

        // Nothing runs after the failure.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let later = system.task_snapshot(id).await.unwrap();
        assert_eq!(later.history().len(), 1);
    }

    #[tokio::test]
    async fn events_track_the_status_sequence() {
        let llm = Scripted::new(vec![Ok("a"), Ok("b"), Ok("c"), Ok("d")]);
        let system = AgentSystem::new(&test_config(), llm).await;
        let (_sub, mut rx) = system.subscribe().await;

        let id = system.start_task("t", vec![]).await.unwrap();
        wait_terminal(&system, id).await;

        let mut statuses = Vec::new();
        while let Ok(event) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            let event = event.unwrap();
            assert_eq!(event.task_id, id);
            statuses.push(event.status);
            if event.status.is_terminal() {
                break;
            }
        }

        assert_eq!(
            statuses,
            vec![
                TaskStatus::Pending,
                TaskStatus::Thinking,
                TaskStatus::Planning,
                TaskStatus::Executing,
                TaskStatus::Reviewing,
                TaskStatus::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn ad_hoc_tools_are_registered_before_the_pipeline_runs() {
        let llm = Scripted::new(vec![Ok("a"), Ok("b"), Ok("c"), Ok("d")]);
        let system = AgentSystem::new(&test_config(), llm).await;

        let id = system
            .start_task(
                "t",
                vec![json!({
                    "name": "crm_lookup",
                    "description": "look up a customer record",
                    "parameters": { "type": "object", "properties": {
                        "customer_id": { "type": "string" }
                    }}
                })],
            )
            .await
            .unwrap();

        assert!(system.registry().read().await.contains("crm_lookup"));
        wait_terminal(&system, id).await;
    }

    #[tokio::test]
    async fn malformed_ad_hoc_tool_is_a_synchronous_error() {
        let llm = Scripted::new(vec![]);
        let system = AgentSystem::new(&test_config(), llm).await;
        let before = system.tasks.read().await.len();

        let err = system
            .start_task("t", vec![json!({ "description": "no name" })])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidToolDefinition(_)));
        assert_eq!(system.tasks.read().await.len(), before);
    }

    #[tokio::test]
    async fn unknown_task_snapshot_is_not_found() {
        let llm = Scripted::new(vec![]);
        let system = AgentSystem::new(&test_config(), llm).await;

        let err = system.task_snapshot(TaskId::new()).await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound(_)));
    }

    #[tokio::test]
    async fn terminal_tasks_evicted_past_retention_cap() {
        let llm = Scripted::new(vec![
            Ok("a"), Ok("b"), Ok("c"), Ok("d"),
            Ok("a"), Ok("b"), Ok("c"), Ok("d"),
            Ok("a"), Ok("b"), Ok("c"), Ok("d"),
        ]);
        let mut config = test_config();
        config.max_retained_tasks = 2;
        let system = AgentSystem::new(&config, llm).await;

        let first = system.start_task("one", vec![]).await.unwrap();
        wait_terminal(&system, first).await;
        let second = system.start_task("two", vec![]).await.unwrap();
        wait_terminal(&system, second).await;
        let third = system.start_task("three", vec![]).await.unwrap();
        wait_terminal(&system, third).await;

        assert!(system.tasks.read().await.len() <= 2);
        assert!(matches!(
            system.task_snapshot(first).await,
            Err(TaskError::NotFound(_))
        ));
        assert!(system.task_snapshot(third).await.is_ok());
    }
}
