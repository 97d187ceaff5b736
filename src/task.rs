//! Core task type and its phase state machine.
//!
//! # State Machine
//! ```text
//! Pending -> Thinking -> Planning -> Executing -> Reviewing -> Completed
//!         \________________________________________________/-> Failed
//! ```
//! Transitions are strictly sequential; any phase may short-circuit to
//! `Failed`. Both terminal states are final — further transitions are
//! rejected, and `end_time` is set exactly once on the terminal transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agents::Role;

/// Unique identifier for a task.
///
/// Globally unique within a process lifetime, immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a fresh unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One step of the four-step pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Thinking,
    Planning,
    Executing,
    Reviewing,
}

impl Phase {
    /// Phases in execution order.
    pub const SEQUENCE: [Phase; 4] = [
        Phase::Thinking,
        Phase::Planning,
        Phase::Executing,
        Phase::Reviewing,
    ];

    /// The role under which this phase runs.
    pub fn role(&self) -> Role {
        match self {
            Phase::Thinking => Role::Thinker,
            Phase::Planning => Role::Planner,
            Phase::Executing => Role::Executor,
            Phase::Reviewing => Role::Reviewer,
        }
    }

    /// The task status while this phase is in flight.
    pub fn status(&self) -> TaskStatus {
        match self {
            Phase::Thinking => TaskStatus::Thinking,
            Phase::Planning => TaskStatus::Planning,
            Phase::Executing => TaskStatus::Executing,
            Phase::Reviewing => TaskStatus::Reviewing,
        }
    }

    /// Key under which this phase's output appears in the aggregate result.
    pub fn result_key(&self) -> &'static str {
        match self {
            Phase::Thinking => "thinking",
            Phase::Planning => "planning",
            Phase::Executing => "execution",
            Phase::Reviewing => "review",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Thinking => "thinking",
            Phase::Planning => "planning",
            Phase::Executing => "executing",
            Phase::Reviewing => "reviewing",
        };
        write!(f, "{}", s)
    }
}

/// Status of a task in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Thinking,
    Planning,
    Executing,
    Reviewing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// `true` for Completed and Failed; terminal states admit no transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// One completed phase: which phase, what it produced, and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

/// Errors from task operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

/// A user task moving through the pipeline.
///
/// Mutated only through the explicit transition methods below; the
/// orchestrator is the sole caller. `history` is append-only with one record
/// per completed phase; its length never exceeds `Phase::SEQUENCE.len()`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    id: TaskId,
    prompt: String,
    status: TaskStatus,
    history: Vec<PhaseRecord>,
    result: Option<Value>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task for a prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            prompt: prompt.into(),
            status: TaskStatus::Pending,
            history: Vec::new(),
            result: None,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn history(&self) -> &[PhaseRecord] {
        &self.history
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Mark the task as running the given phase.
    ///
    /// # Errors
    /// `TaskError::InvalidTransition` if the task is already terminal or
    /// `phase` is not the next phase in sequence — the number of recorded
    /// phases determines which phase may run.
    pub fn enter_phase(&mut self, phase: Phase) -> Result<(), TaskError> {
        let to = phase.status();
        if self.status.is_terminal()
            || Phase::SEQUENCE.get(self.history.len()).copied() != Some(phase)
        {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Append a completed phase's output to history and fold it into the
    /// partial result.
    ///
    /// # Errors
    /// `TaskError::InvalidTransition` if the task is already terminal.
    pub fn record_phase(&mut self, phase: Phase, output: String) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to: self.status,
            });
        }
        let partial = self
            .result
            .get_or_insert_with(|| Value::Object(Default::default()));
        if let Some(obj) = partial.as_object_mut() {
            obj.insert(phase.result_key().to_string(), Value::String(output.clone()));
        }
        self.history.push(PhaseRecord {
            phase,
            output,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Transition to Completed with the aggregate result.
    ///
    /// Sets `end_time`; rejected when already terminal.
    pub fn complete(&mut self, result: Value) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to: TaskStatus::Completed,
            });
        }
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.end_time = Some(Utc::now());
        Ok(())
    }

    /// Transition to Failed with `{error: message}` as the result.
    ///
    /// Sets `end_time`; rejected when already terminal.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to: TaskStatus::Failed,
            });
        }
        self.status = TaskStatus::Failed;
        self.result = Some(serde_json::json!({ "error": message.into() }));
        self.end_time = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_pending_without_end_time() {
        let task = Task::new("do something");
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.end_time().is_none());
        assert!(task.history().is_empty());
        assert!(task.result().is_none());
    }

    #[test]
    fn phase_sequence_drives_statuses_in_order() {
        let mut task = Task::new("x");
        let expected = [
            TaskStatus::Thinking,
            TaskStatus::Planning,
            TaskStatus::Executing,
            TaskStatus::Reviewing,
        ];
        for (phase, status) in Phase::SEQUENCE.iter().zip(expected) {
            task.enter_phase(*phase).unwrap();
            assert_eq!(task.status(), status);
            task.record_phase(*phase, format!("{} done", phase)).unwrap();
        }

        assert_eq!(task.history().len(), 4);
        let phases: Vec<Phase> = task.history().iter().map(|r| r.phase).collect();
        assert_eq!(phases.to_vec(), Phase::SEQUENCE.to_vec());
    }

    #[test]
    fn out_of_order_phase_rejected() {
        let mut task = Task::new("x");
        assert!(matches!(
            task.enter_phase(Phase::Reviewing),
            Err(TaskError::InvalidTransition { .. })
        ));
        assert_eq!(task.status(), TaskStatus::Pending);

        task.enter_phase(Phase::Thinking).unwrap();
        // Skipping ahead before the current phase is recorded is rejected.
        assert!(task.enter_phase(Phase::Planning).is_err());

        task.record_phase(Phase::Thinking, "analysis".to_string())
            .unwrap();
        task.enter_phase(Phase::Planning).unwrap();
        assert_eq!(task.status(), TaskStatus::Planning);
    }

    #[test]
    fn record_phase_builds_partial_result() {
        let mut task = Task::new("x");
        task.enter_phase(Phase::Thinking).unwrap();
        task.record_phase(Phase::Thinking, "thoughts".to_string())
            .unwrap();

        let result = task.result().unwrap();
        assert_eq!(result["thinking"], "thoughts");
        assert!(result.get("planning").is_none());
    }

    #[test]
    fn complete_sets_end_time_once() {
        let mut task = Task::new("x");
        task.complete(serde_json::json!({ "review": "fine" }))
            .unwrap();
        let end = task.end_time().unwrap();

        assert!(task.complete(serde_json::json!({})).is_err());
        assert!(task.fail("late").is_err());
        assert!(task.enter_phase(Phase::Thinking).is_err());
        assert_eq!(task.end_time().unwrap(), end);
    }

    #[test]
    fn fail_sets_error_result_and_blocks_history() {
        let mut task = Task::new("x");
        task.enter_phase(Phase::Thinking).unwrap();
        task.fail("model exploded").unwrap();

        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.result().unwrap()["error"], "model exploded");
        assert!(task
            .record_phase(Phase::Planning, "nope".to_string())
            .is_err());
        assert!(task.history().is_empty());
    }

    #[test]
    fn phase_roles_line_up() {
        use crate::agents::Role;
        assert_eq!(Phase::Thinking.role(), Role::Thinker);
        assert_eq!(Phase::Planning.role(), Role::Planner);
        assert_eq!(Phase::Executing.role(), Role::Executor);
        assert_eq!(Phase::Reviewing.role(), Role::Reviewer);
    }
}
