//! Role agents: one thin adapter per pipeline phase.
//!
//! A role agent wraps a single model call plus tool-call resolution. It asks
//! the registry which tools its role may offer the model, and when the model
//! requests one it runs the call through the execution client and feeds the
//! result back before returning the final text.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::exec::ExecClient;
use crate::llm::{
    self, ChatMessage, FunctionDefinition, LlmClient, ToolDefinition as WireToolDefinition,
};
use crate::registry::SharedRegistry;
use crate::schema::ToolDefinition;
use crate::task::PhaseRecord;

/// The identity under which a phase runs and against which tool permissions
/// are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Thinker,
    Planner,
    Executor,
    Reviewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Thinker => "thinker",
            Role::Planner => "planner",
            Role::Executor => "executor",
            Role::Reviewer => "reviewer",
        }
    }

    /// System prompt framing this role's part of the pipeline.
    pub fn system_prompt(&self) -> &'static str {
        match self {
            Role::Thinker => {
                "You are the thinker of a four-role pipeline. Analyze the user's task: \
                 restate the goal, note constraints and unknowns, and outline what a \
                 good outcome looks like. Do not plan concrete steps yet."
            }
            Role::Planner => {
                "You are the planner of a four-role pipeline. Using the thinker's \
                 analysis, produce a short, numbered, concrete plan the executor can \
                 follow. Mention which tools each step will need, if any."
            }
            Role::Executor => {
                "You are the executor of a four-role pipeline. Carry out the plan \
                 step by step, using the available tools when a step requires acting \
                 on the outside world. Report exactly what you did and what you found."
            }
            Role::Reviewer => {
                "You are the reviewer of a four-role pipeline. Check the execution \
                 report against the original task and the plan. State whether the task \
                 is accomplished, what is missing, and summarize the outcome for the user."
            }
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from a role agent's phase processing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("{role} agent failed: {message}")]
    Processing { role: Role, message: String },
}

impl AgentError {
    fn processing(role: Role, message: impl Into<String>) -> Self {
        AgentError::Processing {
            role,
            message: message.into(),
        }
    }
}

/// Upper bound on model→tool→model rounds within one phase.
const MAX_TOOL_ROUNDS: usize = 8;

/// One role's agent: model call plus tool-call resolution.
pub struct RoleAgent {
    role: Role,
    model: String,
    llm: Arc<dyn LlmClient>,
    registry: SharedRegistry,
    exec: Arc<ExecClient>,
}

impl RoleAgent {
    pub fn new(
        role: Role,
        model: String,
        llm: Arc<dyn LlmClient>,
        registry: SharedRegistry,
        exec: Arc<ExecClient>,
    ) -> Self {
        Self {
            role,
            model,
            llm,
            registry,
            exec,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Run this role's phase: permitted-tools lookup, model call, tool loop.
    ///
    /// # Errors
    /// `AgentError::Processing` identifying the role, on any model or tool
    /// failure.
    pub async fn process(
        &self,
        prompt: &str,
        previous: &[PhaseRecord],
    ) -> Result<String, AgentError> {
        // Looked up per call, so grants registered after agent construction
        // are visible.
        let permitted = self.registry.read().await.tools_for_role(self.role);
        let wire_tools: Vec<WireToolDefinition> = permitted.iter().map(to_wire).collect();
        let tools = if wire_tools.is_empty() {
            None
        } else {
            Some(wire_tools.as_slice())
        };
        debug!(role = %self.role.as_str(), tools = wire_tools.len(), "starting phase");

        let mut messages = vec![
            ChatMessage::new(llm::Role::System, self.role.system_prompt()),
            ChatMessage::new(llm::Role::User, build_input(prompt, previous)),
        ];

        for _round in 0..=MAX_TOOL_ROUNDS {
            let response = self
                .llm
                .chat_completion(&self.model, &messages, tools)
                .await
                .map_err(|e| AgentError::processing(self.role, e.to_string()))?;

            let calls = match response.tool_calls {
                Some(calls) if !calls.is_empty() => calls,
                _ => return Ok(response.content.unwrap_or_default()),
            };

            messages.push(ChatMessage::assistant_tool_calls(
                response.content,
                calls.clone(),
            ));

            for call in calls {
                let args: Value = if call.function.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&call.function.arguments).map_err(|e| {
                        AgentError::processing(
                            self.role,
                            format!(
                                "tool '{}' got unparseable arguments: {}",
                                call.function.name, e
                            ),
                        )
                    })?
                };

                debug!(role = %self.role.as_str(), tool = %call.function.name, "resolving tool call");
                let result = self
                    .exec
                    .execute_tool(&call.function.name, args)
                    .await
                    .map_err(|e| AgentError::processing(self.role, e.to_string()))?;

                messages.push(ChatMessage::tool_result(call.id, result.to_string()));
            }
        }

        Err(AgentError::processing(
            self.role,
            format!("gave up after {} tool rounds", MAX_TOOL_ROUNDS),
        ))
    }
}

/// Convert a registry definition into the model API's wire format.
fn to_wire(def: &ToolDefinition) -> WireToolDefinition {
    WireToolDefinition {
        tool_type: "function".to_string(),
        function: FunctionDefinition {
            name: def.name.clone(),
            description: def.description.clone(),
            parameters: def.parameters.to_value(),
        },
    }
}

/// Fold the prompt and prior phase outputs into one user message.
fn build_input(prompt: &str, previous: &[PhaseRecord]) -> String {
    if previous.is_empty() {
        return format!("Task: {}", prompt);
    }
    let mut input = format!("Task: {}\n", prompt);
    for record in previous {
        input.push_str(&format!(
            "\n--- {} output ---\n{}\n",
            record.phase, record.output
        ));
    }
    input
}
