//! Background authorization path
//!
//! The [`BackgroundAgent`] acts with its own machine identity outside any
//! session. Its [`SessionAuthManager`] has no session channel and no
//! registry, so only machine credentials can be obtained; delegated
//! requirements fail with `AuthorizationDenied`. Every job runs under an
//! overall deadline and is abandoned with `TaskTimeout` when it is exceeded.
//!
//! The agent is shared by all jobs, so a machine credential obtained for one
//! job is reused by the next until it expires.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::auth::exchange::AuthorizationExchange;
use crate::auth::manager::SessionAuthManager;
use crate::auth::types::{AgentIdentity, AuthRequirement, Credential};
use crate::config::StepConfig;
use crate::error::{AuthError, AuthResult, Result, ToolgateError};
use crate::tools::catalog::SessionToolset;
use crate::tools::ToolRegistry;

/// Outcome of one job step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    /// Tool that ran
    pub tool: String,
    /// Whether it succeeded
    pub success: bool,
    /// Output on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Error on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a whole job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    /// Task id assigned when the job was queued
    pub task_id: String,
    /// Steps that ran, in order
    pub steps: Vec<StepOutcome>,
    /// Whether every step succeeded
    pub completed: bool,
}

/// Session-less agent acting with a machine identity
pub struct BackgroundAgent {
    manager: Arc<SessionAuthManager>,
    tools: ToolRegistry,
    steps: Vec<StepConfig>,
    task_timeout: Duration,
}

impl BackgroundAgent {
    /// Creates the agent and builds its tools
    pub fn new(
        agent: AgentIdentity,
        exchange: Arc<dyn AuthorizationExchange>,
        toolset: &dyn SessionToolset,
        steps: Vec<StepConfig>,
        task_timeout: Duration,
    ) -> Result<Self> {
        let manager = Arc::new(SessionAuthManager::new_machine(agent, exchange));
        let tools = toolset.build(&manager)?;
        Ok(Self {
            manager,
            tools,
            steps,
            task_timeout,
        })
    }

    /// The machine-context manager
    pub fn manager(&self) -> &Arc<SessionAuthManager> {
        &self.manager
    }

    /// Tools available to jobs
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Overall job deadline
    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Obtains a machine credential, never prompting anyone
    pub async fn acquire(&self, requirement: &AuthRequirement) -> AuthResult<Credential> {
        self.manager.acquire(requirement).await
    }

    /// Runs `task` under the overall deadline
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TaskTimeout`] when the deadline passes; the task
    /// is dropped at that point. Errors of the task itself pass through.
    pub async fn run<T, Fut>(&self, task_id: &str, task: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.task_timeout, task).await {
            Ok(result) => result,
            Err(_) => {
                let seconds = self.task_timeout.as_secs();
                tracing::warn!(task_id, seconds, "Background task exceeded its deadline");
                Err(ToolgateError::Auth(AuthError::TaskTimeout { seconds }).into())
            }
        }
    }

    /// Runs the configured steps with `vars` substituted into their
    /// arguments, stopping at the first failure
    pub async fn run_job(&self, task_id: &str, vars: &HashMap<String, String>) -> Result<JobReport> {
        tracing::info!(task_id, steps = self.steps.len(), "Background job started");
        let report = self.run(task_id, self.run_steps(task_id, vars)).await?;
        tracing::info!(task_id, completed = report.completed, "Background job finished");
        Ok(report)
    }

    async fn run_steps(&self, task_id: &str, vars: &HashMap<String, String>) -> Result<JobReport> {
        let mut outcomes = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let executor = self
                .tools
                .get(&step.tool)
                .ok_or_else(|| ToolgateError::UnknownTool(step.tool.clone()))?;
            let args = substitute(&step.args, vars);

            let outcome = match executor.execute(args).await {
                Ok(result) => StepOutcome {
                    tool: step.tool.clone(),
                    success: result.success,
                    output: result.success.then_some(result.output),
                    error: result.error,
                },
                Err(err) => StepOutcome {
                    tool: step.tool.clone(),
                    success: false,
                    output: None,
                    error: Some(err.to_string()),
                },
            };
            let failed = !outcome.success;
            if failed {
                tracing::warn!(task_id, tool = %step.tool, error = ?outcome.error, "Background step failed");
            }
            outcomes.push(outcome);
            if failed {
                break;
            }
        }

        let completed =
            outcomes.len() == self.steps.len() && outcomes.iter().all(|outcome| outcome.success);
        Ok(JobReport {
            task_id: task_id.to_string(),
            steps: outcomes,
            completed,
        })
    }

    /// Closes the machine context
    pub fn shutdown(&self) {
        self.manager.close();
    }
}

impl std::fmt::Debug for BackgroundAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundAgent")
            .field("manager", &self.manager)
            .field("tools", &self.tools)
            .field("steps", &self.steps.len())
            .field("task_timeout", &self.task_timeout)
            .finish()
    }
}

/// Replaces `{name}` placeholders in every string of `value`
///
/// Each string is scanned once. Inserted values are never rescanned and
/// unknown placeholders are kept as written.
pub fn substitute(value: &Value, vars: &HashMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_str(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_str(input: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        match vars.get(&rest[open + 1..open + close]) {
            Some(value) => {
                out.push_str(&rest[..open]);
                out.push_str(value);
                rest = &rest[open + close + 1..];
            }
            None => {
                out.push_str(&rest[..=open]);
                rest = &rest[open + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}
