//! Authorization-enforcing tool wrapper
//!
//! A [`SecureTool`] pairs a [`Capability`] with an optional
//! [`AuthRequirement`]. Protected tools acquire a credential from the
//! context's [`SessionAuthManager`] before the capability runs and hand it to
//! the capability; if acquisition fails the capability is never called and
//! the authorization error is returned unchanged. Public tools bypass the
//! manager.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::auth::manager::SessionAuthManager;
use crate::auth::types::{AuthRequirement, Credential};
use crate::error::Result;
use crate::tools::{ToolExecutor, ToolResult};

/// The callable behind a tool
#[async_trait]
pub trait Capability: Send + Sync {
    /// JSON schema of the accepted arguments
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    /// Runs the capability
    ///
    /// `credential` is `Some` for protected tools and `None` for public ones.
    async fn call(&self, args: Value, credential: Option<Credential>) -> Result<ToolResult>;
}

struct FnCapability<F> {
    f: F,
    parameters: Value,
}

#[async_trait]
impl<F, Fut> Capability for FnCapability<F>
where
    F: Fn(Value, Option<Credential>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolResult>> + Send + 'static,
{
    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn call(&self, args: Value, credential: Option<Credential>) -> Result<ToolResult> {
        (self.f)(args, credential).await
    }
}

/// Wraps an async closure as a [`Capability`]
///
/// # Examples
///
/// ```
/// use toolgate::tools::{capability_fn, ToolResult};
///
/// let echo = capability_fn(|args, _credential| async move {
///     Ok(ToolResult::success(args.to_string()))
/// });
/// ```
pub fn capability_fn<F, Fut>(f: F) -> Arc<dyn Capability>
where
    F: Fn(Value, Option<Credential>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolResult>> + Send + 'static,
{
    Arc::new(FnCapability {
        f,
        parameters: json!({"type": "object", "properties": {}}),
    })
}

struct Guard {
    manager: Arc<SessionAuthManager>,
    requirement: AuthRequirement,
}

/// A capability exposed as a tool, optionally protected
pub struct SecureTool {
    name: String,
    description: String,
    capability: Arc<dyn Capability>,
    guard: Option<Guard>,
}

impl SecureTool {
    /// A tool that runs without any credential
    pub fn public(
        name: impl Into<String>,
        description: impl Into<String>,
        capability: Arc<dyn Capability>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            capability,
            guard: None,
        }
    }

    /// A tool that needs a credential satisfying `requirement`, obtained
    /// through `manager`
    pub fn protected(
        name: impl Into<String>,
        description: impl Into<String>,
        capability: Arc<dyn Capability>,
        manager: Arc<SessionAuthManager>,
        requirement: AuthRequirement,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            capability,
            guard: Some(Guard {
                manager,
                requirement,
            }),
        }
    }

    /// Tool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The requirement guarding this tool, if any
    pub fn requirement(&self) -> Option<&AuthRequirement> {
        self.guard.as_ref().map(|guard| &guard.requirement)
    }

    /// Acquires the credential if needed, then runs the capability
    ///
    /// # Errors
    ///
    /// Returns the [`AuthError`](crate::error::AuthError) from acquisition
    /// unchanged; the capability is not called in that case.
    pub async fn invoke(&self, args: Value) -> Result<ToolResult> {
        let credential = match &self.guard {
            None => None,
            Some(guard) => {
                let credential = guard
                    .manager
                    .acquire_for(&guard.requirement, Some(&self.name))
                    .await
                    .map_err(|err| {
                        tracing::warn!(tool = %self.name, error = %err, "Tool authorization failed");
                        err
                    })?;
                Some(credential)
            }
        };

        tracing::debug!(tool = %self.name, authorized = credential.is_some(), "Invoking capability");
        self.capability.call(args, credential).await
    }
}

#[async_trait]
impl ToolExecutor for SecureTool {
    fn tool_definition(&self) -> Value {
        let mut definition = json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.capability.parameters(),
        });
        if let Some(requirement) = self.requirement() {
            definition["authorization"] = json!({
                "scopes": requirement.scopes(),
                "resource": requirement.resource(),
                "token_kind": requirement.kind(),
            });
        }
        definition
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        self.invoke(args).await
    }
}
