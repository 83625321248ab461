//! Tools module for Toolgate
//!
//! A tool is a named capability a session (or the background agent) can
//! invoke. Every tool in a [`ToolRegistry`] is a [`secure::SecureTool`]: a
//! capability optionally guarded by an authorization requirement.
//!
//! - [`secure`]  -- the authorization-enforcing wrapper
//! - [`http`]    -- capabilities that call the downstream API
//! - [`catalog`] -- builds per-session registries from configuration

pub mod catalog;
pub mod http;
pub mod secure;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub use catalog::{SessionToolset, ToolCatalog};
pub use secure::{capability_fn, Capability, SecureTool};

/// Tool result structure
///
/// Represents the result of a tool execution with metadata
/// and truncation support.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Whether the tool execution succeeded
    pub success: bool,
    /// Output from the tool
    pub output: String,
    /// Error message if execution failed
    pub error: Option<String>,
    /// Whether the output was truncated
    pub truncated: bool,
    /// Additional metadata about the execution
    pub metadata: HashMap<String, String>,
}

impl ToolResult {
    /// Create a successful tool result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            truncated: false,
            metadata: HashMap::new(),
        }
    }

    /// Create a failed tool result
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            truncated: false,
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the result
    ///
    /// Returns self for chaining
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Truncate output if it exceeds `max_size` bytes
    ///
    /// Cuts at the nearest character boundary at or below the limit.
    pub fn truncate_if_needed(mut self, max_size: usize) -> Self {
        if self.output.len() > max_size {
            let mut cut = max_size;
            while !self.output.is_char_boundary(cut) {
                cut -= 1;
            }
            self.output.truncate(cut);
            self.output.push_str("\n... (truncated)");
            self.truncated = true;
        }
        self
    }
}

/// Tool executor trait for implementing tool execution logic
///
/// # Examples
///
/// ```no_run
/// use toolgate::tools::{ToolExecutor, ToolResult};
/// use toolgate::error::Result;
/// use async_trait::async_trait;
/// use serde_json::Value;
///
/// struct Ping;
///
/// #[async_trait]
/// impl ToolExecutor for Ping {
///     fn tool_definition(&self) -> Value {
///         serde_json::json!({
///             "name": "ping",
///             "description": "Replies with pong",
///             "parameters": {"type": "object", "properties": {}}
///         })
///     }
///
///     async fn execute(&self, _args: Value) -> Result<ToolResult> {
///         Ok(ToolResult::success("pong"))
///     }
/// }
/// ```
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Returns the tool definition as a JSON value
    ///
    /// `{"name", "description", "parameters"}` plus, for protected tools, an
    /// `authorization` object describing the requirement.
    fn tool_definition(&self) -> serde_json::Value;

    /// Executes the tool with the given arguments
    ///
    /// # Errors
    ///
    /// Authorization failures surface as errors carrying an
    /// [`AuthError`](crate::error::AuthError); capability failures are
    /// usually reported as an unsuccessful [`ToolResult`] instead.
    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult>;
}

/// Named tools available to one authorization context
///
/// Kept sorted by name so listings are stable.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool executor, replacing any tool with the same name
    pub fn register(&mut self, name: impl Into<String>, executor: Arc<dyn ToolExecutor>) {
        self.tools.insert(name.into(), executor);
    }

    /// Get a tool executor by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Get all tool definitions as JSON values
    pub fn all_definitions(&self) -> Vec<serde_json::Value> {
        self.tools
            .values()
            .map(|executor| executor.tool_definition())
            .collect()
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
