//! Per-context tool registries
//!
//! A [`SessionToolset`] produces the [`ToolRegistry`] of one authorization
//! context, binding every protected tool to that context's
//! [`SessionAuthManager`]. [`ToolCatalog`] is the configuration-driven
//! implementation; closures work too, which keeps tests small.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::manager::SessionAuthManager;
use crate::auth::types::AuthRequirement;
use crate::config::{Config, ToolAudience};
use crate::error::{Result, ToolgateError};
use crate::tools::http::HttpCapability;
use crate::tools::secure::{Capability, SecureTool};
use crate::tools::ToolRegistry;

/// Builds the tool registry of one authorization context
pub trait SessionToolset: Send + Sync {
    /// Creates the tools, protected ones bound to `manager`
    fn build(&self, manager: &Arc<SessionAuthManager>) -> Result<ToolRegistry>;
}

impl<F> SessionToolset for F
where
    F: Fn(&Arc<SessionAuthManager>) -> Result<ToolRegistry> + Send + Sync,
{
    fn build(&self, manager: &Arc<SessionAuthManager>) -> Result<ToolRegistry> {
        self(manager)
    }
}

/// One catalog entry
#[derive(Clone)]
struct CatalogEntry {
    name: String,
    description: String,
    capability: Arc<dyn Capability>,
    requirement: Option<AuthRequirement>,
}

/// Named capabilities with their requirements
#[derive(Clone, Default)]
pub struct ToolCatalog {
    entries: Vec<CatalogEntry>,
}

impl ToolCatalog {
    /// Creates an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a capability
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::Config`] when the name is already taken.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        capability: Arc<dyn Capability>,
        requirement: Option<AuthRequirement>,
    ) -> Result<()> {
        let name = name.into();
        if self.entries.iter().any(|e| e.name == name) {
            return Err(ToolgateError::Config(format!("Duplicate tool name: {}", name)).into());
        }
        self.entries.push(CatalogEntry {
            name,
            description: description.into(),
            capability,
            requirement,
        });
        Ok(())
    }

    /// Builder-style [`add`](Self::add)
    pub fn with(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        capability: Arc<dyn Capability>,
        requirement: Option<AuthRequirement>,
    ) -> Result<Self> {
        self.add(name, description, capability, requirement)?;
        Ok(self)
    }

    /// Builds the catalog of configured HTTP tools visible to `audience`
    ///
    /// `ToolAudience::Session` selects tools sessions may use,
    /// `ToolAudience::Background` those of the background agent.
    pub fn from_config(
        config: &Config,
        client: Arc<reqwest::Client>,
        audience: ToolAudience,
    ) -> Result<Self> {
        let mut catalog = Self::new();
        for tool in &config.tools {
            let visible = match audience {
                ToolAudience::Session => tool.audience.includes_session(),
                ToolAudience::Background => tool.audience.includes_background(),
                ToolAudience::All => true,
            };
            if !visible {
                continue;
            }

            let mut capability = HttpCapability::new(
                client.clone(),
                config.api.base_url.as_str(),
                tool.method,
                tool.path.as_str(),
            )
            .with_max_response_bytes(config.api.max_response_bytes);
            if let Some(parameters) = &tool.parameters {
                capability = capability.with_parameters(parameters.clone());
            }

            let requirement = tool
                .auth
                .as_ref()
                .map(|auth| auth.requirement())
                .transpose()?;
            catalog.add(
                tool.name.as_str(),
                tool.description.as_str(),
                Arc::new(capability),
                requirement,
            )?;
        }
        Ok(catalog)
    }

    /// Tool names in insertion order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Requirement of `name`; `None` for unknown or public tools
    pub fn requirement(&self, name: &str) -> Option<&AuthRequirement> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.requirement.as_ref())
    }

    /// Number of tools
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SessionToolset for ToolCatalog {
    fn build(&self, manager: &Arc<SessionAuthManager>) -> Result<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if !seen.insert(entry.name.as_str()) {
                continue;
            }
            let tool = match &entry.requirement {
                None => SecureTool::public(
                    entry.name.as_str(),
                    entry.description.as_str(),
                    entry.capability.clone(),
                ),
                Some(requirement) => SecureTool::protected(
                    entry.name.as_str(),
                    entry.description.as_str(),
                    entry.capability.clone(),
                    manager.clone(),
                    requirement.clone(),
                ),
            };
            registry.register(entry.name.as_str(), Arc::new(tool));
        }
        Ok(registry)
    }
}

impl std::fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCatalog")
            .field("tools", &self.names())
            .finish()
    }
}

/// Shared HTTP client for downstream tools
pub fn api_client(config: &Config) -> Result<Arc<reqwest::Client>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.api.request_timeout_seconds))
        .build()
        .map_err(ToolgateError::Http)?;
    Ok(Arc::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::fake::FakeExchange;
    use crate::auth::types::AgentIdentity;
    use crate::tools::{capability_fn, ToolResult};
    use serde_json::json;

    fn manager() -> Arc<SessionAuthManager> {
        Arc::new(SessionAuthManager::new_machine(
            AgentIdentity::new("agent-bg", "Background", "secret"),
            Arc::new(FakeExchange::new()),
        ))
    }

    fn ok_capability() -> Arc<dyn Capability> {
        capability_fn(|_args, _credential| async { Ok(ToolResult::success("ok")) })
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let mut catalog = ToolCatalog::new();
        catalog.add("a", "first", ok_capability(), None).unwrap();
        assert!(catalog.add("a", "second", ok_capability(), None).is_err());
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn test_build_binds_protected_tools_to_manager() {
        let requirement = AuthRequirement::machine(["admin_read_staff"], "booking_api").unwrap();
        let catalog = ToolCatalog::new()
            .with("public", "Public tool", ok_capability(), None)
            .unwrap()
            .with("admin", "Admin tool", ok_capability(), Some(requirement.clone()))
            .unwrap();

        let manager = manager();
        let registry = catalog.build(&manager).unwrap();
        assert_eq!(registry.names(), vec!["admin", "public"]);

        let admin = registry.get("admin").unwrap();
        assert!(admin.tool_definition().get("authorization").is_some());
        admin.execute(json!({})).await.unwrap();
        assert!(manager.cache().get(&requirement).is_some());
    }

    #[test]
    fn test_from_config_filters_by_audience() {
        let config = Config::from_yaml(
            r#"
tools:
  - name: list_hotels
    path: /hotels
  - name: admin_read_staff
    path: /admin/staff
    audience: background
    auth:
      scopes: [admin_read_staff]
      resource: booking_api
      token_kind: machine
  - name: get_hotel
    path: /hotels/{hotel_id}
    audience: all
"#,
        )
        .unwrap();
        let client = Arc::new(reqwest::Client::new());

        let session = ToolCatalog::from_config(&config, client.clone(), ToolAudience::Session).unwrap();
        assert_eq!(session.names(), vec!["list_hotels", "get_hotel"]);

        let background =
            ToolCatalog::from_config(&config, client, ToolAudience::Background).unwrap();
        assert_eq!(background.names(), vec!["admin_read_staff", "get_hotel"]);
        assert!(background.requirement("admin_read_staff").is_some());
        assert!(background.requirement("get_hotel").is_none());
    }

    #[test]
    fn test_closure_toolset() {
        let toolset = |_manager: &Arc<SessionAuthManager>| -> Result<ToolRegistry> {
            let mut registry = ToolRegistry::new();
            registry.register(
                "ping",
                Arc::new(SecureTool::public("ping", "Ping", ok_capability())),
            );
            Ok(registry)
        };
        let registry = toolset.build(&manager()).unwrap();
        assert_eq!(registry.len(), 1);
    }
}
