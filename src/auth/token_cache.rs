//! Per-context credential cache
//!
//! Each [`SessionAuthManager`](super::manager::SessionAuthManager) owns one
//! cache. Entries are keyed by principal plus the exact requirement, and an
//! expired entry is dropped the first time a lookup finds it.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::auth::types::{AuthRequirement, Credential};

/// Cache key: (principal, scope set, resource, token kind)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    principal: String,
    requirement: AuthRequirement,
}

/// In-memory store of unexpired credentials for one principal
#[derive(Debug)]
pub struct TokenCache {
    principal: String,
    entries: RwLock<HashMap<CacheKey, Credential>>,
}

impl TokenCache {
    /// Creates an empty cache for `principal`
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn key(&self, requirement: &AuthRequirement) -> CacheKey {
        CacheKey {
            principal: self.principal.clone(),
            requirement: requirement.clone(),
        }
    }

    /// Returns a non-expired credential matching `requirement` exactly
    pub fn get(&self, requirement: &AuthRequirement) -> Option<Credential> {
        let key = self.key(requirement);
        {
            let entries = self.entries.read();
            match entries.get(&key) {
                None => return None,
                Some(credential) if !credential.is_expired() => return Some(credential.clone()),
                Some(_) => {}
            }
        }

        // Expired: re-check under the write lock, a fresh credential may have
        // replaced it in between.
        let mut entries = self.entries.write();
        if let Some(credential) = entries.get(&key) {
            if !credential.is_expired() {
                return Some(credential.clone());
            }
        }
        entries.remove(&key);
        tracing::debug!(requirement = %requirement, "Dropped expired credential");
        None
    }

    /// Stores a credential under the requirement it was issued for
    pub fn insert(&self, credential: Credential) {
        let key = self.key(&credential.requirement);
        self.entries.write().insert(key, credential);
    }

    /// Removes the entry for `requirement`
    pub fn remove(&self, requirement: &AuthRequirement) -> Option<Credential> {
        let key = self.key(requirement);
        self.entries.write().remove(&key)
    }

    /// Drops every entry
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Drops expired entries and returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, credential| !credential.is_expired());
        before - entries.len()
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
