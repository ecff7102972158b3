use async_trait::async_trait;
use policy_engine::model::{Binding, Policy, GLOBAL_ACCOUNT};
use policy_engine::store::{PolicyStore, StoreError};
use std::collections::{HashMap, HashSet};

/// In-memory policy store for tests. Lookups hit plain maps; specific keys
/// can be marked to fail with a fetch error to exercise degraded paths.
#[derive(Debug, Default, Clone)]
pub struct MemoryPolicyStore {
    policies: HashMap<(String, String), Policy>,
    bindings: HashMap<(String, String), Binding>,
    failing_policies: HashSet<(String, String)>,
    failing_bindings: HashSet<(String, String)>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.add_policy(policy);
        self
    }

    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.add_binding(binding);
        self
    }

    pub fn add_policy(&mut self, policy: Policy) {
        self.policies
            .insert((policy.account.clone(), policy.id.clone()), policy);
    }

    pub fn add_binding(&mut self, binding: Binding) {
        self.bindings
            .insert((binding.account.clone(), binding.role.clone()), binding);
    }

    pub fn remove_policy(&mut self, account: &str, id: &str) {
        self.policies
            .remove(&(account.to_string(), id.to_string()));
    }

    /// Make `get_policy(account, id)` fail with a transport-style error.
    pub fn fail_policy(&mut self, account: &str, id: &str) {
        self.failing_policies
            .insert((account.to_string(), id.to_string()));
    }

    /// Make `get_binding(account, role)` fail with a transport-style error.
    pub fn fail_binding(&mut self, account: &str, role: &str) {
        self.failing_bindings
            .insert((account.to_string(), role.to_string()));
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn get_policy(&self, account: &str, id: &str) -> Result<Policy, StoreError> {
        let key = (account.to_string(), id.to_string());
        if self.failing_policies.contains(&key) {
            return Err(StoreError::fetch(
                format!("{account}.policy.{id}"),
                "injected failure",
            ));
        }
        self.policies
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::PolicyNotFound {
                account: account.to_string(),
                id: id.to_string(),
            })
    }

    async fn get_binding(&self, account: &str, role: &str) -> Result<Binding, StoreError> {
        let key = (account.to_string(), role.to_string());
        if self.failing_bindings.contains(&key) {
            return Err(StoreError::fetch(
                format!("{account}.binding.{role}"),
                "injected failure",
            ));
        }
        self.bindings
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::RoleNotFound {
                account: account.to_string(),
                role: role.to_string(),
            })
    }

    async fn list_policies(&self, account: &str) -> Result<Vec<Policy>, StoreError> {
        let mut policies: Vec<Policy> = self
            .policies
            .values()
            .filter(|p| p.account == account || p.account == GLOBAL_ACCOUNT)
            .cloned()
            .collect();
        policies.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(policies)
    }
}
