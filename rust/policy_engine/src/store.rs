use crate::model::{Binding, Policy, PolicyRef};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("policy '{id}' not found in account '{account}'")]
    PolicyNotFound { account: String, id: String },

    #[error("role '{role}' has no binding in account '{account}'")]
    RoleNotFound { account: String, role: String },

    #[error("failed to fetch '{key}' from the policy store: {reason}")]
    Fetch { key: String, reason: String },

    #[error("invalid policy store key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },
}

impl StoreError {
    pub fn fetch(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// True for the miss kinds the compiler degrades to warnings.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PolicyNotFound { .. } | Self::RoleNotFound { .. }
        )
    }
}

/// Read contract between the compiler and a policy source. Implementations
/// must answer from local state or a cache under normal operation; the
/// compiler treats every call as cheap.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Look up one policy. `account` may be the global account `*`.
    async fn get_policy(&self, account: &str, id: &str) -> Result<Policy, StoreError>;

    /// Look up the binding for a role within an account.
    async fn get_binding(&self, account: &str, role: &str) -> Result<Binding, StoreError>;

    /// All policies visible to an account, global policies included.
    async fn list_policies(&self, account: &str) -> Result<Vec<Policy>, StoreError>;

    /// Resolve a role's binding into its policies, following `_global:`
    /// references. Fails on the first unresolvable policy; callers that
    /// want skip-with-warning semantics resolve the binding themselves.
    async fn get_policies_for_role(
        &self,
        account: &str,
        role: &str,
    ) -> Result<Vec<Policy>, StoreError> {
        let binding = self.get_binding(account, role).await?;
        let mut policies = Vec::with_capacity(binding.policies.len());
        for raw in &binding.policies {
            let reference = PolicyRef::parse(raw)
                .map_err(|e| StoreError::invalid_key(raw.clone(), e.to_string()))?;
            policies.push(
                self.get_policy(reference.account(account), reference.id())
                    .await?,
            );
        }
        Ok(policies)
    }
}
