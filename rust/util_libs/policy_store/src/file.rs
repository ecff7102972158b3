use async_trait::async_trait;
use policy_engine::model::{Binding, Policy, GLOBAL_ACCOUNT};
use policy_engine::store::{PolicyStore, StoreError};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileStoreError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse '{path}': {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("invalid record in '{path}': {reason}")]
    Invalid { path: String, reason: String },
}

/// Policies and bindings loaded from two JSON files at startup. Any
/// structural error is fatal; once loaded the store is read-only.
#[derive(Debug, Default)]
pub struct FilePolicyStore {
    policies: HashMap<(String, String), Policy>,
    bindings: HashMap<(String, String), Binding>,
}

impl FilePolicyStore {
    pub fn load(
        policies_path: impl AsRef<Path>,
        bindings_path: impl AsRef<Path>,
    ) -> Result<Self, FileStoreError> {
        let policies: Vec<Policy> = read_json_array(policies_path.as_ref())?;
        let bindings: Vec<Binding> = read_json_array(bindings_path.as_ref())?;

        let mut store = Self::default();
        for policy in policies {
            policy.validate().map_err(|e| FileStoreError::Invalid {
                path: policies_path.as_ref().display().to_string(),
                reason: e.to_string(),
            })?;
            let key = (policy.account.clone(), policy.id.clone());
            if store.policies.insert(key, policy).is_some() {
                return Err(FileStoreError::Invalid {
                    path: policies_path.as_ref().display().to_string(),
                    reason: "duplicate policy (account, id)".to_string(),
                });
            }
        }
        for binding in bindings {
            binding.validate().map_err(|e| FileStoreError::Invalid {
                path: bindings_path.as_ref().display().to_string(),
                reason: e.to_string(),
            })?;
            let key = (binding.account.clone(), binding.role.clone());
            if store.bindings.insert(key, binding).is_some() {
                return Err(FileStoreError::Invalid {
                    path: bindings_path.as_ref().display().to_string(),
                    reason: "duplicate binding (account, role)".to_string(),
                });
            }
        }

        log::info!(
            "Loaded {} policies and {} bindings from static files",
            store.policies.len(),
            store.bindings.len()
        );
        Ok(store)
    }
}

fn read_json_array<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, FileStoreError> {
    let raw = std::fs::read(path).map_err(|source| FileStoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| FileStoreError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[async_trait]
impl PolicyStore for FilePolicyStore {
    async fn get_policy(&self, account: &str, id: &str) -> Result<Policy, StoreError> {
        self.policies
            .get(&(account.to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::PolicyNotFound {
                account: account.to_string(),
                id: id.to_string(),
            })
    }

    async fn get_binding(&self, account: &str, role: &str) -> Result<Binding, StoreError> {
        self.bindings
            .get(&(account.to_string(), role.to_string()))
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
        policies.sort_by(|a, b| (&a.account, &a.id).cmp(&(&b.account, &b.id)));
        Ok(policies)
    }
}
