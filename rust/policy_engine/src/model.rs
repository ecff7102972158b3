use crate::actions::ActionSpec;
use crate::nrn::Nrn;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Account value marking a policy as referenceable from any account.
pub const GLOBAL_ACCOUNT: &str = "*";
/// Storage rendering of the global account in key prefixes.
pub const GLOBAL_PREFIX: &str = "_global";
/// Prefix disambiguating a binding's reference to a global policy.
pub const GLOBAL_REF_PREFIX: &str = "_global:";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("policy id may not be empty")]
    EmptyPolicyId,

    #[error("policy '{id}' has an empty account")]
    EmptyPolicyAccount { id: String },

    #[error("policy '{id}' has no statements")]
    NoStatements { id: String },

    #[error("policy '{id}' statement {index} has no actions")]
    NoActions { id: String, index: usize },

    #[error("policy '{id}' statement {index} has no resources")]
    NoResources { id: String, index: usize },

    #[error("policy '{id}' statement {index}: {detail}")]
    InvalidStatement {
        id: String,
        index: usize,
        detail: String,
    },

    #[error("binding role may not be empty")]
    EmptyRole,

    #[error("binding for role '{role}' has an empty account")]
    EmptyBindingAccount { role: String },

    #[error("binding for role '{role}' may not be global")]
    GlobalBinding { role: String },

    #[error("binding for role '{role}' references an empty policy id")]
    EmptyPolicyReference { role: String },
}

/// Statements are additive; the only effect is `allow`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    #[default]
    Allow,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Statement {
    #[serde(default)]
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Policy {
    pub id: String,
    pub account: String,
    #[serde(default)]
    pub name: String,
    pub statements: Vec<Statement>,
}

/// Maps a named role within an account to an ordered list of policy
/// references.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Binding {
    pub account: String,
    pub role: String,
    pub policies: Vec<String>,
}

impl Policy {
    pub fn is_global(&self) -> bool {
        self.account == GLOBAL_ACCOUNT
    }

    /// Structural validation, run when a policy is loaded from a file or
    /// decoded off the remote store.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.id.is_empty() {
            return Err(ModelError::EmptyPolicyId);
        }
        if self.account.is_empty() {
            return Err(ModelError::EmptyPolicyAccount {
                id: self.id.clone(),
            });
        }
        if self.statements.is_empty() {
            return Err(ModelError::NoStatements {
                id: self.id.clone(),
            });
        }
        for (index, statement) in self.statements.iter().enumerate() {
            statement
                .validate()
                .map_err(|detail| ModelError::InvalidStatement {
                    id: self.id.clone(),
                    index,
                    detail,
                })?;
            if statement.actions.is_empty() {
                return Err(ModelError::NoActions {
                    id: self.id.clone(),
                    index,
                });
            }
            if statement.resources.is_empty() {
                return Err(ModelError::NoResources {
                    id: self.id.clone(),
                    index,
                });
            }
        }
        Ok(())
    }
}

impl Statement {
    /// Checks every action string parses, every resource parses as an NRN
    /// (template markers allowed), and the kv actions that demand an
    /// explicit bucket are not paired with `kv:*`.
    fn validate(&self) -> Result<(), String> {
        let mut actions = Vec::with_capacity(self.actions.len());
        for raw in &self.actions {
            let spec = ActionSpec::from_str(raw).map_err(|e| e.to_string())?;
            actions.extend(spec.expand());
        }

        for raw in &self.resources {
            let nrn = Nrn::parse_and_validate(raw).map_err(|e| format!("resource '{raw}': {e}"))?;
            for action in &actions {
                if action.requires_explicit_bucket()
                    && nrn.resource_type == crate::nrn::ResourceType::Kv
                    && nrn.identifier == "*"
                {
                    return Err(format!(
                        "bucket '*' is not allowed for '{action}', name an explicit bucket"
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Binding {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.role.is_empty() {
            return Err(ModelError::EmptyRole);
        }
        if self.account.is_empty() {
            return Err(ModelError::EmptyBindingAccount {
                role: self.role.clone(),
            });
        }
        if self.account == GLOBAL_ACCOUNT {
            return Err(ModelError::GlobalBinding {
                role: self.role.clone(),
            });
        }
        for reference in &self.policies {
            PolicyRef::parse(reference).map_err(|_| ModelError::EmptyPolicyReference {
                role: self.role.clone(),
            })?;
        }
        Ok(())
    }
}

/// A policy reference as it appears in a binding: either local to the
/// binding's account, or `_global:<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyRef {
    Local(String),
    Global(String),
}

impl PolicyRef {
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        if let Some(id) = raw.strip_prefix(GLOBAL_REF_PREFIX) {
            if id.is_empty() {
                return Err(ModelError::EmptyPolicyId);
            }
            return Ok(PolicyRef::Global(id.to_string()));
        }
        if raw.is_empty() {
            return Err(ModelError::EmptyPolicyId);
        }
        Ok(PolicyRef::Local(raw.to_string()))
    }

    pub fn id(&self) -> &str {
        match self {
            PolicyRef::Local(id) | PolicyRef::Global(id) => id,
        }
    }

    /// The account the referenced policy lives under.
    pub fn account<'a>(&self, local_account: &'a str) -> &'a str {
        match self {
            PolicyRef::Local(_) => local_account,
            PolicyRef::Global(_) => GLOBAL_ACCOUNT,
        }
    }
}

/// The key-prefix rendering of an account name (`_global` for `*`).
pub fn account_prefix(account: &str) -> &str {
    if account == GLOBAL_ACCOUNT {
        GLOBAL_PREFIX
    } else {
        account
    }
}

/// The inverse of [`account_prefix`].
pub fn account_from_prefix(prefix: &str) -> &str {
    if prefix == GLOBAL_PREFIX {
        GLOBAL_ACCOUNT
    } else {
        prefix
    }
}
