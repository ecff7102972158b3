use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A validated identity as handed over by the identity layer. The engine
/// never mutates identities; it only reads them while compiling.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub roles: Vec<RoleRef>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoleRef {
    pub account: String,
    pub name: String,
}

impl Identity {
    /// Membership check against the accounts this identity may assume.
    pub fn may_assume(&self, account: &str) -> bool {
        self.accounts.iter().any(|a| a == account)
    }

    pub fn roles_for_account<'a>(&'a self, account: &str) -> impl Iterator<Item = &'a RoleRef> {
        let account = account.to_string();
        self.roles.iter().filter(move |r| r.account == account)
    }
}
