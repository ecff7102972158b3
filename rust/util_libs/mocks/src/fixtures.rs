use policy_engine::identity::{Identity, RoleRef};
use policy_engine::model::{Binding, Effect, Policy, Statement};
use std::collections::HashMap;

pub fn identity(id: &str, account: &str, role: &str) -> Identity {
    Identity {
        id: id.to_string(),
        accounts: vec![account.to_string()],
        roles: vec![RoleRef {
            account: account.to_string(),
            name: role.to_string(),
        }],
        attributes: HashMap::new(),
    }
}

pub fn statement(actions: &[&str], resources: &[&str]) -> Statement {
    Statement {
        effect: Effect::Allow,
        actions: actions.iter().map(|s| s.to_string()).collect(),
        resources: resources.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn policy(account: &str, id: &str, statements: Vec<Statement>) -> Policy {
    Policy {
        id: id.to_string(),
        account: account.to_string(),
        name: id.to_string(),
        statements,
    }
}

pub fn binding(account: &str, role: &str, policies: &[&str]) -> Binding {
    Binding {
        account: account.to_string(),
        role: role.to_string(),
        policies: policies.iter().map(|s| s.to_string()).collect(),
    }
}

/// The inbox policy from the operator handbook: every user may use their
/// own subject subtree.
pub fn per_user_inbox_policy(account: &str) -> Policy {
    policy(
        account,
        "per-user-inbox",
        vec![statement(
            &["nats.pub", "nats.sub"],
            &["nats:user.{{ user.id }}.>"],
        )],
    )
}
