use crate::actions::{Action, ActionSpec};
use crate::identity::Identity;
use crate::interpolate::{interpolate, Interpolation, InterpolationContext};
use crate::model::{Policy, PolicyRef};
use crate::nrn::Nrn;
use crate::permissions::PermissionSet;
use crate::store::{PolicyStore, StoreError};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Everything an authorization decision produced: the permission set to
/// embed in the user token, plus the trace the debug endpoint reports.
#[derive(Debug, Clone, Default)]
pub struct CompilationResult {
    pub permissions: PermissionSet,
    /// Role names that contributed, in iteration order.
    pub roles: Vec<String>,
    /// Per role, the ids of the policies that were actually fetched.
    pub policies: HashMap<String, Vec<String>>,
    pub warnings: Vec<CompileWarning>,
}

/// Recoverable oddities encountered while compiling. None of these abort
/// the compilation; each marks a resource, policy or role that contributed
/// nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileWarning {
    #[error("role '{role}' has no binding in account '{account}'")]
    MissingBinding { account: String, role: String },

    #[error("policy '{reference}' referenced by role '{role}' was not found")]
    MissingPolicy { role: String, reference: String },

    #[error("policy '{reference}' referenced by role '{role}' could not be fetched: {reason}")]
    PolicyFetchFailed {
        role: String,
        reference: String,
        reason: String,
    },

    #[error("binding for role '{role}' carries an invalid policy reference '{reference}'")]
    InvalidPolicyReference { role: String, reference: String },

    #[error("resource '{resource}' in policy '{policy}' was excluded: {reason}")]
    ResourceExcluded {
        policy: String,
        resource: String,
        reason: String,
    },

    #[error("resource '{resource}' in policy '{policy}' is not a valid resource name: {reason}")]
    InvalidResource {
        policy: String,
        resource: String,
        reason: String,
    },

    #[error("unknown action '{action}' in policy '{policy}'")]
    UnknownAction { policy: String, action: String },

    #[error("action '{action}' cannot be applied to '{resource}' in policy '{policy}': {reason}")]
    ActionNotApplicable {
        policy: String,
        action: String,
        resource: String,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum CompileError {
    /// The store failed in a way that is indistinguishable from an outage
    /// (a binding fetch error). Fail closed rather than authorize off a
    /// partial snapshot.
    #[error("policy store error: {0}")]
    Store(#[from] StoreError),
}

/// Compile the permission set for `identity` assuming `account`.
///
/// Pure with respect to the store snapshot: compiling the same identity
/// against the same snapshot twice yields the same result. Missing
/// bindings, missing policies and excluded resources degrade to warnings;
/// only a store failure on a binding read aborts.
pub async fn compile(
    identity: &Identity,
    account: &str,
    store: &dyn PolicyStore,
) -> Result<CompilationResult, CompileError> {
    let mut result = CompilationResult::default();

    for role in identity.roles_for_account(account) {
        let binding = match store.get_binding(account, &role.name).await {
            Ok(binding) => binding,
            Err(StoreError::RoleNotFound { .. }) => {
                log::debug!(
                    "No binding for role '{}' in account '{account}', skipping",
                    role.name
                );
                result.warnings.push(CompileWarning::MissingBinding {
                    account: account.to_string(),
                    role: role.name.clone(),
                });
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        result.roles.push(role.name.clone());
        let context = InterpolationContext::new(identity, account, &role.name);
        let applied = result.policies.entry(role.name.clone()).or_default();

        for raw_reference in &binding.policies {
            let reference = match PolicyRef::parse(raw_reference) {
                Ok(reference) => reference,
                Err(_) => {
                    result.warnings.push(CompileWarning::InvalidPolicyReference {
                        role: role.name.clone(),
                        reference: raw_reference.clone(),
                    });
                    continue;
                }
            };

            let policy = match store
                .get_policy(reference.account(account), reference.id())
                .await
            {
                Ok(policy) => policy,
                Err(e) if e.is_not_found() => {
                    result.warnings.push(CompileWarning::MissingPolicy {
                        role: role.name.clone(),
                        reference: raw_reference.clone(),
                    });
                    continue;
                }
                Err(e) => {
                    // An unreadable policy contributes nothing; dropping it
                    // keeps authorization alive while an administrator
                    // repairs the record.
                    log::warn!(
                        "Failed to fetch policy '{raw_reference}' for role '{}': {e}",
                        role.name
                    );
                    result.warnings.push(CompileWarning::PolicyFetchFailed {
                        role: role.name.clone(),
                        reference: raw_reference.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            applied.push(policy.id.clone());
            compile_policy(
                &policy,
                &context,
                &mut result.permissions,
                &mut result.warnings,
            );
        }
    }

    result.permissions.add_implicit(&identity.id);
    Ok(result)
}

fn compile_policy(
    policy: &Policy,
    context: &InterpolationContext,
    permissions: &mut PermissionSet,
    warnings: &mut Vec<CompileWarning>,
) {
    for statement in &policy.statements {
        let mut actions: Vec<Action> = Vec::new();
        for raw in &statement.actions {
            match ActionSpec::from_str(raw) {
                Ok(spec) => actions.extend(spec.expand()),
                Err(_) => warnings.push(CompileWarning::UnknownAction {
                    policy: policy.id.clone(),
                    action: raw.clone(),
                }),
            }
        }

        for raw_resource in &statement.resources {
            let resolved = match interpolate(raw_resource, context) {
                Interpolation::Resolved(resolved) => resolved,
                Interpolation::Excluded(reason) => {
                    warnings.push(CompileWarning::ResourceExcluded {
                        policy: policy.id.clone(),
                        resource: raw_resource.clone(),
                        reason: reason.to_string(),
                    });
                    continue;
                }
            };

            // Re-validate now that any template segments are expanded.
            let nrn = match Nrn::parse_and_validate(&resolved) {
                Ok(nrn) => nrn,
                Err(e) => {
                    warnings.push(CompileWarning::InvalidResource {
                        policy: policy.id.clone(),
                        resource: resolved.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for action in &actions {
                match action.compile(&nrn) {
                    Ok(compiled) => {
                        permissions.extend(compiled);
                        if action.allows_responses() {
                            permissions.allow_responses();
                        }
                    }
                    Err(e) => warnings.push(CompileWarning::ActionNotApplicable {
                        policy: policy.id.clone(),
                        action: action.as_str().to_string(),
                        resource: resolved.clone(),
                        reason: e.to_string(),
                    }),
                }
            }
        }
    }
}
