use crate::identity::Identity;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

lazy_static! {
    static ref PLACEHOLDER_REGEX: Regex =
        Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("a valid regex");
    static ref VALUE_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_\-.]+$").expect("a valid regex");
}

/// The flat variable mapping a resource template is expanded against.
/// `role.name` (and its alias `role.id`) change per role while the
/// compiler iterates, so one context exists per (identity, account, role).
#[derive(Debug, Clone)]
pub struct InterpolationContext {
    vars: HashMap<String, String>,
}

impl InterpolationContext {
    pub fn new(identity: &Identity, account: &str, role_name: &str) -> Self {
        let mut vars = HashMap::new();
        vars.insert("user.id".to_string(), identity.id.clone());
        vars.insert("account.id".to_string(), account.to_string());
        vars.insert("role.name".to_string(), role_name.to_string());
        vars.insert("role.id".to_string(), role_name.to_string());
        for (key, value) in &identity.attributes {
            vars.insert(format!("user.attr.{key}"), value.clone());
        }
        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpolation {
    Resolved(String),
    /// The resource must be dropped; the reason becomes a compiler warning.
    Excluded(ExclusionReason),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExclusionReason {
    #[error("unresolved variable '{name}'")]
    UnresolvedVariable { name: String },

    #[error("invalid value '{value}' for variable '{name}': {rule}")]
    InvalidValue {
        name: String,
        value: String,
        rule: &'static str,
    },

    #[error("malformed template: {reason}")]
    MalformedTemplate { reason: &'static str },
}

/// Expand every `{{ name }}` placeholder in `template` against `ctx`.
///
/// Substituted values are sanitized before they reach the subject space: a
/// value must be non-empty, wildcard-free and drawn from `[A-Za-z0-9_\-.]`.
/// Any failure excludes the whole resource; partial substitution never
/// escapes.
pub fn interpolate(template: &str, ctx: &InterpolationContext) -> Interpolation {
    let mut output = String::with_capacity(template.len());
    let mut cursor = 0;

    for captures in PLACEHOLDER_REGEX.captures_iter(template) {
        let placeholder = captures.get(0).expect("capture 0 is the whole match");
        let name = &captures[1];

        let Some(value) = ctx.get(name) else {
            return Interpolation::Excluded(ExclusionReason::UnresolvedVariable {
                name: name.to_string(),
            });
        };
        if let Err(rule) = sanitize(value) {
            return Interpolation::Excluded(ExclusionReason::InvalidValue {
                name: name.to_string(),
                value: value.to_string(),
                rule,
            });
        }

        output.push_str(&template[cursor..placeholder.start()]);
        output.push_str(value);
        cursor = placeholder.end();
    }
    output.push_str(&template[cursor..]);

    // A leftover marker means a brace pair the placeholder grammar did not
    // accept (unterminated, or an ill-formed variable name).
    if output.contains("{{") || output.contains("}}") {
        return Interpolation::Excluded(ExclusionReason::MalformedTemplate {
            reason: "unmatched or ill-formed '{{ ... }}' placeholder",
        });
    }

    Interpolation::Resolved(output)
}

fn sanitize(value: &str) -> Result<(), &'static str> {
    if value.is_empty() {
        return Err("value may not be empty");
    }
    if value.contains('*') || value.contains('>') {
        return Err("value may not contain wildcards");
    }
    if !VALUE_REGEX.is_match(value) {
        return Err("value contains characters outside [A-Za-z0-9_-.]");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    fn ctx_for(id: &str) -> InterpolationContext {
        let mut identity = Identity {
            id: id.to_string(),
            ..Default::default()
        };
        identity
            .attributes
            .insert("team".to_string(), "billing".to_string());
        InterpolationContext::new(&identity, "APP", "user")
    }

    #[test]
    fn resolves_known_variables() {
        let ctx = ctx_for("alice");
        assert_eq!(
            interpolate("nats:user.{{ user.id }}.>", &ctx),
            Interpolation::Resolved("nats:user.alice.>".to_string())
        );
        assert_eq!(
            interpolate("nats:{{account.id}}.{{ role.name }}.{{ user.attr.team }}", &ctx),
            Interpolation::Resolved("nats:APP.user.billing".to_string())
        );
        // role.id is an alias of role.name
        assert_eq!(
            interpolate("nats:{{ role.id }}", &ctx),
            Interpolation::Resolved("nats:user".to_string())
        );
    }

    #[test]
    fn templates_without_placeholders_pass_through() {
        let ctx = ctx_for("alice");
        assert_eq!(
            interpolate("nats:orders.>", &ctx),
            Interpolation::Resolved("nats:orders.>".to_string())
        );
    }

    #[test]
    fn unresolved_variables_exclude_the_resource() {
        let ctx = ctx_for("alice");
        assert_eq!(
            interpolate("kv:{{ user.attr.bucket }}", &ctx),
            Interpolation::Excluded(ExclusionReason::UnresolvedVariable {
                name: "user.attr.bucket".to_string()
            })
        );
    }

    #[test]
    fn wildcard_values_exclude_the_resource() {
        let ctx = ctx_for("a*b");
        let result = interpolate("nats:user.{{ user.id }}.>", &ctx);
        assert!(matches!(
            result,
            Interpolation::Excluded(ExclusionReason::InvalidValue { .. })
        ));

        let ctx = ctx_for("a.b>");
        assert!(matches!(
            interpolate("nats:user.{{ user.id }}", &ctx),
            Interpolation::Excluded(ExclusionReason::InvalidValue { .. })
        ));
    }

    #[test]
    fn out_of_alphabet_values_exclude_the_resource() {
        let ctx = ctx_for("alice smith");
        assert!(matches!(
            interpolate("nats:user.{{ user.id }}", &ctx),
            Interpolation::Excluded(ExclusionReason::InvalidValue { .. })
        ));
    }

    #[test]
    fn malformed_placeholders_exclude_the_resource() {
        let ctx = ctx_for("alice");
        assert!(matches!(
            interpolate("nats:user.{{ user.id", &ctx),
            Interpolation::Excluded(ExclusionReason::MalformedTemplate { .. })
        ));
        assert!(matches!(
            interpolate("nats:user.{{ bad name }}", &ctx),
            Interpolation::Excluded(ExclusionReason::MalformedTemplate { .. })
        ));
    }
}
