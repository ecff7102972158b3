use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Publish,
    Subscribe,
}

/// One compiled permission entry. Entries compare (and deduplicate) on the
/// full `(direction, subject, queue)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permission {
    pub direction: Direction,
    pub subject: String,
    pub queue: Option<String>,
}

impl Permission {
    pub fn publish(subject: impl Into<String>) -> Self {
        Self {
            direction: Direction::Publish,
            subject: subject.into(),
            queue: None,
        }
    }

    pub fn subscribe(subject: impl Into<String>) -> Self {
        Self {
            direction: Direction::Subscribe,
            subject: subject.into(),
            queue: None,
        }
    }

    pub fn subscribe_queue(subject: impl Into<String>, queue: Option<String>) -> Self {
        Self {
            direction: Direction::Subscribe,
            subject: subject.into(),
            queue,
        }
    }

    /// The NATS allow-list entry: `subject` or `subject queue`.
    fn wire_entry(&self) -> String {
        match &self.queue {
            Some(queue) => format!("{} {}", self.subject, queue),
            None => self.subject.clone(),
        }
    }
}

/// Accumulates compiled permissions, preserving first-seen order for
/// debuggability while deduplicating exact tuples.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    entries: Vec<Permission>,
    seen: HashSet<Permission>,
    allow_responses: bool,
}

impl PermissionSet {
    pub fn push(&mut self, permission: Permission) {
        if self.seen.insert(permission.clone()) {
            self.entries.push(permission);
        }
    }

    pub fn extend(&mut self, permissions: impl IntoIterator<Item = Permission>) {
        for permission in permissions {
            self.push(permission);
        }
    }

    pub fn entries(&self) -> &[Permission] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn allow_responses(&mut self) {
        self.allow_responses = true;
    }

    pub fn has_responses(&self) -> bool {
        self.allow_responses
    }

    /// The implicit grants every compiled identity receives: its own inbox
    /// subscription, and `$JS.API.INFO` whenever the set touches JetStream
    /// or KV subject space. The inbox subject embeds `user_id` verbatim;
    /// it is not re-sanitized.
    pub fn add_implicit(&mut self, user_id: &str) {
        let touches_jetstream = self
            .entries
            .iter()
            .any(|p| p.subject.starts_with("$JS.") || p.subject.starts_with("$KV."));

        self.push(Permission::subscribe(format!("_INBOX_{user_id}.>")));
        if touches_jetstream {
            self.push(Permission::publish("$JS.API.INFO"));
        }
    }

    /// Project into the wire shape the NATS server reads out of the user
    /// token.
    pub fn to_wire(&self) -> Permissions {
        let mut publish = Vec::new();
        let mut subscribe = Vec::new();
        for permission in &self.entries {
            match permission.direction {
                Direction::Publish => publish.push(permission.wire_entry()),
                Direction::Subscribe => subscribe.push(permission.wire_entry()),
            }
        }

        Permissions {
            publish: PermissionLimits {
                allow: (!publish.is_empty()).then_some(publish),
                deny: None,
            },
            subscribe: PermissionLimits {
                allow: (!subscribe.is_empty()).then_some(subscribe),
                deny: None,
            },
            resp: self
                .allow_responses
                .then_some(ResponsePermission { max: 1, ttl: None }),
        }
    }
}

/// `nats.permissions` claim shape.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Permissions {
    #[serde(rename = "pub")]
    pub publish: PermissionLimits,
    #[serde(rename = "sub")]
    pub subscribe: PermissionLimits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp: Option<ResponsePermission>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct PermissionLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ResponsePermission {
    pub max: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduplicates_on_full_tuple() {
        let mut set = PermissionSet::default();
        set.push(Permission::publish("orders.>"));
        set.push(Permission::publish("orders.>"));
        set.push(Permission::subscribe("orders.>"));
        set.push(Permission::subscribe_queue("orders.>", Some("workers".to_string())));
        assert_eq!(set.entries().len(), 3);
    }

    #[test]
    fn preserves_first_seen_order() {
        let mut set = PermissionSet::default();
        set.push(Permission::publish("b"));
        set.push(Permission::publish("a"));
        set.push(Permission::publish("b"));
        let subjects: Vec<&str> = set.entries().iter().map(|p| p.subject.as_str()).collect();
        assert_eq!(subjects, vec!["b", "a"]);
    }

    #[test]
    fn implicit_inbox_is_always_present() {
        let mut set = PermissionSet::default();
        set.add_implicit("alice");
        let wire = set.to_wire();
        assert_eq!(
            wire.subscribe.allow,
            Some(vec!["_INBOX_alice.>".to_string()])
        );
        assert_eq!(wire.publish.allow, None);
    }

    #[test]
    fn jetstream_subjects_pull_in_js_api_info() {
        let mut set = PermissionSet::default();
        set.push(Permission::publish("$JS.API.CONSUMER.INFO.ORDERS.processor"));
        set.add_implicit("alice");
        assert!(set
            .entries()
            .iter()
            .any(|p| p.direction == Direction::Publish && p.subject == "$JS.API.INFO"));

        let mut set = PermissionSet::default();
        set.push(Permission::subscribe("$KV.config.>"));
        set.add_implicit("alice");
        assert!(set.entries().iter().any(|p| p.subject == "$JS.API.INFO"));
    }

    #[test]
    fn queue_entries_render_subject_space_queue() {
        let mut set = PermissionSet::default();
        set.push(Permission::subscribe_queue("orders.>", Some("workers".to_string())));
        let wire = set.to_wire();
        assert_eq!(
            wire.subscribe.allow,
            Some(vec!["orders.> workers".to_string()])
        );
    }

    #[test]
    fn responses_round_trip_to_wire() {
        let mut set = PermissionSet::default();
        set.push(Permission::subscribe("billing.invoice"));
        set.allow_responses();
        let wire = set.to_wire();
        assert_eq!(wire.resp, Some(ResponsePermission { max: 1, ttl: None }));
    }
}
