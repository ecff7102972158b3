use crate::nrn::{Nrn, ResourceType};
use crate::permissions::Permission;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown action '{found}'")]
    UnknownAction { found: String },

    #[error("action '{action}' does not apply to '{resource_type}' resources")]
    TypeMismatch {
        action: &'static str,
        resource_type: &'static str,
    },

    #[error("bucket '*' is not allowed for '{action}', name an explicit bucket")]
    WildcardBucket { action: &'static str },
}

/// The closed set of atomic actions. Each carries the compilation rule
/// that turns `(action, NRN)` into the subject permissions the NATS server
/// understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    NatsPub,
    NatsSub,
    NatsService,
    JsConsume,
    JsManage,
    JsView,
    KvRead,
    KvEdit,
    KvView,
    KvManage,
}

/// Action groups expand to a fixed subset of atomic actions before
/// compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionGroup {
    Nats,
    Js,
    Kv,
}

/// What a statement's action string parses into: one atomic action or a
/// group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionSpec {
    Atomic(Action),
    Group(ActionGroup),
}

impl ActionSpec {
    pub fn expand(&self) -> Vec<Action> {
        match self {
            ActionSpec::Atomic(action) => vec![*action],
            ActionSpec::Group(ActionGroup::Nats) => {
                vec![Action::NatsPub, Action::NatsSub, Action::NatsService]
            }
            ActionSpec::Group(ActionGroup::Js) => vec![Action::JsManage],
            ActionSpec::Group(ActionGroup::Kv) => vec![Action::KvManage],
        }
    }
}

impl FromStr for ActionSpec {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = match s {
            "nats.pub" => ActionSpec::Atomic(Action::NatsPub),
            "nats.sub" => ActionSpec::Atomic(Action::NatsSub),
            "nats.service" => ActionSpec::Atomic(Action::NatsService),
            "js.consume" => ActionSpec::Atomic(Action::JsConsume),
            "js.manage" => ActionSpec::Atomic(Action::JsManage),
            "js.view" => ActionSpec::Atomic(Action::JsView),
            "kv.read" => ActionSpec::Atomic(Action::KvRead),
            "kv.edit" => ActionSpec::Atomic(Action::KvEdit),
            "kv.view" => ActionSpec::Atomic(Action::KvView),
            "kv.manage" => ActionSpec::Atomic(Action::KvManage),
            "nats.*" => ActionSpec::Group(ActionGroup::Nats),
            "js.*" => ActionSpec::Group(ActionGroup::Js),
            "kv.*" => ActionSpec::Group(ActionGroup::Kv),
            other => {
                return Err(CatalogError::UnknownAction {
                    found: other.to_string(),
                })
            }
        };
        Ok(spec)
    }
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::NatsPub => "nats.pub",
            Action::NatsSub => "nats.sub",
            Action::NatsService => "nats.service",
            Action::JsConsume => "js.consume",
            Action::JsManage => "js.manage",
            Action::JsView => "js.view",
            Action::KvRead => "kv.read",
            Action::KvEdit => "kv.edit",
            Action::KvView => "kv.view",
            Action::KvManage => "kv.manage",
        }
    }

    pub fn domain(&self) -> ResourceType {
        match self {
            Action::NatsPub | Action::NatsSub | Action::NatsService => ResourceType::Nats,
            Action::JsConsume | Action::JsManage | Action::JsView => ResourceType::Js,
            Action::KvRead | Action::KvEdit | Action::KvView | Action::KvManage => ResourceType::Kv,
        }
    }

    /// `nats.service` is the one action that turns on reply-inbox response
    /// permissions on the compiled set.
    pub fn allows_responses(&self) -> bool {
        matches!(self, Action::NatsService)
    }

    pub(crate) fn requires_explicit_bucket(&self) -> bool {
        matches!(self, Action::KvRead | Action::KvEdit | Action::KvManage)
    }

    /// Run this action's catalog rule against `nrn`.
    pub fn compile(&self, nrn: &Nrn) -> Result<Vec<Permission>, CatalogError> {
        if nrn.resource_type != self.domain() {
            return Err(CatalogError::TypeMismatch {
                action: self.as_str(),
                resource_type: nrn.resource_type.as_str(),
            });
        }
        if self.requires_explicit_bucket() && nrn.identifier == "*" {
            return Err(CatalogError::WildcardBucket {
                action: self.as_str(),
            });
        }

        let permissions = match self {
            Action::NatsPub => vec![Permission::publish(&nrn.identifier)],
            Action::NatsSub | Action::NatsService => vec![Permission::subscribe_queue(
                &nrn.identifier,
                nrn.sub_identifier.clone(),
            )],
            Action::JsConsume => js_consume(nrn),
            Action::JsManage => js_manage(nrn),
            Action::JsView => js_view(&nrn.identifier),
            Action::KvRead => kv_read(nrn),
            Action::KvEdit => kv_edit(nrn),
            Action::KvView => kv_view(&nrn.identifier),
            Action::KvManage => kv_manage(nrn),
        };
        Ok(permissions)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Consuming from one named consumer: the consumer API, acks, flow
/// control and direct gets scoped to that consumer.
fn js_consume_consumer(stream: &str, consumer: &str) -> Vec<Permission> {
    vec![
        Permission::publish(format!("$JS.API.CONSUMER.INFO.{stream}.{consumer}")),
        Permission::publish(format!("$JS.API.CONSUMER.DURABLE.CREATE.{stream}.{consumer}")),
        Permission::publish(format!("$JS.API.CONSUMER.MSG.NEXT.{stream}.{consumer}")),
        Permission::publish(format!("$JS.ACK.{stream}.{consumer}.>")),
        Permission::publish(format!("$JS.SNAPSHOT.RESTORE.{stream}.*")),
        Permission::publish(format!("$JS.SNAPSHOT.ACK.{stream}.*")),
        Permission::publish(format!("$JS.FC.{stream}.>")),
        Permission::publish(format!("$JS.API.DIRECT.GET.{stream}")),
        Permission::publish(format!("$JS.API.DIRECT.GET.{stream}.>")),
    ]
}

/// Stream-wide consuming: any consumer on the stream, ephemeral or
/// durable.
fn js_consume_stream(stream: &str) -> Vec<Permission> {
    vec![
        Permission::publish(format!("$JS.API.CONSUMER.*.{stream}")),
        Permission::publish(format!("$JS.API.CONSUMER.*.{stream}.>")),
        Permission::publish(format!("$JS.API.CONSUMER.DURABLE.CREATE.{stream}.>")),
        Permission::publish(format!("$JS.API.CONSUMER.MSG.NEXT.{stream}.*")),
        Permission::publish(format!("$JS.ACK.{stream}.>")),
        Permission::publish(format!("$JS.SNAPSHOT.RESTORE.{stream}.*")),
        Permission::publish(format!("$JS.SNAPSHOT.ACK.{stream}.*")),
        Permission::publish(format!("$JS.FC.{stream}.>")),
        Permission::publish(format!("$JS.API.DIRECT.GET.{stream}")),
        Permission::publish(format!("$JS.API.DIRECT.GET.{stream}.>")),
    ]
}

fn js_consume(nrn: &Nrn) -> Vec<Permission> {
    match nrn.sub_identifier.as_deref() {
        Some(consumer) if consumer != "*" => js_consume_consumer(&nrn.identifier, consumer),
        _ => js_consume_stream(&nrn.identifier),
    }
}

fn js_manage(nrn: &Nrn) -> Vec<Permission> {
    let stream = &nrn.identifier;
    let mut permissions = js_consume(nrn);
    permissions.push(Permission::publish(format!("$JS.API.STREAM.*.{stream}")));
    permissions.push(Permission::publish(format!("$JS.API.STREAM.MSG.*.{stream}")));
    if stream == "*" {
        permissions.push(Permission::publish("$JS.API.STREAM.LIST"));
        permissions.push(Permission::publish("$JS.API.STREAM.NAMES"));
    }
    permissions
}

fn js_view(stream: &str) -> Vec<Permission> {
    let mut permissions = vec![
        Permission::publish(format!("$JS.API.STREAM.INFO.{stream}")),
        Permission::publish(format!("$JS.API.CONSUMER.INFO.{stream}.*")),
        Permission::publish(format!("$JS.API.CONSUMER.LIST.{stream}")),
        Permission::publish(format!("$JS.API.CONSUMER.NAMES.{stream}")),
    ];
    if stream == "*" {
        permissions.push(Permission::publish("$JS.API.STREAM.LIST"));
        permissions.push(Permission::publish("$JS.API.STREAM.NAMES"));
    }
    permissions
}

/// The backing stream of a KV bucket.
fn bucket_stream(bucket: &str) -> String {
    format!("KV_{bucket}")
}

/// A key of `None` or `>` addresses the whole bucket.
fn is_bucket_wide(nrn: &Nrn) -> bool {
    matches!(nrn.sub_identifier.as_deref(), None | Some(">"))
}

fn kv_read(nrn: &Nrn) -> Vec<Permission> {
    let bucket = &nrn.identifier;
    let stream = bucket_stream(bucket);
    if is_bucket_wide(nrn) {
        vec![
            Permission::publish(format!("$JS.API.STREAM.INFO.{stream}")),
            Permission::publish(format!("$JS.API.DIRECT.GET.{stream}.$KV.{bucket}.>")),
            Permission::publish(format!("$JS.API.CONSUMER.CREATE.{stream}")),
            Permission::publish(format!("$JS.API.CONSUMER.CREATE.{stream}.>")),
            Permission::publish(format!("$JS.FC.{stream}.>")),
            Permission::subscribe(format!("$KV.{bucket}.>")),
        ]
    } else {
        let key = nrn.sub_identifier.as_deref().expect("key present");
        vec![
            Permission::publish(format!("$JS.API.STREAM.INFO.{stream}")),
            Permission::publish(format!("$JS.API.DIRECT.GET.{stream}.$KV.{bucket}.{key}")),
            Permission::subscribe(format!("$KV.{bucket}.{key}")),
        ]
    }
}

fn kv_edit(nrn: &Nrn) -> Vec<Permission> {
    let bucket = &nrn.identifier;
    let mut permissions = kv_read(nrn);
    let key_space = if is_bucket_wide(nrn) {
        format!("$KV.{bucket}.>")
    } else {
        let key = nrn.sub_identifier.as_deref().expect("key present");
        format!("$KV.{bucket}.{key}")
    };
    permissions.push(Permission::publish(key_space));
    permissions
}

fn kv_view(bucket: &str) -> Vec<Permission> {
    if bucket == "*" {
        vec![
            Permission::publish("$JS.API.STREAM.LIST"),
            Permission::publish("$JS.API.STREAM.INFO.*"),
        ]
    } else {
        vec![Permission::publish(format!(
            "$JS.API.STREAM.INFO.{}",
            bucket_stream(bucket)
        ))]
    }
}

fn kv_manage(nrn: &Nrn) -> Vec<Permission> {
    let mut permissions = kv_read(nrn);
    permissions.push(Permission::publish(format!(
        "$JS.API.STREAM.*.{}",
        bucket_stream(&nrn.identifier)
    )));
    permissions
}
