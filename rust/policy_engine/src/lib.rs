/*
Crate: policy_engine

The declarative authorization model behind the nauts auth-callout service:
    - nrn: typed resource names (`nats:...`, `js:...`, `kv:...`) with
      NATS wildcard rules
    - interpolate: `{{ var }}` expansion of resource templates against a
      request context, with fail-closed sanitization
    - actions: the closed catalog of atomic actions and action groups,
      each with its compilation rule into concrete subject permissions
    - model: policies, statements and role bindings plus structural
      validation
    - permissions: the accumulating permission set and its NATS wire shape
    - compiler: bindings -> policies -> statements -> permission set
    - store: the policy store contract the compiler reads through

The compiler is a pure function of (identity, account, store snapshot);
all I/O lives behind the `PolicyStore` trait.
*/

pub mod actions;
pub mod compiler;
pub mod identity;
pub mod interpolate;
pub mod model;
pub mod nrn;
pub mod permissions;
pub mod store;
