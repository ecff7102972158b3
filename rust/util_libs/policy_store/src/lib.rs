/*
Crate: policy_store

The two policy sources behind the authorization compiler:
    - file: policies and bindings loaded once from JSON files at startup,
      read-only afterwards
    - kv: a read-through cache over a NATS KV bucket with a live watcher
      that invalidates changed keys and reconnects with exponential
      backoff

Both implement `policy_engine::store::PolicyStore`; the compiler never
knows which one it is reading.
*/

pub mod file;
pub mod kv;

pub use policy_engine::store::{PolicyStore, StoreError};

#[cfg(test)]
mod tests;
