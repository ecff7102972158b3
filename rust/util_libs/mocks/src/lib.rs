/*
Crate: mock_utils

Shared test doubles for the nauts workspace:
    - memory_store: an in-memory `PolicyStore` with injectable fetch
      failures
    - fixtures: canned identities, policies and bindings used across the
      engine and service test suites
    - test_nats_server: a throwaway `nats-server --jetstream` process for
      the integration suites
*/

pub mod fixtures;
pub mod memory_store;
pub mod nats_message;
pub mod test_nats_server;
