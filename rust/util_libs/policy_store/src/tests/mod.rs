
#[cfg(feature = "tests_integration_nats")]
mod kv_live;
