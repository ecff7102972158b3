use anyhow::Result;
use async_nats::{
    jetstream::{self, kv},
    Client, ConnectOptions,
};
use rand::Rng;
use std::{process::Command, sync::Arc};
use tempfile::TempDir;
use tokio::time::{sleep, Duration};

/// A throwaway `nats-server --jetstream` process for integration tests.
/// Tests call [`check_nats_server`] first and skip when the binary is not
/// installed.
pub struct TestNatsServer {
    _temp_dir: TempDir,
    _process: Arc<tokio::process::Child>,
    pub port: String,
}

impl TestNatsServer {
    pub async fn new() -> Result<Self> {
        if !check_nats_server() {
            return Err(anyhow::anyhow!("NATS server not available"));
        }

        let temp_dir = TempDir::new()?;
        let jetstream_dir = temp_dir.path().join("jetstream");
        std::fs::create_dir_all(&jetstream_dir)?;

        let mut port = String::new();
        let mut process = None;
        let max_attempts = 5;
        let mut attempts = 0;

        while attempts < max_attempts {
            port = generate_random_port();
            log::info!("Attempting to start NATS server on port: {port}");

            let spawn_result = tokio::process::Command::new("nats-server")
                .args([
                    "--jetstream",
                    "--store_dir",
                    jetstream_dir.to_str().unwrap(),
                    "--port",
                    &port,
                ])
                .kill_on_drop(true)
                .spawn();

            match spawn_result {
                Ok(p) => {
                    process = Some(p);
                    sleep(Duration::from_secs(1)).await;

                    // Verify the server came up before handing it to a test
                    match tokio::time::timeout(Duration::from_secs(2), async {
                        ConnectOptions::new()
                            .name("test_client")
                            .connect(&format!("nats://localhost:{port}"))
                            .await
                    })
                    .await
                    {
                        Ok(Ok(_)) => break,
                        _ => {
                            if let Some(mut p) = process.take() {
                                let _ = p.kill().await;
                            }
                            attempts += 1;
                            sleep(Duration::from_secs(1)).await;
                            continue;
                        }
                    }
                }
                Err(_) => {
                    attempts += 1;
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
            }
        }

        let process = process.ok_or_else(|| anyhow::anyhow!("Failed to start NATS server"))?;

        Ok(Self {
            _temp_dir: temp_dir,
            _process: Arc::new(process),
            port,
        })
    }

    pub async fn connect(&self) -> Result<Client> {
        let timeout = Duration::from_secs(5);
        match tokio::time::timeout(
            timeout,
            ConnectOptions::new()
                .name("test_client")
                .connect(&format!("nats://localhost:{}", self.port)),
        )
        .await
        {
            Ok(Ok(client)) => Ok(client),
            Ok(Err(e)) => Err(anyhow::anyhow!("Failed to connect to NATS: {e}")),
            Err(_) => Err(anyhow::anyhow!("Connection timed out after {timeout:?}")),
        }
    }

    /// Create the KV bucket the policy store reads from.
    pub async fn create_policy_bucket(&self, name: &str) -> Result<kv::Store> {
        let client = self.connect().await?;
        let js = jetstream::new(client);
        let bucket = js
            .create_key_value(kv::Config {
                bucket: name.to_string(),
                description: "policies and bindings under test".to_string(),
                history: 4,
                ..Default::default()
            })
            .await?;
        Ok(bucket)
    }

    pub async fn shutdown(self) -> Result<()> {
        if let Ok(mut child) = Arc::try_unwrap(self._process) {
            let _ = child.kill().await;
            let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
        }
        log::info!("NATS server successfully shut down...");
        Ok(())
    }
}

fn generate_random_port() -> String {
    let mut rng = rand::rng();
    rng.random_range(4444..5555).to_string()
}

/// True when a `nats-server` binary is on the PATH.
pub fn check_nats_server() -> bool {
    Command::new("nats-server")
        .arg("--version")
        .output()
        .is_ok()
}
