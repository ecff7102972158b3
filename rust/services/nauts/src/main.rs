/*
Service Name: NAUTS
Subjects:
    - $SYS.REQ.USER.AUTH (auth callout, imported by the auth account)
    - nauts.debug        (operator debug endpoint)

This service answers NATS auth-callout requests: it compiles the
declarative policy model for the connecting identity's roles into the
publish/subscribe permission set the server expects, signs a user token
under the target account and returns it in the response envelope.

Policies and bindings come either from static JSON files or from a KV
bucket with live invalidation. Signing runs in static mode (one key for
all accounts) or operator mode (per-account signing keys).
*/

mod callout;

use anyhow::{anyhow, Context, Result};
use callout::CalloutService;
use clap::Parser;
use futures::StreamExt;
use nkeys::XKey;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use authorization::accounts::{AccountProvider, AccountSigner, OperatorAccountConfig};
use authorization::types::DEBUG_SUBJECT;
use authorization::AuthorizationApi;
use policy_engine::store::PolicyStore;
use policy_store::file::FilePolicyStore;
use policy_store::kv::KvPolicyStore;

const AUTH_CALLOUT_SUBJECT: &str = "$SYS.REQ.USER.AUTH";

#[derive(Parser, Debug)]
#[command(author, version, about = "NATS auth-callout authorization service", long_about = None)]
struct Args {
    /// The NATS server to connect to
    #[arg(
        long = "nats-url",
        default_value = "nats://127.0.0.1:4222",
        env = "NAUTS_NATS_URL"
    )]
    nats_url: String,

    /// Credentials file for the auth account connection. Mutually
    /// exclusive with `--nats-nkey`
    #[arg(
        id = "creds",
        long = "nats-creds",
        env = "NAUTS_NATS_CREDS",
        conflicts_with = "nkey"
    )]
    nats_creds: Option<PathBuf>,

    /// Nkey seed file for the auth account connection. Mutually exclusive
    /// with `--nats-creds`
    #[arg(
        id = "nkey",
        long = "nats-nkey",
        env = "NAUTS_NATS_NKEY",
        conflicts_with = "creds"
    )]
    nats_nkey: Option<PathBuf>,

    /// Curve key seed file for encrypted callout envelopes
    #[arg(long = "xkey-seed-file", env = "NAUTS_XKEY_SEED_FILE")]
    xkey_seed_file: Option<PathBuf>,

    /// Seed file of the account that issues callout responses
    #[arg(long = "issuer-seed-file", env = "NAUTS_ISSUER_SEED_FILE")]
    issuer_seed_file: PathBuf,

    /// Account names served in static signing mode. Ignored when an
    /// operator accounts file is configured
    #[arg(
        long = "accounts",
        env = "NAUTS_ACCOUNTS",
        value_delimiter = ',',
        default_value = "AUTH"
    )]
    accounts: Vec<String>,

    /// JSON file mapping account names to {public_key, signing_key_path};
    /// switches the service into operator mode
    #[arg(long = "operator-accounts-file", env = "NAUTS_OPERATOR_ACCOUNTS_FILE")]
    operator_accounts_file: Option<PathBuf>,

    /// Issued token lifetime in seconds
    #[arg(long = "token-ttl", default_value_t = 3600, env = "NAUTS_TOKEN_TTL")]
    token_ttl_secs: u64,

    /// Per-request deadline in seconds
    #[arg(
        long = "request-deadline",
        default_value_t = 5,
        env = "NAUTS_REQUEST_DEADLINE"
    )]
    request_deadline_secs: u64,

    /// KV bucket holding policies and bindings. Mutually exclusive with
    /// the static policy files
    #[arg(
        id = "bucket",
        long = "policy-bucket",
        env = "NAUTS_POLICY_BUCKET",
        conflicts_with_all = ["policy_file", "binding_file"]
    )]
    policy_bucket: Option<String>,

    /// Policy cache TTL in seconds for the KV store
    #[arg(
        long = "policy-cache-ttl",
        default_value_t = 30,
        env = "NAUTS_POLICY_CACHE_TTL"
    )]
    policy_cache_ttl_secs: u64,

    /// Static policies JSON file. Requires `--binding-file`
    #[arg(
        id = "policy_file",
        long = "policy-file",
        env = "NAUTS_POLICY_FILE",
        requires = "binding_file"
    )]
    policy_file: Option<PathBuf>,

    /// Static bindings JSON file. Requires `--policy-file`
    #[arg(
        id = "binding_file",
        long = "binding-file",
        env = "NAUTS_BINDING_FILE",
        requires = "policy_file"
    )]
    binding_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();
    let args = Args::parse();

    // ==================== Keys & Accounts ====================

    let issuer = AccountSigner::from_seed_file("issuer", &args.issuer_seed_file)
        .map_err(|e| anyhow!("Failed to load issuer seed: {e}"))?;

    let provider = match &args.operator_accounts_file {
        Some(path) => {
            let raw = std::fs::read(path)
                .with_context(|| format!("Cannot read operator accounts file {path:?}"))?;
            let config: HashMap<String, OperatorAccountConfig> = serde_json::from_slice(&raw)
                .with_context(|| format!("Cannot parse operator accounts file {path:?}"))?;
            log::info!("Operator mode with {} configured accounts", config.len());
            AccountProvider::operator_mode(config)
                .map_err(|e| anyhow!("Invalid operator account table: {e}"))?
        }
        None => {
            log::info!("Static signing mode for accounts: {:?}", args.accounts);
            AccountProvider::static_mode(issuer.clone(), args.accounts.clone())
        }
    };

    let xkey = match &args.xkey_seed_file {
        Some(path) => {
            let seed = std::fs::read_to_string(path)
                .with_context(|| format!("Cannot read xkey seed file {path:?}"))?;
            let xkey = XKey::from_seed(seed.trim())
                .map_err(|e| anyhow!("Invalid xkey seed: {e}"))?;
            log::info!("Callout encryption enabled, public xkey {}", xkey.public_key());
            Some(xkey)
        }
        None => None,
    };

    // ==================== NATS Setup ====================

    let client = connect_nats(&args).await?;
    log::info!("Connected to NATS server at {}", args.nats_url);

    // ==================== Policy Store ====================

    let mut kv_store: Option<Arc<KvPolicyStore>> = None;
    let store: Arc<dyn PolicyStore> = match (&args.policy_bucket, &args.policy_file) {
        (Some(bucket_name), _) => {
            let js = async_nats::jetstream::new(client.clone());
            let bucket = js
                .get_key_value(bucket_name)
                .await
                .with_context(|| format!("Cannot open policy bucket '{bucket_name}'"))?;
            let cache_ttl = Duration::from_secs(args.policy_cache_ttl_secs);
            let store = Arc::new(KvPolicyStore::new(bucket, cache_ttl));
            kv_store = Some(store.clone());
            log::info!("Policy source: KV bucket '{bucket_name}' (cache TTL {cache_ttl:?})");
            store
        }
        (None, Some(policy_file)) => {
            let binding_file = args
                .binding_file
                .as_ref()
                .expect("clap enforces binding_file with policy_file");
            let store = FilePolicyStore::load(policy_file, binding_file)
                .map_err(|e| anyhow!("Failed to load policy files: {e}"))?;
            log::info!("Policy source: static files {policy_file:?} / {binding_file:?}");
            Arc::new(store)
        }
        (None, None) => {
            return Err(anyhow!(
                "No policy source configured; pass --policy-bucket or --policy-file/--binding-file"
            ))
        }
    };

    // ==================== API & Subscriptions ====================

    let api = Arc::new(
        AuthorizationApi::new(store, provider, issuer)
            .with_token_ttl(Duration::from_secs(args.token_ttl_secs))
            .with_request_deadline(Duration::from_secs(args.request_deadline_secs)),
    );
    let service = Arc::new(CalloutService::new(api, xkey));

    let mut callout_sub = client
        .subscribe(AUTH_CALLOUT_SUBJECT)
        .await
        .context("Failed to subscribe to the auth callout subject")?;
    let mut debug_sub = client
        .subscribe(DEBUG_SUBJECT)
        .await
        .context("Failed to subscribe to the debug subject")?;

    log::info!("NAUTS service is running. Waiting for requests...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received shutdown signal");
                break;
            }
            next = callout_sub.next() => match next {
                Some(msg) => {
                    let service = service.clone();
                    let client = client.clone();
                    tokio::spawn(async move {
                        let Some(reply) = msg.reply.clone() else {
                            log::warn!("Auth callout request without a reply subject, dropping");
                            return;
                        };
                        let response = service.handle_callout(&msg).await;
                        if let Err(e) = client.publish(reply, response.into()).await {
                            log::error!("Failed to publish auth callout response: {e}");
                        }
                    });
                }
                None => {
                    log::warn!("Auth callout subscription closed, shutting down");
                    break;
                }
            },
            next = debug_sub.next() => match next {
                Some(msg) => {
                    let service = service.clone();
                    let client = client.clone();
                    tokio::spawn(async move {
                        let Some(reply) = msg.reply.clone() else {
                            return;
                        };
                        let response = service.handle_debug(&msg).await;
                        if let Err(e) = client.publish(reply, response.into()).await {
                            log::error!("Failed to publish debug response: {e}");
                        }
                    });
                }
                None => {
                    log::warn!("Debug subscription closed, shutting down");
                    break;
                }
            },
        }
    }

    // ==================== Shutdown ====================

    if let Some(store) = kv_store {
        store.shutdown().await;
    }
    client.drain().await.context("Failed to drain NATS client")?;
    log::info!("NAUTS service stopped");
    Ok(())
}

async fn connect_nats(args: &Args) -> Result<async_nats::Client> {
    let mut options = async_nats::ConnectOptions::new().name("nauts");

    if let Some(creds) = &args.nats_creds {
        options = options
            .credentials_file(creds)
            .await
            .with_context(|| format!("Cannot read credentials file {creds:?}"))?;
    } else if let Some(nkey) = &args.nats_nkey {
        let seed = std::fs::read_to_string(nkey)
            .with_context(|| format!("Cannot read nkey seed file {nkey:?}"))?;
        options = options.nkey(seed.trim().to_string());
    }

    options
        .connect(&args.nats_url)
        .await
        .context("Unable to connect to NATS")
}
