use crate::accounts::{AccountProvider, AccountSigner, OperatorAccountConfig};
use crate::jwt;
use crate::types::{AuthResponseClaim, DebugRequest, IdentityToken, UserClaim};
use crate::{AuthorizationApi, AuthorizeError, CalloutContext};
use async_trait::async_trait;
use mock_utils::fixtures::{binding, identity, per_user_inbox_policy};
use mock_utils::memory_store::MemoryPolicyStore;
use nkeys::KeyPair;
use policy_engine::model::{Binding, Policy};
use policy_engine::store::{PolicyStore, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn context_for(user: &str, account: &str, role: &str) -> CalloutContext {
    CalloutContext {
        identity_token: IdentityToken {
            identity: identity(user, account, role),
            account: account.to_string(),
        },
        user_nkey: KeyPair::new_user().public_key(),
        server_id: "NTESTSERVER".to_string(),
    }
}

fn static_api(store: MemoryPolicyStore) -> AuthorizationApi {
    let issuer = AccountSigner::new(KeyPair::new_account());
    let provider = AccountProvider::static_mode(issuer.clone(), vec!["APP".to_string()]);
    AuthorizationApi::new(Arc::new(store), provider, issuer)
}

fn app_store() -> MemoryPolicyStore {
    MemoryPolicyStore::new()
        .with_policy(per_user_inbox_policy("APP"))
        .with_binding(binding("APP", "user", &["per-user-inbox"]))
}

#[tokio::test]
async fn issues_a_signed_user_token() {
    let api = static_api(app_store());
    let context = context_for("alice", "APP", "user");

    let response_token = api.handle_authorization(&context).await.unwrap();
    let response: AuthResponseClaim = jwt::decode_jwt(&response_token).unwrap();

    assert_eq!(response.claim_data.issuer, api.issuer_public_key());
    assert_eq!(response.claim_data.subject, context.user_nkey);
    assert_eq!(response.claim_data.audience.as_deref(), Some("NTESTSERVER"));
    assert!(response.response.error.is_none());

    let user_token = response.response.user_jwt.expect("user jwt present");
    let user_claim: UserClaim = jwt::decode_jwt(&user_token).unwrap();
    assert_eq!(user_claim.claim_data.subject, context.user_nkey);
    assert_eq!(user_claim.claim_data.name.as_deref(), Some("alice"));
    assert_eq!(user_claim.user_data.generic_data.claim_type, "user");
    // Static mode: no issuer_account indirection.
    assert!(user_claim.user_data.issuer_account.is_none());

    let subscribe = user_claim
        .user_data
        .permissions
        .subscribe
        .allow
        .expect("subscribe allows");
    assert!(subscribe.contains(&"user.alice.>".to_string()));
    assert!(subscribe.contains(&"_INBOX_alice.>".to_string()));
    let publish = user_claim
        .user_data
        .permissions
        .publish
        .allow
        .expect("publish allows");
    assert!(publish.contains(&"user.alice.>".to_string()));
}

#[tokio::test]
async fn token_ttl_is_configurable() {
    let api = static_api(app_store()).with_token_ttl(Duration::from_secs(120));
    let context = context_for("alice", "APP", "user");

    let response: AuthResponseClaim =
        jwt::decode_jwt(&api.handle_authorization(&context).await.unwrap()).unwrap();
    let user_claim: UserClaim =
        jwt::decode_jwt(&response.response.user_jwt.unwrap()).unwrap();
    let issued_at = user_claim.claim_data.issued_at;
    assert_eq!(user_claim.claim_data.expires_at, Some(issued_at + 120));
}

#[tokio::test]
async fn rejects_cross_account_assumption() {
    let api = static_api(app_store());
    let mut context = context_for("alice", "APP", "user");
    context.identity_token.identity.accounts = vec!["OTHER".to_string()];

    let err = api.handle_authorization(&context).await.unwrap_err();
    assert!(matches!(err, AuthorizeError::UnknownAccount { .. }));
    assert_eq!(err.code(), "UNKNOWN_ACCOUNT");

    // The error response is still a well-formed signed claim.
    let response_token = api.error_response(&context, &err).unwrap();
    let response: AuthResponseClaim = jwt::decode_jwt(&response_token).unwrap();
    assert!(response.response.user_jwt.is_none());
    let error = response.response.error.expect("error present");
    assert!(error.contains("UNKNOWN_ACCOUNT"));
}

#[tokio::test]
async fn rejects_unconfigured_accounts() {
    let store = MemoryPolicyStore::new()
        .with_policy(per_user_inbox_policy("OPS"))
        .with_binding(binding("OPS", "user", &["per-user-inbox"]));
    let api = static_api(store);
    let context = context_for("alice", "OPS", "user");

    let err = api.handle_authorization(&context).await.unwrap_err();
    assert!(matches!(err, AuthorizeError::AccountNotFound { .. }));
}

#[tokio::test]
async fn operator_mode_stamps_the_issuer_account() {
    let account_key = KeyPair::new_account();
    let signing_key = KeyPair::new_account();
    let seed_file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(seed_file.path(), signing_key.seed().unwrap()).unwrap();

    let mut config = HashMap::new();
    config.insert(
        "APP".to_string(),
        OperatorAccountConfig {
            public_key: account_key.public_key(),
            signing_key_path: seed_file.path().to_path_buf(),
        },
    );
    let provider = AccountProvider::operator_mode(config).unwrap();
    let issuer = AccountSigner::new(KeyPair::new_account());
    let api = AuthorizationApi::new(Arc::new(app_store()), provider, issuer);

    let context = context_for("alice", "APP", "user");
    let response: AuthResponseClaim =
        jwt::decode_jwt(&api.handle_authorization(&context).await.unwrap()).unwrap();
    let user_claim: UserClaim =
        jwt::decode_jwt(&response.response.user_jwt.unwrap()).unwrap();

    assert_eq!(
        user_claim.user_data.issuer_account.as_deref(),
        Some(account_key.public_key().as_str())
    );
    // Signed by the per-account signing key, not the callout issuer.
    assert_eq!(user_claim.claim_data.issuer, signing_key.public_key());
}

struct HangingStore;

#[async_trait]
impl PolicyStore for HangingStore {
    async fn get_policy(&self, _account: &str, _id: &str) -> Result<Policy, StoreError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        unreachable!("the request deadline fires first")
    }

    async fn get_binding(&self, _account: &str, _role: &str) -> Result<Binding, StoreError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        unreachable!("the request deadline fires first")
    }

    async fn list_policies(&self, _account: &str) -> Result<Vec<Policy>, StoreError> {
        Ok(vec![])
    }
}

#[tokio::test(start_paused = true)]
async fn deadline_expiry_abandons_the_request() {
    let issuer = AccountSigner::new(KeyPair::new_account());
    let provider = AccountProvider::static_mode(issuer.clone(), vec!["APP".to_string()]);
    let api = AuthorizationApi::new(Arc::new(HangingStore), provider, issuer)
        .with_request_deadline(Duration::from_millis(50));

    let context = context_for("alice", "APP", "user");
    let err = api.handle_authorization(&context).await.unwrap_err();
    assert!(matches!(err, AuthorizeError::DeadlineExceeded));
}

#[tokio::test]
async fn debug_reports_the_full_trace() {
    let store = MemoryPolicyStore::new()
        .with_policy(per_user_inbox_policy("APP"))
        .with_binding(binding("APP", "user", &["per-user-inbox", "missing"]));
    let api = static_api(store);

    let response = api
        .handle_debug(DebugRequest {
            user: identity("alice", "APP", "user"),
            account: "APP".to_string(),
        })
        .await;

    assert!(response.error.is_none());
    let compilation = response.compilation_result.expect("compilation result");
    assert_eq!(compilation.roles, vec!["user".to_string()]);
    assert_eq!(
        compilation.policies.get("user"),
        Some(&vec!["per-user-inbox".to_string()])
    );
    assert_eq!(compilation.warnings.len(), 1);
    assert!(compilation.warnings[0].contains("missing"));
    assert!(compilation
        .permissions
        .subscribe
        .allow
        .unwrap()
        .contains(&"_INBOX_alice.>".to_string()));
}

#[tokio::test]
async fn debug_surfaces_store_failures_as_typed_errors() {
    let mut store = MemoryPolicyStore::new();
    store.add_binding(binding("APP", "user", &["per-user-inbox"]));
    store.fail_binding("APP", "user");
    let api = static_api(store);

    let response = api
        .handle_debug(DebugRequest {
            user: identity("alice", "APP", "user"),
            account: "APP".to_string(),
        })
        .await;

    assert!(response.compilation_result.is_none());
    let error = response.error.expect("error body");
    assert_eq!(error.code, "POLICY_FETCH_ERROR");
}
