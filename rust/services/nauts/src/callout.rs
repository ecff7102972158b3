use async_nats::{HeaderMap, Message};
use authorization::types::{
    AuthorizationRequestClaim, DebugRequest, IdentityToken, CLAIM_TYPE_AUTHORIZATION_REQUEST,
};
use authorization::{jwt, AuthorizationApi, CalloutContext};
use nkeys::XKey;
use std::sync::Arc;

/// Header the NATS server uses to advertise its curve key when callout
/// payloads are encrypted.
const SERVER_XKEY_HEADER: &str = "Nats-Server-Xkey";

/// Message-level glue between NATS subscriptions and the authorization
/// API: unseal, decode, authorize, seal the reply.
pub struct CalloutService {
    api: Arc<AuthorizationApi>,
    xkey: Option<XKey>,
}

impl CalloutService {
    pub fn new(api: Arc<AuthorizationApi>, xkey: Option<XKey>) -> Self {
        Self { api, xkey }
    }

    /// Produce the response payload for one auth-callout request. Always
    /// returns something to publish; an empty payload tells the server to
    /// fail the connection when not even an error claim could be built.
    pub async fn handle_callout(&self, msg: &Message) -> Vec<u8> {
        let server_xkey = header_value(&msg.headers, SERVER_XKEY_HEADER);

        let payload = match self.unseal(&msg.payload, server_xkey.as_deref()) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Failed to unseal auth callout payload: {e}");
                return vec![];
            }
        };

        let context = match decode_context(&payload) {
            Ok(context) => context,
            Err(e) => {
                log::error!("Failed to decode auth callout request: {e}");
                return vec![];
            }
        };

        let response = match self.api.handle_authorization(&context).await {
            Ok(token) => token,
            Err(e) => match self.api.error_response(&context, &e) {
                Ok(token) => token,
                Err(e) => {
                    log::error!("Failed to sign auth callout error response: {e}");
                    return vec![];
                }
            },
        };

        match self.seal(response.into_bytes(), server_xkey.as_deref()) {
            Ok(sealed) => sealed,
            Err(e) => {
                log::error!("Failed to seal auth callout response: {e}");
                vec![]
            }
        }
    }

    pub async fn handle_debug(&self, msg: &Message) -> Vec<u8> {
        let request: DebugRequest = match serde_json::from_slice(&msg.payload) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Malformed debug request: {e}");
                let body = serde_json::json!({
                    "error": { "code": "BAD_REQUEST", "message": e.to_string() }
                });
                return serde_json::to_vec(&body).unwrap_or_default();
            }
        };

        let response = self.api.handle_debug(request).await;
        serde_json::to_vec(&response).unwrap_or_else(|e| {
            log::error!("Failed to serialize debug response: {e}");
            vec![]
        })
    }

    fn unseal(&self, payload: &[u8], server_xkey: Option<&str>) -> Result<Vec<u8>, String> {
        match (&self.xkey, server_xkey) {
            (Some(xkey), Some(sender)) => {
                let sender = XKey::from_public_key(sender).map_err(|e| e.to_string())?;
                xkey.open(payload, &sender).map_err(|e| e.to_string())
            }
            (Some(_), None) => Ok(payload.to_vec()),
            (None, Some(_)) => {
                Err("server sent an encrypted request but no xkey seed is configured".to_string())
            }
            (None, None) => Ok(payload.to_vec()),
        }
    }

    fn seal(&self, payload: Vec<u8>, server_xkey: Option<&str>) -> Result<Vec<u8>, String> {
        match (&self.xkey, server_xkey) {
            (Some(xkey), Some(recipient)) => {
                let recipient = XKey::from_public_key(recipient).map_err(|e| e.to_string())?;
                xkey.seal(&payload, &recipient).map_err(|e| e.to_string())
            }
            _ => Ok(payload),
        }
    }
}

fn header_value(headers: &Option<HeaderMap>, name: &str) -> Option<String> {
    headers
        .as_ref()
        .and_then(|h| h.get(name))
        .map(|v| v.as_str().to_string())
}

/// Decode the request claim and pull out the validated identity token.
/// The claim signature is checked against its embedded issuer; identity
/// verification itself happened upstream.
fn decode_context(payload: &[u8]) -> Result<CalloutContext, String> {
    let token = std::str::from_utf8(payload).map_err(|e| e.to_string())?;
    let claim: AuthorizationRequestClaim = jwt::decode_jwt(token).map_err(|e| e.to_string())?;

    if claim.request.claim_type != CLAIM_TYPE_AUTHORIZATION_REQUEST {
        return Err(format!(
            "unexpected claim type '{}'",
            claim.request.claim_type
        ));
    }

    let identity_token = IdentityToken::from_base64(&claim.request.connect_opts.auth_token)
        .map_err(|e| e.to_string())?;

    Ok(CalloutContext {
        identity_token,
        user_nkey: claim.request.user_nkey,
        server_id: claim.request.server_id.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use authorization::types::{
        AuthorizationRequest, ClaimData, ConnectOptions, ServerId, CLAIM_VERSION,
    };
    use nkeys::KeyPair;
    use policy_engine::identity::{Identity, RoleRef};

    fn request_claim_token(auth_token: &str) -> String {
        let server_key = KeyPair::new_server();
        let claim = AuthorizationRequestClaim {
            claim_data: ClaimData {
                issued_at: 1_700_000_000,
                issuer: server_key.public_key(),
                subject: "UUSER".to_string(),
                ..Default::default()
            },
            request: AuthorizationRequest {
                server_id: ServerId {
                    id: "NSRV".to_string(),
                    ..Default::default()
                },
                user_nkey: "UUSER".to_string(),
                client_info: Default::default(),
                connect_opts: ConnectOptions {
                    auth_token: auth_token.to_string(),
                    ..Default::default()
                },
                claim_type: CLAIM_TYPE_AUTHORIZATION_REQUEST.to_string(),
                version: CLAIM_VERSION,
            },
        };
        jwt::encode_jwt(&claim, &server_key).unwrap()
    }

    #[test]
    fn decodes_a_full_request_envelope() {
        let identity_token = IdentityToken {
            identity: Identity {
                id: "alice".to_string(),
                accounts: vec!["APP".to_string()],
                roles: vec![RoleRef {
                    account: "APP".to_string(),
                    name: "user".to_string(),
                }],
                attributes: Default::default(),
            },
            account: "APP".to_string(),
        };
        let token = request_claim_token(&identity_token.to_base64().unwrap());

        let context = decode_context(token.as_bytes()).unwrap();
        assert_eq!(context.user_nkey, "UUSER");
        assert_eq!(context.server_id, "NSRV");
        assert_eq!(context.identity_token.identity.id, "alice");
        assert_eq!(context.identity_token.account, "APP");
    }

    #[test]
    fn rejects_garbage_payloads() {
        assert!(decode_context(b"not a jwt").is_err());
        assert!(decode_context(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn rejects_missing_identity_tokens() {
        let token = request_claim_token("");
        assert!(decode_context(token.as_bytes()).is_err());
    }

    mod end_to_end {
        use super::*;
        use authorization::accounts::{AccountProvider, AccountSigner};
        use authorization::types::AuthResponseClaim;
        use mock_utils::fixtures::{binding, per_user_inbox_policy};
        use mock_utils::memory_store::MemoryPolicyStore;
        use mock_utils::nats_message::NatsMessage;

        fn test_api() -> Arc<AuthorizationApi> {
            let store = MemoryPolicyStore::new()
                .with_policy(per_user_inbox_policy("APP"))
                .with_binding(binding("APP", "user", &["per-user-inbox"]));
            let issuer = AccountSigner::new(KeyPair::new_account());
            let provider = AccountProvider::static_mode(issuer.clone(), vec!["APP".to_string()]);
            Arc::new(AuthorizationApi::new(Arc::new(store), provider, issuer))
        }

        fn alice_token() -> IdentityToken {
            IdentityToken {
                identity: Identity {
                    id: "alice".to_string(),
                    accounts: vec!["APP".to_string()],
                    roles: vec![RoleRef {
                        account: "APP".to_string(),
                        name: "user".to_string(),
                    }],
                    attributes: Default::default(),
                },
                account: "APP".to_string(),
            }
        }

        #[tokio::test]
        async fn answers_plaintext_callouts() {
            let service = CalloutService::new(test_api(), None);
            let token = request_claim_token(&alice_token().to_base64().unwrap());
            let msg = NatsMessage::new("$SYS.REQ.USER.AUTH", token.into_bytes()).into_message();

            let response = service.handle_callout(&msg).await;
            let claim: AuthResponseClaim =
                jwt::decode_jwt(std::str::from_utf8(&response).unwrap()).unwrap();
            assert!(claim.response.error.is_none());
            assert!(claim.response.user_jwt.is_some());
        }

        #[tokio::test]
        async fn answers_sealed_callouts() {
            let service_xkey = XKey::new();
            let seed = service_xkey.seed().unwrap();
            let server_xkey = XKey::new();

            let service = CalloutService::new(test_api(), Some(XKey::from_seed(&seed).unwrap()));
            let token = request_claim_token(&alice_token().to_base64().unwrap());
            let sealed = server_xkey
                .seal(token.as_bytes(), &service_xkey)
                .unwrap();
            let msg = NatsMessage::new("$SYS.REQ.USER.AUTH", sealed)
                .with_header("Nats-Server-Xkey", &server_xkey.public_key())
                .into_message();

            let response = service.handle_callout(&msg).await;
            let opened = server_xkey.open(&response, &service_xkey).unwrap();
            let claim: AuthResponseClaim =
                jwt::decode_jwt(std::str::from_utf8(&opened).unwrap()).unwrap();
            assert!(claim.response.user_jwt.is_some());
        }

        #[tokio::test]
        async fn cross_account_requests_get_an_error_claim() {
            let service = CalloutService::new(test_api(), None);
            let mut identity_token = alice_token();
            identity_token.account = "OTHER".to_string();
            let token = request_claim_token(&identity_token.to_base64().unwrap());
            let msg = NatsMessage::new("$SYS.REQ.USER.AUTH", token.into_bytes()).into_message();

            let response = service.handle_callout(&msg).await;
            let claim: AuthResponseClaim =
                jwt::decode_jwt(std::str::from_utf8(&response).unwrap()).unwrap();
            assert!(claim.response.user_jwt.is_none());
            assert!(claim
                .response
                .error
                .expect("error present")
                .contains("UNKNOWN_ACCOUNT"));
        }

        #[tokio::test]
        async fn debug_requests_round_trip() {
            let service = CalloutService::new(test_api(), None);
            let request = serde_json::json!({
                "user": {
                    "id": "alice",
                    "roles": [{"account": "APP", "name": "user"}]
                },
                "account": "APP"
            });
            let msg =
                NatsMessage::new("nauts.debug", serde_json::to_vec(&request).unwrap())
                    .into_message();

            let response = service.handle_debug(&msg).await;
            let body: serde_json::Value = serde_json::from_slice(&response).unwrap();
            assert!(body.get("compilation_result").is_some());
            assert_eq!(body["request"]["account"], "APP");
        }
    }
}
