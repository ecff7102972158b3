use data_encoding::BASE64URL_NOPAD;
use policy_engine::compiler::CompilationResult;
use policy_engine::identity::Identity;
use policy_engine::permissions::Permissions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// Claim type markers per the auth callout protocol.
pub const CLAIM_TYPE_USER: &str = "user";
pub const CLAIM_TYPE_AUTHORIZATION_REQUEST: &str = "authorization_request";
pub const CLAIM_TYPE_AUTHORIZATION_RESPONSE: &str = "authorization_response";
pub const CLAIM_VERSION: u8 = 2;

//////////////////////////
// Generic claim pieces
//////////////////////////

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct ClaimData {
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "iss")]
    pub issuer: String,
    #[serde(default, rename = "aud", skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "exp", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, rename = "jti", skip_serializing_if = "Option::is_none")]
    pub jwt_id: Option<String>,
    #[serde(default, rename = "nbf", skip_serializing_if = "Option::is_none")]
    pub not_before: Option<i64>,
    #[serde(default, rename = "sub")]
    pub subject: String,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct NatsGenericData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(rename = "type")]
    pub claim_type: String,
    pub version: u8,
}

//////////////////////////
// Callout request claim
//////////////////////////

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct AuthorizationRequestClaim {
    #[serde(flatten)]
    pub claim_data: ClaimData,
    #[serde(rename = "nats")]
    pub request: AuthorizationRequest,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct AuthorizationRequest {
    pub server_id: ServerId,
    /// The ephemeral user nkey the issued token must be bound to.
    pub user_nkey: String,
    pub client_info: ClientInfo,
    pub connect_opts: ConnectOptions,
    #[serde(default, rename = "type")]
    pub claim_type: String,
    #[serde(default)]
    pub version: u8,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct ServerId {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    pub id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub cluster: String,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct ClientInfo {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub name_tag: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default, rename = "type")]
    pub client_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct ConnectOptions {
    /// Carries the validated identity token (base64 JSON); the identity
    /// layer has already checked it before the core sees it.
    #[serde(default, rename = "auth_token")]
    pub auth_token: String,
    #[serde(default, rename = "jwt", skip_serializing_if = "Option::is_none")]
    pub user_jwt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<u16>,
}

//////////////////////////
// Callout response claim
//////////////////////////

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct AuthResponseClaim {
    #[serde(flatten)]
    pub claim_data: ClaimData,
    #[serde(rename = "nats")]
    pub response: AuthResponseData,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct AuthResponseData {
    #[serde(flatten)]
    pub generic_data: NatsGenericData,
    #[serde(default, rename = "jwt", skip_serializing_if = "Option::is_none")]
    pub user_jwt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

//////////////////////////
// Issued user claim
//////////////////////////

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct UserClaim {
    #[serde(flatten)]
    pub claim_data: ClaimData,
    #[serde(rename = "nats")]
    pub user_data: UserClaimData,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct UserClaimData {
    /// Set when the claim is issued by a signing key on behalf of the
    /// account (operator mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_account: Option<String>,
    #[serde(flatten)]
    pub permissions: Permissions,
    #[serde(flatten)]
    pub generic_data: NatsGenericData,
}

//////////////////////////
// Identity token
//////////////////////////

#[derive(Error, Debug)]
pub enum IdentityTokenError {
    #[error("identity token is not base64: {0}")]
    Encoding(String),

    #[error("identity token is not valid JSON: {0}")]
    Decoding(#[from] serde_json::Error),

    #[error("identity token carries an empty user id")]
    EmptyUserId,

    #[error("identity token names no target account")]
    EmptyAccount,
}

/// The already-validated identity the identity layer smuggles through
/// `connect_opts.auth_token`, plus the account the connection wants to
/// assume.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct IdentityToken {
    #[serde(flatten)]
    pub identity: Identity,
    pub account: String,
}

impl IdentityToken {
    pub fn from_base64(token: &str) -> Result<Self, IdentityTokenError> {
        let raw = BASE64URL_NOPAD
            .decode(token.trim().as_bytes())
            .map_err(|e| IdentityTokenError::Encoding(e.to_string()))?;
        let parsed: IdentityToken = serde_json::from_slice(&raw)?;
        if parsed.identity.id.is_empty() {
            return Err(IdentityTokenError::EmptyUserId);
        }
        if parsed.account.is_empty() {
            return Err(IdentityTokenError::EmptyAccount);
        }
        Ok(parsed)
    }

    pub fn to_base64(&self) -> Result<String, IdentityTokenError> {
        let raw = serde_json::to_vec(self)?;
        Ok(BASE64URL_NOPAD.encode(&raw))
    }
}

//////////////////////////
// Debug endpoint
//////////////////////////

pub const DEBUG_SUBJECT: &str = "nauts.debug";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DebugRequest {
    pub user: Identity,
    pub account: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DebugResponse {
    pub request: DebugRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compilation_result: Option<DebugCompilation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// The compiler trace an operator sees: what was granted and every
/// warning explaining what was not.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DebugCompilation {
    pub permissions: Permissions,
    pub roles: Vec<String>,
    pub policies: HashMap<String, Vec<String>>,
    pub warnings: Vec<String>,
}

impl From<CompilationResult> for DebugCompilation {
    fn from(result: CompilationResult) -> Self {
        Self {
            permissions: result.permissions.to_wire(),
            roles: result.roles,
            policies: result.policies,
            warnings: result.warnings.iter().map(|w| w.to_string()).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_engine::identity::RoleRef;

    #[test]
    fn identity_tokens_round_trip() {
        let token = IdentityToken {
            identity: Identity {
                id: "alice".to_string(),
                accounts: vec!["APP".to_string()],
                roles: vec![RoleRef {
                    account: "APP".to_string(),
                    name: "user".to_string(),
                }],
                attributes: HashMap::new(),
            },
            account: "APP".to_string(),
        };

        let encoded = token.to_base64().unwrap();
        let decoded = IdentityToken::from_base64(&encoded).unwrap();
        assert_eq!(decoded.identity, token.identity);
        assert_eq!(decoded.account, "APP");
    }

    #[test]
    fn identity_tokens_require_id_and_account() {
        let empty_id = IdentityToken {
            identity: Identity::default(),
            account: "APP".to_string(),
        };
        let encoded = empty_id.to_base64().unwrap();
        assert!(matches!(
            IdentityToken::from_base64(&encoded),
            Err(IdentityTokenError::EmptyUserId)
        ));

        let no_account = IdentityToken {
            identity: Identity {
                id: "alice".to_string(),
                ..Default::default()
            },
            account: String::new(),
        };
        let encoded = no_account.to_base64().unwrap();
        assert!(matches!(
            IdentityToken::from_base64(&encoded),
            Err(IdentityTokenError::EmptyAccount)
        ));
    }

    #[test]
    fn request_claims_deserialize_from_wire_json() {
        let raw = r#"{
            "iat": 1700000000,
            "iss": "ABXYZ",
            "sub": "UABC",
            "nats": {
                "server_id": {"id": "NSRV", "name": "srv", "host": "127.0.0.1", "version": "2.10.22", "cluster": "c1"},
                "user_nkey": "UABC",
                "client_info": {"host": "127.0.0.1", "id": 42, "user": "UABC", "name_tag": "", "kind": "Client", "nonce": "n", "type": "nats"},
                "connect_opts": {"auth_token": "abc", "protocol": 1},
                "type": "authorization_request",
                "version": 2
            }
        }"#;
        let claim: AuthorizationRequestClaim = serde_json::from_str(raw).unwrap();
        assert_eq!(claim.request.user_nkey, "UABC");
        assert_eq!(claim.request.claim_type, CLAIM_TYPE_AUTHORIZATION_REQUEST);
        assert_eq!(claim.request.server_id.id, "NSRV");
        assert_eq!(claim.request.connect_opts.auth_token, "abc");
    }
}
