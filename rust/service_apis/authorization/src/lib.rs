/*
Service API: AUTHORIZATION

Turns a validated identity plus target account into a signed auth-callout
response:
    - membership check against the identity's accounts
    - signing-account lookup via the account provider
    - policy compilation (policy_engine::compiler)
    - user token build + sign under the target account's signer
    - response claim signed under the callout issuer account

Also serves the read-only debug endpoint that returns the compiled
permissions and the full policy trace for a synthetic identity.

Every failure maps to an error response claim; nothing here panics and
key material never reaches the logs.
*/

pub mod accounts;
pub mod jwt;
pub mod types;

use accounts::{Account, AccountProvider, AccountSigner};
use policy_engine::compiler::{self, CompileError};
use policy_engine::permissions::Permissions;
use policy_engine::store::PolicyStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use types::{
    AuthResponseClaim, AuthResponseData, ClaimData, DebugRequest, DebugResponse, ErrorBody,
    IdentityToken, NatsGenericData, UserClaim, UserClaimData, CLAIM_TYPE_AUTHORIZATION_RESPONSE,
    CLAIM_TYPE_USER, CLAIM_VERSION,
};

pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum AuthorizeError {
    #[error("identity '{identity}' may not assume account '{account}'")]
    UnknownAccount { identity: String, account: String },

    #[error("account '{account}' is not configured: {reason}")]
    AccountNotFound { account: String, reason: String },

    #[error("policy compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl AuthorizeError {
    /// Stable machine-readable code, surfaced verbatim by the debug
    /// endpoint and carried in error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownAccount { .. } => "UNKNOWN_ACCOUNT",
            Self::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
            Self::Compile(_) => "POLICY_FETCH_ERROR",
            Self::Signing(_) => "SIGNING_ERROR",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
        }
    }
}

/// Everything the handler needs from one callout envelope, extracted and
/// validated by the transport layer.
#[derive(Debug, Clone)]
pub struct CalloutContext {
    pub identity_token: IdentityToken,
    /// Subject the issued user token is bound to.
    pub user_nkey: String,
    /// Audience of the response claim.
    pub server_id: String,
}

/// Process-wide handler state: the policy store, the account provider and
/// the callout issuer key. Stateless per request.
pub struct AuthorizationApi {
    store: Arc<dyn PolicyStore>,
    provider: AccountProvider,
    issuer: AccountSigner,
    token_ttl: Duration,
    request_deadline: Duration,
}

impl AuthorizationApi {
    pub fn new(store: Arc<dyn PolicyStore>, provider: AccountProvider, issuer: AccountSigner) -> Self {
        Self {
            store,
            provider,
            issuer,
            token_ttl: DEFAULT_TOKEN_TTL,
            request_deadline: DEFAULT_REQUEST_DEADLINE,
        }
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = deadline;
        self
    }

    pub fn issuer_public_key(&self) -> String {
        self.issuer.public_key()
    }

    /// Authorize one callout request under the request deadline and
    /// return the signed response claim carrying the user token.
    pub async fn handle_authorization(
        &self,
        context: &CalloutContext,
    ) -> Result<String, AuthorizeError> {
        match tokio::time::timeout(self.request_deadline, self.authorize(context)).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!(
                    "Authorization for user '{}' in account '{}' exceeded the {:?} deadline",
                    context.identity_token.identity.id,
                    context.identity_token.account,
                    self.request_deadline
                );
                Err(AuthorizeError::DeadlineExceeded)
            }
        }
    }

    async fn authorize(&self, context: &CalloutContext) -> Result<String, AuthorizeError> {
        let identity = &context.identity_token.identity;
        let account_name = &context.identity_token.account;

        if !identity.may_assume(account_name) {
            return Err(AuthorizeError::UnknownAccount {
                identity: identity.id.clone(),
                account: account_name.clone(),
            });
        }

        let account =
            self.provider
                .get_account(account_name)
                .map_err(|e| AuthorizeError::AccountNotFound {
                    account: account_name.clone(),
                    reason: e.to_string(),
                })?;

        let compiled = compiler::compile(identity, account_name, self.store.as_ref()).await?;
        for warning in &compiled.warnings {
            log::debug!(
                "Compilation warning for user '{}' in account '{account_name}': {warning}",
                identity.id
            );
        }

        let user_jwt = self.issue_user_token(context, &account, compiled.permissions.to_wire())?;
        self.sign_response(context, Some(user_jwt), None)
    }

    /// Build the response claim for a failed authorization. The NATS
    /// server relays the error; the client sees an authorization
    /// violation.
    pub fn error_response(
        &self,
        context: &CalloutContext,
        error: &AuthorizeError,
    ) -> Result<String, AuthorizeError> {
        log::info!(
            "Rejecting authorization for user '{}' in account '{}': {error}",
            context.identity_token.identity.id,
            context.identity_token.account,
        );
        self.sign_response(context, None, Some(format!("{}: {error}", error.code())))
    }

    fn issue_user_token(
        &self,
        context: &CalloutContext,
        account: &Account,
        permissions: Permissions,
    ) -> Result<String, AuthorizeError> {
        let now = chrono::Utc::now().timestamp();
        let claim = UserClaim {
            claim_data: ClaimData {
                issued_at: now,
                issuer: account.signer.public_key(),
                subject: context.user_nkey.clone(),
                name: Some(context.identity_token.identity.id.clone()),
                expires_at: Some(now + self.token_ttl.as_secs() as i64),
                ..Default::default()
            },
            user_data: UserClaimData {
                issuer_account: self
                    .provider
                    .is_operator_mode()
                    .then(|| account.public_key.clone()),
                permissions,
                generic_data: NatsGenericData {
                    tags: vec![],
                    claim_type: CLAIM_TYPE_USER.to_string(),
                    version: CLAIM_VERSION,
                },
            },
        };

        jwt::encode_jwt(&claim, account.signer.keypair())
            .map_err(|e| AuthorizeError::Signing(e.to_string()))
    }

    fn sign_response(
        &self,
        context: &CalloutContext,
        user_jwt: Option<String>,
        error: Option<String>,
    ) -> Result<String, AuthorizeError> {
        let claim = AuthResponseClaim {
            claim_data: ClaimData {
                issued_at: chrono::Utc::now().timestamp(),
                issuer: self.issuer.public_key(),
                subject: context.user_nkey.clone(),
                audience: Some(context.server_id.clone()),
                ..Default::default()
            },
            response: AuthResponseData {
                generic_data: NatsGenericData {
                    tags: vec![],
                    claim_type: CLAIM_TYPE_AUTHORIZATION_RESPONSE.to_string(),
                    version: CLAIM_VERSION,
                },
                user_jwt,
                issuer_account: None,
                error,
            },
        };

        jwt::encode_jwt(&claim, self.issuer.keypair())
            .map_err(|e| AuthorizeError::Signing(e.to_string()))
    }

    /// The debug endpoint: compile for a synthetic identity and report the
    /// full trace. Read-only; no membership check and no token is issued.
    pub async fn handle_debug(&self, request: DebugRequest) -> DebugResponse {
        match compiler::compile(&request.user, &request.account, self.store.as_ref()).await {
            Ok(result) => DebugResponse {
                compilation_result: Some(result.into()),
                error: None,
                request,
            },
            Err(e) => {
                let error = AuthorizeError::from(e);
                DebugResponse {
                    compilation_result: None,
                    error: Some(ErrorBody {
                        code: error.code().to_string(),
                        message: error.to_string(),
                    }),
                    request,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
