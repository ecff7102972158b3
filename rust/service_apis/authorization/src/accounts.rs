use nkeys::KeyPair;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("account '{name}' is not configured")]
    AccountNotFound { name: String },

    #[error("invalid key material for account '{name}': {reason}")]
    InvalidKey { name: String, reason: String },

    #[error("failed to read signing key '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("signing failed: {0}")]
    Signing(String),
}

/// Thread-safe handle to an account signing key. `nkeys::KeyPair` does not
/// hand out mutable state, so sharing it behind an `Arc` is sound; this
/// wrapper is the only place the rest of the code touches key material.
#[derive(Clone)]
pub struct AccountSigner {
    keypair: Arc<KeyPair>,
}

impl std::fmt::Debug for AccountSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material never reaches logs; the public key is enough to
        // identify the signer.
        f.debug_struct("AccountSigner")
            .field("public_key", &self.keypair.public_key())
            .finish()
    }
}

impl AccountSigner {
    pub fn new(keypair: KeyPair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn from_seed(name: &str, seed: &str) -> Result<Self, AccountError> {
        let keypair = KeyPair::from_seed(seed.trim()).map_err(|e| AccountError::InvalidKey {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(keypair))
    }

    pub fn from_seed_file(name: &str, path: &Path) -> Result<Self, AccountError> {
        let seed = std::fs::read_to_string(path).map_err(|source| AccountError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_seed(name, &seed)
    }

    pub fn public_key(&self) -> String {
        self.keypair.public_key()
    }

    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, AccountError> {
        self.keypair
            .sign(payload)
            .map_err(|e| AccountError::Signing(e.to_string()))
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }
}

/// The signing identity for one target NATS account.
#[derive(Debug, Clone)]
pub struct Account {
    pub name: String,
    pub public_key: String,
    pub signer: AccountSigner,
}

/// One entry of the operator-mode account table as it appears in the
/// configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorAccountConfig {
    pub public_key: String,
    pub signing_key_path: PathBuf,
}

/// Where signing identities come from. The set of variants is closed by
/// design; dispatch is static after construction.
#[derive(Debug)]
pub enum AccountProvider {
    /// One signing key reused across a declared list of account names.
    Static {
        signer: AccountSigner,
        accounts: Vec<String>,
    },
    /// A per-account table of public keys and eagerly loaded signing
    /// keys. Tokens issued in this mode must carry an `issuer_account`
    /// claim.
    Operator { accounts: HashMap<String, Account> },
}

impl AccountProvider {
    pub fn static_mode(signer: AccountSigner, accounts: Vec<String>) -> Self {
        Self::Static { signer, accounts }
    }

    /// Build the operator table, loading and validating every signing key
    /// up front so a bad entry fails at startup rather than on the first
    /// request for that account.
    pub fn operator_mode(
        config: HashMap<String, OperatorAccountConfig>,
    ) -> Result<Self, AccountError> {
        let mut accounts = HashMap::with_capacity(config.len());
        for (name, entry) in config {
            KeyPair::from_public_key(&entry.public_key).map_err(|e| AccountError::InvalidKey {
                name: name.clone(),
                reason: format!("public key: {e}"),
            })?;
            let signer = AccountSigner::from_seed_file(&name, &entry.signing_key_path)?;
            accounts.insert(
                name.clone(),
                Account {
                    name,
                    public_key: entry.public_key,
                    signer,
                },
            );
        }
        Ok(Self::Operator { accounts })
    }

    pub fn is_operator_mode(&self) -> bool {
        matches!(self, Self::Operator { .. })
    }

    pub fn get_account(&self, name: &str) -> Result<Account, AccountError> {
        match self {
            Self::Static { signer, accounts } => {
                if !accounts.iter().any(|a| a == name) {
                    return Err(AccountError::AccountNotFound {
                        name: name.to_string(),
                    });
                }
                Ok(Account {
                    name: name.to_string(),
                    public_key: signer.public_key(),
                    signer: signer.clone(),
                })
            }
            Self::Operator { accounts } => {
                accounts
                    .get(name)
                    .cloned()
                    .ok_or_else(|| AccountError::AccountNotFound {
                        name: name.to_string(),
                    })
            }
        }
    }
}
