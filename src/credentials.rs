//! Bearer credentials for the remote service.
//!
//! A pool is read from a JSON file mapping an account id to either a bare
//! token string or an object with a `token` field:
//!
//! ```json
//! {
//!   "alice@example.com": { "token": "eyJ...", "expires_at": "..." },
//!   "bob": "eyJ..."
//! }
//! ```
//!
//! Extra fields are ignored. Pool maintenance (login, renewal, expiry) is out
//! of scope here; the pool is only read and sampled.

use rand::seq::IndexedRandom;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// One account's bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub account: String,
    pub token: String,
}

impl Credential {
    pub fn new(account: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("account", &self.account)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Failure to read a credential pool.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("cannot read credential file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("credential file '{path}' is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("credential file '{path}' must be a JSON object of account → token")]
    Shape { path: String },

    #[error("credential file '{path}' contains no usable tokens")]
    Empty { path: String },
}

/// Read-only pool of credentials, sorted by account id.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    credentials: Vec<Credential>,
}

impl CredentialStore {
    /// A pool holding one token.
    pub fn single(token: impl Into<String>) -> Self {
        Self {
            credentials: vec![Credential::new("default", token)],
        }
    }

    /// Load a pool from a JSON credential file.
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        let shown = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| CredentialError::Read {
            path: shown.clone(),
            source,
        })?;
        let store = Self::from_json(&text).map_err(|e| match e {
            ParseFailure::Json(source) => CredentialError::Parse {
                path: shown.clone(),
                source,
            },
            ParseFailure::Shape => CredentialError::Shape {
                path: shown.clone(),
            },
        })?;
        if store.is_empty() {
            return Err(CredentialError::Empty { path: shown });
        }
        debug!("Loaded {} credential(s) from {}", store.len(), shown);
        Ok(store)
    }

    fn from_json(text: &str) -> Result<Self, ParseFailure> {
        let value: Value = serde_json::from_str(text).map_err(ParseFailure::Json)?;
        let map = value.as_object().ok_or(ParseFailure::Shape)?;

        let mut credentials = Vec::with_capacity(map.len());
        for (account, entry) in map {
            let token = match entry {
                Value::String(s) => Some(s.as_str()),
                Value::Object(o) => o.get("token").and_then(Value::as_str),
                _ => None,
            };
            match token.map(str::trim).filter(|t| !t.is_empty()) {
                Some(t) => credentials.push(Credential::new(account.clone(), t)),
                None => warn!("Skipping account '{}': no token", account),
            }
        }
        credentials.sort_by(|a, b| a.account.cmp(&b.account));
        Ok(Self { credentials })
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[derive(Debug)]
enum ParseFailure {
    Json(serde_json::Error),
    Shape,
}

/// Pick one credential uniformly at random.
///
/// Stateless: every call is an independent draw, so callers may share a pool
/// across tasks without coordination. Returns `None` for an empty pool.
pub fn pick_credential(pool: &[Credential]) -> Option<&Credential> {
    pool.choose(&mut rand::rng())
}
