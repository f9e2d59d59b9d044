//! Credential resolution.
//!
//! Two named entries are read from a secret store once at startup:
//!
//! - the photo API key (a string), default name `pexel-api-key`
//! - the object storage credential block (a JSON object), default name `jbtest`
//!
//! The resolved [`Credentials`] are handed to the pipeline explicitly. Secret values never appear in
//! logs or `Debug` output.
//!
//! ## Stores
//!
//! - [`EnvSecretStore`]: entry `pexel-api-key` is read from `<prefix>PEXEL_API_KEY`. Values that
//!   parse as a JSON object are returned as objects, anything else as a string.
//! - [`FileSecretStore`]: a JSON document mapping entry names to values.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{SecretStoreConfig, SecretsConfig};
use crate::errors::{Error, Result};

/// A named-entry secret store.
pub trait SecretStore: Send + Sync {
    /// Short store label for error messages
    fn kind(&self) -> &'static str;

    fn get(&self, name: &str) -> Result<Value>;
}

/// Reads secrets from environment variables.
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// `pexel-api-key` -> `<prefix>PEXEL_API_KEY`
    pub fn var_name(&self, name: &str) -> String {
        let suffix: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}{}", self.prefix, suffix)
    }
}

impl SecretStore for EnvSecretStore {
    fn kind(&self) -> &'static str {
        "env"
    }

    fn get(&self, name: &str) -> Result<Value> {
        let var = self.var_name(name);
        let raw = std::env::var(&var).map_err(|e| match e {
            std::env::VarError::NotPresent => Error::MissingSecret {
                name: name.to_string(),
                store: self.kind(),
            },
            std::env::VarError::NotUnicode(_) => Error::InvalidSecret {
                name: name.to_string(),
                reason: format!("{var} is not valid UTF-8"),
            },
        })?;
        debug!(secret = name, var = %var, "Read secret from environment");

        match serde_json::from_str::<Value>(&raw) {
            Ok(value @ Value::Object(_)) => Ok(value),
            _ => Ok(Value::String(raw)),
        }
    }
}

/// Reads secrets from a JSON file mapping entry names to values.
pub struct FileSecretStore {
    entries: HashMap<String, Value>,
}

impl FileSecretStore {
    pub fn open(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("Cannot read secrets file {}: {}", path.display(), e),
        })?;
        let entries = serde_json::from_str(&contents).map_err(|e| Error::Config {
            message: format!("Secrets file {} is not a JSON object of named entries: {}", path.display(), e),
        })?;
        Ok(Self { entries })
    }

    pub fn from_entries(entries: HashMap<String, Value>) -> Self {
        Self { entries }
    }
}

impl SecretStore for FileSecretStore {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn get(&self, name: &str) -> Result<Value> {
        self.entries.get(name).cloned().ok_or_else(|| Error::MissingSecret {
            name: name.to_string(),
            store: self.kind(),
        })
    }
}

/// Open the configured secret store
pub fn open_store(config: &SecretStoreConfig) -> Result<Box<dyn SecretStore>> {
    match config {
        SecretStoreConfig::Env { prefix } => Ok(Box::new(EnvSecretStore::new(prefix.clone()))),
        SecretStoreConfig::File { path } => Ok(Box::new(FileSecretStore::open(path)?)),
    }
}

/// Object storage credential block.
///
/// Field names follow the AWS credentials block layout. When no explicit key pair is given the
/// AWS default provider chain is used, optionally with `profile_name`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageCredentials {
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_session_token: Option<String>,
    pub profile_name: Option<String>,
    pub region_name: Option<String>,
    pub aws_client_parameters: ClientParameters,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientParameters {
    /// Custom endpoint for S3-compatible stores (MinIO, R2, ...)
    pub endpoint_url: Option<String>,
}

impl StorageCredentials {
    /// Explicit key pair, if configured
    pub fn static_keys(&self) -> Option<(&str, &str)> {
        match (&self.aws_access_key_id, &self.aws_secret_access_key) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("aws_secret_access_key", &self.aws_secret_access_key.as_ref().map(|_| "<redacted>"))
            .field("aws_session_token", &self.aws_session_token.as_ref().map(|_| "<redacted>"))
            .field("profile_name", &self.profile_name)
            .field("region_name", &self.region_name)
            .field("aws_client_parameters", &self.aws_client_parameters)
            .finish()
    }
}

/// Everything the pipeline needs from the secret store.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub storage: StorageCredentials,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("storage", &self.storage)
            .finish()
    }
}

/// Resolve the API key and the storage credential block from `store`.
pub fn resolve_credentials(store: &dyn SecretStore, config: &SecretsConfig) -> Result<Credentials> {
    let api_key = match store.get(&config.api_key_name)? {
        Value::String(key) if !key.trim().is_empty() => key.trim().to_string(),
        Value::String(_) => {
            return Err(Error::InvalidSecret {
                name: config.api_key_name.clone(),
                reason: "value is empty".to_string(),
            });
        }
        _ => {
            return Err(Error::InvalidSecret {
                name: config.api_key_name.clone(),
                reason: "expected a string".to_string(),
            });
        }
    };

    let block = match store.get(&config.storage_credentials_name)? {
        // A string entry may itself hold the JSON block
        Value::String(raw) => serde_json::from_str(&raw).map_err(|e| Error::InvalidSecret {
            name: config.storage_credentials_name.clone(),
            reason: format!("not a JSON credential block: {e}"),
        })?,
        value => value,
    };
    let storage: StorageCredentials = serde_json::from_value(block).map_err(|e| Error::InvalidSecret {
        name: config.storage_credentials_name.clone(),
        reason: e.to_string(),
    })?;

    if storage.aws_access_key_id.is_some() != storage.aws_secret_access_key.is_some() {
        return Err(Error::InvalidSecret {
            name: config.storage_credentials_name.clone(),
            reason: "aws_access_key_id and aws_secret_access_key must be set together".to_string(),
        });
    }

    info!(
        store = store.kind(),
        static_keys = storage.static_keys().is_some(),
        region = ?storage.region_name,
        "Resolved credentials"
    );

    Ok(Credentials { api_key, storage })
}
