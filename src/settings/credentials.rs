use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

use super::dotenv::load_dotenv_map;

/// Bearer token for an inference backend. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Missing configuration: {name} is not set")]
    Missing { name: String },
}

/// Resolves credentials by environment variable name on every call, so a token
/// added after startup is picked up by the next request.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    read_process_env: bool,
    dotenv_path: Option<PathBuf>,
    fixed: HashMap<String, Credential>,
}

impl CredentialStore {
    pub fn from_env_and_dotenv(dotenv_path: impl Into<PathBuf>) -> Self {
        Self {
            read_process_env: true,
            dotenv_path: Some(dotenv_path.into()),
            fixed: HashMap::new(),
        }
    }

    /// A store that only knows the given pairs; the process environment is ignored.
    pub fn fixed<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            read_process_env: false,
            dotenv_path: None,
            fixed: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), Credential::new(v)))
                .collect(),
        }
    }

    pub fn resolve(&self, name: &str) -> Result<Credential, CredentialError> {
        if let Some(credential) = self
            .fixed
            .get(name)
            .filter(|c| !c.expose().trim().is_empty())
        {
            return Ok(credential.clone());
        }
        if self.read_process_env {
            if let Some(value) = std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
            {
                return Ok(Credential::new(value));
            }
        }
        if let Some(path) = self.dotenv_path.as_deref() {
            match load_dotenv_map(path) {
                Ok(map) => {
                    if let Some(value) = map
                        .get(name)
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty())
                    {
                        return Ok(Credential::new(value));
                    }
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "could not read dotenv file");
                }
            }
        }
        Err(CredentialError::Missing {
            name: name.to_string(),
        })
    }
}
