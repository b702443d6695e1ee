use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lendline_cache::RetryPolicy;
use lendline_types::Address;

use crate::error::{SdkError, SdkResult};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long a caller waits for finality before the outcome is reported
    /// as unknown.
    pub finality_timeout_ms: u64,
    /// Backoff for ledger reads during reconciliation.
    pub reconcile_retry: RetryPolicy,
    /// Where the last connected identity is remembered, if anywhere.
    pub identity_store: Option<PathBuf>,
    pub ledger: LedgerEndpoint,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            finality_timeout_ms: 60_000,
            reconcile_retry: RetryPolicy::default(),
            identity_store: None,
            ledger: LedgerEndpoint::default(),
        }
    }
}

/// Which deployed lending ledger the client talks to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerEndpoint {
    pub name: String,
    pub contract: Option<Address>,
}

impl Default for LedgerEndpoint {
    fn default() -> Self {
        Self {
            name: "local".into(),
            contract: None,
        }
    }
}

impl ClientConfig {
    pub fn finality_timeout(&self) -> Duration {
        Duration::from_millis(self.finality_timeout_ms)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: impl AsRef<Path>) -> SdkResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|e| SdkError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
