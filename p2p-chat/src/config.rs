//! Saved partner identity.
//!
//! The record is a small JSON object (`partner_name`, `partner_ip`) that is
//! read at startup and rewritten in full after a successful connection.

use std::{io, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_FILE: &str = "chat_config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerIdentity {
    #[serde(rename = "partner_name")]
    pub name: String,
    #[serde(rename = "partner_ip")]
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The stored record already matched; nothing was written.
    Unchanged,
    Written,
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads the saved partner, treating a missing or unreadable file as absent.
    pub async fn load(&self) -> Option<PartnerIdentity> {
        match self.read().await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(path = %self.path.display(), error = ?err, "ignoring saved configuration");
                None
            }
        }
    }

    /// Persists `identity`, skipping the write when the file already holds it.
    ///
    /// A corrupt existing file is overwritten.
    pub async fn save(&self, identity: &PartnerIdentity) -> Result<SaveOutcome> {
        match self.read().await {
            Ok(Some(existing)) if existing == *identity => {
                debug!(path = %self.path.display(), "configuration unchanged");
                return Ok(SaveOutcome::Unchanged);
            }
            Ok(_) => {}
            Err(err) => debug!(error = ?err, "overwriting unreadable configuration"),
        }

        let encoded = serde_json::to_vec(identity).context("failed to encode configuration")?;
        tokio::fs::write(&self.path, encoded)
            .await
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(SaveOutcome::Written)
    }

    async fn read(&self) -> Result<Option<PartnerIdentity>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        let identity = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(identity))
    }
}
