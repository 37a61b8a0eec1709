//! Persisted rule store
//!
//! The full rule set lives in a single JSON document (`rules.json`). Reads
//! return a point-in-time snapshot of every record; writers replace the
//! whole document atomically (temp file + rename) with a SHA-256 sidecar
//! for integrity checks. A missing document is an empty rule set, not an
//! error.

use crate::core::rules::{RuleSet, MAX_RULES};
use std::path::{Path, PathBuf};

/// File name of the store document inside the working directory
pub const STORE_FILE: &str = "rules.json";

/// Error type for rule store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store document holds {found} rules (max: {max})")]
    TooManyRules { found: usize, max: usize },
}

/// Handle on the on-disk rule document
#[derive(Debug, Clone)]
pub struct RuleStore {
    path: PathBuf,
}

impl RuleStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STORE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn checksum_path(&self) -> PathBuf {
        let mut path = self.path.clone();
        path.set_extension("json.sha256");
        path
    }

    /// Loads the full rule set.
    ///
    /// Verifies the checksum sidecar if present (warns but does not fail,
    /// the document might be hand-edited). A missing document yields an
    /// empty set.
    pub async fn load(&self) -> Result<RuleSet, StoreError> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(RuleSet::new());
        }

        let json = tokio::fs::read_to_string(&self.path).await?;

        if let Ok(expected) = tokio::fs::read_to_string(self.checksum_path()).await {
            let actual = sha256_hex(&json);
            if expected.trim() != actual {
                tracing::warn!(
                    path = %self.path.display(),
                    expected = expected.trim(),
                    actual,
                    "rule store checksum mismatch"
                );
            }
        }

        let rules: RuleSet = serde_json::from_str(&json)?;

        if rules.len() > MAX_RULES {
            return Err(StoreError::TooManyRules {
                found: rules.len(),
                max: MAX_RULES,
            });
        }

        Ok(rules)
    }

    /// Replaces the store document atomically and refreshes the checksum
    /// sidecar.
    pub async fn save(&self, rules: &RuleSet) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(rules)?;

        let mut temp_path = self.path.clone();
        temp_path.set_extension("json.tmp");

        #[cfg(unix)]
        {
            use tokio::fs::OpenOptions;
            use tokio::io::AsyncWriteExt;

            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(0o600)
                .open(&temp_path)
                .await?;

            file.write_all(json.as_bytes()).await?;
            file.sync_all().await?;
        }

        #[cfg(not(unix))]
        {
            tokio::fs::write(&temp_path, &json).await?;
        }

        tokio::fs::rename(temp_path, &self.path).await?;

        tokio::fs::write(self.checksum_path(), sha256_hex(&json)).await?;

        Ok(())
    }

    /// Removes the store document and its sidecar entirely
    pub async fn purge(&self) -> Result<(), StoreError> {
        for path in [self.path.clone(), self.checksum_path()] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
