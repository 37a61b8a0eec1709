//! Ruleset document writes and the external restore step
//!
//! The compiled document is written atomically: a temp file in the target
//! directory, synced, then renamed over `iptables.rules.v4`. A crash or a
//! full disk never leaves a half-written ruleset behind for the restore
//! command to load.
//!
//! Applying is fire-and-forget: the restore command's exit status and
//! stderr are captured for logging, but a failed apply does not undo the
//! build cycle. The document stays on disk for inspection and the next
//! trigger overwrites it.

use crate::core::error::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name of the generated document inside the working directory
pub const RULES_FILE: &str = "iptables.rules.v4";

/// Environment override for the restore command.
///
/// Tests point this at a mock script so no real netfilter table is touched.
pub const RESTORE_COMMAND_ENV: &str = "GATEWALL_RESTORE_COMMAND";

/// Outcome of one restore-command invocation
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

/// Writes the compiled document under `work_dir` and returns its path.
///
/// Write-to-temp-then-rename; the rename is atomic on the same filesystem.
///
/// # Errors
///
/// Returns `Err` if the directory is not writable or the disk is full. The
/// caller must leave dirty flags untouched so the cycle retries.
pub fn write_ruleset(work_dir: &Path, text: &str) -> Result<PathBuf> {
    let path = work_dir.join(RULES_FILE);

    let mut tmp = tempfile::NamedTempFile::new_in(work_dir)?;
    tmp.write_all(text.as_bytes())?;
    tmp.as_file().sync_all()?;

    tmp.persist(&path)
        .map_err(|e| Error::Io(e.error))?;

    info!(path = %path.display(), bytes = text.len(), "ruleset document written");
    Ok(path)
}

/// Resolves the restore command: environment override first, configured
/// command otherwise
pub fn restore_command(configured: &str) -> String {
    std::env::var(RESTORE_COMMAND_ENV).unwrap_or_else(|_| configured.to_string())
}

/// Syntax-checks the document with `<restore> --test <path>` without
/// touching the kernel tables
pub async fn check_ruleset(configured: &str, path: &Path) -> Result<ApplyOutcome> {
    run_restore(&restore_command(configured), &["--test"], path).await
}

/// Loads the document into the kernel via the restore command.
///
/// A non-zero exit is returned as a failed [`ApplyOutcome`], not an `Err`;
/// only a spawn failure (command missing, not executable) is an error.
pub async fn apply_ruleset(configured: &str, path: &Path) -> Result<ApplyOutcome> {
    run_restore(&restore_command(configured), &[], path).await
}

async fn run_restore(command: &str, args: &[&str], path: &Path) -> Result<ApplyOutcome> {
    let output = tokio::process::Command::new(command)
        .args(args)
        .arg(path)
        .output()
        .await
        .map_err(|e| Error::Restore {
            message: format!("failed to spawn {command}: {e}"),
            stderr: None,
            exit_code: None,
        })?;

    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if output.status.success() {
        Ok(ApplyOutcome {
            success: true,
            exit_code: output.status.code(),
            stderr,
        })
    } else {
        warn!(
            command,
            exit_code = ?output.status.code(),
            stderr = %stderr.trim(),
            "restore command reported failure"
        );
        Ok(ApplyOutcome {
            success: false,
            exit_code: output.status.code(),
            stderr,
        })
    }
}
