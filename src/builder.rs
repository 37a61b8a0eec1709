//! Periodic build cycle
//!
//! The builder is the only component that turns records into the on-disk
//! document. It runs on a timer (default every 5 seconds) or on demand, and
//! each cycle:
//!
//! 1. takes the compile-in-flight guard (overlapping triggers coalesce)
//! 2. loads one consistent snapshot of the rule set
//! 3. bails out early when nothing is dirty and the cycle was not forced
//! 4. compiles and writes the whole document atomically
//! 5. clears every dirty flag and saves the store
//! 6. hands the document to the restore command, fire-and-forget
//!
//! A write failure aborts before step 5, so the flags stay dirty and the
//! next trigger retries from scratch. An apply failure is logged and
//! audited but never rolls the cycle back.

use crate::audit;
use crate::config::AppConfig;
use crate::core::apply;
use crate::core::compiler::{self, NetworkContext};
use crate::core::error::Result;
use crate::core::store::RuleStore;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What one trigger actually did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No dirty records and not forced; nothing was compiled
    Idle,
    /// Another compile held the guard; this trigger was dropped
    Coalesced,
    /// Document regenerated and written
    Built {
        emitted: usize,
        skipped: usize,
        applied: bool,
    },
}

pub struct Builder {
    store: RuleStore,
    work_dir: PathBuf,
    net: NetworkContext,
    restore_command: String,
    check_before_apply: bool,
    interval: Duration,
    compile_lock: tokio::sync::Mutex<()>,
}

impl Builder {
    pub fn new(store: RuleStore, work_dir: PathBuf, config: &AppConfig) -> Self {
        Self {
            store,
            work_dir,
            net: config.network_context(),
            restore_command: config.restore_command.clone(),
            check_before_apply: config.check_before_apply,
            interval: Duration::from_secs(config.build_interval_secs.max(1)),
            compile_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Overrides the trigger interval (CLI flag)
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn rules_path(&self) -> PathBuf {
        self.work_dir.join(apply::RULES_FILE)
    }

    /// Runs one build cycle. `force` regenerates even with a clean rule set
    /// (the one-shot setup trigger and the `build` command use this).
    pub async fn cycle(&self, force: bool) -> Result<CycleOutcome> {
        let Ok(_guard) = self.compile_lock.try_lock() else {
            debug!("compile already in flight, coalescing trigger");
            return Ok(CycleOutcome::Coalesced);
        };

        let mut rules = self.store.load().await?;

        if !force && rules.dirty_count() == 0 {
            return Ok(CycleOutcome::Idle);
        }

        info!(
            rules = rules.len(),
            dirty = rules.dirty_count(),
            "compiling ruleset"
        );

        let output = compiler::compile(&rules, &self.net, Utc::now());

        if output.skipped > 0 {
            warn!(
                skipped = output.skipped,
                "forward rules without a resolvable target were omitted"
            );
        }

        let path = match apply::write_ruleset(&self.work_dir, &output.text) {
            Ok(path) => path,
            Err(e) => {
                // Dirty flags stay set; the next trigger retries
                error!("failed to write ruleset document: {e}");
                audit::log_build(
                    rules.len(),
                    output.emitted,
                    output.skipped,
                    false,
                    Some(e.to_string()),
                )
                .await;
                return Err(e);
            }
        };

        rules.clear_dirty();
        self.store.save(&rules).await?;

        audit::log_build(rules.len(), output.emitted, output.skipped, true, None).await;

        let applied = self.apply(&path).await;

        Ok(CycleOutcome::Built {
            emitted: output.emitted,
            skipped: output.skipped,
            applied,
        })
    }

    /// Hands the written document to the restore command. Returns whether
    /// the apply succeeded; failure is logged, never propagated.
    async fn apply(&self, path: &Path) -> bool {
        if self.check_before_apply {
            match apply::check_ruleset(&self.restore_command, path).await {
                Ok(outcome) if !outcome.success => {
                    warn!(
                        exit_code = ?outcome.exit_code,
                        "ruleset failed the restore --test check, not applying"
                    );
                    audit::log_apply(false, outcome.exit_code, Some(outcome.stderr)).await;
                    return false;
                }
                Err(e) => {
                    warn!("could not run the restore --test check: {e}");
                    audit::log_apply(false, None, Some(e.to_string())).await;
                    return false;
                }
                Ok(_) => {}
            }
        }

        match apply::apply_ruleset(&self.restore_command, path).await {
            Ok(outcome) => {
                if outcome.success {
                    info!("ruleset applied");
                    audit::log_apply(true, outcome.exit_code, None).await;
                } else {
                    audit::log_apply(false, outcome.exit_code, Some(outcome.stderr)).await;
                }
                outcome.success
            }
            Err(e) => {
                warn!("restore command could not be spawned: {e}");
                audit::log_apply(false, None, Some(e.to_string())).await;
                false
            }
        }
    }

    /// Runs the setup trigger once, then the periodic loop until the task
    /// is cancelled.
    pub async fn run(&self) {
        info!(
            interval_secs = self.interval.as_secs(),
            work_dir = %self.work_dir.display(),
            "starting build loop"
        );

        // One-shot setup trigger: full regeneration at startup
        if let Err(e) = self.cycle(true).await {
            error!("initial build failed: {e}");
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately, already handled above

        loop {
            ticker.tick().await;
            if let Err(e) = self.cycle(false).await {
                error!("build cycle failed: {e}");
            }
        }
    }
}
