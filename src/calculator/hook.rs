//! Hook calculator: run an external command per item.
//!
//! For every item a fresh working directory is created under the configured
//! `work_dir` and the payload is written to `input.json`. That part happens
//! inside `calculate`, so a failure there rejects the request. The command
//! then runs in a spawned task with the directory as its CWD and must write
//! its result to `output.json`. The continuation is called once the hook
//! exits; the directory is removed before that. If the scheduler stops
//! waiting first, the child is killed and the continuation released.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use super::HookConfig;
use crate::engine::{Calculator, Continuation};
use crate::error::{Error, Result};
use crate::model::Payload;

pub const INPUT_FILE: &str = "input.json";
pub const OUTPUT_FILE: &str = "output.json";

/// [`Calculator`] backed by an external command.
pub struct HookCalculator {
    config: HookConfig,
}

impl HookCalculator {
    pub fn new(config: HookConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }
}

#[async_trait]
impl Calculator for HookCalculator {
    async fn calculate(&self, payload: Payload, continuation: Continuation) -> anyhow::Result<()> {
        let dir = self.config.work_dir.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(INPUT_FILE), serde_json::to_vec_pretty(&payload)?).await?;

        let job = HookJob {
            name: self.config.name.clone(),
            command: resolve_command(&self.config.command)?,
            args: self.config.args.clone(),
            env: self.config.env.clone(),
            dir,
        };
        debug!(
            calculator = %job.name,
            item = %continuation.item(),
            dir = %job.dir.display(),
            "hook prepared"
        );

        tokio::spawn(job.run(continuation).in_current_span());
        Ok(())
    }
}

/// Resolve relative command paths against the process CWD, not the item dir.
/// `Command::current_dir` would otherwise resolve them after the chdir.
fn resolve_command(command: &Path) -> Result<PathBuf> {
    if command.is_relative() && command.components().count() > 1 {
        Ok(std::env::current_dir()?.join(command))
    } else {
        Ok(command.to_path_buf())
    }
}

/// One hook invocation, owned by the spawned task.
struct HookJob {
    name: String,
    command: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    dir: PathBuf,
}

impl HookJob {
    async fn run(self, mut continuation: Continuation) {
        let start = Instant::now();
        let outcome = self.execute(&mut continuation).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), "cleanup error: {e}");
        }

        match outcome {
            Ok(Some(result)) => {
                info!(calculator = %self.name, item = %continuation.item(), duration_ms, "hook completed");
                continuation.complete(result);
            }
            // Dropping the continuation here, after cleanup, releases the item.
            Ok(None) => {
                warn!(calculator = %self.name, item = %continuation.item(), duration_ms, "hook killed, result no longer wanted");
            }
            Err(e) => {
                warn!(
                    calculator = %self.name,
                    item = %continuation.item(),
                    duration_ms,
                    error = %e,
                    "hook failed"
                );
                continuation.fail(e.to_string());
            }
        }
    }

    /// Run the hook. `Ok(None)` means the continuation closed first and the
    /// child was killed.
    async fn execute(&self, continuation: &mut Continuation) -> Result<Option<Payload>> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(&self.dir)
            .envs(&self.env)
            .env("JOBCHAIN_WORK_DIR", &self.dir)
            .env("JOBCHAIN_CALCULATOR", &self.name)
            .env("JOBCHAIN_ITEM_ID", continuation.item().as_str())
            .env("JOBCHAIN_RUN_ID", continuation.run_id().0.to_string())
            .kill_on_drop(true)
            .spawn()?;

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = continuation.closed() => {
                if let Err(e) = child.kill().await {
                    warn!(calculator = %self.name, "kill error: {e}");
                }
                return Ok(None);
            }
        };

        if !status.success() {
            return Err(Error::Other(format!(
                "{} exited with status {}",
                self.command.display(),
                status.code().unwrap_or(-1)
            )));
        }

        let content = tokio::fs::read_to_string(self.dir.join(OUTPUT_FILE))
            .await
            .map_err(|e| Error::Other(format!("missing {OUTPUT_FILE}: {e}")))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::Other(format!("bad {OUTPUT_FILE}: {e}")))
    }
}
