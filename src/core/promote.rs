// src/core/promote.rs

//! C6: Promotion Executor. Runs the configured promote/follow/rejoin shell
//! commands and verifies post-conditions, per §4.6.

use crate::core::errors::EngineError;
use crate::core::shellcmd::{CommandOutcome, ShellCommand, run_with_timeout};
use async_trait::async_trait;
use std::time::Duration;

/// Grace period between SIGTERM and SIGKILL on command timeout.
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// The external collaborator boundary for running promote/follow/rejoin
/// commands. A trait so the election engine (C5) can be driven against a
/// fake in tests without actually spawning processes.
#[async_trait]
pub trait PromotionRunner: Send + Sync {
    async fn run(&self, command: &ShellCommand, timeout: Duration) -> Result<CommandOutcome, EngineError>;
}

/// Runs commands as real child processes via `tokio::process::Command`.
pub struct ProcessPromotionRunner;

#[async_trait]
impl PromotionRunner for ProcessPromotionRunner {
    async fn run(&self, command: &ShellCommand, timeout: Duration) -> Result<CommandOutcome, EngineError> {
        Ok(run_with_timeout(command, timeout, KILL_GRACE_PERIOD).await)
    }
}

/// Configuration for the three commands the Promotion Executor may run.
#[derive(Debug, Clone)]
pub struct PromotionCommands {
    pub promote_command: ShellCommand,
    pub follow_command: ShellCommand,
    pub rejoin_command: Option<ShellCommand>,
}

/// Invokes a configured command and folds its result into an
/// `EngineError::PromotionFailed` on a non-zero exit or timeout, attaching
/// captured stdout for the event record (§4.6: "standard output is
/// captured and attached to the corresponding event record").
pub async fn execute_promotion(
    runner: &dyn PromotionRunner,
    command: &ShellCommand,
    timeout: Duration,
) -> Result<String, EngineError> {
    let outcome = runner.run(command, timeout).await?;
    if outcome.success {
        Ok(outcome.stdout)
    } else if outcome.timed_out {
        Err(EngineError::PromotionFailed(format!(
            "command exceeded {timeout:?} and was killed"
        )))
    } else {
        Err(EngineError::PromotionFailed(format!(
            "command exited non-zero, output: {}",
            outcome.stdout
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_returns_captured_stdout() {
        let cmd = ShellCommand::parse("/bin/echo promoted");
        let out = execute_promotion(&ProcessPromotionRunner, &cmd, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(out.contains("promoted"));
    }

    #[tokio::test]
    async fn failing_command_yields_promotion_failed() {
        let cmd = ShellCommand::parse("/bin/false");
        let err = execute_promotion(&ProcessPromotionRunner, &cmd, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PromotionFailed(_)));
    }
}
