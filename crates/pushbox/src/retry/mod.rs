//! Bounded retry around a [`CommandRunner`].

use crate::command::CommandRunner;
use crate::error::HarnessResult;
use crate::model::{CommandOptions, CommandResult, RetryPolicy};
use tracing::warn;

/// Run `program` until it succeeds or `policy.max_attempts` is used up.
///
/// Sleeps `policy.delay()` between attempts, never after the last one.
/// Returns the first successful result, or the last failed one on
/// exhaustion. Spawn errors are not retried.
pub async fn run_with_retry<R: CommandRunner>(
    runner: &R,
    program: &str,
    args: &[String],
    options: &CommandOptions,
    policy: &RetryPolicy,
) -> HarnessResult<CommandResult> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = runner.run(program, args, options).await?;
        if result.success() || attempt >= attempts {
            return Ok(result);
        }
        warn!(
            program,
            attempt,
            attempts,
            exit_code = ?result.exit_code,
            timed_out = result.timed_out,
            "command failed, retrying"
        );
        tokio::time::sleep(policy.delay()).await;
        attempt += 1;
    }
}
