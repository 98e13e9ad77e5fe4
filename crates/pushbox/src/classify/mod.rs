//! Output classification.
//!
//! The inspected text is stderr when it is non-empty and stdout otherwise;
//! the two streams are never concatenated.

use crate::error::{ErrorCode, HarnessError, HarnessResult};
use crate::model::{CommandResult, OutputPattern, MAX_REGEX_PATTERN_LEN};
use regex::{Regex, RegexBuilder};

/// Compiled-program size cap for user-supplied patterns.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Compile a user-supplied pattern with length and size limits.
pub fn compile_safe_regex(pattern: &str, case_insensitive: bool) -> HarnessResult<Regex> {
    if pattern.len() > MAX_REGEX_PATTERN_LEN {
        return Err(HarnessError::with_context(
            ErrorCode::Config,
            "regex pattern too long",
            serde_json::json!({ "length": pattern.len(), "max": MAX_REGEX_PATTERN_LEN }),
        ));
    }
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|err| {
            HarnessError::with_context(
                ErrorCode::Config,
                format!("invalid regex pattern '{pattern}'"),
                serde_json::json!({ "source": err.to_string() }),
            )
        })
}

/// Reject patterns that would fail at classification time.
pub fn validate_pattern(pattern: &OutputPattern) -> HarnessResult<()> {
    match pattern {
        OutputPattern::Contains { .. } => Ok(()),
        OutputPattern::Regex {
            pattern,
            case_insensitive,
        } => compile_safe_regex(pattern, *case_insensitive).map(|_| ()),
    }
}

/// The stream that gets matched: stderr if non-empty, else stdout.
#[must_use]
pub fn inspected_text(result: &CommandResult) -> &str {
    if result.stderr.is_empty() {
        &result.stdout
    } else {
        &result.stderr
    }
}

/// Match `result` against `pattern`.
///
/// A mismatch is `E_CLASSIFICATION` carrying the expected pattern and both
/// streams verbatim.
pub fn classify(result: &CommandResult, pattern: &OutputPattern) -> HarnessResult<()> {
    let text = inspected_text(result);
    let matched = match pattern {
        OutputPattern::Contains { text: needle } => text.contains(needle.as_str()),
        OutputPattern::Regex {
            pattern,
            case_insensitive,
        } => compile_safe_regex(pattern, *case_insensitive)?.is_match(text),
    };
    if matched {
        return Ok(());
    }
    let verb = match pattern {
        OutputPattern::Contains { .. } => "contain",
        OutputPattern::Regex { .. } => "match",
    };
    Err(HarnessError::with_context(
        ErrorCode::Classification,
        format!(
            "expected output to {verb} {pattern}, but got:\n{}",
            render_streams(result)
        ),
        serde_json::json!({
            "expected": pattern.to_string(),
            "stdout": result.stdout,
            "stderr": result.stderr,
            "exit_code": result.exit_code,
            "timed_out": result.timed_out,
        }),
    ))
}

/// `STDOUT: ...` / `STDERR: ...`, with `empty` for blank streams.
#[must_use]
pub fn render_streams(result: &CommandResult) -> String {
    format!(
        "STDOUT: {}\nSTDERR: {}",
        or_empty(&result.stdout),
        or_empty(&result.stderr)
    )
}

fn or_empty(stream: &str) -> &str {
    if stream.is_empty() {
        "empty"
    } else {
        stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(stdout: &str, stderr: &str) -> CommandResult {
        CommandResult {
            exit_code: Some(1),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            ..CommandResult::default()
        }
    }

    #[test]
    fn stderr_wins_when_present() {
        let result = output("Application found", "bash: revlay: command not found");
        assert!(classify(&result, &OutputPattern::regex_ci("command not found")).is_ok());
        assert!(classify(&result, &OutputPattern::contains("Application found")).is_err());
    }

    #[test]
    fn stdout_is_the_fallback() {
        let result = output("Deployment COMPLETED", "");
        assert!(classify(&result, &OutputPattern::regex_ci("completed")).is_ok());
    }

    #[test]
    fn whitespace_only_stderr_still_counts_as_present() {
        let result = output("error", "\n");
        assert!(classify(&result, &OutputPattern::contains("error")).is_err());
    }

    #[test]
    fn mismatch_names_pattern_and_both_streams() {
        let result = output("", "");
        let Err(err) = classify(&result, &OutputPattern::regex_ci("incompatible")) else {
            panic!("empty output cannot match");
        };
        assert_eq!(err.code, ErrorCode::Classification);
        assert!(err.message.contains("/incompatible/i"));
        assert!(err.message.contains("STDOUT: empty"));
        assert!(err.message.contains("STDERR: empty"));
    }

    #[test]
    fn oversized_patterns_are_rejected() {
        let long = "a".repeat(MAX_REGEX_PATTERN_LEN + 1);
        let Err(err) = compile_safe_regex(&long, false) else {
            panic!("pattern should be rejected");
        };
        assert_eq!(err.code, ErrorCode::Config);
    }

    #[test]
    fn invalid_regex_is_a_config_error() {
        let pattern = OutputPattern::regex_ci("(unclosed");
        assert!(validate_pattern(&pattern).is_err());
    }
}
