//! Completion check runner.
//!
//! Executes a mission's check specifications against a workspace. The
//! runner itself never fails: anything unexpected is captured as a result
//! with `Error` status so the mission reconciler can persist it.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use regex::RegexBuilder;
use tokio::process::Command;

use crate::domain::models::mission::{CheckResult, CheckSpec, CheckStatus, CompareOp};
use crate::domain::ports::message_bus::MessageBus;

/// Cap on captured output stored into check results.
const MAX_OUTPUT_BYTES: usize = 4096;

pub struct CheckRunner {
    bus: Arc<dyn MessageBus>,
}

impl CheckRunner {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    /// Run all checks in declared order. Every result is returned even when
    /// an early check fails; the caller decides how to aggregate.
    pub async fn run_all(
        &self,
        workspace: &Path,
        checks: &[CheckSpec],
        since: DateTime<Utc>,
    ) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(checks.len());
        for check in checks {
            results.push(self.run_check(workspace, check, since).await);
        }
        results
    }

    /// Run one check, converting every failure mode into a result.
    pub async fn run_check(
        &self,
        workspace: &Path,
        check: &CheckSpec,
        since: DateTime<Utc>,
    ) -> CheckResult {
        let name = check.name().to_string();
        let outcome = match check {
            CheckSpec::FileExists { paths, .. } => run_file_exists(workspace, paths),
            CheckSpec::Command { command, success_pattern, fail_pattern, .. } => {
                run_command(
                    workspace,
                    command,
                    success_pattern.as_deref(),
                    fail_pattern.as_deref(),
                )
                .await
            }
            CheckSpec::Coverage { command, json_path, op, value, .. } => {
                run_coverage(workspace, command, json_path, *op, *value).await
            }
            CheckSpec::BusResponse {
                subject,
                success_pattern,
                fail_pattern,
                timeout_seconds,
                ..
            } => {
                self.run_bus_response(
                    subject,
                    success_pattern.as_deref(),
                    fail_pattern.as_deref(),
                    *timeout_seconds,
                    since,
                )
                .await
            }
        };

        match outcome {
            Ok((status, output)) => CheckResult { name, status, output },
            Err(message) => CheckResult {
                name,
                status: CheckStatus::Error,
                output: Some(truncate(&message)),
            },
        }
    }

    async fn run_bus_response(
        &self,
        subject: &str,
        success_pattern: Option<&str>,
        fail_pattern: Option<&str>,
        timeout_seconds: u64,
        since: DateTime<Utc>,
    ) -> Result<(CheckStatus, Option<String>), String> {
        let success = success_pattern.map(case_insensitive).transpose()?;
        let fail = fail_pattern.map(case_insensitive).transpose()?;

        let mut subscription = self
            .bus
            .subscribe(subject)
            .await
            .map_err(|e| format!("subscribe failed: {}", e))?;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_seconds);
        loop {
            let message = match tokio::time::timeout_at(deadline, subscription.next()).await {
                Ok(Some(message)) => message,
                // Stream closed or deadline hit without a verdict.
                Ok(None) => {
                    return Ok((
                        CheckStatus::Failed,
                        Some(format!("subject {} closed without a matching response", subject)),
                    ))
                }
                Err(_) => {
                    return Ok((
                        CheckStatus::Failed,
                        Some(format!(
                            "no matching response on {} within {}s",
                            subject, timeout_seconds
                        )),
                    ))
                }
            };

            if message.envelope.timestamp < since {
                continue;
            }
            let Some(content) = message.envelope.content() else {
                continue;
            };

            if let Some(fail) = &fail {
                if fail.is_match(content) {
                    return Ok((CheckStatus::Failed, Some(truncate(content))));
                }
            }
            match &success {
                Some(success) if success.is_match(content) => {
                    return Ok((CheckStatus::Passed, Some(truncate(content))));
                }
                Some(_) => {
                    // Rejected; keep waiting for a better message.
                }
                None => return Ok((CheckStatus::Passed, Some(truncate(content)))),
            }
        }
    }
}

fn run_file_exists(
    workspace: &Path,
    paths: &[String],
) -> Result<(CheckStatus, Option<String>), String> {
    for raw in paths {
        let resolved = match resolve_within(workspace, raw) {
            Some(path) => path,
            None => {
                return Ok((
                    CheckStatus::Failed,
                    Some(format!("path '{}' escapes the workspace", raw)),
                ))
            }
        };
        if !resolved.exists() {
            return Ok((CheckStatus::Failed, Some(format!("missing: {}", raw))));
        }
    }
    Ok((CheckStatus::Passed, None))
}

async fn run_command(
    workspace: &Path,
    command: &str,
    success_pattern: Option<&str>,
    fail_pattern: Option<&str>,
) -> Result<(CheckStatus, Option<String>), String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workspace)
        .output()
        .await
        .map_err(|e| format!("failed to run '{}': {}", command, e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let captured = Some(truncate(&stdout));

    if let Some(pattern) = fail_pattern {
        let re = plain_regex(pattern)?;
        if re.is_match(&stdout) {
            return Ok((CheckStatus::Failed, captured));
        }
    }
    if !output.status.success() {
        return Ok((
            CheckStatus::Failed,
            Some(truncate(&format!(
                "exit status {:?}\n{}",
                output.status.code(),
                stdout
            ))),
        ));
    }
    if let Some(pattern) = success_pattern {
        let re = plain_regex(pattern)?;
        if !re.is_match(&stdout) {
            return Ok((
                CheckStatus::Failed,
                Some(truncate(&format!("output did not match '{}'", pattern))),
            ));
        }
    }
    Ok((CheckStatus::Passed, captured))
}

async fn run_coverage(
    workspace: &Path,
    command: &str,
    json_path: &str,
    op: CompareOp,
    expected: f64,
) -> Result<(CheckStatus, Option<String>), String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workspace)
        .output()
        .await
        .map_err(|e| format!("failed to run '{}': {}", command, e))?;

    if !output.status.success() {
        return Ok((
            CheckStatus::Failed,
            Some(format!("command exited with {:?}", output.status.code())),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value = serde_json::from_str(stdout.trim())
        .map_err(|e| format!("command did not emit JSON: {}", e))?;
    let value = extract_json_path(&parsed, json_path)
        .ok_or_else(|| format!("path '{}' not found in output", json_path))?;
    let actual = value
        .as_f64()
        .ok_or_else(|| format!("value at '{}' is not numeric", json_path))?;

    let passed = op.compare(actual, expected);
    let summary = format!("{} {} {} => {}", actual, op.as_str(), expected, passed);
    Ok((
        if passed { CheckStatus::Passed } else { CheckStatus::Failed },
        Some(summary),
    ))
}

/// Walk a dotted path through JSON objects. Arrays and wildcards are
/// not supported.
fn extract_json_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Join `relative` onto `workspace`, rejecting absolute paths and any `..`
/// that would climb out.
fn resolve_within(workspace: &Path, relative: &str) -> Option<PathBuf> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        return None;
    }
    let mut depth: i32 = 0;
    let mut cleaned = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => {
                depth += 1;
                cleaned.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
                cleaned.pop();
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(workspace.join(cleaned))
}

fn case_insensitive(pattern: &str) -> Result<regex::Regex, String> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| format!("invalid pattern '{}': {}", pattern, e))
}

fn plain_regex(pattern: &str) -> Result<regex::Regex, String> {
    regex::Regex::new(pattern).map_err(|e| format!("invalid pattern '{}': {}", pattern, e))
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_BYTES {
        s.to_string()
    } else {
        let mut end = MAX_OUTPUT_BYTES;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
