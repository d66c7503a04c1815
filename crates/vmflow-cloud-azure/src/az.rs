//! az CLI wrapper
//!
//! Every call runs `az <args> --output json --only-show-errors`, optionally
//! pinned to a subscription.

use crate::error::{AzureError, Result};
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;

/// Exit status az uses for `ResourceNotFound` on `show` commands
const EXIT_NOT_FOUND: i32 = 3;

/// az CLI wrapper
#[derive(Debug, Clone)]
pub struct Az {
    program: String,
    subscription: Option<String>,
}

struct AzOutput {
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl Az {
    pub fn new(subscription: Option<String>) -> Self {
        Self {
            program: "az".to_string(),
            subscription,
        }
    }

    /// Use a different executable (e.g. a pinned install path).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn subscription(&self) -> Option<&str> {
        self.subscription.as_deref()
    }

    fn command_args(&self, args: &[String]) -> Vec<String> {
        let mut full: Vec<String> = args.to_vec();
        if let Some(subscription) = &self.subscription {
            full.push("--subscription".to_string());
            full.push(subscription.clone());
        }
        full.extend(["--output", "json", "--only-show-errors"].map(String::from));
        full
    }

    async fn exec(&self, args: &[String], env: &[(&str, &str)]) -> Result<AzOutput> {
        let full = self.command_args(args);
        tracing::debug!("Running: {} {}", self.program, redact(&full).join(" "));

        let output = Command::new(&self.program)
            .args(&full)
            .envs(env.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => AzureError::AzNotFound,
                _ => AzureError::IoError(e),
            })?;

        Ok(AzOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn failed(args: &[String], output: AzOutput) -> AzureError {
        AzureError::CommandFailed {
            command: args
                .iter()
                .take_while(|a| !a.starts_with('-'))
                .cloned()
                .collect::<Vec<_>>()
                .join(" "),
            code: output.code,
            stderr: output.stderr,
        }
    }

    /// Run a command and parse its JSON output. Empty output is `Null`.
    pub async fn run_json(&self, args: &[String]) -> Result<Value> {
        self.run_json_with_env(args, &[]).await
    }

    /// Like [`Az::run_json`], with extra environment variables for the child.
    /// Secrets go here instead of on the command line.
    pub async fn run_json_with_env(&self, args: &[String], env: &[(&str, &str)]) -> Result<Value> {
        let output = self.exec(args, env).await?;
        if output.code != Some(0) {
            return Err(Self::failed(args, output));
        }
        parse_output(&output.stdout)
    }

    /// Run a `show` command. Exit status 3 means the resource does not exist.
    pub async fn show(&self, args: &[String]) -> Result<Option<Value>> {
        self.show_with_env(args, &[]).await
    }

    pub async fn show_with_env(
        &self,
        args: &[String],
        env: &[(&str, &str)],
    ) -> Result<Option<Value>> {
        let output = self.exec(args, env).await?;
        match output.code {
            Some(0) => parse_output(&output.stdout).map(Some),
            Some(EXIT_NOT_FOUND) => Ok(None),
            _ => Err(Self::failed(args, output)),
        }
    }
}

fn parse_output(stdout: &str) -> Result<Value> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Hide secrets passed as arguments from debug logs.
fn redact(args: &[String]) -> Vec<String> {
    const SECRET_FLAGS: [&str; 2] = ["--admin-password", "--protected-settings"];
    let mut redacted = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            redacted.push("***".to_string());
            hide_next = false;
        } else {
            hide_next = SECRET_FLAGS.contains(&arg.as_str());
            redacted.push(arg.clone());
        }
    }
    redacted
}

/// Build an owned argument list from string slices.
pub fn args<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts.into_iter().map(|s| s.as_ref().to_string()).collect()
}

/// A shell script standing in for `az`.
#[cfg(all(test, unix))]
pub(crate) fn fake_az(dir: &std::path::Path, body: &str) -> Az {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("fake-az");
    std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    Az::new(None).with_program(script.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_args_append_subscription_and_output() {
        let az = Az::new(Some("sub-123".to_string()));
        let full = az.command_args(&args(["group", "show", "--name", "demo-rg"]));
        assert_eq!(
            full,
            args([
                "group",
                "show",
                "--name",
                "demo-rg",
                "--subscription",
                "sub-123",
                "--output",
                "json",
                "--only-show-errors"
            ])
        );
    }

    #[test]
    fn test_redact_hides_secrets() {
        let redacted = redact(&args([
            "vm",
            "create",
            "--admin-password",
            "hunter2",
            "--size",
            "Standard_B2s",
        ]));
        assert_eq!(redacted[3], "***");
        assert_eq!(redacted[5], "Standard_B2s");
    }

    #[test]
    fn test_parse_output() {
        assert_eq!(parse_output("  \n").unwrap(), Value::Null);
        assert_eq!(parse_output("true\n").unwrap(), Value::Bool(true));
        assert!(parse_output("not json").is_err());
    }

    #[test]
    fn test_failed_reports_subcommand_only() {
        let err = Az::failed(
            &args(["vm", "create", "--admin-password", "secret"]),
            AzOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: "QuotaExceeded".to_string(),
            },
        );
        let message = err.to_string();
        assert!(message.contains("az vm create"));
        assert!(message.contains("QuotaExceeded"));
        assert!(!message.contains("secret"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_show_maps_exit_three_to_none() {
        let temp_dir = tempfile::tempdir().unwrap();
        let az = fake_az(temp_dir.path(), "echo 'ERROR: (ResourceNotFound)' >&2\nexit 3");
        assert!(az.show(&args(["vm", "show"])).await.unwrap().is_none());
        assert!(matches!(
            az.run_json(&args(["vm", "show"])).await,
            Err(AzureError::CommandFailed { code: Some(3), .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_reaches_child_but_not_argv() {
        let temp_dir = tempfile::tempdir().unwrap();
        let az = fake_az(
            temp_dir.path(),
            "printf '{\"args\": \"%s\", \"key\": \"%s\"}' \"$*\" \"$AZURE_STORAGE_KEY\"",
        );

        let value = az
            .run_json_with_env(
                &args(["storage", "blob", "upload"]),
                &[("AZURE_STORAGE_KEY", "c2VjcmV0")],
            )
            .await
            .unwrap();
        assert_eq!(value["key"], "c2VjcmV0");
        assert!(!value["args"].as_str().unwrap().contains("c2VjcmV0"));
    }
}
