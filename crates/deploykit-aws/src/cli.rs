//! `aws` command runner.

use deploykit_core::{DeployError, Result, Settings};
use serde_json::Value;
use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// Stderr fragments that mean the caller lacks credentials or permission.
const AUTH_MARKERS: [&str; 7] = [
    "AccessDenied",
    "AccessDeniedException",
    "ExpiredToken",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
    "Unable to locate credentials",
    "is not authorized to perform",
];

/// Check if the `aws` CLI is available
pub fn is_aws_cli_available() -> bool {
    std::process::Command::new("aws")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Invokes the `aws` CLI with a fixed region and profile.
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: String,
    region: Option<String>,
    profile: Option<String>,
}

impl Default for AwsCli {
    fn default() -> Self {
        AwsCli {
            program: "aws".to_string(),
            region: None,
            profile: None,
        }
    }
}

impl AwsCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Region and profile taken from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        AwsCli {
            program: "aws".to_string(),
            region: settings.region.clone(),
            profile: settings.profile.clone(),
        }
    }

    /// Use another executable (a wrapper script, or a stub in tests).
    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile = Some(profile.to_string());
        self
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Global options placed before every subcommand.
    pub fn global_args(&self) -> Vec<String> {
        let mut args = vec!["--output".to_string(), "json".to_string()];
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args
    }

    /// Run a subcommand and return its stdout.
    pub async fn run<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args
            .into_iter()
            .map(|a| a.as_ref().to_os_string())
            .collect();
        let label = command_label(&args);
        let started = Instant::now();

        let output = Command::new(&self.program)
            .args(self.global_args())
            .args(&args)
            .env("AWS_PAGER", "")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DeployError::ToolNotFound(self.program.clone())
                } else {
                    DeployError::Io(e)
                }
            })?;

        debug!(
            command = %label,
            exit_code = output.status.code().unwrap_or(-1),
            duration_ms = started.elapsed().as_millis() as u64,
            "aws command finished"
        );

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_failure(&label, stderr.trim()))
        }
    }

    /// Run a subcommand and parse its stdout as JSON; empty output is `null`.
    pub async fn run_json<I, S>(&self, args: I) -> Result<Value>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let stdout = self.run(args).await?;
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&stdout)?)
    }
}

/// Map a failed command's stderr to an error.
pub fn classify_failure(command: &str, stderr: &str) -> DeployError {
    if AUTH_MARKERS.iter().any(|m| stderr.contains(m)) {
        DeployError::Authorization(format!("{command}: {stderr}"))
    } else {
        DeployError::CommandFailed {
            tool: command.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

/// `aws <service> <operation>` for log lines and errors.
fn command_label(args: &[std::ffi::OsString]) -> String {
    let parts: Vec<String> = args
        .iter()
        .take(2)
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    format!("aws {}", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_args_include_region_and_profile() {
        let cli = AwsCli::new().with_region("eu-west-1").with_profile("ml");
        assert_eq!(
            cli.global_args(),
            vec!["--output", "json", "--region", "eu-west-1", "--profile", "ml"]
        );
    }

    #[test]
    fn test_global_args_default() {
        assert_eq!(AwsCli::new().global_args(), vec!["--output", "json"]);
    }

    #[test]
    fn test_classify_access_denied() {
        let err = classify_failure(
            "aws iam get-role",
            "An error occurred (AccessDenied) when calling the GetRole operation",
        );
        assert!(matches!(err, DeployError::Authorization(_)));
    }

    #[test]
    fn test_classify_missing_credentials() {
        let err = classify_failure("aws sts get-caller-identity", "Unable to locate credentials.");
        assert!(matches!(err, DeployError::Authorization(_)));
    }

    #[test]
    fn test_classify_other_failure() {
        let err = classify_failure(
            "aws sagemaker create-endpoint",
            "An error occurred (ResourceLimitExceeded)",
        );
        match err {
            DeployError::CommandFailed { tool, stderr } => {
                assert_eq!(tool, "aws sagemaker create-endpoint");
                assert!(stderr.contains("ResourceLimitExceeded"));
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_command_label_uses_service_and_operation() {
        let args: Vec<std::ffi::OsString> = ["s3", "cp", "a", "b"].iter().map(Into::into).collect();
        assert_eq!(command_label(&args), "aws s3 cp");
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_not_found() {
        let cli = AwsCli::new().with_program("deploykit-no-such-aws-binary");
        let err = cli.run(["sts", "get-caller-identity"]).await.unwrap_err();
        assert!(matches!(err, DeployError::ToolNotFound(_)));
    }
}
