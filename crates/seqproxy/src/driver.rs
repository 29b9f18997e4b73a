//! Driver commands: external processes that generate the traffic under test.

use crate::config::PORT_PLACEHOLDER;
use crate::error::HarnessError;
use std::fmt;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// A driver command with `%port` already substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCommand {
    line: String,
    program: String,
    args: Vec<String>,
}

impl DriverCommand {
    /// Substitute the listen port into `template` and split it on whitespace.
    pub fn render(template: &str, port: u16) -> Result<Self, HarnessError> {
        let line = template.replace(PORT_PLACEHOLDER, &port.to_string());
        let mut words = line.split_whitespace().map(str::to_string);
        let program = words.next().ok_or_else(|| HarnessError::DriverCommand {
            command: template.to_string(),
            reason: "empty command".to_string(),
        })?;
        let args = words.collect();
        Ok(Self {
            line,
            program,
            args,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Run to completion. The child is killed if this future is dropped.
    pub async fn run(&self) -> Result<(), HarnessError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.failure(format!("could not start: {e}")))?;

        if !output.stdout.is_empty() {
            debug!(
                "[{}] stdout: {}",
                self.program,
                String::from_utf8_lossy(&output.stdout).trim_end()
            );
        }
        if !output.stderr.is_empty() {
            debug!(
                "[{}] stderr: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
        }

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let reason = if stderr.is_empty() {
            output.status.to_string()
        } else {
            format!("{}: {}", output.status, stderr)
        };
        Err(self.failure(reason))
    }

    fn failure(&self, reason: String) -> HarnessError {
        HarnessError::DriverCommand {
            command: self.line.clone(),
            reason,
        }
    }
}

impl fmt::Display for DriverCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}
