//! Runs the external dump (`pg_dump`) and load (`psql`) tools.
//!
//! Against production the dump tool gets the configured privilege arguments
//! (by default `--no-owner --no-acl`), so the SQL it emits carries no OWNER or
//! GRANT statements and loads onto a differently-privileged target. The load
//! tool always runs with `ON_ERROR_STOP` so a failing statement fails the
//! restore. No step is retried.

use crate::backup::Environment;
use crate::cancel::Guard;
use crate::{BackupError, Result};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Dump flags that strip ownership and ACL statements
pub const DEFAULT_PRIVILEGE_ARGS: [&str; 2] = ["--no-owner", "--no-acl"];

/// Load flags: stop at the first failed statement with a non-zero exit
pub const DEFAULT_RESTORE_ARGS: [&str; 2] = ["-v", "ON_ERROR_STOP=1"];

/// Tool locations and per-environment arguments
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Dump tool, `pg_dump` by default
    pub dump_tool: PathBuf,
    /// Load tool, `psql` by default
    pub restore_tool: PathBuf,
    /// Extra dump-tool arguments in production
    pub privilege_args: Vec<String>,
    /// Load-tool arguments in every environment, placed before the connection
    pub restore_args: Vec<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            dump_tool: PathBuf::from("pg_dump"),
            restore_tool: PathBuf::from("psql"),
            privilege_args: DEFAULT_PRIVILEGE_ARGS.iter().map(|s| s.to_string()).collect(),
            restore_args: DEFAULT_RESTORE_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Subprocess driver for one environment
#[derive(Debug, Clone)]
pub struct DumpDriver {
    config: DriverConfig,
    environment: Environment,
    guard: Guard,
}

impl DumpDriver {
    /// Create a driver; `guard` bounds every tool invocation
    pub fn new(config: DriverConfig, environment: Environment, guard: Guard) -> Self {
        Self {
            config,
            environment,
            guard,
        }
    }

    fn dump_args(&self) -> &[String] {
        if self.environment.is_production() {
            &self.config.privilege_args
        } else {
            &[]
        }
    }

    /// Dump the database at `connection` and return the tool's stdout
    pub async fn dump(&self, connection: &str) -> Result<Vec<u8>> {
        let tool = tool_name(&self.config.dump_tool);
        let mut command = Command::new(&self.config.dump_tool);
        command
            .arg(connection)
            .args(self.dump_args())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(tool = %tool, args = ?self.dump_args(), "Running dump tool");

        let output = self
            .guard
            .run("dump", async {
                command.output().await.map_err(|e| BackupError::DumpToolFailure {
                    tool: tool.clone(),
                    status: "not started".to_string(),
                    stderr: e.to_string(),
                })
            })
            .await?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(BackupError::DumpToolFailure {
                tool,
                status: describe(output.status),
                stderr,
            });
        }
        if !stderr.is_empty() {
            warn!(tool = %tool, stderr = %stderr, "Dump tool wrote to stderr");
        }

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(BackupError::EmptyDumpResult);
        }

        info!(tool = %tool, bytes = output.stdout.len(), "Database dump captured");
        Ok(output.stdout)
    }

    /// Feed `sql` to the load tool connected to `connection`
    pub async fn restore(&self, connection: &str, sql: &[u8]) -> Result<()> {
        let tool = tool_name(&self.config.restore_tool);
        let mut command = Command::new(&self.config.restore_tool);
        command
            .args(&self.config.restore_args)
            .arg(connection)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(tool = %tool, args = ?self.config.restore_args, bytes = sql.len(), "Running load tool");

        let not_started = |e: std::io::Error| BackupError::RestoreToolFailure {
            tool: tool.clone(),
            status: "not started".to_string(),
            stderr: e.to_string(),
        };

        let (output, write_result) = self
            .guard
            .run("restore", async {
                let mut child = command.spawn().map_err(not_started)?;
                let mut stdin = child.stdin.take().ok_or_else(|| BackupError::RestoreToolFailure {
                    tool: tool.clone(),
                    status: "not started".to_string(),
                    stderr: "stdin was not captured".to_string(),
                })?;

                // Write input while draining output so neither pipe can fill up
                let writer = async move {
                    let result = stdin.write_all(sql).await;
                    drop(stdin);
                    result
                };
                let (write_result, output) = tokio::join!(writer, child.wait_with_output());
                let output = output.map_err(|e| BackupError::RestoreToolFailure {
                    tool: tool.clone(),
                    status: "unknown".to_string(),
                    stderr: e.to_string(),
                })?;
                Ok((output, write_result))
            })
            .await?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(BackupError::RestoreToolFailure {
                tool,
                status: describe(output.status),
                stderr,
            });
        }
        if let Err(e) = write_result {
            return Err(BackupError::RestoreToolFailure {
                tool,
                status: describe(output.status),
                stderr: format!("failed to write input: {}", e),
            });
        }
        if !stderr.is_empty() {
            warn!(tool = %tool, stderr = %stderr, "Restore stderr");
        }

        info!(tool = %tool, bytes = sql.len(), "Database load finished");
        Ok(())
    }
}

fn tool_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn describe(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}
