//! Process supervisor for MCP server subprocesses.
//!
//! Resolves the platform-specific executable, layers environment variables,
//! spawns the child with piped stdio, drains its stderr into `tracing`, and
//! terminates it with a grace period before escalating to a kill.

use crate::config::ServerConfig;
use crate::error::McpError;
use crate::settings::LaunchDefaults;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

/// How long to wait for the stderr drain to reach EOF after the child exits.
const STDERR_FLUSH_TIMEOUT: Duration = Duration::from_millis(250);

/// Operating-system family, for command resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Unix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Unix => "unix",
        }
    }
}

/// A resolved program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

/// Resolve the executable for `config` on `platform`.
///
/// On Windows, `npx` and `npm` are batch shims and must be invoked as
/// `npx.cmd` / `npm.cmd`. Everything else is used verbatim.
pub fn resolve_command(config: &ServerConfig, platform: Platform) -> Invocation {
    let program = match (platform, config.command.as_str()) {
        (Platform::Windows, "npx") => "npx.cmd".to_string(),
        (Platform::Windows, "npm") => "npm.cmd".to_string(),
        _ => config.command.clone(),
    };
    Invocation {
        program,
        args: config.args.clone(),
    }
}

/// A supervised MCP server process.
pub struct ProcessHandle {
    server: String,
    pid: Option<u32>,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Spawn the server described by `config`.
    ///
    /// The child inherits the current environment, then `defaults.env`, then
    /// `config.env` (last wins). Must be called inside a Tokio runtime.
    pub fn launch(config: &ServerConfig, defaults: &LaunchDefaults) -> Result<Self, McpError> {
        let invocation = resolve_command(config, Platform::current());

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(&defaults.env)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(|e| McpError::Launch {
            command: invocation.program.clone(),
            source: e,
        })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| drain_stderr(config.name.clone(), pid, stderr));

        tracing::info!(
            server = %config.name,
            program = %invocation.program,
            pid = ?pid,
            "Launched MCP server"
        );

        Ok(Self {
            server: config.name.clone(),
            pid,
            child,
            stdin,
            stdout,
            stderr_task,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Hand the stdio pipes to a protocol client. Returns `None` once taken.
    pub fn take_stdio(&mut self) -> Option<(ChildStdin, ChildStdout)> {
        match (self.stdin.take(), self.stdout.take()) {
            (Some(stdin), Some(stdout)) => Some((stdin, stdout)),
            (stdin, stdout) => {
                self.stdin = stdin;
                self.stdout = stdout;
                None
            }
        }
    }

    /// Exit status if the child has already exited.
    pub fn try_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Close stdin, wait up to `grace` for exit, then kill.
    ///
    /// Idempotent: an already-exited child is just reaped again.
    pub async fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.try_status() {
            self.flush_stderr().await;
            return Some(status);
        }

        // EOF on stdin is the MCP stdio shutdown signal.
        drop(self.stdin.take());

        let status = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::warn!(server = %self.server, "Failed to wait for MCP server: {e}");
                None
            }
            Err(_) => {
                tracing::warn!(
                    server = %self.server,
                    pid = ?self.pid,
                    "MCP server did not exit within {}ms, killing",
                    grace.as_millis()
                );
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(server = %self.server, "Failed to kill MCP server: {e}");
                }
                self.try_status()
            }
        };

        self.flush_stderr().await;
        tracing::debug!(server = %self.server, pid = ?self.pid, ?status, "MCP server terminated");
        status
    }

    async fn flush_stderr(&mut self) {
        if let Some(mut task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_FLUSH_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                // A grandchild may still hold the pipe open.
                task.abort();
            }
        }
    }
}

/// Forward each stderr line to `tracing` so the pipe never fills up.
fn drain_stderr(server: String, pid: Option<u32>, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end();
                    if !line.is_empty() {
                        tracing::debug!(
                            target: "hostrun_mcp::stderr",
                            server = %server,
                            pid = ?pid,
                            "{line}"
                        );
                    }
                }
                Err(e) => {
                    tracing::debug!(server = %server, "stderr drain stopped: {e}");
                    break;
                }
            }
        }
    })
}
