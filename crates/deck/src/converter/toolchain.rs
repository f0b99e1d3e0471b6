//! Subprocess boundary for the conversion toolchain
//!
//! The toolchain runs in its own process group with the request workspace as
//! working directory. A run ends in a typed [`ToolchainOutcome`]; on timeout
//! or cancellation the whole group is killed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use command_group::AsyncCommandGroup;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ConversionConfig;

pub const ENV_DESCRIPTOR: &str = "DECK_DESCRIPTOR";
pub const ENV_OUTPUT: &str = "DECK_OUTPUT";
pub const ENV_WORKSPACE: &str = "DECK_WORKSPACE";

/// Grace period for draining pipes after the group is gone
const PIPE_DRAIN: Duration = Duration::from_secs(2);

/// Everything one toolchain run needs
#[derive(Debug, Clone)]
pub struct ToolchainInvocation {
    pub workspace: PathBuf,
    pub descriptor: PathBuf,
    pub output: PathBuf,
    pub timeout: Duration,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolchainOutcome {
    Exited {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    TimedOut {
        stdout: String,
        stderr: String,
    },
    Cancelled,
}

impl ToolchainOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, ToolchainOutcome::Exited { exit_code: Some(0), .. })
    }

    /// Short description without captured output
    pub fn describe(&self) -> String {
        match self {
            ToolchainOutcome::Exited { exit_code: Some(code), .. } => format!("exit code {}", code),
            ToolchainOutcome::Exited { exit_code: None, .. } => "terminated by signal".to_string(),
            ToolchainOutcome::TimedOut { .. } => "timed out".to_string(),
            ToolchainOutcome::Cancelled => "cancelled".to_string(),
        }
    }

    /// Error stream, falling back to standard output when stderr is empty
    pub fn diagnostics(&self) -> &str {
        match self {
            ToolchainOutcome::Exited { stdout, stderr, .. }
            | ToolchainOutcome::TimedOut { stdout, stderr } => {
                if stderr.trim().is_empty() {
                    stdout
                } else {
                    stderr
                }
            }
            ToolchainOutcome::Cancelled => "",
        }
    }
}

/// Something that turns a staged workspace into an output file
#[async_trait]
pub trait Toolchain: Send + Sync {
    fn name(&self) -> &str;

    /// Run once; `Err` only when the process could not be started
    async fn run(
        &self,
        invocation: &ToolchainInvocation,
        cancel: &CancellationToken,
    ) -> std::io::Result<ToolchainOutcome>;
}

/// The configured external program
#[derive(Debug, Clone)]
pub struct SubprocessToolchain {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl SubprocessToolchain {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Point `NODE_PATH` at the global npm root when running node without one
    pub async fn with_node_path_detection(mut self) -> Self {
        if self.program != "node" || self.env.contains_key("NODE_PATH") || std::env::var_os("NODE_PATH").is_some() {
            return self;
        }

        let output = tokio::time::timeout(
            Duration::from_secs(10),
            Command::new("npm").args(["root", "-g"]).stdin(Stdio::null()).output(),
        )
        .await;

        match output {
            Ok(Ok(out)) if out.status.success() => {
                let root = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if !root.is_empty() {
                    tracing::info!("[CONVERTER] Using NODE_PATH={}", root);
                    self.env.insert("NODE_PATH".to_string(), root);
                }
            }
            Ok(Ok(out)) => tracing::warn!(
                "[CONVERTER] npm root -g exited with {:?}; NODE_PATH left unset",
                out.status.code()
            ),
            Ok(Err(e)) => tracing::warn!("[CONVERTER] npm not available ({}); NODE_PATH left unset", e),
            Err(_) => tracing::warn!("[CONVERTER] npm root -g timed out; NODE_PATH left unset"),
        }
        self
    }
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn collect(handle: JoinHandle<String>) -> String {
    match tokio::time::timeout(PIPE_DRAIN, handle).await {
        Ok(Ok(text)) => text,
        _ => String::new(),
    }
}

#[async_trait]
impl Toolchain for SubprocessToolchain {
    fn name(&self) -> &str {
        &self.program
    }

    async fn run(
        &self,
        invocation: &ToolchainInvocation,
        cancel: &CancellationToken,
    ) -> std::io::Result<ToolchainOutcome> {
        let started = Instant::now();

        let mut command = Command::new(&self.program);
        command
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&invocation.workspace)
            .args(&self.args)
            .envs(&self.env)
            .env(ENV_DESCRIPTOR, &invocation.descriptor)
            .env(ENV_OUTPUT, &invocation.output)
            .env(ENV_WORKSPACE, &invocation.workspace);

        let mut child = command.group_spawn()?;
        tracing::debug!(
            "[CONVERTER] Spawned {} {:?} in {}",
            self.program,
            self.args,
            invocation.workspace.display()
        );

        let stdout = drain(child.inner().stdout.take());
        let stderr = drain(child.inner().stderr.take());

        let waited = tokio::select! {
            res = tokio::time::timeout(invocation.timeout, child.wait()) => match res {
                Ok(status) => Waited::Exited(status),
                Err(_) => Waited::TimedOut,
            },
            _ = cancel.cancelled() => Waited::Cancelled,
        };

        let outcome = match waited {
            Waited::Exited(status) => {
                let status = status?;
                ToolchainOutcome::Exited {
                    exit_code: status.code(),
                    stdout: collect(stdout).await,
                    stderr: collect(stderr).await,
                }
            }
            Waited::TimedOut => {
                tracing::warn!(
                    "[CONVERTER] {} exceeded {:.0}s, killing process group",
                    self.program,
                    invocation.timeout.as_secs_f64()
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!("[CONVERTER] Failed to kill process group: {}", e);
                }
                ToolchainOutcome::TimedOut {
                    stdout: collect(stdout).await,
                    stderr: collect(stderr).await,
                }
            }
            Waited::Cancelled => {
                tracing::warn!("[CONVERTER] Cancelled, killing process group");
                if let Err(e) = child.kill().await {
                    tracing::warn!("[CONVERTER] Failed to kill process group: {}", e);
                }
                ToolchainOutcome::Cancelled
            }
        };

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[CONVERTER] {} finished: {}",
            self.program,
            outcome.describe()
        );
        if let ToolchainOutcome::Exited { stdout, stderr, .. } | ToolchainOutcome::TimedOut { stdout, stderr } = &outcome {
            tracing::debug!("[CONVERTER] stdout:\n{}\nstderr:\n{}", stdout, stderr);
        }

        Ok(outcome)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn invocation(dir: &std::path::Path, timeout: Duration) -> ToolchainInvocation {
        ToolchainInvocation {
            workspace: dir.to_path_buf(),
            descriptor: dir.join("build.json"),
            output: dir.join("out.pptx"),
            timeout,
        }
    }

    fn sh(script: &str) -> SubprocessToolchain {
        SubprocessToolchain::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn successful_run_sees_contract_environment() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = sh(r#"printf built > "$DECK_OUTPUT"; echo "$DECK_DESCRIPTOR""#);

        let outcome = toolchain
            .run(&invocation(dir.path(), Duration::from_secs(10)), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.succeeded());
        assert_eq!(std::fs::read_to_string(dir.path().join("out.pptx")).unwrap(), "built");
        match outcome {
            ToolchainOutcome::Exited { stdout, .. } => assert!(stdout.contains("build.json")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_zero_exit_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = sh("echo 'module not found' >&2; exit 3")
            .run(&invocation(dir.path(), Duration::from_secs(10)), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.succeeded());
        assert_eq!(outcome.describe(), "exit code 3");
        assert!(outcome.diagnostics().contains("module not found"));
    }

    #[tokio::test]
    async fn timeout_kills_the_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let outcome = sh("sleep 30 & sleep 30")
            .run(&invocation(dir.path(), Duration::from_millis(200)), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, ToolchainOutcome::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancellation_kills_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = sh("sleep 30")
            .run(&invocation(dir.path(), Duration::from_secs(60)), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, ToolchainOutcome::Cancelled);
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SubprocessToolchain::new("deck-no-such-program", vec![])
            .run(&invocation(dir.path(), Duration::from_secs(1)), &CancellationToken::new())
            .await;
        assert!(result.is_err());
    }
}
