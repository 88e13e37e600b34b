// Jackson Coxson
//! The command engine (C1): build an immutable [`Command`], `start()` it
//! into a running [`CommandProcess`], and `await()` or `kill()` it.
//!
//! Every external tool this crate drives — `ideviceinfo`, `simctl`,
//! `cfgutil`, `idevice-app-runner` — goes through this module rather than
//! calling `tokio::process::Command` directly, the same way the rest of
//! the codebase treats `other_examples`' `ShellExecutor`/`DeviceToolExecutor`
//! pair as the single seam between "what tool, what args" and "how do we
//! run a subprocess, capture it, and time it out".

pub mod capture;

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::Mutex;

pub use capture::{CaptureBuffer, CaptureReader};

use crate::error::CommandError;

/// Where a subprocess's stdin comes from.
#[derive(Debug, Clone)]
pub enum StdinSource {
    /// stdin is closed immediately.
    Empty,
    /// Inherit the parent process's stdin (`JVM` in spec.md's naming).
    Inherit,
    /// stdin is the contents of a file.
    File(PathBuf),
    /// stdin is a fixed byte buffer, written by an async copier.
    Bytes(Vec<u8>),
}

/// Where a subprocess's stdout/stderr goes. Regardless of this setting,
/// every byte is also appended to that stream's [`CaptureBuffer`].
#[derive(Debug, Clone)]
pub enum OutputSink {
    /// Captured only; nothing is written anywhere else (`PROCESS`).
    Capture,
    /// Inherit the parent process's corresponding stream (`JVM`).
    Inherit,
    /// Truncate-and-write to a file.
    File(PathBuf),
    /// Append to a file.
    FileAppend(PathBuf),
}

/// A predicate over a finished [`CommandResult`] deciding success.
/// Defaults to "exit code is zero".
#[derive(Clone)]
pub struct SuccessPredicate(Arc<dyn Fn(&CommandResult) -> bool + Send + Sync>);

impl SuccessPredicate {
    pub fn new(f: impl Fn(&CommandResult) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    fn call(&self, result: &CommandResult) -> bool {
        (self.0)(result)
    }
}

impl Default for SuccessPredicate {
    fn default() -> Self {
        Self::new(|r| r.exit_code == Some(0))
    }
}

impl fmt::Debug for SuccessPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SuccessPredicate(..)")
    }
}

/// An immutable description of a subprocess invocation.
#[derive(Debug, Clone)]
pub struct Command {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    stdin: StdinSource,
    stdout: OutputSink,
    stderr: OutputSink,
    success_predicate: SuccessPredicate,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            stdin: StdinSource::Empty,
            stdout: OutputSink::Capture,
            stderr: OutputSink::Capture,
            success_predicate: SuccessPredicate::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, source: StdinSource) -> Self {
        self.stdin = source;
        self
    }

    pub fn stdout(mut self, sink: OutputSink) -> Self {
        self.stdout = sink;
        self
    }

    pub fn stderr(mut self, sink: OutputSink) -> Self {
        self.stderr = sink;
        self
    }

    pub fn success_predicate(mut self, predicate: SuccessPredicate) -> Self {
        self.success_predicate = predicate;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn cli_args(&self) -> &[String] {
        &self.args
    }

    /// Starts the subprocess, wiring up async copiers for every
    /// non-inherited stream, and returns a handle to it.
    pub async fn start(&self) -> Result<CommandProcess, CommandError> {
        tracing::debug!(program = %self.program, args = ?self.args, "starting command");

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(match &self.stdin {
            StdinSource::Inherit => Stdio::inherit(),
            StdinSource::Empty => Stdio::null(),
            StdinSource::File(_) | StdinSource::Bytes(_) => Stdio::piped(),
        });
        cmd.stdout(match &self.stdout {
            OutputSink::Inherit => Stdio::inherit(),
            _ => Stdio::piped(),
        });
        cmd.stderr(match &self.stderr {
            OutputSink::Inherit => Stdio::inherit(),
            _ => Stdio::piped(),
        });

        let mut child = cmd
            .spawn()
            .map_err(|e| CommandError::StartFailure(self.clone(), e))?;

        let stdin_source = self.stdin.clone();
        let stdin_handle = child.stdin.take();
        let stdin_copier = tokio::spawn(async move {
            if let Some(mut stdin) = stdin_handle {
                match stdin_source {
                    StdinSource::Bytes(bytes) => {
                        let _ = stdin.write_all(&bytes).await;
                    }
                    StdinSource::File(path) => {
                        if let Ok(contents) = tokio::fs::read(&path).await {
                            let _ = stdin.write_all(&contents).await;
                        }
                    }
                    StdinSource::Empty | StdinSource::Inherit => {}
                }
                let _ = stdin.shutdown().await;
            }
        });

        let stdout_capture = CaptureBuffer::new();
        let stdout_copier = spawn_output_copier(
            child.stdout.take(),
            self.stdout.clone(),
            stdout_capture.clone(),
        );

        let stderr_capture = CaptureBuffer::new();
        let stderr_copier = spawn_output_copier(
            child.stderr.take(),
            self.stderr.clone(),
            stderr_capture.clone(),
        );

        Ok(CommandProcess {
            command: self.clone(),
            child: Arc::new(Mutex::new(Some(child))),
            stdin_copier: Arc::new(Mutex::new(Some(stdin_copier))),
            stdout_copier: Arc::new(Mutex::new(Some(stdout_copier))),
            stderr_copier: Arc::new(Mutex::new(Some(stderr_copier))),
            stdout_capture,
            stderr_capture,
            result: Arc::new(tokio::sync::OnceCell::new()),
        })
    }

    /// `start().await()`, except the process is killed if this future is
    /// dropped before completion (task cancellation).
    pub async fn execute(&self) -> Result<CommandResult, CommandError> {
        let process = self.start().await?;
        let guard = KillOnCancel::new(process.clone());
        let result = process.r#await().await;
        guard.disarm();
        result
    }
}

fn spawn_output_copier(
    pipe: Option<impl tokio::io::AsyncRead + Unpin + Send + 'static>,
    sink: OutputSink,
    capture: CaptureBuffer,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else {
            capture.close();
            return;
        };
        let mut file_sink = match &sink {
            OutputSink::File(path) => tokio::fs::File::create(path).await.ok(),
            OutputSink::FileAppend(path) => tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .ok(),
            _ => None,
        };

        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    capture.push(&buf[..n]);
                    if let Some(file) = file_sink.as_mut() {
                        let _ = file.write_all(&buf[..n]).await;
                    }
                }
                Err(_) => break,
            }
        }
        capture.close();
    })
}

/// A running subprocess with its async copiers and capture buffers.
#[derive(Clone)]
pub struct CommandProcess {
    command: Command,
    child: Arc<Mutex<Option<Child>>>,
    stdin_copier: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    stdout_copier: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    stderr_copier: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    stdout_capture: CaptureBuffer,
    stderr_capture: CaptureBuffer,
    result: Arc<tokio::sync::OnceCell<CommandResult>>,
}

impl fmt::Debug for CommandProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandProcess")
            .field("command", &self.command)
            .finish()
    }
}

impl CommandProcess {
    pub fn stdout_reader(&self) -> CaptureReader {
        self.stdout_capture.reader()
    }

    pub fn stderr_reader(&self) -> CaptureReader {
        self.stderr_capture.reader()
    }

    /// Blocks until the process exits, cancels the stdin copier, waits
    /// on the output copiers, computes the [`CommandResult`] exactly
    /// once, and applies the success predicate.
    pub async fn r#await(&self) -> Result<CommandResult, CommandError> {
        let exit_code = self.wait_for_exit().await?;

        if let Some(handle) = self.stdin_copier.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.stdout_copier.lock().await.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.stderr_copier.lock().await.take() {
            let _ = handle.await;
        }

        let result = self
            .result
            .get_or_init(|| async {
                CommandResult {
                    exit_code,
                    stdout_bytes: self.stdout_capture.snapshot(),
                    stderr_bytes: self.stderr_capture.snapshot(),
                }
            })
            .await
            .clone();

        if self.command.success_predicate.call(&result) {
            Ok(result)
        } else {
            Err(CommandError::CommandFailure(self.command.clone(), result))
        }
    }

    /// As [`Self::r#await`], but fails with [`CommandError::Timeout`] if
    /// the deadline elapses. The process is NOT killed; the caller
    /// decides whether to call [`Self::kill`].
    pub async fn await_timeout(&self, timeout: Duration) -> Result<CommandResult, CommandError> {
        match tokio::time::timeout(timeout, self.r#await()).await {
            Ok(result) => result,
            Err(_) => Err(CommandError::Timeout),
        }
    }

    async fn wait_for_exit(&self) -> Result<Option<i32>, CommandError> {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => {
                let status = child.wait().await?;
                Ok(status.code())
            }
            None => {
                // A previous await() already reaped the child; replay the
                // cached exit code via the memoized result if present.
                Ok(self.result.get().and_then(|r| r.exit_code))
            }
        }
    }

    /// Sends the OS termination signal without waiting for exit.
    pub async fn kill(&self) -> Result<(), CommandError> {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            child.start_kill()?;
        }
        Ok(())
    }

    /// Kills the process, then waits for it to exit. The documented
    /// idiom for "kill and wait".
    pub async fn kill_and_wait(&self) -> Result<(), CommandError> {
        self.kill().await?;
        let _ = self.r#await().await;
        Ok(())
    }
}

/// Kills a [`CommandProcess`] if dropped before [`Self::disarm`] is
/// called, realizing "`execute()` kills the process if the caller's
/// task is cancelled" without a blocking `Drop` impl for the common
/// case: disarming never touches the process at all.
struct KillOnCancel {
    process: Option<CommandProcess>,
}

impl KillOnCancel {
    fn new(process: CommandProcess) -> Self {
        Self {
            process: Some(process),
        }
    }

    fn disarm(mut self) {
        self.process = None;
    }
}

impl Drop for KillOnCancel {
    fn drop(&mut self) {
        if let Some(process) = self.process.take() {
            tokio::spawn(async move {
                let _ = process.kill().await;
            });
        }
    }
}

/// The outcome of an awaited [`CommandProcess`].
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: Option<i32>,
    stdout_bytes: Vec<u8>,
    stderr_bytes: Vec<u8>,
}

impl CommandResult {
    pub fn stdout_bytes(&self) -> &[u8] {
        &self.stdout_bytes
    }

    pub fn stderr_bytes(&self) -> &[u8] {
        &self.stderr_bytes
    }

    /// Lossy UTF-8 view of stdout, for the common case of text-based tools.
    pub fn stdout(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout_bytes)
    }

    pub fn stderr(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr_bytes)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn true_succeeds_with_default_predicate() {
        let cmd = Command::new("true");
        let result = cmd.execute().await.expect("true should succeed");
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn false_fails_command_failure() {
        let cmd = Command::new("false");
        let err = cmd.execute().await.expect_err("false should fail");
        assert!(matches!(err, CommandError::CommandFailure(_, _)));
    }

    #[tokio::test]
    async fn stdout_is_captured() {
        let cmd = Command::new("echo").arg("hello");
        let result = cmd.execute().await.expect("echo should succeed");
        assert_eq!(result.stdout().trim(), "hello");
    }

    #[tokio::test]
    async fn await_timeout_fails_without_killing() {
        let cmd = Command::new("sleep").arg("5");
        let process = cmd.start().await.expect("sleep should start");
        let err = process
            .await_timeout(Duration::from_millis(50))
            .await
            .expect_err("should time out");
        assert!(matches!(err, CommandError::Timeout));
        process.kill().await.expect("cleanup kill should succeed");
    }

    #[tokio::test]
    async fn custom_success_predicate_accepts_nonzero_exit() {
        let cmd = Command::new("sh")
            .arg("-c")
            .arg("exit 7")
            .success_predicate(SuccessPredicate::new(|r| r.exit_code == Some(7)));
        let result = cmd.execute().await.expect("exit 7 should be treated as success");
        assert_eq!(result.exit_code, Some(7));
    }
}
