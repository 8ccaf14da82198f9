//! Script executor
//!
//! Spawns the interpreter, streams stdout into a staged output file and
//! forwards stderr to our own stderr while keeping a tail for error reports.
//! A running script is terminated on timeout or when the run is cancelled.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};
use crate::graph::CancelToken;
use crate::storage::StagedFile;

/// Bytes of stderr kept for error messages
const STDERR_TAIL_BYTES: usize = 4096;

/// How often a running child is polled for exit, timeout and cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One interpreter invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub interpreter: String,
    pub script: PathBuf,
    pub args: Vec<String>,
    pub current_dir: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

/// Result of script execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub duration: Duration,
    pub output_bytes: u64,
    pub output_sha256: String,
}

/// How a wait for the child ended
enum Waited {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Script executor
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    /// Time between SIGTERM and SIGKILL when a script is stopped
    grace: Duration,
    cancel: CancelToken,
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl ScriptExecutor {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            cancel: CancelToken::new(),
        }
    }

    /// Stop running scripts once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the command line: interpreter, script, arguments
    pub fn command(&self, invocation: &Invocation) -> Command {
        let program = which::which(&invocation.interpreter).unwrap_or_else(|e| {
            debug!(
                interpreter = %invocation.interpreter,
                error = %e,
                "interpreter not found in PATH, trying as-is"
            );
            PathBuf::from(&invocation.interpreter)
        });

        let mut cmd = Command::new(program);
        cmd.arg(&invocation.script)
            .args(&invocation.args)
            .current_dir(&invocation.current_dir)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null());

        // Own process group, so a timeout reaches the script's children too
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        cmd
    }

    /// Run `invocation`, capturing stdout byte-for-byte into `output`
    ///
    /// `output` is only replaced when the process exits with status zero.
    pub fn execute(&self, invocation: &Invocation, output: &Path) -> Result<ExecutionResult> {
        let start = Instant::now();

        fs::create_dir_all(&invocation.current_dir)
            .map_err(|e| Error::io(&invocation.current_dir, e))?;

        let staged = StagedFile::new(output)?;

        let mut cmd = self.command(invocation);
        cmd.stdout(Stdio::from(staged.handle()?));
        cmd.stderr(Stdio::piped());

        debug!(command = ?cmd, "spawning");

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            program: invocation.interpreter.clone(),
            source,
        })?;

        let stderr = child.stderr.take().map(forward_stderr);

        let waited = self.wait(&mut child, invocation.timeout);

        let stderr_tail = match stderr {
            Some(handle) => handle.join().unwrap_or_default(),
            None => Vec::new(),
        };
        let stderr_text = String::from_utf8_lossy(&stderr_tail).into_owned();

        // On every early return staged is dropped, discarding the partial output
        let status = match waited.map_err(|e| Error::io(&invocation.script, e))? {
            Waited::Exited(status) => status,
            Waited::TimedOut => {
                return Err(Error::TimedOut {
                    after: invocation.timeout.unwrap_or_default(),
                    stderr: stderr_text,
                });
            }
            Waited::Cancelled => {
                debug!(script = %invocation.script.display(), "script stopped by cancellation");
                return Err(Error::Cancelled);
            }
        };
        let duration = start.elapsed();

        if !status.success() {
            return Err(Error::ProcessFailed {
                code: status.code(),
                stderr: stderr_text,
            });
        }

        staged.commit()?;
        let (output_bytes, output_sha256) = digest_file(output)?;

        debug!(
            script = %invocation.script.display(),
            duration_ms = duration.as_millis() as u64,
            size_bytes = output_bytes,
            "script completed"
        );

        Ok(ExecutionResult {
            exit_code: status.code().unwrap_or(0),
            duration,
            output_bytes,
            output_sha256,
        })
    }

    /// Wait for the child, terminating it on timeout or cancellation
    fn wait(&self, child: &mut Child, timeout: Option<Duration>) -> io::Result<Waited> {
        let start = Instant::now();

        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Waited::Exited(status));
            }
            if self.cancel.is_cancelled() {
                self.terminate(child)?;
                return Ok(Waited::Cancelled);
            }
            if timeout.is_some_and(|timeout| start.elapsed() >= timeout) {
                self.terminate(child)?;
                return Ok(Waited::TimedOut);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    #[cfg(unix)]
    fn terminate(&self, child: &mut Child) -> io::Result<()> {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let group = Pid::from_raw(child.id() as i32);
        let _ = killpg(group, Signal::SIGTERM);

        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline {
            if child.try_wait()?.is_some() {
                // Leftover grandchildren still hold the pipes open
                let _ = killpg(group, Signal::SIGKILL);
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }

        let _ = killpg(group, Signal::SIGKILL);
        child.wait()?; // Reap zombie
        Ok(())
    }

    #[cfg(not(unix))]
    fn terminate(&self, child: &mut Child) -> io::Result<()> {
        child.kill()?;
        child.wait()?;
        Ok(())
    }
}

/// Copy the child's stderr to ours, returning the last bytes seen
fn forward_stderr(mut source: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut tail = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            let _ = io::stderr().lock().write_all(&buf[..n]);
            tail.extend_from_slice(&buf[..n]);
            if tail.len() > STDERR_TAIL_BYTES {
                tail.drain(..tail.len() - STDERR_TAIL_BYTES);
            }
        }
        tail
    })
}

/// Size and SHA-256 of a file
pub fn digest_file(path: &Path) -> Result<(u64, String)> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok((bytes.len() as u64, hex::encode(hasher.finalize())))
}
