//! `TerminalManager` — owns and multiplexes all active PTY sessions and
//! background jobs.
//!
//! Callers interact exclusively through this struct.  The manager is designed
//! to be owned by a single Tokio task and passed around behind an `Arc<Mutex>`
//! when shared access is needed.

use crate::{
    error::{Result, TerminalError},
    safety::{self, SAFE_ENV_VARS},
    session::PtySession,
    truncate,
    types::{
        BackgroundJob, ExecOptions, ExecResult, JobId, JobStatus, LineRingBuffer, SessionId,
        SessionInfo,
    },
};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

struct BackgroundJobState {
    job: Mutex<BackgroundJob>,
    output: Mutex<LineRingBuffer>,
}

/// Manages multiple concurrent PTY sessions and background jobs.
pub struct TerminalManager {
    sessions: HashMap<SessionId, PtySession>,
    /// Tracks all background jobs (running, completed, failed, timed-out).
    jobs: HashMap<JobId, Arc<BackgroundJobState>>,
    /// Working-directory confinement root — spec.md §4.E.
    workspace_root: PathBuf,
}

/// Apply the environment-stripping half of the command-execution contract —
/// spec.md §4.E ("environment stripped to a safe subset").
fn apply_safe_env(cmd: &mut AsyncCommand) {
    cmd.env_clear();
    for key in SAFE_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
}

/// Put the child in its own process group on Unix so `kill_session` can
/// signal the whole group — spec.md §4.E ("spawn detached into its own
/// process group").
#[cfg(unix)]
fn detach_process_group(cmd: &mut AsyncCommand) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn detach_process_group(_cmd: &mut AsyncCommand) {}

impl TerminalManager {
    /// Create an empty manager with no open sessions or jobs, confining
    /// working directories to `workspace_root` or `/tmp`.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            sessions: HashMap::new(),
            jobs: HashMap::new(),
            workspace_root: workspace_root.into(),
        }
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Open a new PTY session and return its `SessionId`.
    ///
    /// # Arguments
    ///
    /// * `shell` – shell binary path (defaults to `$SHELL` or `/bin/bash`).
    /// * `cwd`   – starting directory (defaults to the process's cwd).
    pub async fn create_session(
        &mut self,
        shell: Option<&str>,
        cwd: Option<&str>,
    ) -> Result<SessionId> {
        let shell = shell
            .map(str::to_string)
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/bash".to_string());

        let cwd = cwd
            .map(str::to_string)
            .or_else(|| {
                std::env::current_dir()
                    .ok()
                    .and_then(|p| p.to_str().map(str::to_string))
            })
            .unwrap_or_else(|| "/".to_string());

        let id = SessionId::new();
        let session = PtySession::new(&shell, &cwd)?;

        info!("Created PTY session {} (shell={shell}, cwd={cwd})", id);
        self.sessions.insert(id.clone(), session);
        Ok(id)
    }

    /// Send `input` to the specified session's stdin.
    pub async fn write(&self, id: &SessionId, input: &str) -> Result<()> {
        let session = self.get_session(id)?;
        debug!("Write {} bytes to session {id}", input.len());
        session.write(input)
    }

    /// Drain and return all buffered output from the session.
    pub async fn read(&self, id: &SessionId) -> Result<String> {
        let session = self.get_session(id)?;
        session.read()
    }

    /// Send a kill signal to the session's shell and remove it from the map.
    pub async fn kill(&mut self, id: &SessionId) -> Result<()> {
        let session = self.get_session(id)?;
        session.kill()?;
        self.sessions.remove(id);
        info!("Killed and removed session {id}");
        Ok(())
    }

    /// Return metadata snapshots for all tracked sessions.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|(id, s)| SessionInfo {
                id: id.clone(),
                shell: s.shell.clone(),
                cwd: s.cwd.clone(),
                created_at: s.created_at,
                is_alive: s.is_alive(),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // One-shot execution (enhanced — async, safety, truncation, timeout)
    // -----------------------------------------------------------------------

    /// Execute `command` via `sh -c` with safety checking, timeout, and output
    /// truncation.
    ///
    /// This is the preferred replacement for `exec_oneshot`.  It uses
    /// `tokio::process::Command` so the timeout future can race against the
    /// child without blocking the Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `CommandBlocked` — command was rejected by the safety checker.
    /// - `Timeout`        — child exceeded `options.timeout_secs`.
    /// - `PtySpawn`       — child could not be spawned.
    /// - `IoError`        — underlying I/O failure.
    pub async fn exec(&self, command: &str, options: ExecOptions) -> Result<ExecResult> {
        debug!("exec: {command}");

        // Safety gate — fast path for explicit admin bypass.
        if !options.skip_safety {
            safety::check_command(command).map_err(|reason| TerminalError::CommandBlocked {
                reason,
            })?;
        }

        let requested_cwd = options
            .cwd
            .as_deref()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| self.workspace_root.clone());
        let cwd = safety::confine_cwd(&requested_cwd, &self.workspace_root)
            .map_err(|reason| TerminalError::CommandBlocked { reason })?;

        let timeout_secs = options.effective_timeout_secs();
        let timeout_duration = std::time::Duration::from_secs(timeout_secs);

        // Spawn the child process.
        let mut command_builder = AsyncCommand::new("sh");
        command_builder.arg("-c").arg(command).current_dir(&cwd);
        apply_safe_env(&mut command_builder);
        let child = command_builder
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| TerminalError::PtySpawn(format!("spawn failed: {e}")))?;

        // `wait_with_output` takes `self` by value, so we drive it on a spawned
        // task and communicate back via a oneshot channel.  We capture the PID
        // first so we can issue a SIGKILL on the timeout path.
        let pid = child.id();
        let (tx, rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let _ = tx.send(child.wait_with_output().await);
        });

        match tokio::time::timeout(timeout_duration, rx).await {
            // The task completed within the deadline and sent a result.
            Ok(Ok(Ok(output))) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let stdout = truncate::truncate_output(
                    &strip_text(&output.stdout),
                    options.max_output_chars,
                );
                let stderr = truncate::truncate_output(
                    &strip_text(&output.stderr),
                    options.max_output_chars,
                );
                Ok(ExecResult { exit_code, stdout, stderr })
            }

            // wait_with_output() returned an I/O error.
            Ok(Ok(Err(e))) => Err(TerminalError::IoError(e)),

            // The oneshot channel was dropped — the spawned task panicked.
            Ok(Err(_recv_err)) => Err(TerminalError::PtySpawn(
                "wait task panicked unexpectedly".to_string(),
            )),

            // Deadline expired — kill the child via its PID.
            Err(_elapsed) => {
                // POSIX kill(2) with SIGKILL is the most reliable way to
                // terminate the child when we no longer own the Child handle.
                if let Some(raw_pid) = pid {
                    // Safety: raw_pid is our direct child, still running.
                    #[cfg(unix)]
                    unsafe {
                        libc::kill(raw_pid as libc::pid_t, libc::SIGKILL);
                    }
                    #[cfg(not(unix))]
                    {
                        // On non-Unix platforms best effort via taskkill or noop.
                        let _ = std::process::Command::new("taskkill")
                            .args(["/F", "/PID", &raw_pid.to_string()])
                            .output();
                    }
                }
                Err(TerminalError::Timeout {
                    ms: timeout_secs * 1_000,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Background job management
    // -----------------------------------------------------------------------

    /// Spawn `command` in the background and return a `JobId` immediately.
    ///
    /// The job runs in a detached Tokio task.  Poll its status with
    /// `job_status()` or retrieve all jobs with `job_list()`.
    ///
    /// # Errors
    ///
    /// - `CommandBlocked` — command was rejected by the safety checker.
    /// - `PtySpawn`       — child could not be spawned.
    pub async fn exec_background(&mut self, command: &str) -> Result<JobId> {
        // Safety check always runs for background jobs — there is no skip_safety
        // equivalent here because background jobs are harder to interrupt.
        safety::check_command(command).map_err(|reason| TerminalError::CommandBlocked {
            reason,
        })?;
        let cwd = safety::confine_cwd(&self.workspace_root, &self.workspace_root)
            .map_err(|reason| TerminalError::CommandBlocked { reason })?;

        let id = JobId::new();
        let mut command_builder = AsyncCommand::new("sh");
        command_builder
            .arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        apply_safe_env(&mut command_builder);
        detach_process_group(&mut command_builder);

        let mut child = command_builder
            .spawn()
            .map_err(|e| TerminalError::PtySpawn(format!("spawn failed: {e}")))?;
        let pid = child.id();

        let state = Arc::new(BackgroundJobState {
            job: Mutex::new(BackgroundJob::new(id.clone(), command, pid)),
            output: Mutex::new(LineRingBuffer::new()),
        });
        self.jobs.insert(id.clone(), Arc::clone(&state));

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let state_out = Arc::clone(&state);
        if let Some(stdout) = stdout {
            tokio::spawn(stream_lines_into_buffer(stdout, Arc::clone(&state_out)));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(stream_lines_into_buffer(stderr, state_out));
        }

        let state_wait = Arc::clone(&state);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(exit_status) => {
                    let exit_code = exit_status.code().unwrap_or(-1);
                    let mut guard = state_wait.job.lock().unwrap();
                    if !matches!(guard.status, JobStatus::TimedOut) {
                        guard.status = JobStatus::Completed;
                    }
                    let combined = state_wait.output.lock().unwrap().render();
                    guard.result = Some(ExecResult {
                        exit_code,
                        stdout: combined,
                        stderr: String::new(),
                    });
                    guard.pid = None;
                }
                Err(e) => {
                    let mut guard = state_wait.job.lock().unwrap();
                    guard.status = JobStatus::Failed;
                    guard.result = Some(ExecResult {
                        exit_code: -1,
                        stdout: String::new(),
                        stderr: format!("wait failed: {e}"),
                    });
                    guard.pid = None;
                    warn!("Background job wait failed: {e}");
                }
            }
        });

        info!("Spawned background job {id}: {command}");
        Ok(id)
    }

    /// Return a snapshot of the background job with `id`.
    ///
    /// # Errors
    ///
    /// - `JobNotFound` — no job with that ID exists.
    pub fn job_status(&self, id: &JobId) -> Result<BackgroundJob> {
        self.jobs
            .get(id)
            .map(|state| state.job.lock().unwrap().clone())
            .ok_or_else(|| TerminalError::JobNotFound(id.to_string()))
    }

    /// Return the ring-buffered stdout/stderr captured so far for `id`.
    pub fn job_output(&self, id: &JobId) -> Result<String> {
        self.jobs
            .get(id)
            .map(|state| state.output.lock().unwrap().render())
            .ok_or_else(|| TerminalError::JobNotFound(id.to_string()))
    }

    /// Return snapshots of all tracked background jobs.
    pub fn job_list(&self) -> Vec<BackgroundJob> {
        self.jobs
            .values()
            .map(|state| state.job.lock().unwrap().clone())
            .collect()
    }

    /// Send `signal` to a background job — spec.md §4.E ("`kill_session`
    /// sends the requested signal to the group first, then the single
    /// process"). Best-effort: the group send is attempted even if the
    /// process already left its own group.
    ///
    /// # Errors
    ///
    /// - `JobNotFound` — no job with that ID exists.
    pub fn kill_session(&mut self, id: &JobId, signal: i32) -> Result<()> {
        let state = self
            .jobs
            .get(id)
            .ok_or_else(|| TerminalError::JobNotFound(id.to_string()))?;

        let pid = {
            let mut guard = state.job.lock().unwrap();
            if matches!(guard.status, JobStatus::Running) {
                guard.status = JobStatus::TimedOut;
            }
            guard.pid
        };

        if let Some(raw_pid) = pid {
            #[cfg(unix)]
            unsafe {
                libc::kill(-(raw_pid as libc::pid_t), signal);
                libc::kill(raw_pid as libc::pid_t, signal);
            }
            #[cfg(not(unix))]
            {
                let _ = signal;
                let _ = std::process::Command::new("taskkill")
                    .args(["/F", "/PID", &raw_pid.to_string()])
                    .output();
            }
        }

        info!(job_id = %id, "kill_session sent signal {signal}");
        Ok(())
    }

    /// Deprecated alias for [`TerminalManager::kill_session`] with `SIGKILL`.
    pub fn job_kill(&mut self, id: &JobId) -> Result<()> {
        #[cfg(unix)]
        let sigkill = libc::SIGKILL;
        #[cfg(not(unix))]
        let sigkill = 9;
        self.kill_session(id, sigkill)
    }

    // -----------------------------------------------------------------------
    // Legacy one-shot (kept for backwards compatibility)
    // -----------------------------------------------------------------------

    /// Execute a command without a PTY, capture stdout/stderr, and return.
    ///
    /// # Deprecated
    ///
    /// Use `exec` instead — it supports async timeout, safety checking, and
    /// output truncation.  This method uses `std::process::Command` which
    /// blocks the calling thread and has no timeout support.
    #[deprecated(since = "0.2.0", note = "Use `exec` with `ExecOptions` instead")]
    pub async fn exec_oneshot(&self, command: &str) -> Result<ExecResult> {
        debug!("exec_oneshot (deprecated): {command}");

        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| TerminalError::PtySpawn(format!("spawn failed: {e}")))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = strip_text(&output.stdout);
        let stderr = strip_text(&output.stderr);

        Ok(ExecResult {
            exit_code,
            stdout,
            stderr,
        })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn get_session(&self, id: &SessionId) -> Result<&PtySession> {
        self.sessions
            .get(id)
            .ok_or_else(|| TerminalError::SessionNotFound(id.to_string()))
    }
}

impl Default for TerminalManager {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

/// Strip ANSI escape codes and convert bytes to a UTF-8 string.
fn strip_text(raw: &[u8]) -> String {
    let clean = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&clean).into_owned()
}

/// Drain an async child pipe line by line into the job's ring buffer.
async fn stream_lines_into_buffer<R>(pipe: R, state: Arc<BackgroundJobState>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncBufReadExt;
    let mut lines = tokio::io::BufReader::new(pipe).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let clean = strip_text(line.as_bytes());
                state.output.lock().unwrap().push_line(clean);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("background job output stream error: {e}");
                break;
            }
        }
    }
}
