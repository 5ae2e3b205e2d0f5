use std::{
    io::{BufRead, BufReader, Read},
    process::{Child, ChildStderr, ChildStdout, Command, Stdio},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tracing::{Level, debug, info, trace, warn};
use waka_core::{CommandRunner, RunnerError, StopSignal};
use waka_model::{CommandLine, ExecStatus, OUTPUT_TARGET};

use crate::{
    error::{ExecError, ExecResult},
    proc::ShellConfig,
    util::{decode_line, exit_status},
    utils::limits::attach_rlimits,
};

/// Runs each command through a shell and emits its output as `tracing`
/// events on [`OUTPUT_TARGET`]: stdout at INFO, stderr at WARN.
///
/// On Unix the shell leads its own process group, so [`stop`](CommandRunner::stop)
/// reaches every process the command started.
pub struct ShellRunner {
    cfg: ShellConfig,
    active: Mutex<Option<ActiveRun>>,
}

struct ActiveRun {
    /// `None` until the child is spawned.
    pid: Option<u32>,
    /// `stop` arrived before the child existed.
    stop_pending: bool,
    /// SIGTERM already sent to the group.
    signalled: bool,
    finished: Arc<AtomicBool>,
}

impl ActiveRun {
    fn terminate(&mut self, pid: u32, grace: Duration) {
        if !self.signalled {
            self.signalled = true;
            terminate(pid, Arc::clone(&self.finished), grace);
        }
    }
}

impl ShellRunner {
    pub fn new(cfg: ShellConfig) -> Self {
        Self {
            cfg,
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.cfg
    }

    fn command(&self, line: &CommandLine) -> ExecResult<Command> {
        cfg_if::cfg_if! {
            if #[cfg(target_family = "windows")] {
                let mut cmd = Command::new("cmd");
                cmd.arg("/C").arg(line.as_str());
            } else {
                if self.cfg.shell.trim().is_empty() {
                    return Err(ExecError::MissingProgram);
                }
                let mut cmd = Command::new(&self.cfg.shell);
                cmd.arg("-c").arg(line.as_str());
            }
        }

        if let Some(cwd) = &self.cfg.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &self.cfg.env {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        attach_rlimits(&mut cmd, &self.cfg.limits);
        Ok(cmd)
    }

    fn spawn(&self, line: &CommandLine) -> ExecResult<Child> {
        let mut cmd = self.command(line)?;
        trace!(target: "waka.exec.shell", command = %line, "spawn");
        cmd.spawn().map_err(|e| ExecError::Spawn(e.to_string()))
    }

    fn execute(&self, line: &CommandLine, signal: &StopSignal) -> ExecResult<ExecStatus> {
        if signal.is_raised() {
            debug!(target: "waka.exec.shell", command = %line, "stopped before spawn");
            return Ok(ExecStatus::CANCELLED);
        }

        let finished = Arc::new(AtomicBool::new(false));
        *self.lock_active() = Some(ActiveRun {
            pid: None,
            stop_pending: false,
            signalled: false,
            finished: Arc::clone(&finished),
        });

        let mut child = match self.spawn(line) {
            Ok(child) => child,
            Err(e) => {
                self.lock_active().take();
                return Err(e);
            }
        };

        // A stop that arrived while spawning is applied now.
        {
            let mut active = self.lock_active();
            if let Some(run) = active.as_mut() {
                let pid = child.id();
                run.pid = Some(pid);
                if run.stop_pending || signal.is_raised() {
                    info!(target: "waka.exec.shell", pid, "stopping command requested during spawn");
                    run.terminate(pid, self.cfg.kill_grace);
                }
            }
        }

        let (stdout, stderr) = self.take_pipes(&mut child)?;

        // The stderr reader reports through the caller's dispatcher, not the global one.
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        std::thread::scope(|s| {
            s.spawn(|| tracing::dispatcher::with_default(&dispatch, || pump(stderr, Level::WARN)));
            pump(stdout, Level::INFO);
        });

        let waited = child.wait();
        finished.store(true, Ordering::Release);
        let signalled = self.lock_active().take().is_some_and(|run| run.signalled);

        let status = waited?;
        if signalled || signal.is_raised() {
            debug!(target: "waka.exec.shell", ?status, "run stopped");
            return Ok(ExecStatus::CANCELLED);
        }
        Ok(exit_status(status))
    }

    /// Both output pipes, or the child is killed, reaped and unregistered.
    fn take_pipes(&self, child: &mut Child) -> ExecResult<(ChildStdout, ChildStderr)> {
        if let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) {
            return Ok((stdout, stderr));
        }
        if let Err(e) = child.kill() {
            debug!(target: "waka.exec.shell", pid = child.id(), error = %e, "kill after missing pipe failed");
        }
        let _ = child.wait();
        if let Some(run) = self.lock_active().take() {
            run.finished.store(true, Ordering::Release);
        }
        Err(ExecError::MissingPipe)
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(ShellConfig::default())
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &CommandLine, signal: &StopSignal) -> Result<ExecStatus, RunnerError> {
        Ok(self.execute(command, signal)?)
    }

    fn stop(&self) {
        let mut guard = self.lock_active();
        let Some(run) = guard.as_mut() else {
            debug!(target: "waka.exec.shell", "stop: nothing running");
            return;
        };
        if run.signalled || run.stop_pending {
            debug!(target: "waka.exec.shell", pid = ?run.pid, "stop already requested");
            return;
        }
        match run.pid {
            Some(pid) => {
                info!(target: "waka.exec.shell", pid, "stopping command");
                run.terminate(pid, self.cfg.kill_grace);
            }
            None => {
                debug!(target: "waka.exec.shell", "stop requested before spawn");
                run.stop_pending = true;
            }
        }
    }
}

/// Forward every line of `src` as an output event at `level`.
fn pump(src: impl Read, level: Level) {
    let mut reader = BufReader::new(src);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = decode_line(&buf);
                if level == Level::WARN {
                    tracing::warn!(target: OUTPUT_TARGET, "{line}");
                } else {
                    tracing::info!(target: OUTPUT_TARGET, "{line}");
                }
            }
            Err(e) => {
                warn!(target: "waka.exec.shell", error = %e, "output stream read failed");
                break;
            }
        }
    }
}

/// SIGTERM the group now, SIGKILL it after `grace` unless the run ended.
#[cfg(unix)]
fn terminate(pid: u32, finished: Arc<AtomicBool>, grace: Duration) {
    use crate::util::signal_group;

    if let Err(e) = signal_group(pid, libc::SIGTERM) {
        warn!(target: "waka.exec.shell", pid, error = %e, "SIGTERM failed");
    }

    let spawned = std::thread::Builder::new()
        .name("waka-kill".into())
        .spawn(move || {
            std::thread::sleep(grace);
            if finished.load(Ordering::Acquire) {
                return;
            }
            warn!(target: "waka.exec.shell", pid, "grace period elapsed; killing process group");
            if let Err(e) = signal_group(pid, libc::SIGKILL) {
                debug!(target: "waka.exec.shell", pid, error = %e, "SIGKILL failed");
            }
        });
    if let Err(e) = spawned {
        warn!(target: "waka.exec.shell", error = %e, "unable to schedule forced kill");
    }
}

#[cfg(not(unix))]
fn terminate(pid: u32, _finished: Arc<AtomicBool>, _grace: Duration) {
    warn!(target: "waka.exec.shell", pid, "process-group termination is not supported on this OS");
}
