#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::SaverError;
use crate::gfx::Supervise;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const LAUNCH_WINDOW: Duration = Duration::from_secs(8);
const TERMINATE_WINDOW: Duration = Duration::from_secs(2);

/// Where the privileged helper publishes the pid of the graphics app it
/// spawned. One small file per user; the helper writes it, the supervisor
/// polls it. A content of `0` means the app has exited; an unreadable file
/// means the helper cannot say yet.
#[derive(Debug, Clone)]
pub struct PidChannel {
    path: PathBuf,
}

impl PidChannel {
    #[must_use]
    pub fn for_user(dir: &Path, user: &str) -> Self {
        Self {
            path: dir.join(format!("gridsaver_ss_{user}")),
        }
    }

    #[must_use]
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn read_pid(&self) -> Option<u32> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        raw.trim().parse().ok()
    }

    /// Zero the channel once at worker start so a stale pid from a previous
    /// session cannot be adopted. After this the worker only reads.
    pub fn reset(&self) -> Result<(), SaverError> {
        std::fs::write(&self.path, b"0\n").map_err(|source| SaverError::IoPath {
            path: self.path.clone(),
            source,
        })
    }
}

/// How graphics processes come to life on this host.
#[derive(Debug, Clone)]
pub enum LaunchMode {
    /// Spawn the graphics executable directly and keep the child handle.
    Direct,
    /// Launch through the privileged helper binary; it publishes the real
    /// child pid on the channel and its kill verb takes processes down.
    Helper {
        helper_path: PathBuf,
        channel: PidChannel,
    },
    /// The client drives the helper after an RPC from the coordinator; the
    /// supervisor only watches the channel.
    ClientAssisted { channel: PidChannel },
}

#[derive(Debug)]
enum ProcessHandle {
    Child(Child),
    Helper {
        pid: u32,
        /// The helper process when this side spawned it. The helper execs
        /// into the graphics app, so killing/reaping this child reaches the
        /// app itself.
        spawned: Option<Child>,
    },
}

/// Owns the one displayed graphics process. The internal mutex serializes
/// launch, reap and terminate with each other and with any UI thread that
/// snapshots the displayed window through this handle.
#[derive(Debug)]
pub struct ProcessSupervisor {
    mode: LaunchMode,
    current: Mutex<Option<ProcessHandle>>,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(mode: LaunchMode) -> Self {
        Self {
            mode,
            current: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ProcessHandle>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channel(&self) -> Option<&PidChannel> {
        match &self.mode {
            LaunchMode::Direct => None,
            LaunchMode::Helper { channel, .. } | LaunchMode::ClientAssisted { channel } => {
                Some(channel)
            }
        }
    }

    fn await_published_pid(
        channel: &PidChannel,
        mut spawned: Option<Child>,
    ) -> Result<ProcessHandle, SaverError> {
        let deadline = Instant::now() + LAUNCH_WINDOW;
        loop {
            if let Some(child) = spawned.as_mut() {
                // Reap the helper if it forked and left; the published pid
                // is still authoritative either way.
                let _ = child.try_wait();
            }
            if let Some(pid) = channel.read_pid()
                && pid != 0
            {
                return Ok(ProcessHandle::Helper { pid, spawned });
            }
            if Instant::now() >= deadline {
                if let Some(mut child) = spawned {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                return Err(SaverError::LaunchTimeout(LAUNCH_WINDOW));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Supervise for ProcessSupervisor {
    fn launch(
        &self,
        working_dir: &Path,
        executable: &Path,
        args: &[String],
    ) -> Result<(), SaverError> {
        // In client-assisted mode the client owns the child; a process
        // spawned here would never be the one on screen.
        if matches!(self.mode, LaunchMode::ClientAssisted { .. }) {
            return Err(SaverError::Other(
                "client-assisted graphics are launched by the client; adopt them from the pid channel"
                    .to_owned(),
            ));
        }

        let mut current = self.lock();

        let child = Command::new(executable)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SaverError::LaunchFailed {
                exe: executable.display().to_string(),
                msg: e.to_string(),
            })?;

        let handle = if let LaunchMode::Helper { channel, .. } = &self.mode {
            Self::await_published_pid(channel, Some(child))?
        } else {
            ProcessHandle::Child(child)
        };
        debug!(exe = %executable.display(), "graphics process launched");
        *current = Some(handle);
        Ok(())
    }

    fn adopt_published(&self) -> Result<(), SaverError> {
        let Some(channel) = self.channel() else {
            return Err(SaverError::Other(
                "no pid channel configured for this launch mode".to_owned(),
            ));
        };
        let handle = Self::await_published_pid(channel, None)?;
        *self.lock() = Some(handle);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    fn current_pid(&self) -> Option<u32> {
        match self.lock().as_ref() {
            Some(ProcessHandle::Child(child)) => Some(child.id()),
            Some(ProcessHandle::Helper { pid, .. }) => Some(*pid),
            None => None,
        }
    }

    fn has_exited(&self) -> Option<i32> {
        let mut current = self.lock();
        match current.as_mut()? {
            ProcessHandle::Child(child) => match child.try_wait() {
                Ok(Some(status)) => Some(exit_code(status)),
                Ok(None) => None,
                // The pid is gone entirely; treat as an anonymous exit.
                Err(_) => Some(-1),
            },
            ProcessHandle::Helper { .. } => {
                // Only the helper knows; an unreadable channel counts as
                // still running.
                match self.channel().and_then(PidChannel::read_pid) {
                    Some(0) => Some(0),
                    _ => None,
                }
            }
        }
    }

    fn terminate(&self) -> Result<(), SaverError> {
        let mut current = self.lock();
        let Some(handle) = current.take() else {
            return Ok(());
        };

        match handle {
            ProcessHandle::Child(mut child) => {
                let _ = child.kill();
                let _ = child.wait();
                Ok(())
            }
            ProcessHandle::Helper { pid, mut spawned } => {
                if let LaunchMode::Helper { helper_path, .. } = &self.mode {
                    let status = Command::new(helper_path)
                        .args(["-kill_gfx", &pid.to_string()])
                        .stdin(Stdio::null())
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status();
                    if let Err(e) = status {
                        warn!("helper kill verb failed: {e}");
                    }
                }
                // On the client-assisted path the stop request has already
                // gone out over RPC; either way, wait for the exit to show
                // up on the channel or on the spawned child itself.
                let exited = self.poll_for_exit(spawned.as_mut());

                // Unconditional kill as a safety net.
                if let Some(mut child) = spawned {
                    let _ = child.kill();
                    let _ = child.wait();
                } else {
                    kill_pid(pid);
                }

                if exited {
                    Ok(())
                } else {
                    Err(SaverError::TerminateTimeout(TERMINATE_WINDOW))
                }
            }
        }
    }

    fn clear(&self) {
        *self.lock() = None;
    }
}

impl ProcessSupervisor {
    fn poll_for_exit(&self, mut spawned: Option<&mut Child>) -> bool {
        let deadline = Instant::now() + TERMINATE_WINDOW;
        loop {
            if let Some(child) = spawned.as_deref_mut()
                && let Ok(Some(_)) = child.try_wait()
            {
                return true;
            }
            if matches!(self.channel().and_then(PidChannel::read_pid), Some(0)) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    // Killed-by-signal has no code; report the raw wait status style -1.
    status.code().unwrap_or(-1)
}

fn kill_pid(pid: u32) {
    #[cfg(unix)]
    let result = Command::new("kill")
        .args(["-KILL", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    #[cfg(windows)]
    let result = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        warn!("unconditional kill of pid {pid} failed: {e}");
    }
}
