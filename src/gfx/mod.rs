#![forbid(unsafe_code)]

pub mod supervisor;

use std::path::Path;

use crate::error::SaverError;

/// File name of the default idle animation, looked up in the install dir.
#[cfg(windows)]
pub const DEFAULT_SAVER_EXE: &str = "gridscr.exe";
#[cfg(not(windows))]
pub const DEFAULT_SAVER_EXE: &str = "gridscr";

/// Exit status the default saver reports when it cannot reach the client.
/// The raw code is -107; a Unix wait status truncates it to one byte.
#[cfg(windows)]
pub const CANT_CONNECT_EXIT_CODE: i32 = -107;
#[cfg(not(windows))]
pub const CANT_CONNECT_EXIT_CODE: i32 = 149;

/// Supervision of the single on-screen graphics process. At most one
/// process is tracked at a time; implementations serialize all entries so a
/// terminate cannot race a liveness probe or a UI-thread readout.
pub trait Supervise {
    /// Spawn `executable` detached in `working_dir`. On the helper path the
    /// executable is the helper itself and the real child pid is awaited on
    /// the pid channel (up to 8 s).
    fn launch(&self, working_dir: &Path, executable: &Path, args: &[String])
    -> Result<(), SaverError>;

    /// Await a pid on the channel for a launch somebody else performed
    /// (the client, after a `run_graphics_app` RPC).
    fn adopt_published(&self) -> Result<(), SaverError>;

    fn is_active(&self) -> bool;

    fn current_pid(&self) -> Option<u32>;

    /// Non-blocking reap. `Some(code)` once the process is gone; a helper
    /// channel that cannot say counts as still running.
    fn has_exited(&self) -> Option<i32>;

    /// Best-effort teardown. The handle is cleared even when the process
    /// had to be killed the hard way or never confirmed its exit.
    fn terminate(&self) -> Result<(), SaverError>;

    /// Drop the handle of a process already observed as exited.
    fn clear(&self);
}
