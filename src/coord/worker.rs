#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::client::{ClientLink, ClientRpc, SuspendReason};
use crate::coord::Clock;
use crate::coord::phase::{DisplayPeriods, Phase, PhaseClock};
use crate::coord::status::{ErrorCode, SharedStatus};
use crate::error::SaverError;
use crate::gfx::{CANT_CONNECT_EXIT_CODE, DEFAULT_SAVER_EXE, Supervise};
use crate::task::catalog::{IncompatibilitySet, TaskSnapshot};
use crate::task::model::Task;
use crate::task::select::Selector;

const TICK_SLEEP: Duration = Duration::from_millis(250);
const SLEEPS_PER_TICK: u32 = 4;

/// How graphics processes are brought up on this host.
#[derive(Debug, Clone)]
pub enum LaunchVia {
    /// Spawn the graphics executables directly.
    Direct,
    /// Through the privileged helper binary at this path.
    Helper(PathBuf),
    /// By asking the client over RPC, for hosts where the saver process may
    /// not spawn anything itself.
    Client { user: String },
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub periods: DisplayPeriods,
    /// Where the default saver executable lives.
    pub install_dir: PathBuf,
    /// Working directory for the default saver.
    pub data_dir: PathBuf,
    /// Blank the screen and stop the worker this long after start.
    pub blank_after: Option<Duration>,
    pub launch_via: LaunchVia,
}

/// The screensaver coordinator: one cooperative worker that decides what the
/// screen shows, reconciles the one supervised graphics process against that
/// decision, and recovers from whatever the client or the process does.
pub struct Coordinator<R: ClientRpc, S: Supervise> {
    opts: CoordinatorOptions,
    link: ClientLink<R>,
    supervisor: S,
    clock: Box<dyn Clock>,
    status: SharedStatus,
    selector: Selector,
    snapshot: TaskSnapshot,
    incompatible: IncompatibilitySet,
    phase: PhaseClock,
    /// Owned copy of the task whose graphics we last showed. Never a
    /// reference into a snapshot; re-resolved by identity after refreshes.
    previous: Option<Task>,
    suspend_reason: SuspendReason,
    default_path: PathBuf,
    default_exists: bool,
    default_gfx_running: bool,
    science_gfx_running: bool,
    switch_to_default: bool,
    /// One launch or terminate per tick; set by whichever happens first.
    acted: bool,
    blank_at: Option<Duration>,
}

impl<R: ClientRpc, S: Supervise> Coordinator<R, S> {
    pub fn new(
        opts: CoordinatorOptions,
        rpc: R,
        supervisor: S,
        clock: Box<dyn Clock>,
        status: SharedStatus,
    ) -> Self {
        status.set_error(true, ErrorCode::Loading);

        let default_path = opts.install_dir.join(DEFAULT_SAVER_EXE);
        let default_exists = default_path.exists();
        if !default_exists {
            warn!("{}", SaverError::DefaultMissing(default_path.clone()));
            status.set_error(true, ErrorCode::CantLaunchDefault);
        }

        let now = clock.now();
        let (phase, switch_to_default) = PhaseClock::new(opts.periods, default_exists, now);
        let blank_at = opts.blank_after.map(|after| now + after);

        Self {
            link: ClientLink::new(rpc),
            supervisor,
            clock,
            status,
            selector: Selector::new(),
            snapshot: TaskSnapshot::default(),
            incompatible: IncompatibilitySet::new(),
            phase,
            previous: None,
            suspend_reason: SuspendReason::NOT_SUSPENDED,
            default_path,
            default_exists,
            default_gfx_running: false,
            science_gfx_running: false,
            switch_to_default,
            acted: false,
            blank_at,
            opts,
        }
    }

    /// Run until stop is requested or the blank timer fires. Sleeps 250 ms
    /// at a time, checking the stop flag at every boundary, and does the
    /// real work once per second.
    pub async fn run(mut self) {
        info!("screensaver coordinator worker started");
        loop {
            for _ in 0..SLEEPS_PER_TICK {
                if self.status.stop_requested() {
                    self.shutdown();
                    return;
                }
                tokio::time::sleep(TICK_SLEEP).await;
            }
            if let Err(e) = self.tick() {
                info!("worker stopping: {e}");
                self.status.request_stop();
            }
        }
    }

    /// One slow tick. An error means the worker should wind down; everything
    /// recoverable is handled inside and re-attempted next tick.
    pub fn tick(&mut self) -> Result<(), SaverError> {
        if self.status.stop_requested() {
            return Err(SaverError::StopRequested);
        }

        let now = self.clock.now();
        self.acted = false;

        if let Some(blank_at) = self.blank_at
            && now > blank_at
        {
            self.status.set_error(false, ErrorCode::Blanked);
            return Err(SaverError::BlankTimerExpired);
        }

        if !self.link.connected() {
            self.link.try_reconnect();
        }

        if self.link.connected() {
            if self.link.state_reset_pending() {
                if let Err(e) = self.link.refresh_state() {
                    debug!("client state refresh failed: {e}");
                    return Ok(());
                }
            }
            match self.link.refresh_tasks() {
                Ok((reason, snapshot)) => {
                    self.suspend_reason = reason;
                    self.snapshot = snapshot;
                }
                Err(e) => {
                    debug!("task refresh failed: {e}");
                    return Ok(());
                }
            }
        } else {
            self.snapshot.clear();
        }

        if self
            .phase
            .maybe_start_default_phase(now, self.default_exists, self.default_gfx_running)
        {
            self.switch_to_default = true;
        }
        if self
            .phase
            .maybe_start_science_phase(now, self.link.connected(), self.default_gfx_running)
        {
            self.switch_to_default = false;
        }

        // A real suspension takes science graphics off the screen; throttle
        // and short usage spikes must not.
        if self.suspend_reason.blocks_graphics() && !self.default_gfx_running {
            self.status.flag_error();
            if self.default_exists {
                self.switch_to_default = true;
            }
        }

        self.reconcile_to_default(now);
        self.reconcile_within_science(now);
        self.check_liveness();

        Ok(())
    }

    fn reconcile_to_default(&mut self, now: Duration) {
        if !self.switch_to_default {
            return;
        }
        if self.science_gfx_running {
            // Take science down now; the default launch waits for the next
            // tick so a terminate and a launch never share one.
            self.terminate_science();
            self.previous = None;
        } else if !self.default_gfx_running {
            self.switch_to_default = false;
            self.launch_default(now);
        }
    }

    fn reconcile_within_science(&mut self, now: Duration) {
        if self.phase.phase() != Phase::Science || self.switch_to_default {
            return;
        }

        if self.science_gfx_running {
            self.check_current_science(now);
        }

        if !self.science_gfx_running && !self.acted && !self.suspend_reason.blocks_graphics() {
            let exclude = self.previous.as_ref().map(Task::identity);
            let chosen =
                self.selector
                    .choose(&mut self.snapshot, exclude.as_ref(), &self.incompatible);
            match chosen {
                Some(task) => {
                    if self.default_gfx_running {
                        // Make room; the science launch happens next tick
                        // with the default saver's screen time banked.
                        self.phase.note_default_killed_for_science(now);
                        self.terminate_default();
                    } else {
                        self.launch_science(&task, now);
                    }
                }
                None => {
                    if !self.default_gfx_running {
                        self.status.flag_error();
                        if self.default_exists {
                            self.switch_to_default = true;
                        }
                    }
                }
            }
        }

        // A selector miss can still fill the screen this tick.
        if self.switch_to_default && !self.acted {
            self.switch_to_default = false;
            if !self.default_gfx_running {
                self.launch_default(now);
            }
        }
    }

    /// The science app is on screen; make sure its job still exists and
    /// rotate to a different one when the change interval says so.
    fn check_current_science(&mut self, now: Duration) {
        let current = self
            .previous
            .as_ref()
            .and_then(|p| self.snapshot.find_by_identity(&p.identity()))
            .cloned();

        match current {
            Some(task) => {
                self.previous = Some(task);
                if self.phase.change_due(now) {
                    let exclude = self.previous.as_ref().map(Task::identity);
                    if self
                        .snapshot
                        .active_graphics_tasks(exclude.as_ref(), &self.incompatible)
                        > 0
                    {
                        info!("rotation interval elapsed, changing science graphics");
                        self.terminate_science();
                    }
                    self.phase.note_change_attempt(now);
                }
            }
            None => {
                info!("displayed task no longer runnable, terminating its graphics");
                self.terminate_science();
                self.previous = None;
            }
        }
    }

    fn launch_default(&mut self, now: Duration) {
        self.acted = true;
        let retry_connect = !self.link.connected();
        match self.spawn_default(retry_connect) {
            Ok(()) => {
                self.default_gfx_running = true;
                self.phase.note_default_started(now);
                self.status.set_error(false, ErrorCode::Loading);
                info!(retry_connect, "default saver launched");
            }
            Err(e) => {
                warn!("failed to launch default saver: {e}");
                self.supervisor.clear();
                self.default_gfx_running = false;
                self.previous = None;
                self.status.set_error(true, ErrorCode::CantLaunchDefault);
            }
        }
    }

    fn spawn_default(&mut self, retry_connect: bool) -> Result<(), SaverError> {
        match &self.opts.launch_via {
            LaunchVia::Direct => {
                let mut args = vec!["--fullscreen".to_owned()];
                if retry_connect {
                    args.push("--retry_connect".to_owned());
                }
                self.supervisor
                    .launch(&self.opts.data_dir, &self.default_path, &args)
            }
            LaunchVia::Helper(helper) => {
                let mut args = vec![
                    "-default_gfx".to_owned(),
                    self.default_path.display().to_string(),
                    "--fullscreen".to_owned(),
                ];
                if retry_connect {
                    args.push("--retry_connect".to_owned());
                }
                self.supervisor.launch(&self.opts.data_dir, helper, &args)
            }
            LaunchVia::Client { user } => {
                self.link.run_graphics_app("runfullscreen", -1, user)?;
                self.supervisor.adopt_published()
            }
        }
    }

    fn launch_science(&mut self, task: &Task, now: Duration) {
        self.acted = true;
        match self.spawn_science(task) {
            Ok(()) => {
                self.science_gfx_running = true;
                self.previous = Some(task.clone());
                self.phase.note_science_launch(now);
                self.status.set_error(false, ErrorCode::Loading);
                info!(exe = %task.graphics_exec_path, "science graphics launched");
            }
            Err(e) => {
                if let SaverError::GraphicsIncompatible(path) = &e {
                    self.incompatible.mark(path);
                }
                warn!("failed to launch science graphics: {e}");
                self.supervisor.clear();
                self.science_gfx_running = false;
                self.previous = None;
            }
        }
    }

    fn spawn_science(&mut self, task: &Task) -> Result<(), SaverError> {
        match &self.opts.launch_via {
            LaunchVia::Direct => self.supervisor.launch(
                Path::new(&task.slot_path),
                Path::new(&task.graphics_exec_path),
                &["--fullscreen".to_owned()],
            ),
            LaunchVia::Helper(helper) => self.supervisor.launch(
                Path::new(&task.slot_path),
                helper,
                &[
                    "-launch_gfx".to_owned(),
                    task.slot.to_string(),
                    "--fullscreen".to_owned(),
                ],
            ),
            LaunchVia::Client { user } => {
                let slot = i32::try_from(task.slot).unwrap_or(i32::MAX);
                self.link.run_graphics_app("runfullscreen", slot, user)?;
                self.supervisor.adopt_published()
            }
        }
    }

    fn terminate_science(&mut self) {
        self.acted = true;
        self.request_client_stop();
        if let Err(e) = self.supervisor.terminate() {
            warn!("science graphics terminate: {e}");
        }
        self.science_gfx_running = false;
    }

    fn terminate_default(&mut self) {
        self.acted = true;
        self.request_client_stop();
        if let Err(e) = self.supervisor.terminate() {
            warn!("default saver terminate: {e}");
        }
        self.default_gfx_running = false;
    }

    /// On the client-assisted path the stop request goes out over RPC before
    /// the supervisor starts polling for the exit.
    fn request_client_stop(&mut self) {
        if let LaunchVia::Client { user } = &self.opts.launch_via
            && let Some(pid) = self.supervisor.current_pid()
        {
            let pid = i32::try_from(pid).unwrap_or(i32::MAX);
            if let Err(e) = self.link.run_graphics_app("stop", pid, user) {
                debug!("stop request to client failed: {e}");
            }
        }
    }

    /// Notice a process that went away on its own and classify the exit.
    fn check_liveness(&mut self) {
        if !self.supervisor.is_active() {
            return;
        }
        let Some(code) = self.supervisor.has_exited() else {
            return;
        };

        if self.default_gfx_running {
            // The default saver giving up on its own disables it for the
            // rest of the session, whether it could not reach the client or
            // simply crashed.
            if code == CANT_CONNECT_EXIT_CODE {
                warn!("default saver: {}", SaverError::DefaultCannotConnect);
                self.status.set_error(true, ErrorCode::DefaultCantConnect);
            } else {
                warn!("default saver: {}", SaverError::DefaultCrashed(code));
                self.status.set_error(true, ErrorCode::DefaultCrashed);
            }
            self.default_exists = false;
            self.phase.force_science();
        } else {
            debug!("graphics app exited with code {code}, re-selecting next tick");
            self.status.set_error(true, ErrorCode::NoGraphicsAppsExecuting);
        }

        self.supervisor.clear();
        self.default_gfx_running = false;
        self.science_gfx_running = false;
    }

    fn shutdown(&mut self) {
        if self.supervisor.is_active() || self.previous.is_some() {
            if self.default_gfx_running {
                info!("stopping: terminating default saver");
                self.terminate_default();
            } else {
                info!("stopping: terminating science graphics");
                self.terminate_science();
            }
            self.previous = None;
        }
        self.status.mark_stopped();
        info!("screensaver coordinator worker stopped");
    }
}
