#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::error::SaverError;
use crate::task::catalog::TaskSnapshot;
use crate::task::model::Task;

/// Why the client has stopped computing, as a bitset. The coordinator only
/// cares whether any bit besides the throttle/usage pair is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendReason(pub u32);

impl SuspendReason {
    pub const NOT_SUSPENDED: SuspendReason = SuspendReason(0);
    pub const BATTERIES: SuspendReason = SuspendReason(1);
    pub const USER_ACTIVE: SuspendReason = SuspendReason(2);
    pub const USER_REQ: SuspendReason = SuspendReason(4);
    pub const TIME_OF_DAY: SuspendReason = SuspendReason(8);
    pub const BENCHMARKS: SuspendReason = SuspendReason(16);
    pub const DISK_SIZE: SuspendReason = SuspendReason(32);
    pub const CPU_THROTTLE: SuspendReason = SuspendReason(64);
    pub const NO_RECENT_INPUT: SuspendReason = SuspendReason(128);
    pub const INITIAL_DELAY: SuspendReason = SuspendReason(256);
    pub const EXCLUSIVE_APP_RUNNING: SuspendReason = SuspendReason(512);
    pub const CPU_USAGE: SuspendReason = SuspendReason(1024);

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when the suspension should take graphics off the screen.
    /// Throttling and short CPU-usage spikes (an antivirus scan, say) must
    /// not tear down a running graphics app.
    #[must_use]
    pub fn blocks_graphics(self) -> bool {
        self.0 & !(Self::CPU_THROTTLE.0 | Self::CPU_USAGE.0) != 0
    }
}

impl std::ops::BitOr for SuspendReason {
    type Output = SuspendReason;

    fn bitor(self, rhs: SuspendReason) -> SuspendReason {
        SuspendReason(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientState {
    pub host_name: String,
    pub client_version: String,
}

/// The RPC surface the coordinator consumes. The wire format lives in the
/// host's client library; the coordinator only sees this trait.
pub trait ClientRpc {
    fn connect(&mut self) -> Result<(), SaverError>;
    fn get_state(&mut self) -> Result<ClientState, SaverError>;
    fn get_screensaver_tasks(&mut self) -> Result<(SuspendReason, Vec<Task>), SaverError>;
    /// Ask the client to start or stop a graphics app on the coordinator's
    /// behalf, for hosts where the saver itself may not spawn them.
    /// `verb` is `"runfullscreen"` or `"stop"`; `slot_or_pid` is a slot
    /// number when launching (-1 for the default saver) and a pid when
    /// stopping.
    fn run_graphics_app(&mut self, verb: &str, slot_or_pid: i32, user: &str)
    -> Result<(), SaverError>;
}

/// A `ClientRpc` for running without any local client: every call fails, so
/// the coordinator stays disconnected and keeps the default saver retrying.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRpc;

impl ClientRpc for OfflineRpc {
    fn connect(&mut self) -> Result<(), SaverError> {
        Err(SaverError::LinkDisconnected)
    }

    fn get_state(&mut self) -> Result<ClientState, SaverError> {
        Err(SaverError::ClientStateUnavailable("no client".to_owned()))
    }

    fn get_screensaver_tasks(&mut self) -> Result<(SuspendReason, Vec<Task>), SaverError> {
        Err(SaverError::LinkDisconnected)
    }

    fn run_graphics_app(
        &mut self,
        _verb: &str,
        _slot_or_pid: i32,
        _user: &str,
    ) -> Result<(), SaverError> {
        Err(SaverError::LinkDisconnected)
    }
}

/// Wraps the RPC handle with the reconnect policy: any error marks the link
/// disconnected, the next tick retries, and a successful reconnect forces a
/// full state refresh before task lists are trusted again.
#[derive(Debug)]
pub struct ClientLink<R> {
    rpc: R,
    connected: bool,
    state_reset_pending: bool,
    state: ClientState,
}

impl<R: ClientRpc> ClientLink<R> {
    pub fn new(rpc: R) -> Self {
        Self {
            rpc,
            connected: false,
            state_reset_pending: true,
            state: ClientState::default(),
        }
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        self.connected
    }

    #[must_use]
    pub fn state_reset_pending(&self) -> bool {
        self.state_reset_pending
    }

    #[must_use]
    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn try_reconnect(&mut self) -> bool {
        match self.rpc.connect() {
            Ok(()) => {
                self.connected = true;
                self.state_reset_pending = true;
                true
            }
            Err(_) => {
                self.connected = false;
                false
            }
        }
    }

    pub fn refresh_state(&mut self) -> Result<(), SaverError> {
        match self.rpc.get_state() {
            Ok(state) => {
                self.state = state;
                self.state_reset_pending = false;
                Ok(())
            }
            Err(e) => {
                self.connected = false;
                Err(e)
            }
        }
    }

    pub fn refresh_tasks(&mut self) -> Result<(SuspendReason, TaskSnapshot), SaverError> {
        match self.rpc.get_screensaver_tasks() {
            Ok((reason, tasks)) => Ok((reason, TaskSnapshot::new(tasks))),
            Err(e) => {
                self.connected = false;
                self.state_reset_pending = true;
                Err(e)
            }
        }
    }

    pub fn run_graphics_app(
        &mut self,
        verb: &str,
        slot_or_pid: i32,
        user: &str,
    ) -> Result<(), SaverError> {
        self.rpc.run_graphics_app(verb, slot_or_pid, user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_and_usage_spikes_do_not_block_graphics() {
        assert!(!SuspendReason::NOT_SUSPENDED.blocks_graphics());
        assert!(!SuspendReason::CPU_THROTTLE.blocks_graphics());
        assert!(!SuspendReason::CPU_USAGE.blocks_graphics());
        assert!(!(SuspendReason::CPU_THROTTLE | SuspendReason::CPU_USAGE).blocks_graphics());

        assert!(SuspendReason::USER_REQ.blocks_graphics());
        assert!(SuspendReason::BATTERIES.blocks_graphics());
        assert!((SuspendReason::CPU_THROTTLE | SuspendReason::TIME_OF_DAY).blocks_graphics());
    }

    struct FlakyRpc {
        connects: u32,
        fail_tasks: bool,
    }

    impl ClientRpc for FlakyRpc {
        fn connect(&mut self) -> Result<(), SaverError> {
            self.connects += 1;
            Ok(())
        }

        fn get_state(&mut self) -> Result<ClientState, SaverError> {
            Ok(ClientState::default())
        }

        fn get_screensaver_tasks(&mut self) -> Result<(SuspendReason, Vec<Task>), SaverError> {
            if self.fail_tasks {
                Err(SaverError::LinkDisconnected)
            } else {
                Ok((SuspendReason::NOT_SUSPENDED, Vec::new()))
            }
        }

        fn run_graphics_app(
            &mut self,
            _verb: &str,
            _slot_or_pid: i32,
            _user: &str,
        ) -> Result<(), SaverError> {
            Ok(())
        }
    }

    #[test]
    fn task_refresh_failure_disconnects_and_schedules_state_reset() {
        let mut link = ClientLink::new(FlakyRpc {
            connects: 0,
            fail_tasks: true,
        });

        assert!(!link.connected());
        assert!(link.try_reconnect());
        assert!(link.connected());
        assert!(link.state_reset_pending());

        link.refresh_state().expect("state");
        assert!(!link.state_reset_pending());

        assert!(link.refresh_tasks().is_err());
        assert!(!link.connected());
        assert!(link.state_reset_pending());
    }

    #[test]
    fn offline_rpc_never_connects() {
        let mut link = ClientLink::new(OfflineRpc);
        assert!(!link.try_reconnect());
        assert!(!link.connected());
    }
}
