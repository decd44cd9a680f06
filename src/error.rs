#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SaverError {
    #[error("client RPC link is disconnected")]
    LinkDisconnected,

    #[error("client state unavailable: {0}")]
    ClientStateUnavailable(String),

    #[error("failed to launch '{exe}': {msg}")]
    LaunchFailed { exe: String, msg: String },

    #[error("helper did not publish a graphics pid within {0:?}")]
    LaunchTimeout(Duration),

    #[error("graphics app did not exit within {0:?}")]
    TerminateTimeout(Duration),

    #[error("graphics app '{0}' is incompatible with this host")]
    GraphicsIncompatible(String),

    #[error("default saver executable not found at {0}")]
    DefaultMissing(PathBuf),

    #[error("default saver could not connect to the client")]
    DefaultCannotConnect,

    #[error("default saver exited unexpectedly with code {0}")]
    DefaultCrashed(i32),

    #[error("blank timer expired")]
    BlankTimerExpired,

    #[error("stop requested")]
    StopRequested,

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid config key '{0}'")]
    InvalidConfigKey(String),

    #[error("invalid config value for '{key}': {msg}")]
    InvalidConfigValue { key: String, msg: String },

    #[error("io error at {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}
