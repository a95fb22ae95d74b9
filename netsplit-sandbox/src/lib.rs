#![doc(issue_tracker_base_url = "https://github.com/chainbound/netsplit/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

use std::time::Duration;

pub mod command;
mod context;
pub mod docker;
mod options;
pub mod runtime;

pub use context::ExecutionContext;
pub use docker::DockerCli;
pub use options::{SandboxOptions, DEFAULT_IMAGE, LIFETIME_MARGIN};
pub use runtime::{ContainerId, ContainerRuntime, ExecOutput, RuntimeError, SandboxSpec};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A command ran in the sandbox but exited with a non-zero code.
    #[error("`{command}` exited with code {exit_code}: {}", .output.trim())]
    Execution { command: String, exit_code: i32, output: String },
    /// The image couldn't be pulled, or the container couldn't be started, within the retry
    /// budget.
    #[error("{what} unavailable after {attempts} attempts: {source}")]
    ResourceUnavailable {
        what: String,
        attempts: usize,
        #[source]
        source: RuntimeError,
    },
    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("sandbox exit timeout {exit:?} must exceed expire timeout {expire:?} by at least {margin:?}")]
    InvalidLifetime { expire: Duration, exit: Duration, margin: Duration },
}

impl Error {
    /// Returns the exit code if this is an [`Error::Execution`].
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Execution { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
