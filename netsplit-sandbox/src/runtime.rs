use std::{fmt, sync::Arc};

use crate::command;

/// The ID (or name) of a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("no such container: {0}")]
    NotFound(ContainerId),
    #[error("command error: {0}")]
    Command(#[from] command::Error),
    #[error("unexpected runtime output: {0:?}")]
    Malformed(String),
}

/// Everything needed to start a sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    /// Full image reference, `repository:tag`.
    pub image: String,
    /// Container name.
    pub name: String,
    /// Command keeping the container alive.
    pub command: Vec<String>,
    /// Network mode, `host` for sandboxes mutating the host packet filter.
    pub network_mode: String,
    /// Remove the container once its command exits.
    pub auto_remove: bool,
}

/// The result of running a command inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    /// Stdout and stderr, combined.
    pub output: String,
}

/// The operations the sandbox needs from a container runtime. All calls are blocking.
///
/// Containers are always started detached.
pub trait ContainerRuntime: fmt::Debug + Send + Sync + 'static {
    /// Returns `true` if the image is present locally.
    fn has_image(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Pulls the image from its registry.
    fn pull(&self, image: &str) -> Result<(), RuntimeError>;

    /// Starts a detached container.
    fn create(&self, spec: &SandboxSpec) -> Result<ContainerId, RuntimeError>;

    /// Force-removes a container. Returns [`RuntimeError::NotFound`] if it is already gone.
    fn remove(&self, id: &ContainerId) -> Result<(), RuntimeError>;

    /// Runs `argv` in the container. A non-zero exit of `argv` is not an error at this level.
    fn exec(
        &self,
        id: &ContainerId,
        argv: &[String],
        privileged: bool,
    ) -> Result<ExecOutput, RuntimeError>;
}

impl<T: ContainerRuntime + ?Sized> ContainerRuntime for Arc<T> {
    fn has_image(&self, image: &str) -> Result<bool, RuntimeError> {
        (**self).has_image(image)
    }

    fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        (**self).pull(image)
    }

    fn create(&self, spec: &SandboxSpec) -> Result<ContainerId, RuntimeError> {
        (**self).create(spec)
    }

    fn remove(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        (**self).remove(id)
    }

    fn exec(
        &self,
        id: &ContainerId,
        argv: &[String],
        privileged: bool,
    ) -> Result<ExecOutput, RuntimeError> {
        (**self).exec(id, argv, privileged)
    }
}
