use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::{
    docker::DockerCli,
    options::SandboxOptions,
    runtime::{ContainerId, ContainerRuntime, RuntimeError, SandboxSpec},
    Error, Result,
};

#[derive(Debug, Clone)]
struct Sandbox {
    id: ContainerId,
    created_at: Instant,
    expires_at: Instant,
}

impl Sandbox {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Runs commands in a long-lived, privileged, host-networked container.
///
/// Mutating the host packet filter requires root. Instead of requiring the calling process to be
/// privileged, commands run in a helper container attached to the host network. Creating a
/// container per command would be slow, so a single container is kept around and renewed once
/// it expires:
///
/// - it is created lazily on the first [`ExecutionContext::exec`];
/// - it exits on its own after `exit_timeout`, and is auto-removed by the runtime;
/// - after `expire_timeout` the next call force-removes it and starts a fresh one. Since
///   `exit_timeout >= expire_timeout + 15s`, a command started before expiry is never cut short.
///
/// The context is meant to be shared (e.g. in an [`Arc`](std::sync::Arc)) by every component
/// issuing packet-filter commands. Only the renew-or-create path is serialized; commands against
/// a valid sandbox run concurrently.
#[derive(Debug)]
pub struct ExecutionContext {
    runtime: Box<dyn ContainerRuntime>,
    options: SandboxOptions,
    sandbox: Mutex<Option<Sandbox>>,
}

impl ExecutionContext {
    /// Creates a new context on top of the given runtime. No container is started until the first
    /// command is executed.
    pub fn new(runtime: impl ContainerRuntime, options: SandboxOptions) -> Result<Self> {
        options.validate()?;

        Ok(Self { runtime: Box::new(runtime), options, sandbox: Mutex::new(None) })
    }

    /// Creates a new context using the `docker` CLI.
    pub fn docker(options: SandboxOptions) -> Result<Self> {
        Self::new(DockerCli::default(), options)
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    /// Returns the ID of the current sandbox, if one has been created and not removed.
    pub fn sandbox_id(&self) -> Option<ContainerId> {
        self.sandbox.lock().as_ref().map(|s| s.id.clone())
    }

    /// Runs `argv` in the sandbox and returns its combined output. Creates or renews the sandbox
    /// first if needed.
    pub fn exec(&self, argv: &[String]) -> Result<String> {
        let id = self.ensure_sandbox()?;

        let out = match self.runtime.exec(&id, argv, true) {
            Ok(out) => out,
            Err(RuntimeError::NotFound(gone)) => {
                // Removed behind our back. Forget it so the next call starts a new one.
                warn!(container = %gone, "sandbox disappeared, will recreate on next call");
                self.forget(&gone);
                return Err(RuntimeError::NotFound(gone).into());
            }
            Err(e) => return Err(e.into()),
        };

        debug!(container = %id, cmd = ?argv, exit_code = out.exit_code, output = out.output.trim(), "executed in sandbox");

        if out.exit_code != 0 {
            return Err(Error::Execution {
                command: argv.join(" "),
                exit_code: out.exit_code,
                output: out.output,
            });
        }

        Ok(out.output)
    }

    /// Force-removes the current sandbox, if any. A sandbox that is already gone is not an
    /// error. The next [`ExecutionContext::exec`] creates a new one.
    pub fn shutdown(&self) -> Result<()> {
        let Some(sandbox) = self.sandbox.lock().take() else {
            return Ok(());
        };

        debug!(container = %sandbox.id, age = ?sandbox.created_at.elapsed(), "shutting down sandbox");

        match self.runtime.remove(&sandbox.id) {
            Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn forget(&self, id: &ContainerId) {
        let mut guard = self.sandbox.lock();
        if guard.as_ref().is_some_and(|s| &s.id == id) {
            *guard = None;
        }
    }

    /// Returns the ID of a valid sandbox, renewing or creating it under the lock.
    fn ensure_sandbox(&self) -> Result<ContainerId> {
        let mut guard = self.sandbox.lock();

        if let Some(sandbox) = guard.as_ref() {
            if !sandbox.is_expired(Instant::now()) {
                return Ok(sandbox.id.clone());
            }
        }

        if let Some(stale) = guard.take() {
            self.remove_sandbox(&stale);
        }

        self.ensure_image()?;
        let sandbox = self.create_sandbox()?;
        let id = sandbox.id.clone();
        *guard = Some(sandbox);

        Ok(id)
    }

    /// Force-removes an expired sandbox. Failures other than "not found" are retried, then
    /// logged: the old container will exit by itself anyway.
    fn remove_sandbox(&self, sandbox: &Sandbox) {
        debug!(container = %sandbox.id, age = ?sandbox.created_at.elapsed(), "removing expired sandbox");

        let res = self.options.remove_retry.retry(|attempt| match self.runtime.remove(&sandbox.id) {
            Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => {
                warn!(container = %sandbox.id, attempt, error = %e, "failed to remove sandbox, will try again");
                Err(e)
            }
        });

        if let Err(e) = res {
            error!(container = %sandbox.id, error = %e, "giving up removing sandbox");
        }
    }

    /// Pulls the image if it isn't available locally. Creating a container from a missing image
    /// can hang the daemon API, so this happens upfront.
    fn ensure_image(&self) -> Result<()> {
        let image = self.options.image_ref();

        if self.runtime.has_image(&image)? {
            return Ok(());
        }

        debug!(%image, "sandbox image not found locally, pulling");

        self.options
            .retry
            .retry(|attempt| {
                self.runtime.pull(&image).inspect_err(|e| {
                    warn!(%image, attempt, error = %e, "failed to pull sandbox image");
                })
            })
            .map_err(|e| Error::ResourceUnavailable {
                what: format!("image {image}"),
                attempts: e.attempts,
                source: e.last,
            })
    }

    fn create_sandbox(&self) -> Result<Sandbox> {
        let spec = SandboxSpec {
            image: self.options.image_ref(),
            name: format!("{}-{:08x}", self.options.name_prefix, rand::random::<u32>()),
            command: vec!["sleep".to_string(), self.options.exit_secs().to_string()],
            network_mode: "host".to_string(),
            auto_remove: true,
        };

        let id = self
            .options
            .retry
            .retry(|attempt| {
                self.runtime.create(&spec).inspect_err(|e| {
                    warn!(image = %spec.image, attempt, error = %e, "failed to create sandbox");
                })
            })
            .map_err(|e| Error::ResourceUnavailable {
                what: format!("sandbox from {}", spec.image),
                attempts: e.attempts,
                source: e.last,
            })?;

        let created_at = Instant::now();
        debug!(container = %id, name = %spec.name, "created new sandbox");

        let expires_at = created_at
            .checked_add(self.options.expire_timeout)
            .ok_or_else(|| self.options.invalid_lifetime())?;

        Ok(Sandbox { id, created_at, expires_at })
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "failed to remove sandbox on drop");
        }
    }
}
