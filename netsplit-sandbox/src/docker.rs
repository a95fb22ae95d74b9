//! [`ContainerRuntime`] implementation driving the `docker` CLI.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::{
    command::{self, Runner},
    runtime::{ContainerId, ContainerRuntime, ExecOutput, RuntimeError, SandboxSpec},
};

const NOT_FOUND_MARKER: &str = "No such container";

/// Options for [`DockerCli::exec_with`].
#[derive(Debug, Clone, Default)]
pub struct ExecOptions<'a> {
    pub privileged: bool,
    pub user: Option<&'a str>,
}

/// Talks to the docker daemon through its CLI. Honors the usual `DOCKER_*` environment
/// variables, e.g. `DOCKER_HOST` and `DOCKER_API_VERSION`.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self { binary: "docker".to_string() }
    }
}

impl DockerCli {
    /// Uses a different CLI binary, e.g. `podman`.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    /// Runs `argv` in `container` with the given options.
    pub fn exec_with(
        &self,
        container: &str,
        argv: &[String],
        options: ExecOptions<'_>,
    ) -> Result<ExecOutput, RuntimeError> {
        let mut args = vec!["exec".to_string()];
        if options.privileged {
            args.push("--privileged".to_string());
        }
        if let Some(user) = options.user {
            args.extend(["--user".to_string(), user.to_string()]);
        }
        args.push(container.to_string());
        args.extend(argv.iter().cloned());

        let output = Runner::output(&self.binary, &args)?;

        // The CLI reports a missing container with exit code 1 and this message, which we can't
        // tell apart from the exit code of the command otherwise.
        if !output.status.success() && output.stderr.contains(NOT_FOUND_MARKER) {
            return Err(RuntimeError::NotFound(ContainerId::new(container)));
        }

        Ok(ExecOutput { exit_code: output.code(), output: output.combined() })
    }

    /// Returns the IPv4 and IPv6 addresses of `container`, taken from its first network with an
    /// address assigned.
    pub fn inspect_addresses(
        &self,
        container: &str,
    ) -> Result<(Option<Ipv4Addr>, Option<Ipv6Addr>), RuntimeError> {
        let format = "{{range .NetworkSettings.Networks}}{{.IPAddress}} {{.GlobalIPv6Address}}\n{{end}}";
        let output = Runner::run(&self.binary, ["inspect", "--format", format, container])
            .map_err(|e| not_found_or(container, e))?;

        for line in output.stdout.lines() {
            let mut fields = line.split_whitespace();
            let Some(v4) = fields.next() else { continue };

            let v4 = v4.parse().map_err(|_| RuntimeError::Malformed(line.to_string()))?;
            let v6 = fields.next().and_then(|v6| v6.parse().ok());

            return Ok((Some(v4), v6));
        }

        Ok((None, None))
    }
}

impl ContainerRuntime for DockerCli {
    fn has_image(&self, image: &str) -> Result<bool, RuntimeError> {
        let output = Runner::run(&self.binary, ["images", "-q", image])?;
        Ok(!output.stdout.trim().is_empty())
    }

    fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        Runner::run(&self.binary, ["pull", image])?;
        Ok(())
    }

    fn create(&self, spec: &SandboxSpec) -> Result<ContainerId, RuntimeError> {
        let mut args = vec!["run".to_string(), "--detach".to_string()];
        if spec.auto_remove {
            args.push("--rm".to_string());
        }
        args.extend([
            "--network".to_string(),
            spec.network_mode.clone(),
            "--name".to_string(),
            spec.name.clone(),
            spec.image.clone(),
        ]);
        args.extend(spec.command.iter().cloned());

        let output = Runner::run(&self.binary, &args)?;
        let id = output.stdout.trim();
        if id.is_empty() {
            return Err(RuntimeError::Malformed(output.stdout));
        }

        Ok(ContainerId::new(id))
    }

    fn remove(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        Runner::run(&self.binary, ["rm", "--force", id.as_str()])
            .map_err(|e| not_found_or(id.as_str(), e))?;
        Ok(())
    }

    fn exec(
        &self,
        id: &ContainerId,
        argv: &[String],
        privileged: bool,
    ) -> Result<ExecOutput, RuntimeError> {
        self.exec_with(id.as_str(), argv, ExecOptions { privileged, user: None })
    }
}

fn not_found_or(container: &str, error: command::Error) -> RuntimeError {
    match error {
        command::Error::NonZero(ref output) if output.stderr.contains(NOT_FOUND_MARKER) => {
            RuntimeError::NotFound(ContainerId::new(container))
        }
        other => RuntimeError::Command(other),
    }
}
