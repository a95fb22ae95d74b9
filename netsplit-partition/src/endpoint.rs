use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr},
};

use netsplit_sandbox::{
    docker::{DockerCli, ExecOptions},
    RuntimeError,
};

pub type EndpointError = Box<dyn std::error::Error + Send + Sync>;

/// A node of the test cluster.
///
/// Addresses are resolved once the node is running and don't change afterwards. Every node has an
/// IPv4 address; IPv6 is optional.
pub trait Endpoint: fmt::Debug {
    /// A human readable name, used in errors and logs.
    fn name(&self) -> &str;

    /// The IPv4 address, or `None` if the node isn't launched yet.
    fn ip_address(&self) -> Option<Ipv4Addr>;

    /// The IPv6 address, if the node has one.
    fn ipv6_address(&self) -> Option<Ipv6Addr>;

    /// Runs `argv` on the node, optionally as `user`, returning its output. A non-zero exit must
    /// be reported as an error.
    fn exec_in_container(&self, argv: &[&str], user: Option<&str>) -> Result<String, EndpointError>;
}

/// An [`Endpoint`] backed by a docker container.
#[derive(Debug, Clone)]
pub struct ContainerEndpoint {
    name: String,
    ipv4: Option<Ipv4Addr>,
    ipv6: Option<Ipv6Addr>,
    docker: DockerCli,
}

impl ContainerEndpoint {
    /// Creates an endpoint for `name` with known addresses.
    pub fn new(name: impl Into<String>, ipv4: Option<Ipv4Addr>, ipv6: Option<Ipv6Addr>) -> Self {
        Self { name: name.into(), ipv4, ipv6, docker: DockerCli::default() }
    }

    /// Resolves the addresses of the running container `name`.
    pub fn inspect(name: impl Into<String>) -> Result<Self, RuntimeError> {
        let name = name.into();
        let docker = DockerCli::default();
        let (ipv4, ipv6) = docker.inspect_addresses(&name)?;

        tracing::debug!(%name, ?ipv4, ?ipv6, "resolved container addresses");

        Ok(Self { name, ipv4, ipv6, docker })
    }

    /// Uses the given CLI instead of the default `docker`.
    pub fn with_docker(mut self, docker: DockerCli) -> Self {
        self.docker = docker;
        self
    }
}

impl Endpoint for ContainerEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn ip_address(&self) -> Option<Ipv4Addr> {
        self.ipv4
    }

    fn ipv6_address(&self) -> Option<Ipv6Addr> {
        self.ipv6
    }

    fn exec_in_container(&self, argv: &[&str], user: Option<&str>) -> Result<String, EndpointError> {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let out =
            self.docker.exec_with(&self.name, &argv, ExecOptions { privileged: false, user })?;

        if out.exit_code != 0 {
            return Err(Box::new(netsplit_sandbox::Error::Execution {
                command: argv.join(" "),
                exit_code: out.exit_code,
                output: out.output,
            }));
        }

        Ok(out.output)
    }
}
