#![doc(issue_tracker_base_url = "https://github.com/chainbound/netsplit/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Network fault injection for integration tests of containerized clusters.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use netsplit::{ContainerEndpoint, ExecutionContext, PartitionManager, SandboxOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let context = Arc::new(ExecutionContext::docker(SandboxOptions::from_env())?);
//! let (node1, node2) = (ContainerEndpoint::inspect("node1")?, ContainerEndpoint::inspect("node2")?);
//!
//! let mut pm = PartitionManager::new(context);
//! pm.partition(&node1, &node2, Some(9000), "REJECT --reject-with tcp-reset")?;
//! pm.add_network_delay(&node1, 200)?;
//! pm.heal_all()?;
//! # Ok(())
//! # }
//! ```

pub use netsplit_common::RetryPolicy;
pub use netsplit_partition::*;
pub use netsplit_rules::{Action, AddressFamily, Probability, Protocol, Rule, RuleBuilder, RuleCompiler};
pub use netsplit_sandbox::{DockerCli, ExecutionContext, SandboxOptions};

pub mod sandbox {
    pub use netsplit_sandbox::*;
}
