#![doc(issue_tracker_base_url = "https://github.com/chainbound/netsplit/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

use netsplit_rules::{Rule, RuleError};

mod chain;
mod disabler;
pub mod endpoint;
mod ledger;
mod manager;
mod options;
pub mod throughput;

pub use chain::{clean_all_user_rules, UserChain};
pub use disabler::PartitionManagerDisabler;
pub use endpoint::{ContainerEndpoint, Endpoint, EndpointError};
pub use ledger::RuleLedger;
pub use manager::PartitionManager;
pub use options::{PartitionOptions, KEEPER_PORT};
pub use throughput::{NetThroughput, Unit};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("endpoint {0} is not launched")]
    NotLaunched(String),
    #[error("rule is not tracked by this manager: {0}")]
    UntrackedRule(Rule),
    #[error("invalid rule: {0}")]
    Rule(#[from] RuleError),
    #[error("sandbox error: {0}")]
    Sandbox(#[from] netsplit_sandbox::Error),
    #[error("command on endpoint {name} failed: {source}")]
    Endpoint { name: String, source: EndpointError },
    #[error("cannot measure throughput of {name}: {reason}")]
    Throughput { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
