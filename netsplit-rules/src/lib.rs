#![doc(issue_tracker_base_url = "https://github.com/chainbound/netsplit/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Declarative packet-filter rules and the argument grammar used to apply and revert them with
//! `iptables` / `ip6tables`.

pub mod compiler;
pub mod protocol;
pub mod rule;

pub use compiler::{RuleCompiler, DEFAULT_CHAIN};
pub use protocol::Protocol;
pub use rule::{Action, AddressFamily, Probability, Rule, RuleBuilder, RuleError};
