#![doc(issue_tracker_base_url = "https://github.com/chainbound/netsplit/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod retry;
pub use retry::{LinearBackoff, RetryError, RetryPolicy};
