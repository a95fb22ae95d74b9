use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
};

use netsplit_rules::{Action, Rule, RuleCompiler};
use netsplit_sandbox::ExecutionContext;
use tracing::{debug, error, warn};

use crate::{
    chain::UserChain,
    endpoint::{ContainerEndpoint, Endpoint},
    ledger::RuleLedger,
    options::{PartitionOptions, KEEPER_PORT},
    Error, Result,
};

/// Introduces network failures between nodes of a test cluster.
///
/// Partitions and dependency blocks are packet-filter rules applied on the host through a shared
/// [`ExecutionContext`]. Every applied rule is recorded, so that [`PartitionManager::heal_all`]
/// can revert exactly what was applied. Delay is applied with `netem` on the node itself.
///
/// The manager heals everything when dropped, on every exit path of the scope owning it:
///
/// ```no_run
/// # use std::sync::Arc;
/// # use netsplit_partition::{ContainerEndpoint, PartitionManager};
/// # use netsplit_sandbox::{ExecutionContext, SandboxOptions};
/// # fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
/// let context = Arc::new(ExecutionContext::docker(SandboxOptions::from_env())?);
/// let node1 = ContainerEndpoint::inspect("node1")?;
/// let node2 = ContainerEndpoint::inspect("node2")?;
///
/// let mut pm = PartitionManager::new(context);
/// pm.partition(&node1, &node2, None, "DROP")?;
/// // ... run the test ...
/// # Ok(())
/// # }
/// // `pm` is dropped here and the partition is gone.
/// ```
///
/// A manager has a single owner. Use one manager per worker when mutating from several threads;
/// the execution context can be shared between them.
#[derive(Debug)]
pub struct PartitionManager<E: Endpoint + Clone = ContainerEndpoint> {
    chain: UserChain,
    options: PartitionOptions,
    ledger: RuleLedger,
    /// Endpoints with an active induced delay.
    delayed: Vec<E>,
}

impl<E: Endpoint + Clone> PartitionManager<E> {
    /// Creates a new manager with default options.
    pub fn new(context: Arc<ExecutionContext>) -> Self {
        Self::with_options(context, PartitionOptions::default())
    }

    pub fn with_options(context: Arc<ExecutionContext>, options: PartitionOptions) -> Self {
        let chain = UserChain::new(context, RuleCompiler::new(options.chain.clone()));
        Self { chain, options, ledger: RuleLedger::new(), delayed: Vec::new() }
    }

    pub fn options(&self) -> &PartitionOptions {
        &self.options
    }

    /// The rules currently applied by this manager, in application order.
    pub fn rules(&self) -> &[Rule] {
        self.ledger.rules()
    }

    /// The endpoints this manager has delayed.
    pub fn delayed(&self) -> &[E] {
        &self.delayed
    }

    /// Blocks traffic between `left` and `right` in both directions, optionally only towards
    /// `port`. If both endpoints have an IPv6 address, IPv6 traffic is blocked too.
    pub fn partition(
        &mut self,
        left: &E,
        right: &E,
        port: Option<u16>,
        action: impl Into<Action>,
    ) -> Result<()> {
        let rules = partition_rules(left, right, port, action.into())?;

        let _span =
            tracing::debug_span!("partition", left = left.name(), right = right.name(), ?port)
                .entered();

        for rule in rules {
            self.add_rule(rule)?;
        }

        Ok(())
    }

    /// Reverts a partition created by [`PartitionManager::partition`] with the same arguments.
    pub fn restore_partition(
        &mut self,
        left: &E,
        right: &E,
        port: Option<u16>,
        action: impl Into<Action>,
    ) -> Result<()> {
        let rules = partition_rules(left, right, port, action.into())?;
        self.remove_rules(&rules)
    }

    /// Blocks traffic between `endpoint` and any peer on `port`: outgoing connections to `port`
    /// and replies coming from `port`. Includes IPv6 if the endpoint has an IPv6 address.
    pub fn drop_dependency_connections(
        &mut self,
        endpoint: &E,
        port: u16,
        action: impl Into<Action>,
    ) -> Result<()> {
        let rules = dependency_rules(endpoint, port, action.into())?;

        let _span =
            tracing::debug_span!("drop_dependency", endpoint = endpoint.name(), port).entered();

        for rule in rules {
            self.add_rule(rule)?;
        }

        Ok(())
    }

    /// Reverts [`PartitionManager::drop_dependency_connections`] called with the same
    /// arguments. Fails without touching anything if any of the rules isn't tracked.
    pub fn restore_dependency_connections(
        &mut self,
        endpoint: &E,
        port: u16,
        action: impl Into<Action>,
    ) -> Result<()> {
        let rules = dependency_rules(endpoint, port, action.into())?;
        self.remove_rules(&rules)
    }

    /// Cuts `endpoint` off the coordination service.
    pub fn drop_keeper_connections(&mut self, endpoint: &E) -> Result<()> {
        self.drop_dependency_connections(endpoint, KEEPER_PORT, Action::Drop)
    }

    /// Reverts [`PartitionManager::drop_keeper_connections`].
    pub fn restore_keeper_connections(&mut self, endpoint: &E) -> Result<()> {
        self.restore_dependency_connections(endpoint, KEEPER_PORT, Action::Drop)
    }

    /// Delays every packet leaving the primary interface of `endpoint` by `delay_ms`.
    ///
    /// The endpoint must not already be delayed by this manager: a second root `netem` qdisc is
    /// refused by the kernel, and the error is returned.
    pub fn add_network_delay(&mut self, endpoint: &E, delay_ms: u64) -> Result<()> {
        let delay = format!("{delay_ms}ms");
        let argv =
            ["tc", "qdisc", "add", "dev", self.options.interface.as_str(), "root", "netem", "delay", &delay];

        debug!(endpoint = endpoint.name(), delay_ms, "adding network delay");
        exec_as_root(endpoint, &argv)?;

        if !self.delayed.iter().any(|e| e.name() == endpoint.name()) {
            self.delayed.push(endpoint.clone());
        }

        Ok(())
    }

    /// Applies `rule` and records it.
    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        self.chain.apply(&rule)?;
        self.ledger.record(rule);
        Ok(())
    }

    /// Reverts a recorded rule and forgets it. Reverting a rule this manager didn't apply is an
    /// [`Error::UntrackedRule`].
    pub fn remove_rule(&mut self, rule: &Rule) -> Result<()> {
        if self.ledger.position(rule).is_none() {
            return Err(Error::UntrackedRule(rule.clone()));
        }

        self.chain.revert(rule)?;
        self.ledger.remove(rule);
        Ok(())
    }

    fn remove_rules(&mut self, rules: &[Rule]) -> Result<()> {
        if let Some(untracked) = rules.iter().find(|r| self.ledger.position(r).is_none()) {
            return Err(Error::UntrackedRule(untracked.clone()));
        }

        for rule in rules {
            self.remove_rule(rule)?;
        }

        Ok(())
    }

    /// Reverts every recorded rule, most recent first, then removes every induced delay.
    /// Does nothing if nothing is applied.
    pub fn heal_all(&mut self) -> Result<()> {
        if self.ledger.is_empty() && self.delayed.is_empty() {
            return Ok(());
        }

        let _span = tracing::debug_span!(
            "heal_all",
            rules = self.ledger.len(),
            delayed = self.delayed.len()
        )
        .entered();

        self.revert_all()?;

        let argv = ["tc", "qdisc", "del", "dev", self.options.interface.as_str(), "root", "netem"];
        while let Some(endpoint) = self.delayed.last() {
            exec_as_root(endpoint, &argv)?;
            self.delayed.pop();
        }

        Ok(())
    }

    /// Reverts every recorded rule and returns them in application order, so they can be
    /// reapplied with [`PartitionManager::push_rules`]. Induced delays are left in place.
    ///
    /// If a revert fails, the rules already reverted are reapplied before the error is returned,
    /// leaving the manager as it was.
    pub fn pop_rules(&mut self) -> Result<Vec<Rule>> {
        let rules = self.ledger.rules().to_vec();

        if let Err(e) = self.revert_all() {
            let reverted = rules[self.ledger.len()..].to_vec();
            debug!(reverted = reverted.len(), error = %e, "pop interrupted, reapplying reverted rules");

            if let Err(reapply) = self.push_rules(reverted) {
                error!(error = %reapply, "failed to reapply rules after an interrupted pop");
            }
            return Err(e);
        }

        Ok(rules)
    }

    /// Applies and records `rules`, in order.
    pub fn push_rules(&mut self, rules: impl IntoIterator<Item = Rule>) -> Result<()> {
        for rule in rules {
            self.add_rule(rule)?;
        }

        Ok(())
    }

    /// The live IPv4 listing of the chain followed by the IPv6 one. Includes rules applied by
    /// other managers. Read-only: a missing IPv6 chain lists as empty.
    pub fn dump_rules(&self) -> Result<String> {
        self.chain.dump()
    }

    /// Heals everything like the drop does, returning the first error instead of logging it.
    pub fn close(mut self) -> Result<()> {
        self.heal_remaining()
    }

    /// Teardown variant of [`PartitionManager::heal_all`] that carries on past failures: every
    /// rule is reverted, most recent first, and every delay removed. Whatever couldn't be undone
    /// stays tracked. Returns the first error.
    fn heal_remaining(&mut self) -> Result<()> {
        if self.ledger.is_empty() && self.delayed.is_empty() {
            return Ok(());
        }

        let _span = tracing::debug_span!(
            "heal_remaining",
            rules = self.ledger.len(),
            delayed = self.delayed.len()
        )
        .entered();

        let mut first_error = None;

        for index in (0..self.ledger.len()).rev() {
            let rule = &self.ledger.rules()[index];
            match self.chain.revert(rule) {
                Ok(()) => {
                    self.ledger.remove_at(index);
                }
                Err(e) => {
                    warn!(%rule, error = %e, "failed to revert rule, continuing");
                    first_error.get_or_insert(e);
                }
            }
        }

        let argv = ["tc", "qdisc", "del", "dev", self.options.interface.as_str(), "root", "netem"];
        let mut still_delayed = Vec::new();
        for endpoint in std::mem::take(&mut self.delayed).into_iter().rev() {
            if let Err(e) = exec_as_root(&endpoint, &argv) {
                warn!(endpoint = endpoint.name(), error = %e, "failed to remove network delay, continuing");
                first_error.get_or_insert(e);
                still_delayed.insert(0, endpoint);
            }
        }
        self.delayed = still_delayed;

        first_error.map_or(Ok(()), Err)
    }

    fn revert_all(&mut self) -> Result<()> {
        while let Some(rule) = self.ledger.last() {
            self.chain.revert(rule)?;
            self.ledger.pop();
        }

        Ok(())
    }
}

impl<E: Endpoint + Clone> Drop for PartitionManager<E> {
    fn drop(&mut self) {
        if let Err(e) = self.heal_remaining() {
            error!(
                error = %e,
                rules = self.ledger.len(),
                delayed = self.delayed.len(),
                "failed to heal partitions on drop"
            );
        }
    }
}

fn ipv4_of<E: Endpoint>(endpoint: &E) -> Result<Ipv4Addr> {
    endpoint.ip_address().ok_or_else(|| Error::NotLaunched(endpoint.name().to_string()))
}

fn exec_as_root<E: Endpoint>(endpoint: &E, argv: &[&str]) -> Result<String> {
    endpoint
        .exec_in_container(argv, Some("root"))
        .map_err(|source| Error::Endpoint { name: endpoint.name().to_string(), source })
}

/// `left -> right` and `right -> left`, for IPv4 and, if both sides have one, IPv6.
fn partition_rules<E: Endpoint>(
    left: &E,
    right: &E,
    port: Option<u16>,
    action: Action,
) -> Result<Vec<Rule>> {
    let mut pairs: Vec<(IpAddr, IpAddr)> = Vec::with_capacity(2);
    pairs.push((ipv4_of(left)?.into(), ipv4_of(right)?.into()));

    if let (Some(l6), Some(r6)) = (left.ipv6_address(), right.ipv6_address()) {
        pairs.push((l6.into(), r6.into()));
    }

    let mut rules = Vec::with_capacity(pairs.len() * 2);
    for (l, r) in pairs {
        for (src, dst) in [(l, r), (r, l)] {
            rules.push(
                Rule::builder(action.clone())
                    .source(src)
                    .destination(dst)
                    .maybe_destination_port(port)
                    .build()?,
            );
        }
    }

    Ok(rules)
}

/// `endpoint -> *:port` and `*:port -> endpoint`, for IPv4 and, if available, IPv6.
fn dependency_rules<E: Endpoint>(endpoint: &E, port: u16, action: Action) -> Result<Vec<Rule>> {
    let mut addrs: Vec<IpAddr> = vec![ipv4_of(endpoint)?.into()];
    addrs.extend(endpoint.ipv6_address().map(IpAddr::from));

    let mut rules = Vec::with_capacity(addrs.len() * 2);
    for addr in addrs {
        rules.push(Rule::builder(action.clone()).source(addr).destination_port(port).build()?);
        rules.push(Rule::builder(action.clone()).destination(addr).source_port(port).build()?);
    }

    Ok(rules)
}
