//! In-memory stand-ins for the host packet filter and the cluster nodes.

use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::Arc,
    time::Duration,
};

use netsplit_common::RetryPolicy;
use netsplit_partition::{Endpoint, EndpointError, PartitionManager};
use netsplit_sandbox::{
    ContainerId, ContainerRuntime, ExecOutput, ExecutionContext, RuntimeError, SandboxOptions,
    SandboxSpec,
};
use parking_lot::Mutex;

pub const CHAIN: &str = "DOCKER-USER";

/// Chains keyed by `(binary, chain)`, each holding the match arguments of its rules.
pub type Tables = BTreeMap<(String, String), Vec<Vec<String>>>;

#[derive(Debug, Default)]
struct FirewallState {
    tables: Tables,
    forward_hooks: Vec<(String, String)>,
    history: Vec<Vec<String>>,
    /// An operation to fail, after letting the given number of matching commands through.
    fail_next: Option<(String, usize)>,
    sandboxes: usize,
}

/// A container runtime whose sandbox emulates `iptables` / `ip6tables` over in-memory tables.
/// The IPv4 user chain exists from the start, like on a docker host; the IPv6 one doesn't.
#[derive(Debug)]
pub struct FakeFirewall {
    state: Mutex<FirewallState>,
}

impl FakeFirewall {
    pub fn new() -> Arc<Self> {
        let mut state = FirewallState::default();
        state.tables.insert(("iptables".to_string(), CHAIN.to_string()), Vec::new());
        Arc::new(Self { state: Mutex::new(state) })
    }

    /// Like [`FakeFirewall::new`], with the IPv6 user chain already set up.
    pub fn with_v6_chain() -> Arc<Self> {
        let firewall = Self::new();
        firewall
            .state
            .lock()
            .tables
            .insert(("ip6tables".to_string(), CHAIN.to_string()), vec![args(&["-j", "RETURN"])]);
        firewall
    }

    /// Appends a rule not owned by any manager.
    pub fn insert_foreign(&self, binary: &str, rule: &[&str]) {
        self.state
            .lock()
            .tables
            .entry((binary.to_string(), CHAIN.to_string()))
            .or_default()
            .push(args(rule));
    }

    /// Makes the next packet-filter command with operation `op` (e.g. `-I`, `-D`) fail.
    pub fn fail_next(&self, op: &str) {
        self.fail_nth(op, 0);
    }

    /// Lets `skip` commands with operation `op` succeed, then fails the following one.
    pub fn fail_nth(&self, op: &str, skip: usize) {
        self.state.lock().fail_next = Some((op.to_string(), skip));
    }

    pub fn tables(&self) -> Tables {
        self.state.lock().tables.clone()
    }

    /// The rules of the user chain of `binary`.
    pub fn rules(&self, binary: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .tables
            .get(&(binary.to_string(), CHAIN.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Rules of `binary` with `RETURN` targets filtered out.
    pub fn active_rules(&self, binary: &str) -> Vec<Vec<String>> {
        self.rules(binary).into_iter().filter(|r| !r.ends_with(&["RETURN".to_string()])).collect()
    }

    pub fn history(&self) -> Vec<Vec<String>> {
        self.state.lock().history.clone()
    }

    pub fn sandboxes(&self) -> usize {
        self.state.lock().sandboxes
    }

    pub fn forward_hooks(&self) -> Vec<(String, String)> {
        self.state.lock().forward_hooks.clone()
    }

    /// Returns `true` if any rule of any chain matches on `addr`.
    pub fn references(&self, addr: IpAddr) -> bool {
        let addr = addr.to_string();
        self.state.lock().tables.values().flatten().any(|rule| rule.contains(&addr))
    }

    /// Evaluates the user chain for a TCP packet and returns `true` if it is dropped or rejected.
    pub fn blocks(&self, src: IpAddr, sport: u16, dst: IpAddr, dport: u16) -> bool {
        let binary = if src.is_ipv4() { "iptables" } else { "ip6tables" };

        for rule in self.rules(binary) {
            let m = Match::parse(&rule);
            let matches = m.protocol.as_deref().map_or(true, |p| p == "tcp" || p == "all") &&
                m.source.map_or(true, |s| s == src) &&
                m.destination.map_or(true, |d| d == dst) &&
                m.sport.map_or(true, |p| p == sport) &&
                m.dport.map_or(true, |p| p == dport);

            if matches {
                return matches!(m.target.as_deref(), Some("DROP") | Some("REJECT"));
            }
        }

        false
    }

    fn run(&self, argv: &[String]) -> ExecOutput {
        let mut state = self.state.lock();
        state.history.push(argv.to_vec());

        let binary = argv[0].as_str();
        if let Some(family) = binary.strip_suffix("-save") {
            return ok(save(&state.tables, family));
        }

        let mut rest = &argv[1..];
        if rest.first().map(String::as_str) == Some("--wait") {
            rest = &rest[1..];
        }
        let (op, chain, rest) = (rest[0].as_str(), rest[1].clone(), &rest[2..]);

        let fails = match &mut state.fail_next {
            Some((fail_op, skip)) if fail_op.as_str() == op => {
                if *skip == 0 {
                    true
                } else {
                    *skip -= 1;
                    false
                }
            }
            _ => false,
        };
        if fails {
            state.fail_next = None;
            return fail(4, "Another app is currently holding the xtables lock.");
        }

        let key = (binary.to_string(), chain.clone());

        match op {
            "-L" => match state.tables.get(&key) {
                Some(rules) => {
                    let mut out = format!("Chain {chain} (1 references)\ntarget     prot opt source               destination\n");
                    for rule in rules {
                        out.push_str(&rule.join(" "));
                        out.push('\n');
                    }
                    ok(out)
                }
                None => no_chain(binary),
            },
            "-N" => {
                if state.tables.contains_key(&key) {
                    return fail(1, &format!("{binary}: Chain already exists."));
                }
                state.tables.insert(key, Vec::new());
                ok(String::new())
            }
            "-I" if chain == "FORWARD" => {
                state.forward_hooks.push((binary.to_string(), rest[1].clone()));
                ok(String::new())
            }
            "-I" => {
                let rule = if rest.first().is_some_and(|t| t.parse::<usize>().is_ok()) {
                    &rest[1..]
                } else {
                    rest
                };
                match state.tables.get_mut(&key) {
                    Some(rules) => {
                        rules.insert(0, rule.to_vec());
                        ok(String::new())
                    }
                    None => no_chain(binary),
                }
            }
            "-A" => match state.tables.get_mut(&key) {
                Some(rules) => {
                    rules.push(rest.to_vec());
                    ok(String::new())
                }
                None => no_chain(binary),
            },
            "-D" => {
                let Some(rules) = state.tables.get_mut(&key) else {
                    return no_chain(binary);
                };

                if rest.len() == 1 && rest[0] == "1" {
                    if rules.is_empty() {
                        return fail(1, &format!("{binary}: Index of deletion too big."));
                    }
                    rules.remove(0);
                    return ok(String::new());
                }

                match rules.iter().position(|r| r.as_slice() == rest) {
                    Some(index) => {
                        rules.remove(index);
                        ok(String::new())
                    }
                    None => fail(
                        1,
                        &format!("{binary}: Bad rule (does a matching rule exist in that chain?)."),
                    ),
                }
            }
            other => fail(2, &format!("unsupported operation {other}")),
        }
    }
}

impl ContainerRuntime for FakeFirewall {
    fn has_image(&self, _image: &str) -> Result<bool, RuntimeError> {
        Ok(true)
    }

    fn pull(&self, _image: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn create(&self, spec: &SandboxSpec) -> Result<ContainerId, RuntimeError> {
        assert_eq!(spec.network_mode, "host");
        let mut state = self.state.lock();
        state.sandboxes += 1;
        Ok(ContainerId::new(format!("sandbox-{}", state.sandboxes)))
    }

    fn remove(&self, _id: &ContainerId) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn exec(
        &self,
        _id: &ContainerId,
        argv: &[String],
        privileged: bool,
    ) -> Result<ExecOutput, RuntimeError> {
        assert!(privileged, "packet filter commands need a privileged sandbox");
        Ok(self.run(argv))
    }
}

#[derive(Debug, Default)]
struct Match {
    protocol: Option<String>,
    source: Option<IpAddr>,
    destination: Option<IpAddr>,
    sport: Option<u16>,
    dport: Option<u16>,
    target: Option<String>,
}

impl Match {
    fn parse(rule: &[String]) -> Self {
        let mut m = Self::default();
        let mut tokens = rule.iter();

        while let Some(token) = tokens.next() {
            let mut value = || tokens.next().cloned().unwrap_or_default();
            match token.as_str() {
                "-p" => m.protocol = Some(value()),
                "-s" => m.source = value().parse().ok(),
                "-d" => m.destination = value().parse().ok(),
                "--sport" => m.sport = value().parse().ok(),
                "--dport" => m.dport = value().parse().ok(),
                "-j" => m.target = Some(value()),
                _ => {}
            }
        }

        m
    }
}

fn save(tables: &Tables, family: &str) -> String {
    let chains: Vec<_> = tables.iter().filter(|((binary, _), _)| binary == family).collect();

    let mut out = String::from("*filter\n");
    for ((_, chain), _) in &chains {
        out.push_str(&format!(":{chain} - [0:0]\n"));
    }
    for ((_, chain), rules) in &chains {
        for rule in rules.iter() {
            out.push_str(&format!("-A {chain} {}\n", rule.join(" ")));
        }
    }
    out.push_str("COMMIT\n");
    out
}

fn ok(output: String) -> ExecOutput {
    ExecOutput { exit_code: 0, output }
}

fn fail(exit_code: i32, message: &str) -> ExecOutput {
    ExecOutput { exit_code, output: format!("{message}\n") }
}

fn no_chain(binary: &str) -> ExecOutput {
    fail(1, &format!("{binary}: No chain/target/match by that name."))
}

pub fn args(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|s| s.to_string()).collect()
}

/// A shared execution context on top of `firewall`, without backoff delays.
pub fn context(firewall: &Arc<FakeFirewall>) -> Arc<ExecutionContext> {
    let options = SandboxOptions::default()
        .with_retry(RetryPolicy::linear(5, Duration::ZERO))
        .with_remove_retry(RetryPolicy::linear(5, Duration::ZERO));

    Arc::new(ExecutionContext::new(firewall.clone(), options).unwrap())
}

pub fn manager(firewall: &Arc<FakeFirewall>) -> PartitionManager<FakeNode> {
    let _ = tracing_subscriber::fmt::try_init();
    PartitionManager::new(context(firewall))
}

#[derive(Debug, Default)]
pub struct NodeState {
    pub qdisc: Option<String>,
    pub commands: Vec<(Vec<String>, Option<String>)>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// A cluster node emulating `tc` and the `/proc/net` files.
#[derive(Debug, Clone)]
pub struct FakeNode {
    name: String,
    ipv4: Option<Ipv4Addr>,
    ipv6: Option<Ipv6Addr>,
    pub state: Arc<Mutex<NodeState>>,
}

impl FakeNode {
    /// An IPv4-only node at `10.5.0.<id>`.
    pub fn v4(name: &str, id: u8) -> Self {
        Self {
            name: name.to_string(),
            ipv4: Some(Ipv4Addr::new(10, 5, 0, id)),
            ipv6: None,
            state: Default::default(),
        }
    }

    /// A dual-stack node at `10.5.0.<id>` and `2001:3984:3989::<id>`.
    pub fn dual(name: &str, id: u8) -> Self {
        let mut node = Self::v4(name, id);
        node.ipv6 = Some(Ipv6Addr::new(0x2001, 0x3984, 0x3989, 0, 0, 0, 0, id.into()));
        node
    }

    /// A node that isn't running yet.
    pub fn unlaunched(name: &str) -> Self {
        Self { name: name.to_string(), ipv4: None, ipv6: None, state: Default::default() }
    }

    pub fn v4_addr(&self) -> IpAddr {
        self.ipv4.unwrap().into()
    }

    pub fn v6_addr(&self) -> IpAddr {
        self.ipv6.unwrap().into()
    }

    pub fn qdisc(&self) -> Option<String> {
        self.state.lock().qdisc.clone()
    }
}

impl Endpoint for FakeNode {
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
        let mut state = self.state.lock();
        state.commands.push((args(argv), user.map(String::from)));

        match argv {
            ["tc", "qdisc", "add", "dev", "eth0", "root", "netem", "delay", delay] => {
                if state.qdisc.is_some() {
                    return Err("RTNETLINK answers: File exists".into());
                }
                state.qdisc = Some(delay.to_string());
                Ok(String::new())
            }
            ["tc", "qdisc", "del", "dev", "eth0", "root", "netem"] => match state.qdisc.take() {
                Some(_) => Ok(String::new()),
                None => Err("Error: Cannot delete qdisc with handle of zero.".into()),
            },
            ["cat", "/proc/net/route"] => Ok("Iface\tDestination\tGateway\tFlags\n\
                 eth0\t00000000\t010005AC\t0003\n\
                 eth0\t000005AC\t00000000\t0001\n"
                .to_string()),
            ["cat", "/proc/net/dev"] => Ok(format!(
                "Inter-|   Receive |  Transmit\n face |bytes packets|bytes packets\n\
                 lo: 100 1 0 0 0 0 0 0 100 1 0 0 0 0 0 0\n\
                 eth0: {} 10 0 0 0 0 0 0 {} 10 0 0 0 0 0 0\n",
                state.rx_bytes, state.tx_bytes
            )),
            other => Err(format!("unsupported command {other:?}").into()),
        }
    }
}
