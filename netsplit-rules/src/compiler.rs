//! Translation of [`Rule`]s into `iptables` / `ip6tables` invocations.
//!
//! The insert and delete forms of a rule share the exact same match arguments, which is what
//! makes it possible to revert a rule by replaying what was recorded at insertion time.

use crate::rule::{AddressFamily, Rule};

/// The chain rules are inserted into by default. Docker evaluates it before its own forwarding
/// rules, and leaves it alone when (re)configuring container networks.
pub const DEFAULT_CHAIN: &str = "DOCKER-USER";

impl AddressFamily {
    /// The packet filter binary for this family.
    pub fn binary(self) -> &'static str {
        match self {
            Self::V4 => "iptables",
            Self::V6 => "ip6tables",
        }
    }

    /// The binary dumping the full ruleset of this family.
    pub fn save_binary(self) -> &'static str {
        match self {
            Self::V4 => "iptables-save",
            Self::V6 => "ip6tables-save",
        }
    }
}

/// Renders rules into argument vectors targeting a single user chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCompiler {
    chain: String,
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new(DEFAULT_CHAIN)
    }
}

impl RuleCompiler {
    pub fn new(chain: impl Into<String>) -> Self {
        Self { chain: chain.into() }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Returns the match and target arguments of a rule, in this order:
    ///
    /// 1. `-m statistic --mode random --probability P`, if a probability is set
    /// 2. `-p PROTO`
    /// 3. `-s`, `-d`, `--sport`, `--dport`, each only if set
    /// 4. `-j TARGET [TARGET OPTIONS]`
    /// 5. custom arguments, verbatim
    pub fn match_args(&self, rule: &Rule) -> Vec<String> {
        let mut args = Vec::with_capacity(16);

        if let Some(probability) = rule.probability() {
            args.extend(
                ["-m", "statistic", "--mode", "random", "--probability"].map(String::from),
            );
            args.push(probability.to_string());
        }

        args.extend(["-p".to_string(), rule.protocol().to_string()]);

        if let Some(source) = rule.source() {
            args.extend(["-s".to_string(), source.to_string()]);
        }
        if let Some(destination) = rule.destination() {
            args.extend(["-d".to_string(), destination.to_string()]);
        }
        if let Some(port) = rule.source_port() {
            args.extend(["--sport".to_string(), port.to_string()]);
        }
        if let Some(port) = rule.destination_port() {
            args.extend(["--dport".to_string(), port.to_string()]);
        }

        args.push("-j".to_string());
        args.extend(rule.action().tokens().into_iter().map(String::from));
        args.extend(rule.custom_args().iter().cloned());

        args
    }

    /// `<bin> --wait -I <chain> 1 <match args>`: inserts the rule at the head of the chain.
    pub fn insert(&self, rule: &Rule) -> Vec<String> {
        let mut cmd = self.prefix(rule.family(), "-I");
        cmd.push("1".to_string());
        cmd.extend(self.match_args(rule));
        cmd
    }

    /// `<bin> --wait -D <chain> <match args>`: deletes the first rule matching exactly.
    pub fn delete(&self, rule: &Rule) -> Vec<String> {
        let mut cmd = self.prefix(rule.family(), "-D");
        cmd.extend(self.match_args(rule));
        cmd
    }

    /// `<bin> --wait -D <chain> 1`: deletes whatever rule is at the head of the chain.
    pub fn delete_head(&self, family: AddressFamily) -> Vec<String> {
        let mut cmd = self.prefix(family, "-D");
        cmd.push("1".to_string());
        cmd
    }

    /// `<bin> -L <chain>`
    pub fn list(&self, family: AddressFamily) -> Vec<String> {
        vec![family.binary().to_string(), "-L".to_string(), self.chain.clone()]
    }

    /// `<bin>-save`
    pub fn save(&self, family: AddressFamily) -> Vec<String> {
        vec![family.save_binary().to_string()]
    }

    /// The commands creating the chain, hooking it into `FORWARD` and terminating it with
    /// `RETURN`. Docker only does this for IPv4, so it is needed before using IPv6 rules.
    pub fn chain_setup(&self, family: AddressFamily) -> Vec<Vec<String>> {
        let bin = family.binary().to_string();
        let chain = self.chain.clone();

        vec![
            vec![bin.clone(), "--wait".into(), "-N".into(), chain.clone()],
            vec![bin.clone(), "--wait".into(), "-I".into(), "FORWARD".into(), "-j".into(), chain.clone()],
            vec![bin, "--wait".into(), "-A".into(), chain, "-j".into(), "RETURN".into()],
        ]
    }

    fn prefix(&self, family: AddressFamily, op: &str) -> Vec<String> {
        vec![family.binary().to_string(), "--wait".to_string(), op.to_string(), self.chain.clone()]
    }
}
