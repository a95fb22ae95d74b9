use std::{fmt, net::IpAddr};

use crate::protocol::Protocol;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    #[error("rule must match at least one of source or destination")]
    Unaddressed,
    #[error("source {src} and destination {dst} belong to different address families")]
    MixedFamilies { src: IpAddr, dst: IpAddr },
    #[error("probability {0} is outside of [0, 1]")]
    Probability(f64),
}

/// The IP version of a rule, deciding between `iptables` and `ip6tables`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub const ALL: [Self; 2] = [Self::V4, Self::V6];

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => f.write_str("v4"),
            Self::V6 => f.write_str("v6"),
        }
    }
}

/// The jump target of a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Action {
    /// Silently discard matching packets.
    #[default]
    Drop,
    /// Discard matching packets and answer with an error.
    Reject,
    /// Any other target, possibly followed by target options, e.g. `REJECT --reject-with
    /// tcp-reset`. Tokens are separated by whitespace.
    Target(String),
}

impl Action {
    /// Returns the tokens following `-j`.
    pub fn tokens(&self) -> Vec<&str> {
        match self {
            Self::Drop => vec!["DROP"],
            Self::Reject => vec!["REJECT"],
            Self::Target(target) => target.split_whitespace().collect(),
        }
    }
}

impl From<&str> for Action {
    /// Parses a target and its options. Tokens are stored separated by single spaces, so that
    /// equal argument lists compare equal.
    fn from(s: &str) -> Self {
        let target = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match target.as_str() {
            "DROP" => Self::Drop,
            "REJECT" => Self::Reject,
            _ => Self::Target(target),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens().join(" "))
    }
}

/// A match probability in `[0, 1]`, used with the `statistic` module to drop a random share of
/// packets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probability(f64);

impl Probability {
    pub fn new(value: f64) -> Result<Self, RuleError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(RuleError::Probability(value));
        }

        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Probability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A single packet-filter rule.
///
/// Rules are immutable once built. Equality is structural, which is what allows a rule recorded at
/// insertion time to be found again and reverted with exactly the same arguments.
///
/// The [`AddressFamily`] is derived from whichever address is set, see [`Rule::family`].
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    source: Option<IpAddr>,
    destination: Option<IpAddr>,
    source_port: Option<u16>,
    destination_port: Option<u16>,
    protocol: Protocol,
    action: Action,
    probability: Option<Probability>,
    custom_args: Vec<String>,
}

impl Rule {
    /// Starts building a rule with the given action.
    pub fn builder(action: impl Into<Action>) -> RuleBuilder {
        RuleBuilder::new(action)
    }

    pub fn source(&self) -> Option<IpAddr> {
        self.source
    }

    pub fn destination(&self) -> Option<IpAddr> {
        self.destination
    }

    pub fn source_port(&self) -> Option<u16> {
        self.source_port
    }

    pub fn destination_port(&self) -> Option<u16> {
        self.destination_port
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn probability(&self) -> Option<Probability> {
        self.probability
    }

    pub fn custom_args(&self) -> &[String] {
        &self.custom_args
    }

    /// The address family of the rule, derived from the source address or, if absent, from the
    /// destination address.
    pub fn family(&self) -> AddressFamily {
        self.source
            .or(self.destination)
            .map(|addr| AddressFamily::of(&addr))
            .unwrap_or(AddressFamily::V4)
    }

    /// Returns `true` if the rule matches on `addr` as source or destination.
    pub fn references(&self, addr: IpAddr) -> bool {
        self.source == Some(addr) || self.destination == Some(addr)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn endpoint(addr: Option<IpAddr>, port: Option<u16>) -> String {
            let addr = addr.map_or_else(|| "*".to_string(), |a| a.to_string());
            match port {
                Some(port) => format!("{addr}:{port}"),
                None => addr,
            }
        }

        write!(
            f,
            "{} {} -> {} {}",
            self.protocol,
            endpoint(self.source, self.source_port),
            endpoint(self.destination, self.destination_port),
            self.action
        )?;

        if let Some(p) = self.probability {
            write!(f, " p={p}")?;
        }

        Ok(())
    }
}

/// Builder for [`Rule`]. Validation happens in [`RuleBuilder::build`].
#[derive(Debug, Clone)]
pub struct RuleBuilder {
    source: Option<IpAddr>,
    destination: Option<IpAddr>,
    source_port: Option<u16>,
    destination_port: Option<u16>,
    protocol: Protocol,
    action: Action,
    probability: Option<f64>,
    custom_args: Vec<String>,
}

impl RuleBuilder {
    pub fn new(action: impl Into<Action>) -> Self {
        Self {
            source: None,
            destination: None,
            source_port: None,
            destination_port: None,
            protocol: Protocol::default(),
            action: action.into(),
            probability: None,
            custom_args: Vec::new(),
        }
    }

    pub fn source(mut self, addr: impl Into<IpAddr>) -> Self {
        self.source = Some(addr.into());
        self
    }

    pub fn destination(mut self, addr: impl Into<IpAddr>) -> Self {
        self.destination = Some(addr.into());
        self
    }

    pub fn source_port(mut self, port: u16) -> Self {
        self.source_port = Some(port);
        self
    }

    pub fn destination_port(mut self, port: u16) -> Self {
        self.destination_port = Some(port);
        self
    }

    /// Sets the destination port if `port` is `Some`.
    pub fn maybe_destination_port(mut self, port: Option<u16>) -> Self {
        self.destination_port = port;
        self
    }

    pub fn protocol(mut self, protocol: impl Into<Protocol>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Only match a random share of packets, with the given probability in `[0, 1]`.
    pub fn probability(mut self, probability: f64) -> Self {
        self.probability = Some(probability);
        self
    }

    /// Extra arguments appended verbatim after the jump target.
    pub fn custom_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.custom_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Result<Rule, RuleError> {
        match (self.source, self.destination) {
            (None, None) => return Err(RuleError::Unaddressed),
            (Some(source), Some(destination))
                if AddressFamily::of(&source) != AddressFamily::of(&destination) =>
            {
                return Err(RuleError::MixedFamilies { src: source, dst: destination })
            }
            _ => {}
        }

        let probability = self.probability.map(Probability::new).transpose()?;

        Ok(Rule {
            source: self.source,
            destination: self.destination,
            source_port: self.source_port,
            destination_port: self.destination_port,
            protocol: self.protocol,
            action: self.action,
            probability,
            custom_args: self.custom_args,
        })
    }
}
