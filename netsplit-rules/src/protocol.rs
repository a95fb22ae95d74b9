use std::fmt;

/// The protocol matched by a rule. Defaults to TCP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum Protocol {
    #[default]
    TCP,
    UDP,
    ICMP,
    /// Matches every protocol.
    All,
    /// Any other protocol name or number understood by `iptables -p`.
    Other(String),
}

impl From<&str> for Protocol {
    fn from(s: &str) -> Self {
        match s {
            "tcp" => Self::TCP,
            "udp" => Self::UDP,
            "icmp" => Self::ICMP,
            "all" => Self::All,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TCP => f.write_str("tcp"),
            Self::UDP => f.write_str("udp"),
            Self::ICMP => f.write_str("icmp"),
            Self::All => f.write_str("all"),
            Self::Other(name) => f.write_str(name),
        }
    }
}
