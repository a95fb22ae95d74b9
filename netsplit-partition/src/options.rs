use netsplit_rules::DEFAULT_CHAIN;

/// The port of the coordination service (ZooKeeper / Keeper) nodes depend on.
pub const KEEPER_PORT: u16 = 2181;

#[derive(Debug, Clone)]
pub struct PartitionOptions {
    /// The packet-filter chain rules are inserted into.
    pub chain: String,
    /// The primary interface of the nodes, where delay is applied.
    pub interface: String,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self { chain: DEFAULT_CHAIN.to_string(), interface: "eth0".to_string() }
    }
}

impl PartitionOptions {
    pub fn with_chain(mut self, chain: impl Into<String>) -> Self {
        self.chain = chain.into();
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }
}
