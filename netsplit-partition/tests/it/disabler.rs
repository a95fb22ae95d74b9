use netsplit_partition::PartitionManagerDisabler;
use netsplit_rules::Rule;

use crate::helpers::{manager, FakeFirewall, FakeNode};

#[test]
fn disabler_lifts_rules_for_its_scope() {
    let firewall = FakeFirewall::new();
    let mut pm = manager(&firewall);
    let (a, b) = (FakeNode::v4("node1", 2), FakeNode::v4("node2", 3));

    pm.partition(&a, &b, None, "DROP").unwrap();
    let rules = pm.rules().to_vec();
    let tables = firewall.tables();

    {
        let mut disabler = PartitionManagerDisabler::new(&mut pm).unwrap();
        assert_eq!(disabler.suspended(), rules.as_slice());
        assert!(disabler.manager().rules().is_empty());
        assert!(firewall.active_rules("iptables").is_empty());
        assert!(!firewall.blocks(a.v4_addr(), 40000, b.v4_addr(), 9000));
    }

    assert_eq!(pm.rules(), rules.as_slice());
    assert_eq!(firewall.tables(), tables);
    assert!(firewall.blocks(a.v4_addr(), 40000, b.v4_addr(), 9000));
}

#[test]
fn rules_added_while_disabled_survive_restore() {
    let firewall = FakeFirewall::new();
    let mut pm = manager(&firewall);
    let (a, b) = (FakeNode::v4("node1", 2), FakeNode::v4("node2", 3));

    pm.partition(&a, &b, Some(9000), "DROP").unwrap();

    let mut disabler = PartitionManagerDisabler::new(&mut pm).unwrap();
    let extra = Rule::builder("REJECT").source(a.v4_addr()).destination_port(8123).build().unwrap();
    disabler.manager().add_rule(extra.clone()).unwrap();
    disabler.restore().unwrap();

    assert_eq!(pm.rules().len(), 3);
    assert_eq!(pm.rules()[0], extra);
    assert_eq!(firewall.active_rules("iptables").len(), 3);

    pm.heal_all().unwrap();
    assert!(firewall.active_rules("iptables").is_empty());
}

#[test]
fn disabling_an_empty_manager_is_a_noop() {
    let firewall = FakeFirewall::new();
    let mut pm = manager(&firewall);

    let disabler = PartitionManagerDisabler::new(&mut pm).unwrap();
    assert!(disabler.suspended().is_empty());
    drop(disabler);

    assert!(firewall.history().is_empty());
}

#[test]
fn failed_disable_leaves_rules_active() {
    let firewall = FakeFirewall::new();
    let mut pm = manager(&firewall);
    let (a, b) = (FakeNode::v4("node1", 2), FakeNode::v4("node2", 3));

    pm.partition(&a, &b, None, "DROP").unwrap();
    let rules = pm.rules().to_vec();
    let tables = firewall.tables();

    firewall.fail_nth("-D", 1);
    assert!(PartitionManagerDisabler::new(&mut pm).is_err());

    assert_eq!(pm.rules(), rules.as_slice());
    assert_eq!(firewall.tables(), tables);
    assert!(firewall.blocks(a.v4_addr(), 40000, b.v4_addr(), 9000));
    assert!(firewall.blocks(b.v4_addr(), 40000, a.v4_addr(), 9000));
}
