use netsplit_partition::{NetThroughput, Unit};

use crate::helpers::FakeNode;

#[test]
fn measures_received_bytes_on_default_interface() {
    let node = FakeNode::v4("node1", 2);
    node.state.lock().rx_bytes = 1_000;

    let mut throughput = NetThroughput::new(&node).unwrap();
    assert_eq!(throughput.interface(), "eth0");

    node.state.lock().rx_bytes += 10 * 1024 * 1024;
    let (rx, tx) = throughput.measure_speed(Unit::Megabytes).unwrap();
    assert!(rx > 0.0);
    assert_eq!(tx, 0.0);

    // Counters are rebased after each measurement.
    let (rx, tx) = throughput.measure_speed(Unit::Bytes).unwrap();
    assert_eq!((rx, tx), (0.0, 0.0));
}

#[test]
fn reads_counters_without_privileges() {
    let node = FakeNode::v4("node1", 2);
    NetThroughput::new(&node).unwrap();

    let state = node.state.lock();
    assert!(state.commands.iter().all(|(_, user)| user.is_none()));
    assert_eq!(state.commands.len(), 2);
}
