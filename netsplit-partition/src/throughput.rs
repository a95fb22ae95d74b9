//! Approximate network I/O rate of a node, from the kernel interface counters.

use std::time::Instant;

use crate::{endpoint::Endpoint, Error, Result};

const ROUTE_PATH: &str = "/proc/net/route";
const DEV_PATH: &str = "/proc/net/dev";

/// Unit of a measured rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Unit {
    #[default]
    Bytes,
    Kilobytes,
    Megabytes,
}

impl Unit {
    fn divisor(self) -> f64 {
        match self {
            Self::Bytes => 1.0,
            Self::Kilobytes => 1024.0,
            Self::Megabytes => 1024.0 * 1024.0,
        }
    }
}

/// Measures receive and transmit rates of the default interface of a node.
#[derive(Debug)]
pub struct NetThroughput<'a, E: Endpoint> {
    endpoint: &'a E,
    interface: String,
    current_in: u64,
    current_out: u64,
    measured_at: Instant,
}

impl<'a, E: Endpoint> NetThroughput<'a, E> {
    /// Finds the default interface of `endpoint` and takes the first sample of its counters.
    ///
    /// The interface is the one holding the default route. If there's none, or it's missing from
    /// the device list, the first of `eth0`..`eth9` present is used.
    pub fn new(endpoint: &'a E) -> Result<Self> {
        let route = read(endpoint, ROUTE_PATH)?;
        let dev = read(endpoint, DEV_PATH)?;

        let interface = default_interface(&route)
            .filter(|iface| counters(&dev, iface).is_some())
            .or_else(|| {
                (0..10).map(|i| format!("eth{i}")).find(|iface| counters(&dev, iface).is_some())
            })
            .ok_or_else(|| Error::Throughput {
                name: endpoint.name().to_string(),
                reason: "no default route interface and no eth0..eth9 interface".to_string(),
            })?;

        tracing::debug!(endpoint = endpoint.name(), %interface, "measuring throughput");

        let (current_in, current_out) = sample(endpoint, &interface, &dev)?;

        Ok(Self { endpoint, interface, current_in, current_out, measured_at: Instant::now() })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Returns the `(in, out)` rates per second since the previous measurement.
    pub fn measure_speed(&mut self, unit: Unit) -> Result<(f64, f64)> {
        let dev = read(self.endpoint, DEV_PATH)?;
        let (new_in, new_out) = sample(self.endpoint, &self.interface, &dev)?;
        let now = Instant::now();

        let elapsed = now.duration_since(self.measured_at).as_secs_f64().max(f64::EPSILON);
        let divisor = unit.divisor() * elapsed;
        let in_speed = new_in.saturating_sub(self.current_in) as f64 / divisor;
        let out_speed = new_out.saturating_sub(self.current_out) as f64 / divisor;

        self.current_in = new_in;
        self.current_out = new_out;
        self.measured_at = now;

        Ok((in_speed, out_speed))
    }
}

fn read<E: Endpoint>(endpoint: &E, path: &str) -> Result<String> {
    endpoint
        .exec_in_container(&["cat", path], None)
        .map_err(|source| Error::Endpoint { name: endpoint.name().to_string(), source })
}

fn sample<E: Endpoint>(endpoint: &E, interface: &str, dev: &str) -> Result<(u64, u64)> {
    counters(dev, interface).ok_or_else(|| Error::Throughput {
        name: endpoint.name().to_string(),
        reason: format!("no interface {interface} in {DEV_PATH}"),
    })
}

/// The interface of the route with destination `00000000`.
fn default_interface(route: &str) -> Option<String> {
    route.lines().skip(1).find_map(|line| {
        let mut fields = line.split_whitespace();
        let iface = fields.next()?;
        (fields.next()? == "00000000").then(|| iface.to_string())
    })
}

/// The received and transmitted byte counters of `interface`.
///
/// Lines look like `  eth0: 1234 10 0 0 0 0 0 0 5678 12 ...`, where the 1st value is received
/// bytes and the 9th transmitted bytes. Old kernels omit the space after the colon.
fn counters(dev: &str, interface: &str) -> Option<(u64, u64)> {
    dev.lines().find_map(|line| {
        let (name, values) = line.split_once(':')?;
        if name.trim() != interface {
            return None;
        }

        let values: Vec<&str> = values.split_whitespace().collect();
        Some((values.first()?.parse().ok()?, values.get(8)?.parse().ok()?))
    })
}
