//! Expands port specifications and decides the order ports are probed in.
use crate::error::ScanError;
use crate::input::ScanOrder;
use itertools::Itertools;
use rand::rng;
use rand::seq::SliceRandom;

/// Lowest port that can be probed.
pub const LOWEST_PORT_NUMBER: u16 = 1;
/// Highest port that can be probed.
pub const TOP_PORT_NUMBER: u16 = 65535;

/// Port specification standing for every port, used by `--all`.
pub const ALL_PORTS_SPEC: &str = "1-65535";

/// Expands a port specification into an ordered list of ports.
///
/// Two syntaxes are accepted: a comma separated list of numbers
/// (`22,80,443`) or an inclusive range (`1-1024`). A reversed range is
/// swapped. Numbers outside `1..=65535` are dropped silently, and so are
/// repeated ones, the first occurrence keeping its place.
///
/// ```rust
/// # use portsweep::port_strategy::resolve_ports;
/// assert_eq!(resolve_ports("80,65536,22").unwrap(), vec![80, 22]);
/// assert_eq!(resolve_ports("3-1").unwrap(), vec![1, 2, 3]);
/// assert!(resolve_ports("80;443").is_err());
/// ```
pub fn resolve_ports(spec: &str) -> Result<Vec<u16>, ScanError> {
    let spec = spec.trim();

    let ports: Vec<u16> = if is_port_list(spec) {
        spec.split(',')
            .filter_map(|candidate| candidate.parse::<u64>().ok())
            .filter_map(valid_port)
            .unique()
            .collect()
    } else if let Some((start, end)) = split_port_range(spec) {
        expand_range(start, end)
    } else {
        return Err(ScanError::InvalidPortSpec(format!(
            "'{spec}' is neither a comma separated list nor a start-end range. Example: 22,80,443 or 1-1024."
        )));
    };

    if ports.is_empty() {
        return Err(ScanError::InvalidPortSpec(format!(
            "'{spec}' holds no port between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}"
        )));
    }

    Ok(ports)
}

/// Keeps a candidate only if `0 < candidate < 65536`.
pub fn valid_port(candidate: u64) -> Option<u16> {
    u16::try_from(candidate)
        .ok()
        .filter(|&port| port >= LOWEST_PORT_NUMBER)
}

fn is_digits(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

fn is_port_list(spec: &str) -> bool {
    spec.split(',').all(is_digits)
}

fn split_port_range(spec: &str) -> Option<(&str, &str)> {
    let (start, end) = spec.split_once('-')?;
    (is_digits(start) && is_digits(end)).then_some((start, end))
}

fn expand_range(start: &str, end: &str) -> Vec<u16> {
    // Both bounds are digit runs; only an overflow can make them unparsable.
    let (Ok(start), Ok(end)) = (start.parse::<u64>(), end.parse::<u64>()) else {
        return Vec::new();
    };
    let (low, high) = if start > end { (end, start) } else { (start, end) };

    let low = low.max(u64::from(LOWEST_PORT_NUMBER));
    let high = high.min(u64::from(TOP_PORT_NUMBER));
    (low..=high).filter_map(valid_port).collect()
}

/// Removes excluded ports, keeping the order of the rest.
pub fn exclude_ports(ports: Vec<u16>, excluded: &[u16]) -> Vec<u16> {
    if excluded.is_empty() {
        return ports;
    }
    ports
        .into_iter()
        .filter(|port| !excluded.contains(port))
        .collect()
}

/// The order in which resolved ports are handed to the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortStrategy {
    /// Ports in the order the specification produced them.
    Serial(Vec<u16>),
    /// Ports shuffled once, when the strategy is picked.
    Random(Vec<u16>),
}

impl PortStrategy {
    pub fn pick(ports: Vec<u16>, order: ScanOrder) -> Self {
        match order {
            ScanOrder::Serial => Self::Serial(ports),
            ScanOrder::Random => {
                let mut ports = ports;
                ports.shuffle(&mut rng());
                Self::Random(ports)
            }
        }
    }

    pub fn order(&self) -> &[u16] {
        match self {
            Self::Serial(ports) | Self::Random(ports) => ports,
        }
    }
}
