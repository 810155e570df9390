//! Provides functions to turn target specifications into IPv4 addresses.
//!
//! A target is tried, in order, as a literal address, a CIDR block, a dashed
//! last-octet range (`192.168.1.10-20`) and finally a hostname.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use cidr_utils::cidr::{IpCidr, IpInet};
use futures::{stream, StreamExt as _};
use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use itertools::Itertools;
use log::{debug, info};
use tokio::{fs, io};

use crate::error::ScanError;

/// Largest CIDR block that will be expanded, a /16.
pub const MAX_CIDR_HOSTS: u64 = 1 << 16;

/// Converts a dotted-decimal address into its numeric value.
///
/// ```rust
/// # use portsweep::address::ip_to_int;
/// assert_eq!(ip_to_int("10.1.1.1"), Some(167_837_953));
/// assert_eq!(ip_to_int("10.1.1"), None);
/// ```
pub fn ip_to_int(address: &str) -> Option<u32> {
    Ipv4Addr::from_str(address).ok().map(u32::from)
}

/// Converts a numeric address back into dotted-decimal text.
///
/// ```rust
/// # use portsweep::address::int_to_ip;
/// assert_eq!(int_to_ip(167_837_953), "10.1.1.1");
/// ```
pub fn int_to_ip(value: u32) -> String {
    Ipv4Addr::from(value).to_string()
}

/// One target specification, classified but not yet expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Single(Ipv4Addr),
    Cidr(IpCidr),
    /// `a.b.c.start-end`, bounds as written (not yet swapped).
    LastOctetRange {
        prefix: [u8; 3],
        start: u32,
        end: u32,
    },
    Hostname(String),
}

impl TargetSpec {
    /// Classifies a specification. Anything that is not an address, a
    /// block or a range is taken for a hostname.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();

        if let Ok(address) = Ipv4Addr::from_str(spec) {
            return Self::Single(address);
        }

        if let Some(cidr) = parse_cidr(spec) {
            return Self::Cidr(cidr);
        }

        if let Some((prefix, start, end)) = parse_last_octet_range(spec) {
            return Self::LastOctetRange { prefix, start, end };
        }

        Self::Hostname(spec.to_owned())
    }
}

/// Addresses produced by one target specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub addresses: Vec<Ipv4Addr>,
    /// Set when a hostname was looked up: the name and the address picked.
    pub hostname: Option<(String, Ipv4Addr)>,
}

impl Resolved {
    fn plain(addresses: Vec<Ipv4Addr>) -> Self {
        Self {
            addresses,
            hostname: None,
        }
    }
}

/// Resolves a single target specification.
///
/// An empty expansion is an [`ScanError::InvalidTarget`]: the caller must
/// not start a scan without addresses.
pub async fn resolve_target(
    spec: &str,
    resolver: &TokioAsyncResolver,
) -> Result<Resolved, ScanError> {
    let resolved = match TargetSpec::parse(spec) {
        TargetSpec::Single(address) => Resolved::plain(vec![address]),
        TargetSpec::Cidr(cidr) => Resolved::plain(expand_cidr(&cidr)?),
        TargetSpec::LastOctetRange { prefix, start, end } => {
            Resolved::plain(expand_last_octet_range(prefix, start, end))
        }
        TargetSpec::Hostname(host) => match resolve_ipv4_from_host(&host, resolver).await {
            Some(address) => {
                info!("Resolved {host} to {address}");
                Resolved {
                    addresses: vec![address],
                    hostname: Some((host, address)),
                }
            }
            None => Resolved::plain(Vec::new()),
        },
    };

    if resolved.addresses.is_empty() {
        return Err(ScanError::InvalidTarget(spec.trim().to_owned()));
    }

    debug!("Target {spec} expanded to {} addresses", resolved.addresses.len());
    Ok(resolved)
}

/// Resolves every target specification, in input order.
///
/// Every target has to resolve; the first one that does not aborts the
/// whole resolution. Addresses produced twice are kept once.
pub async fn resolve_targets(
    specs: &[String],
    resolver: &TokioAsyncResolver,
) -> Result<(Vec<Ipv4Addr>, Vec<(String, Ipv4Addr)>), ScanError> {
    if specs.is_empty() {
        return Err(ScanError::InvalidTarget(String::from("no target given")));
    }

    let resolved: Vec<Resolved> = stream::iter(specs.iter())
        .map(|spec| resolve_target(spec, resolver))
        .buffered(10)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()?;

    let hostnames = resolved
        .iter()
        .filter_map(|r| r.hostname.clone())
        .collect_vec();
    let addresses = resolved
        .into_iter()
        .flat_map(|r| r.addresses)
        .unique()
        .collect_vec();

    Ok((addresses, hostnames))
}

fn parse_cidr(spec: &str) -> Option<IpCidr> {
    if !spec.contains('/') {
        return None;
    }
    // `IpInet` tolerates host bits (`10.0.0.5/30`), its network does not.
    IpCidr::from_str(spec)
        .ok()
        .or_else(|| IpInet::from_str(spec).ok().map(|inet| inet.network()))
        .filter(|cidr| matches!(cidr, IpCidr::V4(_)))
}

fn parse_last_octet_range(spec: &str) -> Option<([u8; 3], u32, u32)> {
    let (prefix, range) = spec.rsplit_once('.')?;
    let (start, end) = range.split_once('-')?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(start) || !digits(end) {
        return None;
    }

    let [a, b, c, _] = Ipv4Addr::from_str(&format!("{prefix}.0")).ok()?.octets();
    Some(([a, b, c], start.parse().ok()?, end.parse().ok()?))
}

fn is_scannable(address: Ipv4Addr) -> bool {
    !(address.is_loopback() || address.is_multicast() || address.is_unspecified())
}

/// Enumerates the usable host addresses of an IPv4 block in ascending order.
///
/// The network and broadcast addresses are skipped, except in /31 and /32
/// blocks. Loopback, multicast and unspecified
/// addresses never make it into the list.
fn expand_cidr(cidr: &IpCidr) -> Result<Vec<Ipv4Addr>, ScanError> {
    let IpAddr::V4(first) = cidr.first_address() else {
        return Err(ScanError::InvalidTarget(cidr.to_string()));
    };
    let prefix = u32::from(cidr.network_length());
    let size = 1_u64 << (32 - prefix);
    if size > MAX_CIDR_HOSTS {
        return Err(ScanError::InvalidTarget(format!(
            "{cidr} holds {size} addresses, at most {MAX_CIDR_HOSTS} can be scanned"
        )));
    }

    let network = u32::from(first);
    let broadcast = network | u32::MAX.checked_shr(prefix).unwrap_or(0);
    // /31 and /32 have no network or broadcast address to spare.
    let point_to_point = prefix >= 31;

    let addresses = cidr
        .iter()
        .map(|inet| inet.address())
        .map_while(|address| match address {
            IpAddr::V4(v4) if cidr.contains(&address) => Some(v4),
            _ => None,
        })
        .filter(|&address| {
            let value = u32::from(address);
            (point_to_point || (value != network && value != broadcast))
                && is_scannable(address)
        })
        .collect();

    Ok(addresses)
}

fn expand_last_octet_range(prefix: [u8; 3], start: u32, end: u32) -> Vec<Ipv4Addr> {
    let (low, high) = if start > end { (end, start) } else { (start, end) };
    let [a, b, c] = prefix;

    (low..=high.min(u32::from(u8::MAX)))
        .filter_map(|last| u8::try_from(last).ok())
        .map(|last| Ipv4Addr::new(a, b, c, last))
        .collect()
}

/// Uses DNS to find the first IPv4 address of a host.
async fn resolve_ipv4_from_host(
    host: &str,
    backup_resolver: &TokioAsyncResolver,
) -> Option<Ipv4Addr> {
    if let Ok(addrs) = tokio::net::lookup_host((host, 80)).await {
        if let Some(address) = first_ipv4(addrs.map(|socket| socket.ip())) {
            return Some(address);
        }
    }

    match backup_resolver.lookup_ip(host).await {
        Ok(lookup) => first_ipv4(lookup.iter()),
        Err(e) => {
            debug!("Lookup of {host} failed: {e}");
            None
        }
    }
}

fn first_ipv4(addrs: impl IntoIterator<Item = IpAddr>) -> Option<Ipv4Addr> {
    addrs.into_iter().find_map(|ip| match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(_) => None,
    })
}

/// Derive a DNS resolver.
///
/// 1. if the `resolver` parameter has been set:
///     1. assume the parameter is a path and attempt to read IPs.
///     2. parse the input as a comma-separated list of IPs.
/// 2. if `resolver` is not set:
///    1. attempt to derive a resolver from the system config. (e.g.
///       `/etc/resolv.conf` on *nix).
///    2. finally, build a CloudFlare-based resolver.
pub async fn get_resolver(resolver: Option<&str>) -> TokioAsyncResolver {
    match resolver {
        Some(r) => {
            let mut config = ResolverConfig::new();
            let resolver_ips = match read_resolver_from_file(r).await {
                Ok(ips) => ips,
                Err(_) => r
                    .split(',')
                    .filter_map(|r| IpAddr::from_str(r.trim()).ok())
                    .collect::<Vec<_>>(),
            };
            for ip in resolver_ips {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, 53),
                    Protocol::Udp,
                ));
            }
            TokioAsyncResolver::tokio(config, ResolverOpts::default())
        }
        None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
        }),
    }
}

/// Parses an input file of IPs for use in DNS resolution.
async fn read_resolver_from_file(path: &str) -> io::Result<Vec<IpAddr>> {
    let ips = fs::read_to_string(path)
        .await?
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect();

    Ok(ips)
}
