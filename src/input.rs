//! Provides a means to read, parse and hold configuration options for scans.
use crate::address::{get_resolver, resolve_targets};
use crate::error::ScanError;
use crate::port_strategy::{exclude_ports, resolve_ports, PortStrategy, ALL_PORTS_SPEC};
use crate::scanner::RetryPolicy;
use clap::{Parser, ValueEnum};
use serde_derive::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// Ports probed when no port specification is given.
pub const DEFAULT_PORTS: &str =
    "21,22,23,53,80,135,139,443,445,1080,1433,1521,2222,3000,3306,3389,5432,6379,8080,8888,50050,55553";

const DEFAULT_CONCURRENCY: usize = 200;
const DEFAULT_TIMEOUT_MS: u64 = 200;

/// Represents the strategy in which the port scanning will run.
///   - Serial keeps the order of the port specification.
///   - Random shuffles the ports once before scanning.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Serial,
    Random,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "portsweep",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Concurrent TCP port prober.
/// Example: portsweep -p 22-8080 -s 300 127.0.0.1
pub struct Opts {
    /// Addresses, CIDR blocks (10.0.0.0/24), last-octet ranges
    /// (10.0.0.1-20) or hostnames. Comma separated lists are accepted.
    #[arg(value_delimiter = ',', required = true)]
    pub targets: Vec<String>,

    /// Ports to probe, either a list or a range. Examples: 22,80,443 or 1-1024
    #[arg(short, long, alias = "range", default_value = DEFAULT_PORTS)]
    pub ports: String,

    /// Probe every port, 1-65535. Overrides --ports.
    #[arg(short, long)]
    pub all: bool,

    /// Show every scan result instead of open ports only.
    #[arg(short, long)]
    pub debug: bool,

    /// Show how long each reported attempt took.
    #[arg(short = 'c', long)]
    pub show_cost: bool,

    /// Maximum number of connection attempts in flight at once.
    #[arg(short = 's', long, alias = "batch-size", default_value_t = 200, value_parser = clap::value_parser!(u32).range(1..))]
    pub concurrency: u32,

    /// The timeout in milliseconds before a port is assumed to be closed.
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout: u64,

    /// How many times an attempt that hit the open file limit is retried.
    #[arg(long, default_value_t = 50)]
    pub max_retries: u32,

    /// The order of scanning to be performed.
    #[arg(long, value_enum, ignore_case = true, default_value = "serial")]
    pub scan_order: ScanOrder,

    /// A list of comma separated ports to be excluded from scanning. Example: 80,443,8080.
    #[arg(short, long, value_delimiter = ',')]
    pub exclude_ports: Option<Vec<u16>>,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// A comma-delimited list or file of DNS resolvers.
    #[arg(long)]
    pub resolver: Option<String>,

    /// Greppable mode. Only output the open ports.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(long, value_parser)]
    pub config_path: Option<PathBuf>,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Self::parse()
    }

    /// The port specification to resolve, taking `--all` into account.
    pub fn port_spec(&self) -> &str {
        if self.all {
            ALL_PORTS_SPEC
        } else {
            &self.ports
        }
    }

    /// Merges values found within the user configuration file.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            ports,
            all,
            debug,
            show_cost,
            concurrency,
            timeout,
            max_retries,
            scan_order,
            greppable,
            accessible
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(resolver, ulimit, exclude_ports);
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            targets: vec![],
            ports: DEFAULT_PORTS.to_owned(),
            all: false,
            debug: false,
            show_cost: false,
            concurrency: 200,
            timeout: DEFAULT_TIMEOUT_MS,
            max_retries: 50,
            scan_order: ScanOrder::Serial,
            exclude_ports: None,
            ulimit: None,
            resolver: None,
            greppable: false,
            accessible: false,
            no_config: true,
            config_path: None,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    ports: Option<String>,
    all: Option<bool>,
    debug: Option<bool>,
    show_cost: Option<bool>,
    concurrency: Option<u32>,
    timeout: Option<u64>,
    max_retries: Option<u32>,
    scan_order: Option<ScanOrder>,
    exclude_ports: Option<Vec<u16>>,
    ulimit: Option<u64>,
    resolver: Option<String>,
    greppable: Option<bool>,
    accessible: Option<bool>,
}

impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file is an empty configuration.
    ///
    /// # Format
    ///
    /// ports = "1-1024"
    /// concurrency = 500
    /// timeout = 300
    /// scan_order = "Random"
    /// exclude_ports = [8080, 9090, 80]
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Result<Self, ScanError> {
        let Some(config_path) = custom_config_path.or_else(default_config_path) else {
            return Ok(Self::default());
        };
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|e| ScanError::Config(format!("{}: {e}", config_path.display())))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ScanError::Config(format!("{}: {e}", config_path.display())))?;
        if matches!(config, Self { concurrency: Some(0), .. }) {
            return Err(ScanError::Config(format!(
                "{}: concurrency must be at least 1",
                config_path.display()
            )));
        }

        Ok(config)
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> Option<PathBuf> {
    let mut config_path = dirs::home_dir()?;
    config_path.push(".portsweep.toml");
    Some(config_path)
}

/// Everything a scan needs, resolved once before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub targets: Vec<Ipv4Addr>,
    /// Ports in the order they are dispatched.
    pub ports: Vec<u16>,
    pub concurrency: NonZeroUsize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub scan_order: ScanOrder,
    pub debug: bool,
    pub show_cost: bool,
    pub all_ports: bool,
}

impl RunConfig {
    /// A configuration with default settings for the given targets and ports.
    pub fn new(targets: Vec<Ipv4Addr>, ports: Vec<u16>) -> Self {
        Self {
            targets,
            ports,
            concurrency: NonZeroUsize::new(DEFAULT_CONCURRENCY).unwrap_or(NonZeroUsize::MIN),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retry: RetryPolicy::default(),
            scan_order: ScanOrder::Serial,
            debug: false,
            show_cost: false,
            all_ports: false,
        }
    }

    /// Resolves the options into a run configuration.
    ///
    /// Ports are resolved first so that a bad port specification is reported
    /// before any DNS traffic. Returns the hostname mappings found while
    /// resolving targets alongside the configuration.
    pub async fn resolve(opts: &Opts) -> Result<(Self, Vec<(String, Ipv4Addr)>), ScanError> {
        let ports = resolve_ports(opts.port_spec())?;
        let ports = exclude_ports(ports, opts.exclude_ports.as_deref().unwrap_or_default());
        if ports.is_empty() {
            return Err(ScanError::InvalidPortSpec(format!(
                "every port of '{}' is excluded",
                opts.port_spec()
            )));
        }
        let ports = PortStrategy::pick(ports, opts.scan_order).order().to_vec();

        let resolver = get_resolver(opts.resolver.as_deref()).await;
        let (targets, hostnames) = resolve_targets(&opts.targets, &resolver).await?;

        let config = Self {
            concurrency: usize::try_from(opts.concurrency)
                .ok()
                .and_then(NonZeroUsize::new)
                .unwrap_or(NonZeroUsize::MIN),
            timeout: Duration::from_millis(opts.timeout),
            retry: RetryPolicy::default().with_max_retries(opts.max_retries),
            scan_order: opts.scan_order,
            debug: opts.debug,
            show_cost: opts.show_cost,
            all_ports: opts.all,
            ..Self::new(targets, ports)
        };
        Ok((config, hostnames))
    }

    /// Lowers the concurrency cap, never below one.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = NonZeroUsize::new(concurrency).unwrap_or(NonZeroUsize::MIN);
        self
    }
}
