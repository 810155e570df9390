//! This crate exposes the internal functionality of the portsweep TCP
//! reachability prober.
//!
//! portsweep takes a set of targets (addresses, CIDR blocks, last-octet
//! ranges or hostnames) and a port specification, and tries a time-bounded
//! TCP connect against every address and port pair with a hard cap on how
//! many attempts are in flight at once.
//!
//! ## Architecture Overview
//!
//! 1. **Input Processing**: [`input::RunConfig`] is resolved from the command
//!    line and the optional configuration file. Ports come from
//!    [`port_strategy`], addresses from [`address`].
//! 2. **Socket Scanning**: [`scanner::Scanner`] dispatches one task per pair
//!    under a semaphore, retrying attempts that ran out of local sockets.
//! 3. **Result Processing**: outcomes are collected in a
//!    [`results::ResultStore`], sorted once the scan is over and printed by
//!    [`report::Reporter`].
//!
//! ## Basic Usage Example
//!
//! ```rust
//! use std::net::Ipv4Addr;
//! use std::time::Duration;
//!
//! use portsweep::input::RunConfig;
//! use portsweep::scanner::Scanner;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RunConfig {
//!         timeout: Duration::from_millis(100),
//!         ..RunConfig::new(vec![Ipv4Addr::LOCALHOST], vec![1, 2, 3])
//!     }
//!     .with_concurrency(10);
//!
//!     let report = Scanner::new(&config).run().await;
//!     assert_eq!(report.dispatched, 3);
//!     for record in &report.records {
//!         println!("{}:{} is {}", record.address, record.port, record.outcome);
//!     }
//! }
//! ```
#![allow(clippy::needless_doctest_main)]

pub mod tui;

pub mod error;

pub mod input;

pub mod address;

pub mod port_strategy;

pub mod scanner;

pub mod results;

pub mod report;

pub mod limits;
