#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown, clippy::if_not_else, clippy::non_ascii_literal)]

use portsweep::input::{Config, Opts, RunConfig};
use portsweep::report::Reporter;
use portsweep::scanner::Scanner;
use portsweep::{detail, output, warning};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use std::process::ExitCode;

#[cfg(unix)]
use portsweep::limits::{current_ulimit, infer_concurrency, raise_ulimit, Fit};

#[cfg(not(tarpaulin_include))]
#[tokio::main]
/// Resolves the run, probes every target and prints the results.
/// Fatal input errors exit with status 1 before any probe is sent.
async fn main() -> ExitCode {
    env_logger::init();

    let mut opts: Opts = Opts::read();
    if !opts.no_config {
        match Config::read(opts.config_path.clone()) {
            Ok(config) => opts.merge(&config),
            Err(e) => {
                warning!(e, false, opts.accessible);
                return ExitCode::FAILURE;
            }
        }
    }
    debug!("Main() `opts` arguments are {opts:?}");

    let (config, hostnames) = match RunConfig::resolve(&opts).await {
        Ok(resolved) => resolved,
        Err(e) => {
            warning!(e, false, opts.accessible);
            return ExitCode::FAILURE;
        }
    };

    #[cfg(unix)]
    let config = {
        let concurrency = fit_concurrency(&opts, config.concurrency.get());
        config.with_concurrency(concurrency)
    };

    for (host, address) in &hostnames {
        detail!(
            format!("Resolved {host} to {address}"),
            opts.greppable,
            opts.accessible
        );
    }
    let ports = if config.all_ports {
        "all ports"
    } else {
        opts.port_spec()
    };
    detail!(
        format!("Scanning {ports} on {}", opts.targets.join(",")),
        opts.greppable,
        opts.accessible
    );

    let mut scanner = Scanner::new(&config);
    let progress = if opts.greppable || opts.accessible {
        None
    } else {
        match progress_bar(scanner.task_count()) {
            Ok(bar) => Some(bar),
            Err(e) => {
                warn!("Progress bar disabled: {e:#}");
                None
            }
        }
    };
    if let Some(bar) = &progress {
        scanner = scanner.with_progress(bar.clone());
    }

    let report = scanner.run().await;
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }
    debug!(
        "{} of {} tasks finished in {:?}",
        report.completed, report.dispatched, report.elapsed
    );

    Reporter::new(opts.greppable, opts.accessible, config.show_cost).print(&report);
    if config.show_cost {
        output!(
            format!("Scan took {} ms", report.elapsed.as_millis()),
            opts.greppable,
            opts.accessible
        );
    }

    ExitCode::SUCCESS
}

fn progress_bar(len: u64) -> anyhow::Result<ProgressBar> {
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
    )
    .context("invalid progress bar template")?
    .progress_chars("#>-");
    Ok(ProgressBar::new(len).with_style(style))
}

/// Raises the open file limit when asked to, then fits the concurrency cap
/// under whatever limit is in place.
#[cfg(unix)]
fn fit_concurrency(opts: &Opts, requested: usize) -> usize {
    if let Some(limit) = opts.ulimit {
        match raise_ulimit(limit) {
            Ok(()) => {
                detail!(
                    format!("Automatically increasing ulimit value to {limit}."),
                    opts.greppable,
                    opts.accessible
                );
            }
            Err(e) => {
                warning!(
                    format!("Failed to set ulimit value: {e}"),
                    opts.greppable,
                    opts.accessible
                );
            }
        }
    }

    let ulimit = match current_ulimit() {
        Ok(ulimit) => ulimit,
        Err(e) => {
            warn!("Could not read the open file limit: {e}");
            return requested;
        }
    };

    match infer_concurrency(requested, ulimit) {
        Fit::Fits(concurrency) => concurrency,
        Fit::Lowered(concurrency) => {
            warning!(
                format!(
                    "File limit {ulimit} is lower than the requested concurrency {requested}, using {concurrency}. Consider upping it with --ulimit."
                ),
                opts.greppable,
                opts.accessible
            );
            concurrency
        }
    }
}
