//! Core functionality for actual scanning behaviour.
//!
//! Every (address, port) pair becomes a [`ScanTask`]. Tasks are spawned on
//! the tokio runtime once a semaphore permit is available, so no more than
//! the configured number of connection attempts are ever in flight. A task
//! keeps its permit until it reaches a terminal [`Outcome`]; running out of
//! local sockets is retried inside the same task after a backoff delay.
use crate::input::RunConfig;
use crate::results::{ResultStore, ScanRecord};
use indicatif::ProgressBar;
use itertools::Itertools;
use log::{debug, warn};
use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::{JoinError, JoinSet},
    time,
};

mod connector;
mod retry;

pub use connector::{classify, Connector, TcpConnector};
pub use retry::{Backoff, RetryPolicy};

/// Result of one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The connection was accepted.
    Open,
    /// The remote end actively refused the connection.
    Refused,
    /// No answer before the per-attempt timeout.
    TimedOut,
    /// No local socket could be opened. Transient, never terminal.
    ResourceExhausted,
    /// Any other failure, with the error message.
    Other(String),
}

impl Outcome {
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Refused => write!(f, "refused"),
            Self::TimedOut => write!(f, "timeout"),
            Self::ResourceExhausted => write!(f, "too many open files"),
            Self::Other(message) => write!(f, "{message}"),
        }
    }
}

/// One address and port to probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanTask {
    address: Ipv4Addr,
    port: u16,
}

impl ScanTask {
    /// Returns `None` for port 0, which can never be probed.
    pub const fn new(address: Ipv4Addr, port: u16) -> Option<Self> {
        if port == 0 {
            return None;
        }
        Some(Self { address, port })
    }

    pub const fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn socket(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port))
    }
}

/// What a finished scan hands to the reporter.
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Recorded outcomes, sorted by address then port.
    pub records: Vec<ScanRecord>,
    /// Number of tasks started.
    pub dispatched: u64,
    /// Number of tasks that reached a terminal outcome.
    pub completed: u64,
    /// Whether any attempt ran out of local sockets.
    pub exhausted: bool,
    /// Most spawned tasks held at once, finished ones awaiting reaping
    /// included. Stays close to the concurrency cap.
    pub peak_pending: usize,
    /// Wall time from the first dispatch to the last completion.
    pub elapsed: Duration,
}

/// The scan engine.
///
/// Built once from a [`RunConfig`]; [`run`](Scanner::run) can be called
/// several times, each run owning its own [`ResultStore`].
#[derive(Debug)]
pub struct Scanner<C = TcpConnector> {
    targets: Box<[Ipv4Addr]>,
    ports: Box<[u16]>,
    concurrency: NonZeroUsize,
    timeout: Duration,
    retry: RetryPolicy,
    debug: bool,
    connector: Arc<C>,
    progress: Option<ProgressBar>,
}

impl Scanner<TcpConnector> {
    pub fn new(config: &RunConfig) -> Self {
        Self::with_connector(config, TcpConnector)
    }
}

impl<C: Connector> Scanner<C> {
    pub fn with_connector(config: &RunConfig, connector: C) -> Self {
        Self {
            targets: Box::from(config.targets.as_slice()),
            ports: Box::from(config.ports.as_slice()),
            concurrency: config.concurrency,
            timeout: config.timeout,
            retry: config.retry,
            debug: config.debug,
            connector: Arc::new(connector),
            progress: None,
        }
    }

    /// Ticks `progress` once for every task that finishes.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Number of tasks a run dispatches.
    pub fn task_count(&self) -> u64 {
        self.targets.len() as u64 * self.ports.len() as u64
    }

    /// Tasks in dispatch order: every port of the first address, then the
    /// next address.
    fn tasks(&self) -> impl Iterator<Item = ScanTask> + '_ {
        self.targets
            .iter()
            .cartesian_product(self.ports.iter())
            .filter_map(|(&address, &port)| ScanTask::new(address, port))
    }

    /// Probes every task and waits for all of them, retries included.
    pub async fn run(&self) -> ScanReport {
        let started = Instant::now();
        let worker = Arc::new(Worker {
            connector: Arc::clone(&self.connector),
            timeout: self.timeout,
            retry: self.retry,
            debug: self.debug,
            store: ResultStore::new(),
            completed: AtomicU64::new(0),
            exhausted: AtomicBool::new(false),
            progress: self.progress.clone(),
        });

        debug!(
            "Start scanning sockets.\nConcurrency {}\nNumber of addresses {}\nNumber of ports {}\nTargets all together {}",
            self.concurrency,
            self.targets.len(),
            self.ports.len(),
            self.task_count()
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency.get()));
        let mut set = JoinSet::new();
        let mut dispatched = 0_u64;
        let mut peak_pending = 0_usize;
        for task in self.tasks() {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let worker = Arc::clone(&worker);
            set.spawn(async move { worker.execute(task, permit).await });
            dispatched += 1;
            peak_pending = peak_pending.max(set.len());

            // Finished tasks are dropped as we go, so the set tracks the cap
            // rather than the task count.
            while let Some(joined) = set.try_join_next() {
                reaped(joined);
            }
        }

        while let Some(joined) = set.join_next().await {
            reaped(joined);
        }

        let records = worker.store.finalize_sorted();
        let report = ScanReport {
            records,
            dispatched,
            completed: worker.completed.load(Ordering::Relaxed),
            exhausted: worker.exhausted.load(Ordering::Relaxed),
            peak_pending,
            elapsed: started.elapsed(),
        };
        debug!(
            "Scan finished in {:?}: {} of {} tasks completed, {} records",
            report.elapsed,
            report.completed,
            report.dispatched,
            report.records.len()
        );
        report
    }
}

fn reaped(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        warn!("Scan task did not finish: {e}");
    }
}

/// State shared by the tasks of one run.
struct Worker<C> {
    connector: Arc<C>,
    timeout: Duration,
    retry: RetryPolicy,
    debug: bool,
    store: ResultStore,
    completed: AtomicU64,
    exhausted: AtomicBool,
    progress: Option<ProgressBar>,
}

impl<C: Connector> Worker<C> {
    async fn execute(&self, task: ScanTask, permit: OwnedSemaphorePermit) {
        let socket = task.socket();
        let mut backoff = self.retry.backoff();

        let (outcome, elapsed) = loop {
            let attempt = Instant::now();
            let outcome = self.connector.connect(socket, self.timeout).await;
            if outcome != Outcome::ResourceExhausted {
                break (outcome, attempt.elapsed());
            }

            self.exhausted.store(true, Ordering::Relaxed);
            if let Some(delay) = backoff.next() {
                debug!("Too many open files probing {socket}, retrying in {delay:?}");
                time::sleep(delay).await;
            } else {
                warn!(
                    "Giving up on {socket} after {} retries on too many open files",
                    self.retry.max_retries
                );
                let message = format!(
                    "too many open files, gave up after {} retries",
                    self.retry.max_retries
                );
                break (Outcome::Other(message), attempt.elapsed());
            }
        };

        if outcome.is_open() {
            debug!("Open {socket}");
        }
        if outcome.is_open() || self.debug {
            self.store.append(
                ScanRecord::new(task.address(), task.port(), outcome).with_elapsed(elapsed),
            );
        }

        self.completed.fetch_add(1, Ordering::Relaxed);
        if let Some(progress) = &self.progress {
            progress.inc(1);
        }
        drop(permit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Replays queued outcomes per socket, then falls back to `fallback`.
    struct Scripted {
        script: Mutex<HashMap<SocketAddr, VecDeque<Outcome>>>,
        fallback: Outcome,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Scripted {
        fn new(fallback: Outcome) -> Self {
            Self {
                script: Mutex::new(HashMap::new()),
                fallback,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn queue(self, socket: &str, outcomes: Vec<Outcome>) -> Self {
            self.script
                .lock()
                .unwrap()
                .insert(socket.parse().unwrap(), outcomes.into());
            self
        }
    }

    #[async_trait]
    impl Connector for Scripted {
        async fn connect(&self, socket: SocketAddr, _timeout: Duration) -> Outcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                time::sleep(self.delay).await;
            }
            let outcome = self
                .script
                .lock()
                .unwrap()
                .get_mut(&socket)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| self.fallback.clone());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_retries: 3,
        }
    }

    fn config(targets: &[&str], ports: Vec<u16>) -> RunConfig {
        let targets = targets.iter().map(|t| t.parse().unwrap()).collect();
        RunConfig {
            retry: fast_retry(),
            ..RunConfig::new(targets, ports)
        }
    }

    #[tokio::test]
    async fn exhaustion_then_open_counts_once() {
        let connector = Scripted::new(Outcome::Refused).queue(
            "127.0.0.1:80",
            vec![Outcome::ResourceExhausted, Outcome::Open],
        );
        let progress = ProgressBar::hidden();
        let scanner = Scanner::with_connector(&config(&["127.0.0.1"], vec![80]), connector)
            .with_progress(progress.clone());

        let report = scanner.run().await;

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].outcome, Outcome::Open);
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(progress.position(), 1);
        assert!(report.exhausted);
        assert_eq!(scanner.connector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_budget_ends_as_other() {
        let connector = Scripted::new(Outcome::ResourceExhausted);
        let config = RunConfig {
            debug: true,
            ..config(&["10.0.0.1"], vec![22])
        };
        let scanner = Scanner::with_connector(&config, connector);

        let report = scanner.run().await;

        assert_eq!(report.completed, 1);
        assert!(report.exhausted);
        assert!(matches!(
            &report.records[0].outcome,
            Outcome::Other(message) if message.contains("too many open files")
        ));
        // One first attempt plus every retry the policy allows.
        assert_eq!(scanner.connector.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn closed_ports_are_recorded_only_in_debug() {
        let script = || {
            Scripted::new(Outcome::Refused)
                .queue("10.0.0.1:22", vec![Outcome::Open])
                .queue("10.0.0.1:23", vec![Outcome::TimedOut])
        };

        let quiet = Scanner::with_connector(&config(&["10.0.0.1"], vec![21, 22, 23]), script());
        let report = quiet.run().await;
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.completed, 3);
        assert!(!report.exhausted);

        let verbose_config = RunConfig {
            debug: true,
            ..config(&["10.0.0.1"], vec![21, 22, 23])
        };
        let verbose = Scanner::with_connector(&verbose_config, script());
        let outcomes: Vec<Outcome> = verbose
            .run()
            .await
            .records
            .into_iter()
            .map(|r| r.outcome)
            .collect();
        assert_eq!(
            outcomes,
            vec![Outcome::Refused, Outcome::Open, Outcome::TimedOut]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_attempts_never_exceed_the_cap() {
        let connector = Scripted::new(Outcome::Open).with_delay(Duration::from_millis(5));
        let config = RunConfig {
            concurrency: NonZeroUsize::new(7).unwrap(),
            ..config(&["10.0.0.1", "10.0.0.2"], (1..=100).collect())
        };
        let scanner = Scanner::with_connector(&config, connector);

        let report = scanner.run().await;

        assert_eq!(report.dispatched, 200);
        assert_eq!(report.completed, 200);
        assert_eq!(report.records.len(), 200);
        assert!(scanner.connector.peak.load(Ordering::SeqCst) <= 7);
    }

    #[tokio::test]
    async fn finished_tasks_are_reaped_during_dispatch() {
        let config = RunConfig {
            concurrency: NonZeroUsize::new(4).unwrap(),
            ..config(&["10.0.0.1", "10.0.0.2"], (1..=1_000).collect())
        };
        let scanner = Scanner::with_connector(&config, Scripted::new(Outcome::Refused));

        let report = scanner.run().await;

        assert_eq!(report.dispatched, 2_000);
        assert_eq!(report.completed, 2_000);
        assert!(report.records.is_empty());
        assert!(
            report.peak_pending <= 8,
            "join set grew to {} tasks",
            report.peak_pending
        );
    }

    #[tokio::test]
    async fn records_come_back_sorted() {
        let connector = Scripted::new(Outcome::Open);
        let scanner = Scanner::with_connector(
            &config(&["10.0.0.2", "10.0.0.1"], vec![443, 22, 8080]),
            connector,
        );

        let sorted: Vec<(Ipv4Addr, u16)> = scanner
            .run()
            .await
            .records
            .into_iter()
            .map(|r| (r.address, r.port))
            .collect();

        let first = Ipv4Addr::new(10, 0, 0, 1);
        let second = Ipv4Addr::new(10, 0, 0, 2);
        assert_eq!(
            sorted,
            vec![
                (first, 22),
                (first, 443),
                (first, 8080),
                (second, 22),
                (second, 443),
                (second, 8080)
            ]
        );
    }

    #[tokio::test]
    async fn runs_are_independent() {
        let scanner = Scanner::with_connector(
            &config(&["10.0.0.1"], vec![80, 443]),
            Scripted::new(Outcome::Open),
        );
        assert_eq!(scanner.run().await.records.len(), 2);
        assert_eq!(scanner.run().await.records.len(), 2);
    }

    #[test]
    fn task_rejects_port_zero() {
        assert!(ScanTask::new(Ipv4Addr::LOCALHOST, 0).is_none());
        let task = ScanTask::new(Ipv4Addr::LOCALHOST, 65535).unwrap();
        assert_eq!(task.socket(), "127.0.0.1:65535".parse().unwrap());
    }

    #[test]
    fn task_count_is_the_cartesian_product() {
        let scanner = Scanner::new(&config(&["10.0.0.1", "10.0.0.2", "10.0.0.3"], vec![22, 80]));
        assert_eq!(scanner.task_count(), 6);
        assert_eq!(scanner.tasks().count(), 6);
        assert_eq!(
            scanner.tasks().next(),
            ScanTask::new(Ipv4Addr::new(10, 0, 0, 1), 22)
        );
    }

    #[test]
    fn outcome_display() {
        assert_eq!(Outcome::Open.to_string(), "open");
        assert_eq!(Outcome::Refused.to_string(), "refused");
        assert_eq!(Outcome::TimedOut.to_string(), "timeout");
        assert_eq!(Outcome::Other("boom".to_owned()).to_string(), "boom");
    }
}
