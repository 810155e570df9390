//! Thread-safe collection of scan records.
use crate::scanner::Outcome;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// The terminal outcome of one probed address and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub address: Ipv4Addr,
    pub port: u16,
    pub outcome: Outcome,
    /// Time taken by the attempt that produced the outcome.
    pub elapsed: Option<Duration>,
}

impl ScanRecord {
    pub const fn new(address: Ipv4Addr, port: u16, outcome: Outcome) -> Self {
        Self {
            address,
            port,
            outcome,
            elapsed: None,
        }
    }

    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    /// Ordering key: the address as an integer, then the port.
    pub fn sort_key(&self) -> u64 {
        u64::from(u32::from(self.address)) * 65536 + u64::from(self.port)
    }
}

/// Append-only record store shared by every in-flight attempt.
///
/// Appending can happen from any task at any time. Reading back is
/// [`finalize_sorted`](Self::finalize_sorted), which the scanner only calls
/// once every task has finished.
#[derive(Debug, Default)]
pub struct ResultStore {
    records: Mutex<Vec<ScanRecord>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn append(&self, record: ScanRecord) {
        self.lock().push(record);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes every record out of the store, stably sorted by
    /// [`ScanRecord::sort_key`].
    pub fn finalize_sorted(&self) -> Vec<ScanRecord> {
        let mut records = std::mem::take(&mut *self.lock());
        records.sort_by_key(ScanRecord::sort_key);
        records
    }

    // A panicking appender cannot leave a half-pushed Vec behind.
    fn lock(&self) -> MutexGuard<'_, Vec<ScanRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{ResultStore, ScanRecord};
    use crate::scanner::Outcome;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn record(address: Ipv4Addr, port: u16) -> ScanRecord {
        ScanRecord::new(address, port, Outcome::Open)
    }

    #[test]
    fn concurrent_appends_are_all_kept() {
        let store = Arc::new(ResultStore::new());
        let handles: Vec<_> = (0..400_u16)
            .map(|port| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.append(record(Ipv4Addr::LOCALHOST, port + 1)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 400);
        assert_eq!(store.finalize_sorted().len(), 400);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_from_tasks() {
        let store = Arc::new(ResultStore::with_capacity(300));
        let mut set = tokio::task::JoinSet::new();
        for port in 1..=300_u16 {
            let store = Arc::clone(&store);
            set.spawn(async move { store.append(record(Ipv4Addr::LOCALHOST, port)) });
        }
        while set.join_next().await.is_some() {}

        assert_eq!(store.len(), 300);
    }

    #[test]
    fn sorts_by_port_on_one_address() {
        let store = ResultStore::new();
        for port in [443, 22, 8080] {
            store.append(record(Ipv4Addr::new(10, 0, 0, 1), port));
        }

        let ports: Vec<u16> = store.finalize_sorted().iter().map(|r| r.port).collect();
        assert_eq!(ports, vec![22, 443, 8080]);
    }

    #[test]
    fn sorts_by_address_before_port() {
        let store = ResultStore::new();
        store.append(record(Ipv4Addr::new(10, 0, 0, 2), 22));
        store.append(record(Ipv4Addr::new(10, 0, 0, 1), 8080));
        store.append(record(Ipv4Addr::new(9, 255, 255, 255), 65535));

        let sorted: Vec<(Ipv4Addr, u16)> = store
            .finalize_sorted()
            .into_iter()
            .map(|r| (r.address, r.port))
            .collect();
        assert_eq!(
            sorted,
            vec![
                (Ipv4Addr::new(9, 255, 255, 255), 65535),
                (Ipv4Addr::new(10, 0, 0, 1), 8080),
                (Ipv4Addr::new(10, 0, 0, 2), 22),
            ]
        );
    }

    #[test]
    fn equal_keys_keep_insertion_order() {
        let store = ResultStore::new();
        let address = Ipv4Addr::new(10, 0, 0, 1);
        store.append(ScanRecord::new(address, 80, Outcome::TimedOut));
        store.append(ScanRecord::new(address, 22, Outcome::Open));
        store.append(ScanRecord::new(address, 80, Outcome::Refused));

        let outcomes: Vec<Outcome> = store
            .finalize_sorted()
            .into_iter()
            .map(|r| r.outcome)
            .collect();
        assert_eq!(
            outcomes,
            vec![Outcome::Open, Outcome::TimedOut, Outcome::Refused]
        );
    }

    #[test]
    fn finalize_drains_the_store() {
        let store = ResultStore::new();
        store.append(record(Ipv4Addr::LOCALHOST, 80).with_elapsed(Duration::from_millis(3)));
        assert!(!store.is_empty());

        let records = store.finalize_sorted();
        assert_eq!(records[0].elapsed, Some(Duration::from_millis(3)));
        assert!(store.is_empty());
    }

    #[test]
    fn sort_key_combines_address_and_port() {
        let r = record(Ipv4Addr::new(0, 0, 0, 1), 2);
        assert_eq!(r.sort_key(), 65536 + 2);
    }
}
