use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::{Address, U256};
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::chain::{ChainClient, ChainReads};
use crate::error::ChainError;

type Key = (Address, Address);
type SharedRead = Shared<BoxFuture<'static, Result<U256, ChainError>>>;

#[derive(Debug, Default, Clone)]
struct Entry {
    confirmed: Option<U256>,
    optimistic: Option<U256>,
}

struct Inner {
    chain: Arc<dyn ChainClient>,
    entries: Mutex<HashMap<Key, Entry>>,
    // Lock order: in_flight before entries.
    in_flight: Mutex<HashMap<Key, (u64, SharedRead)>>,
    generation: AtomicU64,
}

impl Inner {
    fn complete(&self, key: Key, generation: u64, result: &Result<U256, ChainError>) {
        let mut in_flight = self.in_flight.lock();
        match in_flight.get(&key) {
            Some((current, _)) if *current == generation => {
                in_flight.remove(&key);
            }
            _ => {
                debug!("Dropping balance read for {:?}, invalidated while in flight", key);
                return;
            }
        }

        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_default();
        entry.optimistic = None;
        entry.confirmed = result.as_ref().ok().copied();
    }
}

/// Outcome of [`BalanceCache::refresh`]: every asset lands in exactly one of
/// `values` or `failures`.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub values: HashMap<Address, U256>,
    pub failures: Vec<(Address, ChainError)>,
}

impl RefreshReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Last-known balances per (account, asset), shared process-wide.
///
/// Concurrent refreshes of the same (account, asset) share one chain read.
pub struct BalanceCache {
    inner: Arc<Inner>,
}

impl BalanceCache {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            inner: Arc::new(Inner {
                chain,
                entries: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Confirmed balance; `None` when never read or the last read failed.
    pub fn get(&self, account: Address, asset: Address) -> Option<U256> {
        self.inner
            .entries
            .lock()
            .get(&(account, asset))
            .and_then(|entry| entry.confirmed)
    }

    /// Balance for display: the optimistic value if one is recorded.
    pub fn display(&self, account: Address, asset: Address) -> Option<U256> {
        self.inner
            .entries
            .lock()
            .get(&(account, asset))
            .and_then(|entry| entry.optimistic.or(entry.confirmed))
    }

    /// Display-only value, discarded by the next refresh of the entry.
    pub fn record_optimistic(&self, account: Address, asset: Address, value: U256) {
        self.inner
            .entries
            .lock()
            .entry((account, asset))
            .or_default()
            .optimistic = Some(value);
    }

    /// Forgets everything known about `account`, including reads in flight.
    pub fn invalidate(&self, account: Address) {
        let mut in_flight = self.inner.in_flight.lock();
        in_flight.retain(|(owner, _), _| *owner != account);
        let mut entries = self.inner.entries.lock();
        entries.retain(|(owner, _), _| *owner != account);
        debug!("Invalidated cached balances for {}", account);
    }

    pub async fn refresh(&self, account: Address, assets: &[Address]) -> RefreshReport {
        let reads = assets.iter().map(|asset| {
            let asset = *asset;
            let read = self.read(account, asset);
            async move { (asset, read.await) }
        });

        let mut report = RefreshReport::default();
        for (asset, result) in join_all(reads).await {
            match result {
                Ok(value) => {
                    report.values.insert(asset, value);
                }
                Err(e) => {
                    warn!("Balance read failed for {} / {}: {}", account, asset, e);
                    report.failures.push((asset, e));
                }
            }
        }
        report
    }

    fn read(&self, account: Address, asset: Address) -> SharedRead {
        let key = (account, asset);
        let mut in_flight = self.inner.in_flight.lock();
        if let Some((_, read)) = in_flight.get(&key) {
            debug!("Joining in-flight balance read for {} / {}", account, asset);
            return read.clone();
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let read = async move {
            let result = inner.chain.balance_of(asset, account).await;
            inner.complete(key, generation, &result);
            result
        }
        .boxed()
        .shared();

        in_flight.insert(key, (generation, read.clone()));
        read
    }
}
