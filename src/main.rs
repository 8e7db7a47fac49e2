use std::collections::BTreeSet;
use std::env;
use std::fs::File;
use std::sync::Arc;

use alloy_primitives::Address;
use bloomfilter::Bloom;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, Receiver};

use seyield_orchestrator::asset::Asset;
use seyield_orchestrator::balance::BalanceCache;
use seyield_orchestrator::chain::ChainClient;
use seyield_orchestrator::chain::sim::SimChain;
use seyield_orchestrator::config::Config;
use seyield_orchestrator::notify::{LogSink, Notification, spawn_sink};
use seyield_orchestrator::scenario::BalanceRow;
use seyield_orchestrator::{Error, Orchestrator, ScenarioRow};

const WORKER_COUNT: usize = 4;
const CHANNEL_CAPACITY: usize = 1024;
// Roughly ~24 bits per element at the below fp rate; 1 million rows uses ~3MB
const EXPECTED_N_ROWS: usize = 1_000_000;
const BLOOM_FP_RATE: f64 = 0.00001;

/// Runs one shard's rows strictly in order, each operation to completion
/// before the next starts. Returns the accounts it touched.
async fn worker_loop(
    mut rx: Receiver<ScenarioRow>,
    orchestrator: Orchestrator,
) -> BTreeSet<Address> {
    let mut accounts = BTreeSet::new();

    while let Some(row) = rx.recv().await {
        let row_id = row.id();
        let account = row.account();
        accounts.insert(account);

        let request = match row.into_request(orchestrator.assets()) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to convert row: {}", e);
                continue;
            }
        };

        debug!("Processing row {}: {:?}", row_id, request);

        let handle = match orchestrator.start(request) {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(notification) = Notification::rejected(&e) {
                    warn!("{}: {}", notification.title, notification.description);
                }
                error!("Row {} rejected: {}", row_id, e);
                continue;
            }
        };

        let operation = handle.wait().await;
        match &operation.last_error {
            Some(failure) => error!(
                "Row {} {} as {}: {}",
                row_id, operation.state, failure.reason, failure.message
            ),
            None => debug!("Row {} finished as {}", row_id, operation.state),
        }
    }

    accounts
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();

    let path = env::args().nth(1).ok_or(Error::MissingArgument)?;
    info!("Replaying scenario from: {}", path);

    let config = Config::from_env()?;
    let chain: Arc<dyn ChainClient> =
        Arc::new(SimChain::from_config(&config).with_demo_catalog(config.contracts.merchant));
    let cache = Arc::new(BalanceCache::new(Arc::clone(&chain)));
    let orchestrator = Orchestrator::new(chain, Arc::clone(&cache), &config)?;
    let _notifications = spawn_sink(orchestrator.subscribe(), LogSink, config.network.clone());

    let file = File::open(&path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut bloom =
        Bloom::new_for_fp_rate(EXPECTED_N_ROWS, BLOOM_FP_RATE).map_err(Error::DuplicateFilter)?;

    let (senders, receivers): (Vec<_>, Vec<_>) = (0..WORKER_COUNT)
        .map(|_| mpsc::channel::<ScenarioRow>(CHANNEL_CAPACITY))
        .unzip();

    let handles: Vec<_> = receivers
        .into_iter()
        .map(|rx| tokio::spawn(worker_loop(rx, orchestrator.clone())))
        .collect();

    for result in rdr.deserialize() {
        let row: ScenarioRow = match result {
            Ok(r) => r,
            Err(e) => {
                error!("Failed to parse CSV row: {}", e);
                continue;
            }
        };

        if row.should_dedupe() {
            if !bloom.check(&row.id()) {
                bloom.set(&row.id());
            } else {
                warn!(
                    "Possible duplicate id={} account={} type={} amount={:?} - dropped",
                    row.id(),
                    row.account(),
                    row.op_type(),
                    row.amount()
                );
                continue;
            }
        }

        // Same account, same worker: an account's rows keep their order.
        let worker_idx = usize::from(row.account().as_slice()[19]) % WORKER_COUNT;
        if let Err(e) = senders[worker_idx].send(row).await {
            error!("Failed to send row to worker {}: {}", worker_idx, e);
        }
    }

    drop(senders);

    let mut accounts = BTreeSet::new();
    for handle in handles {
        match handle.await {
            Ok(shard) => accounts.extend(shard),
            Err(e) => error!("Worker task failed: {}", e),
        }
    }

    info!("Replay complete. {} accounts.", accounts.len());

    let assets = orchestrator.assets();
    let tracked = assets.addresses();
    let mut wtr = csv::Writer::from_writer(std::io::stdout());
    for account in accounts {
        let report = cache.refresh(account, &tracked).await;
        let show = |asset: &Asset| {
            report
                .values
                .get(&asset.address)
                .map(|value| asset.format_units(*value))
                .unwrap_or_default()
        };
        wtr.serialize(BalanceRow {
            account: account.to_string().to_lowercase(),
            usdc: show(&assets.deposit),
            principal: show(&assets.principal),
            reward: show(&assets.reward),
        })?;
    }
    wtr.flush()?;

    Ok(())
}
