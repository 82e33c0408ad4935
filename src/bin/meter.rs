use clap::Parser;
use fog_usage_meter::aggregate::AggregationService;
use fog_usage_meter::billing::BillingService;
use fog_usage_meter::counter::UsageCounter;
use fog_usage_meter::identity::{ElGamalKeyPair, IdentityOpener, IdentitySealer};
use fog_usage_meter::keys;
use fog_usage_meter::ledger::{LedgerConfig, PseudonymLedger, SlotPolicy};
use fog_usage_meter::paillier::PaillierKeyPair;
use fog_usage_meter::types::{ChargeRow, ClientId, Timestamp};
use hdrhistogram::Histogram;
use num_bigint::BigUint;
use num_traits::Zero;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Synthetic-load experiment: many concurrent clients issue tasks against a
/// handful of reporting nodes, reconciliation epochs run while the load is
/// live, and the run ends with a flush and a settle. Per-phase latencies are
/// reported as percentiles.
#[derive(Parser, Debug)]
#[command(name = "meter")]
struct Args {
    #[arg(long, default_value_t = 4)]
    nodes: usize,

    #[arg(long, default_value_t = 48)]
    clients: u64,

    #[arg(long, default_value_t = 20)]
    tasks_per_client: u32,

    /// Pseudonym slots per reporting node.
    #[arg(long, default_value_t = 10)]
    capacity: usize,

    #[arg(long, default_value = "round-robin")]
    policy: String,

    /// Chance that a client moves to a random other node between tasks.
    #[arg(long, default_value_t = 0.2)]
    migration_probability: f64,

    /// Reconciliation epochs interleaved with the load; one more runs after
    /// the load drains.
    #[arg(long, default_value_t = 3)]
    epochs: u32,

    #[arg(long, default_value_t = 500)]
    epoch_ms: u64,

    #[arg(long, default_value_t = 512)]
    paillier_bits: u64,

    #[arg(long, default_value_t = 512)]
    elgamal_bits: u64,

    #[arg(long, default_value_t = 5)]
    price: u64,

    /// Load keys from this directory when the files exist; otherwise
    /// generate ephemeral ones and write them there.
    #[arg(long, default_value = "keys")]
    key_dir: PathBuf,
}

fn parse_policy(s: &str) -> SlotPolicy {
    match s.to_ascii_lowercase().as_str() {
        "shuffled" | "shuffled-free-list" => SlotPolicy::ShuffledFreeList,
        _ => SlotPolicy::RoundRobin,
    }
}

fn load_or_generate_keys(
    dir: &Path,
    paillier_bits: u64,
    elgamal_bits: u64,
) -> anyhow::Result<(PaillierKeyPair, ElGamalKeyPair)> {
    let paillier_path = dir.join("biller_paillier.key");
    let elgamal_path = dir.join("aggregator_elgamal.key");
    if paillier_path.exists() && elgamal_path.exists() {
        info!(dir = %dir.display(), "loading keys");
        return Ok((
            keys::load_paillier_keypair(&paillier_path)?,
            keys::load_elgamal_keypair(&elgamal_path)?,
        ));
    }

    info!(paillier_bits, elgamal_bits, "generating keys");
    let paillier = PaillierKeyPair::generate(paillier_bits)?;
    let elgamal = ElGamalKeyPair::generate(elgamal_bits);
    std::fs::create_dir_all(dir)?;
    keys::save_paillier_keypair(&paillier_path, &paillier)?;
    keys::save_elgamal_keypair(&elgamal_path, &elgamal)?;
    Ok((paillier, elgamal))
}

#[derive(Clone)]
struct PhaseHistos {
    assign_us: Arc<Mutex<Histogram<u64>>>,
    reconcile_us: Arc<Mutex<Histogram<u64>>>,
    aggregate_us: Arc<Mutex<Histogram<u64>>>,
}

impl PhaseHistos {
    fn new() -> Self {
        let fresh = || Arc::new(Mutex::new(Histogram::new(3).expect("histogram")));
        Self {
            assign_us: fresh(),
            reconcile_us: fresh(),
            aggregate_us: fresh(),
        }
    }
}

fn record(hist: &Mutex<Histogram<u64>>, started: Instant) {
    let us = started.elapsed().as_micros() as u64;
    let _ = hist.lock().record(us.max(1));
}

#[derive(Serialize)]
struct PhasePercentiles {
    p50_us: u64,
    p95_us: u64,
    p99_us: u64,
    count: u64,
}

impl PhasePercentiles {
    fn from(hist: &Mutex<Histogram<u64>>) -> Self {
        let h = hist.lock();
        Self {
            p50_us: h.value_at_quantile(0.50),
            p95_us: h.value_at_quantile(0.95),
            p99_us: h.value_at_quantile(0.99),
            count: h.len(),
        }
    }
}

#[derive(Serialize)]
struct Summary {
    nodes: usize,
    clients: u64,
    tasks_assigned: u64,
    tasks_billed: String,
    conservation_ok: bool,
    epochs_run: u32,
    assign: PhasePercentiles,
    reconcile: PhasePercentiles,
    aggregate: PhasePercentiles,
    charges: Vec<ChargeRow>,
}

fn run_epoch(counters: &[Arc<UsageCounter>], aggregator: &AggregationService, histos: &PhaseHistos) {
    for counter in counters {
        let started = Instant::now();
        let batch = counter.reconcile();
        record(&histos.reconcile_us, started);

        let started = Instant::now();
        aggregator.receive_batch(&batch);
        record(&histos.aggregate_us, started);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let (paillier, elgamal) =
        load_or_generate_keys(&args.key_dir, args.paillier_bits, args.elgamal_bits)?;

    let count_key = paillier.public().clone();
    let sealer: Arc<dyn IdentitySealer> = Arc::new(elgamal.public().clone());
    let opener: Arc<dyn IdentityOpener> = Arc::new(elgamal);

    let ledger_cfg = LedgerConfig {
        capacity: args.capacity,
        policy: parse_policy(&args.policy),
        ..LedgerConfig::default()
    };
    let ledgers: Arc<Vec<Arc<PseudonymLedger>>> = Arc::new(
        (0..args.nodes)
            .map(|_| Arc::new(PseudonymLedger::new(ledger_cfg.clone())))
            .collect(),
    );
    let counters: Vec<Arc<UsageCounter>> = ledgers
        .iter()
        .map(|l| Arc::new(UsageCounter::new(l.clone(), sealer.clone(), count_key.clone())))
        .collect();
    let aggregator = Arc::new(AggregationService::new(opener, count_key));
    let biller = Arc::new(BillingService::new(paillier));

    let histos = PhaseHistos::new();
    let assigned = Arc::new(AtomicU64::new(0));

    let mut workers = Vec::with_capacity(args.clients as usize);
    for client in 1..=args.clients {
        let ledgers = ledgers.clone();
        let histos = histos.clone();
        let assigned = assigned.clone();
        let nodes = args.nodes;
        let tasks = args.tasks_per_client;
        let migration = args.migration_probability;

        workers.push(tokio::spawn(async move {
            let mut node = (client as usize) % nodes;
            for _ in 0..tasks {
                if rand::thread_rng().gen_bool(migration) {
                    node = rand::thread_rng().gen_range(0..nodes);
                }
                let at = Timestamp::now();
                let started = Instant::now();
                let pseudonym = match ledgers[node].assign(ClientId(client), at.clone()) {
                    Ok(p) => p,
                    Err(err) => {
                        warn!(client, %err, "assign failed");
                        continue;
                    }
                };
                record(&histos.assign_us, started);
                assigned.fetch_add(1, Ordering::Relaxed);

                // The service works on the task for a moment before the
                // response settles the marker. Draw before awaiting so the
                // ThreadRng is not held across the await point.
                let work_ms = rand::thread_rng().gen_range(1..5);
                tokio::time::sleep(Duration::from_millis(work_ms)).await;
                if !ledgers[node].settle(&pseudonym, &at) {
                    warn!(client, %pseudonym, "settle missed its marker");
                }
            }
        }));
    }

    // Reconciliation epochs interleaved with the live load.
    let mut epochs_run = 0;
    for _ in 0..args.epochs {
        tokio::time::sleep(Duration::from_millis(args.epoch_ms)).await;
        run_epoch(&counters, &aggregator, &histos);
        aggregator.flush(&biller);
        epochs_run += 1;
    }

    for worker in workers {
        worker.await?;
    }

    // Final epoch after the load drains picks up everything still pending.
    run_epoch(&counters, &aggregator, &histos);
    aggregator.flush(&biller);
    epochs_run += 1;

    let charges = biller.settle(args.price);
    let billed: BigUint = biller.totals().values().fold(BigUint::zero(), |acc, t| acc + t);
    let tasks_assigned = assigned.load(Ordering::Relaxed);

    let summary = Summary {
        nodes: args.nodes,
        clients: args.clients,
        tasks_assigned,
        tasks_billed: billed.to_string(),
        conservation_ok: billed == BigUint::from(tasks_assigned),
        epochs_run,
        assign: PhasePercentiles::from(&histos.assign_us),
        reconcile: PhasePercentiles::from(&histos.reconcile_us),
        aggregate: PhasePercentiles::from(&histos.aggregate_us),
        charges,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
