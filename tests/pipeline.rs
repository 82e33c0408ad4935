use fog_usage_meter::aggregate::AggregationService;
use fog_usage_meter::billing::BillingService;
use fog_usage_meter::counter::UsageCounter;
use fog_usage_meter::identity::{ElGamalKeyPair, IdentityOpener, IdentitySealer};
use fog_usage_meter::ledger::{LedgerConfig, PseudonymLedger};
use fog_usage_meter::paillier::PaillierKeyPair;
use fog_usage_meter::types::{ClientId, EncCount, ReportRow, Timestamp};
use num_bigint::BigUint;
use pretty_assertions::assert_eq;
use std::sync::Arc;

struct Parties {
    paillier: PaillierKeyPair,
    elgamal: ElGamalKeyPair,
}

impl Parties {
    fn new() -> Self {
        Self {
            paillier: PaillierKeyPair::generate(128).expect("keygen"),
            elgamal: ElGamalKeyPair::generate(128),
        }
    }

    fn sealer(&self) -> Arc<dyn IdentitySealer> {
        Arc::new(self.elgamal.public().clone())
    }

    fn opener(&self) -> Arc<dyn IdentityOpener> {
        Arc::new(self.elgamal.clone())
    }

    fn report_row(&self, client: u64, count: u32) -> ReportRow {
        ReportRow {
            identity: self
                .sealer()
                .seal(client.to_string().as_bytes())
                .expect("seal"),
            count: EncCount(
                self.paillier
                    .public()
                    .encrypt(&BigUint::from(count))
                    .expect("encrypt")
                    .to_string(),
            ),
        }
    }
}

fn ts(s: &str) -> Timestamp {
    Timestamp(s.to_string())
}

#[test]
fn aggregator_combines_blindly_and_biller_recovers_the_sum() {
    // Two reporting nodes submit counts 3 and 5 for the same identity; the
    // aggregator merges the ciphertexts and the biller sees only 8.
    let parties = Parties::new();
    let aggregator =
        AggregationService::new(parties.opener(), parties.paillier.public().clone());
    let biller = BillingService::new(parties.paillier.clone());

    aggregator.receive_batch(&[parties.report_row(42, 3)]);
    aggregator.receive_batch(&[parties.report_row(42, 5)]);
    assert_eq!(aggregator.pending_identities(), 1);

    assert_eq!(aggregator.flush(&biller), 1);
    let totals = biller.totals();
    assert_eq!(totals[&ClientId(42)], BigUint::from(8u32));

    let charges = biller.settle(2);
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].total, "8");
    assert_eq!(charges[0].charge, "16");
}

#[test]
fn accumulators_are_retired_on_flush() {
    let parties = Parties::new();
    let aggregator =
        AggregationService::new(parties.opener(), parties.paillier.public().clone());
    let biller = BillingService::new(parties.paillier.clone());

    aggregator.receive_batch(&[parties.report_row(1, 4)]);
    assert_eq!(aggregator.flush(&biller), 1);
    // Nothing left to re-bill on the next cycle.
    assert_eq!(aggregator.flush(&biller), 0);
    assert_eq!(biller.totals()[&ClientId(1)], BigUint::from(4u32));

    // A later cycle adds on top of the running total.
    aggregator.receive_batch(&[parties.report_row(1, 6)]);
    aggregator.flush(&biller);
    assert_eq!(biller.totals()[&ClientId(1)], BigUint::from(10u32));
}

#[test]
fn malformed_rows_do_not_poison_the_batch() {
    let parties = Parties::new();
    let aggregator =
        AggregationService::new(parties.opener(), parties.paillier.public().clone());

    let out_of_range = ReportRow {
        identity: parties.sealer().seal(b"13").expect("seal"),
        count: EncCount(parties.paillier.public().working_modulus().to_string()),
    };
    let garbled = ReportRow {
        identity: fog_usage_meter::types::EncIdentity("not-a-ciphertext".into()),
        count: EncCount("5".into()),
    };

    aggregator.receive_batch(&[out_of_range, parties.report_row(7, 2), garbled]);
    assert_eq!(aggregator.pending_identities(), 1, "only the good row lands");
}

#[test]
fn degenerate_totals_do_not_panic_the_biller() {
    use fog_usage_meter::types::TotalRow;

    let parties = Parties::new();
    let biller = BillingService::new(parties.paillier.clone());

    // "0" is in range for the ciphertext check but has no plaintext; it must
    // be dropped per-row, alongside an outright non-decimal total, while the
    // well-formed row still lands.
    let good = parties.paillier.public().encrypt(&BigUint::from(9u32));
    let rows = vec![
        TotalRow {
            client: ClientId(1),
            total: EncCount("0".into()),
        },
        TotalRow {
            client: ClientId(2),
            total: EncCount(parties.paillier.public().modulus().to_string()),
        },
        TotalRow {
            client: ClientId(3),
            total: EncCount("not-a-number".into()),
        },
        TotalRow {
            client: ClientId(4),
            total: EncCount(good.expect("encrypt").to_string()),
        },
    ];
    biller.receive_totals(&rows);

    let totals = biller.totals();
    assert!(!totals.contains_key(&ClientId(1)));
    assert!(!totals.contains_key(&ClientId(2)));
    assert!(!totals.contains_key(&ClientId(3)));
    assert_eq!(totals[&ClientId(4)], BigUint::from(9u32));
}

#[test]
fn empty_harvest_yields_empty_batch() {
    let parties = Parties::new();
    let ledger = Arc::new(PseudonymLedger::new(LedgerConfig::default()));
    let counter = UsageCounter::new(
        ledger,
        parties.sealer(),
        parties.paillier.public().clone(),
    );
    assert!(counter.reconcile().is_empty());
}

#[test]
fn end_to_end_pipeline_conserves_counts() {
    let parties = Parties::new();
    let sealer = parties.sealer();
    let count_key = parties.paillier.public().clone();

    // Two reporting nodes; the client shows up on both.
    let node_a = Arc::new(PseudonymLedger::new(LedgerConfig::default()));
    let node_b = Arc::new(PseudonymLedger::new(LedgerConfig::default()));
    let counters = [
        UsageCounter::new(node_a.clone(), sealer.clone(), count_key.clone()),
        UsageCounter::new(node_b.clone(), sealer, count_key.clone()),
    ];

    let client = ClientId(1001);
    for (ledger, tasks) in [(&node_a, 3u32), (&node_b, 5u32)] {
        for i in 0..tasks {
            let at = ts(&format!("t{i}"));
            let p = ledger.assign(client, at.clone()).unwrap();
            assert!(ledger.settle(&p, &at));
        }
    }

    let aggregator = AggregationService::new(parties.opener(), count_key);
    let biller = BillingService::new(parties.paillier.clone());
    for counter in &counters {
        aggregator.receive_batch(&counter.reconcile());
    }
    aggregator.flush(&biller);

    assert_eq!(biller.totals()[&client], BigUint::from(8u32));
    // Both ledgers fully reaped.
    assert_eq!(node_a.active_records(), 0);
    assert_eq!(node_b.active_records(), 0);
}

#[test]
fn counter_reports_work_completed_since_last_cycle_only() {
    let parties = Parties::new();
    let ledger = Arc::new(PseudonymLedger::new(LedgerConfig::default()));
    let counter = UsageCounter::new(
        ledger.clone(),
        parties.sealer(),
        parties.paillier.public().clone(),
    );
    let aggregator =
        AggregationService::new(parties.opener(), parties.paillier.public().clone());
    let biller = BillingService::new(parties.paillier.clone());

    let client = ClientId(5);
    let p = ledger.assign(client, ts("t1")).unwrap();
    ledger.assign(client, ts("t2")).unwrap();
    assert!(ledger.settle(&p, &ts("t1")));

    // First cycle bills only the settled task.
    aggregator.receive_batch(&counter.reconcile());
    aggregator.flush(&biller);
    assert_eq!(biller.totals()[&client], BigUint::from(1u32));

    // Second cycle bills the remaining one, not both again.
    assert!(ledger.settle(&p, &ts("t2")));
    aggregator.receive_batch(&counter.reconcile());
    aggregator.flush(&biller);
    assert_eq!(biller.totals()[&client], BigUint::from(2u32));
}
