use fog_usage_meter::ledger::{LedgerConfig, PseudonymLedger, SlotPolicy};
use fog_usage_meter::types::{ClientId, Timestamp, UsageDelta};
use pretty_assertions::assert_eq;
use std::collections::{HashMap, HashSet};

fn ts(s: &str) -> Timestamp {
    Timestamp(s.to_string())
}

fn small_ledger(capacity: usize) -> PseudonymLedger {
    PseudonymLedger::new(LedgerConfig {
        capacity,
        ..LedgerConfig::default()
    })
}

#[test]
fn pseudonyms_are_unique_and_fixed_width() {
    let ledger = small_ledger(64);
    let pseudonyms = ledger.pseudonyms();
    let distinct: HashSet<_> = pseudonyms.iter().collect();
    assert_eq!(distinct.len(), 64);
    for p in &pseudonyms {
        assert_eq!(p.0.len(), 12);
        assert!(p.0.chars().all(|c| c.is_ascii_digit()));
        assert_ne!(p.0.as_bytes()[0], b'0');
    }
}

#[test]
fn settle_then_harvest_reconciles_and_reaps() {
    // Capacity-3 walkthrough: two tasks, settled one at a time, harvested
    // in two epochs.
    let ledger = small_ledger(3);
    let client = ClientId(7);

    let p1 = ledger.assign(client, ts("t1")).unwrap();
    let p2 = ledger.assign(client, ts("t2")).unwrap();
    assert_eq!(p1, p2, "second assign must stick to the same pseudonym");

    assert!(ledger.settle(&p1, &ts("t1")));
    let first = ledger.harvest();
    assert_eq!(first, vec![UsageDelta { client, delta: 1 }]);
    assert_eq!(ledger.active_records(), 1, "t2 still pending, record retained");

    assert!(ledger.settle(&p1, &ts("t2")));
    let second = ledger.harvest();
    assert_eq!(second, vec![UsageDelta { client, delta: 1 }]);
    assert_eq!(ledger.active_records(), 0, "fully settled record is reaped");

    assert!(ledger.harvest().is_empty());
}

#[test]
fn pseudonym_rotates_after_full_harvest() {
    let ledger = small_ledger(3);
    let client = ClientId(1);

    let before = ledger.assign(client, ts("a")).unwrap();
    assert!(ledger.settle(&before, &ts("a")));
    ledger.harvest();

    // Round-robin cursor has moved on, so the reassigned client lands on a
    // different slot and therefore a different pseudonym.
    let after = ledger.assign(client, ts("b")).unwrap();
    assert_ne!(before, after);
}

#[test]
fn settle_misses_are_non_fatal() {
    let ledger = small_ledger(3);
    let p = ledger.assign(ClientId(9), ts("t1")).unwrap();

    assert!(!ledger.settle(&p, &ts("t-unknown")));
    assert!(!ledger.settle(
        &fog_usage_meter::types::Pseudonym("000000000000".into()),
        &ts("t1")
    ));
    // The real marker is still there.
    assert!(ledger.settle(&p, &ts("t1")));
}

#[test]
fn capacity_exhausts_when_reuse_is_disabled() {
    let ledger = PseudonymLedger::new(LedgerConfig {
        capacity: 2,
        reuse_slots: false,
        ..LedgerConfig::default()
    });

    ledger.assign(ClientId(1), ts("t")).unwrap();
    ledger.assign(ClientId(2), ts("t")).unwrap();
    assert!(ledger.assign(ClientId(3), ts("t")).is_err());
    // Sticky assigns against existing records still work.
    assert!(ledger.assign(ClientId(1), ts("t2")).is_ok());
}

#[test]
fn shuffled_policy_spreads_clients_across_all_slots() {
    let ledger = PseudonymLedger::new(LedgerConfig {
        capacity: 8,
        policy: SlotPolicy::ShuffledFreeList,
        ..LedgerConfig::default()
    });

    let mut seen = HashSet::new();
    for client in 0..8 {
        seen.insert(ledger.assign(ClientId(client), ts("t")).unwrap());
    }
    assert_eq!(seen.len(), 8, "one free-list cycle touches every slot once");
}

#[test]
fn deltas_are_conserved_across_epochs() {
    let ledger = small_ledger(5);
    let mut expected: HashMap<ClientId, u64> = HashMap::new();
    let mut reported: HashMap<ClientId, u64> = HashMap::new();
    let mut marker = 0u64;

    for epoch in 0..4u64 {
        for client in 1..=6u64 {
            let client = ClientId(client);
            for _ in 0..(client.0 + epoch) {
                marker += 1;
                let at = ts(&format!("m{marker}"));
                let p = ledger.assign(client, at.clone()).unwrap();
                assert!(ledger.settle(&p, &at));
                *expected.entry(client).or_insert(0) += 1;
            }
        }
        for row in ledger.harvest() {
            *reported.entry(row.client).or_insert(0) += row.delta;
        }
    }

    assert_eq!(reported, expected);
    assert_eq!(ledger.active_records(), 0);
}
