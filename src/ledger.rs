//! Rotating pseudonym ledger.
//!
//! Each reporting node runs one ledger: a fixed array of slots, each slot
//! carrying a pseudonym fixed at construction plus the activity records of
//! the clients currently parked on it. A client sticks to one pseudonym
//! until a harvest pass finds it fully settled and removes the record; the
//! next assign may then land it on a different slot, which is the rotation
//! mechanism.
//!
//! `assign`, `settle` and `harvest` all mutate the slot table and run under
//! a single mutex. Callers are expected to do any encryption work outside
//! that critical section.

use crate::errors::LedgerError;
use crate::types::{ClientId, Pseudonym, Timestamp, UsageDelta};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// How a fresh record picks its slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotPolicy {
    /// Monotonic cursor modulo capacity.
    RoundRobin,
    /// Shuffled free list of slot indices, reshuffled whenever it runs dry.
    ShuffledFreeList,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub capacity: usize,
    pub pseudonym_digits: usize,
    pub policy: SlotPolicy,
    /// With reuse disabled, draining the free list fails further allocations
    /// instead of cycling through the slots again.
    pub reuse_slots: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            pseudonym_digits: 12,
            policy: SlotPolicy::RoundRobin,
            reuse_slots: true,
        }
    }
}

#[derive(Clone, Debug)]
struct ActivityRecord {
    client: ClientId,
    /// Tasks assigned since the last harvest. Always >= pending.len();
    /// the difference is completed-but-unharvested work.
    issued: u64,
    /// Outstanding request markers, newest first.
    pending: Vec<Timestamp>,
}

#[derive(Clone, Debug)]
struct Slot {
    pseudonym: Pseudonym,
    records: Vec<ActivityRecord>,
}

struct LedgerState {
    slots: Vec<Slot>,
    /// Slot indices still unused in the current allocation cycle.
    free: Vec<usize>,
}

pub struct PseudonymLedger {
    cfg: LedgerConfig,
    state: Mutex<LedgerState>,
}

impl PseudonymLedger {
    pub fn new(cfg: LedgerConfig) -> Self {
        let mut rng = rand::thread_rng();
        let mut taken = HashSet::with_capacity(cfg.capacity);
        let slots = (0..cfg.capacity)
            .map(|_| {
                let pseudonym = sample_pseudonym(&mut rng, cfg.pseudonym_digits, &taken);
                taken.insert(pseudonym.clone());
                Slot {
                    pseudonym: Pseudonym(pseudonym),
                    records: Vec::new(),
                }
            })
            .collect();
        let free = refill_free_list(&cfg, &mut rng);
        Self {
            cfg,
            state: Mutex::new(LedgerState { slots, free }),
        }
    }

    /// Record one task for `client`. Sticky: while the client has an active
    /// record anywhere in the ledger, its existing pseudonym is returned.
    pub fn assign(&self, client: ClientId, at: Timestamp) -> Result<Pseudonym, LedgerError> {
        let mut state = self.state.lock();

        for slot in &mut state.slots {
            if let Some(rec) = slot.records.iter_mut().find(|r| r.client == client) {
                rec.pending.insert(0, at);
                rec.issued += 1;
                return Ok(slot.pseudonym.clone());
            }
        }

        let idx = self.next_slot(&mut state)?;
        let slot = &mut state.slots[idx];
        slot.records.push(ActivityRecord {
            client,
            issued: 1,
            pending: vec![at],
        });
        Ok(slot.pseudonym.clone())
    }

    /// Mark one outstanding request as completed. Removes exactly the one
    /// pending marker matching `at` in the slot owning `pseudonym`; a miss
    /// is non-fatal and reported as `false`.
    pub fn settle(&self, pseudonym: &Pseudonym, at: &Timestamp) -> bool {
        let mut state = self.state.lock();
        let Some(slot) = state
            .slots
            .iter_mut()
            .find(|s| &s.pseudonym == pseudonym)
        else {
            tracing::debug!(%pseudonym, "settle against unknown pseudonym");
            return false;
        };
        for rec in &mut slot.records {
            if let Some(pos) = rec.pending.iter().position(|t| t == at) {
                rec.pending.remove(pos);
                return true;
            }
        }
        tracing::debug!(%pseudonym, marker = %at, "settle marker not found");
        false
    }

    /// Reconcile completed work into per-client deltas. Fully settled
    /// records are removed (their slot becomes reusable for a different
    /// client); the rest restart the epoch with `issued = pending.len()` so
    /// the next pass only counts new work. Deltas for a client are summed
    /// across slots and emitted once.
    pub fn harvest(&self) -> Vec<UsageDelta> {
        let mut state = self.state.lock();
        let mut deltas: BTreeMap<ClientId, u64> = BTreeMap::new();
        for slot in &mut state.slots {
            slot.records.retain_mut(|rec| {
                let pending = rec.pending.len() as u64;
                *deltas.entry(rec.client).or_insert(0) += rec.issued - pending;
                if rec.pending.is_empty() {
                    false
                } else {
                    rec.issued = pending;
                    true
                }
            });
        }
        deltas
            .into_iter()
            .map(|(client, delta)| UsageDelta { client, delta })
            .collect()
    }

    /// All slot pseudonyms, in slot order. Fixed at construction.
    pub fn pseudonyms(&self) -> Vec<Pseudonym> {
        self.state
            .lock()
            .slots
            .iter()
            .map(|s| s.pseudonym.clone())
            .collect()
    }

    /// Number of live activity records across all slots.
    pub fn active_records(&self) -> usize {
        self.state.lock().slots.iter().map(|s| s.records.len()).sum()
    }

    fn next_slot(&self, state: &mut LedgerState) -> Result<usize, LedgerError> {
        if state.free.is_empty() {
            if !self.cfg.reuse_slots {
                return Err(LedgerError::CapacityExhausted {
                    capacity: self.cfg.capacity,
                });
            }
            state.free = refill_free_list(&self.cfg, &mut rand::thread_rng());
        }
        state.free.pop().ok_or(LedgerError::CapacityExhausted {
            capacity: self.cfg.capacity,
        })
    }
}

/// Reversed so that popping from the back yields 0, 1, 2, … for the
/// round-robin policy; the shuffled policy just permutes it.
fn refill_free_list(cfg: &LedgerConfig, rng: &mut impl Rng) -> Vec<usize> {
    let mut free: Vec<usize> = (0..cfg.capacity).rev().collect();
    if cfg.policy == SlotPolicy::ShuffledFreeList {
        free.shuffle(rng);
    }
    free
}

/// Rejection sampling against the set of pseudonyms already issued. First
/// digit is non-zero so every pseudonym keeps its full width.
fn sample_pseudonym(rng: &mut impl Rng, digits: usize, taken: &HashSet<String>) -> String {
    loop {
        let mut s = String::with_capacity(digits);
        s.push(char::from(b'1' + rng.gen_range(0..9)));
        for _ in 1..digits {
            s.push(char::from(b'0' + rng.gen_range(0..10)));
        }
        if !taken.contains(&s) {
            return s;
        }
    }
}
