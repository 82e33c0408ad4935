//! Privacy-preserving usage metering for fog computing.
//!
//! Clients hand tasks to a local reporting node, which tracks them under
//! *rotating pseudonyms* so it never needs a long-term link between client
//! and workload. Completed work is periodically reconciled into per-client
//! deltas and double-encrypted: the identity under the cross-node
//! aggregator's key, the count under the biller's additively homomorphic
//! key. The aggregator merges counts per identity without ever seeing a
//! plaintext count; the biller decrypts only final totals and computes
//! charges.

pub mod aggregate;
pub mod billing;
pub mod counter;
pub mod errors;
pub mod identity;
pub mod keys;
pub mod ledger;
pub mod paillier;
pub mod types;

pub use crate::aggregate::AggregationService;
pub use crate::billing::BillingService;
pub use crate::counter::UsageCounter;
pub use crate::ledger::{LedgerConfig, PseudonymLedger, SlotPolicy};
pub use crate::paillier::{PaillierKeyPair, PaillierPublicKey};
