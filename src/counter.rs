//! Reconciliation driver for one reporting node.
//!
//! Each cycle harvests the node's ledger and double-encrypts the resulting
//! deltas: identity under the aggregator's sealer, count under the biller's
//! Paillier key. The ledger lock is released before any encryption starts,
//! so the expensive modular exponentiation never blocks clients.

use crate::identity::IdentitySealer;
use crate::ledger::PseudonymLedger;
use crate::paillier::PaillierPublicKey;
use crate::types::{EncCount, ReportRow};
use num_bigint::BigUint;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct UsageCounter {
    ledger: Arc<PseudonymLedger>,
    sealer: Arc<dyn IdentitySealer>,
    count_key: PaillierPublicKey,
}

impl UsageCounter {
    pub fn new(
        ledger: Arc<PseudonymLedger>,
        sealer: Arc<dyn IdentitySealer>,
        count_key: PaillierPublicKey,
    ) -> Self {
        Self {
            ledger,
            sealer,
            count_key,
        }
    }

    pub fn ledger(&self) -> &PseudonymLedger {
        &self.ledger
    }

    /// One reconciliation cycle. An empty harvest yields an empty batch; a
    /// row that fails to encrypt is dropped with a warning so the rest of
    /// the batch still goes out. Pairing within a row is what matters, not
    /// batch order.
    pub fn reconcile(&self) -> Vec<ReportRow> {
        let harvested = self.ledger.harvest();
        let mut batch = Vec::with_capacity(harvested.len());
        for row in harvested {
            let identity = match self.sealer.seal(row.client.to_string().as_bytes()) {
                Ok(sealed) => sealed,
                Err(err) => {
                    warn!(%err, "identity seal failed, dropping row");
                    continue;
                }
            };
            let count = match self.count_key.encrypt(&BigUint::from(row.delta)) {
                Ok(c) => EncCount(c.to_string()),
                Err(err) => {
                    warn!(%err, "count encryption failed, dropping row");
                    continue;
                }
            };
            batch.push(ReportRow { identity, count });
        }
        debug!(rows = batch.len(), "reconciliation batch ready");
        batch
    }
}
