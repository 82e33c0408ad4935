//! Cross-node blind aggregation.
//!
//! The aggregator is trusted to learn which client a row belongs to but
//! never the count inside it: identities are opened with its private key,
//! counts stay Paillier ciphertexts and are merged with the homomorphic
//! add. Multiple reporting nodes submit concurrently, so the accumulator
//! is a sharded map keyed by identity.

use crate::billing::BillingService;
use crate::errors::CryptoError;
use crate::identity::IdentityOpener;
use crate::paillier::PaillierPublicKey;
use crate::types::{ClientId, EncCount, ReportRow, TotalRow};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use num_bigint::BigUint;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct AggregationService {
    opener: Arc<dyn IdentityOpener>,
    count_key: PaillierPublicKey,
    accumulator: DashMap<ClientId, BigUint>,
}

impl AggregationService {
    pub fn new(opener: Arc<dyn IdentityOpener>, count_key: PaillierPublicKey) -> Self {
        Self {
            opener,
            count_key,
            accumulator: DashMap::new(),
        }
    }

    /// Merge one batch from a reporting node. A row that fails to open or
    /// parse is dropped with a warning; the other rows and other nodes are
    /// unaffected.
    pub fn receive_batch(&self, rows: &[ReportRow]) {
        for row in rows {
            if let Err(err) = self.merge_row(row) {
                warn!(%err, "dropping aggregation row");
            }
        }
    }

    /// Identities with a pending (unflushed) running total.
    pub fn pending_identities(&self) -> usize {
        self.accumulator.len()
    }

    /// Forward every running total to the biller and retire it. Entries
    /// merged concurrently during the flush survive into the next cycle;
    /// nothing is billed twice.
    pub fn flush(&self, biller: &BillingService) -> usize {
        let clients: Vec<ClientId> = self.accumulator.iter().map(|e| *e.key()).collect();
        let mut rows = Vec::with_capacity(clients.len());
        for client in clients {
            if let Some((client, total)) = self.accumulator.remove(&client) {
                rows.push(TotalRow {
                    client,
                    total: EncCount(total.to_string()),
                });
            }
        }
        debug!(rows = rows.len(), "flushing running totals to biller");
        biller.receive_totals(&rows);
        rows.len()
    }

    fn merge_row(&self, row: &ReportRow) -> Result<(), CryptoError> {
        let opened = self.opener.open(&row.identity)?;
        let text = std::str::from_utf8(&opened)
            .map_err(|_| CryptoError::MalformedCiphertext("identity is not utf-8"))?;
        let client = ClientId(
            text.parse()
                .map_err(|_| CryptoError::MalformedCiphertext("identity is not an integer"))?,
        );
        let incoming = BigUint::parse_bytes(row.count.0.as_bytes(), 10)
            .ok_or(CryptoError::MalformedCiphertext("count is not decimal"))?;

        match self.accumulator.entry(client) {
            Entry::Occupied(mut entry) => {
                let merged = self.count_key.add(entry.get(), &incoming)?;
                entry.insert(merged);
            }
            Entry::Vacant(entry) => {
                self.count_key.check_ciphertext(&incoming)?;
                entry.insert(incoming);
            }
        }
        Ok(())
    }
}
