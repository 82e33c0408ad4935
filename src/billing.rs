//! Final decrypt and charge computation.
//!
//! The biller holds the Paillier private key. Each flush delivers one
//! still-encrypted total per identity; decrypting it gives the increment
//! for that cycle, which is added (plain integer addition) into a running
//! total so the service survives many flush cycles.

use crate::errors::CryptoError;
use crate::paillier::PaillierKeyPair;
use crate::types::{ChargeRow, ClientId, TotalRow};
use num_bigint::BigUint;
use num_traits::Zero;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::warn;

pub struct BillingService {
    key: PaillierKeyPair,
    totals: Mutex<BTreeMap<ClientId, BigUint>>,
}

impl BillingService {
    pub fn new(key: PaillierKeyPair) -> Self {
        Self {
            key,
            totals: Mutex::new(BTreeMap::new()),
        }
    }

    /// Apply one flush cycle. A row that fails to parse or decrypt is
    /// dropped with a warning and does not disturb the other identities.
    pub fn receive_totals(&self, rows: &[TotalRow]) {
        for row in rows {
            if let Err(err) = self.apply_row(row) {
                warn!(client = %row.client, %err, "dropping billing row");
            }
        }
    }

    /// Snapshot of the running per-identity totals.
    pub fn totals(&self) -> BTreeMap<ClientId, BigUint> {
        self.totals.lock().clone()
    }

    /// `charge = total × price_per_unit` in arbitrary precision.
    pub fn settle(&self, price_per_unit: u64) -> Vec<ChargeRow> {
        let price = BigUint::from(price_per_unit);
        self.totals
            .lock()
            .iter()
            .map(|(client, total)| ChargeRow {
                client: *client,
                total: total.to_string(),
                charge: (total * &price).to_string(),
            })
            .collect()
    }

    fn apply_row(&self, row: &TotalRow) -> Result<(), CryptoError> {
        let ciphertext = BigUint::parse_bytes(row.total.0.as_bytes(), 10)
            .ok_or(CryptoError::MalformedCiphertext("total is not decimal"))?;
        let increment = self.key.decrypt(&ciphertext)?;
        let mut totals = self.totals.lock();
        *totals.entry(row.client).or_insert_with(BigUint::zero) += increment;
        Ok(())
    }
}
