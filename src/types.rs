use serde::{Deserialize, Serialize};
use std::fmt;

/// Long-term client identity. Only the reporting node and the cross-node
/// aggregator ever see it in the clear.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Rotating identifier standing in for a client at one reporting node.
/// Fixed-width numeric string, unique within a ledger.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pseudonym(pub String);

impl fmt::Display for Pseudonym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Wall-clock marker attached to each outstanding request. The ledger
/// compares markers for equality only and never parses them.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub String);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(
            chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S%.3f")
                .to_string(),
        )
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One reconciled row out of a harvest pass: tasks completed since the last
/// pass, summed across every slot the client occupied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDelta {
    pub client: ClientId,
    pub delta: u64,
}

/// Identity ciphertext under the aggregator's key. Opaque text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncIdentity(pub String);

/// Paillier ciphertext carried on the wire as decimal digits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncCount(pub String);

/// Reporting-node → aggregator wire row. The identity is hidden from the
/// wire and the count is hidden from the aggregator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    pub identity: EncIdentity,
    pub count: EncCount,
}

/// Aggregator → biller wire row: cleartext identity, still-encrypted total.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalRow {
    pub client: ClientId,
    pub total: EncCount,
}

/// One settled charge. Totals and charges travel as decimal strings so the
/// row serializes without a bignum serde dependency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRow {
    pub client: ClientId,
    pub total: String,
    pub charge: String,
}
