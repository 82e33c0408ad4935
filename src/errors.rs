use thiserror::Error;

/// Failures inside the cryptographic layers. Each one fails only the single
/// operation that raised it; callers in the service loops log and move on to
/// the next row.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("plaintext out of range: must be less than the public modulus")]
    InvalidPlaintext,
    #[error("ciphertext out of range: must be less than the working modulus")]
    InvalidCiphertext,
    #[error("key generation produced a non-invertible lambda after {attempts} attempts")]
    KeyGenRetry { attempts: usize },
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(&'static str),
    #[error("malformed key material: missing `{field}` field")]
    MalformedKey { field: &'static str },
}

/// Failures raised by the pseudonym ledger. A missed settle is not an error;
/// it returns `false` and is logged at the call site.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("all {capacity} pseudonym slots are allocated and reuse is disabled")]
    CapacityExhausted { capacity: usize },
}
