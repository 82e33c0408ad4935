//! Textual key persistence.
//!
//! One `field: decimal-digits` line per parameter, loaded by matching the
//! line prefix so extra lines and ordering don't matter. Paillier key pairs
//! carry `n`, `g`, `lambda`, `lmdInv` and optionally `nsquare` (derived
//! when absent); public-only files carry `n` and `g`. The ElGamal identity
//! keys use the same format family with `p`, `g`, `h` and private `x`.

use crate::errors::CryptoError;
use crate::identity::{ElGamalKeyPair, ElGamalPublicKey};
use crate::paillier::{PaillierKeyPair, PaillierPublicKey};
use anyhow::Context;
use num_bigint::BigUint;
use std::fs;
use std::path::Path;

pub fn paillier_keypair_to_text(kp: &PaillierKeyPair) -> String {
    format!(
        "n: {}\ng: {}\nlambda: {}\nlmdInv: {}\nnsquare: {}\n",
        kp.public.n, kp.public.g, kp.lambda, kp.lmd_inv, kp.public.nsquare
    )
}

pub fn paillier_public_to_text(pk: &PaillierPublicKey) -> String {
    format!("n: {}\ng: {}\nnsquare: {}\n", pk.n, pk.g, pk.nsquare)
}

pub fn paillier_keypair_from_text(text: &str) -> Result<PaillierKeyPair, CryptoError> {
    let n = field(text, "n")?;
    let g = field(text, "g")?;
    let lambda = field(text, "lambda")?;
    let lmd_inv = field(text, "lmdInv")?;
    let nsquare = optional_field(text, "nsquare")?.unwrap_or_else(|| &n * &n);
    Ok(PaillierKeyPair {
        public: PaillierPublicKey { n, g, nsquare },
        lambda,
        lmd_inv,
    })
}

pub fn paillier_public_from_text(text: &str) -> Result<PaillierPublicKey, CryptoError> {
    let n = field(text, "n")?;
    let g = field(text, "g")?;
    let nsquare = optional_field(text, "nsquare")?.unwrap_or_else(|| &n * &n);
    Ok(PaillierPublicKey { n, g, nsquare })
}

pub fn elgamal_keypair_to_text(kp: &ElGamalKeyPair) -> String {
    format!(
        "p: {}\ng: {}\nh: {}\nx: {}\n",
        kp.public.p, kp.public.g, kp.public.h, kp.x
    )
}

pub fn elgamal_public_to_text(pk: &ElGamalPublicKey) -> String {
    format!("p: {}\ng: {}\nh: {}\n", pk.p, pk.g, pk.h)
}

pub fn elgamal_keypair_from_text(text: &str) -> Result<ElGamalKeyPair, CryptoError> {
    Ok(ElGamalKeyPair {
        public: elgamal_public_from_text(text)?,
        x: field(text, "x")?,
    })
}

pub fn elgamal_public_from_text(text: &str) -> Result<ElGamalPublicKey, CryptoError> {
    Ok(ElGamalPublicKey {
        p: field(text, "p")?,
        g: field(text, "g")?,
        h: field(text, "h")?,
    })
}

pub fn save_paillier_keypair(path: impl AsRef<Path>, kp: &PaillierKeyPair) -> anyhow::Result<()> {
    write_key_file(path.as_ref(), &paillier_keypair_to_text(kp))
}

pub fn save_paillier_public(path: impl AsRef<Path>, pk: &PaillierPublicKey) -> anyhow::Result<()> {
    write_key_file(path.as_ref(), &paillier_public_to_text(pk))
}

pub fn load_paillier_keypair(path: impl AsRef<Path>) -> anyhow::Result<PaillierKeyPair> {
    let text = read_key_file(path.as_ref())?;
    paillier_keypair_from_text(&text)
        .with_context(|| format!("parsing {}", path.as_ref().display()))
}

pub fn load_paillier_public(path: impl AsRef<Path>) -> anyhow::Result<PaillierPublicKey> {
    let text = read_key_file(path.as_ref())?;
    paillier_public_from_text(&text)
        .with_context(|| format!("parsing {}", path.as_ref().display()))
}

pub fn save_elgamal_keypair(path: impl AsRef<Path>, kp: &ElGamalKeyPair) -> anyhow::Result<()> {
    write_key_file(path.as_ref(), &elgamal_keypair_to_text(kp))
}

pub fn save_elgamal_public(path: impl AsRef<Path>, pk: &ElGamalPublicKey) -> anyhow::Result<()> {
    write_key_file(path.as_ref(), &elgamal_public_to_text(pk))
}

pub fn load_elgamal_keypair(path: impl AsRef<Path>) -> anyhow::Result<ElGamalKeyPair> {
    let text = read_key_file(path.as_ref())?;
    elgamal_keypair_from_text(&text)
        .with_context(|| format!("parsing {}", path.as_ref().display()))
}

pub fn load_elgamal_public(path: impl AsRef<Path>) -> anyhow::Result<ElGamalPublicKey> {
    let text = read_key_file(path.as_ref())?;
    elgamal_public_from_text(&text)
        .with_context(|| format!("parsing {}", path.as_ref().display()))
}

fn write_key_file(path: &Path, text: &str) -> anyhow::Result<()> {
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

fn read_key_file(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn field(text: &str, name: &'static str) -> Result<BigUint, CryptoError> {
    optional_field(text, name)?.ok_or(CryptoError::MalformedKey { field: name })
}

fn optional_field(text: &str, name: &'static str) -> Result<Option<BigUint>, CryptoError> {
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix(name) {
            if let Some(digits) = rest.strip_prefix(": ") {
                return BigUint::parse_bytes(digits.trim().as_bytes(), 10)
                    .map(Some)
                    .ok_or(CryptoError::MalformedKey { field: name });
            }
        }
    }
    Ok(None)
}
