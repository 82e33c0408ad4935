//! Identity-hiding primitive.
//!
//! The metering core treats this as a black box: the reporting node seals a
//! client identity under the aggregator's public key, the aggregator opens
//! it with the private key. The concrete scheme here is textbook ElGamal
//! over a multiplicative group mod a prime; nothing in the pipeline depends
//! on that choice, which is why the services only see the traits.

use crate::errors::CryptoError;
use crate::paillier::random_prime;
use crate::types::EncIdentity;
use num_bigint::{BigUint, RandBigInt};
use num_traits::One;

pub trait IdentitySealer: Send + Sync {
    fn seal(&self, plaintext: &[u8]) -> Result<EncIdentity, CryptoError>;
}

pub trait IdentityOpener: Send + Sync {
    fn open(&self, ciphertext: &EncIdentity) -> Result<Vec<u8>, CryptoError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElGamalPublicKey {
    pub(crate) p: BigUint,
    pub(crate) g: BigUint,
    pub(crate) h: BigUint,
}

#[derive(Clone, Debug)]
pub struct ElGamalKeyPair {
    pub(crate) public: ElGamalPublicKey,
    pub(crate) x: BigUint,
}

impl ElGamalKeyPair {
    pub fn generate(bits: u64) -> Self {
        let mut rng = rand::thread_rng();
        let p = random_prime(bits.max(32));
        let two = BigUint::from(2u32);
        let g = rng.gen_biguint_range(&two, &p);
        let x = rng.gen_biguint_range(&BigUint::one(), &(&p - 1u32));
        let h = g.modpow(&x, &p);
        Self {
            public: ElGamalPublicKey { p, g, h },
            x,
        }
    }

    pub fn public(&self) -> &ElGamalPublicKey {
        &self.public
    }
}

impl IdentitySealer for ElGamalPublicKey {
    fn seal(&self, plaintext: &[u8]) -> Result<EncIdentity, CryptoError> {
        let m = BigUint::from_bytes_be(plaintext);
        if m >= self.p {
            return Err(CryptoError::InvalidPlaintext);
        }
        let mut rng = rand::thread_rng();
        let r = rng.gen_biguint_range(&BigUint::one(), &(&self.p - 1u32));
        let c1 = self.g.modpow(&r, &self.p);
        let c2 = (m * self.h.modpow(&r, &self.p)) % &self.p;
        Ok(EncIdentity(format!("{c1}:{c2}")))
    }
}

impl IdentityOpener for ElGamalKeyPair {
    fn open(&self, ciphertext: &EncIdentity) -> Result<Vec<u8>, CryptoError> {
        let p = &self.public.p;
        let (c1, c2) = ciphertext
            .0
            .split_once(':')
            .ok_or(CryptoError::MalformedCiphertext("missing `:` separator"))?;
        let c1 = parse_decimal(c1)?;
        let c2 = parse_decimal(c2)?;
        if &c1 >= p || &c2 >= p {
            return Err(CryptoError::InvalidCiphertext);
        }
        let shared = c1.modpow(&self.x, p);
        let inv = shared
            .modinv(p)
            .ok_or(CryptoError::MalformedCiphertext("shared secret not invertible"))?;
        let m = (c2 * inv) % p;
        Ok(m.to_bytes_be())
    }
}

fn parse_decimal(digits: &str) -> Result<BigUint, CryptoError> {
    BigUint::parse_bytes(digits.as_bytes(), 10)
        .ok_or(CryptoError::MalformedCiphertext("component is not decimal"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let kp = ElGamalKeyPair::generate(128);
        let sealed = kp.public().seal(b"4711").unwrap();
        assert_eq!(kp.open(&sealed).unwrap(), b"4711");
    }

    #[test]
    fn sealed_identities_are_fresh() {
        let kp = ElGamalKeyPair::generate(128);
        let a = kp.public().seal(b"7").unwrap();
        let b = kp.public().seal(b"7").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_ciphertext_is_rejected() {
        let kp = ElGamalKeyPair::generate(128);
        assert!(kp.open(&EncIdentity("no-separator".into())).is_err());
        assert!(kp.open(&EncIdentity("12:beef".into())).is_err());
    }
}
