//! Additively homomorphic counter encryption (Paillier).
//!
//! The biller holds the key pair; reporting nodes encrypt per-client deltas
//! under the public half, and the cross-node aggregator combines ciphertexts
//! with [`PaillierPublicKey::add`] without ever decrypting them. Plaintexts
//! live in `[0, n)` and ciphertexts in `[0, n²)`.

use crate::errors::CryptoError;
use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_prime::nt_funcs::is_prime;
use num_traits::{One, Zero};

/// Key generation resamples the prime pair when `lambda` turns out to be
/// non-invertible mod `n`. A handful of draws is plenty; hitting the limit
/// means the caller's bit length is unusable.
const KEYGEN_ATTEMPTS: usize = 8;

/// Public half: enough to encrypt and to combine ciphertexts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaillierPublicKey {
    pub(crate) n: BigUint,
    pub(crate) g: BigUint,
    pub(crate) nsquare: BigUint,
}

/// Full key pair. `lambda = lcm(p-1, q-1)` and `lmd_inv = lambda⁻¹ mod n`
/// stay private to the biller.
#[derive(Clone, Debug)]
pub struct PaillierKeyPair {
    pub(crate) public: PaillierPublicKey,
    pub(crate) lambda: BigUint,
    pub(crate) lmd_inv: BigUint,
}

impl PaillierPublicKey {
    pub fn modulus(&self) -> &BigUint {
        &self.n
    }

    pub fn working_modulus(&self) -> &BigUint {
        &self.nsquare
    }

    /// Range check shared by every ciphertext-consuming operation.
    pub fn check_ciphertext(&self, c: &BigUint) -> Result<(), CryptoError> {
        if c >= &self.nsquare {
            return Err(CryptoError::InvalidCiphertext);
        }
        Ok(())
    }

    /// `c = g^m · r^n mod n²` with a fresh `r` per call, so encrypting the
    /// same plaintext twice yields different ciphertexts.
    pub fn encrypt(&self, m: &BigUint) -> Result<BigUint, CryptoError> {
        if m >= &self.n {
            return Err(CryptoError::InvalidPlaintext);
        }
        let mut rng = rand::thread_rng();
        let r = rng.gen_biguint_range(&BigUint::one(), &self.n);
        let c = (self.g.modpow(m, &self.nsquare) * r.modpow(&self.n, &self.nsquare))
            % &self.nsquare;
        Ok(c)
    }

    /// Homomorphic add: the product of ciphertexts decrypts to
    /// `(m1 + m2) mod n`.
    pub fn add(&self, c1: &BigUint, c2: &BigUint) -> Result<BigUint, CryptoError> {
        self.check_ciphertext(c1)?;
        self.check_ciphertext(c2)?;
        Ok((c1 * c2) % &self.nsquare)
    }

    /// Homomorphic scalar multiply: `c^k` decrypts to `(k · m) mod n`.
    pub fn scalar_mul(&self, c: &BigUint, k: &BigUint) -> Result<BigUint, CryptoError> {
        self.check_ciphertext(c)?;
        if k >= &self.n {
            return Err(CryptoError::InvalidPlaintext);
        }
        Ok(c.modpow(k, &self.nsquare))
    }
}

impl PaillierKeyPair {
    /// Sample two primes of roughly `bits/2` each (next-prime search after a
    /// random draw, probabilistic primality only) and derive the key. Uses
    /// the canonical `lcm(p-1, q-1)` for lambda rather than the plain
    /// product, which keeps it invertible mod `n` for almost every draw.
    pub fn generate(bits: u64) -> Result<Self, CryptoError> {
        let half = (bits / 2).max(16);
        for _ in 0..KEYGEN_ATTEMPTS {
            let p = random_prime(half);
            let mut q = random_prime(half);
            while q == p {
                q = random_prime(half);
            }

            let n = &p * &q;
            let g = &n + BigUint::one();
            let nsquare = &n * &n;
            let lambda = (&p - 1u32).lcm(&(&q - 1u32));
            let Some(lmd_inv) = lambda.modinv(&n) else {
                continue;
            };

            return Ok(Self {
                public: PaillierPublicKey { n, g, nsquare },
                lambda,
                lmd_inv,
            });
        }
        Err(CryptoError::KeyGenRetry {
            attempts: KEYGEN_ATTEMPTS,
        })
    }

    pub fn public(&self) -> &PaillierPublicKey {
        &self.public
    }

    /// `m = L(c^λ mod n²) · λ⁻¹ mod n` with `L(u) = (u − 1) / n` (floor
    /// division).
    pub fn decrypt(&self, c: &BigUint) -> Result<BigUint, CryptoError> {
        let pk = &self.public;
        pk.check_ciphertext(c)?;
        let u = c.modpow(&self.lambda, &pk.nsquare);
        // Multiples of n (0 included) pass the range check but are not in
        // the ciphertext group: c^λ collapses to 0 and L(u) has no preimage.
        if u.is_zero() {
            return Err(CryptoError::InvalidCiphertext);
        }
        let m = ((u - BigUint::one()) / &pk.n * &self.lmd_inv) % &pk.n;
        Ok(m)
    }
}

/// Random draw of `bits` bits with the top bit forced, then walk odd numbers
/// until the primality test passes.
pub(crate) fn random_prime(bits: u64) -> BigUint {
    let mut rng = rand::thread_rng();
    let mut candidate = rng.gen_biguint(bits);
    candidate |= BigUint::one() << (bits - 1);
    candidate |= BigUint::one();
    while !is_prime(&candidate, None).probably() {
        candidate += 2u32;
    }
    candidate
}
