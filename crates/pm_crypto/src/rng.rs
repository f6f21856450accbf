//! CSPRNG ownership.
//!
//! One `Csprng` per client. Creation is lazy: the first operation that
//! needs randomness pulls a 32-byte seed from the OS entropy source and
//! expands it with ChaCha20. Tests construct with a fixed seed instead.

use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::error::CryptoError;

pub const SEED_LEN: usize = 32;

/// Read a fresh seed from the platform entropy source.
pub fn random_seed() -> Result<[u8; SEED_LEN], CryptoError> {
    let mut seed = [0u8; SEED_LEN];
    OsRng
        .try_fill_bytes(&mut seed)
        .map_err(|e| CryptoError::Entropy(e.to_string()))?;
    Ok(seed)
}

pub struct Csprng {
    inner: Option<ChaCha20Rng>,
}

impl Csprng {
    pub fn new() -> Self {
        Self { inner: None }
    }

    /// Deterministic generator for tests and vector generation.
    pub fn with_seed(seed: [u8; SEED_LEN]) -> Self {
        Self {
            inner: Some(ChaCha20Rng::from_seed(seed)),
        }
    }

    pub(crate) fn get(&mut self) -> Result<&mut ChaCha20Rng, CryptoError> {
        match self.inner {
            Some(ref mut rng) => Ok(rng),
            None => {
                let seed = random_seed()?;
                Ok(self.inner.insert(ChaCha20Rng::from_seed(seed)))
            }
        }
    }
}

impl Default for Csprng {
    fn default() -> Self {
        Self::new()
    }
}
