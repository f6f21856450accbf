use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("{func}: invalid curve point")]
    InvalidPoint { func: &'static str },

    #[error("{func}: invalid {role} length {actual}, expected {expected}")]
    KeyLength {
        func: &'static str,
        role: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Hash-to-curve failed: {0}")]
    MapToCurve(String),

    #[error("Point serialisation failed: {0}")]
    Serialisation(String),

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("tag mismatch")]
    TagMismatch,

    #[error("Entropy source unavailable: {0}")]
    Entropy(String),
}
