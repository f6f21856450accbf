use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid identity: {0}")]
    Identity(String),

    #[error("Invalid envelope: {0}")]
    Envelope(String),

    #[error(transparent)]
    Crypto(#[from] pm_crypto::CryptoError),
}
