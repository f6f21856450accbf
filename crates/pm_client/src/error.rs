//! Client error taxonomy.
//!
//! C-layer errors (curve, envelope) arrive pre-structured from the lower
//! crates; this enum adds the transport and broker shapes. The session
//! layer stringifies whatever it catches into `on_error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure before any HTTP status was received.
    #[error("Network error reaching {url}: {cause}")]
    Network { url: String, cause: String },

    /// Non-2xx HTTP response. The body is preserved; the renewal path
    /// inspects it on 409.
    #[error("HTTP {status} from {method} {url}: {body}")]
    Http {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    /// Malformed JSON, schema violation, or bad wire hex.
    #[error("JSON error: {0}")]
    Json(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("HTTP client init failed: {0}")]
    Init(String),

    #[error(transparent)]
    Crypto(#[from] pm_crypto::CryptoError),

    #[error(transparent)]
    Proto(#[from] pm_proto::ProtoError),
}
