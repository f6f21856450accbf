//! Long-term device identity.
//!
//! `mpin_id` is an opaque blob as far as the auth protocol is concerned,
//! but it must parse as a JSON document with a string `userID` member:
//! that is the stable user identifier, the MQTT client ID, and the
//! public half of the SOK scheme.
//!
//! The JSON file format matches the provisioning tools:
//!
//! ```json
//! {
//!   "mpin_id": "7b22...",
//!   "client_secret": "0402...",
//!   "dta": ["dta1", "dta2"],
//!   "sokSendKey": "04...",
//!   "sokRecvKey": "..."
//! }
//! ```
//!
//! All binary members are lowercase hex. The SOK keys are optional;
//! without them private messages fall back to (or are rejected for)
//! plaintext envelopes.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use pm_crypto::{G1S, G2S};

use crate::error::ProtoError;
use crate::hexutil;

/// Parsed identity, binary fields decoded. Secret material is wiped on
/// drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Identity {
    pub mpin_id: Vec<u8>,
    pub client_secret: Vec<u8>,
    #[zeroize(skip)]
    pub dta_list: Vec<String>,
    pub sok_send_key: Option<Vec<u8>>,
    pub sok_recv_key: Option<Vec<u8>>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("mpin_id", &"<redacted>")
            .field("client_secret", &"<redacted>")
            .field("dta_list", &self.dta_list)
            .field("sok_send_key", &self.sok_send_key.as_ref().map(|_| "<redacted>"))
            .field("sok_recv_key", &self.sok_recv_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// On-disk / on-wire JSON shape.
#[derive(Debug, Serialize, Deserialize)]
struct IdentityFile {
    mpin_id: String,
    client_secret: String,
    dta: Vec<String>,
    #[serde(rename = "sokSendKey", skip_serializing_if = "Option::is_none")]
    sok_send_key: Option<String>,
    #[serde(rename = "sokRecvKey", skip_serializing_if = "Option::is_none")]
    sok_recv_key: Option<String>,
}

impl Identity {
    pub fn new(mpin_id: Vec<u8>, client_secret: Vec<u8>, dta_list: Vec<String>) -> Self {
        Self {
            mpin_id,
            client_secret,
            dta_list,
            sok_send_key: None,
            sok_recv_key: None,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtoError> {
        let file: IdentityFile = serde_json::from_str(raw)?;
        // hexutil::decode yields an empty buffer on malformed input, and
        // none of these fields may legitimately be empty
        let decode_required = |field: &'static str, value: &str| -> Result<Vec<u8>, ProtoError> {
            let bytes = hexutil::decode(value);
            if bytes.is_empty() {
                return Err(ProtoError::Identity(format!("invalid hex in {field}")));
            }
            Ok(bytes)
        };
        let decode_opt =
            |field: &'static str, value: &Option<String>| -> Result<Option<Vec<u8>>, ProtoError> {
                match value.as_deref() {
                    Some(hex_str) if !hex_str.is_empty() => {
                        Ok(Some(decode_required(field, hex_str)?))
                    }
                    _ => Ok(None),
                }
            };
        Ok(Self {
            mpin_id: decode_required("mpin_id", &file.mpin_id)?,
            client_secret: decode_required("client_secret", &file.client_secret)?,
            dta_list: file.dta,
            sok_send_key: decode_opt("sokSendKey", &file.sok_send_key)?,
            sok_recv_key: decode_opt("sokRecvKey", &file.sok_recv_key)?,
        })
    }

    pub fn to_json(&self) -> Result<String, ProtoError> {
        let file = IdentityFile {
            mpin_id: hexutil::encode(&self.mpin_id),
            client_secret: hexutil::encode(&self.client_secret),
            dta: self.dta_list.clone(),
            sok_send_key: self.sok_send_key.as_ref().map(hexutil::encode),
            sok_recv_key: self.sok_recv_key.as_ref().map(hexutil::encode),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// The stable user identifier embedded in `mpin_id`.
    pub fn user_id(&self) -> Result<String, ProtoError> {
        let doc: serde_json::Value = serde_json::from_slice(&self.mpin_id)
            .map_err(|e| ProtoError::Identity(format!("mpin_id is not JSON: {e}")))?;
        doc.get("userID")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| ProtoError::Identity("mpin_id has no string userID member".into()))
    }

    /// Check the structural invariants before any protocol use.
    pub fn validate(&self) -> Result<(), ProtoError> {
        self.user_id()?;
        if self.client_secret.len() != G1S {
            return Err(ProtoError::Identity(format!(
                "client_secret must be {G1S} bytes, got {}",
                self.client_secret.len()
            )));
        }
        if let Some(ref key) = self.sok_send_key {
            if key.len() != G1S {
                return Err(ProtoError::Identity(format!(
                    "sokSendKey must be {G1S} bytes, got {}",
                    key.len()
                )));
            }
        }
        if let Some(ref key) = self.sok_recv_key {
            if key.len() != G2S {
                return Err(ProtoError::Identity(format!(
                    "sokRecvKey must be {G2S} bytes, got {}",
                    key.len()
                )));
            }
        }
        Ok(())
    }
}
