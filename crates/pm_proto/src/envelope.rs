//! Private-message envelope — what peers exchange over the broker.
//!
//! JSON on the wire, published to the receiver's private topic:
//!
//!   { "from": userId, "encrypted": true,  "iv": hex, "ciphertext": hex, "tag": hex }
//!   { "from": userId, "encrypted": false, "data": text }
//!
//! The broker relays it blind; only the named receiver holds the SOK
//! receiving key that opens the encrypted form.

use serde::{Deserialize, Serialize};

use pm_crypto::sok::{self, SokCiphertext};
use pm_crypto::Csprng;

use crate::error::ProtoError;
use crate::hexutil;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub from: String,
    pub encrypted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Envelope {
    /// Build an envelope from `from` to `to`. Encrypts when requested and
    /// a sending key is available; otherwise falls back to plaintext.
    pub fn seal(
        rng: &mut Csprng,
        from: &str,
        plaintext: &str,
        encrypt: bool,
        sok_send_key: Option<&[u8]>,
        to: &str,
    ) -> Result<Self, ProtoError> {
        match (encrypt, sok_send_key) {
            (true, Some(key)) => {
                let sealed = sok::encrypt(rng, plaintext.as_bytes(), key, from, to)?;
                Ok(Self {
                    from: from.to_owned(),
                    encrypted: true,
                    iv: Some(hexutil::encode(&sealed.iv)),
                    ciphertext: Some(hexutil::encode(&sealed.ciphertext)),
                    tag: Some(hexutil::encode(&sealed.tag)),
                    data: None,
                })
            }
            _ => Ok(Self {
                from: from.to_owned(),
                encrypted: false,
                iv: None,
                ciphertext: None,
                tag: None,
                data: Some(plaintext.to_owned()),
            }),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Recover the plaintext. Encrypted envelopes need the receiver's SOK
    /// key; the sender ID inside the envelope feeds the pairing, so a
    /// spoofed `from` fails the tag check downstream.
    pub fn open(&self, sok_recv_key: Option<&[u8]>) -> Result<String, ProtoError> {
        if !self.encrypted {
            return self
                .data
                .clone()
                .ok_or_else(|| ProtoError::Envelope("plaintext envelope without data".into()));
        }

        let field = |v: &Option<String>, name: &str| -> Result<Vec<u8>, ProtoError> {
            let hex_str = v
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ProtoError::Envelope(format!("encrypted envelope missing {name}")))?;
            let bytes = hexutil::decode(hex_str);
            if bytes.is_empty() {
                return Err(ProtoError::Envelope(format!("invalid hex in {name}")));
            }
            Ok(bytes)
        };
        let sealed = SokCiphertext {
            iv: field(&self.iv, "iv")?,
            ciphertext: field(&self.ciphertext, "ciphertext")?,
            tag: field(&self.tag, "tag")?,
        };

        let key = sok_recv_key.ok_or_else(|| {
            ProtoError::Envelope("no sokRecvKey configured for encrypted message".into())
        })?;

        let plain = sok::decrypt(&sealed, key, &self.from)?;
        String::from_utf8(plain)
            .map_err(|_| ProtoError::Envelope("decrypted payload is not UTF-8".into()))
    }
}
