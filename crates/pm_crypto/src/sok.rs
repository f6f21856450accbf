//! Sakai-Ohgishi-Kasahara identity-based encryption between peers.
//!
//! User IDs are the public keys. A trust authority holding master secret
//! `s` issues each user a sending key `s*H1(id)` (G1) and a receiving key
//! `s*H2(id)` (G2). Sender A and receiver B then share
//!
//!   e(s*H1(A), H2(B)) == e(H1(A), s*H2(B))
//!
//! without interaction, and both fold the pairing output into a 128-bit
//! AES-GCM key. The sender's user ID rides along as associated data, so
//! a forwarded ciphertext claiming a different `from` fails the tag.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Nonce};
use ark_bls12_381::{Bls12_381, Fr};
use ark_ec::pairing::PairingOutput;
use ark_ec::CurveGroup;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::pairing::{
    ate_pairing, g1_from_octet, g1_to_octet, g2_from_octet, g2_to_octet, gt_to_octet,
    hash_to_pfs, map_to_g1, map_to_g2, scalar_from_octet, G1S, G2S, IV_LEN, PAS, TAG_LEN,
};
use crate::rng::Csprng;

/// AES-GCM output of a private-message encryption.
#[derive(Debug)]
pub struct SokCiphertext {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Fold a pairing output into an AES key. Wiped on drop.
fn derive_key(g: &PairingOutput<Bls12_381>) -> Result<Zeroizing<[u8; PAS]>, CryptoError> {
    let digest = Sha256::digest(gt_to_octet(g)?);
    let mut key = Zeroizing::new([0u8; PAS]);
    key.copy_from_slice(&digest[..PAS]);
    Ok(key)
}

pub fn encrypt(
    rng: &mut Csprng,
    message: &[u8],
    sok_send_key: &[u8],
    user_id_from: &str,
    user_id_to: &str,
) -> Result<SokCiphertext, CryptoError> {
    if sok_send_key.len() != G1S {
        return Err(CryptoError::KeyLength {
            func: "sok_encrypt",
            role: "sokSendKey",
            expected: G1S,
            actual: sok_send_key.len(),
        });
    }

    let a_key = g1_from_octet("sok_encrypt", sok_send_key)?;
    let b_pub = map_to_g2(&hash_to_pfs(user_id_to.as_bytes()))?;
    let key = derive_key(&ate_pairing(&a_key, &b_pub))?;

    let mut iv = [0u8; IV_LEN];
    rng.get()?.fill_bytes(&mut iv);

    let cipher = Aes128Gcm::new_from_slice(&key[..]).map_err(|_| CryptoError::AeadEncrypt)?;
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: message,
                aad: user_id_from.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
    Ok(SokCiphertext {
        iv: iv.to_vec(),
        ciphertext: ciphertext.to_vec(),
        tag: tag.to_vec(),
    })
}

pub fn decrypt(
    data: &SokCiphertext,
    sok_recv_key: &[u8],
    user_id_from: &str,
) -> Result<Vec<u8>, CryptoError> {
    if sok_recv_key.len() != G2S {
        return Err(CryptoError::KeyLength {
            func: "sok_decrypt",
            role: "sokRecvKey",
            expected: G2S,
            actual: sok_recv_key.len(),
        });
    }
    if data.iv.len() != IV_LEN || data.tag.len() != TAG_LEN {
        return Err(CryptoError::TagMismatch);
    }

    let b_key = g2_from_octet("sok_decrypt", sok_recv_key)?;
    let a_pub = map_to_g1(&hash_to_pfs(user_id_from.as_bytes()))?;
    let key = derive_key(&ate_pairing(&a_pub, &b_key))?;

    let cipher = Aes128Gcm::new_from_slice(&key[..]).map_err(|_| CryptoError::TagMismatch)?;
    let mut sealed = data.ciphertext.clone();
    sealed.extend_from_slice(&data.tag);

    cipher
        .decrypt(
            Nonce::from_slice(&data.iv),
            Payload {
                msg: &sealed,
                aad: user_id_from.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::TagMismatch)
}

/// Issue a G1 sending key `s*H1(id)` from a raw master-secret scalar.
/// The trust-authority side of the scheme; the client only ever calls
/// this from tests and provisioning tools.
pub fn send_key(master_secret: &[u8], user_id: &str) -> Result<Vec<u8>, CryptoError> {
    let s = scalar_from_octet(master_secret);
    let p = map_to_g1(&hash_to_pfs(user_id.as_bytes()))?;
    g1_to_octet(&(p * s).into_affine())
}

/// Issue a G2 receiving key `s*H2(id)` from a raw master-secret scalar.
pub fn recv_key(master_secret: &[u8], user_id: &str) -> Result<Vec<u8>, CryptoError> {
    let s = scalar_from_octet(master_secret);
    let p = map_to_g2(&hash_to_pfs(user_id.as_bytes()))?;
    g2_to_octet(&(p * s).into_affine())
}

/// Sample a fresh master-secret scalar.
pub fn random_master_secret(rng: &mut Csprng) -> Result<Vec<u8>, CryptoError> {
    use ark_std::UniformRand;
    Ok(crate::pairing::scalar_to_octet(&Fr::rand(rng.get()?)))
}
