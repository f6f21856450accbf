//! M-Pin Full client-side primitives.
//!
//! The three-pass protocol driver lives in the client crate; this module
//! holds the curve arithmetic for each step, working on octets only:
//!
//!   client1:    x random, U = x*H1(mpin_id), UT = x*H1(date|H(mpin_id))
//!   client2:    V = -(x + y) * client_secret
//!   g1_multiple: Z = r*H1(client_id), r random
//!   hash_all:   transcript hash binding hid, U, y, V, Z and the server T
//!   precompute: g1 = e(secret, Q2), g2 = e(H1(client_id), Q2)
//!   client_key: K = H(g1^(r+hm) | x*T), truncated to the AES key size
//!
//! The identity carries no PIN and no time permit, so the PIN exponent is
//! zero and the date slot is fixed at zero; UT is still emitted in full
//! form so the wire shape never changes.

use ark_ec::CurveGroup;
use ark_std::UniformRand;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;
use crate::pairing::{
    ate_pairing, g1_from_octet, g1_to_octet, g2_generator, gt_from_octet, gt_to_octet,
    hash_to_pfs, map_to_g1, scalar_from_octet, scalar_to_octet, PAS,
};
use crate::rng::Csprng;
use ark_bls12_381::Fr;

/// Output of the first client pass.
#[derive(Debug)]
pub struct Pass1Data {
    pub x: Vec<u8>,
    pub sec: Vec<u8>,
    pub u: Vec<u8>,
    pub ut: Vec<u8>,
}

/// Accumulated state of the second pass.
pub struct Pass2Data {
    pub y: Vec<u8>,
    pub v: Vec<u8>,
    pub z: Vec<u8>,
    pub r: Vec<u8>,
}

/// Pairing precomputation over the stored client secret.
pub struct PrecomputeData {
    pub g1: Vec<u8>,
    pub g2: Vec<u8>,
}

/// Server material from the final authenticate round-trip.
pub struct AuthData {
    pub t: Vec<u8>,
    pub hm: Vec<u8>,
    pub precomp: PrecomputeData,
}

/// SHA-256 of `id`, left-padded to the field size. The result doubles as
/// the client ID hash and as the PSK identity (hex-encoded by callers).
pub fn hash_id(id: &[u8]) -> Vec<u8> {
    hash_to_pfs(id)
}

pub fn client1(
    rng: &mut Csprng,
    mpin_id: &[u8],
    client_secret: &[u8],
) -> Result<Pass1Data, CryptoError> {
    let sec = g1_from_octet("client1", client_secret)?;
    let id_hash = hash_to_pfs(mpin_id);
    let p = map_to_g1(&id_hash)?;

    let x = Fr::rand(rng.get()?);
    let u = (p * x).into_affine();

    // date slot 0: H1(be32(0) | H(mpin_id))
    let mut dated = 0u32.to_be_bytes().to_vec();
    dated.extend_from_slice(&id_hash);
    let pt = map_to_g1(&hash_to_pfs(&dated))?;
    let ut = (pt * x).into_affine();

    Ok(Pass1Data {
        x: scalar_to_octet(&x),
        sec: g1_to_octet(&sec)?,
        u: g1_to_octet(&u)?,
        ut: g1_to_octet(&ut)?,
    })
}

pub fn client2(x: &[u8], y: &[u8], sec: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let p = g1_from_octet("client2", sec)?;
    let x = scalar_from_octet(x);
    let y = scalar_from_octet(y);
    let v = (p * -(x + y)).into_affine();
    g1_to_octet(&v)
}

/// Random multiple of the mapped client ID hash: returns `(w, r)` with
/// `w = r*H1(hash_id)`.
pub fn g1_multiple(rng: &mut Csprng, hash_id: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    let p = map_to_g1(hash_id)?;
    let r = Fr::rand(rng.get()?);
    let w = (p * r).into_affine();
    Ok((g1_to_octet(&w)?, scalar_to_octet(&r)))
}

/// Transcript hash over the full exchange. UT is not bound; the server
/// omits it from its own transcript when no time permits are in play.
pub fn hash_all(hash_id: &[u8], pass1: &Pass1Data, pass2: &Pass2Data, t: &[u8]) -> Vec<u8> {
    let mut h = Sha256::new();
    h.update(hash_id);
    h.update(&pass1.u);
    h.update(&pass2.y);
    h.update(&pass2.v);
    h.update(&pass2.z);
    h.update(t);
    let digest = h.finalize();
    let mut out = vec![0u8; crate::pairing::PFS - digest.len()];
    out.extend_from_slice(&digest);
    out
}

pub fn precompute(token: &[u8], hash_id: &[u8]) -> Result<PrecomputeData, CryptoError> {
    let tok = g1_from_octet("precompute", token)?;
    let p = map_to_g1(hash_id)?;
    let q = g2_generator();
    Ok(PrecomputeData {
        g1: gt_to_octet(&ate_pairing(&tok, &q))?,
        g2: gt_to_octet(&ate_pairing(&p, &q))?,
    })
}

/// Derive the 16-byte session key. This is the value later installed as
/// the TLS pre-shared key.
pub fn client_key(pass1: &Pass1Data, pass2: &Pass2Data, auth: &AuthData) -> Result<Vec<u8>, CryptoError> {
    let g1 = gt_from_octet("client_key", &auth.precomp.g1)?;
    let t = g1_from_octet("client_key", &auth.t)?;

    let r = scalar_from_octet(&pass2.r);
    let hm = scalar_from_octet(&auth.hm);
    let x = scalar_from_octet(&pass1.x);

    let c = g1 * (r + hm);
    let w = (t * x).into_affine();

    let mut h = Sha256::new();
    h.update(gt_to_octet(&c)?);
    h.update(g1_to_octet(&w)?);
    Ok(h.finalize()[..PAS].to_vec())
}

/// `a + b` in G1. Recombines two DTA client-secret shares into the full
/// client secret during identity renewal.
pub fn recombine_g1(a: &[u8], b: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let pa = g1_from_octet("recombine_g1", a)?;
    let pb = g1_from_octet("recombine_g1", b)?;
    g1_to_octet(&(pa + pb).into_affine())
}
