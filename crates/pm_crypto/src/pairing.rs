//! BLS12-381 octet formats and hash-to-curve helpers.
//!
//! Everything above this module speaks length-tagged byte buffers only;
//! no arkworks types escape the crate. The octet layouts follow the
//! classic pairing-library convention:
//!   G1: 0x04 | x | y            (2*PFS + 1 bytes)
//!   G2: x.c0 | x.c1 | y.c0 | y.c1  (4*PFS bytes)
//!   GT: full extension-field element (12*PFS bytes)
//! Scalars travel as PGS big-endian bytes and are reduced mod the group
//! order on the way in.

use ark_bls12_381::{Bls12_381, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::hashing::curve_maps::wb::WBMap;
use ark_ec::hashing::map_to_curve_hasher::MapToCurveBasedHasher;
use ark_ec::hashing::HashToCurve;
use ark_ec::pairing::{Pairing, PairingOutput};
use ark_ec::AffineRepr;
use ark_ff::field_hashers::DefaultFieldHasher;
use ark_ff::{BigInteger, PrimeField};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Base-field byte length of BLS12-381.
pub const PFS: usize = 48;
/// Group-order byte length.
pub const PGS: usize = 32;
/// G1 point octet size (0x04 prefix + affine coordinates).
pub const G1S: usize = 2 * PFS + 1;
/// G2 point octet size.
pub const G2S: usize = 4 * PFS;
/// GT element octet size.
pub const GTS: usize = 12 * PFS;
/// Derived AES key size.
pub const PAS: usize = 16;
/// AES-GCM IV size.
pub const IV_LEN: usize = 12;
/// AES-GCM authentication tag size.
pub const TAG_LEN: usize = 16;

const G1_DST: &[u8] = b"PINMESH-V1-BLS12381G1_XMD:SHA-256_SSWU_RO_";
const G2_DST: &[u8] = b"PINMESH-V1-BLS12381G2_XMD:SHA-256_SSWU_RO_";

const G1_POINT_PREFIX: u8 = 0x04;

/// SHA-256 of `data`, left-padded with zeros to PFS bytes.
pub(crate) fn hash_to_pfs(data: &[u8]) -> Vec<u8> {
    let digest = Sha256::digest(data);
    let mut out = vec![0u8; PFS - digest.len()];
    out.extend_from_slice(&digest);
    out
}

pub(crate) fn map_to_g1(msg: &[u8]) -> Result<G1Affine, CryptoError> {
    let hasher = MapToCurveBasedHasher::<
        G1Projective,
        DefaultFieldHasher<Sha256>,
        WBMap<ark_bls12_381::g1::Config>,
    >::new(G1_DST)
    .map_err(|e| CryptoError::MapToCurve(e.to_string()))?;
    hasher
        .hash(msg)
        .map_err(|e| CryptoError::MapToCurve(e.to_string()))
}

pub(crate) fn map_to_g2(msg: &[u8]) -> Result<G2Affine, CryptoError> {
    let hasher = MapToCurveBasedHasher::<
        G2Projective,
        DefaultFieldHasher<Sha256>,
        WBMap<ark_bls12_381::g2::Config>,
    >::new(G2_DST)
    .map_err(|e| CryptoError::MapToCurve(e.to_string()))?;
    hasher
        .hash(msg)
        .map_err(|e| CryptoError::MapToCurve(e.to_string()))
}

pub(crate) fn g1_to_octet(p: &G1Affine) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::with_capacity(G1S);
    out.push(G1_POINT_PREFIX);
    p.serialize_uncompressed(&mut out)
        .map_err(|e| CryptoError::Serialisation(e.to_string()))?;
    Ok(out)
}

pub(crate) fn g1_from_octet(func: &'static str, oct: &[u8]) -> Result<G1Affine, CryptoError> {
    if oct.len() != G1S || oct[0] != G1_POINT_PREFIX {
        return Err(CryptoError::InvalidPoint { func });
    }
    G1Affine::deserialize_uncompressed(&oct[1..]).map_err(|_| CryptoError::InvalidPoint { func })
}

pub(crate) fn g2_to_octet(p: &G2Affine) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::with_capacity(G2S);
    p.serialize_uncompressed(&mut out)
        .map_err(|e| CryptoError::Serialisation(e.to_string()))?;
    Ok(out)
}

pub(crate) fn g2_from_octet(func: &'static str, oct: &[u8]) -> Result<G2Affine, CryptoError> {
    if oct.len() != G2S {
        return Err(CryptoError::InvalidPoint { func });
    }
    G2Affine::deserialize_uncompressed(oct).map_err(|_| CryptoError::InvalidPoint { func })
}

pub(crate) fn gt_to_octet(g: &PairingOutput<Bls12_381>) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::with_capacity(GTS);
    g.serialize_uncompressed(&mut out)
        .map_err(|e| CryptoError::Serialisation(e.to_string()))?;
    Ok(out)
}

pub(crate) fn gt_from_octet(
    func: &'static str,
    oct: &[u8],
) -> Result<PairingOutput<Bls12_381>, CryptoError> {
    if oct.len() != GTS {
        return Err(CryptoError::InvalidPoint { func });
    }
    PairingOutput::deserialize_uncompressed(oct).map_err(|_| CryptoError::InvalidPoint { func })
}

pub(crate) fn scalar_to_octet(s: &Fr) -> Vec<u8> {
    s.into_bigint().to_bytes_be()
}

pub(crate) fn scalar_from_octet(bytes: &[u8]) -> Fr {
    Fr::from_be_bytes_mod_order(bytes)
}

pub(crate) fn ate_pairing(p: &G1Affine, q: &G2Affine) -> PairingOutput<Bls12_381> {
    Bls12_381::pairing(*p, *q)
}

pub(crate) fn g2_generator() -> G2Affine {
    G2Affine::generator()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ec::CurveGroup;
    use ark_std::UniformRand;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn g1_octet_roundtrip() {
        let mut rng = ChaCha20Rng::from_seed([7u8; 32]);
        let p = (G1Affine::generator() * Fr::rand(&mut rng)).into_affine();
        let oct = g1_to_octet(&p).unwrap();
        assert_eq!(oct.len(), G1S);
        assert_eq!(oct[0], G1_POINT_PREFIX);
        assert_eq!(g1_from_octet("test", &oct).unwrap(), p);
    }

    #[test]
    fn g2_octet_roundtrip() {
        let mut rng = ChaCha20Rng::from_seed([9u8; 32]);
        let p = (G2Affine::generator() * Fr::rand(&mut rng)).into_affine();
        let oct = g2_to_octet(&p).unwrap();
        assert_eq!(oct.len(), G2S);
        assert_eq!(g2_from_octet("test", &oct).unwrap(), p);
    }

    #[test]
    fn rejects_truncated_g1_octet() {
        let oct = g1_to_octet(&G1Affine::generator()).unwrap();
        assert!(g1_from_octet("test", &oct[..oct.len() - 1]).is_err());
    }

    #[test]
    fn hash_to_pfs_is_padded() {
        let h = hash_to_pfs(b"alice");
        assert_eq!(h.len(), PFS);
        assert!(h[..PFS - 32].iter().all(|&b| b == 0));
    }

    #[test]
    fn map_to_g1_is_deterministic() {
        let a = map_to_g1(b"same input").unwrap();
        let b = map_to_g1(b"same input").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, map_to_g1(b"other input").unwrap());
    }
}
