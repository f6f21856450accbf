//! pm_crypto — pinmesh pairing-curve cryptographic primitives
//!
//! # Design principles
//! - NO custom curve arithmetic; BLS12-381 comes from arkworks, AES-GCM
//!   from the RustCrypto AEAD family.
//! - Callers see owned byte buffers with fixed, length-checked octet
//!   formats; no curve types cross the crate boundary.
//! - One lazily-seeded CSPRNG per client, injectable for tests.
//!
//! # Module layout
//! - `pairing` — octet formats, hash-to-curve, ate pairing (internal)
//! - `rng`     — CSPRNG ownership, OS entropy seeding
//! - `mpin`    — M-Pin Full client-side steps
//! - `sok`     — SOK identity-based AES-GCM seal/open
//! - `error`   — unified error type

pub mod error;
pub mod mpin;
pub mod pairing;
pub mod rng;
pub mod sok;

pub use error::CryptoError;
pub use pairing::{G1S, G2S, GTS, IV_LEN, PAS, PFS, PGS, TAG_LEN};
pub use rng::Csprng;
