//! pm_proto — pinmesh identities, wire types and the private-message envelope
//!
//! Everything here is serialised to JSON on the wire. The auth-server
//! bodies are order-insensitive; hex is lowercase throughout.
//!
//! # Modules
//! - `identity` — long-term identity blob + JSON file format
//! - `envelope` — SOK private-message envelope (seal / parse / open)
//! - `auth`     — M-Pin Full auth-server request/response bodies
//! - `topic`    — broker topic naming rules
//! - `hexutil`  — hex codec (empty buffer on malformed input)
//! - `error`    — unified error type

pub mod auth;
pub mod envelope;
pub mod error;
pub mod hexutil;
pub mod identity;
pub mod topic;

pub use envelope::Envelope;
pub use error::ProtoError;
pub use identity::Identity;
pub use topic::private_topic;
