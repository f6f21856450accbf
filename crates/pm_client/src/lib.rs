//! pm_client — pinmesh authenticated IoT messaging client
//!
//! Composition, outermost first:
//! - `session`   — the state machine applications drive
//! - `mpin_full` — three-pass zero-knowledge authentication (HTTP)
//! - `broker`    — synchronous MQTT 3.1.1 over PSK-TLS
//! - `psk`       — the TLS-PSK stream itself
//! - `http`      — blocking JSON helper for the auth server
//! - `event`     — listener trait the application implements
//! - `config`    — knobs: server URL, broker address, QoS, timeouts
//!
//! The client is single-threaded and cooperative: the application calls
//! `run_message_loop` in its own loop, and every callback fires on that
//! thread.

pub mod broker;
pub mod config;
pub mod error;
pub mod event;
pub mod http;
pub mod mpin_full;
mod psk;
pub mod session;

pub use broker::{BrokerClient, BrokerLink, BrokerQos, BrokerSettings};
pub use config::Config;
pub use error::ClientError;
pub use event::{EventListener, NullListener};
pub use mpin_full::{AuthResult, Authenticator};
pub use session::Client;
