//! Session event sink.
//!
//! All callbacks fire on the thread driving `run_message_loop` (or the
//! public operation that triggered the transition) and must not block.

use pm_proto::Identity;

pub trait EventListener {
    fn on_authenticated(&mut self) {}

    /// The auth server renewed the identity. The new identity is already
    /// in effect for this session; persisting it is the application's
    /// job.
    fn on_identity_changed(&mut self, _new_identity: &Identity) {}

    fn on_connected(&mut self) {}

    fn on_connection_lost(&mut self, _error: &str) {}

    fn on_error(&mut self, _error: &str) {}

    fn on_message_arrived(&mut self, _topic: &str, _payload: &[u8]) {}

    fn on_private_message_arrived(&mut self, _user_id_from: &str, _payload: &str) {}
}

/// Listener that swallows everything. Installed until the application
/// registers its own.
pub struct NullListener;

impl EventListener for NullListener {}
