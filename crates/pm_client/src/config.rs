//! Client configuration.

use pm_proto::Identity;

use crate::event::{EventListener, NullListener};

pub const DEFAULT_MQTT_TLS_PORT: u16 = 8443;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;

pub struct Config {
    pub auth_server_url: String,
    /// `host` or `host:port`; the default TLS port is appended when
    /// missing.
    pub broker_addr: String,
    /// 0 means "use the default".
    pub command_timeout_ms: u64,
    /// QoS2 when true, QoS1 otherwise.
    pub use_qos2: bool,
    pub use_persistent_session: bool,
    pub identity: Identity,

    listener: Box<dyn EventListener>,
}

impl Config {
    pub fn new(auth_server_url: String, broker_addr: String, identity: Identity) -> Self {
        Self {
            auth_server_url,
            broker_addr,
            command_timeout_ms: 0,
            use_qos2: true,
            use_persistent_session: true,
            identity,
            listener: Box::new(NullListener),
        }
    }

    pub fn set_event_listener(&mut self, listener: Box<dyn EventListener>) {
        self.listener = listener;
    }

    pub fn reset_event_listener(&mut self) {
        self.listener = Box::new(NullListener);
    }

    pub(crate) fn listener_mut(&mut self) -> &mut dyn EventListener {
        self.listener.as_mut()
    }

    /// Broker address with the default port filled in.
    pub(crate) fn broker_addr_with_port(&self) -> String {
        if self.broker_addr.contains(':') {
            self.broker_addr.clone()
        } else {
            format!("{}:{DEFAULT_MQTT_TLS_PORT}", self.broker_addr)
        }
    }

    pub(crate) fn command_timeout_ms_or_default(&self) -> u64 {
        if self.command_timeout_ms == 0 {
            DEFAULT_COMMAND_TIMEOUT_MS
        } else {
            self.command_timeout_ms
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity::new(b"{\"userID\":\"alice\"}".to_vec(), vec![], vec![])
    }

    #[test]
    fn default_port_is_appended() {
        let conf = Config::new("http://auth".into(), "broker.example".into(), identity());
        assert_eq!(conf.broker_addr_with_port(), "broker.example:8443");
    }

    #[test]
    fn explicit_port_is_kept() {
        let conf = Config::new("http://auth".into(), "10.0.0.1:1883".into(), identity());
        assert_eq!(conf.broker_addr_with_port(), "10.0.0.1:1883");
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let mut conf = Config::new("http://auth".into(), "b".into(), identity());
        assert_eq!(conf.command_timeout_ms_or_default(), DEFAULT_COMMAND_TIMEOUT_MS);
        conf.command_timeout_ms = 250;
        assert_eq!(conf.command_timeout_ms_or_default(), 250);
    }
}
