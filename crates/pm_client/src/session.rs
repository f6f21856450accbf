//! Session core: composes authentication, the broker link and message
//! dispatch behind a small state machine.
//!
//!   NoSession -> Initial -> Connected <-> Disconnected
//!
//! Every public operation first runs the transition check: from Initial
//! it authenticates and connects, from Disconnected it reconnects
//! (replaying subscriptions when the broker lost the session), and a
//! dead link discovered in Connected downgrades to Disconnected before
//! the reconnect attempt. Authentication is cached for the lifetime of
//! the session; the M-Pin exchange reruns only after `end_session`.

use std::collections::BTreeSet;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use pm_crypto::Csprng;
use pm_proto::{private_topic, Envelope, ProtoError};

use crate::broker::{BrokerClient, BrokerLink, BrokerQos, BrokerSettings};
use crate::config::Config;
use crate::error::ClientError;
use crate::mpin_full::Authenticator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NoSession,
    Initial,
    Connected,
    Disconnected,
}

pub struct Client<B: BrokerLink = BrokerClient> {
    conf: Config,
    rng: Csprng,
    authenticator: Authenticator,
    broker: B,
    state: State,
    authenticated: bool,
    user_id: String,
    private_topic: String,
    subscriptions: BTreeSet<String>,
}

impl Client<BrokerClient> {
    pub fn new(conf: Config) -> Result<Self, ClientError> {
        Self::with_broker(conf, BrokerClient::new())
    }
}

impl<B: BrokerLink> Client<B> {
    pub fn with_broker(conf: Config, broker: B) -> Result<Self, ClientError> {
        Ok(Self {
            conf,
            rng: Csprng::new(),
            authenticator: Authenticator::new()?,
            broker,
            state: State::NoSession,
            authenticated: false,
            user_id: String::new(),
            private_topic: String::new(),
            subscriptions: BTreeSet::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.conf
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.conf
    }

    /// Configure the broker link and try the first connect. Returns true
    /// once the session is up; on failure the session stays in its
    /// initial state and the next operation retries.
    pub fn start_session(&mut self) -> bool {
        if self.is_session_started() {
            return self.check_state();
        }

        if let Err(e) = self.conf.identity.validate() {
            self.conf.listener_mut().on_error(&e.to_string());
            return false;
        }
        let user_id = match self.conf.identity.user_id() {
            Ok(user_id) => user_id,
            Err(e) => {
                self.conf.listener_mut().on_error(&e.to_string());
                return false;
            }
        };

        self.private_topic = private_topic(&user_id);
        self.broker.configure(BrokerSettings {
            addr: self.conf.broker_addr_with_port(),
            client_id: user_id.clone(),
            qos: if self.conf.use_qos2 {
                BrokerQos::ExactlyOnce
            } else {
                BrokerQos::AtLeastOnce
            },
            persistent_session: self.conf.use_persistent_session,
            command_timeout: Duration::from_millis(self.conf.command_timeout_ms_or_default()),
        });
        self.user_id = user_id;

        self.state = State::Initial;
        self.check_state()
    }

    pub fn end_session(&mut self) {
        if self.is_session_started() {
            self.broker.disconnect();
            self.subscriptions.clear();
            self.authenticated = false;
            self.state = State::NoSession;
        }
    }

    pub fn is_session_started(&self) -> bool {
        self.state != State::NoSession
    }

    pub fn is_connected(&mut self) -> bool {
        self.broker.is_connected()
    }

    pub fn subscribe(&mut self, topic: &str) -> bool {
        if !self.check_state() {
            return false;
        }
        match self.broker.subscribe(topic) {
            Ok(()) => {
                self.subscriptions.insert(topic.to_owned());
                true
            }
            Err(e) => {
                self.conf.listener_mut().on_error(&e.to_string());
                false
            }
        }
    }

    pub fn unsubscribe(&mut self, topic: &str) -> bool {
        if !self.check_state() {
            return false;
        }
        match self.broker.unsubscribe(topic) {
            Ok(()) => {
                self.subscriptions.remove(topic);
                true
            }
            Err(e) => {
                self.conf.listener_mut().on_error(&e.to_string());
                false
            }
        }
    }

    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> bool {
        if !self.check_state() {
            return false;
        }
        match self.broker.publish(topic, payload) {
            Ok(()) => true,
            Err(e) => {
                self.conf.listener_mut().on_error(&e.to_string());
                false
            }
        }
    }

    /// Subscribe to this client's own private-message topic.
    pub fn listen_for_private_messages(&mut self) -> bool {
        let topic = self.private_topic.clone();
        self.subscribe(&topic)
    }

    /// Seal `payload` into an envelope and publish it to the peer's
    /// private topic. Encrypts when requested and the identity carries a
    /// SOK sending key.
    pub fn send_private_message(&mut self, user_id_to: &str, payload: &str, encrypt: bool) -> bool {
        if !self.check_state() {
            return false;
        }

        let envelope = Envelope::seal(
            &mut self.rng,
            &self.user_id,
            payload,
            encrypt,
            self.conf.identity.sok_send_key.as_deref(),
            user_id_to,
        );
        let json = match envelope.and_then(|env| env.to_json()) {
            Ok(json) => json,
            Err(e) => {
                self.conf
                    .listener_mut()
                    .on_error(&format!("Failed to build private message: {e}"));
                return false;
            }
        };

        match self.broker.publish(&private_topic(user_id_to), json.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                self.conf.listener_mut().on_error(&e.to_string());
                false
            }
        }
    }

    /// Drive broker keepalive and deliver arrived messages, blocking for
    /// at most `timeout_ms`. When the session is not connectable the
    /// remaining timeout is slept away so caller loops stay paced.
    pub fn run_message_loop(&mut self, timeout_ms: u64) -> bool {
        let timeout = Duration::from_millis(timeout_ms);
        let started = Instant::now();

        if !self.check_state() {
            let remaining = timeout.saturating_sub(started.elapsed());
            if !remaining.is_zero() {
                thread::sleep(remaining);
            }
            return false;
        }

        match self.broker.run_loop(timeout) {
            Ok(messages) => {
                for (topic, payload) in messages {
                    self.dispatch(&topic, &payload);
                }
                true
            }
            Err(e) => {
                self.conf.listener_mut().on_error(&e.to_string());
                false
            }
        }
    }

    fn check_state(&mut self) -> bool {
        match self.state {
            State::NoSession => {
                self.conf.listener_mut().on_error("No session started");
                false
            }
            State::Initial => match self.initial_connect() {
                Ok(()) => {
                    self.state = State::Connected;
                    self.conf.listener_mut().on_connected();
                    true
                }
                Err(e) => {
                    self.conf.listener_mut().on_error(&e.to_string());
                    false
                }
            },
            State::Connected | State::Disconnected => {
                if !self.broker.is_connected() {
                    if self.state == State::Connected {
                        self.state = State::Disconnected;
                        let error = self.broker.last_error();
                        self.conf.listener_mut().on_connection_lost(&error);
                    }
                    match self.reconnect() {
                        Ok(()) => {
                            self.state = State::Connected;
                            self.conf.listener_mut().on_connected();
                        }
                        Err(e) => {
                            self.conf.listener_mut().on_error(&e.to_string());
                        }
                    }
                }
                self.state == State::Connected
            }
        }
    }

    fn authenticate(&mut self) -> Result<(), ClientError> {
        if self.authenticated {
            return Ok(());
        }

        let auth = self.authenticator.authenticate(
            &mut self.rng,
            &self.conf.auth_server_url,
            &self.conf.identity,
        )?;
        self.broker
            .set_psk(&auth.shared_secret, &hex::encode(&auth.client_id));

        if let Some(new_identity) = auth.new_identity {
            info!("identity renewed by the auth server");
            self.conf.listener_mut().on_identity_changed(&new_identity);
            self.conf.identity = new_identity;
        }

        self.authenticated = true;
        self.conf.listener_mut().on_authenticated();
        Ok(())
    }

    fn initial_connect(&mut self) -> Result<(), ClientError> {
        self.authenticate()?;
        self.broker.connect()
    }

    fn reconnect(&mut self) -> Result<(), ClientError> {
        self.authenticate()?;
        self.broker.reconnect()?;
        if !self.broker.session_present() {
            debug!(
                count = self.subscriptions.len(),
                "broker session lost; replaying subscriptions"
            );
            self.restore_subscriptions()?;
        }
        Ok(())
    }

    fn restore_subscriptions(&mut self) -> Result<(), ClientError> {
        let topics: Vec<String> = self.subscriptions.iter().cloned().collect();
        for topic in topics {
            self.broker.subscribe(&topic)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, topic: &str, payload: &[u8]) {
        if topic == self.private_topic {
            self.dispatch_private(payload);
        } else {
            self.conf.listener_mut().on_message_arrived(topic, payload);
        }
    }

    fn dispatch_private(&mut self, payload: &[u8]) {
        let recv_key = self.conf.identity.sok_recv_key.clone();
        let opened = std::str::from_utf8(payload)
            .map_err(|e| ProtoError::Envelope(format!("not UTF-8: {e}")))
            .and_then(|raw| {
                let envelope = Envelope::from_json(raw)?;
                let plain = envelope.open(recv_key.as_deref())?;
                Ok((envelope.from, plain))
            });

        match opened {
            Ok((from, plain)) => self
                .conf
                .listener_mut()
                .on_private_message_arrived(&from, &plain),
            Err(e) => self.conf.listener_mut().on_error(&format!(
                "Failed to process private message '{}': {e}",
                String::from_utf8_lossy(payload)
            )),
        }
    }
}

impl<B: BrokerLink> Drop for Client<B> {
    fn drop(&mut self) {
        self.end_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use pm_crypto::sok;
    use pm_proto::Identity;

    use crate::event::EventListener;

    // ── scripted broker ──────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeBroker {
        connected: bool,
        session_present: bool,
        present_on_reconnect: bool,
        fail_connect: bool,
        psk: Option<(Vec<u8>, String)>,
        incoming: VecDeque<(String, Vec<u8>)>,
        publishes: Vec<(String, Vec<u8>)>,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl BrokerLink for FakeBroker {
        fn configure(&mut self, settings: BrokerSettings) {
            self.log
                .borrow_mut()
                .push(format!("configure:{}:{}", settings.addr, settings.client_id));
        }

        fn set_psk(&mut self, psk: &[u8], identity_hex: &str) {
            self.psk = Some((psk.to_vec(), identity_hex.to_owned()));
        }

        fn connect(&mut self) -> Result<(), ClientError> {
            self.log.borrow_mut().push("connect".into());
            if self.fail_connect {
                return Err(ClientError::Broker("connect refused".into()));
            }
            self.connected = true;
            self.session_present = false;
            Ok(())
        }

        fn reconnect(&mut self) -> Result<(), ClientError> {
            self.log.borrow_mut().push("reconnect".into());
            if self.fail_connect {
                return Err(ClientError::Broker("connect refused".into()));
            }
            self.connected = true;
            self.session_present = self.present_on_reconnect;
            Ok(())
        }

        fn disconnect(&mut self) {
            self.log.borrow_mut().push("disconnect".into());
            self.connected = false;
            self.session_present = false;
        }

        fn is_connected(&mut self) -> bool {
            self.connected
        }

        fn session_present(&self) -> bool {
            self.session_present
        }

        fn subscribe(&mut self, topic: &str) -> Result<(), ClientError> {
            self.log.borrow_mut().push(format!("subscribe:{topic}"));
            Ok(())
        }

        fn unsubscribe(&mut self, topic: &str) -> Result<(), ClientError> {
            self.log.borrow_mut().push(format!("unsubscribe:{topic}"));
            Ok(())
        }

        fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ClientError> {
            self.log.borrow_mut().push(format!("publish:{topic}"));
            self.publishes.push((topic.to_owned(), payload.to_vec()));
            Ok(())
        }

        fn run_loop(&mut self, _timeout: Duration) -> Result<Vec<(String, Vec<u8>)>, ClientError> {
            Ok(self.incoming.drain(..).collect())
        }

        fn last_error(&self) -> String {
            "link dropped".into()
        }
    }

    // ── event recorder ───────────────────────────────────────────────────

    #[derive(Default)]
    struct Events {
        authenticated: usize,
        identity_changed: usize,
        connected: usize,
        connection_lost: usize,
        errors: Vec<String>,
        messages: Vec<(String, Vec<u8>)>,
        private: Vec<(String, String)>,
    }

    struct Recorder(Rc<RefCell<Events>>);

    impl EventListener for Recorder {
        fn on_authenticated(&mut self) {
            self.0.borrow_mut().authenticated += 1;
        }
        fn on_identity_changed(&mut self, _new_identity: &Identity) {
            self.0.borrow_mut().identity_changed += 1;
        }
        fn on_connected(&mut self) {
            self.0.borrow_mut().connected += 1;
        }
        fn on_connection_lost(&mut self, _error: &str) {
            self.0.borrow_mut().connection_lost += 1;
        }
        fn on_error(&mut self, error: &str) {
            self.0.borrow_mut().errors.push(error.to_owned());
        }
        fn on_message_arrived(&mut self, topic: &str, payload: &[u8]) {
            self.0
                .borrow_mut()
                .messages
                .push((topic.to_owned(), payload.to_vec()));
        }
        fn on_private_message_arrived(&mut self, from: &str, payload: &str) {
            self.0
                .borrow_mut()
                .private
                .push((from.to_owned(), payload.to_owned()));
        }
    }

    // ── fixtures ─────────────────────────────────────────────────────────

    fn test_identity(user: &str) -> Identity {
        let mpin_id = format!("{{\"userID\":\"{user}\"}}").into_bytes();
        let client_secret = sok::send_key(&[9u8; 32], user).unwrap();
        Identity::new(mpin_id, client_secret, vec!["dta1".into()])
    }

    fn mock_auth_server() -> mockito::ServerGuard {
        let mut server = mockito::Server::new();
        let t = sok::send_key(&[7u8; 32], "server-t").unwrap();
        server
            .mock("POST", "/auth/pass1")
            .with_header("content-type", "application/json")
            .with_body(format!("{{\"y\":\"{}\"}}", hex::encode([3u8; 32])))
            .create();
        server
            .mock("POST", "/auth/pass2")
            .with_header("content-type", "application/json")
            .with_body("{\"authOTT\":\"tok\"}")
            .create();
        server
            .mock("POST", "/auth/authenticate")
            .with_header("content-type", "application/json")
            .with_body(format!("{{\"T\":\"{}\"}}", hex::encode(&t)))
            .create();
        server
    }

    struct Fixture {
        client: Client<FakeBroker>,
        events: Rc<RefCell<Events>>,
        log: Rc<RefCell<Vec<String>>>,
        _server: mockito::ServerGuard,
    }

    fn fixture(user: &str) -> Fixture {
        fixture_with_identity(test_identity(user))
    }

    fn fixture_with_identity(identity: Identity) -> Fixture {
        let server = mock_auth_server();
        let mut conf = Config::new(server.url(), "broker.local:8443".into(), identity);
        let events = Rc::new(RefCell::new(Events::default()));
        conf.set_event_listener(Box::new(Recorder(events.clone())));

        let log = Rc::new(RefCell::new(Vec::new()));
        let broker = FakeBroker {
            log: log.clone(),
            ..FakeBroker::default()
        };
        Fixture {
            client: Client::with_broker(conf, broker).unwrap(),
            events,
            log,
            _server: server,
        }
    }

    // ── tests ────────────────────────────────────────────────────────────

    #[test]
    fn start_session_authenticates_and_connects() {
        let mut fx = fixture("alice");
        assert!(fx.client.start_session());

        let events = fx.events.borrow();
        assert_eq!(events.authenticated, 1);
        assert_eq!(events.connected, 1);
        assert!(events.errors.is_empty());
        assert!(fx.client.broker.psk.is_some());
        let (psk, psk_id) = fx.client.broker.psk.clone().unwrap();
        assert_eq!(psk.len(), pm_crypto::PAS);
        assert_eq!(psk_id.len(), 2 * pm_crypto::PFS);
    }

    #[test]
    fn operations_without_session_are_refused() {
        let mut fx = fixture("alice");
        assert!(!fx.client.subscribe("a/b"));
        assert_eq!(
            fx.events.borrow().errors.last().map(String::as_str),
            Some("No session started")
        );
    }

    #[test]
    fn subscriptions_replay_when_broker_lost_the_session() {
        let mut fx = fixture("alice");
        assert!(fx.client.start_session());
        assert!(fx.client.subscribe("a/b"));
        assert!(fx.client.subscribe("c/d"));

        // sever the link; the next operation discovers it
        fx.client.broker.connected = false;
        fx.client.broker.present_on_reconnect = false;
        assert!(fx.client.publish("t", b"x"));

        let log = fx.log.borrow();
        let reconnect_at = log.iter().position(|e| e == "reconnect").unwrap();
        let publish_at = log.iter().position(|e| e == "publish:t").unwrap();
        let replayed: BTreeSet<_> = log[reconnect_at..publish_at]
            .iter()
            .filter_map(|e| e.strip_prefix("subscribe:"))
            .collect();
        assert_eq!(replayed, BTreeSet::from(["a/b", "c/d"]));

        let events = fx.events.borrow();
        assert_eq!(events.connection_lost, 1);
        assert_eq!(events.connected, 2);
        // the M-Pin exchange is cached for the whole session
        assert_eq!(events.authenticated, 1);
    }

    #[test]
    fn replay_is_skipped_when_session_survived() {
        let mut fx = fixture("alice");
        assert!(fx.client.start_session());
        assert!(fx.client.subscribe("a/b"));

        fx.client.broker.connected = false;
        fx.client.broker.present_on_reconnect = true;
        assert!(fx.client.publish("t", b"x"));

        let log = fx.log.borrow();
        let reconnect_at = log.iter().position(|e| e == "reconnect").unwrap();
        assert!(!log[reconnect_at..].iter().any(|e| e.starts_with("subscribe:")));
    }

    #[test]
    fn private_messages_route_to_the_private_callback() {
        let mut fx = fixture("alice");
        assert!(fx.client.start_session());
        assert!(fx.client.listen_for_private_messages());

        fx.client.broker.incoming.push_back((
            private_topic("alice"),
            b"{\"from\":\"bob\",\"encrypted\":false,\"data\":\"hi\"}".to_vec(),
        ));
        assert!(fx.client.run_message_loop(10));

        let events = fx.events.borrow();
        assert_eq!(events.private, vec![("bob".to_owned(), "hi".to_owned())]);
        assert!(events.messages.is_empty());
    }

    #[test]
    fn ordinary_topics_route_to_the_plain_callback() {
        let mut fx = fixture("alice");
        assert!(fx.client.start_session());

        fx.client
            .broker
            .incoming
            .push_back(("sensors/temp".into(), b"21.5".to_vec()));
        assert!(fx.client.run_message_loop(10));

        let events = fx.events.borrow();
        assert!(events.private.is_empty());
        assert_eq!(events.messages, vec![("sensors/temp".into(), b"21.5".to_vec())]);
    }

    #[test]
    fn encrypted_private_message_is_opened_with_the_recv_key() {
        let master = [42u8; 32];
        let mut identity = test_identity("alice");
        identity.sok_recv_key = Some(sok::recv_key(&master, "alice").unwrap());
        let mut fx = fixture_with_identity(identity);

        let bob_send = sok::send_key(&master, "bob").unwrap();
        let mut rng = Csprng::with_seed([1u8; 32]);
        let envelope =
            Envelope::seal(&mut rng, "bob", "secret", true, Some(&bob_send), "alice").unwrap();

        assert!(fx.client.start_session());
        fx.client.broker.incoming.push_back((
            private_topic("alice"),
            envelope.to_json().unwrap().into_bytes(),
        ));
        assert!(fx.client.run_message_loop(10));

        let events = fx.events.borrow();
        assert_eq!(events.private, vec![("bob".into(), "secret".into())]);
    }

    #[test]
    fn malformed_private_message_surfaces_as_error_with_raw_payload() {
        let mut fx = fixture("alice");
        assert!(fx.client.start_session());

        fx.client
            .broker
            .incoming
            .push_back((private_topic("alice"), b"not json at all".to_vec()));
        assert!(fx.client.run_message_loop(10));

        let events = fx.events.borrow();
        assert!(events.private.is_empty());
        assert!(events
            .errors
            .iter()
            .any(|e| e.contains("not json at all")));
    }

    #[test]
    fn send_private_message_publishes_sealed_envelope_to_peer_topic() {
        let master = [42u8; 32];
        let mut identity = test_identity("alice");
        identity.sok_send_key = Some(sok::send_key(&master, "alice").unwrap());
        let mut fx = fixture_with_identity(identity);

        assert!(fx.client.start_session());
        assert!(fx.client.send_private_message("bob", "psst", true));

        let (topic, payload) = fx.client.broker.publishes.last().cloned().unwrap();
        assert_eq!(topic, private_topic("bob"));
        let envelope = Envelope::from_json(std::str::from_utf8(&payload).unwrap()).unwrap();
        assert!(envelope.encrypted);
        assert_eq!(envelope.from, "alice");

        // the peer can open it
        let bob_recv = sok::recv_key(&master, "bob").unwrap();
        assert_eq!(envelope.open(Some(&bob_recv)).unwrap(), "psst");
    }

    #[test]
    fn end_session_clears_subscriptions_and_state() {
        let mut fx = fixture("alice");
        assert!(fx.client.start_session());
        assert!(fx.client.subscribe("a/b"));

        fx.client.end_session();
        assert!(!fx.client.is_session_started());
        assert!(fx.client.subscriptions.is_empty());
        assert!(!fx.client.subscribe("a/b"));
    }

    #[test]
    fn initial_connect_failure_keeps_session_retryable() {
        let mut fx = fixture("alice");
        fx.client.broker.fail_connect = true;
        assert!(!fx.client.start_session());
        assert_eq!(fx.client.state, State::Initial);

        fx.client.broker.fail_connect = false;
        assert!(fx.client.subscribe("a/b"));
        assert_eq!(fx.client.state, State::Connected);
    }

    #[test]
    fn auth_failure_keeps_initial_state() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/auth/pass1")
            .with_status(500)
            .with_body("server exploded")
            .create();

        let mut conf = Config::new(server.url(), "broker.local".into(), test_identity("alice"));
        let events = Rc::new(RefCell::new(Events::default()));
        conf.set_event_listener(Box::new(Recorder(events.clone())));
        let mut client = Client::with_broker(conf, FakeBroker::default()).unwrap();

        assert!(!client.start_session());
        assert_eq!(client.state, State::Initial);
        let events = events.borrow();
        assert_eq!(events.authenticated, 0);
        assert!(events.errors.iter().any(|e| e.contains("500")));
    }
}
