//! Synchronous MQTT 3.1.1 adapter over the PSK-TLS stream.
//!
//! Packet encoding comes from rumqttc's v4 codec; this module owns the
//! socket, the packet-ID counter, and the inbound QoS handshakes, and
//! serialises every command: SUBSCRIBE/UNSUBSCRIBE/PUBLISH block until
//! the matching ack (or the command timeout). PUBLISHes that arrive
//! while waiting are queued and drained by the next `run_loop`.
//!
//! First connect in persistent-session mode is a double CONNECT:
//! clean-session to flush server-side state that some brokers revive
//! wrongly, then a persistent CONNECT that starts the real session.
//! Reconnects skip the sweep so the persistent session survives.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use openssl::ssl::SslStream;
use rumqttc::mqttbytes::{self, v4, QoS};
use tracing::{debug, warn};

use crate::config::DEFAULT_COMMAND_TIMEOUT_MS;
use crate::error::ClientError;
use crate::psk;

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const MAX_PACKET_SIZE: usize = 256 * 1024;
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerQos {
    AtLeastOnce,
    ExactlyOnce,
}

impl BrokerQos {
    fn to_mqtt(self) -> QoS {
        match self {
            BrokerQos::AtLeastOnce => QoS::AtLeastOnce,
            BrokerQos::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub addr: String,
    pub client_id: String,
    pub qos: BrokerQos,
    pub persistent_session: bool,
    pub command_timeout: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            addr: String::new(),
            client_id: String::new(),
            qos: BrokerQos::ExactlyOnce,
            persistent_session: true,
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }
}

/// Broker operations the session layer depends on. One real
/// implementation; tests substitute a scripted one.
pub trait BrokerLink {
    fn configure(&mut self, settings: BrokerSettings);
    fn set_psk(&mut self, psk: &[u8], identity_hex: &str);
    fn connect(&mut self) -> Result<(), ClientError>;
    fn reconnect(&mut self) -> Result<(), ClientError>;
    fn disconnect(&mut self);
    fn is_connected(&mut self) -> bool;
    fn session_present(&self) -> bool;
    fn subscribe(&mut self, topic: &str) -> Result<(), ClientError>;
    fn unsubscribe(&mut self, topic: &str) -> Result<(), ClientError>;
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ClientError>;
    fn run_loop(&mut self, timeout: Duration) -> Result<Vec<(String, Vec<u8>)>, ClientError>;
    fn last_error(&self) -> String;
}

struct Link {
    stream: SslStream<TcpStream>,
    read_buf: BytesMut,
    last_write: Instant,
}

impl Link {
    fn fill(&mut self, remaining: Duration) -> std::io::Result<usize> {
        self.stream.get_ref().set_read_timeout(Some(remaining))?;
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.stream.read(&mut chunk)?;
        self.read_buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }
}

pub struct BrokerClient {
    settings: BrokerSettings,
    psk: Option<(Vec<u8>, String)>,
    link: Option<Link>,
    mqtt_connected: bool,
    session_present: bool,
    pkid_counter: u16,
    inbound: VecDeque<(String, Vec<u8>)>,
    inflight_qos2: HashMap<u16, (String, Vec<u8>)>,
    last_error: String,
}

impl BrokerClient {
    pub fn new() -> Self {
        Self {
            settings: BrokerSettings::default(),
            psk: None,
            link: None,
            mqtt_connected: false,
            session_present: false,
            pkid_counter: 0,
            inbound: VecDeque::new(),
            inflight_qos2: HashMap::new(),
            last_error: String::new(),
        }
    }

    fn fail(&mut self, msg: &str) -> ClientError {
        self.last_error = msg.to_owned();
        ClientError::Broker(msg.to_owned())
    }

    fn teardown(&mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = link.stream.shutdown();
        }
        self.mqtt_connected = false;
        self.session_present = false;
        self.inflight_qos2.clear();
        self.inbound.clear();
    }

    fn next_pkid(&mut self) -> u16 {
        self.pkid_counter = if self.pkid_counter == u16::MAX {
            1
        } else {
            self.pkid_counter + 1
        };
        self.pkid_counter
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<(), ClientError> {
        let result = match self.link.as_mut() {
            Some(link) => {
                let io = link.stream.write_all(buf).and_then(|_| link.stream.flush());
                if io.is_ok() {
                    link.last_write = Instant::now();
                }
                io
            }
            None => return Err(self.fail("write on closed broker link")),
        };
        result.map_err(|e| {
            self.teardown();
            self.fail(&format!("broker write failed: {e}"))
        })
    }

    fn encode<F>(&mut self, what: &str, write: F) -> Result<(), ClientError>
    where
        F: FnOnce(&mut BytesMut) -> Result<usize, mqttbytes::Error>,
    {
        let mut buf = BytesMut::new();
        write(&mut buf).map_err(|e| ClientError::Broker(format!("{what} encode failed: {e}")))?;
        self.write_bytes(&buf)
    }

    /// Try to parse one packet out of the read buffer.
    fn parse_buffered(&mut self) -> Result<Option<v4::Packet>, ClientError> {
        let parse = match self.link.as_mut() {
            Some(link) => v4::read(&mut link.read_buf, MAX_PACKET_SIZE),
            None => return Err(self.fail("read on closed broker link")),
        };
        match parse {
            Ok(packet) => Ok(Some(packet)),
            Err(mqttbytes::Error::InsufficientBytes(_)) => Ok(None),
            Err(e) => {
                self.teardown();
                Err(self.fail(&format!("broker sent a malformed packet: {e}")))
            }
        }
    }

    /// Pull more bytes off the wire. Returns false on a read timeout.
    fn fill(&mut self, remaining: Duration) -> Result<bool, ClientError> {
        let result = match self.link.as_mut() {
            Some(link) => link.fill(remaining),
            None => return Err(self.fail("read on closed broker link")),
        };
        match result {
            Ok(0) => {
                self.teardown();
                Err(self.fail("broker closed the connection"))
            }
            Ok(_) => Ok(true),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Ok(false)
            }
            Err(e) => {
                self.teardown();
                Err(self.fail(&format!("broker read failed: {e}")))
            }
        }
    }

    /// Read one packet, waiting until `deadline`. `None` on timeout.
    fn read_packet(&mut self, deadline: Instant) -> Result<Option<v4::Packet>, ClientError> {
        loop {
            if let Some(packet) = self.parse_buffered()? {
                return Ok(Some(packet));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if !self.fill(deadline - now)? {
                return Ok(None);
            }
        }
    }

    /// Inbound traffic that is not the ack currently being waited for.
    fn handle_async(&mut self, packet: v4::Packet) -> Result<(), ClientError> {
        match packet {
            v4::Packet::Publish(publish) => self.accept_publish(publish),
            v4::Packet::PubRel(pubrel) => {
                let released = self.inflight_qos2.remove(&pubrel.pkid);
                self.encode("PUBCOMP", |buf| v4::PubComp::new(pubrel.pkid).write(buf))?;
                if let Some(message) = released {
                    self.inbound.push_back(message);
                }
                Ok(())
            }
            v4::Packet::PingResp => Ok(()),
            other => {
                // stray ack after a timed-out command; nothing to pair it with
                debug!(?other, "dropping unexpected broker packet");
                Ok(())
            }
        }
    }

    fn accept_publish(&mut self, publish: v4::Publish) -> Result<(), ClientError> {
        let topic = publish.topic.clone();
        let payload = publish.payload.to_vec();
        match publish.qos {
            QoS::AtMostOnce => self.inbound.push_back((topic, payload)),
            QoS::AtLeastOnce => {
                self.encode("PUBACK", |buf| v4::PubAck::new(publish.pkid).write(buf))?;
                self.inbound.push_back((topic, payload));
            }
            QoS::ExactlyOnce => {
                self.encode("PUBREC", |buf| v4::PubRec::new(publish.pkid).write(buf))?;
                self.inflight_qos2.insert(publish.pkid, (topic, payload));
            }
        }
        Ok(())
    }

    /// Wait for a specific ack within the command timeout, servicing
    /// everything else that arrives meanwhile.
    fn wait_for<F>(&mut self, what: &str, matcher: F) -> Result<v4::Packet, ClientError>
    where
        F: Fn(&v4::Packet) -> bool,
    {
        let deadline = Instant::now() + self.settings.command_timeout;
        loop {
            match self.read_packet(deadline)? {
                Some(packet) if matcher(&packet) => return Ok(packet),
                Some(packet) => self.handle_async(packet)?,
                None => return Err(self.fail(&format!("timed out waiting for {what}"))),
            }
        }
    }

    fn connect_once(&mut self, clean_session: bool) -> Result<(), ClientError> {
        if self.is_connected() {
            return Ok(());
        }

        let (key, identity) = match self.psk.clone() {
            Some(psk) => psk,
            None => return Err(self.fail("no PSK configured for broker connection")),
        };
        let stream = match psk::connect(
            &self.settings.addr,
            &key,
            &identity,
            self.settings.command_timeout,
        ) {
            Ok(stream) => stream,
            Err(e) => {
                self.last_error = e.to_string();
                return Err(e);
            }
        };
        self.link = Some(Link {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            last_write: Instant::now(),
        });

        let mut connect = v4::Connect::new(self.settings.client_id.clone());
        connect.clean_session = clean_session;
        connect.keep_alive = KEEP_ALIVE.as_secs() as u16;
        if let Err(e) = self.encode("CONNECT", |buf| connect.write(buf)) {
            self.teardown();
            return Err(e);
        }

        let ack = match self.wait_for("CONNACK", |p| matches!(p, v4::Packet::ConnAck(_))) {
            Ok(v4::Packet::ConnAck(ack)) => ack,
            Ok(_) => {
                self.teardown();
                return Err(self.fail("unexpected packet while awaiting CONNACK"));
            }
            // a timeout here is connection-level: the link is unusable
            Err(e) => {
                self.teardown();
                return Err(e);
            }
        };
        if ack.code != v4::ConnectReturnCode::Success {
            self.teardown();
            return Err(self.fail(&format!("broker refused connection: {:?}", ack.code)));
        }

        self.mqtt_connected = true;
        self.session_present = ack.session_present;
        self.last_error.clear();
        debug!(
            clean_session,
            session_present = ack.session_present,
            "broker connected"
        );
        Ok(())
    }

    /// Name of the negotiated PSK ciphersuite, for diagnostics.
    pub fn ciphersuite(&self) -> Option<String> {
        self.link
            .as_ref()
            .and_then(|link| link.stream.ssl().current_cipher())
            .map(|cipher| cipher.name().to_owned())
    }

    fn maybe_ping(&mut self) -> Result<(), ClientError> {
        let due = match self.link.as_ref() {
            Some(link) => link.last_write.elapsed() >= KEEP_ALIVE / 2,
            None => false,
        };
        if due {
            self.encode("PINGREQ", |buf| v4::PingReq.write(buf))?;
        }
        Ok(())
    }
}

impl Default for BrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerLink for BrokerClient {
    fn configure(&mut self, settings: BrokerSettings) {
        self.settings = settings;
    }

    fn set_psk(&mut self, psk: &[u8], identity_hex: &str) {
        self.psk = Some((psk.to_vec(), identity_hex.to_owned()));
    }

    fn connect(&mut self) -> Result<(), ClientError> {
        self.connect_once(true)?;
        if !self.settings.persistent_session {
            return Ok(());
        }
        // flush any server-side leftovers, then open the real session
        self.disconnect();
        self.connect_once(false)
    }

    fn reconnect(&mut self) -> Result<(), ClientError> {
        if self.settings.persistent_session {
            self.connect_once(false)
        } else {
            self.connect_once(true)
        }
    }

    fn disconnect(&mut self) {
        if self.mqtt_connected {
            let _ = self.encode("DISCONNECT", |buf| v4::Disconnect.write(buf));
        }
        self.teardown();
    }

    fn is_connected(&mut self) -> bool {
        match (self.link.is_some(), self.mqtt_connected) {
            (true, true) => true,
            (false, false) => false,
            // one layer died; drop the other so both agree
            _ => {
                self.teardown();
                false
            }
        }
    }

    fn session_present(&self) -> bool {
        self.session_present
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), ClientError> {
        let pkid = self.next_pkid();
        let mut subscribe = v4::Subscribe::new(topic, self.settings.qos.to_mqtt());
        subscribe.pkid = pkid;
        self.encode("SUBSCRIBE", |buf| subscribe.write(buf))?;

        match self.wait_for("SUBACK", move |p| {
            matches!(p, v4::Packet::SubAck(ack) if ack.pkid == pkid)
        })? {
            v4::Packet::SubAck(ack) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, v4::SubscribeReasonCode::Failure))
                {
                    warn!(topic, "broker rejected subscription");
                    return Err(self.fail(&format!("Failed to subscribe to {topic} topic")));
                }
                Ok(())
            }
            _ => Err(self.fail("unexpected packet while awaiting SUBACK")),
        }
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), ClientError> {
        let pkid = self.next_pkid();
        let mut unsubscribe = v4::Unsubscribe::new(topic);
        unsubscribe.pkid = pkid;
        self.encode("UNSUBSCRIBE", |buf| unsubscribe.write(buf))?;

        self.wait_for("UNSUBACK", move |p| {
            matches!(p, v4::Packet::UnsubAck(ack) if ack.pkid == pkid)
        })?;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ClientError> {
        let pkid = self.next_pkid();
        let mut publish = v4::Publish::new(topic, self.settings.qos.to_mqtt(), payload.to_vec());
        publish.pkid = pkid;
        self.encode("PUBLISH", |buf| publish.write(buf))?;

        match self.settings.qos {
            BrokerQos::AtLeastOnce => {
                self.wait_for("PUBACK", move |p| {
                    matches!(p, v4::Packet::PubAck(ack) if ack.pkid == pkid)
                })?;
            }
            BrokerQos::ExactlyOnce => {
                self.wait_for("PUBREC", move |p| {
                    matches!(p, v4::Packet::PubRec(ack) if ack.pkid == pkid)
                })?;
                self.encode("PUBREL", |buf| v4::PubRel::new(pkid).write(buf))?;
                self.wait_for("PUBCOMP", move |p| {
                    matches!(p, v4::Packet::PubComp(ack) if ack.pkid == pkid)
                })?;
            }
        }
        Ok(())
    }

    fn run_loop(&mut self, timeout: Duration) -> Result<Vec<(String, Vec<u8>)>, ClientError> {
        let deadline = Instant::now() + timeout;
        self.maybe_ping()?;
        while let Some(packet) = self.read_packet(deadline)? {
            self.handle_async(packet)?;
            if Instant::now() >= deadline {
                break;
            }
        }
        Ok(self.inbound.drain(..).collect())
    }

    fn last_error(&self) -> String {
        self.last_error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkid_counter_skips_zero_on_wrap() {
        let mut broker = BrokerClient::new();
        broker.pkid_counter = u16::MAX - 1;
        assert_eq!(broker.next_pkid(), u16::MAX);
        assert_eq!(broker.next_pkid(), 1);
    }

    #[test]
    fn qos_mapping() {
        assert_eq!(BrokerQos::AtLeastOnce.to_mqtt(), QoS::AtLeastOnce);
        assert_eq!(BrokerQos::ExactlyOnce.to_mqtt(), QoS::ExactlyOnce);
    }

    #[test]
    fn half_dead_connection_tears_down_fully() {
        let mut broker = BrokerClient::new();
        // MQTT layer believes it is connected but the TLS link is gone
        broker.mqtt_connected = true;
        broker.session_present = true;
        assert!(!broker.is_connected());
        assert!(!broker.mqtt_connected);
        assert!(!broker.session_present());
    }

    #[test]
    fn operations_on_closed_link_fail_with_broker_error() {
        let mut broker = BrokerClient::new();
        broker.settings.command_timeout = Duration::from_millis(10);
        let err = broker.subscribe("a/b").unwrap_err();
        assert!(matches!(err, ClientError::Broker(_)));
        assert!(!broker.last_error().is_empty());
    }

    #[test]
    fn connect_without_psk_is_refused() {
        let mut broker = BrokerClient::new();
        let err = broker.connect().unwrap_err();
        assert!(matches!(err, ClientError::Broker(_)));
        assert!(broker.last_error().contains("PSK"));
    }

    #[test]
    fn settings_default_matches_wire_defaults() {
        let settings = BrokerSettings::default();
        assert_eq!(settings.qos, BrokerQos::ExactlyOnce);
        assert!(settings.persistent_session);
        assert_eq!(
            settings.command_timeout,
            Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS)
        );
    }
}
