//! pinmesh demo client: authenticate, connect, then subscribe, publish,
//! or exchange private messages, printing everything that happens.

use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pm_client::{Client, Config, EventListener};
use pm_proto::Identity;

#[derive(Parser)]
#[command(name = "pinmesh", about = "Authenticated end-to-end-secured IoT messaging client")]
struct Args {
    /// M-Pin Full authentication server URL
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    auth_server_url: String,

    /// Identity JSON file
    #[arg(long, default_value = "identity.json")]
    identity_file: PathBuf,

    /// Address of the MQTT TLS broker
    #[arg(long, default_value = "127.0.0.1:8443")]
    broker_addr: String,

    /// MQTT command timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    command_timeout_ms: u64,

    /// Publish/subscribe with QoS2 when true, QoS1 otherwise
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    use_qos2: bool,

    /// Request a persistent MQTT session when connecting
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    use_persistent_session: bool,

    /// Force QoS1 and non-persistent sessions (AWS IoT compatibility)
    #[arg(long, default_value_t = false)]
    aws_iot_compliance: bool,

    /// MQTT topic to subscribe and continuously listen to
    #[arg(long)]
    subscribe_to_topic: Option<String>,

    /// MQTT topic to publish a message to
    #[arg(long)]
    publish_to_topic: Option<String>,

    /// Message to publish; read from stdin when empty
    #[arg(long)]
    publish_message: Option<String>,

    /// Accept private messages (decrypted when sokRecvKey is present)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    listen_for_pms: bool,

    /// Send the publish message as a private message to this user
    /// (encrypted when sokSendKey is present)
    #[arg(long)]
    send_pm_to: Option<String>,
}

struct PrintListener {
    auth_server_url: String,
    broker_addr: String,
    identity_file: PathBuf,
}

impl EventListener for PrintListener {
    fn on_authenticated(&mut self) {
        println!("Authenticated to {}", self.auth_server_url);
    }

    fn on_identity_changed(&mut self, new_identity: &Identity) {
        println!(" * Identity renewed by the auth server");
        match new_identity
            .to_json()
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(&self.identity_file, json).map_err(|e| e.to_string()))
        {
            Ok(()) => println!(" * Saved renewed identity to {}", self.identity_file.display()),
            Err(e) => println!("WARNING: failed to persist renewed identity: {e}"),
        }
    }

    fn on_connected(&mut self) {
        println!("Connected to {}", self.broker_addr);
    }

    fn on_connection_lost(&mut self, error: &str) {
        println!("Connection lost: {error}");
        println!(" * Reconnecting...");
    }

    fn on_error(&mut self, error: &str) {
        println!("ERROR: {error}");
    }

    fn on_message_arrived(&mut self, topic: &str, payload: &[u8]) {
        println!(
            " - Incoming message (from {topic}): '{}'",
            String::from_utf8_lossy(payload)
        );
    }

    fn on_private_message_arrived(&mut self, user_id_from: &str, payload: &str) {
        println!(" - Incoming private message (from {user_id_from}): '{payload}'");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let mut args = Args::parse();

    if args.subscribe_to_topic.is_none()
        && args.publish_to_topic.is_none()
        && args.send_pm_to.is_none()
        && !args.listen_for_pms
    {
        bail!(
            "at least one of --subscribe-to-topic, --publish-to-topic, --send-pm-to or \
             --listen-for-pms must be given"
        );
    }

    if args.aws_iot_compliance {
        println!("Forcing AWS IoT compliance");
        args.use_qos2 = false;
        args.use_persistent_session = false;
    }

    let raw = fs::read_to_string(&args.identity_file).with_context(|| {
        format!("failed to read identity file {}", args.identity_file.display())
    })?;
    let identity = Identity::from_json(&raw).with_context(|| {
        format!("failed to parse identity file {}", args.identity_file.display())
    })?;
    let can_encrypt = identity.sok_send_key.is_some();

    let mut publish_message = args.publish_message.unwrap_or_default();
    if (args.publish_to_topic.is_some() || args.send_pm_to.is_some()) && publish_message.is_empty()
    {
        println!("Enter message to publish:");
        io::stdin()
            .lock()
            .read_line(&mut publish_message)
            .context("failed to read message from stdin")?;
        publish_message = publish_message.trim_end_matches(['\r', '\n']).to_owned();
    }

    let mut conf = Config::new(args.auth_server_url.clone(), args.broker_addr.clone(), identity);
    conf.command_timeout_ms = args.command_timeout_ms;
    conf.use_qos2 = args.use_qos2;
    conf.use_persistent_session = args.use_persistent_session;
    conf.set_event_listener(Box::new(PrintListener {
        auth_server_url: args.auth_server_url,
        broker_addr: args.broker_addr,
        identity_file: args.identity_file,
    }));

    let mut client = Client::new(conf)?;
    client.start_session();

    if let Some(ref topic) = args.publish_to_topic {
        let mut published = false;
        while !published {
            published = client.publish(topic, publish_message.as_bytes());
            client.run_message_loop(if published { 100 } else { 1000 });
        }
        println!(" * Published message '{publish_message}' to {topic}");
    }

    if let Some(ref peer) = args.send_pm_to {
        let mut sent = false;
        while !sent {
            sent = client.send_private_message(peer, &publish_message, can_encrypt);
            client.run_message_loop(if sent { 100 } else { 1000 });
        }
        println!(
            " * Sent private message '{publish_message}' (encrypted={can_encrypt}) to {peer}"
        );
    }

    if args.subscribe_to_topic.is_some() || args.listen_for_pms {
        let mut subscribed = args.subscribe_to_topic.is_none();
        let mut listening = !args.listen_for_pms;

        loop {
            if !subscribed {
                let topic = args.subscribe_to_topic.as_deref().unwrap_or_default();
                if client.subscribe(topic) {
                    subscribed = true;
                    println!("Subscribed to topic {topic}");
                }
            }

            if !listening && client.listen_for_private_messages() {
                listening = true;
                println!("Started listening for private messages");
            }

            client.run_message_loop(1000);
        }
    }

    client.end_session();
    Ok(())
}
