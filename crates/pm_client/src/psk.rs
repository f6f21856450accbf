//! TLS-PSK transport to the broker.
//!
//! The handshake is pinned to TLS 1.2 PSK ciphersuites; there are no
//! certificates on either side. PSK = the M-Pin session key, PSK
//! identity = the hex client-ID hash, so the broker can look the key up
//! against the auth server's records.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use openssl::ssl::{Ssl, SslContext, SslMethod, SslStream, SslVersion};
use tracing::debug;

use crate::error::ClientError;

const PSK_CIPHERS: &str = "PSK-AES128-GCM-SHA256:PSK-AES256-GCM-SHA384:PSK-AES128-CBC-SHA256";

pub(crate) fn connect(
    addr: &str,
    psk: &[u8],
    psk_identity: &str,
    timeout: Duration,
) -> Result<SslStream<TcpStream>, ClientError> {
    let broker = |msg: String| ClientError::Broker(msg);

    let mut builder = SslContext::builder(SslMethod::tls_client())
        .map_err(|e| broker(format!("TLS context init failed: {e}")))?;
    builder
        .set_min_proto_version(Some(SslVersion::TLS1_2))
        .map_err(|e| broker(format!("TLS version pin failed: {e}")))?;
    builder
        .set_max_proto_version(Some(SslVersion::TLS1_2))
        .map_err(|e| broker(format!("TLS version pin failed: {e}")))?;
    builder
        .set_cipher_list(PSK_CIPHERS)
        .map_err(|e| broker(format!("no PSK ciphersuites available: {e}")))?;

    let key = psk.to_vec();
    let identity = psk_identity.as_bytes().to_vec();
    builder.set_psk_client_callback(move |_ssl, _hint, identity_buf, psk_buf| {
        // identity is written as a NUL-terminated C string
        if identity.len() + 1 > identity_buf.len() || key.len() > psk_buf.len() {
            return Ok(0);
        }
        identity_buf[..identity.len()].copy_from_slice(&identity);
        identity_buf[identity.len()] = 0;
        psk_buf[..key.len()].copy_from_slice(&key);
        Ok(key.len())
    });
    let ctx = builder.build();

    let socket_addr = addr
        .to_socket_addrs()
        .map_err(|e| broker(format!("cannot resolve broker address {addr}: {e}")))?
        .next()
        .ok_or_else(|| broker(format!("broker address {addr} resolved to nothing")))?;

    let tcp = TcpStream::connect_timeout(&socket_addr, timeout)
        .map_err(|e| broker(format!("Failed to connect to {addr}: {e}")))?;
    tcp.set_read_timeout(Some(timeout))
        .and_then(|_| tcp.set_write_timeout(Some(timeout)))
        .map_err(|e| broker(format!("socket timeout setup failed: {e}")))?;
    tcp.set_nodelay(true).ok();

    let ssl = Ssl::new(&ctx).map_err(|e| broker(format!("TLS session init failed: {e}")))?;
    let stream = ssl
        .connect(tcp)
        .map_err(|e| broker(format!("PSK-TLS handshake with {addr} failed: {e}")))?;

    debug!(addr, "PSK-TLS link established");
    Ok(stream)
}
