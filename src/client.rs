//! Blocking UDP client for STUN Binding requests.
//!
//! [`request`] builds the request, drives the [`Transactions`] engine over a
//! locally bound socket and returns the server's view of our address.

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::message::{Class, MessageBuilder, Method, StunMessage};
use crate::trans::{TransactionConfig, TransactionEvent, Transactions};
use crate::{StunError, DATAGRAM_MAX_PACKET_SIZE};

/// The well-known STUN port.
pub const DEFAULT_PORT: u16 = 3478;

/// How often the drive loop wakes up to poll the cancellation signal.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Cooperative cancellation for a running [`request`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Options for [`request`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// SOFTWARE attribute value. `None` omits the attribute.
    pub software: Option<String>,
    /// Local address to bind. Defaults to the unspecified address of the
    /// server's family.
    pub local_address: Option<IpAddr>,
    /// Local port to bind. Defaults to an ephemeral one.
    pub local_port: Option<u16>,
    /// TLS transport. Not supported; requesting it fails.
    pub tls: bool,
    /// Retransmission schedule.
    pub timing: TransactionConfig,
    /// Key for MESSAGE-INTEGRITY on the request, and for verifying it on
    /// the response.
    pub key: Option<Vec<u8>>,
    /// Cancellation signal polled between suspension points.
    pub cancel: Option<CancelToken>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            software: Some(concat!("stunt/", env!("CARGO_PKG_VERSION")).to_string()),
            local_address: None,
            local_port: None,
            tls: false,
            timing: TransactionConfig::default(),
            key: None,
            cancel: None,
        }
    }
}

/// What a Binding transaction resolved to.
#[derive(Debug, Clone)]
pub struct BindingReply {
    /// Our reflexive transport address, on a success response.
    pub reflexive: Option<SocketAddr>,
    /// Code and reason, on an error response.
    pub error: Option<(u16, String)>,
    /// The server's SOFTWARE attribute.
    pub server_software: Option<String>,
}

/// Issue a Binding request to `url` and wait for the response.
///
/// `url` is `stun:host[:port]` or a bare `host[:port]`; the port defaults
/// to 3478. Resolves with the parsed response: the reflexive address from
/// XOR-MAPPED-ADDRESS (falling back to MAPPED-ADDRESS) on success, or the
/// error code on an error response.
pub fn request(url: &str, config: ClientConfig) -> Result<BindingReply, StunError> {
    if config.tls {
        return Err(StunError::Unsupported("tls transport"));
    }

    let (host, port) = parse_url(url)?;
    let server = (host.as_str(), port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| StunError::Parse(format!("no address for {host}")))?;

    let local_ip = config.local_address.unwrap_or(match server {
        SocketAddr::V4(_) => IpAddr::from([0, 0, 0, 0]),
        SocketAddr::V6(_) => IpAddr::from([0_u16; 8]),
    });
    let socket = UdpSocket::bind(SocketAddr::new(
        local_ip,
        config.local_port.unwrap_or(0),
    ))?;

    let mut builder = MessageBuilder::request(Method::Binding);
    if let Some(software) = &config.software {
        builder.add_software(software)?;
    }
    if let Some(key) = &config.key {
        builder.add_message_integrity(key)?;
    }
    builder.add_fingerprint()?;

    let packet = builder.to_bytes()?;
    let trans_id = builder.trans_id();

    let mut trans = Transactions::new(config.timing.clone());
    trans.begin(Instant::now(), server, packet, trans_id);

    info!("Binding request to {} ({})", server, url);

    let mut buf = vec![0_u8; DATAGRAM_MAX_PACKET_SIZE];
    loop {
        while let Some(t) = trans.poll_transmit() {
            socket.send_to(&t.contents, t.destination)?;
        }

        if let Some(TransactionEvent::TimedOut(_)) = trans.poll_event() {
            return Err(StunError::Timeout);
        }

        if config.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            trans.cancel(trans_id);
            return Err(StunError::Cancelled);
        }

        let Some(deadline) = trans.poll_timeout() else {
            // No pending transaction and no event means we lost the race
            // with a cancel; treat like a timeout.
            return Err(StunError::Timeout);
        };

        let now = Instant::now();
        if deadline <= now {
            trans.handle_timeout(now);
            continue;
        }

        let wait = (deadline - now).min(CANCEL_POLL);
        socket.set_read_timeout(Some(wait.max(Duration::from_millis(1))))?;

        match socket.recv_from(&mut buf) {
            Ok((n, source)) => {
                let now = Instant::now();
                if trans.handle_receive(now, source, &buf[..n]).is_some() {
                    let message = StunMessage::parse(&buf[..n])?;
                    return finish(&message, &config);
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                trans.handle_timeout(Instant::now());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn finish(message: &StunMessage, config: &ClientConfig) -> Result<BindingReply, StunError> {
    // We never send legacy requests, so a legacy response is an imposter.
    if message.is_legacy() {
        return Err(StunError::BadMagicCookie);
    }

    message.require_comprehension()?;

    if let Some(key) = &config.key {
        message.verify_integrity(key)?;
    }
    if message.has_fingerprint() {
        message.verify_fingerprint()?;
    }

    let server_software = message.software().map(String::from);

    if message.class() == Class::Failure {
        let error = message.error_code().map(|(c, r)| (c, r.to_string()));
        debug!("Binding error response: {:?}", error);
        return Ok(BindingReply {
            reflexive: None,
            error,
            server_software,
        });
    }

    let reflexive = message
        .reflexive_address()
        .ok_or_else(|| StunError::Parse("response missing mapped address".into()))?;

    debug!("Reflexive address: {}", reflexive);

    Ok(BindingReply {
        reflexive: Some(reflexive),
        error: None,
        server_software,
    })
}

fn parse_url(url: &str) -> Result<(String, u16), StunError> {
    let rest = url
        .strip_prefix("stun://")
        .or_else(|| url.strip_prefix("stun:"))
        .unwrap_or(url)
        .trim_end_matches('/');

    if rest.is_empty() {
        return Err(StunError::Parse(format!("bad STUN url: {url}")));
    }

    // Bracketed IPv6 literal, optionally with a port.
    if let Some(inner) = rest.strip_prefix('[') {
        let (host, after) = inner
            .split_once(']')
            .ok_or_else(|| StunError::Parse(format!("bad STUN url: {url}")))?;
        let port = match after.strip_prefix(':') {
            Some(p) => p
                .parse()
                .map_err(|_| StunError::Parse(format!("bad port in: {url}")))?,
            None if after.is_empty() => DEFAULT_PORT,
            None => return Err(StunError::Parse(format!("bad STUN url: {url}"))),
        };
        return Ok((host.to_string(), port));
    }

    match rest.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port = port
                .parse()
                .map_err(|_| StunError::Parse(format!("bad port in: {url}")))?;
            Ok((host.to_string(), port))
        }
        // An unbracketed IPv6 literal; let the resolver have the whole thing.
        Some(_) => Ok((rest.to_string(), DEFAULT_PORT)),
        None => Ok((rest.to_string(), DEFAULT_PORT)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn url_forms() {
        assert_eq!(
            parse_url("stun:stun.example.com").unwrap(),
            ("stun.example.com".to_string(), 3478)
        );
        assert_eq!(
            parse_url("stun://stun.example.com:19302").unwrap(),
            ("stun.example.com".to_string(), 19302)
        );
        assert_eq!(
            parse_url("198.51.100.1:3479").unwrap(),
            ("198.51.100.1".to_string(), 3479)
        );
        assert_eq!(
            parse_url("stun.example.com").unwrap(),
            ("stun.example.com".to_string(), 3478)
        );
        assert_eq!(
            parse_url("stun:[2001:db8::1]:3479").unwrap(),
            ("2001:db8::1".to_string(), 3479)
        );
        assert_eq!(
            parse_url("[2001:db8::1]").unwrap(),
            ("2001:db8::1".to_string(), 3478)
        );

        assert!(parse_url("stun:").is_err());
        assert!(parse_url("stun:host:port").is_err());
        assert!(parse_url("[2001:db8::1").is_err());
    }

    #[test]
    fn tls_is_rejected() {
        let config = ClientConfig {
            tls: true,
            ..Default::default()
        };
        let r = request("stun:localhost", config);
        assert!(matches!(r, Err(StunError::Unsupported(_))));
    }

    #[test]
    fn cancelled_before_first_retransmission() {
        let cancel = CancelToken::new();
        cancel.cancel();

        let config = ClientConfig {
            cancel: Some(cancel),
            ..Default::default()
        };

        // 127.0.0.1:9 is the discard port; nothing answers.
        let r = request("stun:127.0.0.1:9", config);
        assert!(matches!(r, Err(StunError::Cancelled)));
    }

    #[test]
    fn times_out_against_silence() {
        let config = ClientConfig {
            timing: TransactionConfig {
                initial_rto: Duration::from_millis(10),
                retries: 2,
                last_wait_factor: 2,
            },
            ..Default::default()
        };

        let start = Instant::now();
        let r = request("stun:127.0.0.1:9", config);
        assert!(matches!(r, Err(StunError::Timeout)));
        // 10ms gap plus a 20ms final wait.
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
