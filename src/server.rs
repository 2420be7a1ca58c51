//! STUN server: a sans-IO [`Endpoint`] that turns request datagrams into
//! reply datagrams, and a [`Server`] that pumps it over a UDP socket.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use crate::message::{Class, MessageBuilder, Method, StunMessage};
use crate::mux::is_stun;
use crate::{StunError, DATAGRAM_MAX_PACKET_SIZE};

/// A request handler. Receives the parsed request, the peer address and a
/// success-reply builder already correlated to the transaction. Returning
/// an error turns the reply into a 500.
pub type Handler =
    Box<dyn Fn(&StunMessage<'_>, SocketAddr, &mut MessageBuilder) -> Result<(), StunError> + Send + Sync>;

/// Answers STUN requests without owning a socket.
///
/// Parse failures and non-STUN traffic produce no reply. Binding requests
/// have a built-in answer; other methods need a registered handler.
pub struct Endpoint {
    software: Option<String>,
    handlers: Vec<(Method, Handler)>,
}

impl Endpoint {
    pub fn new() -> Self {
        Endpoint {
            software: Some(concat!("stunt/", env!("CARGO_PKG_VERSION")).to_string()),
            handlers: vec![],
        }
    }

    /// SOFTWARE attribute stamped on replies. `None` omits it.
    pub fn set_software(&mut self, software: Option<String>) {
        self.software = software;
    }

    /// Register a handler for requests of `method`, replacing any previous
    /// one. This overrides the built-in Binding behavior too.
    pub fn on<F>(&mut self, method: Method, handler: F)
    where
        F: Fn(&StunMessage<'_>, SocketAddr, &mut MessageBuilder) -> Result<(), StunError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.retain(|(m, _)| *m != method);
        self.handlers.push((method, Box::new(handler)));
    }

    /// Process one datagram, returning the reply to send back, if any.
    pub fn handle_datagram(&self, peer: SocketAddr, buf: &[u8]) -> Option<Vec<u8>> {
        if !is_stun(buf, true) {
            trace!("Not STUN, ignoring datagram from {}", peer);
            return None;
        }

        let message = match StunMessage::parse(buf) {
            Ok(v) => v,
            Err(e) => {
                debug!("Dropping unparseable datagram from {}: {}", peer, e);
                return None;
            }
        };

        // Legacy traffic is understood but never answered.
        if message.is_legacy() {
            debug!("Dropping legacy request from {}", peer);
            return None;
        }

        if message.class() != Class::Request {
            trace!("Ignoring {:?} from {}", message.class(), peer);
            return None;
        }

        let unknown = message.unknown_required();
        if !unknown.is_empty() {
            debug!(
                "Request from {} has unknown comprehension-required attributes: {:04x?}",
                peer, unknown
            );
            return self.error_reply(&message, 420, &unknown);
        }

        let handler = self
            .handlers
            .iter()
            .find(|(m, _)| *m == message.method())
            .map(|(_, h)| h);

        if let Some(handler) = handler {
            let mut reply = self.reply_to(&message, Class::Success);
            if let Err(e) = handler(&message, peer, &mut reply) {
                warn!("Handler for {:?} failed: {}", message.method(), e);
                return self.error_reply(&message, 500, &[]);
            }
            return log_encode(reply);
        }

        if message.is_binding_request() {
            let mut reply = self.reply_to(&message, Class::Success);
            reply.add_xor_mapped_address(peer).ok()?;
            return log_encode(reply);
        }

        debug!("No handler for {:?} request from {}", message.method(), peer);
        None
    }

    fn reply_to(&self, message: &StunMessage<'_>, class: Class) -> MessageBuilder {
        let mut reply = MessageBuilder::reply(message.method(), class, message.trans_id());
        if let Some(software) = &self.software {
            // The builder is empty, this cannot conflict.
            let _ = reply.add_software(software);
        }
        reply
    }

    fn error_reply(
        &self,
        message: &StunMessage<'_>,
        code: u16,
        unknown: &[u16],
    ) -> Option<Vec<u8>> {
        let mut reply = self.reply_to(message, Class::Failure);
        reply.add_error_code(code, None).ok()?;
        if !unknown.is_empty() {
            reply.add_unknown_attributes(unknown).ok()?;
        }
        log_encode(reply)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::new()
    }
}

fn log_encode(reply: MessageBuilder) -> Option<Vec<u8>> {
    match reply.to_bytes() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Failed to encode reply: {}", e);
            None
        }
    }
}

/// A UDP STUN server around an [`Endpoint`].
pub struct Server {
    socket: UdpSocket,
    endpoint: Endpoint,
}

impl Server {
    /// Bind a socket and serve with the default endpoint.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self, StunError> {
        let socket = UdpSocket::bind(addr)?;
        Ok(Server {
            socket,
            endpoint: Endpoint::new(),
        })
    }

    pub fn endpoint_mut(&mut self) -> &mut Endpoint {
        &mut self.endpoint
    }

    pub fn local_addr(&self) -> Result<SocketAddr, StunError> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve requests until the socket fails.
    pub fn run(&self) -> Result<(), StunError> {
        info!("Serving STUN on {}", self.socket.local_addr()?);

        let mut buf = vec![0_u8; DATAGRAM_MAX_PACKET_SIZE];
        loop {
            let (n, peer) = self.socket.recv_from(&mut buf)?;
            if let Some(reply) = self.endpoint.handle_datagram(peer, &buf[..n]) {
                if let Err(e) = self.socket.send_to(&reply, peer) {
                    warn!("Failed to send reply to {}: {}", peer, e);
                }
            }
        }
    }
}
