//! End-to-end Binding exchanges over loopback UDP.

use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::Duration;

use stunt::{client, Class, ClientConfig, MessageBuilder, Method, Server, StunMessage};

pub fn init_log() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init();
}

/// Spawn a server on an ephemeral loopback port, returning its address.
fn spawn_server(configure: impl FnOnce(&mut stunt::Endpoint)) -> SocketAddr {
    let mut server = Server::bind(("127.0.0.1", 0)).expect("bind server");
    configure(server.endpoint_mut());
    let addr = server.local_addr().expect("server addr");
    thread::spawn(move || server.run());
    addr
}

#[test]
fn binding_exchange() {
    init_log();

    let addr = spawn_server(|_| {});

    let config = ClientConfig {
        local_address: Some("127.0.0.1".parse().unwrap()),
        ..Default::default()
    };
    let reply = client::request(&format!("stun:{addr}"), config).expect("binding reply");

    let reflexive = reply.reflexive.expect("a reflexive address");
    assert_eq!(reflexive.ip(), addr.ip());
    assert_ne!(reflexive.port(), 0);
    assert!(reply.error.is_none());
    assert!(reply.server_software.unwrap().starts_with("stunt/"));
}

#[test]
fn binding_exchange_with_integrity() {
    init_log();

    const KEY: &[u8] = b"VOkJxbRl1RmTxUk/WvJxBt";

    let addr = spawn_server(|endpoint| {
        endpoint.on(Method::Binding, |req, peer, reply| {
            // Requests must carry a valid signature to be served.
            req.verify_integrity(KEY)?;
            reply.add_xor_mapped_address(peer)?;
            reply.add_message_integrity(KEY)?;
            reply.add_fingerprint()
        });
    });

    let config = ClientConfig {
        key: Some(KEY.to_vec()),
        local_address: Some("127.0.0.1".parse().unwrap()),
        ..Default::default()
    };
    let reply = client::request(&addr.to_string(), config).expect("signed binding reply");

    assert!(reply.reflexive.is_some());
}

#[test]
fn unknown_required_attribute_gets_420_on_the_wire() {
    init_log();

    let addr = spawn_server(|_| {});

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let mut b = MessageBuilder::request(Method::Binding);
    b.add_raw(0x0042, &[1, 2, 3, 4]).unwrap();
    let req = b.to_bytes().unwrap();

    socket.send_to(&req, addr).unwrap();

    let mut buf = [0_u8; 1500];
    let (n, _) = socket.recv_from(&mut buf).unwrap();
    let parsed = StunMessage::parse(&buf[..n]).unwrap();

    assert_eq!(parsed.class(), Class::Failure);
    assert_eq!(parsed.trans_id(), b.trans_id());
    assert_eq!(parsed.error_code(), Some((420, "Unknown Attribute")));
    assert_eq!(parsed.unknown_attributes(), Some(vec![0x0042]));
}

#[test]
fn indications_are_not_answered() {
    init_log();

    let addr = spawn_server(|_| {});

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();

    let mut b = MessageBuilder::new();
    b.set_type(Method::Binding, Class::Indication);
    let bytes = b.to_bytes().unwrap();

    socket.send_to(&bytes, addr).unwrap();

    let mut buf = [0_u8; 1500];
    assert!(socket.recv_from(&mut buf).is_err());
}
