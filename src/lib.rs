//! STUN message codec, transaction engine, client and server.
//!
//! The codec maps byte slices to borrowed [`StunMessage`] views and builds
//! outgoing messages through the owned [`MessageBuilder`]. Nothing in the
//! codec or the [`Transactions`] engine opens a socket; the [`client`] and
//! [`server`] modules wire them to UDP.

#[macro_use]
extern crate tracing;

use std::io;

use thiserror::Error;

mod octets;

pub mod attr;

mod message;
pub use message::{Class, MessageBuilder, Method, StunMessage, TransId, MAGIC};

mod integrity;

mod mux;
pub use mux::is_stun;

mod trans;
pub use trans::{TransactionConfig, TransactionEvent, Transactions, Transmit};

pub mod client;
pub use client::{BindingReply, CancelToken, ClientConfig};

pub mod server;
pub use server::{Endpoint, Server};

/// Max UDP datagram size we expect to produce.
pub const DATAGRAM_MTU: usize = 1500;

/// Size of receive buffers. Larger than [`DATAGRAM_MTU`] so we notice
/// over-long traffic instead of silently truncating it.
pub(crate) const DATAGRAM_MAX_PACKET_SIZE: usize = 2000;

/// Possible errors when handling STUN messages.
#[derive(Debug, Error)]
pub enum StunError {
    /// The buffer ended before the message or an attribute did.
    #[error("truncated message: {0}")]
    TruncatedMessage(&'static str),

    /// A modern message was required but the magic cookie did not match.
    #[error("magic cookie mismatch")]
    BadMagicCookie,

    /// An attribute length field disagrees with its value semantics.
    #[error("bad attribute length: {0}")]
    BadAttributeLength(String),

    /// The attribute type is already present in the message.
    #[error("attribute 0x{0:04x} already exists")]
    DuplicateAttribute(u16),

    /// Comprehension-required attributes we do not understand.
    #[error("unknown comprehension-required attributes: {0:04x?}")]
    UnknownComprehensionRequiredAttribute(Vec<u16>),

    /// MESSAGE-INTEGRITY missing or not matching the given key.
    #[error("message integrity mismatch")]
    IntegrityMismatch,

    /// FINGERPRINT missing or not matching the message bytes.
    #[error("fingerprint mismatch")]
    FingerprintMismatch,

    /// Transaction ids are 12 bytes, or 16 in the legacy format.
    #[error("invalid transaction id length: {0}")]
    InvalidTransactionId(usize),

    /// The attribute is not allowed on this message type.
    #[error("context violation: {0}")]
    ContextViolation(&'static str),

    /// A value is outside its allowed domain.
    #[error("value out of range: {0}")]
    ValueOutOfRange(&'static str),

    /// The message type must be set before encoding.
    #[error("message type not set")]
    TypeNotSet,

    /// The retransmission schedule ran out without a response.
    #[error("transaction timed out")]
    Timeout,

    /// The caller abandoned the transaction.
    #[error("transaction cancelled")]
    Cancelled,

    /// Functionality outside the scope of this crate.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// A STUN message could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// An IO error occurred while sending or receiving.
    #[error("io: {0}")]
    Io(#[from] io::Error),
}
