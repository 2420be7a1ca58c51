//! STUN message container: the parsed view, the builder and the wire framing.

use std::fmt;
use std::net::SocketAddr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::attr::{self, Attr, AttrValue};
use crate::octets::{pad_len, Reader};
use crate::StunError;

/// The magic cookie every modern STUN message carries after the length field.
pub const MAGIC: [u8; 4] = [0x21, 0x12, 0xA4, 0x42];

pub(crate) const HEADER_LEN: usize = 20;

/// STUN transaction ID.
///
/// Modern ids are 12 random bytes; the legacy (pre-cookie) format uses
/// 16 bytes that occupy the cookie field too. Legacy ids are parsed for
/// compatibility but never generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransId {
    Modern([u8; 12]),
    Legacy([u8; 16]),
}

impl TransId {
    /// A new random transaction id.
    pub fn new() -> Self {
        let mut t = [0_u8; 12];
        rand::thread_rng().fill_bytes(&mut t);
        TransId::Modern(t)
    }

    /// Accepts 12 bytes, or 16 bytes for the legacy format. A 16 byte id
    /// that starts with the magic cookie is really a modern one.
    pub fn from_slice(s: &[u8]) -> Result<Self, StunError> {
        match s.len() {
            12 => {
                let mut t = [0_u8; 12];
                t.copy_from_slice(s);
                Ok(TransId::Modern(t))
            }
            16 if s[..4] == MAGIC => TransId::from_slice(&s[4..]),
            16 => {
                let mut t = [0_u8; 16];
                t.copy_from_slice(s);
                Ok(TransId::Legacy(t))
            }
            n => Err(StunError::InvalidTransactionId(n)),
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, TransId::Legacy(_))
    }

    /// The 16 bytes occupying the cookie + id region of the header. This is
    /// also the XOR pad for obfuscated addresses.
    pub(crate) fn xor_pad(&self) -> [u8; 16] {
        let mut bytes = [0_u8; 16];
        match self {
            TransId::Modern(id) => {
                bytes[..4].copy_from_slice(&MAGIC);
                bytes[4..].copy_from_slice(id);
            }
            TransId::Legacy(id) => bytes.copy_from_slice(id),
        }
        bytes
    }
}

impl Default for TransId {
    fn default() -> Self {
        TransId::new()
    }
}

/// The four STUN message classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Class {
    Request,
    Indication,
    Success,
    Failure,
}

impl Class {
    fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => Class::Request,
            0b01 => Class::Indication,
            0b10 => Class::Success,
            _ => Class::Failure,
        }
    }

    fn to_bits(self) -> u16 {
        match self {
            Class::Request => 0b00,
            Class::Indication => 0b01,
            Class::Success => 0b10,
            Class::Failure => 0b11,
        }
    }

    /// Success or error response.
    pub fn is_response(&self) -> bool {
        matches!(self, Class::Success | Class::Failure)
    }
}

/// STUN methods. Binding is the one with behavior here; the TURN methods
/// are recognized so multiplexed traffic classifies cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Binding,
    Allocate,
    Refresh,
    Send,
    Data,
    CreatePermission,
    ChannelBind,
    Unknown(u16),
}

impl Method {
    fn from_bits(bits: u16) -> Self {
        match bits {
            0x001 => Method::Binding,
            0x003 => Method::Allocate,
            0x004 => Method::Refresh,
            0x006 => Method::Send,
            0x007 => Method::Data,
            0x008 => Method::CreatePermission,
            0x009 => Method::ChannelBind,
            m => Method::Unknown(m),
        }
    }

    fn to_bits(self) -> u16 {
        match self {
            Method::Binding => 0x001,
            Method::Allocate => 0x003,
            Method::Refresh => 0x004,
            Method::Send => 0x006,
            Method::Data => 0x007,
            Method::CreatePermission => 0x008,
            Method::ChannelBind => 0x009,
            Method::Unknown(m) => m & 0x0fff,
        }
    }
}

// The 14-bit message type interleaves the class bits into the method:
// |M11|M10|M9|M8|M7|C1|M6|M5|M4|C0|M3|M2|M1|M0|
fn join_typ(method: u16, class: u16) -> u16 {
    (method & 0x000f)
        | ((method & 0x0070) << 1)
        | ((method & 0x0f80) << 2)
        | ((class & 0b01) << 4)
        | ((class & 0b10) << 7)
}

fn split_typ(typ: u16) -> (u16, u16) {
    let method = (typ & 0x000f) | ((typ >> 1) & 0x0070) | ((typ >> 2) & 0x0f80);
    let class = ((typ >> 4) & 0b01) | ((typ >> 7) & 0b10);
    (method, class)
}

/// A parsed STUN message, borrowing the datagram it came from.
#[derive(Clone)]
pub struct StunMessage<'a> {
    pub(crate) method: Method,
    pub(crate) class: Class,
    pub(crate) trans_id: TransId,
    pub(crate) attrs: Vec<Attr<'a>>,
    pub(crate) buf: &'a [u8],
    /// Offset of the MESSAGE-INTEGRITY TLV within the attribute section.
    pub(crate) integrity_offset: Option<usize>,
    /// Offset of the FINGERPRINT TLV within the attribute section.
    pub(crate) fingerprint_offset: Option<usize>,
}

impl<'a> StunMessage<'a> {
    /// Parse a STUN message from a slice of bytes.
    pub fn parse(buf: &'a [u8]) -> Result<StunMessage<'a>, StunError> {
        if buf.len() < HEADER_LEN {
            return Err(StunError::TruncatedMessage("header"));
        }

        let typ = (buf[0] as u16 & 0b0011_1111) << 8 | buf[1] as u16;
        let len = ((buf[2] as usize) << 8 | buf[3] as usize) as usize;

        if len % 4 != 0 {
            return Err(StunError::BadAttributeLength(
                "message length is not a multiple of 4".into(),
            ));
        }
        if len != buf.len() - HEADER_LEN {
            return Err(StunError::TruncatedMessage("length vs datagram mismatch"));
        }

        let (method_bits, class_bits) = split_typ(typ);
        let method = Method::from_bits(method_bits);
        let class = Class::from_bits(class_bits);

        // A differing cookie means the legacy format where the id spans the
        // cookie field too.
        let trans_id = if buf[4..8] == MAGIC {
            TransId::from_slice(&buf[8..20])?
        } else {
            TransId::from_slice(&buf[4..20])?
        };

        let mut attrs = Vec::new();
        let mut integrity_offset = None;
        let mut fingerprint_offset = None;

        let mut r = Reader::new(&buf[HEADER_LEN..HEADER_LEN + len]);
        while !r.is_empty() {
            let off = r.offset();
            let typ = r.u16()?;
            let alen = r.u16()? as usize;

            if alen > r.remaining() {
                return Err(StunError::BadAttributeLength(format!(
                    "attribute 0x{typ:04x} length {alen} overruns message"
                )));
            }
            let payload = r.take(alen, "attribute value")?;
            let padding = r.take(pad_len(alen), "attribute padding")?;
            if padding.iter().any(|b| *b != 0) {
                // Accept for interop.
                warn!("Non-zero padding after attribute 0x{:04x}", typ);
            }

            // With the exception of FINGERPRINT, attributes after
            // MESSAGE-INTEGRITY are ignored. Nothing follows FINGERPRINT.
            if fingerprint_offset.is_some() {
                trace!("Ignoring attribute 0x{:04x} after FINGERPRINT", typ);
                continue;
            }
            if integrity_offset.is_some() && typ != attr::FINGERPRINT {
                trace!("Ignoring attribute 0x{:04x} after MESSAGE-INTEGRITY", typ);
                continue;
            }

            if attrs.iter().any(|a: &Attr| a.typ() == typ) {
                return Err(StunError::DuplicateAttribute(typ));
            }

            if typ == attr::MESSAGE_INTEGRITY {
                integrity_offset = Some(off);
            }
            if typ == attr::FINGERPRINT {
                fingerprint_offset = Some(off);
            }

            attrs.push(Attr::parse(typ, payload, &trans_id)?);
        }

        Ok(StunMessage {
            method,
            class,
            trans_id,
            attrs,
            buf,
            integrity_offset,
            fingerprint_offset,
        })
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn class(&self) -> Class {
        self.class
    }

    /// The transaction ID of this STUN message.
    pub fn trans_id(&self) -> TransId {
        self.trans_id
    }

    /// The bytes in the cookie position. [`MAGIC`] unless legacy.
    pub fn cookie(&self) -> [u8; 4] {
        let pad = self.trans_id.xor_pad();
        [pad[0], pad[1], pad[2], pad[3]]
    }

    pub fn is_legacy(&self) -> bool {
        self.trans_id.is_legacy()
    }

    /// Whether this STUN message is a BINDING request.
    pub fn is_binding_request(&self) -> bool {
        self.method == Method::Binding && self.class == Class::Request
    }

    /// Whether this STUN message is a successful BINDING response.
    pub fn is_successful_binding_response(&self) -> bool {
        self.method == Method::Binding && self.class == Class::Success
    }

    /// All attributes, in wire order. Attributes after MESSAGE-INTEGRITY
    /// (other than FINGERPRINT) are not included.
    pub fn attrs(&self) -> &[Attr<'a>] {
        &self.attrs
    }

    pub fn attr(&self, typ: u16) -> Option<&Attr<'a>> {
        self.attrs.iter().find(|a| a.typ() == typ)
    }

    /// Returns the value of the USERNAME attribute, if present.
    pub fn username(&self) -> Option<&'a str> {
        match self.attr(attr::USERNAME)? {
            Attr::Username(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value of the REALM attribute, if present.
    pub fn realm(&self) -> Option<&'a str> {
        match self.attr(attr::REALM)? {
            Attr::Realm(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value of the NONCE attribute, if present.
    pub fn nonce(&self) -> Option<&'a str> {
        match self.attr(attr::NONCE)? {
            Attr::Nonce(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value of the SOFTWARE attribute, if present.
    pub fn software(&self) -> Option<&'a str> {
        match self.attr(attr::SOFTWARE)? {
            Attr::Software(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value of the XOR-MAPPED-ADDRESS attribute, if present.
    pub fn xor_mapped_address(&self) -> Option<SocketAddr> {
        match self.attr(attr::XOR_MAPPED_ADDRESS)? {
            Attr::XorMappedAddress(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value of the MAPPED-ADDRESS attribute, if present.
    pub fn mapped_address(&self) -> Option<SocketAddr> {
        match self.attr(attr::MAPPED_ADDRESS)? {
            Attr::MappedAddress(v) => Some(*v),
            _ => None,
        }
    }

    /// The reflexive transport address: XOR-MAPPED-ADDRESS, with
    /// MAPPED-ADDRESS as fallback.
    pub fn reflexive_address(&self) -> Option<SocketAddr> {
        self.xor_mapped_address().or_else(|| self.mapped_address())
    }

    /// Returns the value of the ALTERNATE-SERVER attribute, if present.
    pub fn alternate_server(&self) -> Option<SocketAddr> {
        match self.attr(attr::ALTERNATE_SERVER)? {
            Attr::AlternateServer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value of the ERROR-CODE attribute, if present.
    pub fn error_code(&self) -> Option<(u16, &'a str)> {
        match self.attr(attr::ERROR_CODE)? {
            Attr::ErrorCode(code, reason) => Some((*code, reason)),
            _ => None,
        }
    }

    /// Returns the types listed in UNKNOWN-ATTRIBUTES, if present.
    pub fn unknown_attributes(&self) -> Option<Vec<u16>> {
        self.attr(attr::UNKNOWN_ATTRIBUTES)?.unknown_types()
    }

    /// Returns the value of the PRIORITY attribute (ICE), if present.
    pub fn priority(&self) -> Option<u32> {
        match self.attr(attr::PRIORITY)? {
            Attr::Priority(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns whether the USE-CANDIDATE attribute (ICE) is present.
    pub fn use_candidate(&self) -> bool {
        self.attr(attr::USE_CANDIDATE).is_some()
    }

    /// Returns the value of the ICE-CONTROLLED attribute, if present.
    pub fn ice_controlled(&self) -> Option<u64> {
        match self.attr(attr::ICE_CONTROLLED)? {
            Attr::IceControlled(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value of the ICE-CONTROLLING attribute, if present.
    pub fn ice_controlling(&self) -> Option<u64> {
        match self.attr(attr::ICE_CONTROLLING)? {
            Attr::IceControlling(v) => Some(*v),
            _ => None,
        }
    }

    /// Comprehension-required attribute types we did not understand.
    pub fn unknown_required(&self) -> Vec<u16> {
        self.attrs
            .iter()
            .filter_map(|a| match a {
                Attr::Other(typ, _) if attr::is_comprehension_required(*typ) => Some(*typ),
                _ => None,
            })
            .collect()
    }

    /// Errors when the message carries comprehension-required attributes we
    /// do not understand.
    pub fn require_comprehension(&self) -> Result<(), StunError> {
        let unknown = self.unknown_required();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(StunError::UnknownComprehensionRequiredAttribute(unknown))
        }
    }
}

impl<'a> fmt::Debug for StunMessage<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StunMessage")
            .field("method", &self.method)
            .field("class", &self.class)
            .field("trans_id", &self.trans_id)
            .field("attrs", &self.attrs)
            .finish()
    }
}

/// Builder for outgoing STUN messages.
///
/// Attributes are kept in insertion order and each type may appear once.
/// MESSAGE-INTEGRITY seals the message against further additions except
/// FINGERPRINT, which seals it entirely.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    pub(crate) typ: Option<(Method, Class)>,
    pub(crate) trans_id: TransId,
    pub(crate) attrs: Vec<AttrValue>,
}

impl MessageBuilder {
    /// An empty message with a random transaction id and no type.
    pub fn new() -> Self {
        MessageBuilder {
            typ: None,
            trans_id: TransId::new(),
            attrs: vec![],
        }
    }

    /// A request of the given method with a random transaction id.
    pub fn request(method: Method) -> Self {
        let mut b = MessageBuilder::new();
        b.set_type(method, Class::Request);
        b
    }

    /// A reply correlated to an existing transaction.
    pub fn reply(method: Method, class: Class, trans_id: TransId) -> Self {
        MessageBuilder {
            typ: Some((method, class)),
            trans_id,
            attrs: vec![],
        }
    }

    pub fn set_type(&mut self, method: Method, class: Class) {
        self.typ = Some((method, class));
    }

    pub fn typ(&self) -> Option<(Method, Class)> {
        self.typ
    }

    /// Sets the transaction id from raw bytes; 12 or 16 bytes.
    pub fn set_transaction_id(&mut self, bytes: &[u8]) -> Result<(), StunError> {
        self.trans_id = TransId::from_slice(bytes)?;
        Ok(())
    }

    pub fn set_trans_id(&mut self, trans_id: TransId) {
        self.trans_id = trans_id;
    }

    pub fn trans_id(&self) -> TransId {
        self.trans_id
    }

    pub fn has(&self, typ: u16) -> bool {
        self.attrs.iter().any(|a| a.typ() == typ)
    }

    /// Removes the attribute of the given type, if present.
    pub fn remove(&mut self, typ: u16) -> Option<AttrValue> {
        let idx = self.attrs.iter().position(|a| a.typ() == typ)?;
        Some(self.attrs.remove(idx))
    }

    /// Uniqueness and ordering checks common to every add.
    pub(crate) fn push(&mut self, value: AttrValue) -> Result<(), StunError> {
        if self.has(value.typ()) {
            return Err(StunError::DuplicateAttribute(value.typ()));
        }
        if self.has(attr::FINGERPRINT) {
            return Err(StunError::ContextViolation(
                "no attribute may follow FINGERPRINT",
            ));
        }
        if self.has(attr::MESSAGE_INTEGRITY) && value.typ() != attr::FINGERPRINT {
            return Err(StunError::ContextViolation(
                "only FINGERPRINT may follow MESSAGE-INTEGRITY",
            ));
        }
        self.attrs.push(value);
        Ok(())
    }

    fn require_failure_class(&self, what: &'static str) -> Result<(), StunError> {
        match self.typ {
            None => Err(StunError::TypeNotSet),
            Some((_, Class::Failure)) => Ok(()),
            Some(_) => Err(StunError::ContextViolation(what)),
        }
    }

    fn require_binding_request(&self, what: &'static str) -> Result<(), StunError> {
        match self.typ {
            None => Err(StunError::TypeNotSet),
            Some((Method::Binding, Class::Request)) => Ok(()),
            Some(_) => Err(StunError::ContextViolation(what)),
        }
    }

    pub fn add_mapped_address(&mut self, addr: SocketAddr) -> Result<(), StunError> {
        self.push(AttrValue::MappedAddress(addr))
    }

    pub fn add_alternate_server(&mut self, addr: SocketAddr) -> Result<(), StunError> {
        self.push(AttrValue::AlternateServer(addr))
    }

    pub fn add_xor_mapped_address(&mut self, addr: SocketAddr) -> Result<(), StunError> {
        self.push(AttrValue::XorMappedAddress(addr))
    }

    pub fn add_username(&mut self, username: &str) -> Result<(), StunError> {
        if username.len() > attr::USERNAME_MAX_BYTES {
            return Err(StunError::ValueOutOfRange("username longer than 513 bytes"));
        }
        self.push(AttrValue::Username(username.into()))
    }

    pub fn add_realm(&mut self, realm: &str) -> Result<(), StunError> {
        self.push(AttrValue::Realm(capped_string(realm)?))
    }

    pub fn add_nonce(&mut self, nonce: &str) -> Result<(), StunError> {
        self.push(AttrValue::Nonce(capped_string(nonce)?))
    }

    pub fn add_software(&mut self, software: &str) -> Result<(), StunError> {
        self.push(AttrValue::Software(capped_string(software)?))
    }

    /// Adds ERROR-CODE. Only valid on error responses. Without a reason the
    /// default phrase for the code is used, if there is one.
    pub fn add_error_code(
        &mut self,
        code: u16,
        reason: Option<&str>,
    ) -> Result<(), StunError> {
        self.require_failure_class("ERROR-CODE requires an error response")?;
        if !(300..=699).contains(&code) {
            return Err(StunError::ValueOutOfRange("error code outside 300-699"));
        }
        let reason = match reason {
            Some(r) => capped_string(r)?,
            None => attr::default_reason(code).unwrap_or("").to_string(),
        };
        if reason.len() > attr::REASON_MAX_BYTES {
            return Err(StunError::ValueOutOfRange("reason longer than 763 bytes"));
        }
        self.push(AttrValue::ErrorCode(code, reason))
    }

    /// Adds UNKNOWN-ATTRIBUTES. Only valid on error responses.
    pub fn add_unknown_attributes(&mut self, types: &[u16]) -> Result<(), StunError> {
        self.require_failure_class("UNKNOWN-ATTRIBUTES requires an error response")?;
        self.push(AttrValue::UnknownAttributes(types.to_vec()))
    }

    pub fn add_priority(&mut self, priority: u32) -> Result<(), StunError> {
        self.require_binding_request("PRIORITY requires a Binding request")?;
        self.push(AttrValue::Priority(priority))
    }

    pub fn add_use_candidate(&mut self) -> Result<(), StunError> {
        self.require_binding_request("USE-CANDIDATE requires a Binding request")?;
        self.push(AttrValue::UseCandidate)
    }

    pub fn add_ice_controlled(&mut self, tie_breaker: u64) -> Result<(), StunError> {
        self.require_binding_request("ICE-CONTROLLED requires a Binding request")?;
        self.push(AttrValue::IceControlled(tie_breaker))
    }

    pub fn add_ice_controlling(&mut self, tie_breaker: u64) -> Result<(), StunError> {
        self.require_binding_request("ICE-CONTROLLING requires a Binding request")?;
        self.push(AttrValue::IceControlling(tie_breaker))
    }

    /// Adds an attribute of arbitrary type with a raw payload. This is how
    /// parsed unknown attributes round-trip.
    pub fn add_raw(&mut self, typ: u16, payload: &[u8]) -> Result<(), StunError> {
        if payload.len() > u16::MAX as usize {
            return Err(StunError::ValueOutOfRange("attribute payload over 65535 bytes"));
        }
        self.push(AttrValue::Other(typ, payload.to_vec()))
    }

    /// Serialize into a fresh datagram. The builder is unchanged and can be
    /// modified and serialized again.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StunError> {
        let (method, class) = self.typ.ok_or(StunError::TypeNotSet)?;

        let mut out = Vec::with_capacity(crate::DATAGRAM_MTU);

        let typ = join_typ(method.to_bits(), class.to_bits());
        out.extend_from_slice(&typ.to_be_bytes());
        out.extend_from_slice(&0_u16.to_be_bytes()); // patched below
        out.extend_from_slice(&self.trans_id.xor_pad());

        for a in &self.attrs {
            a.to_bytes(&self.trans_id, &mut out);
        }

        let attr_len = (out.len() - HEADER_LEN) as u16;
        out[2..4].copy_from_slice(&attr_len.to_be_bytes());

        Ok(out)
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        MessageBuilder::new()
    }
}

fn capped_string(s: &str) -> Result<String, StunError> {
    if s.chars().count() > attr::STRING_MAX_CHARS {
        return Err(StunError::ValueOutOfRange("string longer than 128 characters"));
    }
    Ok(s.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_binding_request_header() {
        let mut b = MessageBuilder::request(Method::Binding);
        b.set_transaction_id(&[0; 12]).unwrap();

        let bytes = b.to_bytes().unwrap();

        let mut expected = vec![0x00, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42];
        expected.extend_from_slice(&[0; 12]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn type_bits_interleave_class() {
        assert_eq!(join_typ(0x001, Class::Request.to_bits()), 0x0001);
        assert_eq!(join_typ(0x001, Class::Indication.to_bits()), 0x0011);
        assert_eq!(join_typ(0x001, Class::Success.to_bits()), 0x0101);
        assert_eq!(join_typ(0x001, Class::Failure.to_bits()), 0x0111);
        assert_eq!(join_typ(0x009, Class::Request.to_bits()), 0x0009);

        for method in [0x001_u16, 0x003, 0x004, 0x006, 0x007, 0x008, 0x009, 0xabc] {
            for class in 0..4_u16 {
                let typ = join_typ(method, class);
                assert!(typ & 0xc000 == 0);
                assert_eq!(split_typ(typ), (method, class));
            }
        }
    }

    #[test]
    fn round_trip_preserves_attributes() {
        let mut b = MessageBuilder::request(Method::Binding);
        b.add_software("stunt test").unwrap();
        b.add_priority(0x6e7f1eff).unwrap();
        b.add_ice_controlling(0x6eeec6e97d18395c).unwrap();
        b.add_use_candidate().unwrap();

        let bytes = b.to_bytes().unwrap();
        let parsed = StunMessage::parse(&bytes).unwrap();

        assert!(parsed.is_binding_request());
        assert_eq!(parsed.trans_id(), b.trans_id());
        assert_eq!(parsed.software(), Some("stunt test"));
        assert_eq!(parsed.priority(), Some(0x6e7f1eff));
        assert_eq!(parsed.ice_controlling(), Some(0x6eeec6e97d18395c));
        assert!(parsed.use_candidate());
        assert_eq!(parsed.attrs().len(), 4);
    }

    #[test]
    fn round_trip_auth_attributes() {
        let mut b = MessageBuilder::request(Method::Allocate);
        b.add_username("user:peer").unwrap();
        b.add_realm("example.org").unwrap();
        b.add_nonce("dcd98b7102dd2f0e8b11d0f600bfb0c093").unwrap();

        let bytes = b.to_bytes().unwrap();
        let parsed = StunMessage::parse(&bytes).unwrap();

        assert_eq!(parsed.method(), Method::Allocate);
        assert_eq!(parsed.class(), Class::Request);
        assert_eq!(parsed.username(), Some("user:peer"));
        assert_eq!(parsed.realm(), Some("example.org"));
        assert_eq!(
            parsed.nonce(),
            Some("dcd98b7102dd2f0e8b11d0f600bfb0c093")
        );
    }

    #[test]
    fn round_trip_address_attributes() {
        let mapped: SocketAddr = "192.0.2.1:32853".parse().unwrap();
        let alternate: SocketAddr = "[2001:db8::7]:3478".parse().unwrap();

        let mut b = MessageBuilder::reply(Method::Binding, Class::Success, TransId::new());
        b.add_mapped_address(mapped).unwrap();
        b.add_alternate_server(alternate).unwrap();

        let bytes = b.to_bytes().unwrap();
        let parsed = StunMessage::parse(&bytes).unwrap();

        assert_eq!(parsed.mapped_address(), Some(mapped));
        assert_eq!(parsed.alternate_server(), Some(alternate));
        // Without XOR-MAPPED-ADDRESS the plain one is the reflexive fallback.
        assert_eq!(parsed.xor_mapped_address(), None);
        assert_eq!(parsed.reflexive_address(), Some(mapped));
    }

    #[test]
    fn value_domains_are_enforced() {
        let mut b = MessageBuilder::request(Method::Binding);

        let long = "x".repeat(514);
        assert!(matches!(
            b.add_username(&long),
            Err(StunError::ValueOutOfRange(_))
        ));

        let long = "y".repeat(129);
        assert!(matches!(
            b.add_software(&long),
            Err(StunError::ValueOutOfRange(_))
        ));

        let mut b = MessageBuilder::reply(Method::Binding, Class::Failure, TransId::new());
        assert!(matches!(
            b.add_error_code(299, None),
            Err(StunError::ValueOutOfRange(_))
        ));
        assert!(matches!(
            b.add_error_code(700, None),
            Err(StunError::ValueOutOfRange(_))
        ));
        let long = "z".repeat(129);
        assert!(matches!(
            b.add_error_code(400, Some(&long)),
            Err(StunError::ValueOutOfRange(_))
        ));
    }

    #[test]
    fn duplicate_attribute_does_not_mutate() {
        let mut b = MessageBuilder::request(Method::Binding);
        b.add_software("app").unwrap();

        let r = b.add_software("app");
        assert!(matches!(
            r,
            Err(StunError::DuplicateAttribute(attr::SOFTWARE))
        ));

        let bytes = b.to_bytes().unwrap();
        let parsed = StunMessage::parse(&bytes).unwrap();
        let count = parsed
            .attrs()
            .iter()
            .filter(|a| a.typ() == attr::SOFTWARE)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn error_code_requires_error_response() {
        let mut b = MessageBuilder::request(Method::Binding);
        let r = b.add_error_code(400, None);
        assert!(matches!(r, Err(StunError::ContextViolation(_))));

        let mut b = MessageBuilder::reply(Method::Binding, Class::Failure, TransId::new());
        b.add_error_code(400, None).unwrap();

        let bytes = b.to_bytes().unwrap();
        let parsed = StunMessage::parse(&bytes).unwrap();
        assert_eq!(parsed.error_code(), Some((400, "Bad Request")));
    }

    #[test]
    fn ice_attributes_require_binding_request() {
        let mut b = MessageBuilder::reply(Method::Binding, Class::Success, TransId::new());
        assert!(matches!(
            b.add_ice_controlling(1),
            Err(StunError::ContextViolation(_))
        ));
        assert!(matches!(
            b.add_use_candidate(),
            Err(StunError::ContextViolation(_))
        ));

        let mut b = MessageBuilder::request(Method::Allocate);
        assert!(matches!(
            b.add_priority(1),
            Err(StunError::ContextViolation(_))
        ));
    }

    #[test]
    fn transaction_id_lengths() {
        let mut b = MessageBuilder::new();
        assert!(matches!(
            b.set_transaction_id(&[0; 11]),
            Err(StunError::InvalidTransactionId(11))
        ));
        assert!(matches!(
            b.set_transaction_id(&[0; 13]),
            Err(StunError::InvalidTransactionId(13))
        ));

        b.set_transaction_id(&[1; 12]).unwrap();
        assert!(!b.trans_id().is_legacy());

        // 16 bytes starting with the cookie is the modern id in disguise.
        let mut with_cookie = MAGIC.to_vec();
        with_cookie.extend_from_slice(&[2; 12]);
        b.set_transaction_id(&with_cookie).unwrap();
        assert_eq!(b.trans_id(), TransId::Modern([2; 12]));

        b.set_transaction_id(&[3; 16]).unwrap();
        assert!(b.trans_id().is_legacy());
    }

    #[test]
    fn legacy_message_parses_read_only() {
        let mut b = MessageBuilder::request(Method::Binding);
        b.set_transaction_id(&[9; 16]).unwrap();
        let addr: SocketAddr = "10.0.0.1:9999".parse().unwrap();
        b.add_xor_mapped_address(addr).unwrap();

        let bytes = b.to_bytes().unwrap();
        assert_eq!(&bytes[4..20], &[9; 16]);

        let parsed = StunMessage::parse(&bytes).unwrap();
        assert!(parsed.is_legacy());
        assert_eq!(parsed.trans_id(), TransId::Legacy([9; 16]));
        assert_eq!(parsed.xor_mapped_address(), Some(addr));
    }

    #[test]
    fn parse_rejects_bad_framing() {
        assert!(matches!(
            StunMessage::parse(&[]),
            Err(StunError::TruncatedMessage(_))
        ));
        assert!(matches!(
            StunMessage::parse(&[0; 19]),
            Err(StunError::TruncatedMessage(_))
        ));

        let mut b = MessageBuilder::request(Method::Binding);
        b.add_software("app").unwrap();
        let mut bytes = b.to_bytes().unwrap();

        // Chop the last attribute short.
        bytes.truncate(bytes.len() - 4);
        assert!(StunMessage::parse(&bytes).is_err());
    }

    #[test]
    fn parse_rejects_attribute_overrun() {
        let mut b = MessageBuilder::request(Method::Binding);
        b.add_software("abcd").unwrap();
        let mut bytes = b.to_bytes().unwrap();

        // Inflate the attribute's length field past the end of the message.
        bytes[22] = 0xff;
        assert!(matches!(
            StunMessage::parse(&bytes),
            Err(StunError::BadAttributeLength(_))
        ));
    }

    #[test]
    fn unknown_comprehension_required_is_reported() {
        let mut b = MessageBuilder::request(Method::Binding);
        b.add_raw(0x7f11, &[1, 2, 3, 4]).unwrap();
        b.add_raw(0x8111, &[5, 6]).unwrap();

        let bytes = b.to_bytes().unwrap();
        let parsed = StunMessage::parse(&bytes).unwrap();

        assert_eq!(parsed.unknown_required(), vec![0x7f11]);
        assert!(matches!(
            parsed.require_comprehension(),
            Err(StunError::UnknownComprehensionRequiredAttribute(v)) if v == vec![0x7f11]
        ));
    }

    #[test]
    fn parse_rejects_duplicate_attribute() {
        let mut b = MessageBuilder::request(Method::Binding);
        b.add_software("app").unwrap();
        let mut bytes = b.to_bytes().unwrap();

        // Append a second SOFTWARE attribute by hand.
        let dup = bytes[20..28].to_vec();
        bytes.extend_from_slice(&dup);
        let attr_len = (bytes.len() - 20) as u16;
        bytes[2..4].copy_from_slice(&attr_len.to_be_bytes());

        assert!(matches!(
            StunMessage::parse(&bytes),
            Err(StunError::DuplicateAttribute(attr::SOFTWARE))
        ));
    }
}
