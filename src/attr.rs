//! Attribute types, value codecs and the XOR address transform.

use std::net::{IpAddr, SocketAddr};
use std::str;

use crate::message::TransId;
use crate::octets::put_pad;
use crate::StunError;

pub const MAPPED_ADDRESS: u16 = 0x0001;
pub const USERNAME: u16 = 0x0006;
pub const MESSAGE_INTEGRITY: u16 = 0x0008;
pub const ERROR_CODE: u16 = 0x0009;
pub const UNKNOWN_ATTRIBUTES: u16 = 0x000a;
pub const REALM: u16 = 0x0014;
pub const NONCE: u16 = 0x0015;
pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
pub const PRIORITY: u16 = 0x0024;
pub const USE_CANDIDATE: u16 = 0x0025;
pub const SOFTWARE: u16 = 0x8022;
pub const ALTERNATE_SERVER: u16 = 0x8023;
pub const FINGERPRINT: u16 = 0x8028;
pub const ICE_CONTROLLED: u16 = 0x8029;
pub const ICE_CONTROLLING: u16 = 0x802a;

/// Attribute types below 0x8000 must be understood by the receiver.
pub fn is_comprehension_required(typ: u16) -> bool {
    typ < 0x8000
}

/// Default reason phrase for a STUN error code.
pub fn default_reason(code: u16) -> Option<&'static str> {
    let reason = match code {
        300 => "Try Alternate",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        420 => "Unknown Attribute",
        438 => "Stale Nonce",
        500 => "Server Error",
        _ => return None,
    };
    Some(reason)
}

pub(crate) const USERNAME_MAX_BYTES: usize = 513;
pub(crate) const STRING_MAX_CHARS: usize = 128;
pub(crate) const REASON_MAX_BYTES: usize = 763;

/// An owned attribute value, as held by the message builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    MappedAddress(SocketAddr),
    AlternateServer(SocketAddr),
    XorMappedAddress(SocketAddr),
    Username(String),
    Realm(String),
    Nonce(String),
    Software(String),
    ErrorCode(u16, String),
    UnknownAttributes(Vec<u16>),
    Priority(u32),
    UseCandidate,
    IceControlled(u64),
    IceControlling(u64),
    MessageIntegrity([u8; 20]),
    Fingerprint(u32),
    Other(u16, Vec<u8>),
}

impl AttrValue {
    pub fn typ(&self) -> u16 {
        use AttrValue::*;
        match self {
            MappedAddress(_) => MAPPED_ADDRESS,
            AlternateServer(_) => ALTERNATE_SERVER,
            XorMappedAddress(_) => XOR_MAPPED_ADDRESS,
            Username(_) => USERNAME,
            Realm(_) => REALM,
            Nonce(_) => NONCE,
            Software(_) => SOFTWARE,
            ErrorCode(_, _) => ERROR_CODE,
            UnknownAttributes(_) => UNKNOWN_ATTRIBUTES,
            Priority(_) => PRIORITY,
            UseCandidate => USE_CANDIDATE,
            IceControlled(_) => ICE_CONTROLLED,
            IceControlling(_) => ICE_CONTROLLING,
            MessageIntegrity(_) => MESSAGE_INTEGRITY,
            Fingerprint(_) => FINGERPRINT,
            Other(typ, _) => *typ,
        }
    }

    /// Append the attribute TLV, including padding, to `out`.
    pub(crate) fn to_bytes(&self, trans_id: &TransId, out: &mut Vec<u8>) {
        use AttrValue::*;

        out.extend_from_slice(&self.typ().to_be_bytes());

        match self {
            MappedAddress(addr) | AlternateServer(addr) => {
                put_addr(out, *addr, None);
            }
            XorMappedAddress(addr) => {
                put_addr(out, *addr, Some(trans_id));
            }
            Username(s) | Realm(s) | Nonce(s) | Software(s) => {
                out.extend_from_slice(&(s.len() as u16).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
                put_pad(out, s.len());
            }
            ErrorCode(code, reason) => {
                out.extend_from_slice(&(4 + reason.len() as u16).to_be_bytes());
                // Reserved 21 bits, then class (3 bits) and number.
                out.extend_from_slice(&0_u16.to_be_bytes());
                out.push((code / 100) as u8);
                out.push((code % 100) as u8);
                out.extend_from_slice(reason.as_bytes());
                put_pad(out, reason.len());
            }
            UnknownAttributes(types) => {
                out.extend_from_slice(&(2 * types.len() as u16).to_be_bytes());
                for t in types {
                    out.extend_from_slice(&t.to_be_bytes());
                }
                put_pad(out, 2 * types.len());
            }
            Priority(v) => {
                out.extend_from_slice(&4_u16.to_be_bytes());
                out.extend_from_slice(&v.to_be_bytes());
            }
            UseCandidate => {
                out.extend_from_slice(&0_u16.to_be_bytes());
            }
            IceControlled(v) | IceControlling(v) => {
                out.extend_from_slice(&8_u16.to_be_bytes());
                out.extend_from_slice(&v.to_be_bytes());
            }
            MessageIntegrity(digest) => {
                out.extend_from_slice(&20_u16.to_be_bytes());
                out.extend_from_slice(digest);
            }
            Fingerprint(v) => {
                out.extend_from_slice(&4_u16.to_be_bytes());
                out.extend_from_slice(&v.to_be_bytes());
            }
            Other(_, bytes) => {
                out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                out.extend_from_slice(bytes);
                put_pad(out, bytes.len());
            }
        }
    }
}

/// A parsed attribute borrowing from the message buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attr<'a> {
    MappedAddress(SocketAddr),
    AlternateServer(SocketAddr),
    XorMappedAddress(SocketAddr),
    Username(&'a str),
    Realm(&'a str),
    Nonce(&'a str),
    Software(&'a str),
    ErrorCode(u16, &'a str),
    UnknownAttributes(&'a [u8]),
    Priority(u32),
    UseCandidate,
    IceControlled(u64),
    IceControlling(u64),
    MessageIntegrity(&'a [u8]),
    Fingerprint(u32),
    Other(u16, &'a [u8]),
}

impl<'a> Attr<'a> {
    pub fn typ(&self) -> u16 {
        use Attr::*;
        match self {
            MappedAddress(_) => MAPPED_ADDRESS,
            AlternateServer(_) => ALTERNATE_SERVER,
            XorMappedAddress(_) => XOR_MAPPED_ADDRESS,
            Username(_) => USERNAME,
            Realm(_) => REALM,
            Nonce(_) => NONCE,
            Software(_) => SOFTWARE,
            ErrorCode(_, _) => ERROR_CODE,
            UnknownAttributes(_) => UNKNOWN_ATTRIBUTES,
            Priority(_) => PRIORITY,
            UseCandidate => USE_CANDIDATE,
            IceControlled(_) => ICE_CONTROLLED,
            IceControlling(_) => ICE_CONTROLLING,
            MessageIntegrity(_) => MESSAGE_INTEGRITY,
            Fingerprint(_) => FINGERPRINT,
            Other(typ, _) => *typ,
        }
    }

    /// Decode one attribute payload. `payload` is the unpadded value.
    pub(crate) fn parse(
        typ: u16,
        payload: &'a [u8],
        trans_id: &TransId,
    ) -> Result<Attr<'a>, StunError> {
        let attr = match typ {
            MAPPED_ADDRESS => Attr::MappedAddress(take_addr(typ, payload, None)?),
            ALTERNATE_SERVER => Attr::AlternateServer(take_addr(typ, payload, None)?),
            XOR_MAPPED_ADDRESS => {
                Attr::XorMappedAddress(take_addr(typ, payload, Some(trans_id))?)
            }
            USERNAME => {
                if payload.len() > USERNAME_MAX_BYTES {
                    return Err(StunError::ValueOutOfRange("username longer than 513 bytes"));
                }
                Attr::Username(take_str(typ, payload)?)
            }
            REALM => Attr::Realm(take_capped_str(typ, payload)?),
            NONCE => Attr::Nonce(take_capped_str(typ, payload)?),
            SOFTWARE => Attr::Software(take_capped_str(typ, payload)?),
            ERROR_CODE => {
                let (code, reason) = take_error_code(payload)?;
                Attr::ErrorCode(code, reason)
            }
            UNKNOWN_ATTRIBUTES => {
                if payload.len() % 2 != 0 {
                    return Err(StunError::BadAttributeLength(format!(
                        "UNKNOWN-ATTRIBUTES payload of {} bytes",
                        payload.len()
                    )));
                }
                Attr::UnknownAttributes(payload)
            }
            PRIORITY => {
                let b = fixed(typ, payload, 4)?;
                Attr::Priority(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
            USE_CANDIDATE => {
                fixed(typ, payload, 0)?;
                Attr::UseCandidate
            }
            ICE_CONTROLLED => Attr::IceControlled(take_u64(typ, payload)?),
            ICE_CONTROLLING => Attr::IceControlling(take_u64(typ, payload)?),
            MESSAGE_INTEGRITY => Attr::MessageIntegrity(fixed(typ, payload, 20)?),
            FINGERPRINT => {
                let b = fixed(typ, payload, 4)?;
                Attr::Fingerprint(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
            _ => Attr::Other(typ, payload),
        };

        Ok(attr)
    }

    /// The attribute types listed in an UNKNOWN-ATTRIBUTES value.
    pub fn unknown_types(&self) -> Option<Vec<u16>> {
        let Attr::UnknownAttributes(raw) = *self else {
            return None;
        };
        Some(
            raw.chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect(),
        )
    }
}

fn fixed<'a>(typ: u16, payload: &'a [u8], len: usize) -> Result<&'a [u8], StunError> {
    if payload.len() != len {
        return Err(StunError::BadAttributeLength(format!(
            "0x{typ:04x} payload of {} bytes, expected {len}",
            payload.len()
        )));
    }
    Ok(payload)
}

fn take_u64(typ: u16, payload: &[u8]) -> Result<u64, StunError> {
    let b = fixed(typ, payload, 8)?;
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(b);
    Ok(u64::from_be_bytes(bytes))
}

fn take_str<'a>(typ: u16, payload: &'a [u8]) -> Result<&'a str, StunError> {
    str::from_utf8(payload)
        .map_err(|_| StunError::Parse(format!("0x{typ:04x} malformed utf-8")))
}

fn take_capped_str<'a>(typ: u16, payload: &'a [u8]) -> Result<&'a str, StunError> {
    let s = take_str(typ, payload)?;
    if s.chars().count() > STRING_MAX_CHARS {
        return Err(StunError::ValueOutOfRange("string longer than 128 characters"));
    }
    Ok(s)
}

fn take_error_code(payload: &[u8]) -> Result<(u16, &str), StunError> {
    if payload.len() < 4 {
        return Err(StunError::BadAttributeLength(format!(
            "ERROR-CODE payload of {} bytes",
            payload.len()
        )));
    }
    if payload[0] != 0 || payload[1] != 0 || payload[2] & 0b1111_1000 != 0 {
        return Err(StunError::Parse("non-zero reserved bits in ERROR-CODE".into()));
    }
    let class = payload[2] as u16;
    let number = payload[3] as u16;
    if !(3..=6).contains(&class) || number > 99 {
        return Err(StunError::ValueOutOfRange("error code outside 300-699"));
    }
    let reason = take_capped_str(ERROR_CODE, &payload[4..])?;
    Ok((class * 100 + number, reason))
}

/// Write the common address layout: reserved, family, port, address bytes.
/// With `xor` set, port and address are obfuscated with the cookie and
/// transaction id.
fn put_addr(out: &mut Vec<u8>, addr: SocketAddr, xor: Option<&TransId>) {
    let len: u16 = if addr.is_ipv4() { 8 } else { 20 };
    out.extend_from_slice(&len.to_be_bytes());

    let pad = xor.map(|t| t.xor_pad()).unwrap_or([0_u8; 16]);

    out.push(0);
    out.push(if addr.is_ipv4() { 1 } else { 2 });

    let port = addr.port() ^ u16::from_be_bytes([pad[0], pad[1]]);
    out.extend_from_slice(&port.to_be_bytes());

    match addr.ip() {
        IpAddr::V4(ip) => {
            let mut bytes = ip.octets();
            for (i, b) in bytes.iter_mut().enumerate() {
                *b ^= pad[i];
            }
            out.extend_from_slice(&bytes);
        }
        IpAddr::V6(ip) => {
            let mut bytes = ip.octets();
            for (i, b) in bytes.iter_mut().enumerate() {
                *b ^= pad[i];
            }
            out.extend_from_slice(&bytes);
        }
    }
}

fn take_addr(typ: u16, payload: &[u8], xor: Option<&TransId>) -> Result<SocketAddr, StunError> {
    if payload.len() < 4 {
        return Err(StunError::BadAttributeLength(format!(
            "0x{typ:04x} address payload of {} bytes",
            payload.len()
        )));
    }

    let pad = xor.map(|t| t.xor_pad()).unwrap_or([0_u8; 16]);
    let port = u16::from_be_bytes([payload[2], payload[3]]) ^ u16::from_be_bytes([pad[0], pad[1]]);

    let ip = match payload[1] {
        1 => {
            let b = fixed(typ, payload, 8)?;
            let mut bytes = [0_u8; 4];
            for i in 0..4 {
                bytes[i] = b[4 + i] ^ pad[i];
            }
            IpAddr::V4(bytes.into())
        }
        2 => {
            let b = fixed(typ, payload, 20)?;
            let mut bytes = [0_u8; 16];
            for i in 0..16 {
                bytes[i] = b[4 + i] ^ pad[i];
            }
            IpAddr::V6(bytes.into())
        }
        family => {
            return Err(StunError::Parse(format!("invalid address family: {family}")));
        }
    };

    Ok(SocketAddr::new(ip, port))
}
