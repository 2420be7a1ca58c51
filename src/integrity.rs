//! MESSAGE-INTEGRITY and FINGERPRINT: both are computed over a partially
//! serialized message whose header length already accounts for them.

use crc::{Crc, CRC_32_ISO_HDLC};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::attr::{self, Attr, AttrValue};
use crate::message::{MessageBuilder, StunMessage, HEADER_LEN};
use crate::StunError;

type HmacSha1 = Hmac<Sha1>;

/// The literal ASCII "STUN", XOR'ed into the fingerprint CRC.
const FINGERPRINT_XOR: u32 = 0x5354_554e;

fn hmac_sha1(key: &[u8], chunks: &[&[u8]]) -> [u8; 20] {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha1::new_from_slice(key).expect("hmac key");
    for c in chunks {
        mac.update(c);
    }
    mac.finalize().into_bytes().into()
}

fn crc32(bytes: &[u8]) -> u32 {
    Crc::<u32>::new(&CRC_32_ISO_HDLC).checksum(bytes) ^ FINGERPRINT_XOR
}

impl MessageBuilder {
    /// Appends MESSAGE-INTEGRITY keyed with `key`.
    ///
    /// The attribute is reserved with a zero payload, the message is
    /// serialized, and the HMAC-SHA1 of everything except the placeholder
    /// bytes is patched in. Only FINGERPRINT may be added afterwards.
    pub fn add_message_integrity(&mut self, key: &[u8]) -> Result<(), StunError> {
        if self.typ.is_none() {
            return Err(StunError::TypeNotSet);
        }

        self.push(AttrValue::MessageIntegrity([0; 20]))?;

        let bytes = self.to_bytes()?;
        let digest = hmac_sha1(key, &[&bytes[..bytes.len() - 20]]);

        let Some(AttrValue::MessageIntegrity(v)) = self.attrs.last_mut() else {
            unreachable!("placeholder pushed above");
        };
        *v = digest;

        Ok(())
    }

    /// Appends FINGERPRINT: the CRC-32 of everything before its payload,
    /// XOR'ed with "STUN". Must come after MESSAGE-INTEGRITY when both are
    /// present, which the attribute ordering rules already guarantee.
    pub fn add_fingerprint(&mut self) -> Result<(), StunError> {
        if self.typ.is_none() {
            return Err(StunError::TypeNotSet);
        }

        self.push(AttrValue::Fingerprint(0))?;

        let bytes = self.to_bytes()?;
        let crc = crc32(&bytes[..bytes.len() - 4]);

        let Some(AttrValue::Fingerprint(v)) = self.attrs.last_mut() else {
            unreachable!("placeholder pushed above");
        };
        *v = crc;

        Ok(())
    }
}

impl<'a> StunMessage<'a> {
    pub fn has_integrity(&self) -> bool {
        self.integrity_offset.is_some()
    }

    pub fn has_fingerprint(&self) -> bool {
        self.fingerprint_offset.is_some()
    }

    /// Verify MESSAGE-INTEGRITY against `key`.
    ///
    /// The HMAC input runs up to the integrity payload, with the header
    /// length field patched back to the value it had when the attribute was
    /// appended (attribute section ending at that payload). The digest
    /// comparison is constant-time.
    pub fn verify_integrity(&self, key: &[u8]) -> Result<(), StunError> {
        let off = self.integrity_offset.ok_or(StunError::IntegrityMismatch)?;

        let Some(Attr::MessageIntegrity(expected)) =
            self.attr(attr::MESSAGE_INTEGRITY).copied()
        else {
            return Err(StunError::IntegrityMismatch);
        };

        let covered_len = (off + 4 + 20) as u16;

        let mut mac = HmacSha1::new_from_slice(key).expect("hmac key");
        mac.update(&self.buf[..2]);
        mac.update(&covered_len.to_be_bytes());
        mac.update(&self.buf[4..HEADER_LEN + off + 4]);

        mac.verify_slice(expected)
            .map_err(|_| StunError::IntegrityMismatch)
    }

    /// Verify FINGERPRINT against the received bytes.
    pub fn verify_fingerprint(&self) -> Result<(), StunError> {
        let off = self.fingerprint_offset.ok_or(StunError::FingerprintMismatch)?;

        let Some(Attr::Fingerprint(expected)) = self.attr(attr::FINGERPRINT).copied() else {
            return Err(StunError::FingerprintMismatch);
        };

        let actual = crc32(&self.buf[..HEADER_LEN + off + 4]);

        if actual == expected {
            Ok(())
        } else {
            Err(StunError::FingerprintMismatch)
        }
    }
}
