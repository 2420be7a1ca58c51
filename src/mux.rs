//! Cheap pre-filter for sockets multiplexing STUN with other traffic.

use crate::message::{HEADER_LEN, MAGIC};

/// Whether a datagram looks like a STUN message: long enough for the
/// header, the top two bits of the first byte zero, and the magic cookie in
/// place (unless legacy acceptance is on). Runs before any real parsing.
pub fn is_stun(buf: &[u8], accept_legacy: bool) -> bool {
    if buf.len() < HEADER_LEN {
        return false;
    }
    if buf[0] & 0b1100_0000 != 0 {
        return false;
    }
    accept_legacy || buf[4..8] == MAGIC
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::{MessageBuilder, Method};

    #[test]
    fn encoder_output_is_recognized() {
        let mut b = MessageBuilder::request(Method::Binding);
        b.add_software("stunt test").unwrap();
        b.add_fingerprint().unwrap();
        let bytes = b.to_bytes().unwrap();

        assert!(is_stun(&bytes, false));
        assert!(is_stun(&bytes, true));
    }

    #[test]
    fn wrong_cookie_needs_legacy_acceptance() {
        let mut buf = [0x17_u8; 20];
        buf[0] = 0x00;
        assert!(!is_stun(&buf, false));
        assert!(is_stun(&buf, true));
    }

    #[test]
    fn too_short_or_wrong_leading_bits() {
        assert!(!is_stun(&[0; 19], true));

        let mut buf = [0_u8; 20];
        buf[..8].copy_from_slice(&[0x80, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42]);
        assert!(!is_stun(&buf, true));
        buf[0] = 0x00;
        assert!(is_stun(&buf, false));
    }
}
