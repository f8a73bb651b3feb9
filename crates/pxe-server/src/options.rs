//! Options that `dhcproto` carries as opaque bytes, and the TLV layout of the
//! PXE vendor area (option 43).

use dhcproto::Encodable;
use dhcproto::v4::{DhcpOption, Message, OptionCode, UnknownOption};

pub const END: u8 = 255;
pub const PAD: u8 = 0;

/// Iterate `(code, value)` pairs of a TLV area, stopping at the end marker or
/// at the first truncated entry.
pub fn iter(mut area: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    std::iter::from_fn(move || {
        loop {
            let (&code, rest) = area.split_first()?;
            if code == END {
                return None;
            }
            if code == PAD {
                area = rest;
                continue;
            }
            let (&len, rest) = rest.split_first()?;
            let value = rest.get(..usize::from(len))?;
            area = &rest[usize::from(len)..];
            return Some((code, value));
        }
    })
}

/// An option sent exactly as `data`.
pub fn raw(code: u8, data: Vec<u8>) -> DhcpOption {
    DhcpOption::Unknown(UnknownOption::new(OptionCode::from(code), data))
}

/// Wire value of option `code`, whichever variant the decoder produced.
pub fn value(msg: &Message, code: u8) -> Option<Vec<u8>> {
    let encoded = msg.opts().get(OptionCode::from(code))?.to_vec().ok()?;
    encoded.get(2..).map(<[u8]>::to_vec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_iter_skips_pad_and_stops_at_end() {
        let area = [0, 71, 1, 1, 0, 60, 3, b'a', b'b', b'c', 255, 12, 1, b'x'];
        let got: Vec<(u8, &[u8])> = iter(&area).collect();
        assert_eq!(got, vec![(71, &[1u8][..]), (60, &b"abc"[..])]);
    }

    #[test]
    fn test_iter_stops_on_truncation() {
        let area = [71, 1, 1, 97, 17, 0, 1];
        let got: Vec<u8> = iter(&area).map(|(c, _)| c).collect();
        assert_eq!(got, vec![71]);
    }

    #[test]
    fn test_value_of_typed_and_opaque_options() {
        let mut msg = Message::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &[0x52, 0x54, 0, 0, 0, 1],
        );
        msg.opts_mut().insert(DhcpOption::ServerIdentifier(Ipv4Addr::new(10, 0, 0, 1)));
        msg.opts_mut().insert(raw(210, b"http://10.0.0.1:70/".to_vec()));

        assert_eq!(value(&msg, 54), Some(vec![10, 0, 0, 1]));
        assert_eq!(value(&msg, 210), Some(b"http://10.0.0.1:70/".to_vec()));
        assert_eq!(value(&msg, 97), None);
    }
}
