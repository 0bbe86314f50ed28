//! RSP binary-escape encoding: the `}`-prefix, XOR-0x20 transform that
//! protects the reserved framing bytes `$`, `#`, `}` inside a payload.
//! `*` is included on the encode side because RSP reserves it for
//! run-length compression, which this stub does not produce or accept
//! (see [`crate::libs::framer`] for the inbound-`*` rejection).

use crate::libs::error::RspError;

const RESERVED: [u8; 4] = [b'$', b'#', b'}', b'*'];

/// Encodes `data` into `out`, escaping any of `$ # } *` as `}` followed
/// by the byte XOR `0x20`. Returns the number of bytes written.
pub fn encode_bin(out: &mut Vec<u8>, data: &[u8]) -> Result<usize, RspError> {
    let start = out.len();
    for &b in data {
        if RESERVED.contains(&b) {
            out.push(b'}');
            out.push(b ^ 0x20);
        } else {
            out.push(b);
        }
    }
    Ok(out.len() - start)
}

/// Decodes an escaped buffer produced by [`encode_bin`]. A `}` at the
/// end of input with no following byte is an error.
pub fn decode_bin(out: &mut Vec<u8>, data: &[u8]) -> Result<(), RspError> {
    let mut iter = data.iter().copied();
    while let Some(b) = iter.next() {
        if b == b'}' {
            let escaped = iter
                .next()
                .ok_or_else(|| RspError::BadRequest("dangling escape byte".into()))?;
            out.push(escaped ^ 0x20);
        } else {
            out.push(b);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_arbitrary_bytes() {
        let data: Vec<u8> = (0u8..=255).collect();
        let mut encoded = Vec::new();
        encode_bin(&mut encoded, &data).unwrap();

        assert!(!encoded.contains(&b'$'));
        assert!(!encoded.contains(&b'#'));

        let mut decoded = Vec::new();
        decode_bin(&mut decoded, &encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn escapes_all_reserved_bytes() {
        let mut encoded = Vec::new();
        encode_bin(&mut encoded, &RESERVED).unwrap();
        // Each reserved byte becomes a `}`-prefixed pair.
        assert_eq!(encoded.len(), RESERVED.len() * 2);
        for chunk in encoded.chunks(2) {
            assert_eq!(chunk[0], b'}');
        }
    }

    #[test]
    fn decode_dangling_escape_is_error() {
        let mut out = Vec::new();
        assert!(decode_bin(&mut out, b"ab}").is_err());
    }

    #[test]
    fn plain_bytes_pass_through() {
        let mut encoded = Vec::new();
        encode_bin(&mut encoded, b"hello").unwrap();
        assert_eq!(encoded, b"hello");
    }
}
