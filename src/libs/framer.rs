//! Packet framing: `$payload#cc` emission, frame scanning with inline
//! binary-escape decoding, checksum verification, and the single-byte
//! ack/nack handshake.
//!
//! The checksum is computed over the *transmitted* payload bytes
//! (escape markers included, not yet XOR-decoded) — this is what GDB
//! clients actually send the checksum of, and what the reference
//! implementation's `buffer_orig` captures.

use crate::libs::error::RspError;
use crate::libs::hex;
use crate::libs::transport::Transport;

/// Result of the send-side ack/nack handshake.
#[derive(Debug, PartialEq, Eq)]
pub enum AckStatus {
    Acked,
    Nacked,
}

/// 8-bit additive checksum (sum mod 256) of `data`.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Sends `$payload#cc` and waits for the single-byte ack/nack.
pub fn send<T: Transport>(transport: &mut T, payload: &[u8]) -> Result<AckStatus, RspError> {
    transport.put_byte(b'$')?;
    transport.put_bytes(payload)?;
    transport.put_byte(b'#')?;

    let mut cc_hex = [0u8; 2];
    hex::encode_hex(&mut cc_hex, &[checksum(payload)])?;
    transport.put_bytes(&cc_hex)?;

    match transport.get_byte()? {
        b'+' => Ok(AckStatus::Acked),
        b'-' => Ok(AckStatus::Nacked),
        other => Err(RspError::Transport(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unexpected ack byte 0x{:02x}", other),
        ))),
    }
}

/// Reads one frame into `buf`, decoding binary escapes as it scans.
///
/// Returns the decoded payload length on success. On `BadChecksum`,
/// `BufferOverflow`, a dangling `}` escape, or an inbound run-length
/// marker (`BadRequest`), the remainder of the frame (its checksum
/// bytes) is drained from the transport before returning, so the next
/// call starts cleanly at the following frame's `$`.
///
/// The running checksum is accumulated byte-by-byte as the wire bytes
/// arrive rather than buffered into a growable `Vec` first — a client
/// that never sends a closing `#` must not be able to grow unbounded
/// memory regardless of `buf`'s fixed size.
pub fn recv<T: Transport>(transport: &mut T, buf: &mut [u8]) -> Result<usize, RspError> {
    loop {
        if transport.get_byte()? == b'$' {
            break;
        }
    }

    let mut running_checksum = 0u8;
    let mut decoded_len = 0usize;
    let mut escaped = false;
    let mut overflowed = false;
    let mut saw_run_length = false;

    loop {
        let b = transport.get_byte()?;
        if b == b'#' {
            break;
        }
        running_checksum = running_checksum.wrapping_add(b);

        if escaped {
            escaped = false;
            if decoded_len < buf.len() {
                buf[decoded_len] = b ^ 0x20;
                decoded_len += 1;
            } else {
                overflowed = true;
            }
        } else if b == b'}' {
            escaped = true;
        } else if b == b'*' {
            // Run-length compression is not accepted; keep draining
            // the frame so the next recv() stays in sync.
            saw_run_length = true;
        } else if decoded_len < buf.len() {
            buf[decoded_len] = b;
            decoded_len += 1;
        } else {
            overflowed = true;
        }
    }

    let dangling_escape = escaped;

    let cc_hex = [transport.get_byte()?, transport.get_byte()?];

    let expected = hex::decode_hex_vec(&cc_hex).ok().and_then(|v| v.first().copied());

    if dangling_escape {
        transport.put_byte(b'-')?;
        return Err(RspError::BadRequest(
            "dangling binary-escape byte at end of frame".into(),
        ));
    }
    if saw_run_length {
        transport.put_byte(b'-')?;
        return Err(RspError::BadRequest(
            "run-length compressed payload not supported".into(),
        ));
    }
    if overflowed {
        transport.put_byte(b'-')?;
        return Err(RspError::BufferOverflow);
    }

    match expected {
        Some(expected) if expected == running_checksum => {
            transport.put_byte(b'+')?;
            Ok(decoded_len)
        }
        _ => {
            transport.put_byte(b'-')?;
            Err(RspError::BadChecksum)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::transport::MemoryTransport;

    #[test]
    fn checksum_is_sum_mod_256() {
        assert_eq!(checksum(b"OK"), (b'O' as u16 + b'K' as u16) as u8);
    }

    #[test]
    fn recv_valid_frame_acks() {
        let mut t = MemoryTransport::new(b"$OK#9a+");
        let mut buf = [0u8; 16];
        let len = recv(&mut t, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"OK");
        assert_eq!(t.outbound, b"+");
    }

    #[test]
    fn recv_bad_checksum_nacks() {
        let mut t = MemoryTransport::new(b"$OK#00");
        let mut buf = [0u8; 16];
        let err = recv(&mut t, &mut buf).unwrap_err();
        assert!(matches!(err, RspError::BadChecksum));
        assert_eq!(t.outbound, b"-");
    }

    #[test]
    fn recv_decodes_binary_escapes() {
        // `}` (0x7d) XOR 0x20 is encoded as "}]" on the wire, and the
        // checksum covers the *wire* bytes, not the decoded ones.
        let payload_wire = b"}]";
        let cc = checksum(payload_wire);
        let frame = format!("${}#{:02x}", String::from_utf8_lossy(payload_wire), cc);
        let mut t = MemoryTransport::new(frame.as_bytes());
        let mut buf = [0u8; 16];
        let len = recv(&mut t, &mut buf).unwrap();
        assert_eq!(&buf[..len], &[0x7d]);
    }

    #[test]
    fn send_writes_frame_then_reads_ack() {
        let mut t = MemoryTransport::new(b"+");
        let status = send(&mut t, b"OK").unwrap();
        assert_eq!(status, AckStatus::Acked);
        assert_eq!(t.outbound, b"$OK#9a");
    }

    #[test]
    fn send_reports_nack() {
        let mut t = MemoryTransport::new(b"-");
        let status = send(&mut t, b"OK").unwrap();
        assert_eq!(status, AckStatus::Nacked);
    }

    #[test]
    fn recv_rejects_inbound_run_length_marker() {
        let frame = b"$a*b#00";
        let mut t = MemoryTransport::new(frame);
        let mut buf = [0u8; 16];
        let err = recv(&mut t, &mut buf).unwrap_err();
        assert!(matches!(err, RspError::BadRequest(_)));
        assert_eq!(t.outbound, b"-");
    }

    #[test]
    fn recv_rejects_dangling_escape_at_end_of_frame() {
        // "ab}" with a correct checksum for those three wire bytes:
        // the trailing `}` has no following byte to XOR before `#`.
        let frame = b"$ab}#40";
        let mut t = MemoryTransport::new(frame);
        let mut buf = [0u8; 16];
        let err = recv(&mut t, &mut buf).unwrap_err();
        assert!(matches!(err, RspError::BadRequest(_)));
        assert_eq!(t.outbound, b"-");
    }

    #[test]
    fn recv_overflow_drains_rest_of_frame() {
        let mut t = MemoryTransport::new(b"$abcdef#9b+$OK#9a+");
        let mut buf = [0u8; 2];
        let err = recv(&mut t, &mut buf).unwrap_err();
        assert!(matches!(err, RspError::BufferOverflow));
        // Next recv starts cleanly at the following frame.
        let len = recv(&mut t, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"OK");
    }
}
