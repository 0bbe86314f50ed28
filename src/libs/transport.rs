//! The abstract byte-stream the Framer drives. The distilled spec
//! treats transport I/O as a collaborator the core consumes one octet
//! at a time; this module is that seam. The CLI binary plugs in a
//! `TcpStream`; tests plug in an in-memory byte queue.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpStream;

use crate::libs::error::RspError;

/// Blocking, one-byte-at-a-time character I/O. Every method may block
/// indefinitely on a real socket; nothing else in the core may.
pub trait Transport {
    fn get_byte(&mut self) -> Result<u8, RspError>;
    fn put_byte(&mut self, byte: u8) -> Result<(), RspError>;

    fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), RspError> {
        for &b in bytes {
            self.put_byte(b)?;
        }
        Ok(())
    }
}

impl Transport for TcpStream {
    fn get_byte(&mut self) -> Result<u8, RspError> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte).map_err(RspError::from)?;
        Ok(byte[0])
    }

    fn put_byte(&mut self, byte: u8) -> Result<(), RspError> {
        self.write_all(&[byte]).map_err(RspError::from)
    }
}

/// An in-memory transport for unit and scenario tests: bytes written
/// to `inbound` are what `get_byte` yields; everything `put_byte`
/// writes accumulates in `outbound` for assertions.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    inbound: VecDeque<u8>,
    pub outbound: Vec<u8>,
}

impl MemoryTransport {
    pub fn new(inbound: &[u8]) -> Self {
        MemoryTransport {
            inbound: inbound.iter().copied().collect(),
            outbound: Vec::new(),
        }
    }
}

impl Transport for MemoryTransport {
    fn get_byte(&mut self) -> Result<u8, RspError> {
        self.inbound.pop_front().ok_or_else(|| {
            RspError::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no more inbound bytes",
            ))
        })
    }

    fn put_byte(&mut self, byte: u8) -> Result<(), RspError> {
        self.outbound.push(byte);
        Ok(())
    }
}
