//! Small parser utility over a command payload, replacing the
//! reference implementation's macro-based token grammar (see
//! DESIGN.md) with explicit cursor methods.

use crate::libs::error::RspError;
use crate::libs::hex;

/// A cursor over the remaining bytes of an RSP command payload.
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Consumes exactly one literal separator byte.
    pub fn expect_sep(&mut self, sep: u8) -> Result<(), RspError> {
        match self.data.get(self.pos) {
            Some(&b) if b == sep => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(RspError::BadRequest(format!(
                "expected separator {:?}",
                sep as char
            ))),
        }
    }

    /// Parses a hex integer (base 0x10, no `0x` prefix expected) from
    /// the cursor's current position, advancing past the digits
    /// consumed. Zero digits consumed is a `BadRequest`.
    pub fn expect_hex_int(&mut self) -> Result<i64, RspError> {
        let (value, consumed) = hex::parse_int(self.remaining(), 16)?;
        self.pos += consumed;
        Ok(value)
    }

    /// Consumes the rest of the cursor's bytes verbatim.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }
}
