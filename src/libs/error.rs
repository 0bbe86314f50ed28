use std::io;

use thiserror::Error;

/// Errors the RSP core can surface.
///
/// Every variant here corresponds to an error kind the protocol engine
/// recognizes. `Transport` and `BufferOverflow` end the session (the
/// dispatcher's `serve_one` matches them directly out of
/// `framer::recv`); every other variant is a command-handler failure
/// that `CommandDispatcher::dispatch` turns into an `E00`/empty reply
/// via [`RspError::reply_payload`] rather than propagating.
#[derive(Debug, Error)]
pub enum RspError {
    /// Unexpected EOF or I/O failure on the byte stream.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// An inbound packet would not fit in the scratch buffer.
    #[error("packet exceeds scratch buffer capacity")]
    BufferOverflow,

    /// The received checksum did not match the computed one.
    #[error("checksum mismatch")]
    BadChecksum,

    /// A structurally invalid command: missing separator, no digits
    /// where expected, out-of-range length, or a decode failure.
    #[error("malformed request: {0}")]
    BadRequest(String),

    /// A memory access fell outside every known `MemoryRegion`.
    #[error("address not mapped")]
    NoMapping,

    /// A command outside the recognized set.
    #[error("unsupported command")]
    Unsupported,
}

impl RspError {
    /// Maps an error into the reply payload a client should see.
    /// Protocol/target-domain errors report the same `E00` the
    /// reference implementation uses for all of them (GDB does not
    /// interpret the two digits beyond "nonzero = error"); `Unsupported`
    /// is the one variant that reports an empty payload instead, per
    /// the distilled spec's "commands outside the recognized set reply
    /// with an empty payload" rule.
    pub fn reply_payload(&self) -> &'static [u8] {
        match self {
            RspError::Unsupported => b"",
            RspError::BadChecksum
            | RspError::BadRequest(_)
            | RspError::NoMapping
            | RspError::BufferOverflow
            | RspError::Transport(_) => b"E00",
        }
    }
}

pub type RspResult<T> = Result<T, RspError>;
