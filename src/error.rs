//! Error handling utils.
//!
//! Local store operations never fail: inserts are total and match failures
//! are absent results, not errors. Everything that *can* go wrong lives at
//! the edges: a transport that cannot give us the concurrency level we
//! need, a message that does not frame, an operation issued against a
//! runtime that has already been shut down.

use std::io;

/// A specialized [`Result`] type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////
// Error
////////////////////////////////////////////////////////////////////////////////

/// Represents all error cases for all routines of the crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The transport cannot serve sends from multiple threads. The runtime
    /// refuses to start on top of such a transport.
    #[error("transport does not provide multi-threaded communication support")]
    UnsupportedConcurrency,

    /// A message did not survive the wire. The receive loop logs these and
    /// drops the message; the protocol continues.
    #[error("corrupt message: {0}")]
    Decode(#[from] DecodeError),

    /// The runtime (or one of its components) has been shut down.
    #[error("tuple space runtime terminated")]
    Terminated,

    /// The transport rejected a send.
    #[error("transport send failed: {0}")]
    Send(String),

    #[error("io error: {0}")]
    IO(#[from] io::Error),
}

impl Error {
    /// Returns the name of the variant as it is spelled in the source code.
    pub const fn variant_name(&self) -> &'static str {
        match self {
            Self::UnsupportedConcurrency => "UnsupportedConcurrency",
            Self::Decode(_) => "Decode",
            Self::Terminated => "Terminated",
            Self::Send(_) => "Send",
            Self::IO(_) => "IO",
        }
    }
}

const _: () = {
    /// Assert Error implements Send + Sync
    const fn if_this_compiles_the_type_implements_send_and_sync<T: Send + Sync>() {}
    if_this_compiles_the_type_implements_send_and_sync::<Error>();
};

////////////////////////////////////////////////////////////////////////////////
// DecodeError
////////////////////////////////////////////////////////////////////////////////

/// Framing or payload validation failure while decoding a wire message.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("unexpected end of message, needed {needed} more byte(s) at offset {offset}")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("unknown value tag {tag:#04x} at offset {offset}")]
    UnknownTag { offset: usize, tag: u8 },

    #[error("unknown wildcard kind index {0}")]
    UnknownKind(u8),

    #[error("declared length {declared} exceeds remaining message size {remaining}")]
    LengthOutOfBounds { declared: usize, remaining: usize },

    #[error("string field is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("message carries {0} unconsumed trailing byte(s)")]
    TrailingBytes(usize),

    #[error("fn-call arguments nest deeper than supported")]
    NestingTooDeep,
}
