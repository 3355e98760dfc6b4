//! RESP reply types
//!
//! Defines the reply union shared by clients, peers and the AOF file.

use bytes::Bytes;
use std::fmt;

/// A decoded or to-be-encoded protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Status line: +OK\r\n
    Status(String),

    /// Error line: -ERR message\r\n
    Error(String),

    /// Integer line: :1000\r\n
    Integer(i64),

    /// Bulk string: $6\r\nfoobar\r\n, or $-1\r\n when `None`
    Bulk(Option<Bytes>),

    /// Array of bulk strings: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    MultiBulk(Vec<Option<Bytes>>),

    /// Nothing is written back to the peer
    NoReply,
}

impl Reply {
    /// Create a status reply
    pub fn status(s: impl Into<String>) -> Self {
        Reply::Status(s.into())
    }

    /// Create an error reply
    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    /// Create an integer reply
    pub fn integer(i: i64) -> Self {
        Reply::Integer(i)
    }

    /// Create a bulk reply from bytes
    pub fn bulk(b: impl Into<Bytes>) -> Self {
        Reply::Bulk(Some(b.into()))
    }

    /// `$-1\r\n`
    pub fn null_bulk() -> Self {
        Reply::Bulk(None)
    }

    /// Create a multi bulk reply from a command line
    pub fn multi_bulk(args: Vec<Bytes>) -> Self {
        Reply::MultiBulk(args.into_iter().map(Some).collect())
    }

    /// `*0\r\n`
    pub fn empty_multi_bulk() -> Self {
        Reply::MultiBulk(Vec::new())
    }

    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn pong() -> Self {
        Reply::Status("PONG".to_string())
    }

    /// Generic failure reply used when a command faulted internally
    pub fn unknown_error() -> Self {
        Reply::Error("ERR unknown".to_string())
    }

    pub fn arg_num_error(cmd: &str) -> Self {
        Reply::Error(format!("ERR wrong number of arguments for '{}' command", cmd))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Turn a multi bulk reply into a command line, `None` elements becoming empty
    pub fn into_cmd_line(self) -> Option<Vec<Bytes>> {
        match self {
            Reply::MultiBulk(args) => {
                Some(args.into_iter().map(Option::unwrap_or_default).collect())
            }
            _ => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "Status({})", s),
            Reply::Error(e) => write!(f, "Error({})", e),
            Reply::Integer(i) => write!(f, "Integer({})", i),
            Reply::Bulk(Some(b)) => write!(f, "Bulk({} bytes)", b.len()),
            Reply::Bulk(None) => write!(f, "Bulk(nil)"),
            Reply::MultiBulk(args) => write!(f, "MultiBulk({} elements)", args.len()),
            Reply::NoReply => write!(f, "NoReply"),
        }
    }
}

/// RESP decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RespError {
    /// Malformed frame; the parser resets and the stream goes on
    #[error("{0}")]
    Protocol(String),

    /// Read failure or end of stream; nothing follows on this stream
    #[error("io error: {0}")]
    Io(String),
}

impl RespError {
    pub(crate) fn protocol(line: &[u8]) -> Self {
        RespError::Protocol(format!("protocol error: {}", String::from_utf8_lossy(line).trim_end()))
    }

    pub fn is_io(&self) -> bool {
        matches!(self, RespError::Io(_))
    }
}

/// Unit produced by the decoder: a reply or a decode error
pub type Payload = Result<Reply, RespError>;
