use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::message::MessageType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{op}: timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    #[error("{op}: cancelled")]
    Cancelled { op: &'static str },

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    #[error("{op}: peer replied {reply:#04x} instead of ack")]
    NotAcked { op: &'static str, reply: u8 },

    #[error("unexpected {0} message on an inbound stream")]
    UnexpectedMessage(MessageType),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    #[error("join {seed}: {source}")]
    Join {
        seed: SocketAddr,
        #[source]
        source: Box<Error>,
    },

    #[error("resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("resolve {0}: no address found")]
    UnresolvedAddress(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("membership is stopped")]
    Stopped,
}

impl Error {
    pub(crate) fn io(op: &'static str, source: io::Error) -> Error {
        Error::Io { op, source }
    }

    /// True when the error stems from the node's own shutdown rather than a
    /// failing peer.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled { .. } => true,
            Error::Join { source, .. } => source.is_cancelled(),
            Error::Broadcast(err) => err.failures.iter().any(|(_, err)| err.is_cancelled()),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

/// Malformed bytes on the wire.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown msg type: {0}")]
    UnknownType(u8),

    #[error("address text of {len} bytes exceeds the {max} byte limit")]
    AddressTooLong { len: usize, max: usize },

    #[error("frame truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("address text is not utf-8")]
    InvalidUtf8,

    #[error("invalid address {0:?}")]
    InvalidAddress(String),
}

/// Every failed send of one fan-out. Never short-circuited.
#[derive(Debug)]
pub struct BroadcastError {
    pub kind: MessageType,
    pub failures: Vec<(SocketAddr, Error)>,
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "broadcast {}: {} send(s) failed", self.kind, self.failures.len())?;
        for (addr, err) in &self.failures {
            write!(f, "; {addr}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BroadcastError {}
