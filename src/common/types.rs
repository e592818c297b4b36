use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

/// A generic boxed error type.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// A convenient Result alias returning `AnyError`.
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// A block of body data together with the byte offset of its first byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    pub offset: u64,
    pub data: Bytes,
}

impl Buffer {
    pub fn new(offset: u64, data: Bytes) -> Self {
        Self { offset, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset one past the last byte of this buffer.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Non-data outcome of a pull.
///
/// `Error` is only returned after the structured error has been posted on the
/// event sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("end of stream")]
    Eos,
    #[error("flushing")]
    Flushing,
    #[error("error")]
    Error,
}

/// Seek target handed to [`crate::source::PushSource::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// `stop` is exclusive; `None` means unbounded.
    Bytes { start: u64, stop: Option<u64> },
    Time {
        start: Duration,
        stop: Option<Duration>,
    },
}

impl Segment {
    pub fn bytes(start: u64, stop: Option<u64>) -> Self {
        Self::Bytes { start, stop }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Uri,
    Duration,
    Scheduling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UriInfo {
    pub uri: String,
    pub redirect_uri: Option<String>,
    pub permanent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResponse {
    Uri(UriInfo),
    /// Content size in bytes.
    Duration(u64),
    Scheduling { bandwidth_limited: bool },
}
