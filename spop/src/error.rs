use std::result::Result as StdResult;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

pub type Result<T> = StdResult<T, Error>;

/// Disconnect causes, sent to the peer as AGENT-DISCONNECT/HAPROXY-DISCONNECT `status-code`.
///
/// The numeric values follow the SPOP reference implementation so that a
/// status code read off the wire round-trips through [`Error::try_from`].
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error, TryFromPrimitive, IntoPrimitive)]
pub enum Error {
    #[error("normal")]
    Normal = 0,
    #[error("I/O error")]
    Io,
    #[error("a timeout occurred")]
    Timeout,
    #[error("frame is too big")]
    TooBig,
    #[error("invalid frame received")]
    Invalid,
    #[error("version value not found")]
    NoVersion,
    #[error("max-frame-size value not found")]
    NoFrameSize,
    #[error("capabilities value not found")]
    NoCapabilities,
    #[error("unsupported version")]
    BadVersion,
    #[error("max-frame-size too big or too small")]
    BadFrameSize,
    #[error("fragmentation not supported")]
    FragmentNotSupported,
    #[error("invalid interlaced frames")]
    InterlacedFrames,
    #[error("frame-id not found")]
    FrameIdNotFound,
    #[error("resource allocation error")]
    ResourceAllocErr,
    #[error("an unknown error occurred")]
    Unknown = 99,
}
