use std::{
    error::Error as StdError,
    fmt::{Debug, Display},
    result::Result as StdResult,
};

use thiserror::Error;

pub type Result<T> = StdResult<T, Error>;

/// Errors raised by the connection/agent runtime.
///
/// Distinct from [`spop::Error`]: that one is a flat wire-level status code,
/// this one additionally carries contextual chains (`Error::Context`) the way
/// `anyhow::Context` would, but keeps a typed `status()` so a `Connection` can
/// still map any error back to a DISCONNECT status code.
#[derive(Debug, Error)]
pub enum Error {
    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    Status(#[from] spop::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unknown application {0:?}")]
    UnknownApp(String),

    #[error("{context}: {source}")]
    Context {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
        context: Box<dyn Reason>,
    },
}

impl Error {
    /// The DISCONNECT status this error maps to, if any.
    pub fn status(&self) -> Option<spop::Error> {
        match self {
            Error::Status(status) => Some(*status),
            Error::Context { source, .. } => {
                if let Some(err) = source.downcast_ref::<Error>() {
                    err.status()
                } else {
                    source.downcast_ref::<spop::Error>().copied()
                }
            }
            _ => None,
        }
    }
}

impl From<Error> for spop::Disconnect {
    fn from(err: Error) -> Self {
        match err.status() {
            Some(status) => spop::Disconnect::new(status, err.to_string()),
            None => spop::Disconnect::new(spop::Error::Unknown, err.to_string()),
        }
    }
}

/// A piece of human-readable context attached to an error with `.context(...)`.
pub trait Reason: Display + Debug + Send + Sync + 'static {}

impl Reason for &'static str {}
impl Reason for String {}

/// The teacher's own `anyhow`-style `.context()` extension, kept instead of
/// pulling in `anyhow` for this crate: ACK disconnect-status mapping needs a
/// typed `Error::status()` that `anyhow::Error` doesn't give for free.
pub trait Context<T, E> {
    fn context<C>(self, context: C) -> StdResult<T, Error>
    where
        C: Reason;

    fn with_context<C, F>(self, f: F) -> StdResult<T, Error>
    where
        C: Reason,
        F: FnOnce() -> C;
}

impl<T, E> Context<T, E> for StdResult<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn context<C>(self, reason: C) -> StdResult<T, Error>
    where
        C: Reason,
    {
        match self {
            Ok(res) => Ok(res),
            Err(err) => Err(Error::Context {
                source: Box::new(err),
                context: Box::new(reason),
            }),
        }
    }

    fn with_context<C, F>(self, f: F) -> StdResult<T, Error>
    where
        C: Reason,
        F: FnOnce() -> C,
    {
        match self {
            Ok(res) => Ok(res),
            Err(err) => Err(Error::Context {
                source: Box::new(err),
                context: Box::new(f()),
            }),
        }
    }
}
