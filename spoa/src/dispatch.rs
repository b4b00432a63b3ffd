use thiserror::Error;

use crate::acker::Acker;

/// Failure modes that end a single message's processing without being fatal
/// to the connection: the ACK still goes out, just without a verdict, and
/// (per the error-handling design) a warn/error log line is emitted by the
/// caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown application {0:?}")]
    UnknownApp(String),
    #[error("message is missing required field {0:?}")]
    MissingField(&'static str),
    #[error("got coraza-res but response check is disabled for application {0:?}")]
    ResponseCheckDisabled(String),
    #[error("transaction not found: {0}")]
    CacheMiss(String),
    #[error(transparent)]
    Engine(#[from] crate::waf::EngineError),
}

/// What the connection state machine needs from the agent runtime: turn one
/// NOTIFY message into ACK actions.
///
/// `ApplicationTable` implements this by looking up the `app` KV field and
/// forwarding to the matching `Application`; `Connection` is generic over
/// `D: Dispatch` so the wire-level state machine is testable without a real
/// WAF engine or application table.
pub trait Dispatch: Send + Sync + 'static {
    /// Handles a single `coraza-req` message, setting the TRANSACTION `id`
    /// (and, on interruption, `action`/`status`/`data`) on `acker`.
    fn dispatch_request(&self, message: &spop::Message, acker: &mut Acker) -> Result<(), DispatchError>;

    /// Handles a single `coraza-res` message, setting the verdict fields on
    /// `acker` if the (previously cached) transaction is interrupted.
    fn dispatch_response(&self, message: &spop::Message, acker: &mut Acker) -> Result<(), DispatchError>;
}
