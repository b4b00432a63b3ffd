//! The agent runtime: SPOP connection state machine, application table, WAF
//! phase orchestration, transaction cache and log sink.
//!
//! [`spop`] decodes and encodes the wire protocol; this crate decides what to
//! do with the frames once they're decoded.

#[macro_use]
extern crate tracing;

pub use spop;

mod acker;
mod agent;
mod application;
mod conn;
mod dispatch;
mod error;
mod handshake;
mod interrupt;
mod logsink;
mod model;
mod table;
mod txcache;
mod waf;

pub use self::acker::Acker;
pub use self::agent::{Agent, AgentConfig};
pub use self::application::{Application, ApplicationConfig};
pub use self::conn::{Connection, State as ConnState};
pub use self::dispatch::{Dispatch, DispatchError};
pub use self::error::{Context, Error, Reason, Result};
pub use self::handshake::{Handshaked, Handshaking};
pub use self::interrupt::{InterruptVerdict, MatchedRule, Verdict};
pub use self::logsink::{
    FirewallLogEnvelope, LogSink, LogStore, NullLogStore, StoreError, VecLogStore,
};
pub use self::model::{ApplicationRequest, ApplicationResponse};
pub use self::table::ApplicationTable;
pub use self::txcache::TxCache;
pub use self::waf::{EngineError, PhaseOutcome, StubEngine, WafEngine};
