//! The Stream Processing Offload Protocol (SPOP).
//!
//! SPOP is the binary, length-prefixed protocol a reverse proxy (HAProxy)
//! uses to offload pieces of an HTTP transaction to an external agent. This
//! crate decodes and encodes the wire format; it has no opinion about what
//! an agent does with the frames it carries.

#[macro_use]
extern crate tracing;

mod action;
mod caps;
mod data;
mod error;
mod frame;
mod version;

pub use self::action::{Action, Scope};
pub use self::caps::Capability;
pub use self::data::varint;
pub use self::data::{BufExt, BufMutExt, Typed};
pub use self::error::{Error, Result};
pub use self::frame::{
    agent::{Ack as AgentAck, Disconnect as AgentDisconnect, Hello as AgentHello},
    haproxy::{Disconnect as HaproxyDisconnect, Hello as HaproxyHello, Notify as HaproxyNotify},
    kv, BufCodec, Codec, Disconnect, Flags, Frame, FrameId, Framer, Message, Metadata,
    StreamId, Type as FrameType, MAX_FRAME_SIZE,
};
pub use self::version::Version;
