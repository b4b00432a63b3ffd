use parse_display::{Display, FromStr};

/// Capabilities a peer may advertise in HELLO.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, FromStr)]
#[display(style = "snake_case")]
pub enum Capability {
    /// Ability to support fragmented payload in received frames.
    Fragmentation,
    /// Ability to decouple NOTIFY and ACK frames.
    Pipelining,
    /// Like pipelining, but any TCP connection between HAProxy and the agent
    /// may carry an ACK frame.
    Async,
}
