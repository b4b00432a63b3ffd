use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The typed-value tag byte's low nibble.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Type {
    Null,
    Boolean,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Ipv4,
    Ipv6,
    String,
    Binary,
}

impl Type {
    pub(crate) const MASK: u8 = 0x0F;
}

bitflags::bitflags! {
    /// The typed-value tag byte's high nibble; only meaningful for Boolean.
    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct Flags: u8 {
        const FALSE = 0x00;
        const TRUE = 0x10;
    }
}

impl Flags {
    pub(crate) const MASK: u8 = 0xF0;
}
