use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Bytes, BytesMut};
use derive_more::{From, TryInto};

use crate::data::varint;

/// A typed value, as carried in KV payloads and action arguments.
///
/// Bytewise: `<TYPE:4 bits><FLAGS:4 bits><DATA>`. Integers are varint
/// encoded; string/binary are varint-length-prefixed bytes.
#[derive(Clone, Debug, PartialEq, Eq, From, TryInto)]
pub enum Typed {
    Null,
    Boolean(bool),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    String(String),
    Binary(Bytes),
}

impl From<()> for Typed {
    fn from(_: ()) -> Self {
        Typed::Null
    }
}

impl From<&str> for Typed {
    fn from(s: &str) -> Self {
        Typed::String(s.to_string())
    }
}

impl From<String> for Typed {
    fn from(s: String) -> Self {
        Typed::String(s)
    }
}

impl<'a> From<&'a [u8]> for Typed {
    fn from(b: &'a [u8]) -> Self {
        Typed::Binary(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<u8>> for Typed {
    fn from(buf: Vec<u8>) -> Self {
        Typed::Binary(buf.into())
    }
}

impl From<BytesMut> for Typed {
    fn from(buf: BytesMut) -> Self {
        Typed::Binary(buf.freeze())
    }
}

impl From<IpAddr> for Typed {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Typed::Ipv4(v4),
            IpAddr::V6(v6) => Typed::Ipv6(v6),
        }
    }
}

impl Typed {
    pub(crate) const IPV4_ADDR_LEN: usize = 4;
    pub(crate) const IPV6_ADDR_LEN: usize = 16;

    pub const TYPE_SIZE: usize = 1;

    /// Size in bytes of the typed-value encoding, tag byte included.
    pub fn size(&self) -> usize {
        Self::TYPE_SIZE
            + match self {
                Typed::Null | Typed::Boolean(_) => 0,
                Typed::Int32(n) => varint::size_of(*n as u64),
                Typed::Uint32(n) => varint::size_of(*n as u64),
                Typed::Int64(n) => varint::size_of(*n as u64),
                Typed::Uint64(n) => varint::size_of(*n),
                Typed::Ipv4(_) => Self::IPV4_ADDR_LEN,
                Typed::Ipv6(_) => Self::IPV6_ADDR_LEN,
                Typed::String(s) => varint::size_of(s.len() as u64) + s.len(),
                Typed::Binary(b) => varint::size_of(b.len() as u64) + b.len(),
            }
    }
}
