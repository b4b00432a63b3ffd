use std::borrow::Cow;

use crate::data::{varint, Typed};

/// The Key-Value pair can be used in a KV-list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue<'a, T>(pub(crate) Cow<'a, str>, pub(crate) T);

impl<'a, T> KeyValue<'a, T>
where
    T: Clone + Into<Typed>,
{
    /// Size in bytes of this pair once encoded, name included.
    pub fn size(&self) -> usize {
        varint::size_of(self.0.len() as u64) + self.0.len() + self.1.clone().into().size()
    }
}

impl<T> From<(&'static str, T)> for KeyValue<'static, T> {
    fn from((key, value): (&'static str, T)) -> Self {
        KeyValue(key.into(), value)
    }
}

impl<T> From<(String, T)> for KeyValue<'_, T> {
    fn from((key, value): (String, T)) -> Self {
        KeyValue(key.into(), value)
    }
}
