use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::data::Typed;

/// Scope a variable is bound in, as seen by the proxy.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Scope {
    Process = 0,
    Session = 1,
    Transaction = 2,
    Request = 3,
    Response = 4,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub(crate) enum Type {
    SetVar = 1,
    UnsetVar = 2,
}

/// An action returned to the proxy inside an ACK frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    SetVar {
        scope: Scope,
        name: String,
        value: Typed,
    },
    UnsetVar {
        scope: Scope,
        name: String,
    },
}

impl Action {
    pub fn set_var<S: Into<String>, V: Into<Typed>>(scope: Scope, name: S, value: V) -> Self {
        Action::SetVar {
            scope,
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn unset_var<S: Into<String>>(scope: Scope, name: S) -> Self {
        Action::UnsetVar {
            scope,
            name: name.into(),
        }
    }

    pub(crate) fn ty(&self) -> Type {
        match self {
            Action::SetVar { .. } => Type::SetVar,
            Action::UnsetVar { .. } => Type::UnsetVar,
        }
    }

    /// Number of fixed fields following the type/nb-args byte pair, per the
    /// wire layout used by `frame::encode`/`frame::decode`.
    pub(crate) fn nb_args(&self) -> u8 {
        match self {
            Action::SetVar { .. } => 3,
            Action::UnsetVar { .. } => 2,
        }
    }

    pub fn size(&self) -> usize {
        let fixed = 2 + 1; // type byte, nb-args byte, scope byte
        match self {
            Action::SetVar { name, value, .. } => {
                fixed + crate::data::varint::size_of(name.len() as u64)
                    + name.len()
                    + value.size()
            }
            Action::UnsetVar { name, .. } => {
                fixed + crate::data::varint::size_of(name.len() as u64) + name.len()
            }
        }
    }
}
