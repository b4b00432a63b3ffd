use parse_display::{Display, FromStr};

/// The SPOP version, `Major.Minor`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, FromStr)]
#[display("{major}.{minor}")]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Default for Version {
    fn default() -> Self {
        Version::V2_0
    }
}

impl Version {
    /// The SPOP versions this agent supports.
    pub const SUPPORTED: &'static [Version] = &[Self::V2_0];
    pub const V2_0: Version = Version { major: 2, minor: 0 };

    pub const fn new(major: u8, minor: u8) -> Self {
        Version { major, minor }
    }
}
