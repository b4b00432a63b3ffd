use std::cmp;
use std::collections::HashSet;

use spop::{agent, haproxy, Capability, Error, Version};

/// The agent's side of the HELLO negotiation: what this agent is willing to
/// offer before it has seen HAProxy's HAPROXY-HELLO.
#[derive(Clone, Debug, PartialEq)]
pub struct Handshaking {
    pub supported_versions: Vec<Version>,
    pub max_frame_size: u32,
    pub capabilities: Vec<Capability>,
}

impl Default for Handshaking {
    fn default() -> Self {
        Handshaking {
            supported_versions: Version::SUPPORTED.to_vec(),
            max_frame_size: spop::MAX_FRAME_SIZE as u32,
            capabilities: vec![Capability::Pipelining],
        }
    }
}

impl Handshaking {
    /// Negotiates a [`Handshaked`] against a HAPROXY-HELLO, picking the
    /// highest mutually supported version, the smaller max-frame-size, and
    /// the capability intersection.
    pub fn handshake(mut self, mut hello: haproxy::Hello) -> Result<Handshaked, Error> {
        hello.supported_versions.sort();
        self.supported_versions.sort();

        let version = hello
            .supported_versions
            .into_iter()
            .rev()
            .find(|version| self.supported_versions.contains(version))
            .ok_or(Error::BadVersion)?;

        let max_frame_size = cmp::min(hello.max_frame_size, self.max_frame_size);

        let capabilities = hello
            .capabilities
            .into_iter()
            .collect::<HashSet<_>>()
            .intersection(&self.capabilities.into_iter().collect::<HashSet<_>>())
            .cloned()
            .collect::<Vec<_>>();

        if !capabilities.contains(&Capability::Pipelining) {
            return Err(Error::FragmentNotSupported);
        }

        Ok(Handshaked {
            version,
            max_frame_size,
            capabilities,
            healthcheck: hello.healthcheck.unwrap_or(false),
        })
    }
}

/// The negotiated parameters a connection settles on for its lifetime.
#[derive(Clone, Debug, PartialEq)]
pub struct Handshaked {
    pub version: Version,
    pub max_frame_size: u32,
    pub capabilities: Vec<Capability>,
    pub healthcheck: bool,
}

impl Handshaked {
    pub fn agent_hello(&self) -> agent::Hello {
        agent::Hello {
            version: self.version,
            max_frame_size: self.max_frame_size,
            capabilities: self.capabilities.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiates_min_frame_size_and_common_capabilities() {
        let hello = haproxy::Hello {
            supported_versions: vec![Version::V2_0],
            max_frame_size: 1024,
            capabilities: vec![Capability::Pipelining, Capability::Async],
            healthcheck: None,
            engine_id: None,
        };

        let handshaked = Handshaking::default().handshake(hello).unwrap();

        assert_eq!(handshaked.version, Version::V2_0);
        assert_eq!(handshaked.max_frame_size, 1024);
        assert_eq!(handshaked.capabilities, vec![Capability::Pipelining]);
        assert!(!handshaked.healthcheck);
    }

    #[test]
    fn rejects_unsupported_version() {
        let hello = haproxy::Hello {
            supported_versions: vec![Version::new(3, 0)],
            max_frame_size: 1024,
            capabilities: vec![Capability::Pipelining],
            healthcheck: None,
            engine_id: None,
        };

        assert_eq!(
            Handshaking::default().handshake(hello).unwrap_err(),
            Error::BadVersion
        );
    }

    #[test]
    fn rejects_missing_pipelining() {
        let hello = haproxy::Hello {
            supported_versions: vec![Version::V2_0],
            max_frame_size: 1024,
            capabilities: vec![Capability::Async],
            healthcheck: None,
            engine_id: None,
        };

        assert_eq!(
            Handshaking::default().handshake(hello).unwrap_err(),
            Error::FragmentNotSupported
        );
    }
}
