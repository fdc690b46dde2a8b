// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! RPC and telemetry envoys built over [`iotcore_mqtt`]'s connection core:
//! a telemetry consumer (component K), an RPC command executor (component L),
//! an RPC command invoker (component M), and the topic-template machinery
//! (component N) and property bag (component B) they share.

#![warn(missing_docs)]

use std::fmt;

pub mod common;
pub mod rpc;
pub mod telemetry;

#[macro_use]
extern crate derive_builder;

/// The `major.minor` protocol version carried in the `__protVer` user
/// property on telemetry and RPC traffic (component N's token machinery is
/// used for topics; this is the parallel version negotiation on payload
/// envelopes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    /// Major version. A mismatch here is not supported.
    pub major: u32,
    /// Minor version. Additive changes only; receivers ignore a minor bump.
    pub minor: u32,
}

impl ProtocolVersion {
    /// Parse a `"{major}.{minor}"` string, e.g. `"1.0"`.
    #[must_use]
    pub fn parse_protocol_version(s: &str) -> Option<Self> {
        let (major, minor) = s.split_once('.')?;
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }

    /// Whether this version's major component is one of `supported_majors`.
    /// Minor versions are assumed additive/backwards-compatible.
    #[must_use]
    pub fn is_supported(&self, supported_majors: &[u32]) -> bool {
        supported_majors.contains(&self.major)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Include the README doc on a struct when running doctests to validate that the code in the
/// README can compile to verify that it has not rotted.
#[doc = include_str!("../README.md")]
#[cfg(doctest)]
struct ReadmeDoctests;

#[cfg(test)]
mod tests {
    use super::ProtocolVersion;

    #[test]
    fn parses_major_minor() {
        assert_eq!(
            ProtocolVersion::parse_protocol_version("1.0"),
            Some(ProtocolVersion { major: 1, minor: 0 })
        );
        assert_eq!(
            ProtocolVersion::parse_protocol_version("2.5"),
            Some(ProtocolVersion { major: 2, minor: 5 })
        );
    }

    #[test]
    fn rejects_unparsable_strings() {
        assert_eq!(ProtocolVersion::parse_protocol_version("garbage"), None);
        assert_eq!(ProtocolVersion::parse_protocol_version("1"), None);
        assert_eq!(ProtocolVersion::parse_protocol_version("a.b"), None);
    }

    #[test]
    fn is_supported_checks_major_only() {
        let version = ProtocolVersion { major: 1, minor: 4 };
        assert!(version.is_supported(&[1]));
        assert!(!version.is_supported(&[2, 3]));
    }

    #[test]
    fn displays_as_major_dot_minor() {
        assert_eq!(ProtocolVersion { major: 1, minor: 0 }.to_string(), "1.0");
    }
}
