// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Envoys for Telemetry operations.
use crate::ProtocolVersion;

/// This module contains the telemetry sender implementation.
pub mod sender;

/// This module contains the telemetry receiver implementation.
pub mod receiver;

/// IoT-Hub-style telemetry topic builder, an alternate topic convention to
/// the template-based one `receiver`/`sender` use.
pub mod topic;

/// Re-export the telemetry sender and receiver for ease of use.
pub use receiver::Receiver;
pub use sender::Sender;

/// Protocol version used by all envoys in this module.
pub(crate) const TELEMETRY_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };
/// Assumed version if a publish carries no `__protVer` user property.
pub(crate) const DEFAULT_TELEMETRY_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };
/// Major protocol versions this crate's telemetry envoys accept.
pub(crate) const SUPPORTED_PROTOCOL_VERSIONS: &[u32] = &[1];
