// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! RPC command envoys: the server-side executor (component L) and the
//! client-side invoker (component M), correlated over MQTT 5 properties
//! (`correlation_data`, `response_topic`, `content_type`,
//! `message_expiry_interval`, and the `status` user property).

pub mod executor;
pub mod invoker;

pub use executor::Executor;
pub use invoker::Invoker;

/// The `status` MQTT 5 user property carries an HTTP-like status code.
pub(crate) const STATUS_PROPERTY: &str = "status";
/// The `status-message` MQTT 5 user property carries a human-readable detail
/// string alongside a non-success `status`.
pub(crate) const STATUS_MESSAGE_PROPERTY: &str = "statusMessage";

/// Default command-request topic template, per spec §6.
pub(crate) const DEFAULT_COMMAND_REQUEST_TEMPLATE: &str =
    "services/{modelId}/{executorId}/command/{commandName}/request";
/// Default command-response topic template, per spec §6. Scoped under
/// `clients/{invokerClientId}` so an invoker only ever sees its own responses.
pub(crate) const DEFAULT_COMMAND_RESPONSE_TEMPLATE: &str =
    "clients/{invokerClientId}/services/{modelId}/{executorId}/command/{commandName}/response";

/// Status codes used on RPC responses, named per spec's HTTP-like taxonomy.
pub mod status {
    /// The command executed successfully.
    pub const OK: u16 = 200;
    /// The request was malformed (e.g. missing `response_topic`/`correlation_data`).
    pub const BAD_REQUEST: u16 = 400;
    /// The executor does not recognize the command.
    pub const NOT_FOUND: u16 = 404;
    /// The request's `content_type` did not match the configured one.
    pub const UNSUPPORTED_MEDIA_TYPE: u16 = 415;
    /// The command handler returned an application-defined failure.
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    /// The command did not complete within `command_execution_timeout_s`.
    pub const GATEWAY_TIMEOUT: u16 = 504;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_status_is_504() {
        assert_eq!(status::GATEWAY_TIMEOUT, 504);
    }
}
