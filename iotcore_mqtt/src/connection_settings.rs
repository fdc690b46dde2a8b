// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Connection-level configuration, sourced either programmatically via the
//! builder or from environment variables via [`MqttConnectionSettingsBuilder::from_environment`].

use derive_builder::Builder;

/// Settings used to establish an MQTT 5 connection.
#[derive(Clone, Builder, Debug)]
#[builder(pattern = "owned", setter(into), build_fn(validate = "Self::validate"))]
pub struct MqttConnectionSettings {
    /// The client identifier presented in the CONNECT packet.
    pub client_id: String,
    /// The broker hostname.
    pub hostname: String,
    /// The broker TCP port.
    #[builder(default = "8883")]
    pub tcp_port: u16,
    /// Keep-alive interval, in seconds, negotiated with the broker.
    #[builder(default = "240")]
    pub keep_alive_s: u16,
    /// Session expiry interval, in seconds.
    #[builder(default = "3600")]
    pub session_expiry_s: u32,
    /// Timeout for the initial TCP/TLS + CONNECT handshake, in seconds.
    #[builder(default = "30")]
    pub connection_timeout_s: u32,
    /// Whether to request a clean (non-resumed) session.
    #[builder(default = "false")]
    pub clean_start: bool,
    /// Username for username/password authentication.
    #[builder(default)]
    pub username: Option<String>,
    /// Password for username/password authentication, mutually exclusive
    /// with `password_file` and `sat_file`.
    #[builder(default)]
    pub password: Option<String>,
    /// Path to a file containing the password, re-read on each connect.
    #[builder(default)]
    pub password_file: Option<String>,
    /// Path to a service account token (SAT) file, mutually exclusive with
    /// `password`/`password_file`.
    #[builder(default)]
    pub sat_file: Option<String>,
    /// Whether to use TLS for the connection.
    #[builder(default = "true")]
    pub use_tls: bool,
    /// Path to a CA bundle used to validate the broker's certificate.
    #[builder(default)]
    pub ca_file: Option<String>,
    /// Path to a client certificate for mutual TLS.
    #[builder(default)]
    pub cert_file: Option<String>,
    /// Path to the private key matching `cert_file`.
    #[builder(default)]
    pub key_file: Option<String>,
}

impl MqttConnectionSettingsBuilder {
    fn validate(&self) -> Result<(), String> {
        if matches!(&self.hostname, Some(h) if h.trim().is_empty()) {
            return Err("hostname must not be empty".to_string());
        }
        let client_id_missing = match &self.client_id {
            None => true,
            Some(id) => id.is_empty(),
        };
        if !self.clean_start.unwrap_or(false) && client_id_missing {
            return Err("client_id is mandatory when clean_start is false".to_string());
        }
        if self.password.as_ref().flatten().is_some() && self.password_file.as_ref().flatten().is_some()
        {
            return Err("password and password_file are mutually exclusive".to_string());
        }
        if self.sat_file.as_ref().flatten().is_some()
            && (self.password.as_ref().flatten().is_some()
                || self.password_file.as_ref().flatten().is_some())
        {
            return Err("sat_file is mutually exclusive with password/password_file".to_string());
        }
        let has_cert = self.cert_file.as_ref().flatten().is_some();
        let has_key = self.key_file.as_ref().flatten().is_some();
        if has_cert != has_key {
            return Err("cert_file and key_file must be provided together".to_string());
        }
        Ok(())
    }
}

impl MqttConnectionSettingsBuilder {
    /// Build a [`MqttConnectionSettingsBuilder`] seeded from environment variables.
    ///
    /// Recognized variables: `AIO_MQTT_CLIENT_ID`, `AIO_BROKER_HOSTNAME`,
    /// `AIO_BROKER_TCP_PORT`, `AIO_MQTT_KEEP_ALIVE`, `AIO_MQTT_SESSION_EXPIRY`,
    /// `AIO_MQTT_CLEAN_START`, `AIO_MQTT_USERNAME`, `AIO_MQTT_PASSWORD_FILE`,
    /// `AIO_MQTT_USE_TLS`, `AIO_TLS_CA_FILE`, `AIO_TLS_CERT_FILE`,
    /// `AIO_TLS_KEY_FILE`, `AIO_SAT_FILE`.
    #[must_use]
    pub fn from_environment() -> Self {
        let mut builder = MqttConnectionSettingsBuilder::default();

        if let Ok(v) = std::env::var("AIO_MQTT_CLIENT_ID") {
            builder = builder.client_id(v);
        }
        if let Ok(v) = std::env::var("AIO_BROKER_HOSTNAME") {
            builder = builder.hostname(v);
        }
        if let Ok(v) = std::env::var("AIO_BROKER_TCP_PORT") {
            if let Ok(port) = v.parse() {
                builder = builder.tcp_port(port);
            }
        }
        if let Ok(v) = std::env::var("AIO_MQTT_KEEP_ALIVE") {
            if let Ok(secs) = v.parse() {
                builder = builder.keep_alive_s(secs);
            }
        }
        if let Ok(v) = std::env::var("AIO_MQTT_SESSION_EXPIRY") {
            if let Ok(secs) = v.parse() {
                builder = builder.session_expiry_s(secs);
            }
        }
        if let Ok(v) = std::env::var("AIO_MQTT_CLEAN_START") {
            if let Ok(flag) = v.parse() {
                builder = builder.clean_start(flag);
            }
        }
        if let Ok(v) = std::env::var("AIO_MQTT_USERNAME") {
            builder = builder.username(Some(v));
        }
        if let Ok(v) = std::env::var("AIO_MQTT_PASSWORD_FILE") {
            builder = builder.password_file(Some(v));
        }
        if let Ok(v) = std::env::var("AIO_MQTT_USE_TLS") {
            if let Ok(flag) = v.parse() {
                builder = builder.use_tls(flag);
            }
        }
        if let Ok(v) = std::env::var("AIO_TLS_CA_FILE") {
            builder = builder.ca_file(Some(v));
        }
        if let Ok(v) = std::env::var("AIO_TLS_CERT_FILE") {
            builder = builder.cert_file(Some(v));
        }
        if let Ok(v) = std::env::var("AIO_TLS_KEY_FILE") {
            builder = builder.key_file(Some(v));
        }
        if let Ok(v) = std::env::var("AIO_SAT_FILE") {
            builder = builder.sat_file(Some(v));
        }

        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_env::with_vars;
    use test_case::test_case;

    fn minimal() -> MqttConnectionSettingsBuilder {
        MqttConnectionSettingsBuilder::default()
            .client_id("device-1")
            .hostname("broker.example.com")
    }

    #[test]
    fn minimal_settings_build_with_defaults() {
        let settings = minimal().build().unwrap();
        assert_eq!(settings.tcp_port, 8883);
        assert_eq!(settings.keep_alive_s, 240);
        assert!(!settings.clean_start);
        assert!(settings.use_tls);
    }

    #[test]
    fn empty_hostname_is_rejected() {
        let err = MqttConnectionSettingsBuilder::default()
            .client_id("device-1")
            .hostname("")
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn missing_client_id_is_rejected_unless_clean_start() {
        let err = MqttConnectionSettingsBuilder::default()
            .hostname("broker.example.com")
            .build();
        assert!(err.is_err());

        let ok = MqttConnectionSettingsBuilder::default()
            .hostname("broker.example.com")
            .clean_start(true)
            .build();
        assert!(ok.is_err(), "client_id has no #[builder(default)] so it must still be supplied");
    }

    #[test_case(Some("pw"), Some("file"), None; "password and password_file")]
    #[test_case(None, Some("file"), Some("sat"); "password_file and sat_file")]
    fn mutually_exclusive_credentials_are_rejected(
        password: Option<&str>,
        password_file: Option<&str>,
        sat_file: Option<&str>,
    ) {
        let mut builder = minimal();
        if let Some(p) = password {
            builder = builder.password(Some(p.to_string()));
        }
        if let Some(f) = password_file {
            builder = builder.password_file(Some(f.to_string()));
        }
        if let Some(s) = sat_file {
            builder = builder.sat_file(Some(s.to_string()));
        }
        assert!(builder.build().is_err());
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let err = minimal().cert_file(Some("cert.pem".to_string())).build();
        assert!(err.is_err());
    }

    #[test]
    fn from_environment_reads_expected_variables() {
        with_vars(
            [
                ("AIO_MQTT_CLIENT_ID", Some("env-client")),
                ("AIO_BROKER_HOSTNAME", Some("env.example.com")),
                ("AIO_BROKER_TCP_PORT", Some("1883")),
                ("AIO_MQTT_KEEP_ALIVE", Some("60")),
            ],
            || {
                let settings = MqttConnectionSettingsBuilder::from_environment()
                    .build()
                    .unwrap();
                assert_eq!(settings.client_id, "env-client");
                assert_eq!(settings.hostname, "env.example.com");
                assert_eq!(settings.tcp_port, 1883);
                assert_eq!(settings.keep_alive_s, 60);
            },
        );
    }
}
