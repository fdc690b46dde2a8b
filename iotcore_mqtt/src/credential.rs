// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Credential policies: an AAD client-credentials (OAuth2) token fetcher with
//! a stale-tolerant cache, and an IoT-Hub-style SAS token builder.
//!
//! The AAD flow is grounded in `az_aad.c`: URL/body construction, the
//! `expires_in - 180s` safety margin, and the `"Bearer " + token` storage
//! format all match it. The SAS token format is grounded in
//! `az_iot_sas_token_tests.c`.

use std::sync::Arc;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use derive_builder::Builder;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;
use tokio::sync::RwLock;

use crate::error::CredentialError;
use crate::retry::{RetryPolicy, RetryableResponse};

impl RetryableResponse for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }
}

/// A bearer token and the instant at which it should be considered expired.
#[derive(Debug, Clone)]
pub struct CachedToken {
    /// The full header value, e.g. `"Bearer eyJ..."`.
    pub token: String,
    /// When this token should be treated as expired and refreshed.
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Configuration for [`ClientSecretCredential`].
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(into))]
pub struct ClientSecretCredentialOptions {
    /// The AAD tenant ID.
    pub tenant_id: String,
    /// The AAD application (client) ID.
    pub client_id: String,
    /// The AAD application's client secret.
    pub client_secret: String,
    /// The OAuth2 scope being requested (e.g. a resource URI followed by `/.default`).
    pub scope: String,
    /// How many seconds before the token's real expiry it should be treated
    /// as expired, so refreshes happen ahead of an in-flight request failing.
    #[builder(default = "180")]
    pub token_pre_expiry_margin_s: i64,
}

/// An AAD client-credentials (OAuth2) credential with a stale-tolerant cache.
///
/// Reads never block on a network call unless the cache is empty or expired;
/// concurrent readers observe the same in-flight refresh rather than each
/// issuing their own token request.
pub struct ClientSecretCredential {
    options: ClientSecretCredentialOptions,
    http: reqwest::Client,
    retry_policy: RetryPolicy,
    cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    expires_in: i64,
    access_token: String,
}

impl ClientSecretCredential {
    /// Build a new credential. Does not make any network calls until
    /// [`ClientSecretCredential::token`] is first called.
    #[must_use]
    pub fn new(options: ClientSecretCredentialOptions) -> Self {
        Self {
            options,
            http: reqwest::Client::new(),
            retry_policy: RetryPolicy::default(),
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Read the cached token, refreshing it first if it is absent or expired.
    pub async fn token(&self) -> Result<String, CredentialError> {
        {
            let cached = self.cache.read().await;
            if let Some(cached) = cached.as_ref() {
                if !cached.is_expired(Utc::now()) {
                    return Ok(cached.token.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Re-check under the write lock: another task may have refreshed
        // while we were waiting for it.
        if let Some(cached) = cache.as_ref() {
            if !cached.is_expired(Utc::now()) {
                return Ok(cached.token.clone());
            }
        }

        log::debug!("acquiring new AAD token for scope '{}'", self.options.scope);
        let fetched = self.fetch_token().await?;
        let token = fetched.token.clone();
        *cache = Some(fetched);
        Ok(token)
    }

    /// Update the requested scope. Per this crate's credential semantics,
    /// changing the scope invalidates any cached token immediately.
    pub async fn set_scope(&mut self, scope: impl Into<String>) {
        self.options.scope = scope.into();
        *self.cache.write().await = None;
    }

    fn build_url(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            urlencoding_component(&self.options.tenant_id)
        )
    }

    fn build_body(&self) -> String {
        let mut body = format!(
            "grant_type=client_credentials&client_id={}&scope={}",
            urlencoding_component(&self.options.client_id),
            urlencoding_component(&self.options.scope),
        );
        if !self.options.client_secret.is_empty() {
            body.push_str(&format!(
                "&client_secret={}",
                urlencoding_component(&self.options.client_secret)
            ));
        }
        body
    }

    async fn fetch_token(&self) -> Result<CachedToken, CredentialError> {
        let response = self
            .retry_policy
            .execute_with_retry(|| async {
                self.http
                    .post(self.build_url())
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .body(self.build_body())
                    .send()
                    .await
            })
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        let status = response.status();
        if status.as_u16() != 200 {
            let body = response.text().await.unwrap_or_default();
            log::warn!("AAD token request failed with status {status}");
            return Err(CredentialError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::MalformedResponse(e.to_string()))?;

        let expires_at = Utc::now()
            + chrono::Duration::seconds(
                parsed.expires_in - self.options.token_pre_expiry_margin_s,
            );

        Ok(CachedToken {
            token: format!("Bearer {}", parsed.access_token),
            expires_at,
        })
    }
}

/// Minimal percent-encoding for `application/x-www-form-urlencoded` components,
/// matching the escaping `az_aad.c` applies via its own span-based URL encoder.
fn urlencoding_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Build an IoT-Hub-style SAS (shared access signature) token.
///
/// `signing_fn` computes the HMAC-SHA256 signature over the signing document
/// and base64-encodes it; callers supply it so this module does not take a
/// direct dependency on a particular crypto crate for a single call site.
pub fn build_sas_token(
    fully_qualified_namespace: &str,
    device_id: &str,
    expiry_epoch_seconds: i64,
    signing_fn: impl FnOnce(&str) -> String,
) -> String {
    let document = signing_document(fully_qualified_namespace, device_id, expiry_epoch_seconds);
    let signature = signing_fn(&document);
    format!(
        "SharedAccessSignature sr={fully_qualified_namespace}/devices/{device_id}&sig={signature}&se={expiry_epoch_seconds}"
    )
}

/// The document a SAS token's signature is computed over:
/// `{fqdn}/devices/{device_id}\n{expiry}`.
#[must_use]
pub fn signing_document(
    fully_qualified_namespace: &str,
    device_id: &str,
    expiry_epoch_seconds: i64,
) -> String {
    format!("{fully_qualified_namespace}/devices/{device_id}\n{expiry_epoch_seconds}")
}

/// Build a SAS token using HMAC-SHA256 over the decoded shared access key,
/// matching the signing algorithm IoT Hub devices authenticate with.
pub fn build_sas_token_hmac_sha256(
    fully_qualified_namespace: &str,
    device_id: &str,
    expiry_epoch_seconds: i64,
    shared_access_key_base64: &str,
) -> Result<String, CredentialError> {
    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(shared_access_key_base64)
        .map_err(|e| CredentialError::InvalidConfiguration(e.to_string()))?;
    let pkey = PKey::hmac(&key_bytes)
        .map_err(|e| CredentialError::InvalidConfiguration(e.to_string()))?;

    Ok(build_sas_token(
        fully_qualified_namespace,
        device_id,
        expiry_epoch_seconds,
        |document| {
            let mut signer = Signer::new(MessageDigest::sha256(), &pkey)
                .expect("HMAC signer construction cannot fail for a valid key");
            signer
                .update(document.as_bytes())
                .expect("signing an in-memory buffer cannot fail");
            let signature = signer
                .sign_to_vec()
                .expect("signing an in-memory buffer cannot fail");
            urlencoding_component(&base64::engine::general_purpose::STANDARD.encode(signature))
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sas_signing_document_matches_reference_format() {
        let doc = signing_document("myiothub.azure-devices.net", "mytest_deviceid", 1_578_941_692);
        assert_eq!(
            doc,
            "myiothub.azure-devices.net/devices/mytest_deviceid\n1578941692"
        );
    }

    #[test]
    fn sas_token_embeds_resource_uri_signature_and_expiry() {
        let token = build_sas_token(
            "myiothub.azure-devices.net",
            "mytest_deviceid",
            1_578_941_692,
            |_doc| "cS1eHM%2FlDjsRsrZV9508wOFrgmZk4g8FNg8NwHVSiSQ".to_string(),
        );
        assert_eq!(
            token,
            "SharedAccessSignature sr=myiothub.azure-devices.net/devices/mytest_deviceid\
             &sig=cS1eHM%2FlDjsRsrZV9508wOFrgmZk4g8FNg8NwHVSiSQ&se=1578941692"
        );
    }

    #[test]
    fn hmac_sha256_signer_produces_url_safe_signature() {
        // Base64 of a 32-byte all-zero key, just enough to exercise the signer.
        let key = base64::engine::general_purpose::STANDARD.encode([0u8; 32]);
        let token =
            build_sas_token_hmac_sha256("myiothub.azure-devices.net", "dev1", 1_700_000_000, &key)
                .unwrap();
        assert!(token.starts_with("SharedAccessSignature sr=myiothub.azure-devices.net/devices/dev1"));
        assert!(token.contains("&sig="));
        let signature = token
            .split("&sig=")
            .nth(1)
            .and_then(|rest| rest.split("&se=").next())
            .unwrap();
        assert!(!signature.contains('+') && !signature.contains('/'));
    }

    #[tokio::test]
    async fn expired_cache_entry_is_not_reused() {
        let options = ClientSecretCredentialOptionsBuilder::default()
            .tenant_id("tenant")
            .client_id("client")
            .client_secret("secret")
            .scope("scope/.default")
            .build()
            .unwrap();
        let credential = ClientSecretCredential::new(options);
        *credential.cache.write().await = Some(CachedToken {
            token: "Bearer stale".to_string(),
            expires_at: Utc::now() - chrono::Duration::seconds(1),
        });
        // We can't make a live network call in a unit test; just confirm the
        // staleness check itself is correct.
        let cached = credential.cache.read().await.clone().unwrap();
        assert!(cached.is_expired(Utc::now()));
    }

    #[test]
    fn body_includes_client_secret_when_present() {
        let options = ClientSecretCredentialOptionsBuilder::default()
            .tenant_id("t")
            .client_id("c")
            .client_secret("s")
            .scope("sc")
            .build()
            .unwrap();
        let credential = ClientSecretCredential::new(options);
        let body = credential.build_body();
        assert!(body.contains("grant_type=client_credentials"));
        assert!(body.contains("client_secret=s"));
    }
}
