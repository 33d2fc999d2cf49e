//! CLOB Authentication — HMAC-SHA256 Request Signing
//!
//! Signs CLOB API requests with HMAC-SHA256 (L2 headers) and builds the
//! EIP-712 wallet headers (L1) used to derive credentials. Every member
//! trades with their own long-lived API credentials, so signing takes the
//! credentials per call. Builder attribution headers are signed the same
//! way with the operator's builder secret, loaded once at startup.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};

use crate::domain::round::ApiCredentials;

/// Ordered `(name, value)` request headers.
pub type AuthHeaders = Vec<(&'static str, String)>;

/// Current Unix timestamp in seconds, as sent in `POLY_TIMESTAMP`.
pub fn timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}

/// Decode a base64 secret; the exchange issues base64url, padded or not.
fn decode_secret(secret: &str) -> Result<Vec<u8>> {
    let secret = secret.trim();
    URL_SAFE
        .decode(secret)
        .or_else(|_| URL_SAFE_NO_PAD.decode(secret))
        .or_else(|_| STANDARD.decode(secret))
        .context("API secret is not valid base64")
}

/// HMAC-SHA256 request signature.
///
/// Signature format: base64url(HMAC-SHA256(decoded secret,
/// timestamp + method + path + body)). The secret never leaves the process.
pub fn sign(secret: &str, timestamp: &str, method: &str, path: &str, body: &str) -> Result<String> {
    let key = decode_secret(secret)?;
    let message = format!("{timestamp}{method}{path}{body}");
    let mac = hmac_sha256::HMAC::mac(message.as_bytes(), &key);
    Ok(URL_SAFE.encode(mac))
}

/// Level-2 headers authenticating a member's request.
pub fn l2_headers(
    address: &str,
    credentials: &ApiCredentials,
    method: &str,
    path: &str,
    body: &str,
) -> Result<AuthHeaders> {
    let ts = timestamp();
    let signature = sign(&credentials.secret, &ts, method, path, body)?;
    Ok(vec![
        ("POLY_ADDRESS", address.to_string()),
        ("POLY_API_KEY", credentials.api_key.clone()),
        ("POLY_PASSPHRASE", credentials.passphrase.clone()),
        ("POLY_TIMESTAMP", ts),
        ("POLY_SIGNATURE", signature),
    ])
}

/// Level-1 headers for credential derivation, signed by the wallet itself.
pub fn l1_headers(address: &str, signature_hex: &str, timestamp: &str, nonce: u64) -> AuthHeaders {
    vec![
        ("POLY_ADDRESS", address.to_string()),
        ("POLY_SIGNATURE", signature_hex.to_string()),
        ("POLY_TIMESTAMP", timestamp.to_string()),
        ("POLY_NONCE", nonce.to_string()),
    ]
}

/// Operator builder credentials for order attribution.
#[derive(Clone)]
pub struct BuilderAuth {
    /// Builder API key.
    api_key: String,
    /// Builder secret (never sent in headers).
    secret: String,
    /// Builder passphrase.
    passphrase: String,
}

impl fmt::Debug for BuilderAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderAuth")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl BuilderAuth {
    /// Validate and hold builder credentials.
    ///
    /// # Errors
    /// When the secret is not base64.
    pub fn new(api_key: String, secret: String, passphrase: String) -> Result<Self> {
        decode_secret(&secret).context("POLY_BUILDER_SECRET")?;
        Ok(Self {
            api_key,
            secret,
            passphrase,
        })
    }

    /// Builder attribution headers for one request.
    pub fn headers(&self, method: &str, path: &str, body: &str) -> Result<AuthHeaders> {
        let ts = timestamp();
        let signature = sign(&self.secret, &ts, method, path, body)?;
        Ok(vec![
            ("POLY_BUILDER_API_KEY", self.api_key.clone()),
            ("POLY_BUILDER_PASSPHRASE", self.passphrase.clone()),
            ("POLY_BUILDER_TIMESTAMP", ts),
            ("POLY_BUILDER_SIGNATURE", signature),
        ])
    }
}
