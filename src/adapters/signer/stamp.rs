//! Request Stamping - Operator Key Authentication for the Remote Signer
//!
//! Every request body is signed locally with the operator's P-256 key
//! (ECDSA over SHA-256, DER-encoded) and the result is sent as a
//! base64url `X-Stamp` header carrying `{publicKey, scheme, signature}`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use serde_json::json;

use super::point::{decompress_public_key, uncompressed};
use crate::error::SigningError;

/// Header carrying the stamp.
pub const STAMP_HEADER: &str = "X-Stamp";

/// Stamp scheme identifier.
pub const STAMP_SCHEME: &str = "SIGNATURE_SCHEME_TK_API_P256";

/// Operator key pair used to authenticate signer API calls.
pub struct ApiKeyStamper {
    /// Compressed public key, lowercase hex.
    public_key_hex: String,
    signing_key: SigningKey,
}

impl std::fmt::Debug for ApiKeyStamper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyStamper")
            .field("public_key", &self.public_key_hex)
            .finish_non_exhaustive()
    }
}

impl ApiKeyStamper {
    /// Build from hex key material and check the pair belongs together.
    ///
    /// The public key is decompressed and compared with the point derived
    /// from the private scalar.
    ///
    /// # Errors
    /// [`SigningError::InvalidKey`] for malformed keys or a mismatched pair.
    pub fn new(public_key_hex: &str, private_key_hex: &str) -> Result<Self, SigningError> {
        let private = private_key_hex.trim();
        let private = private.strip_prefix("0x").unwrap_or(private);
        let secret = hex::decode(private).map_err(|e| SigningError::InvalidKey(format!("private key: {e}")))?;
        let signing_key =
            SigningKey::from_slice(&secret).map_err(|e| SigningError::InvalidKey(format!("private key: {e}")))?;

        let (x, y) = decompress_public_key(public_key_hex)?;
        let derived = signing_key.verifying_key().to_encoded_point(false);
        if derived.as_bytes() != uncompressed(&x, &y).as_slice() {
            return Err(SigningError::InvalidKey(
                "public key does not match private key".into(),
            ));
        }

        let public = public_key_hex.trim();
        Ok(Self {
            public_key_hex: public.strip_prefix("0x").unwrap_or(public).to_ascii_lowercase(),
            signing_key,
        })
    }

    /// Compressed public key hex.
    pub fn public_key(&self) -> &str {
        &self.public_key_hex
    }

    /// Stamp value for the exact body bytes that will be sent.
    ///
    /// # Errors
    /// [`SigningError::InvalidKey`] if the ECDSA operation fails.
    pub fn stamp(&self, body: &[u8]) -> Result<String, SigningError> {
        let signature: Signature = self
            .signing_key
            .try_sign(body)
            .map_err(|e| SigningError::InvalidKey(format!("stamp signing failed: {e}")))?;

        let envelope = json!({
            "publicKey": self.public_key_hex,
            "scheme": STAMP_SCHEME,
            "signature": hex::encode(signature.to_der().as_bytes()),
        });
        Ok(URL_SAFE_NO_PAD.encode(envelope.to_string()))
    }
}
