//! Remote Digest Signer - Candidate Identities over the Custodial Service
//!
//! The remote service does not accept one canonical identity format for
//! every wallet, nor one payload encoding for every identity. Signing is
//! therefore an ordered list of (identity, encoding) attempts, tried one
//! after another until the service returns a usable signature.
//!
//! Durable key handles are resolved once per (organization, wallet) and
//! cached for the process lifetime. Concurrent lookups for the same pair
//! share one in-flight future; failures are evicted so they can be retried.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::adapters::normalize::{classify_signer_response, normalize_signature, parse_key_listing};
use crate::error::SigningError;
use crate::ports::signer::{DigestSigner, RecoverableSignature, SignerApi, SignerIdentity};

type HandleFuture = Shared<BoxFuture<'static, Result<String, String>>>;

/// One (identity, payload) pair to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignAttempt {
    /// `signWith` value.
    pub sign_with: String,
    /// Hex payload in the encoding variant of this attempt.
    pub payload: String,
}

/// Identity candidates in the order they are tried, de-duplicated:
/// checksummed address, the address as stored, its lowercase form, then
/// the key handle.
pub fn signing_candidates(wallet: &str, key_handle: Option<&str>) -> Vec<String> {
    let wallet = wallet.trim();
    let checksummed = Address::from_str(wallet).map_or_else(|_| wallet.to_string(), |a| a.to_checksum(None));

    let mut out: Vec<String> = Vec::with_capacity(4);
    for candidate in [
        Some(checksummed),
        Some(wallet.to_string()),
        Some(wallet.to_ascii_lowercase()),
        key_handle.map(str::to_string),
    ]
    .into_iter()
    .flatten()
    {
        if !candidate.is_empty() && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

/// Every (candidate, encoding) combination: unprefixed hex first, then `0x`.
pub fn signing_attempts(candidates: &[String], digest_hex: &str) -> Vec<SignAttempt> {
    let digits = digest_hex.strip_prefix("0x").unwrap_or(digest_hex);
    candidates
        .iter()
        .flat_map(|candidate| {
            [digits.to_string(), format!("0x{digits}")]
                .into_iter()
                .map(move |payload| SignAttempt {
                    sign_with: candidate.clone(),
                    payload,
                })
        })
        .collect()
}

fn validate_digest(digest_hex: &str) -> Result<String, SigningError> {
    let trimmed = digest_hex.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if digits.len() != 64 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SigningError::InvalidDigest(digest_hex.to_string()));
    }
    Ok(digits.to_ascii_lowercase())
}

/// `DigestSigner` backed by a remote custodial service.
pub struct RemoteSigner<A: SignerApi> {
    api: Arc<A>,
    handles: Mutex<HashMap<(String, String), HandleFuture>>,
}

impl<A: SignerApi> RemoteSigner<A> {
    /// Wrap a signer transport.
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Try every attempt in order and return the first usable signature.
    ///
    /// # Errors
    /// [`SigningError::InvalidDigest`] for a malformed digest,
    /// [`SigningError::SigningExhausted`] when no attempt succeeds.
    #[instrument(skip(self, candidates), fields(org = %organization_id, candidates = candidates.len()))]
    pub async fn sign_digest_with_candidates(
        &self,
        organization_id: &str,
        candidates: &[String],
        digest_hex: &str,
    ) -> Result<RecoverableSignature, SigningError> {
        let digits = validate_digest(digest_hex)?;
        let attempts = signing_attempts(candidates, &digits);
        let mut last_error = "no signing candidates".to_string();

        for (index, attempt) in attempts.iter().enumerate() {
            let outcome = match self
                .api
                .sign_raw_payload(organization_id, &attempt.sign_with, &attempt.payload)
                .await
            {
                Ok(response) => normalize_signature(classify_signer_response(&response)).map_err(|e| e.to_string()),
                Err(e) => Err(format!("{e:#}")),
            };

            match outcome {
                Ok(signature) => {
                    debug!(attempt = index + 1, sign_with = %attempt.sign_with, "Digest signed");
                    return Ok(signature);
                }
                Err(e) => {
                    warn!(attempt = index + 1, sign_with = %attempt.sign_with, error = %e, "Signing attempt failed");
                    last_error = e;
                }
            }
        }

        Err(SigningError::SigningExhausted {
            attempts: attempts.len(),
            last_error,
        })
    }

    /// Durable key handle for a wallet, resolved once and shared.
    ///
    /// # Errors
    /// The lookup failure; the cache entry is dropped so the next call retries.
    pub async fn resolve_key_handle(&self, organization_id: &str, wallet: &str) -> Result<String> {
        let key = (organization_id.to_string(), wallet.trim().to_ascii_lowercase());

        let pending = {
            let mut handles = self.handles.lock().await;
            if let Some(existing) = handles.get(&key) {
                existing.clone()
            } else {
                let api = Arc::clone(&self.api);
                let (org, addr) = key.clone();
                let lookup = async move { lookup_handle(api.as_ref(), &org, &addr).await.map_err(|e| format!("{e:#}")) }
                    .boxed()
                    .shared();
                handles.insert(key.clone(), lookup.clone());
                lookup
            }
        };

        let result = pending.await;
        if result.is_err() {
            let mut handles = self.handles.lock().await;
            if handles
                .get(&key)
                .is_some_and(|f| f.peek().is_some_and(Result::is_err))
            {
                handles.remove(&key);
            }
        }
        result.map_err(|e| anyhow!(e))
    }

    /// Number of cached (or in-flight) handle lookups.
    pub async fn cached_handles(&self) -> usize {
        self.handles.lock().await.len()
    }
}

/// Query the key listing, then the account listing, for `wallet`.
async fn lookup_handle<A: SignerApi + ?Sized>(api: &A, organization_id: &str, wallet: &str) -> Result<String> {
    match api.list_private_keys(organization_id).await {
        Ok(listing) => {
            if let Some(handle) = match_handle(&listing, wallet) {
                return Ok(handle);
            }
        }
        Err(e) => warn!(org = %organization_id, error = %e, "Private key listing failed"),
    }

    let accounts = api.list_wallet_accounts(organization_id).await?;
    match_handle(&accounts, wallet).ok_or_else(|| anyhow!("no key handle for wallet {wallet} in {organization_id}"))
}

fn match_handle(listing: &serde_json::Value, wallet: &str) -> Option<String> {
    parse_key_listing(listing)
        .into_iter()
        .find(|h| h.id.eq_ignore_ascii_case(wallet) || h.addresses.iter().any(|a| a.trim().eq_ignore_ascii_case(wallet)))
        .map(|h| h.id)
}

#[async_trait]
impl<A: SignerApi> DigestSigner for RemoteSigner<A> {
    #[instrument(skip(self, digest), fields(org = %identity.organization_id, wallet = %identity.wallet_address))]
    async fn sign_digest(&self, identity: &SignerIdentity, digest: B256) -> Result<RecoverableSignature> {
        let handle = match self
            .resolve_key_handle(&identity.organization_id, &identity.wallet_address)
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                info!(error = %e, "Key handle unresolved, signing with address candidates only");
                None
            }
        };

        let candidates = signing_candidates(&identity.wallet_address, handle.as_deref());
        let signature = self
            .sign_digest_with_candidates(&identity.organization_id, &candidates, &hex::encode(digest))
            .await?;
        Ok(signature)
    }
}
