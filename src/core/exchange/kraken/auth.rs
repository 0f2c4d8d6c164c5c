//! Request signing for the authenticated private channel.
//!
//! Each private request carries a strictly monotonic nonce and an
//! `API-Sign` header: HMAC-SHA512 over `path || SHA256(nonce || body)`,
//! keyed with the base64-decoded API secret.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

use crate::error::{Error, Result};

type HmacSha512 = Hmac<Sha512>;

/// API key plus symmetric secret for the private channel.
#[derive(Debug, Clone)]
pub struct Credentials {
    api_key: String,
    secret: String,
}

impl Credentials {
    /// Create credentials from the API key and base64-encoded secret.
    #[must_use]
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
        }
    }

    /// The API key sent in the `API-Key` header.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Sign one private request.
    ///
    /// # Errors
    /// Returns an error if the secret is not valid base64.
    pub fn sign(&self, url_path: &str, nonce: &str, body: &str) -> Result<String> {
        let key = BASE64_STANDARD
            .decode(&self.secret)
            .map_err(|e| Error::Config(format!("API secret is not valid base64: {e}")))?;

        let mut sha = Sha256::new();
        sha.update(nonce.as_bytes());
        sha.update(body.as_bytes());
        let digest = sha.finalize();

        let mut mac = HmacSha512::new_from_slice(&key)
            .map_err(|e| Error::Config(format!("Invalid API secret length: {e}")))?;
        mac.update(url_path.as_bytes());
        mac.update(&digest);

        Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
    }
}

/// Strictly monotonic nonce source.
///
/// Seeded from wall time in milliseconds so the sequence stays monotonic
/// across restarts without persisted state.
pub struct NonceGenerator {
    last: AtomicU64,
}

impl NonceGenerator {
    /// Create a generator seeded from the current wall clock.
    #[must_use]
    pub fn new() -> Self {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(0))
            .unwrap_or(0);
        Self {
            last: AtomicU64::new(now_ms),
        }
    }

    /// Produce the next nonce, strictly greater than every prior one.
    pub fn next(&self) -> u64 {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(0))
            .unwrap_or(0);
        self.last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now_ms.max(last + 1))
            })
            .map_or(now_ms, |prev| now_ms.max(prev + 1))
    }
}

impl Default for NonceGenerator {
    fn default() -> Self {
        Self::new()
    }
}
