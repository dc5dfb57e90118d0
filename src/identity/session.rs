//! Signed administrator session tokens.
//!
//! ## Token format
//!
//! ```text
//! <admin_id>.<expires_unix>.<nonce>.<signature>
//! ```
//!
//! `signature` is `HMAC-SHA256(secret, "admin_id|expires|nonce|version")[..16]`
//! in hex. Without the secret a token cannot be forged, so the server keeps
//! no session table.
//!
//! ## Verification cache
//!
//! Signature checks are memoized in an LRU keyed by the xxh64 of the token.
//! Expiry is checked on every call and is never cached.

use std::hash::Hasher;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use lru::LruCache;
use parking_lot::RwLock;
use sha2::Sha256;
use xxhash_rust::xxh64::Xxh64;

use crate::error::{Classify, ErrorKind};
use crate::types::AdminId;

const TOKEN_VERSION: &str = "admin_session_v1";
const SIGNATURE_BYTES: usize = 16;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// HMAC key for signing tokens.
    pub secret: Vec<u8>,
    /// Session lifetime (default: 12 hours).
    pub ttl: Duration,
    /// Verification cache capacity; 0 disables the cache (default: 10000).
    pub cache_size: usize,
}

impl SessionConfig {
    /// Create a configuration with default lifetime and cache size.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            ttl: Duration::hours(12),
            cache_size: 10_000,
        }
    }

    /// Load from `SESSION_SECRET`, `SESSION_TTL_SECS` and `SESSION_CACHE_SIZE`.
    ///
    /// Returns `None` when no secret is configured.
    pub fn from_env() -> Option<Self> {
        let secret = std::env::var("SESSION_SECRET").ok().filter(|s| !s.is_empty())?;
        let mut config = Self::new(secret.into_bytes());
        if let Some(secs) = std::env::var("SESSION_TTL_SECS").ok().and_then(|s| s.parse().ok()) {
            config.ttl = Duration::seconds(secs);
        }
        if let Some(size) = std::env::var("SESSION_CACHE_SIZE").ok().and_then(|s| s.parse().ok()) {
            config.cache_size = size;
        }
        Some(config)
    }
}

/// Error type for session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session was presented.
    #[error("Admin session required")]
    Missing,
    /// Token is malformed or its signature does not match.
    #[error("Invalid session token")]
    Invalid,
    /// Token has expired.
    #[error("Session expired")]
    Expired,
    /// Username or password is wrong.
    #[error("Invalid username or password")]
    InvalidCredentials,
    /// Administrator account is deactivated.
    #[error("Admin account is inactive")]
    Inactive,
    /// Username or password missing.
    #[error("Username and password are required")]
    MissingCredentials,
    /// HMAC key rejected.
    #[error("Session secret is unusable")]
    BadSecret,
    /// Store error.
    #[error("Store error: {0}")]
    StoreError(String),
}

impl SessionError {
    /// Create a store error from any error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::StoreError(e.to_string())
    }
}

impl Classify for SessionError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Missing
            | Self::Invalid
            | Self::Expired
            | Self::InvalidCredentials
            | Self::Inactive => ErrorKind::Forbidden,
            Self::MissingCredentials => ErrorKind::BadRequest,
            Self::BadSecret => ErrorKind::ConfigurationError,
            Self::StoreError(_) => ErrorKind::Internal,
        }
    }
}

/// An issued session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SessionToken {
    /// Opaque token for the `Authorization: Bearer` header.
    pub token: String,
    /// Administrator the token was issued to.
    pub admin_id: AdminId,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
}

/// Parsed, not yet verified token.
struct Claims<'a> {
    admin_id: AdminId,
    expires_unix: i64,
    nonce: &'a str,
    signature: &'a str,
}

impl<'a> Claims<'a> {
    fn parse(token: &'a str) -> Option<Self> {
        let mut parts = token.split('.');
        let admin_id = AdminId::parse(parts.next()?)?;
        let expires_unix = parts.next()?.parse().ok()?;
        let nonce = parts.next()?;
        let signature = parts.next()?;
        if parts.next().is_some() || nonce.is_empty() {
            return None;
        }
        Some(Self {
            admin_id,
            expires_unix,
            nonce,
            signature,
        })
    }
}

fn canonical_string(admin_id: AdminId, expires_unix: i64, nonce: &str) -> String {
    format!("{}|{}|{}|{}", admin_id, expires_unix, nonce, TOKEN_VERSION)
}

/// Cache statistics.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Current number of entries in the cache.
    pub len: usize,
    /// Maximum capacity of the cache.
    pub cap: usize,
}

/// Issues and verifies administrator sessions.
///
/// Thread-safe and suitable for use in async services.
pub struct SessionManager {
    secret: Vec<u8>,
    ttl: Duration,
    cache: Option<Arc<RwLock<LruCache<u64, bool>>>>,
}

impl SessionManager {
    /// Create a manager from configuration.
    pub fn new(config: SessionConfig) -> Self {
        let cache = NonZeroUsize::new(config.cache_size)
            .map(|size| Arc::new(RwLock::new(LruCache::new(size))));
        Self {
            secret: config.secret,
            ttl: config.ttl,
            cache,
        }
    }

    fn sign(&self, canonical: &str) -> Result<Hmac<Sha256>, SessionError> {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.secret).map_err(|_| SessionError::BadSecret)?;
        mac.update(canonical.as_bytes());
        Ok(mac)
    }

    /// Issue a session for an administrator, valid from `now`.
    pub fn issue(&self, admin_id: AdminId, now: DateTime<Utc>) -> Result<SessionToken, SessionError> {
        let expires_at = now + self.ttl;
        let expires_unix = expires_at.timestamp();
        let nonce = uuid::Uuid::new_v4().simple().to_string();

        let mac = self.sign(&canonical_string(admin_id, expires_unix, &nonce))?;
        let signature = mac.finalize().into_bytes();

        Ok(SessionToken {
            token: format!(
                "{}.{}.{}.{}",
                admin_id,
                expires_unix,
                nonce,
                hex::encode(&signature[..SIGNATURE_BYTES])
            ),
            admin_id,
            expires_at: Utc.timestamp_opt(expires_unix, 0).single().unwrap_or(expires_at),
        })
    }

    fn signature_valid(&self, claims: &Claims<'_>) -> Result<bool, SessionError> {
        let mac = self.sign(&canonical_string(claims.admin_id, claims.expires_unix, claims.nonce))?;
        match hex::decode(claims.signature) {
            Ok(bytes) if bytes.len() == SIGNATURE_BYTES => {
                // verify_truncated_left compares in constant time.
                Ok(mac.verify_truncated_left(&bytes).is_ok())
            }
            _ => Ok(false),
        }
    }

    /// Verify a token and return the administrator it was issued to.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AdminId, SessionError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SessionError::Missing);
        }
        let claims = Claims::parse(token).ok_or(SessionError::Invalid)?;

        let mut hasher = Xxh64::new(0);
        hasher.write(token.as_bytes());
        let cache_key = hasher.finish();

        let cached = self
            .cache
            .as_ref()
            .and_then(|cache| cache.read().peek(&cache_key).copied());
        let valid = match cached {
            Some(valid) => valid,
            None => {
                let valid = self.signature_valid(&claims)?;
                if let Some(cache) = &self.cache {
                    cache.write().put(cache_key, valid);
                }
                valid
            }
        };

        if !valid {
            return Err(SessionError::Invalid);
        }
        if now.timestamp() >= claims.expires_unix {
            return Err(SessionError::Expired);
        }
        Ok(claims.admin_id)
    }

    /// Get cache statistics; `None` if caching is disabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| {
            let cache = cache.read();
            CacheStats {
                len: cache.len(),
                cap: cache.cap().get(),
            }
        })
    }
}
