//! Administrator accounts and login.
//!
//! Password digests use PBKDF2-HMAC-SHA256 and are stored as
//! `pbkdf2:sha256:<rounds>$<salt>$<hex digest>`. The round count travels
//! with the digest, so raising [`PBKDF2_ROUNDS`] leaves existing accounts
//! able to log in.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::session::{SessionError, SessionManager, SessionToken};
use crate::store::ContentStore;
use crate::types::{AdminId, AdminUser};

const HASH_METHOD: &str = "pbkdf2:sha256";
const DIGEST_LEN: usize = 32;

/// PBKDF2 iterations for newly hashed passwords.
pub const PBKDF2_ROUNDS: u32 = 600_000;

fn derive(password: &str, salt: &str, rounds: u32) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), rounds, &mut out);
    out
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    let digest = derive(password, &salt, PBKDF2_ROUNDS);
    format!("{}:{}${}${}", HASH_METHOD, PBKDF2_ROUNDS, salt, hex::encode(digest))
}

/// Check a password against a stored digest.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(method), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let Some(rounds) = method
        .strip_prefix(HASH_METHOD)
        .and_then(|r| r.strip_prefix(':'))
        .and_then(|r| r.parse::<u32>().ok())
        .filter(|r| *r > 0)
    else {
        return false;
    };
    let Ok(expected) = hex::decode(expected) else {
        return false;
    };
    let actual = derive(password, salt, rounds);
    bool::from(actual.as_slice().ct_eq(expected.as_slice()))
}

/// Result of a successful login.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AdminLogin {
    /// Logged-in administrator.
    pub admin: AdminUser,
    /// Issued session.
    pub session: SessionToken,
}

/// Administrator login and session resolution over a store.
pub struct AdminAuthenticator<S: ContentStore> {
    store: Arc<S>,
    sessions: Arc<SessionManager>,
}

impl<S: ContentStore> AdminAuthenticator<S> {
    /// Create an authenticator.
    pub fn new(store: Arc<S>, sessions: Arc<SessionManager>) -> Self {
        Self { store, sessions }
    }

    /// Create an administrator with a hashed password.
    pub async fn create_admin(
        &self,
        username: &str,
        full_name: &str,
        password: &str,
        is_superuser: bool,
    ) -> Result<AdminUser, SessionError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(SessionError::MissingCredentials);
        }
        let owned = password.to_owned();
        let digest = tokio::task::spawn_blocking(move || hash_password(&owned))
            .await
            .map_err(SessionError::from_store)?;
        let admin = self
            .store
            .create_admin(username, full_name.trim(), &digest, is_superuser)
            .await
            .map_err(SessionError::from_store)?;
        tracing::info!(admin_id = %admin.id, username = %admin.username, "Created admin user");
        Ok(admin)
    }

    /// Check credentials and issue a session.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<AdminLogin, SessionError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(SessionError::MissingCredentials);
        }

        let found = self
            .store
            .find_admin_by_username(username)
            .await
            .map_err(SessionError::from_store)?;
        let admin = match found {
            Some(admin) => {
                let (owned, stored) = (password.to_owned(), admin.password_hash.clone());
                let matches = tokio::task::spawn_blocking(move || verify_password(&owned, &stored))
                    .await
                    .map_err(SessionError::from_store)?;
                matches.then_some(admin)
            }
            None => None,
        }
        .ok_or_else(|| {
            tracing::warn!(username = %username, "Admin login failed");
            SessionError::InvalidCredentials
        })?;

        if !admin.is_active {
            return Err(SessionError::Inactive);
        }

        let session = self.sessions.issue(admin.id, now)?;
        tracing::info!(admin_id = %admin.id, "Admin logged in");
        Ok(AdminLogin { admin, session })
    }

    /// Resolve a session token to an active administrator.
    pub async fn authenticate(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<AdminUser, SessionError> {
        let admin_id: AdminId = self.sessions.verify(token, now)?;
        let admin = self
            .store
            .get_admin(admin_id)
            .await
            .map_err(SessionError::from_store)?
            .ok_or(SessionError::Invalid)?;
        if !admin.is_active {
            return Err(SessionError::Inactive);
        }
        Ok(admin)
    }
}
