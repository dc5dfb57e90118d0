//! Premium users and administrators.
//!
//! The two identity classes are disjoint: a premium user is identified by a
//! (name, code) pair with no password, an administrator by username and
//! password.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{AdminId, DepartmentId, PremiumUserId};

/// Length of a premium access code.
pub const ACCESS_CODE_LEN: usize = 4;

/// Reason an access code was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessCodeError {
    /// Code is not exactly four characters.
    #[error("Code must be exactly {ACCESS_CODE_LEN} characters long")]
    WrongLength,
    /// Code contains something other than A-Z / 0-9.
    #[error("Code must contain only letters (A-Z) and numbers (0-9)")]
    NotAlphanumeric,
}

/// A four-character alphanumeric access code, normalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessCode(String);

impl AccessCode {
    /// Validate and normalize a code.
    pub fn parse(raw: &str) -> Result<Self, AccessCodeError> {
        let code = raw.trim().to_uppercase();
        if code.chars().count() != ACCESS_CODE_LEN {
            return Err(AccessCodeError::WrongLength);
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AccessCodeError::NotAlphanumeric);
        }
        Ok(Self(code))
    }

    /// Get the normalized code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AccessCode {
    type Error = AccessCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccessCode> for String {
    fn from(code: AccessCode) -> Self {
        code.0
    }
}

impl fmt::Display for AccessCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A premium user identified by name and access code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremiumUser {
    /// User identifier.
    pub id: PremiumUserId,
    /// Full name as entered.
    pub name: String,
    /// Normalized access code.
    pub code: AccessCode,
    /// Department affiliation.
    pub department_id: Option<DepartmentId>,
    /// Inactive users cannot log in or access anything.
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl PremiumUser {
    /// Name with code, for display.
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.name, self.code)
    }

    /// Case-insensitive name comparison.
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.trim().to_lowercase()
    }
}

/// Input for creating or updating a premium user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPremiumUser {
    /// Full name.
    pub name: String,
    /// Access code.
    pub code: AccessCode,
    /// Department affiliation.
    pub department_id: Option<DepartmentId>,
}

/// A backend administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUser {
    /// Administrator identifier.
    pub id: AdminId,
    /// Login name.
    pub username: String,
    /// Optional full name.
    pub full_name: String,
    /// Salted password digest, see [`crate::identity::admin`].
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// Inactive administrators cannot log in.
    pub is_active: bool,
    /// Staff flag.
    pub is_staff: bool,
    /// Superuser flag.
    pub is_superuser: bool,
    /// Join time.
    pub date_joined: DateTime<Utc>,
}

impl AdminUser {
    /// Full name when set, otherwise the username.
    pub fn display_name(&self) -> &str {
        if self.full_name.is_empty() {
            &self.username
        } else {
            &self.full_name
        }
    }
}
