//! Requesting identities.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{AdminId, PremiumUserId};
use super::user::PremiumUser;

/// Who is asking, as claimed by the inbound request.
///
/// A premium identity is only a claim until it has been resolved against
/// the store; see [`Viewer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Requester {
    /// No identity.
    Anonymous,
    /// A premium user id from a query parameter or header.
    Premium(PremiumUserId),
    /// An administrator authenticated by session.
    Admin(AdminId),
}

impl Requester {
    /// Whether this is an administrator.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin(_))
    }
}

impl Default for Requester {
    fn default() -> Self {
        Self::Anonymous
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::Premium(id) => write!(f, "premium:{}", id),
            Self::Admin(id) => write!(f, "admin:{}", id),
        }
    }
}

/// A requester resolved against the store.
///
/// Access predicates are evaluated over a `Viewer` so they stay pure: the
/// premium user (if any) has already been loaded, and a claim that did not
/// resolve is kept distinct from anonymity for the detail predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    /// No identity.
    Anonymous,
    /// Claimed premium id with no matching user.
    UnknownPremium(PremiumUserId),
    /// Loaded premium user (possibly inactive).
    Premium(PremiumUser),
    /// Authenticated administrator.
    Admin(AdminId),
}

impl Viewer {
    /// Active premium user behind this viewer, if any.
    pub fn active_premium(&self) -> Option<&PremiumUser> {
        match self {
            Self::Premium(user) if user.is_active => Some(user),
            _ => None,
        }
    }

    /// Whether this is an administrator.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin(_))
    }

    /// Collapse claims that did not resolve to an active user into anonymity.
    ///
    /// Listing endpoints degrade this way instead of failing.
    pub fn degrade(self) -> Self {
        match self {
            Self::Premium(user) if user.is_active => Self::Premium(user),
            Self::Admin(id) => Self::Admin(id),
            _ => Self::Anonymous,
        }
    }

    /// The requester this viewer was resolved from.
    pub fn requester(&self) -> Requester {
        match self {
            Self::Anonymous => Requester::Anonymous,
            Self::UnknownPremium(id) => Requester::Premium(*id),
            Self::Premium(user) => Requester::Premium(user.id),
            Self::Admin(id) => Requester::Admin(*id),
        }
    }
}
