//! Requester identities: resolution, premium registration and admin sessions.

pub mod admin;
pub mod registration;
pub mod session;

pub use admin::{hash_password, verify_password, AdminAuthenticator, AdminLogin};
pub use registration::{
    register_or_login, PremiumUserDirectory, Registration, RegistrationError, UserListing,
    UserQuery, UserStatus,
};
pub use session::{SessionConfig, SessionError, SessionManager, SessionToken};

use crate::store::ContentStore;
use crate::types::{Requester, Viewer};

/// Resolve a claimed requester against the store.
///
/// Administrators are taken as-is; the claim must come from a verified
/// session. A premium id that does not resolve stays distinct from
/// anonymity so detail checks can still deny it.
pub async fn resolve_viewer<S: ContentStore>(
    store: &S,
    requester: Requester,
) -> Result<Viewer, S::Error> {
    Ok(match requester {
        Requester::Anonymous => Viewer::Anonymous,
        Requester::Admin(id) => Viewer::Admin(id),
        Requester::Premium(id) => match store.get_premium_user(id).await? {
            Some(user) => Viewer::Premium(user),
            None => Viewer::UnknownPremium(id),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryContentStore;
    use crate::types::{AdminId, PremiumUserId};

    #[tokio::test]
    async fn test_resolve_viewer() {
        let store = InMemoryContentStore::new();
        let reg = register_or_login(&store, "Jane", "AB12", None).await.unwrap();

        let viewer = resolve_viewer(&store, Requester::Premium(reg.user.id)).await.unwrap();
        assert_eq!(viewer.active_premium().map(|u| u.id), Some(reg.user.id));

        let unknown = resolve_viewer(&store, Requester::Premium(PremiumUserId::new(404)))
            .await
            .unwrap();
        assert_eq!(unknown, Viewer::UnknownPremium(PremiumUserId::new(404)));
        assert_eq!(unknown.degrade(), Viewer::Anonymous);

        let admin = resolve_viewer(&store, Requester::Admin(AdminId::new(1))).await.unwrap();
        assert!(admin.is_admin());
    }
}
