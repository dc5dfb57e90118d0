//! Premium topic assignment.
//!
//! Mutates the topic ↔ premium-user relation. Every mutation goes through a
//! single store call, so the next access check observes it.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{Classify, ErrorKind};
use crate::store::ContentStore;
use crate::types::{PremiumUserId, Topic, TopicId};

/// Error type for assignment operations.
#[derive(Debug, thiserror::Error)]
pub enum AssignmentError {
    /// Topic does not exist or is soft-deleted.
    #[error("Topic not found: {0}")]
    TopicNotFound(TopicId),
    /// A user in the request does not exist.
    #[error("Premium user not found: {0}")]
    UserNotFound(PremiumUserId),
    /// Assignment attempted on a community topic.
    #[error("Topic {0} is not premium; community topics cannot be assigned")]
    NotPremium(TopicId),
    /// Store error.
    #[error("Store error: {0}")]
    StoreError(String),
}

impl AssignmentError {
    /// Create a store error from any error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::StoreError(e.to_string())
    }
}

impl Classify for AssignmentError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::TopicNotFound(_) => ErrorKind::NotFound,
            Self::UserNotFound(_) => ErrorKind::BadRequest,
            Self::NotPremium(_) => ErrorKind::InvalidOperation,
            Self::StoreError(_) => ErrorKind::Internal,
        }
    }
}

/// Manages which premium users may open which premium topics.
pub struct AssignmentManager<S: ContentStore> {
    store: Arc<S>,
}

impl<S: ContentStore> AssignmentManager<S> {
    /// Create a manager over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn load_topic(&self, id: TopicId) -> Result<Topic, AssignmentError> {
        self.store
            .get_topic(id)
            .await
            .map_err(AssignmentError::from_store)?
            .filter(|t| !t.is_deleted)
            .ok_or(AssignmentError::TopicNotFound(id))
    }

    async fn load_premium_topic(&self, id: TopicId) -> Result<Topic, AssignmentError> {
        let topic = self.load_topic(id).await?;
        if !topic.is_premium {
            tracing::error!(topic_id = %id, "Refusing to assign users to a community topic");
            return Err(AssignmentError::NotPremium(id));
        }
        Ok(topic)
    }

    async fn ensure_users_exist(&self, users: &BTreeSet<PremiumUserId>) -> Result<(), AssignmentError> {
        for user in users {
            let found = self
                .store
                .get_premium_user(*user)
                .await
                .map_err(AssignmentError::from_store)?;
            if found.is_none() {
                return Err(AssignmentError::UserNotFound(*user));
            }
        }
        Ok(())
    }

    async fn reload(&self, id: TopicId) -> Result<Topic, AssignmentError> {
        self.store
            .get_topic(id)
            .await
            .map_err(AssignmentError::from_store)?
            .ok_or(AssignmentError::TopicNotFound(id))
    }

    /// Replace the whole assignment set (clear, then set).
    ///
    /// Concurrent calls on the same topic resolve last-write-wins.
    pub async fn assign(
        &self,
        topic_id: TopicId,
        users: &BTreeSet<PremiumUserId>,
    ) -> Result<Topic, AssignmentError> {
        self.load_premium_topic(topic_id).await?;
        self.ensure_users_exist(users).await?;

        self.store
            .replace_assignments(topic_id, users)
            .await
            .map_err(AssignmentError::from_store)?;

        tracing::info!(topic_id = %topic_id, assigned = users.len(), "Replaced topic assignments");
        self.reload(topic_id).await
    }

    /// Grant one user access to a premium topic.
    pub async fn add_user(
        &self,
        topic_id: TopicId,
        user: PremiumUserId,
    ) -> Result<Topic, AssignmentError> {
        self.load_premium_topic(topic_id).await?;
        self.ensure_users_exist(&BTreeSet::from([user])).await?;

        self.store
            .add_assignment(topic_id, user)
            .await
            .map_err(AssignmentError::from_store)?;

        tracing::info!(topic_id = %topic_id, user_id = %user, "Assigned user to topic");
        self.reload(topic_id).await
    }

    /// Revoke one user's access. A no-op on community topics.
    pub async fn remove_user(
        &self,
        topic_id: TopicId,
        user: PremiumUserId,
    ) -> Result<Topic, AssignmentError> {
        let topic = self.load_topic(topic_id).await?;
        if !topic.is_premium {
            tracing::debug!(topic_id = %topic_id, "Ignoring removal on community topic");
            return Ok(topic);
        }

        self.store
            .remove_assignment(topic_id, user)
            .await
            .map_err(AssignmentError::from_store)?;

        tracing::info!(topic_id = %topic_id, user_id = %user, "Removed user from topic");
        self.reload(topic_id).await
    }

    /// Clear the assignment set.
    ///
    /// The topic becomes listed to everyone and openable by admins only.
    pub async fn unassign_all(&self, topic_id: TopicId) -> Result<Topic, AssignmentError> {
        self.load_topic(topic_id).await?;

        self.store
            .replace_assignments(topic_id, &BTreeSet::new())
            .await
            .map_err(AssignmentError::from_store)?;

        tracing::info!(topic_id = %topic_id, "Cleared topic assignments");
        self.reload(topic_id).await
    }

    /// Get the store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{is_accessible_for_detail, is_visible_in_listing};
    use crate::store::InMemoryContentStore;
    use crate::types::{AccessCode, NewCourse, NewPremiumUser, NewTopic, PremiumUser, Viewer};

    async fn setup() -> (Arc<InMemoryContentStore>, Topic, Topic, PremiumUser) {
        let store = Arc::new(InMemoryContentStore::new());
        let course = store.create_course(NewCourse::named("BIO 202")).await.unwrap();
        let community = store
            .create_topic(NewTopic::community(course.id, "Cells"))
            .await
            .unwrap();
        let premium = store
            .create_topic(NewTopic::premium(course.id, "Mitosis"))
            .await
            .unwrap();
        let user = store
            .create_premium_user(NewPremiumUser {
                name: "Ada".to_string(),
                code: AccessCode::parse("AD01").unwrap(),
                department_id: None,
            })
            .await
            .unwrap();
        (store, community, premium, user)
    }

    #[tokio::test]
    async fn test_assign_rejects_community_topic() {
        let (store, community, _, user) = setup().await;
        let manager = AssignmentManager::new(store);

        let err = manager
            .assign(community.id, &BTreeSet::from([user.id]))
            .await
            .unwrap_err();
        assert!(matches!(err, AssignmentError::NotPremium(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);

        let err = manager.add_user(community.id, user.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[tokio::test]
    async fn test_assign_grants_and_unassign_revokes() {
        let (store, _, premium, user) = setup().await;
        let manager = AssignmentManager::new(store);
        let viewer = Viewer::Premium(user.clone());

        let topic = manager.assign(premium.id, &BTreeSet::from([user.id])).await.unwrap();
        assert!(is_accessible_for_detail(&topic, &viewer));

        let topic = manager.unassign_all(premium.id).await.unwrap();
        assert!(!is_accessible_for_detail(&topic, &viewer));
        assert!(is_visible_in_listing(&topic, &Viewer::Anonymous));
    }

    #[tokio::test]
    async fn test_assign_replaces_not_appends() {
        let (store, _, premium, user) = setup().await;
        let other = store
            .create_premium_user(NewPremiumUser {
                name: "Grace".to_string(),
                code: AccessCode::parse("GH02").unwrap(),
                department_id: None,
            })
            .await
            .unwrap();
        let manager = AssignmentManager::new(store);

        manager.assign(premium.id, &BTreeSet::from([user.id])).await.unwrap();
        let topic = manager.assign(premium.id, &BTreeSet::from([other.id])).await.unwrap();

        assert_eq!(topic.assigned_users, BTreeSet::from([other.id]));
    }

    #[tokio::test]
    async fn test_unknown_user_rejected() {
        let (store, _, premium, _) = setup().await;
        let manager = AssignmentManager::new(store);

        let err = manager
            .add_user(premium.id, PremiumUserId::new(4242))
            .await
            .unwrap_err();
        assert!(matches!(err, AssignmentError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_user_on_community_is_noop() {
        let (store, community, _, user) = setup().await;
        let manager = AssignmentManager::new(store);

        let topic = manager.remove_user(community.id, user.id).await.unwrap();
        assert!(topic.assigned_users.is_empty());
    }

    #[tokio::test]
    async fn test_missing_topic() {
        let (store, _, _, user) = setup().await;
        let manager = AssignmentManager::new(store);

        let err = manager.add_user(TopicId::new(777), user.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
