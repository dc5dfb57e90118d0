//! Premium user registration and the admin-side user directory.
//!
//! A premium identity is the pair (name, code). Names compare
//! case-insensitively, codes are normalized to uppercase, and no two users
//! may share a code.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Classify, ErrorKind};
use crate::store::ContentStore;
use crate::types::{
    AccessCode, AccessCodeError, Department, DepartmentId, NewPremiumUser, PremiumUser,
    PremiumUserId,
};

/// Error type for registration and user management.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// Name is blank.
    #[error("Name is required")]
    MissingName,
    /// Code fails validation.
    #[error("{0}")]
    InvalidCode(#[from] AccessCodeError),
    /// Department does not exist.
    #[error("Department not found: {0}")]
    DepartmentNotFound(DepartmentId),
    /// User does not exist.
    #[error("Premium user not found: {0}")]
    UserNotFound(PremiumUserId),
    /// Matching account is deactivated.
    #[error("This account has been deactivated")]
    Deactivated,
    /// Code belongs to a different user.
    #[error("This code is already in use by another user")]
    CodeTaken,
    /// Name is registered with a different code.
    #[error("This name is already registered with a different code")]
    NameTaken,
    /// Store error.
    #[error("Store error: {0}")]
    StoreError(String),
}

impl RegistrationError {
    /// Create a store error from any error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::StoreError(e.to_string())
    }
}

impl Classify for RegistrationError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingName | Self::InvalidCode(_) | Self::DepartmentNotFound(_) => {
                ErrorKind::BadRequest
            }
            Self::UserNotFound(_) => ErrorKind::NotFound,
            Self::Deactivated => ErrorKind::Forbidden,
            Self::CodeTaken | Self::NameTaken => ErrorKind::Conflict,
            Self::StoreError(_) => ErrorKind::Internal,
        }
    }
}

/// Outcome of [`register_or_login`].
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    /// The resolved or created user.
    pub user: PremiumUser,
    /// Whether a new user was created.
    pub created: bool,
}

fn normalize_name(name: &str) -> Result<String, RegistrationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RegistrationError::MissingName);
    }
    Ok(name.to_string())
}

async fn resolve_department<S: ContentStore>(
    store: &S,
    department: Option<&str>,
) -> Result<Option<Department>, RegistrationError> {
    match department.and_then(Department::normalize_name) {
        Some(name) => store
            .get_or_create_department(&name)
            .await
            .map(Some)
            .map_err(RegistrationError::from_store),
        None => Ok(None),
    }
}

/// Log in with (name, code), or register a new premium user.
///
/// - exact case-insensitive name + exact code → existing user; an inactive
///   match is rejected, and a differing department is updated
/// - code held by someone else, or name held with another code → conflict
/// - otherwise a new active user is created
pub async fn register_or_login<S: ContentStore>(
    store: &S,
    name: &str,
    code: &str,
    department: Option<&str>,
) -> Result<Registration, RegistrationError> {
    let name = normalize_name(name)?;
    let code = AccessCode::parse(code)?;

    let by_code = store
        .find_premium_user_by_code(&code)
        .await
        .map_err(RegistrationError::from_store)?;

    if let Some(existing) = by_code {
        if !existing.name_matches(&name) {
            return Err(RegistrationError::CodeTaken);
        }
        if !existing.is_active {
            tracing::warn!(user_id = %existing.id, "Login attempt on deactivated premium user");
            return Err(RegistrationError::Deactivated);
        }

        let department = resolve_department(store, department).await?;
        let user = match department {
            Some(dept) if existing.department_id != Some(dept.id) => {
                let updated = store
                    .update_premium_user(
                        existing.id,
                        NewPremiumUser {
                            name: existing.name.clone(),
                            code: existing.code.clone(),
                            department_id: Some(dept.id),
                        },
                    )
                    .await
                    .map_err(RegistrationError::from_store)?;
                tracing::info!(user_id = %existing.id, department = %dept.name, "Updated premium user department");
                updated.unwrap_or(existing)
            }
            _ => existing,
        };

        tracing::info!(user_id = %user.id, "Premium user logged in");
        return Ok(Registration { user, created: false });
    }

    let by_name = store
        .find_premium_user_by_name(&name)
        .await
        .map_err(RegistrationError::from_store)?;
    if by_name.is_some() {
        return Err(RegistrationError::NameTaken);
    }

    let department = resolve_department(store, department).await?;
    let user = store
        .create_premium_user(NewPremiumUser {
            name,
            code,
            department_id: department.map(|d| d.id),
        })
        .await
        .map_err(RegistrationError::from_store)?;

    tracing::info!(user_id = %user.id, "Registered premium user");
    Ok(Registration { user, created: true })
}

/// Status filter for the user directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Active users only.
    Active,
    /// Deactivated users only.
    Inactive,
}

/// Directory search parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserQuery {
    /// Case-insensitive substring of name or code.
    #[serde(default)]
    pub search: Option<String>,
    /// Status filter.
    #[serde(default)]
    pub status: Option<UserStatus>,
    /// Department filter.
    #[serde(default)]
    pub department: Option<DepartmentId>,
}

impl UserQuery {
    /// Whether a user passes the filters.
    pub fn matches(&self, user: &PremiumUser) -> bool {
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            if !user.name.to_lowercase().contains(&needle)
                && !user.code.as_str().to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        match self.status {
            Some(UserStatus::Active) if !user.is_active => return false,
            Some(UserStatus::Inactive) if user.is_active => return false,
            _ => {}
        }
        if let Some(department) = self.department {
            if user.department_id != Some(department) {
                return false;
            }
        }
        true
    }
}

/// Directory listing with status counts.
#[derive(Debug, Clone, Serialize)]
pub struct UserListing {
    /// Users passing the query, newest first.
    pub users: Vec<PremiumUser>,
    /// Number of users overall.
    pub total: usize,
    /// Number of active users overall.
    pub active: usize,
    /// Number of deactivated users overall.
    pub inactive: usize,
}

/// Admin-side management of premium users.
pub struct PremiumUserDirectory<S: ContentStore> {
    store: Arc<S>,
}

impl<S: ContentStore> PremiumUserDirectory<S> {
    /// Create a directory over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn ensure_department(&self, id: Option<DepartmentId>) -> Result<(), RegistrationError> {
        if let Some(id) = id {
            let found = self
                .store
                .get_department(id)
                .await
                .map_err(RegistrationError::from_store)?;
            if found.is_none() {
                return Err(RegistrationError::DepartmentNotFound(id));
            }
        }
        Ok(())
    }

    async fn ensure_code_free(
        &self,
        code: &AccessCode,
        except: Option<PremiumUserId>,
    ) -> Result<(), RegistrationError> {
        let holder = self
            .store
            .find_premium_user_by_code(code)
            .await
            .map_err(RegistrationError::from_store)?;
        match holder {
            Some(user) if Some(user.id) != except => Err(RegistrationError::CodeTaken),
            _ => Ok(()),
        }
    }

    /// Create a premium user.
    pub async fn create(
        &self,
        name: &str,
        code: &str,
        department_id: Option<DepartmentId>,
    ) -> Result<PremiumUser, RegistrationError> {
        let name = normalize_name(name)?;
        let code = AccessCode::parse(code)?;
        self.ensure_code_free(&code, None).await?;
        self.ensure_department(department_id).await?;

        let user = self
            .store
            .create_premium_user(NewPremiumUser {
                name,
                code,
                department_id,
            })
            .await
            .map_err(RegistrationError::from_store)?;
        tracing::info!(user_id = %user.id, "Created premium user");
        Ok(user)
    }

    /// Fetch a user.
    pub async fn get(&self, id: PremiumUserId) -> Result<PremiumUser, RegistrationError> {
        self.store
            .get_premium_user(id)
            .await
            .map_err(RegistrationError::from_store)?
            .ok_or(RegistrationError::UserNotFound(id))
    }

    /// Replace name, code and department.
    pub async fn update(
        &self,
        id: PremiumUserId,
        name: &str,
        code: &str,
        department_id: Option<DepartmentId>,
    ) -> Result<PremiumUser, RegistrationError> {
        let name = normalize_name(name)?;
        let code = AccessCode::parse(code)?;
        self.get(id).await?;
        self.ensure_code_free(&code, Some(id)).await?;
        self.ensure_department(department_id).await?;

        self.store
            .update_premium_user(
                id,
                NewPremiumUser {
                    name,
                    code,
                    department_id,
                },
            )
            .await
            .map_err(RegistrationError::from_store)?
            .ok_or(RegistrationError::UserNotFound(id))
    }

    /// Set the active flag. Assignments are left untouched.
    pub async fn set_active(
        &self,
        id: PremiumUserId,
        is_active: bool,
    ) -> Result<PremiumUser, RegistrationError> {
        let user = self
            .store
            .set_premium_user_active(id, is_active)
            .await
            .map_err(RegistrationError::from_store)?
            .ok_or(RegistrationError::UserNotFound(id))?;
        tracing::info!(user_id = %id, is_active, "Changed premium user status");
        Ok(user)
    }

    /// Flip the active flag.
    pub async fn toggle_active(&self, id: PremiumUserId) -> Result<PremiumUser, RegistrationError> {
        let user = self.get(id).await?;
        self.set_active(id, !user.is_active).await
    }

    /// Hard-delete a user.
    pub async fn delete(&self, id: PremiumUserId) -> Result<(), RegistrationError> {
        let deleted = self
            .store
            .delete_premium_user(id)
            .await
            .map_err(RegistrationError::from_store)?;
        if !deleted {
            return Err(RegistrationError::UserNotFound(id));
        }
        tracing::info!(user_id = %id, "Deleted premium user");
        Ok(())
    }

    /// Search the directory.
    pub async fn list(&self, query: &UserQuery) -> Result<UserListing, RegistrationError> {
        let all = self
            .store
            .list_premium_users()
            .await
            .map_err(RegistrationError::from_store)?;
        let active = all.iter().filter(|u| u.is_active).count();
        let total = all.len();
        let users = all.into_iter().filter(|u| query.matches(u)).collect();
        Ok(UserListing {
            users,
            total,
            active,
            inactive: total - active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryContentStore;

    #[tokio::test]
    async fn test_register_normalizes_code() {
        let store = InMemoryContentStore::new();
        let reg = register_or_login(&store, "Jane Doe", "ab12", None).await.unwrap();
        assert!(reg.created);
        assert_eq!(reg.user.code.as_str(), "AB12");
    }

    #[tokio::test]
    async fn test_login_is_case_insensitive_on_name() {
        let store = InMemoryContentStore::new();
        let first = register_or_login(&store, "Jane Doe", "ab12", None).await.unwrap();
        let second = register_or_login(&store, "jane doe", "AB12", None).await.unwrap();

        assert!(!second.created);
        assert_eq!(first.user.id, second.user.id);
        assert_eq!(store.num_premium_users(), 1);
    }

    #[tokio::test]
    async fn test_conflicts() {
        let store = InMemoryContentStore::new();
        register_or_login(&store, "Jane Doe", "AB12", None).await.unwrap();

        let err = register_or_login(&store, "John Roe", "AB12", None).await.unwrap_err();
        assert_eq!(err, RegistrationError::CodeTaken);
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = register_or_login(&store, "JANE DOE", "ZZ99", None).await.unwrap_err();
        assert_eq!(err, RegistrationError::NameTaken);
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let store = InMemoryContentStore::new();
        let err = register_or_login(&store, "  ", "AB12", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err = register_or_login(&store, "Jane", "AB1", None).await.unwrap_err();
        assert_eq!(err, RegistrationError::InvalidCode(AccessCodeError::WrongLength));

        let err = register_or_login(&store, "Jane", "AB-1", None).await.unwrap_err();
        assert_eq!(err, RegistrationError::InvalidCode(AccessCodeError::NotAlphanumeric));
    }

    #[tokio::test]
    async fn test_deactivated_user_cannot_login() {
        let store = Arc::new(InMemoryContentStore::new());
        let reg = register_or_login(store.as_ref(), "Jane", "AB12", None).await.unwrap();
        PremiumUserDirectory::new(store.clone())
            .set_active(reg.user.id, false)
            .await
            .unwrap();

        let err = register_or_login(store.as_ref(), "Jane", "AB12", None).await.unwrap_err();
        assert_eq!(err, RegistrationError::Deactivated);
    }

    #[tokio::test]
    async fn test_login_updates_department() {
        let store = InMemoryContentStore::new();
        let reg = register_or_login(&store, "Jane", "AB12", Some("Nursing")).await.unwrap();
        let nursing = reg.user.department_id.unwrap();

        let again = register_or_login(&store, "Jane", "AB12", Some("health science"))
            .await
            .unwrap();
        assert_ne!(again.user.department_id, Some(nursing));

        let same = register_or_login(&store, "Jane", "AB12", Some("NURSING")).await.unwrap();
        assert_eq!(same.user.department_id, Some(nursing));
    }

    #[tokio::test]
    async fn test_directory_search_and_counts() {
        let store = Arc::new(InMemoryContentStore::new());
        let directory = PremiumUserDirectory::new(store);
        directory.create("Ada Lovelace", "ADA1", None).await.unwrap();
        let grace = directory.create("Grace Hopper", "GH22", None).await.unwrap();
        directory.set_active(grace.id, false).await.unwrap();

        let listing = directory
            .list(&UserQuery {
                search: Some("gh".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(listing.users.len(), 1);
        assert_eq!(listing.total, 2);
        assert_eq!(listing.inactive, 1);

        let active = directory
            .list(&UserQuery {
                status: Some(UserStatus::Active),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(active.users.len(), 1);
        assert_eq!(active.users[0].name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_directory_rejects_duplicate_code() {
        let directory = PremiumUserDirectory::new(Arc::new(InMemoryContentStore::new()));
        let ada = directory.create("Ada", "ADA1", None).await.unwrap();
        let bob = directory.create("Bob", "BOB1", None).await.unwrap();

        let err = directory.create("Carl", "ada1", None).await.unwrap_err();
        assert_eq!(err, RegistrationError::CodeTaken);

        let err = directory.update(bob.id, "Bob", "ADA1", None).await.unwrap_err();
        assert_eq!(err, RegistrationError::CodeTaken);

        directory.update(ada.id, "Ada L.", "ADA1", None).await.unwrap();
    }
}
