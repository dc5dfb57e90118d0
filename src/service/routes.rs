//! Axum routes for the study guide service.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::assignment::AssignmentError;
use crate::catalog::{
    AvailableYears, CatalogError, CourseFullText, CourseSummary, CourseTopics, DepartmentSummary,
    LibraryCourse, PremiumOverview, TopicDetail,
};
use crate::content::{ContentError, CourseForm};
use crate::error::{Classify, ErrorKind};
use crate::export::{DataExport, ExportError, ImportReport, ImportRow};
use crate::identity::{
    register_or_login, resolve_viewer, AdminLogin, Registration, RegistrationError, SessionError,
    UserListing, UserQuery,
};
use crate::ingest::{CourseChoice, IngestError, OcrHealth, TopicDraft, UploadedImage};
use crate::premium::{AccessibleTopics, DepartmentCourses, MyDepartment, PremiumError};
use crate::refinement::{AiStatus, RefinementError};
use crate::store::ContentStore;
use crate::types::{
    AdminUser, CourseId, DepartmentId, DifficultyLevel, PremiumUser, PremiumUserId, Provider,
    RefinementId, RefinementRecord, Requester, Topic, TopicId, TopicTier, Viewer,
};

use super::middleware::{record_access_denial, record_refinement};
use super::state::ServiceState;

const USER_HEADER: &str = "x-user-id";
const ADMIN_SESSION_HEADER: &str = "x-admin-session";
const UPLOAD_LIMIT_BYTES: usize = 25 * 1024 * 1024;

type SharedState<S> = State<Arc<ServiceState<S>>>;

// ============================================================================
// Errors
// ============================================================================

/// Structured error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Set when the content is premium and the requester is not allowed in.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub premium: bool,
    /// Set when signing in with an assigned identity would grant access.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_login: bool,
}

/// HTTP status for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InvalidOperation | ErrorKind::InsufficientContent => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::ConfigurationError => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error returned by every handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: status_for(kind),
            body: ErrorResponse {
                error: message.into(),
                code: kind.code().to_string(),
                details: None,
                premium: false,
                requires_login: false,
            },
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    fn classified<E: Classify + Display>(e: &E) -> Self {
        Self::new(e.kind(), e.to_string())
    }

    fn premium_denied(assigned_count: usize) -> Self {
        let mut error = Self::new(ErrorKind::Forbidden, "Access denied. This is a premium topic.");
        error.body.premium = true;
        error.body.requires_login = true;
        error.body.details = Some(format!("assigned_users={assigned_count}"));
        error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = %self.body.code, error = %self.body.error, "Request failed");
        } else {
            tracing::warn!(code = %self.body.code, error = %self.body.error, "Request error");
        }
        (self.status, Json(self.body)).into_response()
    }
}

macro_rules! classified_errors {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for ApiError {
                fn from(e: $ty) -> Self {
                    Self::classified(&e)
                }
            }
        )*
    };
}

classified_errors!(
    AssignmentError,
    ContentError,
    ExportError,
    IngestError,
    RefinementError,
    RegistrationError,
    SessionError,
);

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::PremiumRequired { assigned_count, .. } => Self::premium_denied(assigned_count),
            other => Self::classified(&other),
        }
    }
}

impl From<PremiumError> for ApiError {
    fn from(e: PremiumError) -> Self {
        match e {
            PremiumError::Catalog(inner) => inner.into(),
            other => Self::classified(&other),
        }
    }
}

// ============================================================================
// Identity extraction
// ============================================================================

/// Identity query parameters accepted by public endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityParams {
    /// Claimed premium user id.
    #[serde(default)]
    pub user_id: Option<String>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Admin session token from `Authorization: Bearer` or `X-Admin-Session`.
fn session_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| header_str(headers, ADMIN_SESSION_HEADER))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Premium user id from the `user_id` query parameter or `X-User-ID` header.
fn claimed_user(params: &IdentityParams, headers: &HeaderMap) -> Result<Option<PremiumUserId>, ApiError> {
    let raw = params
        .user_id
        .as_deref()
        .or_else(|| header_str(headers, USER_HEADER))
        .map(str::trim)
        .filter(|s| !s.is_empty());
    match raw {
        None => Ok(None),
        Some(s) => PremiumUserId::parse(s)
            .map(Some)
            .ok_or_else(|| ApiError::bad_request(format!("Invalid user_id: {s}"))),
    }
}

async fn viewer<S: ContentStore + 'static>(
    state: &ServiceState<S>,
    params: &IdentityParams,
    headers: &HeaderMap,
) -> Result<Viewer, ApiError> {
    let mut requester = claimed_user(params, headers)?
        .map(Requester::Premium)
        .unwrap_or_default();
    if let Some(token) = session_token(headers) {
        match state.authenticate_admin(Some(token)).await {
            Ok(admin) => requester = Requester::Admin(admin.id),
            Err(e) => tracing::debug!(error = %e, "Ignoring admin session on public endpoint"),
        }
    }
    resolve_viewer(state.store.as_ref(), requester)
        .await
        .map_err(|e| ApiError::new(ErrorKind::Internal, e.to_string()))
}

async fn require_admin<S: ContentStore + 'static>(
    state: &ServiceState<S>,
    headers: &HeaderMap,
) -> Result<AdminUser, ApiError> {
    state.authenticate_admin(session_token(headers)).await.map_err(|e| {
        tracing::warn!(error = %e, "Admin endpoint rejected");
        ApiError::from(e)
    })
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Year filter for department courses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct YearParams {
    /// Year label to match exactly.
    #[serde(default)]
    pub year: Option<String>,
}

/// Delete mode for admin course and topic deletes.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DeleteParams {
    /// Remove the row outright instead of marking it deleted.
    #[serde(default)]
    pub hard: bool,
}

/// Registration or login by code.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    /// Name.
    pub name: String,
    /// Four-character access code.
    pub code: String,
    /// Department name, created when absent.
    #[serde(default)]
    pub department: Option<String>,
}

/// Admin credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

/// Premium user create or update form.
#[derive(Debug, Clone, Deserialize)]
pub struct UserForm {
    /// Name.
    pub name: String,
    /// Access code.
    pub code: String,
    /// Department id.
    #[serde(default)]
    pub department_id: Option<DepartmentId>,
}

/// Batch import payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRequest {
    /// Rows to import.
    pub users: Vec<ImportRow>,
}

/// New assignment set of a premium topic.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignRequest {
    /// Users granted access; empty opens the topic to every listing.
    pub user_ids: BTreeSet<PremiumUserId>,
}

/// Department names of a course.
#[derive(Debug, Clone, Deserialize)]
pub struct DepartmentsRequest {
    /// Department names.
    pub departments: Vec<String>,
}

/// Hand-edited refined summary.
#[derive(Debug, Clone, Deserialize)]
pub struct RefinedSummaryRequest {
    /// New summary text.
    pub refined_summary: String,
}

/// Refinement generation request.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    /// Providers to run, in provider order.
    pub providers: BTreeSet<Provider>,
    /// Requested depth.
    #[serde(default)]
    pub difficulty: DifficultyLevel,
}

/// Result of one provider run.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderOutcome {
    /// Provider.
    pub provider: Provider,
    /// Stored record on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<RefinementRecord>,
    /// Error body on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

/// Outcome of a generation request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    /// Per-provider outcomes.
    pub results: Vec<ProviderOutcome>,
}

/// Direct text ingestion.
#[derive(Debug, Clone, Deserialize)]
pub struct TextIngestRequest {
    /// Target course.
    pub course: CourseChoice,
    /// Topic metadata.
    pub topic: TopicDraft,
    /// Text content.
    pub text: String,
}

/// Service health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded".
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Store connectivity.
    pub database: bool,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    /// Always "alive".
    pub status: String,
}

/// Readiness response with dependency status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Whether traffic can be served.
    pub ready: bool,
    /// Store connectivity.
    pub database: bool,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// ============================================================================
// Public catalog
// ============================================================================

async fn departments_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
) -> Result<Json<Vec<DepartmentSummary>>, ApiError> {
    Ok(Json(state.catalog.departments().await?))
}

async fn department_courses_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<DepartmentId>,
    Query(params): Query<IdentityParams>,
    headers: HeaderMap,
) -> Result<Json<Vec<CourseSummary>>, ApiError> {
    let viewer = viewer(&state, &params, &headers).await?;
    Ok(Json(state.catalog.department_courses(id, &viewer).await?))
}

async fn available_years_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<DepartmentId>,
) -> Result<Json<AvailableYears>, ApiError> {
    Ok(Json(state.catalog.available_years(id).await?))
}

async fn course_topics_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<CourseId>,
    Query(params): Query<IdentityParams>,
    headers: HeaderMap,
) -> Result<Json<CourseTopics>, ApiError> {
    let viewer = viewer(&state, &params, &headers).await?;
    Ok(Json(state.catalog.course_topics(id, &viewer).await?))
}

async fn browse_course_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<CourseId>,
    Query(params): Query<IdentityParams>,
    headers: HeaderMap,
) -> Result<Json<CourseTopics>, ApiError> {
    let viewer = viewer(&state, &params, &headers).await?;
    Ok(Json(state.catalog.browse_course(id, &viewer).await?))
}

async fn course_full_text_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<CourseId>,
    Query(params): Query<IdentityParams>,
    headers: HeaderMap,
) -> Result<Json<CourseFullText>, ApiError> {
    let viewer = viewer(&state, &params, &headers).await?;
    Ok(Json(state.catalog.course_full_text(id, &viewer).await?))
}

async fn library_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Query(params): Query<IdentityParams>,
    headers: HeaderMap,
) -> Result<Json<Vec<LibraryCourse>>, ApiError> {
    let viewer = viewer(&state, &params, &headers).await?;
    Ok(Json(state.catalog.library(&viewer).await?))
}

async fn topic_detail_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<TopicId>,
    Query(params): Query<IdentityParams>,
    headers: HeaderMap,
) -> Result<Json<TopicDetail>, ApiError> {
    let viewer = viewer(&state, &params, &headers).await?;
    match state.catalog.topic_detail(id, &viewer).await {
        Ok(detail) => Ok(Json(detail)),
        Err(e) => {
            if matches!(e, CatalogError::PremiumRequired { .. }) {
                record_access_denial(&viewer);
            }
            Err(e.into())
        }
    }
}

async fn ai_status_handler<S: ContentStore + 'static>(State(state): SharedState<S>) -> Json<AiStatus> {
    Json(state.refinement.ai_status().await)
}

async fn ocr_status_handler<S: ContentStore + 'static>(State(state): SharedState<S>) -> Json<OcrHealth> {
    Json(state.ocr.health().await)
}

// ============================================================================
// Premium API
// ============================================================================

async fn register_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Registration>), ApiError> {
    let registration = register_or_login(
        state.store.as_ref(),
        &request.name,
        &request.code,
        request.department.as_deref(),
    )
    .await?;
    let status = if registration.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(registration)))
}

async fn my_department_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Query(params): Query<IdentityParams>,
    headers: HeaderMap,
) -> Result<Json<MyDepartment>, ApiError> {
    let user_id = claimed_user(&params, &headers)?;
    Ok(Json(state.premium.my_department(user_id).await?))
}

async fn premium_department_courses_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<DepartmentId>,
    Query(params): Query<IdentityParams>,
    Query(year): Query<YearParams>,
    headers: HeaderMap,
) -> Result<Json<DepartmentCourses>, ApiError> {
    let user_id = claimed_user(&params, &headers)?;
    let year = year.year.as_deref().map(str::trim).filter(|y| !y.is_empty());
    Ok(Json(
        state.premium.courses_by_department_and_year(user_id, id, year).await?,
    ))
}

async fn accessible_topics_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Query(params): Query<IdentityParams>,
    headers: HeaderMap,
) -> Result<Json<AccessibleTopics>, ApiError> {
    let user_id = claimed_user(&params, &headers)?;
    Ok(Json(state.premium.accessible_topics(user_id).await?))
}

async fn premium_course_topics_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<CourseId>,
    Query(params): Query<IdentityParams>,
    headers: HeaderMap,
) -> Result<Json<CourseTopics>, ApiError> {
    let user_id = claimed_user(&params, &headers)?;
    Ok(Json(state.premium.topics_by_course(user_id, id).await?))
}

async fn premium_topic_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<TopicId>,
    Query(params): Query<IdentityParams>,
    headers: HeaderMap,
) -> Result<Json<TopicDetail>, ApiError> {
    let user_id = claimed_user(&params, &headers)?;
    Ok(Json(state.premium.topic_full(user_id, id).await?))
}

// ============================================================================
// Admin session
// ============================================================================

async fn admin_login_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AdminLogin>, ApiError> {
    let admin = state.admin().ok_or_else(|| {
        ApiError::new(ErrorKind::ConfigurationError, "Admin sessions are not configured")
    })?;
    Ok(Json(admin.login(&request.username, &request.password, Utc::now()).await?))
}

async fn admin_me_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    headers: HeaderMap,
) -> Result<Json<AdminUser>, ApiError> {
    Ok(Json(require_admin(&state, &headers).await?))
}

// ============================================================================
// Admin content
// ============================================================================

async fn create_course_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    headers: HeaderMap,
    Json(form): Json<CourseForm>,
) -> Result<(StatusCode, Json<crate::types::Course>), ApiError> {
    require_admin(&state, &headers).await?;
    Ok((StatusCode::CREATED, Json(state.content.create_course(&form).await?)))
}

async fn course_departments_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<CourseId>,
    headers: HeaderMap,
    Json(request): Json<DepartmentsRequest>,
) -> Result<Json<crate::types::Course>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.content.set_departments(id, &request.departments).await?))
}

async fn delete_course_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<CourseId>,
    Query(params): Query<DeleteParams>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_admin(&state, &headers).await?;
    if params.hard {
        state.content.purge_course(id).await?;
    } else {
        state.content.delete_course(id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_topic_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<TopicId>,
    Query(params): Query<DeleteParams>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_admin(&state, &headers).await?;
    if params.hard {
        state.content.purge_topic(id).await?;
    } else {
        state.content.delete_topic(id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_department_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<DepartmentId>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_admin(&state, &headers).await?;
    state.content.delete_department(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn refined_summary_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<TopicId>,
    headers: HeaderMap,
    Json(request): Json<RefinedSummaryRequest>,
) -> Result<Json<Topic>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.content.edit_refined_summary(id, &request.refined_summary).await?))
}

async fn premium_overview_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    headers: HeaderMap,
) -> Result<Json<PremiumOverview>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.catalog.premium_overview().await?))
}

// ============================================================================
// Admin assignments
// ============================================================================

async fn assign_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<TopicId>,
    headers: HeaderMap,
    Json(request): Json<AssignRequest>,
) -> Result<Json<Topic>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.assignments.assign(id, &request.user_ids).await?))
}

async fn unassign_all_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<TopicId>,
    headers: HeaderMap,
) -> Result<Json<Topic>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.assignments.unassign_all(id).await?))
}

async fn add_assignment_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path((id, user)): Path<(TopicId, PremiumUserId)>,
    headers: HeaderMap,
) -> Result<Json<Topic>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.assignments.add_user(id, user).await?))
}

async fn remove_assignment_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path((id, user)): Path<(TopicId, PremiumUserId)>,
    headers: HeaderMap,
) -> Result<Json<Topic>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.assignments.remove_user(id, user).await?))
}

// ============================================================================
// Admin refinement
// ============================================================================

async fn generate_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<TopicId>,
    headers: HeaderMap,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    require_admin(&state, &headers).await?;
    if request.providers.is_empty() {
        return Err(ApiError::bad_request("At least one provider is required"));
    }

    let outcomes = state
        .refinement
        .generate_many(id, &request.providers, request.difficulty)
        .await;

    // A request in which every provider failed reports the first failure.
    if outcomes.values().all(Result::is_err) {
        for provider in outcomes.keys() {
            record_refinement(*provider, request.difficulty, false);
        }
        return match outcomes.into_values().next() {
            Some(Err(e)) => Err(e.into()),
            _ => Err(ApiError::new(ErrorKind::Internal, "No refinement outcome")),
        };
    }

    let results = outcomes
        .into_iter()
        .map(|(provider, outcome)| {
            record_refinement(provider, request.difficulty, outcome.is_ok());
            match outcome {
                Ok(record) => ProviderOutcome {
                    provider,
                    record: Some(record),
                    error: None,
                },
                Err(e) => ProviderOutcome {
                    provider,
                    record: None,
                    error: Some(ApiError::classified(&e).body),
                },
            }
        })
        .collect();
    Ok(Json(GenerateResponse { results }))
}

async fn refinements_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<TopicId>,
    headers: HeaderMap,
) -> Result<Json<Vec<RefinementRecord>>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.refinement.list_for_topic(id).await?))
}

async fn select_refinement_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<RefinementId>,
    headers: HeaderMap,
) -> Result<Json<Topic>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.refinement.select(id).await?))
}

// ============================================================================
// Admin ingestion
// ============================================================================

fn form_field<'a>(fields: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    fields.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn course_choice(fields: &BTreeMap<String, String>) -> Result<CourseChoice, ApiError> {
    match form_field(fields, "course_option").unwrap_or("existing") {
        "new" => Ok(CourseChoice::New {
            name: form_field(fields, "new_course_name").unwrap_or_default().to_string(),
            department: form_field(fields, "department").map(str::to_string),
        }),
        "existing" => form_field(fields, "course_id")
            .and_then(CourseId::parse)
            .map(|course_id| CourseChoice::Existing { course_id })
            .ok_or_else(|| ApiError::bad_request("Please select a course")),
        other => Err(ApiError::bad_request(format!("Unknown course_option: {other}"))),
    }
}

fn topic_draft(fields: &BTreeMap<String, String>) -> Result<TopicDraft, ApiError> {
    let tier = TopicTier::from_str(form_field(fields, "tier").unwrap_or_default())
        .ok_or_else(|| ApiError::bad_request("tier must be community or premium"))?;
    let difficulty = match form_field(fields, "difficulty") {
        Some(raw) => DifficultyLevel::from_str(raw)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown difficulty: {raw}")))?,
        None => DifficultyLevel::default(),
    };
    Ok(TopicDraft {
        title: form_field(fields, "title").unwrap_or_default().to_string(),
        page_range: form_field(fields, "page_range").unwrap_or_default().to_string(),
        tier,
        difficulty,
    })
}

async fn ingest_images_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Topic>), ApiError> {
    require_admin(&state, &headers).await?;

    let mut fields = BTreeMap::new();
    let mut images = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "images" {
            let file_name = field.file_name().unwrap_or("page.jpg").to_string();
            let bytes = field.bytes().await.map_err(|e| ApiError::bad_request(e.to_string()))?;
            images.push(UploadedImage {
                file_name,
                bytes: bytes.to_vec(),
            });
        } else {
            let value = field.text().await.map_err(|e| ApiError::bad_request(e.to_string()))?;
            fields.insert(name, value);
        }
    }

    let choice = course_choice(&fields)?;
    let draft = topic_draft(&fields)?;
    let topic = state
        .ingestor
        .ingest_images(state.ocr.as_ref(), &images, &choice, &draft)
        .await?;
    Ok((StatusCode::CREATED, Json(topic)))
}

async fn ingest_text_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    headers: HeaderMap,
    Json(request): Json<TextIngestRequest>,
) -> Result<(StatusCode, Json<Topic>), ApiError> {
    require_admin(&state, &headers).await?;
    let topic = state
        .ingestor
        .ingest_text(&request.course, &request.topic, &request.text, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(topic)))
}

// ============================================================================
// Admin users and bulk operations
// ============================================================================

async fn list_users_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Query(query): Query<UserQuery>,
    headers: HeaderMap,
) -> Result<Json<UserListing>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.users.list(&query).await?))
}

async fn create_user_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    headers: HeaderMap,
    Json(form): Json<UserForm>,
) -> Result<(StatusCode, Json<PremiumUser>), ApiError> {
    require_admin(&state, &headers).await?;
    let user = state.users.create(&form.name, &form.code, form.department_id).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn update_user_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<PremiumUserId>,
    headers: HeaderMap,
    Json(form): Json<UserForm>,
) -> Result<Json<PremiumUser>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(
        state.users.update(id, &form.name, &form.code, form.department_id).await?,
    ))
}

async fn toggle_user_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<PremiumUserId>,
    headers: HeaderMap,
) -> Result<Json<PremiumUser>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.users.toggle_active(id).await?))
}

async fn delete_user_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    Path(id): Path<PremiumUserId>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_admin(&state, &headers).await?;
    state.users.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn import_users_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    headers: HeaderMap,
    Json(request): Json<ImportRequest>,
) -> Result<Json<ImportReport>, ApiError> {
    let admin = require_admin(&state, &headers).await?;
    tracing::info!(admin_id = %admin.id, rows = request.users.len(), "Batch user import requested");
    Ok(Json(state.bulk.import_users(&request.users).await?))
}

async fn export_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
    headers: HeaderMap,
) -> Result<Json<DataExport>, ApiError> {
    let admin = require_admin(&state, &headers).await?;
    tracing::info!(admin_id = %admin.id, "Data export requested");
    Ok(Json(state.bulk.export(Utc::now()).await?))
}

// ============================================================================
// Health
// ============================================================================

async fn health_handler<S: ContentStore + 'static>(State(state): SharedState<S>) -> Json<HealthResponse> {
    let database = state.store.is_healthy().await;
    Json(HealthResponse {
        status: if database { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
    })
}

async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

async fn readiness_handler<S: ContentStore + 'static>(
    State(state): SharedState<S>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    if state.store.is_healthy().await {
        Ok(Json(ReadinessResponse {
            ready: true,
            database: true,
            details: None,
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                database: false,
                details: Some("Database connection failed".to_string()),
            }),
        ))
    }
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the study guide service.
pub fn create_router<S: ContentStore + 'static>(state: ServiceState<S>) -> Router {
    let state = Arc::new(state);

    Router::new()
        // Public catalog
        .route("/api/departments", get(departments_handler::<S>))
        .route("/api/departments/:id/courses", get(department_courses_handler::<S>))
        .route("/api/departments/:id/years", get(available_years_handler::<S>))
        .route("/api/courses/:id/topics", get(course_topics_handler::<S>))
        .route("/api/courses/:id/browse", get(browse_course_handler::<S>))
        .route("/api/courses/:id/full", get(course_full_text_handler::<S>))
        .route("/api/library", get(library_handler::<S>))
        .route("/api/topics/:id", get(topic_detail_handler::<S>))
        .route("/api/ai-status", get(ai_status_handler::<S>))
        .route("/api/ocr-status", get(ocr_status_handler::<S>))
        // Premium API
        .route("/api/premium/register", post(register_handler::<S>))
        .route("/api/premium/department", get(my_department_handler::<S>))
        .route(
            "/api/premium/departments/:id/courses",
            get(premium_department_courses_handler::<S>),
        )
        .route("/api/premium/topics", get(accessible_topics_handler::<S>))
        .route("/api/premium/courses/:id/topics", get(premium_course_topics_handler::<S>))
        .route("/api/premium/topics/:id", get(premium_topic_handler::<S>))
        // Admin session
        .route("/api/admin/login", post(admin_login_handler::<S>))
        .route("/api/admin/me", get(admin_me_handler::<S>))
        // Admin content
        .route("/api/admin/courses", post(create_course_handler::<S>))
        .route("/api/admin/departments/:id", delete(delete_department_handler::<S>))
        .route("/api/admin/courses/:id", delete(delete_course_handler::<S>))
        .route("/api/admin/courses/:id/departments", put(course_departments_handler::<S>))
        .route("/api/admin/topics/:id", delete(delete_topic_handler::<S>))
        .route("/api/admin/topics/:id/refined-summary", put(refined_summary_handler::<S>))
        .route("/api/admin/premium-topics", get(premium_overview_handler::<S>))
        // Admin assignments
        .route(
            "/api/admin/topics/:id/assignments",
            put(assign_handler::<S>).delete(unassign_all_handler::<S>),
        )
        .route(
            "/api/admin/topics/:id/assignments/:user_id",
            post(add_assignment_handler::<S>).delete(remove_assignment_handler::<S>),
        )
        // Admin refinement
        .route(
            "/api/admin/topics/:id/refinements",
            get(refinements_handler::<S>).post(generate_handler::<S>),
        )
        .route("/api/admin/refinements/:id/select", post(select_refinement_handler::<S>))
        // Admin ingestion
        .route(
            "/api/admin/ingest/images",
            post(ingest_images_handler::<S>).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route("/api/admin/ingest/text", post(ingest_text_handler::<S>))
        // Admin users and bulk operations
        .route(
            "/api/admin/users",
            get(list_users_handler::<S>).post(create_user_handler::<S>),
        )
        .route("/api/admin/users/import", post(import_users_handler::<S>))
        .route(
            "/api/admin/users/:id",
            put(update_user_handler::<S>).delete(delete_user_handler::<S>),
        )
        .route("/api/admin/users/:id/toggle", post(toggle_user_handler::<S>))
        .route("/api/admin/export", get(export_handler::<S>))
        // Health checks
        .route("/health", get(health_handler::<S>))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler::<S>))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(ErrorKind::InvalidOperation), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_premium_denial_body() {
        let error: ApiError = CatalogError::PremiumRequired {
            topic_id: TopicId::new(1),
            assigned_count: 2,
        }
        .into();
        assert_eq!(error.status, StatusCode::FORBIDDEN);
        assert!(error.body.premium && error.body.requires_login);
    }

    #[test]
    fn test_claimed_user_sources() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, "7".parse().unwrap());
        assert_eq!(
            claimed_user(&IdentityParams::default(), &headers).unwrap(),
            Some(PremiumUserId::new(7))
        );

        let params = IdentityParams {
            user_id: Some("9".to_string()),
        };
        assert_eq!(claimed_user(&params, &headers).unwrap(), Some(PremiumUserId::new(9)));

        let bad = IdentityParams {
            user_id: Some("abc".to_string()),
        };
        assert_eq!(claimed_user(&bad, &HeaderMap::new()).unwrap_err().status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_session_token_sources() {
        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_SESSION_HEADER, "abc".parse().unwrap());
        assert_eq!(session_token(&headers), Some("abc"));
        headers.insert(AUTHORIZATION, "Bearer xyz".parse().unwrap());
        assert_eq!(session_token(&headers), Some("xyz"));
    }

    #[test]
    fn test_course_choice_from_form() {
        let mut fields = BTreeMap::new();
        fields.insert("course_option".to_string(), "new".to_string());
        fields.insert("new_course_name".to_string(), "BIO 202".to_string());
        assert_eq!(
            course_choice(&fields).unwrap(),
            CourseChoice::New {
                name: "BIO 202".to_string(),
                department: None
            }
        );

        fields.insert("course_option".to_string(), "existing".to_string());
        assert_eq!(course_choice(&fields).unwrap_err().status, StatusCode::BAD_REQUEST);
        fields.insert("course_id".to_string(), "3".to_string());
        assert_eq!(
            course_choice(&fields).unwrap(),
            CourseChoice::Existing {
                course_id: CourseId::new(3)
            }
        );
    }
}
