//! Study Guide REST Service
//!
//! Exposes the kernel over HTTP. Public endpoints take an optional premium
//! identity from the `user_id` query parameter or the `X-User-ID` header.
//! Admin endpoints take a session token from `Authorization: Bearer` or
//! `X-Admin-Session` and answer 403 before touching any data.
//!
//! ## Endpoints
//!
//! - `GET /api/departments` - Departments with course counts
//! - `GET /api/departments/:id/courses` - Courses with visible topic counts
//! - `GET /api/departments/:id/years` - Year labels of a department
//! - `GET /api/courses/:id/topics` - Visible topics, newest first
//! - `GET /api/courses/:id/browse` - Visible topics in reading order
//! - `GET /api/courses/:id/full` - Refined text of every readable topic
//! - `GET /api/library` - Courses with browse counts
//! - `GET /api/topics/:id` - Topic content (403 with `premium: true` when denied)
//! - `GET /api/ai-status`, `GET /api/ocr-status` - Collaborator health
//! - `POST /api/premium/register` - Register or log in by code
//! - `GET /api/premium/...` - Department-scoped views for a premium user
//! - `POST /api/admin/login`, `GET /api/admin/me` - Admin session
//! - `/api/admin/...` - Content, assignments, refinement, ingestion, users,
//!   export and batch import
//! - `GET /health`, `/health/live`, `/health/ready` - Probes

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::{metrics_middleware, record_access_denial, record_refinement};
pub use routes::{create_router, status_for, ApiError, ErrorResponse};
pub use state::{ServiceState, StateError};
