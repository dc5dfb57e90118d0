//! PostgreSQL entity store.
//!
//! Pool settings come from the environment:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_URL` | `postgresql://localhost/study_guide` |
//! | `DB_MAX_CONNECTIONS` / `DB_MIN_CONNECTIONS` | 10 / 2 |
//! | `DB_CONNECT_TIMEOUT_SECS` | 10 |
//! | `DB_IDLE_TIMEOUT_SECS` | 300 |
//! | `DB_MAX_LIFETIME_SECS` | 1800 |
//!
//! Call [`PostgresContentStore::migrate`] once at startup to create the
//! tables if they do not exist.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Executor, Row};

use super::ContentStore;
use crate::config::{env_opt, env_or};
use crate::types::{
    AccessCode, AdminId, AdminUser, Course, CourseId, Department, DepartmentId, DifficultyLevel,
    NewCourse, NewPremiumUser, NewTopic, PremiumUser, PremiumUserId, Provider, RefinementId,
    RefinementKey, RefinementRecord, RefinementStatus, RefinementUpdate, Topic, TopicId,
};

/// Table definitions, applied idempotently by [`PostgresContentStore::migrate`].
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS departments (
    id          BIGSERIAL PRIMARY KEY,
    name        TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE UNIQUE INDEX IF NOT EXISTS departments_name_ci ON departments (lower(name));

CREATE TABLE IF NOT EXISTS courses (
    id           BIGSERIAL PRIMARY KEY,
    name         TEXT NOT NULL,
    year         TEXT NOT NULL DEFAULT '',
    description  TEXT NOT NULL DEFAULT '',
    is_deleted   BOOLEAN NOT NULL DEFAULT FALSE,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS course_departments (
    course_id      BIGINT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
    department_id  BIGINT NOT NULL REFERENCES departments(id) ON DELETE CASCADE,
    PRIMARY KEY (course_id, department_id)
);

CREATE TABLE IF NOT EXISTS premium_users (
    id             BIGSERIAL PRIMARY KEY,
    name           TEXT NOT NULL,
    code           CHAR(4) NOT NULL,
    department_id  BIGINT REFERENCES departments(id) ON DELETE SET NULL,
    is_active      BOOLEAN NOT NULL DEFAULT TRUE,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE UNIQUE INDEX IF NOT EXISTS premium_users_name_code ON premium_users (lower(name), code);

CREATE TABLE IF NOT EXISTS topics (
    id                BIGSERIAL PRIMARY KEY,
    course_id         BIGINT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
    title             TEXT NOT NULL,
    raw_text          TEXT NOT NULL DEFAULT '',
    refined_summary   TEXT NOT NULL DEFAULT '',
    page_range        TEXT NOT NULL DEFAULT '',
    topic_order       INTEGER NOT NULL DEFAULT 0,
    is_premium        BOOLEAN NOT NULL DEFAULT FALSE,
    is_deleted        BOOLEAN NOT NULL DEFAULT FALSE,
    difficulty_level  TEXT NOT NULL DEFAULT 'medium',
    created_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS topics_course ON topics (course_id);

CREATE TABLE IF NOT EXISTS topic_assignments (
    topic_id  BIGINT NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
    user_id   BIGINT NOT NULL REFERENCES premium_users(id) ON DELETE CASCADE,
    PRIMARY KEY (topic_id, user_id)
);

CREATE TABLE IF NOT EXISTS admin_users (
    id             BIGSERIAL PRIMARY KEY,
    username       TEXT NOT NULL UNIQUE,
    full_name      TEXT NOT NULL DEFAULT '',
    password_hash  TEXT NOT NULL,
    is_active      BOOLEAN NOT NULL DEFAULT TRUE,
    is_staff       BOOLEAN NOT NULL DEFAULT TRUE,
    is_superuser   BOOLEAN NOT NULL DEFAULT FALSE,
    date_joined    TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS topic_refinements (
    id                    BIGSERIAL PRIMARY KEY,
    topic_id              BIGINT NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
    provider              TEXT NOT NULL,
    difficulty            TEXT NOT NULL,
    refined_text          TEXT NOT NULL DEFAULT '',
    status                TEXT NOT NULL DEFAULT 'pending',
    error_message         TEXT NOT NULL DEFAULT '',
    processing_time_secs  DOUBLE PRECISION,
    item_count            INTEGER NOT NULL DEFAULT 0,
    prompt_fingerprint    TEXT NOT NULL DEFAULT '',
    created_at            TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at            TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (topic_id, provider, difficulty)
);
"#;

const TOPIC_COLUMNS: &str = "id, course_id, title, raw_text, refined_summary, page_range, \
     topic_order, is_premium, is_deleted, difficulty_level, created_at, updated_at";

const COURSE_COLUMNS: &str = "id, name, year, description, is_deleted, created_at, updated_at";

const USER_COLUMNS: &str = "id, name, code, department_id, is_active, created_at, updated_at";

const ADMIN_COLUMNS: &str =
    "id, username, full_name, password_hash, is_active, is_staff, is_superuser, date_joined";

const REFINEMENT_COLUMNS: &str = "id, topic_id, provider, difficulty, refined_text, status, \
     error_message, processing_time_secs, item_count, prompt_fingerprint, created_at, updated_at";

/// Pool settings.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Connection string.
    pub database_url: String,
    /// Pool ceiling.
    pub max_connections: u32,
    /// Connections kept open when idle.
    pub min_connections: u32,
    /// How long to wait for a free connection.
    pub acquire_timeout: Duration,
    /// Idle connections older than this are closed.
    pub idle_timeout: Duration,
    /// Connections are recycled after this long.
    pub max_lifetime: Duration,
}

impl PostgresConfig {
    /// Read pool settings, see the module docs for variables and defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: env_opt("DATABASE_URL")
                .unwrap_or_else(|| "postgresql://localhost/study_guide".to_string()),
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            min_connections: env_or("DB_MIN_CONNECTIONS", 2),
            acquire_timeout: Duration::from_secs(env_or("DB_CONNECT_TIMEOUT_SECS", 10)),
            idle_timeout: Duration::from_secs(env_or("DB_IDLE_TIMEOUT_SECS", 300)),
            max_lifetime: Duration::from_secs(env_or("DB_MAX_LIFETIME_SECS", 1800)),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Pool occupancy snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

/// Error type for PostgreSQL store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A stored value could not be decoded into its domain type.
    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow {
        /// Table the row came from.
        table: &'static str,
        /// What failed to decode.
        reason: String,
    },
}

impl PostgresError {
    fn corrupt(table: &'static str, reason: impl Into<String>) -> Self {
        Self::CorruptRow {
            table,
            reason: reason.into(),
        }
    }
}

/// PostgreSQL entity store.
///
/// Uses connection pooling with production-tuned settings. Multi-row
/// mutations (cascading deletes, assignment replacement) run in a
/// transaction.
pub struct PostgresContentStore {
    pool: PgPool,
}

impl PostgresContentStore {
    /// Open a pool.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max = config.max_connections,
            min = config.min_connections,
            acquire_timeout_ms = config.acquire_timeout.as_millis() as u64,
            "Opening PostgreSQL pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Create missing tables and indexes.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        self.pool.execute(SCHEMA).await?;
        tracing::info!("Schema migration applied");
        Ok(())
    }

    /// Current pool occupancy.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    fn parse_department_row(row: &PgRow) -> Result<Department, sqlx::Error> {
        Ok(Department {
            id: DepartmentId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn parse_course_row(
        row: &PgRow,
        departments: BTreeSet<DepartmentId>,
    ) -> Result<Course, sqlx::Error> {
        Ok(Course {
            id: CourseId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            year: row.try_get("year")?,
            description: row.try_get("description")?,
            departments,
            is_deleted: row.try_get("is_deleted")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn parse_topic_row(
        row: &PgRow,
        assigned_users: BTreeSet<PremiumUserId>,
    ) -> Result<Topic, PostgresError> {
        let difficulty: String = row.try_get("difficulty_level")?;
        Ok(Topic {
            id: TopicId::new(row.try_get("id")?),
            course_id: CourseId::new(row.try_get("course_id")?),
            title: row.try_get("title")?,
            raw_text: row.try_get("raw_text")?,
            refined_summary: row.try_get("refined_summary")?,
            page_range: row.try_get("page_range")?,
            order: row.try_get("topic_order")?,
            is_premium: row.try_get("is_premium")?,
            is_deleted: row.try_get("is_deleted")?,
            difficulty_level: DifficultyLevel::from_str(&difficulty)
                .ok_or_else(|| PostgresError::corrupt("topics", format!("difficulty {}", difficulty)))?,
            assigned_users,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn parse_user_row(row: &PgRow) -> Result<PremiumUser, PostgresError> {
        let code: String = row.try_get("code")?;
        let department_id: Option<i64> = row.try_get("department_id")?;
        Ok(PremiumUser {
            id: PremiumUserId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            code: AccessCode::parse(&code)
                .map_err(|e| PostgresError::corrupt("premium_users", e.to_string()))?,
            department_id: department_id.map(DepartmentId::new),
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn parse_admin_row(row: &PgRow) -> Result<AdminUser, sqlx::Error> {
        Ok(AdminUser {
            id: AdminId::new(row.try_get("id")?),
            username: row.try_get("username")?,
            full_name: row.try_get("full_name")?,
            password_hash: row.try_get("password_hash")?,
            is_active: row.try_get("is_active")?,
            is_staff: row.try_get("is_staff")?,
            is_superuser: row.try_get("is_superuser")?,
            date_joined: row.try_get("date_joined")?,
        })
    }

    fn parse_refinement_row(row: &PgRow) -> Result<RefinementRecord, PostgresError> {
        let provider: String = row.try_get("provider")?;
        let difficulty: String = row.try_get("difficulty")?;
        let status: String = row.try_get("status")?;
        let item_count: i32 = row.try_get("item_count")?;
        let key = RefinementKey::new(
            TopicId::new(row.try_get("topic_id")?),
            Provider::from_str(&provider)
                .ok_or_else(|| PostgresError::corrupt("topic_refinements", format!("provider {}", provider)))?,
            DifficultyLevel::from_str(&difficulty)
                .ok_or_else(|| PostgresError::corrupt("topic_refinements", format!("difficulty {}", difficulty)))?,
        );
        Ok(RefinementRecord {
            id: RefinementId::new(row.try_get("id")?),
            key,
            refined_text: row.try_get("refined_text")?,
            status: RefinementStatus::from_str(&status)
                .ok_or_else(|| PostgresError::corrupt("topic_refinements", format!("status {}", status)))?,
            error_message: row.try_get("error_message")?,
            processing_time_secs: row.try_get("processing_time_secs")?,
            item_count: item_count.max(0) as u32,
            prompt_fingerprint: row.try_get("prompt_fingerprint")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn course_departments(
        &self,
        ids: &[i64],
    ) -> Result<BTreeMap<i64, BTreeSet<DepartmentId>>, PostgresError> {
        let rows = sqlx::query(
            "SELECT course_id, department_id FROM course_departments WHERE course_id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut map: BTreeMap<i64, BTreeSet<DepartmentId>> = BTreeMap::new();
        for row in &rows {
            let course_id: i64 = row.try_get("course_id")?;
            let department_id: i64 = row.try_get("department_id")?;
            map.entry(course_id)
                .or_default()
                .insert(DepartmentId::new(department_id));
        }
        Ok(map)
    }

    async fn assignments(
        &self,
        ids: &[i64],
    ) -> Result<BTreeMap<i64, BTreeSet<PremiumUserId>>, PostgresError> {
        let rows = sqlx::query(
            "SELECT topic_id, user_id FROM topic_assignments WHERE topic_id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut map: BTreeMap<i64, BTreeSet<PremiumUserId>> = BTreeMap::new();
        for row in &rows {
            let topic_id: i64 = row.try_get("topic_id")?;
            let user_id: i64 = row.try_get("user_id")?;
            map.entry(topic_id)
                .or_default()
                .insert(PremiumUserId::new(user_id));
        }
        Ok(map)
    }

    async fn hydrate_courses(&self, rows: Vec<PgRow>) -> Result<Vec<Course>, PostgresError> {
        let ids: Vec<i64> = rows
            .iter()
            .map(|r| r.try_get::<i64, _>("id"))
            .collect::<Result<_, _>>()?;
        let mut departments = self.course_departments(&ids).await?;
        rows.iter()
            .zip(ids)
            .map(|(row, id)| {
                Self::parse_course_row(row, departments.remove(&id).unwrap_or_default())
                    .map_err(PostgresError::from)
            })
            .collect()
    }

    async fn hydrate_topics(&self, rows: Vec<PgRow>) -> Result<Vec<Topic>, PostgresError> {
        let ids: Vec<i64> = rows
            .iter()
            .map(|r| r.try_get::<i64, _>("id"))
            .collect::<Result<_, _>>()?;
        let mut assignments = self.assignments(&ids).await?;
        rows.iter()
            .zip(ids)
            .map(|(row, id)| Self::parse_topic_row(row, assignments.remove(&id).unwrap_or_default()))
            .collect()
    }
}

#[async_trait]
impl ContentStore for PostgresContentStore {
    type Error = PostgresError;

    async fn list_departments(&self) -> Result<Vec<Department>, Self::Error> {
        let rows = sqlx::query("SELECT id, name, created_at FROM departments ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(Self::parse_department_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(PostgresError::from)
    }

    async fn get_department(&self, id: DepartmentId) -> Result<Option<Department>, Self::Error> {
        let row = sqlx::query("SELECT id, name, created_at FROM departments WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::parse_department_row).transpose()?)
    }

    async fn find_department_by_name(&self, name: &str) -> Result<Option<Department>, Self::Error> {
        let row = sqlx::query(
            "SELECT id, name, created_at FROM departments WHERE lower(name) = lower($1)",
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::parse_department_row).transpose()?)
    }

    async fn create_department(&self, name: &str) -> Result<Department, Self::Error> {
        let row = sqlx::query(
            "INSERT INTO departments (name) VALUES ($1) RETURNING id, name, created_at",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(Self::parse_department_row(&row)?)
    }

    async fn delete_department(&self, id: DepartmentId) -> Result<bool, Self::Error> {
        let result = sqlx::query("DELETE FROM departments WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_course(&self, course: NewCourse) -> Result<Course, Self::Error> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "INSERT INTO courses (name, year, description) VALUES ($1, $2, $3) RETURNING {}",
            COURSE_COLUMNS
        ))
        .bind(&course.name)
        .bind(&course.year)
        .bind(&course.description)
        .fetch_one(&mut *tx)
        .await?;
        let id: i64 = row.try_get("id")?;
        for department in &course.departments {
            sqlx::query("INSERT INTO course_departments (course_id, department_id) VALUES ($1, $2)")
                .bind(id)
                .bind(department.get())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(Self::parse_course_row(&row, course.departments)?)
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, Self::Error> {
        let rows = sqlx::query(&format!("SELECT {} FROM courses WHERE id = $1", COURSE_COLUMNS))
            .bind(id.get())
            .fetch_all(&self.pool)
            .await?;
        Ok(self.hydrate_courses(rows).await?.pop())
    }

    async fn list_courses(&self) -> Result<Vec<Course>, Self::Error> {
        let rows = sqlx::query(&format!("SELECT {} FROM courses ORDER BY name, id", COURSE_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        self.hydrate_courses(rows).await
    }

    async fn courses_in_department(&self, id: DepartmentId) -> Result<Vec<Course>, Self::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM courses WHERE id IN \
             (SELECT course_id FROM course_departments WHERE department_id = $1) \
             ORDER BY name, id",
            COURSE_COLUMNS
        ))
        .bind(id.get())
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_courses(rows).await
    }

    async fn set_course_departments(
        &self,
        id: CourseId,
        departments: &BTreeSet<DepartmentId>,
    ) -> Result<bool, Self::Error> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query("UPDATE courses SET updated_at = now() WHERE id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Ok(false);
        }
        sqlx::query("DELETE FROM course_departments WHERE course_id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await?;
        for department in departments {
            sqlx::query("INSERT INTO course_departments (course_id, department_id) VALUES ($1, $2)")
                .bind(id.get())
                .bind(department.get())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn soft_delete_course(&self, id: CourseId) -> Result<bool, Self::Error> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE courses SET is_deleted = TRUE, updated_at = now() WHERE id = $1",
        )
        .bind(id.get())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(false);
        }
        sqlx::query("UPDATE topics SET is_deleted = TRUE, updated_at = now() WHERE course_id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_course(&self, id: CourseId) -> Result<bool, Self::Error> {
        // Topics, links, assignments and refinements go with ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM courses WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_topic(&self, topic: NewTopic) -> Result<Topic, Self::Error> {
        let row = sqlx::query(&format!(
            "INSERT INTO topics (course_id, title, raw_text, page_range, is_premium, difficulty_level, topic_order) \
             VALUES ($1, $2, $3, $4, $5, $6, \
                 (SELECT COUNT(*)::INTEGER FROM topics WHERE course_id = $1 AND NOT is_deleted)) \
             RETURNING {}",
            TOPIC_COLUMNS
        ))
        .bind(topic.course_id.get())
        .bind(&topic.title)
        .bind(&topic.raw_text)
        .bind(&topic.page_range)
        .bind(topic.is_premium)
        .bind(topic.difficulty_level.as_str())
        .fetch_one(&self.pool)
        .await?;
        Self::parse_topic_row(&row, BTreeSet::new())
    }

    async fn get_topic(&self, id: TopicId) -> Result<Option<Topic>, Self::Error> {
        let rows = sqlx::query(&format!("SELECT {} FROM topics WHERE id = $1", TOPIC_COLUMNS))
            .bind(id.get())
            .fetch_all(&self.pool)
            .await?;
        Ok(self.hydrate_topics(rows).await?.pop())
    }

    async fn topics_for_course(&self, id: CourseId) -> Result<Vec<Topic>, Self::Error> {
        self.topics_for_courses(&[id]).await
    }

    async fn topics_for_courses(&self, ids: &[CourseId]) -> Result<Vec<Topic>, Self::Error> {
        let raw: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {} FROM topics WHERE course_id = ANY($1) ORDER BY id",
            TOPIC_COLUMNS
        ))
        .bind(&raw)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_topics(rows).await
    }

    async fn list_topics(&self) -> Result<Vec<Topic>, Self::Error> {
        let rows = sqlx::query(&format!("SELECT {} FROM topics ORDER BY id", TOPIC_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        self.hydrate_topics(rows).await
    }

    async fn set_refined_summary(
        &self,
        id: TopicId,
        refined_summary: &str,
        difficulty: DifficultyLevel,
    ) -> Result<bool, Self::Error> {
        let result = sqlx::query(
            "UPDATE topics SET refined_summary = $2, difficulty_level = $3, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id.get())
        .bind(refined_summary)
        .bind(difficulty.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete_topic(&self, id: TopicId) -> Result<bool, Self::Error> {
        let result = sqlx::query(
            "UPDATE topics SET is_deleted = TRUE, updated_at = now() WHERE id = $1",
        )
        .bind(id.get())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_topic(&self, id: TopicId) -> Result<bool, Self::Error> {
        let result = sqlx::query("DELETE FROM topics WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_assignments(
        &self,
        id: TopicId,
        users: &BTreeSet<PremiumUserId>,
    ) -> Result<bool, Self::Error> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query("UPDATE topics SET updated_at = now() WHERE id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Ok(false);
        }
        sqlx::query("DELETE FROM topic_assignments WHERE topic_id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await?;
        let raw: Vec<i64> = users.iter().map(|u| u.get()).collect();
        sqlx::query(
            "INSERT INTO topic_assignments (topic_id, user_id) SELECT $1, UNNEST($2::BIGINT[])",
        )
        .bind(id.get())
        .bind(&raw)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn add_assignment(&self, id: TopicId, user: PremiumUserId) -> Result<bool, Self::Error> {
        let result = sqlx::query(
            "INSERT INTO topic_assignments (topic_id, user_id) \
             SELECT id, $2 FROM topics WHERE id = $1 \
             ON CONFLICT DO NOTHING",
        )
        .bind(id.get())
        .bind(user.get())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        Ok(self.get_topic(id).await?.is_some())
    }

    async fn remove_assignment(&self, id: TopicId, user: PremiumUserId) -> Result<bool, Self::Error> {
        sqlx::query("DELETE FROM topic_assignments WHERE topic_id = $1 AND user_id = $2")
            .bind(id.get())
            .bind(user.get())
            .execute(&self.pool)
            .await?;
        Ok(self.get_topic(id).await?.is_some())
    }

    async fn create_premium_user(&self, user: NewPremiumUser) -> Result<PremiumUser, Self::Error> {
        let row = sqlx::query(&format!(
            "INSERT INTO premium_users (name, code, department_id) VALUES ($1, $2, $3) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&user.name)
        .bind(user.code.as_str())
        .bind(user.department_id.map(|d| d.get()))
        .fetch_one(&self.pool)
        .await?;
        Self::parse_user_row(&row)
    }

    async fn get_premium_user(&self, id: PremiumUserId) -> Result<Option<PremiumUser>, Self::Error> {
        let row = sqlx::query(&format!("SELECT {} FROM premium_users WHERE id = $1", USER_COLUMNS))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_user_row).transpose()
    }

    async fn list_premium_users(&self) -> Result<Vec<PremiumUser>, Self::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM premium_users ORDER BY created_at DESC, id DESC",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_user_row).collect()
    }

    async fn find_premium_user_by_code(
        &self,
        code: &AccessCode,
    ) -> Result<Option<PremiumUser>, Self::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM premium_users WHERE code = $1 ORDER BY id LIMIT 1",
            USER_COLUMNS
        ))
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::parse_user_row).transpose()
    }

    async fn find_premium_user_by_name(&self, name: &str) -> Result<Option<PremiumUser>, Self::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM premium_users WHERE lower(name) = lower($1) ORDER BY id LIMIT 1",
            USER_COLUMNS
        ))
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::parse_user_row).transpose()
    }

    async fn update_premium_user(
        &self,
        id: PremiumUserId,
        user: NewPremiumUser,
    ) -> Result<Option<PremiumUser>, Self::Error> {
        let row = sqlx::query(&format!(
            "UPDATE premium_users SET name = $2, code = $3, department_id = $4, updated_at = now() \
             WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(id.get())
        .bind(&user.name)
        .bind(user.code.as_str())
        .bind(user.department_id.map(|d| d.get()))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::parse_user_row).transpose()
    }

    async fn set_premium_user_active(
        &self,
        id: PremiumUserId,
        is_active: bool,
    ) -> Result<Option<PremiumUser>, Self::Error> {
        let row = sqlx::query(&format!(
            "UPDATE premium_users SET is_active = $2, updated_at = now() WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(id.get())
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::parse_user_row).transpose()
    }

    async fn delete_premium_user(&self, id: PremiumUserId) -> Result<bool, Self::Error> {
        let result = sqlx::query("DELETE FROM premium_users WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_admin(
        &self,
        username: &str,
        full_name: &str,
        password_hash: &str,
        is_superuser: bool,
    ) -> Result<AdminUser, Self::Error> {
        let row = sqlx::query(&format!(
            "INSERT INTO admin_users (username, full_name, password_hash, is_superuser) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            ADMIN_COLUMNS
        ))
        .bind(username)
        .bind(full_name)
        .bind(password_hash)
        .bind(is_superuser)
        .fetch_one(&self.pool)
        .await?;
        Ok(Self::parse_admin_row(&row)?)
    }

    async fn get_admin(&self, id: AdminId) -> Result<Option<AdminUser>, Self::Error> {
        let row = sqlx::query(&format!("SELECT {} FROM admin_users WHERE id = $1", ADMIN_COLUMNS))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::parse_admin_row).transpose()?)
    }

    async fn find_admin_by_username(&self, username: &str) -> Result<Option<AdminUser>, Self::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM admin_users WHERE username = $1",
            ADMIN_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::parse_admin_row).transpose()?)
    }

    async fn get_refinement(&self, key: &RefinementKey) -> Result<Option<RefinementRecord>, Self::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM topic_refinements WHERE topic_id = $1 AND provider = $2 AND difficulty = $3",
            REFINEMENT_COLUMNS
        ))
        .bind(key.topic_id.get())
        .bind(key.provider.as_str())
        .bind(key.difficulty.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::parse_refinement_row).transpose()
    }

    async fn get_refinement_by_id(&self, id: RefinementId) -> Result<Option<RefinementRecord>, Self::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM topic_refinements WHERE id = $1",
            REFINEMENT_COLUMNS
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::parse_refinement_row).transpose()
    }

    async fn refinements_for_topic(&self, id: TopicId) -> Result<Vec<RefinementRecord>, Self::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM topic_refinements WHERE topic_id = $1 ORDER BY created_at DESC, id DESC",
            REFINEMENT_COLUMNS
        ))
        .bind(id.get())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_refinement_row).collect()
    }

    async fn list_refinements(&self) -> Result<Vec<RefinementRecord>, Self::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM topic_refinements ORDER BY id",
            REFINEMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_refinement_row).collect()
    }

    async fn upsert_refinement(&self, update: RefinementUpdate) -> Result<RefinementRecord, Self::Error> {
        let row = sqlx::query(&format!(
            "INSERT INTO topic_refinements \
                 (topic_id, provider, difficulty, refined_text, status, error_message, \
                  processing_time_secs, item_count, prompt_fingerprint) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (topic_id, provider, difficulty) DO UPDATE SET \
                 refined_text = EXCLUDED.refined_text, \
                 status = EXCLUDED.status, \
                 error_message = EXCLUDED.error_message, \
                 processing_time_secs = EXCLUDED.processing_time_secs, \
                 item_count = EXCLUDED.item_count, \
                 prompt_fingerprint = EXCLUDED.prompt_fingerprint, \
                 updated_at = now() \
             RETURNING {}",
            REFINEMENT_COLUMNS
        ))
        .bind(update.key.topic_id.get())
        .bind(update.key.provider.as_str())
        .bind(update.key.difficulty.as_str())
        .bind(&update.refined_text)
        .bind(update.status.as_str())
        .bind(&update.error_message)
        .bind(update.processing_time_secs)
        .bind(update.item_count as i32)
        .bind(&update.prompt_fingerprint)
        .fetch_one(&self.pool)
        .await?;
        Self::parse_refinement_row(&row)
    }

    async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}
