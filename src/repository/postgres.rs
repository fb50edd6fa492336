use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, query_builder::QueryBuilder};
use uuid::Uuid;

use super::{
    INVALID_GRANT_MESSAGE, MUNICIPALITY_IN_USE_MESSAGE, Repository, SOLUTION_IN_USE_MESSAGE,
    USER_HAS_HISTORY_MESSAGE,
};
use crate::{
    error::AppError,
    models::{
        AccessLog, ActiveSession, ActivityRow, Municipality, MunicipalityOverview, NewAccessLog,
        NewSolution, NewUser, PresenceRow, RecentAccessRow, Solution, SolutionChanges,
        SolutionOverview, SolutionUsage, UserChanges, UserRecord, UserSummary, WeekdayCount,
    },
};

const USER_COLUMNS: &str = r#"
    SELECT u.id, u.name, u.email, u.password_hash, u.role, u.municipality_id,
           m.name AS municipality_name, u.active, u.last_login, u.created_at
    FROM users u
    LEFT JOIN municipalities m ON m.id = u.municipality_id
"#;

const SOLUTION_COLUMNS: &str = "id, name, description, icon, color, active, created_at";

const DUPLICATE_EMAIL: &str = "Este email já está cadastrado";
const DUPLICATE_MUNICIPALITY: &str = "Este município já está cadastrado";
const DUPLICATE_SOLUTION: &str = "Esta solução já está cadastrada";

/// Maps a unique-constraint violation to `Conflict`, everything else to `Storage`.
fn unique_as_conflict(message: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |err| match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(message.to_string())
        }
        _ => AppError::Storage(err),
    }
}

/// Maps a foreign-key violation (a RESTRICT delete with dependents) to `Conflict`.
fn restrict_as_conflict(message: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |err| match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            AppError::Conflict(message.to_string())
        }
        _ => AppError::Storage(err),
    }
}

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
/// Queries are runtime-checked (`sqlx::query_as::<_, T>`) and dynamic filters or partial
/// updates go through `QueryBuilder` so every value stays a bound parameter.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserRecord>, AppError> {
        let sql = format!("{USER_COLUMNS} WHERE u.id = $1");
        let user = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError> {
        let sql = format!("{USER_COLUMNS} WHERE u.email = $1");
        let user = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn email_in_use(&self, email: &str, except: Option<Uuid>) -> Result<bool, AppError> {
        let taken = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 AND ($2::uuid IS NULL OR id <> $2))",
        )
        .bind(email)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }

    /// list_users
    ///
    /// Admin listing. The optional filters are appended with `QueryBuilder`; the search
    /// pattern is bound, never interpolated.
    async fn list_users(
        &self,
        municipality_id: Option<Uuid>,
        search: Option<String>,
    ) -> Result<Vec<UserSummary>, AppError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT u.id, u.name, u.email, u.role, u.municipality_id,
                   m.name AS municipality_name, u.active, u.last_login, u.created_at,
                   COUNT(DISTINCT s.id) AS solutions_count,
                   COALESCE(array_agg(DISTINCT s.id) FILTER (WHERE s.id IS NOT NULL), '{}') AS solution_ids
            FROM users u
            LEFT JOIN municipalities m ON m.id = u.municipality_id
            LEFT JOIN user_solutions us ON us.user_id = u.id
            LEFT JOIN solutions s ON s.id = us.solution_id AND s.active = true
            WHERE 1=1
            "#,
        );

        if let Some(municipality_id) = municipality_id {
            builder.push(" AND u.municipality_id = ");
            builder.push_bind(municipality_id);
        }

        if let Some(search) = search {
            let pattern = format!("%{}%", search);
            builder.push(" AND (u.name ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR u.email ILIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }

        builder.push(" GROUP BY u.id, m.name ORDER BY u.created_at DESC");

        let users = builder
            .build_query_as::<UserSummary>()
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord, AppError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO users (id, name, email, password_hash, role, municipality_id)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id"#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.municipality_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unique_as_conflict(DUPLICATE_EMAIL))?;

        self.find_user(id)
            .await?
            .ok_or_else(|| AppError::Internal("created user vanished".to_string()))
    }

    /// update_user
    ///
    /// Builds `SET` clauses only for the provided fields. With nothing to change it
    /// degrades to a plain lookup. A promotion to admin clears the user's grants in the
    /// same transaction.
    async fn update_user(
        &self,
        id: Uuid,
        changes: UserChanges,
    ) -> Result<Option<UserRecord>, AppError> {
        let promoted = changes.role.is_some_and(|role| role.is_admin());
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE users SET ");
        let mut touched = false;
        {
            let mut set = builder.separated(", ");
            if let Some(name) = changes.name {
                set.push("name = ").push_bind_unseparated(name);
                touched = true;
            }
            if let Some(email) = changes.email {
                set.push("email = ").push_bind_unseparated(email);
                touched = true;
            }
            if let Some(hash) = changes.password_hash {
                set.push("password_hash = ").push_bind_unseparated(hash);
                touched = true;
            }
            if let Some(role) = changes.role {
                set.push("role = ").push_bind_unseparated(role.as_str());
                touched = true;
            }
            if let Some(municipality_id) = changes.municipality_id {
                set.push("municipality_id = ").push_bind_unseparated(municipality_id);
                touched = true;
            }
            if let Some(active) = changes.active {
                set.push("active = ").push_bind_unseparated(active);
                touched = true;
            }
        }

        if !touched {
            return self.find_user(id).await;
        }

        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder.push(" RETURNING id");

        let mut tx = self.pool.begin().await?;

        let updated = builder
            .build_query_scalar::<Uuid>()
            .fetch_optional(&mut *tx)
            .await
            .map_err(unique_as_conflict(DUPLICATE_EMAIL))?;

        let Some(id) = updated else {
            return Ok(None);
        };

        // Admins reach every solution implicitly and never hold grant rows.
        if promoted {
            sqlx::query("DELETE FROM user_solutions WHERE user_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        self.find_user(id).await
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_user_access_logs(&self, id: Uuid) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM access_logs WHERE user_id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(restrict_as_conflict(USER_HAS_HISTORY_MESSAGE))?;
        Ok(result.rows_affected() > 0)
    }

    async fn granted_solutions(
        &self,
        user_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<Solution>, AppError> {
        let solutions = sqlx::query_as::<_, Solution>(
            r#"SELECT s.id, s.name, s.description, s.icon, s.color, s.active, s.created_at
               FROM solutions s
               JOIN user_solutions us ON us.solution_id = s.id
               WHERE us.user_id = $1 AND (NOT $2 OR s.active = true)
               ORDER BY s.name"#,
        )
        .bind(user_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(solutions)
    }

    async fn has_grant(&self, user_id: Uuid, solution_id: Uuid) -> Result<bool, AppError> {
        let granted = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM user_solutions WHERE user_id = $1 AND solution_id = $2)",
        )
        .bind(user_id)
        .bind(solution_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(granted)
    }

    /// replace_grants
    ///
    /// Delete-then-insert inside one transaction. Any failed insert returns early, which
    /// drops `tx` uncommitted and rolls the delete back.
    async fn replace_grants(&self, user_id: Uuid, solution_ids: &[Uuid]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM user_solutions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for solution_id in solution_ids {
            sqlx::query(
                "INSERT INTO user_solutions (user_id, solution_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(user_id)
            .bind(solution_id)
            .execute(&mut *tx)
            .await
            .map_err(|err| match &err {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    AppError::Validation(INVALID_GRANT_MESSAGE.to_string())
                }
                _ => AppError::Storage(err),
            })?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_municipalities(
        &self,
        search: Option<String>,
    ) -> Result<Vec<MunicipalityOverview>, AppError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT m.id, m.name, m.state, m.created_at,
                   COUNT(DISTINCT u.id) AS users_count,
                   COUNT(DISTINCT CASE WHEN u.role <> 'admin' THEN u.id END) AS regular_users_count
            FROM municipalities m
            LEFT JOIN users u ON u.municipality_id = m.id
            WHERE 1=1
            "#,
        );

        if let Some(search) = search {
            let pattern = format!("%{}%", search);
            builder.push(" AND (m.name ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR m.state ILIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }

        builder.push(" GROUP BY m.id ORDER BY m.name");

        let rows = builder
            .build_query_as::<MunicipalityOverview>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn find_municipality(&self, id: Uuid) -> Result<Option<MunicipalityOverview>, AppError> {
        let row = sqlx::query_as::<_, MunicipalityOverview>(
            r#"SELECT m.id, m.name, m.state, m.created_at,
                      COUNT(DISTINCT u.id) AS users_count,
                      COUNT(DISTINCT CASE WHEN u.role <> 'admin' THEN u.id END) AS regular_users_count
               FROM municipalities m
               LEFT JOIN users u ON u.municipality_id = m.id
               WHERE m.id = $1
               GROUP BY m.id"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn municipality_exists(
        &self,
        name: &str,
        state: &str,
        except: Option<Uuid>,
    ) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(
                   SELECT 1 FROM municipalities
                   WHERE LOWER(name) = LOWER($1) AND state = $2 AND ($3::uuid IS NULL OR id <> $3)
               )"#,
        )
        .bind(name)
        .bind(state)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create_municipality(&self, name: &str, state: &str) -> Result<Municipality, AppError> {
        let municipality = sqlx::query_as::<_, Municipality>(
            "INSERT INTO municipalities (id, name, state) VALUES ($1, $2, $3) RETURNING id, name, state, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(state)
        .fetch_one(&self.pool)
        .await
        .map_err(unique_as_conflict(DUPLICATE_MUNICIPALITY))?;
        Ok(municipality)
    }

    async fn update_municipality(
        &self,
        id: Uuid,
        name: Option<String>,
        state: Option<String>,
    ) -> Result<Option<Municipality>, AppError> {
        if name.is_none() && state.is_none() {
            let current = sqlx::query_as::<_, Municipality>(
                "SELECT id, name, state, created_at FROM municipalities WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            return Ok(current);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE municipalities SET ");
        {
            let mut set = builder.separated(", ");
            if let Some(name) = name {
                set.push("name = ").push_bind_unseparated(name);
            }
            if let Some(state) = state {
                set.push("state = ").push_bind_unseparated(state);
            }
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder.push(" RETURNING id, name, state, created_at");

        let municipality = builder
            .build_query_as::<Municipality>()
            .fetch_optional(&self.pool)
            .await
            .map_err(unique_as_conflict(DUPLICATE_MUNICIPALITY))?;
        Ok(municipality)
    }

    async fn count_municipality_users(&self, id: Uuid) -> Result<i64, AppError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE municipality_id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn delete_municipality(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM municipalities WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(restrict_as_conflict(MUNICIPALITY_IN_USE_MESSAGE))?;
        Ok(result.rows_affected() > 0)
    }

    /// list_solutions
    ///
    /// Admin view (`granted_to = None`) lists everything; a regular user only sees the
    /// active solutions granted to them. `users_count` always counts every grantee.
    async fn list_solutions(
        &self,
        granted_to: Option<Uuid>,
    ) -> Result<Vec<SolutionOverview>, AppError> {
        let rows = match granted_to {
            None => {
                sqlx::query_as::<_, SolutionOverview>(
                    r#"SELECT s.id, s.name, s.description, s.icon, s.color, s.active, s.created_at,
                              COUNT(DISTINCT us.user_id) AS users_count
                       FROM solutions s
                       LEFT JOIN user_solutions us ON us.solution_id = s.id
                       GROUP BY s.id
                       ORDER BY s.name"#,
                )
                .fetch_all(&self.pool)
                .await?
            }
            Some(user_id) => {
                sqlx::query_as::<_, SolutionOverview>(
                    r#"SELECT s.id, s.name, s.description, s.icon, s.color, s.active, s.created_at,
                              COUNT(DISTINCT us2.user_id) AS users_count
                       FROM solutions s
                       JOIN user_solutions us ON us.solution_id = s.id
                       LEFT JOIN user_solutions us2 ON us2.solution_id = s.id
                       WHERE us.user_id = $1 AND s.active = true
                       GROUP BY s.id
                       ORDER BY s.name"#,
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn find_solution(&self, id: Uuid) -> Result<Option<SolutionOverview>, AppError> {
        let row = sqlx::query_as::<_, SolutionOverview>(
            r#"SELECT s.id, s.name, s.description, s.icon, s.color, s.active, s.created_at,
                      COUNT(DISTINCT us.user_id) AS users_count
               FROM solutions s
               LEFT JOIN user_solutions us ON us.solution_id = s.id
               WHERE s.id = $1
               GROUP BY s.id"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn solution_name_taken(
        &self,
        name: &str,
        except: Option<Uuid>,
    ) -> Result<bool, AppError> {
        let taken = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM solutions WHERE LOWER(name) = LOWER($1) AND ($2::uuid IS NULL OR id <> $2))",
        )
        .bind(name)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }

    async fn create_solution(&self, solution: NewSolution) -> Result<Solution, AppError> {
        let sql = format!(
            "INSERT INTO solutions (id, name, description, icon, color) VALUES ($1, $2, $3, $4, $5) RETURNING {SOLUTION_COLUMNS}"
        );
        let created = sqlx::query_as::<_, Solution>(&sql)
            .bind(Uuid::new_v4())
            .bind(solution.name)
            .bind(solution.description)
            .bind(solution.icon)
            .bind(solution.color)
            .fetch_one(&self.pool)
            .await
            .map_err(unique_as_conflict(DUPLICATE_SOLUTION))?;
        Ok(created)
    }

    async fn update_solution(
        &self,
        id: Uuid,
        changes: SolutionChanges,
    ) -> Result<Option<Solution>, AppError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE solutions SET ");
        let mut touched = false;
        {
            let mut set = builder.separated(", ");
            if let Some(name) = changes.name {
                set.push("name = ").push_bind_unseparated(name);
                touched = true;
            }
            if let Some(description) = changes.description {
                set.push("description = ").push_bind_unseparated(description);
                touched = true;
            }
            if let Some(icon) = changes.icon {
                set.push("icon = ").push_bind_unseparated(icon);
                touched = true;
            }
            if let Some(color) = changes.color {
                set.push("color = ").push_bind_unseparated(color);
                touched = true;
            }
            if let Some(active) = changes.active {
                set.push("active = ").push_bind_unseparated(active);
                touched = true;
            }
        }

        if !touched {
            let sql = format!("SELECT {SOLUTION_COLUMNS} FROM solutions WHERE id = $1");
            let current = sqlx::query_as::<_, Solution>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            return Ok(current);
        }

        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder.push(" RETURNING ");
        builder.push(SOLUTION_COLUMNS);

        let solution = builder
            .build_query_as::<Solution>()
            .fetch_optional(&self.pool)
            .await
            .map_err(unique_as_conflict(DUPLICATE_SOLUTION))?;
        Ok(solution)
    }

    async fn count_solution_grants(&self, id: Uuid) -> Result<i64, AppError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM user_solutions WHERE solution_id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn delete_solution(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM solutions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(restrict_as_conflict(SOLUTION_IN_USE_MESSAGE))?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_access_log(&self, entry: NewAccessLog) -> Result<AccessLog, AppError> {
        let log = sqlx::query_as::<_, AccessLog>(
            r#"INSERT INTO access_logs (user_id, solution_id, action, ip_address, user_agent, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id, user_id, solution_id, action, ip_address, user_agent, created_at"#,
        )
        .bind(entry.user_id)
        .bind(entry.solution_id)
        .bind(entry.action.as_str())
        .bind(entry.ip_address)
        .bind(entry.user_agent)
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(log)
    }

    async fn open_session(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO active_sessions (user_id, started_at, last_activity) VALUES ($1, $2, $2)",
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_session(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"UPDATE active_sessions SET last_activity = $2
               WHERE id = (
                   SELECT id FROM active_sessions WHERE user_id = $1
                   ORDER BY started_at DESC LIMIT 1
               ) AND last_activity < $2"#,
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_regular_users(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE role <> 'admin'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_active_users_since(&self, since: DateTime<Utc>) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT user_id) FROM access_logs WHERE created_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_access_logs(&self, since: Option<DateTime<Utc>>) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM access_logs WHERE ($1::timestamptz IS NULL OR created_at >= $1)",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn sessions_started_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ActiveSession>, AppError> {
        let sessions = sqlx::query_as::<_, ActiveSession>(
            "SELECT user_id, started_at, last_activity FROM active_sessions WHERE started_at >= $1",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn weekly_access_counts(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<WeekdayCount>, AppError> {
        let counts = sqlx::query_as::<_, WeekdayCount>(
            r#"SELECT EXTRACT(DOW FROM created_at AT TIME ZONE 'UTC')::INT AS weekday,
                      COUNT(*) AS count
               FROM access_logs
               WHERE created_at >= $1 AND created_at < $2
               GROUP BY weekday"#,
        )
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }

    async fn solution_usage(&self) -> Result<Vec<SolutionUsage>, AppError> {
        let usage = sqlx::query_as::<_, SolutionUsage>(
            r#"SELECT s.name, COUNT(DISTINCT us.user_id) AS users, s.color
               FROM solutions s
               LEFT JOIN user_solutions us ON us.solution_id = s.id
               WHERE s.active = true
               GROUP BY s.id, s.name, s.color
               ORDER BY users DESC, s.name"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(usage)
    }

    /// presence_rows
    ///
    /// One row per non-admin user seen since `access_since`, with their earliest session
    /// of the day and the names of their active grants. Status and wording are derived
    /// by the dashboard aggregator, not in SQL.
    async fn presence_rows(
        &self,
        access_since: DateTime<Utc>,
        session_since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PresenceRow>, AppError> {
        let rows = sqlx::query_as::<_, PresenceRow>(
            r#"
            SELECT u.id, u.name, u.email, m.name AS municipality,
                   al.last_access, ss.session_started,
                   COALESCE(array_agg(DISTINCT s.name) FILTER (WHERE s.name IS NOT NULL), '{}') AS solutions
            FROM users u
            JOIN (
                SELECT user_id, MAX(created_at) AS last_access
                FROM access_logs
                WHERE created_at >= $1
                GROUP BY user_id
            ) al ON al.user_id = u.id
            LEFT JOIN municipalities m ON m.id = u.municipality_id
            LEFT JOIN (
                SELECT user_id, MIN(started_at) AS session_started
                FROM active_sessions
                WHERE started_at >= $2
                GROUP BY user_id
            ) ss ON ss.user_id = u.id
            LEFT JOIN user_solutions us ON us.user_id = u.id
            LEFT JOIN solutions s ON s.id = us.solution_id AND s.active = true
            WHERE u.role <> 'admin'
            GROUP BY u.id, u.name, u.email, m.name, al.last_access, ss.session_started
            ORDER BY al.last_access DESC
            LIMIT $3
            "#,
        )
        .bind(access_since)
        .bind(session_since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn activity_rows(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ActivityRow>, AppError> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            r#"SELECT al.id, al.action, u.name AS user_name, s.name AS solution_name, al.created_at
               FROM access_logs al
               JOIN users u ON u.id = al.user_id
               LEFT JOIN solutions s ON s.id = al.solution_id
               WHERE al.created_at >= $1
               ORDER BY al.created_at DESC, al.id DESC
               LIMIT $2"#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn recent_solution_access(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RecentAccessRow>, AppError> {
        let rows = sqlx::query_as::<_, RecentAccessRow>(
            r#"SELECT s.name AS solution_name, al.created_at
               FROM access_logs al
               JOIN solutions s ON s.id = al.solution_id
               WHERE al.user_id = $1 AND al.action = 'access_solution'
               ORDER BY al.created_at DESC, al.id DESC
               LIMIT $2"#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
