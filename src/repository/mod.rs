use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        AccessLog, ActiveSession, ActivityRow, Municipality, MunicipalityOverview, NewAccessLog,
        NewSolution, NewUser, PresenceRow, RecentAccessRow, Solution, SolutionChanges,
        SolutionOverview, SolutionUsage, UserChanges, UserRecord, UserSummary, WeekdayCount,
    },
};

pub mod postgres;

pub use postgres::PostgresRepository;

/// Message used when a grant-set replacement references an unknown solution.
pub const INVALID_GRANT_MESSAGE: &str = "Solução inválida na lista";

pub const USER_HAS_HISTORY_MESSAGE: &str =
    "Não é possível excluir este usuário pois há registros de acesso vinculados a ele. Desative a conta.";
pub const MUNICIPALITY_IN_USE_MESSAGE: &str =
    "Não é possível excluir este município pois há usuários vinculados a ele";
pub const SOLUTION_IN_USE_MESSAGE: &str =
    "Não é possível excluir esta solução pois há usuários vinculados a ela";

/// Repository Trait
///
/// The abstract contract for every persistence operation. Handlers and the dashboard
/// aggregator only see this trait, so the Postgres implementation can be swapped for the
/// in-memory double in tests.
///
/// All methods surface storage failures as `AppError::Storage`. Deletes blocked by
/// dependent rows fail with `Conflict` and leave everything in place. The access log is
/// append-only: there is deliberately no method that updates or deletes log rows.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Credential Store ---
    async fn find_user(&self, id: Uuid) -> Result<Option<UserRecord>, AppError>;
    // `email` must already be normalized.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError>;
    async fn email_in_use(&self, email: &str, except: Option<Uuid>) -> Result<bool, AppError>;
    // Newest first; `search` matches name or email case-insensitively.
    async fn list_users(
        &self,
        municipality_id: Option<Uuid>,
        search: Option<String>,
    ) -> Result<Vec<UserSummary>, AppError>;
    // Fails with `Conflict` when the email is taken.
    async fn create_user(&self, user: NewUser) -> Result<UserRecord, AppError>;
    // Partial update; `None` when the user does not exist. Promoting to admin also drops
    // every grant of the user in the same write.
    async fn update_user(&self, id: Uuid, changes: UserChanges)
    -> Result<Option<UserRecord>, AppError>;
    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError>;
    async fn count_user_access_logs(&self, id: Uuid) -> Result<i64, AppError>;
    // Returns true if a row was deleted. Grants and sessions go with it; access history
    // blocks the delete.
    async fn delete_user(&self, id: Uuid) -> Result<bool, AppError>;

    // --- Grants ---
    // Ordered by solution name.
    async fn granted_solutions(&self, user_id: Uuid, active_only: bool)
    -> Result<Vec<Solution>, AppError>;
    async fn has_grant(&self, user_id: Uuid, solution_id: Uuid) -> Result<bool, AppError>;
    /// Replaces the user's grant set atomically: either every id is granted or the prior
    /// set is left untouched. Unknown solution ids fail with `Validation`.
    async fn replace_grants(&self, user_id: Uuid, solution_ids: &[Uuid]) -> Result<(), AppError>;

    // --- Municipalities ---
    async fn list_municipalities(
        &self,
        search: Option<String>,
    ) -> Result<Vec<MunicipalityOverview>, AppError>;
    async fn find_municipality(&self, id: Uuid) -> Result<Option<MunicipalityOverview>, AppError>;
    // Case-insensitive on name; `state` must already be upper-case.
    async fn municipality_exists(
        &self,
        name: &str,
        state: &str,
        except: Option<Uuid>,
    ) -> Result<bool, AppError>;
    async fn create_municipality(&self, name: &str, state: &str)
    -> Result<Municipality, AppError>;
    async fn update_municipality(
        &self,
        id: Uuid,
        name: Option<String>,
        state: Option<String>,
    ) -> Result<Option<Municipality>, AppError>;
    async fn count_municipality_users(&self, id: Uuid) -> Result<i64, AppError>;
    async fn delete_municipality(&self, id: Uuid) -> Result<bool, AppError>;

    // --- Solutions ---
    /// `granted_to = None` lists every solution; `Some(user)` lists that user's active grants.
    async fn list_solutions(
        &self,
        granted_to: Option<Uuid>,
    ) -> Result<Vec<SolutionOverview>, AppError>;
    async fn find_solution(&self, id: Uuid) -> Result<Option<SolutionOverview>, AppError>;
    async fn solution_name_taken(&self, name: &str, except: Option<Uuid>)
    -> Result<bool, AppError>;
    async fn create_solution(&self, solution: NewSolution) -> Result<Solution, AppError>;
    async fn update_solution(
        &self,
        id: Uuid,
        changes: SolutionChanges,
    ) -> Result<Option<Solution>, AppError>;
    async fn count_solution_grants(&self, id: Uuid) -> Result<i64, AppError>;
    async fn delete_solution(&self, id: Uuid) -> Result<bool, AppError>;

    // --- Access Log & Sessions ---
    async fn append_access_log(&self, entry: NewAccessLog) -> Result<AccessLog, AppError>;
    async fn open_session(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError>;
    // Moves `last_activity` of the user's most recent session; no-op without one.
    async fn touch_session(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError>;

    // --- Dashboard Reads ---
    async fn count_regular_users(&self) -> Result<i64, AppError>;
    async fn count_active_users_since(&self, since: DateTime<Utc>) -> Result<i64, AppError>;
    // `None` counts every row ever written.
    async fn count_access_logs(&self, since: Option<DateTime<Utc>>) -> Result<i64, AppError>;
    async fn sessions_started_since(&self, since: DateTime<Utc>)
    -> Result<Vec<ActiveSession>, AppError>;
    /// Log rows in `[from, until)` grouped by UTC weekday (0 = Sunday). Weekdays without
    /// rows are absent.
    async fn weekly_access_counts(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<WeekdayCount>, AppError>;
    // Active solutions only, most used first.
    async fn solution_usage(&self) -> Result<Vec<SolutionUsage>, AppError>;
    /// Non-admin users whose last access is at or after `access_since`, most recent first.
    async fn presence_rows(
        &self,
        access_since: DateTime<Utc>,
        session_since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PresenceRow>, AppError>;
    async fn activity_rows(&self, since: DateTime<Utc>, limit: i64)
    -> Result<Vec<ActivityRow>, AppError>;
    async fn recent_solution_access(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RecentAccessRow>, AppError>;
}

/// RepositoryState
///
/// The injected store handle shared through `AppState`.
pub type RepositoryState = Arc<dyn Repository>;
