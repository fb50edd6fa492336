use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Enumerations (stored as TEXT) ---

/// Raised when a TEXT column holds a value outside a closed set.
#[derive(Debug, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Role
///
/// The RBAC field. Admins pass the admin gate and implicitly see every active solution;
/// regular users see only what they were granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    Admin,
    #[default]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(UnknownVariant { kind: "role", value: other.to_string() }),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AccessAction
///
/// The three event kinds recorded in `access_logs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum AccessAction {
    #[default]
    Login,
    Logout,
    AccessSolution,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessAction::Login => "login",
            AccessAction::Logout => "logout",
            AccessAction::AccessSolution => "access_solution",
        }
    }
}

impl FromStr for AccessAction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(AccessAction::Login),
            "logout" => Ok(AccessAction::Logout),
            "access_solution" => Ok(AccessAction::AccessSolution),
            other => Err(UnknownVariant { kind: "access action", value: other.to_string() }),
        }
    }
}

impl TryFrom<String> for AccessAction {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// --- Core Schemas (Mapped to Database) ---

/// UserRecord
///
/// Internal row of the `users` table joined with the municipality name. Carries the
/// password hash and is therefore never serialized; handlers answer with `User` or
/// `UserProfile` instead.
#[derive(Debug, Clone, FromRow, Default)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub municipality_id: Option<Uuid>,
    pub municipality_name: Option<String>,
    pub active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// User
///
/// Public view of a user account (no credentials).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub municipality_id: Option<Uuid>,
    pub municipality_name: Option<String>,
    pub active: bool,
    #[ts(type = "string | null")]
    pub last_login: Option<DateTime<Utc>>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            email: record.email,
            role: record.role,
            municipality_id: record.municipality_id,
            municipality_name: record.municipality_name,
            active: record.active,
            last_login: record.last_login,
            created_at: record.created_at,
        }
    }
}

/// UserSummary
///
/// Row of the admin user listing, augmented with the active grants of each user.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub municipality_id: Option<Uuid>,
    pub municipality_name: Option<String>,
    pub active: bool,
    #[ts(type = "string | null")]
    pub last_login: Option<DateTime<Utc>>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    pub solutions_count: i64,
    pub solution_ids: Vec<Uuid>,
}

/// UserDetail
///
/// A single user with every solution granted to them, active or not.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: User,
    pub solutions: Vec<Solution>,
}

/// UserProfile
///
/// Identity payload returned by login and `/auth/me`. `solutions` lists granted active
/// solutions for regular users and is empty for admins.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub municipality: Option<String>,
    pub municipality_id: Option<Uuid>,
    pub solutions: Vec<Solution>,
}

impl UserProfile {
    pub fn new(record: UserRecord, solutions: Vec<Solution>) -> Self {
        Self {
            id: record.id,
            name: record.name,
            email: record.email,
            role: record.role,
            municipality: record.municipality_name,
            municipality_id: record.municipality_id,
            solutions,
        }
    }
}

/// Municipality
///
/// A tenant. `(lower(name), state)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Municipality {
    pub id: Uuid,
    pub name: String,
    /// Two-letter state code, upper-case.
    pub state: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Municipality listing row with head counts.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct MunicipalityOverview {
    pub id: Uuid,
    pub name: String,
    pub state: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    pub users_count: i64,
    pub regular_users_count: i64,
}

/// Solution
///
/// An educational product that can be granted to users.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Solution {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    /// `#RRGGBB`
    pub color: Option<String>,
    pub active: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Solution listing row with the number of distinct granted users.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct SolutionOverview {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub active: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    pub users_count: i64,
}

/// AccessLog
///
/// One append-only audit row.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct AccessLog {
    pub id: i64,
    pub user_id: Uuid,
    pub solution_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub action: AccessAction,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// ActiveSession
///
/// A tracked interval of presence, opened at login and stretched by later activity.
#[derive(Debug, Clone, FromRow, Default)]
pub struct ActiveSession {
    pub user_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

// --- Repository Inputs ---

/// Validated, normalized input for a new account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub municipality_id: Option<Uuid>,
}

/// Partial account update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
    pub municipality_id: Option<Uuid>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewSolution {
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SolutionChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub active: Option<bool>,
}

/// An access-log row before insertion.
#[derive(Debug, Clone)]
pub struct NewAccessLog {
    pub user_id: Uuid,
    pub solution_id: Option<Uuid>,
    pub action: AccessAction,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

// --- Request Payloads (Input Schemas) ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// RegisterUserRequest
///
/// Admin-only account creation (POST /auth/register). `role` is validated by the handler
/// so that bad values produce a 400 with a readable message.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RegisterUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub municipality_id: Option<Uuid>,
}

/// UpdateUserRequest
///
/// Partial update payload (PUT /users/{id}).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub municipality_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

/// Replacement grant set (PUT /users/{id}/solutions).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ReplaceGrantsRequest {
    pub solution_ids: Vec<Uuid>,
}

/// Self-service password change (PUT /auth/password).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateMunicipalityRequest {
    pub name: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateMunicipalityRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateSolutionRequest {
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateSolutionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

// --- Responses ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct MeResponse {
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Liveness payload of GET /health.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserMutationResponse {
    pub message: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct MunicipalityMutationResponse {
    pub message: String,
    pub municipality: Municipality,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct SolutionMutationResponse {
    pub message: String,
    pub solution: Solution,
}

// --- Dashboard Schemas (Output) ---

/// DashboardStats
///
/// Output of GET /dashboard/stats.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DashboardStats {
    pub total_users: i64,
    pub active_today: i64,
    pub total_access: i64,
    /// "Xh Ymin" or "Ymin".
    pub average_time: String,
}

/// Accesses that fell on one weekday during the lookback window.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct WeeklyBucket {
    pub day: String,
    pub value: i64,
}

/// Distinct granted users of one active solution.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct SolutionUsage {
    pub name: String,
    pub users: i64,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ChartsData {
    pub weekly: Vec<WeeklyBucket>,
    pub solutions: Vec<SolutionUsage>,
}

/// Presence derived from the age of a user's last access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum PresenceStatus {
    Online,
    Idle,
    #[default]
    Offline,
}

/// OnlineUser
///
/// Row of GET /dashboard/online-users.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct OnlineUser {
    pub id: Uuid,
    pub user: String,
    pub email: String,
    pub municipality: Option<String>,
    pub status: PresenceStatus,
    pub last_access: String,
    pub time_online: String,
    pub solutions: Vec<String>,
}

/// ActivityItem
///
/// Row of GET /dashboard/recent-activities. `user` and `target` are the structured
/// fields; `description` keeps the legacy emphasized sentence with escaped names.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ActivityItem {
    pub id: i64,
    #[serde(rename = "type")]
    pub activity_type: AccessAction,
    pub user: String,
    pub target: Option<String>,
    pub description: String,
    pub time: String,
    pub icon: String,
    pub icon_bg: String,
    pub icon_color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RecentAccess {
    pub solution_name: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    pub time_ago: String,
}

/// UserDashboard
///
/// Output of GET /dashboard/user-dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserDashboard {
    pub solutions: Vec<Solution>,
    #[serde(rename = "recentAccess")]
    pub recent_access: Vec<RecentAccess>,
}

// --- Aggregation Rows (Internal Use) ---

/// Raw presence facts for one non-admin user, before status and wording are derived.
#[derive(Debug, Clone, FromRow, Default)]
pub struct PresenceRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub municipality: Option<String>,
    pub last_access: DateTime<Utc>,
    /// Earliest session started today, if any.
    pub session_started: Option<DateTime<Utc>>,
    pub solutions: Vec<String>,
}

/// An access-log row joined with user and solution names.
#[derive(Debug, Clone, FromRow, Default)]
pub struct ActivityRow {
    pub id: i64,
    #[sqlx(try_from = "String")]
    pub action: AccessAction,
    pub user_name: String,
    pub solution_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Access-log rows on one UTC weekday, `0` being Sunday.
#[derive(Debug, Clone, Copy, FromRow, Default, PartialEq, Eq)]
pub struct WeekdayCount {
    pub weekday: i32,
    pub count: i64,
}

#[derive(Debug, Clone, FromRow, Default)]
pub struct RecentAccessRow {
    pub solution_name: String,
    pub created_at: DateTime<Utc>,
}

// --- Input Normalization ---

/// Lower-cases and trims an email address.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Minimal structural email check: one `@`, non-empty local part, dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.contains(char::is_whitespace)
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
}

/// `#RRGGBB`, case-insensitive.
pub fn is_hex_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Two ASCII letters, returned upper-cased.
pub fn normalize_state(raw: &str) -> Option<String> {
    let state = raw.trim();
    (state.len() == 2 && state.chars().all(|c| c.is_ascii_alphabetic()))
        .then(|| state.to_ascii_uppercase())
}
