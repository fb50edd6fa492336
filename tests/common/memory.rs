use std::{
    collections::BTreeSet,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

use hub_maximiza::{
    AppError,
    models::{
        AccessAction, AccessLog, ActiveSession, ActivityRow, Municipality, MunicipalityOverview,
        NewAccessLog, NewSolution, NewUser, PresenceRow, RecentAccessRow, Role, Solution,
        SolutionChanges, SolutionOverview, SolutionUsage, UserChanges, UserRecord, UserSummary,
        WeekdayCount,
    },
    repository::{
        INVALID_GRANT_MESSAGE, MUNICIPALITY_IN_USE_MESSAGE, Repository, SOLUTION_IN_USE_MESSAGE,
        USER_HAS_HISTORY_MESSAGE,
    },
};

#[derive(Default, Clone)]
struct Store {
    municipalities: Vec<Municipality>,
    solutions: Vec<Solution>,
    // `municipality_name` is resolved on read, never stored.
    users: Vec<UserRecord>,
    grants: BTreeSet<(Uuid, Uuid)>,
    access_logs: Vec<AccessLog>,
    sessions: Vec<(i64, ActiveSession)>,
    next_log_id: i64,
    next_session_id: i64,
}

impl Store {
    fn resolve(&self, user: &UserRecord) -> UserRecord {
        let mut user = user.clone();
        user.municipality_name = user
            .municipality_id
            .and_then(|id| self.municipalities.iter().find(|m| m.id == id))
            .map(|m| m.name.clone());
        user
    }

    fn user(&self, id: Uuid) -> Option<UserRecord> {
        self.users.iter().find(|u| u.id == id).map(|u| self.resolve(u))
    }

    fn solution_users(&self, solution_id: Uuid) -> i64 {
        self.grants.iter().filter(|(_, s)| *s == solution_id).count() as i64
    }

    fn overview(&self, solution: &Solution) -> SolutionOverview {
        SolutionOverview {
            id: solution.id,
            name: solution.name.clone(),
            description: solution.description.clone(),
            icon: solution.icon.clone(),
            color: solution.color.clone(),
            active: solution.active,
            created_at: solution.created_at,
            users_count: self.solution_users(solution.id),
        }
    }

    fn municipality_overview(&self, municipality: &Municipality) -> MunicipalityOverview {
        let members = self
            .users
            .iter()
            .filter(|u| u.municipality_id == Some(municipality.id));
        let (total, regular) = members.fold((0, 0), |(total, regular), u| {
            (total + 1, regular + i64::from(!u.role.is_admin()))
        });
        MunicipalityOverview {
            id: municipality.id,
            name: municipality.name.clone(),
            state: municipality.state.clone(),
            created_at: municipality.created_at,
            users_count: total,
            regular_users_count: regular,
        }
    }

    fn solution(&self, id: Uuid) -> Option<&Solution> {
        self.solutions.iter().find(|s| s.id == id)
    }

    fn granted(&self, user_id: Uuid, active_only: bool) -> Vec<Solution> {
        let mut solutions: Vec<Solution> = self
            .grants
            .iter()
            .filter(|(u, _)| *u == user_id)
            .filter_map(|(_, s)| self.solution(*s))
            .filter(|s| !active_only || s.active)
            .cloned()
            .collect();
        solutions.sort_by(|a, b| a.name.cmp(&b.name));
        solutions
    }

    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.users
            .iter()
            .any(|u| u.email == email && Some(u.id) != except)
    }

    fn municipality_taken(&self, name: &str, state: &str, except: Option<Uuid>) -> bool {
        let name = name.to_lowercase();
        self.municipalities.iter().any(|m| {
            m.name.to_lowercase() == name && m.state == state && Some(m.id) != except
        })
    }

    fn solution_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        let name = name.to_lowercase();
        self.solutions
            .iter()
            .any(|s| s.name.to_lowercase() == name && Some(s.id) != except)
    }
}

fn matches(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// InMemoryRepository
///
/// A `Repository` held entirely in process memory. Mirrors the Postgres implementation
/// closely enough (uniqueness, cascades, ordering, grant rollback) to back handler and
/// router tests without a database.
#[derive(Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means another test thread panicked; the data is still usable.
    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserRecord>, AppError> {
        Ok(self.store().user(id))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError> {
        let store = self.store();
        Ok(store
            .users
            .iter()
            .find(|u| u.email == email)
            .map(|u| store.resolve(u)))
    }

    async fn email_in_use(&self, email: &str, except: Option<Uuid>) -> Result<bool, AppError> {
        Ok(self.store().email_taken(email, except))
    }

    async fn list_users(
        &self,
        municipality_id: Option<Uuid>,
        search: Option<String>,
    ) -> Result<Vec<UserSummary>, AppError> {
        let store = self.store();
        let mut rows: Vec<UserSummary> = store
            .users
            .iter()
            .rev()
            .filter(|u| municipality_id.is_none() || u.municipality_id == municipality_id)
            .filter(|u| {
                search
                    .as_deref()
                    .is_none_or(|term| matches(&u.name, term) || matches(&u.email, term))
            })
            .map(|u| {
                let user = store.resolve(u);
                let solution_ids: Vec<Uuid> =
                    store.granted(u.id, true).into_iter().map(|s| s.id).collect();
                UserSummary {
                    id: user.id,
                    name: user.name,
                    email: user.email,
                    role: user.role,
                    municipality_id: user.municipality_id,
                    municipality_name: user.municipality_name,
                    active: user.active,
                    last_login: user.last_login,
                    created_at: user.created_at,
                    solutions_count: solution_ids.len() as i64,
                    solution_ids,
                }
            })
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord, AppError> {
        let mut store = self.store();
        if store.email_taken(&user.email, None) {
            return Err(AppError::Conflict("Este email já está cadastrado".to_string()));
        }
        let record = UserRecord {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            municipality_id: user.municipality_id,
            municipality_name: None,
            active: true,
            last_login: None,
            created_at: Utc::now(),
        };
        store.users.push(record.clone());
        Ok(store.resolve(&record))
    }

    async fn update_user(
        &self,
        id: Uuid,
        changes: UserChanges,
    ) -> Result<Option<UserRecord>, AppError> {
        let mut store = self.store();
        if let Some(email) = changes.email.as_deref() {
            if store.email_taken(email, Some(id)) {
                return Err(AppError::Conflict("Este email já está cadastrado".to_string()));
            }
        }
        let Some(user) = store.users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            user.name = name;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        if let Some(role) = changes.role {
            user.role = role;
        }
        let promoted = changes.role.is_some_and(|role| role.is_admin());
        if let Some(municipality_id) = changes.municipality_id {
            user.municipality_id = Some(municipality_id);
        }
        if let Some(active) = changes.active {
            user.active = active;
        }
        if promoted {
            store.grants.retain(|(u, _)| *u != id);
        }
        Ok(store.user(id))
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        if let Some(user) = self.store().users.iter_mut().find(|u| u.id == id) {
            user.last_login = Some(at);
        }
        Ok(())
    }

    async fn count_user_access_logs(&self, id: Uuid) -> Result<i64, AppError> {
        Ok(self
            .store()
            .access_logs
            .iter()
            .filter(|l| l.user_id == id)
            .count() as i64)
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, AppError> {
        let mut store = self.store();
        if store.access_logs.iter().any(|l| l.user_id == id) {
            return Err(AppError::Conflict(USER_HAS_HISTORY_MESSAGE.to_string()));
        }
        let before = store.users.len();
        store.users.retain(|u| u.id != id);
        if store.users.len() == before {
            return Ok(false);
        }
        store.grants.retain(|(u, _)| *u != id);
        store.sessions.retain(|(_, s)| s.user_id != id);
        Ok(true)
    }

    async fn granted_solutions(
        &self,
        user_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<Solution>, AppError> {
        Ok(self.store().granted(user_id, active_only))
    }

    async fn has_grant(&self, user_id: Uuid, solution_id: Uuid) -> Result<bool, AppError> {
        Ok(self.store().grants.contains(&(user_id, solution_id)))
    }

    /// Builds the replacement on a copy and swaps it in only when every id resolves,
    /// matching the all-or-nothing transaction of the SQL implementation.
    async fn replace_grants(&self, user_id: Uuid, solution_ids: &[Uuid]) -> Result<(), AppError> {
        let mut store = self.store();
        let mut grants = store.grants.clone();
        grants.retain(|(u, _)| *u != user_id);
        for solution_id in solution_ids {
            if store.solution(*solution_id).is_none() {
                return Err(AppError::Validation(INVALID_GRANT_MESSAGE.to_string()));
            }
            grants.insert((user_id, *solution_id));
        }
        store.grants = grants;
        Ok(())
    }

    async fn list_municipalities(
        &self,
        search: Option<String>,
    ) -> Result<Vec<MunicipalityOverview>, AppError> {
        let store = self.store();
        let mut rows: Vec<MunicipalityOverview> = store
            .municipalities
            .iter()
            .filter(|m| {
                search
                    .as_deref()
                    .is_none_or(|term| matches(&m.name, term) || matches(&m.state, term))
            })
            .map(|m| store.municipality_overview(m))
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn find_municipality(&self, id: Uuid) -> Result<Option<MunicipalityOverview>, AppError> {
        let store = self.store();
        Ok(store
            .municipalities
            .iter()
            .find(|m| m.id == id)
            .map(|m| store.municipality_overview(m)))
    }

    async fn municipality_exists(
        &self,
        name: &str,
        state: &str,
        except: Option<Uuid>,
    ) -> Result<bool, AppError> {
        Ok(self.store().municipality_taken(name, state, except))
    }

    async fn create_municipality(&self, name: &str, state: &str) -> Result<Municipality, AppError> {
        let mut store = self.store();
        if store.municipality_taken(name, state, None) {
            return Err(AppError::Conflict("Este município já está cadastrado".to_string()));
        }
        let municipality = Municipality {
            id: Uuid::new_v4(),
            name: name.to_string(),
            state: state.to_string(),
            created_at: Utc::now(),
        };
        store.municipalities.push(municipality.clone());
        Ok(municipality)
    }

    async fn update_municipality(
        &self,
        id: Uuid,
        name: Option<String>,
        state: Option<String>,
    ) -> Result<Option<Municipality>, AppError> {
        let mut store = self.store();
        let Some(current) = store.municipalities.iter().find(|m| m.id == id).cloned() else {
            return Ok(None);
        };
        let name = name.unwrap_or(current.name);
        let state = state.unwrap_or(current.state);
        if store.municipality_taken(&name, &state, Some(id)) {
            return Err(AppError::Conflict("Este município já está cadastrado".to_string()));
        }
        let municipality = store
            .municipalities
            .iter_mut()
            .find(|m| m.id == id)
            .map(|m| {
                m.name = name;
                m.state = state;
                m.clone()
            });
        Ok(municipality)
    }

    async fn count_municipality_users(&self, id: Uuid) -> Result<i64, AppError> {
        Ok(self
            .store()
            .users
            .iter()
            .filter(|u| u.municipality_id == Some(id))
            .count() as i64)
    }

    async fn delete_municipality(&self, id: Uuid) -> Result<bool, AppError> {
        let mut store = self.store();
        if store.users.iter().any(|u| u.municipality_id == Some(id)) {
            return Err(AppError::Conflict(MUNICIPALITY_IN_USE_MESSAGE.to_string()));
        }
        let before = store.municipalities.len();
        store.municipalities.retain(|m| m.id != id);
        Ok(store.municipalities.len() < before)
    }

    async fn list_solutions(
        &self,
        granted_to: Option<Uuid>,
    ) -> Result<Vec<SolutionOverview>, AppError> {
        let store = self.store();
        let mut rows: Vec<SolutionOverview> = match granted_to {
            None => store.solutions.iter().map(|s| store.overview(s)).collect(),
            Some(user_id) => store
                .granted(user_id, true)
                .iter()
                .map(|s| store.overview(s))
                .collect(),
        };
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn find_solution(&self, id: Uuid) -> Result<Option<SolutionOverview>, AppError> {
        let store = self.store();
        Ok(store.solution(id).map(|s| store.overview(s)))
    }

    async fn solution_name_taken(
        &self,
        name: &str,
        except: Option<Uuid>,
    ) -> Result<bool, AppError> {
        Ok(self.store().solution_taken(name, except))
    }

    async fn create_solution(&self, solution: NewSolution) -> Result<Solution, AppError> {
        let mut store = self.store();
        if store.solution_taken(&solution.name, None) {
            return Err(AppError::Conflict("Esta solução já está cadastrada".to_string()));
        }
        let created = Solution {
            id: Uuid::new_v4(),
            name: solution.name,
            description: solution.description,
            icon: solution.icon,
            color: solution.color,
            active: true,
            created_at: Utc::now(),
        };
        store.solutions.push(created.clone());
        Ok(created)
    }

    async fn update_solution(
        &self,
        id: Uuid,
        changes: SolutionChanges,
    ) -> Result<Option<Solution>, AppError> {
        let mut store = self.store();
        if let Some(name) = changes.name.as_deref() {
            if store.solution_taken(name, Some(id)) {
                return Err(AppError::Conflict("Esta solução já está cadastrada".to_string()));
            }
        }
        let Some(solution) = store.solutions.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            solution.name = name;
        }
        if let Some(description) = changes.description {
            solution.description = Some(description);
        }
        if let Some(icon) = changes.icon {
            solution.icon = Some(icon);
        }
        if let Some(color) = changes.color {
            solution.color = Some(color);
        }
        if let Some(active) = changes.active {
            solution.active = active;
        }
        Ok(Some(solution.clone()))
    }

    async fn count_solution_grants(&self, id: Uuid) -> Result<i64, AppError> {
        Ok(self.store().solution_users(id))
    }

    async fn delete_solution(&self, id: Uuid) -> Result<bool, AppError> {
        let mut store = self.store();
        if store.grants.iter().any(|(_, s)| *s == id) {
            return Err(AppError::Conflict(SOLUTION_IN_USE_MESSAGE.to_string()));
        }
        let before = store.solutions.len();
        store.solutions.retain(|s| s.id != id);
        if store.solutions.len() == before {
            return Ok(false);
        }
        for log in store.access_logs.iter_mut() {
            if log.solution_id == Some(id) {
                log.solution_id = None;
            }
        }
        Ok(true)
    }

    async fn append_access_log(&self, entry: NewAccessLog) -> Result<AccessLog, AppError> {
        let mut store = self.store();
        store.next_log_id += 1;
        let log = AccessLog {
            id: store.next_log_id,
            user_id: entry.user_id,
            solution_id: entry.solution_id,
            action: entry.action,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            created_at: entry.created_at,
        };
        store.access_logs.push(log.clone());
        Ok(log)
    }

    async fn open_session(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut store = self.store();
        store.next_session_id += 1;
        let id = store.next_session_id;
        store.sessions.push((
            id,
            ActiveSession {
                user_id,
                started_at: at,
                last_activity: at,
            },
        ));
        Ok(())
    }

    async fn touch_session(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut store = self.store();
        let latest = store
            .sessions
            .iter_mut()
            .filter(|(_, s)| s.user_id == user_id)
            .max_by_key(|(id, s)| (s.started_at, *id));
        if let Some((_, session)) = latest {
            if session.last_activity < at {
                session.last_activity = at;
            }
        }
        Ok(())
    }

    async fn count_regular_users(&self) -> Result<i64, AppError> {
        Ok(self
            .store()
            .users
            .iter()
            .filter(|u| u.role != Role::Admin)
            .count() as i64)
    }

    async fn count_active_users_since(&self, since: DateTime<Utc>) -> Result<i64, AppError> {
        let users: BTreeSet<Uuid> = self
            .store()
            .access_logs
            .iter()
            .filter(|l| l.created_at >= since)
            .map(|l| l.user_id)
            .collect();
        Ok(users.len() as i64)
    }

    async fn count_access_logs(&self, since: Option<DateTime<Utc>>) -> Result<i64, AppError> {
        Ok(self
            .store()
            .access_logs
            .iter()
            .filter(|l| since.is_none_or(|since| l.created_at >= since))
            .count() as i64)
    }

    async fn sessions_started_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ActiveSession>, AppError> {
        Ok(self
            .store()
            .sessions
            .iter()
            .filter(|(_, s)| s.started_at >= since)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn weekly_access_counts(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<WeekdayCount>, AppError> {
        let mut counts = [0i64; 7];
        for log in self
            .store()
            .access_logs
            .iter()
            .filter(|l| l.created_at >= from && l.created_at < until)
        {
            counts[log.created_at.weekday().num_days_from_sunday() as usize] += 1;
        }
        Ok((0..7)
            .zip(counts)
            .filter(|(_, count)| *count > 0)
            .map(|(weekday, count)| WeekdayCount { weekday, count })
            .collect())
    }

    async fn solution_usage(&self) -> Result<Vec<SolutionUsage>, AppError> {
        let store = self.store();
        let mut usage: Vec<SolutionUsage> = store
            .solutions
            .iter()
            .filter(|s| s.active)
            .map(|s| SolutionUsage {
                name: s.name.clone(),
                users: store.solution_users(s.id),
                color: s.color.clone(),
            })
            .collect();
        usage.sort_by(|a, b| b.users.cmp(&a.users).then_with(|| a.name.cmp(&b.name)));
        Ok(usage)
    }

    async fn presence_rows(
        &self,
        access_since: DateTime<Utc>,
        session_since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PresenceRow>, AppError> {
        let store = self.store();
        let mut rows: Vec<PresenceRow> = store
            .users
            .iter()
            .filter(|u| !u.role.is_admin())
            .filter_map(|u| {
                let last_access = store
                    .access_logs
                    .iter()
                    .filter(|l| l.user_id == u.id && l.created_at >= access_since)
                    .map(|l| l.created_at)
                    .max()?;
                let session_started = store
                    .sessions
                    .iter()
                    .filter(|(_, s)| s.user_id == u.id && s.started_at >= session_since)
                    .map(|(_, s)| s.started_at)
                    .min();
                let user = store.resolve(u);
                Some(PresenceRow {
                    id: user.id,
                    name: user.name,
                    email: user.email,
                    municipality: user.municipality_name,
                    last_access,
                    session_started,
                    solutions: store.granted(u.id, true).into_iter().map(|s| s.name).collect(),
                })
            })
            .collect();
        rows.sort_by(|a, b| b.last_access.cmp(&a.last_access));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn activity_rows(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ActivityRow>, AppError> {
        let store = self.store();
        let mut rows: Vec<ActivityRow> = store
            .access_logs
            .iter()
            .filter(|l| l.created_at >= since)
            .filter_map(|l| {
                let user = store.users.iter().find(|u| u.id == l.user_id)?;
                Some(ActivityRow {
                    id: l.id,
                    action: l.action,
                    user_name: user.name.clone(),
                    solution_name: l
                        .solution_id
                        .and_then(|id| store.solution(id))
                        .map(|s| s.name.clone()),
                    created_at: l.created_at,
                })
            })
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn recent_solution_access(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RecentAccessRow>, AppError> {
        let store = self.store();
        let mut rows: Vec<(i64, RecentAccessRow)> = store
            .access_logs
            .iter()
            .filter(|l| l.user_id == user_id && l.action == AccessAction::AccessSolution)
            .filter_map(|l| {
                let solution = store.solution(l.solution_id?)?;
                Some((
                    l.id,
                    RecentAccessRow {
                        solution_name: solution.name.clone(),
                        created_at: l.created_at,
                    },
                ))
            })
            .collect();
        rows.sort_by(|(a_id, a), (b_id, b)| {
            b.created_at.cmp(&a.created_at).then_with(|| b_id.cmp(a_id))
        });
        Ok(rows
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, row)| row)
            .collect())
    }
}
