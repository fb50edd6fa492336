//! Read-time analytics over the access log, sessions and grants.
//!
//! Everything here is recomputed per request from raw rows. The formatting helpers are
//! pure functions of an explicit `now` so they can be tested against a fixed clock.

use chrono::{DateTime, Duration, Months, NaiveTime, Utc};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::AppError,
    models::{
        AccessAction, ActiveSession, ActivityItem, ActivityRow, ChartsData, DashboardStats,
        OnlineUser, PresenceRow, PresenceStatus, RecentAccess, UserDashboard, WeekdayCount,
        WeeklyBucket,
    },
    repository::Repository,
};

/// Weekday labels, Sunday first.
pub const WEEKDAY_LABELS: [&str; 7] = ["Dom", "Seg", "Ter", "Qua", "Qui", "Sex", "Sáb"];

pub const ONLINE_USERS_LIMIT: i64 = 20;
pub const RECENT_ACTIVITY_LIMIT: i64 = 10;
pub const USER_RECENT_ACCESS_LIMIT: i64 = 5;

const UNNAMED_SOLUTION: &str = "uma solução";

/// Period
///
/// Time filter of the stats endpoint. Unknown values fall back to no filter at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    Week,
    Month,
    Year,
    AllTime,
}

impl Period {
    /// Missing means `Today`; anything unrecognized means `AllTime`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None | Some("today") => Period::Today,
            Some("week") => Period::Week,
            Some("month") => Period::Month,
            Some("year") => Period::Year,
            Some(_) => Period::AllTime,
        }
    }

    /// Lower bound of the period, or `None` for all time.
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = start_of_day(now);
        match self {
            Period::Today => Some(today),
            Period::Week => Some(today - Duration::days(7)),
            Period::Month => Some(today - Duration::days(30)),
            Period::Year => today.checked_sub_months(Months::new(12)),
            Period::AllTime => None,
        }
    }
}

/// Midnight UTC of the day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Classifies presence by the age of the last access. Both bounds are exclusive, so an
/// age equal to `online_secs` is already idle and one equal to `idle_secs` is offline.
pub fn presence_status(age: Duration, online_secs: i64, idle_secs: i64) -> PresenceStatus {
    let secs = age.num_seconds();
    if secs < online_secs {
        PresenceStatus::Online
    } else if secs < idle_secs {
        PresenceStatus::Idle
    } else {
        PresenceStatus::Offline
    }
}

/// Wording of relative times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeAgoStyle {
    /// "Agora", "5 min atrás". Used by the online-users table.
    Compact,
    /// "Agora mesmo", "5 minutos atrás". Used by activity feeds.
    Verbose,
}

pub fn time_ago(elapsed: Duration, style: TimeAgoStyle) -> String {
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        return match style {
            TimeAgoStyle::Compact => "Agora".to_string(),
            TimeAgoStyle::Verbose => "Agora mesmo".to_string(),
        };
    }
    if minutes < 60 {
        return match style {
            TimeAgoStyle::Compact => format!("{minutes} min atrás"),
            TimeAgoStyle::Verbose => format!("{minutes} minutos atrás"),
        };
    }
    let hours = elapsed.num_hours();
    if hours < 24 {
        return format!("{hours} horas atrás");
    }
    format!("{} dias atrás", elapsed.num_days())
}

/// "{h}h {m}min" since the session start, "0 min" without a session.
pub fn time_online(now: DateTime<Utc>, session_started: Option<DateTime<Utc>>) -> String {
    match session_started {
        None => "0 min".to_string(),
        Some(started) => {
            let elapsed = (now - started).max(Duration::zero());
            format!("{}h {}min", elapsed.num_hours(), elapsed.num_minutes() % 60)
        }
    }
}

/// Mean session length rounded to whole minutes.
pub fn average_session_time(sessions: &[ActiveSession]) -> String {
    if sessions.is_empty() {
        return "0min".to_string();
    }
    let total_secs: i64 = sessions
        .iter()
        .map(|s| (s.last_activity - s.started_at).num_seconds().max(0))
        .sum();
    let mean_secs = total_secs as f64 / sessions.len() as f64;
    let minutes = (mean_secs / 60.0).round() as i64;

    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{hours}h {minutes}min")
    } else {
        format!("{minutes}min")
    }
}

/// Start of the weekly lookback: six days before the start of today, so the window
/// covers exactly seven calendar days, one per weekday.
pub fn weekly_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(now) - Duration::days(6)
}

/// Exclusive end of the weekly lookback: the start of tomorrow.
pub fn weekly_window_end(now: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(now) + Duration::days(1)
}

/// Zero-fills per-weekday counts into seven buckets, Sunday first. Out-of-range
/// weekdays are ignored.
pub fn weekly_buckets(counts: &[WeekdayCount]) -> Vec<WeeklyBucket> {
    let mut values = [0i64; 7];
    for entry in counts {
        if let Some(slot) = usize::try_from(entry.weekday).ok().and_then(|i| values.get_mut(i)) {
            *slot += entry.count;
        }
    }

    WEEKDAY_LABELS
        .iter()
        .zip(values)
        .map(|(day, value)| WeeklyBucket {
            day: day.to_string(),
            value,
        })
        .collect()
}

/// Minimal HTML escaping for names embedded in activity descriptions.
pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub fn activity_item(row: ActivityRow, now: DateTime<Utc>) -> ActivityItem {
    let user = escape_html(&row.user_name);
    let (description, icon, icon_bg, icon_color) = match row.action {
        AccessAction::Login => (
            format!("<strong>{user}</strong> fez login no sistema"),
            "FaUserCheck",
            "#d4f4dd",
            "#22c55e",
        ),
        AccessAction::Logout => (
            format!("<strong>{user}</strong> fez logout do sistema"),
            "FaUserClock",
            "#ffd4d4",
            "#ef4444",
        ),
        AccessAction::AccessSolution => {
            let target = row.solution_name.as_deref().unwrap_or(UNNAMED_SOLUTION);
            (
                format!("<strong>{user}</strong> acessou {}", escape_html(target)),
                "FaBook",
                "rgba(0, 169, 232, 0.1)",
                "#00a9e8",
            )
        }
    };

    ActivityItem {
        id: row.id,
        activity_type: row.action,
        user: row.user_name,
        target: row.solution_name,
        description,
        time: time_ago(now - row.created_at, TimeAgoStyle::Verbose),
        icon: icon.to_string(),
        icon_bg: icon_bg.to_string(),
        icon_color: icon_color.to_string(),
    }
}

pub fn online_user(row: PresenceRow, now: DateTime<Utc>, config: &AppConfig) -> OnlineUser {
    let age = now - row.last_access;
    OnlineUser {
        id: row.id,
        user: row.name,
        email: row.email,
        municipality: row.municipality,
        status: presence_status(age, config.online_window_secs, config.idle_window_secs),
        last_access: time_ago(age, TimeAgoStyle::Compact),
        time_online: time_online(now, row.session_started),
        solutions: row.solutions,
    }
}

// --- Aggregators ---

pub async fn stats(
    repo: &dyn Repository,
    period: Period,
    now: DateTime<Utc>,
) -> Result<DashboardStats, AppError> {
    let today = start_of_day(now);

    let total_users = repo.count_regular_users().await?;
    let active_today = repo.count_active_users_since(today).await?;
    let total_access = repo.count_access_logs(period.since(now)).await?;
    let sessions = repo.sessions_started_since(today).await?;

    Ok(DashboardStats {
        total_users,
        active_today,
        total_access,
        average_time: average_session_time(&sessions),
    })
}

pub async fn charts(repo: &dyn Repository, now: DateTime<Utc>) -> Result<ChartsData, AppError> {
    let counts = repo
        .weekly_access_counts(weekly_window_start(now), weekly_window_end(now))
        .await?;
    let solutions = repo.solution_usage().await?;

    Ok(ChartsData {
        weekly: weekly_buckets(&counts),
        solutions,
    })
}

/// Non-admin users seen in the last 24 hours, most recent first.
pub async fn online_users(
    repo: &dyn Repository,
    config: &AppConfig,
    now: DateTime<Utc>,
) -> Result<Vec<OnlineUser>, AppError> {
    let rows = repo
        .presence_rows(now - Duration::hours(24), start_of_day(now), ONLINE_USERS_LIMIT)
        .await?;
    Ok(rows.into_iter().map(|row| online_user(row, now, config)).collect())
}

pub async fn recent_activities(
    repo: &dyn Repository,
    now: DateTime<Utc>,
) -> Result<Vec<ActivityItem>, AppError> {
    let rows = repo
        .activity_rows(now - Duration::hours(24), RECENT_ACTIVITY_LIMIT)
        .await?;
    Ok(rows.into_iter().map(|row| activity_item(row, now)).collect())
}

pub async fn user_dashboard(
    repo: &dyn Repository,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<UserDashboard, AppError> {
    let solutions = repo.granted_solutions(user_id, true).await?;
    let recent_access = repo
        .recent_solution_access(user_id, USER_RECENT_ACCESS_LIMIT)
        .await?
        .into_iter()
        .map(|row| RecentAccess {
            time_ago: time_ago(now - row.created_at, TimeAgoStyle::Verbose),
            solution_name: row.solution_name,
            created_at: row.created_at,
        })
        .collect();

    Ok(UserDashboard {
        solutions,
        recent_access,
    })
}
