use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ─── Roles ───

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

// ─── Rows ───

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub password_hash: String,
    pub role: Role,
    /// Cached hint only; per-poll voting state always derives from `votes`.
    pub has_voted: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Poll {
    pub id: i64,
    pub title: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub is_active: bool,
}

impl Poll {
    /// Canonical openness predicate: the active flag AND the time window
    /// must both agree. Used by the voting engine and every listing.
    pub fn is_open(&self, now: NaiveDateTime) -> bool {
        self.is_active && self.start_time <= now && now <= self.end_time
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Candidate {
    pub id: i64,
    pub name: String,
    pub poll_id: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Vote {
    pub id: i64,
    pub user_id: i64,
    pub candidate_id: i64,
    pub poll_id: i64,
    pub cast_at: NaiveDateTime,
}

// ─── Shared DTOs ───

/// Public view of a user; never carries the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub role: Role,
    pub has_voted: bool,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            phone: user.phone,
            role: user.role,
            has_voted: user.has_voted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn poll_around(now: NaiveDateTime, active: bool) -> Poll {
        Poll {
            id: 1,
            title: "P".into(),
            start_time: now - Duration::hours(1),
            end_time: now + Duration::hours(1),
            is_active: active,
        }
    }

    #[test]
    fn open_requires_flag_and_window() {
        let now = Utc::now().naive_utc();
        assert!(poll_around(now, true).is_open(now));
        assert!(!poll_around(now, false).is_open(now));

        let mut future = poll_around(now, true);
        future.start_time = now + Duration::minutes(5);
        assert!(!future.is_open(now));

        let mut past = poll_around(now, true);
        past.end_time = now - Duration::minutes(5);
        assert!(!past.is_open(now));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let now = Utc::now().naive_utc();
        let mut poll = poll_around(now, true);
        poll.start_time = now;
        poll.end_time = now;
        assert!(poll.is_open(now));
    }
}
