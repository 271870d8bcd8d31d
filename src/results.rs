//! Vote aggregation: per-candidate tallies, winners, poll partitions.
//!
//! One tie policy everywhere: the winner of a poll is the set of candidates
//! sharing the maximum count, and only once at least one vote exists.

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::ApiResult;
use crate::models::Poll;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CandidateTally {
    pub candidate_id: i64,
    pub name: String,
    pub votes: i64,
}

/// Winning candidate(s) for a poll. `names` holds every tied leader,
/// sorted by name.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Winner {
    pub names: Vec<String>,
    pub votes: i64,
}

impl Winner {
    /// Human-readable form used by poll stats: "A, B".
    pub fn display(&self) -> String {
        self.names.join(", ")
    }
}

/// Per-candidate counts for one poll. Zero-vote candidates appear with a
/// count of 0 (left join), ranked by count then name.
pub async fn candidate_tallies(db: &SqlitePool, poll_id: i64) -> ApiResult<Vec<CandidateTally>> {
    let tallies = sqlx::query_as::<_, CandidateTally>(
        "SELECT c.id AS candidate_id, c.name AS name, COUNT(v.id) AS votes
         FROM candidates c
         LEFT JOIN votes v ON v.candidate_id = c.id
         WHERE c.poll_id = ?
         GROUP BY c.id
         ORDER BY votes DESC, c.name ASC",
    )
    .bind(poll_id)
    .fetch_all(db)
    .await?;

    Ok(tallies)
}

/// Counts for every candidate across all polls (admin dashboard).
pub async fn all_candidate_tallies(db: &SqlitePool) -> ApiResult<Vec<CandidateTally>> {
    let tallies = sqlx::query_as::<_, CandidateTally>(
        "SELECT c.id AS candidate_id, c.name AS name, COUNT(v.id) AS votes
         FROM candidates c
         LEFT JOIN votes v ON v.candidate_id = c.id
         GROUP BY c.id
         ORDER BY votes DESC, c.name ASC",
    )
    .fetch_all(db)
    .await?;

    Ok(tallies)
}

/// All tied leaders of a poll, or `None` while the poll has no votes.
pub async fn winner(db: &SqlitePool, poll_id: i64) -> ApiResult<Option<Winner>> {
    let tallies = candidate_tallies(db, poll_id).await?;
    Ok(winner_of(&tallies))
}

/// Tie-policy core, shared so every surface agrees.
pub fn winner_of(tallies: &[CandidateTally]) -> Option<Winner> {
    let max = tallies.iter().map(|t| t.votes).max()?;
    if max == 0 {
        return None;
    }
    let mut names: Vec<String> = tallies
        .iter()
        .filter(|t| t.votes == max)
        .map(|t| t.name.clone())
        .collect();
    names.sort();
    Some(Winner { names, votes: max })
}

/// Polls open right now under the canonical predicate, newest first.
pub async fn open_polls(db: &SqlitePool, now: NaiveDateTime) -> ApiResult<Vec<Poll>> {
    let polls = sqlx::query_as::<_, Poll>(
        "SELECT * FROM polls
         WHERE is_active = 1 AND start_time <= ? AND end_time >= ?
         ORDER BY start_time DESC",
    )
    .bind(now)
    .bind(now)
    .fetch_all(db)
    .await?;

    Ok(polls)
}

/// Polls whose window has passed, most recently ended first.
pub async fn expired_polls(db: &SqlitePool, now: NaiveDateTime) -> ApiResult<Vec<Poll>> {
    let polls = sqlx::query_as::<_, Poll>(
        "SELECT * FROM polls WHERE end_time < ? ORDER BY end_time DESC",
    )
    .bind(now)
    .fetch_all(db)
    .await?;

    Ok(polls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::test_support::{add_candidate, add_poll, add_user, add_vote};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn no_votes_means_no_winner() {
        let db = test_pool().await;
        let now = Utc::now().naive_utc();
        let poll = add_poll(&db, "P", now - Duration::hours(1), now + Duration::hours(1), true).await;
        add_candidate(&db, poll, "A").await;
        add_candidate(&db, poll, "B").await;

        let tallies = candidate_tallies(&db, poll).await.unwrap();
        assert_eq!(tallies.len(), 2);
        assert!(tallies.iter().all(|t| t.votes == 0));
        assert_eq!(winner(&db, poll).await.unwrap(), None);
    }

    #[tokio::test]
    async fn single_leader_wins() {
        let db = test_pool().await;
        let now = Utc::now().naive_utc();
        let poll = add_poll(&db, "P1", now - Duration::hours(1), now + Duration::hours(1), true).await;
        let a = add_candidate(&db, poll, "A").await;
        let b = add_candidate(&db, poll, "B").await;

        let u1 = add_user(&db, "alice", "user").await;
        let u2 = add_user(&db, "bob", "user").await;
        add_vote(&db, u1, a, poll).await;
        add_vote(&db, u2, a, poll).await;
        let u3 = add_user(&db, "carol", "user").await;
        add_vote(&db, u3, b, poll).await;

        let w = winner(&db, poll).await.unwrap().unwrap();
        assert_eq!(w.names, vec!["A".to_string()]);
        assert_eq!(w.votes, 2);
        assert_eq!(w.display(), "A");
    }

    #[tokio::test]
    async fn ties_return_every_leader() {
        let db = test_pool().await;
        let now = Utc::now().naive_utc();
        let poll = add_poll(&db, "P", now - Duration::hours(1), now + Duration::hours(1), true).await;
        let a = add_candidate(&db, poll, "B").await;
        let b = add_candidate(&db, poll, "A").await;
        add_candidate(&db, poll, "C").await;

        let u1 = add_user(&db, "alice", "user").await;
        let u2 = add_user(&db, "bob", "user").await;
        add_vote(&db, u1, a, poll).await;
        add_vote(&db, u2, b, poll).await;

        let w = winner(&db, poll).await.unwrap().unwrap();
        assert_eq!(w.names, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(w.votes, 1);
        assert_eq!(w.display(), "A, B");
    }

    #[tokio::test]
    async fn partitions_use_flag_and_window() {
        let db = test_pool().await;
        let now = Utc::now().naive_utc();
        let open = add_poll(&db, "open", now - Duration::hours(1), now + Duration::hours(1), true).await;
        // Time-valid but manually deactivated: open nowhere.
        let stopped = add_poll(&db, "stopped", now - Duration::hours(1), now + Duration::hours(1), false).await;
        let expired = add_poll(&db, "expired", now - Duration::hours(3), now - Duration::hours(1), true).await;

        let open_ids: Vec<i64> = open_polls(&db, now).await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(open_ids, vec![open]);

        let expired_ids: Vec<i64> =
            expired_polls(&db, now).await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(expired_ids, vec![expired]);
        assert!(!expired_ids.contains(&stopped));
    }
}
