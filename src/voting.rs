//! The ballot engine. One path, full validation — every vote in the system
//! goes through [`cast_vote`].

use chrono::NaiveDateTime;
use sqlx::SqlitePool;

use crate::error::{ApiError, ApiResult};
use crate::models::{Candidate, Poll, Role, Vote};

/// Validate and record a single ballot.
///
/// Checks run in order and each failure stops before any mutation:
/// role, global pause switch, poll existence, candidate/poll agreement,
/// the canonical open window, then prior vote. The `UNIQUE(user_id,
/// poll_id)` constraint remains the authority for duplicates, so a
/// concurrent double submission surfaces as the same conflict instead of
/// slipping past the pre-check.
pub async fn cast_vote(
    db: &SqlitePool,
    user_id: i64,
    role: Role,
    poll_id: i64,
    candidate_id: i64,
    now: NaiveDateTime,
) -> ApiResult<Vote> {
    if role != Role::User {
        return Err(ApiError::Forbidden("Only registered users can vote!".into()));
    }

    if !voting_enabled(db).await? {
        return Err(ApiError::Closed("Voting is temporarily paused.".into()));
    }

    let poll = sqlx::query_as::<_, Poll>("SELECT * FROM polls WHERE id = ?")
        .bind(poll_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::NotFound("Poll not found.".into()))?;

    let candidate = sqlx::query_as::<_, Candidate>("SELECT * FROM candidates WHERE id = ?")
        .bind(candidate_id)
        .fetch_optional(db)
        .await?;

    match candidate {
        Some(ref c) if c.poll_id == poll.id => {}
        _ => return Err(ApiError::Validation("Invalid candidate selection.".into())),
    }

    if now < poll.start_time {
        return Err(ApiError::NotStarted(
            "Voting for this poll has not started yet.".into(),
        ));
    }
    if now > poll.end_time {
        return Err(ApiError::Closed(
            "Voting session for this poll has ended.".into(),
        ));
    }
    if !poll.is_active {
        return Err(ApiError::Closed("Voting for this poll is closed.".into()));
    }

    let already: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM votes WHERE user_id = ? AND poll_id = ?")
            .bind(user_id)
            .bind(poll_id)
            .fetch_optional(db)
            .await?;
    if already.is_some() {
        return Err(duplicate_vote());
    }

    let mut tx = db.begin().await?;

    let inserted = sqlx::query(
        "INSERT INTO votes (user_id, candidate_id, poll_id, cast_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(candidate_id)
    .bind(poll_id)
    .bind(now)
    .execute(&mut *tx)
    .await;

    let vote_id = match inserted {
        Ok(res) => res.last_insert_rowid(),
        // Lost a race with a concurrent submission from the same user.
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => return Err(duplicate_vote()),
        Err(e) => return Err(e.into()),
    };

    // Cached hint only; derived per-poll state lives in the votes table.
    sqlx::query("UPDATE users SET has_voted = 1 WHERE id = ? AND has_voted = 0")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Vote {
        id: vote_id,
        user_id,
        candidate_id,
        poll_id,
        cast_at: now,
    })
}

fn duplicate_vote() -> ApiError {
    ApiError::Conflict("You have already voted in this poll.".into())
}

/// Global pause switch (singleton `voting_session` row).
pub async fn voting_enabled(db: &SqlitePool) -> ApiResult<bool> {
    let enabled: bool = sqlx::query_scalar("SELECT is_active FROM voting_session WHERE id = 1")
        .fetch_one(db)
        .await?;
    Ok(enabled)
}

pub async fn set_voting_enabled(db: &SqlitePool, enabled: bool) -> ApiResult<()> {
    sqlx::query("UPDATE voting_session SET is_active = ? WHERE id = 1")
        .bind(enabled)
        .execute(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::test_support::{add_candidate, add_poll, add_user, add_vote, count};
    use chrono::{Duration, Utc};

    struct Fixture {
        db: SqlitePool,
        user: i64,
        poll: i64,
        candidate_a: i64,
        candidate_b: i64,
        now: NaiveDateTime,
    }

    async fn open_poll_fixture() -> Fixture {
        let db = test_pool().await;
        let now = Utc::now().naive_utc();
        let poll = add_poll(&db, "P1", now - Duration::hours(1), now + Duration::hours(1), true).await;
        let candidate_a = add_candidate(&db, poll, "A").await;
        let candidate_b = add_candidate(&db, poll, "B").await;
        let user = add_user(&db, "alice", "user").await;
        Fixture { db, user, poll, candidate_a, candidate_b, now }
    }

    #[tokio::test]
    async fn accepts_a_valid_ballot() {
        let f = open_poll_fixture().await;
        let vote = cast_vote(&f.db, f.user, Role::User, f.poll, f.candidate_a, f.now)
            .await
            .unwrap();
        assert_eq!(vote.poll_id, f.poll);
        assert_eq!(count(&f.db, "votes").await, 1);

        let has_voted: bool = sqlx::query_scalar("SELECT has_voted FROM users WHERE id = ?")
            .bind(f.user)
            .fetch_one(&f.db)
            .await
            .unwrap();
        assert!(has_voted);
    }

    #[tokio::test]
    async fn second_ballot_is_a_duplicate() {
        let f = open_poll_fixture().await;
        cast_vote(&f.db, f.user, Role::User, f.poll, f.candidate_a, f.now)
            .await
            .unwrap();

        let err = cast_vote(&f.db, f.user, Role::User, f.poll, f.candidate_b, f.now)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(count(&f.db, "votes").await, 1);
    }

    #[tokio::test]
    async fn constraint_catches_a_racing_duplicate() {
        // Simulate the pre-check being stale: a vote lands between check
        // and insert. The unique constraint must still hold the invariant.
        let f = open_poll_fixture().await;
        add_vote(&f.db, f.user, f.candidate_a, f.poll).await;

        let direct = sqlx::query(
            "INSERT INTO votes (user_id, candidate_id, poll_id, cast_at) VALUES (?, ?, ?, ?)",
        )
        .bind(f.user)
        .bind(f.candidate_b)
        .bind(f.poll)
        .bind(f.now)
        .execute(&f.db)
        .await;

        match direct {
            Err(sqlx::Error::Database(e)) => assert!(e.is_unique_violation()),
            other => panic!("expected unique violation, got {other:?}"),
        }
        assert_eq!(count(&f.db, "votes").await, 1);
    }

    #[tokio::test]
    async fn rejects_before_the_window_opens() {
        let db = test_pool().await;
        let now = Utc::now().naive_utc();
        let poll = add_poll(&db, "P", now + Duration::hours(1), now + Duration::hours(2), true).await;
        let c = add_candidate(&db, poll, "A").await;
        let user = add_user(&db, "alice", "user").await;

        let err = cast_vote(&db, user, Role::User, poll, c, now).await.unwrap_err();
        assert!(matches!(err, ApiError::NotStarted(_)));
        assert_eq!(count(&db, "votes").await, 0);
    }

    #[tokio::test]
    async fn rejects_after_the_window_closes() {
        // Expired poll still flagged active: the window wins.
        let db = test_pool().await;
        let now = Utc::now().naive_utc();
        let poll = add_poll(&db, "P2", now - Duration::hours(2), now - Duration::hours(1), true).await;
        let c = add_candidate(&db, poll, "A").await;
        let user = add_user(&db, "alice", "user").await;

        let err = cast_vote(&db, user, Role::User, poll, c, now).await.unwrap_err();
        assert!(matches!(err, ApiError::Closed(_)));
    }

    #[tokio::test]
    async fn rejects_a_stopped_poll_inside_its_window() {
        let db = test_pool().await;
        let now = Utc::now().naive_utc();
        let poll = add_poll(&db, "P", now - Duration::hours(1), now + Duration::hours(1), false).await;
        let c = add_candidate(&db, poll, "A").await;
        let user = add_user(&db, "alice", "user").await;

        let err = cast_vote(&db, user, Role::User, poll, c, now).await.unwrap_err();
        assert!(matches!(err, ApiError::Closed(_)));
    }

    #[tokio::test]
    async fn rejects_candidate_from_another_poll() {
        let f = open_poll_fixture().await;
        let other = add_poll(
            &f.db,
            "other",
            f.now - Duration::hours(1),
            f.now + Duration::hours(1),
            true,
        )
        .await;
        let foreign = add_candidate(&f.db, other, "X").await;

        let err = cast_vote(&f.db, f.user, Role::User, f.poll, foreign, f.now)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_missing_poll_and_admin_role() {
        let f = open_poll_fixture().await;

        let err = cast_vote(&f.db, f.user, Role::User, 9999, f.candidate_a, f.now)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let admin = add_user(&f.db, "root", "admin").await;
        let err = cast_vote(&f.db, admin, Role::Admin, f.poll, f.candidate_a, f.now)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn full_ballot_scenario() {
        // Poll with candidates A and B; alice votes A, a second ballot for
        // B is a duplicate, and A leads with one vote.
        let f = open_poll_fixture().await;
        cast_vote(&f.db, f.user, Role::User, f.poll, f.candidate_a, f.now)
            .await
            .unwrap();

        let dup = cast_vote(&f.db, f.user, Role::User, f.poll, f.candidate_b, f.now)
            .await
            .unwrap_err();
        assert!(matches!(dup, ApiError::Conflict(_)));

        let w = crate::results::winner(&f.db, f.poll).await.unwrap().unwrap();
        assert_eq!(w.names, vec!["A".to_string()]);
        assert_eq!(w.votes, 1);
    }

    #[tokio::test]
    async fn pause_switch_blocks_everything() {
        let f = open_poll_fixture().await;
        set_voting_enabled(&f.db, false).await.unwrap();

        let err = cast_vote(&f.db, f.user, Role::User, f.poll, f.candidate_a, f.now)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Closed(_)));

        set_voting_enabled(&f.db, true).await.unwrap();
        cast_vote(&f.db, f.user, Role::User, f.poll, f.candidate_a, f.now)
            .await
            .unwrap();
    }
}
