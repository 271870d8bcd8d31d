use axum::{extract::State, http::StatusCode, Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::models::{Candidate, Poll, Role, Vote};
use crate::results;
use crate::routes::auth::Claims;
use crate::state::AppState;
use crate::voting;

// ─── Request/Response types ───

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub poll_id: Option<i64>,
    pub candidate_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub message: String,
    pub vote: Vote,
}

#[derive(Debug, Serialize)]
pub struct OpenPoll {
    #[serde(flatten)]
    pub poll: Poll,
    pub candidates: Vec<Candidate>,
    /// Derived from the votes table, never from the `has_voted` hint.
    pub has_voted: bool,
}

#[derive(Debug, Serialize)]
pub struct ExpiredPoll {
    #[serde(flatten)]
    pub poll: Poll,
    pub winner: Option<results::Winner>,
}

#[derive(Debug, Serialize)]
pub struct UserDashboard {
    pub active_polls: Vec<OpenPoll>,
    pub expired_polls: Vec<ExpiredPoll>,
    /// The caller's ballots as (poll, candidate) pairs.
    pub my_votes: Vec<BallotRef>,
}

#[derive(Debug, Serialize)]
pub struct BallotRef {
    pub poll_id: i64,
    pub candidate_id: i64,
}

#[derive(Debug, Serialize)]
pub struct PollListing {
    pub polls: Vec<OpenPoll>,
    pub voted_poll_ids: Vec<i64>,
}

// ─── Routes ───

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UserDashboard>> {
    if claims.role == Role::Admin {
        return Err(ApiError::Forbidden(
            "Admins should use the admin dashboard.".into(),
        ));
    }

    let now = Utc::now().naive_utc();

    let votes: Vec<(i64, i64)> =
        sqlx::query_as("SELECT poll_id, candidate_id FROM votes WHERE user_id = ?")
            .bind(claims.sub)
            .fetch_all(&state.db)
            .await?;
    let voted_ids: Vec<i64> = votes.iter().map(|(p, _)| *p).collect();

    let mut active_polls = Vec::new();
    for poll in results::open_polls(&state.db, now).await? {
        let candidates = poll_candidates(&state, poll.id).await?;
        let has_voted = voted_ids.contains(&poll.id);
        active_polls.push(OpenPoll {
            poll,
            candidates,
            has_voted,
        });
    }

    let mut expired_polls = Vec::new();
    for poll in results::expired_polls(&state.db, now).await? {
        let winner = results::winner(&state.db, poll.id).await?;
        expired_polls.push(ExpiredPoll { poll, winner });
    }

    Ok(Json(UserDashboard {
        active_polls,
        expired_polls,
        my_votes: votes
            .into_iter()
            .map(|(poll_id, candidate_id)| BallotRef {
                poll_id,
                candidate_id,
            })
            .collect(),
    }))
}

pub async fn get_polls(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<PollListing>> {
    let now = Utc::now().naive_utc();

    let voted_poll_ids: Vec<i64> =
        sqlx::query_scalar("SELECT poll_id FROM votes WHERE user_id = ?")
            .bind(claims.sub)
            .fetch_all(&state.db)
            .await?;

    let mut polls = Vec::new();
    for poll in results::open_polls(&state.db, now).await? {
        let candidates = poll_candidates(&state, poll.id).await?;
        let has_voted = voted_poll_ids.contains(&poll.id);
        polls.push(OpenPoll {
            poll,
            candidates,
            has_voted,
        });
    }

    Ok(Json(PollListing {
        polls,
        voted_poll_ids,
    }))
}

/// Single ballot endpoint; `/vote` and `/user/vote` both land here.
pub async fn vote(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<VoteRequest>,
) -> ApiResult<(StatusCode, Json<VoteResponse>)> {
    let (poll_id, candidate_id) = match (req.poll_id, req.candidate_id) {
        (Some(p), Some(c)) => (p, c),
        _ => {
            return Err(ApiError::Validation(
                "Invalid vote request. Please try again.".into(),
            ))
        }
    };

    let now = Utc::now().naive_utc();
    let vote = voting::cast_vote(&state.db, claims.sub, claims.role, poll_id, candidate_id, now)
        .await?;

    tracing::info!(user_id = claims.sub, poll_id, candidate_id, "ballot recorded");

    Ok((
        StatusCode::CREATED,
        Json(VoteResponse {
            message: "Your vote has been successfully submitted!".into(),
            vote,
        }),
    ))
}

async fn poll_candidates(state: &AppState, poll_id: i64) -> ApiResult<Vec<Candidate>> {
    let candidates =
        sqlx::query_as::<_, Candidate>("SELECT * FROM candidates WHERE poll_id = ? ORDER BY id")
            .bind(poll_id)
            .fetch_all(&state.db)
            .await?;
    Ok(candidates)
}
