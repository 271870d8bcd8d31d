use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::models::{Poll, Role, User, UserInfo};
use crate::results;
use crate::routes::auth::{hash_password, require_admin, Claims};
use crate::state::AppState;
use crate::voting;

/// Form timestamps arrive as `datetime-local` values.
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

// ─── Request/Response types ───

#[derive(Debug, Deserialize)]
pub struct AddUserRequest {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub password: String,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub role: Option<Role>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddPollRequest {
    pub title: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddPollWithCandidatesRequest {
    #[serde(flatten)]
    pub poll: AddPollRequest,
    #[serde(default)]
    pub candidates: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddCandidateRequest {
    pub name: Option<String>,
    pub poll_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct PollCreated {
    pub message: String,
    pub poll: Poll,
    pub candidates_created: usize,
}

#[derive(Debug, Serialize)]
pub struct PollStatsResponse {
    pub poll_id: i64,
    pub poll_title: String,
    /// `[name, count]` pairs, zero-vote candidates included.
    pub stats: Vec<(String, i64)>,
    /// Comma-joined tied leaders, or "No votes yet".
    pub winner: String,
}

#[derive(Debug, Serialize)]
pub struct PollResults {
    pub poll: Poll,
    pub results: Vec<results::CandidateTally>,
    pub winner: Option<results::Winner>,
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub users: Vec<UserInfo>,
    pub polls: Vec<Poll>,
    pub stats: Vec<results::CandidateTally>,
    pub expired_polls: Vec<PollResults>,
    pub voting_enabled: bool,
}

// ─── Dashboard ───

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Dashboard>> {
    require_admin(&claims)?;

    let users = sqlx::query_as::<_, User>("SELECT * FROM users WHERE role = 'user' ORDER BY id")
        .fetch_all(&state.db)
        .await?
        .into_iter()
        .map(UserInfo::from)
        .collect();

    let polls = sqlx::query_as::<_, Poll>("SELECT * FROM polls ORDER BY start_time DESC")
        .fetch_all(&state.db)
        .await?;

    let stats = results::all_candidate_tallies(&state.db).await?;

    let now = Utc::now().naive_utc();
    let mut expired = Vec::new();
    for poll in results::expired_polls(&state.db, now).await? {
        let tallies = results::candidate_tallies(&state.db, poll.id).await?;
        let winner = results::winner_of(&tallies);
        expired.push(PollResults {
            poll,
            results: tallies,
            winner,
        });
    }

    let voting_enabled = voting::voting_enabled(&state.db).await?;

    Ok(Json(Dashboard {
        users,
        polls,
        stats,
        expired_polls: expired,
        voting_enabled,
    }))
}

// ─── User administration ───

pub async fn add_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddUserRequest>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    require_admin(&claims)?;

    let username = req.username.trim().to_string();
    let email = req.email.trim().to_string();
    if username.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation(
            "Username, email and password are required.".into(),
        ));
    }

    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM users WHERE username = ? OR email = ?")
            .bind(&username)
            .bind(&email)
            .fetch_optional(&state.db)
            .await?;
    if existing.is_some() {
        return Err(ApiError::Conflict("Username or email already exists.".into()));
    }

    let password_hash = hash_password(&req.password)?;
    let role = req.role.unwrap_or(Role::User);

    sqlx::query(
        "INSERT INTO users (username, email, phone, password_hash, role) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&username)
    .bind(&email)
    .bind(req.phone.trim())
    .bind(&password_hash)
    .bind(role)
    .execute(&state.db)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "User added successfully!".into(),
        }),
    ))
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<Json<MessageResponse>> {
    require_admin(&claims)?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found.".into()))?;

    let username = req.username.unwrap_or(user.username);
    let role = req.role.unwrap_or(user.role);
    // Re-hash only when a new password was supplied.
    let password_hash = match req.password.as_deref() {
        Some(p) if !p.is_empty() => hash_password(p)?,
        _ => user.password_hash,
    };

    sqlx::query("UPDATE users SET username = ?, role = ?, password_hash = ? WHERE id = ?")
        .bind(&username)
        .bind(role)
        .bind(&password_hash)
        .bind(id)
        .execute(&state.db)
        .await?;

    Ok(Json(MessageResponse {
        message: "User updated successfully!".into(),
    }))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<Json<MessageResponse>> {
    require_admin(&claims)?;

    let mut tx = state.db.begin().await?;
    let deleted = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(ApiError::NotFound("User not found.".into()));
    }
    tx.commit().await?;

    Ok(Json(MessageResponse {
        message: "User deleted successfully!".into(),
    }))
}

// ─── Poll lifecycle ───

fn parse_poll_fields(req: &AddPollRequest) -> ApiResult<(String, NaiveDateTime, NaiveDateTime)> {
    let title = req
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(required_fields)?;
    let start = req.start_time.as_deref().ok_or_else(required_fields)?;
    let end = req.end_time.as_deref().ok_or_else(required_fields)?;

    // end > start is deliberately not validated.
    let start_time = parse_form_time(start)?;
    let end_time = parse_form_time(end)?;

    Ok((title.to_string(), start_time, end_time))
}

fn parse_form_time(value: &str) -> ApiResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIME_FORMAT)
        .map_err(|_| ApiError::Validation(format!("Invalid timestamp: {value}")))
}

fn required_fields() -> ApiError {
    ApiError::Validation("All fields are required.".into())
}

pub async fn add_poll(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddPollRequest>,
) -> ApiResult<(StatusCode, Json<PollCreated>)> {
    require_admin(&claims)?;

    let (title, start_time, end_time) = parse_poll_fields(&req)?;

    let res = sqlx::query(
        "INSERT INTO polls (title, start_time, end_time, is_active) VALUES (?, ?, ?, 1)",
    )
    .bind(&title)
    .bind(start_time)
    .bind(end_time)
    .execute(&state.db)
    .await?;

    let poll = Poll {
        id: res.last_insert_rowid(),
        title,
        start_time,
        end_time,
        is_active: true,
    };

    tracing::info!(poll_id = poll.id, title = %poll.title, "poll created");

    Ok((
        StatusCode::CREATED,
        Json(PollCreated {
            message: "Poll created successfully and is now active!".into(),
            poll,
            candidates_created: 0,
        }),
    ))
}

pub async fn add_poll_with_candidates(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddPollWithCandidatesRequest>,
) -> ApiResult<(StatusCode, Json<PollCreated>)> {
    require_admin(&claims)?;

    let (title, start_time, end_time) = parse_poll_fields(&req.poll)?;

    let mut tx = state.db.begin().await?;

    let res = sqlx::query(
        "INSERT INTO polls (title, start_time, end_time, is_active) VALUES (?, ?, ?, 1)",
    )
    .bind(&title)
    .bind(start_time)
    .bind(end_time)
    .execute(&mut *tx)
    .await?;
    let poll_id = res.last_insert_rowid();

    let mut created = 0usize;
    for name in &req.candidates {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        sqlx::query("INSERT INTO candidates (name, poll_id) VALUES (?, ?)")
            .bind(name)
            .bind(poll_id)
            .execute(&mut *tx)
            .await?;
        created += 1;
    }

    tx.commit().await?;

    let poll = Poll {
        id: poll_id,
        title,
        start_time,
        end_time,
        is_active: true,
    };

    tracing::info!(poll_id, candidates = created, "poll created with candidates");

    Ok((
        StatusCode::CREATED,
        Json(PollCreated {
            message: format!("Poll '{}' created with {} candidates!", poll.title, created),
            poll,
            candidates_created: created,
        }),
    ))
}

pub async fn add_candidate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddCandidateRequest>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    require_admin(&claims)?;

    let name = req
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::Validation("Candidate name and poll are required!".into()))?;
    let poll_id = req
        .poll_id
        .ok_or_else(|| ApiError::Validation("Candidate name and poll are required!".into()))?;

    let poll = sqlx::query_as::<_, Poll>("SELECT * FROM polls WHERE id = ?")
        .bind(poll_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("Selected poll does not exist.".into()))?;

    sqlx::query("INSERT INTO candidates (name, poll_id) VALUES (?, ?)")
        .bind(name)
        .bind(poll.id)
        .execute(&state.db)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: format!("Candidate '{}' added successfully to poll '{}'!", name, poll.title),
        }),
    ))
}

pub async fn start_poll(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(poll_id): Path<i64>,
) -> ApiResult<Json<MessageResponse>> {
    require_admin(&claims)?;

    // Reactivates and restarts the window; an ended poll may be reopened.
    let updated = sqlx::query("UPDATE polls SET is_active = 1, start_time = ? WHERE id = ?")
        .bind(Utc::now().naive_utc())
        .bind(poll_id)
        .execute(&state.db)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::NotFound("Poll not found.".into()));
    }

    Ok(Json(MessageResponse {
        message: "Poll started successfully".into(),
    }))
}

pub async fn stop_poll(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(poll_id): Path<i64>,
) -> ApiResult<Json<MessageResponse>> {
    require_admin(&claims)?;

    // Forces the window shut; stopping both deactivates and expires.
    let updated = sqlx::query("UPDATE polls SET is_active = 0, end_time = ? WHERE id = ?")
        .bind(Utc::now().naive_utc())
        .bind(poll_id)
        .execute(&state.db)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::NotFound("Poll not found.".into()));
    }

    Ok(Json(MessageResponse {
        message: "Poll stopped successfully".into(),
    }))
}

pub async fn delete_poll(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(poll_id): Path<i64>,
) -> ApiResult<Json<MessageResponse>> {
    require_admin(&claims)?;

    let mut tx = state.db.begin().await?;
    let deleted = sqlx::query("DELETE FROM polls WHERE id = ?")
        .bind(poll_id)
        .execute(&mut *tx)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(ApiError::NotFound("Poll not found.".into()));
    }
    tx.commit().await?;

    Ok(Json(MessageResponse {
        message: "Poll deleted successfully".into(),
    }))
}

// ─── Aggregation ───

pub async fn poll_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(poll_id): Path<i64>,
) -> ApiResult<Json<PollStatsResponse>> {
    require_admin(&claims)?;

    let poll = sqlx::query_as::<_, Poll>("SELECT * FROM polls WHERE id = ?")
        .bind(poll_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("Poll not found".into()))?;

    let tallies = results::candidate_tallies(&state.db, poll.id).await?;
    let winner = results::winner_of(&tallies)
        .map_or_else(|| "No votes yet".to_string(), |w| w.display());

    Ok(Json(PollStatsResponse {
        poll_id: poll.id,
        poll_title: poll.title,
        stats: tallies.into_iter().map(|t| (t.name, t.votes)).collect(),
        winner,
    }))
}

pub async fn all_results(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<PollResults>>> {
    require_admin(&claims)?;

    let polls = sqlx::query_as::<_, Poll>("SELECT * FROM polls ORDER BY id")
        .fetch_all(&state.db)
        .await?;

    let mut out = Vec::with_capacity(polls.len());
    for poll in polls {
        let tallies = results::candidate_tallies(&state.db, poll.id).await?;
        let winner = results::winner_of(&tallies);
        out.push(PollResults {
            poll,
            results: tallies,
            winner,
        });
    }

    Ok(Json(out))
}

// ─── Global pause switch ───

pub async fn pause_voting(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<MessageResponse>> {
    require_admin(&claims)?;
    voting::set_voting_enabled(&state.db, false).await?;
    tracing::info!("voting paused globally");
    Ok(Json(MessageResponse {
        message: "Voting paused".into(),
    }))
}

pub async fn resume_voting(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<MessageResponse>> {
    require_admin(&claims)?;
    voting::set_voting_enabled(&state.db, true).await?;
    tracing::info!("voting resumed globally");
    Ok(Json(MessageResponse {
        message: "Voting resumed".into(),
    }))
}
