//! Seed helpers shared by the in-memory store tests.

use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;

pub async fn add_user(db: &SqlitePool, username: &str, role: &str) -> i64 {
    sqlx::query(
        "INSERT INTO users (username, email, phone, password_hash, role) VALUES (?, ?, '', 'x', ?)",
    )
    .bind(username)
    .bind(format!("{username}@example.com"))
    .bind(role)
    .execute(db)
    .await
    .expect("insert user")
    .last_insert_rowid()
}

pub async fn add_poll(
    db: &SqlitePool,
    title: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    active: bool,
) -> i64 {
    sqlx::query("INSERT INTO polls (title, start_time, end_time, is_active) VALUES (?, ?, ?, ?)")
        .bind(title)
        .bind(start)
        .bind(end)
        .bind(active)
        .execute(db)
        .await
        .expect("insert poll")
        .last_insert_rowid()
}

pub async fn add_candidate(db: &SqlitePool, poll_id: i64, name: &str) -> i64 {
    sqlx::query("INSERT INTO candidates (name, poll_id) VALUES (?, ?)")
        .bind(name)
        .bind(poll_id)
        .execute(db)
        .await
        .expect("insert candidate")
        .last_insert_rowid()
}

pub async fn add_vote(db: &SqlitePool, user_id: i64, candidate_id: i64, poll_id: i64) -> i64 {
    sqlx::query(
        "INSERT INTO votes (user_id, candidate_id, poll_id, cast_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(candidate_id)
    .bind(poll_id)
    .bind(Utc::now().naive_utc())
    .execute(db)
    .await
    .expect("insert vote")
    .last_insert_rowid()
}

pub async fn count(db: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(db)
        .await
        .expect("count")
}
