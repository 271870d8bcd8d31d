use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Open (creating if missing) the SQLite database and apply migrations.
/// Foreign keys are enabled on every connection; the vote and candidate
/// cascades depend on them.
pub async fn init_pool(db_path: &str) -> SqlitePool {
    if let Some(parent) = Path::new(db_path).parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
        .expect("invalid database path")
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .expect("Failed to connect to SQLite");

    run_migrations(&pool).await;

    pool
}

async fn run_migrations(pool: &SqlitePool) {
    if let Err(e) = sqlx::migrate!("./migrations").run(pool).await {
        tracing::error!("Database migration failed: {}", e);
        // We probably shouldn't continue if migrations failed
        panic!("Database migration failed: {}", e);
    }

    tracing::info!("Database migrations applied successfully");
}

/// In-memory pool for tests. A single connection keeps every query on the
/// same memory database.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("memory options")
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("Failed to open in-memory SQLite");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");

    pool
}
