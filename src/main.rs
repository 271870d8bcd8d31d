mod db;
mod error;
mod models;
mod results;
mod routes;
mod state;
#[cfg(test)]
mod test_support;
mod voting;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use clap::Parser;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;

use state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    port: u16,

    /// Database path
    #[arg(short, long, env = "DATABASE_PATH", default_value = "voting.db")]
    db_path: String,

    /// Session lifetime in hours (one policy for every role)
    #[arg(long, env = "SESSION_TTL_HOURS", default_value_t = 6)]
    session_ttl_hours: i64,

    /// Admin username for first run
    #[arg(long, env = "ADMIN_USER")]
    admin_user: Option<String>,

    /// Admin email for first run
    #[arg(long, env = "ADMIN_EMAIL")]
    admin_email: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let port = args.port;

    // JWT secret: from env, from file, or generate and save to file
    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
        let secret_path = std::path::Path::new("jwt_secret.key");
        if let Ok(saved) = std::fs::read_to_string(secret_path) {
            let saved = saved.trim().to_string();
            if !saved.is_empty() {
                tracing::info!("Loaded JWT secret from jwt_secret.key");
                return saved;
            }
        }
        // Generate new secret and persist it
        use rand::Rng;
        let secret: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(64)
            .map(char::from)
            .collect();
        if let Err(e) = std::fs::write(secret_path, &secret) {
            tracing::warn!("Could not save JWT secret to file: {e}");
        } else {
            tracing::info!("Generated and saved JWT secret to jwt_secret.key");
        }
        secret
    });

    tracing::info!("Initializing database at {}", args.db_path);
    let pool = db::init_pool(&args.db_path).await;

    // --- First-Run Admin Control ---
    if let Some(username) = args.admin_user {
        let user_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap_or(0);

        if user_count == 0 {
            use rand::Rng;

            let temp_password: String = rand::thread_rng()
                .sample_iter(&rand::distributions::Alphanumeric)
                .take(12)
                .map(char::from)
                .collect();

            let password_hash = routes::auth::hash_password(&temp_password)
                .expect("Failed to hash password");
            let email = args
                .admin_email
                .unwrap_or_else(|| format!("{username}@localhost"));

            sqlx::query(
                "INSERT INTO users (username, email, phone, password_hash, role) VALUES (?, ?, '', ?, 'admin')",
            )
            .bind(&username)
            .bind(&email)
            .bind(&password_hash)
            .execute(&pool)
            .await
            .expect("Failed to create admin user");

            println!();
            println!("  ╔══════════════════════════════════════════════╗");
            println!("  ║          FIRST-RUN ADMIN CREATED!            ║");
            println!("  ╠══════════════════════════════════════════════╣");
            println!("  ║  Username: {:<34}║", username);
            println!("  ║  Password: {:<34}║", temp_password);
            println!("  ╠══════════════════════════════════════════════╣");
            println!("  ║  PLEASE SAVE THESE CREDENTIALS NOW!          ║");
            println!("  ╚══════════════════════════════════════════════╝");
            println!();
        }
    }

    let state = AppState::new(pool, jwt_secret, args.session_ttl_hours);

    let limiter = state.auth_rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            limiter.cleanup();
        }
    });

    let public = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login));

    let protected = Router::new()
        // Session
        .route("/logout", get(routes::auth::logout))
        .route("/me", get(routes::auth::get_me))
        // Admin
        .route("/admin/dashboard", get(routes::admin::dashboard))
        .route("/admin/add_user", post(routes::admin::add_user))
        .route("/admin/update_user/{id}", put(routes::admin::update_user))
        .route("/admin/delete_user/{id}", delete(routes::admin::delete_user))
        .route("/admin/add_poll", post(routes::admin::add_poll))
        .route(
            "/admin/add_poll_with_candidates",
            post(routes::admin::add_poll_with_candidates),
        )
        .route("/admin/add_candidate", post(routes::admin::add_candidate))
        .route("/admin/start_poll/{id}", post(routes::admin::start_poll))
        .route("/admin/stop_poll/{id}", post(routes::admin::stop_poll))
        .route("/admin/delete_poll/{id}", delete(routes::admin::delete_poll))
        .route("/admin/poll_stats/{id}", get(routes::admin::poll_stats))
        .route("/admin/results", get(routes::admin::all_results))
        .route("/admin/pause_voting", post(routes::admin::pause_voting))
        .route("/admin/resume_voting", post(routes::admin::resume_voting))
        // User
        .route("/user/dashboard", get(routes::user::dashboard))
        .route("/user/get_polls", get(routes::user::get_polls))
        .route("/vote", post(routes::user::vote))
        .route("/user/vote", post(routes::user::vote))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            routes::auth::auth_middleware,
        ));

    let app = public
        .merge(protected)
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("ballotbox listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
