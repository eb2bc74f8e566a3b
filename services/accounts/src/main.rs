//! Multi-tenant accounts service: users, groups, notes, diplomas and the
//! organization-defined custom profile fields, scoped per site and filtered
//! by the requester's role.

mod auth;
mod error;
mod fields;
mod handlers;
mod lifecycle;
mod notify;
mod state;
mod store;
mod transfer;
mod visibility;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::Method,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::handlers::{diplomas, groups, notes, users};
use crate::notify::LogNotifier;
use crate::state::AppState;
use crate::store::{DirectoryStore, MemoryStore, PostgresStore};

/// Lightweight health probe used by readiness checks and dashboards.
async fn health() -> Json<serde_json::Value> {
    Json(json!({"status":"ok"}))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store: Arc<dyn DirectoryStore> = match std::env::var("DATABASE_URL") {
        Ok(db_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&db_url)
                .await
                .expect("failed to connect to postgres");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("failed to run migrations");

            Arc::new(PostgresStore::new(pool))
        }
        Err(_) => {
            // keeps local frontend work unblocked while the database is
            // still being provisioned
            tracing::warn!("DATABASE_URL not set, falling back to the in-memory store");
            Arc::new(
                MemoryStore::seeded()
                    .await
                    .expect("failed to seed in-memory store"),
            )
        }
    };

    let jwt_secret =
        std::env::var("JWT_SECRET").unwrap_or_else(|_| "dev_secret_change_me".to_string());
    let state = AppState::new(store, Arc::new(LogNotifier), &jwt_secret);

    let port = std::env::var("ACCOUNTS_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8081);

    // Frontend and API live on different origins during local development so
    // we allow every origin/method while prototyping. Tighten before
    // production.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/users", get(users::list).post(users::register))
        .route("/users/profile", get(users::profile))
        .route("/users/activate", get(users::activate))
        .route("/users/register", post(users::register))
        .route("/users/password_reset", post(users::password_reset))
        .route("/users/batch_reset", post(users::batch_reset))
        .route("/users/batch_delete", post(users::batch_delete))
        .route("/users/sales", get(users::sales))
        .route("/users/export", get(users::export))
        .route("/users/import", post(users::import))
        .route(
            "/users/:id",
            get(users::detail).put(users::update).delete(users::destroy),
        )
        .route("/users/:id/password_change", post(users::password_change))
        .route("/users/:id/my_student", get(users::my_student))
        .route("/users/:id/purge", post(users::purge))
        .route("/fields", get(users::field_schema))
        .route("/groups", get(groups::list).post(groups::create))
        .route("/groups/batch_delete", post(groups::batch_delete))
        .route(
            "/groups/:id",
            get(groups::detail)
                .put(groups::update)
                .delete(groups::destroy),
        )
        .route("/notes", get(notes::list).post(notes::create))
        .route(
            "/notes/:id",
            get(notes::detail).put(notes::update).delete(notes::destroy),
        )
        .route("/diplomas", get(diplomas::list).post(diplomas::create))
        .route(
            "/diplomas/:id",
            get(diplomas::detail)
                .put(diplomas::update)
                .delete(diplomas::destroy),
        )
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "accounts service starting");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, %addr, "failed to bind accounts listener");
            return;
        }
    };

    if let Err(error) = axum::serve(listener, app).await {
        tracing::error!(%error, "accounts server exited with error");
    }
}
