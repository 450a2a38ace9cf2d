use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower::util::ServiceExt;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;

use services::events::PointsHub;

#[derive(Clone)]
pub struct AppState {
    pub db: db::Database,
    pub config: config::Config,
    pub points: PointsHub,
}

impl AppState {
    pub fn new(db: db::Database, config: config::Config) -> Self {
        Self {
            db,
            config,
            points: PointsHub::new(),
        }
    }
}

pub fn app(state: AppState) -> Router {
    // Build protected routes (require authentication, then pass the role gate)
    let protected_routes = Router::new()
        .nest("/auth", routes::auth::account_router())
        .nest("/users", routes::users::router())
        .nest("/supervisors", routes::supervisors::router())
        .nest("/courses", routes::courses::router())
        .nest("/subjects", routes::courses::subjects_router())
        .nest("/points", routes::points::router())
        .nest("/chat", routes::chat::router())
        .nest("/tasks", routes::tasks::router())
        .nest("/clocking", routes::clocking::router())
        .route_layer(axum_middleware::from_fn(
            middleware::access::access_middleware,
        ))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // Build API router
    let api_router = Router::new()
        .nest("/auth", routes::auth::router())
        .merge(protected_routes);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_router)
        .fallback(serve_spa)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn health_check() -> &'static str {
    "OK"
}

// The dashboard is a static build; unknown paths outside /api fall back to its index.
async fn serve_spa(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path().to_string();
    if path.starts_with("/api/") || path == "/api" {
        return error::AppError::NotFound("Route not found".to_string()).into_response();
    }

    let static_dir = std::path::Path::new(&state.config.static_dir);
    if path != "/" && static_dir.join(path.trim_start_matches('/')).is_file() {
        return ServeDir::new(static_dir)
            .oneshot(req)
            .await
            .unwrap_or_else(|never| match never {})
            .into_response();
    }

    match tokio::fs::read(static_dir.join("index.html")).await {
        Ok(contents) => ([(header::CONTENT_TYPE, "text/html")], contents).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}
