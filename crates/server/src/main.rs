use std::net::SocketAddr;

use imt_points_server::{app, config, db, routes::auth::hash_password, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imt_points_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::from_env();

    // Initialize database
    let db = db::Database::connect(&config.database_url).await?;
    db.run_migrations().await?;

    if let Some(admin) = &config.admin {
        let password_hash = hash_password(&admin.password)?;
        let email = admin.email.trim().to_lowercase();
        if db.bootstrap_admin(&email, &admin.name, &password_hash).await? {
            tracing::info!(%email, "bootstrap admin created");
        }
    }

    let state = AppState::new(db, config.clone());
    let app = app(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
