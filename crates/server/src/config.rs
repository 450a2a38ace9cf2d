use std::env;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub static_dir: String,
    pub admin: Option<AdminBootstrap>,
}

/// Credentials for the first admin account, created when the users table is empty.
#[derive(Clone)]
pub struct AdminBootstrap {
    pub email: String,
    pub password: String,
    pub name: String,
}

impl Config {
    pub fn from_env() -> Self {
        let admin = match (env::var("ADMIN_EMAIL"), env::var("ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) => Some(AdminBootstrap {
                email,
                password,
                name: env::var("ADMIN_NAME").unwrap_or_else(|_| "Administrator".to_string()),
            }),
            _ => None,
        };

        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/imt-points.db?mode=rwc".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "development-secret-change-in-production".to_string()),
            token_ttl_hours: env::var("TOKEN_TTL_HOURS")
                .ok()
                .and_then(|h| h.parse().ok())
                .filter(|h: &i64| *h > 0)
                .unwrap_or(24 * 7),
            static_dir: env::var("STATIC_DIR").unwrap_or_else(|_| "static".to_string()),
            admin,
        }
    }

    /// Settings for tests: in-memory database, fixed secret, no bootstrap admin.
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            database_url: "sqlite::memory:".to_string(),
            jwt_secret: "test-secret".to_string(),
            token_ttl_hours: 1,
            static_dir: "static".to_string(),
            admin: None,
        }
    }
}
