#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use imt_points_server::{
    app,
    config::Config,
    db::{models::{Role, User}, Database},
    routes::auth::create_token,
    AppState,
};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

/// A user inserted directly into the database, with a ready-made token.
pub struct Seeded {
    pub id: String,
    pub token: String,
}

impl TestApp {
    pub async fn new() -> Self {
        let db = Database::in_memory().await.expect("in-memory database");
        db.run_migrations().await.expect("migrations");
        let state = AppState::new(db, Config::for_tests());
        Self {
            router: app(state.clone()),
            state,
        }
    }

    pub async fn seed_user(&self, name: &str, role: Role, supervisor_id: Option<&str>) -> Seeded {
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            name: name.to_string(),
            password_hash: "not-a-real-hash".to_string(),
            role,
            course_id: None,
            supervisor_id: supervisor_id.map(str::to_string),
            created_at: Utc::now().to_rfc3339(),
        };

        sqlx::query(
            "INSERT INTO users (id, email, name, password_hash, role, supervisor_id, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(&user.supervisor_id)
        .bind(&user.created_at)
        .execute(&self.state.db.pool)
        .await
        .expect("seed user");

        let token = create_token(&user, &self.state.config.jwt_secret, 1).expect("token");
        Seeded { id: user.id, token }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, Some(token), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, Some(token), None).await
    }
}
