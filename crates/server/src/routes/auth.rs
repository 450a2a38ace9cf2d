use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{
    db::models::{Role, User},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

/// Public routes (no token required).
pub fn router() -> Router<AppState> {
    Router::new().route("/login", post(login))
}

/// Routes that act on the signed-in account.
pub fn account_router() -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/password", post(change_password))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub email: String,
    pub name: String,
    pub role: Role,
    pub exp: usize,
}

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| AppError::Internal("Failed to hash password".to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn create_token(user: &User, secret: &str, ttl_hours: i64) -> Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(chrono::Duration::hours(ttl_hours))
        .ok_or_else(|| AppError::Internal("Token expiry out of range".to_string()))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        name: user.name.clone(),
        role: user.role,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::Internal("Failed to create token".to_string()))
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized)
}

pub async fn find_user(pool: &sqlx::SqlitePool, id: &str) -> Result<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

async fn login(
    State(state): State<AppState>,
    WithRejection(Json(body), _): WithRejection<Json<LoginRequest>, AppError>,
) -> Result<Json<AuthResponse>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(body.email.trim().to_lowercase())
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if !verify_password(&body.password, &user.password_hash)? {
        tracing::debug!(email = %user.email, "login rejected");
        return Err(AppError::Unauthorized);
    }

    let token = create_token(&user, &state.config.jwt_secret, state.config.token_ttl_hours)?;
    tracing::info!(user_id = %user.id, role = %user.role, "user signed in");

    Ok(Json(AuthResponse { token, user }))
}

async fn me(State(state): State<AppState>, user: AuthUser) -> Result<Json<User>> {
    // The token may outlive the account.
    let user = find_user(&state.db.pool, &user.id)
        .await
        .map_err(|_| AppError::Unauthorized)?;
    Ok(Json(user))
}

async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    WithRejection(Json(body), _): WithRejection<Json<ChangePasswordRequest>, AppError>,
) -> Result<Json<serde_json::Value>> {
    if body.new_password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let account = find_user(&state.db.pool, &user.id)
        .await
        .map_err(|_| AppError::Unauthorized)?;
    if !verify_password(&body.current_password, &account.password_hash)? {
        return Err(AppError::Unauthorized);
    }

    let password_hash = hash_password(&body.new_password)?;
    sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
        .bind(&password_hash)
        .bind(&user.id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(serde_json::json!({})))
}
