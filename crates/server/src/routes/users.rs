use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use serde::{Deserialize, Deserializer};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::models::{Role, User},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::auth::{find_user, hash_password, MIN_PASSWORD_LEN},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:id", get(get_user).put(update_user).delete(delete_user))
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<Role>,
    pub course_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Role,
    pub course_id: Option<String>,
    pub supervisor_id: Option<String>,
}

// Absent field => None, explicit null => Some(None).
fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub role: Option<Role>,
    #[serde(default, deserialize_with = "double_option")]
    pub course_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub supervisor_id: Option<Option<String>>,
}

#[derive(Debug, serde::Serialize)]
pub struct UserListResponse {
    pub users: Vec<User>,
}

/// Whether `student_id` is assigned to `supervisor_id`.
pub async fn is_supervisor_of(
    pool: &SqlitePool,
    supervisor_id: &str,
    student_id: &str,
) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE id = ? AND supervisor_id = ?",
    )
    .bind(student_id)
    .bind(supervisor_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Admins see everyone, supervisors see themselves and their students,
/// students see themselves.
pub async fn ensure_can_view_user(pool: &SqlitePool, viewer: &AuthUser, target_id: &str) -> Result<()> {
    if viewer.is_admin() || viewer.id == target_id {
        return Ok(());
    }
    if viewer.role == Role::Supervisor && is_supervisor_of(pool, &viewer.id, target_id).await? {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "You cannot access this user's data".to_string(),
    ))
}

fn require_admin(user: &AuthUser) -> Result<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Admin access required".to_string()))
    }
}

async fn check_supervisor_ref(pool: &SqlitePool, supervisor_id: &str) -> Result<()> {
    let role = sqlx::query_scalar::<_, Role>("SELECT role FROM users WHERE id = ?")
        .bind(supervisor_id)
        .fetch_optional(pool)
        .await?;
    match role {
        Some(Role::Supervisor) => Ok(()),
        Some(_) => Err(AppError::Validation(
            "Assigned supervisor must have the SUPERVISOR role".to_string(),
        )),
        None => Err(AppError::Validation("Supervisor not found".to_string())),
    }
}

async fn check_course_ref(pool: &SqlitePool, course_id: &str) -> Result<()> {
    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM courses WHERE id = ?")
        .bind(course_id)
        .fetch_one(pool)
        .await?;
    if exists == 0 {
        return Err(AppError::Validation("Course not found".to_string()));
    }
    Ok(())
}

async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
    WithRejection(Query(query), _): WithRejection<Query<ListUsersQuery>, AppError>,
) -> Result<Json<UserListResponse>> {
    let supervisor_filter = (user.role == Role::Supervisor).then(|| user.id.clone());

    let users = sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        WHERE (?1 IS NULL OR role = ?1)
          AND (?2 IS NULL OR course_id = ?2)
          AND (?3 IS NULL OR supervisor_id = ?3)
        ORDER BY name ASC
        "#,
    )
    .bind(query.role)
    .bind(&query.course_id)
    .bind(&supervisor_filter)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(UserListResponse { users }))
}

async fn create_user(
    State(state): State<AppState>,
    user: AuthUser,
    WithRejection(Json(body), _): WithRejection<Json<CreateUserRequest>, AppError>,
) -> Result<Json<User>> {
    require_admin(&user)?;

    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if body.name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    if body.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE email = ?")
        .bind(&email)
        .fetch_one(&state.db.pool)
        .await?;
    if existing > 0 {
        return Err(AppError::Validation("Email already registered".to_string()));
    }

    if let Some(supervisor_id) = &body.supervisor_id {
        check_supervisor_ref(&state.db.pool, supervisor_id).await?;
    }
    if let Some(course_id) = &body.course_id {
        check_course_ref(&state.db.pool, course_id).await?;
    }

    let password_hash = hash_password(&body.password)?;
    let new_user = User {
        id: Uuid::new_v4().to_string(),
        email,
        name: body.name.trim().to_string(),
        password_hash,
        role: body.role,
        course_id: body.course_id,
        supervisor_id: body.supervisor_id,
        created_at: Utc::now().to_rfc3339(),
    };

    sqlx::query(
        "INSERT INTO users (id, email, name, password_hash, role, course_id, supervisor_id, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&new_user.id)
    .bind(&new_user.email)
    .bind(&new_user.name)
    .bind(&new_user.password_hash)
    .bind(new_user.role)
    .bind(&new_user.course_id)
    .bind(&new_user.supervisor_id)
    .bind(&new_user.created_at)
    .execute(&state.db.pool)
    .await?;

    tracing::info!(user_id = %new_user.id, role = %new_user.role, "user created");

    Ok(Json(new_user))
}

async fn get_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<User>> {
    let target = find_user(&state.db.pool, &id).await?;
    // Hide existence of users outside the caller's scope.
    ensure_can_view_user(&state.db.pool, &user, &target.id)
        .await
        .map_err(|_| AppError::NotFound("User not found".to_string()))?;
    Ok(Json(target))
}

async fn update_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    WithRejection(Json(body), _): WithRejection<Json<UpdateUserRequest>, AppError>,
) -> Result<Json<User>> {
    require_admin(&user)?;
    let mut target = find_user(&state.db.pool, &id).await?;

    if let Some(name) = body.name {
        if name.trim().is_empty() {
            return Err(AppError::Validation("Name is required".to_string()));
        }
        target.name = name.trim().to_string();
    }
    if let Some(course_id) = body.course_id {
        if let Some(course_id) = &course_id {
            check_course_ref(&state.db.pool, course_id).await?;
        }
        target.course_id = course_id;
    }
    if let Some(supervisor_id) = body.supervisor_id {
        if let Some(supervisor_id) = &supervisor_id {
            if *supervisor_id == target.id {
                return Err(AppError::Validation(
                    "A user cannot supervise themselves".to_string(),
                ));
            }
            check_supervisor_ref(&state.db.pool, supervisor_id).await?;
        }
        target.supervisor_id = supervisor_id;
    }

    if target.role == Role::Admin && matches!(body.role, Some(role) if role != Role::Admin) {
        let admins = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE role = ?")
            .bind(Role::Admin)
            .fetch_one(&state.db.pool)
            .await?;
        if admins <= 1 {
            return Err(AppError::Validation(
                "Cannot change the role of the last admin".to_string(),
            ));
        }
    }

    let demoted_supervisor = matches!(body.role, Some(role) if role != Role::Supervisor)
        && target.role == Role::Supervisor;
    if let Some(role) = body.role {
        target.role = role;
    }

    sqlx::query("UPDATE users SET name = ?, role = ?, course_id = ?, supervisor_id = ? WHERE id = ?")
        .bind(&target.name)
        .bind(target.role)
        .bind(&target.course_id)
        .bind(&target.supervisor_id)
        .bind(&target.id)
        .execute(&state.db.pool)
        .await?;

    if demoted_supervisor {
        // Students may only be assigned to a SUPERVISOR.
        let released = sqlx::query("UPDATE users SET supervisor_id = NULL WHERE supervisor_id = ?")
            .bind(&target.id)
            .execute(&state.db.pool)
            .await?
            .rows_affected();
        tracing::info!(user_id = %target.id, released, "supervisor demoted, students unassigned");
    }

    Ok(Json(target))
}

async fn delete_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<()>> {
    require_admin(&user)?;
    if id == user.id {
        return Err(AppError::Validation(
            "You cannot delete your own account".to_string(),
        ));
    }

    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    tracing::info!(user_id = %id, "user deleted");
    Ok(Json(()))
}
