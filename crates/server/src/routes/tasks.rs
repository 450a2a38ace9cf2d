use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::models::{Role, Task, TaskStatus},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::{auth::find_user, users::ensure_can_view_user},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/:id", put(update_task).delete(delete_task))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub user_id: Option<String>,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub report_message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
}

async fn find_task(pool: &SqlitePool, id: &str) -> Result<Task> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Task not found".to_string()))
}

fn validate_title(title: &str) -> Result<&str> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Task title is required".to_string()));
    }
    Ok(title)
}

async fn list_tasks(
    State(state): State<AppState>,
    user: AuthUser,
    WithRejection(Query(query), _): WithRejection<Query<ListTasksQuery>, AppError>,
) -> Result<Json<TaskListResponse>> {
    if let Some(target) = &query.user_id {
        ensure_can_view_user(&state.db.pool, &user, target).await?;
    }

    // ?3/?4 scope the listing to what the caller may see when no user is named.
    let (own_only, supervisor_scope) = match (user.role, &query.user_id) {
        (_, Some(_)) | (Role::Admin, None) => (None, None),
        (Role::Supervisor, None) => (None, Some(user.id.clone())),
        (Role::Student, None) => (Some(user.id.clone()), None),
    };

    let tasks = sqlx::query_as::<_, Task>(
        r#"
        SELECT t.* FROM tasks t
        JOIN users u ON t.user_id = u.id
        WHERE (?1 IS NULL OR t.user_id = ?1)
          AND (?2 IS NULL OR t.status = ?2)
          AND (?3 IS NULL OR t.user_id = ?3)
          AND (?4 IS NULL OR u.supervisor_id = ?4 OR t.user_id = ?4)
        ORDER BY t.created_at DESC, t.rowid DESC
        "#,
    )
    .bind(&query.user_id)
    .bind(query.status)
    .bind(&own_only)
    .bind(&supervisor_scope)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(TaskListResponse { tasks }))
}

async fn create_task(
    State(state): State<AppState>,
    user: AuthUser,
    WithRejection(Json(body), _): WithRejection<Json<CreateTaskRequest>, AppError>,
) -> Result<Json<Task>> {
    let title = validate_title(&body.title)?.to_string();
    let owner = find_user(&state.db.pool, &body.user_id).await?;
    ensure_can_view_user(&state.db.pool, &user, &owner.id).await?;

    if let Some(report_id) = &body.report_message_id {
        let report = sqlx::query_as::<_, (String, bool)>(
            "SELECT author_id, is_report FROM chat_messages WHERE id = ?",
        )
        .bind(report_id)
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Report not found".to_string()))?;

        match report {
            (_, false) => {
                return Err(AppError::Validation(
                    "Linked message is not a report".to_string(),
                ))
            }
            (author_id, true) if author_id != owner.id => {
                return Err(AppError::Validation(
                    "Linked report must belong to the task owner".to_string(),
                ))
            }
            _ => {}
        }
    }

    let now = Utc::now().to_rfc3339();
    let task = Task {
        id: Uuid::new_v4().to_string(),
        user_id: owner.id,
        title,
        description: body.description,
        status: TaskStatus::Todo,
        report_message_id: body.report_message_id,
        created_by: user.id.clone(),
        created_at: now.clone(),
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO tasks (id, user_id, title, description, status, report_message_id, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&task.id)
    .bind(&task.user_id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status)
    .bind(&task.report_message_id)
    .bind(&task.created_by)
    .bind(&task.created_at)
    .bind(&task.updated_at)
    .execute(&state.db.pool)
    .await?;

    Ok(Json(task))
}

async fn update_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    WithRejection(Json(body), _): WithRejection<Json<UpdateTaskRequest>, AppError>,
) -> Result<Json<Task>> {
    let mut task = find_task(&state.db.pool, &id).await?;
    ensure_can_view_user(&state.db.pool, &user, &task.user_id)
        .await
        .map_err(|_| AppError::NotFound("Task not found".to_string()))?;

    if let Some(title) = &body.title {
        task.title = validate_title(title)?.to_string();
    }
    if body.description.is_some() {
        task.description = body.description;
    }
    if let Some(status) = body.status {
        task.status = status;
    }
    task.updated_at = Utc::now().to_rfc3339();

    sqlx::query(
        "UPDATE tasks SET title = ?, description = ?, status = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status)
    .bind(&task.updated_at)
    .bind(&task.id)
    .execute(&state.db.pool)
    .await?;

    Ok(Json(task))
}

async fn delete_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<()>> {
    let task = find_task(&state.db.pool, &id).await?;
    ensure_can_view_user(&state.db.pool, &user, &task.user_id)
        .await
        .map_err(|_| AppError::NotFound("Task not found".to_string()))?;
    if task.created_by != user.id && !user.is_admin() {
        return Err(AppError::Forbidden("Cannot delete this task".to_string()));
    }

    sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(()))
}
