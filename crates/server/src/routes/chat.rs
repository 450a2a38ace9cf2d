use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::models::{ChatMessage, Role},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::approval::{check_review, ReportStatus},
    AppState,
};

const MAX_CONTENT_LEN: usize = 4000;
const DEFAULT_PAGE: i64 = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/messages", get(list_messages).post(create_message))
        .route("/messages/:id", get(get_message).delete(delete_message))
        .route("/messages/:id/approval", put(review_report))
        .route("/messages/:id/view", post(mark_viewed))
        .route("/unread", get(unread_count))
        .route("/reports", get(list_reports))
}

// Plain messages are public to every signed-in user; reports are visible to
// their author, the author's supervisor and admins.
// ?1 = caller is admin, ?2 = caller id.
const MESSAGE_SELECT: &str = r#"
    SELECT m.id, m.author_id, m.content, m.reply_to_id, m.is_report, m.approved,
           m.reviewed_by, m.reviewed_at, m.created_at,
           a.name AS author_name, a.role AS author_role,
           EXISTS (
               SELECT 1 FROM message_views v WHERE v.message_id = m.id AND v.user_id = ?2
           ) AS viewed
    FROM chat_messages m
    JOIN users a ON m.author_id = a.id
    WHERE (m.is_report = 0 OR ?1 OR m.author_id = ?2 OR a.supervisor_id = ?2)
"#;

#[derive(Debug, sqlx::FromRow)]
pub struct MessageRow {
    #[sqlx(flatten)]
    message: ChatMessage,
    author_name: String,
    author_role: Role,
    viewed: bool,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub author_name: String,
    pub author_role: Role,
    pub viewed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReportStatus>,
}

impl From<MessageRow> for MessageResponse {
    fn from(row: MessageRow) -> Self {
        let status = row
            .message
            .is_report
            .then(|| ReportStatus::of(row.message.approved));
        Self {
            message: row.message,
            author_name: row.author_name,
            author_role: row.author_role,
            viewed: row.viewed,
            status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    pub messages: Vec<MessageResponse>,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub limit: Option<i64>,
    /// Only messages created strictly before this timestamp.
    pub before: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub content: String,
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub is_report: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub approved: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReportsQuery {
    pub status: Option<ReportStatus>,
}

#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub count: i64,
}

async fn fetch_visible(pool: &SqlitePool, viewer: &AuthUser, id: &str) -> Result<MessageRow> {
    sqlx::query_as::<_, MessageRow>(&format!("{MESSAGE_SELECT} AND m.id = ?3"))
        .bind(viewer.is_admin())
        .bind(&viewer.id)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Message not found".to_string()))
}

async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    WithRejection(Query(query), _): WithRejection<Query<ListMessagesQuery>, AppError>,
) -> Result<Json<MessageListResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, 500);

    let rows = sqlx::query_as::<_, MessageRow>(&format!(
        "{MESSAGE_SELECT} AND (?3 IS NULL OR m.created_at < ?3) \
         ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?4"
    ))
    .bind(user.is_admin())
    .bind(&user.id)
    .bind(&query.before)
    .bind(limit)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(MessageListResponse {
        messages: rows.into_iter().map(MessageResponse::from).collect(),
    }))
}

async fn create_message(
    State(state): State<AppState>,
    user: AuthUser,
    WithRejection(Json(body), _): WithRejection<Json<CreateMessageRequest>, AppError>,
) -> Result<Json<MessageResponse>> {
    let content = body.content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("Message content is required".to_string()));
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(AppError::Validation(format!(
            "Message must be at most {MAX_CONTENT_LEN} characters"
        )));
    }

    if let Some(reply_to_id) = &body.reply_to_id {
        fetch_visible(&state.db.pool, &user, reply_to_id).await?;
    }

    if body.is_report {
        if user.role != Role::Student {
            return Err(AppError::Forbidden(
                "Only students can file reports".to_string(),
            ));
        }
        let supervisor = sqlx::query_scalar::<_, Option<String>>(
            "SELECT supervisor_id FROM users WHERE id = ?",
        )
        .bind(&user.id)
        .fetch_optional(&state.db.pool)
        .await?
        .flatten();
        if supervisor.is_none() {
            return Err(AppError::Validation(
                "You have no assigned supervisor to review reports".to_string(),
            ));
        }
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO chat_messages (id, author_id, content, reply_to_id, is_report, approved, created_at) VALUES (?, ?, ?, ?, ?, NULL, ?)",
    )
    .bind(&id)
    .bind(&user.id)
    .bind(content)
    .bind(&body.reply_to_id)
    .bind(body.is_report)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db.pool)
    .await?;

    if body.is_report {
        tracing::info!(message_id = %id, author_id = %user.id, "report filed");
    }

    let row = fetch_visible(&state.db.pool, &user, &id).await?;
    Ok(Json(row.into()))
}

async fn get_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    let row = fetch_visible(&state.db.pool, &user, &id).await?;
    Ok(Json(row.into()))
}

async fn delete_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<()>> {
    let row = fetch_visible(&state.db.pool, &user, &id).await?;
    if row.message.author_id != user.id && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Cannot delete this message".to_string(),
        ));
    }

    sqlx::query("DELETE FROM chat_messages WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(()))
}

async fn review_report(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    WithRejection(Json(body), _): WithRejection<Json<ReviewRequest>, AppError>,
) -> Result<Json<MessageResponse>> {
    let row = fetch_visible(&state.db.pool, &user, &id).await?;

    let author_supervisor = sqlx::query_scalar::<_, Option<String>>(
        "SELECT supervisor_id FROM users WHERE id = ?",
    )
    .bind(&row.message.author_id)
    .fetch_optional(&state.db.pool)
    .await?
    .flatten();

    check_review(&row.message, author_supervisor.as_deref(), &user)?;

    // The NULL guard keeps a concurrent second review from overwriting the first.
    let updated = sqlx::query(
        "UPDATE chat_messages SET approved = ?, reviewed_by = ?, reviewed_at = ? WHERE id = ? AND approved IS NULL",
    )
    .bind(body.approved)
    .bind(&user.id)
    .bind(Utc::now().to_rfc3339())
    .bind(&id)
    .execute(&state.db.pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::Conflict(
            "Report has already been reviewed".to_string(),
        ));
    }

    tracing::info!(
        message_id = %id,
        reviewer_id = %user.id,
        approved = body.approved,
        "report reviewed"
    );

    let row = fetch_visible(&state.db.pool, &user, &id).await?;
    Ok(Json(row.into()))
}

async fn mark_viewed(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    fetch_visible(&state.db.pool, &user, &id).await?;

    sqlx::query("INSERT OR IGNORE INTO message_views (message_id, user_id, viewed_at) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(&user.id)
        .bind(Utc::now().to_rfc3339())
        .execute(&state.db.pool)
        .await?;

    Ok(Json(serde_json::json!({ "viewed": true })))
}

async fn unread_count(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<UnreadResponse>> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM chat_messages m
        JOIN users a ON m.author_id = a.id
        WHERE (m.is_report = 0 OR ?1 OR m.author_id = ?2 OR a.supervisor_id = ?2)
          AND m.author_id != ?2
          AND NOT EXISTS (
              SELECT 1 FROM message_views v WHERE v.message_id = m.id AND v.user_id = ?2
          )
        "#,
    )
    .bind(user.is_admin())
    .bind(&user.id)
    .fetch_one(&state.db.pool)
    .await?;

    Ok(Json(UnreadResponse { count }))
}

async fn list_reports(
    State(state): State<AppState>,
    user: AuthUser,
    WithRejection(Query(query), _): WithRejection<Query<ReportsQuery>, AppError>,
) -> Result<Json<MessageListResponse>> {
    let status_clause = match query.status {
        None => "",
        Some(ReportStatus::Pending) => " AND m.approved IS NULL",
        Some(ReportStatus::Approved) => " AND m.approved = 1",
        Some(ReportStatus::Rejected) => " AND m.approved = 0",
    };

    let rows = sqlx::query_as::<_, MessageRow>(&format!(
        "{MESSAGE_SELECT} AND m.is_report = 1{status_clause} ORDER BY m.created_at DESC, m.rowid DESC"
    ))
    .bind(user.is_admin())
    .bind(&user.id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(MessageListResponse {
        messages: rows.into_iter().map(MessageResponse::from).collect(),
    }))
}
