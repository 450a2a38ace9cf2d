use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::models::{Point, Role},
    error::{AppError, Result},
    handlers::sse::points_stream,
    middleware::auth::AuthUser,
    routes::{
        auth::find_user,
        users::{ensure_can_view_user, is_supervisor_of},
    },
    services::{
        events::PointsEvent,
        ledger::{daily_history, rank_leaderboard, HistoryDay, LeaderboardEntry, StudentTotal},
    },
    AppState,
};

const DEFAULT_LIMIT: i64 = 100;
const MAX_HISTORY_DAYS: u32 = 365;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_points).post(grant_points))
        .route("/total/:user_id", get(get_total))
        .route("/leaderboard", get(leaderboard))
        .route("/history/:user_id", get(history))
        .route("/stream", get(points_stream))
}

#[derive(Debug, Deserialize)]
pub struct GrantPointsRequest {
    pub user_id: String,
    pub amount: i64,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListPointsQuery {
    pub user_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
    pub course_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PointResponse {
    #[serde(flatten)]
    pub point: Point,
    pub user_name: String,
    pub granted_by_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PointListResponse {
    pub points: Vec<PointResponse>,
}

#[derive(Debug, Serialize)]
pub struct TotalResponse {
    pub user_id: String,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub user_id: String,
    pub total: i64,
    pub days: Vec<HistoryDay>,
}

/// Totals are never stored; they are summed from the ledger on every read.
pub async fn ledger_total(pool: &SqlitePool, user_id: &str) -> Result<i64> {
    Ok(sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(SUM(amount), 0) FROM points WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?)
}

async fn grant_points(
    State(state): State<AppState>,
    user: AuthUser,
    WithRejection(Json(body), _): WithRejection<Json<GrantPointsRequest>, AppError>,
) -> Result<Json<Point>> {
    if body.amount == 0 {
        return Err(AppError::Validation("Amount must not be zero".to_string()));
    }

    let target = find_user(&state.db.pool, &body.user_id).await?;
    if target.role != Role::Student {
        return Err(AppError::Validation(
            "Points can only be granted to students".to_string(),
        ));
    }
    if user.role == Role::Supervisor && !is_supervisor_of(&state.db.pool, &user.id, &target.id).await? {
        return Err(AppError::Forbidden(
            "You can only grant points to your own students".to_string(),
        ));
    }

    let point = Point {
        id: Uuid::new_v4().to_string(),
        user_id: target.id,
        amount: body.amount,
        note: body
            .note
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
        granted_by: user.id.clone(),
        created_at: Utc::now().to_rfc3339(),
    };

    sqlx::query(
        "INSERT INTO points (id, user_id, amount, note, granted_by, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&point.id)
    .bind(&point.user_id)
    .bind(point.amount)
    .bind(&point.note)
    .bind(&point.granted_by)
    .bind(&point.created_at)
    .execute(&state.db.pool)
    .await?;

    let total = ledger_total(&state.db.pool, &point.user_id).await?;
    let notified = state.points.publish(PointsEvent {
        user_id: point.user_id.clone(),
        amount: point.amount,
        total,
        note: point.note.clone(),
        created_at: point.created_at.clone(),
    });

    tracing::info!(
        user_id = %point.user_id,
        granted_by = %user.id,
        amount = point.amount,
        total,
        notified,
        "points granted"
    );

    Ok(Json(point))
}

async fn list_points(
    State(state): State<AppState>,
    user: AuthUser,
    WithRejection(Query(query), _): WithRejection<Query<ListPointsQuery>, AppError>,
) -> Result<Json<PointListResponse>> {
    let (user_filter, supervisor_filter) = match (user.role, query.user_id) {
        (Role::Student, Some(id)) if id != user.id => {
            return Err(AppError::Forbidden(
                "You can only view your own points".to_string(),
            ))
        }
        (Role::Student, _) => (Some(user.id.clone()), None),
        (_, Some(id)) => {
            ensure_can_view_user(&state.db.pool, &user, &id).await?;
            (Some(id), None)
        }
        (Role::Supervisor, None) => (None, Some(user.id.clone())),
        (Role::Admin, None) => (None, None),
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 1000);

    let rows = sqlx::query_as::<_, (String, String, i64, Option<String>, String, String, String, Option<String>)>(
        r#"
        SELECT p.id, p.user_id, p.amount, p.note, p.granted_by, p.created_at, u.name, g.name
        FROM points p
        JOIN users u ON p.user_id = u.id
        LEFT JOIN users g ON p.granted_by = g.id
        WHERE (?1 IS NULL OR p.user_id = ?1)
          AND (?2 IS NULL OR u.supervisor_id = ?2)
        ORDER BY p.created_at DESC, p.rowid DESC
        LIMIT ?3
        "#,
    )
    .bind(&user_filter)
    .bind(&supervisor_filter)
    .bind(limit)
    .fetch_all(&state.db.pool)
    .await?;

    let points = rows
        .into_iter()
        .map(
            |(id, user_id, amount, note, granted_by, created_at, user_name, granted_by_name)| {
                PointResponse {
                    point: Point {
                        id,
                        user_id,
                        amount,
                        note,
                        granted_by,
                        created_at,
                    },
                    user_name,
                    granted_by_name,
                }
            },
        )
        .collect();

    Ok(Json(PointListResponse { points }))
}

async fn get_total(
    State(state): State<AppState>,
    user: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<TotalResponse>> {
    let target = find_user(&state.db.pool, &user_id).await?;
    ensure_can_view_user(&state.db.pool, &user, &target.id).await?;

    let total = ledger_total(&state.db.pool, &target.id).await?;
    Ok(Json(TotalResponse {
        user_id: target.id,
        total,
    }))
}

async fn leaderboard(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<LeaderboardQuery>, AppError>,
) -> Result<Json<LeaderboardResponse>> {
    let rows = sqlx::query_as::<_, (String, String, Option<String>, i64)>(
        r#"
        SELECT u.id, u.name, u.course_id, COALESCE(SUM(p.amount), 0)
        FROM users u
        LEFT JOIN points p ON p.user_id = u.id
        WHERE u.role = ?1 AND (?2 IS NULL OR u.course_id = ?2)
        GROUP BY u.id, u.name, u.course_id
        "#,
    )
    .bind(Role::Student)
    .bind(&query.course_id)
    .fetch_all(&state.db.pool)
    .await?;

    let totals = rows
        .into_iter()
        .map(|(user_id, name, course_id, total)| StudentTotal {
            user_id,
            name,
            course_id,
            total,
        })
        .collect();

    let mut entries = rank_leaderboard(totals);
    if let Some(limit) = query.limit {
        entries.truncate(limit);
    }

    Ok(Json(LeaderboardResponse { entries }))
}

async fn history(
    State(state): State<AppState>,
    user: AuthUser,
    Path(user_id): Path<String>,
    WithRejection(Query(query), _): WithRejection<Query<HistoryQuery>, AppError>,
) -> Result<Json<HistoryResponse>> {
    let target = find_user(&state.db.pool, &user_id).await?;
    ensure_can_view_user(&state.db.pool, &user, &target.id).await?;

    let days = query.days.unwrap_or(30);
    if days == 0 || days > MAX_HISTORY_DAYS {
        return Err(AppError::Validation(format!(
            "days must be between 1 and {MAX_HISTORY_DAYS}"
        )));
    }

    let entries = sqlx::query_as::<_, (String, i64)>(
        "SELECT created_at, amount FROM points WHERE user_id = ? ORDER BY created_at ASC",
    )
    .bind(&target.id)
    .fetch_all(&state.db.pool)
    .await?;

    let total = entries.iter().map(|(_, amount)| amount).sum();
    let days = daily_history(&entries, Utc::now().date_naive(), days);

    Ok(Json(HistoryResponse {
        user_id: target.id,
        total,
        days,
    }))
}
