use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::models::{ClockingRecord, ClockingType},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::users::ensure_can_view_user,
    services::clocking::{worked_hours, ClockState},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/record", post(record))
        .route("/records", get(list_records))
        .route("/status", get(status))
        .route("/summary", get(summary))
}

#[derive(Debug, Deserialize)]
pub struct RecordRequest {
    #[serde(rename = "type")]
    pub kind: ClockingType,
}

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    pub user_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub user_id: Option<String>,
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RecordListResponse {
    pub records: Vec<ClockingRecord>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: ClockState,
    pub since: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub user_id: String,
    pub days: i64,
    pub sessions: i64,
    pub total_hours: f64,
}

async fn latest_record(pool: &SqlitePool, user_id: &str) -> Result<Option<ClockingRecord>> {
    Ok(sqlx::query_as::<_, ClockingRecord>(
        "SELECT * FROM clocking_records WHERE user_id = ? ORDER BY timestamp DESC, rowid DESC LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?)
}

async fn resolve_target(pool: &SqlitePool, user: &AuthUser, requested: Option<String>) -> Result<String> {
    match requested {
        Some(id) if id != user.id => {
            ensure_can_view_user(pool, user, &id).await?;
            Ok(id)
        }
        _ => Ok(user.id.clone()),
    }
}

async fn record(
    State(state): State<AppState>,
    user: AuthUser,
    WithRejection(Json(body), _): WithRejection<Json<RecordRequest>, AppError>,
) -> Result<Json<ClockingRecord>> {
    let last = latest_record(&state.db.pool, &user.id).await?;
    let current = ClockState::after(last.as_ref().map(|r| r.kind));
    if !current.accepts(body.kind) {
        return Err(AppError::Validation(current.describe_rejection(body.kind)));
    }

    let timestamp = Utc::now().to_rfc3339();
    let total_hours = if body.kind == ClockingType::Out {
        // Everything since the previous OUT belongs to this session.
        let session = sqlx::query_as::<_, (ClockingType, String)>(
            r#"
            SELECT type, timestamp FROM clocking_records
            WHERE user_id = ?1
              AND timestamp > COALESCE(
                  (SELECT MAX(timestamp) FROM clocking_records WHERE user_id = ?1 AND type = ?2),
                  ''
              )
            ORDER BY timestamp ASC, rowid ASC
            "#,
        )
        .bind(&user.id)
        .bind(ClockingType::Out)
        .fetch_all(&state.db.pool)
        .await?;

        Some(worked_hours(&session, &timestamp).ok_or_else(|| {
            AppError::Validation("No clock-in found for this clock-out".to_string())
        })?)
    } else {
        None
    };

    let record = ClockingRecord {
        id: Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        kind: body.kind,
        timestamp,
        total_hours,
    };

    sqlx::query(
        "INSERT INTO clocking_records (id, user_id, type, timestamp, total_hours) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&record.id)
    .bind(&record.user_id)
    .bind(record.kind)
    .bind(&record.timestamp)
    .bind(record.total_hours)
    .execute(&state.db.pool)
    .await?;

    tracing::info!(
        user_id = %user.id,
        kind = ?record.kind,
        total_hours = ?record.total_hours,
        "clocking recorded"
    );

    Ok(Json(record))
}

async fn list_records(
    State(state): State<AppState>,
    user: AuthUser,
    WithRejection(Query(query), _): WithRejection<Query<RecordsQuery>, AppError>,
) -> Result<Json<RecordListResponse>> {
    let target = resolve_target(&state.db.pool, &user, query.user_id).await?;
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);

    let records = sqlx::query_as::<_, ClockingRecord>(
        "SELECT * FROM clocking_records WHERE user_id = ? ORDER BY timestamp DESC, rowid DESC LIMIT ?",
    )
    .bind(&target)
    .bind(limit)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(RecordListResponse { records }))
}

async fn status(State(state): State<AppState>, user: AuthUser) -> Result<Json<StatusResponse>> {
    let last = latest_record(&state.db.pool, &user.id).await?;
    let clock = ClockState::after(last.as_ref().map(|r| r.kind));
    let since = match clock {
        ClockState::Out => None,
        _ => last.map(|r| r.timestamp),
    };
    Ok(Json(StatusResponse {
        state: clock,
        since,
    }))
}

async fn summary(
    State(state): State<AppState>,
    user: AuthUser,
    WithRejection(Query(query), _): WithRejection<Query<SummaryQuery>, AppError>,
) -> Result<Json<SummaryResponse>> {
    let target = resolve_target(&state.db.pool, &user, query.user_id).await?;
    let days = query.days.unwrap_or(7);
    if !(1..=365).contains(&days) {
        return Err(AppError::Validation(
            "days must be between 1 and 365".to_string(),
        ));
    }
    let window_start = (Utc::now() - Duration::days(days)).to_rfc3339();

    let (sessions, total_hours) = sqlx::query_as::<_, (i64, f64)>(
        r#"
        SELECT COUNT(*), COALESCE(SUM(total_hours), 0.0)
        FROM clocking_records
        WHERE user_id = ? AND type = ? AND timestamp >= ?
        "#,
    )
    .bind(&target)
    .bind(ClockingType::Out)
    .bind(&window_start)
    .fetch_one(&state.db.pool)
    .await?;

    Ok(Json(SummaryResponse {
        user_id: target,
        days,
        sessions,
        total_hours: (total_hours * 100.0).round() / 100.0,
    }))
}
