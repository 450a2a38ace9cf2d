use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::{
    db::models::{Role, User},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::auth::find_user,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_supervisors))
        .route("/:id/students", get(list_students))
}

#[derive(Debug, Serialize)]
pub struct SupervisorSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub student_count: i64,
}

#[derive(Debug, Serialize)]
pub struct SupervisorListResponse {
    pub supervisors: Vec<SupervisorSummary>,
}

#[derive(Debug, Serialize)]
pub struct StudentListResponse {
    pub students: Vec<User>,
}

async fn list_supervisors(State(state): State<AppState>) -> Result<Json<SupervisorListResponse>> {
    let rows = sqlx::query_as::<_, (String, String, String, i64)>(
        r#"
        SELECT s.id, s.name, s.email, COUNT(st.id)
        FROM users s
        LEFT JOIN users st ON st.supervisor_id = s.id
        WHERE s.role = ?
        GROUP BY s.id, s.name, s.email
        ORDER BY s.name ASC
        "#,
    )
    .bind(Role::Supervisor)
    .fetch_all(&state.db.pool)
    .await?;

    let supervisors = rows
        .into_iter()
        .map(|(id, name, email, student_count)| SupervisorSummary {
            id,
            name,
            email,
            student_count,
        })
        .collect();

    Ok(Json(SupervisorListResponse { supervisors }))
}

async fn list_students(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<StudentListResponse>> {
    if !user.is_admin() && user.id != id {
        return Err(AppError::Forbidden(
            "You can only list your own students".to_string(),
        ));
    }

    let supervisor = find_user(&state.db.pool, &id).await?;
    if supervisor.role != Role::Supervisor {
        return Err(AppError::NotFound("Supervisor not found".to_string()));
    }

    let students = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE supervisor_id = ? ORDER BY name ASC",
    )
    .bind(&id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(StudentListResponse { students }))
}
