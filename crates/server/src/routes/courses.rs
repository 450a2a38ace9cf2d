use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::models::{Course, Subject},
    error::{AppError, Result},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_courses).post(create_course))
        .route(
            "/:id",
            get(get_course).put(update_course).delete(delete_course),
        )
        .route("/:id/subjects", get(list_subjects).post(create_subject))
}

pub fn subjects_router() -> Router<AppState> {
    Router::new().route("/:id", delete(delete_subject))
}

#[derive(Debug, Deserialize)]
pub struct CourseRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSubjectRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CourseResponse {
    #[serde(flatten)]
    pub course: Course,
    pub subjects: Vec<Subject>,
}

#[derive(Debug, Serialize)]
pub struct CourseListResponse {
    pub courses: Vec<CourseResponse>,
}

#[derive(Debug, Serialize)]
pub struct SubjectListResponse {
    pub subjects: Vec<Subject>,
}

async fn find_course(pool: &sqlx::SqlitePool, id: &str) -> Result<Course> {
    sqlx::query_as::<_, Course>("SELECT * FROM courses WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Course not found".to_string()))
}

async fn subjects_of(pool: &sqlx::SqlitePool, course_id: &str) -> Result<Vec<Subject>> {
    Ok(sqlx::query_as::<_, Subject>(
        "SELECT * FROM subjects WHERE course_id = ? ORDER BY name ASC",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?)
}

async fn name_taken(pool: &sqlx::SqlitePool, name: &str, except_id: Option<&str>) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM courses WHERE name = ? AND (? IS NULL OR id != ?)",
    )
    .bind(name)
    .bind(except_id)
    .bind(except_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

async fn list_courses(State(state): State<AppState>) -> Result<Json<CourseListResponse>> {
    let courses = sqlx::query_as::<_, Course>("SELECT * FROM courses ORDER BY name ASC")
        .fetch_all(&state.db.pool)
        .await?;
    let subjects = sqlx::query_as::<_, Subject>("SELECT * FROM subjects ORDER BY name ASC")
        .fetch_all(&state.db.pool)
        .await?;

    let mut by_course: HashMap<String, Vec<Subject>> = HashMap::new();
    for subject in subjects {
        by_course
            .entry(subject.course_id.clone())
            .or_default()
            .push(subject);
    }

    let courses = courses
        .into_iter()
        .map(|course| CourseResponse {
            subjects: by_course.remove(&course.id).unwrap_or_default(),
            course,
        })
        .collect();

    Ok(Json(CourseListResponse { courses }))
}

async fn create_course(
    State(state): State<AppState>,
    WithRejection(Json(body), _): WithRejection<Json<CourseRequest>, AppError>,
) -> Result<Json<CourseResponse>> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Course name is required".to_string()));
    }
    if name_taken(&state.db.pool, name, None).await? {
        return Err(AppError::Validation("Course name already exists".to_string()));
    }

    let course = Course {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        description: body.description,
        created_at: Utc::now().to_rfc3339(),
    };

    sqlx::query("INSERT INTO courses (id, name, description, created_at) VALUES (?, ?, ?, ?)")
        .bind(&course.id)
        .bind(&course.name)
        .bind(&course.description)
        .bind(&course.created_at)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(CourseResponse {
        course,
        subjects: Vec::new(),
    }))
}

async fn get_course(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CourseResponse>> {
    let course = find_course(&state.db.pool, &id).await?;
    let subjects = subjects_of(&state.db.pool, &id).await?;
    Ok(Json(CourseResponse { course, subjects }))
}

async fn update_course(
    State(state): State<AppState>,
    Path(id): Path<String>,
    WithRejection(Json(body), _): WithRejection<Json<CourseRequest>, AppError>,
) -> Result<Json<CourseResponse>> {
    let mut course = find_course(&state.db.pool, &id).await?;
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Course name is required".to_string()));
    }
    if name_taken(&state.db.pool, name, Some(&id)).await? {
        return Err(AppError::Validation("Course name already exists".to_string()));
    }

    course.name = name.to_string();
    course.description = body.description;

    sqlx::query("UPDATE courses SET name = ?, description = ? WHERE id = ?")
        .bind(&course.name)
        .bind(&course.description)
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    let subjects = subjects_of(&state.db.pool, &id).await?;
    Ok(Json(CourseResponse { course, subjects }))
}

async fn delete_course(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<()>> {
    // Subjects cascade; users keep their account with the course link cleared.
    let result = sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Course not found".to_string()));
    }
    tracing::info!(course_id = %id, "course deleted");
    Ok(Json(()))
}

async fn list_subjects(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SubjectListResponse>> {
    find_course(&state.db.pool, &id).await?;
    let subjects = subjects_of(&state.db.pool, &id).await?;
    Ok(Json(SubjectListResponse { subjects }))
}

async fn create_subject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    WithRejection(Json(body), _): WithRejection<Json<CreateSubjectRequest>, AppError>,
) -> Result<Json<Subject>> {
    find_course(&state.db.pool, &id).await?;

    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Subject name is required".to_string()));
    }
    let duplicate = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM subjects WHERE course_id = ? AND name = ?",
    )
    .bind(&id)
    .bind(name)
    .fetch_one(&state.db.pool)
    .await?;
    if duplicate > 0 {
        return Err(AppError::Validation(
            "Subject already exists in this course".to_string(),
        ));
    }

    let subject = Subject {
        id: Uuid::new_v4().to_string(),
        course_id: id,
        name: name.to_string(),
        created_at: Utc::now().to_rfc3339(),
    };

    sqlx::query("INSERT INTO subjects (id, course_id, name, created_at) VALUES (?, ?, ?, ?)")
        .bind(&subject.id)
        .bind(&subject.course_id)
        .bind(&subject.name)
        .bind(&subject.created_at)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(subject))
}

async fn delete_subject(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<()>> {
    let result = sqlx::query("DELETE FROM subjects WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Subject not found".to_string()));
    }
    Ok(Json(()))
}
