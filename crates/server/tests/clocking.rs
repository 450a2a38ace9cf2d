mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::TestApp;
use imt_points_server::db::models::{ClockingType, Role};
use serde_json::json;
use uuid::Uuid;

/// Inserts a clocking record `hours_ago` hours before now.
async fn seed_record(app: &TestApp, user_id: &str, kind: ClockingType, hours_ago: i64) {
    sqlx::query(
        "INSERT INTO clocking_records (id, user_id, type, timestamp, total_hours) VALUES (?, ?, ?, ?, NULL)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(kind)
    .bind((Utc::now() - Duration::hours(hours_ago)).to_rfc3339())
    .execute(&app.state.db.pool)
    .await
    .expect("seed clocking record");
}

#[tokio::test]
async fn full_shift_derives_total_hours_on_out() {
    let app = TestApp::new().await;
    let ana = app.seed_user("Ana", Role::Student, None).await;

    let (_, status) = app.get("/api/clocking/status", &ana.token).await;
    assert_eq!(status["state"], "OUT");
    assert!(status["since"].is_null());

    let (code, record) = app
        .post("/api/clocking/record", &ana.token, json!({ "type": "IN" }))
        .await;
    assert_eq!(code, StatusCode::OK, "{record}");
    assert_eq!(record["type"], "IN");
    assert!(record["total_hours"].is_null());

    let (_, status) = app.get("/api/clocking/status", &ana.token).await;
    assert_eq!(status["state"], "IN");
    assert_eq!(status["since"], record["timestamp"]);

    let (code, _) = app
        .post("/api/clocking/record", &ana.token, json!({ "type": "BREAK" }))
        .await;
    assert_eq!(code, StatusCode::OK);

    let (code, out) = app
        .post("/api/clocking/record", &ana.token, json!({ "type": "OUT" }))
        .await;
    assert_eq!(code, StatusCode::OK);
    assert!(out["total_hours"].as_f64().unwrap() >= 0.0);

    let (_, records) = app.get("/api/clocking/records", &ana.token).await;
    let records = records["records"].as_array().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["type"], "OUT");

    let (_, summary) = app.get("/api/clocking/summary?days=1", &ana.token).await;
    assert_eq!(summary["sessions"], 1);
}

#[tokio::test]
async fn invalid_transitions_are_rejected() {
    let app = TestApp::new().await;
    let ana = app.seed_user("Ana", Role::Student, None).await;

    let (code, body) = app
        .post("/api/clocking/record", &ana.token, json!({ "type": "OUT" }))
        .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Already clocked out");

    let (code, _) = app
        .post("/api/clocking/record", &ana.token, json!({ "type": "BREAK" }))
        .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    app.post("/api/clocking/record", &ana.token, json!({ "type": "IN" }))
        .await;
    let (code, _) = app
        .post("/api/clocking/record", &ana.token, json!({ "type": "IN" }))
        .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let (code, body) = app
        .post("/api/clocking/record", &ana.token, json!({ "type": "LUNCH" }))
        .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string(), "{body}");
}

#[tokio::test]
async fn supervisors_read_their_students_records_only() {
    let app = TestApp::new().await;
    let sue = app.seed_user("Sue", Role::Supervisor, None).await;
    let ana = app.seed_user("Ana", Role::Student, Some(&sue.id)).await;
    let ben = app.seed_user("Ben", Role::Student, None).await;

    app.post("/api/clocking/record", &ana.token, json!({ "type": "IN" }))
        .await;

    let (code, body) = app
        .get(&format!("/api/clocking/records?user_id={}", ana.id), &sue.token)
        .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["records"].as_array().unwrap().len(), 1);

    let (code, _) = app
        .get(&format!("/api/clocking/records?user_id={}", ben.id), &sue.token)
        .await;
    assert_eq!(code, StatusCode::FORBIDDEN);

    let (code, _) = app
        .get(&format!("/api/clocking/records?user_id={}", ana.id), &ben.token)
        .await;
    assert_eq!(code, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn out_measures_hours_from_the_last_clock_in() {
    let app = TestApp::new().await;
    let ana = app.seed_user("Ana", Role::Student, None).await;

    seed_record(&app, &ana.id, ClockingType::In, 3).await;

    let (code, out) = app
        .post("/api/clocking/record", &ana.token, json!({ "type": "OUT" }))
        .await;
    assert_eq!(code, StatusCode::OK, "{out}");
    assert_eq!(out["total_hours"], 3.0);
}

#[tokio::test]
async fn work_before_a_break_counts_after_resuming() {
    let app = TestApp::new().await;
    let ana = app.seed_user("Ana", Role::Student, None).await;

    // An earlier, closed session must not leak into this one.
    seed_record(&app, &ana.id, ClockingType::In, 30).await;
    seed_record(&app, &ana.id, ClockingType::Out, 26).await;

    seed_record(&app, &ana.id, ClockingType::In, 9).await;
    seed_record(&app, &ana.id, ClockingType::Break, 5).await;
    seed_record(&app, &ana.id, ClockingType::In, 4).await;

    let (code, out) = app
        .post("/api/clocking/record", &ana.token, json!({ "type": "OUT" }))
        .await;
    assert_eq!(code, StatusCode::OK, "{out}");
    // 4h before the break + 4h after it.
    assert_eq!(out["total_hours"], 8.0);

    let (_, summary) = app.get("/api/clocking/summary?days=1", &ana.token).await;
    assert_eq!(summary["sessions"], 1);
    assert_eq!(summary["total_hours"], 8.0);
}

#[tokio::test]
async fn out_from_a_break_excludes_the_break() {
    let app = TestApp::new().await;
    let ana = app.seed_user("Ana", Role::Student, None).await;

    seed_record(&app, &ana.id, ClockingType::In, 6).await;
    seed_record(&app, &ana.id, ClockingType::Break, 2).await;

    let (code, out) = app
        .post("/api/clocking/record", &ana.token, json!({ "type": "OUT" }))
        .await;
    assert_eq!(code, StatusCode::OK, "{out}");
    assert_eq!(out["total_hours"], 4.0);
}
