mod common;

use std::time::Duration;

use axum::body::{Body, BodyDataStream};
use axum::http::{header, Method, Request, StatusCode};
use common::TestApp;
use futures::StreamExt;
use imt_points_server::db::models::Role;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn open_stream(app: &TestApp, token: &str) -> BodyDataStream {
    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/points/stream")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.into_body().into_data_stream()
}

/// Next `points` event payload, or `None` if nothing arrives shortly.
async fn next_event(stream: &mut BodyDataStream) -> Option<Value> {
    let chunk = tokio::time::timeout(Duration::from_millis(300), stream.next())
        .await
        .ok()??
        .unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(text.contains("event: points"), "{text}");
    let data = text
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .unwrap();
    Some(serde_json::from_str(data).unwrap())
}

#[tokio::test]
async fn admin_grant_appends_ledger_row() {
    let app = TestApp::new().await;
    let admin = app.seed_user("Root", Role::Admin, None).await;
    let student = app.seed_user("Ana", Role::Student, None).await;

    let (status, point) = app
        .post(
            "/api/points",
            &admin.token,
            json!({ "user_id": student.id, "amount": 10, "note": "  quiz win  " }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{point}");
    assert_eq!(point["user_id"], student.id.as_str());
    assert_eq!(point["amount"], 10);
    assert_eq!(point["note"], "quiz win");
    assert_eq!(point["granted_by"], admin.id.as_str());

    let (_, _) = app
        .post("/api/points", &admin.token, json!({ "user_id": student.id, "amount": -3 }))
        .await;

    let (status, total) = app
        .get(&format!("/api/points/total/{}", student.id), &admin.token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(total["total"], 7);

    let (status, list) = app
        .get(&format!("/api/points?user_id={}", student.id), &admin.token)
        .await;
    assert_eq!(status, StatusCode::OK);
    let points = list["points"].as_array().unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0]["amount"], -3);
    assert_eq!(points[0]["user_name"], "Ana");
}

#[tokio::test]
async fn grant_validation() {
    let app = TestApp::new().await;
    let admin = app.seed_user("Root", Role::Admin, None).await;
    let sup = app.seed_user("Sue", Role::Supervisor, None).await;
    let student = app.seed_user("Ana", Role::Student, None).await;

    let (status, _) = app
        .post("/api/points", &admin.token, json!({ "user_id": "missing", "amount": 5 }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post("/api/points", &admin.token, json!({ "user_id": student.id, "amount": 0 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/api/points", &admin.token, json!({ "user_id": sup.id, "amount": 5 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Not the supervisor's student.
    let (status, _) = app
        .post("/api/points", &sup.token, json!({ "user_id": student.id, "amount": 5 }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .post("/api/points", &student.token, json!({ "user_id": student.id, "amount": 5 }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn students_see_only_their_own_ledger() {
    let app = TestApp::new().await;
    let admin = app.seed_user("Root", Role::Admin, None).await;
    let ana = app.seed_user("Ana", Role::Student, None).await;
    let ben = app.seed_user("Ben", Role::Student, None).await;

    app.post("/api/points", &admin.token, json!({ "user_id": ana.id, "amount": 4 }))
        .await;
    app.post("/api/points", &admin.token, json!({ "user_id": ben.id, "amount": 9 }))
        .await;

    let (status, list) = app.get("/api/points", &ana.token).await;
    assert_eq!(status, StatusCode::OK);
    let points = list["points"].as_array().unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0]["user_id"], ana.id.as_str());

    let (status, _) = app
        .get(&format!("/api/points?user_id={}", ben.id), &ana.token)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .get(&format!("/api/points/total/{}", ben.id), &ana.token)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn leaderboard_ranks_students_by_summed_points() {
    let app = TestApp::new().await;
    let admin = app.seed_user("Root", Role::Admin, None).await;
    let ana = app.seed_user("Ana", Role::Student, None).await;
    let ben = app.seed_user("Ben", Role::Student, None).await;
    let cal = app.seed_user("Cal", Role::Student, None).await;
    app.seed_user("Sue", Role::Supervisor, None).await;

    for (id, amount) in [(&ben.id, 5), (&ben.id, 5), (&ana.id, 10), (&cal.id, 2)] {
        let (status, _) = app
            .post("/api/points", &admin.token, json!({ "user_id": id, "amount": amount }))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, board) = app.get("/api/points/leaderboard", &cal.token).await;
    assert_eq!(status, StatusCode::OK);
    let entries = board["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 3, "supervisors are not ranked");
    assert_eq!(entries[0]["name"], "Ana");
    assert_eq!(entries[0]["rank"], 1);
    assert_eq!(entries[1]["name"], "Ben");
    assert_eq!(entries[1]["rank"], 1);
    assert_eq!(entries[2]["name"], "Cal");
    assert_eq!(entries[2]["rank"], 3);

    let (_, board) = app.get("/api/points/leaderboard?limit=1", &cal.token).await;
    assert_eq!(board["entries"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn history_includes_todays_grants() {
    let app = TestApp::new().await;
    let admin = app.seed_user("Root", Role::Admin, None).await;
    let ana = app.seed_user("Ana", Role::Student, None).await;

    app.post("/api/points", &admin.token, json!({ "user_id": ana.id, "amount": 6 }))
        .await;

    let (status, history) = app
        .get(&format!("/api/points/history/{}?days=7", ana.id), &ana.token)
        .await;
    assert_eq!(status, StatusCode::OK);
    let days = history["days"].as_array().unwrap();
    assert_eq!(days.len(), 7);
    assert_eq!(days[6]["amount"], 6);
    assert_eq!(days[6]["cumulative"], 6);
    assert_eq!(history["total"], 6);

    let (status, _) = app
        .get(&format!("/api/points/history/{}?days=0", ana.id), &ana.token)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn grants_are_published_to_the_hub() {
    let app = TestApp::new().await;
    let admin = app.seed_user("Root", Role::Admin, None).await;
    let ana = app.seed_user("Ana", Role::Student, None).await;

    let mut events = app.state.points.subscribe();
    app.post("/api/points", &admin.token, json!({ "user_id": ana.id, "amount": 3 }))
        .await;
    app.post("/api/points", &admin.token, json!({ "user_id": ana.id, "amount": 4 }))
        .await;

    let first = events.recv().await.unwrap();
    let second = events.recv().await.unwrap();
    assert_eq!((first.user_id.as_str(), first.total), (ana.id.as_str(), 3));
    assert_eq!(second.total, 7);
}

#[tokio::test]
async fn stream_accepts_query_token() {
    let app = TestApp::new().await;
    let ana = app.seed_user("Ana", Role::Student, None).await;

    let request = Request::builder()
        .method(Method::GET)
        .uri(format!("/api/points/stream?token={}", ana.token))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
}

#[tokio::test]
async fn stream_filters_events_by_role_and_drops_listeners() {
    let app = TestApp::new().await;
    let admin = app.seed_user("Root", Role::Admin, None).await;
    let sue = app.seed_user("Sue", Role::Supervisor, None).await;
    let ana = app.seed_user("Ana", Role::Student, Some(&sue.id)).await;
    let ben = app.seed_user("Ben", Role::Student, None).await;

    let mut ana_stream = open_stream(&app, &ana.token).await;
    let mut ben_stream = open_stream(&app, &ben.token).await;
    let mut sue_stream = open_stream(&app, &sue.token).await;
    assert_eq!(app.state.points.listener_count(), 3);

    app.post("/api/points", &admin.token, json!({ "user_id": ana.id, "amount": 2 }))
        .await;
    app.post("/api/points", &admin.token, json!({ "user_id": ben.id, "amount": 5 }))
        .await;

    let event = next_event(&mut ana_stream).await.expect("ana's event");
    assert_eq!(event["user_id"], ana.id.as_str());
    assert_eq!(event["total"], 2);
    assert!(next_event(&mut ana_stream).await.is_none());

    let event = next_event(&mut ben_stream).await.expect("ben's event");
    assert_eq!(event["user_id"], ben.id.as_str());
    assert!(next_event(&mut ben_stream).await.is_none());

    let first = next_event(&mut sue_stream).await.expect("first event");
    let second = next_event(&mut sue_stream).await.expect("second event");
    assert_eq!(first["user_id"], ana.id.as_str());
    assert_eq!(second["user_id"], ben.id.as_str());

    drop(ana_stream);
    drop(ben_stream);
    drop(sue_stream);
    assert_eq!(app.state.points.listener_count(), 0);
}

#[tokio::test]
async fn malformed_query_is_a_json_validation_error() {
    let app = TestApp::new().await;
    let ana = app.seed_user("Ana", Role::Student, None).await;

    let (status, body) = app.get("/api/points/leaderboard?limit=-1", &ana.token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string(), "{body}");

    let (status, body) = app
        .request(
            Method::POST,
            "/api/chat/messages",
            Some(&ana.token),
            Some(json!({ "content": 42 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string(), "{body}");
}
