#![allow(clippy::unwrap_used, clippy::panic, clippy::missing_panics_doc, clippy::must_use_candidate)]
mod common;

use serde_json::json;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
#[ignore = "requires Postgres and Redis"]
async fn test_websocket_rejects_missing_token() {
    let app = common::TestApp::spawn().await;
    let result = tokio_tungstenite::connect_async(app.ws_url.clone()).await;
    assert!(result.is_err());
}

#[tokio::test]
#[ignore = "requires Postgres and Redis"]
async fn test_events_before_identify_are_rejected() {
    let app = common::TestApp::spawn().await;
    let user = app.create_user("student").await;
    let peer = app.create_user("mentor").await;

    let mut ws = app.connect_ws(&user).await;
    ws.send_json(&json!({ "type": "typing_start", "recipientId": peer.user_id })).await;

    let error = ws.wait_for("error", WAIT).await.expect("no error event");
    assert_eq!(error["code"], "NOT_IDENTIFIED");
}

#[tokio::test]
#[ignore = "requires Postgres and Redis"]
async fn test_identify_lists_online_users_and_announces_status() {
    let app = common::TestApp::spawn().await;
    let mentor = app.create_user("mentor").await;
    let student = app.create_user("student").await;

    let mut mentor_ws = app.connect_ws(&mentor).await;
    let online = mentor_ws.identify(&mentor).await;
    assert!(online["userIds"].as_array().unwrap().contains(&json!(mentor.user_id)));

    let mut student_ws = app.connect_ws(&student).await;
    let online = student_ws.identify(&student).await;
    let ids = online["userIds"].as_array().unwrap();
    assert!(ids.contains(&json!(mentor.user_id)));
    assert!(ids.contains(&json!(student.user_id)));

    let student_id = json!(student.user_id);
    let status = mentor_ws
        .wait_for_where("user_status_changed", WAIT, |e| e["userId"] == student_id)
        .await
        .expect("no status change");
    assert_eq!(status["status"], "online");

    drop(student_ws);
    let status = mentor_ws
        .wait_for_where("user_status_changed", WAIT, |e| e["userId"] == student_id)
        .await
        .expect("no offline status");
    assert_eq!(status["status"], "offline");
}

#[tokio::test]
#[ignore = "requires Postgres and Redis"]
async fn test_typing_and_http_push_reach_recipient() {
    let app = common::TestApp::spawn().await;
    let mentor = app.create_user("mentor").await;
    let student = app.create_user("student").await;
    app.accept_connection(&mentor, &student).await;

    let mut mentor_ws = app.connect_ws(&mentor).await;
    mentor_ws.identify(&mentor).await;
    let mut student_ws = app.connect_ws(&student).await;
    student_ws.identify(&student).await;

    student_ws.send_json(&json!({ "type": "typing_start", "recipientId": mentor.user_id })).await;
    let typing = mentor_ws.wait_for("user_typing", WAIT).await.expect("no typing event");
    assert_eq!(typing["senderId"], json!(student.user_id));

    let resp = app.send_text(&student, mentor.user_id, "Hello").await;
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

    let pushed = mentor_ws.wait_for("receive_message", WAIT).await.expect("no push");
    assert_eq!(pushed["message"]["content"], "Hello");
    assert_eq!(pushed["message"]["sender"]["_id"], json!(student.user_id));

    let resp = app
        .client
        .put(format!("{}/messages/mark-read/{}", app.server_url, student.user_id))
        .bearer_auth(&mentor.token)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let receipt = student_ws.wait_for("messages_marked_read", WAIT).await.expect("no read receipt");
    assert_eq!(receipt["readBy"], json!(mentor.user_id));
}
