#![allow(clippy::unwrap_used, clippy::panic, clippy::missing_panics_doc, clippy::must_use_candidate)]
mod common;

use serde_json::json;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires Postgres and Redis"]
async fn test_push_crosses_instances() {
    let node_a = common::TestApp::spawn().await;
    let node_b = common::TestApp::spawn().await;

    let mentor = node_a.create_user("mentor").await;
    let student = node_a.create_user("student").await;
    node_a.accept_connection(&mentor, &student).await;

    let mut student_ws = node_a.connect_ws(&student).await;
    student_ws.identify(&student).await;
    let mut mentor_ws = node_b.connect_ws(&mentor).await;
    let online = mentor_ws.identify(&mentor).await;
    assert!(online["userIds"].as_array().unwrap().contains(&json!(student.user_id)));

    let resp = node_a.send_text(&student, mentor.user_id, "Hello across nodes").await;
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

    let pushed = mentor_ws.wait_for("receive_message", WAIT).await.expect("push did not reach the other instance");
    assert_eq!(pushed["message"]["content"], "Hello across nodes");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires Postgres and Redis"]
async fn test_typing_crosses_instances() {
    let node_a = common::TestApp::spawn().await;
    let node_b = common::TestApp::spawn().await;

    let mentor = node_a.create_user("mentor").await;
    let student = node_a.create_user("student").await;

    let mut student_ws = node_a.connect_ws(&student).await;
    student_ws.identify(&student).await;
    let mut mentor_ws = node_b.connect_ws(&mentor).await;
    mentor_ws.identify(&mentor).await;

    student_ws.send_json(&json!({ "type": "typing_stop", "recipientId": mentor.user_id })).await;
    let stopped = mentor_ws.wait_for("user_stopped_typing", WAIT).await.expect("no stopped-typing event");
    assert_eq!(stopped["senderId"], json!(student.user_id));
}
