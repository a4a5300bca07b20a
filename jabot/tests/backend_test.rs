//! Conversational backend against a mock HTTP server.

use std::time::Duration;

use jabot::{BackendError, ChatBackend, TulingBackend};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_PATH: &str = "/openapi/api";

async fn backend_for(server: &MockServer) -> TulingBackend {
    TulingBackend::new(
        format!("{}{API_PATH}", server.uri()),
        "test-key",
        Duration::from_secs(2),
    )
}

#[tokio::test]
async fn posts_key_info_and_userid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .and(body_json(json!({
            "key": "test-key",
            "info": "hello",
            "userid": "amy@example.com"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 100000,
            "text": "hi there"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = backend_for(&server)
        .await
        .complete("hello", "amy@example.com")
        .await
        .unwrap();
    assert_eq!(reply, "hi there");
}

#[tokio::test]
async fn link_reply_joins_text_and_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200000,
            "text": "Here you go",
            "url": "http://example.com/x"
        })))
        .mount(&server)
        .await;

    let reply = backend_for(&server).await.complete("map", "u1").await.unwrap();
    assert_eq!(reply, "Here you go http://example.com/x");
}

#[tokio::test]
async fn news_list_is_flattened() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 302000,
            "text": "news",
            "list": [
                {"article": "Rust 2.0", "source": "blog", "icon": "", "detailurl": "http://n/1"}
            ]
        })))
        .mount(&server)
        .await;

    let reply = backend_for(&server).await.complete("news", "u1").await.unwrap();
    assert_eq!(reply, "Rust 2.0\nhttp://n/1\n");
}

#[tokio::test]
async fn server_error_is_a_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = backend_for(&server).await.complete("hi", "u1").await.unwrap_err();
    assert!(matches!(err, BackendError::Status { status: 503, ref body } if body == "overloaded"));
}

#[tokio::test]
async fn garbage_body_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
        .mount(&server)
        .await;

    let result = backend_for(&server).await.complete("hi", "u1").await;
    assert!(matches!(
        result,
        Err(BackendError::Decode(_) | BackendError::Request(_))
    ));
}

#[tokio::test]
async fn slow_server_times_out_as_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": 100000, "text": "late"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let backend = TulingBackend::new(
        format!("{}{API_PATH}", server.uri()),
        "k",
        Duration::from_millis(200),
    );
    assert!(backend.complete("hi", "u1").await.is_err());
}
