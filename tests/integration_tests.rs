//! Integration tests for chat-relay
//!
//! CLI behaviour through the built binary, plus the full HTTP stack driven
//! against a mocked completion service.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const RELAY_ENV: &[&str] = &[
    "OPENAI_API_KEY",
    "OPENAI_MODEL",
    "OPENAI_TEMPERATURE",
    "OPENAI_BASE_URL",
    "CHAT_RELAY_HOST",
    "PORT",
    "DATABASE_PATH",
    "CHAT_RELAY_LOG",
    "CHAT_RELAY_LOG_JSON",
    "RUST_LOG",
];

/// Helper to create a chat-relay Command isolated from the caller's environment
fn relay_in(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("chat-relay");
    cmd.current_dir(dir.path());
    for var in RELAY_ENV {
        cmd.env_remove(var);
    }
    cmd
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let dir = TempDir::new().unwrap();
        relay_in(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("init-db"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        relay_in(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("chat-relay"));
    }

    #[test]
    fn test_unknown_command_fails() {
        let dir = TempDir::new().unwrap();
        relay_in(&dir).arg("explode").assert().failure();
    }
}

// =============================================================================
// Database bootstrap
// =============================================================================

mod init_db {
    use super::*;

    #[test]
    fn test_init_db_creates_file_and_parents() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("state").join("chat.db");

        relay_in(&dir)
            .args(["init-db", "--db-path"])
            .arg(&db_path)
            .assert()
            .success()
            .stdout(predicate::str::contains("Session database initialized"));

        assert!(db_path.exists());
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("chat.db");

        for _ in 0..2 {
            relay_in(&dir)
                .args(["init-db", "--db-path"])
                .arg(&db_path)
                .assert()
                .success();
        }
    }

    #[test]
    fn test_init_db_honours_database_path_env() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("from-env.db");

        relay_in(&dir)
            .env("DATABASE_PATH", &db_path)
            .arg("init-db")
            .assert()
            .success();

        assert!(db_path.exists());
    }

    #[test]
    fn test_init_db_uses_config_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("chat-relay.toml"),
            "[server]\ndb_path = \"configured/chat.db\"\n",
        )
        .unwrap();

        relay_in(&dir).arg("init-db").assert().success();

        assert!(dir.path().join("configured/chat.db").exists());
    }
}

// =============================================================================
// Configuration errors
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_serve_without_credential_fails() {
        let dir = TempDir::new().unwrap();
        relay_in(&dir)
            .args(["serve", "--port", "0", "--db-path", "chat.db"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_missing_explicit_config_fails() {
        let dir = TempDir::new().unwrap();
        relay_in(&dir)
            .args(["--config", "absent.toml", "init-db"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("absent.toml"));
    }

    #[test]
    fn test_malformed_config_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("chat-relay.toml"), "[server\nport = ").unwrap();
        relay_in(&dir)
            .arg("init-db")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse config file"));
    }

    #[test]
    fn test_out_of_range_temperature_fails() {
        let dir = TempDir::new().unwrap();
        relay_in(&dir)
            .env("OPENAI_TEMPERATURE", "9")
            .arg("init-db")
            .assert()
            .failure()
            .stderr(predicate::str::contains("temperature"));
    }
}

// =============================================================================
// Full stack against a mocked completion service
// =============================================================================

mod end_to_end {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use chat_relay::chat::api::AppState;
    use chat_relay::chat::db::{SessionStore, StoreHandle};
    use chat_relay::chat::orchestrator::TurnOrchestrator;
    use chat_relay::chat::relay::OpenAiRelay;
    use chat_relay::chat::server::build_router;
    use chat_relay::config::CompletionSettings;

    fn app_for(server: &MockServer) -> (Router, StoreHandle) {
        let settings = CompletionSettings {
            model: "gpt-test".into(),
            temperature: 0.2,
            base_url: server.uri(),
        };
        let relay = OpenAiRelay::new(&settings, "sk-test").unwrap();
        let store = StoreHandle::new(SessionStore::open_in_memory().unwrap());
        let state = Arc::new(AppState {
            orchestrator: TurnOrchestrator::new(store.clone(), Arc::new(relay)),
        });
        (build_router(state, false), store)
    }

    fn chat_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(body: Body) -> String {
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_buffered_turn_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Hello there"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (app, store) = app_for(&server);
        let response = app
            .oneshot(chat_request(json!({"message": "hi", "sessionId": "e2e"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_string(response.into_body()).await).unwrap();
        assert_eq!(body, json!({"message": "Hello there"}));

        let history = store.history("e2e").await.unwrap();
        let contents: Vec<_> = history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "Hello there"]);
    }

    #[tokio::test]
    async fn test_streamed_turn_round_trip() {
        let server = MockServer::start().await;
        let upstream = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(upstream),
            )
            .mount(&server)
            .await;

        let (app, store) = app_for(&server);
        let response = app
            .oneshot(chat_request(json!({"message": "hi", "sessionId": "e2e", "streaming": true})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_string(response.into_body()).await;
        assert_eq!(
            body,
            "data: {\"content\":\"Hel\"}\n\ndata: {\"content\":\"lo\"}\n\ndata: {\"done\":true}\n\n"
        );

        let history = store.history("e2e").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Hello");
    }

    #[tokio::test]
    async fn test_upstream_rejection_is_internal_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided"}
            })))
            .mount(&server)
            .await;

        let (app, store) = app_for(&server);
        let response = app
            .oneshot(chat_request(json!({"message": "hi", "sessionId": "e2e"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_str(&body_string(response.into_body()).await).unwrap();
        assert!(body["error"].as_str().unwrap().contains("Incorrect API key"));

        assert_eq!(store.history("e2e").await.unwrap().len(), 1);
    }
}
