use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hiwar_core::{
    CompletionConfig, CompletionErrorKind, HiwarConfig, PersistenceConfig, Role, SessionStore,
};

fn store_for(endpoint: String) -> SessionStore {
    let config = HiwarConfig {
        completion: CompletionConfig {
            endpoint,
            api_key: Some("sk-test".into()),
            ..Default::default()
        },
        persistence: PersistenceConfig {
            enabled: false,
            ..Default::default()
        },
    };
    SessionStore::new(&config).unwrap()
}

fn completion_body(text: &str, total_tokens: u32) -> serde_json::Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": text}}],
        "usage": {"total_tokens": total_tokens}
    })
}

async fn mock_server() -> (MockServer, String) {
    let server = MockServer::start().await;
    let endpoint = format!("{}/v1/chat/completions", server.uri());
    (server, endpoint)
}

#[tokio::test]
async fn send_success_appends_user_then_assistant() {
    let (server, endpoint) = mock_server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Hello!", 42)))
        .mount(&server)
        .await;

    let store = store_for(endpoint);
    let reply = store.send_message("hi there", None).await.unwrap();

    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, "Hello!");
    assert_eq!(reply.token_count, Some(42));

    let session = store.active_session().unwrap();
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[0].role, Role::User);
    assert_eq!(session.messages[0].content, "hi there");
    assert_eq!(session.messages[1].id, reply.id);

    assert!(!store.is_loading());
    assert!(store.last_error().is_none());
    assert_eq!(store.total_tokens_used(Some(session.id)), 42);
}

#[tokio::test]
async fn usage_accumulates_across_exchanges() {
    let (server, endpoint) = mock_server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("first", 42)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("second", 58)))
        .mount(&server)
        .await;

    let store = store_for(endpoint);
    store.send_message("one", None).await.unwrap();
    let session_id = store.active_session_id().unwrap();
    assert_eq!(store.total_tokens_used(Some(session_id)), 42);

    store.send_message("two", Some(session_id)).await.unwrap();
    assert_eq!(store.total_tokens_used(Some(session_id)), 100);
    assert_eq!(store.total_tokens_used(None), 100);
}

#[tokio::test]
async fn wire_request_carries_full_history_as_role_content_pairs() {
    let (server, endpoint) = mock_server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("pong", 7)))
        .mount(&server)
        .await;

    let store = store_for(endpoint);
    store.send_message("first", None).await.unwrap();
    let session_id = store.active_session_id().unwrap();
    store.send_message("second", Some(session_id)).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);

    let body: serde_json::Value = requests[1].body_json().unwrap();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert!(body["max_tokens"].is_number());
    assert!(body["temperature"].is_number());
    assert_eq!(
        body["messages"],
        json!([
            {"role": "user", "content": "first"},
            {"role": "assistant", "content": "pong"},
            {"role": "user", "content": "second"},
        ])
    );
}

#[tokio::test]
async fn rate_limit_gets_rate_limit_message_not_generic() {
    let (server, endpoint) = mock_server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(json!({"error": {"message": "Rate limit reached"}})),
        )
        .mount(&server)
        .await;

    let store = store_for(endpoint);
    let reply = store.send_message("hello", None).await.unwrap();

    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, CompletionErrorKind::RateLimit.user_message());
    assert_ne!(reply.content, CompletionErrorKind::Unknown.user_message());
    assert_eq!(
        store.last_error().unwrap().kind,
        CompletionErrorKind::RateLimit
    );
    assert!(!store.is_loading());

    // The failure is part of the conversation, with no usage recorded
    let session = store.active_session().unwrap();
    assert_eq!(session.messages.len(), 2);
    assert_eq!(store.total_tokens_used(Some(session.id)), 0);
}

#[tokio::test]
async fn quota_exhaustion_is_distinguished_from_throttling() {
    let (server, endpoint) = mock_server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(
            json!({"error": {"code": "insufficient_quota", "message": "You exceeded your current quota"}}),
        ))
        .mount(&server)
        .await;

    let store = store_for(endpoint);
    let reply = store.send_message("hello", None).await.unwrap();

    assert_eq!(reply.content, CompletionErrorKind::Quota.user_message());
    assert_eq!(store.last_error().unwrap().kind, CompletionErrorKind::Quota);
}

#[tokio::test]
async fn auth_failure_is_classified() {
    let (server, endpoint) = mock_server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "bad key"}})),
        )
        .mount(&server)
        .await;

    let store = store_for(endpoint);
    let reply = store.send_message("hello", None).await.unwrap();

    assert_eq!(reply.content, CompletionErrorKind::Auth.user_message());
    assert_eq!(store.last_error().unwrap().kind, CompletionErrorKind::Auth);
}

#[tokio::test]
async fn malformed_payload_is_unknown_error() {
    let (server, endpoint) = mock_server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let store = store_for(endpoint);
    let reply = store.send_message("hello", None).await.unwrap();

    assert_eq!(reply.content, CompletionErrorKind::Unknown.user_message());
    assert_eq!(
        store.last_error().unwrap().kind,
        CompletionErrorKind::Unknown
    );
}

#[tokio::test]
async fn unreachable_endpoint_appends_user_message_then_connectivity_error() {
    // Nothing listens here; the request fails at the connection level.
    let store = store_for("http://127.0.0.1:9/v1/chat/completions".to_string());
    let reply = store.send_message("are you there?", None).await.unwrap();

    let session = store.active_session().unwrap();
    // The user message was appended before any network activity
    assert_eq!(session.messages[0].role, Role::User);
    assert_eq!(session.messages[0].content, "are you there?");
    assert_eq!(reply.content, CompletionErrorKind::Connectivity.user_message());
    assert_eq!(
        store.last_error().unwrap().kind,
        CompletionErrorKind::Connectivity
    );
    assert!(!store.is_loading());
}

#[tokio::test]
async fn select_session_clears_error_state() {
    let (server, endpoint) = mock_server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let store = store_for(endpoint);
    store.send_message("hello", None).await.unwrap();
    assert!(store.last_error().is_some());

    let session_id = store.active_session_id().unwrap();
    assert!(store.select_session(session_id));
    assert!(store.last_error().is_none());
}

#[tokio::test]
async fn rapid_sends_yield_exactly_one_assistant_message() {
    let (server, endpoint) = mock_server().await;
    // The first request hangs long enough to be superseded
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("slow reply", 10))
                .set_delay(Duration::from_millis(400)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("fast reply", 20)))
        .mount(&server)
        .await;

    let store = store_for(endpoint);
    let first = {
        let store = store.clone();
        tokio::spawn(async move { store.send_message("first", None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let session_id = store.active_session_id().unwrap();
    let second = store.send_message("second", Some(session_id)).await.unwrap();

    assert_eq!(second.content, "fast reply");
    // The superseded call reports no result
    assert!(first.await.unwrap().is_none());

    let session = store.active_session().unwrap();
    let assistant_count = session
        .messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .count();
    assert_eq!(assistant_count, 1);
    assert_eq!(session.messages.len(), 3); // user, user, assistant
    assert!(!store.is_loading());
}

#[tokio::test]
async fn cancel_suppresses_pending_request() {
    let (server, endpoint) = mock_server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("too late", 10))
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;

    let store = store_for(endpoint);
    let pending = {
        let store = store.clone();
        tokio::spawn(async move { store.send_message("never answered", None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(store.is_loading());
    store.cancel();
    assert!(!store.is_loading());

    assert!(pending.await.unwrap().is_none());
    let session = store.active_session().unwrap();
    assert_eq!(session.messages.len(), 1);
    assert_eq!(session.messages[0].role, Role::User);
}

#[tokio::test]
async fn deleting_target_mid_flight_drops_the_reply() {
    let (server, endpoint) = mock_server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("orphan", 10))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let store = store_for(endpoint);
    let pending = {
        let store = store.clone();
        tokio::spawn(async move { store.send_message("doomed", None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let session_id = store.active_session_id().unwrap();
    store.delete_session(session_id);

    assert!(pending.await.unwrap().is_none());
    assert!(store.sessions().is_empty());
}
