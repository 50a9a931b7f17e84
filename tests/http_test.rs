mod common;

use common::{RecordingAuthority, callback, harness, recording_registry, reference_ids, result_line};
use g2p_id_mapper::application::builder::build_request;
use g2p_id_mapper::application::mapper::IdMapper;
use g2p_id_mapper::config::{AuthorityConfig, MapperConfig};
use g2p_id_mapper::domain::mapping::{Action, MappingValue, Namespace, StatusEnum};
use g2p_id_mapper::domain::ports::AuthorityClient;
use g2p_id_mapper::domain::protocol::{Ack, AckResponse, RequestEnvelope};
use g2p_id_mapper::error::DispatchError;
use g2p_id_mapper::infrastructure::http::HttpAuthorityClient;
use g2p_id_mapper::infrastructure::in_memory::InMemoryTransactionStore;
use g2p_id_mapper::interfaces::http::callback as callback_api;
use std::time::Duration;
use tokio::net::TcpListener;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn authority_config(server: &MockServer) -> AuthorityConfig {
    AuthorityConfig {
        resolve_url: format!("{}/mapper/resolve", server.uri()),
        link_url: format!("{}/mapper/link", server.uri()),
        update_url: String::new(),
        timeout: Duration::from_millis(200),
        ..AuthorityConfig::default()
    }
}

fn resolve_envelope(config: &AuthorityConfig) -> RequestEnvelope {
    let (envelope, _) = build_request(
        Action::Resolve,
        &[MappingValue::with_id("id-1")],
        None,
        Some("txn-http".to_string()),
        config,
    );
    envelope.unwrap()
}

#[tokio::test]
async fn test_client_posts_envelope_and_reads_ack() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mapper/resolve"))
        .and(body_partial_json(serde_json::json!({
            "header": { "action": "resolve" },
            "message": { "transaction_id": "txn-http" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(AckResponse::ack()))
        .expect(1)
        .mount(&server)
        .await;
    let config = authority_config(&server);
    let client = HttpAuthorityClient::new(config.clone()).unwrap();

    let reply = client.post(Action::Resolve, &resolve_envelope(&config)).await.unwrap();

    assert!(reply.is_ack());
}

#[tokio::test]
async fn test_naive_ack_timestamp_leaves_batch_pending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mapper/resolve"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"message":{"ack_status":"ACK","timestamp":"2024-01-01T00:00:00.123456","correlation_id":"c"}}"#,
            "application/json",
        ))
        .mount(&server)
        .await;
    let config = authority_config(&server);
    let (registry, _) = recording_registry();
    let mapper = IdMapper::new(
        Box::new(InMemoryTransactionStore::new()),
        Box::new(HttpAuthorityClient::new(config.clone()).unwrap()),
        registry,
        MapperConfig {
            authority: config,
            ..MapperConfig::default()
        },
    );

    let status = mapper
        .submit(Action::Resolve, &[MappingValue::with_id("id-1")], None, None)
        .await
        .unwrap();

    assert_eq!(status.status, StatusEnum::Pending);
}

#[tokio::test]
async fn test_client_surfaces_nack() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mapper/resolve"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(AckResponse::nack("rjct.version.invalid", "v")),
        )
        .mount(&server)
        .await;
    let config = authority_config(&server);
    let client = HttpAuthorityClient::new(config.clone()).unwrap();

    let reply = client.post(Action::Resolve, &resolve_envelope(&config)).await.unwrap();

    assert_eq!(reply.message.ack_status, Ack::Nack);
}

#[tokio::test]
async fn test_client_maps_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mapper/resolve"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let config = authority_config(&server);
    let client = HttpAuthorityClient::new(config.clone()).unwrap();

    let err = client.post(Action::Resolve, &resolve_envelope(&config)).await.unwrap_err();

    assert!(matches!(err, DispatchError::Status(503)));
}

#[tokio::test]
async fn test_client_maps_garbage_body_to_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mapper/resolve"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;
    let config = authority_config(&server);
    let client = HttpAuthorityClient::new(config.clone()).unwrap();

    let err = client.post(Action::Resolve, &resolve_envelope(&config)).await.unwrap_err();

    assert!(matches!(err, DispatchError::Decode(_)));
}

#[tokio::test]
async fn test_client_slow_authority_is_a_read_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mapper/resolve"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(AckResponse::ack())
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    let config = authority_config(&server);
    let client = HttpAuthorityClient::new(config.clone()).unwrap();

    let err = client.post(Action::Resolve, &resolve_envelope(&config)).await.unwrap_err();

    assert!(matches!(err, DispatchError::ReadTimeout));
}

#[tokio::test]
async fn test_client_without_url_is_not_configured() {
    let server = MockServer::start().await;
    let config = authority_config(&server);
    let client = HttpAuthorityClient::new(config.clone()).unwrap();
    let (envelope, _) = build_request(Action::Update, &[MappingValue::new("id", "fa")], None, None, &config);

    let err = client.post(Action::Update, &envelope.unwrap()).await.unwrap_err();

    assert!(matches!(err, DispatchError::NotConfigured(Namespace::Update)));
}

async fn spawn_callback_server(h: &common::Harness) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = callback_api::router(h.mapper.clone(), "/callback");
    tokio::spawn(async move { axum::serve(listener, app).await });
    format!("http://{addr}/callback/mapper")
}

#[tokio::test]
async fn test_callback_endpoint_applies_results() {
    let h = harness(RecordingAuthority::acking());
    let base = spawn_callback_server(&h).await;
    let submitted = h
        .mapper
        .submit(Action::Link, &[MappingValue::new("id-1", "fa-1")], None, None)
        .await
        .unwrap();
    let refs = reference_ids(&h.authority.sent_for(Action::Link)[0]);
    let body = callback(Action::Link, &submitted.txn_id, vec![result_line(&refs[0], StatusEnum::Success)]);

    let response = reqwest::Client::new()
        .post(format!("{base}/on-link"))
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let reply: AckResponse = response.json().await.unwrap();
    assert!(reply.is_ack());
    let stored = h.mapper.status(Namespace::Link, &submitted.txn_id).await.unwrap().unwrap();
    assert_eq!(stored.status, StatusEnum::Success);
}

#[tokio::test]
async fn test_callback_endpoint_accepts_naive_timestamps() {
    let h = harness(RecordingAuthority::acking());
    let base = spawn_callback_server(&h).await;
    let submitted = h
        .mapper
        .submit(Action::Resolve, &[MappingValue::with_id("id-1")], None, None)
        .await
        .unwrap();
    let refs = reference_ids(&h.authority.sent_for(Action::Resolve)[0]);
    let body = serde_json::json!({
        "signature": "",
        "header": {
            "message_id": "m-1",
            "message_ts": "2024-01-01T00:00:00",
            "action": "on-resolve",
            "status": "rcvd"
        },
        "message": {
            "transaction_id": submitted.txn_id,
            "resolve_response": [{
                "reference_id": refs[0],
                "timestamp": "2024-01-01T00:00:00.250000",
                "status": "succ",
                "fa": "token:1@bank"
            }]
        }
    });

    let response = reqwest::Client::new()
        .post(format!("{base}/on-resolve"))
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let reply: AckResponse = response.json().await.unwrap();
    assert!(reply.is_ack());
    let stored = h.mapper.status(Namespace::Resolve, &submitted.txn_id).await.unwrap().unwrap();
    assert_eq!(stored.status, StatusEnum::Success);
    assert_eq!(stored.refs[&refs[0]].fa.as_deref(), Some("token:1@bank"));
}

#[tokio::test]
async fn test_callback_endpoint_nacks_unknown_transaction() {
    let h = harness(RecordingAuthority::acking());
    let base = spawn_callback_server(&h).await;
    let body = callback(Action::Resolve, "ghost", vec![result_line("r", StatusEnum::Success)]);

    let response = reqwest::Client::new()
        .post(format!("{base}/on-resolve"))
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let reply: AckResponse = response.json().await.unwrap();
    assert_eq!(reply.message.ack_status, Ack::Nack);
}

#[tokio::test]
async fn test_callback_endpoint_reports_unregistered_completion() {
    let h = harness(RecordingAuthority::acking());
    let base = spawn_callback_server(&h).await;
    let submitted = h
        .mapper
        .submit(Action::Update, &[MappingValue::new("id-1", "fa-1")], Some("nobody.home".to_string()), None)
        .await
        .unwrap();
    let refs = reference_ids(&h.authority.sent_for(Action::Update)[0]);
    let body = callback(Action::Update, &submitted.txn_id, vec![result_line(&refs[0], StatusEnum::Success)]);

    let response = reqwest::Client::new()
        .post(format!("{base}/on-update"))
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    let reply: AckResponse = response.json().await.unwrap();
    assert_eq!(reply.message.ack_status, Ack::Err);
    assert_eq!(reply.message.error.unwrap().code, "rjct.callback.not_registered");
}
