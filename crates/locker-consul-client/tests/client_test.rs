//! ConsulClient tests against a mocked agent

use std::time::Duration;

use locker_consul_client::{
    ConsulClient, ConsulClientConfig, ConsulError, QueryOptions, SessionCreateRequest,
    constants::LOCK_FLAG_VALUE,
};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ConsulClient {
    ConsulClient::new(ConsulClientConfig::new(&server.uri()).with_token("test-token")).unwrap()
}

#[tokio::test]
async fn test_session_create_sends_token_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/create"))
        .and(header("X-Consul-Token", "test-token"))
        .and(body_json(json!({
            "Name": "Consul API Lock",
            "TTL": "15s",
            "Behavior": "delete",
            "LockDelay": "0s"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ID": "session-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let id = client
        .session_create(&SessionCreateRequest {
            name: Some("Consul API Lock".to_string()),
            ttl: Some("15s".to_string()),
            behavior: Some("delete".to_string()),
            lock_delay: Some("0s".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(id, "session-1");
}

#[tokio::test]
async fn test_session_create_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/create"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Invalid Session TTL '1s'"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .session_create(&SessionCreateRequest::default())
        .await
        .unwrap_err();

    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_session_renew() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/renew/session-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "ID": "session-1",
            "Name": "Consul API Lock",
            "Node": "agent-one",
            "LockDelay": 0,
            "Behavior": "delete",
            "TTL": "30s",
            "CreateIndex": 10,
            "ModifyIndex": 10
        }])))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/renew/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Session id 'gone' not found"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let entry = client.session_renew("session-1").await.unwrap();
    assert_eq!(entry.ttl_duration(), Some(Duration::from_secs(30)));

    let err = client.session_renew("gone").await.unwrap_err();
    assert!(matches!(err, ConsulError::NotFound(_)));
}

#[tokio::test]
async fn test_kv_get_missing_key_reports_index() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/service/leader"))
        .respond_with(ResponseTemplate::new(404).insert_header("X-Consul-Index", "42"))
        .mount(&server)
        .await;

    let (pair, meta) = client_for(&server)
        .kv_get("service/leader", &QueryOptions::default())
        .await
        .unwrap();

    assert!(pair.is_none());
    assert_eq!(meta.last_index, 42);
}

#[tokio::test]
async fn test_kv_get_blocking_query_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/service/leader"))
        .and(query_param("index", "7"))
        .and(query_param("wait", "250ms"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Consul-Index", "8")
                .set_body_json(json!([{
                    "Key": "service/leader",
                    "CreateIndex": 3,
                    "ModifyIndex": 8,
                    "LockIndex": 2,
                    "Flags": LOCK_FLAG_VALUE,
                    "Value": null,
                    "Session": "other"
                }])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (pair, meta) = client_for(&server)
        .kv_get(
            "service/leader",
            &QueryOptions::blocking(7, Duration::from_millis(250)),
        )
        .await
        .unwrap();

    let pair = pair.unwrap();
    assert_eq!(pair.holder(), Some("other"));
    assert_eq!(pair.lock_index, 2);
    assert_eq!(meta.last_index, 8);
}

#[tokio::test]
async fn test_kv_get_sub_millisecond_wait_rounds_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/service/leader"))
        .and(query_param("index", "5"))
        .and(query_param("wait", "1ms"))
        .respond_with(ResponseTemplate::new(404).insert_header("X-Consul-Index", "5"))
        .expect(1)
        .mount(&server)
        .await;

    let (pair, meta) = client_for(&server)
        .kv_get(
            "service/leader",
            &QueryOptions::blocking(5, Duration::from_micros(600)),
        )
        .await
        .unwrap();

    assert!(pair.is_none());
    assert_eq!(meta.last_index, 5);
}

#[tokio::test]
async fn test_kv_acquire_and_release() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/kv/service/leader"))
        .and(query_param("acquire", "session-1"))
        .and(query_param("flags", LOCK_FLAG_VALUE.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/kv/service/leader"))
        .and(query_param("release", "session-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(false)))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(
        client
            .kv_acquire("service/leader", "session-1", LOCK_FLAG_VALUE, &[])
            .await
            .unwrap()
    );
    assert!(
        !client
            .kv_release("service/leader", "session-1", LOCK_FLAG_VALUE)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_datacenter_parameter() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/destroy/session-1"))
        .and(query_param("dc", "dc2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        ConsulClient::new(ConsulClientConfig::new(&server.uri()).with_datacenter("dc2")).unwrap();
    assert!(client.session_destroy("session-1").await.unwrap());
}

#[tokio::test]
async fn test_server_error_on_acquire_with_dead_session() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/kv/service/leader"))
        .respond_with(ResponseTemplate::new(500).set_body_string("invalid session \"dead\""))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .kv_acquire("service/leader", "dead", LOCK_FLAG_VALUE, &[])
        .await
        .unwrap_err();

    assert!(err.is_invalid_session());
    assert!(!err.is_client_error());
}
