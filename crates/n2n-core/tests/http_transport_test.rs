//! Integration tests for the API destination over real HTTP
//!
//! A wiremock server stands in for the remote endpoint. Retry delays are
//! configured as zero so the tests don't sleep.

use n2n_core::connectors::ApiDestination;
use n2n_core::{Destination, Record, Settings};
use serde_json::{Value, json};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record(id: &str, fields: Value) -> Record {
    let Value::Object(fields) = fields else {
        panic!("object expected")
    };
    Record::new(id, fields)
}

fn settings(server: &MockServer) -> Settings {
    Settings::new()
        .with("endpoint_url", format!("{}/ingest", server.uri()))
        .with("retry_attempts", 3)
        .with("retry_delay_seconds", 0)
}

async fn destination(settings: Settings) -> ApiDestination {
    let mut destination = ApiDestination::new();
    destination.initialize(&settings).await.unwrap();
    assert!(destination.validate().valid);
    destination
}

// =============================================================================
// Retry classification
// =============================================================================

#[tokio::test]
async fn test_503_is_attempted_retry_attempts_times() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ingest"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;

    let destination = destination(settings(&server)).await;
    let outcome = destination
        .write_one(&record("2", json!({"a": 1})))
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.status_code, Some(503));
    assert_eq!(outcome.metadata["attempts"], 3);
    assert!(outcome.error_message.unwrap().contains("overloaded"));
    let metrics = destination.metrics();
    assert_eq!(metrics.retries, 2);
    assert_eq!(metrics.status_codes.get(&503), Some(&3));
}

#[tokio::test]
async fn test_404_is_attempted_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let destination = destination(settings(&server)).await;
    let outcome = destination
        .write_one(&record("2", json!({"a": 1})))
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.status_code, Some(404));
    assert_eq!(destination.metrics().retries, 0);
}

#[tokio::test]
async fn test_recovers_after_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let destination = destination(settings(&server)).await;
    let outcome = destination
        .write_one(&record("2", json!({"a": 1})))
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.status_code, Some(201));
    assert_eq!(outcome.metadata["attempts"], 2);
}

#[tokio::test]
async fn test_429_retried_only_when_enabled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1 + 3)
        .mount(&server)
        .await;

    let plain = destination(settings(&server)).await;
    let outcome = plain.write_one(&record("2", json!({}))).await.unwrap();
    assert_eq!(outcome.metadata["attempts"], 1);

    let retrying = destination(settings(&server).with("retry_on_429", true)).await;
    let outcome = retrying.write_one(&record("2", json!({}))).await.unwrap();
    assert_eq!(outcome.status_code, Some(429));
    assert_eq!(outcome.metadata["attempts"], 3);
}

// =============================================================================
// Wire format
// =============================================================================

#[tokio::test]
async fn test_mapped_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/ingest"))
        .and(header("x-api-key", "secret"))
        .and(header("content-type", "application/vnd.crm+json"))
        .and(body_json(json!({
            "customer": {"id": "17", "email": "ada@example.com"},
            "origin": "import"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let destination = destination(
        settings(&server)
            .with("method", "patch")
            .with(
                "headers",
                json!({"X-Api-Key": "secret", "Content-Type": "application/vnd.crm+json"}),
            )
            .with(
                "field_mapping",
                json!({
                    "customer.id": "id",
                    "customer.email": "email",
                    "origin": "=import"
                }),
            ),
    )
    .await;

    let outcome = destination
        .write_one(&record(
            "2",
            json!({"id": "17", "email": "ada@example.com", "ignored": true}),
        ))
        .await
        .unwrap();

    assert!(outcome.success, "{:?}", outcome.error_message);
    assert_eq!(outcome.status_code, Some(204));
}

#[tokio::test]
async fn test_unmapped_records_are_sent_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"a": 1, "b": "two"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut destination = ApiDestination::new();
    destination.initialize(&settings(&server)).await.unwrap();
    let outcome = destination
        .write_one(&record("2", json!({"a": 1, "b": "two"})))
        .await
        .unwrap();
    assert!(outcome.success);
    destination.close().await.unwrap();
}

#[tokio::test]
async fn test_batch_to_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(10)
        .mount(&server)
        .await;

    let destination = destination(settings(&server).with("max_requests_per_second", 100)).await;
    let records: Vec<Record> = (0..10)
        .map(|i| record(&i.to_string(), json!({"n": i})))
        .collect();
    let batch = destination.write_batch(&records).await.unwrap();

    assert_eq!(batch.total, 10);
    assert_eq!(batch.success_count, 10);
    let ids: Vec<_> = batch.outcomes.iter().map(|o| o.record_id.as_str()).collect();
    assert_eq!(ids, vec!["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"]);
}

#[tokio::test]
async fn test_connection_refused_is_terminal() {
    // bind then release a port so nothing listens on it
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let destination = destination(
        Settings::new()
            .with("endpoint_url", format!("http://{addr}/ingest"))
            .with("retry_attempts", 3)
            .with("retry_delay_seconds", 0),
    )
    .await;
    let outcome = destination.write_one(&record("2", json!({}))).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.status_code, None);
    assert_eq!(outcome.metadata["attempts"], 1);
}
