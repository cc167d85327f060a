//! End-to-end tests over loopback sockets
//!
//! A fake relay speaks MLLP on one port and a fake analyzer HTTP endpoint
//! answers on another; the orchestrator runs against both unchanged.

use bc10_analyzer::integration::{
    AnalyzerIntegration, InMemoryLabRequestStore, LabRequestId, LabRequestRecord,
    LabRequestStatus, LabRequestStore, PersistenceOutcome,
};
use bc10_analyzer::io::socket::read_frame;
use bc10_analyzer::io::{AnalyzerEndpoint, TransportConfig, TransportMode};
use bc10_analyzer::mapping::Flag;
use bc10_analyzer::protocol::frame::{self, MAX_FRAME_SIZE};
use bc10_analyzer::protocol::{ResultSource, ResultStatus};
use bc10_analyzer::AnalyzerError;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const CBC001_REPLY: &str = "MSH|^~\\&|BC-10|MINDRAY|||20260105093000||ORU^R01|1|P|2.3.1\r\
    PID|1||CBC001\r\
    OBX|WBC|7.2|10^9/L|N\r\
    OBX|HGB|13.8|g/dL|N\r\
    OBX|PLT|285|10^9/L|N\r";

/// Relay that answers every query frame with `reply` after `delay`
///
/// Received query frames are forwarded on the returned channel.
async fn fake_relay(
    reply: Option<&'static str>,
    delay: Duration,
) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Ok(query) = read_frame(&mut stream, MAX_FRAME_SIZE).await {
                    let _ = tx.send(String::from_utf8_lossy(frame::unwrap(&query)).to_string());
                    tokio::time::sleep(delay).await;
                    match reply {
                        Some(text) => {
                            if stream.write_all(&frame::wrap(text.as_bytes())).await.is_err() {
                                return;
                            }
                        }
                        // Hold the connection open and never answer
                        None => tokio::time::sleep(Duration::from_secs(60)).await,
                    }
                }
            });
        }
    });

    (addr, rx)
}

/// Relay that answers each query with its own sample id after `delay`
///
/// With `drop_first` the first accepted connection is closed unanswered, as a
/// relay restart would.
async fn echo_relay(delay: Duration, drop_first: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let mut pending_drop = drop_first;
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            if std::mem::take(&mut pending_drop) {
                drop(stream);
                continue;
            }
            tokio::spawn(async move {
                while let Ok(query) = read_frame(&mut stream, MAX_FRAME_SIZE).await {
                    let text = String::from_utf8_lossy(frame::unwrap(&query)).to_string();
                    let sample_id = text
                        .split('\r')
                        .find(|seg| seg.starts_with("QRD|"))
                        .and_then(|seg| seg.split('|').nth(4))
                        .unwrap_or_default()
                        .to_string();
                    tokio::time::sleep(delay).await;
                    let reply = format!("MSH|^~\\&\rPID|1||{}\rOBX|WBC|7.2|10^9/L|N", sample_id);
                    if stream.write_all(&frame::wrap(reply.as_bytes())).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    addr
}

/// HTTP endpoint answering every request with the same status and body
async fn fake_http(status_line: &'static str, body: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let Ok(n) = stream.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&buf).to_string();
                    if let Some(head_end) = text.find("\r\n\r\n") {
                        let declared = text[..head_end]
                            .lines()
                            .find_map(|l| {
                                l.to_ascii_lowercase()
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                            })
                            .unwrap_or(0);
                        if buf.len() >= head_end + 4 + declared {
                            break;
                        }
                    }
                }
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });

    port
}

/// A loopback port with nothing listening on it
async fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

fn short_timeouts() -> TransportConfig {
    TransportConfig::default()
        .with_timeouts(Duration::from_millis(300), Duration::from_millis(300))
        .with_probe_timeout(Duration::from_millis(300))
}

async fn store_with(id: &str) -> Arc<InMemoryLabRequestStore> {
    let store = Arc::new(InMemoryLabRequestStore::new());
    store.insert(LabRequestRecord::pending(id)).await;
    store
}

#[tokio::test]
async fn test_cbc001_through_relay() {
    let (relay_addr, mut queries) = fake_relay(Some(CBC001_REPLY), Duration::ZERO).await;
    let store = store_with("LR-100").await;
    let integration = AnalyzerIntegration::connect_to(
        AnalyzerEndpoint::bc10("127.0.0.1").unwrap(),
        short_timeouts().with_relay_addr(relay_addr),
        store.clone(),
    )
    .unwrap();
    let id = LabRequestId::from("LR-100");

    let outcome = integration
        .request_cbc_result("CBC001", Some(&id))
        .await
        .unwrap()
        .expect("CBC001 should produce a result");

    let result = &outcome.result;
    assert_eq!(result.sample_id, "CBC001");
    assert_eq!(result.test_code, "CBC");
    assert_eq!(result.status, ResultStatus::Completed);
    assert_eq!(result.source, ResultSource::Analyzer);

    let got: Vec<_> = result
        .components
        .iter()
        .map(|c| (c.canonical_name.as_str(), c.value.as_str(), c.flag.clone()))
        .collect();
    assert_eq!(
        got,
        vec![
            ("WBC", "7.2", Flag::Normal),
            ("HGB", "13.8", Flag::Normal),
            ("PLT", "285", Flag::Normal),
        ]
    );

    // The relay saw a well-formed query for the sample
    let query = queries.recv().await.unwrap();
    assert!(query.starts_with("MSH|^~\\&|HMIS|LAB|BC-10|MINDRAY|"));
    assert!(query.contains("QRY^R02"));
    assert!(query.contains("|R|I|CBC001|||RD^ALL|CBC001|RES|||T"));

    assert_eq!(outcome.persistence, PersistenceOutcome::Saved);
    let record = store.get(&id).await.unwrap().unwrap();
    assert_eq!(record.status, LabRequestStatus::ResultsImported);
    assert!(record.imported_from_analyzer);
    assert_eq!(record.components["HGB"].unit, "g/dL");

    integration.disconnect().await;
}

#[tokio::test]
async fn test_relay_connection_is_reused() {
    let (relay_addr, mut queries) = fake_relay(Some(CBC001_REPLY), Duration::ZERO).await;
    let integration = AnalyzerIntegration::connect_to(
        AnalyzerEndpoint::bc10("127.0.0.1").unwrap(),
        short_timeouts().with_relay_addr(relay_addr),
        Arc::new(InMemoryLabRequestStore::new()),
    )
    .unwrap();

    for _ in 0..3 {
        assert!(integration.request_cbc_result("CBC001", None).await.unwrap().is_some());
    }
    for _ in 0..3 {
        assert!(queries.recv().await.unwrap().contains("CBC001"));
    }
}

#[tokio::test]
async fn test_cancelled_request_does_not_leak_reply() {
    let relay_addr = echo_relay(Duration::from_millis(200), false).await;
    let integration = AnalyzerIntegration::connect_to(
        AnalyzerEndpoint::bc10("127.0.0.1").unwrap(),
        short_timeouts().with_relay_addr(relay_addr),
        Arc::new(InMemoryLabRequestStore::new()),
    )
    .unwrap();

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        integration.request_cbc_result("SAMPLE-A", None),
    )
    .await;
    assert!(cancelled.is_err());

    let outcome = integration
        .request_cbc_result("SAMPLE-B", None)
        .await
        .unwrap()
        .expect("SAMPLE-B gets its own reply");
    assert_eq!(outcome.result.sample_id, "SAMPLE-B");
}

#[tokio::test]
async fn test_held_connection_reverified_after_relay_restart() {
    let relay_addr = echo_relay(Duration::ZERO, true).await;
    let integration = AnalyzerIntegration::connect_to(
        AnalyzerEndpoint::bc10("127.0.0.1").unwrap(),
        short_timeouts().with_relay_addr(relay_addr),
        Arc::new(InMemoryLabRequestStore::new()),
    )
    .unwrap();

    assert!(integration.initialize().await.connected);
    // The relay has closed the connection the connect step opened
    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcome = integration.request_cbc_result("S1", None).await.unwrap().unwrap();
    assert_eq!(outcome.result.sample_id, "S1");
    assert_eq!(outcome.result.components[0].canonical_name, "WBC");
}

#[tokio::test]
async fn test_relay_timeout_and_http_failure_name_both_strategies() {
    let (relay_addr, _queries) = fake_relay(None, Duration::ZERO).await;
    let http_port = fake_http("503 Service Unavailable", "").await;
    let store = store_with("LR-200").await;

    let integration = AnalyzerIntegration::connect_to(
        AnalyzerEndpoint::new("127.0.0.1", http_port, TransportMode::RelaySocket).unwrap(),
        short_timeouts().with_relay_addr(relay_addr),
        store.clone(),
    )
    .unwrap();
    let id = LabRequestId::from("LR-200");

    let err = integration
        .request_cbc_result("CBC001", Some(&id))
        .await
        .unwrap_err();

    match &err {
        AnalyzerError::Transport(failure) => {
            assert_eq!(failure.strategies(), vec!["relay-socket", "http-poll"]);
            assert!(failure.attempts[0].reason.contains("300 ms"));
            assert!(failure.attempts[1].reason.contains("503"));
        }
        other => panic!("expected transport failure, got {other}"),
    }
    let text = err.to_string();
    assert!(text.contains("relay-socket") && text.contains("http-poll"));
    assert!(text.contains("relay process"));

    // No simulated data was written in place of the failed read
    let record = store.get(&id).await.unwrap().unwrap();
    assert!(record.components.is_empty());
    assert_eq!(record.status, LabRequestStatus::Pending);
}

#[tokio::test]
async fn test_http_fallback_when_relay_is_down() {
    let http_port = fake_http(
        "200 OK",
        r#"{"sampleId":"CBC002","testCode":"CBC","results":[
            {"code":"WBC","value":11.4,"unit":"10^9/L","flag":"H"},
            {"code":"LYMPH%","value":"31.0","unit":"%","flag":"N"},
            {"code":"XYZ","value":1,"unit":"","flag":""}
        ]}"#,
    )
    .await;

    let integration = AnalyzerIntegration::connect_to(
        AnalyzerEndpoint::new("127.0.0.1", http_port, TransportMode::RelaySocket).unwrap(),
        short_timeouts().with_relay_addr(closed_port().await),
        Arc::new(InMemoryLabRequestStore::new()),
    )
    .unwrap();

    let outcome = integration
        .request_cbc_result("CBC002", None)
        .await
        .unwrap()
        .unwrap();

    let names: Vec<_> = outcome
        .result
        .components
        .iter()
        .map(|c| c.canonical_name.as_str())
        .collect();
    assert_eq!(names, vec!["WBC", "LYM%"]);
    assert_eq!(outcome.result.components[0].value, "11.4");
    assert_eq!(outcome.result.components[0].flag, Flag::High);
}

#[tokio::test]
async fn test_second_request_is_rejected_while_awaiting_reply() {
    let (relay_addr, _queries) = fake_relay(Some(CBC001_REPLY), Duration::from_millis(200)).await;
    let integration = Arc::new(
        AnalyzerIntegration::connect_to(
            AnalyzerEndpoint::bc10("127.0.0.1").unwrap(),
            short_timeouts().with_relay_addr(relay_addr),
            Arc::new(InMemoryLabRequestStore::new()),
        )
        .unwrap(),
    );

    let first = {
        let integration = integration.clone();
        tokio::spawn(async move { integration.request_cbc_result("CBC001", None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = integration.request_cbc_result("CBC001", None).await;
    assert!(matches!(second, Err(AnalyzerError::Busy)));

    let first = first.await.unwrap().unwrap().unwrap();
    assert_eq!(first.result.sample_id, "CBC001");
}

#[tokio::test]
async fn test_status_follows_initialize_and_disconnect() {
    let (relay_addr, _queries) = fake_relay(Some(CBC001_REPLY), Duration::ZERO).await;
    let integration = AnalyzerIntegration::connect_to(
        AnalyzerEndpoint::bc10("127.0.0.1").unwrap(),
        short_timeouts().with_relay_addr(relay_addr),
        Arc::new(InMemoryLabRequestStore::new()),
    )
    .unwrap();

    assert!(!integration.connection_status().connected);
    assert!(integration.initialize().await.connected);
    integration.disconnect().await;
    assert!(!integration.connection_status().connected);
}

#[tokio::test]
async fn test_initialize_without_any_analyzer() {
    let http_port = closed_port().await;
    let http_port: u16 = http_port.rsplit(':').next().unwrap().parse().unwrap();
    let integration = AnalyzerIntegration::connect_to(
        AnalyzerEndpoint::new("127.0.0.1", http_port, TransportMode::RelaySocket).unwrap(),
        short_timeouts().with_relay_addr(closed_port().await),
        Arc::new(InMemoryLabRequestStore::new()),
    )
    .unwrap();

    let status = integration.initialize().await;
    assert!(!status.connected);
    assert_eq!(status.host, "127.0.0.1");

    // Disconnecting a never-connected client is a no-op
    integration.disconnect().await;
}

#[tokio::test]
async fn test_save_then_clear_round() {
    let store = store_with("LR-300").await;
    let integration = AnalyzerIntegration::connect_to(
        AnalyzerEndpoint::bc10("127.0.0.1").unwrap(),
        short_timeouts(),
        store.clone(),
    )
    .unwrap();
    let id = LabRequestId::from("LR-300");

    let mocked = integration.mock_request_result("CBC001", Some(&id)).await.unwrap();
    assert_eq!(mocked.result.source, ResultSource::Simulated);

    let second = integration.mock_request_result("CBC777", None).await.unwrap();
    integration
        .save_component_values(&id, &second.result.component_map())
        .await
        .unwrap();
    let record = store.get(&id).await.unwrap().unwrap();
    assert_eq!(record.components, second.result.component_map());
    assert!(!record.imported_from_analyzer);

    integration.clear_component_values(&id).await.unwrap();
    let record = store.get(&id).await.unwrap().unwrap();
    assert_eq!(record, LabRequestRecord::pending("LR-300"));
}
