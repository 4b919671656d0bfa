//! Request multiplexing against the mock server

mod common;

use std::time::Duration;
use tokio_test::assert_ok;
use uuid::Uuid;

use common::{test_config, MockServer, Reply};
use typedb_client::types::SessionId;
use typedb_client::wire::{QueryKind, QueryRequest, Request, Response, ResponseEnvelope, StreamTarget};
use typedb_client::{Client, ErrorKind, Options};

fn match_query(text: &str) -> Request {
    Request::Query(QueryRequest {
        kind: QueryKind::Match,
        query: text.to_string(),
        options: Options::new(),
    })
}

fn transaction_target() -> StreamTarget {
    StreamTarget::Transaction {
        session: SessionId::new(vec![1, 2, 3]),
        transaction: Uuid::new_v4(),
    }
}

fn query_text(request: &Request) -> Option<&str> {
    match request {
        Request::Query(query) => Some(&query.query),
        _ => None,
    }
}

#[tokio::test]
async fn test_requests_on_one_transaction_arrive_in_order() {
    let server = MockServer::single();
    let client = assert_ok!(Client::open_with("localhost:1729", server.connector(), test_config()).await);
    let transmitter = client.transmitter();

    let targets: Vec<StreamTarget> = (0..4).map(|_| transaction_target()).collect();
    let mut pending = Vec::new();
    for n in 0..10 {
        for (t, target) in targets.iter().enumerate() {
            pending.push(transmitter.submit(target.clone(), match_query(&format!("t{}-{}", t, n))));
        }
    }
    for result in pending {
        assert_ok!(result.wait().await);
    }

    let observed = server.observed();
    for (t, target) in targets.iter().enumerate() {
        let sequence: Vec<String> = observed
            .iter()
            .filter(|o| &o.target == target)
            .filter_map(|o| query_text(&o.request).map(str::to_string))
            .collect();
        let expected: Vec<String> = (0..10).map(|n| format!("t{}-{}", t, n)).collect();
        assert_eq!(sequence, expected);
    }

    client.close().await;
}

#[tokio::test]
async fn test_broken_streams_fail_outstanding_requests() {
    let server = MockServer::single();
    server.set_handler(|_, request| match request {
        Request::Query(_) => Reply::Silent,
        _ => Reply::Default,
    });
    let client = assert_ok!(Client::open_with("localhost:1729", server.connector(), test_config()).await);
    let transmitter = client.transmitter();

    let pending: Vec<_> = (0..6)
        .map(|n| transmitter.submit(transaction_target(), match_query(&format!("q{}", n))))
        .collect();
    server.wait_for("query", 6).await;
    server.break_streams();

    for result in pending {
        let err = result.wait_timeout(Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionLost);
    }
    assert_eq!(transmitter.pending_count(), 0);

    client.close().await;
}

#[tokio::test]
async fn test_recreated_stream_accepts_requests() {
    let server = MockServer::single();
    let client = assert_ok!(Client::open_with("localhost:1729", server.connector(), test_config()).await);
    let transmitter = client.transmitter();

    server.break_streams();
    let target = transaction_target();
    let stream = transmitter.stream_for(&target);
    for _ in 0..200 {
        if transmitter.is_stream_broken(stream) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(transmitter.is_stream_broken(stream));

    assert_ok!(transmitter.recreate_stream(stream).await);
    let response = assert_ok!(transmitter.submit(target, match_query("again")).wait().await);
    assert_eq!(response, Response::ConceptMaps(Vec::new()));

    client.close().await;
}

#[tokio::test]
async fn test_concurrent_duplicate_deliveries_fulfil_once() {
    let server = MockServer::single();
    server.set_handler(|_, request| match request {
        Request::Query(_) => Reply::Silent,
        _ => Reply::Default,
    });
    let client = assert_ok!(Client::open_with("localhost:1729", server.connector(), test_config()).await);
    let transmitter = client.transmitter().clone();

    let target = transaction_target();
    let stream = transmitter.stream_for(&target);
    let pending = transmitter.submit(target, match_query("once"));
    let envelope = ResponseEnvelope::ok(pending.id(), Response::Text("first".into()));

    let deliveries: Vec<_> = (0..16)
        .map(|_| {
            let transmitter = transmitter.clone();
            let envelope = envelope.clone();
            tokio::spawn(async move { transmitter.on_message(stream, envelope) })
        })
        .collect();
    for delivery in deliveries {
        assert_ok!(delivery.await);
    }

    let response = assert_ok!(pending.wait().await);
    assert_eq!(response, Response::Text("first".into()));
    assert_eq!(transmitter.pending_count(), 0);

    // A late duplicate for a finished request is dropped without effect
    transmitter.on_message(stream, envelope);
    assert_eq!(transmitter.pending_count(), 0);

    client.close().await;
}

#[tokio::test]
async fn test_close_fails_pending_with_illegal_state() {
    let server = MockServer::single();
    server.set_handler(|_, request| match request {
        Request::Query(_) => Reply::Silent,
        _ => Reply::Default,
    });
    let client = assert_ok!(Client::open_with("localhost:1729", server.connector(), test_config()).await);

    let pending = client.transmitter().submit(transaction_target(), match_query("never"));
    server.wait_for("query", 1).await;
    client.close().await;

    let err = pending.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);
    assert!(client.transmitter().is_closed());
}
