//! Unit tests for request/reply correlation.
//!
//! The correlator writes through a real writer task into an in-memory
//! duplex; the test reads the framed commands back out and feeds replies
//! straight into `on_frame`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::io::DuplexStream;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use browser_bridge::correlator::{CommandEnvelope, RequestCorrelator};
use browser_bridge::http::broadcast::BroadcastRouter;
use browser_bridge::peer::codec::PeerCodec;
use browser_bridge::peer::writer::spawn_writer;
use browser_bridge::AppError;

const WAIT: Duration = Duration::from_secs(5);

/// Allowed lateness of a deadline-driven rejection.
const TOLERANCE: Duration = Duration::from_millis(150);

struct Harness {
    correlator: Arc<RequestCorrelator>,
    broadcaster: Arc<BroadcastRouter>,
    outbound: FramedRead<DuplexStream, PeerCodec>,
    _cancel: CancellationToken,
}

impl Harness {
    fn new(default_timeout: Duration) -> Self {
        let (gateway_side, peer_side) = tokio::io::duplex(64 * 1024);
        let cancel = CancellationToken::new();
        let (sender, _writer) = spawn_writer(gateway_side, cancel.clone());
        let broadcaster = Arc::new(BroadcastRouter::new());
        let correlator = Arc::new(RequestCorrelator::new(
            sender,
            Arc::clone(&broadcaster),
            default_timeout,
        ));

        Self {
            correlator,
            broadcaster,
            outbound: FramedRead::new(peer_side, PeerCodec::new()),
            _cancel: cancel,
        }
    }

    fn spawn_request(
        &self,
        command: &str,
        timeout: Duration,
    ) -> tokio::task::JoinHandle<browser_bridge::Result<Value>> {
        let correlator = Arc::clone(&self.correlator);
        let command = command.to_owned();
        tokio::spawn(async move { correlator.send_and_wait(&command, timeout).await })
    }

    async fn next_command(&mut self) -> CommandEnvelope {
        let frame = tokio::time::timeout(WAIT, self.outbound.next())
            .await
            .expect("command frame in time")
            .expect("peer stream open")
            .expect("well-formed frame");
        serde_json::from_value(frame).expect("command envelope")
    }
}

fn response(request_id: &str, response: Value) -> Value {
    json!({"type": "commandResponse", "requestId": request_id, "response": response})
}

fn error(request_id: &str, error: Value) -> Value {
    json!({"type": "commandError", "requestId": request_id, "error": error})
}

async fn join<T>(handle: tokio::task::JoinHandle<T>) -> T {
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("request finished in time")
        .expect("request task")
}

#[tokio::test]
async fn response_resolves_the_matching_request() {
    let mut h = Harness::new(WAIT);
    let request = h.spawn_request("ping hello", WAIT);

    let command = h.next_command().await;
    assert_eq!(command.kind, CommandEnvelope::TYPE);
    assert_eq!(command.payload, "ping hello");
    assert!(uuid::Uuid::parse_str(&command.request_id).is_ok());
    assert_eq!(h.correlator.pending_count(), 1);

    h.correlator
        .on_frame(response(&command.request_id, json!("pong hello")));

    assert_eq!(join(request).await.unwrap(), json!("pong hello"));
    assert_eq!(h.correlator.pending_count(), 0);
}

#[tokio::test]
async fn missing_response_field_resolves_to_null() {
    let mut h = Harness::new(WAIT);
    let request = h.spawn_request("close tab", WAIT);
    let command = h.next_command().await;

    h.correlator.on_frame(
        json!({"type": "commandResponse", "requestId": command.request_id}),
    );

    assert_eq!(join(request).await.unwrap(), Value::Null);
}

#[tokio::test]
async fn command_error_rejects_with_peer_text() {
    let mut h = Harness::new(WAIT);
    let request = h.spawn_request("focus 99", WAIT);
    let command = h.next_command().await;

    h.correlator
        .on_frame(error(&command.request_id, json!("no such tab")));

    match join(request).await {
        Err(AppError::Peer(text)) => assert_eq!(text, "no such tab"),
        other => panic!("expected peer error, got {other:?}"),
    }
}

#[tokio::test]
async fn non_string_error_payload_is_rendered_as_json() {
    let mut h = Harness::new(WAIT);
    let first = h.spawn_request("a", WAIT);
    let first_cmd = h.next_command().await;
    let second = h.spawn_request("b", WAIT);
    let second_cmd = h.next_command().await;

    h.correlator
        .on_frame(error(&first_cmd.request_id, json!({"code": 5})));
    h.correlator
        .on_frame(error(&second_cmd.request_id, Value::Null));

    match join(first).await {
        Err(AppError::Peer(text)) => assert_eq!(text, r#"{"code":5}"#),
        other => panic!("expected peer error, got {other:?}"),
    }
    match join(second).await {
        Err(AppError::Peer(text)) => assert_eq!(text, "peer reported an error"),
        other => panic!("expected peer error, got {other:?}"),
    }
}

#[tokio::test]
async fn timeout_names_the_request_and_removes_it() {
    let mut h = Harness::new(WAIT);
    let started = Instant::now();
    let request = h.spawn_request("slow", Duration::from_millis(200));
    let command = h.next_command().await;

    let outcome = join(request).await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200), "rejected early: {elapsed:?}");
    assert!(
        elapsed < Duration::from_millis(200) + TOLERANCE,
        "rejected late: {elapsed:?}"
    );

    match outcome {
        Err(AppError::Timeout(msg)) => {
            assert!(msg.contains(&command.request_id), "missing id: {msg}");
            assert!(msg.contains("200ms"), "missing timeout: {msg}");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(h.correlator.pending_count(), 0);
}

#[tokio::test]
async fn late_reply_after_timeout_is_broadcast() {
    let mut h = Harness::new(WAIT);
    let mut subscriber = h.broadcaster.subscribe();
    let request = h.spawn_request("slow", Duration::from_millis(100));
    let command = h.next_command().await;
    assert!(join(request).await.is_err());

    let late = response(&command.request_id, json!("too late"));
    h.correlator.on_frame(late.clone());

    let data = tokio::time::timeout(WAIT, subscriber.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(serde_json::from_str::<Value>(&data).unwrap(), late);
}

#[tokio::test]
async fn replies_may_arrive_out_of_order() {
    let mut h = Harness::new(WAIT);
    let first = h.spawn_request("one", WAIT);
    let first_cmd = h.next_command().await;
    let second = h.spawn_request("two", WAIT);
    let second_cmd = h.next_command().await;
    assert_ne!(first_cmd.request_id, second_cmd.request_id);

    h.correlator
        .on_frame(response(&second_cmd.request_id, json!("second")));
    assert_eq!(join(second).await.unwrap(), json!("second"));
    assert_eq!(h.correlator.pending_count(), 1);

    h.correlator
        .on_frame(response(&first_cmd.request_id, json!("first")));
    assert_eq!(join(first).await.unwrap(), json!("first"));
}

#[tokio::test]
async fn unsolicited_frame_goes_to_subscribers() {
    let h = Harness::new(WAIT);
    let mut subscriber = h.broadcaster.subscribe();
    let event = json!({"type": "tabUpdated", "tabId": 7});

    h.correlator.on_frame(event.clone());

    let data = tokio::time::timeout(WAIT, subscriber.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(serde_json::from_str::<Value>(&data).unwrap(), event);
}

#[tokio::test]
async fn duplicate_reply_completes_once_then_broadcasts() {
    let mut h = Harness::new(WAIT);
    let mut subscriber = h.broadcaster.subscribe();
    let request = h.spawn_request("ping", WAIT);
    let command = h.next_command().await;

    let reply = response(&command.request_id, json!("pong"));
    h.correlator.on_frame(reply.clone());
    h.correlator
        .on_frame(response(&command.request_id, json!("again")));

    assert_eq!(join(request).await.unwrap(), json!("pong"));
    let data = tokio::time::timeout(WAIT, subscriber.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        serde_json::from_str::<Value>(&data).unwrap(),
        response(&command.request_id, json!("again"))
    );
}

#[tokio::test]
async fn matching_id_with_other_type_is_broadcast_and_request_stays_pending() {
    let mut h = Harness::new(WAIT);
    let mut subscriber = h.broadcaster.subscribe();
    let request = h.spawn_request("download", WAIT);
    let command = h.next_command().await;

    let progress = json!({"type": "progress", "requestId": command.request_id, "pct": 50});
    h.correlator.on_frame(progress.clone());

    let data = tokio::time::timeout(WAIT, subscriber.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(serde_json::from_str::<Value>(&data).unwrap(), progress);
    assert_eq!(h.correlator.pending_count(), 1);

    h.correlator
        .on_frame(response(&command.request_id, json!("done")));
    assert_eq!(join(request).await.unwrap(), json!("done"));
}

#[tokio::test]
async fn close_all_rejects_pending_and_refuses_new_requests() {
    let mut h = Harness::new(WAIT);
    let request = h.spawn_request("ping", WAIT);
    let _ = h.next_command().await;

    assert_eq!(h.correlator.close_all("peer closed the channel"), 1);
    assert!(h.correlator.is_closed());

    match join(request).await {
        Err(AppError::ChannelClosed(reason)) => assert_eq!(reason, "peer closed the channel"),
        other => panic!("expected channel closed, got {other:?}"),
    }

    let refused = h.correlator.send_and_wait("again", WAIT).await;
    assert!(matches!(refused, Err(AppError::ChannelClosed(_))));
    assert_eq!(h.correlator.close_all("second reason"), 0);
}

#[tokio::test]
async fn dropped_caller_removes_its_entry() {
    let mut h = Harness::new(WAIT);
    let request = h.spawn_request("ping", WAIT);
    let _ = h.next_command().await;
    assert_eq!(h.correlator.pending_count(), 1);

    request.abort();
    let _ = request.await;

    assert_eq!(h.correlator.pending_count(), 0);
}

#[tokio::test]
async fn dispatch_survives_the_caller_going_away() {
    let mut h = Harness::new(WAIT);
    let correlator = Arc::clone(&h.correlator);
    let caller = tokio::spawn(async move { correlator.dispatch("ping".into()).await });
    let command = h.next_command().await;

    caller.abort();
    let _ = caller.await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.correlator.pending_count(), 1, "request kept running");

    h.correlator
        .on_frame(response(&command.request_id, json!("pong")));
    assert_eq!(h.correlator.pending_count(), 0);
}

#[tokio::test]
async fn dispatch_applies_the_default_timeout() {
    let mut h = Harness::new(Duration::from_millis(150));
    assert_eq!(h.correlator.default_timeout(), Duration::from_millis(150));

    let started = Instant::now();
    let correlator = Arc::clone(&h.correlator);
    let caller = tokio::spawn(async move { correlator.dispatch("slow".into()).await });
    let _ = h.next_command().await;

    assert!(matches!(join(caller).await, Err(AppError::Timeout(_))));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(150), "rejected early: {elapsed:?}");
    assert!(
        elapsed < Duration::from_millis(150) + TOLERANCE,
        "rejected late: {elapsed:?}"
    );
}

#[tokio::test]
async fn stalled_peer_still_times_out_every_request() {
    // The peer side is never read, so the writer blocks and its queue fills.
    let (gateway_side, _unread_peer) = tokio::io::duplex(64);
    let cancel = CancellationToken::new();
    let (sender, _writer) = spawn_writer(gateway_side, cancel.clone());
    let correlator = Arc::new(RequestCorrelator::new(
        sender,
        Arc::new(BroadcastRouter::new()),
        WAIT,
    ));

    let timeout = Duration::from_millis(200);
    let started = Instant::now();
    let requests: Vec<_> = (0..300)
        .map(|n| {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                correlator.send_and_wait(&format!("cmd {n}"), timeout).await
            })
        })
        .collect();

    for request in requests {
        match join(request).await {
            Err(AppError::Timeout(msg)) => assert!(msg.contains("200ms"), "{msg}"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
    let elapsed = started.elapsed();
    assert!(elapsed < timeout + Duration::from_secs(1), "took {elapsed:?}");
    assert_eq!(correlator.pending_count(), 0);
    cancel.cancel();
}
