use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::Path,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Router,
};
use beach_tide::{ChannelClient, ChannelConfig, SubscriptionError, SubscriptionState, Topic};
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::{timeout, Duration};

const TOKEN: &str = "secret";
const WAIT: Duration = Duration::from_secs(5);

async fn channel(Path(topic): Path<String>, headers: HeaderMap) -> Response {
    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == format!("Bearer {TOKEN}"));
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let events = vec![
        Event::default()
            .event(topic)
            .data(r#"{"title":"Disk full","message":"90% used"}"#),
        Event::default().data("heartbeat"),
        Event::default().data("not-json"),
        Event::default().event("TaskProgress").data(r#"{"pct":10}"#),
        Event::default().id("3").data(r#"{"seq":3}"#),
    ];
    let frames = stream::iter(events.into_iter().map(Ok::<_, Infallible>))
        .chain(stream::pending::<Result<Event, Infallible>>());
    Sse::new(frames).into_response()
}

async fn serve() -> SocketAddr {
    let app = Router::new().route("/sse/:topic", get(channel));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

fn config(addr: SocketAddr, token: &str) -> ChannelConfig {
    ChannelConfig {
        base_url: format!("http://{addr}"),
        auth_token: Some(token.to_string()),
        reconnect: false,
        ..ChannelConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn receives_events_over_http() {
    let addr = serve().await;
    let client = ChannelClient::http(config(addr, TOKEN));
    let (tx, mut rx) = unbounded_channel();
    let (err_tx, mut err_rx) = unbounded_channel();
    let subscription = client
        .subscribe("SystemNotification")
        .handler(move |payload: Value, topic: &Topic| {
            let _ = tx.send((payload, topic.to_string()));
        })
        .on_error(move |err: &SubscriptionError, _topic: &Topic| {
            let _ = err_tx.send(err.is_decode());
        })
        .open()
        .expect("subscription opens");

    let (first, topic) = timeout(WAIT, rx.recv()).await.expect("timeout").expect("first");
    assert_eq!(first, json!({"title": "Disk full", "message": "90% used"}));
    assert_eq!(topic, "SystemNotification");

    let (second, _) = timeout(WAIT, rx.recv()).await.expect("timeout").expect("second");
    assert_eq!(second, json!({"seq": 3}));

    assert_eq!(err_rx.try_recv().ok(), Some(true));
    assert!(err_rx.try_recv().is_err());

    let stats = subscription.stats();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.heartbeats, 1);
    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(stats.last_event_id.as_deref(), Some("3"));
    assert_eq!(subscription.state(), SubscriptionState::Open);

    subscription.close();
    timeout(WAIT, subscription.released())
        .await
        .expect("release timeout");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_stream_without_reconnect_closes() {
    let addr = serve().await;
    let client = ChannelClient::http(config(addr, "wrong"));
    let (err_tx, mut err_rx) = unbounded_channel();
    let subscription = client
        .subscribe("SystemNotification")
        .handler(|_payload: Value, _topic: &Topic| {})
        .on_error(move |err: &SubscriptionError, _topic: &Topic| {
            let _ = err_tx.send(err.is_transport());
        })
        .open()
        .expect("subscription opens");

    let mut state = subscription.watch_state();
    timeout(WAIT, state.wait_for(|state| *state == SubscriptionState::Closed))
        .await
        .expect("close timeout")
        .expect("state channel open");
    assert_eq!(err_rx.recv().await, Some(true));
    assert!(subscription.is_closed());
}
