#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use ecrlink_core::error::EcrError;
use ecrlink_core::protocol::envelope::{pack_response, unpack_request, ResponseEnvelope};
use ecrlink_sdk::pairing::PairingGate;
use ecrlink_sdk::store::DeviceStore;
use ecrlink_sdk::{
    EcrClient, EcrServer, PairingListener, PurchaseRequest, QueryRequest, QueryResponse,
    ResponseCallback, ServerListener, Terminal,
};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl ServerListener for Recorder {
    fn on_connect(&self, terminal: &Terminal) {
        self.events.lock().unwrap().push(format!("connect {}", terminal.id));
    }

    fn on_disconnect(&self, terminal: &Terminal, code: u16, _reason: &str, remote: bool) {
        self.events
            .lock()
            .unwrap()
            .push(format!("disconnect {} {code} remote={remote}", terminal.id));
    }
}

fn reply_to(request: &[u8]) -> Message {
    let req = unpack_request(request).unwrap();
    let reply = ResponseEnvelope::ok(req.msg_id, &json!({ "transNo": "T1", "transStatus": "S" }));
    Message::Binary(pack_response(&reply).to_vec())
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Correlated reply whose business payload is not JSON.
fn garbled_reply_to(request: &[u8]) -> Message {
    let req = unpack_request(request).unwrap();
    let reply = ResponseEnvelope {
        msg_id: req.msg_id,
        success: true,
        biz_data: "{not json".into(),
        ..Default::default()
    };
    Message::Binary(pack_response(&reply).to_vec())
}

/// A terminal that answers every binary request until the socket ends.
async fn answering_peer(listener: TcpListener) {
    peer_replying_with(listener, reply_to).await
}

async fn peer_replying_with(listener: TcpListener, reply: fn(&[u8]) -> Message) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Binary(b) => ws.send(reply(&b)).await.unwrap(),
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn silent_peer(listener: TcpListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    while let Some(Ok(_)) = ws.next().await {}
}

#[tokio::test]
async fn server_executes_against_connected_terminal() {
    let server = EcrServer::new(common::test_config()).unwrap();
    let recorder = Arc::new(Recorder::default());
    server.set_listener(recorder.clone());
    let addr = server.start().await.unwrap();

    let url = format!("ws://127.0.0.1:{}/?mac=AA:BB:CC:DD:EE:FF", addr.port());
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let terminal = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Binary(b) = msg {
                ws.send(reply_to(&b)).await.unwrap();
            }
        }
    });

    wait_until(|| server.terminals().len() == 1).await;
    let t = server.terminals().remove(0);
    assert_eq!(t.mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    assert_eq!(t.ip.to_string(), "127.0.0.1");

    let req = PurchaseRequest {
        merchant_order_no: "A1".into(),
        order_amount: "1.00".into(),
        ..Default::default()
    };
    let resp = server.execute(&t.id, &req).await.unwrap().unwrap();
    assert!(resp.success);
    assert_eq!(resp.biz.trans_no.as_deref(), Some("T1"));

    server.disconnect(&t.id).await.unwrap();
    wait_until(|| recorder.events.lock().unwrap().len() == 2).await;
    assert!(server.terminals().is_empty());
    terminal.await.unwrap();

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            format!("connect {}", t.id),
            format!("disconnect {} 1000 remote=false", t.id),
        ]
    );
    server.stop().await;
}

#[tokio::test]
async fn remote_close_is_reported_as_remote() {
    let server = EcrServer::new(common::test_config()).unwrap();
    let recorder = Arc::new(Recorder::default());
    server.set_listener(recorder.clone());
    let addr = server.start().await.unwrap();

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/", addr.port()))
        .await
        .unwrap();
    wait_until(|| server.terminals().len() == 1).await;
    ws.close(None).await.unwrap();
    wait_until(|| recorder.events.lock().unwrap().len() == 2).await;

    let last = recorder.events.lock().unwrap()[1].clone();
    assert!(last.ends_with("remote=true"), "{last}");
    server.stop().await;
}

#[tokio::test]
async fn terminal_ping_is_answered_once() {
    let server = EcrServer::new(common::test_config()).unwrap();
    let addr = server.start().await.unwrap();

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/", addr.port()))
        .await
        .unwrap();
    wait_until(|| server.terminals().len() == 1).await;
    ws.send(Message::Ping(b"p".to_vec())).await.unwrap();

    let mut pongs = 0;
    let window = tokio::time::sleep(Duration::from_millis(300));
    tokio::pin!(window);
    loop {
        tokio::select! {
            _ = &mut window => break,
            msg = ws.next() => match msg {
                Some(Ok(Message::Pong(p))) if p == b"p" => pongs += 1,
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
    assert_eq!(pongs, 1);
    server.stop().await;
}

#[tokio::test]
async fn unknown_terminal_is_protocol_violation() {
    let server = EcrServer::new(common::test_config()).unwrap();
    server.start().await.unwrap();

    let err = server
        .send("10.9.9.9:1234", Bytes::from_static(b"x"))
        .await
        .unwrap_err();
    assert!(matches!(err, EcrError::ProtocolViolation(_)));

    let req = QueryRequest {
        merchant_order_no: "A1".into(),
        ..Default::default()
    };
    let err = server.execute("10.9.9.9:1234", &req).await.unwrap_err();
    assert_eq!(err.kind().as_str(), "PROTOCOL_VIOLATION");
    server.stop().await;
}

#[tokio::test]
async fn client_executes_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(answering_peer(listener));

    let client = EcrClient::new(common::test_config()).unwrap();
    client.connect_websocket(&format!("ws://{addr}")).await.unwrap();

    let req = QueryRequest {
        merchant_order_no: "A1".into(),
        ..Default::default()
    }
    .with_msg_id("q1");
    let resp = client.execute(&req).await.unwrap().unwrap();
    assert_eq!(resp.msg_id, "q1");
    assert_eq!(resp.biz.trans_status.as_deref(), Some("S"));

    client.close().await;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn client_times_out_when_terminal_is_silent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(silent_peer(listener));

    let client = EcrClient::new(common::test_config()).unwrap();
    client.connect_websocket(&format!("ws://{addr}")).await.unwrap();

    let req = QueryRequest {
        merchant_order_no: "A1".into(),
        ..Default::default()
    }
    .with_timeout(Duration::from_millis(150));
    let err = client.execute(&req).await.unwrap_err();
    assert!(err.is_retriable());
    assert!(client.is_connected());

    client.close().await;
}

#[derive(Debug)]
enum Outcome {
    Response(String),
    Timeout(&'static str),
    Error(&'static str),
}

struct Forward(mpsc::UnboundedSender<Outcome>);

impl ResponseCallback<QueryResponse> for Forward {
    fn on_response(&self, response: QueryResponse) {
        let _ = self.0.send(Outcome::Response(response.msg_id));
    }

    fn on_timeout(&self, error: EcrError) {
        let _ = self.0.send(Outcome::Timeout(error.kind().as_str()));
    }

    fn on_error(&self, error: EcrError) {
        let _ = self.0.send(Outcome::Error(error.kind().as_str()));
    }
}

#[tokio::test]
async fn async_execute_routes_outcomes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(answering_peer(listener));

    let client = EcrClient::new(common::test_config()).unwrap();
    client.connect_websocket(&format!("ws://{addr}")).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let req = QueryRequest {
        merchant_order_no: "A1".into(),
        ..Default::default()
    }
    .with_msg_id("a1");
    client
        .async_execute(req, Box::new(Forward(tx.clone())))
        .unwrap()
        .await
        .unwrap();
    match rx.recv().await.unwrap() {
        Outcome::Response(id) => assert_eq!(id, "a1"),
        other => panic!("unexpected {other:?}"),
    }

    client.close().await;

    let req = QueryRequest::default();
    let err = match client.async_execute(req, Box::new(Forward(tx))) {
        Err(e) => e,
        Ok(_) => panic!("closed client must refuse"),
    };
    assert_eq!(err.kind().as_str(), "CONNECTION");
}

#[tokio::test]
async fn async_execute_reports_silence_as_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(silent_peer(listener));

    let client = EcrClient::new(common::test_config()).unwrap();
    client.connect_websocket(&format!("ws://{addr}")).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let req = QueryRequest {
        merchant_order_no: "A1".into(),
        ..Default::default()
    }
    .with_timeout(Duration::from_millis(150));
    client
        .async_execute(req, Box::new(Forward(tx)))
        .unwrap()
        .await
        .unwrap();
    match rx.recv().await.unwrap() {
        Outcome::Timeout(kind) => assert_eq!(kind, "READ_TIMEOUT"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(client.is_connected());

    client.close().await;
}

#[tokio::test]
async fn undecodable_reply_is_none_or_decode_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(peer_replying_with(listener, garbled_reply_to));

    let client = EcrClient::new(common::test_config()).unwrap();
    client.connect_websocket(&format!("ws://{addr}")).await.unwrap();

    let req = QueryRequest {
        merchant_order_no: "A1".into(),
        ..Default::default()
    }
    .with_msg_id("g1");
    assert!(client.execute(&req).await.unwrap().is_none());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let req = QueryRequest {
        merchant_order_no: "A1".into(),
        ..Default::default()
    }
    .with_msg_id("g2");
    client
        .async_execute(req, Box::new(Forward(tx)))
        .unwrap()
        .await
        .unwrap();
    match rx.recv().await.unwrap() {
        Outcome::Error(kind) => assert_eq!(kind, "DECODE"),
        other => panic!("unexpected {other:?}"),
    }

    client.close().await;
}

struct Refuse;

impl PairingListener for Refuse {
    fn confirm(&self, _terminal: &Terminal) -> bool {
        false
    }
}

#[tokio::test]
async fn refused_pairing_closes_with_4001() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DeviceStore::open(dir.path().join("paired.json")).unwrap());

    let server = EcrServer::new(common::test_config()).unwrap();
    let recorder = Arc::new(Recorder::default());
    server.set_listener(recorder.clone());
    server.set_pairing(PairingGate::new(store.clone(), Arc::new(Refuse)));
    let addr = server.start().await.unwrap();

    let url = format!("ws://127.0.0.1:{}/?mac=11:22:33:44:55:66", addr.port());
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let code = loop {
        match ws.next().await {
            Some(Ok(Message::Close(Some(frame)))) => break u16::from(frame.code),
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {other:?}"),
        }
    };
    assert_eq!(code, 4001);
    assert!(server.terminals().is_empty());
    assert!(store.list().is_empty());
    assert!(recorder.events.lock().unwrap().is_empty());
    server.stop().await;
}
