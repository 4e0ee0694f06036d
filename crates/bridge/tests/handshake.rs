//! End-to-end bridge handshake tests over a real TCP socket: pairing
//! approval, token reconnect, rejection paths, and invoke round-trips.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
        net::{
            TcpListener, TcpStream,
            tcp::{OwnedReadHalf, OwnedWriteHalf},
        },
        sync::Mutex,
    },
    tokio_util::sync::CancellationToken,
};

use {
    clawdis_bridge::{BridgeEventSink, BridgeServer, NodeStore, OperatorPrompt, PairRequest},
    clawdis_protocol::bridge::BridgeFrame,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

struct CannedPrompt {
    approve: bool,
    seen_repair: Mutex<Vec<bool>>,
}

#[async_trait]
impl OperatorPrompt for CannedPrompt {
    async fn prompt_operator(&self, _request: &PairRequest, is_repair: bool) -> bool {
        self.seen_repair.lock().await.push(is_repair);
        self.approve
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(String, String)>>,
    presence: Mutex<Vec<(String, bool)>>,
}

#[async_trait]
impl BridgeEventSink for RecordingSink {
    async fn node_event(&self, node_id: &str, event: &str, _payload: Option<serde_json::Value>) {
        self.events
            .lock()
            .await
            .push((node_id.to_string(), event.to_string()));
    }

    async fn presence(&self, node_id: &str, online: bool) {
        self.presence
            .lock()
            .await
            .push((node_id.to_string(), online));
    }
}

struct Harness {
    server: Arc<BridgeServer>,
    store: Arc<NodeStore>,
    sink: Arc<RecordingSink>,
    prompt: Arc<CannedPrompt>,
    addr: std::net::SocketAddr,
    _tmp: tempfile::TempDir,
}

async fn start_harness(approve: bool) -> Harness {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(NodeStore::open(tmp.path().join("paired-nodes.json")).unwrap());
    let prompt = Arc::new(CannedPrompt {
        approve,
        seen_repair: Mutex::new(Vec::new()),
    });
    let sink = Arc::new(RecordingSink::default());
    let server = BridgeServer::new(
        Arc::clone(&store),
        Arc::clone(&prompt) as Arc<dyn OperatorPrompt>,
        Arc::clone(&sink) as Arc<dyn BridgeEventSink>,
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    tokio::spawn(Arc::clone(&server).serve_listener(listener, cancel));

    Harness {
        server,
        store,
        sink,
        prompt,
        addr,
        _tmp: tmp,
    }
}

struct NodeClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl NodeClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    async fn send(&mut self, frame: &BridgeFrame) {
        let line = frame.to_line().unwrap();
        self.write.write_all(line.as_bytes()).await.unwrap();
        self.write.write_all(b"\n").await.unwrap();
    }

    async fn recv(&mut self) -> BridgeFrame {
        let line = tokio::time::timeout(TEST_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .expect("connection closed");
        BridgeFrame::from_line(&line).unwrap()
    }

    fn hello(node_id: &str, token: Option<&str>) -> BridgeFrame {
        BridgeFrame::Hello {
            node_id: node_id.into(),
            display_name: Some("Test Node".into()),
            token: token.map(Into::into),
            platform: Some("ios".into()),
            version: Some("1.0".into()),
            device_family: None,
            model_identifier: None,
            caps: vec!["canvas".into()],
            commands: vec!["canvas.show".into()],
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn pair_then_reconnect_with_token() {
    let harness = start_harness(true).await;

    // First connection: no token → not_paired → pair → auth_ok with token.
    let mut node = NodeClient::connect(harness.addr).await;
    node.send(&NodeClient::hello("node-1", None)).await;
    assert!(matches!(node.recv().await, BridgeFrame::NotPaired {}));

    node.send(&BridgeFrame::Pair {
        node_id: "node-1".into(),
        display_name: Some("Test Node".into()),
        platform: Some("ios".into()),
        version: Some("1.0".into()),
    })
    .await;
    let token = match node.recv().await {
        BridgeFrame::AuthOk { token: Some(token) } => token,
        other => panic!("expected auth_ok with token, got {other:?}"),
    };
    assert_eq!(token.len(), 32);
    // Registration follows the auth_ok frame; give the server task a beat.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.prompt.seen_repair.lock().await.as_slice(), &[false]);
    assert!(harness.server.is_connected("node-1").await);

    let first_seen = harness.store.get("node-1").await.unwrap().last_seen_at_ms;
    drop(node);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!harness.server.is_connected("node-1").await);

    // Reconnect with the stored token → immediate auth_ok, lastSeen bumps.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let mut node = NodeClient::connect(harness.addr).await;
    node.send(&NodeClient::hello("node-1", Some(&token))).await;
    assert!(matches!(node.recv().await, BridgeFrame::AuthOk { token: None }));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        harness.store.get("node-1").await.unwrap().last_seen_at_ms >= first_seen,
        "reconnect updates lastSeenAtMs"
    );

    let presence = harness.sink.presence.lock().await.clone();
    assert_eq!(
        presence,
        vec![
            ("node-1".to_string(), true),
            ("node-1".to_string(), false),
            ("node-1".to_string(), true)
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_token_is_unauthorized() {
    let harness = start_harness(true).await;

    // Pair first.
    let mut node = NodeClient::connect(harness.addr).await;
    node.send(&NodeClient::hello("node-1", None)).await;
    let _ = node.recv().await;
    node.send(&BridgeFrame::Pair {
        node_id: "node-1".into(),
        display_name: None,
        platform: None,
        version: None,
    })
    .await;
    let _ = node.recv().await;
    drop(node);

    let mut imposter = NodeClient::connect(harness.addr).await;
    imposter
        .send(&NodeClient::hello("node-1", Some("forged-token")))
        .await;
    match imposter.recv().await {
        BridgeFrame::AuthError { code, .. } => assert_eq!(code, "UNAUTHORIZED"),
        other => panic!("expected auth_error, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_node_id_is_invalid_request() {
    let harness = start_harness(true).await;
    let mut node = NodeClient::connect(harness.addr).await;
    node.send(&NodeClient::hello("   ", None)).await;
    match node.recv().await {
        BridgeFrame::AuthError { code, .. } => assert_eq!(code, "INVALID_REQUEST"),
        other => panic!("expected auth_error, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn rejection_yields_unauthorized() {
    let harness = start_harness(false).await;
    let mut node = NodeClient::connect(harness.addr).await;
    node.send(&NodeClient::hello("node-2", None)).await;
    assert!(matches!(node.recv().await, BridgeFrame::NotPaired {}));
    node.send(&BridgeFrame::Pair {
        node_id: "node-2".into(),
        display_name: None,
        platform: None,
        version: None,
    })
    .await;
    match node.recv().await {
        BridgeFrame::AuthError { code, .. } => assert_eq!(code, "UNAUTHORIZED"),
        other => panic!("expected auth_error, got {other:?}"),
    }
    assert!(harness.store.get("node-2").await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn invoke_round_trip_and_unavailable() {
    let harness = start_harness(true).await;

    // Unconnected node → UNAVAILABLE-class error.
    let err = harness
        .server
        .invoke("ghost", "canvas.show", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "UNAVAILABLE");

    // Pair and serve one invoke from the node side.
    let mut node = NodeClient::connect(harness.addr).await;
    node.send(&NodeClient::hello("node-3", None)).await;
    let _ = node.recv().await;
    node.send(&BridgeFrame::Pair {
        node_id: "node-3".into(),
        display_name: None,
        platform: None,
        version: None,
    })
    .await;
    let _ = node.recv().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let server = Arc::clone(&harness.server);
    let invoke_task = tokio::spawn(async move {
        server
            .invoke(
                "node-3",
                "canvas.show",
                Some(r#"{"url":"https://example.com"}"#.into()),
                Some(Duration::from_secs(2)),
            )
            .await
    });

    match node.recv().await {
        BridgeFrame::Invoke { id, command, params_json } => {
            assert_eq!(command, "canvas.show");
            assert!(params_json.unwrap().contains("example.com"));
            node.send(&BridgeFrame::InvokeResult {
                id,
                ok: true,
                result_json: Some(r#"{"shown":true}"#.into()),
                error: None,
            })
            .await;
        },
        other => panic!("expected invoke, got {other:?}"),
    }

    let result = invoke_task.await.unwrap().unwrap();
    assert!(result.unwrap().contains("shown"));
}

#[tokio::test(flavor = "multi_thread")]
async fn node_events_reach_the_sink() {
    let harness = start_harness(true).await;
    let mut node = NodeClient::connect(harness.addr).await;
    node.send(&NodeClient::hello("node-4", None)).await;
    let _ = node.recv().await;
    node.send(&BridgeFrame::Pair {
        node_id: "node-4".into(),
        display_name: None,
        platform: None,
        version: None,
    })
    .await;
    let _ = node.recv().await;

    node.send(&BridgeFrame::Event {
        event: "voice.transcript".into(),
        payload_json: Some(r#"{"text":"turn on the lights"}"#.into()),
    })
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let events = harness.sink.events.lock().await.clone();
    assert_eq!(events, vec![("node-4".to_string(), "voice.transcript".to_string())]);
}
