//! Control server dispatch over a raw loopback connection

mod common;

use common::spawn_echo_gateway;
use gridlink_daemon::allocator::probe_free_port;
use gridlink_daemon::{ControlServer, TunnelManager};
use gridlink_proto::{ControlResponse, ServerHello};
use serde_json::json;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream,
};
use tokio::time::timeout;

async fn start_server() -> SocketAddr {
    let manager = Arc::new(TunnelManager::new());
    let server = ControlServer::bind(0, manager).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

struct RawClient {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl RawClient {
    /// Connect and consume the ready frame.
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let hello = timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("timed out waiting for ready")
            .unwrap()
            .expect("connection closed before ready");
        let hello: ServerHello = serde_json::from_str(&hello).unwrap();
        assert!(hello.is_ready());

        Self { lines, write }
    }

    async fn send_line(&mut self, line: &str) {
        self.write.write_all(line.as_bytes()).await.unwrap();
        self.write.write_all(b"\n").await.unwrap();
    }

    async fn read_response(&mut self) -> ControlResponse {
        let line = timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for response")
            .unwrap()
            .expect("connection closed before response");
        serde_json::from_str(&line).unwrap()
    }
}

#[tokio::test]
async fn test_get_proxies_on_empty_daemon() {
    let addr = start_server().await;
    let mut client = RawClient::connect(addr).await;

    client
        .send_line(r#"{"id":"q1","type":"getProxies","params":{}}"#)
        .await;
    let resp = client.read_response().await;

    assert_eq!(resp.id, "q1");
    assert_eq!(resp.code, 0);
    assert_eq!(resp.data, Some(json!([])));
}

#[tokio::test]
async fn test_unknown_operation_is_structured_error() {
    let addr = start_server().await;
    let mut client = RawClient::connect(addr).await;

    client
        .send_line(r#"{"id":"q2","type":"selfDestruct","params":{}}"#)
        .await;
    let resp = client.read_response().await;

    assert_eq!(resp.id, "q2");
    assert_ne!(resp.code, 0);
    assert!(resp.msg.unwrap().contains("selfDestruct"));
}

#[tokio::test]
async fn test_malformed_line_does_not_kill_the_connection() {
    let addr = start_server().await;
    let mut client = RawClient::connect(addr).await;

    client.send_line("this is not json").await;
    client
        .send_line(r#"{"id":"q3","type":"getProxies","params":{}}"#)
        .await;

    let resp = client.read_response().await;
    assert_eq!(resp.id, "q3");
    assert_eq!(resp.code, 0);
}

#[tokio::test]
async fn test_invalid_params_is_structured_error() {
    let addr = start_server().await;
    let mut client = RawClient::connect(addr).await;

    client
        .send_line(r#"{"id":"q4","type":"startProxy","params":{"port":"nope"}}"#)
        .await;
    let resp = client.read_response().await;

    assert_eq!(resp.id, "q4");
    assert_ne!(resp.code, 0);
}

#[tokio::test]
async fn test_concurrent_requests_correlate_by_id() {
    let addr = start_server().await;
    let mut client = RawClient::connect(addr).await;

    for id in ["a", "b", "c", "d"] {
        client
            .send_line(&format!(
                r#"{{"id":"{}","type":"getProxies","params":{{}}}}"#,
                id
            ))
            .await;
    }

    let mut seen = HashSet::new();
    for _ in 0..4 {
        let resp = client.read_response().await;
        assert_eq!(resp.code, 0);
        assert!(seen.insert(resp.id), "duplicate response id");
    }
    assert_eq!(
        seen,
        ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect()
    );
}

#[tokio::test]
async fn test_full_proxy_lifecycle_via_control_plane() {
    let (gw, _events) = spawn_echo_gateway().await;
    let addr = start_server().await;
    let mut client = RawClient::connect(addr).await;

    let local_port = probe_free_port().unwrap();
    client
        .send_line(&format!(
            r#"{{"id":"s1","type":"startProxy","params":{{"wsUrl":"{}","port":{},"token":"tok","linkHost":"10.0.0.5","linkPort":80,"linkEdgeId":"c1"}}}}"#,
            gw, local_port
        ))
        .await;
    let resp = client.read_response().await;
    assert_eq!(resp.code, 0, "startProxy failed: {:?}", resp.msg);
    let tunnel_id = resp.data.unwrap().as_str().unwrap().to_string();

    // bytes flow end to end through the started tunnel
    let mut tcp = TcpStream::connect(("127.0.0.1", local_port)).await.unwrap();
    tcp.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    timeout(Duration::from_secs(5), tcp.read_exact(&mut buf))
        .await
        .expect("timed out reading echo")
        .unwrap();
    assert_eq!(&buf, b"ping");

    // second start for the same target returns the same id
    client
        .send_line(&format!(
            r#"{{"id":"s2","type":"startProxy","params":{{"wsUrl":"{}","token":"tok","linkHost":"10.0.0.5","linkPort":80,"linkEdgeId":"c1"}}}}"#,
            gw
        ))
        .await;
    let resp = client.read_response().await;
    assert_eq!(resp.code, 0);
    assert_eq!(resp.data.unwrap().as_str().unwrap(), tunnel_id);

    client
        .send_line(&format!(
            r#"{{"id":"x1","type":"stopProxy","params":{{"id":"{}"}}}}"#,
            tunnel_id
        ))
        .await;
    let resp = client.read_response().await;
    assert_eq!(resp.code, 0);
    assert_eq!(resp.data, Some(json!(true)));

    client
        .send_line(r#"{"id":"q5","type":"getProxies","params":{}}"#)
        .await;
    let resp = client.read_response().await;
    assert_eq!(resp.data, Some(json!([])));
}
