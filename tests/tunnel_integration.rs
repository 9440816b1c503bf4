//! End-to-end tunnel tests: a real SOCKS5 client, a real destination
//! server, and both roles wired together over the in-process bus.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bus_tunnel::bus::{BusBridge, MemoryBus};
use bus_tunnel::socks::{ListenerConfig, ReplyCode, Socks5Server};
use bus_tunnel::tunnel::{
    ConnectionId, DataPlane, Direction, Egress, Ingress, OpenReply, OpenRequest, Subjects,
};
use bytes::Bytes;
use serde::de::IgnoredAny;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

const PREFIX: &str = "tunnels.test";

struct Tunnel {
    bus: MemoryBus,
    ingress: Arc<DataPlane<MemoryBus>>,
    egress: Arc<DataPlane<MemoryBus>>,
    socks_addr: SocketAddr,
    _shutdown_tx: watch::Sender<bool>,
}

async fn start_tunnel() -> Tunnel {
    let bus = MemoryBus::with_request_timeout(Duration::from_secs(2));

    let egress_plane = Arc::new(DataPlane::new(bus.clone(), Subjects::new(PREFIX)));
    let egress = Arc::new(Egress::new(Arc::clone(&egress_plane)));
    egress.serve().await.unwrap();

    let (ingress, socks_addr, shutdown_tx) = start_ingress(&bus).await;

    Tunnel {
        bus,
        ingress,
        egress: egress_plane,
        socks_addr,
        _shutdown_tx: shutdown_tx,
    }
}

/// Ingress role and SOCKS5 listener on `bus`, with no egress attached.
async fn start_ingress(
    bus: &MemoryBus,
) -> (Arc<DataPlane<MemoryBus>>, SocketAddr, watch::Sender<bool>) {
    let plane = Arc::new(DataPlane::new(bus.clone(), Subjects::new(PREFIX)));
    let ingress = Arc::new(Ingress::new(Arc::clone(&plane)));
    ingress.serve().await.unwrap();

    let server = Socks5Server::bind(&ListenerConfig {
        address: "127.0.0.1".to_string(),
        port: 0,
        handshake_timeout: Duration::from_secs(2),
    })
    .await
    .unwrap();
    let socks_addr = server.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(ingress.run(server, shutdown_rx));
    (plane, socks_addr, shutdown_tx)
}

/// Answer `open` on `bus` with `reply` and acknowledge every ready notice.
async fn stub_egress(bus: &MemoryBus, reply: OpenReply) -> BusBridge<MemoryBus> {
    let stub = BusBridge::new(bus.clone());
    stub.respond_json(&format!("{PREFIX}.open"), move |_request: OpenRequest, _ctx| {
        let reply = reply.clone();
        async move { Ok::<_, String>(reply) }
    })
    .await
    .unwrap();
    stub.respond_json(
        &format!("{PREFIX}.sockets.*.output.ready"),
        |_notice: IgnoredAny, _ctx| async { Ok::<_, String>(()) },
    )
    .await
    .unwrap();
    stub
}

/// SOCKS5 CONNECT to 127.0.0.1:`port`; returns the reply code and the stream.
async fn socks_connect(proxy: SocketAddr, port: u16) -> (u8, TcpStream) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[5, 1, 0]).await.unwrap();
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [5, 0]);

    let mut request = vec![5, 1, 0, 1, 127, 0, 0, 1];
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 5);
    (reply[1], stream)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_http_request_through_tunnel() {
    const REQUEST: &[u8] = b"GET / HTTP/1.0\r\n\r\n";
    const RESPONSE: &[u8] = b"HTTP/1.0 200 OK\r\nContent-Length: 5\r\n\r\nhello";

    let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = destination.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut socket, _) = destination.accept().await.unwrap();
        let mut request = vec![0u8; REQUEST.len()];
        socket.read_exact(&mut request).await.unwrap();
        socket.write_all(RESPONSE).await.unwrap();
        request
    });

    let tunnel = start_tunnel().await;
    let (code, mut client) = socks_connect(tunnel.socks_addr, port).await;
    assert_eq!(code, ReplyCode::Succeeded as u8);
    assert_eq!(tunnel.ingress.registry().len(), 1);
    assert_eq!(tunnel.egress.registry().len(), 1);
    assert_eq!(tunnel.ingress.registry().ids(), tunnel.egress.registry().ids());

    client.write_all(REQUEST).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(server.await.unwrap(), REQUEST);
    assert_eq!(response, RESPONSE);

    let (ingress, egress) = (tunnel.ingress.clone(), tunnel.egress.clone());
    wait_until(move || ingress.registry().is_empty() && egress.registry().is_empty()).await;
}

#[tokio::test]
async fn test_unreachable_destination_is_denied() {
    let tunnel = start_tunnel().await;
    let (code, mut client) = socks_connect(tunnel.socks_addr, closed_port().await).await;

    assert_eq!(code, ReplyCode::HostUnreachable as u8);
    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    assert!(tunnel.ingress.registry().is_empty());
    assert!(tunnel.egress.registry().is_empty());
}

#[tokio::test]
async fn test_large_transfer_keeps_order() {
    let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = destination.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (socket, _) = destination.accept().await.unwrap();
        let (mut reader, mut writer) = socket.into_split();
        tokio::io::copy(&mut reader, &mut writer).await.unwrap();
    });

    let tunnel = start_tunnel().await;
    let (code, client) = socks_connect(tunnel.socks_addr, port).await;
    assert_eq!(code, 0);

    let payload: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();
    let (mut reader, mut writer) = client.into_split();

    let send = tokio::spawn(async move {
        for chunk in payload.chunks(7_919) {
            writer.write_all(chunk).await.unwrap();
        }
        writer
    });

    let mut echoed = vec![0u8; expected.len()];
    tokio::time::timeout(Duration::from_secs(20), reader.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert!(echoed == expected, "echoed bytes differ from the sent bytes");

    let _writer = send.await.unwrap();
    let egress = tunnel.egress.clone();
    let total = expected.len() as u64;
    wait_until(move || {
        egress
            .registry()
            .list()
            .iter()
            .any(|info| info.bytes_sent == total && info.bytes_received == total)
    })
    .await;
}

#[tokio::test]
async fn test_client_close_reaches_destination() {
    let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = destination.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut socket, _) = destination.accept().await.unwrap();
        let mut received = Vec::new();
        socket.read_to_end(&mut received).await.unwrap();
        received
    });

    let tunnel = start_tunnel().await;
    let (_, mut client) = socks_connect(tunnel.socks_addr, port).await;
    client.write_all(b"bye").await.unwrap();
    drop(client);

    let received = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, b"bye");

    let (ingress, egress) = (tunnel.ingress.clone(), tunnel.egress.clone());
    wait_until(move || ingress.registry().is_empty() && egress.registry().is_empty()).await;
}

#[tokio::test]
async fn test_id_collision_rejects_open_and_releases_egress_socket() {
    let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = destination.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = destination.accept().await else {
                break;
            };
            // Hold until the peer goes away
            tokio::spawn(async move {
                let mut socket = socket;
                let mut buf = [0u8; 64];
                while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
            });
        }
    });

    let tunnel = start_tunnel().await;

    // Occupy the id the egress will hand out first
    let squatter_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let squatter = TcpStream::connect(squatter_listener.local_addr().unwrap())
        .await
        .unwrap();
    let (_squatter_peer, _) = squatter_listener.accept().await.unwrap();
    let taken = ConnectionId::new(1);
    tunnel
        .ingress
        .attach(taken, Direction::Inbound, squatter)
        .await
        .unwrap();

    let (code, _client) = socks_connect(tunnel.socks_addr, port).await;
    assert_eq!(code, ReplyCode::GeneralFailure as u8);

    let egress = tunnel.egress.clone();
    wait_until(move || egress.registry().is_empty()).await;
    assert!(tunnel.ingress.registry().contains(taken));
}

#[tokio::test]
async fn test_unknown_connection_messages_are_acknowledged() {
    let tunnel = start_tunnel().await;
    let bridge = BusBridge::new(tunnel.bus.clone());

    let data = format!("{PREFIX}.sockets.999.output.data");
    let reply = bridge
        .fire_rpc_raw::<IgnoredAny>(&data, Bytes::from_static(b"stray"))
        .await;
    assert!(reply.is_ok());

    let close = format!("{PREFIX}.sockets.999.input.close");
    let reply = bridge
        .fire_rpc::<_, IgnoredAny>(&close, &serde_json::json!({}))
        .await;
    assert!(reply.is_ok());

    assert!(tunnel.ingress.registry().is_empty());
    assert!(tunnel.egress.registry().is_empty());
}

#[tokio::test]
async fn test_teardown_is_idempotent() {
    let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = destination.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut socket, _) = destination.accept().await.unwrap();
        let mut buf = Vec::new();
        socket.read_to_end(&mut buf).await.unwrap();
    });

    let tunnel = start_tunnel().await;
    let (_, mut client) = socks_connect(tunnel.socks_addr, port).await;
    let id = tunnel.egress.registry().ids()[0];

    assert!(tunnel.egress.teardown(id));
    assert!(!tunnel.egress.teardown(id));
    assert!(!tunnel.egress.handle_remote_close(&format!("{PREFIX}.sockets.{id}.output.close")));

    // The destination sees the egress socket close
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();

    // Nothing told the ingress; its entry goes once the client hangs up
    assert_eq!(tunnel.ingress.registry().ids(), vec![id]);
    client.write_all(b"late").await.unwrap();
    drop(client);
    let ingress = tunnel.ingress.clone();
    wait_until(move || ingress.registry().is_empty()).await;
}

#[tokio::test]
async fn test_close_all_notifies_peer() {
    let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = destination.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = destination.accept().await.unwrap();
        let mut buf = Vec::new();
        let _ = socket.read_to_end(&mut buf).await;
    });

    let tunnel = start_tunnel().await;
    let (_, mut client) = socks_connect(tunnel.socks_addr, port).await;
    assert_eq!(tunnel.egress.registry().len(), 1);

    tunnel.ingress.close_all().await;

    assert!(tunnel.ingress.registry().is_empty());
    let egress = tunnel.egress.clone();
    wait_until(move || egress.registry().is_empty()).await;

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_destination_speaking_first_reaches_client() {
    const BANNER: &[u8] = b"SSH-2.0-banner\r\n";
    const CONNECTIONS: usize = 50;

    let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = destination.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = destination.accept().await {
            tokio::spawn(async move {
                socket.write_all(BANNER).await.unwrap();
                let mut buf = [0u8; 64];
                while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
            });
        }
    });

    let tunnel = start_tunnel().await;
    for _ in 0..CONNECTIONS {
        let (code, mut client) = socks_connect(tunnel.socks_addr, port).await;
        assert_eq!(code, ReplyCode::Succeeded as u8);

        let mut banner = vec![0u8; BANNER.len()];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut banner))
            .await
            .expect("banner lost in transit")
            .unwrap();
        assert_eq!(banner, BANNER);
    }
}

#[tokio::test]
async fn test_stalled_data_reply_closes_connection() {
    let bus = MemoryBus::with_request_timeout(Duration::from_millis(200));
    let stub = stub_egress(&bus, OpenReply::opened(ConnectionId::new(5))).await;
    stub.respond_raw(
        &format!("{PREFIX}.sockets.*.output.data"),
        |_payload: Bytes, _ctx| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, String>(())
        },
    )
    .await
    .unwrap();

    let (ingress, socks_addr, _shutdown_tx) = start_ingress(&bus).await;
    let (code, mut client) = socks_connect(socks_addr, 80).await;
    assert_eq!(code, ReplyCode::Succeeded as u8);
    assert!(ingress.registry().contains(ConnectionId::new(5)));

    client.write_all(b"never acknowledged").await.unwrap();

    let plane = ingress.clone();
    wait_until(move || plane.registry().is_empty()).await;
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_open_reply_without_id_is_denied() {
    let bus = MemoryBus::with_request_timeout(Duration::from_secs(2));
    let _stub = stub_egress(&bus, OpenReply { socket_id: None }).await;

    let (ingress, socks_addr, _shutdown_tx) = start_ingress(&bus).await;
    let (code, mut client) = socks_connect(socks_addr, 80).await;

    assert_eq!(code, ReplyCode::GeneralFailure as u8);
    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    assert!(ingress.registry().is_empty());
}
