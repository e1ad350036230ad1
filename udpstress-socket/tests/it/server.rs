use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::net::UdpSocket;
use udpstress_common::Stats;
use udpstress_socket::{ServerError, ServerOptions, ServerSocket};
use udpstress_transport::{Transport, Udp};

/// Fails every reply socket with `errno`.
struct FailingReplies {
    errno: i32,
}

impl Transport for FailingReplies {
    fn open_flow(&self, foreign: SocketAddr, connected: bool) -> io::Result<tokio::net::UdpSocket> {
        Udp.open_flow(foreign, connected)
    }

    fn open_reply(&self, _local: SocketAddr, _foreign: SocketAddr) -> io::Result<tokio::net::UdpSocket> {
        Err(io::Error::from_raw_os_error(self.errno))
    }
}

fn localhost() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn wait_for(stats: &Stats, f: impl Fn(&Stats) -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !f(stats) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn unconnected_reply_leaves_listener() {
    let _ = tracing_subscriber::fmt::try_init();

    let options = ServerOptions::default().delay_bound(Duration::from_millis(100));
    let mut server = ServerSocket::with_options(Udp, options);
    server.bind(&[localhost()]).unwrap();
    let addr = server.local_addrs()[0];
    let stats = Arc::clone(server.stats());
    let handle = tokio::spawn(server.run());

    let client = UdpSocket::bind(localhost()).await.unwrap();
    client.send_to(b"foo\n", addr).await.unwrap();

    let mut buf = [0u8; 16];
    let (n, from) =
        tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"baz\n");
    assert_eq!(from, addr);

    wait_for(&stats, |s| s.open() == 0).await;
    assert_eq!(stats.recv(), 1);
    assert_eq!(stats.send(), 1);

    handle.abort();
}

#[cfg(any(target_os = "linux", target_os = "android"))]
#[tokio::test]
async fn connected_reply_impersonates_wildcard_listener() {
    let _ = tracing_subscriber::fmt::try_init();

    let options =
        ServerOptions::default().connected(true).delay_bound(Duration::from_millis(100));
    let mut server = ServerSocket::with_options(Udp, options);
    server.bind(&["0.0.0.0:0".parse().unwrap()]).unwrap();
    let port = server.local_addrs()[0].port();
    let handle = tokio::spawn(server.run());

    // A connected client only accepts datagrams from the exact address it targeted.
    let target = SocketAddr::from(([127, 0, 0, 1], port));
    let client = UdpSocket::bind(localhost()).await.unwrap();
    client.connect(target).await.unwrap();
    client.send(b"foo\n").await.unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(1), client.recv(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"bar\n");

    handle.abort();
}

#[cfg(any(target_os = "linux", target_os = "android"))]
#[tokio::test]
async fn immediate_connected_reply_is_sent() {
    let _ = tracing_subscriber::fmt::try_init();

    // The reply socket is written to right after it is opened.
    let options =
        ServerOptions::default().connected(true).delay_bound(Duration::from_micros(1));
    let mut server = ServerSocket::with_options(Udp, options);
    server.bind(&["0.0.0.0:0".parse().unwrap()]).unwrap();
    let port = server.local_addrs()[0].port();
    let stats = Arc::clone(server.stats());
    let handle = tokio::spawn(server.run());

    let target = SocketAddr::from(([127, 0, 0, 1], port));
    let client = UdpSocket::bind(localhost()).await.unwrap();
    client.connect(target).await.unwrap();
    client.send(b"foo\n").await.unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(1), client.recv(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"bar\n");

    wait_for(&stats, |s| s.open() == 0).await;
    assert_eq!(stats.send(), 1);
    assert_eq!(stats.send_errors(), 0);

    handle.abort();
}

#[tokio::test]
async fn descriptor_exhaustion_drops_request() {
    let _ = tracing_subscriber::fmt::try_init();

    let options = ServerOptions::default().connected(true).delay_bound(Duration::from_millis(10));
    let mut server = ServerSocket::with_options(FailingReplies { errno: nix::libc::EMFILE }, options);
    server.bind(&[localhost()]).unwrap();
    let addr = server.local_addrs()[0];
    let stats = Arc::clone(server.stats());
    let handle = tokio::spawn(server.run());

    let client = UdpSocket::bind(localhost()).await.unwrap();

    client.send_to(b"foo\n", addr).await.unwrap();
    wait_for(&stats, |s| s.errors() == 1).await;
    assert_eq!(stats.open(), 0);

    // Still serving.
    client.send_to(b"foo\n", addr).await.unwrap();
    wait_for(&stats, |s| s.errors() == 2).await;
    assert_eq!(stats.recv(), 2);
    assert_eq!(stats.open(), 0);
    assert_eq!(stats.send(), 0);
    assert!(!handle.is_finished());

    handle.abort();
}

#[tokio::test]
async fn address_collision_drops_request() {
    let _ = tracing_subscriber::fmt::try_init();

    let options = ServerOptions::default().connected(true);
    let mut server =
        ServerSocket::with_options(FailingReplies { errno: nix::libc::EADDRINUSE }, options);
    server.bind(&[localhost()]).unwrap();
    let addr = server.local_addrs()[0];
    let stats = Arc::clone(server.stats());
    let handle = tokio::spawn(server.run());

    let client = UdpSocket::bind(localhost()).await.unwrap();
    client.send_to(b"foo\n", addr).await.unwrap();
    wait_for(&stats, |s| s.errors() == 1).await;
    assert_eq!(stats.open(), 0);

    handle.abort();
}

#[tokio::test]
async fn other_reply_socket_failure_is_fatal() {
    let _ = tracing_subscriber::fmt::try_init();

    let options = ServerOptions::default().connected(true);
    let mut server = ServerSocket::with_options(FailingReplies { errno: nix::libc::EACCES }, options);
    server.bind(&[localhost()]).unwrap();
    let addr = server.local_addrs()[0];

    let client = UdpSocket::bind(localhost()).await.unwrap();
    client.send_to(b"foo\n", addr).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(1), server.run()).await.unwrap().unwrap_err();
    assert!(matches!(err, ServerError::ReplySocket { .. }));
}

#[tokio::test]
async fn full_reply_pool_stops_reading() {
    let _ = tracing_subscriber::fmt::try_init();

    let options = ServerOptions::default().max_flows(1).delay_bound(Duration::from_millis(300));
    let mut server = ServerSocket::with_options(Udp, options);
    server.bind(&[localhost()]).unwrap();
    let addr = server.local_addrs()[0];
    let stats = Arc::clone(server.stats());
    let handle = tokio::spawn(server.run());

    let client = UdpSocket::bind(localhost()).await.unwrap();
    for _ in 0..3 {
        client.send_to(b"foo\n", addr).await.unwrap();
    }

    wait_for(&stats, |s| s.recv() >= 1).await;

    let mut buf = [0u8; 16];
    for _ in 0..3 {
        assert!(stats.open() <= 1);
        assert!(stats.recv() <= stats.send() + 1);
        tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf)).await.unwrap().unwrap();
    }
    assert_eq!(stats.recv(), 3);

    handle.abort();
}

#[tokio::test]
async fn oneshot_server_stops_after_last_reply() {
    let _ = tracing_subscriber::fmt::try_init();

    let options = ServerOptions::default().oneshot(true).delay_bound(Duration::from_millis(100));
    let mut server = ServerSocket::with_options(Udp, options);
    server.bind(&[localhost()]).unwrap();
    let addr = server.local_addrs()[0];
    let stats = Arc::clone(server.stats());

    let client = UdpSocket::bind(localhost()).await.unwrap();
    client.send_to(b"foo\n", addr).await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), server.run()).await.unwrap().unwrap();
    assert_eq!(stats.send(), 1);
    assert_eq!(stats.open(), 0);

    let mut buf = [0u8; 16];
    let (n, _) = client.recv_from(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"baz\n");
}

#[tokio::test]
async fn unbound_server_does_not_run() {
    let server = ServerSocket::new(Udp);
    assert!(matches!(server.run().await, Err(ServerError::NotBound)));
}

/// Needs a raw ICMP socket, run as root with `--ignored`.
#[tokio::test]
#[ignore]
async fn icmp_replaces_every_reply() {
    let _ = tracing_subscriber::fmt::try_init();
    let icmp = udpstress_transport::IcmpSocket::open().unwrap();

    let options = ServerOptions::default().icmp_percentage(100).delay_bound(Duration::from_millis(50));
    let mut server = ServerSocket::with_options(Udp, options).with_icmp(icmp);
    server.bind(&[localhost()]).unwrap();
    let addr = server.local_addrs()[0];
    let stats = Arc::clone(server.stats());
    let handle = tokio::spawn(server.run());

    let client = UdpSocket::bind(localhost()).await.unwrap();
    for _ in 0..5 {
        client.send_to(b"foo\n", addr).await.unwrap();
    }

    wait_for(&stats, |s| s.icmp_sent() == 5).await;
    assert_eq!(stats.send(), 0);

    handle.abort();
}
