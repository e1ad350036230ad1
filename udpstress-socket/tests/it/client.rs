use std::{sync::Arc, time::Duration};

use tokio::net::UdpSocket;
use udpstress_socket::{ClientOptions, ClientSocket};
use udpstress_transport::Udp;

/// Echoes every datagram back to its sender until dropped.
async fn echo_peer() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut buf = [0u8; 64];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });

    (addr, handle)
}

#[tokio::test]
async fn closed_flows_are_replaced() {
    let _ = tracing_subscriber::fmt::try_init();
    let (target, peer) = echo_peer().await;

    let options = ClientOptions::default()
        .flows(20)
        .resend_bound(Duration::from_millis(200))
        .wait_bound(Duration::from_secs(1));
    let socket = ClientSocket::with_options(Udp, options);
    let stats = Arc::clone(socket.stats());

    let client = tokio::spawn(socket.run(target));

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.open(), 20);
    }
    assert!(stats.recv() > 20, "flows were not replaced, recv = {}", stats.recv());

    client.abort();
    peer.abort();
}

#[tokio::test]
async fn oneshot_flows_close_on_response() {
    let _ = tracing_subscriber::fmt::try_init();
    let (target, peer) = echo_peer().await;

    let options = ClientOptions::default()
        .flows(50)
        .oneshot(true)
        .resend_bound(Duration::from_secs(2))
        .wait_bound(Duration::from_secs(2));
    let socket = ClientSocket::with_options(Udp, options);
    let stats = Arc::clone(socket.stats());

    tokio::time::timeout(Duration::from_secs(3), socket.run(target)).await.unwrap().unwrap();

    assert_eq!(stats.open(), 0);
    assert_eq!(stats.recv(), 50);
    assert!(stats.send() >= 50);

    peer.abort();
}

#[tokio::test]
async fn unconnected_flows_get_responses() {
    let _ = tracing_subscriber::fmt::try_init();
    let (target, peer) = echo_peer().await;

    let options = ClientOptions::default()
        .flows(10)
        .oneshot(true)
        .connected(false)
        .resend_bound(Duration::from_secs(2))
        .wait_bound(Duration::from_secs(2));
    let socket = ClientSocket::with_options(Udp, options);
    let stats = Arc::clone(socket.stats());

    tokio::time::timeout(Duration::from_secs(3), socket.run(target)).await.unwrap().unwrap();

    assert_eq!(stats.recv(), 10);
    assert_eq!(stats.open(), 0);

    peer.abort();
}

#[tokio::test]
async fn refused_target_counts_errors() {
    let _ = tracing_subscriber::fmt::try_init();

    // A port nobody listens on.
    let target = std::net::UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

    let options = ClientOptions::default()
        .flows(1)
        .oneshot(true)
        .resend_bound(Duration::from_secs(1))
        .wait_bound(Duration::from_secs(2));
    let socket = ClientSocket::with_options(Udp, options);
    let stats = Arc::clone(socket.stats());

    tokio::time::timeout(Duration::from_secs(3), socket.run(target)).await.unwrap().unwrap();

    assert_eq!(stats.open(), 0);
    assert_eq!(stats.recv(), 0);
    assert!(stats.recv_errors() + stats.send_errors() >= 1);
}

#[tokio::test]
async fn payload_bound_sends_random_lengths() {
    let _ = tracing_subscriber::fmt::try_init();
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let options = ClientOptions::default()
        .flows(10)
        .oneshot(true)
        .payload_bound(Some(32))
        .resend_bound(Duration::from_secs(5))
        .wait_bound(Duration::from_secs(5));
    let socket = ClientSocket::with_options(Udp, options);
    let client = tokio::spawn(socket.run(peer.local_addr().unwrap()));

    let mut buf = [0u8; 64];
    tokio::time::timeout(Duration::from_secs(2), async {
        for _ in 0..10 {
            let (n, _) = peer.recv_from(&mut buf).await.unwrap();
            assert!(n <= 32);
        }
    })
    .await
    .unwrap();

    client.abort();
}

#[tokio::test]
async fn first_requests_leave_at_startup() {
    let _ = tracing_subscriber::fmt::try_init();
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // Long enough that nothing but the first request of each flow goes out.
    let options = ClientOptions::default()
        .flows(5)
        .oneshot(true)
        .resend_bound(Duration::from_secs(60))
        .wait_bound(Duration::from_secs(60));
    let socket = ClientSocket::with_options(Udp, options);
    let stats = Arc::clone(socket.stats());
    let client = tokio::spawn(socket.run(peer.local_addr().unwrap()));

    let mut buf = [0u8; 64];
    tokio::time::timeout(Duration::from_secs(2), async {
        for _ in 0..5 {
            let (n, _) = peer.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], udpstress_wire::payload::REQUEST);
        }
    })
    .await
    .unwrap();

    assert_eq!(stats.open(), 5);
    assert_eq!(stats.send(), 5);
    assert_eq!(stats.send_errors(), 0);

    client.abort();
}

#[tokio::test]
async fn request_again_keeps_flow_until_budget_runs_out() {
    let _ = tracing_subscriber::fmt::try_init();
    let (target, peer) = echo_peer().await;

    let options = ClientOptions::default()
        .flows(1)
        .oneshot(true)
        .request_again_percentage(100)
        .resend_bound(Duration::from_millis(1))
        .wait_bound(Duration::from_secs(1));
    let socket = ClientSocket::with_options(Udp, options);
    let stats = Arc::clone(socket.stats());

    // Every request consumes a resend delay from the budget, so even a flow that
    // always asks again expires within the wait bound.
    tokio::time::timeout(Duration::from_secs(3), socket.run(target)).await.unwrap().unwrap();

    assert!(stats.recv() > 1, "flow closed on the first response, recv = {}", stats.recv());
    assert_eq!(stats.open(), 0);
    assert_eq!(stats.send_errors(), 0);

    peer.abort();
}
