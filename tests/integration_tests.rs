use netbench::transports::{by_name, LoopbackTransport, TcpTransport, UdpTransport};
use netbench::{
    BenchmarkCoordinator, BenchmarkSetup, BenchmarkStatistics, Transmission, Transport,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_loopback_single_client_run() {
    let setup = BenchmarkSetup::new()
        .with_clients(1)
        .with_duration(Duration::from_secs(1))
        .with_parallel_messages(1)
        .with_tick_rate(0, 1000);
    let mut coordinator =
        BenchmarkCoordinator::new(Arc::new(LoopbackTransport::new()), setup).unwrap();

    let report = coordinator.run().await.unwrap();

    assert!(report.messages_client_received > 0);
    // At most the one message in flight when the run stopped is missing
    assert!(report.messages_client_sent >= report.messages_client_received);
    assert!(report.messages_client_sent - report.messages_client_received <= 1);
    assert_eq!(report.errors, 0);
    assert!(report.duration >= Duration::from_secs(1));
    assert!(report.duration < Duration::from_millis(1500));
    assert!(report.mean_latency.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_loopback_keeps_window_per_client() {
    let setup = BenchmarkSetup::new()
        .with_clients(4)
        .with_duration(Duration::from_millis(300))
        .with_parallel_messages(3)
        .with_tick_rate(0, 500);
    let mut coordinator =
        BenchmarkCoordinator::new(Arc::new(LoopbackTransport::new()), setup).unwrap();

    let report = coordinator.run().await.unwrap();
    let in_flight = report.messages_client_sent - report.messages_client_received;
    assert!(in_flight <= 4 * 3, "{} messages in flight", in_flight);
    assert!(report.messages_server_received <= report.messages_client_sent);
    assert!(report.messages_server_sent <= report.messages_server_received);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_benchmark() {
    let setup = BenchmarkSetup::new()
        .with_clients(4)
        .with_duration(Duration::from_millis(500))
        .with_message_size(128)
        .with_parallel_messages(2)
        .with_endpoint("127.0.0.1", 0)
        .with_connect_timeout(Some(Duration::from_secs(5)));
    let mut coordinator = BenchmarkCoordinator::new(Arc::new(TcpTransport::new()), setup).unwrap();

    let report = coordinator.run().await.unwrap();

    assert_eq!(report.transport, "tcp");
    assert_eq!(report.clients_connected, 4);
    assert!(report.messages_client_received > 0);
    assert!(report.messages_client_received <= report.messages_client_sent);
    assert_eq!(report.total_bytes, report.messages_client_received * 128);
    assert_eq!(report.errors, 0);
    assert!(report.duration >= Duration::from_millis(500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_large_window_keeps_echoing() {
    // 32 MiB in flight is far more than the loopback socket buffers hold
    let setup = BenchmarkSetup::new()
        .with_clients(1)
        .with_duration(Duration::from_millis(500))
        .with_message_size(64 * 1024)
        .with_parallel_messages(512)
        .with_endpoint("127.0.0.1", 0)
        .with_connect_timeout(Some(Duration::from_secs(5)))
        .with_dispose_timeout(Some(Duration::from_secs(2)));
    let mut coordinator = BenchmarkCoordinator::new(Arc::new(TcpTransport::new()), setup).unwrap();

    coordinator.prepare_benchmark().await.unwrap();
    coordinator.run_timed_benchmark().await.unwrap();
    let report = coordinator.report().unwrap();
    let cleanup = coordinator.cleanup_benchmark().await.unwrap();

    assert!(report.messages_client_received > 0);
    assert!(report.messages_server_sent > 0);
    assert!(cleanup.is_clean(), "{:?}", cleanup.failures);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_udp_benchmark() {
    let setup = BenchmarkSetup::new()
        .with_clients(4)
        .with_duration(Duration::from_millis(500))
        .with_transmission(Transmission::Unreliable)
        .with_tick_rate(1000, 1000)
        .with_endpoint("127.0.0.1", 0)
        .with_connect_timeout(Some(Duration::from_secs(5)));
    let mut coordinator = BenchmarkCoordinator::new(Arc::new(UdpTransport::new()), setup).unwrap();

    let report = coordinator.run().await.unwrap();

    assert_eq!(report.transport, "udp");
    assert_eq!(report.clients_connected, 4);
    assert!(report.messages_client_received > 0);
    assert!(report.messages_client_received <= report.messages_client_sent);
    assert!(report.messages_server_received <= report.messages_client_sent);
}

#[tokio::test]
async fn test_tcp_client_dispose_twice() {
    let transport = TcpTransport::new();
    let coordinator = BenchmarkCoordinator::new(
        Arc::new(TcpTransport::new()),
        BenchmarkSetup::new().with_endpoint("127.0.0.1", 0),
    )
    .unwrap();

    let client = transport.create_client(0, coordinator.context()).unwrap();
    client.dispose().unwrap();
    client.dispose().unwrap();
    assert!(client.is_disposed());
}

#[test]
fn test_transport_lookup() {
    for name in ["tcp", "udp", "loopback", "TCP"] {
        assert!(by_name(name).is_ok(), "{} should be known", name);
    }
    assert!(by_name("enet").is_err());
}

#[test]
fn test_concurrent_counting() {
    let stats = Arc::new(BenchmarkStatistics::new());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                for _ in 0..25_000 {
                    stats.add_client_sent();
                    stats.add_client_received();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(stats.messages_client_sent(), 100_000);
    assert_eq!(stats.messages_client_received(), 100_000);
}
