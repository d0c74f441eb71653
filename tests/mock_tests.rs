// Lifecycle tests against a mock transport
// These tests drive the coordinator without real network I/O

mod common;

use common::{MockBehavior, MockTransport};
use netbench::{
    BenchmarkClient, BenchmarkCoordinator, BenchmarkSetup, ConnectPolicy, Error, RunPhase,
    TeardownStep,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

fn setup(clients: usize) -> BenchmarkSetup {
    BenchmarkSetup::new()
        .with_clients(clients)
        .with_duration(Duration::from_millis(100))
        .with_connect_timeout(Some(Duration::from_millis(100)))
        .with_dispose_timeout(Some(Duration::from_millis(200)))
}

#[tokio::test]
async fn test_prepare_runs_steps_in_order() {
    let transport = Arc::new(MockTransport::new(MockBehavior::default()));
    let mut coordinator = BenchmarkCoordinator::new(transport.clone(), setup(2)).unwrap();

    coordinator.prepare_benchmark().await.unwrap();
    assert_eq!(coordinator.phase(), RunPhase::Preparing);

    let calls = transport.calls();
    assert_eq!(
        calls,
        vec![
            "create_server",
            "start_server",
            "start_client 0",
            "connect_client 0",
            "start_client 1",
            "connect_client 1",
        ]
    );

    coordinator.cleanup_benchmark().await.unwrap();
}

#[tokio::test]
async fn test_unconnected_clients_stall_with_names() {
    let behavior = MockBehavior {
        unconnected: vec![1, 2],
        ..Default::default()
    };
    let transport = Arc::new(MockTransport::new(behavior));
    let mut coordinator = BenchmarkCoordinator::new(transport.clone(), setup(3)).unwrap();

    let err = coordinator.run().await.unwrap_err();
    match err {
        Error::Stall { phase, pending, .. } => {
            assert_eq!(phase, "connecting clients");
            assert_eq!(pending, vec!["client 1", "client 2"]);
        }
        other => panic!("expected a stall, got {:?}", other),
    }

    // Nothing was measured, and everything was still torn down
    assert_eq!(coordinator.statistics().messages_client_sent(), 0);
    assert_eq!(coordinator.phase(), RunPhase::CleanedUp);
    for id in 0..3 {
        assert!(transport.position(&format!("dispose_client {}", id)).is_some());
    }
    assert!(transport.position("dispose_server").is_some());
}

#[tokio::test]
async fn test_proceed_policy_runs_with_reduced_set() {
    let behavior = MockBehavior {
        unconnected: vec![1, 3],
        ..Default::default()
    };
    let transport = Arc::new(MockTransport::new(behavior));
    let setup = setup(4).with_connect_policy(ConnectPolicy::Proceed);
    let mut coordinator = BenchmarkCoordinator::new(transport.clone(), setup).unwrap();

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.clients_requested, 4);
    assert_eq!(report.clients_connected, 2);
    assert_eq!(report.missing_clients(), 2);
    // Only the connected clients opened their window
    assert_eq!(report.messages_client_sent, 2);

    let calls = transport.calls();
    assert!(calls.contains(&"start_benchmark 0".to_string()));
    assert!(!calls.contains(&"start_benchmark 1".to_string()));
    // Stragglers are released as well
    assert!(calls.contains(&"dispose_client 1".to_string()));
    assert!(calls.contains(&"dispose_client 3".to_string()));
}

#[tokio::test]
async fn test_proceed_policy_fails_without_any_client() {
    let behavior = MockBehavior {
        unconnected: vec![0, 1],
        ..Default::default()
    };
    let transport = Arc::new(MockTransport::new(behavior));
    let setup = setup(2).with_connect_policy(ConnectPolicy::Proceed);
    let mut coordinator = BenchmarkCoordinator::new(transport, setup).unwrap();

    assert!(matches!(
        coordinator.run().await,
        Err(Error::Stall { .. })
    ));
}

#[tokio::test]
async fn test_server_that_never_starts_stalls() {
    let behavior = MockBehavior {
        server_never_starts: true,
        ..Default::default()
    };
    let transport = Arc::new(MockTransport::new(behavior));
    let mut coordinator = BenchmarkCoordinator::new(transport.clone(), setup(1)).unwrap();

    match coordinator.run().await.unwrap_err() {
        Error::Stall { pending, .. } => assert_eq!(pending, vec!["server"]),
        other => panic!("expected a stall, got {:?}", other),
    }
    // No client was ever created
    assert!(transport.position("start_client 0").is_none());
}

#[tokio::test]
async fn test_traffic_after_stop_is_not_counted() {
    let transport = Arc::new(MockTransport::new(MockBehavior::default()));
    let mut coordinator = BenchmarkCoordinator::new(transport.clone(), setup(2)).unwrap();

    coordinator.prepare_benchmark().await.unwrap();
    // Before the run nothing counts either
    transport.inject_round_trips();
    assert_eq!(coordinator.statistics().messages_client_received(), 0);

    coordinator.start_benchmark().unwrap();
    transport.inject_round_trips();
    coordinator.stop_benchmark().unwrap();

    let stopped = coordinator.statistics().snapshot();
    assert_eq!(stopped.messages_client_received, 2);

    let deadline = Instant::now() + Duration::from_millis(50);
    while Instant::now() < deadline {
        transport.inject_round_trips();
        sleep(Duration::from_millis(5)).await;
    }

    let later = coordinator.statistics().snapshot();
    assert_eq!(later, stopped);

    coordinator.cleanup_benchmark().await.unwrap();
}

#[tokio::test]
async fn test_failed_disconnect_does_not_stop_teardown() {
    let behavior = MockBehavior {
        fail_disconnect: true,
        ..Default::default()
    };
    let transport = Arc::new(MockTransport::new(behavior));
    let mut coordinator = BenchmarkCoordinator::new(transport.clone(), setup(2)).unwrap();

    coordinator.prepare_benchmark().await.unwrap();
    coordinator.run_timed_benchmark().await.unwrap();
    let errors_before = coordinator.statistics().errors();

    let report = coordinator.cleanup_benchmark().await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, TeardownStep::DisconnectClients);
    assert_eq!(coordinator.statistics().errors(), errors_before + 1);

    let steps = [
        "disconnect_client 1",
        "stop_client 0",
        "stop_client 1",
        "dispose_client 0",
        "dispose_client 1",
        "stop_server",
        "dispose_server",
    ];
    let positions: Vec<usize> = steps
        .iter()
        .map(|s| transport.position(s).unwrap_or_else(|| panic!("{} never ran", s)))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{:?}", transport.calls());
    assert_eq!(coordinator.phase(), RunPhase::CleanedUp);
}

#[tokio::test]
async fn test_dispose_after_cleanup_is_idempotent() {
    let transport = Arc::new(MockTransport::new(MockBehavior::default()));
    let mut coordinator = BenchmarkCoordinator::new(transport.clone(), setup(2)).unwrap();
    coordinator.run().await.unwrap();

    for client in transport.clients() {
        assert_eq!(client.dispose_calls.load(Ordering::SeqCst), 1);
        client.dispose().unwrap();
        assert_eq!(client.dispose_calls.load(Ordering::SeqCst), 2);
    }
    let disposals = transport
        .calls()
        .iter()
        .filter(|c| c.starts_with("dispose_client"))
        .count();
    assert_eq!(disposals, 2);
}

#[tokio::test]
async fn test_coordinator_can_run_twice() {
    let transport = Arc::new(MockTransport::new(MockBehavior::default()));
    let mut coordinator = BenchmarkCoordinator::new(transport.clone(), setup(1)).unwrap();

    let first = coordinator.run().await.unwrap();
    let second = coordinator.run().await.unwrap();

    // Statistics were reset before the second run
    assert_eq!(first.messages_client_sent, 1);
    assert_eq!(second.messages_client_sent, 1);
    assert_eq!(coordinator.phase(), RunPhase::CleanedUp);
}
