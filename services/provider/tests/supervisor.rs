//! Integration tests for supervisor startup, run loop and shutdown.

mod common;

use std::time::Duration;

use bidplane_provider::{LifecycleState, ProviderError, Stage, StatusClient};
use common::{Harness, PROMPT};
use rstest::rstest;
use tokio::time::timeout;

const LINGER: Duration = Duration::from_millis(30);

#[tokio::test]
async fn test_starts_in_dependency_order() {
    let h = Harness::new();
    let service = h.start().await.unwrap();

    let stages: Vec<Stage> = h.factory.started().await.iter().map(|t| t.stage()).collect();
    assert_eq!(stages, Stage::ALL.to_vec());
    assert_eq!(service.state(), LifecycleState::Running);
    assert!(!service.done().is_done());

    service.close().await.unwrap();
}

#[rstest]
#[case::balance_checker(Stage::BalanceChecker, 0)]
#[case::cluster(Stage::Cluster, 1)]
#[case::bid_engine(Stage::BidEngine, 2)]
#[case::manifest(Stage::Manifest, 3)]
#[tokio::test]
async fn test_startup_failure_unwinds_started_stages(
    #[case] failing: Stage,
    #[case] started_before: usize,
) {
    let h = Harness::with_factory(|f| f.failing_at(failing).with_linger(LINGER));

    let err = timeout(PROMPT, h.start()).await.unwrap().unwrap_err();
    assert!(
        matches!(err, ProviderError::Startup { stage, .. } if stage == failing),
        "{err}"
    );

    // Every stage started before the failure has fully stopped by the time
    // the error is returned.
    let started = h.factory.started().await;
    assert_eq!(started.len(), started_before);
    for task in started {
        assert!(task.done().is_done(), "{} still running", task.stage());
    }
}

#[rstest]
#[case::balance_checker(Stage::BalanceChecker)]
#[case::cluster(Stage::Cluster)]
#[case::bid_engine(Stage::BidEngine)]
#[case::manifest(Stage::Manifest)]
#[tokio::test]
async fn test_subsystem_exit_stops_everything(#[case] crashing: Stage) {
    let h = Harness::with_factory(|f| f.with_linger(LINGER));
    let service = h.start().await.unwrap();

    h.factory.task(crashing).await.unwrap().crash();
    timeout(PROMPT, service.done().wait()).await.unwrap();

    assert_eq!(service.state(), LifecycleState::Stopped);
    for task in h.factory.started().await {
        assert!(task.done().is_done(), "{} still running", task.stage());
    }
    service.close().await.unwrap();
}

#[tokio::test]
async fn test_close_awaits_all_subsystems() {
    let h = Harness::with_factory(|f| f.with_linger(LINGER));
    let service = h.start().await.unwrap();

    timeout(PROMPT, service.close()).await.unwrap().unwrap();

    assert!(service.done().is_done());
    assert_eq!(service.state(), LifecycleState::Stopped);
    for task in h.factory.started().await {
        assert!(task.done().is_done(), "{} still running", task.stage());
    }

    // Closing again waits on the same completion.
    timeout(PROMPT, service.close()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_concurrent_close() {
    let h = Harness::with_factory(|f| f.with_linger(LINGER));
    let service = h.start().await.unwrap();

    let (a, b) = tokio::join!(service.close(), service.close());
    a.unwrap();
    b.unwrap();
    assert_eq!(service.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_parent_cancel_stops_service() {
    let h = Harness::new();
    let service = h.start().await.unwrap();

    h.parent.send_replace(true);
    timeout(PROMPT, service.done().wait()).await.unwrap();
    assert_eq!(service.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_status_aggregates_subsystems() {
    let h = Harness::new();
    let service = h.start().await.unwrap();

    let status = service.status().await.unwrap();
    assert_eq!(status.cluster_public_hostname, "provider.example.com");
    assert_eq!(status.cluster.leases, 0);
    assert_eq!(status.cluster.inventory.nodes.len(), 2);
    assert_eq!(status.bidengine.orders, 0);
    assert_eq!(status.manifest.deployments, 0);

    service.close().await.unwrap();
}

#[rstest]
#[case::cluster(Stage::Cluster, [1, 0, 0])]
#[case::bid_engine(Stage::BidEngine, [1, 1, 0])]
#[case::manifest(Stage::Manifest, [1, 1, 1])]
#[tokio::test]
async fn test_status_stops_at_first_failure(#[case] failing: Stage, #[case] calls: [u32; 3]) {
    let h = Harness::new();
    let service = h.start().await.unwrap();
    h.factory.fail_status(failing).await;

    let err = service.status().await.unwrap_err();
    assert_eq!(err.stage(), Some(failing));

    let observed = [
        h.factory.status_calls(Stage::Cluster).await,
        h.factory.status_calls(Stage::BidEngine).await,
        h.factory.status_calls(Stage::Manifest).await,
    ];
    assert_eq!(observed, calls);

    service.close().await.unwrap();
}
