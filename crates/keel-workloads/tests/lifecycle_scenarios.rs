//! End-to-end scenarios exercising the public store surface.

use std::time::Duration;

use keel_core::Clock;
use keel_models::ActualLRPInstanceKey;
use keel_models::ActualLRPKey;
use keel_models::ActualLRPNetInfo;
use keel_models::ActualLRPState;
use keel_models::PortMapping;
use keel_models::TaskState;
use keel_workloads::ContainerRetainment;
use keel_workloads::test_support::TestBbs;
use keel_workloads::test_support::desired_lrp_with_instances;
use keel_workloads::test_support::task_with_guid;

fn key(index: i32) -> ActualLRPKey {
    ActualLRPKey::new("g", index, "some-domain")
}

fn instance_key(cell: &str) -> ActualLRPInstanceKey {
    ActualLRPInstanceKey::new(format!("instance-on-{cell}"), cell)
}

fn net_info() -> ActualLRPNetInfo {
    ActualLRPNetInfo::new("10.0.16.4", vec![PortMapping {
        container_port: 8080,
        host_port: 61000,
    }])
}

#[tokio::test]
async fn crash_below_threshold_unclaims_and_auctions_once() {
    let harness = TestBbs::new();
    harness.bbs.upsert_domain("some-domain", 0).await.unwrap();
    harness.bbs.desire_lrp(&desired_lrp_with_instances("g", 1)).await.unwrap();
    harness.auctioneer.clear();

    harness.bbs.start_actual_lrp(&key(0), &instance_key("c1"), &net_info()).await.unwrap();
    harness.set_instance_crash_count("g", 0, 2).await;
    harness.clock.advance(Duration::from_secs(60));

    harness.bbs.crash_actual_lrp(&key(0), &instance_key("c1"), "boom").await.unwrap();

    let lrp = harness.instance_lrp("g", 0).await;
    assert_eq!(lrp.state, ActualLRPState::Unclaimed);
    assert_eq!(lrp.crash_count, 3);
    assert_eq!(lrp.instance_key, ActualLRPInstanceKey::default());
    assert_eq!(lrp.since, harness.clock.now_nanos());

    assert_eq!(harness.auctioneer.requested_indices(), vec![("g".to_string(), 0)]);
}

#[tokio::test]
async fn crash_over_threshold_parks_without_auction() {
    let harness = TestBbs::new();
    harness.bbs.upsert_domain("some-domain", 0).await.unwrap();
    harness.bbs.desire_lrp(&desired_lrp_with_instances("g", 1)).await.unwrap();
    harness.auctioneer.clear();

    harness.bbs.start_actual_lrp(&key(0), &instance_key("c1"), &net_info()).await.unwrap();
    harness.set_instance_crash_count("g", 0, 4).await;
    harness.clock.advance(Duration::from_secs(60));

    harness.bbs.crash_actual_lrp(&key(0), &instance_key("c1"), "boom").await.unwrap();

    assert_eq!(harness.instance_lrp("g", 0).await.state, ActualLRPState::Crashed);
    assert!(harness.auctioneer.requested_indices().is_empty());
}

#[tokio::test]
async fn convergence_recovers_instances_from_a_dead_cell() {
    let harness = TestBbs::new();
    harness.bbs.upsert_domain("some-domain", 0).await.unwrap();
    harness.seed_cell("c2").await;
    harness.bbs.desire_lrp(&desired_lrp_with_instances("g", 2)).await.unwrap();
    harness.auctioneer.clear();

    for index in 0..2 {
        harness.bbs.start_actual_lrp(&key(index), &instance_key("c1"), &net_info()).await.unwrap();
    }

    harness.bbs.converge_lrps().await;

    for index in 0..2 {
        assert_eq!(harness.instance_lrp("g", index).await.state, ActualLRPState::Unclaimed);
    }

    let requests = harness.auctioneer.lrp_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].1.len(), 1);
    assert_eq!(requests[0].1[0].indices, vec![0, 1]);
}

#[tokio::test]
async fn extra_instances_survive_until_their_domain_is_fresh() {
    let harness = TestBbs::new();
    harness.seed_cell("c1").await;
    harness.bbs.desire_lrp(&desired_lrp_with_instances("g", 2)).await.unwrap();
    for index in 0..3 {
        harness.bbs.start_actual_lrp(&key(index), &instance_key("c1"), &net_info()).await.unwrap();
    }

    harness.bbs.converge_lrps().await;
    assert!(harness.cells.stops().is_empty(), "unfresh domain must not retire");

    harness.bbs.upsert_domain("some-domain", 0).await.unwrap();
    harness.bbs.converge_lrps().await;

    let stops = harness.cells.stops();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].0, "address-for-c1");
    assert_eq!(stops[0].1, key(2));
    assert_eq!(stops[0].2, instance_key("c1"));
}

#[tokio::test]
async fn pending_tasks_expire_into_failed_completions() {
    let harness = TestBbs::new();
    harness.bbs.desire_task(&task_with_guid("t")).await.unwrap();

    harness.clock.advance(Duration::from_secs(31));
    harness
        .bbs
        .converge_tasks(Duration::from_secs(30), Duration::from_secs(30), Duration::from_secs(300))
        .await;

    let task = harness.bbs.task_by_guid("t").await.unwrap();
    assert_eq!(task.state, TaskState::Completed);
    assert!(task.failed);
    assert!(task.failure_reason.contains("time limit"));
}

#[tokio::test]
async fn evacuation_round_trip_is_idempotent() {
    let harness = TestBbs::new();
    harness.bbs.upsert_domain("some-domain", 0).await.unwrap();
    harness.bbs.desire_lrp(&desired_lrp_with_instances("g", 1)).await.unwrap();
    let caller = instance_key("c");
    harness.bbs.start_actual_lrp(&key(0), &caller, &net_info()).await.unwrap();

    let first = harness
        .bbs
        .evacuate_running_actual_lrp(&key(0), &caller, &net_info(), 60)
        .await
        .unwrap();
    assert_eq!(first, ContainerRetainment::KeepContainer);
    assert_eq!(harness.evacuating_ttl("g", 0).await, 60);
    let tag = harness.evacuating_lrp("g", 0).await.modification_tag;

    // A second identical call keeps the container and does not bump the tag.
    let second = harness
        .bbs
        .evacuate_running_actual_lrp(&key(0), &caller, &net_info(), 60)
        .await
        .unwrap();
    assert_eq!(second, ContainerRetainment::KeepContainer);
    assert_eq!(harness.evacuating_lrp("g", 0).await.modification_tag, tag);

    harness.bbs.remove_evacuating_actual_lrp(&key(0), &caller).await.unwrap();
    assert!(harness.try_evacuating_lrp("g", 0).await.is_none());

    // Removing again is success: the record is already gone.
    harness.bbs.remove_evacuating_actual_lrp(&key(0), &caller).await.unwrap();
}

#[tokio::test]
async fn scaling_to_zero_retires_every_actual() {
    let harness = TestBbs::new();
    harness.seed_cell("c1").await;
    harness.bbs.upsert_domain("some-domain", 0).await.unwrap();
    harness.bbs.desire_lrp(&desired_lrp_with_instances("g", 2)).await.unwrap();
    for index in 0..2 {
        harness.bbs.start_actual_lrp(&key(index), &instance_key("c1"), &net_info()).await.unwrap();
    }

    harness
        .bbs
        .update_desired_lrp("g", &keel_models::DesiredLRPUpdate {
            instances: Some(0),
            ..Default::default()
        })
        .await
        .unwrap();

    let stops = harness.cells.stops();
    assert_eq!(stops.len(), 2, "one stop per running actual");
}

#[tokio::test]
async fn a_full_lrp_lifecycle_converges_to_running() {
    let harness = TestBbs::new();
    harness.bbs.upsert_domain("some-domain", 0).await.unwrap();
    harness.seed_cell("c1").await;
    harness.bbs.desire_lrp(&desired_lrp_with_instances("g", 1)).await.unwrap();

    // The converger seeds the missing index.
    harness.bbs.converge_lrps().await;
    assert_eq!(harness.instance_lrp("g", 0).await.state, ActualLRPState::Unclaimed);

    // A cell wins the auction, claims, then starts.
    harness.bbs.claim_actual_lrp(&key(0), &instance_key("c1")).await.unwrap();
    harness.bbs.start_actual_lrp(&key(0), &instance_key("c1"), &net_info()).await.unwrap();

    let lrp = harness.instance_lrp("g", 0).await;
    assert_eq!(lrp.state, ActualLRPState::Running);
    assert_eq!(lrp.net_info, net_info());

    // The world is now converged: another pass changes nothing.
    harness.auctioneer.clear();
    harness.bbs.converge_lrps().await;
    assert!(harness.auctioneer.lrp_requests().is_empty());
    assert!(harness.cells.stops().is_empty());
}

#[tokio::test]
async fn a_full_task_lifecycle_reaches_resolution() {
    let harness = TestBbs::new();
    harness.seed_cell("c1").await;
    harness.seed_receptor("http://receptor.example.com");

    harness.bbs.desire_task(&task_with_guid("t")).await.unwrap();
    assert!(harness.bbs.start_task("t", "c1").await.unwrap());
    harness.bbs.complete_task("t", "c1", false, "", "result contents").await.unwrap();

    assert_eq!(harness.callbacks.deliveries().len(), 1);

    harness.bbs.resolving_task("t").await.unwrap();
    harness.bbs.resolve_task("t").await.unwrap();
    assert!(harness.bbs.task_by_guid("t").await.unwrap_err().is_not_found());
}
