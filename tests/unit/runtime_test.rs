//! Tests for tokio spawner and periodic trigger

use std::sync::Arc;
use std::time::Duration;

use replica_dispatch::core::{ResourceType, RunOutcome, SchedulerLimits, Spawn};
use replica_dispatch::runtime::tokio_spawner::TokioSpawner;
use replica_dispatch::runtime::PeriodicTrigger;

use crate::common::{blobs, catalog_with_secondary, inline_scheduler, InlineDispatcher};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[tokio::test(start_paused = true)]
async fn test_trigger_runs_until_max_runs() {
    let catalog = catalog_with_secondary();
    catalog.add_resources(blobs(1..=6));
    let (scheduler, dispatcher, _) = inline_scheduler(
        &catalog,
        SchedulerLimits::new(2, 5),
        [ResourceType::Blob],
        InlineDispatcher::new(Arc::clone(&catalog)),
    );

    let summary = PeriodicTrigger::new(Duration::from_secs(60))
        .with_max_runs(3)
        .run(&scheduler)
        .await;

    assert_eq!(summary.runs, 3);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.admitted, 6);
    assert_eq!(summary.last_outcome, Some(RunOutcome::Completed));
    assert_eq!(dispatcher.jobs().len(), 6);
    assert_eq!(scheduler.metrics().snapshot().runs_started, 3);
}

#[tokio::test(start_paused = true)]
async fn test_trigger_stops_on_cancel() {
    let catalog = catalog_with_secondary();
    let (scheduler, _, _) = inline_scheduler(
        &catalog,
        SchedulerLimits::new(2, 5),
        ResourceType::ALL,
        InlineDispatcher::new(Arc::clone(&catalog)),
    );
    let trigger = PeriodicTrigger::new(Duration::from_secs(10));
    let token = trigger.cancellation_token();

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(25)).await;
        token.cancel();
    });
    let summary = trigger.run(&scheduler).await;
    stopper.await.expect("stopper");

    // Ticks at 0s, 10s and 20s.
    assert_eq!(summary.runs, 3);
}

#[tokio::test]
async fn test_trigger_cancelled_before_first_tick() {
    let catalog = catalog_with_secondary();
    let (scheduler, _, _) = inline_scheduler(
        &catalog,
        SchedulerLimits::new(2, 5),
        ResourceType::ALL,
        InlineDispatcher::new(Arc::clone(&catalog)),
    );
    let trigger = PeriodicTrigger::new(Duration::from_secs(10));
    trigger.cancellation_token().cancel();

    assert_eq!(trigger.run(&scheduler).await.runs, 0);
}
