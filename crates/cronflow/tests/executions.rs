mod common;

use chrono::{Duration, Utc};
use serial_test::serial;

use common::{one_shot_create, setup_db};
use cronflow::model::ExecutionOutcome;
use cronflow::service::JobService;
use cronflow::store::JobStore;

#[tokio::test]
#[serial]
async fn successful_finish_clears_lease_and_completes_one_shot() {
    let pool = setup_db().await;
    let store = JobStore::new(pool.clone());
    let service = JobService::new(store.clone());

    let now = Utc::now();
    service
        .create_job(one_shot_create(now - Duration::seconds(1)))
        .await
        .unwrap();

    let leased = store
        .get_jobs_to_run(now, now + Duration::seconds(60), "worker-a", 10)
        .await
        .unwrap();
    let job = &leased[0];

    store
        .finish_job_execution(
            job,
            now,
            now + Duration::seconds(1),
            &ExecutionOutcome::Success,
        )
        .await
        .unwrap();

    let finished = store.get(job.id).await.unwrap();
    assert_eq!(finished.status.as_str(), "COMPLETED");
    assert_eq!(finished.locked_by, None);
    assert_eq!(finished.locked_until, None);
    assert_eq!(finished.number_of_runs, 1);
    assert_eq!(finished.failed_runs, 0);

    // Completed jobs never come back.
    let leased = store
        .get_jobs_to_run(
            now + Duration::seconds(10),
            now + Duration::seconds(12),
            "worker-b",
            10,
        )
        .await
        .unwrap();
    assert!(leased.is_empty());

    let executions = store.list_executions(job.id, false, 10, 0).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert!(executions[0].success);
    assert_eq!(executions[0].error_message, None);
}

#[tokio::test]
#[serial]
async fn failed_one_shot_is_retried_on_later_ticks() {
    let pool = setup_db().await;
    let store = JobStore::new(pool.clone());
    let service = JobService::new(store.clone());

    let now = Utc::now();
    let mut create = one_shot_create(now - Duration::seconds(1));
    create.allowed_failed_runs = 2;
    let created = service.create_job(create).await.unwrap();

    let leased = store
        .get_jobs_to_run(now, now + Duration::seconds(60), "worker-a", 10)
        .await
        .unwrap();
    store
        .finish_job_execution(
            &leased[0],
            now,
            now + Duration::seconds(1),
            &ExecutionOutcome::Failed("connection refused".into()),
        )
        .await
        .unwrap();

    let job = store.get(created.id).await.unwrap();
    assert_eq!(job.status.as_str(), "NEW");
    assert_eq!(job.failed_runs, 1);
    assert_eq!(job.number_of_runs, 1);
    // One-shots keep their next_run so the next tick picks them up again.
    assert_eq!(job.next_run, leased[0].next_run);

    let leased = store
        .get_jobs_to_run(
            now + Duration::seconds(5),
            now + Duration::seconds(65),
            "worker-b",
            10,
        )
        .await
        .unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].id, created.id);
}

#[tokio::test]
#[serial]
async fn exhausting_the_allowance_marks_the_job_failed() {
    let pool = setup_db().await;
    let store = JobStore::new(pool.clone());
    let service = JobService::new(store.clone());

    let now = Utc::now();
    let created = service
        .create_job(one_shot_create(now - Duration::seconds(1)))
        .await
        .unwrap();

    let leased = store
        .get_jobs_to_run(now, now + Duration::seconds(60), "worker-a", 10)
        .await
        .unwrap();
    store
        .finish_job_execution(
            &leased[0],
            now,
            now + Duration::seconds(1),
            &ExecutionOutcome::Failed("boom".into()),
        )
        .await
        .unwrap();

    let job = store.get(created.id).await.unwrap();
    assert_eq!(job.status.as_str(), "FAILED");
    assert_eq!(job.failed_runs, 1);
    assert_eq!(job.locked_by, None);

    let leased = store
        .get_jobs_to_run(
            now + Duration::seconds(5),
            now + Duration::seconds(65),
            "worker-b",
            10,
        )
        .await
        .unwrap();
    assert!(leased.is_empty(), "FAILED jobs must never be leased");

    let executions = store.list_executions(created.id, false, 10, 0).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert!(!executions[0].success);
    assert_eq!(executions[0].error_message.as_deref(), Some("boom"));
}

#[tokio::test]
#[serial]
async fn canceled_runs_release_the_lease_and_record_nothing() {
    let pool = setup_db().await;
    let store = JobStore::new(pool.clone());
    let service = JobService::new(store.clone());

    let now = Utc::now();
    let created = service
        .create_job(one_shot_create(now - Duration::seconds(1)))
        .await
        .unwrap();

    let leased = store
        .get_jobs_to_run(now, now + Duration::seconds(60), "worker-a", 10)
        .await
        .unwrap();
    store
        .finish_job_execution(
            &leased[0],
            now,
            now + Duration::seconds(1),
            &ExecutionOutcome::Canceled,
        )
        .await
        .unwrap();

    let job = store.get(created.id).await.unwrap();
    assert_eq!(job.status.as_str(), "NEW");
    assert_eq!(job.locked_by, None);
    assert_eq!(job.number_of_runs, 0);
    assert_eq!(job.failed_runs, 0);

    let executions = store.list_executions(created.id, false, 10, 0).await.unwrap();
    assert!(executions.is_empty(), "a canceled run is not an attempt");

    // Redrives immediately.
    let leased = store
        .get_jobs_to_run(
            now + Duration::seconds(2),
            now + Duration::seconds(62),
            "worker-b",
            10,
        )
        .await
        .unwrap();
    assert_eq!(leased.len(), 1);
}

#[tokio::test]
#[serial]
async fn number_of_runs_tracks_the_audit_trail() {
    let pool = setup_db().await;
    let store = JobStore::new(pool.clone());
    let service = JobService::new(store.clone());

    let mut create = common::cron_create("@every 1m");
    create.allowed_failed_runs = 10;
    let created = service.create_job(create).await.unwrap();

    let mut now = Utc::now() + Duration::seconds(61);
    for round in 0..3 {
        let leased = store
            .get_jobs_to_run(now, now + Duration::seconds(60), "worker-a", 10)
            .await
            .unwrap();
        assert_eq!(leased.len(), 1, "round {round} should lease the cron job");

        let outcome = if round == 1 {
            ExecutionOutcome::Failed("flaky".into())
        } else {
            ExecutionOutcome::Success
        };
        store
            .finish_job_execution(&leased[0], now, now + Duration::seconds(1), &outcome)
            .await
            .unwrap();

        now += Duration::seconds(120);
    }

    let job = store.get(created.id).await.unwrap();
    let executions = store.list_executions(created.id, false, 10, 0).await.unwrap();

    assert_eq!(job.number_of_runs, 3);
    assert_eq!(executions.len() as i32, job.number_of_runs);
    assert_eq!(job.failed_runs, 1);
}

#[tokio::test]
#[serial]
async fn only_failed_filters_the_audit_trail() {
    let pool = setup_db().await;
    let store = JobStore::new(pool.clone());
    let service = JobService::new(store.clone());

    let mut create = common::cron_create("@every 1m");
    create.allowed_failed_runs = 10;
    let created = service.create_job(create).await.unwrap();

    let mut now = Utc::now() + Duration::seconds(61);
    for outcome in [
        ExecutionOutcome::Success,
        ExecutionOutcome::Failed("nope".into()),
    ] {
        let leased = store
            .get_jobs_to_run(now, now + Duration::seconds(60), "worker-a", 10)
            .await
            .unwrap();
        store
            .finish_job_execution(&leased[0], now, now + Duration::seconds(1), &outcome)
            .await
            .unwrap();
        now += Duration::seconds(120);
    }

    let all = store.list_executions(created.id, false, 10, 0).await.unwrap();
    assert_eq!(all.len(), 2);

    let failed = store.list_executions(created.id, true, 10, 0).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_message.as_deref(), Some("nope"));
}
