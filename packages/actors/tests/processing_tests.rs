#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashSet;
use std::error::Error;
use std::time::Duration;

use actors::{WorkerScope, start_supervisor};
use db::repositories::{ApplicationRepository, JobRepository, NewJob};
use integration_core::{HANDLER_FAULT_MESSAGE, JobId, JobState, UNRESOLVED_HANDLER_MESSAGE};

use common::{Seen, wait_until};

const WAIT: Duration = Duration::from_secs(10);

// The connection is bound to the runtime that opened it, so every scenario
// runs inside one test.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_processing() -> Result<(), Box<dyn Error>> {
    let _guard = common::setup_db().await?;

    handler_outcomes_are_recorded().await?;
    global_worker_skips_inactive_applications().await?;
    each_job_processed_exactly_once().await?;

    Ok(())
}

async fn all_settled(ids: &[JobId]) -> bool {
    let ids = ids.to_vec();
    wait_until(WAIT, || {
        let ids = ids.clone();
        async move {
            for id in ids {
                match JobRepository::get(id).await {
                    Ok(job) if job.state != JobState::Ready => {}
                    _ => return false,
                }
            }
            true
        }
    })
    .await
}

async fn handler_outcomes_are_recorded() -> Result<(), Box<dyn Error>> {
    common::reset_db().await?;
    let (supervisor, _join) = start_supervisor(common::registry(Seen::default()), common::config()).await?;

    let mut cases = Vec::new();
    for function in ["ok", "fail", "fault", "panic", "missing"] {
        let app = ApplicationRepository::create(&common::application(function, function)).await?;
        let job = JobRepository::create(NewJob::ready(app.id).with_data("<order/>")).await?;
        supervisor.start(app.id).await?;
        cases.push((function, job.id));
    }

    let ids: Vec<JobId> = cases.iter().map(|(_, id)| *id).collect();
    assert!(all_settled(&ids).await);

    for (function, id) in cases {
        let job = JobRepository::get(id).await?;
        assert!(!job.claimed, "{function} left a claim behind");
        let (state, message) = match function {
            "ok" => (JobState::Done, "processed <order/>"),
            "fail" => (JobState::Error, "rejected by remote"),
            "fault" | "panic" => (JobState::Error, HANDLER_FAULT_MESSAGE),
            _ => (JobState::Error, UNRESOLVED_HANDLER_MESSAGE),
        };
        assert_eq!(job.state, state, "{function}");
        assert_eq!(job.message.as_deref(), Some(message), "{function}");
    }

    // Errored jobs are not retried until re-queued by hand
    let errored = JobRepository::list_by_state(JobState::Error).await?;
    assert_eq!(errored.len(), 4);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(JobRepository::list_by_state(JobState::Error).await?.len(), 4);

    supervisor.shutdown().await?;
    Ok(())
}

async fn global_worker_skips_inactive_applications() -> Result<(), Box<dyn Error>> {
    common::reset_db().await?;

    let app1 = ApplicationRepository::create(&common::application("app1", "ok")).await?;
    let app2 =
        ApplicationRepository::create(&common::application("app2", "ok").with_active(false))
            .await?;
    let job_a = JobRepository::create(NewJob::ready(app1.id).with_data("a")).await?;
    let job_b = JobRepository::create(NewJob::ready(app2.id).with_data("b")).await?;
    let draft = JobRepository::create(NewJob::draft(app1.id)).await?;

    let seen = Seen::default();
    let config = common::config().with_global_worker(true);
    let (supervisor, _join) = start_supervisor(common::registry(seen.clone()), config).await?;
    supervisor.boot().await?;

    let workers = supervisor.list_workers().await?;
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].scope, WorkerScope::Global);

    assert!(all_settled(&[job_a.id]).await);
    // Give the global worker a few more cycles
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(JobRepository::get(job_a.id).await?.state, JobState::Done);
    assert_eq!(JobRepository::get(job_b.id).await?.state, JobState::Ready);
    assert_eq!(JobRepository::get(draft.id).await?.state, JobState::Draft);
    assert_eq!(seen.ids(), vec![job_a.id]);

    // Booting again does not start a second global worker
    supervisor.boot().await?;
    assert_eq!(supervisor.list_workers().await?.len(), 1);

    supervisor.shutdown().await?;
    Ok(())
}

async fn each_job_processed_exactly_once() -> Result<(), Box<dyn Error>> {
    common::reset_db().await?;

    let app = ApplicationRepository::create(&common::application("busy", "ok")).await?;
    let mut ids = Vec::new();
    for n in 0..40 {
        let job = JobRepository::create(NewJob::ready(app.id).with_data(n.to_string())).await?;
        ids.push(job.id);
    }

    // Several engines share one store; every global worker competes for
    // the same jobs as the application's own worker.
    let seen = Seen::default();
    let mut supervisors = Vec::new();
    for _ in 0..4 {
        let config = common::config().with_global_worker(true);
        let (supervisor, _join) = start_supervisor(common::registry(seen.clone()), config).await?;
        supervisor.boot().await?;
        supervisors.push(supervisor);
    }
    supervisors[0].start(app.id).await?;

    let workers = supervisors[0].list_workers().await?;
    assert_eq!(workers.len(), 2);
    assert!(workers.windows(2).all(|pair| pair[0].token < pair[1].token));

    assert!(all_settled(&ids).await);

    let processed = seen.ids();
    assert_eq!(processed.len(), ids.len());
    let unique: HashSet<JobId> = processed.into_iter().collect();
    assert_eq!(unique, ids.iter().copied().collect());

    for id in &ids {
        let job = JobRepository::get(*id).await?;
        assert_eq!(job.state, JobState::Done);
        assert!(!job.claimed);
    }

    for supervisor in supervisors {
        supervisor.shutdown().await?;
    }
    Ok(())
}
