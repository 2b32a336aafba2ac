use std::sync::Arc;

use proving_broker::{
    BrokerConfig, BrokerDatabase, DatabaseConfig, ProvingBroker, SqliteBrokerDatabase,
    open_database,
};
use proving_broker_core::{Epoch, JobId, JobOutcome, JobStatus, ProofKind, ProvingJob};

fn job(id: &str, kind: ProofKind, epoch: u64) -> ProvingJob {
    ProvingJob::new(id, kind, epoch, format!("inputs/{id}"))
}

fn config() -> BrokerConfig {
    BrokerConfig::default().with_epochs_to_keep(1)
}

#[tokio::test]
async fn adapter_round_trips_jobs_and_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let db = SqliteBrokerDatabase::open(dir.path().join("broker.sqlite"))
        .await
        .unwrap();

    db.add_job(&job("b", ProofKind::PublicVm, 2)).await.unwrap();
    db.add_job(&job("a", ProofKind::BaseParity, 1)).await.unwrap();
    db.add_job(&job("b", ProofKind::PublicVm, 2)).await.unwrap();
    db.add_job(&job("c", ProofKind::RootRollup, 3)).await.unwrap();
    db.set_job_result(&JobId::from("a"), &"proofs/a".into())
        .await
        .unwrap();
    db.set_job_error(&JobId::from("c"), "invalid inputs")
        .await
        .unwrap();

    let loaded = db.load_all_jobs().await.unwrap();
    let ids: Vec<_> = loaded.iter().map(|s| s.job.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a", "c"]);
    assert_eq!(loaded[0].job, job("b", ProofKind::PublicVm, 2));
    assert_eq!(loaded[0].outcome, None);
    assert_eq!(
        loaded[1].outcome,
        Some(JobOutcome::Fulfilled {
            value: "proofs/a".into()
        })
    );
    assert_eq!(
        loaded[2].outcome,
        Some(JobOutcome::Rejected {
            reason: "invalid inputs".to_string()
        })
    );

    assert_eq!(db.delete_jobs_older_than_epoch(Epoch::new(2)).await.unwrap(), 2);
    let remaining = db.load_all_jobs().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].job.id.as_str(), "c");

    db.close().await.unwrap();
}

#[tokio::test]
async fn closed_database_reports_closed() {
    let dir = tempfile::tempdir().unwrap();
    let db = SqliteBrokerDatabase::open(dir.path().join("broker.sqlite"))
        .await
        .unwrap();
    db.close().await.unwrap();

    let err = db.load_all_jobs().await.unwrap_err();
    assert!(matches!(err, proving_broker::DatabaseError::Closed));
}

#[tokio::test]
async fn broker_state_survives_a_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_config = DatabaseConfig::sqlite_in(dir.path().join("nested/data"));

    {
        let db = open_database(&db_config).await.unwrap();
        let broker = ProvingBroker::new(Arc::clone(&db), config()).unwrap();
        broker.start().await.unwrap();

        broker.enqueue(job("done", ProofKind::BaseParity, 1)).await.unwrap();
        broker.enqueue(job("running", ProofKind::BaseParity, 1)).await.unwrap();
        broker.enqueue(job("waiting", ProofKind::BaseParity, 1)).await.unwrap();

        broker.pull(&[]).await.unwrap();
        let running = broker
            .report_success(&JobId::from("done"), "proofs/done".into(), &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(running.job.id.as_str(), "running");

        broker.stop().await;
        db.close().await.unwrap();
    }

    let db = open_database(&db_config).await.unwrap();
    let broker = ProvingBroker::new(Arc::clone(&db), config()).unwrap();
    broker.start().await.unwrap();

    assert_eq!(
        broker.get_status(&JobId::from("done")).await,
        JobStatus::Fulfilled {
            value: "proofs/done".into()
        }
    );
    assert_eq!(broker.get_status(&JobId::from("running")).await, JobStatus::Queued);
    assert_eq!(broker.get_status(&JobId::from("waiting")).await, JobStatus::Queued);

    // advancing the watermark collects epoch 1 on disk as well
    broker.enqueue(job("next", ProofKind::BaseParity, 3)).await.unwrap();
    broker.tick().await.unwrap();
    assert_eq!(broker.get_status(&JobId::from("done")).await, JobStatus::NotFound);

    let remaining = db.load_all_jobs().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].job.id.as_str(), "next");

    broker.stop().await;
    db.close().await.unwrap();
}
