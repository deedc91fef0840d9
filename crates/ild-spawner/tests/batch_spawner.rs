mod common;

use std::sync::Arc;

use common::{FakeBatch, MemoryStore, server, settings};
use ild_db::ServerStatus;
use ild_spawner::Spawner;
use ild_spawner::batch::BatchSpawner;

fn spawner(batch: &Arc<FakeBatch>, store: &Arc<MemoryStore>) -> BatchSpawner {
    BatchSpawner::new(batch.clone(), settings(), store.clone())
}

#[tokio::test]
async fn start_registers_once_and_submits_with_dependencies() {
    let batch = Arc::new(FakeBatch::default());
    let store = MemoryStore::with_servers([]);
    let spawner = spawner(&batch, &store);
    let mut server = server(1);
    server.config.depends_on = vec!["job-upstream".into()];

    spawner.start(&mut server).await.unwrap();

    {
        let registered = batch.registered.lock().unwrap();
        assert_eq!(registered.len(), 1);
        let props = &registered[0].container_properties;
        assert_eq!(props.vcpus, 1);
        assert_eq!(props.memory, 512);
        assert_eq!(registered[0].retry_strategy.as_ref().unwrap().attempts, 3);

        let submitted = batch.submitted.lock().unwrap();
        assert_eq!(submitted[0].job_queue, "jobs");
        assert_eq!(submitted[0].depends_on[0].job_id, "job-upstream");
        assert_eq!(submitted[0].retry_strategy.as_ref().unwrap().attempts, 3);
        assert_eq!(
            Some(submitted[0].job_definition.as_str()),
            server.config.batch.job_definition_arn.as_deref()
        );
    }

    assert_eq!(server.config.batch.job_id.as_deref(), Some("job1"));
    assert_eq!(store.server(server.id).config.batch, server.config.batch);
    assert_eq!(spawner.status(&server).await, ServerStatus::Launching);

    spawner.start(&mut server).await.unwrap();
    assert_eq!(batch.registered.lock().unwrap().len(), 1);
    assert_eq!(batch.submitted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn fractional_cpu_rounds_up_to_whole_vcpus() {
    let batch = Arc::new(FakeBatch::default());
    let store = MemoryStore::with_servers([]);
    let mut server = server(1);
    server.server_size.cpu = 1.5;

    let request = spawner(&batch, &store).job_definition(&server, false);

    assert_eq!(request.container_properties.vcpus, 2);
    assert_eq!(request.job_definition_name, server.container_name());
}

#[tokio::test]
async fn a_finished_job_is_resubmitted() {
    let batch = Arc::new(FakeBatch::default());
    let store = MemoryStore::with_servers([]);
    let spawner = spawner(&batch, &store);
    let mut server = server(1);

    spawner.start(&mut server).await.unwrap();
    *batch.job_status.lock().unwrap() = Some("FAILED".into());
    assert_eq!(spawner.status(&server).await, ServerStatus::Error);

    spawner.start(&mut server).await.unwrap();
    assert_eq!(server.config.batch.job_id.as_deref(), Some("job2"));
}

#[tokio::test]
async fn stop_cancels_the_job() {
    let batch = Arc::new(FakeBatch::default());
    let store = MemoryStore::with_servers([]);
    let spawner = spawner(&batch, &store);
    let mut server = server(1);
    server.config.batch.job_id = Some("job12".into());

    spawner.stop(&mut server).await.unwrap();

    assert_eq!(
        *batch.cancelled.lock().unwrap(),
        vec![("job12".to_string(), "Stopped by user request".to_string())]
    );
    assert!(server.config.batch.job_id.is_none());
    assert_eq!(spawner.status(&server).await, ServerStatus::Stopped);
}

#[tokio::test]
async fn terminate_kills_the_job_and_deregisters() {
    let batch = Arc::new(FakeBatch::default());
    let store = MemoryStore::with_servers([]);
    let spawner = spawner(&batch, &store);
    let mut server = server(1);

    spawner.start(&mut server).await.unwrap();
    let definition = server.config.batch.job_definition_arn.clone().unwrap();
    spawner.terminate(&mut server).await.unwrap();

    assert_eq!(batch.terminated.lock().unwrap()[0].0, "job1");
    assert_eq!(*batch.deregistered.lock().unwrap(), vec![definition]);
    assert_eq!(server.config.batch, Default::default());
    assert_eq!(store.server(server.id).config.batch, Default::default());
}

#[tokio::test]
async fn status_without_a_job_is_stopped() {
    let batch = Arc::new(FakeBatch::default());
    let store = MemoryStore::with_servers([]);
    let spawner = spawner(&batch, &store);
    let mut server = server(1);

    assert_eq!(spawner.status(&server).await, ServerStatus::Stopped);

    server.config.batch.job_id = Some("gone".into());
    assert_eq!(spawner.status(&server).await, ServerStatus::Stopped);

    *batch.job_status.lock().unwrap() = Some("RUNNING".into());
    assert_eq!(spawner.status(&server).await, ServerStatus::Running);
}

#[tokio::test]
async fn stop_and_terminate_without_ids_make_no_calls() {
    let batch = Arc::new(FakeBatch::default());
    let store = MemoryStore::with_servers([]);
    let spawner = spawner(&batch, &store);
    let mut server = server(1);

    spawner.stop(&mut server).await.unwrap();
    spawner.terminate(&mut server).await.unwrap();

    assert!(batch.cancelled.lock().unwrap().is_empty());
    assert!(batch.terminated.lock().unwrap().is_empty());
    assert!(batch.deregistered.lock().unwrap().is_empty());
    assert_eq!(store.saves(), 0);
}
