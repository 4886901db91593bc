//! Batch orchestration and per-job stage pipeline, driven against in-memory fakes.

mod helpers;

use helpers::*;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use receipt_ledger::models::job::{JobPhase, SaveStatus, STATUS_FAILED, STATUS_SUCCEEDED};
use receipt_ledger::services::orchestrator::{BatchOrchestrator, ValidationError};
use receipt_ledger::services::persistence::Destination;
use receipt_ledger::services::pipeline::{Collaborators, GENERIC_FAILURE};
use receipt_ledger::services::store::{JobStore, Snapshot};

const UNCLEAR: &str = "Could not extract any text. The image might be unclear.";

fn orchestrator() -> BatchOrchestrator {
    BatchOrchestrator::new(Arc::new(JobStore::new()))
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Snapshot>) -> Vec<Snapshot> {
    let mut snapshots = Vec::new();
    while let Ok(snapshot) = rx.try_recv() {
        snapshots.push(snapshot);
    }
    snapshots
}

#[tokio::test]
async fn test_success_and_extraction_failure_are_isolated() {
    let log = CallLog::default();
    let collaborators = collaborators(
        ScriptedExtractor::new(log.clone()).script("B.jpg", Ocr::NoText),
        FakeStructurer::new(log.clone()),
        FakePersister::new(log.clone()),
    );

    let result = assert_ok!(
        orchestrator()
            .process_batch(images(&["A.jpg", "B.jpg"]), destination(), &collaborators)
            .await
    );

    assert_eq!(result.len(), 2);

    let a = &result[0];
    assert_eq!(a.file_name, "A.jpg");
    assert_eq!(a.save_status, SaveStatus::Success);
    assert_eq!(a.phase, JobPhase::Succeeded);
    assert_eq!(a.status, STATUS_SUCCEEDED);
    assert_eq!(a.data.as_ref().unwrap().merchant, "A.jpg");
    assert!(a.error.is_none());

    let b = &result[1];
    assert_eq!(b.file_name, "B.jpg");
    assert_eq!(b.save_status, SaveStatus::Failed);
    assert_eq!(b.status, STATUS_FAILED);
    assert!(b.data.is_none());
    assert_eq!(b.error.as_deref(), Some(UNCLEAR));
}

#[tokio::test]
async fn test_blank_text_fails_without_structuring() {
    let log = CallLog::default();
    let collaborators = collaborators(
        ScriptedExtractor::new(log.clone()).script("blurry.jpg", Ocr::Text("  \n\t ".to_string())),
        FakeStructurer::new(log.clone()),
        FakePersister::new(log.clone()),
    );

    let result = assert_ok!(
        orchestrator()
            .process_batch(images(&["blurry.jpg"]), destination(), &collaborators)
            .await
    );

    let job = &result[0];
    assert_eq!(job.save_status, SaveStatus::Failed);
    assert!(job.data.is_none());
    assert_eq!(job.error.as_deref(), Some(UNCLEAR));
    assert_eq!(log.entries(), vec!["extract:blurry.jpg".to_string()]);
}

#[tokio::test]
async fn test_persistence_failure_keeps_data() {
    let log = CallLog::default();
    let collaborators = collaborators(
        ScriptedExtractor::new(log.clone()),
        FakeStructurer::new(log.clone()),
        FakePersister::new(log.clone()).failing_for("c.jpg"),
    );

    let result = assert_ok!(
        orchestrator()
            .process_batch(images(&["c.jpg"]), destination(), &collaborators)
            .await
    );

    let job = &result[0];
    assert_eq!(job.save_status, SaveStatus::Failed);
    assert_eq!(job.phase, JobPhase::Failed);
    let data = job.data.as_ref().expect("structured data retained");
    assert_eq!(data.merchant, "c.jpg");
    let error = job.error.as_deref().unwrap();
    assert!(error.contains(FAKE_TARGET), "unexpected error: {error}");
    assert!(error.contains("ledger unavailable"));
}

#[tokio::test]
async fn test_structuring_failures() {
    let log = CallLog::default();
    let collaborators = collaborators(
        ScriptedExtractor::new(log.clone())
            .script("garbled.jpg", Ocr::Text("GARBLED".to_string()))
            .script("negative.jpg", Ocr::Text("Refund Shop NEGATIVE".to_string())),
        FakeStructurer::new(log.clone()),
        FakePersister::new(log.clone()),
    );

    let result = assert_ok!(
        orchestrator()
            .process_batch(
                images(&["garbled.jpg", "negative.jpg", "fine.jpg"]),
                destination(),
                &collaborators,
            )
            .await
    );

    assert_eq!(result[0].save_status, SaveStatus::Failed);
    assert_eq!(
        result[0].error.as_deref(),
        Some("Structuring service did not return a JSON object")
    );
    assert!(result[0].data.is_none());

    assert_eq!(result[1].save_status, SaveStatus::Failed);
    assert!(result[1].data.is_none());
    assert!(result[1]
        .error
        .as_deref()
        .unwrap()
        .starts_with("Structured data failed validation"));

    assert_eq!(result[2].save_status, SaveStatus::Success);
    assert!(!log.entries().contains(&"persist:Refund Shop NEGATIVE".to_string()));
}

#[tokio::test]
async fn test_upstream_extraction_error_message() {
    let log = CallLog::default();
    let collaborators = collaborators(
        ScriptedExtractor::new(log.clone()).script("x.jpg", Ocr::Fail("model overloaded".to_string())),
        FakeStructurer::new(log.clone()),
        FakePersister::new(log.clone()),
    );

    let result = assert_ok!(
        orchestrator()
            .process_batch(images(&["x.jpg"]), destination(), &collaborators)
            .await
    );
    assert_eq!(
        result[0].error.as_deref(),
        Some("OCR service returned 502: model overloaded")
    );
}

#[tokio::test]
async fn test_blank_upstream_message_uses_generic_fallback() {
    let log = CallLog::default();
    let collaborators = collaborators(
        ScriptedExtractor::new(log.clone()).script("x.jpg", Ocr::Fail(String::new())),
        FakeStructurer::new(log.clone()),
        FakePersister::new(log.clone()),
    );

    let result = assert_ok!(
        orchestrator()
            .process_batch(images(&["x.jpg", "y.jpg"]), destination(), &collaborators)
            .await
    );
    assert_eq!(result[0].status, STATUS_FAILED);
    assert_eq!(result[0].error.as_deref(), Some(GENERIC_FAILURE));
    assert_eq!(result[1].save_status, SaveStatus::Success);
}

#[tokio::test]
async fn test_one_record_per_image_with_unique_ids() {
    let log = CallLog::default();
    let names = ["r1.jpg", "r2.jpg", "r3.jpg", "r1.jpg", "r5.jpg"];

    let result = assert_ok!(
        orchestrator()
            .process_batch(images(&names), destination(), &happy_collaborators(&log))
            .await
    );

    assert_eq!(result.len(), names.len());
    let ids: HashSet<_> = result.iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), names.len());
    let files: Vec<_> = result.iter().map(|r| r.file_name.as_str()).collect();
    assert_eq!(files, names);
    assert!(result.iter().all(|r| r.save_status == SaveStatus::Success));
}

#[tokio::test]
async fn test_jobs_run_strictly_in_order() {
    let log = CallLog::default();
    let orchestrator = orchestrator();
    let mut rx = orchestrator.store().subscribe();

    assert_ok!(
        orchestrator
            .process_batch(
                images(&["one.jpg", "two.jpg", "three.jpg"]),
                destination(),
                &happy_collaborators(&log),
            )
            .await
    );

    assert_eq!(
        log.entries(),
        vec![
            "extract:one.jpg",
            "structure:one.jpg",
            "persist:one.jpg",
            "extract:two.jpg",
            "structure:two.jpg",
            "persist:two.jpg",
            "extract:three.jpg",
            "structure:three.jpg",
            "persist:three.jpg",
        ]
    );

    let snapshots = drain(&mut rx);
    assert!(!snapshots.is_empty());
    for snapshot in &snapshots {
        for pair in snapshot.windows(2) {
            if pair[1].phase != JobPhase::Created {
                assert!(
                    pair[0].phase.is_terminal(),
                    "{} started before {} finished",
                    pair[1].file_name,
                    pair[0].file_name
                );
            }
        }
    }
}

#[tokio::test]
async fn test_status_labels_advance_in_order() {
    let log = CallLog::default();
    let orchestrator = orchestrator();
    let mut rx = orchestrator.store().subscribe();

    assert_ok!(
        orchestrator
            .process_batch(images(&["solo.jpg"]), destination(), &happy_collaborators(&log))
            .await
    );

    let statuses: Vec<String> = drain(&mut rx)
        .iter()
        .map(|snapshot| snapshot[0].status.clone())
        .collect();

    assert_eq!(
        statuses,
        vec![
            "Queued",
            "Processing OCR...",
            "Structuring data...",
            "Data extracted",
            "Saving to Fake Ledger...",
            "Saved successfully!",
        ]
    );
}

#[tokio::test]
async fn test_validation_fails_before_any_job() {
    let log = CallLog::default();
    let orchestrator = orchestrator().with_max_images(2);
    let collaborators = happy_collaborators(&log);
    let mut rx = orchestrator.store().subscribe();

    let err = assert_err!(orchestrator.process_batch(vec![], destination(), &collaborators).await);
    assert!(matches!(err, ValidationError::NoImages));

    let err = assert_err!(
        orchestrator
            .process_batch(images(&["a.jpg"]), None, &collaborators)
            .await
    );
    assert!(matches!(err, ValidationError::MissingDestination));

    let err = assert_err!(
        orchestrator
            .process_batch(
                images(&["a.jpg"]),
                Some(Destination::new("sheet", "")),
                &collaborators,
            )
            .await
    );
    assert!(matches!(err, ValidationError::InvalidDestination(_)));

    let err = assert_err!(
        orchestrator
            .process_batch(images(&["a.jpg", "b.jpg", "c.jpg"]), destination(), &collaborators)
            .await
    );
    assert!(matches!(err, ValidationError::TooManyImages { max: 2, got: 3 }));

    assert!(orchestrator.store().snapshot().is_empty());
    assert!(rx.try_recv().is_err());
    assert!(log.entries().is_empty());
}

#[tokio::test]
async fn test_failed_validation_keeps_previous_batch() {
    let log = CallLog::default();
    let orchestrator = orchestrator();
    let collaborators = happy_collaborators(&log);

    let first = assert_ok!(
        orchestrator
            .process_batch(images(&["kept.jpg"]), destination(), &collaborators)
            .await
    );
    assert_err!(orchestrator.process_batch(vec![], destination(), &collaborators).await);

    let current = orchestrator.store().snapshot();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].id, first[0].id);
}

#[tokio::test]
async fn test_new_batch_supersedes_pending_one() {
    let log = CallLog::default();
    let orchestrator = Arc::new(orchestrator());
    let gated = GatedExtractor::new(log.clone());
    let entered = gated.entered.clone();
    let gate = gated.gate.clone();
    let slow: Collaborators = collaborators(
        gated,
        FakeStructurer::new(log.clone()),
        FakePersister::new(log.clone()),
    );

    let first = assert_ok!(orchestrator.start_batch(images(&["old1.jpg", "old2.jpg"]), destination()));
    let old_ids: Vec<_> = first.job_ids().collect();

    let runner = orchestrator.clone();
    let handle = tokio::spawn(async move { runner.run_batch(first, &slow).await });
    entered.notified().await;

    let second = assert_ok!(orchestrator.start_batch(images(&["new1.jpg", "new2.jpg"]), destination()));
    let current = orchestrator.store().snapshot();
    assert_eq!(current.len(), 2);
    assert!(current.iter().all(|r| !old_ids.contains(&r.id)));

    // Release the parked OCR call: the replaced batch must stop without structuring,
    // saving or starting its second job.
    gate.add_permits(2);
    assert_ok!(handle.await);
    assert_eq!(log.entries(), vec!["extract:old1.jpg"]);
    assert!(old_ids.iter().all(|id| orchestrator.store().get(*id).is_none()));
    assert!(orchestrator
        .store()
        .snapshot()
        .iter()
        .all(|r| r.phase == JobPhase::Created));

    let result = orchestrator.run_batch(second, &happy_collaborators(&log)).await;
    assert_eq!(result.len(), 2);
    assert!(result.iter().all(|r| r.save_status == SaveStatus::Success));
    assert_eq!(orchestrator.summary().succeeded, 2);
    assert!(!log.entries().iter().any(|entry| {
        entry.starts_with("structure:old") || entry.starts_with("persist:old")
    }));
}

#[tokio::test]
async fn test_spawned_batch_cancels_the_one_it_replaces() {
    let log = CallLog::default();
    let orchestrator = Arc::new(orchestrator());
    let gated = GatedExtractor::new(log.clone());
    let entered = gated.entered.clone();
    let slow = collaborators(
        gated,
        FakeStructurer::new(log.clone()),
        FakePersister::new(log.clone()),
    );

    let first = assert_ok!(orchestrator.spawn_batch(
        images(&["old1.jpg", "old2.jpg"]),
        destination(),
        slow
    ));
    entered.notified().await;

    // A rejected upload leaves the running batch alone.
    assert_err!(orchestrator.spawn_batch(Vec::new(), destination(), happy_collaborators(&log)));
    assert!(!first.task.is_finished());

    let second = assert_ok!(orchestrator.spawn_batch(
        images(&["new.jpg"]),
        destination(),
        happy_collaborators(&log)
    ));
    let cancelled = first.task.await.unwrap_err();
    assert!(cancelled.is_cancelled());

    let result = assert_ok!(second.task.await);
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].id, second.initial[0].id);
    assert_eq!(result[0].save_status, SaveStatus::Success);
    assert_eq!(
        log.entries(),
        vec![
            "extract:old1.jpg",
            "extract:new.jpg",
            "structure:new.jpg",
            "persist:new.jpg"
        ]
    );
}

#[tokio::test]
async fn test_destination_reaches_persister() {
    let log = CallLog::default();
    let persister = Arc::new(FakePersister::new(log.clone()));
    let collaborators = Collaborators {
        extractor: Arc::new(ScriptedExtractor::new(log.clone())),
        structurer: Arc::new(FakeStructurer::new(log.clone())),
        persister: persister.clone(),
    };

    assert_ok!(
        orchestrator()
            .process_batch(
                images(&["d.jpg"]),
                Some(Destination::new("ledger-42", "t")),
                &collaborators,
            )
            .await
    );

    let saved = persister.saved.lock().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].1, "ledger-42");
}
