use super::*;
use crate::error::PipelineError;
use crate::runtime::{TaskId, VertexId};
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "ctrflow-{prefix}-{}-{nanos}",
        std::process::id()
    ))
}

fn meta(checkpoint_id: CheckpointId, task_ids: Vec<TaskId>) -> CheckpointMetadata {
    CheckpointMetadata {
        checkpoint_id,
        timestamp: checkpoint_id as i64 * 10,
        watermark: checkpoint_id as i64 * 1_000,
        task_ids,
    }
}

fn ack(checkpoint_id: CheckpointId, task_id: TaskId, state: Vec<u8>) -> TaskCheckpointAck {
    TaskCheckpointAck {
        checkpoint_id,
        task_id,
        state,
    }
}

fn t(vertex: u32, subtask: usize) -> TaskId {
    TaskId::new(VertexId::new(vertex), subtask)
}

// --- storage ---

fn states(entries: &[(TaskId, Vec<u8>)]) -> HashMap<TaskId, Vec<u8>> {
    entries.iter().cloned().collect()
}

#[test]
fn test_in_memory_checkpoint_storage_roundtrip() {
    let storage = InMemoryCheckpointStorage::new();
    let m = meta(7, vec![t(1, 0)]);

    storage.store(&m, &states(&[(t(1, 0), vec![1, 2, 3])])).unwrap();

    assert_eq!(storage.read_metadata(7).unwrap(), m);
    assert_eq!(storage.read_task_state(7, t(1, 0)).unwrap(), vec![1, 2, 3]);
    assert!(storage.read_task_state(7, t(1, 1)).is_err());
    assert_eq!(storage.checkpoint_ids().unwrap(), vec![7]);
}

#[test]
fn test_fs_checkpoint_storage_roundtrip() {
    let path = unique_temp_dir("checkpoint-storage");
    let storage = FsCheckpointStorage::new(&path).unwrap();
    let m = meta(9, vec![t(0, 0), t(2, 1)]);

    storage
        .store(&m, &states(&[(t(0, 0), vec![1]), (t(2, 1), vec![9, 8, 7])]))
        .unwrap();

    assert_eq!(storage.read_metadata(9).unwrap(), m);
    assert_eq!(storage.read_task_state(9, t(2, 1)).unwrap(), vec![9, 8, 7]);
    assert_eq!(storage.checkpoint_ids().unwrap(), vec![9]);
    assert!(storage.checkpoint_dir(9).join("vertex_2_1.state").is_file());
    assert!(!path.join("checkpoint-9.inprogress").exists());

    fs::remove_dir_all(&path).unwrap();
}

#[test]
fn test_fs_storage_replaces_checkpoint_with_same_id() {
    let path = unique_temp_dir("checkpoint-replace");
    let storage = FsCheckpointStorage::new(&path).unwrap();
    storage
        .store(&meta(3, vec![t(1, 0)]), &states(&[(t(1, 0), vec![1])]))
        .unwrap();
    storage
        .store(&meta(3, vec![t(1, 1)]), &states(&[(t(1, 1), vec![2])]))
        .unwrap();

    assert_eq!(storage.read_metadata(3).unwrap().task_ids, vec![t(1, 1)]);
    assert!(storage.read_task_state(3, t(1, 0)).is_err());
    fs::remove_dir_all(&path).unwrap();
}

#[test]
fn test_fs_storage_lists_only_completed_checkpoints() {
    let path = unique_temp_dir("checkpoint-foreign");
    let storage = FsCheckpointStorage::new(&path).unwrap();
    // An interrupted write, a directory without metadata and unrelated entries.
    fs::create_dir_all(path.join("checkpoint-4.inprogress")).unwrap();
    fs::write(path.join("checkpoint-4.inprogress").join("_metadata"), b"x").unwrap();
    fs::create_dir_all(path.join("checkpoint-6")).unwrap();
    fs::create_dir_all(path.join("checkpoint-abc")).unwrap();
    fs::create_dir_all(path.join("other")).unwrap();
    fs::write(path.join("checkpoint-5"), b"not a dir").unwrap();

    assert!(storage.checkpoint_ids().unwrap().is_empty());
    fs::remove_dir_all(&path).unwrap();
}

#[test]
fn test_storage_retain_latest() {
    let dir = unique_temp_dir("checkpoint-retain");
    let fs_storage = FsCheckpointStorage::new(&dir).unwrap();
    let mem_storage = InMemoryCheckpointStorage::new();
    let storages: [&dyn CheckpointStorage; 2] = [&fs_storage, &mem_storage];

    for storage in storages {
        for id in 1..=4 {
            storage
                .store(&meta(id, vec![t(1, 0)]), &states(&[(t(1, 0), vec![id as u8])]))
                .unwrap();
        }
        storage.retain_latest(2).unwrap();
        assert_eq!(storage.checkpoint_ids().unwrap(), vec![3, 4]);
        assert!(storage.read_task_state(1, t(1, 0)).is_err());
        assert_eq!(storage.read_task_state(4, t(1, 0)).unwrap(), vec![4]);
    }
    fs::remove_dir_all(&dir).unwrap();
}

// --- aligner ---

#[test]
fn test_barrier_aligner_single_input_aligned_immediately() {
    let mut aligner = BarrierAligner::<i32>::new(1);
    match aligner
        .process_element(0, StreamElement::barrier_with_timestamp(1, 100))
        .unwrap()
    {
        BarrierAlignResult::Aligned { barrier, buffered } => {
            assert_eq!(barrier.checkpoint_id, 1);
            assert!(buffered.is_empty());
        }
        other => panic!("expected aligned result, got {other:?}"),
    }
}

#[test]
fn test_barrier_aligner_channel_out_of_bounds_error() {
    let mut aligner = BarrierAligner::<i32>::new(2);
    let err = aligner
        .process_element(2, StreamElement::record(1))
        .unwrap_err();
    assert!(err.to_string().contains("out of bounds"), "unexpected error: {err}");
}

#[test]
fn test_barrier_aligner_duplicate_barrier_error() {
    let mut aligner = BarrierAligner::<i32>::new(2);
    aligner
        .process_element(0, StreamElement::barrier_with_timestamp(8, 100))
        .unwrap();
    let err = aligner
        .process_element(0, StreamElement::barrier_with_timestamp(8, 100))
        .unwrap_err();
    assert!(err.to_string().contains("duplicate barrier"), "unexpected error: {err}");
}

#[test]
fn test_barrier_aligner_multi_input_blocks_and_releases() {
    let mut aligner = BarrierAligner::<i32>::new(2);
    assert!(matches!(
        aligner
            .process_element(0, StreamElement::barrier_with_timestamp(7, 100))
            .unwrap(),
        BarrierAlignResult::Buffering
    ));
    assert!(matches!(
        aligner.process_element(0, StreamElement::record(10)).unwrap(),
        BarrierAlignResult::Buffering
    ));
    assert!(matches!(
        aligner.process_element(1, StreamElement::record(20)).unwrap(),
        BarrierAlignResult::Forward(StreamElement::Record(20))
    ));

    match aligner
        .process_element(1, StreamElement::barrier_with_timestamp(7, 100))
        .unwrap()
    {
        BarrierAlignResult::Aligned { barrier, buffered } => {
            assert_eq!(barrier.checkpoint_id, 7);
            assert_eq!(buffered, vec![(0, StreamElement::Record(10))]);
        }
        other => panic!("expected aligned, got {other:?}"),
    }

    assert!(matches!(
        aligner.process_element(0, StreamElement::record(30)).unwrap(),
        BarrierAlignResult::Forward(StreamElement::Record(30))
    ));
}

#[test]
fn test_barrier_aligner_holds_next_barrier_on_blocked_channel() {
    let mut aligner = BarrierAligner::<i32>::new(2);
    aligner
        .process_element(0, StreamElement::barrier_with_timestamp(1, 10))
        .unwrap();
    // Channel 0 already moved on to checkpoint 2.
    assert!(matches!(
        aligner
            .process_element(0, StreamElement::barrier_with_timestamp(2, 20))
            .unwrap(),
        BarrierAlignResult::Buffering
    ));

    let buffered = match aligner
        .process_element(1, StreamElement::barrier_with_timestamp(1, 10))
        .unwrap()
    {
        BarrierAlignResult::Aligned { buffered, .. } => buffered,
        other => panic!("expected aligned, got {other:?}"),
    };
    assert_eq!(buffered.len(), 1);

    // Replaying the held-back barrier starts the next alignment.
    let (ch, elem) = buffered.into_iter().next().unwrap();
    assert!(matches!(
        aligner.process_element(ch, elem).unwrap(),
        BarrierAlignResult::Buffering
    ));
    assert!(matches!(
        aligner
            .process_element(1, StreamElement::barrier_with_timestamp(2, 20))
            .unwrap(),
        BarrierAlignResult::Aligned { barrier: Barrier { checkpoint_id: 2, .. }, .. }
    ));
}

#[test]
fn test_barrier_aligner_abort_on_buffer_overflow() {
    let mut aligner = BarrierAligner::<i32>::new(2).with_max_buffer_size(1);
    aligner
        .process_element(0, StreamElement::barrier_with_timestamp(9, 100))
        .unwrap();
    assert!(matches!(
        aligner.process_element(0, StreamElement::record(1)).unwrap(),
        BarrierAlignResult::Buffering
    ));

    match aligner.process_element(0, StreamElement::record(2)).unwrap() {
        BarrierAlignResult::Aborted {
            checkpoint_id,
            drained,
        } => {
            assert_eq!(checkpoint_id, 9);
            assert_eq!(
                drained,
                vec![(0, StreamElement::Record(1)), (0, StreamElement::Record(2))]
            );
        }
        other => panic!("expected aborted, got {other:?}"),
    }

    // Late barrier from the aborted checkpoint must be ignored.
    assert!(matches!(
        aligner
            .process_element(1, StreamElement::barrier_with_timestamp(9, 100))
            .unwrap(),
        BarrierAlignResult::Buffering
    ));
    assert!(matches!(
        aligner.process_element(1, StreamElement::record(3)).unwrap(),
        BarrierAlignResult::Forward(StreamElement::Record(3))
    ));
}

#[test]
fn test_barrier_aligner_newer_barrier_supersedes_alignment() {
    let mut aligner = BarrierAligner::<i32>::new(2);
    aligner
        .process_element(0, StreamElement::barrier_with_timestamp(10, 100))
        .unwrap();
    aligner.process_element(0, StreamElement::record(1)).unwrap();

    // Channel 1 never delivers checkpoint 10: its upstream abandoned it.
    match aligner
        .process_element(1, StreamElement::barrier_with_timestamp(11, 110))
        .unwrap()
    {
        BarrierAlignResult::Aborted {
            checkpoint_id,
            drained,
        } => {
            assert_eq!(checkpoint_id, 10);
            assert_eq!(
                drained,
                vec![
                    (0, StreamElement::Record(1)),
                    (1, StreamElement::barrier_with_timestamp(11, 110)),
                ]
            );
        }
        other => panic!("expected aborted, got {other:?}"),
    }

    assert!(matches!(
        aligner.process_element(0, StreamElement::record(1)).unwrap(),
        BarrierAlignResult::Forward(StreamElement::Record(1))
    ));
    assert!(matches!(
        aligner
            .process_element(1, StreamElement::barrier_with_timestamp(11, 110))
            .unwrap(),
        BarrierAlignResult::Buffering
    ));
    // Channel 1 is blocked again, this time on checkpoint 11.
    assert!(matches!(
        aligner.process_element(1, StreamElement::record(2)).unwrap(),
        BarrierAlignResult::Buffering
    ));
}

#[test]
fn test_barrier_aligner_drops_older_barrier() {
    let mut aligner = BarrierAligner::<i32>::new(2);
    aligner
        .process_element(0, StreamElement::barrier_with_timestamp(11, 110))
        .unwrap();
    assert!(matches!(
        aligner
            .process_element(1, StreamElement::barrier_with_timestamp(10, 100))
            .unwrap(),
        BarrierAlignResult::Buffering
    ));
    assert!(matches!(
        aligner
            .process_element(1, StreamElement::barrier_with_timestamp(11, 110))
            .unwrap(),
        BarrierAlignResult::Aligned { barrier: Barrier { checkpoint_id: 11, .. }, .. }
    ));
}

// --- coordinator ---

#[test]
fn test_checkpoint_coordinator_trigger_ack_finalize() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    let mut coordinator = CheckpointCoordinator::new(storage.clone());

    let barrier = coordinator
        .trigger_checkpoint(1234, 5_000, vec![t(1, 0), t(1, 1)])
        .unwrap();
    assert_eq!(barrier.checkpoint_id, 1);
    assert_eq!(barrier.timestamp, 1234);
    assert_eq!(coordinator.pending_checkpoint_id(), Some(1));

    assert!(!coordinator.acknowledge_checkpoint(ack(1, t(1, 0), vec![1, 2])).unwrap());
    assert!(coordinator.acknowledge_checkpoint(ack(1, t(1, 1), vec![3, 4])).unwrap());

    assert_eq!(coordinator.completed_checkpoint_ids(), vec![1]);
    assert_eq!(coordinator.pending_checkpoint_id(), None);
    let m = storage.read_metadata(1).unwrap();
    assert_eq!(m.timestamp, 1234);
    assert_eq!(m.watermark, 5_000);
    assert_eq!(m.task_ids, vec![t(1, 0), t(1, 1)]);
    assert_eq!(coordinator.latest_completed(), Some(&m));
    assert_eq!(storage.read_task_state(1, t(1, 1)).unwrap(), vec![3, 4]);
}

#[test]
fn test_checkpoint_coordinator_one_pending_at_a_time() {
    let mut coordinator = CheckpointCoordinator::new(Arc::new(InMemoryCheckpointStorage::new()));
    coordinator.trigger_checkpoint(1, 0, vec![t(0, 0)]).unwrap();
    let err = coordinator
        .trigger_checkpoint(2, 0, vec![t(0, 0)])
        .unwrap_err();
    assert!(err.to_string().contains("still pending"), "unexpected error: {err}");
}

#[test]
fn test_checkpoint_coordinator_rejects_empty_expected_tasks() {
    let mut coordinator = CheckpointCoordinator::new(Arc::new(InMemoryCheckpointStorage::new()));
    let err = coordinator.trigger_checkpoint(123, 0, Vec::new()).unwrap_err();
    assert!(err.to_string().contains("expected_tasks"), "unexpected error: {err}");
}

#[test]
fn test_checkpoint_coordinator_rejects_duplicate_and_unknown_acks() {
    let mut coordinator = CheckpointCoordinator::new(Arc::new(InMemoryCheckpointStorage::new()));
    coordinator
        .trigger_checkpoint(10, 0, vec![t(2, 0), t(2, 1)])
        .unwrap();
    coordinator.acknowledge_checkpoint(ack(1, t(2, 0), vec![9])).unwrap();

    let err = coordinator
        .acknowledge_checkpoint(ack(1, t(2, 0), vec![9]))
        .unwrap_err();
    assert!(err.to_string().contains("duplicate ack"), "unexpected error: {err}");

    let err = coordinator
        .acknowledge_checkpoint(ack(1, t(9, 0), vec![]))
        .unwrap_err();
    assert!(err.to_string().contains("is not expected"), "unexpected error: {err}");

    let err = coordinator
        .acknowledge_checkpoint(ack(5, t(2, 1), vec![]))
        .unwrap_err();
    assert!(err.to_string().contains("not pending"), "unexpected error: {err}");
}

#[test]
fn test_checkpoint_coordinator_retention_purges_old_checkpoints() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    let mut coordinator =
        CheckpointCoordinator::new(storage.clone()).with_retained_checkpoints(2);

    for ts in [100, 200, 300] {
        let barrier = coordinator.trigger_checkpoint(ts, 0, vec![t(3, 0)]).unwrap();
        coordinator
            .acknowledge_checkpoint(ack(barrier.checkpoint_id, t(3, 0), vec![ts as u8]))
            .unwrap();
    }

    assert_eq!(coordinator.completed_checkpoint_ids(), vec![2, 3]);
    assert_eq!(storage.checkpoint_ids().unwrap(), vec![2, 3]);
}

#[test]
fn test_checkpoint_coordinator_abort_ignores_late_ack() {
    let mut coordinator = CheckpointCoordinator::new(Arc::new(InMemoryCheckpointStorage::new()));
    coordinator
        .trigger_checkpoint(50, 0, vec![t(5, 0), t(5, 1)])
        .unwrap();
    assert!(coordinator.abort_checkpoint(1, "alignment buffer overflow"));
    assert!(!coordinator.abort_checkpoint(1, "again"));
    assert!(coordinator.completed_checkpoint_ids().is_empty());
    assert_eq!(coordinator.aborted_checkpoint_ids(), vec![1]);

    assert!(!coordinator.acknowledge_checkpoint(ack(1, t(5, 1), vec![1])).unwrap());

    // The next checkpoint gets a fresh id.
    let barrier = coordinator.trigger_checkpoint(60, 0, vec![t(5, 0)]).unwrap();
    assert_eq!(barrier.checkpoint_id, 2);
}

#[test]
fn test_checkpoint_coordinator_timeout() {
    let mut coordinator = CheckpointCoordinator::new(Arc::new(InMemoryCheckpointStorage::new()))
        .with_timeout(Duration::from_secs(5));
    coordinator.trigger_checkpoint(1, 0, vec![t(0, 0)]).unwrap();

    assert_eq!(coordinator.abort_if_timed_out(Instant::now()), None);
    let later = Instant::now() + Duration::from_secs(6);
    assert_eq!(coordinator.abort_if_timed_out(later), Some(1));
    assert_eq!(coordinator.pending_checkpoint_id(), None);
}

#[test]
fn test_checkpoint_coordinator_continues_numbering() {
    let mut coordinator = CheckpointCoordinator::new(Arc::new(InMemoryCheckpointStorage::new()))
        .with_next_checkpoint_id(8);
    let barrier = coordinator.trigger_checkpoint(1, 0, vec![t(0, 0)]).unwrap();
    assert_eq!(barrier.checkpoint_id, 8);
}

// --- recovery ---

fn complete(storage: &dyn CheckpointStorage, id: CheckpointId, tasks: &[TaskId]) {
    let task_states = tasks.iter().map(|task| (*task, vec![id as u8])).collect();
    storage.store(&meta(id, tasks.to_vec()), &task_states).unwrap();
}

fn recovery_failure(result: Result<Option<RestoredCheckpoint>>) -> String {
    let err = result.expect_err("recovery should fail");
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::RecoveryFailure(msg)) => msg.clone(),
        other => panic!("expected recovery failure, got {other:?}"),
    }
}

#[test]
fn test_recover_latest_empty_storage() {
    let storage = InMemoryCheckpointStorage::new();
    let restored = recover_latest(&storage, &[t(0, 0)], |_| Ok(())).unwrap();
    assert!(restored.is_none());
}

#[test]
fn test_recover_latest_picks_newest() {
    let storage = InMemoryCheckpointStorage::new();
    let tasks = [t(0, 0), t(1, 0)];
    complete(&storage, 1, &tasks);
    complete(&storage, 2, &tasks);

    let restored = recover_latest(&storage, &tasks, |_| Ok(())).unwrap().unwrap();
    assert_eq!(restored.checkpoint_id(), 2);
    assert_eq!(restored.metadata.watermark, 2_000);
    assert_eq!(restored.task_state(t(1, 0)).unwrap(), &[2]);
    assert!(restored.task_state(t(7, 0)).is_err());
}

#[test]
fn test_recover_latest_falls_back_past_corrupt_checkpoint() {
    let dir = unique_temp_dir("recovery-fallback");
    let storage = FsCheckpointStorage::new(&dir).unwrap();
    let tasks = [t(0, 0), t(1, 0)];
    complete(&storage, 1, &tasks);
    complete(&storage, 2, &tasks);
    complete(&storage, 3, &tasks);
    // Checkpoint 3 loses a task state, checkpoint 2 gets corrupt metadata.
    fs::remove_file(storage.checkpoint_dir(3).join(format!("{}.state", t(1, 0)))).unwrap();
    fs::write(storage.checkpoint_dir(2).join("_metadata"), b"garbage").unwrap();

    let restored = recover_latest(&storage, &tasks, |_| Ok(())).unwrap().unwrap();
    assert_eq!(restored.checkpoint_id(), 1);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_recover_latest_skips_rejected_state() {
    let storage = InMemoryCheckpointStorage::new();
    let tasks = [t(0, 0)];
    complete(&storage, 1, &tasks);
    complete(&storage, 2, &tasks);

    let restored = recover_latest(&storage, &tasks, |c| {
        if c.checkpoint_id() == 2 {
            Err(anyhow!("bad state"))
        } else {
            Ok(())
        }
    })
    .unwrap()
    .unwrap();
    assert_eq!(restored.checkpoint_id(), 1);
}

#[test]
fn test_recover_latest_fails_when_nothing_is_usable() {
    let storage = InMemoryCheckpointStorage::new();
    complete(&storage, 1, &[t(0, 0), t(1, 0)]);

    // A job with a different parallelism cannot use the checkpoint.
    let msg = recovery_failure(recover_latest(
        &storage,
        &[t(0, 0), t(1, 0), t(1, 1)],
        |_| Ok(()),
    ));
    assert!(msg.contains("1 checkpoints"), "{msg}");
}
