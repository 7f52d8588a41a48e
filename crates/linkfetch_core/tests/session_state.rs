use std::time::Duration;

use chrono::Utc;
use linkfetch_core::{
    is_resumable, Checkpoint, FailureKind, FailureReason, FetchResult, ItemStatus, Outcome,
    OutcomeKind, Payload, SessionAction, SessionState, SessionStatus, TransitionError, WorkItem,
};
use pretty_assertions::assert_eq;

fn items(n: usize) -> Vec<WorkItem> {
    (0..n)
        .map(|i| WorkItem::new(format!("P{i}"), format!("https://shop.example/p/{i}")))
        .collect()
}

fn ok_outcome(state: &SessionState, id: u64, kind: OutcomeKind) -> Outcome {
    Outcome {
        id,
        item: state.items[id as usize].item.clone(),
        kind,
        result: FetchResult::ok(
            Payload::Data(format!("data-{id}").into_bytes()),
            Duration::from_millis(5),
            42,
            1,
        ),
    }
}

fn failed_outcome(state: &SessionState, id: u64) -> Outcome {
    Outcome {
        id,
        item: state.items[id as usize].item.clone(),
        kind: OutcomeKind::Failed,
        result: FetchResult::failed(
            FailureReason::new(FailureKind::NotFound(404), "gone"),
            Duration::from_millis(5),
            1,
        ),
    }
}

#[test]
fn start_pause_resume_finish_cycle() {
    linkfetch_logging::initialize_for_tests();
    let mut state = SessionState::new("s1", items(3));
    assert_eq!(state.status, SessionStatus::Stopped);

    let queue = state.start().unwrap();
    assert_eq!(queue.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(state.status, SessionStatus::Running);

    assert!(state.mark_in_flight(0));
    assert!(state.mark_in_flight(1));
    let done = ok_outcome(&state, 0, OutcomeKind::Succeeded);
    assert!(state.apply_outcome(&done));

    state.pause().unwrap();
    assert_eq!(state.status, SessionStatus::Paused);
    // Item 1 was in flight and returns to the queue.
    assert_eq!(state.items[1].status, ItemStatus::Pending);

    let queue = state.resume().unwrap();
    assert_eq!(queue.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, 2]);

    assert_eq!(
        state.finish(),
        Err(TransitionError::Unfinished { pending: 2 })
    );
    let cached = ok_outcome(&state, 1, OutcomeKind::Cached);
    state.apply_outcome(&cached);
    let failed = failed_outcome(&state, 2);
    state.apply_outcome(&failed);
    state.finish().unwrap();
    assert_eq!(state.status, SessionStatus::Stopped);

    let counts = state.counts();
    assert_eq!(counts.succeeded, 1);
    assert_eq!(counts.cached, 1);
    assert_eq!(counts.failed, 1);
}

#[test]
fn illegal_transitions_are_rejected() {
    let mut state = SessionState::new("s1", items(1));
    assert_eq!(
        state.pause(),
        Err(TransitionError::InvalidTransition {
            from: SessionStatus::Stopped,
            action: SessionAction::Pause,
        })
    );
    assert!(state.resume().is_err());
    assert!(state.cancel().is_err());
    state.start().unwrap();
    assert!(state.start().is_err());
    assert!(state.resume().is_err());
}

#[test]
fn first_terminal_result_wins() {
    let mut state = SessionState::new("s1", items(1));
    state.start().unwrap();
    let first = ok_outcome(&state, 0, OutcomeKind::Succeeded);
    let second = failed_outcome(&state, 0);
    assert!(state.apply_outcome(&first));
    assert!(!state.apply_outcome(&second));
    assert_eq!(state.items[0].status, ItemStatus::Succeeded);
    assert!(!state.mark_in_flight(0));
}

#[test]
fn terminal_records_are_ordered_and_exclude_in_flight() {
    let mut state = SessionState::new("s1", items(4));
    state.start().unwrap();
    for id in 0..4 {
        state.mark_in_flight(id);
    }
    let third = ok_outcome(&state, 3, OutcomeKind::Succeeded);
    let first = ok_outcome(&state, 1, OutcomeKind::Cached);
    state.apply_outcome(&third);
    state.apply_outcome(&first);

    let ids: Vec<_> = state.terminal_records().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 3]);
}

#[test]
fn cancel_keeps_completed_results() {
    let mut state = SessionState::new("s1", items(2));
    state.start().unwrap();
    state.mark_in_flight(1);
    let done = ok_outcome(&state, 0, OutcomeKind::Succeeded);
    state.apply_outcome(&done);
    state.cancel().unwrap();
    assert_eq!(state.status, SessionStatus::Stopped);
    assert_eq!(state.items[1].status, ItemStatus::Pending);
    assert_eq!(state.terminal_records().len(), 1);
}

#[test]
fn checkpoint_resumability() {
    let mut state = SessionState::new("s1", items(2));
    state.start().unwrap();
    state.pause().unwrap();
    let checkpoint = Checkpoint::new(state.clone(), Utc::now());
    assert!(checkpoint.is_compatible());
    assert!(is_resumable(&checkpoint));

    let mut wrong_version = checkpoint.clone();
    wrong_version.version += 1;
    assert!(!is_resumable(&wrong_version));

    let mut wrong_format = checkpoint.clone();
    wrong_format.format = "something-else".to_string();
    assert!(!is_resumable(&wrong_format));

    let mut inconsistent = checkpoint.clone();
    inconsistent.state.items[0].status = ItemStatus::Succeeded;
    assert!(!is_resumable(&inconsistent));

    let mut finished = checkpoint;
    finished.state.status = SessionStatus::Stopped;
    assert!(!is_resumable(&finished));
}

#[test]
fn recover_turns_running_snapshot_into_paused() {
    let mut state = SessionState::new("s1", items(2));
    state.start().unwrap();
    state.mark_in_flight(0);
    state.recover();
    assert_eq!(state.status, SessionStatus::Paused);
    assert_eq!(state.items[0].status, ItemStatus::Pending);
    assert_eq!(state.resume().unwrap().len(), 2);
}
