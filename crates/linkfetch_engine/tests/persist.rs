use std::fs;

use std::time::Duration;

use linkfetch_core::{
    FetchResult, ItemStatus, Outcome, OutcomeKind, Payload, SessionState, SessionStatus, WorkItem,
};
use linkfetch_engine::{ensure_dir, AtomicFileWriter, CheckpointError, CheckpointStore};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[test]
fn creates_missing_directory() {
    let temp = TempDir::new().unwrap();
    let new_dir = temp.path().join("sessions");
    assert!(!new_dir.exists());
    ensure_dir(&new_dir).unwrap();
    assert!(new_dir.is_dir());
}

#[test]
fn atomic_write_replaces_existing_file() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());

    let first = writer.write("run.json", b"first").unwrap();
    assert_eq!(fs::read_to_string(&first).unwrap(), "first");

    let second = writer.write("run.json", b"second").unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&second).unwrap(), "second");
    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
}

#[test]
fn writing_below_a_file_fails_cleanly() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    let writer = AtomicFileWriter::new(file_path.clone());
    assert!(writer.write("run.json", b"data").is_err());
    assert!(!file_path.with_file_name("run.json").exists());
}

fn paused_state(id: &str) -> SessionState {
    let mut state = SessionState::new(
        id,
        vec![
            WorkItem::new("A", "https://shop.example/a"),
            WorkItem::new("B", "https://shop.example/b"),
        ],
    );
    state.start().unwrap();
    state.pause().unwrap();
    state
}

#[test]
fn checkpoint_save_then_load_restores_state() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path().join("sessions"));
    let state = paused_state("batch-7");

    let saved_at = store.save(&state).unwrap();
    let loaded = store.load("batch-7").unwrap();

    assert_eq!(loaded.saved_at, saved_at);
    assert_eq!(loaded.state.status, SessionStatus::Paused);
    assert_eq!(loaded.state.items, state.items);
    assert_eq!(loaded.state.last_checkpoint, Some(saved_at));
    assert_eq!(store.list().unwrap(), vec!["batch-7".to_string()]);
}

#[test]
fn missing_checkpoint_is_not_found() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path());
    assert!(matches!(store.load("nope"), Err(CheckpointError::NotFound(_))));
    assert!(!store.remove("nope").unwrap());
}

#[test]
fn foreign_file_is_rejected() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path());
    fs::write(
        store.path_for("other"),
        r#"(format: "someone-else", version: 1, payload: [])"#,
    )
    .unwrap();
    assert!(matches!(
        store.load("other"),
        Err(CheckpointError::Incompatible { .. })
    ));

    fs::write(store.path_for("garbage"), "{{{ not ron").unwrap();
    assert!(matches!(
        store.load("garbage"),
        Err(CheckpointError::Decode(_))
    ));
}

#[test]
fn checkpoint_size_stays_close_to_payload_size() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path());
    let body: Vec<u8> = (0..100 * 1024).map(|i| (i % 251) as u8).collect();

    let mut state = SessionState::new("large", vec![WorkItem::new("A", "https://shop.example/a")]);
    state.start().unwrap();
    state.apply_outcome(&Outcome {
        id: 0,
        item: WorkItem::new("A", "https://shop.example/a"),
        kind: OutcomeKind::Succeeded,
        result: FetchResult::ok(
            Payload::Data(body.clone()),
            Duration::from_millis(12),
            body.len() as u64,
            1,
        ),
    });
    state.pause().unwrap();
    store.save(&state).unwrap();

    let on_disk = fs::metadata(store.path_for("large")).unwrap().len();
    assert!(
        on_disk < body.len() as u64 * 3 / 2,
        "checkpoint is {on_disk} bytes for a {} byte payload",
        body.len()
    );

    let loaded = store.load("large").unwrap();
    let record = &loaded.state.items[0];
    assert_eq!(record.status, ItemStatus::Succeeded);
    assert_eq!(
        record.result.as_ref().and_then(|r| r.payload()),
        Some(&Payload::Data(body))
    );
}
