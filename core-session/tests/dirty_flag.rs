mod common;

use std::time::Duration;

use common::{drain, eventually, payload, settle, Harness};
use core_runtime::config::DirtyWritePolicy;
use core_runtime::events::{CoreEvent, SessionEvent};
use core_session::FolderId;
use serde_json::json;

fn loaded_harness() -> Harness {
    let h = Harness::new();
    h.sync.seed("UserId", json!("U1"));
    h.remote.insert(payload("U1", &["F1", "F2"]));
    h
}

#[tokio::test]
async fn test_local_mutation_marks_dirty_and_mirrors_once() {
    let h = loaded_harness();
    let session = h.started().await;
    let entity = session.entity();
    assert!(!entity.is_dirty());

    entity
        .folders_mut()
        .await
        .unwrap()
        .rename_folder(&FolderId::from("F1"), "Inbox")
        .unwrap();

    eventually(|| h.sync.writes_to("dirty").len() == 2).await;
    assert!(entity.is_dirty());
    assert_eq!(h.sync.writes_to("dirty"), vec![json!(false), json!(true)]);

    // Already dirty: further mutations are not transitions
    {
        let mut folders = entity.folders_mut().await.unwrap();
        folders.add_folder("Later");
        folders.remove_folder(&FolderId::from("F2")).unwrap();
    }
    settle().await;
    assert_eq!(h.sync.writes_to("dirty"), vec![json!(false), json!(true)]);
}

#[tokio::test]
async fn test_one_write_per_transition_edge() {
    let h = loaded_harness();
    let session = h.started().await;
    let entity = session.entity();

    entity.folders_mut().await.unwrap().add_folder("A");
    eventually(|| h.sync.writes_to("dirty").len() == 2).await;

    assert!(entity.set_dirty(false));
    eventually(|| h.sync.writes_to("dirty").len() == 3).await;

    entity.folders_mut().await.unwrap().add_folder("B");
    eventually(|| h.sync.writes_to("dirty").len() == 4).await;

    settle().await;
    assert_eq!(
        h.sync.writes_to("dirty"),
        vec![json!(false), json!(true), json!(false), json!(true)]
    );
    assert_eq!(h.sync.value("dirty"), Some(json!(true)));
}

#[tokio::test]
async fn test_cross_device_update_is_applied_without_echo() {
    let h = loaded_harness();
    let session = h.started().await;
    let mut events = session.subscribe_events();
    let entity = session.entity();

    h.sync.inject_cross_device("dirty", json!(true));
    eventually(|| entity.is_dirty()).await;
    settle().await;

    assert_eq!(h.sync.writes_to("dirty"), vec![json!(false)]);
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, CoreEvent::Session(SessionEvent::DirtyChanged { .. }))));

    // A local mutation while already dirty does not write either
    entity.folders_mut().await.unwrap().add_folder("C");
    settle().await;
    assert_eq!(h.sync.writes_to("dirty"), vec![json!(false)]);

    h.sync.inject_cross_device("dirty", json!(false));
    eventually(|| !entity.is_dirty()).await;
    settle().await;
    assert_eq!(h.sync.writes_to("dirty"), vec![json!(false)]);
}

#[tokio::test]
async fn test_unrelated_cross_device_keys_are_ignored() {
    let h = loaded_harness();
    let session = h.started().await;

    h.sync.inject_cross_device("UserId", json!("U7"));
    h.sync.inject_cross_device("theme", json!(true));
    settle().await;

    assert!(!session.entity().is_dirty());
    assert_eq!(session.entity().id().unwrap().as_str(), "U1");
}

#[tokio::test]
async fn test_activation_does_not_mark_dirty() {
    let h = loaded_harness();
    let session = h.started().await;

    assert!(session
        .entity()
        .folders_mut()
        .await
        .unwrap()
        .activate_folder(&FolderId::from("F2"))
        .unwrap());
    settle().await;

    assert!(!session.entity().is_dirty());
    assert_eq!(h.sync.writes_to("dirty"), vec![json!(false)]);
}

#[tokio::test(start_paused = true)]
async fn test_coalesce_writes_latest_value_once_per_window() {
    let h = loaded_harness();
    let window = Duration::from_secs(1);
    let session = h.session_with(DirtyWritePolicy::Coalesce { window }).await;
    session.start().await.unwrap();
    let entity = session.entity();

    entity.folders_mut().await.unwrap().add_folder("A");
    eventually(|| entity.is_dirty()).await;
    entity.set_dirty(false);
    entity.folders_mut().await.unwrap().add_folder("B");
    settle().await;

    // Still inside the window
    assert_eq!(h.sync.writes_to("dirty"), vec![json!(false)]);

    tokio::time::sleep(window).await;
    eventually(|| h.sync.writes_to("dirty").len() == 2).await;
    assert_eq!(h.sync.writes_to("dirty"), vec![json!(false), json!(true)]);
}

#[tokio::test(start_paused = true)]
async fn test_coalesce_skips_value_already_mirrored() {
    let h = loaded_harness();
    let window = Duration::from_secs(1);
    let session = h.session_with(DirtyWritePolicy::Coalesce { window }).await;
    session.start().await.unwrap();
    let entity = session.entity();

    entity.folders_mut().await.unwrap().add_folder("A");
    eventually(|| entity.is_dirty()).await;
    entity.set_dirty(false);

    tokio::time::sleep(window * 2).await;
    settle().await;

    assert_eq!(h.sync.writes_to("dirty"), vec![json!(false)]);
}

#[tokio::test]
async fn test_shutdown_stops_listeners() {
    let h = loaded_harness();
    let session = h.started().await;
    session.shutdown().await;

    h.sync.inject_cross_device("dirty", json!(true));
    session.entity().folders_mut().await.unwrap().add_folder("A");
    settle().await;

    assert!(!session.entity().is_dirty());
    assert_eq!(h.sync.writes_to("dirty"), vec![json!(false)]);
}
