//! Persistence through the controller: save failure and retry, file
//! round-trips, legacy documents, and corrupt storage.

mod common;

use common::{Harness, recording_renderers};
use gridboard_layout::{ContentDescriptor, GridSurface, WidgetGeometry, WidgetId};
use gridboard_runtime::{
    ControllerConfig, DEFAULT_STORAGE_KEY, FileStorage, FlushOutcome, MemoryStorage,
    PersistenceStatus, ReconciliationController, RestoreOutcome,
};
use pretty_assertions::assert_eq;

fn file_controller(
    storage: FileStorage,
) -> ReconciliationController<GridSurface, FileStorage> {
    let log = common::Log::default();
    ReconciliationController::with_grid_surface(
        ControllerConfig::default(),
        recording_renderers(&log),
        storage,
    )
    .unwrap()
}

// ---- Failure and retry ----

#[test]
fn failed_save_is_retried_at_next_settle() {
    let storage = MemoryStorage::new();
    storage.fail_next(1);
    let mut h = Harness::with_storage(ControllerConfig::default(), storage);

    h.add("Sales");
    h.controller.pump();
    let outcome = h.controller.flush_persistence();
    assert!(matches!(outcome, FlushOutcome::Failed { attempts: 1, .. }));
    assert_eq!(
        h.controller.persistence_status(),
        PersistenceStatus::Failed { attempts: 1 }
    );
    assert_eq!(h.controller.stats().save_failures, 1);
    assert!(h.controller.persistence().last_error().is_some());
    // The failed snapshot is not retried on its own.
    assert!(matches!(
        h.controller.flush_persistence(),
        FlushOutcome::NothingPending
    ));

    h.add("Expenses");
    h.controller.pump();
    assert!(matches!(
        h.controller.flush_persistence(),
        FlushOutcome::Saved { widgets: 2 }
    ));
    assert_eq!(h.controller.persistence_status(), PersistenceStatus::Saved);
    assert!(h.controller.persistence().last_error().is_none());
    assert_eq!(h.storage.save_count(), 1);
}

#[test]
fn consecutive_failures_are_counted() {
    let storage = MemoryStorage::new();
    storage.fail_next(2);
    let mut h = Harness::with_storage(ControllerConfig::default(), storage);

    let id = h.add("Sales");
    h.controller.pump();
    h.controller.flush_persistence();
    h.controller.rename_widget(&id, "Revenue");
    h.controller.pump();
    let outcome = h.controller.flush_persistence();
    assert!(matches!(outcome, FlushOutcome::Failed { attempts: 2, .. }));
    assert_eq!(h.controller.persistence().failures(), 2);
}

#[test]
fn settles_coalesce_to_latest_snapshot() {
    let mut h = Harness::new();
    let id = h.add("Sales");
    h.controller.pump();
    h.controller.rename_widget(&id, "Revenue");
    h.controller.pump();
    h.controller.flush_persistence();

    assert_eq!(h.storage.save_count(), 1);
    assert_eq!(h.storage.latest().unwrap()[0].title, "Revenue");
    assert_eq!(h.controller.persistence().coalesced(), 1);
}

#[test]
fn rename_is_persisted() {
    let mut h = Harness::new();
    let id = h.add("Sales");
    h.settle_and_reset_logs();
    h.controller.rename_widget(&id, "Revenue");
    h.controller.pump();
    h.controller.flush_persistence();
    assert_eq!(h.storage.latest().unwrap()[0].title, "Revenue");
}

// ---- File storage ----

#[test]
fn file_storage_round_trips_through_restore() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::in_dir(dir.path(), DEFAULT_STORAGE_KEY);
    assert!(
        storage
            .path()
            .ends_with("gridstack-echarts-dashboard-v1.json")
    );

    let mut first = file_controller(storage.clone());
    first.add_widget("Sales", ContentDescriptor::chart("line"));
    first.add_widget_at(
        "Traffic",
        ContentDescriptor::chart("bar"),
        WidgetGeometry::new(0, 3, 12, 2),
    );
    assert!(matches!(
        first.save_layout(),
        FlushOutcome::Saved { widgets: 2 }
    ));
    let saved = first.snapshot();

    let mut second = file_controller(storage);
    let outcome = second.restore_from_storage().unwrap();
    assert_eq!(
        outcome,
        RestoreOutcome::Restored {
            widgets: 2,
            notes: Vec::new()
        }
    );
    second.pump();
    assert_eq!(second.snapshot(), saved);
    assert_eq!(second.mounts().len(), 2);
}

#[test]
fn file_storage_uses_configured_key() {
    let dir = tempfile::tempdir().unwrap();
    let config = ControllerConfig {
        storage_key: "ops-dashboard".into(),
        ..ControllerConfig::default()
    };
    let storage = FileStorage::from_config(dir.path(), &config);
    assert_eq!(storage.path(), dir.path().join("ops-dashboard.json"));

    let log = common::Log::default();
    let mut controller =
        ReconciliationController::with_grid_surface(config, recording_renderers(&log), storage)
            .unwrap();
    controller.add_widget("Sales", ContentDescriptor::chart("line"));
    assert!(matches!(
        controller.save_layout(),
        FlushOutcome::Saved { widgets: 1 }
    ));
    assert!(dir.path().join("ops-dashboard.json").exists());
}

#[test]
fn missing_file_restores_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let mut controller = file_controller(FileStorage::in_dir(dir.path(), "absent"));
    assert_eq!(
        controller.restore_from_storage().unwrap(),
        RestoreOutcome::Defaults
    );
    controller.pump();
    let titles: Vec<String> = controller
        .snapshot()
        .into_iter()
        .map(|record| record.title)
        .collect();
    assert_eq!(titles, vec!["Sales", "Expenses", "Traffic"]);
}

#[test]
fn unwritable_path_reports_io_failure() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path().join("missing-dir").join("layout.json"));
    let mut controller = file_controller(storage);
    controller.add_widget("Sales", ContentDescriptor::chart("line"));
    let outcome = controller.save_layout();
    assert!(matches!(outcome, FlushOutcome::Failed { attempts: 1, .. }));
}

// ---- Legacy and corrupt documents ----

#[test]
fn legacy_array_document_is_migrated_on_restore() {
    let legacy = r#"[
        {"id": "w1", "title": "Sales", "x": 0, "y": 0, "w": 4, "h": 3},
        {"id": "w2", "title": "Expenses"}
    ]"#;
    let mut h = Harness::with_storage(
        ControllerConfig::default(),
        MemoryStorage::with_document(legacy),
    );
    let outcome = h.controller.restore_from_storage().unwrap();
    assert!(matches!(outcome, RestoreOutcome::Restored { widgets: 2, .. }));
    h.controller.pump();

    let registry = h.controller.registry();
    assert_eq!(
        registry.get(&WidgetId::from("w1")).unwrap().geometry,
        WidgetGeometry::new(0, 0, 4, 3)
    );
    assert_eq!(
        registry.get(&WidgetId::from("w2")).unwrap().geometry,
        WidgetGeometry::new(4, 0, 4, 3)
    );
    assert_eq!(
        registry.get(&WidgetId::from("w2")).unwrap().content,
        ContentDescriptor::chart("line")
    );

    // The next save writes the current schema.
    h.controller.flush_persistence();
    let document = h.storage.document().unwrap();
    let value: serde_json::Value = serde_json::from_str(&document).unwrap();
    assert_eq!(value["schema_version"], 1);
}

#[test]
fn corrupt_document_falls_back_to_defaults() {
    let mut h = Harness::with_storage(
        ControllerConfig::default(),
        MemoryStorage::with_document("{ not json"),
    );
    assert_eq!(
        h.controller.restore_from_storage().unwrap(),
        RestoreOutcome::CorruptFallback
    );
    h.controller.pump();
    assert_eq!(h.controller.registry().len(), 3);
    assert_eq!(h.controller.mounts().len(), 3);
}

#[test]
fn future_schema_is_treated_as_unreadable() {
    let mut h = Harness::with_storage(
        ControllerConfig::default(),
        MemoryStorage::with_document(r#"{"schema_version": 99, "widgets": []}"#),
    );
    assert_eq!(
        h.controller.restore_from_storage().unwrap(),
        RestoreOutcome::CorruptFallback
    );
}

#[test]
fn restore_repairs_bad_geometry() {
    let document = r#"{
        "schema_version": 1,
        "widgets": [
            {"id": "w1", "title": "Wide", "geometry": {"x": 10, "y": 0, "w": 20, "h": 3}},
            {"id": "w1", "title": "Twin", "geometry": {"x": 0, "y": 3, "w": 4, "h": 3}}
        ]
    }"#;
    let mut h = Harness::with_storage(
        ControllerConfig::default(),
        MemoryStorage::with_document(document),
    );
    let RestoreOutcome::Restored { widgets, notes } = h.controller.restore_from_storage().unwrap()
    else {
        panic!("expected a restored layout");
    };
    assert_eq!(widgets, 2);
    assert_eq!(notes.len(), 2);
    h.controller.pump();
    assert_eq!(h.controller.registry().len(), 1);
    assert_eq!(
        h.controller
            .registry()
            .get(&WidgetId::from("w1"))
            .unwrap()
            .geometry,
        WidgetGeometry::new(0, 0, 12, 3)
    );
}
