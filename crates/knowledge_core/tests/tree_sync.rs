use futures::executor::block_on;
use knowledge_core::db::open_db_in_memory;
use knowledge_core::{
    FieldValue, Fields, RecordId, RecordSource, RecordStore, SqliteRecordStore, StoreError,
    SyncConfig, SyncError, Table, TreeSync,
};
use std::time::{Duration, Instant};

fn titled(title: &str, order: i64) -> Fields {
    Fields::from([
        ("Title".to_string(), FieldValue::Text(title.to_string())),
        ("Order".to_string(), FieldValue::Integer(order)),
    ])
}

fn with_link(mut fields: Fields, name: &str, target: &RecordId) -> Fields {
    fields.insert(name.to_string(), FieldValue::single_link(Some(target)));
    fields
}

#[test]
fn partial_plan_write_reports_both_sides_and_rebuild_converges() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let a = block_on(store.create_record(Table::Organizers, titled("A", 0))).unwrap();
    let b = block_on(store.create_record(Table::Organizers, titled("B", 1))).unwrap();
    let page1 = block_on(store.create_record(
        Table::Pages,
        with_link(titled("Page1", 0), "Organizer", &a),
    ))
    .unwrap();
    let page2 = block_on(store.create_record(
        Table::Pages,
        with_link(titled("Page2", 1), "Organizer", &a),
    ))
    .unwrap();
    let sync = TreeSync::new(&store, SyncConfig::default());
    sync.hydrate().unwrap();

    let plan = sync.plan(&page2, Some(&b), 0).unwrap();
    assert_eq!(plan.len(), 2);
    block_on(store.delete_record(Table::Pages, &page1)).unwrap();

    let err = block_on(sync.apply_plan(&plan)).unwrap_err();
    let SyncError::PartialWrite(partial) = err else {
        panic!("expected a partial write");
    };
    assert_eq!(partial.succeeded.len(), 1);
    assert_eq!(partial.succeeded[0].node_id, page2);
    assert_eq!(partial.failed.len(), 1);
    assert_eq!(partial.failed[0].entry.node_id, page1);
    assert!(matches!(
        partial.failed[0].error,
        StoreError::RecordNotFound { .. }
    ));
    assert!(sync.rebuild_pending());

    let later = Instant::now() + Duration::from_secs(1);
    assert!(sync.poll(later).unwrap());
    let forest = sync.forest();
    assert!(!forest.contains(&page1));
    assert_eq!(forest.node(&page2).unwrap().order, 0);
    assert_eq!(forest.parent_of(&page2), Some(&b));
    assert!(forest.children(Some(&a)).unwrap().is_empty());
}

#[test]
fn change_notifications_rebuild_only_after_quiet_window() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let sync = TreeSync::new(
        &store,
        SyncConfig {
            rebuild_debounce_ms: 300,
            write_debounce_ms: 500,
        },
    );
    sync.hydrate().unwrap();
    let rebuilds = sync.rebuild_count();

    let start = Instant::now();
    block_on(store.create_record(Table::Organizers, titled("A", 0))).unwrap();
    block_on(store.create_record(Table::Pages, titled("P", 0))).unwrap();
    assert!(sync.rebuild_pending());

    assert!(!sync.poll(start).unwrap());
    assert!(sync.forest().is_empty());

    assert!(sync.poll(start + Duration::from_millis(1000)).unwrap());
    assert_eq!(sync.rebuild_count(), rebuilds + 1);
    assert_eq!(sync.forest().len(), 2);
    assert!(!sync.rebuild_pending());
    assert!(!sync.poll(start + Duration::from_millis(2000)).unwrap());
}

#[test]
fn queued_edits_are_written_once_after_their_window() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let page = block_on(store.create_record(Table::Pages, titled("Draft", 0))).unwrap();
    let sync = TreeSync::new(&store, SyncConfig::default());
    sync.hydrate().unwrap();

    let start = Instant::now();
    sync.queue_edit(Table::Pages, page.clone(), titled("Second", 0), start);
    sync.queue_edit(
        Table::Pages,
        page.clone(),
        Fields::from([(
            "Content".to_string(),
            FieldValue::Text("<p>body</p>".to_string()),
        )]),
        start + Duration::from_millis(200),
    );

    let early = block_on(sync.flush_due_edits(start + Duration::from_millis(600)));
    assert!(early.written.is_empty());

    let flushed = block_on(sync.flush_due_edits(start + Duration::from_millis(700)));
    assert_eq!(flushed.written, vec![page.clone()]);
    assert!(!sync.has_queued_edits());

    let stored = store
        .list_records(RecordSource::Table(Table::Pages))
        .unwrap()
        .remove(0);
    assert_eq!(stored.text("Title"), Some("Second"));
    assert_eq!(stored.text("Content"), Some("<p>body</p>"));
}

#[test]
fn edits_to_a_deleted_record_fail_without_blocking_others() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let kept = block_on(store.create_record(Table::Pages, titled("Kept", 0))).unwrap();
    let gone = block_on(store.create_record(Table::Pages, titled("Gone", 1))).unwrap();
    let sync = TreeSync::new(&store, SyncConfig::default());

    let now = Instant::now();
    sync.queue_edit(Table::Pages, kept.clone(), titled("Kept!", 0), now);
    sync.queue_edit(Table::Pages, gone.clone(), titled("Gone!", 1), now);
    block_on(store.delete_record(Table::Pages, &gone)).unwrap();

    let flushed = block_on(sync.flush_all_edits());

    assert_eq!(flushed.written, vec![kept]);
    assert_eq!(flushed.failed.len(), 1);
    assert_eq!(flushed.failed[0].0, gone);
}

#[test]
fn dropping_the_sync_removes_its_subscriptions() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();

    let sync = TreeSync::new(&store, SyncConfig::default());
    assert_eq!(store.subscription_count(), 2);
    drop(sync);

    assert_eq!(store.subscription_count(), 0);
    block_on(store.create_record(Table::Pages, titled("after drop", 0))).unwrap();
}
