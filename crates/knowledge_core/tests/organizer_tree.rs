use futures::executor::block_on;
use knowledge_core::db::open_db_in_memory;
use knowledge_core::{
    plan_move, FieldValue, Fields, Forest, MoveError, RecordId, RecordSource, RecordStore,
    SqliteRecordStore, SyncConfig, Table, TreeSync,
};

fn organizer(
    store: &SqliteRecordStore<'_>,
    title: &str,
    order: i64,
    parent: Option<&RecordId>,
) -> RecordId {
    let mut fields = Fields::new();
    fields.insert("Title".to_string(), FieldValue::Text(title.to_string()));
    fields.insert("Order".to_string(), FieldValue::Integer(order));
    fields.insert(
        "Is Top-level".to_string(),
        FieldValue::Bool(parent.is_none()),
    );
    if parent.is_some() {
        fields.insert(
            "Parent Organizer".to_string(),
            FieldValue::single_link(parent),
        );
    }
    block_on(store.create_record(Table::Organizers, fields)).unwrap()
}

fn page(
    store: &SqliteRecordStore<'_>,
    title: &str,
    order: i64,
    parent: Option<&RecordId>,
) -> RecordId {
    let mut fields = Fields::new();
    fields.insert("Title".to_string(), FieldValue::Text(title.to_string()));
    fields.insert("Order".to_string(), FieldValue::Integer(order));
    if parent.is_some() {
        fields.insert("Organizer".to_string(), FieldValue::single_link(parent));
    }
    block_on(store.create_record(Table::Pages, fields)).unwrap()
}

fn child_ids(forest: &Forest, parent: Option<&RecordId>) -> Vec<RecordId> {
    forest.children(parent).unwrap().to_vec()
}

fn assert_all_groups_dense(forest: &Forest) {
    let mut parents: Vec<Option<RecordId>> = vec![None];
    parents.extend(
        forest
            .outline()
            .into_iter()
            .filter(|entry| forest.node(&entry.id).unwrap().is_organizer())
            .map(|entry| Some(entry.id)),
    );
    for parent in parents {
        let orders: Vec<i64> = forest
            .children(parent.as_ref())
            .unwrap()
            .iter()
            .map(|id| forest.node(id).unwrap().order)
            .collect();
        let expected: Vec<i64> = (0..orders.len() as i64).collect();
        assert_eq!(orders, expected, "group under {parent:?} is not dense");
    }
}

#[test]
fn moving_a_page_into_an_empty_organizer() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let a = organizer(&store, "A", 0, None);
    let b = organizer(&store, "B", 1, None);
    let page1 = page(&store, "Page1", 0, Some(&a));
    let page2 = page(&store, "Page2", 1, Some(&a));
    let sync = TreeSync::new(&store, SyncConfig::default());
    sync.hydrate().unwrap();

    let plan = sync.plan(&page2, Some(&b), 0).unwrap();
    let summary: Vec<(RecordId, i64, Option<Option<RecordId>>)> = plan
        .entries
        .iter()
        .map(|entry| {
            (
                entry.node_id.clone(),
                entry.order,
                entry.parent.as_ref().map(|change| change.parent.clone()),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            (page2.clone(), 0, Some(Some(b.clone()))),
            (page1.clone(), 0, None),
        ]
    );

    block_on(sync.apply_plan(&plan)).unwrap();
    let forest = sync.hydrate().unwrap();

    assert_eq!(child_ids(&forest, Some(&b)), vec![page2.clone()]);
    assert_eq!(child_ids(&forest, Some(&a)), vec![page1]);
    assert_eq!(forest.parent_of(&page2), Some(&b));
}

#[test]
fn moving_to_current_position_changes_nothing() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let a = organizer(&store, "A", 0, None);
    page(&store, "Page1", 0, Some(&a));
    let page2 = page(&store, "Page2", 1, Some(&a));
    let sync = TreeSync::new(&store, SyncConfig::default());
    let before = sync.hydrate().unwrap();

    let plan = sync.plan(&page2, Some(&a), 1).unwrap();

    assert!(plan.is_empty());
    block_on(sync.apply_plan(&plan)).unwrap();
    assert_eq!(*sync.hydrate().unwrap(), *before);
}

#[test]
fn organizer_cannot_move_under_itself_or_descendants() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let root = organizer(&store, "Root", 0, None);
    let mid = organizer(&store, "Mid", 0, Some(&root));
    let leaf = organizer(&store, "Leaf", 0, Some(&mid));
    let sync = TreeSync::new(&store, SyncConfig::default());
    let forest = sync.hydrate().unwrap();

    for target in [&root, &mid, &leaf] {
        let err = plan_move(&forest, &root, Some(target), 0).unwrap_err();
        assert!(matches!(err, MoveError::InvalidMove { .. }), "target {target}");
    }
    assert!(matches!(
        plan_move(&forest, &mid, Some(&leaf), 0),
        Err(MoveError::InvalidMove { .. })
    ));
}

#[test]
fn rebuilding_unchanged_records_is_deterministic() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let a = organizer(&store, "A", 0, None);
    organizer(&store, "B", 0, None);
    organizer(&store, "A.1", 3, Some(&a));
    page(&store, "loose", 0, None);
    page(&store, "p", 3, Some(&a));

    let organizers = store
        .list_records(RecordSource::Table(Table::Organizers))
        .unwrap();
    let pages = store.list_records(RecordSource::Table(Table::Pages)).unwrap();
    let first = Forest::build(&organizers, &pages);
    let second = Forest::build(&organizers, &pages);

    assert_eq!(first, second);
    assert_eq!(first.outline(), second.outline());
    // Equal orders keep input sequence: organizers before pages.
    let roots: Vec<String> = first
        .roots()
        .iter()
        .map(|id| first.node(id).unwrap().title.clone())
        .collect();
    assert_eq!(roots, vec!["A", "B", "loose"]);
}

#[test]
fn sibling_groups_stay_dense_across_many_moves() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let a = organizer(&store, "A", 0, None);
    let b = organizer(&store, "B", 1, None);
    let c = organizer(&store, "C", 0, Some(&a));
    let mut nodes = vec![a.clone(), b.clone(), c.clone()];
    // C already holds order 0 under A.
    for (index, (parent, order)) in [(&a, 1), (&a, 2), (&b, 0), (&c, 0), (&c, 1)]
        .into_iter()
        .enumerate()
    {
        nodes.push(page(&store, &format!("P{index}"), order, Some(parent)));
    }
    let sync = TreeSync::new(&store, SyncConfig::default());
    assert_all_groups_dense(&sync.hydrate().unwrap());

    let parents = [None, Some(a.clone()), Some(b.clone()), Some(c.clone())];
    let mut seed: u64 = 0x5eed;
    let mut applied = 0;
    for _ in 0..60 {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let moved = &nodes[(seed >> 33) as usize % nodes.len()];
        let target = &parents[(seed >> 17) as usize % parents.len()];
        let index = (seed >> 7) as usize % 5;

        match sync.plan(moved, target.as_ref(), index) {
            Ok(plan) => {
                block_on(sync.apply_plan(&plan)).unwrap();
                let forest = sync.hydrate().unwrap();
                assert_all_groups_dense(&forest);
                assert_eq!(forest.len(), nodes.len());
                applied += 1;
            }
            Err(MoveError::InvalidMove { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(applied > 0);
}
