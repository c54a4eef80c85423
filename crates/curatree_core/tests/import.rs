use curatree_core::db::{open_db, open_db_in_memory};
use curatree_core::{
    ChildQuery, ImportRow, NodeId, ObjectRecord, SqliteTreeRepository, TreeEvent, TreeObserver,
    TreeService, TreeServiceError,
};
use rusqlite::Connection;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Default)]
struct Recorder(Rc<RefCell<Vec<TreeEvent>>>);

impl TreeObserver for Recorder {
    fn on_event(&self, event: &TreeEvent) {
        self.0.borrow_mut().push(event.clone());
    }
}

fn row(orig_node_id: i64, orig_parent_id: i64, object_ids: &[&str]) -> ImportRow {
    ImportRow {
        orig_node_id,
        orig_parent_id,
        object_ids: object_ids.iter().map(|id| id.to_string()).collect(),
    }
}

fn add_objects(service: &TreeService<SqliteTreeRepository<'_>>, ids: &[&str]) {
    let records = ids
        .iter()
        .enumerate()
        .map(|(i, id)| ObjectRecord::new(*id, vec![1.0, i as f32]))
        .collect::<Vec<_>>();
    service.add_objects(&records).unwrap();
}

fn orig_id_of(service: &TreeService<SqliteTreeRepository<'_>>, node_id: NodeId) -> i64 {
    service.get_node(node_id, 0).unwrap().orig_id.unwrap()
}

fn child_orig_ids(service: &TreeService<SqliteTreeRepository<'_>>, node_id: NodeId) -> Vec<i64> {
    service
        .get_children(node_id, 0, &ChildQuery::default())
        .unwrap()
        .into_iter()
        .filter_map(|node| node.orig_id)
        .collect()
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

#[test]
fn rows_in_any_order_build_the_hierarchy() {
    let conn = open_db_in_memory().unwrap();
    let recorder = Recorder::default();
    let service = TreeService::new(SqliteTreeRepository::try_new(&conn).unwrap())
        .with_observer(recorder.clone());
    add_objects(&service, &["o0", "o1", "o3a", "o3b"]);

    let rows = vec![
        row(3, 1, &["o3a", "o3b"]),
        row(1, 0, &["o1"]),
        row(2, 0, &[]),
        row(0, -1, &["o0"]),
    ];
    let project_id = service.import_project("imported", 0, rows).unwrap();

    let root = service.get_root_id(project_id).unwrap();
    assert_eq!(orig_id_of(&service, root), 0);
    assert_eq!(service.get_n_objects(root).unwrap(), 1);
    assert_eq!(child_orig_ids(&service, root).len(), 2);

    let project = service.get_project(project_id).unwrap();
    assert_eq!(project.name, "imported");
    assert_eq!(project.root_node_id, root);

    let root_node = service.get_node(root, 4).unwrap();
    assert_eq!(root_node.recursive_object_count(), Some(4));

    let events = recorder.0.borrow().clone();
    let progress = events
        .iter()
        .filter_map(|event| match event {
            TreeEvent::ImportProgress {
                nodes_created,
                nodes_total,
                objects_attached,
                ..
            } => Some((*nodes_created, *nodes_total, *objects_attached)),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(progress.len(), 3);
    assert_eq!(progress.last(), Some(&(3, 3, 4)));
}

#[test]
fn nested_rows_keep_their_parents() {
    let conn = open_db_in_memory().unwrap();
    let service = TreeService::new(SqliteTreeRepository::try_new(&conn).unwrap());

    let rows = vec![
        row(30, 20, &[]),
        row(20, 10, &[]),
        row(10, 1, &[]),
        row(11, 1, &[]),
    ];
    let project_id = service.import_project("deep", 1, rows).unwrap();
    let root = service.get_root_id(project_id).unwrap();

    assert_eq!(child_orig_ids(&service, root), vec![10, 11]);
    let deepest = service
        .get_children(root, 0, &ChildQuery::default())
        .unwrap()
        .into_iter()
        .find(|node| node.orig_id == Some(10))
        .unwrap();
    let twenty = service
        .get_children(deepest.node_id, 0, &ChildQuery::default())
        .unwrap();
    assert_eq!(twenty.len(), 1);
    assert_eq!(twenty[0].orig_id, Some(20));
    assert_eq!(child_orig_ids(&service, twenty[0].node_id), vec![30]);
}

#[test]
fn unreachable_parent_rolls_back_whole_import() {
    let conn = open_db_in_memory().unwrap();
    let service = TreeService::new(SqliteTreeRepository::try_new(&conn).unwrap());
    add_objects(&service, &["a"]);

    let rows = vec![row(1, 0, &["a"]), row(5, 77, &[]), row(6, 5, &[])];
    let err = service.import_project("broken", 0, rows).unwrap_err();

    assert!(matches!(
        err,
        TreeServiceError::NodeCreationFailed {
            orig_parent_id: 5,
            ..
        }
    ));
    assert_eq!(count(&conn, "projects"), 0);
    assert_eq!(count(&conn, "nodes"), 0);
    assert_eq!(count(&conn, "nodes_objects"), 0);
}

#[test]
fn imported_file_database_survives_reopen_and_simplify() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("curatree.db");

    let project_id = {
        let conn = open_db(&path).unwrap();
        let service = TreeService::new(SqliteTreeRepository::try_new(&conn).unwrap());
        add_objects(&service, &["x", "y1", "y2"]);
        let rows = vec![
            row(1, 0, &["x"]),
            row(2, 1, &[]),
            row(3, 2, &["y1"]),
            row(4, 2, &["y2"]),
        ];
        service.import_project("chain", 0, rows).unwrap()
    };

    let conn = open_db(&path).unwrap();
    let service = TreeService::new(SqliteTreeRepository::try_new(&conn).unwrap());
    let root = service.get_root_id(project_id).unwrap();

    assert_eq!(service.prune_chains(root).unwrap(), 2);
    assert_eq!(child_orig_ids(&service, root), vec![3, 4]);
    assert_eq!(service.get_n_objects(root).unwrap(), 1);
    assert_eq!(
        service.get_node(root, 2).unwrap().recursive_object_count(),
        Some(3)
    );
}
