use curatree_core::db::open_db_in_memory;
use curatree_core::{
    parse_node_id, ChildOrder, ChildQuery, NewNode, ObjectRecord, SortDirection,
    SqliteTreeRepository, StarFilter, TreeConfig, TreeErrorKind, TreeService, TreeServiceError,
};
use rusqlite::Connection;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn service(conn: &Connection) -> TreeService<SqliteTreeRepository<'_>> {
    let repo = SqliteTreeRepository::try_new(conn).unwrap();
    TreeService::with_config(repo, TreeConfig::default().with_sample_seed(7)).unwrap()
}

fn add_objects<R: curatree_core::TreeRepository>(service: &TreeService<R>, ids: &[&str]) {
    let objects = ids
        .iter()
        .enumerate()
        .map(|(i, id)| ObjectRecord::new(*id, vec![i as f32, 1.0]))
        .collect::<Vec<_>>();
    service.add_objects(&objects).unwrap();
}

fn count_nodes(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM nodes;", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn project_with_root_is_listed() {
    let conn = setup();
    let service = service(&conn);

    let project_id = service.create_project("plankton").unwrap();
    assert!(service.get_projects().unwrap().is_empty());

    let root_id = service
        .create_node(NewNode::root(project_id).with_name("all"))
        .unwrap();

    assert_eq!(service.get_root_id(project_id).unwrap(), root_id);
    let project = service.get_project(project_id).unwrap();
    assert_eq!(project.name, "plankton");
    assert_eq!(project.root_node_id, root_id);
    assert_eq!(service.get_projects().unwrap(), vec![project]);
}

#[test]
fn rootless_project_has_no_root() {
    let conn = setup();
    let service = service(&conn);

    let project_id = service.create_project("empty").unwrap();
    let err = service.get_root_id(project_id).unwrap_err();
    assert!(matches!(err, TreeServiceError::NoRoot(id) if id == project_id));
    assert_eq!(err.kind(), TreeErrorKind::NotFound);
    assert!(matches!(
        service.get_project(project_id).unwrap_err(),
        TreeServiceError::ProjectNotFound(_)
    ));
}

#[test]
fn second_root_is_rejected() {
    let conn = setup();
    let service = service(&conn);

    let project_id = service.create_project("p").unwrap();
    let root_id = service.create_node(NewNode::root(project_id)).unwrap();

    let err = service.create_node(NewNode::root(project_id)).unwrap_err();
    assert!(matches!(
        err,
        TreeServiceError::DuplicateRoot { root_id: existing, .. } if existing == root_id
    ));
    assert_eq!(err.kind(), TreeErrorKind::StructuralViolation);
    assert_eq!(count_nodes(&conn), 1);
}

#[test]
fn node_in_unknown_project_is_rejected() {
    let conn = setup();
    let service = service(&conn);

    let err = service.create_node(NewNode::root(99)).unwrap_err();
    assert!(matches!(err, TreeServiceError::ProjectNotFound(99)));
}

#[test]
fn parent_resolved_by_orig_id() {
    let conn = setup();
    let service = service(&conn);

    let project_id = service.create_project("p").unwrap();
    let root_id = service
        .create_node(NewNode::root(project_id).with_orig_id(100))
        .unwrap();
    let child_id = service
        .create_node(NewNode::child_of_orig(project_id, 100).with_orig_id(101))
        .unwrap();

    let child = service.get_node(child_id, 0).unwrap();
    assert_eq!(child.parent_id, Some(root_id));
    assert_eq!(child.orig_id, Some(101));
}

#[test]
fn unresolvable_orig_parent_creates_nothing() {
    let conn = setup();
    let service = service(&conn);

    let project_id = service.create_project("p").unwrap();
    service
        .create_node(NewNode::root(project_id).with_orig_id(1))
        .unwrap();
    add_objects(&service, &["a"]);

    let err = service
        .create_node(
            NewNode::child_of_orig(project_id, 555)
                .with_orig_id(2)
                .with_objects(["a"]),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        TreeServiceError::NodeCreationFailed {
            orig_parent_id: 555,
            ..
        }
    ));
    assert_eq!(count_nodes(&conn), 1);
}

#[test]
fn explicit_parent_must_exist_in_same_project() {
    let conn = setup();
    let service = service(&conn);

    let first = service.create_project("first").unwrap();
    let first_root = service.create_node(NewNode::root(first)).unwrap();
    let second = service.create_project("second").unwrap();

    let err = service
        .create_node(NewNode::child_of(second, first_root))
        .unwrap_err();
    assert!(matches!(err, TreeServiceError::ParentNotFound(id) if id == first_root));

    let err = service
        .create_node(NewNode::child_of(first, 12345))
        .unwrap_err();
    assert_eq!(err.kind(), TreeErrorKind::StructuralViolation);
}

#[test]
fn path_ids_run_root_first() {
    let conn = setup();
    let service = service(&conn);

    let project_id = service.create_project("p").unwrap();
    let root = service.create_node(NewNode::root(project_id)).unwrap();
    let a = service
        .create_node(NewNode::child_of(project_id, root))
        .unwrap();
    let b = service.create_node(NewNode::child_of(project_id, a)).unwrap();

    assert_eq!(service.get_path_ids(b).unwrap(), vec![root, a, b]);
    assert_eq!(service.get_path_ids(root).unwrap(), vec![root]);
    assert!(matches!(
        service.get_path_ids(b + 100).unwrap_err(),
        TreeServiceError::NodeNotFound(_)
    ));
}

#[test]
fn children_are_filtered_and_ordered() {
    let conn = setup();
    let service = service(&conn);
    add_objects(&service, &["o1", "o2", "o3"]);

    let project_id = service.create_project("p").unwrap();
    let root = service.create_node(NewNode::root(project_id)).unwrap();
    let a = service
        .create_node(NewNode::child_of(project_id, root).with_name("beta"))
        .unwrap();
    let b = service
        .create_node(
            NewNode::child_of(project_id, root)
                .with_name("alpha")
                .starred(true)
                .with_objects(["o1", "o2"]),
        )
        .unwrap();
    let c = service
        .create_node(
            NewNode::child_of(project_id, root)
                .with_name("gamma")
                .with_objects(["o3"]),
        )
        .unwrap();
    service.create_node(NewNode::child_of(project_id, a)).unwrap();

    let ids = |query: ChildQuery| {
        service
            .get_children(root, 0, &query)
            .unwrap()
            .into_iter()
            .map(|node| node.node_id)
            .collect::<Vec<_>>()
    };

    assert_eq!(ids(ChildQuery::default()), vec![a, b, c]);
    assert_eq!(
        ids(ChildQuery::ordered(ChildOrder::Name, SortDirection::Asc)),
        vec![b, a, c]
    );
    assert_eq!(
        ids(ChildQuery::ordered(ChildOrder::ObjectCount, SortDirection::Desc)),
        vec![b, c, a]
    );
    assert_eq!(
        ids(ChildQuery::ordered(ChildOrder::ChildCount, SortDirection::Desc)),
        vec![a, b, c]
    );
    assert_eq!(ids(ChildQuery::default().only(StarFilter::Starred)), vec![b]);
    assert_eq!(
        ids(ChildQuery::default().only(StarFilter::Unstarred)),
        vec![a, c]
    );

    let children = service.get_children(root, 0, &ChildQuery::default()).unwrap();
    assert_eq!(children[0].n_children, 1);
    assert_eq!(children[1].n_children, 0);
}

#[test]
fn objects_are_paged_in_attachment_order() {
    let conn = setup();
    let repo = SqliteTreeRepository::try_new(&conn).unwrap();
    let config = TreeConfig {
        object_batch_size: 2,
        ..TreeConfig::default()
    };
    let service = TreeService::with_config(repo, config).unwrap();
    add_objects(&service, &["e", "d", "c", "b", "a", "z"]);

    let project_id = service.create_project("p").unwrap();
    let root = service
        .create_node(NewNode::root(project_id).with_objects(["z"]))
        .unwrap();
    let leaf = service
        .create_node(NewNode::child_of(project_id, root).with_objects(["e", "d", "c", "b", "a"]))
        .unwrap();

    assert_eq!(service.get_n_objects(leaf).unwrap(), 5);
    assert_eq!(service.get_n_objects(root).unwrap(), 1);

    let page = service
        .get_objects(leaf, Some(1), Some(2))
        .unwrap()
        .into_iter()
        .map(|object| object.object_id)
        .collect::<Vec<_>>();
    assert_eq!(page, vec!["d", "c"]);

    let tail = service.get_objects(leaf, Some(3), None).unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].vector, vec![3.0, 1.0]);
}

#[test]
fn unknown_node_reads_fail_with_not_found() {
    let conn = setup();
    let service = service(&conn);

    let err = service.get_node(7, 3).unwrap_err();
    assert!(matches!(err, TreeServiceError::NodeNotFound(7)));
    assert!(matches!(
        service.get_objects(7, None, None).unwrap_err(),
        TreeServiceError::NodeNotFound(7)
    ));
    assert!(matches!(
        service
            .get_children(7, 0, &ChildQuery::default())
            .unwrap_err(),
        TreeServiceError::NodeNotFound(7)
    ));
}

#[test]
fn textual_node_ids_must_be_integers() {
    let err: TreeServiceError = parse_node_id("abc").unwrap_err().into();
    assert_eq!(err.kind(), TreeErrorKind::InvalidArgument);
    assert_eq!(parse_node_id("17").unwrap(), 17);
}

#[test]
fn deleting_project_cascades_to_nodes_and_memberships() {
    let conn = setup();
    let service = service(&conn);
    add_objects(&service, &["a", "b"]);

    let project_id = service.create_project("p").unwrap();
    let root = service
        .create_node(NewNode::root(project_id).with_objects(["a"]))
        .unwrap();
    service
        .create_node(NewNode::child_of(project_id, root).with_objects(["b"]))
        .unwrap();

    service.delete_project(project_id).unwrap();

    assert_eq!(count_nodes(&conn), 0);
    let memberships: i64 = conn
        .query_row("SELECT COUNT(*) FROM nodes_objects;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(memberships, 0);
    let objects: i64 = conn
        .query_row("SELECT COUNT(*) FROM objects;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(objects, 2);
    assert!(matches!(
        service.delete_project(project_id).unwrap_err(),
        TreeServiceError::ProjectNotFound(_)
    ));
}
