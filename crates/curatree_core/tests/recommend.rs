use curatree_core::db::open_db_in_memory;
use curatree_core::{
    NewNode, NodeId, ObjectRecord, ProjectId, SqliteTreeRepository, TreeErrorKind, TreeService,
    TreeServiceError,
};
use rusqlite::Connection;

type Service<'conn> = TreeService<SqliteTreeRepository<'conn>>;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn service(conn: &Connection) -> Service<'_> {
    TreeService::new(SqliteTreeRepository::try_new(conn).unwrap())
}

fn child(
    service: &Service<'_>,
    project_id: ProjectId,
    parent: NodeId,
    objects: &[(&str, [f32; 2])],
) -> NodeId {
    let records = objects
        .iter()
        .map(|(id, vector)| ObjectRecord::new(*id, vector.to_vec()))
        .collect::<Vec<_>>();
    service.add_objects(&records).unwrap();
    service
        .create_node(
            NewNode::child_of(project_id, parent).with_objects(objects.iter().map(|(id, _)| *id)),
        )
        .unwrap()
}

struct Fixture {
    query: NodeId,
    near: NodeId,
    far: NodeId,
    empty: NodeId,
    outer: NodeId,
}

/// root(r) -> P(p_far, p_near) -> { R2(r2) -> { Q, near, empty }, far }, root -> outer
fn build(service: &Service<'_>) -> Fixture {
    service
        .add_objects(&[ObjectRecord::new("r", vec![1.0, 0.0])])
        .unwrap();
    let project_id = service.create_project("p").unwrap();
    let root = service
        .create_node(NewNode::root(project_id).with_objects(["r"]))
        .unwrap();
    let outer = child(service, project_id, root, &[("outer", [1.0, 0.0])]);
    let p = child(
        service,
        project_id,
        root,
        &[("p_far", [-1.0, 0.0]), ("p_near", [1.0, 0.1])],
    );
    let r2 = child(service, project_id, p, &[("r2", [0.0, 1.0])]);
    let far = child(service, project_id, p, &[("far", [0.0, -1.0])]);
    let query = child(service, project_id, r2, &[("q", [1.0, 0.0])]);
    let near = child(service, project_id, r2, &[("near", [1.0, 0.2])]);
    let empty = child(service, project_id, r2, &[]);
    Fixture {
        query,
        near,
        far,
        empty,
        outer,
    }
}

#[test]
fn children_are_ranked_by_centroid_distance() {
    let conn = setup();
    let service = service(&conn);
    let tree = build(&service);

    let ranked = service.recommend_children(tree.query, None).unwrap();
    let ids = ranked.iter().map(|r| r.item.node_id).collect::<Vec<_>>();

    assert_eq!(ids, vec![tree.near, tree.far]);
    assert!(!ids.contains(&tree.empty));
    assert!(!ids.contains(&tree.outer));
    assert!(ranked.windows(2).all(|w| w[0].distance <= w[1].distance));
    assert!(ranked.iter().all(|r| r.item.cache_depth() >= 5));
}

#[test]
fn children_are_truncated_to_max_n() {
    let conn = setup();
    let service = service(&conn);
    let tree = build(&service);

    let ranked = service.recommend_children(tree.query, Some(1)).unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].item.node_id, tree.near);
}

#[test]
fn objects_come_from_ancestor_levels_below_root() {
    let conn = setup();
    let service = service(&conn);
    let tree = build(&service);

    let ranked = service.recommend_objects(tree.query, None).unwrap();
    let ids = ranked
        .iter()
        .map(|r| r.item.object_id.as_str())
        .collect::<Vec<_>>();

    assert_eq!(ids, vec!["p_near", "r2", "p_far"]);
    assert!(ranked.windows(2).all(|w| w[0].distance <= w[1].distance));
    assert!((ranked[2].distance - 2.0).abs() < 1e-5);

    let top = service.recommend_objects(tree.query, Some(2)).unwrap();
    assert_eq!(top.len(), 2);
}

#[test]
fn query_without_centroid_fails() {
    let conn = setup();
    let service = service(&conn);
    let tree = build(&service);

    let err = service.recommend_children(tree.empty, None).unwrap_err();
    assert!(matches!(err, TreeServiceError::MissingCentroid(id) if id == tree.empty));
    assert_eq!(err.kind(), TreeErrorKind::StructuralViolation);
    assert!(matches!(
        service.recommend_objects(tree.empty, None).unwrap_err(),
        TreeServiceError::MissingCentroid(_)
    ));
}

#[test]
fn direct_child_of_root_has_no_candidates() {
    let conn = setup();
    let service = service(&conn);
    let tree = build(&service);

    assert!(service
        .recommend_children(tree.outer, None)
        .unwrap()
        .is_empty());
    assert!(service
        .recommend_objects(tree.outer, None)
        .unwrap()
        .is_empty());
}
