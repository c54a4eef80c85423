//! Cluster tree repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide persistence APIs over `projects`, `nodes`, `objects` and
//!   `nodes_objects`.
//! - Keep recursive SQL (ancestor paths, subtree sums, stop-at-predicate
//!   descents) inside the repository boundary.
//! - Provide atomic scopes for multi-statement mutations.
//!
//! # Invariants
//! - Child listing is deterministic: requested order, then `node_id ASC`.
//! - Object listing follows membership insertion order.
//! - A node read with `cache_depth = 0` carries no cache.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::node::{
    ChildOrder, ChildQuery, Node, NodeCache, NodeId, NodePatch, Project, ProjectId,
    SortDirection, StarFilter,
};
use crate::model::object::{ObjectId, ObjectRecord};
use crate::model::vector::{decode_blob, encode_blob};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::cell::Cell;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Upper bound of ids bound into one `IN (...)` list.
const MAX_IN_LIST: usize = 500;

const NODE_SELECT_SQL: &str = "SELECT
    n.node_id AS node_id,
    n.project_id AS project_id,
    n.parent_id AS parent_id,
    n.orig_id AS orig_id,
    n.name AS name,
    n.starred AS starred,
    n.approved AS approved,
    n.cache_depth AS cache_depth,
    n.centroid AS centroid,
    n.type_objects AS type_objects,
    n.own_type_objects AS own_type_objects,
    n.recursive_object_count AS recursive_object_count,
    (SELECT COUNT(*) FROM nodes c WHERE c.parent_id = n.node_id) AS n_children,
    (SELECT COUNT(*) FROM nodes_objects m WHERE m.node_id = n.node_id) AS n_objects
FROM nodes n";

const NODE_COLUMNS: [&str; 12] = [
    "node_id",
    "project_id",
    "parent_id",
    "orig_id",
    "name",
    "starred",
    "approved",
    "cache_depth",
    "centroid",
    "type_objects",
    "own_type_objects",
    "recursive_object_count",
];

/// Result type used by tree repository operations.
pub type TreeRepoResult<T> = Result<T, TreeRepoError>;

/// Errors from tree repository operations.
#[derive(Debug)]
pub enum TreeRepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for TreeRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "tree repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "tree repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "tree repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid tree data: {message}"),
        }
    }
}

impl Error for TreeRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::UninitializedConnection { .. }
            | Self::MissingRequiredTable(_)
            | Self::MissingRequiredColumn { .. }
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for TreeRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for TreeRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for the cluster tree.
pub trait TreeRepository {
    /// Runs `op` so that either all of its writes apply or none do.
    ///
    /// Nested calls are allowed; inner scopes roll back independently.
    fn atomically<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<TreeRepoError>;

    /// Inserts a project row.
    fn insert_project(&self, name: &str) -> TreeRepoResult<ProjectId>;
    /// Returns whether the project row exists.
    fn project_exists(&self, project_id: ProjectId) -> TreeRepoResult<bool>;
    /// Lists projects joined with their root node, optionally one project.
    fn list_projects(&self, project_id: Option<ProjectId>) -> TreeRepoResult<Vec<Project>>;
    /// Deletes a project; nodes and memberships cascade.
    fn delete_project(&self, project_id: ProjectId) -> TreeRepoResult<bool>;
    /// Loads the null-parent node of a project.
    fn root_id(&self, project_id: ProjectId) -> TreeRepoResult<Option<NodeId>>;
    /// Resolves an import-time identifier within one project.
    fn node_id_by_orig_id(
        &self,
        project_id: ProjectId,
        orig_id: i64,
    ) -> TreeRepoResult<Option<NodeId>>;
    /// Inserts a node row without shape checks.
    fn insert_node(
        &self,
        project_id: ProjectId,
        parent_id: Option<NodeId>,
        orig_id: Option<i64>,
        name: Option<&str>,
        starred: bool,
    ) -> TreeRepoResult<NodeId>;
    /// Inserts memberships for one node in a single statement.
    fn attach_objects(
        &self,
        node_id: NodeId,
        project_id: ProjectId,
        object_ids: &[ObjectId],
    ) -> TreeRepoResult<usize>;
    /// Inserts object rows.
    fn insert_objects(&self, objects: &[ObjectRecord]) -> TreeRepoResult<usize>;
    /// Loads one node with its child count.
    fn get_node(&self, node_id: NodeId) -> TreeRepoResult<Option<Node>>;
    /// Lists direct children of a node.
    fn list_children(&self, node_id: NodeId, query: &ChildQuery) -> TreeRepoResult<Vec<Node>>;
    /// Lists direct child ids ordered by id.
    fn child_ids(&self, node_id: NodeId) -> TreeRepoResult<Vec<NodeId>>;
    /// Ancestor path, root first, ending with `node_id`. Empty if unknown.
    fn path_ids(&self, node_id: NodeId) -> TreeRepoResult<Vec<NodeId>>;
    /// Lists objects directly attached to a node.
    fn list_objects(
        &self,
        node_id: NodeId,
        offset: Option<u32>,
        limit: Option<u32>,
    ) -> TreeRepoResult<Vec<ObjectRecord>>;
    /// Counts objects directly attached to a node.
    fn count_objects(&self, node_id: NodeId) -> TreeRepoResult<i64>;
    /// Counts objects attached anywhere in the subtree, ignoring caches.
    fn count_objects_in_subtree(&self, node_id: NodeId) -> TreeRepoResult<i64>;
    /// Persists all cached aggregates of a node in one write.
    fn store_cache(&self, node_id: NodeId, cache: &NodeCache) -> TreeRepoResult<()>;
    /// Sets `cache_depth = 0` on the node and all its ancestors.
    fn invalidate_path(&self, node_id: NodeId) -> TreeRepoResult<usize>;
    /// Moves every membership of `source` to `dest` and `dest`'s project.
    fn move_node_objects(&self, source: NodeId, dest: NodeId) -> TreeRepoResult<usize>;
    /// Reparents every child of `source` to `dest`.
    fn move_children(&self, source: NodeId, dest: NodeId) -> TreeRepoResult<usize>;
    /// Deletes one node row.
    fn delete_node(&self, node_id: NodeId) -> TreeRepoResult<bool>;
    /// Sets the parent of all given nodes.
    fn set_parent(&self, node_ids: &[NodeId], parent_id: NodeId) -> TreeRepoResult<usize>;
    /// Distinct current parents of the given nodes.
    fn parent_ids_of(&self, node_ids: &[NodeId]) -> TreeRepoResult<Vec<NodeId>>;
    /// Distinct nodes currently owning the given objects within a project.
    fn owner_ids_of(
        &self,
        project_id: ProjectId,
        object_ids: &[ObjectId],
    ) -> TreeRepoResult<Vec<NodeId>>;
    /// Moves memberships of the given objects within `project_id` to `dest`.
    fn move_objects(
        &self,
        project_id: ProjectId,
        object_ids: &[ObjectId],
        dest: NodeId,
    ) -> TreeRepoResult<usize>;
    /// Applies a field patch; `patch.node_id` is ignored.
    fn patch_node(&self, node_id: NodeId, patch: &NodePatch) -> TreeRepoResult<usize>;
    /// Deepest unreviewed branching node below `node_id`.
    fn tip_id(&self, node_id: NodeId) -> TreeRepoResult<Option<NodeId>>;
    /// Starred nodes reachable without passing another starred node.
    fn minlevel_starred_ids(&self, root_id: NodeId) -> TreeRepoResult<Vec<NodeId>>;
}

/// SQLite-backed tree repository.
pub struct SqliteTreeRepository<'conn> {
    conn: &'conn Connection,
    savepoint_depth: Cell<u32>,
}

impl<'conn> SqliteTreeRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> TreeRepoResult<Self> {
        ensure_tree_connection_ready(conn)?;
        Ok(Self {
            conn,
            savepoint_depth: Cell::new(0),
        })
    }

    fn run_in_savepoint<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<TreeRepoError>,
    {
        let depth = self.savepoint_depth.get() + 1;
        let name = format!("tree_op_{depth}");
        self.conn
            .execute_batch(&format!("SAVEPOINT {name};"))
            .map_err(TreeRepoError::from)?;
        self.savepoint_depth.set(depth);

        let outcome = op();
        self.savepoint_depth.set(depth - 1);

        match outcome {
            Ok(value) => {
                self.conn
                    .execute_batch(&format!("RELEASE {name};"))
                    .map_err(TreeRepoError::from)?;
                Ok(value)
            }
            Err(err) => {
                self.conn
                    .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};"))
                    .map_err(TreeRepoError::from)?;
                Err(err)
            }
        }
    }
}

impl TreeRepository for SqliteTreeRepository<'_> {
    fn atomically<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<TreeRepoError>,
    {
        if !self.conn.is_autocommit() {
            return self.run_in_savepoint(op);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(TreeRepoError::from)?;
        // Dropping `tx` on the error path rolls back.
        let value = op()?;
        tx.commit().map_err(TreeRepoError::from)?;
        Ok(value)
    }

    fn insert_project(&self, name: &str) -> TreeRepoResult<ProjectId> {
        self.conn
            .execute("INSERT INTO projects (name) VALUES (?1);", [name])?;
        Ok(self.conn.last_insert_rowid())
    }

    fn project_exists(&self, project_id: ProjectId) -> TreeRepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM projects WHERE project_id = ?1);",
            [project_id],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn list_projects(&self, project_id: Option<ProjectId>) -> TreeRepoResult<Vec<Project>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.project_id, p.name, n.node_id
             FROM projects p
             INNER JOIN nodes n ON n.project_id = p.project_id
             WHERE n.parent_id IS NULL
               AND (?1 IS NULL OR p.project_id = ?1)
             ORDER BY p.project_id ASC;",
        )?;
        let mut rows = stmt.query([project_id])?;
        let mut projects = Vec::new();
        while let Some(row) = rows.next()? {
            projects.push(Project {
                project_id: row.get(0)?,
                name: row.get(1)?,
                root_node_id: row.get(2)?,
            });
        }
        Ok(projects)
    }

    fn delete_project(&self, project_id: ProjectId) -> TreeRepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM projects WHERE project_id = ?1;", [project_id])?;
        Ok(changed > 0)
    }

    fn root_id(&self, project_id: ProjectId) -> TreeRepoResult<Option<NodeId>> {
        let root = self
            .conn
            .query_row(
                "SELECT node_id
                 FROM nodes
                 WHERE project_id = ?1
                   AND parent_id IS NULL
                 ORDER BY node_id ASC
                 LIMIT 1;",
                [project_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(root)
    }

    fn node_id_by_orig_id(
        &self,
        project_id: ProjectId,
        orig_id: i64,
    ) -> TreeRepoResult<Option<NodeId>> {
        let node_id = self
            .conn
            .query_row(
                "SELECT node_id
                 FROM nodes
                 WHERE project_id = ?1
                   AND orig_id = ?2
                 ORDER BY node_id ASC
                 LIMIT 1;",
                params![project_id, orig_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(node_id)
    }

    fn insert_node(
        &self,
        project_id: ProjectId,
        parent_id: Option<NodeId>,
        orig_id: Option<i64>,
        name: Option<&str>,
        starred: bool,
    ) -> TreeRepoResult<NodeId> {
        self.conn.execute(
            "INSERT INTO nodes (
                project_id,
                parent_id,
                orig_id,
                name,
                starred
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![project_id, parent_id, orig_id, name, bool_to_int(starred)],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn attach_objects(
        &self,
        node_id: NodeId,
        project_id: ProjectId,
        object_ids: &[ObjectId],
    ) -> TreeRepoResult<usize> {
        if object_ids.is_empty() {
            return Ok(0);
        }

        let values = vec!["(?, ?, ?)"; object_ids.len()].join(", ");
        let sql = format!(
            "INSERT INTO nodes_objects (node_id, object_id, project_id) VALUES {values};"
        );
        let mut bind_values = Vec::with_capacity(object_ids.len() * 3);
        for object_id in object_ids {
            bind_values.push(Value::Integer(node_id));
            bind_values.push(Value::Text(object_id.clone()));
            bind_values.push(Value::Integer(project_id));
        }
        let inserted = self.conn.execute(&sql, params_from_iter(bind_values))?;
        Ok(inserted)
    }

    fn insert_objects(&self, objects: &[ObjectRecord]) -> TreeRepoResult<usize> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO objects (object_id, vector, path) VALUES (?1, ?2, ?3);",
        )?;
        let mut inserted = 0;
        for object in objects {
            inserted += stmt.execute(params![
                object.object_id.as_str(),
                encode_blob(&object.vector),
                object.path.as_deref(),
            ])?;
        }
        Ok(inserted)
    }

    fn get_node(&self, node_id: NodeId) -> TreeRepoResult<Option<Node>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{NODE_SELECT_SQL} WHERE n.node_id = ?1;"))?;
        let mut rows = stmt.query([node_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_node_row(row)?));
        }
        Ok(None)
    }

    fn list_children(&self, node_id: NodeId, query: &ChildQuery) -> TreeRepoResult<Vec<Node>> {
        let mut sql = format!("{NODE_SELECT_SQL} WHERE n.parent_id = ?");
        let mut bind_values = vec![Value::Integer(node_id)];

        if let Some(include) = query.include {
            sql.push_str(" AND n.starred = ?");
            bind_values.push(Value::Integer(match include {
                StarFilter::Starred => 1,
                StarFilter::Unstarred => 0,
            }));
        }

        sql.push_str(" ORDER BY ");
        if let Some((order, direction)) = query.order_by {
            sql.push_str(order_column(order));
            sql.push_str(match direction {
                SortDirection::Asc => " ASC, ",
                SortDirection::Desc => " DESC, ",
            });
        }
        sql.push_str("n.node_id ASC;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut children = Vec::new();
        while let Some(row) = rows.next()? {
            children.push(parse_node_row(row)?);
        }
        Ok(children)
    }

    fn child_ids(&self, node_id: NodeId) -> TreeRepoResult<Vec<NodeId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT node_id
             FROM nodes
             WHERE parent_id = ?1
             ORDER BY node_id ASC;",
        )?;
        let ids = stmt
            .query_map([node_id], |row| row.get(0))?
            .collect::<Result<Vec<NodeId>, _>>()?;
        Ok(ids)
    }

    fn path_ids(&self, node_id: NodeId) -> TreeRepoResult<Vec<NodeId>> {
        let mut stmt = self.conn.prepare_cached(
            "WITH RECURSIVE path(node_id, parent_id, level) AS (
                SELECT node_id, parent_id, 1
                FROM nodes
                WHERE node_id = ?1
                UNION ALL
                SELECT p.node_id, p.parent_id, path.level + 1
                FROM path
                INNER JOIN nodes p ON p.node_id = path.parent_id
            )
            SELECT node_id
            FROM path
            ORDER BY level DESC;",
        )?;
        let ids = stmt
            .query_map([node_id], |row| row.get(0))?
            .collect::<Result<Vec<NodeId>, _>>()?;
        Ok(ids)
    }

    fn list_objects(
        &self,
        node_id: NodeId,
        offset: Option<u32>,
        limit: Option<u32>,
    ) -> TreeRepoResult<Vec<ObjectRecord>> {
        let mut sql = "SELECT o.object_id, o.vector, o.path
             FROM nodes_objects m
             INNER JOIN objects o ON o.object_id = m.object_id
             WHERE m.node_id = ?
             ORDER BY m.rowid ASC"
            .to_string();
        let mut bind_values = vec![Value::Integer(node_id)];
        let offset = offset.unwrap_or(0);

        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(offset)));
            }
        } else if offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut objects = Vec::new();
        while let Some(row) = rows.next()? {
            objects.push(parse_object_row(row)?);
        }
        Ok(objects)
    }

    fn count_objects(&self, node_id: NodeId) -> TreeRepoResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM nodes_objects WHERE node_id = ?1;",
            [node_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn count_objects_in_subtree(&self, node_id: NodeId) -> TreeRepoResult<i64> {
        let count = self.conn.query_row(
            "WITH RECURSIVE subtree(node_id) AS (
                SELECT node_id
                FROM nodes
                WHERE node_id = ?1
                UNION ALL
                SELECT child.node_id
                FROM nodes child
                INNER JOIN subtree parent ON child.parent_id = parent.node_id
            )
            SELECT COUNT(*)
            FROM nodes_objects
            WHERE node_id IN (SELECT node_id FROM subtree);",
            [node_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn store_cache(&self, node_id: NodeId, cache: &NodeCache) -> TreeRepoResult<()> {
        let type_objects = encode_id_list(&cache.type_objects)?;
        let own_type_objects = encode_id_list(&cache.own_type_objects)?;
        self.conn.execute(
            "UPDATE nodes
             SET cache_depth = ?2,
                 centroid = ?3,
                 type_objects = ?4,
                 own_type_objects = ?5,
                 recursive_object_count = ?6
             WHERE node_id = ?1;",
            params![
                node_id,
                cache.depth,
                cache.centroid.as_deref().map(encode_blob),
                type_objects,
                own_type_objects,
                cache.recursive_object_count,
            ],
        )?;
        Ok(())
    }

    fn invalidate_path(&self, node_id: NodeId) -> TreeRepoResult<usize> {
        let changed = self.conn.execute(
            "WITH RECURSIVE path(node_id, parent_id) AS (
                SELECT node_id, parent_id
                FROM nodes
                WHERE node_id = ?1
                UNION ALL
                SELECT p.node_id, p.parent_id
                FROM path
                INNER JOIN nodes p ON p.node_id = path.parent_id
            )
            UPDATE nodes
            SET cache_depth = 0
            WHERE node_id IN (SELECT node_id FROM path);",
            [node_id],
        )?;
        Ok(changed)
    }

    fn move_node_objects(&self, source: NodeId, dest: NodeId) -> TreeRepoResult<usize> {
        let moved = self.conn.execute(
            "UPDATE nodes_objects
             SET node_id = ?2,
                 project_id = (SELECT project_id FROM nodes WHERE node_id = ?2)
             WHERE node_id = ?1;",
            params![source, dest],
        )?;
        Ok(moved)
    }

    fn move_children(&self, source: NodeId, dest: NodeId) -> TreeRepoResult<usize> {
        let moved = self.conn.execute(
            "UPDATE nodes SET parent_id = ?2 WHERE parent_id = ?1;",
            params![source, dest],
        )?;
        Ok(moved)
    }

    fn delete_node(&self, node_id: NodeId) -> TreeRepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM nodes WHERE node_id = ?1;", [node_id])?;
        Ok(changed > 0)
    }

    fn set_parent(&self, node_ids: &[NodeId], parent_id: NodeId) -> TreeRepoResult<usize> {
        let mut changed = 0;
        for chunk in node_ids.chunks(MAX_IN_LIST) {
            let sql = format!(
                "UPDATE nodes SET parent_id = ? WHERE node_id IN ({});",
                placeholders(chunk.len())
            );
            let bind_values = std::iter::once(Value::Integer(parent_id))
                .chain(chunk.iter().map(|id| Value::Integer(*id)));
            changed += self.conn.execute(&sql, params_from_iter(bind_values))?;
        }
        Ok(changed)
    }

    fn parent_ids_of(&self, node_ids: &[NodeId]) -> TreeRepoResult<Vec<NodeId>> {
        let mut parents = Vec::new();
        for chunk in node_ids.chunks(MAX_IN_LIST) {
            let sql = format!(
                "SELECT DISTINCT parent_id
                 FROM nodes
                 WHERE parent_id IS NOT NULL
                   AND node_id IN ({})
                 ORDER BY parent_id ASC;",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let ids = stmt
                .query_map(params_from_iter(chunk.iter()), |row| row.get(0))?
                .collect::<Result<Vec<NodeId>, _>>()?;
            parents.extend(ids);
        }
        parents.sort_unstable();
        parents.dedup();
        Ok(parents)
    }

    fn owner_ids_of(
        &self,
        project_id: ProjectId,
        object_ids: &[ObjectId],
    ) -> TreeRepoResult<Vec<NodeId>> {
        let mut owners = Vec::new();
        for chunk in object_ids.chunks(MAX_IN_LIST) {
            let sql = format!(
                "SELECT DISTINCT node_id
                 FROM nodes_objects
                 WHERE project_id = ?
                   AND object_id IN ({});",
                placeholders(chunk.len())
            );
            let bind_values = std::iter::once(Value::Integer(project_id))
                .chain(chunk.iter().map(|id| Value::Text(id.clone())));
            let mut stmt = self.conn.prepare(&sql)?;
            let ids = stmt
                .query_map(params_from_iter(bind_values), |row| row.get(0))?
                .collect::<Result<Vec<NodeId>, _>>()?;
            owners.extend(ids);
        }
        owners.sort_unstable();
        owners.dedup();
        Ok(owners)
    }

    fn move_objects(
        &self,
        project_id: ProjectId,
        object_ids: &[ObjectId],
        dest: NodeId,
    ) -> TreeRepoResult<usize> {
        let mut moved = 0;
        for chunk in object_ids.chunks(MAX_IN_LIST) {
            let sql = format!(
                "UPDATE nodes_objects
                 SET node_id = ?
                 WHERE project_id = ?
                   AND object_id IN ({});",
                placeholders(chunk.len())
            );
            let bind_values = [Value::Integer(dest), Value::Integer(project_id)]
                .into_iter()
                .chain(chunk.iter().map(|id| Value::Text(id.clone())));
            moved += self.conn.execute(&sql, params_from_iter(bind_values))?;
        }
        Ok(moved)
    }

    fn patch_node(&self, node_id: NodeId, patch: &NodePatch) -> TreeRepoResult<usize> {
        let mut assignments = Vec::new();
        let mut bind_values = Vec::new();

        if let Some(parent_id) = patch.parent_id {
            assignments.push("parent_id = ?");
            bind_values.push(parent_id.map_or(Value::Null, Value::Integer));
        }
        if let Some(name) = &patch.name {
            assignments.push("name = ?");
            bind_values.push(name.clone().map_or(Value::Null, Value::Text));
        }
        if let Some(starred) = patch.starred {
            assignments.push("starred = ?");
            bind_values.push(Value::Integer(bool_to_int(starred)));
        }
        if let Some(approved) = patch.approved {
            assignments.push("approved = ?");
            bind_values.push(Value::Integer(bool_to_int(approved)));
        }

        if assignments.is_empty() {
            let exists: i64 = self.conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM nodes WHERE node_id = ?1);",
                [node_id],
                |row| row.get(0),
            )?;
            return Ok(exists as usize);
        }

        let sql = format!(
            "UPDATE nodes SET {} WHERE node_id = ?;",
            assignments.join(", ")
        );
        bind_values.push(Value::Integer(node_id));
        let changed = self.conn.execute(&sql, params_from_iter(bind_values))?;
        Ok(changed)
    }

    fn tip_id(&self, node_id: NodeId) -> TreeRepoResult<Option<NodeId>> {
        let tip = self
            .conn
            .query_row(
                "WITH RECURSIVE reachable(node_id, level) AS (
                    SELECT node_id, 1
                    FROM nodes
                    WHERE node_id = ?1
                    UNION ALL
                    SELECT child.node_id, reachable.level + 1
                    FROM reachable
                    INNER JOIN nodes child ON child.parent_id = reachable.node_id
                    WHERE child.approved = 0
                      AND child.starred = 0
                )
                SELECT reachable.node_id
                FROM reachable
                WHERE EXISTS (
                    SELECT 1 FROM nodes c WHERE c.parent_id = reachable.node_id
                )
                ORDER BY reachable.level DESC, reachable.node_id ASC
                LIMIT 1;",
                [node_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(tip)
    }

    fn minlevel_starred_ids(&self, root_id: NodeId) -> TreeRepoResult<Vec<NodeId>> {
        let mut stmt = self.conn.prepare_cached(
            "WITH RECURSIVE reachable(node_id, starred) AS (
                SELECT node_id, starred
                FROM nodes
                WHERE node_id = ?1
                UNION ALL
                SELECT child.node_id, child.starred
                FROM reachable
                INNER JOIN nodes child ON child.parent_id = reachable.node_id
                WHERE reachable.starred = 0
            )
            SELECT node_id
            FROM reachable
            WHERE starred = 1
            ORDER BY node_id ASC;",
        )?;
        let ids = stmt
            .query_map([root_id], |row| row.get(0))?
            .collect::<Result<Vec<NodeId>, _>>()?;
        Ok(ids)
    }
}

fn order_column(order: ChildOrder) -> &'static str {
    match order {
        ChildOrder::NodeId => "n.node_id",
        ChildOrder::Name => "n.name",
        ChildOrder::ChildCount => "n_children",
        ChildOrder::ObjectCount => "n_objects",
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn parse_node_row(row: &Row<'_>) -> TreeRepoResult<Node> {
    let node_id: NodeId = row.get("node_id")?;
    let cache_depth = row.get::<_, i64>("cache_depth")?;
    let cache_depth = u32::try_from(cache_depth).map_err(|_| {
        TreeRepoError::InvalidData(format!(
            "invalid cache_depth `{cache_depth}` in nodes.cache_depth for node {node_id}"
        ))
    })?;

    let cache = if cache_depth == 0 {
        None
    } else {
        let centroid = row
            .get::<_, Option<Vec<u8>>>("centroid")?
            .map(|bytes| decode_blob(&bytes))
            .transpose()
            .map_err(|err| {
                TreeRepoError::InvalidData(format!("nodes.centroid of node {node_id}: {err}"))
            })?;
        let recursive_object_count = row
            .get::<_, Option<i64>>("recursive_object_count")?
            .ok_or_else(|| {
                TreeRepoError::InvalidData(format!(
                    "node {node_id} has cache_depth {cache_depth} but no recursive_object_count"
                ))
            })?;
        Some(NodeCache {
            depth: cache_depth,
            centroid,
            type_objects: decode_id_list(row.get("type_objects")?, "nodes.type_objects")?,
            own_type_objects: decode_id_list(
                row.get("own_type_objects")?,
                "nodes.own_type_objects",
            )?,
            recursive_object_count,
        })
    };

    Ok(Node {
        node_id,
        project_id: row.get("project_id")?,
        parent_id: row.get("parent_id")?,
        orig_id: row.get("orig_id")?,
        name: row.get("name")?,
        starred: parse_bool(row.get("starred")?, "nodes.starred")?,
        approved: parse_bool(row.get("approved")?, "nodes.approved")?,
        cache,
        n_children: row.get("n_children")?,
    })
}

fn parse_object_row(row: &Row<'_>) -> TreeRepoResult<ObjectRecord> {
    let object_id: String = row.get(0)?;
    let bytes: Vec<u8> = row.get(1)?;
    let vector = decode_blob(&bytes).map_err(|err| {
        TreeRepoError::InvalidData(format!("objects.vector of object `{object_id}`: {err}"))
    })?;
    Ok(ObjectRecord {
        object_id,
        vector,
        path: row.get(2)?,
    })
}

fn parse_bool(value: i64, column: &'static str) -> TreeRepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(TreeRepoError::InvalidData(format!(
            "invalid boolean `{other}` in {column}"
        ))),
    }
}

fn encode_id_list(ids: &[ObjectId]) -> TreeRepoResult<String> {
    serde_json::to_string(ids)
        .map_err(|err| TreeRepoError::InvalidData(format!("cannot encode object id list: {err}")))
}

fn decode_id_list(value: Option<String>, column: &'static str) -> TreeRepoResult<Vec<ObjectId>> {
    match value {
        None => Ok(Vec::new()),
        Some(text) => serde_json::from_str(&text).map_err(|err| {
            TreeRepoError::InvalidData(format!("invalid id list in {column}: {err}"))
        }),
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn ensure_tree_connection_ready(conn: &Connection) -> TreeRepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(TreeRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in ["projects", "nodes", "objects", "nodes_objects"] {
        if !table_exists(conn, table)? {
            return Err(TreeRepoError::MissingRequiredTable(table));
        }
    }

    for column in NODE_COLUMNS {
        if !table_has_column(conn, "nodes", column)? {
            return Err(TreeRepoError::MissingRequiredColumn {
                table: "nodes",
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> TreeRepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> TreeRepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM pragma_table_info(?1)
            WHERE name = ?2
        );",
        [table, column],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
