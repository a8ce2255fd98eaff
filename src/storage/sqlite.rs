//! SQLite storage backend for the recipe graph

use super::record::{
    from_properties_json, IngredientRecord, RecipeRecord, SharedRecord, StepRecord,
};
use super::traits::{GraphStore, OpenStore, SharedNode, StorageError, StorageResult};
use super::txn::{Binding, BindingCounts, NodeRef, Op, Transaction, TxnOutcome};
use crate::graph::{relationship, NodeId, NodeKind};
use crate::guard::AppliedLog;
use crate::recipe::{Food, Ingredient, Recipe, Step, Tag};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// How long a writer waits for another connection's lock before failing
/// with a transient error.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed graph store
///
/// Nodes and edges live in two tables; node scalars are a JSON column.
/// Thread-safe via internal mutex on the connection. Several processes may
/// open the same file: every transaction starts with `BEGIN IMMEDIATE`, so
/// binding evaluation and the writes that depend on it are serialized.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            r#"
            -- Nodes table: identity columns are outside the JSON so they can be indexed
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                external_id TEXT,
                stem TEXT,
                properties_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL
            );

            -- At most one recipe per external ID
            CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_external_id
                ON nodes(kind, external_id) WHERE external_id IS NOT NULL;

            -- At most one food/tag per stem
            CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_stem
                ON nodes(kind, stem) WHERE stem IS NOT NULL;

            -- Edges table; removing a node removes its edges
            CREATE TABLE IF NOT EXISTS edges (
                source_id TEXT NOT NULL,
                relationship TEXT NOT NULL,
                target_id TEXT NOT NULL,
                position INTEGER,
                PRIMARY KEY (source_id, relationship, target_id),
                FOREIGN KEY (source_id) REFERENCES nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (target_id) REFERENCES nodes(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_edges_target
                ON edges(target_id, relationship);

            -- Idempotency guard entries
            CREATE TABLE IF NOT EXISTS applied_events (
                key TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );

            -- Enable foreign keys
            PRAGMA foreign_keys = ON;

            -- Enable WAL mode for concurrent reads during writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // === Transaction evaluation ===

    fn resolve_binding(conn: &Connection, binding: &Binding) -> StorageResult<Vec<String>> {
        let (sql, key) = match binding {
            Binding::RecipeByExternalId(xid) => (
                "SELECT id FROM nodes WHERE kind = ?1 AND external_id = ?2",
                xid,
            ),
            Binding::FoodByStem(stem) | Binding::TagByStem(stem) => {
                ("SELECT id FROM nodes WHERE kind = ?1 AND stem = ?2", stem)
            }
        };
        let mut stmt = conn.prepare_cached(sql)?;
        let ids = stmt
            .query_map(params![binding.kind().as_str(), key], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn apply_op(conn: &Connection, scope: &mut Scope, op: &Op, now: &str) -> StorageResult<()> {
        match op {
            Op::CreateNode { blank, data } => {
                if scope.blanks.contains_key(blank) {
                    return Ok(());
                }
                let id = NodeId::new();
                conn.execute(
                    r#"
                    INSERT INTO nodes (id, kind, external_id, stem, properties_json, created_at, modified_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                    "#,
                    params![
                        id.as_str(),
                        data.kind.as_str(),
                        data.external_id,
                        data.stem,
                        serde_json::to_string(&data.properties)?,
                        now,
                    ],
                )?;
                scope.blanks.insert(blank.clone(), id);
            }
            Op::UpdateNode { target, properties } => {
                let id = scope.resolve(target)?;
                conn.execute(
                    "UPDATE nodes SET properties_json = ?1, modified_at = ?2 WHERE id = ?3",
                    params![serde_json::to_string(properties)?, now, id],
                )?;
            }
            Op::Link {
                from,
                relationship,
                to,
                position,
            } => {
                let source = scope.resolve(from)?;
                let target = scope.resolve(to)?;
                conn.execute(
                    r#"
                    INSERT INTO edges (source_id, relationship, target_id, position)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(source_id, relationship, target_id) DO UPDATE SET
                        position = excluded.position
                    "#,
                    params![source, relationship, target, position.map(|p| p as i64)],
                )?;
            }
            Op::DetachOwned {
                anchor,
                relationship,
            } => {
                let anchor_id = scope.resolve(anchor)?;
                let children: Vec<(String, String)> = {
                    let mut stmt = conn.prepare_cached(
                        r#"
                        SELECT n.id, n.kind FROM edges e
                        JOIN nodes n ON n.id = e.target_id
                        WHERE e.source_id = ?1 AND e.relationship = ?2
                        "#,
                    )?;
                    let rows = stmt
                        .query_map(params![anchor_id, relationship], |row| {
                            Ok((row.get(0)?, row.get(1)?))
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                };
                for (child_id, kind) in children {
                    if NodeKind::parse(&kind).map_or(true, |k| k.is_shared()) {
                        return Err(StorageError::Aborted(format!(
                            "refusing to detach {} node {} over '{}'",
                            kind, child_id, relationship
                        )));
                    }
                    conn.execute("DELETE FROM nodes WHERE id = ?1", params![child_id])?;
                }
            }
            Op::Unlink {
                anchor,
                relationship,
            } => {
                let anchor_id = scope.resolve(anchor)?;
                conn.execute(
                    "DELETE FROM edges WHERE source_id = ?1 AND relationship = ?2",
                    params![anchor_id, relationship],
                )?;
            }
            Op::DeleteNode { target } => {
                let id = scope.resolve(target)?;
                let kind: Option<String> = conn
                    .query_row("SELECT kind FROM nodes WHERE id = ?1", params![id], |row| {
                        row.get(0)
                    })
                    .optional()?;
                match kind.as_deref().and_then(NodeKind::parse) {
                    Some(kind) if !kind.is_shared() => {
                        conn.execute("DELETE FROM nodes WHERE id = ?1", params![id])?;
                    }
                    Some(kind) => {
                        return Err(StorageError::Aborted(format!(
                            "refusing to delete shared {} node {}",
                            kind, id
                        )))
                    }
                    None => return Err(StorageError::Unresolved(format!("{} ({})", target, id))),
                }
            }
        }
        Ok(())
    }

    // === Recipe reconstruction ===

    fn load_recipe_in(conn: &Connection, external_id: &str) -> StorageResult<Option<Recipe>> {
        let row = conn
            .query_row(
                r#"
                SELECT id, properties_json, created_at, modified_at FROM nodes
                WHERE kind = 'recipe' AND external_id = ?1
                "#,
                params![external_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, properties_json, created_at, modified_at)) = row else {
            return Ok(None);
        };

        let mut recipe = Recipe::new(external_id, "");
        from_properties_json::<RecipeRecord>(&properties_json)?.apply_to(&mut recipe);
        recipe.id = Some(NodeId::from_string(id.clone()));
        recipe.created_at = Some(parse_timestamp(&created_at)?);
        recipe.modified_at = Some(parse_timestamp(&modified_at)?);
        recipe.ingredients = Self::load_ingredients(conn, &id)?;
        recipe.steps = Self::load_steps(conn, &id)?;
        recipe.tags = Self::load_tags(conn, &id)?;
        Ok(Some(recipe))
    }

    fn load_ingredients(conn: &Connection, recipe_id: &str) -> StorageResult<Vec<Ingredient>> {
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT n.properties_json, f.id, f.stem, f.properties_json
            FROM edges e
            JOIN nodes n ON n.id = e.target_id
            LEFT JOIN edges fe ON fe.source_id = n.id AND fe.relationship = ?2
            LEFT JOIN nodes f ON f.id = fe.target_id
            WHERE e.source_id = ?1 AND e.relationship = ?3
            ORDER BY e.position
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![recipe_id, relationship::FOOD, relationship::INGREDIENTS],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut ingredients = Vec::with_capacity(rows.len());
        for (properties_json, food_id, food_stem, food_json) in rows {
            let mut ingredient =
                from_properties_json::<IngredientRecord>(&properties_json)?.into_domain();
            if let (Some(id), Some(stem), Some(json)) = (food_id, food_stem, food_json) {
                ingredient.food = Some(Food {
                    id: Some(NodeId::from_string(id)),
                    term: from_properties_json::<SharedRecord>(&json)?.term,
                    stem,
                });
            }
            ingredients.push(ingredient);
        }
        Ok(ingredients)
    }

    fn load_steps(conn: &Connection, recipe_id: &str) -> StorageResult<Vec<Step>> {
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT n.properties_json FROM edges e
            JOIN nodes n ON n.id = e.target_id
            WHERE e.source_id = ?1 AND e.relationship = ?2
            ORDER BY e.position
            "#,
        )?;
        let rows = stmt
            .query_map(params![recipe_id, relationship::STEPS], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| -> StorageResult<Step> {
                Ok(from_properties_json::<StepRecord>(json)?.into_domain())
            })
            .collect()
    }

    fn load_tags(conn: &Connection, recipe_id: &str) -> StorageResult<Vec<Tag>> {
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT t.id, t.stem, t.properties_json FROM edges e
            JOIN nodes t ON t.id = e.target_id
            WHERE e.source_id = ?1 AND e.relationship = ?2
            ORDER BY e.position, t.stem
            "#,
        )?;
        let rows = stmt
            .query_map(params![recipe_id, relationship::TAGS], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, stem, json)| -> StorageResult<Tag> {
                Ok(Tag {
                    id: Some(NodeId::from_string(id)),
                    name: from_properties_json::<SharedRecord>(&json)?.term,
                    stem,
                })
            })
            .collect()
    }
}

/// Binding results and blank nodes created so far in one transaction.
struct Scope {
    bound: HashMap<String, Vec<String>>,
    blanks: BTreeMap<String, NodeId>,
}

impl Scope {
    fn resolve(&self, node: &NodeRef) -> StorageResult<String> {
        match node {
            NodeRef::Bound(var) => match self.bound.get(var).map(Vec::as_slice) {
                Some([id]) => Ok(id.clone()),
                Some(ids) => Err(StorageError::Unresolved(format!(
                    "{} matched {} nodes",
                    node,
                    ids.len()
                ))),
                None => Err(StorageError::Unresolved(format!("{} is not bound", node))),
            },
            NodeRef::Blank(name) => self
                .blanks
                .get(name)
                .map(|id| id.as_str().to_string())
                .ok_or_else(|| StorageError::Unresolved(format!("{} was not created", node))),
        }
    }
}

fn parse_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::DateParse(e.to_string()))
}

/// Uniqueness violations mean a concurrent writer got there first.
fn abort_on_constraint(err: StorageError) -> StorageError {
    match err {
        StorageError::Database(rusqlite::Error::SqliteFailure(e, msg))
            if e.code == ErrorCode::ConstraintViolation =>
        {
            StorageError::Aborted(msg.unwrap_or_else(|| e.to_string()))
        }
        other => other,
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }
}

impl GraphStore for SqliteStore {
    fn execute(&self, txn: &Transaction) -> StorageResult<TxnOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut scope = Scope {
            bound: HashMap::new(),
            blanks: BTreeMap::new(),
        };
        for (var, binding) in txn.bindings() {
            let ids = Self::resolve_binding(&tx, binding)?;
            scope.bound.insert(var.clone(), ids);
        }
        let counts: BindingCounts = scope
            .bound
            .iter()
            .map(|(var, ids)| (var.clone(), ids.len()))
            .collect();

        let now = Utc::now().to_rfc3339();
        let mut fired = Vec::new();
        for mutation in txn.fired(&counts) {
            for op in &mutation.ops {
                Self::apply_op(&tx, &mut scope, op, &now).map_err(abort_on_constraint)?;
            }
            fired.push(mutation.label.clone());
        }

        tx.commit()?;
        Ok(TxnOutcome {
            created: scope.blanks,
            fired,
        })
    }

    fn recipe_exists(&self, external_id: &str) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE kind = 'recipe' AND external_id = ?1)",
            params![external_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn load_recipe(&self, external_id: &str) -> StorageResult<Option<Recipe>> {
        let conn = self.conn.lock().unwrap();
        Self::load_recipe_in(&conn, external_id)
    }

    fn load_recipes(&self, external_ids: &[String]) -> StorageResult<Vec<Recipe>> {
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::with_capacity(external_ids.len());
        for id in external_ids {
            if let Some(recipe) = Self::load_recipe_in(&conn, id)? {
                out.push(recipe);
            }
        }
        Ok(out)
    }

    fn count(&self, kind: NodeKind) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn find_shared(&self, kind: NodeKind, stem: &str) -> StorageResult<Option<SharedNode>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, properties_json FROM nodes WHERE kind = ?1 AND stem = ?2",
                params![kind.as_str(), stem],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        row.map(|(id, json)| -> StorageResult<SharedNode> {
            Ok(SharedNode {
                id: NodeId::from_string(id),
                kind,
                term: from_properties_json::<SharedRecord>(&json)?.term,
                stem: stem.to_string(),
            })
        })
        .transpose()
    }

    fn recipes_referencing(&self, node: &NodeId) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT r.external_id FROM edges fe
            JOIN edges ie ON ie.target_id = fe.source_id AND ie.relationship = ?2
            JOIN nodes r ON r.id = ie.source_id
            WHERE fe.target_id = ?1 AND fe.relationship = ?3
            UNION
            SELECT r.external_id FROM edges te
            JOIN nodes r ON r.id = te.source_id
            WHERE te.target_id = ?1 AND te.relationship = ?4
            ORDER BY 1
            "#,
        )?;
        let ids = stmt
            .query_map(
                params![
                    node.as_str(),
                    relationship::INGREDIENTS,
                    relationship::FOOD,
                    relationship::TAGS
                ],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

impl AppliedLog for SqliteStore {
    fn fingerprint(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let fingerprint = conn
            .query_row(
                "SELECT fingerprint FROM applied_events WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(fingerprint)
    }

    fn record(&self, key: &str, fingerprint: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO applied_events (key, fingerprint, applied_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                applied_at = excluded.applied_at
            "#,
            params![key, fingerprint, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn forget(&self, key: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM applied_events WHERE key = ?1", params![key])?;
        Ok(())
    }
}
