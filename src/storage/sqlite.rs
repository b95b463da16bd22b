//! SQLite storage provider
//!
//! Nodes and properties live in two tables. Paths are stored in expanded
//! form. Children are ordered by insertion sequence; a move within one
//! parent keeps the sequence, so compacted siblings stay in place. The
//! reference key of each property is extracted into an indexed column.

use std::path::Path as FsPath;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;

use super::provider::{check_transfer, keeps_position, StorageProvider};
use crate::error::{Result, StoreError};
use crate::item::PropertyRecord;
use crate::path::{Path, QualifiedName};

pub struct SqliteProvider {
    conn: Mutex<Connection>,
}

/// Schema version - bump when schema changes
const SCHEMA_VERSION: i32 = 1;

fn fail(workspace: &str, path: impl ToString, e: impl ToString) -> StoreError {
    StoreError::provider(workspace, path, e)
}

fn parse_path(workspace: &str, raw: &str) -> Result<Path> {
    Path::parse_expanded(raw).map_err(|e| fail(workspace, raw, e))
}

/// SQL condition matching `path` and everything beneath it on column `col`.
/// Binds `?2` to the path and `?3` to the prefix of its descendants.
fn subtree_clause(col: &str) -> String {
    format!("({col} = ?2 OR substr({col}, 1, length(?3)) = ?3)")
}

fn descendant_prefix(path: &Path) -> String {
    if path.is_root() {
        "/".to_string()
    } else {
        format!("{}/", path)
    }
}

fn rebase_raw(workspace: &str, raw: &str, from: &Path, to: &Path) -> Result<String> {
    let path = parse_path(workspace, raw)?;
    path.rebase(from, to)
        .map(|p| p.to_string())
        .ok_or_else(|| fail(workspace, raw, format!("not beneath {}", from)))
}

impl SqliteProvider {
    pub fn open(db_path: &FsPath) -> Result<Self> {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| fail("", db_path.display(), e))?;
        }
        let conn = Connection::open(db_path).map_err(|e| fail("", db_path.display(), e))?;
        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| fail("", db_path.display(), e))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| fail("", ":memory:", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| fail("", "", e))?;
        if version != SCHEMA_VERSION {
            conn.execute_batch(&format!(
                "
                CREATE TABLE IF NOT EXISTS workspaces (
                    name TEXT PRIMARY KEY
                );

                CREATE TABLE IF NOT EXISTS nodes (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    workspace TEXT NOT NULL,
                    path TEXT NOT NULL,
                    parent TEXT,
                    UNIQUE (workspace, path)
                );

                CREATE TABLE IF NOT EXISTS properties (
                    workspace TEXT NOT NULL,
                    node TEXT NOT NULL,
                    name TEXT NOT NULL,
                    record TEXT NOT NULL,
                    ref_key TEXT,
                    PRIMARY KEY (workspace, node, name)
                );

                CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(workspace, parent);
                CREATE INDEX IF NOT EXISTS idx_properties_ref ON properties(workspace, ref_key);

                PRAGMA user_version = {};
                ",
                SCHEMA_VERSION
            ))
            .map_err(|e| fail("", "", e))?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::poisoned("sqlite connection"))
    }

    fn check_workspace(conn: &Connection, workspace: &str) -> Result<()> {
        let known: Option<String> = conn
            .query_row(
                "SELECT name FROM workspaces WHERE name = ?1",
                params![workspace],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| fail(workspace, "/", e))?;
        match known {
            Some(_) => Ok(()),
            None => Err(fail(workspace, "/", "unknown workspace")),
        }
    }

    fn node_exists_in(conn: &Connection, workspace: &str, path: &Path) -> Result<bool> {
        Self::check_workspace(conn, workspace)?;
        conn.query_row(
            "SELECT 1 FROM nodes WHERE workspace = ?1 AND path = ?2",
            params![workspace, path.to_string()],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
        .map_err(|e| fail(workspace, path, e))
    }

    fn require_node(conn: &Connection, workspace: &str, path: &Path) -> Result<()> {
        if !Self::node_exists_in(conn, workspace, path)? {
            return Err(StoreError::PathNotFound(path.to_string()));
        }
        Ok(())
    }

    fn check_destination(conn: &Connection, workspace: &str, to: &Path) -> Result<Path> {
        let parent = to
            .parent()
            .ok_or_else(|| StoreError::ItemExists(to.to_string()))?;
        Self::require_node(conn, workspace, &parent)?;
        if Self::node_exists_in(conn, workspace, to)? {
            return Err(StoreError::ItemExists(to.to_string()));
        }
        Ok(parent)
    }

    /// Rows of the subtree at `from`, as (seq, path, parent)
    fn subtree_rows(
        tx: &Transaction<'_>,
        workspace: &str,
        from: &Path,
    ) -> Result<Vec<(i64, String, Option<String>)>> {
        let sql = format!(
            "SELECT seq, path, parent FROM nodes WHERE workspace = ?1 AND {} ORDER BY seq",
            subtree_clause("path")
        );
        let mut stmt = tx.prepare(&sql).map_err(|e| fail(workspace, from, e))?;
        let rows = stmt
            .query_map(
                params![workspace, from.to_string(), descendant_prefix(from)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(|e| fail(workspace, from, e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| fail(workspace, from, e))?;
        Ok(rows)
    }

    /// Property rows of the subtree at `from`, as (node, name, record, ref_key)
    #[allow(clippy::type_complexity)]
    fn subtree_properties(
        tx: &Transaction<'_>,
        workspace: &str,
        from: &Path,
    ) -> Result<Vec<(String, String, String, Option<String>)>> {
        let sql = format!(
            "SELECT node, name, record, ref_key FROM properties WHERE workspace = ?1 AND {}",
            subtree_clause("node")
        );
        let mut stmt = tx.prepare(&sql).map_err(|e| fail(workspace, from, e))?;
        let rows = stmt
            .query_map(
                params![workspace, from.to_string(), descendant_prefix(from)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .map_err(|e| fail(workspace, from, e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| fail(workspace, from, e))?;
        Ok(rows)
    }
}

impl StorageProvider for SqliteProvider {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn workspaces(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT name FROM workspaces ORDER BY name")
            .map_err(|e| fail("", "/", e))?;
        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| fail("", "/", e))?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(|e| fail("", "/", e))?;
        Ok(names)
    }

    fn create_workspace(&self, workspace: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO workspaces (name) VALUES (?1)",
            params![workspace],
        )
        .and_then(|_| {
            conn.execute(
                "INSERT OR IGNORE INTO nodes (workspace, path, parent) VALUES (?1, '/', NULL)",
                params![workspace],
            )
        })
        .map_err(|e| fail(workspace, "/", e))?;
        debug!(workspace, "ensured workspace");
        Ok(())
    }

    fn node_exists(&self, workspace: &str, path: &Path) -> Result<bool> {
        let conn = self.conn()?;
        Self::node_exists_in(&conn, workspace, path)
    }

    fn property_exists(&self, workspace: &str, path: &Path) -> Result<bool> {
        let (Some(node), Some(name)) = (path.parent(), path.name()) else {
            return Ok(false);
        };
        let conn = self.conn()?;
        Self::check_workspace(&conn, workspace)?;
        conn.query_row(
            "SELECT 1 FROM properties WHERE workspace = ?1 AND node = ?2 AND name = ?3",
            params![workspace, node.to_string(), name.to_string()],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
        .map_err(|e| fail(workspace, path, e))
    }

    fn list_children(&self, workspace: &str, path: &Path) -> Result<Vec<Path>> {
        let conn = self.conn()?;
        Self::require_node(&conn, workspace, path)?;
        let mut stmt = conn
            .prepare("SELECT path FROM nodes WHERE workspace = ?1 AND parent = ?2 ORDER BY seq")
            .map_err(|e| fail(workspace, path, e))?;
        let raw = stmt
            .query_map(params![workspace, path.to_string()], |row| row.get::<_, String>(0))
            .map_err(|e| fail(workspace, path, e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| fail(workspace, path, e))?;
        raw.iter().map(|r| parse_path(workspace, r)).collect()
    }

    fn list_properties(&self, workspace: &str, path: &Path) -> Result<Vec<QualifiedName>> {
        let conn = self.conn()?;
        Self::require_node(&conn, workspace, path)?;
        let mut stmt = conn
            .prepare("SELECT name FROM properties WHERE workspace = ?1 AND node = ?2 ORDER BY name")
            .map_err(|e| fail(workspace, path, e))?;
        let raw = stmt
            .query_map(params![workspace, path.to_string()], |row| row.get::<_, String>(0))
            .map_err(|e| fail(workspace, path, e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| fail(workspace, path, e))?;
        raw.iter()
            .map(|r| r.parse::<QualifiedName>().map_err(|e| fail(workspace, path, e)))
            .collect()
    }

    fn get_property(&self, workspace: &str, path: &Path) -> Result<PropertyRecord> {
        let (Some(node), Some(name)) = (path.parent(), path.name()) else {
            return Err(StoreError::PathNotFound(path.to_string()));
        };
        let conn = self.conn()?;
        Self::check_workspace(&conn, workspace)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT record FROM properties WHERE workspace = ?1 AND node = ?2 AND name = ?3",
                params![workspace, node.to_string(), name.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| fail(workspace, path, e))?;
        let raw = raw.ok_or_else(|| StoreError::PathNotFound(path.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| fail(workspace, path, e))
    }

    fn add_node(&self, workspace: &str, path: &Path) -> Result<()> {
        let conn = self.conn()?;
        let parent = Self::check_destination(&conn, workspace, path)?;
        conn.execute(
            "INSERT INTO nodes (workspace, path, parent) VALUES (?1, ?2, ?3)",
            params![workspace, path.to_string(), parent.to_string()],
        )
        .map(|_| ())
        .map_err(|e| fail(workspace, path, e))
    }

    fn put_property(&self, workspace: &str, path: &Path, record: &PropertyRecord) -> Result<()> {
        record.validate()?;
        let (Some(node), Some(name)) = (path.parent(), path.name()) else {
            return Err(StoreError::PathNotFound(path.to_string()));
        };
        let conn = self.conn()?;
        Self::require_node(&conn, workspace, &node)?;
        let json = serde_json::to_string(record).map_err(|e| fail(workspace, path, e))?;
        let ref_key = (name == &QualifiedName::uuid())
            .then(|| record.value().and_then(|v| v.as_str()).map(str::to_string))
            .flatten();
        conn.execute(
            "INSERT INTO properties (workspace, node, name, record, ref_key)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (workspace, node, name)
             DO UPDATE SET record = excluded.record, ref_key = excluded.ref_key",
            params![workspace, node.to_string(), name.to_string(), json, ref_key],
        )
        .map(|_| ())
        .map_err(|e| fail(workspace, path, e))
    }

    fn remove(&self, workspace: &str, path: &Path) -> Result<()> {
        if path.is_root() {
            return Err(StoreError::ConstraintViolation(
                "the root node cannot be removed".to_string(),
            ));
        }
        let mut conn = self.conn()?;
        if Self::node_exists_in(&conn, workspace, path)? {
            let tx = conn.transaction().map_err(|e| fail(workspace, path, e))?;
            let prefix = descendant_prefix(path);
            tx.execute(
                &format!(
                    "DELETE FROM nodes WHERE workspace = ?1 AND {}",
                    subtree_clause("path")
                ),
                params![workspace, path.to_string(), prefix],
            )
            .and_then(|_| {
                tx.execute(
                    &format!(
                        "DELETE FROM properties WHERE workspace = ?1 AND {}",
                        subtree_clause("node")
                    ),
                    params![workspace, path.to_string(), prefix],
                )
            })
            .map_err(|e| fail(workspace, path, e))?;
            return tx.commit().map_err(|e| fail(workspace, path, e));
        }

        let (Some(node), Some(name)) = (path.parent(), path.name()) else {
            return Err(StoreError::PathNotFound(path.to_string()));
        };
        let deleted = conn
            .execute(
                "DELETE FROM properties WHERE workspace = ?1 AND node = ?2 AND name = ?3",
                params![workspace, node.to_string(), name.to_string()],
            )
            .map_err(|e| fail(workspace, path, e))?;
        if deleted == 0 {
            return Err(StoreError::PathNotFound(path.to_string()));
        }
        Ok(())
    }

    fn copy(&self, workspace: &str, from: &Path, to: &Path) -> Result<()> {
        check_transfer(from, to)?;
        let mut conn = self.conn()?;
        Self::require_node(&conn, workspace, from)?;
        Self::check_destination(&conn, workspace, to)?;

        let tx = conn.transaction().map_err(|e| fail(workspace, from, e))?;
        for (_, raw, parent) in Self::subtree_rows(&tx, workspace, from)? {
            let target = rebase_raw(workspace, &raw, from, to)?;
            let target_parent = match (raw == from.to_string(), parent) {
                (true, _) => to.parent().map(|p| p.to_string()),
                (false, Some(parent)) => Some(rebase_raw(workspace, &parent, from, to)?),
                (false, None) => None,
            };
            tx.execute(
                "INSERT INTO nodes (workspace, path, parent) VALUES (?1, ?2, ?3)",
                params![workspace, target, target_parent],
            )
            .map_err(|e| fail(workspace, to, e))?;
        }
        for (node, name, record, ref_key) in Self::subtree_properties(&tx, workspace, from)? {
            tx.execute(
                "INSERT INTO properties (workspace, node, name, record, ref_key)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    workspace,
                    rebase_raw(workspace, &node, from, to)?,
                    name,
                    record,
                    ref_key
                ],
            )
            .map_err(|e| fail(workspace, to, e))?;
        }
        tx.commit().map_err(|e| fail(workspace, to, e))
    }

    fn move_path(&self, workspace: &str, from: &Path, to: &Path) -> Result<()> {
        check_transfer(from, to)?;
        let mut conn = self.conn()?;
        Self::require_node(&conn, workspace, from)?;
        let to_parent = Self::check_destination(&conn, workspace, to)?;
        let in_place = keeps_position(from, to);

        let tx = conn.transaction().map_err(|e| fail(workspace, from, e))?;
        let rows = Self::subtree_rows(&tx, workspace, from)?;
        let properties = Self::subtree_properties(&tx, workspace, from)?;
        for (seq, raw, parent) in rows {
            let target = rebase_raw(workspace, &raw, from, to)?;
            let is_top = raw == from.to_string();
            let target_parent = match (is_top, parent) {
                (true, _) => Some(to_parent.to_string()),
                (false, Some(parent)) => Some(rebase_raw(workspace, &parent, from, to)?),
                (false, None) => None,
            };
            if is_top && !in_place {
                // Re-insert so the node sorts last among its new siblings
                tx.execute("DELETE FROM nodes WHERE seq = ?1", params![seq])
                    .and_then(|_| {
                        tx.execute(
                            "INSERT INTO nodes (workspace, path, parent) VALUES (?1, ?2, ?3)",
                            params![workspace, target, target_parent],
                        )
                    })
                    .map_err(|e| fail(workspace, to, e))?;
            } else {
                tx.execute(
                    "UPDATE nodes SET path = ?1, parent = ?2 WHERE seq = ?3",
                    params![target, target_parent, seq],
                )
                .map_err(|e| fail(workspace, to, e))?;
            }
        }
        for (node, name, _, _) in properties {
            tx.execute(
                "UPDATE properties SET node = ?1 WHERE workspace = ?2 AND node = ?3 AND name = ?4",
                params![rebase_raw(workspace, &node, from, to)?, workspace, node, name],
            )
            .map_err(|e| fail(workspace, to, e))?;
        }
        tx.commit().map_err(|e| fail(workspace, to, e))
    }

    /// Indexed lookup on the extracted reference key
    fn find_by_reference(&self, workspace: &str, key: &str) -> Result<Option<Path>> {
        let conn = self.conn()?;
        Self::check_workspace(&conn, workspace)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT node FROM properties WHERE workspace = ?1 AND ref_key = ?2",
                params![workspace, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| fail(workspace, "/", e))?;
        raw.map(|r| parse_path(workspace, &r)).transpose()
    }
}
