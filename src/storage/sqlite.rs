//! SQLite backend on `sqlx`.
//!
//! Objects and tombstones share the `objects` table. Each write runs in one
//! transaction covering timestamp allocation, the expected-version check and
//! the mutation. A failed check drops the transaction, so the clocks only
//! advance for committed writes.

use crate::{
    models::{
        epoch::Epoch,
        object::Object,
        path::ResourcePath,
        permissions::{Ace, Permissions},
    },
    storage::{Backend, StorageError, StorageResult},
};
use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{Map, Value};
use sqlx::{
    FromRow, QueryBuilder, Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{collections::BTreeSet, str::FromStr, sync::Arc};
use tracing::debug;

/// Schema applied on connect and by `--migrate`.
pub const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, FromRow)]
struct ObjectRow {
    id: String,
    last_modified: i64,
    deleted: bool,
    data: String,
}

impl ObjectRow {
    fn into_object(self) -> StorageResult<Object> {
        let data: Map<String, Value> = serde_json::from_str(&self.data)?;
        Ok(Object {
            id: self.id,
            last_modified: Epoch(self.last_modified),
            deleted: self.deleted,
            data,
        })
    }
}

#[derive(Clone)]
pub struct SqliteBackend {
    /// Shared connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteBackend {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open a pool for `url`, creating the database file and schema as needed.
    ///
    /// In-memory databases get a single long-lived connection, since every
    /// SQLite connection to `:memory:` sees its own database.
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let mut pool = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            pool = pool.idle_timeout(None).max_lifetime(None);
        }
        let backend = Self::new(Arc::new(pool.connect_with(options).await?));
        run_schema(&backend.db).await?;
        Ok(backend)
    }
}

/// Execute each statement of [`SCHEMA`]; returns how many ran.
pub async fn run_schema(db: &SqlitePool) -> Result<usize, sqlx::Error> {
    let statements: Vec<&str> = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    for stmt in &statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(statements.len())
}

/// Allocate the next timestamp for `path`: above the scope clock and the
/// namespace's last write.
async fn next_timestamp(tx: &mut Transaction<'_, Sqlite>, path: &ResourcePath) -> StorageResult<Epoch> {
    let issued: i64 = sqlx::query_scalar(
        "INSERT INTO clocks (scope, last_issued) VALUES (?, ?)
         ON CONFLICT(scope) DO UPDATE SET
             last_issued = MAX(excluded.last_issued, clocks.last_issued + 1)
         RETURNING last_issued",
    )
    .bind(path.scope())
    .bind(Epoch::now().millis())
    .fetch_one(&mut **tx)
    .await?;

    let namespace_last: Option<i64> =
        sqlx::query_scalar("SELECT last_modified FROM mod_times WHERE namespace = ?")
            .bind(path.namespace())
            .fetch_optional(&mut **tx)
            .await?;

    let ts = match namespace_last {
        Some(last) if last >= issued => {
            sqlx::query("UPDATE clocks SET last_issued = ? WHERE scope = ?")
                .bind(last + 1)
                .bind(path.scope())
                .execute(&mut **tx)
                .await?;
            last + 1
        }
        _ => issued,
    };

    sqlx::query(
        "INSERT INTO mod_times (namespace, last_modified) VALUES (?, ?)
         ON CONFLICT(namespace) DO UPDATE SET last_modified = excluded.last_modified",
    )
    .bind(path.namespace())
    .bind(ts)
    .execute(&mut **tx)
    .await?;

    Ok(Epoch(ts))
}

async fn check_version(
    tx: &mut Transaction<'_, Sqlite>,
    path: &ResourcePath,
    expected: Epoch,
) -> StorageResult<()> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT last_modified FROM objects WHERE path = ? AND deleted = 0")
            .bind(path.as_str())
            .fetch_optional(&mut **tx)
            .await?;
    match found {
        None => Err(StorageError::NotFound(path.clone())),
        Some(found) if found != expected.millis() => Err(StorageError::Conflict {
            path: path.clone(),
            expected,
            found: Epoch(found),
        }),
        Some(_) => Ok(()),
    }
}

async fn bury(tx: &mut Transaction<'_, Sqlite>, path: &ResourcePath) -> StorageResult<Object> {
    let ts = next_timestamp(tx, path).await?;
    sqlx::query("UPDATE objects SET deleted = 1, last_modified = ?, data = '{}' WHERE path = ?")
        .bind(ts.millis())
        .bind(path.as_str())
        .execute(&mut **tx)
        .await?;
    Ok(Object::tombstone(path.object_id(), ts))
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn ping(&self) -> StorageResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }

    async fn mod_time(&self, node: &ResourcePath) -> StorageResult<Epoch> {
        let last: Option<i64> =
            sqlx::query_scalar("SELECT last_modified FROM mod_times WHERE namespace = ?")
                .bind(node.namespace())
                .fetch_optional(&*self.db)
                .await?;
        Ok(Epoch(last.unwrap_or_default()))
    }

    async fn exists(&self, path: &ResourcePath) -> StorageResult<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM objects WHERE path = ? AND deleted = 0")
                .bind(path.as_str())
                .fetch_optional(&*self.db)
                .await?;
        Ok(found.is_some())
    }

    async fn get(&self, path: &ResourcePath) -> StorageResult<Object> {
        sqlx::query_as::<_, ObjectRow>(
            "SELECT id, last_modified, deleted, data FROM objects WHERE path = ? AND deleted = 0",
        )
        .bind(path.as_str())
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::NotFound(path.clone()))?
        .into_object()
    }

    async fn list(&self, node: &ResourcePath, include_deleted: bool) -> StorageResult<Vec<Object>> {
        let sql = if include_deleted {
            "SELECT id, last_modified, deleted, data FROM objects WHERE namespace = ?"
        } else {
            "SELECT id, last_modified, deleted, data FROM objects WHERE namespace = ? AND deleted = 0"
        };
        sqlx::query_as::<_, ObjectRow>(sql)
            .bind(node.namespace())
            .fetch(&*self.db)
            .map_err(StorageError::from)
            .and_then(|row| async move { row.into_object() })
            .try_collect()
            .await
    }

    async fn create(&self, node: &ResourcePath, mut obj: Object) -> StorageResult<Object> {
        let path = node.with_object_id(&obj.id);
        let mut tx = self.db.begin().await?;
        let ts = next_timestamp(&mut tx, &path).await?;

        let live: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM objects WHERE path = ? AND deleted = 0")
                .bind(path.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        if live.is_some() {
            return Err(StorageError::AlreadyExists(path));
        }

        sqlx::query(
            "INSERT INTO objects (path, namespace, id, last_modified, deleted, data)
             VALUES (?, ?, ?, ?, 0, ?)
             ON CONFLICT(path) DO UPDATE SET
                 last_modified = excluded.last_modified,
                 deleted = 0,
                 data = excluded.data",
        )
        .bind(path.as_str())
        .bind(path.namespace())
        .bind(&obj.id)
        .bind(ts.millis())
        .bind(serde_json::to_string(&obj.data)?)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        obj.last_modified = ts;
        obj.deleted = false;
        Ok(obj)
    }

    async fn update(
        &self,
        path: &ResourcePath,
        mut obj: Object,
        expected: Epoch,
    ) -> StorageResult<Object> {
        let mut tx = self.db.begin().await?;
        let ts = next_timestamp(&mut tx, path).await?;
        check_version(&mut tx, path, expected).await?;

        sqlx::query("UPDATE objects SET last_modified = ?, data = ? WHERE path = ?")
            .bind(ts.millis())
            .bind(serde_json::to_string(&obj.data)?)
            .bind(path.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        obj.id = path.object_id().to_string();
        obj.last_modified = ts;
        obj.deleted = false;
        Ok(obj)
    }

    async fn delete(&self, path: &ResourcePath, expected: Epoch) -> StorageResult<Object> {
        let mut tx = self.db.begin().await?;
        check_version(&mut tx, path, expected).await?;

        let prefix = format!("{}/", path);
        let children: Vec<String> = sqlx::query_scalar(
            "SELECT path FROM objects WHERE substr(path, 1, length(?)) = ? AND deleted = 0",
        )
        .bind(&prefix)
        .bind(&prefix)
        .fetch_all(&mut *tx)
        .await?;
        for child in children.iter().filter_map(|raw| ResourcePath::parse(raw)) {
            bury(&mut tx, &child).await?;
        }
        let tomb = bury(&mut tx, path).await?;

        sqlx::query("DELETE FROM permissions WHERE path = ? OR substr(path, 1, length(?)) = ?")
            .bind(path.as_str())
            .bind(&prefix)
            .bind(&prefix)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM memberships WHERE principal = ? OR substr(principal, 1, length(?)) = ?",
        )
        .bind(path.as_str())
        .bind(&prefix)
        .bind(&prefix)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(tomb)
    }

    async fn permissions(&self, path: &ResourcePath) -> StorageResult<Permissions> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT perm, principal FROM permissions WHERE path = ?")
                .bind(path.as_str())
                .fetch_all(&*self.db)
                .await?;
        let mut perms = Permissions::new();
        for (perm, principal) in rows {
            perms.grant(&perm, &principal);
        }
        Ok(perms)
    }

    async fn set_permissions(&self, path: &ResourcePath, perms: &Permissions) -> StorageResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM permissions WHERE path = ?")
            .bind(path.as_str())
            .execute(&mut *tx)
            .await?;
        for (perm, principals) in perms.iter() {
            for principal in principals {
                sqlx::query("INSERT INTO permissions (path, perm, principal) VALUES (?, ?, ?)")
                    .bind(path.as_str())
                    .bind(perm)
                    .bind(principal)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn ace_principals(&self, aces: &[Ace]) -> StorageResult<BTreeSet<String>> {
        if aces.is_empty() {
            return Ok(BTreeSet::new());
        }
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT DISTINCT principal FROM permissions WHERE ");
        let mut clauses = builder.separated(" OR ");
        for ace in aces {
            clauses
                .push("(path = ")
                .push_bind_unseparated(ace.path.as_str())
                .push_unseparated(" AND perm = ")
                .push_bind_unseparated(ace.perm.as_str())
                .push_unseparated(")");
        }
        let rows: Vec<String> = builder
            .build_query_scalar::<String>()
            .fetch_all(&*self.db)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn accessible_ids(
        &self,
        node: &ResourcePath,
        principals: &[String],
        perms: &[&str],
    ) -> StorageResult<BTreeSet<String>> {
        if principals.is_empty() || perms.is_empty() {
            return Ok(BTreeSet::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT DISTINCT o.id FROM objects o JOIN permissions p ON p.path = o.path
             WHERE o.deleted = 0 AND o.namespace = ",
        );
        builder.push_bind(node.namespace());
        builder.push(" AND p.perm IN (");
        let mut list = builder.separated(", ");
        for perm in perms {
            list.push_bind(*perm);
        }
        list.push_unseparated(") AND p.principal IN (");
        let mut list = builder.separated(", ");
        for principal in principals {
            list.push_bind(principal.as_str());
        }
        list.push_unseparated(")");

        let rows: Vec<String> = builder
            .build_query_scalar::<String>()
            .fetch_all(&*self.db)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn memberships(&self, members: &[String]) -> StorageResult<BTreeSet<String>> {
        if members.is_empty() {
            return Ok(BTreeSet::new());
        }
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT DISTINCT principal FROM memberships WHERE member IN (");
        let mut list = builder.separated(", ");
        for member in members {
            list.push_bind(member.as_str());
        }
        list.push_unseparated(")");

        let rows: Vec<String> = builder
            .build_query_scalar::<String>()
            .fetch_all(&*self.db)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn add_membership(&self, principal: &str, members: &[String]) -> StorageResult<()> {
        let mut tx = self.db.begin().await?;
        for member in members {
            sqlx::query("INSERT OR IGNORE INTO memberships (member, principal) VALUES (?, ?)")
                .bind(member)
                .bind(principal)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn remove_membership(&self, principal: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM memberships WHERE principal = ?")
            .bind(principal)
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}
