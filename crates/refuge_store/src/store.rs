use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use sea_orm::sea_query;
use sea_orm::sea_query::{
    Condition, Expr, LockType, MysqlQueryBuilder, PostgresQueryBuilder, Query,
    QueryStatementWriter, SelectStatement, SqliteQueryBuilder, Value as SeaValue,
};
use sea_orm::{
    AccessMode, ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection,
    DatabaseTransaction, IsolationLevel, QueryResult, Statement, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::db::*;
use crate::migration::Migrator;
use crate::{RefugeConfig, ValidationMode};
use refuge_core::{
    ActivationId, ActorId, AuditEntry, Id, NewAuditEntry, RefugeError, RefugeResult, Timestamp,
};

#[derive(Clone)]
pub struct RefugeStore {
    pub(crate) conn: DatabaseConnection,
    pub(crate) backend: DatabaseBackend,
    pub(crate) limits: RefugeLimits,
    validation_mode: ValidationMode,
    failpoints: HashSet<String>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct RefugeLimits {
    pub max_page_size: u64,
    pub max_payload_bytes: usize,
    pub max_links_per_cell: usize,
}

impl RefugeLimits {
    fn from_config(config: &RefugeConfig) -> Self {
        let defaults = crate::LimitsConfig::with_defaults();
        let limits = config.limits.clone().unwrap_or(defaults);
        Self {
            max_page_size: limits.max_page_size.unwrap_or(500),
            max_payload_bytes: limits.max_payload_bytes.unwrap_or(1_048_576),
            max_links_per_cell: limits.max_links_per_cell.unwrap_or(100),
        }
    }
}

impl RefugeStore {
    pub async fn connect(config: &RefugeConfig, base_dir: &Path) -> RefugeResult<Self> {
        let url = config.connection_url(base_dir)?;
        let mut options = ConnectOptions::new(url);
        if let Some(pool) = &config.pool {
            if let Some(max) = pool.max_connections {
                options.max_connections(max);
            }
            if let Some(min) = pool.min_connections {
                options.min_connections(min);
            }
            if let Some(timeout_ms) = pool.connect_timeout_ms {
                options.connect_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.acquire_timeout_ms {
                options.acquire_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.idle_timeout_ms {
                options.idle_timeout(Duration::from_millis(timeout_ms));
            }
        }
        let conn = Database::connect(options).await.map_err(RefugeError::from)?;
        let backend = conn.get_database_backend();
        let failpoints = config
            .failpoints
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect::<HashSet<_>>();
        let store = Self {
            conn,
            backend,
            limits: RefugeLimits::from_config(config),
            validation_mode: config.validation_mode.unwrap_or(ValidationMode::Error),
            failpoints,
        };
        Migrator::up(&store.conn, None)
            .await
            .map_err(RefugeError::from)?;
        log::debug!("refuge store connected backend={}", config.backend_name());
        Ok(store)
    }

    pub async fn connect_sqlite(path: &Path) -> RefugeResult<Self> {
        let config = RefugeConfig::default_sqlite(path.to_string_lossy());
        Self::connect(&config, path.parent().unwrap_or_else(|| Path::new("."))).await
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub(crate) fn validation_failure(&self, message: impl Into<String>) -> RefugeResult<()> {
        let message = message.into();
        match self.validation_mode {
            ValidationMode::Error => Err(RefugeError::validation(message)),
            ValidationMode::Warn => {
                log::warn!("refuge validation warning: {message}");
                Ok(())
            }
            ValidationMode::Off => Ok(()),
        }
    }

    /// Requested page size, defaulted to and capped by `max_page_size`.
    pub(crate) fn page_limit(&self, requested: Option<u64>) -> u64 {
        Ord::min(
            requested.unwrap_or(self.limits.max_page_size),
            self.limits.max_page_size,
        )
    }

    pub(crate) fn maybe_failpoint(&self, key: &str) -> RefugeResult<()> {
        if self.failpoints.contains(key) {
            Err(RefugeError::storage(format!("failpoint {key}")))
        } else {
            Ok(())
        }
    }

    /// Appends an audit row on `conn`, normally the caller's open transaction.
    pub(crate) async fn insert_audit<C: ConnectionTrait>(
        &self,
        conn: &C,
        entry: NewAuditEntry,
    ) -> RefugeResult<AuditEntry> {
        let id = Id::new();
        let created_at = Timestamp::now();
        let insert = Query::insert()
            .into_table(RefugeAuditLog::Table)
            .columns([
                RefugeAuditLog::Id,
                RefugeAuditLog::ActivationId,
                RefugeAuditLog::ActorId,
                RefugeAuditLog::Action,
                RefugeAuditLog::EntityType,
                RefugeAuditLog::EntityId,
                RefugeAuditLog::CreatedAt,
                RefugeAuditLog::BeforeJson,
                RefugeAuditLog::AfterJson,
            ])
            .values_panic([
                id_value(self.backend, id).into(),
                opt_id_value(self.backend, entry.activation_id.map(|value| value.0)).into(),
                entry.actor.0.into(),
                entry.action.as_str().into(),
                entry.entity_type.as_str().into(),
                id_value(self.backend, entry.entity_id).into(),
                created_at.as_micros().into(),
                opt_json_text(entry.before.as_ref())?.into(),
                opt_json_text(entry.after.as_ref())?.into(),
            ])
            .to_owned();
        exec(conn, &insert).await?;
        Ok(AuditEntry {
            id,
            activation_id: entry.activation_id,
            actor: entry.actor,
            action: entry.action,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            created_at,
            before: entry.before,
            after: entry.after,
        })
    }

    pub(crate) fn lock_for_update(&self, select: &mut SelectStatement) {
        if self.backend != DatabaseBackend::Sqlite {
            select.lock(LockType::Update);
        }
    }

    /// Read-only transaction whose reads all see one committed state.
    /// SQLite pins its read snapshot at the first statement of a plain transaction.
    pub(crate) async fn begin_read(&self) -> RefugeResult<DatabaseTransaction> {
        let tx = if self.backend == DatabaseBackend::Sqlite {
            self.conn.begin().await?
        } else {
            self.conn
                .begin_with_config(
                    Some(IsolationLevel::RepeatableRead),
                    Some(AccessMode::ReadOnly),
                )
                .await?
        };
        Ok(tx)
    }

    /// Records whose stored payload holds `key`, evaluated by the database.
    pub(crate) fn payload_has_key(&self, key: &str) -> Condition {
        let column = col_name(RefugeRecords::PayloadJson);
        let path = format!("$.\"{key}\"");
        let expr = match self.backend {
            DatabaseBackend::Postgres => Expr::cust_with_values(
                format!("jsonb_exists(CAST({column} AS jsonb), ?)"),
                [key.to_string()],
            ),
            DatabaseBackend::MySql => Expr::cust_with_values(
                format!("JSON_CONTAINS_PATH({column}, 'one', ?) = 1"),
                [path],
            ),
            _ => Expr::cust_with_values(format!("json_type({column}, ?) IS NOT NULL"), [path]),
        };
        Condition::all().add(expr)
    }
}

/// Stored form of option values: trimmed, NFC, lower-cased.
pub(crate) fn normalize_option_value(value: &str) -> String {
    value.trim().nfc().collect::<String>().to_lowercase()
}

pub(crate) fn audit_image<T: Serialize>(value: &T) -> RefugeResult<Option<serde_json::Value>> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|err| RefugeError::storage(format!("encode audit image: {err}")))
}

pub(crate) fn json_text<T: Serialize + ?Sized>(value: &T) -> RefugeResult<String> {
    serde_json::to_string(value).map_err(|err| RefugeError::storage(format!("encode json: {err}")))
}

pub(crate) fn opt_json_text<T: Serialize>(value: Option<&T>) -> RefugeResult<Option<String>> {
    value.map(json_text).transpose()
}

pub(crate) fn read_json<T: DeserializeOwned>(
    row: &QueryResult,
    column: impl sea_query::Iden,
) -> RefugeResult<T> {
    let name = col_name(column);
    let raw: String = row.try_get("", &name)?;
    serde_json::from_str(&raw)
        .map_err(|err| RefugeError::storage(format!("decode {name}: {err}")))
}

pub(crate) fn read_opt_json<T: DeserializeOwned>(
    row: &QueryResult,
    column: impl sea_query::Iden,
) -> RefugeResult<Option<T>> {
    let name = col_name(column);
    let raw: Option<String> = row.try_get("", &name)?;
    raw.map(|raw| {
        serde_json::from_str(&raw)
            .map_err(|err| RefugeError::storage(format!("decode {name}: {err}")))
    })
    .transpose()
}

pub(crate) fn read_actor(row: &QueryResult, column: impl sea_query::Iden) -> RefugeResult<ActorId> {
    let value: i64 = row.try_get("", &col_name(column))?;
    Ok(ActorId(value))
}

pub(crate) fn read_opt_actor(
    row: &QueryResult,
    column: impl sea_query::Iden,
) -> RefugeResult<Option<ActorId>> {
    let value: Option<i64> = row.try_get("", &col_name(column))?;
    Ok(value.map(ActorId))
}

pub(crate) fn read_timestamp(
    row: &QueryResult,
    column: impl sea_query::Iden,
) -> RefugeResult<Timestamp> {
    let value: i64 = row.try_get("", &col_name(column))?;
    Ok(Timestamp::from_micros(value))
}

pub(crate) fn read_opt_activation(
    row: &QueryResult,
    column: impl sea_query::Iden,
) -> RefugeResult<Option<ActivationId>> {
    Ok(read_opt_id(row, column)?.map(ActivationId))
}

/// Reads a `COUNT(..)` selected as `count`.
pub(crate) async fn count_rows<C: ConnectionTrait>(
    conn: &C,
    select: &SelectStatement,
) -> RefugeResult<u64> {
    let row = query_one(conn, select).await?;
    let count = match row {
        Some(row) => row.try_get::<i64>("", "count")?,
        None => 0,
    };
    Ok(count.max(0) as u64)
}

/// One past a `MAX(position)` selected as `max_position`.
pub(crate) async fn next_position<C: ConnectionTrait>(
    conn: &C,
    select: &SelectStatement,
) -> RefugeResult<i32> {
    let row = query_one(conn, select).await?;
    let max = match row {
        Some(row) => row.try_get::<Option<i32>>("", "max_position")?,
        None => None,
    };
    Ok(max.unwrap_or(0) + 1)
}

pub(crate) fn id_value(backend: DatabaseBackend, id: Id) -> SeaValue {
    match backend {
        DatabaseBackend::Postgres => SeaValue::Uuid(Some(id.as_uuid())),
        DatabaseBackend::MySql => SeaValue::Bytes(Some(id.as_vec())),
        DatabaseBackend::Sqlite => SeaValue::String(Some(id.to_uuid_string())),
        _ => SeaValue::String(Some(id.to_uuid_string())),
    }
}

pub(crate) fn none_id_value(backend: DatabaseBackend) -> SeaValue {
    match backend {
        DatabaseBackend::Postgres => SeaValue::Uuid(None),
        DatabaseBackend::MySql => SeaValue::Bytes(None),
        DatabaseBackend::Sqlite => SeaValue::String(None),
        _ => SeaValue::String(None),
    }
}

pub(crate) fn opt_id_value(backend: DatabaseBackend, id: Option<Id>) -> SeaValue {
    match id {
        Some(id) => id_value(backend, id),
        None => none_id_value(backend),
    }
}

pub(crate) fn id_values(backend: DatabaseBackend, ids: &[Id]) -> Vec<SeaValue> {
    ids.iter().map(|id| id_value(backend, *id)).collect()
}

fn bytes_to_id(bytes: Vec<u8>) -> Option<Id> {
    if bytes.len() == 16 {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&bytes);
        Some(Id::from_bytes(buf))
    } else {
        None
    }
}

pub(crate) fn read_id(row: &QueryResult, column: impl sea_query::Iden) -> RefugeResult<Id> {
    let name = col_name(column);
    if let Ok(value) = row.try_get::<String>("", &name) {
        return Id::from_uuid_str(&value);
    }
    if let Ok(value) = row.try_get::<Uuid>("", &name) {
        return Ok(Id::from_bytes(*value.as_bytes()));
    }
    if let Ok(value) = row.try_get::<Vec<u8>>("", &name) {
        return bytes_to_id(value).ok_or_else(|| RefugeError::storage("invalid id length"));
    }
    Err(RefugeError::storage("unsupported id format"))
}

pub(crate) fn read_opt_id(
    row: &QueryResult,
    column: impl sea_query::Iden,
) -> RefugeResult<Option<Id>> {
    let name = col_name(column);
    if let Ok(value) = row.try_get::<Option<String>>("", &name) {
        return value.map(|value| Id::from_uuid_str(&value)).transpose();
    }
    if let Ok(value) = row.try_get::<Option<Uuid>>("", &name) {
        return Ok(value.map(|value| Id::from_bytes(*value.as_bytes())));
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>>("", &name) {
        return Ok(value.and_then(bytes_to_id));
    }
    Ok(None)
}

pub(crate) fn col_name(column: impl sea_query::Iden) -> String {
    column.to_string()
}

fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm::sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

pub(crate) async fn exec<C, S>(conn: &C, stmt: &S) -> RefugeResult<()>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    exec_count(conn, stmt).await.map(|_| ())
}

/// Executes `stmt` and returns the number of rows it touched.
pub(crate) async fn exec_count<C, S>(conn: &C, stmt: &S) -> RefugeResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let result = conn
        .execute_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn query_all<C, S>(conn: &C, stmt: &S) -> RefugeResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let rows = conn
        .query_all_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

pub(crate) async fn query_one<C, S>(conn: &C, stmt: &S) -> RefugeResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let row = conn
        .query_one_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::normalize_option_value;

    #[test]
    fn option_values_are_normalized() {
        assert_eq!(normalize_option_value("  Departed "), "departed");
        assert_eq!(normalize_option_value("Cafe\u{301}"), "caf\u{e9}");
    }
}
