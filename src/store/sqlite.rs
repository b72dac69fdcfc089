//! SQLite-backed vector store
//!
//! Column layouts and index definitions live in two catalog tables. Vectors
//! are stored as little-endian f32 blobs. Without an approximate index a
//! nearest-neighbour query scans the table with squared L2 distance; once
//! one exists, only rows in the probed partitions (plus rows inserted since
//! the last optimize) are scanned, using the index's metric.

use super::{
    decode_vector, encode_vector, validate_identifier, ColumnDef, ColumnType, DistanceMetric,
    IndexInfo, IndexKind, IvfModel, Predicate, QueryHit, Row, TableSchema, Value, VectorQuery,
    VectorStore,
};
use crate::config::default_ivf_probes;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{ConnectOptions, Connection, Row as _, Sqlite};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Catalog of user tables and their indexes
const CATALOG_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kb_columns (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    column_type TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (table_name, column_name)
);

CREATE TABLE IF NOT EXISTS kb_indexes (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    kind TEXT NOT NULL,
    params_json TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (table_name, column_name)
);
"#;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Vector store in a single SQLite file
///
/// Every operation opens its own connection and closes it before returning.
#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    path: PathBuf,
    options: SqliteConnectOptions,
    probes: usize,
}

impl SqliteVectorStore {
    /// Open (creating if missing) the store at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .disable_statement_logging();

        debug!("Opening vector store at {:?}", path);

        let store = Self {
            path: path.to_path_buf(),
            options,
            probes: default_ivf_probes(),
        };

        let mut conn = store.connect().await?;
        let result = sqlx::query(CATALOG_SQL)
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(Error::from);
        release(conn).await;
        result?;

        Ok(store)
    }

    /// Partitions scanned per approximate query
    pub fn with_probes(mut self, probes: usize) -> Self {
        self.probes = probes.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> Result<SqliteConnection> {
        Ok(self.options.connect().await?)
    }
}

async fn release(conn: SqliteConnection) {
    if let Err(e) = conn.close().await {
        warn!("Failed to close store connection: {}", e);
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn table_names(&self) -> Result<Vec<String>> {
        let mut conn = self.connect().await?;
        let result = sqlx::query_as::<_, (String,)>(
            "SELECT DISTINCT table_name FROM kb_columns ORDER BY table_name",
        )
        .fetch_all(&mut conn)
        .await
        .map(|rows| rows.into_iter().map(|(name,)| name).collect())
        .map_err(Error::from);
        release(conn).await;
        result
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let mut conn = self.connect().await?;
        let result = load_schema(&mut conn, table).await.map(|s| s.is_some());
        release(conn).await;
        result
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()> {
        let mut conn = self.connect().await?;
        let result = create_table(&mut conn, table, schema).await;
        release(conn).await;
        result
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        let mut conn = self.connect().await?;
        let result = drop_table(&mut conn, table).await;
        release(conn).await;
        result
    }

    async fn create_index(
        &self,
        table: &str,
        column: &str,
        kind: IndexKind,
        replace: bool,
    ) -> Result<()> {
        let mut conn = self.connect().await?;
        let result = create_index(&mut conn, table, column, kind, replace).await;
        release(conn).await;
        result
    }

    async fn drop_index(&self, table: &str, column: &str) -> Result<()> {
        let mut conn = self.connect().await?;
        let result = drop_index(&mut conn, table, column).await;
        release(conn).await;
        result
    }

    async fn list_indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        let mut conn = self.connect().await?;
        let result = list_indexes(&mut conn, table).await;
        release(conn).await;
        result
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<()> {
        let mut conn = self.connect().await?;
        let result = insert_rows(&mut conn, table, &rows).await;
        release(conn).await;
        result
    }

    async fn update(&self, table: &str, filter: &Predicate, values: Row) -> Result<u64> {
        let mut conn = self.connect().await?;
        let result = update_rows(&mut conn, table, filter, &values).await;
        release(conn).await;
        result
    }

    async fn delete(&self, table: &str, filter: &Predicate) -> Result<u64> {
        let mut conn = self.connect().await?;
        let result = delete_rows(&mut conn, table, filter).await;
        release(conn).await;
        result
    }

    async fn query(&self, table: &str, query: &VectorQuery) -> Result<Vec<QueryHit>> {
        let mut conn = self.connect().await?;
        let result = query_rows(&mut conn, table, query, self.probes).await;
        release(conn).await;
        result
    }

    async fn count(&self, table: &str, filter: Option<&Predicate>) -> Result<usize> {
        let mut conn = self.connect().await?;
        let result = count_rows(&mut conn, table, filter).await;
        release(conn).await;
        result
    }

    async fn optimize(&self, table: &str) -> Result<()> {
        let mut conn = self.connect().await?;
        let result = optimize_table(&mut conn, table).await;
        release(conn).await;
        result
    }
}

// ===== Catalog Operations =====

async fn load_schema(conn: &mut SqliteConnection, table: &str) -> Result<Option<TableSchema>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT column_name, column_type FROM kb_columns WHERE table_name = ? ORDER BY position",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;

    if rows.is_empty() {
        return Ok(None);
    }

    let mut schema = TableSchema::new();
    for (name, column_type) in rows {
        schema = schema.column(&name, column_type.parse()?);
    }
    Ok(Some(schema))
}

async fn require_schema(conn: &mut SqliteConnection, table: &str) -> Result<TableSchema> {
    load_schema(conn, table)
        .await?
        .ok_or_else(|| Error::TableNotFound(table.to_string()))
}

async fn list_indexes(conn: &mut SqliteConnection, table: &str) -> Result<Vec<IndexInfo>> {
    let rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT column_name, kind, created_at FROM kb_indexes WHERE table_name = ? ORDER BY column_name",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|(column, kind, created_at)| {
            Ok(IndexInfo {
                column,
                kind: kind.parse()?,
                created_at,
            })
        })
        .collect()
}

async fn load_index(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> Result<Option<(IndexKind, Option<String>)>> {
    let row: Option<(String, Option<String>)> = sqlx::query_as(
        "SELECT kind, params_json FROM kb_indexes WHERE table_name = ? AND column_name = ?",
    )
    .bind(table)
    .bind(column)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|(kind, params)| Ok((kind.parse()?, params)))
        .transpose()
}

async fn load_ivf(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> Result<Option<IvfModel>> {
    match load_index(conn, table, column).await? {
        Some((IndexKind::Approximate(_), Some(params))) => Ok(Some(serde_json::from_str(&params)?)),
        _ => Ok(None),
    }
}

fn ivf_table(table: &str, column: &str) -> String {
    format!("{}__ivf_{}", table, column)
}

fn fts_table(table: &str, column: &str) -> String {
    format!("{}__fts_{}", table, column)
}

fn btree_index(table: &str, column: &str) -> String {
    format!("{}__idx_{}", table, column)
}

/// Hidden lowercase copy of a text column, matched by `Contains`
///
/// SQLite's `lower()` only folds ASCII, so the Unicode fold is computed here
/// on every write.
fn fold_column(column: &str) -> String {
    format!("{}__fold", column)
}

fn fold_value(value: &Value) -> Value {
    match value {
        Value::Text(s) => Value::Text(s.to_lowercase()),
        _ => Value::Null,
    }
}

fn sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Text | ColumnType::List => "TEXT",
        ColumnType::Integer => "INTEGER",
        ColumnType::Float => "REAL",
        ColumnType::Vector(_) => "BLOB",
    }
}

// ===== Table Operations =====

async fn create_table(conn: &mut SqliteConnection, table: &str, schema: &TableSchema) -> Result<()> {
    validate_identifier(table)?;
    if table.contains("__") || table.starts_with("kb_") {
        return Err(Error::Store(format!("Reserved table name: {}", table)));
    }
    if schema.columns.is_empty() {
        return Err(Error::Store(format!("Table {} needs at least one column", table)));
    }
    for column in &schema.columns {
        validate_identifier(&column.name)?;
        if column.name.contains("__") {
            return Err(Error::Store(format!("Reserved column name: {}", column.name)));
        }
    }

    if load_schema(conn, table).await?.is_some() {
        return Ok(());
    }

    let mut columns: Vec<String> = schema
        .columns
        .iter()
        .map(|c| format!("\"{}\" {}", c.name, sql_type(c.column_type)))
        .collect();
    columns.extend(
        schema
            .columns
            .iter()
            .filter(|c| c.column_type == ColumnType::Text)
            .map(|c| format!("\"{}\" TEXT", fold_column(&c.name))),
    );

    let mut tx = conn.begin().await?;
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
        table,
        columns.join(", ")
    ))
    .execute(&mut *tx)
    .await?;

    for (position, column) in schema.columns.iter().enumerate() {
        sqlx::query(
            "INSERT INTO kb_columns (table_name, column_name, column_type, position) VALUES (?, ?, ?, ?)",
        )
        .bind(table)
        .bind(&column.name)
        .bind(column.column_type.to_string())
        .bind(position as i64)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    info!("Created table {}", table);
    Ok(())
}

async fn drop_table(conn: &mut SqliteConnection, table: &str) -> Result<()> {
    if load_schema(conn, table).await?.is_none() {
        return Ok(());
    }
    let indexes = list_indexes(conn, table).await?;

    let mut tx = conn.begin().await?;
    for index in &indexes {
        drop_index_objects(&mut tx, table, &index.column, index.kind).await?;
    }
    sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", table))
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM kb_indexes WHERE table_name = ?")
        .bind(table)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM kb_columns WHERE table_name = ?")
        .bind(table)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("Dropped table {}", table);
    Ok(())
}

// ===== Index Operations =====

async fn create_index(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    kind: IndexKind,
    replace: bool,
) -> Result<()> {
    let schema = require_schema(conn, table).await?;
    let column_type = schema.type_of(column)?;

    let supported = match kind {
        IndexKind::BTree | IndexKind::Bitmap => matches!(
            column_type,
            ColumnType::Text | ColumnType::Integer | ColumnType::Float
        ),
        IndexKind::LabelList => column_type == ColumnType::List,
        IndexKind::FullText => column_type == ColumnType::Text,
        IndexKind::Approximate(_) => matches!(column_type, ColumnType::Vector(_)),
    };
    if !supported {
        return Err(Error::Store(format!(
            "Index kind {} is not supported on {} column {}",
            kind, column_type, column
        )));
    }

    if let Some((existing, _)) = load_index(conn, table, column).await? {
        if !replace {
            debug!("Index on {}.{} already exists", table, column);
            return Ok(());
        }
        let mut tx = conn.begin().await?;
        drop_index_objects(&mut tx, table, column, existing).await?;
        tx.commit().await?;
    }

    let trained = match kind {
        IndexKind::Approximate(metric) => {
            let vectors = load_vectors(conn, table, column, false).await?;
            let points: Vec<Vec<f32>> = vectors.iter().map(|(_, v)| v.clone()).collect();
            let model = IvfModel::train(&points, metric).ok_or_else(|| {
                Error::Store(format!("Cannot train vector index on empty table {}", table))
            })?;
            Some((model, vectors))
        }
        _ => None,
    };

    let mut tx = conn.begin().await?;
    let params = match (kind, trained) {
        (IndexKind::FullText, _) => {
            let fts = fts_table(table, column);
            sqlx::query(&format!(
                "CREATE VIRTUAL TABLE \"{}\" USING fts5(body)",
                fts
            ))
            .execute(&mut *tx)
            .await?;
            sqlx::query(&format!(
                "INSERT INTO \"{}\" (rowid, body) SELECT rowid, \"{}\" FROM \"{}\" WHERE \"{}\" IS NOT NULL",
                fts, column, table, column
            ))
            .execute(&mut *tx)
            .await?;
            None
        }
        (IndexKind::Approximate(_), Some((model, vectors))) => {
            let ivf = ivf_table(table, column);
            sqlx::query(&format!(
                "CREATE TABLE \"{}\" (row_id INTEGER PRIMARY KEY, partition INTEGER NOT NULL)",
                ivf
            ))
            .execute(&mut *tx)
            .await?;
            assign_partitions(&mut tx, &ivf, &model, &vectors).await?;
            info!(
                "Trained {} partitions over {} vectors for {}.{}",
                model.partitions(),
                vectors.len(),
                table,
                column
            );
            Some(serde_json::to_string(&model)?)
        }
        _ => {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS \"{}\" ON \"{}\" (\"{}\")",
                btree_index(table, column),
                table,
                column
            ))
            .execute(&mut *tx)
            .await?;
            None
        }
    };

    sqlx::query(
        r#"
        INSERT OR REPLACE INTO kb_indexes (table_name, column_name, kind, params_json, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(table)
    .bind(column)
    .bind(kind.to_string())
    .bind(params)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    debug!("Created {} index on {}.{}", kind, table, column);
    Ok(())
}

async fn drop_index(conn: &mut SqliteConnection, table: &str, column: &str) -> Result<()> {
    let Some((kind, _)) = load_index(conn, table, column).await? else {
        return Ok(());
    };

    let mut tx = conn.begin().await?;
    drop_index_objects(&mut tx, table, column, kind).await?;
    sqlx::query("DELETE FROM kb_indexes WHERE table_name = ? AND column_name = ?")
        .bind(table)
        .bind(column)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Drop the physical objects behind an index, leaving the catalog entry
async fn drop_index_objects(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    kind: IndexKind,
) -> Result<()> {
    let sql = match kind {
        IndexKind::FullText => format!("DROP TABLE IF EXISTS \"{}\"", fts_table(table, column)),
        IndexKind::Approximate(_) => {
            format!("DROP TABLE IF EXISTS \"{}\"", ivf_table(table, column))
        }
        _ => format!("DROP INDEX IF EXISTS \"{}\"", btree_index(table, column)),
    };
    sqlx::query(&sql).execute(&mut *conn).await?;
    Ok(())
}

/// Load `(rowid, vector)` pairs; `unassigned_only` restricts to rows outside the partition table
async fn load_vectors(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    unassigned_only: bool,
) -> Result<Vec<(i64, Vec<f32>)>> {
    let mut sql = format!(
        "SELECT rowid, \"{}\" FROM \"{}\" WHERE \"{}\" IS NOT NULL",
        column, table, column
    );
    if unassigned_only {
        sql.push_str(&format!(
            " AND rowid NOT IN (SELECT row_id FROM \"{}\")",
            ivf_table(table, column)
        ));
    }

    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|row| -> Result<(i64, Vec<f32>)> {
            let rowid: i64 = row.try_get(0)?;
            let bytes: Vec<u8> = row.try_get(1)?;
            Ok((rowid, decode_vector(&bytes)))
        })
        .collect()
}

async fn assign_partitions(
    conn: &mut SqliteConnection,
    ivf: &str,
    model: &IvfModel,
    vectors: &[(i64, Vec<f32>)],
) -> Result<()> {
    let sql = format!(
        "INSERT OR REPLACE INTO \"{}\" (row_id, partition) VALUES (?, ?)",
        ivf
    );
    for (rowid, vector) in vectors {
        sqlx::query(&sql)
            .bind(rowid)
            .bind(model.assign(vector) as i64)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn optimize_table(conn: &mut SqliteConnection, table: &str) -> Result<()> {
    require_schema(conn, table).await?;

    for index in list_indexes(conn, table).await? {
        if !matches!(index.kind, IndexKind::Approximate(_)) {
            continue;
        }
        let Some(model) = load_ivf(conn, table, &index.column).await? else {
            continue;
        };
        let pending = load_vectors(conn, table, &index.column, true).await?;
        if pending.is_empty() {
            continue;
        }
        let mut tx = conn.begin().await?;
        assign_partitions(&mut tx, &ivf_table(table, &index.column), &model, &pending).await?;
        tx.commit().await?;
        debug!(
            "Assigned {} new rows to partitions of {}.{}",
            pending.len(),
            table,
            index.column
        );
    }

    sqlx::query("PRAGMA optimize").execute(&mut *conn).await?;
    sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// ===== Row Operations =====

fn check_value(column: &ColumnDef, value: &Value) -> Result<()> {
    let matches = match (column.column_type, value) {
        (_, Value::Null) => true,
        (ColumnType::Vector(dim), Value::Vector(v)) => {
            if v.len() != dim {
                return Err(Error::Store(format!(
                    "Vector dimension mismatch for column {}: expected {}, got {}",
                    column.name,
                    dim,
                    v.len()
                )));
            }
            true
        }
        (ColumnType::Text, Value::Text(_))
        | (ColumnType::Integer, Value::Integer(_))
        | (ColumnType::Float, Value::Float(_) | Value::Integer(_))
        | (ColumnType::List, Value::List(_)) => true,
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(Error::Store(format!(
            "Type mismatch for column {}: expected {}",
            column.name, column.column_type
        )))
    }
}

fn check_row(schema: &TableSchema, row: &Row) -> Result<()> {
    for (name, value) in row.columns() {
        let column = schema
            .get(name)
            .ok_or_else(|| Error::Store(format!("Unknown column: {}", name)))?;
        check_value(column, value)?;
    }
    Ok(())
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Integer(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Vector(v) => query.bind(encode_vector(v)),
        Value::List(labels) => query.bind(serde_json::to_string(labels).unwrap_or_default()),
    }
}

fn bind_all<'q>(sql: &'q str, params: &[Value]) -> SqliteQuery<'q> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

fn decode_column(row: &SqliteRow, column: &ColumnDef) -> Result<Value> {
    let name = column.name.as_str();
    let value = match column.column_type {
        ColumnType::Text => row.try_get::<Option<String>, _>(name)?.map(Value::Text),
        ColumnType::Integer => row.try_get::<Option<i64>, _>(name)?.map(Value::Integer),
        ColumnType::Float => row.try_get::<Option<f64>, _>(name)?.map(Value::Float),
        ColumnType::Vector(_) => row
            .try_get::<Option<Vec<u8>>, _>(name)?
            .map(|bytes| Value::Vector(decode_vector(&bytes))),
        ColumnType::List => row
            .try_get::<Option<String>, _>(name)?
            .map(|json| serde_json::from_str(&json).map(Value::List))
            .transpose()?,
    };
    Ok(value.unwrap_or(Value::Null))
}

fn decode_row(row: &SqliteRow, columns: &[&ColumnDef]) -> Result<Row> {
    let mut decoded = Row::new();
    for column in columns {
        decoded.set(&column.name, decode_column(row, column)?);
    }
    Ok(decoded)
}

/// Render a predicate as a SQL condition, appending its parameters
fn predicate_sql(
    schema: &TableSchema,
    table: &str,
    predicate: &Predicate,
    params: &mut Vec<Value>,
) -> Result<String> {
    let scalar = |column: &str| -> Result<()> {
        match schema.type_of(column)? {
            ColumnType::Text | ColumnType::Integer | ColumnType::Float => Ok(()),
            other => Err(Error::Store(format!(
                "Column {} of type {} cannot be compared",
                column, other
            ))),
        }
    };
    let typed = |column: &str, expected: ColumnType| -> Result<()> {
        let actual = schema.type_of(column)?;
        if actual == expected {
            Ok(())
        } else {
            Err(Error::Store(format!(
                "Column {} has type {}, expected {}",
                column, actual, expected
            )))
        }
    };

    let sql = match predicate {
        Predicate::Eq(column, Value::Null) => {
            schema.type_of(column)?;
            format!("\"{}\" IS NULL", column)
        }
        Predicate::Eq(column, value) => {
            scalar(column)?;
            params.push(value.clone());
            format!("\"{}\" = ?", column)
        }
        Predicate::In(column, values) => {
            scalar(column)?;
            if values.is_empty() {
                return Ok("0".to_string());
            }
            params.extend(values.iter().cloned());
            format!("\"{}\" IN ({})", column, vec!["?"; values.len()].join(", "))
        }
        Predicate::Contains(column, needle) => {
            typed(column, ColumnType::Text)?;
            params.push(Value::Text(needle.to_lowercase()));
            format!("instr(\"{}\", ?) > 0", fold_column(column))
        }
        Predicate::HasLabel(column, label) => {
            typed(column, ColumnType::List)?;
            params.push(Value::Text(label.clone()));
            format!(
                "EXISTS (SELECT 1 FROM json_each(\"{}\") WHERE json_each.value = ?)",
                column
            )
        }
        Predicate::Matches(column, terms) => {
            typed(column, ColumnType::Text)?;
            let fts = fts_table(table, column);
            params.push(Value::Text(terms.clone()));
            format!(
                "rowid IN (SELECT rowid FROM \"{}\" WHERE \"{}\" MATCH ?)",
                fts, fts
            )
        }
        Predicate::And(parts) | Predicate::Or(parts) if parts.is_empty() => {
            if matches!(predicate, Predicate::And(_)) {
                "1".to_string()
            } else {
                "0".to_string()
            }
        }
        Predicate::And(parts) => join_parts(schema, table, parts, " AND ", params)?,
        Predicate::Or(parts) => join_parts(schema, table, parts, " OR ", params)?,
        Predicate::Not(inner) => format!("NOT ({})", predicate_sql(schema, table, inner, params)?),
    };
    Ok(sql)
}

fn join_parts(
    schema: &TableSchema,
    table: &str,
    parts: &[Predicate],
    joiner: &str,
    params: &mut Vec<Value>,
) -> Result<String> {
    let rendered = parts
        .iter()
        .map(|p| predicate_sql(schema, table, p, params).map(|sql| format!("({})", sql)))
        .collect::<Result<Vec<_>>>()?;
    Ok(rendered.join(joiner))
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

async fn insert_rows(conn: &mut SqliteConnection, table: &str, rows: &[Row]) -> Result<()> {
    let schema = require_schema(conn, table).await?;
    if rows.is_empty() {
        return Ok(());
    }
    for row in rows {
        check_row(&schema, row)?;
    }

    let folded: Vec<&ColumnDef> = schema
        .columns
        .iter()
        .filter(|c| c.column_type == ColumnType::Text)
        .collect();
    let names: Vec<String> = schema
        .columns
        .iter()
        .map(|c| format!("\"{}\"", c.name))
        .chain(folded.iter().map(|c| format!("\"{}\"", fold_column(&c.name))))
        .collect();
    let sql = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        table,
        names.join(", "),
        vec!["?"; names.len()].join(", ")
    );

    let mut tx = conn.begin().await?;
    for row in rows {
        let mut values: Vec<Value> = schema
            .columns
            .iter()
            .map(|c| row.get(&c.name).cloned().unwrap_or(Value::Null))
            .collect();
        values.extend(
            folded
                .iter()
                .map(|c| row.get(&c.name).map(fold_value).unwrap_or(Value::Null)),
        );
        bind_all(&sql, &values).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    debug!("Inserted {} rows into {}", rows.len(), table);
    Ok(())
}

async fn update_rows(
    conn: &mut SqliteConnection,
    table: &str,
    filter: &Predicate,
    values: &Row,
) -> Result<u64> {
    let schema = require_schema(conn, table).await?;
    check_row(&schema, values)?;

    let mut assignments = Vec::new();
    let mut params = Vec::new();
    let mut touched_vectors = Vec::new();
    for (name, value) in values.columns() {
        assignments.push(format!("\"{}\" = ?", name));
        params.push(value.clone());
        match schema.type_of(name)? {
            ColumnType::Vector(_) => touched_vectors.push(name.clone()),
            ColumnType::Text => {
                assignments.push(format!("\"{}\" = ?", fold_column(name)));
                params.push(fold_value(value));
            }
            _ => {}
        }
    }
    if assignments.is_empty() {
        return Ok(0);
    }

    let mut filter_params = Vec::new();
    let condition = predicate_sql(&schema, table, filter, &mut filter_params)?;

    let mut tx = conn.begin().await?;

    // Changed vectors lose their partition until the next optimize
    for column in touched_vectors {
        if load_ivf(&mut tx, table, &column).await?.is_some() {
            let sql = format!(
                "DELETE FROM \"{}\" WHERE row_id IN (SELECT rowid FROM \"{}\" WHERE {})",
                ivf_table(table, &column),
                table,
                condition
            );
            bind_all(&sql, &filter_params).execute(&mut *tx).await?;
        }
    }

    params.extend(filter_params);
    let sql = format!(
        "UPDATE \"{}\" SET {} WHERE {}",
        table,
        assignments.join(", "),
        condition
    );
    let changed = bind_all(&sql, &params).execute(&mut *tx).await?.rows_affected();
    tx.commit().await?;

    Ok(changed)
}

async fn delete_rows(conn: &mut SqliteConnection, table: &str, filter: &Predicate) -> Result<u64> {
    let schema = require_schema(conn, table).await?;
    let indexes = list_indexes(conn, table).await?;

    let mut params = Vec::new();
    let condition = predicate_sql(&schema, table, filter, &mut params)?;
    let sql = format!("DELETE FROM \"{}\" WHERE {}", table, condition);

    let mut tx = conn.begin().await?;
    let removed = bind_all(&sql, &params).execute(&mut *tx).await?.rows_affected();

    for index in indexes {
        if matches!(index.kind, IndexKind::Approximate(_)) {
            sqlx::query(&format!(
                "DELETE FROM \"{}\" WHERE row_id NOT IN (SELECT rowid FROM \"{}\")",
                ivf_table(table, &index.column),
                table
            ))
            .execute(&mut *tx)
            .await?;
        }
    }
    tx.commit().await?;

    Ok(removed)
}

async fn count_rows(
    conn: &mut SqliteConnection,
    table: &str,
    filter: Option<&Predicate>,
) -> Result<usize> {
    let schema = require_schema(conn, table).await?;
    let mut params = Vec::new();
    let conditions = match filter {
        Some(p) => vec![predicate_sql(&schema, table, p, &mut params)?],
        None => Vec::new(),
    };

    let sql = format!("SELECT COUNT(*) FROM \"{}\"{}", table, where_clause(&conditions));
    let row = bind_all(&sql, &params).fetch_one(&mut *conn).await?;
    let count: i64 = row.try_get(0)?;
    Ok(count as usize)
}

async fn query_rows(
    conn: &mut SqliteConnection,
    table: &str,
    query: &VectorQuery,
    probes: usize,
) -> Result<Vec<QueryHit>> {
    let schema = require_schema(conn, table).await?;
    let projection: Vec<&ColumnDef> = match &query.columns {
        Some(names) => names
            .iter()
            .map(|n| {
                schema
                    .get(n)
                    .ok_or_else(|| Error::Store(format!("Unknown column: {}", n)))
            })
            .collect::<Result<_>>()?,
        None => schema.columns.iter().collect(),
    };
    let selected: Vec<String> = projection
        .iter()
        .map(|c| format!("\"{}\"", c.name))
        .collect();

    let mut params = Vec::new();
    let mut conditions = Vec::new();
    if let Some(filter) = &query.filter {
        conditions.push(predicate_sql(&schema, table, filter, &mut params)?);
    }

    let Some(nearest) = &query.nearest else {
        let mut sql = format!(
            "SELECT {} FROM \"{}\"{} ORDER BY rowid",
            selected.join(", "),
            table,
            where_clause(&conditions)
        );
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        let rows = bind_all(&sql, &params).fetch_all(&mut *conn).await?;
        return rows
            .iter()
            .map(|row| {
                Ok(QueryHit {
                    row: decode_row(row, &projection)?,
                    distance: None,
                })
            })
            .collect();
    };

    let ColumnType::Vector(dim) = schema.type_of(&nearest.column)? else {
        return Err(Error::Store(format!(
            "Column {} is not a vector column",
            nearest.column
        )));
    };
    if nearest.vector.len() != dim {
        return Err(Error::Store(format!(
            "Query vector dimension mismatch: expected {}, got {}",
            dim,
            nearest.vector.len()
        )));
    }

    let metric = match load_ivf(conn, table, &nearest.column).await? {
        Some(model) => {
            let ivf = ivf_table(table, &nearest.column);
            let partitions: Vec<String> = model
                .probe(&nearest.vector, probes)
                .into_iter()
                .map(|p| p.to_string())
                .collect();
            conditions.push(format!(
                "(rowid IN (SELECT row_id FROM \"{ivf}\" WHERE partition IN ({})) \
                 OR rowid NOT IN (SELECT row_id FROM \"{ivf}\"))",
                partitions.join(", ")
            ));
            model.metric
        }
        None => DistanceMetric::L2,
    };
    conditions.push(format!("\"{}\" IS NOT NULL", nearest.column));

    let sql = format!(
        "SELECT {}, \"{}\" AS __vector FROM \"{}\"{}",
        selected.join(", "),
        nearest.column,
        table,
        where_clause(&conditions)
    );
    let rows = bind_all(&sql, &params).fetch_all(&mut *conn).await?;

    let mut scored = rows
        .iter()
        .map(|row| -> Result<(f32, &SqliteRow)> {
            let bytes: Vec<u8> = row.try_get("__vector")?;
            Ok((metric.distance(&decode_vector(&bytes), &nearest.vector), row))
        })
        .collect::<Result<Vec<_>>>()?;
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    if let Some(limit) = query.limit {
        scored.truncate(limit);
    }

    scored
        .into_iter()
        .map(|(distance, row)| {
            Ok(QueryHit {
                row: decode_row(row, &projection)?,
                distance: Some(distance),
            })
        })
        .collect()
}
