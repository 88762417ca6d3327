//! Pooled data access for PostgreSQL.
//!
//! [`DatabaseManager`] owns the connection pool and the active schema, and
//! runs every statement inside an explicit transaction on a leased
//! connection. Leases return to the pool when dropped, so a connection is
//! released on every exit path.

pub mod connection;
pub mod error;
pub mod pool;
pub mod retry;
pub mod value;

use std::path::Path;
use std::time::Duration;

use futures_util::{TryStreamExt, pin_mut};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Transaction};
use tracing::{debug, error, info, warn};

pub use connection::{ConnectParams, PgConnector};
pub use error::{DbError, DbResult};
pub use pool::{PoolConfig, PoolMetrics, PoolStatus, PooledConnection};
pub use retry::RetryPolicy;
pub use value::{QueryResult, Value};

use error::pg_message;
use pool::Pool;
use value::decode_row;

/// A checked-out connection with the active schema applied.
pub type Lease = PooledConnection<PgConnector>;

/// Everything needed to build a [`DatabaseManager`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub params: ConnectParams,
    pub pool: PoolConfig,
    pub retry: RetryPolicy,
    /// Schema applied to every leased connection.
    pub schema: String,
}

/// One statement of a multi-statement transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Split a SQL script on `;` terminators.
    ///
    /// Semicolons inside quoted strings, quoted identifiers, dollar-quoted
    /// bodies and comments do not split. Empty statements are dropped.
    pub fn split_script(script: &str) -> Vec<Statement> {
        let chars: Vec<char> = script.chars().collect();
        let mut statements = Vec::new();
        let mut current = String::new();
        let mut i = 0;

        let mut flush = |current: &mut String| {
            let sql = current.trim();
            if !sql.is_empty() && !is_comment_only(sql) {
                statements.push(Statement::new(sql));
            }
            current.clear();
        };

        while i < chars.len() {
            let c = chars[i];
            match c {
                '\'' | '"' => {
                    let end = find_closing(&chars, i + 1, c);
                    current.extend(&chars[i..end]);
                    i = end;
                    continue;
                }
                '-' if chars.get(i + 1) == Some(&'-') => {
                    let end = chars[i..]
                        .iter()
                        .position(|&ch| ch == '\n')
                        .map_or(chars.len(), |p| i + p);
                    current.extend(&chars[i..end]);
                    i = end;
                    continue;
                }
                '$' => {
                    if let Some(tag_len) = dollar_tag_len(&chars[i..]) {
                        let tag: Vec<char> = chars[i..i + tag_len].to_vec();
                        let body_start = i + tag_len;
                        let end = (body_start..chars.len())
                            .find(|&j| chars[j..].starts_with(&tag))
                            .map_or(chars.len(), |j| j + tag_len);
                        current.extend(&chars[i..end]);
                        i = end;
                        continue;
                    }
                }
                ';' => {
                    flush(&mut current);
                    i += 1;
                    continue;
                }
                _ => {}
            }
            current.push(c);
            i += 1;
        }
        flush(&mut current);
        statements
    }
}

/// Index just past the closing `quote`, honouring doubled quotes.
fn find_closing(chars: &[char], mut i: usize, quote: char) -> usize {
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// Length of a `$tag$` opener at the start of `chars`.
fn dollar_tag_len(chars: &[char]) -> Option<usize> {
    let close = chars[1..].iter().position(|&c| c == '$')? + 1;
    chars[1..close]
        .iter()
        .all(|c| c.is_alphanumeric() || *c == '_')
        .then_some(close + 1)
}

fn is_comment_only(sql: &str) -> bool {
    sql.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: String,
    /// "YES" or "NO", as reported by information_schema.
    pub nullable: String,
    /// Column default expression, or "NULL" when there is none.
    pub default: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseInfo {
    pub database: String,
    pub schema: String,
    pub version: String,
    pub table_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub foreign_table: String,
    pub foreign_column: String,
    pub constraint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSize {
    pub table: String,
    pub total_size: String,
    pub table_size: String,
    pub live_rows: i64,
    pub dead_rows: i64,
}

/// Quote an identifier for interpolation into SQL text.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn param_refs(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

async fn rollback(tx: Transaction<'_>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}

fn text_at(result: &QueryResult, row: usize, column: &str) -> String {
    result
        .get(row, column)
        .and_then(Value::as_text)
        .unwrap_or_default()
}

fn int_at(result: &QueryResult, row: usize, column: &str) -> i64 {
    match result.get(row, column) {
        Some(Value::Int(n)) => *n,
        Some(other) => other.as_text().and_then(|s| s.parse().ok()).unwrap_or(0),
        None => 0,
    }
}

pub struct DatabaseManager {
    pool: Pool<PgConnector>,
    retry: RetryPolicy,
    schema: RwLock<String>,
}

impl DatabaseManager {
    /// Build the pool and record the default schema.
    ///
    /// The pool opens its minimum number of connections immediately, so bad
    /// credentials or an unreachable server fail here.
    pub async fn connect(options: ConnectOptions) -> DbResult<Self> {
        let connector = PgConnector::new(&options.params);
        let pool = Pool::new(connector, options.pool.clone())
            .await
            .map_err(|e| match e {
                e @ DbError::Setup { .. } => e,
                other => DbError::setup(other.to_string()),
            })?;

        info!(
            host = %options.params.host,
            port = options.params.port,
            database = %options.params.database,
            schema = %options.schema,
            "Database manager ready"
        );

        Ok(Self {
            pool,
            retry: options.retry,
            schema: RwLock::new(options.schema),
        })
    }

    /// Currently active schema.
    pub fn schema(&self) -> String {
        self.schema.read().clone()
    }

    /// Lease a connection using the configured retry policy.
    pub async fn acquire_connection(&self) -> DbResult<Lease> {
        self.acquire_with(self.retry.attempts, self.retry.delay).await
    }

    /// Lease a connection with the active schema applied.
    ///
    /// Transient failures are retried up to `retries` attempts in total,
    /// sleeping `delay * attempt` in between. Missing schemas, rejected
    /// credentials and a closed pool fail immediately.
    pub async fn acquire_with(&self, retries: u32, delay: Duration) -> DbResult<Lease> {
        let policy = RetryPolicy::new(retries, delay);
        let schema = self.schema();

        policy
            .run(|attempt| {
                let schema = schema.as_str();
                async move {
                    tracing::trace!(attempt, "Acquiring connection");
                    let mut conn = self.pool.get().await?;
                    apply_search_path(&mut conn, schema).await?;
                    Ok(conn)
                }
            })
            .await
    }

    /// Apply `schema` to `conn` and record it as the active schema.
    ///
    /// When the schema is missing or cannot be applied nothing is recorded.
    pub async fn activate_schema(&self, conn: &mut Client, schema: &str) -> DbResult<()> {
        apply_search_path(conn, schema).await?;

        let mut active = self.schema.write();
        if *active != schema {
            info!(from = %*active, to = %schema, "Active schema changed");
            *active = schema.to_string();
        } else {
            debug!(schema = %schema, "Schema applied");
        }
        Ok(())
    }

    /// Switch the active schema for every subsequent call.
    pub async fn set_schema(&self, schema: &str) -> DbResult<()> {
        let mut conn = self.pool.get().await?;
        self.activate_schema(&mut conn, schema).await
    }

    /// Run one parameterized statement in its own transaction.
    ///
    /// Returns rows when `fetch` is set and the statement produces a result
    /// set, possibly with zero rows. With `autocommit` off the transaction
    /// is rolled back at the end, so effects are only visible through the
    /// returned rows.
    pub async fn execute(
        &self,
        query: &str,
        params: &[Value],
        fetch: bool,
        autocommit: bool,
    ) -> DbResult<Option<QueryResult>> {
        let rendered: Vec<String> = params.iter().map(Value::to_literal).collect();
        let mut conn = self.acquire_connection().await?;
        debug!(query, params = ?rendered, fetch, autocommit, "Executing query");

        let outcome = execute_on(&mut conn, query, params, fetch, autocommit, &rendered).await;
        if let Err(e) = &outcome {
            error!(query, params = ?rendered, error = %e, "Query failed");
        }
        outcome
    }

    /// Shorthand for a committed statement whose rows are wanted.
    async fn fetch(&self, query: &str, params: &[Value]) -> DbResult<QueryResult> {
        Ok(self
            .execute(query, params, true, true)
            .await?
            .unwrap_or_default())
    }

    /// Run `statements` in order on one connection and commit once.
    ///
    /// The first failure rolls back everything and reports the index of the
    /// failing statement. Returns the rows affected by each statement.
    pub async fn execute_transaction(&self, statements: &[Statement]) -> DbResult<Vec<u64>> {
        let mut conn = self.acquire_connection().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DbError::transaction(0, &e))?;

        let mut affected = Vec::with_capacity(statements.len());
        for (index, statement) in statements.iter().enumerate() {
            debug!(index, sql = %statement.sql, "Executing transaction statement");
            match tx
                .execute(statement.sql.as_str(), &param_refs(&statement.params))
                .await
            {
                Ok(rows) => affected.push(rows),
                Err(e) => {
                    error!(index, sql = %statement.sql, error = %e, "Transaction statement failed");
                    rollback(tx).await;
                    return Err(DbError::transaction(index, &e));
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| DbError::transaction(statements.len().saturating_sub(1), &e))?;
        info!(statements = statements.len(), "Transaction committed");
        Ok(affected)
    }

    /// Base tables of the active schema, alphabetical.
    pub async fn list_tables(&self) -> DbResult<Vec<String>> {
        let result = self
            .fetch(
                "SELECT table_name::text AS table_name
                 FROM information_schema.tables
                 WHERE table_schema = $1::text AND table_type = 'BASE TABLE'
                 ORDER BY table_name",
                &[Value::from(self.schema())],
            )
            .await?;
        Ok((0..result.row_count())
            .map(|i| text_at(&result, i, "table_name"))
            .collect())
    }

    /// Columns of `table` in ordinal order. Unknown tables yield an empty list.
    pub async fn describe_table(&self, table: &str) -> DbResult<Vec<ColumnDescription>> {
        let result = self
            .fetch(
                "SELECT column_name::text AS column_name,
                        data_type::text AS data_type,
                        is_nullable::text AS is_nullable,
                        column_default::text AS column_default
                 FROM information_schema.columns
                 WHERE table_schema = $1::text AND table_name = $2::text
                 ORDER BY ordinal_position",
                &[Value::from(self.schema()), Value::from(table)],
            )
            .await?;

        Ok((0..result.row_count())
            .map(|i| ColumnDescription {
                name: text_at(&result, i, "column_name"),
                data_type: text_at(&result, i, "data_type"),
                nullable: text_at(&result, i, "is_nullable"),
                default: result
                    .get(i, "column_default")
                    .and_then(Value::as_text)
                    .unwrap_or_else(|| "NULL".to_string()),
            })
            .collect())
    }

    /// First `limit` rows of `table`.
    pub async fn preview_table(&self, table: &str, limit: i64) -> DbResult<QueryResult> {
        self.table_page(table, 0, limit).await
    }

    /// `limit` rows of `table` starting at `offset`.
    pub async fn table_page(&self, table: &str, offset: i64, limit: i64) -> DbResult<QueryResult> {
        let query = format!(
            "SELECT * FROM {} LIMIT $1::bigint OFFSET $2::bigint",
            quote_ident(table)
        );
        self.fetch(&query, &[Value::Int(limit.max(0)), Value::Int(offset.max(0))])
            .await
    }

    pub async fn count_rows(&self, table: &str) -> DbResult<i64> {
        let query = format!("SELECT count(*) AS total FROM {}", quote_ident(table));
        let result = self.fetch(&query, &[]).await?;
        Ok(int_at(&result, 0, "total"))
    }

    /// Write `table` as CSV with a header row to `path`.
    ///
    /// Parent directories are created as needed. Returns the number of bytes
    /// written.
    pub async fn export_table(&self, table: &str, path: impl AsRef<Path>) -> DbResult<u64> {
        let path = path.as_ref();
        let fail = |message: String| {
            error!(table, path = %path.display(), error = %message, "Export failed");
            DbError::export(table, message)
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| fail(e.to_string()))?;
        }

        let mut conn = self
            .acquire_connection()
            .await
            .map_err(|e| fail(e.to_string()))?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| fail(pg_message(&e)))?;

        let copy = format!("COPY {} TO STDOUT WITH CSV HEADER", quote_ident(table));
        let stream = tx
            .copy_out(copy.as_str())
            .await
            .map_err(|e| fail(pg_message(&e)))?;
        pin_mut!(stream);

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| fail(e.to_string()))?;
        let mut written = 0u64;
        while let Some(chunk) = stream.try_next().await.map_err(|e| fail(pg_message(&e)))? {
            file.write_all(&chunk)
                .await
                .map_err(|e| fail(e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| fail(e.to_string()))?;
        tx.commit().await.map_err(|e| fail(pg_message(&e)))?;

        info!(table, path = %path.display(), bytes = written, "Table exported");
        Ok(written)
    }

    pub async fn database_info(&self) -> DbResult<DatabaseInfo> {
        let schema = self.schema();
        let result = self
            .fetch(
                "SELECT current_database()::text AS database,
                        version()::text AS version,
                        (SELECT count(*)
                         FROM information_schema.tables
                         WHERE table_schema = $1::text AND table_type = 'BASE TABLE') AS table_count",
                &[Value::from(schema.clone())],
            )
            .await?;

        Ok(DatabaseInfo {
            database: text_at(&result, 0, "database"),
            schema,
            version: text_at(&result, 0, "version"),
            table_count: int_at(&result, 0, "table_count"),
        })
    }

    /// Schemas other than the system ones, alphabetical.
    pub async fn list_schemas(&self) -> DbResult<Vec<String>> {
        let result = self
            .fetch(
                "SELECT schema_name::text AS schema_name
                 FROM information_schema.schemata
                 WHERE schema_name <> 'information_schema'
                   AND schema_name NOT LIKE 'pg\\_%'
                 ORDER BY schema_name",
                &[],
            )
            .await?;
        Ok((0..result.row_count())
            .map(|i| text_at(&result, i, "schema_name"))
            .collect())
    }

    /// Foreign-key relationships declared in the active schema.
    pub async fn foreign_keys(&self) -> DbResult<Vec<ForeignKey>> {
        let result = self
            .fetch(
                "SELECT tc.table_name::text AS table_name,
                        kcu.column_name::text AS column_name,
                        ccu.table_name::text AS foreign_table,
                        ccu.column_name::text AS foreign_column,
                        tc.constraint_name::text AS constraint_name
                 FROM information_schema.table_constraints tc
                 JOIN information_schema.key_column_usage kcu
                   ON tc.constraint_name = kcu.constraint_name
                  AND tc.table_schema = kcu.table_schema
                 JOIN information_schema.constraint_column_usage ccu
                   ON ccu.constraint_name = tc.constraint_name
                  AND ccu.table_schema = tc.table_schema
                 WHERE tc.constraint_type = 'FOREIGN KEY'
                   AND tc.table_schema = $1::text
                 ORDER BY tc.table_name, kcu.column_name",
                &[Value::from(self.schema())],
            )
            .await?;

        Ok((0..result.row_count())
            .map(|i| ForeignKey {
                table: text_at(&result, i, "table_name"),
                column: text_at(&result, i, "column_name"),
                foreign_table: text_at(&result, i, "foreign_table"),
                foreign_column: text_at(&result, i, "foreign_column"),
                constraint: text_at(&result, i, "constraint_name"),
            })
            .collect())
    }

    /// On-disk sizes and tuple counts, largest table first.
    pub async fn table_sizes(&self) -> DbResult<Vec<TableSize>> {
        let result = self
            .fetch(
                "SELECT relname::text AS table_name,
                        pg_size_pretty(pg_total_relation_size(relid))::text AS total_size,
                        pg_size_pretty(pg_relation_size(relid))::text AS table_size,
                        n_live_tup AS live_rows,
                        n_dead_tup AS dead_rows
                 FROM pg_stat_user_tables
                 WHERE schemaname = $1::text
                 ORDER BY pg_total_relation_size(relid) DESC, relname",
                &[Value::from(self.schema())],
            )
            .await?;

        Ok((0..result.row_count())
            .map(|i| TableSize {
                table: text_at(&result, i, "table_name"),
                total_size: text_at(&result, i, "total_size"),
                table_size: text_at(&result, i, "table_size"),
                live_rows: int_at(&result, i, "live_rows"),
                dead_rows: int_at(&result, i, "dead_rows"),
            })
            .collect())
    }

    /// Check that a connection can be leased and answers a trivial query.
    pub async fn is_connected(&self) -> bool {
        if self.pool.is_closed() {
            return false;
        }
        match self.pool.get().await {
            Ok(conn) => conn.query_one("SELECT 1", &[]).await.is_ok(),
            Err(e) => {
                debug!(error = %e, "Connectivity check failed");
                false
            }
        }
    }

    /// Close the pool. Idle connections are dropped, leased ones when returned.
    pub fn close(&self) {
        self.pool.close();
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    pub fn pool_metrics(&self) -> PoolMetrics {
        self.pool.metrics()
    }
}

/// Verify `schema` exists and make it the search path of `conn`.
///
/// Leaves the recorded active schema alone, so leases taken while a
/// schema switch is in flight cannot overwrite it.
async fn apply_search_path(conn: &mut Client, schema: &str) -> DbResult<()> {
    let exists = conn
        .query_opt(
            "SELECT 1 FROM information_schema.schemata WHERE schema_name = $1::text",
            &[&schema],
        )
        .await
        .map_err(|e| activation_error(schema, &e))?
        .is_some();
    if !exists {
        return Err(DbError::SchemaNotFound {
            schema: schema.to_string(),
        });
    }

    let tx = conn
        .transaction()
        .await
        .map_err(|e| activation_error(schema, &e))?;
    let set_path = format!("SET search_path TO {}", quote_ident(schema));
    if let Err(e) = tx.batch_execute(&set_path).await {
        rollback(tx).await;
        return Err(activation_error(schema, &e));
    }
    tx.commit().await.map_err(|e| activation_error(schema, &e))
}

/// Errors the server did not report (I/O, closed socket) are worth a retry
/// on another connection; server-side errors are not.
fn activation_error(schema: &str, err: &tokio_postgres::Error) -> DbError {
    if err.as_db_error().is_none() {
        DbError::transient(format!("applying schema '{schema}': {}", pg_message(err)))
    } else {
        DbError::schema(schema, pg_message(err))
    }
}

async fn execute_on(
    conn: &mut Client,
    query: &str,
    params: &[Value],
    fetch: bool,
    autocommit: bool,
    rendered: &[String],
) -> DbResult<Option<QueryResult>> {
    let tx = conn
        .transaction()
        .await
        .map_err(|e| DbError::execution(&e, query, rendered))?;

    match run_statement(&tx, query, params, fetch, rendered).await {
        Ok(result) => {
            if autocommit {
                tx.commit()
                    .await
                    .map_err(|e| DbError::execution(&e, query, rendered))?;
            } else {
                rollback(tx).await;
            }
            Ok(result)
        }
        Err(e) => {
            rollback(tx).await;
            Err(e)
        }
    }
}

async fn run_statement(
    tx: &Transaction<'_>,
    query: &str,
    params: &[Value],
    fetch: bool,
    rendered: &[String],
) -> DbResult<Option<QueryResult>> {
    let statement = tx
        .prepare(query)
        .await
        .map_err(|e| DbError::execution(&e, query, rendered))?;
    let refs = param_refs(params);

    if !fetch || statement.columns().is_empty() {
        tx.execute(&statement, &refs)
            .await
            .map_err(|e| DbError::execution(&e, query, rendered))?;
        return Ok(None);
    }

    let rows = tx
        .query(&statement, &refs)
        .await
        .map_err(|e| DbError::execution(&e, query, rendered))?;
    let columns = statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let rows = rows
        .iter()
        .map(decode_row)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DbError::Execution {
            message: e.to_string(),
            sql_state: None,
            query: query.to_string(),
            params: rendered.to_vec(),
        })?;

    Ok(Some(QueryResult { columns, rows }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("Order Items"), "\"Order Items\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_statement_builders() {
        let plain = Statement::new("DELETE FROM audit");
        assert!(plain.params.is_empty());

        let bound = Statement::with_params("DELETE FROM audit WHERE id = $1", vec![Value::Int(3)]);
        assert_eq!(bound.params, vec![Value::Int(3)]);
        assert_eq!(param_refs(&bound.params).len(), 1);
    }

    #[test]
    fn test_split_script() {
        let script = "
            -- seed data
            CREATE TABLE t (id int, note text);
            INSERT INTO t VALUES (1, 'a;b');
            INSERT INTO \"odd;name\" VALUES (2);
            CREATE FUNCTION f() RETURNS int AS $$ SELECT 1; $$ LANGUAGE sql;
            ;
            SELECT 'it''s; fine'
        ";
        let statements = Statement::split_script(script);
        let sql: Vec<&str> = statements.iter().map(|s| s.sql.as_str()).collect();
        assert_eq!(sql.len(), 5);
        assert!(sql[0].ends_with("CREATE TABLE t (id int, note text)"));
        assert_eq!(sql[1], "INSERT INTO t VALUES (1, 'a;b')");
        assert_eq!(sql[2], "INSERT INTO \"odd;name\" VALUES (2)");
        assert_eq!(
            sql[3],
            "CREATE FUNCTION f() RETURNS int AS $$ SELECT 1; $$ LANGUAGE sql"
        );
        assert_eq!(sql[4], "SELECT 'it''s; fine'");
    }

    #[test]
    fn test_split_script_ignores_comment_only_tail() {
        let statements = Statement::split_script("DELETE FROM t;\n-- done\n");
        assert_eq!(statements, vec![Statement::new("DELETE FROM t")]);
        assert!(Statement::split_script("  ;; ").is_empty());
    }

    #[test]
    fn test_result_helpers_tolerate_missing_cells() {
        let result = QueryResult {
            columns: vec!["total".to_string(), "label".to_string()],
            rows: vec![vec![Value::Int(12), Value::Null]],
        };
        assert_eq!(int_at(&result, 0, "total"), 12);
        assert_eq!(int_at(&result, 1, "total"), 0);
        assert_eq!(text_at(&result, 0, "label"), "");
        assert_eq!(text_at(&result, 0, "missing"), "");
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server_is_setup_error() {
        let options = ConnectOptions {
            params: ConnectParams {
                host: "nonexistent_host".to_string(),
                port: 5432,
                database: "postgres".to_string(),
                username: "postgres".to_string(),
                password: "password".to_string(),
                connect_timeout: Duration::from_secs(2),
            },
            pool: PoolConfig::default(),
            retry: RetryPolicy::default(),
            schema: "public".to_string(),
        };

        let err = DatabaseManager::connect(options).await.err().unwrap();
        assert!(matches!(err, DbError::Setup { .. }));
    }
}
