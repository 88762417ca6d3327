//! DatabaseManager behaviour against a live server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pgdeck::db::{DbError, Statement, Value, quote_ident};

#[tokio::test]
async fn test_list_tables_is_alphabetical_and_skips_views() {
    let t = require_db!();
    t.run("CREATE TABLE zeta (id int)").await;
    t.run("CREATE TABLE alpha (id int)").await;
    t.run("CREATE TABLE mid (id int)").await;
    t.run("CREATE VIEW alpha_view AS SELECT id FROM alpha").await;

    let tables = t.db.list_tables().await.unwrap();
    assert_eq!(tables, vec!["alpha", "mid", "zeta"]);

    t.teardown().await;
}

#[tokio::test]
async fn test_describe_table_in_ordinal_order() {
    let t = require_db!();
    t.run(
        "CREATE TABLE processo (
            id serial PRIMARY KEY,
            numero text NOT NULL,
            vara varchar(20) DEFAULT 'civel'
        )",
    )
    .await;

    let columns = t.db.describe_table("processo").await.unwrap();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "numero", "vara"]);

    assert_eq!(columns[0].nullable, "NO");
    assert!(columns[0].default.contains("nextval"));
    assert_eq!(columns[1].data_type, "text");
    assert_eq!(columns[1].default, "NULL");
    assert_eq!(columns[2].nullable, "YES");
    assert!(columns[2].default.contains("civel"));

    assert!(t.db.describe_table("missing").await.unwrap().is_empty());

    t.teardown().await;
}

#[tokio::test]
async fn test_preview_respects_limit() {
    let t = require_db!();
    t.run("CREATE TABLE items (id int, label text)").await;
    t.run("INSERT INTO items SELECT g, 'item ' || g FROM generate_series(1, 10) g")
        .await;

    let preview = t.db.preview_table("items", 5).await.unwrap();
    assert_eq!(preview.columns, vec!["id", "label"]);
    assert_eq!(preview.row_count(), 5);

    let empty = t.db.preview_table("items", 0).await.unwrap();
    assert!(empty.is_empty());

    let page = t.db.table_page("items", 8, 5).await.unwrap();
    assert_eq!(page.row_count(), 2);
    assert_eq!(t.db.count_rows("items").await.unwrap(), 10);

    t.teardown().await;
}

#[tokio::test]
async fn test_fetch_with_zero_rows_returns_empty_result() {
    let t = require_db!();
    t.run("CREATE TABLE empty_table (id int, name text)").await;

    let result = t
        .db
        .execute("SELECT * FROM empty_table", &[], true, true)
        .await
        .unwrap()
        .expect("fetch of a row-returning statement yields a result");
    assert_eq!(result.columns, vec!["id", "name"]);
    assert!(result.is_empty());

    let none = t
        .db
        .execute("INSERT INTO empty_table VALUES (1, 'a')", &[], true, true)
        .await
        .unwrap();
    assert!(none.is_none());

    let not_fetched = t
        .db
        .execute("SELECT * FROM empty_table", &[], false, true)
        .await
        .unwrap();
    assert!(not_fetched.is_none());

    t.teardown().await;
}

#[tokio::test]
async fn test_text_parameters_bind_to_typed_placeholders() {
    let t = require_db!();
    let result = t
        .db
        .execute(
            "SELECT $1::int + 1 AS answer, $2::uuid AS id, $3::date AS day",
            &[
                Value::from("41"),
                Value::from("6f1c2f7e-3d6a-4c1e-9a53-2b2f4c3b9d10"),
                Value::from("2024-02-29"),
            ],
            true,
            true,
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.get(0, "answer"), Some(&Value::Int(42)));
    assert_eq!(
        result.get(0, "id").and_then(Value::as_text).as_deref(),
        Some("6f1c2f7e-3d6a-4c1e-9a53-2b2f4c3b9d10")
    );
    assert_eq!(
        result.get(0, "day").and_then(Value::as_text).as_deref(),
        Some("2024-02-29")
    );

    t.teardown().await;
}

#[tokio::test]
async fn test_column_types_decode() {
    let t = require_db!();
    let result = t
        .db
        .execute(
            "SELECT 7::int2 AS small, 2.50::numeric AS amount, -0.001::numeric AS tiny,
                    true AS flag, '{\"a\": 1}'::jsonb AS doc, NULL::text AS nothing,
                    'x'::varchar AS label, '\\xdead'::bytea AS raw",
            &[],
            true,
            true,
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.get(0, "small"), Some(&Value::Int(7)));
    assert!(matches!(result.get(0, "amount"), Some(Value::Numeric(_))));
    assert_eq!(result.get(0, "amount").unwrap().to_string(), "2.50");
    assert_eq!(result.get(0, "tiny").unwrap().to_string(), "-0.001");
    assert_eq!(result.get(0, "flag"), Some(&Value::Bool(true)));
    assert_eq!(
        result.get(0, "doc"),
        Some(&Value::Json(serde_json::json!({"a": 1})))
    );
    assert_eq!(result.get(0, "nothing"), Some(&Value::Null));
    assert_eq!(result.get(0, "label"), Some(&Value::from("x")));
    assert_eq!(result.get(0, "raw"), Some(&Value::Bytes(vec![0xde, 0xad])));

    t.teardown().await;
}

#[tokio::test]
async fn test_dry_run_rolls_back() {
    let t = require_db!();
    t.run("CREATE TABLE notes (id serial, body text)").await;

    let returned = t
        .db
        .execute(
            "INSERT INTO notes (body) VALUES ($1) RETURNING body",
            &[Value::from("draft")],
            true,
            false,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(returned.get(0, "body"), Some(&Value::from("draft")));
    assert_eq!(t.db.count_rows("notes").await.unwrap(), 0);

    t.db.execute(
        "INSERT INTO notes (body) VALUES ($1)",
        &[Value::from("kept")],
        false,
        true,
    )
    .await
    .unwrap();
    assert_eq!(t.db.count_rows("notes").await.unwrap(), 1);

    t.teardown().await;
}

#[tokio::test]
async fn test_failed_statement_reports_context() {
    let t = require_db!();

    let err = t
        .db
        .execute("SELECT * FROM nonexistent WHERE id = $1", &[Value::Int(1)], true, true)
        .await
        .unwrap_err();
    match err {
        DbError::Execution {
            sql_state,
            query,
            params,
            ..
        } => {
            assert_eq!(sql_state.as_deref(), Some("42P01"));
            assert!(query.contains("nonexistent"));
            assert_eq!(params, vec!["1".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    t.teardown().await;
}

#[tokio::test]
async fn test_transaction_is_atomic() {
    let t = require_db!();
    t.run("CREATE TABLE ledger (id int PRIMARY KEY, amount int)").await;

    let err = t
        .db
        .execute_transaction(&[
            Statement::with_params(
                "INSERT INTO ledger VALUES ($1, $2)",
                vec![Value::Int(1), Value::Int(100)],
            ),
            Statement::new("INSERT INTO nonexistent VALUES (1)"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Transaction { index: 1, .. }));
    assert_eq!(t.db.count_rows("ledger").await.unwrap(), 0);

    let affected = t
        .db
        .execute_transaction(&[
            Statement::new("INSERT INTO ledger VALUES (1, 100), (2, 50)"),
            Statement::new("UPDATE ledger SET amount = amount - 10 WHERE id = 1"),
        ])
        .await
        .unwrap();
    assert_eq!(affected, vec![2, 1]);
    assert_eq!(t.db.count_rows("ledger").await.unwrap(), 2);

    t.teardown().await;
}

#[tokio::test]
async fn test_missing_schema_leaves_active_schema_unchanged() {
    let t = require_db!();
    t.run("CREATE TABLE kept (id int)").await;

    let err = t.db.set_schema("definitely_not_a_schema").await.unwrap_err();
    assert!(matches!(err, DbError::SchemaNotFound { .. }));
    assert!(!err.is_transient());
    assert_eq!(t.db.schema(), t.schema);
    assert_eq!(t.db.list_tables().await.unwrap(), vec!["kept"]);
    assert_eq!(t.db.pool_status().in_use, 0);

    t.teardown().await;
}

#[tokio::test]
async fn test_schema_switch_changes_table_listing() {
    let t = require_db!();
    t.run("CREATE TABLE in_test_schema (id int)").await;

    t.db.set_schema("public").await.unwrap();
    assert_eq!(t.db.schema(), "public");
    assert!(!t.db.list_tables().await.unwrap().contains(&"in_test_schema".to_string()));

    t.db.set_schema(&t.schema).await.unwrap();
    assert_eq!(t.db.list_tables().await.unwrap(), vec!["in_test_schema"]);
    assert!(t.db.list_schemas().await.unwrap().contains(&t.schema));

    t.teardown().await;
}

#[tokio::test]
async fn test_connections_are_returned_after_errors() {
    let t = require_db!();

    for _ in 0..10 {
        assert!(t.db.execute("SELEC 1", &[], true, true).await.is_err());
    }
    let status = t.db.pool_status();
    assert_eq!(status.in_use, 0);
    assert!(status.idle <= status.max);

    // More calls than pool slots still succeed once leases come back.
    for _ in 0..(status.max * 2) {
        t.db.execute("SELECT 1", &[], true, true).await.unwrap();
    }
    assert_eq!(t.db.pool_status().in_use, 0);
    let metrics = t.db.pool_metrics();
    assert!(metrics.connections_created <= u64::from(status.max) + metrics.connections_closed);

    t.teardown().await;
}

#[tokio::test]
async fn test_concurrent_callers_share_bounded_pool() {
    let t = require_db!();
    let db = Arc::new(t.db);

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let db = Arc::clone(&db);
            tokio::spawn(async move {
                db.execute(
                    "SELECT $1::int AS n FROM pg_sleep(0.05)",
                    &[Value::Int(i)],
                    true,
                    true,
                )
                .await
            })
        })
        .collect();

    for task in futures_util::future::join_all(tasks).await {
        assert!(task.unwrap().unwrap().is_some());
    }
    let status = db.pool_status();
    assert_eq!(status.in_use, 0);
    assert!(status.idle <= status.max);

    let db = Arc::try_unwrap(db).ok().expect("all tasks finished");
    common::TestDb {
        db,
        schema: t.schema,
    }
    .teardown()
    .await;
}

#[tokio::test]
async fn test_export_writes_header_and_rows() {
    let t = require_db!();
    t.run("CREATE TABLE exported (id int, name text)").await;
    t.run("INSERT INTO exported VALUES (1, 'Ana'), (2, 'Bruno, Jr.'), (3, NULL)")
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nested").join("exported.csv");
    let bytes = t.db.export_table("exported", &path).await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(bytes, content.len() as u64);
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "id,name");
    assert_eq!(lines[2], "2,\"Bruno, Jr.\"");

    let err = t
        .db
        .export_table("nonexistent", dir.path().join("missing.csv"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Export { .. }));
    assert!(!dir.path().join("missing.csv").exists());

    t.teardown().await;
}

#[tokio::test]
async fn test_introspection_helpers() {
    let t = require_db!();
    t.run("CREATE TABLE autor (id int PRIMARY KEY, nome text)").await;
    t.run("CREATE TABLE livro (id int PRIMARY KEY, autor_id int REFERENCES autor(id))")
        .await;
    t.run("CREATE VIEW livros_view AS SELECT * FROM livro").await;
    t.run("INSERT INTO autor SELECT g, 'autor' FROM generate_series(1, 500) g")
        .await;

    let info = t.db.database_info().await.unwrap();
    assert_eq!(info.schema, t.schema);
    assert_eq!(info.table_count, 2);
    assert!(info.version.starts_with("PostgreSQL"));
    assert!(!info.database.is_empty());

    let keys = t.db.foreign_keys().await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].table, "livro");
    assert_eq!(keys[0].column, "autor_id");
    assert_eq!(keys[0].foreign_table, "autor");
    assert_eq!(keys[0].foreign_column, "id");

    let sizes = t.db.table_sizes().await.unwrap();
    let tables: Vec<&str> = sizes.iter().map(|s| s.table.as_str()).collect();
    assert_eq!(tables, vec!["autor", "livro"]);

    t.teardown().await;
}

#[tokio::test]
async fn test_close_is_idempotent_and_stops_work() {
    let t = require_db!();
    let schema = t.schema.clone();
    assert!(t.db.is_connected().await);

    // Drop the schema while the pool is still open.
    t.run(&format!("DROP SCHEMA \"{schema}\" CASCADE")).await;
    t.db.set_schema("public").await.unwrap();

    t.db.close();
    t.db.close();
    assert!(!t.db.is_connected().await);

    let err = t
        .db
        .acquire_with(3, Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::PoolClosed));

    let dir = tempfile::TempDir::new().unwrap();
    let err = t
        .db
        .export_table("anything", dir.path().join("out.csv"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Export { .. }));
}

#[tokio::test]
async fn test_set_schema_is_not_undone_by_concurrent_leases() {
    let t = require_db!();
    let other = format!("{}_b", t.schema);
    t.run(&format!("CREATE SCHEMA {}", quote_ident(&other))).await;

    for round in 0..20 {
        let (from, to) = if round % 2 == 0 {
            (t.schema.as_str(), other.as_str())
        } else {
            (other.as_str(), t.schema.as_str())
        };
        assert_eq!(t.db.schema(), from);

        let queries = futures_util::future::join_all(
            (0..3).map(|_| t.db.execute("SELECT 1", &[], true, true)),
        );
        let (results, switched) = tokio::join!(queries, t.db.set_schema(to));
        switched.unwrap();
        for result in results {
            result.unwrap();
        }
        assert_eq!(t.db.schema(), to, "round {round}");
    }

    t.run(&format!("DROP SCHEMA {} CASCADE", quote_ident(&other))).await;
    t.teardown().await;
}

#[tokio::test]
async fn test_schema_dropped_underneath_releases_lease() {
    let t = require_db!();
    t.run(&format!("DROP SCHEMA {} CASCADE", quote_ident(&t.schema)))
        .await;

    let err = t.db.execute("SELECT 1", &[], true, true).await.unwrap_err();
    assert!(matches!(err, DbError::SchemaNotFound { .. }));
    assert_eq!(t.db.pool_status().in_use, 0);
    assert_eq!(t.db.schema(), t.schema);

    let err = t
        .db
        .acquire_with(3, Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::SchemaNotFound { .. }));
    assert_eq!(t.db.pool_status().in_use, 0);

    t.db.set_schema("public").await.unwrap();
    assert!(t.db.execute("SELECT 1", &[], true, true).await.is_ok());

    t.teardown().await;
}

#[tokio::test]
async fn test_lost_connection_during_schema_activation_is_transient() {
    let t = require_db!();
    let mut conn = t.db.acquire_connection().await.unwrap();
    let pid: i32 = conn
        .query_one("SELECT pg_backend_pid()", &[])
        .await
        .unwrap()
        .get(0);

    t.db.execute(
        "SELECT pg_terminate_backend($1::int)",
        &[Value::Int(i64::from(pid))],
        true,
        true,
    )
    .await
    .unwrap();
    for _ in 0..50 {
        if conn.is_closed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let err = t.db.activate_schema(&mut conn, &t.schema).await.unwrap_err();
    assert!(err.is_transient(), "unexpected error: {err:?}");
    assert_eq!(t.db.schema(), t.schema);

    drop(conn);
    assert_eq!(t.db.pool_status().in_use, 0);
    assert!(t.db.execute("SELECT 1", &[], true, true).await.is_ok());

    t.teardown().await;
}
