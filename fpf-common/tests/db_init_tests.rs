//! Integration tests for database initialization on disk

use fpf_common::db::{init_database, ColumnCache, InsertBuilder, SchemaIntrospector, SqlValue};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_init_database_creates_file_and_schema() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("planner.db");

    let pool = init_database(&db_path).await.unwrap();
    assert!(db_path.exists());

    assert!(SchemaIntrospector::table_exists(&pool, "autoplan_audit").await.unwrap());
    assert!(SchemaIntrospector::relation_exists(&pool, "freights_price_v").await.unwrap());
    pool.close().await;
}

#[tokio::test]
async fn test_reopen_preserves_rows() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("planner.db");

    {
        let pool = init_database(&db_path).await.unwrap();
        let columns = ColumnCache::new(Duration::from_secs(60))
            .get(&pool, "ops_event_log")
            .await
            .unwrap();
        InsertBuilder::new("ops_event_log")
            .value("source", "test")
            .value("event_type", "boot")
            .value("payload", SqlValue::Json(json!({"n": 1})))
            .build(&columns)
            .unwrap()
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
    }

    let pool = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ops_event_log")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_journal_mode_is_wal() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("wal.db")).await.unwrap();
    let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}
