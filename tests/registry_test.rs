//! Integration tests for registry routing and connection caching.

use querydb::config::DatabaseConfig;
use querydb::db::{Registry, RegistryOptions};
use querydb::error::DbError;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

fn sqlite(dir: &TempDir, file: &str) -> DatabaseConfig {
    DatabaseConfig::sqlite(dir.path().join(file).to_string_lossy())
}

/// Tag each database file with its own name so reads reveal where they were routed.
async fn tag(registry: &Registry, name: &str, label: &str) {
    let conn = registry.write(name).await.unwrap();
    conn.execute("CREATE TABLE origin (label TEXT)", Vec::new())
        .await
        .unwrap();
    conn.execute("INSERT INTO origin (label) VALUES (?)", vec![label.into()])
        .await
        .unwrap();
}

async fn origin(conn: &querydb::Connection) -> String {
    let rows = conn
        .query("SELECT label FROM origin", Vec::new())
        .await
        .unwrap();
    rows.rows[0]["label"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_same_key_returns_same_connection() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::new(RegistryOptions::default());
    registry.set_config("main", sqlite(&dir, "main.db")).await.unwrap();

    let first = registry.write("main").await.unwrap();
    let second = registry.write("main").await.unwrap();
    let read = registry.read("main").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    // No replicas: reads share the primary's cache entry.
    assert!(Arc::ptr_eq(&first, &read));
    assert_eq!(first.label(), "main");
    assert_eq!(registry.connection_count().await, 1);
}

#[tokio::test]
async fn test_concurrent_first_access_opens_once() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(Registry::new(RegistryOptions::default()));
    registry.set_config("main", sqlite(&dir, "main.db")).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.write("main").await.unwrap() })
        })
        .collect();

    let mut connections = Vec::new();
    for handle in handles {
        connections.push(handle.await.unwrap());
    }
    assert!(connections.iter().all(|c| Arc::ptr_eq(c, &connections[0])));
    assert_eq!(registry.connection_count().await, 1);
}

#[tokio::test]
async fn test_unknown_name_is_an_error_not_a_panic() {
    let registry = Registry::new(RegistryOptions::default());
    let err = registry.get("missing", true).await.unwrap_err();
    assert!(matches!(err, DbError::ConfigNotFound { .. }));
    assert!(err.to_string().contains("missing"));
}

#[tokio::test]
async fn test_reads_reach_every_replica_and_writes_stay_on_primary() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::with_seed(RegistryOptions::default(), 42);

    // Tag each file through a replica-free config first.
    for file in ["primary", "r0", "r1", "r2"] {
        registry
            .set_config(file, sqlite(&dir, &format!("{file}.db")))
            .await
            .unwrap();
        tag(&registry, file, file).await;
        registry.remove(file).await;
    }

    let config = sqlite(&dir, "primary.db")
        .with_replica(sqlite(&dir, "r0.db"))
        .with_replica(sqlite(&dir, "r1.db"))
        .with_replica(sqlite(&dir, "r2.db"));
    registry.set_config("main", config).await.unwrap();

    for _ in 0..10 {
        let conn = registry.write("main").await.unwrap();
        assert_eq!(conn.label(), "main");
        assert_eq!(origin(&conn).await, "primary");
    }

    let mut seen = HashSet::new();
    for _ in 0..100 {
        let conn = registry.read("main").await.unwrap();
        let label = origin(&conn).await;
        assert_eq!(conn.label(), format!("main_read_{}", &label[1..]));
        seen.insert(label);
    }
    let expected: HashSet<String> = ["r0", "r1", "r2"].iter().map(|s| s.to_string()).collect();
    assert_eq!(seen, expected);
    assert_eq!(registry.connection_count().await, 4);
}

#[tokio::test]
async fn test_set_config_evicts_cached_connections() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::new(RegistryOptions::default());
    registry.set_config("main", sqlite(&dir, "a.db")).await.unwrap();
    let before = registry.write("main").await.unwrap();

    registry.set_config("main", sqlite(&dir, "b.db")).await.unwrap();
    assert_eq!(registry.connection_count().await, 0);

    let after = registry.write("main").await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(registry.config("main").unwrap().database.ends_with("b.db"));

    // The evicted connection still works for whoever holds it.
    before.query("SELECT 1", Vec::new()).await.unwrap();
}

#[tokio::test]
async fn test_table_prefix_flows_into_builders() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::new(RegistryOptions::default());
    registry
        .set_config("main", sqlite(&dir, "main.db").with_table_prefix("ott_"))
        .await
        .unwrap();

    let conn = registry.write("main").await.unwrap();
    let stmt = conn.table("video").where_eq("id", 3).select_sql(&[]).unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM ott_video WHERE id=?");
}

#[tokio::test]
async fn test_close_all_keeps_configs() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::new(RegistryOptions::default());
    registry.set_config("main", sqlite(&dir, "main.db")).await.unwrap();
    registry.write("main").await.unwrap();

    registry.close_all().await;
    assert_eq!(registry.connection_count().await, 0);
    assert_eq!(registry.names(), vec!["main".to_string()]);

    let conn = registry.write("main").await.unwrap();
    conn.query("SELECT 1", Vec::new()).await.unwrap();
}
