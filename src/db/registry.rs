//! Named database registry with primary/replica routing.
//!
//! # Design
//!
//! - **Cache keys**: the primary of `name` is cached under `name`; replica `i`
//!   under `name_read_<i>`. Writes always resolve to the primary, reads pick a
//!   replica uniformly at random (or the primary when none are configured).
//! - **`OnceCell` per cache key**: concurrent first access to the same key opens
//!   exactly one pool; later callers wait for it and share the result.
//! - **One RNG**: seeded once per registry and shared behind a mutex.
//!
//! # Thread Safety
//!
//! - Configs live behind a `std::sync::RwLock` and are never held across `.await`
//! - The connection cache uses a `tokio::sync::RwLock`, write-locked only to insert
//!   a new cell or evict entries

use crate::config::DatabaseConfig;
use crate::db::connection::{Connection, ConnectionOptions};
use crate::error::{DbError, DbResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock as TokioRwLock};
use tracing::{debug, info};

/// Logging policy applied to every connection the registry opens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryOptions {
    pub trace_statements: bool,
    pub slow_statement_threshold: Option<Duration>,
}

type ConnectionCell = Arc<OnceCell<Arc<Connection>>>;

pub struct Registry {
    options: RegistryOptions,
    configs: RwLock<HashMap<String, DatabaseConfig>>,
    connections: TokioRwLock<HashMap<String, ConnectionCell>>,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("options", &self.options)
            .field("names", &self.names())
            .finish_non_exhaustive()
    }
}

/// Cache key of replica `index` of `name`.
pub fn replica_key(name: &str, index: usize) -> String {
    format!("{}_read_{}", name, index)
}

impl Registry {
    pub fn new(options: RegistryOptions) -> Self {
        Self::with_rng(options, StdRng::from_entropy())
    }

    /// Registry with a deterministic replica choice sequence.
    pub fn with_seed(options: RegistryOptions, seed: u64) -> Self {
        Self::with_rng(options, StdRng::seed_from_u64(seed))
    }

    fn with_rng(options: RegistryOptions, rng: StdRng) -> Self {
        Self {
            options,
            configs: RwLock::new(HashMap::new()),
            connections: TokioRwLock::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    /// Register or replace the config for `name`.
    ///
    /// Connections already cached for `name` (primary and replicas) are evicted;
    /// callers still holding them keep working until they drop them.
    pub async fn set_config(&self, name: impl Into<String>, config: DatabaseConfig) -> DbResult<()> {
        let name = name.into();
        config.validate()?;

        let mut connections = self.connections.write().await;
        let replicas = config.replicas.len();
        let replaced = self
            .configs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), config)
            .is_some();
        let evicted = Self::evict(&mut connections, &name);

        info!(
            database = %name,
            replicas,
            replaced,
            evicted = evicted.len(),
            "Database configured"
        );
        Ok(())
    }

    pub fn config(&self, name: &str) -> Option<DatabaseConfig> {
        self.configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Resolve `name` to a cached connection, opening it on first use.
    ///
    /// Writes go to the primary. Reads go to a random replica, or the primary
    /// when `name` has none.
    pub async fn get(&self, name: &str, for_write: bool) -> DbResult<Arc<Connection>> {
        // Configs are read under the cache lock, which set_config holds while it
        // swaps a config and evicts its cells.
        let (key, target, cell) = {
            let connections = self.connections.read().await;
            let (key, target) = self.resolve(name, for_write)?;
            match connections.get(&key) {
                Some(cell) => (key, target, Arc::clone(cell)),
                None => {
                    drop(connections);
                    let mut connections = self.connections.write().await;
                    let (key, target) = self.resolve(name, for_write)?;
                    let cell = Arc::clone(connections.entry(key.clone()).or_default());
                    (key, target, cell)
                }
            }
        };

        let options = ConnectionOptions {
            trace_statements: self.options.trace_statements,
            slow_statement_threshold: self.options.slow_statement_threshold,
            statement_timeout: None,
        };
        let connection = cell
            .get_or_try_init(|| async {
                debug!(database = %name, key = %key, "Opening connection");
                Connection::open(key.clone(), &target, options.clone())
                    .await
                    .map(Arc::new)
            })
            .await?;

        debug!(database = %name, key = %key, "Returning connection");
        Ok(Arc::clone(connection))
    }

    pub async fn write(&self, name: &str) -> DbResult<Arc<Connection>> {
        self.get(name, true).await
    }

    pub async fn read(&self, name: &str) -> DbResult<Arc<Connection>> {
        self.get(name, false).await
    }

    /// Pick the cache key and the single-server config it connects to.
    fn resolve(&self, name: &str, for_write: bool) -> DbResult<(String, DatabaseConfig)> {
        let configs = self.configs.read().unwrap_or_else(PoisonError::into_inner);
        let config = configs
            .get(name)
            .ok_or_else(|| DbError::config_not_found(name))?;

        if for_write || config.replicas.is_empty() {
            let primary = DatabaseConfig {
                replicas: Vec::new(),
                ..config.clone()
            };
            return Ok((name.to_string(), primary));
        }

        let index = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0..config.replicas.len());
        let mut replica = config.replicas[index].clone();
        if replica.table_prefix.is_none() {
            replica.table_prefix = config.table_prefix.clone();
        }
        if replica.statement_timeout_secs.is_none() {
            replica.statement_timeout_secs = config.statement_timeout_secs;
        }
        Ok((replica_key(name, index), replica))
    }

    /// Forget `name` and close its cached connections.
    pub async fn remove(&self, name: &str) -> Option<DatabaseConfig> {
        let (removed, evicted) = {
            let mut connections = self.connections.write().await;
            let removed = self
                .configs
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(name);
            (removed, Self::evict(&mut connections, name))
        };
        Self::close_cells(evicted).await;
        if removed.is_some() {
            info!(database = %name, "Database removed");
        }
        removed
    }

    /// Number of opened connections (initialized cells).
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.values().filter(|cell| cell.get().is_some()).count()
    }

    /// Close every cached connection. Configs are kept; later calls reconnect.
    pub async fn close_all(&self) {
        let drained: Vec<_> = {
            let mut connections = self.connections.write().await;
            connections.drain().collect()
        };
        Self::close_cells(drained).await;
    }

    fn evict(
        connections: &mut HashMap<String, ConnectionCell>,
        name: &str,
    ) -> Vec<(String, ConnectionCell)> {
        let replica_prefix = format!("{}_read_", name);
        let keys: Vec<_> = connections
            .keys()
            .filter(|key| {
                key.as_str() == name
                    || key
                        .strip_prefix(&replica_prefix)
                        .is_some_and(|index| index.parse::<usize>().is_ok())
            })
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| connections.remove_entry(&key))
            .collect()
    }

    async fn close_cells(cells: Vec<(String, ConnectionCell)>) {
        for (key, cell) in cells {
            if let Some(connection) = cell.get() {
                info!(key = %key, "Closing connection");
                if let Err(e) = connection.close().await {
                    debug!(key = %key, error = %e, "Close failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_config(dir: &tempfile::TempDir, file: &str) -> DatabaseConfig {
        DatabaseConfig::sqlite(dir.path().join(file).to_string_lossy())
    }

    #[test]
    fn test_replica_key() {
        assert_eq!(replica_key("main", 2), "main_read_2");
    }

    #[tokio::test]
    async fn test_missing_name_is_recoverable() {
        let registry = Registry::new(RegistryOptions::default());
        let err = registry.read("nope").await.unwrap_err();
        assert!(matches!(err, DbError::ConfigNotFound { ref name } if name == "nope"));
    }

    #[tokio::test]
    async fn test_resolve_routes_writes_to_primary() {
        let dir = tempfile::tempdir().unwrap();
        let config = sqlite_config(&dir, "primary.db")
            .with_table_prefix("ott_")
            .with_replica(sqlite_config(&dir, "r0.db"))
            .with_replica(sqlite_config(&dir, "r1.db"));
        let registry = Registry::with_seed(RegistryOptions::default(), 7);
        registry.set_config("main", config).await.unwrap();

        for _ in 0..20 {
            let (key, target) = registry.resolve("main", true).unwrap();
            assert_eq!(key, "main");
            assert!(target.replicas.is_empty());
            assert!(target.database.ends_with("primary.db"));
        }

        let mut seen = [false; 2];
        for _ in 0..200 {
            let (key, target) = registry.resolve("main", false).unwrap();
            let index: usize = key.strip_prefix("main_read_").unwrap().parse().unwrap();
            assert!(target.database.ends_with(&format!("r{}.db", index)));
            assert_eq!(target.table_prefix.as_deref(), Some("ott_"));
            seen[index] = true;
        }
        assert_eq!(seen, [true, true]);
    }

    #[tokio::test]
    async fn test_get_waiting_behind_set_config_sees_new_config() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new(RegistryOptions::default()));
        registry
            .set_config("main", sqlite_config(&dir, "main.db").with_table_prefix("old_"))
            .await
            .unwrap();

        let held = registry.connections.read().await;

        let writer = {
            let registry = Arc::clone(&registry);
            let config = sqlite_config(&dir, "main.db").with_table_prefix("new_");
            tokio::spawn(async move { registry.set_config("main", config).await })
        };
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        // Queued behind the pending set_config.
        let reader = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.write("main").await })
        };
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        drop(held);
        writer.await.unwrap().unwrap();
        let conn = reader.await.unwrap().unwrap();
        assert_eq!(conn.grammar().table_prefix(), "new_");

        let again = registry.write("main").await.unwrap();
        assert!(Arc::ptr_eq(&conn, &again));
    }

    #[test]
    fn test_evict_only_matches_own_keys() {
        let mut map: HashMap<String, ConnectionCell> = HashMap::new();
        for key in ["main", "main_read_0", "main_read_12", "main_reader", "mainx", "other"] {
            map.insert(key.to_string(), Arc::new(OnceCell::new()));
        }
        let mut evicted: Vec<_> = Registry::evict(&mut map, "main")
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        evicted.sort();
        assert_eq!(evicted, vec!["main", "main_read_0", "main_read_12"]);
        assert_eq!(map.len(), 3);
    }

    #[tokio::test]
    async fn test_set_config_rejects_nested_replicas() {
        let dir = tempfile::tempdir().unwrap();
        let nested = sqlite_config(&dir, "r0.db").with_replica(sqlite_config(&dir, "r00.db"));
        let config = sqlite_config(&dir, "primary.db").with_replica(nested);
        let registry = Registry::new(RegistryOptions::default());
        let err = registry.set_config("main", config).await.unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
        assert!(registry.names().is_empty());
    }
}
