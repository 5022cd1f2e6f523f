// Statistics aggregator
// Corpus statistics snapshots plus an observer registry notified on every corpus change

#[cfg(test)]
mod tests;

use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use tracing::{debug, error, warn};

use crate::config::ImportSettings;
use crate::database::Database;
use crate::database::sqlite::models::{DatabaseStats, ImportOperation};
use crate::{Result, VaultError};

/// Number of finished import runs included in a snapshot
pub const RECENT_OPERATIONS_LIMIT: i64 = 5;

/// Full statistics snapshot pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorDbStatistics {
    pub current_operation: Option<ImportOperation>,
    /// Most recently started finished runs, newest first
    pub recent_operations: Vec<ImportOperation>,
    pub database_stats: DatabaseStats,
    pub import_settings: ImportSettings,
}

type Listener = dyn Fn(&VectorDbStatistics) -> anyhow::Result<()> + Send + Sync;

#[derive(Default)]
struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Arc<Listener>)>>,
}

impl ListenerRegistry {
    fn insert(&self, listener: Arc<Listener>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    fn remove(&self, id: u64) -> bool {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    fn snapshot(&self) -> Vec<(u64, Arc<Listener>)> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Disposer returned by [`StatisticsAggregator::on_update`].
/// The listener stays registered until this is disposed or dropped.
#[must_use = "dropping a subscription unregisters its listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    /// Unregister the listener. Returns false if it was already gone.
    #[inline]
    pub fn dispose(self) -> bool {
        self.unregister()
    }

    fn unregister(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(self.id))
    }
}

impl Drop for Subscription {
    #[inline]
    fn drop(&mut self) {
        self.unregister();
    }
}

impl std::fmt::Debug for Subscription {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

pub struct StatisticsAggregator {
    import_settings: ImportSettings,
    database: OnceLock<Database>,
    registry: Arc<ListenerRegistry>,
}

impl std::fmt::Debug for StatisticsAggregator {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsAggregator")
            .field("attached", &self.database.get().is_some())
            .field("listeners", &self.registry.len())
            .finish()
    }
}

impl StatisticsAggregator {
    #[inline]
    pub fn new(import_settings: ImportSettings) -> Self {
        Self {
            import_settings,
            database: OnceLock::new(),
            registry: Arc::new(ListenerRegistry::default()),
        }
    }

    /// Bind the metadata store snapshots are read from. Later calls are ignored.
    #[inline]
    pub fn attach(&self, database: Database) {
        if self.database.set(database).is_err() {
            debug!("Statistics aggregator already attached to a database");
        }
    }

    #[inline]
    pub async fn get_statistics(&self) -> Result<VectorDbStatistics> {
        let database = self
            .database
            .get()
            .filter(|database| !database.is_closed())
            .ok_or(VaultError::NotInitialized)?;

        let current_operation = database
            .current_import()
            .await
            .map_err(|e| VaultError::database(&e))?;
        let recent_operations = database
            .recent_imports(RECENT_OPERATIONS_LIMIT)
            .await
            .map_err(|e| VaultError::database(&e))?;
        let database_stats = database
            .get_stats()
            .await
            .map_err(|e| VaultError::database(&e))?;

        Ok(VectorDbStatistics {
            current_operation,
            recent_operations,
            database_stats,
            import_settings: self.import_settings.clone(),
        })
    }

    /// Register a listener called with a fresh snapshot after every corpus change
    #[inline]
    pub fn on_update<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&VectorDbStatistics) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.registry.insert(Arc::new(listener));
        debug!("Registered statistics listener {}", id);
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    #[inline]
    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    /// Push a fresh snapshot to every listener. Failures are logged, never returned.
    /// Returns the number of listeners that handled the snapshot successfully.
    #[inline]
    pub async fn notify(&self) -> usize {
        let listeners = self.registry.snapshot();
        if listeners.is_empty() {
            return 0;
        }

        let statistics = match self.get_statistics().await {
            Ok(statistics) => statistics,
            Err(e) => {
                warn!("Skipping statistics notification: {}", e);
                return 0;
            }
        };

        Self::dispatch(&listeners, &statistics)
    }

    fn dispatch(listeners: &[(u64, Arc<Listener>)], statistics: &VectorDbStatistics) -> usize {
        let mut delivered = 0;
        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(statistics))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!("Statistics listener {} failed: {:#}", id, e),
                Err(_) => error!("Statistics listener {} panicked", id),
            }
        }
        delivered
    }
}
