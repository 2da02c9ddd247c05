use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::AppConfig;
use crate::error::{AppError, Result};
use crate::otg::OriginalIdentity;

const APP_CONFIG_KEY: &str = "app_config";
const ORIGINAL_IDENTITY_KEY: &str = "original_identity";
const STOPPED_HAL_SERVICE_KEY: &str = "stopped_hal_service";

/// Durable gadget state that must survive process restarts
#[async_trait]
pub trait GadgetStateStore: Send + Sync {
    /// Identity backed up before the first spoof
    async fn original_identity(&self) -> Option<OriginalIdentity>;

    async fn save_original_identity(&self, identity: &OriginalIdentity) -> Result<()>;

    async fn clear_original_identity(&self) -> Result<()>;

    /// USB HAL service stopped during enable
    async fn stopped_hal_service(&self) -> Option<String>;

    async fn save_stopped_hal_service(&self, name: &str) -> Result<()>;

    async fn clear_stopped_hal_service(&self) -> Result<()>;
}

/// Configuration store backed by SQLite
///
/// Uses `ArcSwap` for lock-free reads of the application config. Gadget
/// state lives in the same key/value table under its own keys.
#[derive(Clone)]
pub struct ConfigStore {
    pool: Pool<Sqlite>,
    cache: Arc<ArcSwap<AppConfig>>,
    change_tx: broadcast::Sender<ConfigChange>,
}

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub key: String,
}

impl ConfigStore {
    /// Open (or create) the store at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            // Single writer; the gadget mutex already serializes state writes
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .connect(&db_url)
            .await?;

        Self::init_schema(&pool).await?;

        let config = Self::load_config(&pool).await?;
        let cache = Arc::new(ArcSwap::from_pointee(config));

        let (change_tx, _) = broadcast::channel(16);

        Ok(Self {
            pool,
            cache,
            change_tx,
        })
    }

    async fn init_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn load_config(pool: &Pool<Sqlite>) -> Result<AppConfig> {
        match Self::get_value(pool, APP_CONFIG_KEY).await? {
            Some(json) => serde_json::from_str(&json).map_err(|e| AppError::Config(e.to_string())),
            None => {
                let config = AppConfig::default();
                Self::set_value(pool, APP_CONFIG_KEY, &serde_json::to_string(&config)?).await?;
                Ok(config)
            }
        }
    }

    async fn get_value(pool: &Pool<Sqlite>, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set_value(pool: &Pool<Sqlite>, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn delete_value(pool: &Pool<Sqlite>, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM config WHERE key = ?1")
            .bind(key)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Update configuration with a closure
    ///
    /// Read-modify-write; the last writer wins.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let current = self.cache.load();
        let mut config = (**current).clone();
        f(&mut config);

        Self::set_value(&self.pool, APP_CONFIG_KEY, &serde_json::to_string(&config)?).await?;
        self.cache.store(Arc::new(config));
        self.notify(APP_CONFIG_KEY);
        Ok(())
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }

    fn notify(&self, key: &str) {
        let _ = self.change_tx.send(ConfigChange {
            key: key.to_string(),
        });
    }

    async fn get_logged(&self, key: &str) -> Option<String> {
        match Self::get_value(&self.pool, key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to read {} from store: {}", key, e);
                None
            }
        }
    }
}

#[async_trait]
impl GadgetStateStore for ConfigStore {
    async fn original_identity(&self) -> Option<OriginalIdentity> {
        let json = self.get_logged(ORIGINAL_IDENTITY_KEY).await?;
        match serde_json::from_str(&json) {
            Ok(identity) => Some(identity),
            Err(e) => {
                tracing::warn!("Discarding unreadable identity backup: {}", e);
                None
            }
        }
    }

    async fn save_original_identity(&self, identity: &OriginalIdentity) -> Result<()> {
        let json = serde_json::to_string(identity)?;
        Self::set_value(&self.pool, ORIGINAL_IDENTITY_KEY, &json).await?;
        self.notify(ORIGINAL_IDENTITY_KEY);
        Ok(())
    }

    async fn clear_original_identity(&self) -> Result<()> {
        Self::delete_value(&self.pool, ORIGINAL_IDENTITY_KEY).await?;
        self.notify(ORIGINAL_IDENTITY_KEY);
        Ok(())
    }

    async fn stopped_hal_service(&self) -> Option<String> {
        self.get_logged(STOPPED_HAL_SERVICE_KEY).await
    }

    async fn save_stopped_hal_service(&self, name: &str) -> Result<()> {
        Self::set_value(&self.pool, STOPPED_HAL_SERVICE_KEY, name).await
    }

    async fn clear_stopped_hal_service(&self) -> Result<()> {
        Self::delete_value(&self.pool, STOPPED_HAL_SERVICE_KEY).await
    }
}

/// Process-lifetime gadget state (no persistence)
#[derive(Default)]
pub struct MemoryStateStore {
    identity: Mutex<Option<OriginalIdentity>>,
    hal_service: Mutex<Option<String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GadgetStateStore for MemoryStateStore {
    async fn original_identity(&self) -> Option<OriginalIdentity> {
        self.identity.lock().clone()
    }

    async fn save_original_identity(&self, identity: &OriginalIdentity) -> Result<()> {
        *self.identity.lock() = Some(identity.clone());
        Ok(())
    }

    async fn clear_original_identity(&self) -> Result<()> {
        *self.identity.lock() = None;
        Ok(())
    }

    async fn stopped_hal_service(&self) -> Option<String> {
        self.hal_service.lock().clone()
    }

    async fn save_stopped_hal_service(&self, name: &str) -> Result<()> {
        *self.hal_service.lock() = Some(name.to_string());
        Ok(())
    }

    async fn clear_stopped_hal_service(&self) -> Result<()> {
        *self.hal_service.lock() = None;
        Ok(())
    }
}
