//! Persistent settings
//!
//! A flat key/value table in SQLite holds the bridge settings (one JSON
//! document) and the gadget's durable state (identity backup, stopped HAL).

pub mod schema;
pub mod store;

pub use schema::{AppConfig, BridgeSettings, GadgetConfig};
pub use store::{ConfigChange, ConfigStore, GadgetStateStore, MemoryStateStore};
