//! Database storage for entities and relation links.
//!
//! ```text
//! Backend / EntityRepository traits (backend/mod.rs, mutation/repository.rs)
//!     ↓
//! Database-specific implementations
//!     └── sqlite/ (SQLite via sqlx, schema bootstrap)
//! ```

pub mod config;
pub mod sqlite;

pub use config::DatabaseBackendConfig;
pub use sqlite::SqliteRepository;
