//! Database module: models and schema for persistent storage.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows
//! - `schema.rs`: SQL DDL for initializing the database (SQLite-first)
//! - `traits.rs`: the `ProfileStore` storage seam
//! - `sqlite.rs`: sqlx-backed profile and session storage

pub mod models;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use models::LocalProfile;
pub use schema::SQLITE_INIT;
pub use sqlite::{ProfileStorage, SessionStorage, SqlitePool, connect};
pub use traits::ProfileStore;
