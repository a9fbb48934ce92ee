//! Database access layer.
//!
//! This module provides:
//! - The database service contract the broker consumes
//! - A SQLite implementation of it
//! - Parameter binding and row decoding for SQLite

pub mod params;
pub mod service;
pub mod sqlite;
pub mod types;

pub use service::DatabaseService;
pub use sqlite::{SqliteDatabaseService, SqliteHandle, SqliteServiceOptions};
