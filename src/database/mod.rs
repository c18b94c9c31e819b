/*!
 * Database module for persistent storage.
 *
 * This module provides SQLite-based persistence for:
 * - The durable job queue, shared by every worker process on the file
 * - Resource snapshots and their translation status
 * - Stored translations, one per resource and language
 */

pub mod connection;
pub mod models;
pub mod repository;
pub mod schema;

// Re-export main types
pub use connection::{DatabaseConnection, DatabaseStats};
pub use repository::{JobCounts, Repository};
