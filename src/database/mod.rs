/*!
 * SQLite persistence for tasks, watchers, settings, and history.
 *
 * The store is the single source of truth for task status; all mutations
 * flow through the scheduler so no two writers ever race on one task id.
 */

pub mod connection;
pub mod models;
pub mod repository;
pub mod schema;

pub use connection::DatabaseConnection;
pub use repository::Repository;
