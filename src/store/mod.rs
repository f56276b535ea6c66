//! Persistence layer: the `Database` trait and its two backends.

pub mod libsql_backend;
pub mod migrations;
pub mod postgres_backend;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use postgres_backend::PostgresBackend;
pub use traits::Database;
