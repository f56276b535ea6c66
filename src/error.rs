//! Error types for mailbin.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error(
        "No database configured. Set MAILBIN_DB_PATH for a local libSQL file \
         or DATABASE_URL for Postgres"
    )]
    NoDatabase,
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: i64 },

    /// Unique-constraint violation, kept distinct so the API layer can
    /// answer 409 instead of a generic 500.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Ingestion-pipeline errors.
///
/// An unknown mailbox is *not* represented here — that case is a terminal
/// reject (`Delivery::Rejected`), not an error. Everything in this enum
/// happens after a valid mailbox was matched and is safe for the upstream
/// transport to retry with the same raw message.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to read raw message stream: {0}")]
    Stream(String),

    #[error("Failed to decode message content: {0}")]
    Decode(String),

    #[error("Failed to persist message: {0}")]
    Storage(#[from] DatabaseError),
}
