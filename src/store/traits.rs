//! Backend-agnostic `Database` trait — single async interface for all
//! persistence. Implemented by the libSQL and Postgres backends; selected
//! once at startup by configuration inspection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DatabaseError;

/// A provisioned mailbox endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Alias {
    pub id: i64,
    /// Local part, lowercase.
    pub alias: String,
    /// Owning domain, lowercase.
    pub domain: String,
    /// `alias@domain`, lowercase — the inbound lookup key.
    pub full_address: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// An alias row as listed by the API, with its message count.
#[derive(Debug, Clone, Serialize)]
pub struct AliasSummary {
    pub id: i64,
    pub alias: String,
    pub domain: String,
    pub full_address: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub email_count: i64,
}

/// A new email record to persist. Borrowed — built once per delivery.
#[derive(Debug)]
pub struct NewEmail<'a> {
    pub alias_id: i64,
    pub from_address: &'a str,
    /// The full resolved address actually matched.
    pub to_address: &'a str,
    pub subject: &'a str,
    pub body_text: &'a str,
    pub body_html: &'a str,
    pub verification_code: Option<&'a str>,
    /// Newline-joined `"key: value"` block, insertion order preserved.
    pub raw_headers: &'a str,
}

/// A received message, in list form.
#[derive(Debug, Clone, Serialize)]
pub struct EmailSummary {
    pub id: i64,
    pub from_address: String,
    pub subject: String,
    pub verification_code: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// A received message, full detail.
#[derive(Debug, Clone, Serialize)]
pub struct EmailRecord {
    pub id: i64,
    pub alias_id: i64,
    pub from_address: String,
    pub to_address: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
    pub verification_code: Option<String>,
    pub raw_headers: String,
    pub received_at: DateTime<Utc>,
}

/// A receiving domain. Soft-deletable: removal flips `is_active` off.
#[derive(Debug, Clone, Serialize)]
pub struct Domain {
    pub id: i64,
    pub domain: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A domain row as listed by the API, with its alias count.
#[derive(Debug, Clone, Serialize)]
pub struct DomainSummary {
    pub id: i64,
    pub domain: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub alias_count: i64,
}

/// Backend-agnostic database trait covering aliases, emails, and domains.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Aliases ─────────────────────────────────────────────────────

    /// Look up an *active* alias by its full address (never by local part
    /// alone — the same local part may exist under several domains).
    async fn find_active_alias(&self, full_address: &str) -> Result<Option<Alias>, DatabaseError>;

    /// Create an alias. Lowercases inputs, derives the full address, and
    /// auto-provisions (or reactivates) the domain record. A duplicate full
    /// address surfaces as `DatabaseError::Conflict`.
    async fn create_alias(
        &self,
        alias: &str,
        domain: &str,
        description: Option<&str>,
    ) -> Result<Alias, DatabaseError>;

    /// List all aliases with their email counts, newest first.
    async fn list_aliases(&self) -> Result<Vec<AliasSummary>, DatabaseError>;

    /// Flip an alias active/inactive.
    async fn toggle_alias(&self, id: i64, is_active: bool) -> Result<(), DatabaseError>;

    /// Hard-delete an alias. Its emails go with it via the FK cascade.
    async fn delete_alias(&self, id: i64) -> Result<(), DatabaseError>;

    // ── Emails ──────────────────────────────────────────────────────

    /// Insert a received email. Returns the generated id.
    async fn insert_email(&self, email: NewEmail<'_>) -> Result<i64, DatabaseError>;

    /// Latest emails for an alias, newest first.
    async fn emails_for_alias(
        &self,
        alias_id: i64,
        limit: i64,
    ) -> Result<Vec<EmailSummary>, DatabaseError>;

    /// Full detail for one email.
    async fn get_email(&self, id: i64) -> Result<Option<EmailRecord>, DatabaseError>;

    /// Most recent non-null verification code for an alias.
    async fn latest_code(&self, alias_id: i64) -> Result<Option<String>, DatabaseError>;

    // ── Domains ─────────────────────────────────────────────────────

    /// List all domains with their alias counts, newest first.
    async fn list_domains(&self) -> Result<Vec<DomainSummary>, DatabaseError>;

    /// Add a domain, reactivating it if it already exists inactive.
    async fn add_domain(&self, domain: &str) -> Result<Domain, DatabaseError>;

    /// Soft-delete a domain (sets `is_active = false`).
    async fn remove_domain(&self, id: i64) -> Result<(), DatabaseError>;

    /// Whether a domain exists and is active.
    async fn is_domain_active(&self, domain: &str) -> Result<bool, DatabaseError>;
}
