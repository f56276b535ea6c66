//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and
//! safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    Alias, AliasSummary, Database, Domain, DomainSummary, EmailRecord, EmailSummary, NewEmail,
};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_db(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_db(db).await
    }

    async fn from_db(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        // Alias deletion relies on the emails FK cascade.
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to enable foreign keys: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a libsql error, routing unique-constraint violations to `Conflict`.
fn map_write_err(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint") {
        DatabaseError::Conflict(msg)
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to an Alias.
///
/// Column order: 0:id, 1:alias, 2:domain, 3:full_address, 4:description,
/// 5:is_active, 6:created_at
fn row_to_alias(row: &libsql::Row) -> Result<Alias, libsql::Error> {
    let created_str: String = row.get(6)?;
    Ok(Alias {
        id: row.get(0)?,
        alias: row.get(1)?,
        domain: row.get(2)?,
        full_address: row.get(3)?,
        description: row.get::<String>(4).ok(),
        is_active: row.get::<i64>(5)? != 0,
        created_at: parse_datetime(&created_str),
    })
}

const ALIAS_COLUMNS: &str = "id, alias, domain, full_address, description, is_active, created_at";

const EMAIL_COLUMNS: &str = "id, alias_id, from_address, to_address, subject, body_text, \
                             body_html, verification_code, raw_headers, received_at";

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Aliases ─────────────────────────────────────────────────────

    async fn find_active_alias(&self, full_address: &str) -> Result<Option<Alias>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ALIAS_COLUMNS} FROM email_aliases \
                     WHERE full_address = ?1 AND is_active = 1"
                ),
                params![full_address],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_active_alias: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let alias = row_to_alias(&row)
                    .map_err(|e| DatabaseError::Query(format!("find_active_alias row: {e}")))?;
                Ok(Some(alias))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_active_alias: {e}"))),
        }
    }

    async fn create_alias(
        &self,
        alias: &str,
        domain: &str,
        description: Option<&str>,
    ) -> Result<Alias, DatabaseError> {
        let conn = self.conn();
        let alias = alias.to_lowercase();
        let domain = domain.to_lowercase();
        let full_address = format!("{alias}@{domain}");
        let now = Utc::now();

        // Auto-provision the domain: unknown domains are created, inactive
        // ones reactivated. Never an error.
        conn.execute(
            "INSERT INTO domains (domain, is_active, created_at) VALUES (?1, 1, ?2)
             ON CONFLICT(domain) DO UPDATE SET is_active = 1",
            params![domain.clone(), now.to_rfc3339()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_alias (domain upsert): {e}")))?;

        let mut rows = conn
            .query(
                "INSERT INTO email_aliases (alias, domain, full_address, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING id",
                params![
                    alias.clone(),
                    domain.clone(),
                    full_address.clone(),
                    opt_text(description),
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_write_err("create_alias", e))?;

        let id: i64 = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("create_alias id: {e}")))?,
            Ok(None) => return Err(DatabaseError::Query("create_alias: no id returned".into())),
            Err(e) => return Err(map_write_err("create_alias", e)),
        };

        debug!(id, full_address = %full_address, "Alias created");
        Ok(Alias {
            id,
            alias,
            domain,
            full_address,
            description: description.map(str::to_string),
            is_active: true,
            created_at: now,
        })
    }

    async fn list_aliases(&self) -> Result<Vec<AliasSummary>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ALIAS_COLUMNS},
                            (SELECT COUNT(*) FROM emails e WHERE e.alias_id = email_aliases.id)
                                AS email_count
                     FROM email_aliases
                     ORDER BY created_at DESC, id DESC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_aliases: {e}")))?;

        let mut aliases = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let base = row_to_alias(&row)
                .map_err(|e| DatabaseError::Query(format!("list_aliases row: {e}")))?;
            let email_count: i64 = row
                .get(7)
                .map_err(|e| DatabaseError::Query(format!("list_aliases count: {e}")))?;
            aliases.push(AliasSummary {
                id: base.id,
                alias: base.alias,
                domain: base.domain,
                full_address: base.full_address,
                description: base.description,
                is_active: base.is_active,
                created_at: base.created_at,
                email_count,
            });
        }
        Ok(aliases)
    }

    async fn toggle_alias(&self, id: i64, is_active: bool) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE email_aliases SET is_active = ?1 WHERE id = ?2",
                params![is_active as i64, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("toggle_alias: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "alias".into(),
                id,
            });
        }
        debug!(id, is_active, "Alias toggled");
        Ok(())
    }

    async fn delete_alias(&self, id: i64) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute("DELETE FROM email_aliases WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_alias: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "alias".into(),
                id,
            });
        }
        debug!(id, "Alias deleted (emails cascade)");
        Ok(())
    }

    // ── Emails ──────────────────────────────────────────────────────

    async fn insert_email(&self, email: NewEmail<'_>) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO emails (alias_id, from_address, to_address, subject, body_text,
                     body_html, verification_code, raw_headers, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 RETURNING id",
                params![
                    email.alias_id,
                    email.from_address,
                    email.to_address,
                    email.subject,
                    email.body_text,
                    email.body_html,
                    opt_text(email.verification_code),
                    email.raw_headers,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("insert_email id: {e}")))?;
                debug!(id, alias_id = email.alias_id, "Email inserted");
                Ok(id)
            }
            Ok(None) => Err(DatabaseError::Query("insert_email: no id returned".into())),
            Err(e) => Err(DatabaseError::Query(format!("insert_email: {e}"))),
        }
    }

    async fn emails_for_alias(
        &self,
        alias_id: i64,
        limit: i64,
    ) -> Result<Vec<EmailSummary>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, from_address, subject, verification_code, received_at
                 FROM emails
                 WHERE alias_id = ?1
                 ORDER BY received_at DESC, id DESC
                 LIMIT ?2",
                params![alias_id, limit],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("emails_for_alias: {e}")))?;

        let mut emails = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let received_str: String = row
                .get(4)
                .map_err(|e| DatabaseError::Query(format!("emails_for_alias row: {e}")))?;
            emails.push(EmailSummary {
                id: row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("emails_for_alias row: {e}")))?,
                from_address: row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("emails_for_alias row: {e}")))?,
                subject: row
                    .get(2)
                    .map_err(|e| DatabaseError::Query(format!("emails_for_alias row: {e}")))?,
                verification_code: row.get::<String>(3).ok(),
                received_at: parse_datetime(&received_str),
            });
        }
        Ok(emails)
    }

    async fn get_email(&self, id: i64) -> Result<Option<EmailRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let received_str: String = row
                    .get(9)
                    .map_err(|e| DatabaseError::Query(format!("get_email row: {e}")))?;
                let rec = EmailRecord {
                    id: row
                        .get(0)
                        .map_err(|e| DatabaseError::Query(format!("get_email row: {e}")))?,
                    alias_id: row
                        .get(1)
                        .map_err(|e| DatabaseError::Query(format!("get_email row: {e}")))?,
                    from_address: row
                        .get(2)
                        .map_err(|e| DatabaseError::Query(format!("get_email row: {e}")))?,
                    to_address: row
                        .get(3)
                        .map_err(|e| DatabaseError::Query(format!("get_email row: {e}")))?,
                    subject: row
                        .get(4)
                        .map_err(|e| DatabaseError::Query(format!("get_email row: {e}")))?,
                    body_text: row
                        .get(5)
                        .map_err(|e| DatabaseError::Query(format!("get_email row: {e}")))?,
                    body_html: row
                        .get(6)
                        .map_err(|e| DatabaseError::Query(format!("get_email row: {e}")))?,
                    verification_code: row.get::<String>(7).ok(),
                    raw_headers: row
                        .get(8)
                        .map_err(|e| DatabaseError::Query(format!("get_email row: {e}")))?,
                    received_at: parse_datetime(&received_str),
                };
                Ok(Some(rec))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_email: {e}"))),
        }
    }

    async fn latest_code(&self, alias_id: i64) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT verification_code FROM emails
                 WHERE alias_id = ?1 AND verification_code IS NOT NULL
                 ORDER BY received_at DESC, id DESC
                 LIMIT 1",
                params![alias_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("latest_code: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("latest_code: {e}"))),
        }
    }

    // ── Domains ─────────────────────────────────────────────────────

    async fn list_domains(&self) -> Result<Vec<DomainSummary>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT d.id, d.domain, d.is_active, d.created_at,
                        (SELECT COUNT(*) FROM email_aliases ea WHERE ea.domain = d.domain)
                            AS alias_count
                 FROM domains d
                 ORDER BY d.created_at DESC, d.id DESC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_domains: {e}")))?;

        let mut domains = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let created_str: String = row
                .get(3)
                .map_err(|e| DatabaseError::Query(format!("list_domains row: {e}")))?;
            domains.push(DomainSummary {
                id: row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("list_domains row: {e}")))?,
                domain: row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("list_domains row: {e}")))?,
                is_active: row
                    .get::<i64>(2)
                    .map_err(|e| DatabaseError::Query(format!("list_domains row: {e}")))?
                    != 0,
                created_at: parse_datetime(&created_str),
                alias_count: row
                    .get(4)
                    .map_err(|e| DatabaseError::Query(format!("list_domains row: {e}")))?,
            });
        }
        Ok(domains)
    }

    async fn add_domain(&self, domain: &str) -> Result<Domain, DatabaseError> {
        let conn = self.conn();
        let domain = domain.to_lowercase();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO domains (domain, is_active, created_at) VALUES (?1, 1, ?2)
             ON CONFLICT(domain) DO UPDATE SET is_active = 1",
            params![domain.clone(), now.to_rfc3339()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("add_domain: {e}")))?;

        let mut rows = conn
            .query(
                "SELECT id, domain, is_active, created_at FROM domains WHERE domain = ?1",
                params![domain.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_domain: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let created_str: String = row
                    .get(3)
                    .map_err(|e| DatabaseError::Query(format!("add_domain row: {e}")))?;
                Ok(Domain {
                    id: row
                        .get(0)
                        .map_err(|e| DatabaseError::Query(format!("add_domain row: {e}")))?,
                    domain: row
                        .get(1)
                        .map_err(|e| DatabaseError::Query(format!("add_domain row: {e}")))?,
                    is_active: row
                        .get::<i64>(2)
                        .map_err(|e| DatabaseError::Query(format!("add_domain row: {e}")))?
                        != 0,
                    created_at: parse_datetime(&created_str),
                })
            }
            _ => Err(DatabaseError::Query(
                "add_domain: row missing after upsert".into(),
            )),
        }
    }

    async fn remove_domain(&self, id: i64) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE domains SET is_active = 0 WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("remove_domain: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "domain".into(),
                id,
            });
        }
        Ok(())
    }

    async fn is_domain_active(&self, domain: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT is_active FROM domains WHERE domain = ?1",
                params![domain.to_lowercase()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_domain_active: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("is_domain_active row: {e}")))?
                != 0),
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn sample_email(alias_id: i64, code: Option<&str>) -> NewEmail<'_> {
        NewEmail {
            alias_id,
            from_address: "sender@example.org",
            to_address: "login@mailbin.dev",
            subject: "Your login",
            body_text: "Your code is 482913",
            body_html: "",
            verification_code: code,
            raw_headers: "From: sender@example.org\nSubject: Your login",
        }
    }

    #[tokio::test]
    async fn create_and_find_alias() {
        let db = memory_db().await;
        let alias = db.create_alias("Login", "Mailbin.DEV", None).await.unwrap();
        assert_eq!(alias.full_address, "login@mailbin.dev");
        assert!(alias.is_active);

        let found = db.find_active_alias("login@mailbin.dev").await.unwrap();
        assert_eq!(found.map(|a| a.id), Some(alias.id));
    }

    #[tokio::test]
    async fn duplicate_full_address_is_conflict() {
        let db = memory_db().await;
        db.create_alias("login", "mailbin.dev", None).await.unwrap();
        let err = db
            .create_alias("login", "mailbin.dev", Some("again"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn conflict_applies_even_against_inactive_alias() {
        let db = memory_db().await;
        let alias = db.create_alias("login", "mailbin.dev", None).await.unwrap();
        db.toggle_alias(alias.id, false).await.unwrap();

        let err = db
            .create_alias("login", "mailbin.dev", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));
    }

    #[tokio::test]
    async fn inactive_alias_is_not_found() {
        let db = memory_db().await;
        let alias = db.create_alias("login", "mailbin.dev", None).await.unwrap();
        db.toggle_alias(alias.id, false).await.unwrap();

        assert!(
            db.find_active_alias("login@mailbin.dev")
                .await
                .unwrap()
                .is_none()
        );
        // Still visible in listings.
        assert_eq!(db.list_aliases().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_alias_cascades_to_emails() {
        let db = memory_db().await;
        let alias = db.create_alias("login", "mailbin.dev", None).await.unwrap();
        for _ in 0..3 {
            db.insert_email(sample_email(alias.id, Some("482913")))
                .await
                .unwrap();
        }

        let listed = db.list_aliases().await.unwrap();
        assert_eq!(listed[0].email_count, 3);

        db.delete_alias(alias.id).await.unwrap();
        assert!(db.list_aliases().await.unwrap().is_empty());
        assert_eq!(db.latest_code(alias.id).await.unwrap(), None);
        assert!(db.emails_for_alias(alias.id, 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn latest_code_skips_null_codes() {
        let db = memory_db().await;
        let alias = db.create_alias("login", "mailbin.dev", None).await.unwrap();
        db.insert_email(sample_email(alias.id, Some("111111")))
            .await
            .unwrap();
        db.insert_email(sample_email(alias.id, Some("222222")))
            .await
            .unwrap();
        db.insert_email(sample_email(alias.id, None)).await.unwrap();

        assert_eq!(
            db.latest_code(alias.id).await.unwrap(),
            Some("222222".to_string())
        );
    }

    #[tokio::test]
    async fn domain_auto_provisioned_on_alias_creation() {
        let db = memory_db().await;
        assert!(!db.is_domain_active("mailbin.dev").await.unwrap());

        db.create_alias("login", "mailbin.dev", None).await.unwrap();
        assert!(db.is_domain_active("mailbin.dev").await.unwrap());
    }

    #[tokio::test]
    async fn soft_deleted_domain_reactivates_on_alias_creation() {
        let db = memory_db().await;
        let domain = db.add_domain("mailbin.dev").await.unwrap();
        db.remove_domain(domain.id).await.unwrap();
        assert!(!db.is_domain_active("mailbin.dev").await.unwrap());

        db.create_alias("login", "mailbin.dev", None).await.unwrap();
        assert!(db.is_domain_active("mailbin.dev").await.unwrap());

        // Soft delete keeps the row, same id.
        let listed = db.list_domains().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, domain.id);
        assert_eq!(listed[0].alias_count, 1);
    }

    #[tokio::test]
    async fn data_survives_reopen_of_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailbin.db");

        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.create_alias("login", "mailbin.dev", None).await.unwrap();
        }

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let found = db.find_active_alias("login@mailbin.dev").await.unwrap();
        assert!(found.is_some());
        // Reopening must not re-apply migrations.
        assert_eq!(db.list_aliases().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_email_round_trip() {
        let db = memory_db().await;
        let alias = db.create_alias("login", "mailbin.dev", None).await.unwrap();
        let id = db
            .insert_email(sample_email(alias.id, Some("482913")))
            .await
            .unwrap();

        let rec = db.get_email(id).await.unwrap().unwrap();
        assert_eq!(rec.alias_id, alias.id);
        assert_eq!(rec.verification_code.as_deref(), Some("482913"));
        assert_eq!(
            rec.raw_headers,
            "From: sender@example.org\nSubject: Your login"
        );

        assert!(db.get_email(id + 1000).await.unwrap().is_none());
    }
}
