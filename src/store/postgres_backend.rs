//! Postgres backend — async `Database` trait implementation over a sqlx
//! connection pool.
//!
//! Mirrors the libSQL backend operation for operation; the schema uses
//! native types (BIGSERIAL, BOOLEAN, TIMESTAMPTZ) instead of the SQLite
//! conventions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::traits::{
    Alias, AliasSummary, Database, Domain, DomainSummary, EmailRecord, EmailSummary, NewEmail,
};

/// Postgres database backend.
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Connect to the given database URL and run the schema setup.
    pub async fn connect(url: &str) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to connect to Postgres: {e}")))?;

        let backend = Self { pool };
        backend.init_schema().await?;
        info!("Postgres database connected");
        Ok(backend)
    }
}

/// Map a sqlx error, routing unique-constraint violations to `Conflict`.
fn map_write_err(op: &str, e: sqlx::Error) -> DatabaseError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.code().as_deref() == Some("23505")
    {
        return DatabaseError::Conflict(db_err.message().to_string());
    }
    DatabaseError::Query(format!("{op}: {e}"))
}

fn map_err(op: &str, e: sqlx::Error) -> DatabaseError {
    DatabaseError::Query(format!("{op}: {e}"))
}

fn row_to_alias(row: &PgRow) -> Result<Alias, sqlx::Error> {
    Ok(Alias {
        id: row.try_get("id")?,
        alias: row.try_get("alias")?,
        domain: row.try_get("domain")?,
        full_address: row.try_get("full_address")?,
        description: row.try_get("description")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS email_aliases (
        id BIGSERIAL PRIMARY KEY,
        alias TEXT NOT NULL,
        domain TEXT NOT NULL,
        full_address TEXT NOT NULL UNIQUE,
        description TEXT,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    CREATE INDEX IF NOT EXISTS idx_aliases_full_address ON email_aliases(full_address);

    CREATE TABLE IF NOT EXISTS emails (
        id BIGSERIAL PRIMARY KEY,
        alias_id BIGINT NOT NULL REFERENCES email_aliases(id) ON DELETE CASCADE,
        from_address TEXT NOT NULL,
        to_address TEXT NOT NULL,
        subject TEXT NOT NULL DEFAULT '',
        body_text TEXT NOT NULL DEFAULT '',
        body_html TEXT NOT NULL DEFAULT '',
        verification_code TEXT,
        raw_headers TEXT NOT NULL DEFAULT '',
        received_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    CREATE INDEX IF NOT EXISTS idx_emails_alias ON emails(alias_id);
    CREATE INDEX IF NOT EXISTS idx_emails_received ON emails(received_at);

    CREATE TABLE IF NOT EXISTS domains (
        id BIGSERIAL PRIMARY KEY,
        domain TEXT NOT NULL UNIQUE,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
"#;

#[async_trait]
impl Database for PostgresBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(format!("Postgres schema setup failed: {e}")))?;
        Ok(())
    }

    // ── Aliases ─────────────────────────────────────────────────────

    async fn find_active_alias(&self, full_address: &str) -> Result<Option<Alias>, DatabaseError> {
        let row = sqlx::query(
            "SELECT id, alias, domain, full_address, description, is_active, created_at
             FROM email_aliases
             WHERE full_address = $1 AND is_active = TRUE",
        )
        .bind(full_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err("find_active_alias", e))?;

        row.map(|r| row_to_alias(&r))
            .transpose()
            .map_err(|e| map_err("find_active_alias row", e))
    }

    async fn create_alias(
        &self,
        alias: &str,
        domain: &str,
        description: Option<&str>,
    ) -> Result<Alias, DatabaseError> {
        let alias = alias.to_lowercase();
        let domain = domain.to_lowercase();
        let full_address = format!("{alias}@{domain}");

        // Auto-provision/reactivate the domain.
        sqlx::query(
            "INSERT INTO domains (domain, is_active) VALUES ($1, TRUE)
             ON CONFLICT (domain) DO UPDATE SET is_active = TRUE",
        )
        .bind(&domain)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err("create_alias (domain upsert)", e))?;

        let row = sqlx::query(
            "INSERT INTO email_aliases (alias, domain, full_address, description)
             VALUES ($1, $2, $3, $4)
             RETURNING id, created_at",
        )
        .bind(&alias)
        .bind(&domain)
        .bind(&full_address)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_err("create_alias", e))?;

        let id: i64 = row.try_get("id").map_err(|e| map_err("create_alias id", e))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| map_err("create_alias created_at", e))?;

        debug!(id, full_address = %full_address, "Alias created");
        Ok(Alias {
            id,
            alias,
            domain,
            full_address,
            description: description.map(str::to_string),
            is_active: true,
            created_at,
        })
    }

    async fn list_aliases(&self) -> Result<Vec<AliasSummary>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT ea.id, ea.alias, ea.domain, ea.full_address, ea.description,
                    ea.is_active, ea.created_at,
                    (SELECT COUNT(*) FROM emails e WHERE e.alias_id = ea.id) AS email_count
             FROM email_aliases ea
             ORDER BY ea.created_at DESC, ea.id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_err("list_aliases", e))?;

        let mut aliases = Vec::with_capacity(rows.len());
        for row in &rows {
            let base = row_to_alias(row).map_err(|e| map_err("list_aliases row", e))?;
            aliases.push(AliasSummary {
                id: base.id,
                alias: base.alias,
                domain: base.domain,
                full_address: base.full_address,
                description: base.description,
                is_active: base.is_active,
                created_at: base.created_at,
                email_count: row
                    .try_get("email_count")
                    .map_err(|e| map_err("list_aliases count", e))?,
            });
        }
        Ok(aliases)
    }

    async fn toggle_alias(&self, id: i64, is_active: bool) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE email_aliases SET is_active = $1 WHERE id = $2")
            .bind(is_active)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_err("toggle_alias", e))?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                entity: "alias".into(),
                id,
            });
        }
        Ok(())
    }

    async fn delete_alias(&self, id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM email_aliases WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_err("delete_alias", e))?;

        if result.rows_affected() == 0 {
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
        let row = sqlx::query(
            "INSERT INTO emails (alias_id, from_address, to_address, subject, body_text,
                 body_html, verification_code, raw_headers)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id",
        )
        .bind(email.alias_id)
        .bind(email.from_address)
        .bind(email.to_address)
        .bind(email.subject)
        .bind(email.body_text)
        .bind(email.body_html)
        .bind(email.verification_code)
        .bind(email.raw_headers)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_err("insert_email", e))?;

        let id: i64 = row.try_get("id").map_err(|e| map_err("insert_email id", e))?;
        debug!(id, alias_id = email.alias_id, "Email inserted");
        Ok(id)
    }

    async fn emails_for_alias(
        &self,
        alias_id: i64,
        limit: i64,
    ) -> Result<Vec<EmailSummary>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT id, from_address, subject, verification_code, received_at
             FROM emails
             WHERE alias_id = $1
             ORDER BY received_at DESC, id DESC
             LIMIT $2",
        )
        .bind(alias_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_err("emails_for_alias", e))?;

        rows.iter()
            .map(|row| {
                Ok(EmailSummary {
                    id: row.try_get("id")?,
                    from_address: row.try_get("from_address")?,
                    subject: row.try_get("subject")?,
                    verification_code: row.try_get("verification_code")?,
                    received_at: row.try_get("received_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| map_err("emails_for_alias row", e))
    }

    async fn get_email(&self, id: i64) -> Result<Option<EmailRecord>, DatabaseError> {
        let row = sqlx::query(
            "SELECT id, alias_id, from_address, to_address, subject, body_text, body_html,
                    verification_code, raw_headers, received_at
             FROM emails
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err("get_email", e))?;

        row.map(|row| {
            Ok(EmailRecord {
                id: row.try_get("id")?,
                alias_id: row.try_get("alias_id")?,
                from_address: row.try_get("from_address")?,
                to_address: row.try_get("to_address")?,
                subject: row.try_get("subject")?,
                body_text: row.try_get("body_text")?,
                body_html: row.try_get("body_html")?,
                verification_code: row.try_get("verification_code")?,
                raw_headers: row.try_get("raw_headers")?,
                received_at: row.try_get("received_at")?,
            })
        })
        .transpose()
        .map_err(|e: sqlx::Error| map_err("get_email row", e))
    }

    async fn latest_code(&self, alias_id: i64) -> Result<Option<String>, DatabaseError> {
        let row = sqlx::query(
            "SELECT verification_code FROM emails
             WHERE alias_id = $1 AND verification_code IS NOT NULL
             ORDER BY received_at DESC, id DESC
             LIMIT 1",
        )
        .bind(alias_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err("latest_code", e))?;

        row.map(|r| r.try_get("verification_code"))
            .transpose()
            .map_err(|e| map_err("latest_code row", e))
    }

    // ── Domains ─────────────────────────────────────────────────────

    async fn list_domains(&self) -> Result<Vec<DomainSummary>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT d.id, d.domain, d.is_active, d.created_at,
                    (SELECT COUNT(*) FROM email_aliases ea WHERE ea.domain = d.domain)
                        AS alias_count
             FROM domains d
             ORDER BY d.created_at DESC, d.id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_err("list_domains", e))?;

        rows.iter()
            .map(|row| {
                Ok(DomainSummary {
                    id: row.try_get("id")?,
                    domain: row.try_get("domain")?,
                    is_active: row.try_get("is_active")?,
                    created_at: row.try_get("created_at")?,
                    alias_count: row.try_get("alias_count")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| map_err("list_domains row", e))
    }

    async fn add_domain(&self, domain: &str) -> Result<Domain, DatabaseError> {
        let domain = domain.to_lowercase();
        let row = sqlx::query(
            "INSERT INTO domains (domain, is_active) VALUES ($1, TRUE)
             ON CONFLICT (domain) DO UPDATE SET is_active = TRUE
             RETURNING id, domain, is_active, created_at",
        )
        .bind(&domain)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_err("add_domain", e))?;

        Ok(Domain {
            id: row.try_get("id").map_err(|e| map_err("add_domain row", e))?,
            domain: row
                .try_get("domain")
                .map_err(|e| map_err("add_domain row", e))?,
            is_active: row
                .try_get("is_active")
                .map_err(|e| map_err("add_domain row", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| map_err("add_domain row", e))?,
        })
    }

    async fn remove_domain(&self, id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE domains SET is_active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_err("remove_domain", e))?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                entity: "domain".into(),
                id,
            });
        }
        Ok(())
    }

    async fn is_domain_active(&self, domain: &str) -> Result<bool, DatabaseError> {
        let row = sqlx::query("SELECT is_active FROM domains WHERE domain = $1")
            .bind(domain.to_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_err("is_domain_active", e))?;

        match row {
            Some(r) => r
                .try_get("is_active")
                .map_err(|e| map_err("is_domain_active row", e)),
            None => Ok(false),
        }
    }
}
