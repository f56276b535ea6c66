//! Email ingestion — turns one inbound delivery attempt into either a
//! terminal reject or a persisted email record.
//!
//! The failure semantics are deliberately asymmetric:
//! - unknown/inactive mailbox → `Ok(Delivery::Rejected)`, terminal, nothing
//!   persisted;
//! - any failure after the alias resolved (stream, decode, storage) →
//!   `Err(IngestError)`, retryable by the upstream transport;
//! - "no code extracted" → normal outcome, persisted with a NULL code.

use futures::StreamExt;
use mail_parser::MessageParser;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::extract::{extract_code_from_email, strip_html};
use crate::pipeline::types::{Delivery, InboundEmail, serialize_headers};
use crate::store::Database;
use crate::store::traits::NewEmail;

/// Process one inbound message against the alias directory.
pub async fn handle_inbound(
    mut msg: InboundEmail,
    db: &dyn Database,
) -> Result<Delivery, IngestError> {
    // The full address is the lookup key; the same local part may exist
    // under several domains.
    let full_address = msg.to.trim().to_lowercase();
    let local_part = full_address
        .split('@')
        .next()
        .unwrap_or(full_address.as_str())
        .to_string();

    info!(to = %full_address, from = %msg.from, "Inbound email");

    let alias = match db.find_active_alias(&full_address).await? {
        Some(alias) => alias,
        None => {
            warn!(to = %full_address, "Alias not found or inactive — rejecting");
            return Ok(Delivery::Rejected {
                reason: format!("Mailbox {local_part} does not exist"),
            });
        }
    };

    // Drain the raw stream fully, chunks concatenated in arrival order.
    let mut raw: Vec<u8> = Vec::new();
    while let Some(chunk) = msg.raw.next().await {
        let chunk = chunk.map_err(|e| IngestError::Stream(e.to_string()))?;
        raw.extend_from_slice(&chunk);
    }

    let parsed = MessageParser::default()
        .parse(&raw)
        .ok_or_else(|| IngestError::Decode("unparseable MIME message".into()))?;

    let subject = parsed.subject().unwrap_or_default().to_string();
    let body_text = parsed
        .body_text(0)
        .map(|t| t.to_string())
        .unwrap_or_default();
    let body_html = parsed
        .body_html(0)
        .map(|h| h.to_string())
        .unwrap_or_default();

    let raw_headers = serialize_headers(&msg.headers);

    // Prefer the plain-text body; fall back to tag-stripped HTML.
    let extraction_text = if body_text.is_empty() {
        strip_html(&body_html)
    } else {
        body_text.clone()
    };
    let verification_code = extract_code_from_email(&subject, &extraction_text);

    let email_id = db
        .insert_email(NewEmail {
            alias_id: alias.id,
            from_address: &msg.from,
            to_address: &full_address,
            subject: &subject,
            body_text: &body_text,
            body_html: &body_html,
            verification_code: verification_code.as_deref(),
            raw_headers: &raw_headers,
        })
        .await?;

    info!(
        email_id,
        alias_id = alias.id,
        code_found = verification_code.is_some(),
        "Email stored"
    );

    Ok(Delivery::Stored {
        email_id,
        verification_code,
    })
}
