//! Inbound-message types for the ingestion pipeline.

use futures::stream::{self, BoxStream, StreamExt};

/// One chunk of the raw message byte stream.
pub type RawChunk = Result<Vec<u8>, std::io::Error>;

/// An inbound delivery attempt as handed over by the mail transport.
///
/// The transport supplies the envelope (`from`/`to`), the message's header
/// entries in their original order, and the raw RFC 5322 bytes as a chunk
/// stream. Chunks arrive in order and are reassembled exactly as received.
pub struct InboundEmail {
    /// Envelope sender address.
    pub from: String,
    /// Envelope recipient — the full address actually dialed.
    pub to: String,
    /// Ordered header entries, insertion order preserved.
    pub headers: Vec<(String, String)>,
    /// Raw message byte stream.
    pub raw: BoxStream<'static, RawChunk>,
}

impl InboundEmail {
    /// Build an inbound email from an already-buffered raw message.
    pub fn from_bytes(
        from: impl Into<String>,
        to: impl Into<String>,
        headers: Vec<(String, String)>,
        raw: Vec<u8>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            headers,
            raw: stream::once(async move { Ok(raw) }).boxed(),
        }
    }
}

impl std::fmt::Debug for InboundEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundEmail")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("headers", &self.headers.len())
            .finish_non_exhaustive()
    }
}

/// Outcome of one delivery attempt.
///
/// `Rejected` is terminal: the mailbox doesn't exist and the transport
/// should refuse the delivery permanently. Processing failures are *not* a
/// variant here — they surface as `Err(IngestError)` so the transport can
/// retry the same raw message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Message persisted.
    Stored {
        email_id: i64,
        verification_code: Option<String>,
    },
    /// No active alias for the recipient; nothing persisted.
    Rejected { reason: String },
}

/// Serialize header entries into a newline-joined `"key: value"` block,
/// preserving input order.
pub fn serialize_headers(headers: &[(String, String)]) -> String {
    headers
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read the header block out of a raw RFC 5322 message, in order.
///
/// Used by transport adapters that receive the raw bytes but no separate
/// header collection. Folded continuation lines are unfolded with a single
/// space; parsing stops at the first blank line.
pub fn headers_from_raw(raw: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(raw);
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if (line.starts_with(' ') || line.starts_with('\t'))
            && let Some((_, value)) = headers.last_mut()
        {
            value.push(' ');
            value.push_str(line.trim_start());
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_serialize_in_order() {
        let headers = vec![
            ("From".to_string(), "a@x.com".to_string()),
            ("Subject".to_string(), "Hi".to_string()),
        ];
        assert_eq!(serialize_headers(&headers), "From: a@x.com\nSubject: Hi");
    }

    #[test]
    fn empty_headers_serialize_to_empty_string() {
        assert_eq!(serialize_headers(&[]), "");
    }

    #[test]
    fn headers_from_raw_stops_at_blank_line() {
        let raw = b"From: a@x.com\r\nSubject: Hi\r\n\r\nFake-Header: in body\r\n";
        assert_eq!(
            headers_from_raw(raw),
            vec![
                ("From".to_string(), "a@x.com".to_string()),
                ("Subject".to_string(), "Hi".to_string()),
            ]
        );
    }

    #[test]
    fn headers_from_raw_unfolds_continuations() {
        let raw = b"Subject: a very\r\n long subject\r\n\r\nbody";
        assert_eq!(
            headers_from_raw(raw),
            vec![("Subject".to_string(), "a very long subject".to_string())]
        );
    }
}
