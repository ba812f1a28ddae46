//! Network recording
//!
//! The session subscribes to the three network lifecycle events
//! (request-sent, response-received, loading-finished), converts them into
//! the [`NetworkEvent`] tagged union, and folds them into a per-session
//! [`NetworkLedger`]. The ledger is single-writer (the listener task),
//! read-only once the run completes, and discarded at teardown.
//!
//! A request's final status and encoded size are only trustworthy after its
//! loading-finished event; entries without it retain request-phase fields
//! only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::snapshot::ImageDiagnostic;

/// One network lifecycle event, with "not yet known" kept distinct from
/// "known to be absent" via explicit optionals.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    RequestWillBeSent {
        request_id: String,
        url: String,
        method: String,
        headers: BTreeMap<String, String>,
        at: DateTime<Utc>,
    },
    ResponseReceived {
        request_id: String,
        status: i64,
        headers: BTreeMap<String, String>,
        mime_type: Option<String>,
        at: DateTime<Utc>,
    },
    LoadingFinished {
        request_id: String,
        encoded_data_length: u64,
        at: DateTime<Utc>,
    },
}

impl NetworkEvent {
    fn method_name(&self) -> &'static str {
        match self {
            NetworkEvent::RequestWillBeSent { .. } => "Network.requestWillBeSent",
            NetworkEvent::ResponseReceived { .. } => "Network.responseReceived",
            NetworkEvent::LoadingFinished { .. } => "Network.loadingFinished",
        }
    }
}

/// One request observed during a session, keyed by request id.
///
/// Created on request-sent, mutated as lifecycle events arrive, never
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkLogEntry {
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub request_headers: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub status: Option<i64>,
    pub response_headers: Option<BTreeMap<String, String>>,
    pub mime_type: Option<String>,
    pub encoded_data_length: Option<u64>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl NetworkLogEntry {
    /// True once loading-finished has been processed for this request.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Compact record of a raw protocol event, kept for the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolEventRecord {
    pub at: DateTime<Utc>,
    pub method: String,
    pub request_id: Option<String>,
    pub url: Option<String>,
}

/// A main-frame URL change observed during the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationRecord {
    pub url: String,
    pub at: DateTime<Utc>,
}

/// Byte composition of everything transferred during a session, bucketed by
/// MIME type. Only finished requests contribute; a request with no
/// resolvable MIME type counts as "other".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleSummary {
    pub scripts: u64,
    pub styles: u64,
    pub images: u64,
    pub fonts: u64,
    pub other: u64,
    pub total: u64,
}

fn bucket(summary: &mut BundleSummary, mime: Option<&str>, bytes: u64) {
    let slot = match mime {
        Some(m) if m.contains("javascript") || m.contains("ecmascript") => &mut summary.scripts,
        Some(m) if m.contains("css") => &mut summary.styles,
        Some(m) if m.starts_with("image/") => &mut summary.images,
        Some(m) if m.contains("font") => &mut summary.fonts,
        _ => &mut summary.other,
    };
    *slot += bytes;
    summary.total += bytes;
}

/// Per-session request ledger plus the raw protocol event log.
#[derive(Debug, Clone, Default)]
pub struct NetworkLedger {
    entries: BTreeMap<String, NetworkLogEntry>,
    event_log: Vec<ProtocolEventRecord>,
}

impl NetworkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one lifecycle event into the ledger.
    ///
    /// Response/finished events for an id that was never observed as a
    /// request are logged but not turned into entries.
    pub fn record(&mut self, event: NetworkEvent) {
        let (at, request_id, url) = match &event {
            NetworkEvent::RequestWillBeSent { at, request_id, url, .. } => {
                (*at, request_id.clone(), Some(url.clone()))
            }
            NetworkEvent::ResponseReceived { at, request_id, .. }
            | NetworkEvent::LoadingFinished { at, request_id, .. } => {
                let url = self.entries.get(request_id).map(|e| e.url.clone());
                (*at, request_id.clone(), url)
            }
        };
        self.event_log.push(ProtocolEventRecord {
            at,
            method: event.method_name().to_string(),
            request_id: Some(request_id),
            url,
        });

        match event {
            NetworkEvent::RequestWillBeSent { request_id, url, method, headers, at } => {
                self.entries.entry(request_id.clone()).or_insert(NetworkLogEntry {
                    request_id,
                    url,
                    method,
                    request_headers: headers,
                    started_at: at,
                    status: None,
                    response_headers: None,
                    mime_type: None,
                    encoded_data_length: None,
                    finished_at: None,
                });
            }
            NetworkEvent::ResponseReceived { request_id, status, headers, mime_type, .. } => {
                if let Some(entry) = self.entries.get_mut(&request_id) {
                    entry.status = Some(status);
                    entry.response_headers = Some(headers);
                    entry.mime_type = mime_type;
                }
            }
            NetworkEvent::LoadingFinished { request_id, encoded_data_length, at } => {
                if let Some(entry) = self.entries.get_mut(&request_id) {
                    entry.encoded_data_length = Some(encoded_data_length);
                    entry.finished_at = Some(at);
                }
            }
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &NetworkLogEntry> {
        self.entries.values()
    }

    pub fn into_entries(self) -> Vec<NetworkLogEntry> {
        self.entries.into_values().collect()
    }

    pub fn event_log(&self) -> &[ProtocolEventRecord] {
        &self.event_log
    }

    /// Sum encoded bytes per finished request, bucketed by MIME type.
    pub fn bundle_summary(&self) -> BundleSummary {
        let mut summary = BundleSummary::default();
        for entry in self.entries.values() {
            if !entry.is_finished() {
                continue;
            }
            let bytes = entry.encoded_data_length.unwrap_or(0);
            bucket(&mut summary, entry.mime_type.as_deref(), bytes);
        }
        summary
    }

    /// Encoded size of the finished entry matching `url`, if any.
    pub fn bytes_for_url(&self, url: &str) -> Option<u64> {
        self.entries
            .values()
            .find(|e| e.is_finished() && e.url == url)
            .and_then(|e| e.encoded_data_length)
    }

    /// Fill in image transfer sizes from the ledger.
    ///
    /// A size is set only when the image's resolved URL matches a finished
    /// entry; otherwise the field stays absent.
    pub fn annotate_images(&self, images: &mut [ImageDiagnostic]) {
        for image in images {
            image.transfer_size = self.bytes_for_url(&image.src);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(id: &str, url: &str) -> NetworkEvent {
        NetworkEvent::RequestWillBeSent {
            request_id: id.into(),
            url: url.into(),
            method: "GET".into(),
            headers: BTreeMap::new(),
            at: Utc::now(),
        }
    }

    fn received(id: &str, status: i64, mime: Option<&str>) -> NetworkEvent {
        NetworkEvent::ResponseReceived {
            request_id: id.into(),
            status,
            headers: BTreeMap::new(),
            mime_type: mime.map(str::to_string),
            at: Utc::now(),
        }
    }

    fn finished(id: &str, bytes: u64) -> NetworkEvent {
        NetworkEvent::LoadingFinished {
            request_id: id.into(),
            encoded_data_length: bytes,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_entry_final_fields_only_after_loading_finished() {
        let mut ledger = NetworkLedger::new();
        ledger.record(sent("1", "https://example.com/app.js"));
        ledger.record(received("1", 200, Some("application/javascript")));

        let entry = ledger.entries().next().unwrap();
        assert_eq!(entry.status, Some(200));
        assert!(!entry.is_finished());
        assert_eq!(entry.encoded_data_length, None);

        ledger.record(finished("1", 4096));
        let entry = ledger.entries().next().unwrap();
        assert!(entry.is_finished());
        assert_eq!(entry.encoded_data_length, Some(4096));
    }

    #[test]
    fn test_request_phase_fields_retained_without_response() {
        let mut ledger = NetworkLedger::new();
        ledger.record(sent("9", "https://example.com/pending"));
        let entry = ledger.entries().next().unwrap();
        assert_eq!(entry.url, "https://example.com/pending");
        assert_eq!(entry.status, None);
        assert_eq!(entry.response_headers, None);
        assert!(!entry.is_finished());
    }

    #[test]
    fn test_stray_events_do_not_create_entries() {
        let mut ledger = NetworkLedger::new();
        ledger.record(finished("ghost", 100));
        assert_eq!(ledger.entries().count(), 0);
        // but the protocol event log still records them
        assert_eq!(ledger.event_log().len(), 1);
    }

    #[test]
    fn test_bundle_summary_buckets_by_mime() {
        let mut ledger = NetworkLedger::new();
        for (id, url, mime, bytes) in [
            ("1", "https://e.com/a.js", Some("application/javascript"), 100u64),
            ("2", "https://e.com/b.css", Some("text/css"), 50),
            ("3", "https://e.com/c.png", Some("image/png"), 200),
            ("4", "https://e.com/d.woff2", Some("font/woff2"), 30),
            ("5", "https://e.com/e.bin", None, 7),
        ] {
            ledger.record(sent(id, url));
            ledger.record(received(id, 200, mime));
            ledger.record(finished(id, bytes));
        }
        // unfinished request must not count
        ledger.record(sent("6", "https://e.com/slow.js"));
        ledger.record(received("6", 200, Some("text/javascript")));

        let summary = ledger.bundle_summary();
        assert_eq!(summary.scripts, 100);
        assert_eq!(summary.styles, 50);
        assert_eq!(summary.images, 200);
        assert_eq!(summary.fonts, 30);
        assert_eq!(summary.other, 7);
        assert_eq!(summary.total, 387);
    }

    #[test]
    fn test_bytes_for_url_requires_finished_entry() {
        let mut ledger = NetworkLedger::new();
        ledger.record(sent("1", "https://e.com/hero.jpg"));
        ledger.record(received("1", 200, Some("image/jpeg")));
        assert_eq!(ledger.bytes_for_url("https://e.com/hero.jpg"), None);
        ledger.record(finished("1", 9000));
        assert_eq!(ledger.bytes_for_url("https://e.com/hero.jpg"), Some(9000));
        assert_eq!(ledger.bytes_for_url("https://e.com/missing.jpg"), None);
    }

    #[test]
    fn test_annotate_images_never_guesses() {
        let mut ledger = NetworkLedger::new();
        ledger.record(sent("1", "https://e.com/hero.jpg"));
        ledger.record(received("1", 200, Some("image/jpeg")));
        ledger.record(finished("1", 12345));

        let mut images = vec![
            crate::snapshot::ImageDiagnostic {
                src: "https://e.com/hero.jpg".into(),
                alt: "hero".into(),
                natural_width: 100,
                natural_height: 100,
                display_width: 100,
                display_height: 100,
                responsive: false,
                lazy: false,
                transfer_size: None,
            },
            crate::snapshot::ImageDiagnostic {
                src: "https://e.com/unknown.jpg".into(),
                alt: String::new(),
                natural_width: 10,
                natural_height: 10,
                display_width: 10,
                display_height: 10,
                responsive: true,
                lazy: true,
                transfer_size: None,
            },
        ];
        ledger.annotate_images(&mut images);
        assert_eq!(images[0].transfer_size, Some(12345));
        assert_eq!(images[1].transfer_size, None);
    }
}
