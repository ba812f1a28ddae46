//! Traffic capture artifact
//!
//! Builds an HTTP Archive (HAR 1.2-shaped) document from the session's
//! network ledger and observed URL-change history. The artifact is
//! producible even when no route change was observed: a single synthetic
//! page titled with the target URL is emitted instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::network::{NavigationRecord, NetworkLedger, NetworkLogEntry};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Har {
    pub log: HarLog,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarLog {
    pub version: String,
    pub creator: HarCreator,
    pub pages: Vec<HarPage>,
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPage {
    pub started_date_time: String,
    pub id: String,
    pub title: String,
    pub page_timings: HarPageTimings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPageTimings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_content_load: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_load: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    pub pageref: String,
    pub started_date_time: String,
    /// Total elapsed time in milliseconds, -1 when the request never
    /// finished.
    pub time: f64,
    pub request: HarRequest,
    pub response: HarResponse,
    pub cache: HarCache,
    pub timings: HarTimings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    pub http_version: String,
    pub headers: Vec<HarHeader>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: i64,
    pub status_text: String,
    pub http_version: String,
    pub headers: Vec<HarHeader>,
    pub content: HarContent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    /// Encoded size in bytes, -1 when unknown.
    pub size: i64,
    pub mime_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarHeader {
    pub name: String,
    pub value: String,
}

/// HAR requires the object to be present even when empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarCache {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarTimings {
    pub send: f64,
    pub wait: f64,
    pub receive: f64,
}

fn headers_to_har(headers: &BTreeMap<String, String>) -> Vec<HarHeader> {
    headers
        .iter()
        .map(|(name, value)| HarHeader { name: name.clone(), value: value.clone() })
        .collect()
}

fn entry_to_har(entry: &NetworkLogEntry, pageref: &str) -> HarEntry {
    let time = match entry.finished_at {
        Some(finished) => (finished - entry.started_at).num_milliseconds() as f64,
        None => -1.0,
    };
    HarEntry {
        pageref: pageref.to_string(),
        started_date_time: entry.started_at.to_rfc3339(),
        time,
        request: HarRequest {
            method: entry.method.clone(),
            url: entry.url.clone(),
            http_version: "HTTP/1.1".into(),
            headers: headers_to_har(&entry.request_headers),
        },
        response: HarResponse {
            status: entry.status.unwrap_or(0),
            status_text: String::new(),
            http_version: "HTTP/1.1".into(),
            headers: entry
                .response_headers
                .as_ref()
                .map(headers_to_har)
                .unwrap_or_default(),
            content: HarContent {
                size: entry.encoded_data_length.map(|b| b as i64).unwrap_or(-1),
                mime_type: entry.mime_type.clone().unwrap_or_default(),
            },
        },
        cache: HarCache {},
        timings: HarTimings { send: 0.0, wait: time.max(0.0), receive: 0.0 },
    }
}

/// Build the traffic capture for one profile's session.
pub fn build_har(
    target_url: &str,
    navigations: &[NavigationRecord],
    ledger: &NetworkLedger,
) -> Har {
    let earliest: DateTime<Utc> = ledger
        .entries()
        .map(|e| e.started_at)
        .min()
        .unwrap_or_else(Utc::now);

    let pages: Vec<HarPage> = if navigations.is_empty() {
        vec![HarPage {
            started_date_time: earliest.to_rfc3339(),
            id: "page_1".into(),
            title: target_url.to_string(),
            page_timings: HarPageTimings::default(),
        }]
    } else {
        navigations
            .iter()
            .enumerate()
            .map(|(i, nav)| HarPage {
                started_date_time: nav.at.to_rfc3339(),
                id: format!("page_{}", i + 1),
                title: nav.url.clone(),
                page_timings: HarPageTimings::default(),
            })
            .collect()
    };

    let entries = ledger
        .entries()
        .map(|entry| {
            // Attribute the entry to the last navigation preceding it.
            let idx = navigations
                .iter()
                .rposition(|nav| nav.at <= entry.started_at)
                .unwrap_or(0);
            entry_to_har(entry, &format!("page_{}", idx + 1))
        })
        .collect();

    Har {
        log: HarLog {
            version: "1.2".into(),
            creator: HarCreator {
                name: "audit-core".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            pages,
            entries,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkEvent;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn ledger_with_one_finished_request(url: &str) -> NetworkLedger {
        let mut ledger = NetworkLedger::new();
        let now = Utc::now();
        ledger.record(NetworkEvent::RequestWillBeSent {
            request_id: "1".into(),
            url: url.into(),
            method: "GET".into(),
            headers: BTreeMap::from([("accept".to_string(), "*/*".to_string())]),
            at: now,
        });
        ledger.record(NetworkEvent::ResponseReceived {
            request_id: "1".into(),
            status: 200,
            headers: BTreeMap::new(),
            mime_type: Some("text/html".into()),
            at: now,
        });
        ledger.record(NetworkEvent::LoadingFinished {
            request_id: "1".into(),
            encoded_data_length: 512,
            at: now,
        });
        ledger
    }

    #[test]
    fn test_synthetic_page_when_no_navigation_observed() {
        let ledger = ledger_with_one_finished_request("https://example.com/");
        let har = build_har("https://example.com/", &[], &ledger);
        assert_eq!(har.log.pages.len(), 1);
        assert_eq!(har.log.pages[0].title, "https://example.com/");
        assert_eq!(har.log.entries.len(), 1);
        assert_eq!(har.log.entries[0].pageref, "page_1");
    }

    #[test]
    fn test_pages_follow_navigation_history() {
        let ledger = ledger_with_one_finished_request("https://example.com/");
        let navigations = vec![
            NavigationRecord { url: "https://example.com/".into(), at: Utc::now() },
            NavigationRecord { url: "https://example.com/next".into(), at: Utc::now() },
        ];
        let har = build_har("https://example.com/", &navigations, &ledger);
        assert_eq!(har.log.pages.len(), 2);
        assert_eq!(har.log.pages[1].id, "page_2");
        assert_eq!(har.log.pages[1].title, "https://example.com/next");
    }

    #[test]
    fn test_unfinished_entry_has_sentinel_fields() {
        let mut ledger = NetworkLedger::new();
        ledger.record(NetworkEvent::RequestWillBeSent {
            request_id: "1".into(),
            url: "https://example.com/stalled".into(),
            method: "GET".into(),
            headers: BTreeMap::new(),
            at: Utc::now(),
        });
        let har = build_har("https://example.com/", &[], &ledger);
        let entry = &har.log.entries[0];
        assert_eq!(entry.time, -1.0);
        assert_eq!(entry.response.status, 0);
        assert_eq!(entry.response.content.size, -1);
    }

    #[test]
    fn test_serializes_with_camel_case_keys() {
        let ledger = ledger_with_one_finished_request("https://example.com/");
        let har = build_har("https://example.com/", &[], &ledger);
        let json = serde_json::to_string(&har).unwrap();
        assert!(json.contains("\"startedDateTime\""));
        assert!(json.contains("\"pageTimings\""));
        assert!(json.contains("\"mimeType\""));
        assert!(json.contains("\"version\":\"1.2\""));
    }
}
