//! End-to-end pipeline tests.
//!
//! The full-run test is environment tolerant: when no Chrome binary is
//! available every profile fails and is omitted, but the report artifacts
//! must still be written and parse. The browser-backed tests need a real
//! Chrome and skip themselves otherwise.

mod common;

use anyhow::Result;
use audit_core::session::BrowserSession;
use audit_core::{AuditError, AuditOptions, AuditReport, AuditRunner, ThrottlingProfile};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const TEST_PAGE: &str =
    "data:text/html,<html><head><title>t</title></head><body><h1>hello</h1>\
     <p>audit%20me</p></body></html>";

fn options_for(url: &str, dir: &Path, retries: u32, timeout_ms: u64) -> Result<AuditOptions> {
    Ok(AuditOptions::resolve(Some(url.to_string()), 1, 3, dir, retries, timeout_ms)?)
}

#[tokio::test]
async fn test_report_written_even_when_profiles_fail() -> Result<()> {
    if common::should_skip() {
        eprintln!("Skipping: SKIP_BROWSER_TESTS is set");
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let options = options_for(TEST_PAGE, dir.path(), 0, 30_000)?;

    let report = AuditRunner::new(options).run().await?;

    let json = std::fs::read_to_string(dir.path().join("report.json"))?;
    let parsed: AuditReport = serde_json::from_str(&json)?;
    assert_eq!(parsed.target_url, TEST_PAGE);
    assert_eq!(parsed.profiles.len(), report.profiles.len());

    let md = std::fs::read_to_string(dir.path().join("report.md"))?;
    assert!(md.starts_with("# Performance Audit"));
    assert!(md.contains("## Recommendations"));
    Ok(())
}

#[tokio::test]
async fn test_session_snapshot_against_static_page() -> Result<()> {
    if common::should_skip() {
        eprintln!("Skipping: SKIP_BROWSER_TESTS is set");
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let options = options_for(TEST_PAGE, dir.path(), 0, 30_000)?;
    let profile = ThrottlingProfile::registry().remove(1);

    let mut session = match BrowserSession::start(&profile, &options).await {
        Ok(session) => session,
        Err(e) if common::chrome_missing(&e) => {
            eprintln!("Skipping: Chrome not installed ({e})");
            return Ok(());
        }
        Err(e) => panic!("unexpected launch error: {e}"),
    };

    session.apply_throttling().await?;
    let attempts = session.navigate(&options).await?;
    assert_eq!(attempts, 1);
    session.settle().await;

    let snapshot = session.collect_snapshot().await?;
    assert!(snapshot.dom.nodes > 0);
    assert!(snapshot.dom.max_depth >= 2);

    let (js, css) = session.stop_coverage().await?;
    assert!(js.used_bytes <= js.total_bytes);
    assert!(css.used_bytes <= css.total_bytes);

    let ledger = session.ledger_snapshot().await;
    let _ = ledger.bundle_summary();

    session.teardown().await;
    Ok(())
}

#[tokio::test]
async fn test_exhausted_retries_omit_profile_but_report_is_written() -> Result<()> {
    if common::should_skip() {
        eprintln!("Skipping: SKIP_BROWSER_TESTS is set");
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    // port 1 is never listening, so every attempt fails fast
    let options = options_for("http://127.0.0.1:1/", dir.path(), 1, 10_000)?;
    let profile = ThrottlingProfile::registry().remove(1);

    let session = match BrowserSession::start(&profile, &options).await {
        Ok(session) => session,
        Err(e) if common::chrome_missing(&e) => {
            eprintln!("Skipping: Chrome not installed ({e})");
            return Ok(());
        }
        Err(e) => panic!("unexpected launch error: {e}"),
    };

    let err = session
        .navigate(&options)
        .await
        .expect_err("unreachable target must exhaust every attempt");
    match &err {
        AuditError::Navigation { attempts, .. } => assert_eq!(*attempts, 2),
        other => panic!("expected a navigation error, got {other}"),
    }
    session.teardown().await;

    // the orchestrator hits the same wall, omits the profiles, and still
    // writes the report
    let report = AuditRunner::new(options).run().await?;
    assert!(report.profiles.is_empty());

    let json = std::fs::read_to_string(dir.path().join("report.json"))?;
    let parsed: AuditReport = serde_json::from_str(&json)?;
    assert!(parsed.profiles.is_empty());
    assert_eq!(parsed.target_url, "http://127.0.0.1:1/");
    assert!(dir.path().join("report.md").exists());
    Ok(())
}

/// Serve HTTP on an ephemeral port, holding the first request open without a
/// response and answering every later request with a small page.
async fn stall_once_server() -> Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let stalled_once = Arc::new(AtomicBool::new(false));

    let task = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            let stalled_once = stalled_once.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                if stream.read(&mut buf).await.unwrap_or(0) == 0 {
                    return;
                }
                if !stalled_once.swap(true, Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    return;
                }
                let body = "<html><head><title>t</title></head>\
                            <body><h1>recovered</h1></body></html>";
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    Ok((addr, task))
}

#[tokio::test]
async fn test_navigation_recovers_after_stalled_attempt() -> Result<()> {
    if common::should_skip() {
        eprintln!("Skipping: SKIP_BROWSER_TESTS is set");
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let (addr, server) = stall_once_server().await?;
    let url = format!("http://{addr}/");
    let options = options_for(&url, dir.path(), 1, 3_000)?;
    let profile = ThrottlingProfile::registry().remove(1);

    let session = match BrowserSession::start(&profile, &options).await {
        Ok(session) => session,
        Err(e) if common::chrome_missing(&e) => {
            eprintln!("Skipping: Chrome not installed ({e})");
            server.abort();
            return Ok(());
        }
        Err(e) => panic!("unexpected launch error: {e}"),
    };

    // first attempt times out against the stalled request, second succeeds
    let attempts = session.navigate(&options).await?;
    assert_eq!(attempts, 2);
    session.settle().await;

    let snapshot = session.collect_snapshot().await?;
    assert!(snapshot.dom.nodes > 0);

    session.teardown().await;
    server.abort();
    Ok(())
}
