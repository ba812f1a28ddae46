//! In-page instrumentation
//!
//! An observer script installed before navigation buffers layout-shift and
//! long-task entries; after the page settles, a single read-only evaluation
//! inside the page's own execution context returns one [`PageSnapshot`]
//! covering timings, running animations, DOM shape statistics, and per-image
//! diagnostics.
//!
//! The snapshot never mutates page state, and the DOM depth computation uses
//! an explicit stack so pathological trees cannot exhaust the call stack.

use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{AuditError, Result};

/// One `PerformanceNavigationTiming` entry, reduced to the fields the report
/// uses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationTiming {
    pub start_time: f64,
    pub duration: f64,
    pub response_start: f64,
    pub dom_interactive: f64,
    pub dom_content_loaded: f64,
    pub load_event_end: f64,
    pub transfer_size: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaintTiming {
    pub name: String,
    pub start_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutShiftEntry {
    pub value: f64,
    pub had_recent_input: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongTaskEntry {
    pub name: String,
    pub start_time: f64,
    pub duration: f64,
}

/// A currently running animation. `iterations` is `-1.0` for infinite
/// animations, since the wire format cannot carry infinity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationInfo {
    pub id: String,
    pub name: String,
    pub duration: f64,
    pub delay: f64,
    pub iterations: f64,
    pub play_state: String,
}

/// Shape statistics of the loaded document, computed once per page load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomStatistics {
    pub nodes: u64,
    pub elements: u64,
    pub text_nodes: u64,
    pub max_depth: u64,
    pub interactive: u64,
    pub forms: u64,
    pub scripts: u64,
    pub stylesheets: u64,
    pub images: u64,
    pub iframes: u64,
}

/// Per-`<img>` diagnostics.
///
/// `transfer_size` is populated later by merging with the network ledger and
/// only when the resolved URL matches a finished network entry; it is never
/// guessed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDiagnostic {
    pub src: String,
    pub alt: String,
    pub natural_width: u32,
    pub natural_height: u32,
    pub display_width: u32,
    pub display_height: u32,
    /// `srcset` present or wrapped in `<picture>`.
    pub responsive: bool,
    /// `loading="lazy"`.
    pub lazy: bool,
    #[serde(default)]
    pub transfer_size: Option<u64>,
}

/// The single read-only snapshot taken after the page settles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub navigation: Vec<NavigationTiming>,
    pub paints: Vec<PaintTiming>,
    pub layout_shifts: Vec<LayoutShiftEntry>,
    pub long_tasks: Vec<LongTaskEntry>,
    pub animations: Vec<AnimationInfo>,
    pub dom: DomStatistics,
    pub images: Vec<ImageDiagnostic>,
}

impl PageSnapshot {
    /// Sum of layout-shift values without recent input, matching how CLS is
    /// defined.
    pub fn cumulative_layout_shift(&self) -> f64 {
        self.layout_shifts
            .iter()
            .filter(|s| !s.had_recent_input)
            .map(|s| s.value)
            .sum()
    }

    pub fn first_contentful_paint(&self) -> Option<f64> {
        self.paints
            .iter()
            .find(|p| p.name == "first-contentful-paint")
            .map(|p| p.start_time)
    }

    /// Longest observed main-thread task, if any were recorded.
    pub fn longest_task(&self) -> Option<f64> {
        self.long_tasks
            .iter()
            .map(|t| t.duration)
            .fold(None, |acc, d| Some(acc.map_or(d, |a: f64| a.max(d))))
    }
}

/// Installs the observer script and takes the settled-page snapshot.
pub struct InstrumentationCollector;

impl InstrumentationCollector {
    /// Install the buffered observers.
    ///
    /// Must run before navigation: layout shifts and long tasks are only
    /// observable while they happen, so the script is registered to run on
    /// every new document.
    #[instrument(skip(page))]
    pub async fn install(page: &Page) -> Result<()> {
        debug!("Installing in-page observer script");
        let params = AddScriptToEvaluateOnNewDocumentParams::new(OBSERVER_SCRIPT);
        page.execute(params)
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;
        Ok(())
    }

    /// Evaluate the snapshot inside the page and decode it.
    #[instrument(skip(page))]
    pub async fn collect(page: &Page) -> Result<PageSnapshot> {
        debug!("Collecting in-page snapshot");
        let payload: String = page
            .evaluate(SNAPSHOT_SCRIPT)
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?
            .into_value()
            .map_err(|e| AuditError::Instrumentation(format!("snapshot payload: {e}")))?;

        let snapshot = serde_json::from_str(&payload)
            .map_err(|e| AuditError::Instrumentation(format!("snapshot decode: {e}")))?;
        Ok(snapshot)
    }
}

/// Buffers layout-shift and long-task entries into a page global the
/// snapshot reads later.
const OBSERVER_SCRIPT: &str = r#"
(function() {
    'use strict';
    const store = { layoutShifts: [], longTasks: [] };
    window.__pageAuditEntries = store;

    try {
        new PerformanceObserver((list) => {
            for (const entry of list.getEntries()) {
                store.layoutShifts.push({
                    value: entry.value,
                    hadRecentInput: !!entry.hadRecentInput
                });
            }
        }).observe({ type: 'layout-shift', buffered: true });
    } catch (e) {}

    try {
        new PerformanceObserver((list) => {
            for (const entry of list.getEntries()) {
                store.longTasks.push({
                    name: entry.name,
                    startTime: entry.startTime,
                    duration: entry.duration
                });
            }
        }).observe({ type: 'longtask', buffered: true });
    } catch (e) {}
})();
"#;

/// Pure read of the settled page, returned as a JSON string so the payload
/// survives the protocol boundary unchanged.
const SNAPSHOT_SCRIPT: &str = r#"
(function() {
    'use strict';

    const INTERACTIVE = 'a[href],button,input,select,textarea,summary,[tabindex],[role="button"]';

    function domStatistics() {
        const stats = {
            nodes: 0, elements: 0, textNodes: 0, maxDepth: 0, interactive: 0,
            forms: document.forms.length,
            scripts: document.scripts.length,
            stylesheets: document.styleSheets.length,
            images: document.images.length,
            iframes: document.getElementsByTagName('iframe').length
        };
        const root = document.documentElement;
        if (!root) return stats;
        // Explicit stack: deep trees must not blow the call stack.
        const stack = [[root, 1]];
        while (stack.length > 0) {
            const [node, depth] = stack.pop();
            stats.nodes += 1;
            if (depth > stats.maxDepth) stats.maxDepth = depth;
            if (node.nodeType === Node.ELEMENT_NODE) {
                stats.elements += 1;
                if (node.matches && node.matches(INTERACTIVE)) stats.interactive += 1;
            } else if (node.nodeType === Node.TEXT_NODE) {
                stats.textNodes += 1;
            }
            const children = node.childNodes;
            for (let i = 0; i < children.length; i++) {
                stack.push([children[i], depth + 1]);
            }
        }
        return stats;
    }

    function finiteOr(value, fallback) {
        const n = Number(value);
        return Number.isFinite(n) ? n : fallback;
    }

    const navigation = performance.getEntriesByType('navigation').map((e) => ({
        startTime: e.startTime,
        duration: e.duration,
        responseStart: e.responseStart,
        domInteractive: e.domInteractive,
        domContentLoaded: e.domContentLoadedEventEnd,
        loadEventEnd: e.loadEventEnd,
        transferSize: e.transferSize || 0
    }));

    const paints = performance.getEntriesByType('paint').map((e) => ({
        name: e.name,
        startTime: e.startTime
    }));

    const buffered = window.__pageAuditEntries || { layoutShifts: [], longTasks: [] };

    const animations = (document.getAnimations ? document.getAnimations() : []).map((a) => {
        const timing = a.effect && a.effect.getComputedTiming ? a.effect.getComputedTiming() : {};
        return {
            id: a.id || '',
            name: a.animationName || a.id || '',
            duration: finiteOr(timing.duration, 0),
            delay: finiteOr(timing.delay, 0),
            iterations: finiteOr(timing.iterations, -1),
            playState: a.playState
        };
    });

    const images = Array.from(document.images).map((img) => {
        const rect = img.getBoundingClientRect();
        return {
            src: img.currentSrc || img.src || '',
            alt: img.alt || '',
            naturalWidth: img.naturalWidth,
            naturalHeight: img.naturalHeight,
            displayWidth: Math.round(rect.width),
            displayHeight: Math.round(rect.height),
            responsive: img.hasAttribute('srcset') || !!img.closest('picture'),
            lazy: img.loading === 'lazy'
        };
    });

    return JSON.stringify({
        navigation: navigation,
        paints: paints,
        layoutShifts: buffered.layoutShifts,
        longTasks: buffered.longTasks,
        animations: animations,
        dom: domStatistics(),
        images: images
    });
})()
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_script_buffers_both_entry_kinds() {
        assert!(OBSERVER_SCRIPT.contains("layout-shift"));
        assert!(OBSERVER_SCRIPT.contains("longtask"));
        assert!(OBSERVER_SCRIPT.contains("__pageAuditEntries"));
    }

    #[test]
    fn test_snapshot_script_uses_explicit_stack() {
        assert!(SNAPSHOT_SCRIPT.contains("stack.pop()"));
        assert!(!SNAPSHOT_SCRIPT.contains("function walk"));
    }

    #[test]
    fn test_snapshot_decodes_from_page_payload() {
        let payload = r#"{
            "navigation": [{"startTime":0,"duration":812.4,"responseStart":120.0,
                            "domInteractive":400.0,"domContentLoaded":450.0,
                            "loadEventEnd":800.0,"transferSize":14020}],
            "paints": [{"name":"first-paint","startTime":210.0},
                       {"name":"first-contentful-paint","startTime":230.5}],
            "layoutShifts": [{"value":0.18,"hadRecentInput":false},
                             {"value":0.4,"hadRecentInput":true}],
            "longTasks": [{"name":"self","startTime":300.0,"duration":120.0}],
            "animations": [{"id":"","name":"spin","duration":1000.0,"delay":0.0,
                            "iterations":-1.0,"playState":"running"}],
            "dom": {"nodes":120,"elements":80,"textNodes":35,"maxDepth":12,
                    "interactive":9,"forms":1,"scripts":4,"stylesheets":2,
                    "images":3,"iframes":0},
            "images": [{"src":"https://example.com/hero.jpg","alt":"hero",
                        "naturalWidth":1200,"naturalHeight":600,
                        "displayWidth":600,"displayHeight":300,
                        "responsive":false,"lazy":true}]
        }"#;

        let snapshot: PageSnapshot = serde_json::from_str(payload).unwrap();
        assert_eq!(snapshot.navigation.len(), 1);
        assert_eq!(snapshot.dom.max_depth, 12);
        assert_eq!(snapshot.images[0].transfer_size, None);
        assert_eq!(snapshot.first_contentful_paint(), Some(230.5));
    }

    #[test]
    fn test_cumulative_layout_shift_skips_recent_input() {
        let snapshot = PageSnapshot {
            layout_shifts: vec![
                LayoutShiftEntry { value: 0.1, had_recent_input: false },
                LayoutShiftEntry { value: 0.15, had_recent_input: false },
                LayoutShiftEntry { value: 0.5, had_recent_input: true },
            ],
            ..Default::default()
        };
        assert!((snapshot.cumulative_layout_shift() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_longest_task_none_when_empty() {
        let snapshot = PageSnapshot::default();
        assert_eq!(snapshot.longest_task(), None);
    }

    #[test]
    fn test_longest_task_picks_maximum() {
        let snapshot = PageSnapshot {
            long_tasks: vec![
                LongTaskEntry { name: "self".into(), start_time: 0.0, duration: 60.0 },
                LongTaskEntry { name: "self".into(), start_time: 100.0, duration: 180.0 },
            ],
            ..Default::default()
        };
        assert_eq!(snapshot.longest_task(), Some(180.0));
    }
}
