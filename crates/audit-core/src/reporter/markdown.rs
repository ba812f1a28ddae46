//! Markdown rendering of the audit report.

use crate::report::{AuditReport, PageRunResult};

fn fmt_ms(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.0} ms")).unwrap_or_else(|| "n/a".into())
}

fn fmt_score(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.0}", v * 100.0))
        .unwrap_or_else(|| "n/a".into())
}

fn fmt_ratio(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.3}")).unwrap_or_else(|| "n/a".into())
}

fn fmt_kb(bytes: u64) -> String {
    format!("{:.1} KB", bytes as f64 / 1024.0)
}

fn render_page(out: &mut String, page: &PageRunResult) {
    out.push_str(&format!("### {}\n\n", page.url));
    out.push_str(&format!(
        "Navigation attempts: {}\n\n",
        page.attempts
    ));

    out.push_str("| Metric | Value |\n|---|---|\n");
    let metrics = page.lighthouse.clone().unwrap_or_default();
    out.push_str(&format!(
        "| Performance score | {} |\n",
        fmt_score(metrics.performance_score)
    ));
    out.push_str(&format!("| TTFB | {} |\n", fmt_ms(metrics.ttfb_ms)));
    out.push_str(&format!(
        "| First Contentful Paint | {} |\n",
        fmt_ms(metrics
            .first_contentful_paint_ms
            .or_else(|| page.snapshot.first_contentful_paint()))
    ));
    out.push_str(&format!(
        "| Largest Contentful Paint | {} |\n",
        fmt_ms(metrics.largest_contentful_paint_ms)
    ));
    out.push_str(&format!(
        "| Cumulative Layout Shift | {} |\n",
        fmt_ratio(
            metrics
                .cumulative_layout_shift
                .or(Some(page.snapshot.cumulative_layout_shift()))
        )
    ));
    out.push_str(&format!(
        "| Total Blocking Time | {} |\n",
        fmt_ms(metrics.total_blocking_time_ms)
    ));
    out.push_str(&format!(
        "| Time to Interactive | {} |\n",
        fmt_ms(metrics.time_to_interactive_ms)
    ));
    out.push_str(&format!(
        "| Speed Index | {} |\n",
        fmt_ms(metrics.speed_index_ms)
    ));
    out.push_str(&format!(
        "| Longest main-thread task | {} |\n",
        fmt_ms(page.snapshot.longest_task())
    ));
    out.push_str(&format!("| DOM nodes | {} |\n", page.snapshot.dom.nodes));
    out.push_str(&format!(
        "| DOM max depth | {} |\n\n",
        page.snapshot.dom.max_depth
    ));

    out.push_str("| Transfer | Bytes |\n|---|---|\n");
    out.push_str(&format!("| Scripts | {} |\n", fmt_kb(page.bundle.scripts)));
    out.push_str(&format!("| Styles | {} |\n", fmt_kb(page.bundle.styles)));
    out.push_str(&format!("| Images | {} |\n", fmt_kb(page.bundle.images)));
    out.push_str(&format!("| Fonts | {} |\n", fmt_kb(page.bundle.fonts)));
    out.push_str(&format!("| Other | {} |\n", fmt_kb(page.bundle.other)));
    out.push_str(&format!("| Total | {} |\n\n", fmt_kb(page.bundle.total)));

    if page.js_coverage.total_bytes > 0 {
        out.push_str(&format!(
            "Unused JavaScript: {:.0}% of {}\n\n",
            page.js_coverage.unused_ratio() * 100.0,
            fmt_kb(page.js_coverage.total_bytes)
        ));
    }
    if page.css_coverage.total_bytes > 0 {
        out.push_str(&format!(
            "Unused CSS: {:.0}% of {}\n\n",
            page.css_coverage.unused_ratio() * 100.0,
            fmt_kb(page.css_coverage.total_bytes)
        ));
    }

    if let Some(path) = &page.har_path {
        out.push_str(&format!("Traffic capture: `{}`\n\n", path.display()));
    }
    if let Some(path) = &page.screenshot_path {
        out.push_str(&format!("Screenshot: `{}`\n\n", path.display()));
    }
}

/// Render the full report as a markdown document.
pub fn render(report: &AuditReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Performance Audit — {}\n\n", report.target_url));
    out.push_str(&format!("Generated: {}\n\n", report.generated_at));

    for profile in &report.profiles {
        out.push_str(&format!("## {}\n\n", profile.profile.label));
        for page in &profile.pages {
            render_page(&mut out, page);
        }
    }

    out.push_str("## Recommendations\n\n");
    if report.summary.recommendations.is_empty() {
        out.push_str("No issues flagged.\n");
    } else {
        for rec in &report.summary.recommendations {
            out.push_str(&format!("- {rec}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::AuditOptions;
    use crate::profiles::ThrottlingProfile;
    use crate::report::{AuditReport, PageRunResult, ProfileReport};

    fn sample_report() -> AuditReport {
        let options = AuditOptions {
            target_url: "https://example.com/".into(),
            max_pages: 1,
            max_navigations: 3,
            output_dir: "/tmp/out".into(),
            retries: 2,
            nav_timeout_ms: 45_000,
        };
        let page = PageRunResult {
            url: "https://example.com/".into(),
            attempts: 2,
            ..Default::default()
        };
        AuditReport::assemble(
            &options,
            vec![ProfileReport {
                profile: ThrottlingProfile::registry().remove(0),
                pages: vec![page],
            }],
        )
    }

    #[test]
    fn test_render_has_section_per_profile_and_page() {
        let md = render(&sample_report());
        assert!(md.starts_with("# Performance Audit — https://example.com/"));
        assert!(md.contains("## Mobile"));
        assert!(md.contains("### https://example.com/"));
        assert!(md.contains("## Recommendations"));
    }

    #[test]
    fn test_unmeasured_metrics_render_as_na_not_zero() {
        let md = render(&sample_report());
        assert!(md.contains("| Largest Contentful Paint | n/a |"));
        assert!(md.contains("| TTFB | n/a |"));
    }

    #[test]
    fn test_empty_recommendations_still_render_section() {
        let md = render(&sample_report());
        let idx = md.find("## Recommendations").unwrap();
        assert!(md[idx..].contains("No issues flagged."));
    }
}
