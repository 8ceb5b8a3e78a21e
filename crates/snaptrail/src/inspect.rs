//! `inspect` subcommand: renders a session export document as a readable
//! summary.

use std::path::Path;

use anyhow::Context;
use snaptrail_engine::session::SessionExport;

pub fn run(path: &Path) -> anyhow::Result<()> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let export: SessionExport = serde_json::from_str(&body)
        .with_context(|| format!("{} is not a session export", path.display()))?;

    println!("Session  {}", export.session_id);
    println!("Domain   {}", export.domain);
    println!(
        "Window   {} .. {} ({}s)",
        export.start_time.format("%Y-%m-%d %H:%M:%S"),
        export.end_time.format("%Y-%m-%d %H:%M:%S"),
        export.summary.duration
    );
    println!(
        "Totals   {} screenshots, {} navigations, {} unique pages",
        export.total_screenshots, export.navigation_count, export.summary.unique_pages
    );

    if !export.pages.is_empty() {
        println!();
        println!("Pages:");
        for page in &export.pages {
            println!("  {:>3}. {} ({})", page.sequence, page.url, page.title);
        }
    }

    if !export.screenshots.is_empty() {
        println!();
        println!("Screenshots:");
        for shot in &export.screenshots {
            let marker = if shot.is_navigation { "nav" } else { "   " };
            let what = shot
                .element_info
                .as_ref()
                .map(|element| element.kind())
                .unwrap_or_else(|| "manual".to_string());
            println!(
                "  {:>3}. [{}] {:<12} {}",
                shot.sequence, marker, what, shot.filename
            );
        }
    }

    Ok(())
}
