use std::io::IsTerminal;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::cli::renderer;
use crate::core::analysis::{self, Report, SyncSummary};
use crate::core::config::AppConfig;
use crate::core::ledger::LedgerSync;

/// Which sections of the report to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportView {
    All,
    Cache,
    Cost,
}

#[derive(Serialize)]
struct ReportPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    sync: Option<&'a SyncSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache: Option<&'a crate::core::models::cache::CachePerformanceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cost: Option<&'a crate::core::models::cost::CostOptimizationReport>,
}

impl<'a> ReportPayload<'a> {
    fn new(report: &'a Report, view: ReportView) -> Self {
        Self {
            sync: report.sync.as_ref(),
            cache: matches!(view, ReportView::All | ReportView::Cache).then_some(&report.cache),
            cost: matches!(view, ReportView::All | ReportView::Cost).then_some(&report.cost),
        }
    }
}

fn spawn_spinner(opts: &OutputOptions, msg: &'static str) -> Option<JoinHandle<()>> {
    if !matches!(opts.format, OutputFormat::Text) || !std::io::stderr().is_terminal() {
        return None;
    }
    Some(tokio::spawn(async move {
        let frames = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
        let mut i = 0usize;
        loop {
            eprint!("\r {} {}", frames[i % frames.len()], msg);
            i = i.wrapping_add(1);
            tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        }
    }))
}

fn stop_spinner(spinner: Option<JoinHandle<()>>) {
    if let Some(s) = spinner {
        s.abort();
        eprint!("\r\x1b[2K");
    }
}

/// Cancel the pipeline on Ctrl-C; it stops at the next page boundary.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping after current page");
            token.cancel();
        }
    });
    cancel
}

fn print_json<T: Serialize>(value: &T, opts: &OutputOptions) -> Result<()> {
    let json = if opts.pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}

fn build_sync(config: &AppConfig) -> Result<LedgerSync> {
    let sync = LedgerSync::from_config(&config.ledger).context("failed to set up ledger client")?;
    if sync.client().is_none() {
        eprintln!(
            "No admin key configured. Set {} or ledger.api_key; showing cached data only.",
            crate::core::config::ADMIN_KEY_ENV
        );
    }
    Ok(sync)
}

pub async fn run(days: Option<u32>, view: ReportView, config: &AppConfig, opts: &OutputOptions) -> Result<()> {
    let window_days = days.unwrap_or(config.ledger.window_days);
    let sync = build_sync(config)?;
    let cancel = cancel_on_interrupt();

    let spinner = spawn_spinner(opts, "Syncing billing ledger...");
    let report = analysis::run(config, &sync, window_days, &cancel).await;
    stop_spinner(spinner);

    match opts.format {
        OutputFormat::Text => {
            let mut sections: Vec<String> = Vec::new();
            if let Some(summary) = &report.sync {
                sections.push(renderer::render_sync(summary, Utc::now(), opts.use_color));
            }
            if matches!(view, ReportView::All | ReportView::Cost) {
                sections.push(renderer::render_cost_report(&report.cost, opts.use_color));
            }
            if matches!(view, ReportView::All | ReportView::Cache) {
                sections.push(renderer::render_cache_report(&report.cache, opts.use_color));
            }
            println!("{}", sections.join("\n\n"));
        }
        OutputFormat::Json => {
            print_json(&ReportPayload::new(&report, view), opts)?;
            if opts.verbose {
                if let Some(error) = report.sync.as_ref().and_then(|s| s.error.as_ref()) {
                    eprintln!("Ledger sync failed: {}", error);
                }
            }
        }
    }

    Ok(())
}

/// Refresh the snapshot without analysing it.
pub async fn sync(days: Option<u32>, config: &AppConfig, opts: &OutputOptions) -> Result<()> {
    let window_days = days.unwrap_or(config.ledger.window_days);
    let sync = build_sync(config)?;
    let cancel = cancel_on_interrupt();

    let spinner = spawn_spinner(opts, "Syncing billing ledger...");
    let outcome = sync.sync(window_days, &cancel).await;
    stop_spinner(spinner);

    let summary = SyncSummary::from(&outcome);
    match opts.format {
        OutputFormat::Text => {
            println!("{}", renderer::render_sync(&summary, Utc::now(), opts.use_color));
            println!("  {} records cached at {}", outcome.records.len(), sync.snapshot_path().display());
        }
        OutputFormat::Json => print_json(&summary, opts)?,
    }

    if let Some(error) = outcome.error {
        return Err(error).context("ledger sync failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analysis::pipeline::analyze;
    use crate::core::pricing::PricingCatalog;

    #[test]
    fn payload_honours_view() {
        let report = analyze(&[], &PricingCatalog::builtin(), Vec::new(), &AppConfig::default(), 7, Utc::now());
        let json = serde_json::to_value(ReportPayload::new(&report, ReportView::Cost)).unwrap();
        assert!(json.get("cost").is_some());
        assert!(json.get("cache").is_none());
        assert!(json.get("sync").is_none());

        let json = serde_json::to_value(ReportPayload::new(&report, ReportView::All)).unwrap();
        assert!(json.get("cache").is_some());
    }
}
