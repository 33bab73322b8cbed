use chrono::{DateTime, Utc};
use colored::{control, ColoredString, Colorize};

use crate::core::analysis::SyncSummary;
use crate::core::formatter::{
    format_amount, format_cost, format_percent, format_rate_bar, format_sync_age, format_tokens,
};
use crate::core::models::cache::{CachePerformanceReport, Priority};
use crate::core::models::cost::{Confidence, CostOptimizationReport};

const BAR_WIDTH: usize = 12;
const MAX_DAYS: usize = 10;

/// One-line sync status, plus a warning line when the data is stale.
///
/// ```text
///  Ledger   incremental, 1 page, 14 new rows (synced just now)
/// ```
pub fn render_sync(summary: &SyncSummary, now: DateTime<Utc>, use_color: bool) -> String {
    control::set_override(use_color);

    let age = format_sync_age(summary.last_fetch.as_ref(), now);
    let detail = if summary.fetched == 0 && summary.error.is_none() {
        format!("{} ({})", summary.mode, age)
    } else {
        format!(
            "{}, {} page{}, {} new row{} ({})",
            summary.mode,
            summary.pages,
            if summary.pages == 1 { "" } else { "s" },
            summary.added,
            if summary.added == 1 { "" } else { "s" },
            age
        )
    };
    let mut lines = vec![format!(" {}   {}", "Ledger".bold(), detail)];
    if summary.truncated {
        lines.push(format!("          {}", "page limit reached, window may be incomplete".yellow()));
    }
    if let Some(error) = &summary.error {
        lines.push(format!("          {} {}", "showing cached data:".yellow(), error.red()));
    }
    lines.join("\n")
}

/// Prompt-cache section.
///
/// ```text
///  Prompt Cache (7d, 2025-11-22 to 2025-11-29)
///   Requests   412
///   Hit rate   38.2% [█████░░░░░░░]
///   Saved      $0.84 (21.4%)
///   Cost       $3.09, $3.93 without cache
/// ```
pub fn render_cache_report(report: &CachePerformanceReport, use_color: bool) -> String {
    control::set_override(use_color);

    let mut lines: Vec<String> = Vec::new();
    lines.push(
        format!(
            " Prompt Cache ({}d, {} to {})",
            report.period_days, report.start_date, report.end_date
        )
        .bold()
        .to_string(),
    );

    if report.total_requests == 0 {
        lines.push(format!("  {}", "No inference requests in this window.".dimmed()));
        push_footnotes(&mut lines, report.skipped_records, report.pricing_fallbacks);
        return lines.join("\n");
    }

    lines.push(format!("  {}   {}", "Requests".cyan(), report.total_requests));
    lines.push(format!(
        "  {}   {} {}",
        "Hit rate".cyan(),
        color_by_rate(report.overall_cache_hit_rate, &format_percent(report.overall_cache_hit_rate)),
        format_rate_bar(report.overall_cache_hit_rate, BAR_WIDTH).magenta()
    ));
    lines.push(format!(
        "  {}      {} ({})",
        "Saved".cyan(),
        format_cost(report.total_savings),
        format_percent(report.overall_savings_percent)
    ));
    lines.push(format!(
        "  {}       {}, {} without cache",
        "Cost".cyan(),
        format_cost(report.total_cost),
        format_cost(report.total_cost_without_cache)
    ));

    lines.push(format!("  {}:", "By Model".cyan()));
    for stats in &report.model_stats {
        lines.push(format!(
            "    {:<28} {:>5} req  {:>6} hit  {:>7} tok  saved {}",
            stats.model_name,
            stats.total_requests,
            format_percent(stats.cache_hit_rate),
            format_percent(stats.token_cache_hit_rate),
            format_cost(stats.total_savings)
        ));
    }

    if !report.daily_stats.is_empty() {
        lines.push(format!("  {}:", "Recent Days".cyan()));
        for day in report.daily_stats.iter().rev().take(MAX_DAYS) {
            lines.push(format!(
                "    {:<8} {:>5} req  {:>6}  saved {}",
                day.date.format("%b %d"),
                day.total_requests,
                format_percent(day.cache_hit_rate),
                format_cost(day.total_savings)
            ));
        }
    }

    if !report.recommendations.is_empty() {
        lines.push(format!("  {}:", "Recommendations".cyan()));
        for rec in &report.recommendations {
            let tag: ColoredString = match rec.priority {
                Priority::High => "[high]".red(),
                Priority::Medium => "[medium]".yellow(),
                Priority::Low => "[low]".dimmed(),
            };
            lines.push(format!("    {} {}", tag, rec.title));
            lines.push(format!(
                "      {} -> {}",
                rec.current_value,
                rec.recommended_value
            ));
            for item in &rec.action_items {
                lines.push(format!("      - {}", item.dimmed()));
            }
        }
    }

    let potential = &report.potential_savings;
    if potential.models_needing_improvement > 0 {
        lines.push(format!(
            "  {}  {} at {:.0}% hit rate ({} model{} below target)",
            "Potential".cyan(),
            format_cost(potential.total_potential_savings),
            potential.target_hit_rate,
            potential.models_needing_improvement,
            if potential.models_needing_improvement == 1 { "" } else { "s" }
        ));
    }

    push_footnotes(&mut lines, report.skipped_records, report.pricing_fallbacks);
    lines.join("\n")
}

/// Spend and model-substitution section.
pub fn render_cost_report(report: &CostOptimizationReport, use_color: bool) -> String {
    control::set_override(use_color);

    let mut lines: Vec<String> = Vec::new();
    lines.push(
        format!(" Spend ({}d)", report.analysis_period_days)
            .bold()
            .to_string(),
    );

    let by_currency: Vec<String> = report
        .cost_by_currency
        .iter()
        .map(|(currency, amount)| format_amount(*amount, currency))
        .collect();
    lines.push(format!(
        "  {}      {}",
        "Total".cyan(),
        if by_currency.is_empty() {
            format_cost(0.0)
        } else {
            by_currency.join(" + ")
        }
    ));

    if !report.model_breakdown.is_empty() {
        lines.push(format!("  {}:", "By Model".cyan()));
        for model in &report.model_breakdown {
            lines.push(format!(
                "    {:<28} {:<10} {:>6}  {:>5} req  ({} tok)",
                model.display_name,
                format_cost(model.total_cost),
                format_percent(model.percentage_of_total),
                model.request_count,
                format_tokens(model.total_tokens)
            ));
            if !model.credentials.is_empty() {
                let owners: Vec<String> = model.credentials.iter().map(|c| c.to_string()).collect();
                lines.push(format!("      {}", owners.join(", ").dimmed()));
            }
        }
    }

    if !report.recommendations.is_empty() {
        lines.push(format!("  {}:", "Cheaper Models".cyan()));
        for rec in &report.recommendations {
            let confidence = rec.confidence.to_string();
            let confidence: ColoredString = match rec.confidence {
                Confidence::High => confidence.green(),
                Confidence::Medium => confidence.yellow(),
                Confidence::Low => confidence.red(),
            };
            lines.push(format!(
                "    {} -> {}  save {} ({}) [{}]",
                rec.current_model_name,
                rec.recommended_model_name,
                format_cost(rec.savings_amount),
                format_percent(rec.savings_percent),
                confidence
            ));
            lines.push(format!("      {}", rec.reason.dimmed()));
        }
        lines.push(format!(
            "  {}    {} per month",
            "Potential".cyan(),
            format_cost(report.potential_monthly_savings).green()
        ));
    }

    if !report.daily_costs.is_empty() {
        lines.push(format!("  {}:", "Recent Days".cyan()));
        for day in report.daily_costs.iter().rev().take(MAX_DAYS) {
            lines.push(format!(
                "    {:<8} {:>5} req  {}",
                day.date.format("%b %d"),
                day.requests,
                format_cost(day.total_cost)
            ));
        }
    }

    push_footnotes(&mut lines, report.skipped_records, report.pricing_fallbacks);
    lines.join("\n")
}

fn push_footnotes(lines: &mut Vec<String>, skipped: usize, fallbacks: u64) {
    if skipped > 0 {
        lines.push(format!("  {}", format!("{} ledger rows skipped", skipped).dimmed()));
    }
    if fallbacks > 0 {
        lines.push(format!(
            "  {}",
            format!("{} requests priced with fallback rates", fallbacks).dimmed()
        ));
    }
}

fn color_by_rate(rate: f64, text: &str) -> ColoredString {
    if rate >= 50.0 {
        text.green()
    } else if rate >= 20.0 {
        text.yellow()
    } else {
        text.red()
    }
}
