use chrono::{DateTime, Utc};

/// Returns "$1.23", or "$0.0042" for sub-cent amounts so small charges stay
/// visible. Negative amounts keep their sign: "-$0.50".
pub fn format_cost(amount: f64) -> String {
    let sign = if amount < 0.0 { "-" } else { "" };
    let abs = amount.abs();
    if abs > 0.0 && abs < 0.01 {
        format!("{}${:.4}", sign, abs)
    } else {
        format!("{}${:.2}", sign, abs)
    }
}

/// Amount in a ledger currency: "$1.23" for USD, "1.2300 DIEM" otherwise.
pub fn format_amount(amount: f64, currency: &str) -> String {
    if currency.eq_ignore_ascii_case("usd") {
        format_cost(amount)
    } else {
        format!("{:.4} {}", amount, currency)
    }
}

pub fn format_tokens(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        format!("{}", count)
    }
}

pub fn format_percent(percent: f64) -> String {
    format!("{:.1}%", percent)
}

/// Returns "synced 4m ago", "synced 2h 5m ago", "synced just now", or
/// "never synced".
pub fn format_sync_age(last_fetch: Option<&DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(last_fetch) = last_fetch else {
        return "never synced".to_string();
    };
    let total_minutes = (now - *last_fetch).num_minutes();
    if total_minutes < 1 {
        return "synced just now".to_string();
    }
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours >= 24 {
        format!("synced {}d ago", hours / 24)
    } else if hours > 0 {
        format!("synced {}h {}m ago", hours, minutes)
    } else {
        format!("synced {}m ago", minutes)
    }
}

/// Returns "[████░░░░░░░░]" where █ is the filled share.
pub fn format_rate_bar(percent: f64, width: usize) -> String {
    let percent = percent.clamp(0.0, 100.0);
    let filled = ((percent / 100.0) * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}
