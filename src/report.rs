//! Report - console progress line and end-of-session summary

use colored::Colorize;
use std::io::Write as _;

use crate::intercept::{AggregateState, SessionOutcome, Stats};

/// One-line running counters
pub fn stats_line(stats: &Stats) -> String {
    format!(
        "Strings: {} | URLs: {} | File writes: {} | File reads: {} | WMI: {} | Processes: {}",
        stats.strings, stats.urls, stats.file_writes, stats.file_reads, stats.wmi, stats.processes
    )
}

/// Redraw the running counters in place
pub fn print_stats(stats: &Stats) {
    print!("\r[*] {}", stats_line(stats));
    let _ = std::io::stdout().flush();
}

/// Plain-text summary of everything the session observed
pub fn render_summary(state: &AggregateState) -> String {
    let stats = state.stats();
    let mut out = String::new();

    out.push_str("Summary\n");
    out.push_str(&format!("  Strings compared : {}\n", stats.strings));
    out.push_str(&format!("  URLs found       : {}\n", stats.urls));
    out.push_str(&format!("  File writes      : {}\n", stats.file_writes));
    out.push_str(&format!("  File reads       : {}\n", stats.file_reads));
    out.push_str(&format!("  WMI queries      : {}\n", stats.wmi));
    out.push_str(&format!("  Processes created: {}\n", stats.processes));

    let urls = state.unique_urls();
    if !urls.is_empty() {
        out.push_str("\nURLs:\n");
        for url in urls {
            out.push_str(&format!("  {}\n", url));
        }
    }

    if !state.files().is_empty() {
        out.push_str("\nFiles:\n");
        for (filename, modes) in state.files() {
            out.push_str(&format!("  [{}] {}\n", modes.join(","), filename));
        }
    }

    if !state.processes().is_empty() {
        out.push_str("\nProcesses:\n");
        for process in state.processes() {
            let shown = if process.command_line.is_empty() {
                &process.application
            } else {
                &process.command_line
            };
            out.push_str(&format!("  {} (flags: {:#x})\n", shown, process.creation_flags));
        }
    }

    if !state.wmi_queries().is_empty() {
        out.push_str("\nWMI queries:\n");
        for query in state.wmi_queries() {
            out.push_str(&format!("  {}\n", query));
        }
    }

    if !state.string_compares().is_empty() {
        out.push_str("\nString comparisons:\n");
        for (left, rights) in state.string_compares() {
            out.push_str(&format!("  \"{}\" vs {}\n", left, quoted(rights)));
        }
    }

    out
}

fn quoted(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("\"{}\"", v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Print the outcome and summary to the console and log them
pub fn print_summary(outcome: &SessionOutcome, state: &AggregateState) {
    let summary = render_summary(state);

    println!();
    println!("{} {}", "[*] Session ended:".bold().cyan(), outcome.reason.to_string().yellow());
    println!("    {}", outcome.detail.replace('\n', "\n    "));
    println!("{}", "═".repeat(50).cyan());
    print!("{}", summary);
    println!("{}", "═".repeat(50).cyan());

    log::info!("Session ended ({}): {}", outcome.reason, outcome.detail);
    for line in summary.lines() {
        log::info!("{}", line);
    }
}
