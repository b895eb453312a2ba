//! Human-readable output for the shotsync CLI.

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use shotsync_core::{RestoreSummary, VersionEntry};
use shotsync_remote::SyncStatus;
use std::io::Write;

fn local_time(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format a version entry on one line.
pub fn format_entry(entry: &VersionEntry) -> String {
    format!(
        "{:<16} [{}] {:<8} | {} projects, {} shots, {} records | {}{}",
        entry.id,
        local_time(&entry.timestamp),
        entry.source.to_string(),
        entry.projects_count,
        entry.shots_count,
        entry.records_count,
        format_size(entry.size_bytes as u64),
        if entry.note.is_empty() {
            String::new()
        } else {
            format!(" | {}", entry.note)
        },
    )
}

/// Print the version list, newest first.
pub fn print_versions(entries: &[VersionEntry], writer: &mut dyn Write) -> Result<()> {
    if entries.is_empty() {
        writeln!(writer, "No versions stored.")?;
        return Ok(());
    }

    writeln!(writer, "Versions ({} stored):", entries.len())?;
    writeln!(writer, "{}", "-".repeat(80))?;
    for entry in entries {
        writeln!(writer, "  {}", format_entry(entry))?;
    }
    writeln!(writer, "{}", "-".repeat(80))?;

    let total: u64 = entries.iter().map(|e| e.size_bytes as u64).sum();
    writeln!(writer, "Total: {}", format_size(total))?;
    Ok(())
}

pub fn print_restore(summary: &RestoreSummary, writer: &mut dyn Write) -> Result<()> {
    writeln!(writer, "Restored:")?;
    writeln!(writer, "  Projects: {}", summary.projects_count)?;
    writeln!(writer, "  Shots:    {}", summary.shots_count)?;
    writeln!(writer, "  Records:  {}", summary.records_count)?;
    writeln!(writer, "  Removed:  {}", summary.removed_records)?;
    Ok(())
}

pub fn print_status(status: &SyncStatus, writer: &mut dyn Write) -> Result<()> {
    writeln!(writer, "Auto-sync:")?;
    writeln!(writer, "  Enabled:      {}", status.enabled)?;
    writeln!(
        writer,
        "  Provider:     {}",
        status
            .provider
            .map(|p| p.to_string())
            .unwrap_or_else(|| "(none)".to_string())
    )?;
    writeln!(writer, "  Interval:     {} min", status.interval_minutes)?;
    writeln!(
        writer,
        "  Last attempt: {}",
        status
            .last_attempt_at
            .as_ref()
            .map(local_time)
            .unwrap_or_else(|| "never".to_string())
    )?;
    if let Some(next) = &status.next_due_at {
        writeln!(writer, "  Next due:     {}", local_time(next))?;
    }
    if let Some(error) = &status.last_error {
        writeln!(writer, "  Last error:   {}", error)?;
    }
    Ok(())
}

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
