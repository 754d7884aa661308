//! Plain-text summary of the sync-state document.

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::metadata::{HistoryStatus, SyncDirection, SyncMetadataDocument};

const HISTORY_SHOWN: usize = 10;
const SAMPLE_FILES: usize = 5;

/// Human phrase for the time between `then` and `now`, e.g. "3 hours ago".
pub fn humanize_since(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds();
    let future = secs < 0;
    let secs = secs.unsigned_abs();

    let minutes = (secs as f64 / 60.0).round() as u64;
    let hours = (secs as f64 / 3600.0).round() as u64;
    let days = (secs as f64 / 86_400.0).round() as u64;
    let months = (days as f64 / 30.4).round() as u64;
    let years = (days as f64 / 365.0).round() as u64;

    let phrase = match secs {
        0..=44 => "a few seconds".to_string(),
        45..=89 => "a minute".to_string(),
        _ if secs < 45 * 60 => format!("{minutes} minutes"),
        _ if secs < 90 * 60 => "an hour".to_string(),
        _ if secs < 22 * 3600 => format!("{hours} hours"),
        _ if secs < 36 * 3600 => "a day".to_string(),
        _ if days < 26 => format!("{days} days"),
        _ if days < 46 => "a month".to_string(),
        _ if days < 320 => format!("{months} months"),
        _ if days < 548 => "a year".to_string(),
        _ => format!("{years} years"),
    };

    if future {
        format!("in {phrase}")
    } else {
        format!("{phrase} ago")
    }
}

fn direction_label(direction: SyncDirection) -> &'static str {
    match direction {
        SyncDirection::DriveToGithub => "Drive -> GitHub",
        SyncDirection::GithubToDrive => "GitHub -> Drive",
    }
}

pub fn render_status(doc: &SyncMetadataDocument, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n=== Google Drive Sync Status ===\n");
    let _ = writeln!(out, "Drive Folder: {}", doc.drive.folder_url);
    let _ = writeln!(
        out,
        "Last Sync: {} ({})\n",
        humanize_since(doc.last_sync, now),
        doc.last_sync.to_rfc3339()
    );
    let _ = writeln!(out, "Files Tracked: {}\n", doc.files.len());

    if !doc.sync_history.is_empty() {
        let _ = writeln!(out, "Recent Sync History:\n");
        for (i, entry) in doc.sync_history.iter().take(HISTORY_SHOWN).enumerate() {
            let status = match entry.status {
                HistoryStatus::Success => "OK",
                HistoryStatus::Failed => "FAILED",
            };
            let _ = writeln!(
                out,
                "{}. [{status}] {} - {}",
                i + 1,
                direction_label(entry.direction),
                humanize_since(entry.timestamp, now)
            );
            if let Some(files) = entry.files_changed.as_ref().filter(|f| !f.is_empty()) {
                let _ = writeln!(out, "   Files: {}", files.len());
            }
            if let Some(conflicts) = entry.conflicts.filter(|c| *c > 0) {
                let _ = writeln!(out, "   Conflicts: {conflicts}");
            }
            if let Some(pr) = entry.pr_number {
                let _ = writeln!(out, "   PR: #{pr}");
            }
            if let Some(error) = &entry.error {
                let _ = writeln!(out, "   Error: {error}");
            }
            let _ = writeln!(out);
        }
    }

    let _ = writeln!(out, "Sample Tracked Files:\n");
    for (path, file) in doc.files.iter().take(SAMPLE_FILES) {
        let _ = writeln!(out, "- {path}");
        let synced = file
            .last_synced_time
            .map(|t| humanize_since(t, now))
            .unwrap_or_else(|| "never".to_string());
        let direction = file
            .sync_direction
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let _ = writeln!(out, "  Last synced: {synced} ({direction})");
    }
    if doc.files.len() > SAMPLE_FILES {
        let _ = writeln!(out, "\n... and {} more files", doc.files.len() - SAMPLE_FILES);
    }
    out
}
