// AI
//! 📊 progress.rs: "Are we there yet?" Every pipeline, every time, forever.
//!
//! Two things live here. [`ProgressMetrics`] drives a bar while one input is being
//! read, and lets indicatif do the arithmetic for bytes, rates and ETA. [`render_report`]
//! turns the final [`RunReport`] into a table comfy enough for a terminal at 3am.
//!
//! ⚠️ Watching this progress bar will not make it go faster. We've tried. 🦆

use std::time::Instant;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use indicatif::{ProgressBar, ProgressStyle};

use crate::pipeline::RunReport;

const SIZED_TEMPLATE: &str = "{prefix}\n[{bar:40.cyan/blue}] {percent}% | {binary_bytes}/{binary_total_bytes} at {binary_bytes_per_sec} | {msg} | {elapsed} in, ~{eta} to go";
const UNSIZED_TEMPLATE: &str = "{spinner} {prefix} | {binary_bytes} at {binary_bytes_per_sec} | {msg} | {elapsed} in";

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// 📊 One input's progress: bytes drive the bar, records ride along in the message.
///
/// `total_size` of 0 means "no idea" (gzip, in-memory lines), which gets a spinner.
pub(crate) struct ProgressMetrics {
    total_records: u64,
    progress_bar: ProgressBar,
    start_time: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressMetrics")
            .field("origin", &self.progress_bar.prefix())
            .field("total_bytes", &self.progress_bar.position())
            .field("total_records", &self.total_records)
            .finish()
    }
}

impl ProgressMetrics {
    pub(crate) fn new(origin: String, total_size: u64) -> Self {
        let (progress_bar, template) = match total_size {
            0 => (ProgressBar::new_spinner(), UNSIZED_TEMPLATE),
            size => (ProgressBar::new(size), SIZED_TEMPLATE),
        };
        // -- 🎨 a template typo costs us the pretty bar, not the run
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        progress_bar.set_style(style);
        progress_bar.set_prefix(origin);

        Self {
            total_records: 0,
            progress_bar,
            start_time: Instant::now(),
        }
    }

    /// 🔄 Feed it after every page.
    pub(crate) fn update(&mut self, bytes_read: u64, records_read: u64) {
        self.total_records += records_read;
        self.progress_bar.inc(bytes_read);
        self.progress_bar.set_message(self.records_message());
    }

    pub(crate) fn finish(&self) {
        self.progress_bar.finish_with_message(self.records_message());
    }

    fn records_message(&self) -> String {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let per_sec = if elapsed > 0.0 {
            self.total_records as f64 / elapsed
        } else {
            0.0
        };
        format!(
            "{} records ({} records/s)",
            format_number(self.total_records),
            format_number(per_sec as u64)
        )
    }
}

/// 🍽️ The run summary, one row per counter.
pub fn render_report(report: &RunReport) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["", "count"]);
    let rows = [
        ("📄 records read", report.records_read),
        ("✅ decoded", report.decoded),
        ("💀 dropped (malformed)", report.dropped),
        ("⚠️ coercion warnings", report.coercion_warnings),
        ("🗄️ inserted", report.inserted),
        ("🚫 insert failures", report.insert_failures),
        ("🧺 hostnames merged", report.keys_merged),
        ("💀 hostnames failed", report.keys_failed),
        ("⚔️ conflicts retried", report.conflicts_retried),
        ("🗂️ index failures", report.index_failures),
    ];
    for (label, count) in rows {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(format_number(count)).set_alignment(CellAlignment::Right),
        ]);
    }
    table.to_string()
}
