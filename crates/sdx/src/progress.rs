//! 📊 progress.rs: "Is the new generation full yet?", asked every ingestion, forever.
//!
//! 🚀 One progress bar for the whole cycle: how much of the source file we have
//! read, how fast, and how many documents the backend has actually taken.
//! Reading fast means nothing if the cluster is bouncing half of it, so both
//! sides get a row.
//!
//! ⚠️ Staring at the bar does not make the bulk requests go faster. We checked.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

use crate::writer::WriterStats;

// -- 📏 one mebibyte. not a megabyte. this hill is still occupied.
const MIB: u64 = 1024 * 1024;

/// ⏱️ Rates are measured over this sliding window so one slow bulk doesn't spike the display.
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// 📦 Bytes, scaled to the size of the source so the units don't jump around mid-run.
pub(crate) fn format_bytes(bytes: u64, file_size: u64) -> String {
    if file_size >= 512 * MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if file_size >= MIB {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{} bytes", bytes)
    }
}

/// 🔢 "1000000" → "1,000,000". Eyes: you're welcome.
pub fn format_number(n: u64) -> String {
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

/// ⏱️ MM:SS, or HH:MM:SS for the long ones. If you see hours, go get lunch.
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📡 Throughput at this instant.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Rates {
    docs_per_sec: f64,
    mib_per_sec: f64,
}

/// 📊 Live progress of one ingestion into one generation.
pub(crate) struct ProgressMetrics {
    /// 🏷️ the generation being filled
    generation: String,
    /// 📏 source size in bytes, 0 when unknown
    total_size: u64,
    total_bytes: u64,
    total_docs: u64,
    /// ✅💀 outcomes so far, as the writer counted them
    outcomes: WriterStats,
    progress_bar: ProgressBar,
    rate_samples: VecDeque<(Instant, u64, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar doesn't do Debug, and nobody wants to read it anyway
        f.debug_struct("ProgressMetrics")
            .field("generation", &self.generation)
            .field("total_size", &self.total_size)
            .field("total_bytes", &self.total_bytes)
            .field("total_docs", &self.total_docs)
            .field("outcomes", &self.outcomes)
            .finish()
    }
}

impl ProgressMetrics {
    /// 🚀 `total_size` is the expected number of source bytes; 0 means "no idea".
    pub(crate) fn new(generation: impl Into<String>, total_size: u64) -> Self {
        let progress_bar = ProgressBar::new(total_size);
        // -- 🎨 the template is a constant; if indicatif ever rejects it we just keep the default look
        if let Ok(style) = ProgressStyle::default_bar().template("{msg}\n| [{bar:40.cyan/blue}]") {
            progress_bar.set_style(style.progress_chars("=>-"));
        }

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64, 0u64));

        Self {
            generation: generation.into(),
            total_size,
            total_bytes: 0,
            total_docs: 0,
            outcomes: WriterStats::default(),
            progress_bar,
            rate_samples,
            start_time,
        }
    }

    /// 🔄 Account for one batch read from the source.
    pub(crate) fn update(&mut self, bytes_read: u64, docs_read: u64) {
        self.total_bytes += bytes_read;
        self.total_docs += docs_read;

        let rates = self.calculate_rates(Instant::now());
        self.render(rates);
        self.progress_bar.set_position(self.total_bytes);
    }

    /// 📬 Latest writer counters, shown on the next render.
    pub(crate) fn record_outcomes(&mut self, stats: WriterStats) {
        self.outcomes = stats;
    }

    pub(crate) fn total_docs(&self) -> u64 {
        self.total_docs
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// ✅ Done reading. Final render, then let the bar rest.
    pub(crate) fn finish(&mut self) {
        let rates = self.calculate_rates(Instant::now());
        self.render(rates);
        self.progress_bar.finish();
    }

    /// 📈 Deltas between `now` and the oldest sample still inside [`RATE_WINDOW`].
    fn calculate_rates(&mut self, now: Instant) -> Rates {
        while let Some(&(timestamp, _, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > RATE_WINDOW {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples
            .push_back((now, self.total_bytes, self.total_docs));

        if let Some(&(oldest_time, oldest_bytes, oldest_docs)) = self.rate_samples.front() {
            let elapsed = now.duration_since(oldest_time).as_secs_f64();
            if elapsed > 0.0 {
                let bytes_delta = self.total_bytes.saturating_sub(oldest_bytes);
                let docs_delta = self.total_docs.saturating_sub(oldest_docs);
                return Rates {
                    docs_per_sec: docs_delta as f64 / elapsed,
                    mib_per_sec: (bytes_delta as f64 / elapsed) / MIB as f64,
                };
            }
        }

        // -- 💤 not enough history yet
        Rates {
            docs_per_sec: 0.0,
            mib_per_sec: 0.0,
        }
    }

    /// 🎨 Layout:
    /// ```text
    /// generation: <name>
    ///   <docs/s>          <docs read>
    ///   <MiB/s>           <bytes read / total>
    ///   <indexed>         <failed>
    ///   <elapsed>         <remaining>
    /// | [=====>----------]
    /// ```
    fn render(&self, rates: Rates) {
        let percent = if self.total_size > 0 {
            (self.total_bytes as f64 / self.total_size as f64) * 100.0
        } else {
            0.0
        };

        let elapsed = self.start_time.elapsed();
        let remaining = if percent > 0.0 {
            // 🔮 linear extrapolation. the future looks like the past, until it doesn't.
            let total_estimated = elapsed.as_secs_f64() / (percent / 100.0);
            let remaining_secs = total_estimated - elapsed.as_secs_f64();
            if remaining_secs > 0.0 {
                format_duration(Duration::from_secs_f64(remaining_secs))
            } else {
                "--:--".to_string()
            }
        } else {
            "--:--".to_string()
        };

        let right = |text: String| Cell::new(text).set_alignment(CellAlignment::Right);

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            right(format!("{} Docs/s", format_number(rates.docs_per_sec as u64))),
            right(format!("{} Docs read", format_number(self.total_docs))),
        ]);
        table.add_row(vec![
            right(format!("{:.2} MiB/s", rates.mib_per_sec)),
            right(format!(
                "{} / {} ({:.2}%)",
                format_bytes(self.total_bytes, self.total_size),
                format_bytes(self.total_size, self.total_size),
                percent
            )),
        ]);
        table.add_row(vec![
            right(format!("{} indexed", format_number(self.outcomes.indexed))),
            right(format!("{} failed", format_number(self.outcomes.failed))),
        ]);
        table.add_row(vec![
            right(format!("{} elapsed", format_duration(elapsed))),
            right(format!("{} remaining", remaining)),
        ]);

        self.progress_bar
            .set_message(format!("generation: {}\n{}", self.generation, table));
    }
}
