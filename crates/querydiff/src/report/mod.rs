use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;

use crate::models::{ExecutionError, QueryPair, RunSummary};
use crate::pairs::{
    FIRST_HEADER, INTERNAL_DELIMITER, ORIGIN_HEADER, PAIR_DELIMITER, SECOND_HEADER,
    section_header,
};

pub const MISMATCH_LOG_FILE: &str = "out.log";
pub const ERROR_LOG_FILE: &str = "out.err.log";
pub const SUMMARY_FILE: &str = "out.summary.json";

pub const NOT_EQUIVALENT_LABEL: &str = "The following 2 queries are not equivalent.";

#[must_use]
pub fn error_label(error: &ExecutionError) -> String {
    format!("Meet exception when comparing the following 2 queries: {error}.")
}

/// Renders one self-contained log block. Parsing the block back yields the
/// same pair and description.
#[must_use]
pub fn render_block(pair: &QueryPair, label: &str, description: &str) -> String {
    let mut block = String::new();
    push_line(&mut block, PAIR_DELIMITER);
    push_line(&mut block, &single_line(label));
    block.push('\n');
    if pair.has_origin() {
        block.push_str(&section_header(ORIGIN_HEADER));
        push_segment(&mut block, &pair.origin);
    }
    push_line(&mut block, INTERNAL_DELIMITER);
    block.push_str(&section_header(FIRST_HEADER));
    push_segment(&mut block, &pair.first);
    push_line(&mut block, INTERNAL_DELIMITER);
    block.push_str(&section_header(SECOND_HEADER));
    push_segment(&mut block, &pair.second);
    push_line(&mut block, INTERNAL_DELIMITER);
    push_segment(&mut block, description);
    push_line(&mut block, PAIR_DELIMITER);
    block
}

fn push_line(block: &mut String, line: &str) {
    block.push_str(line);
    block.push('\n');
}

fn push_segment(block: &mut String, segment: &str) {
    block.push_str(segment);
    if !segment.is_empty() && !segment.ends_with('\n') {
        block.push('\n');
    }
}

fn single_line(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Mismatch,
    Error,
}

impl LogKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mismatch => "mismatch",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLayout {
    pub mismatch_log: PathBuf,
    pub error_log: PathBuf,
    pub summary_json: PathBuf,
}

#[must_use]
pub fn build_report_layout(out_dir: &Path) -> ReportLayout {
    ReportLayout {
        mismatch_log: out_dir.join(MISMATCH_LOG_FILE),
        error_log: out_dir.join(ERROR_LOG_FILE),
        summary_json: out_dir.join(SUMMARY_FILE),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SinkStats {
    pub mismatch_blocks: usize,
    pub error_blocks: usize,
    pub failed_writes: usize,
}

pub const SUMMARY_SCHEMA_VERSION: &str = "querydiff-summary.v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub schema_version: &'static str,
    pub started_at_utc: String,
    pub finished_at_utc: String,
    pub input: PathBuf,
    pub database: PathBuf,
    pub workers: usize,
    pub overwritten: usize,
    pub summary: RunSummary,
    pub sinks: SinkStats,
}

pub fn write_summary_artifact(path: &Path, report: &CheckReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("failed to create summary artifact directory")?;
    }

    let encoded =
        serde_json::to_vec_pretty(report).context("failed to encode check summary json")?;
    std::fs::write(path, encoded).context("failed to write check summary artifact")
}

type BoxedWriter = Box<dyn Write + Send>;

/// Cloneable producer side of the sinks. Blocks are queued whole, so blocks
/// from different workers never interleave.
#[derive(Debug, Clone)]
pub struct ReportHandle {
    sender: Sender<(LogKind, String)>,
}

impl ReportHandle {
    pub fn append(&self, kind: LogKind, block: String) {
        if let Err(mpsc::SendError((kind, block))) = self.sender.send((kind, block)) {
            eprintln!("report: sink_closed log={}", kind.as_str());
            eprintln!("{block}");
        }
    }
}

pub struct ReportSinks {
    handle: Option<ReportHandle>,
    writer: Option<JoinHandle<Result<SinkStats>>>,
}

impl ReportSinks {
    /// Creates (truncating) both logs before any pair is checked.
    pub fn open(layout: &ReportLayout) -> Result<Self> {
        for path in [&layout.mismatch_log, &layout.error_log] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create log directory: {}", parent.display())
                })?;
            }
        }
        let mismatch = File::create(&layout.mismatch_log).with_context(|| {
            format!(
                "failed to create mismatch log: {}",
                layout.mismatch_log.display()
            )
        })?;
        let error = File::create(&layout.error_log).with_context(|| {
            format!("failed to create error log: {}", layout.error_log.display())
        })?;

        Self::with_writers(
            Box::new(BufWriter::new(mismatch)),
            Box::new(BufWriter::new(error)),
        )
    }

    pub fn with_writers(mismatch: BoxedWriter, error: BoxedWriter) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let writer = std::thread::Builder::new()
            .name("querydiff-report-writer".to_string())
            .spawn(move || drain(&receiver, mismatch, error))
            .context("failed to spawn report writer thread")?;

        Ok(Self {
            handle: Some(ReportHandle { sender }),
            writer: Some(writer),
        })
    }

    #[must_use]
    pub fn handle(&self) -> Option<ReportHandle> {
        self.handle.clone()
    }

    pub fn append(&self, kind: LogKind, block: String) {
        if let Some(handle) = &self.handle {
            handle.append(kind, block);
        }
    }

    /// Waits until every queued block is written and both logs are flushed.
    /// Handles cloned from these sinks must be dropped first.
    pub fn finish(mut self) -> Result<SinkStats> {
        drop(self.handle.take());
        let writer = self
            .writer
            .take()
            .ok_or_else(|| anyhow!("report writer already finished"))?;
        writer
            .join()
            .map_err(|_| anyhow!("report writer thread panicked"))?
    }
}

impl Drop for ReportSinks {
    fn drop(&mut self) {
        drop(self.handle.take());
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

fn drain(
    receiver: &Receiver<(LogKind, String)>,
    mut mismatch: BoxedWriter,
    mut error: BoxedWriter,
) -> Result<SinkStats> {
    let mut stats = SinkStats::default();

    for (kind, block) in receiver {
        let (sink, written) = match kind {
            LogKind::Mismatch => (&mut mismatch, &mut stats.mismatch_blocks),
            LogKind::Error => (&mut error, &mut stats.error_blocks),
        };
        match sink.write_all(block.as_bytes()) {
            Ok(()) => *written += 1,
            Err(write_error) => {
                stats.failed_writes += 1;
                eprintln!(
                    "report: write_failed log={} error={write_error}",
                    kind.as_str()
                );
                eprintln!("{block}");
            }
        }
    }

    mismatch.flush().context("failed to flush mismatch log")?;
    error.flush().context("failed to flush error log")?;
    Ok(stats)
}
