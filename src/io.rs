//! Trace-file sink: a session header followed by one JSON record per
//! terminated process, one record per line.

use crate::model::{ProcessReport, TraceHeader};
use anyhow::{Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

/// Buffered JSONL writer for one trace session.
pub struct TraceWriter {
    writer: BufWriter<File>,
    records: u64,
}

impl TraceWriter {
    pub async fn create(path: &Path, header: &TraceHeader) -> Result<Self> {
        let file = File::create(path)
            .await
            .with_context(|| format!("create trace file {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        let line = serde_json::to_string(header)?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        Ok(Self { writer, records: 0 })
    }

    pub async fn write_report(&mut self, report: &ProcessReport) -> Result<()> {
        let line = serde_json::to_string(report)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.records += 1;
        Ok(())
    }

    pub async fn close(mut self) -> Result<u64> {
        self.writer.flush().await?;
        Ok(self.records)
    }
}

/// Sink task: drain process records from the tracer until the channel
/// closes, then flush.
pub async fn write_reports(
    path: PathBuf,
    header: TraceHeader,
    mut rx: mpsc::Receiver<ProcessReport>,
) -> Result<()> {
    let mut writer = TraceWriter::create(&path, &header).await?;

    while let Some(report) = rx.recv().await {
        debug!(
            "process {} ({}) finished: {} inputs, {} outputs",
            report.uid,
            report.image.display(),
            report.inputs.len(),
            report.outputs.len()
        );
        writer.write_report(&report).await?;
    }

    let records = writer.close().await?;
    info!("wrote {} process records to {}", records, path.display());
    Ok(())
}

/// Read a trace file back: the header line, then every process record.
pub fn read_trace(path: &Path) -> Result<(TraceHeader, Vec<ProcessReport>)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read trace file {}", path.display()))?;
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());

    let header_line = lines.next().context("trace file is empty")?;
    let header: TraceHeader = serde_json::from_str(header_line).context("parse trace header")?;

    let mut reports = Vec::new();
    for (i, line) in lines.enumerate() {
        let report: ProcessReport = serde_json::from_str(line)
            .with_context(|| format!("parse process record on line {}", i + 2))?;
        reports.push(report);
    }
    Ok((header, reports))
}
