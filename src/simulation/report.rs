use chrono::{Local, SecondsFormat};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

use crate::simulation::vehicle::VehicleId;

/// I/O failure on a vehicle's report stream. Fatal to the owning vehicle
/// task only; other vehicles and the dispatcher are unaffected.
#[derive(Debug, Error)]
#[error("failed to write status report: {0}")]
pub struct ReportSinkError(#[from] std::io::Error);

/// Append-only per-vehicle text stream for status reports and travel events.
pub trait ReportSink: Send {
    fn write_line(&mut self, line: &str) -> Result<(), ReportSinkError>;
    fn flush(&mut self) -> Result<(), ReportSinkError>;
}

/// Writes reports to `<dir>/vehicle_<id>.txt`, flushing per line so the file
/// can be tailed while the simulation runs.
pub struct FileReportSink {
    writer: BufWriter<File>,
}

impl FileReportSink {
    pub fn create(dir: &Path, id: VehicleId) -> Result<Self, ReportSinkError> {
        fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("vehicle_{id}.txt")))?;
        Ok(FileReportSink {
            writer: BufWriter::new(file),
        })
    }
}

impl ReportSink for FileReportSink {
    fn write_line(&mut self, line: &str) -> Result<(), ReportSinkError> {
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ReportSinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Collects report lines in memory. Used by tests and embedders that want to
/// inspect vehicle output without touching the filesystem.
#[cfg(any(test, feature = "test_util"))]
#[derive(Clone, Default)]
pub struct MemoryReportSink {
    lines: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

#[cfg(any(test, feature = "test_util"))]
impl MemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("report sink lock poisoned").clone()
    }
}

#[cfg(any(test, feature = "test_util"))]
impl ReportSink for MemoryReportSink {
    fn write_line(&mut self, line: &str) -> Result<(), ReportSinkError> {
        self.lines
            .lock()
            .expect("report sink lock poisoned")
            .push(line.to_string());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ReportSinkError> {
        Ok(())
    }
}

/// Local wall-clock timestamp carried on every report line.
pub fn timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
