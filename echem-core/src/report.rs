use crate::dispatch::DispatchOutcome;
use csv::Writer;
use serde::Serialize;
use std::fs;
use std::io;

#[derive(Debug, Serialize)]
struct ReportEntry<'a> {
    file: &'a str,
    matcher: &'a str,
    variant: String,
    archive: String,
    status: &'static str,
    message: &'a str,
}

/// CSV log of an ingest run, one row per processed file.
pub struct IngestReport<W: io::Write> {
    writer: Writer<W>,
    rows: usize,
}

impl IngestReport<fs::File> {
    pub fn new(path: &str) -> Result<Self, io::Error> {
        let writer = Writer::from_path(path)?;
        Ok(Self { writer, rows: 0 })
    }
}

impl<W: io::Write> IngestReport<W> {
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: Writer::from_writer(writer),
            rows: 0,
        }
    }

    pub fn log_outcome(&mut self, outcome: &DispatchOutcome) -> Result<(), anyhow::Error> {
        let entry = ReportEntry {
            file: &outcome.file,
            matcher: outcome.matcher.unwrap_or(""),
            variant: outcome.variants.join(";"),
            archive: outcome.archives.join(";"),
            status: outcome.status.as_str(),
            message: outcome.message.as_deref().unwrap_or(""),
        };
        self.writer.serialize(entry)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> Result<W, anyhow::Error> {
        self.writer.into_inner().map_err(|e| anyhow::anyhow!(e.to_string()))
    }
}
