use crate::application::scheduler::OwnerSummary;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct SummaryRow {
    owner: String,
    held: String,
    delivered: String,
    settled: String,
    cycles: u32,
    state: String,
}

impl From<OwnerSummary> for SummaryRow {
    fn from(summary: OwnerSummary) -> Self {
        Self {
            owner: summary.owner.to_string(),
            held: summary.held.normalize().to_string(),
            delivered: summary.delivered.normalize().to_string(),
            settled: summary.settled.normalize().to_string(),
            cycles: summary.cycles,
            state: summary.state.to_string(),
        }
    }
}

/// Writes one CSV row per owner.
pub struct SummaryWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> SummaryWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_summaries(&mut self, summaries: Vec<OwnerSummary>) -> Result<()> {
        for summary in summaries {
            self.writer.serialize(SummaryRow::from(summary))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
