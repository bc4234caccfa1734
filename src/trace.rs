use std::sync::Mutex;

use tracing::{info, warn};

use crate::types::StepRecord;

/// Receives every step record the loop appends, in order.
pub trait TraceSink: Send + Sync {
    fn record_step(&self, record: &StepRecord);
}

/// Writes step records to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn record_step(&self, record: &StepRecord) {
        match &record.error {
            None => info!(
                step = record.step,
                action = %record.action,
                "{}",
                record.result
            ),
            Some(err) => warn!(
                step = record.step,
                action = %record.action,
                error = %err,
                "{}",
                record.result
            ),
        }
    }
}

/// Keeps a copy of every record.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<StepRecord>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<StepRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl TraceSink for MemorySink {
    fn record_step(&self, record: &StepRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

/// Fans one record out to several sinks.
impl<A: TraceSink, B: TraceSink> TraceSink for (A, B) {
    fn record_step(&self, record: &StepRecord) {
        self.0.record_step(record);
        self.1.record_step(record);
    }
}
