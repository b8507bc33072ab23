use std::sync::{Mutex, PoisonError};

use crate::execution::ProcessOutput;
use crate::execution::output::normalize_stream;
use crate::models::{LogRecord, RunPhase};

/// Captured output of every body run, in completion order.
pub struct ExecutionLog {
    max_bytes: usize,
    records: Mutex<Vec<LogRecord>>,
}

impl ExecutionLog {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, task: &str, phase: RunPhase, output: &ProcessOutput) {
        let record = LogRecord {
            task: task.to_string(),
            phase,
            stdout: normalize_stream(&output.stdout, self.max_bytes),
            stderr: normalize_stream(&output.stderr, self.max_bytes),
        };
        self.lock_records().push(record);
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.lock_records().clone()
    }

    pub fn for_task(&self, task: &str) -> Vec<LogRecord> {
        self.lock_records()
            .iter()
            .filter(|record| record.task == task)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lock_records().clear();
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, Vec<LogRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::ExecutionLog;
    use crate::execution::{ProcessExitStatus, ProcessOutput};
    use crate::models::RunPhase;

    fn output(stdout: &[u8]) -> ProcessOutput {
        ProcessOutput {
            status: ProcessExitStatus::ExitCode(0),
            stdout: stdout.to_vec(),
            stderr: Vec::new(),
            started_at: SystemTime::now(),
            finished_at: SystemTime::now(),
        }
    }

    #[test]
    fn keeps_tail_of_long_output() {
        let log = ExecutionLog::new(4);
        log.record("a", RunPhase::Body, &output(b"0123456789"));

        let records = log.for_task("a");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stdout.as_deref(), Some("6789"));
        assert_eq!(records[0].stderr, None);
    }

    #[test]
    fn filters_by_task() {
        let log = ExecutionLog::new(64);
        log.record("a", RunPhase::Body, &output(b"one"));
        log.record("b", RunPhase::Body, &output(b"two"));
        log.record("a", RunPhase::Finally, &output(b"three"));

        let phases = log
            .for_task("a")
            .into_iter()
            .map(|record| record.phase)
            .collect::<Vec<_>>();
        assert_eq!(phases, vec![RunPhase::Body, RunPhase::Finally]);
        log.clear();
        assert!(log.records().is_empty());
    }
}
