use serde::Serialize;
use std::fmt::Display;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl ImportReport {
    pub fn record_success(&mut self) {
        self.total += 1;
        self.successful += 1;
    }

    /// `line` is the display row index (header is row 1).
    pub fn record_failure(&mut self, line: usize, cause: impl Display) {
        self.total += 1;
        self.failed += 1;
        self.errors.push(format!("Row {}: {}", line, cause));
    }
}
