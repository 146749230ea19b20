//! Asynchronous stream of non-fatal transport and protocol errors.
//!
//! Connection reader tasks report problems through an `ErrorReporter`;
//! a single `ErrorSink` task drains and logs them so producers never wait.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Default number of buffered reports.
pub const DEFAULT_CAPACITY: usize = 1024;

/// A single error notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Remote address of the connection involved, if any.
    pub remote: Option<String>,
    pub description: String,
}

/// Create a reporter/sink pair.
pub fn error_stream(capacity: usize) -> (ErrorReporter, ErrorSink) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ErrorReporter { tx }, ErrorSink { rx })
}

/// Producer side, cloned into every connection.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<ErrorReport>,
}

impl ErrorReporter {
    /// Queue a report without waiting. Reports are dropped if the sink
    /// is saturated or gone.
    pub fn report(&self, remote: Option<&str>, description: impl Into<String>) {
        let report = ErrorReport {
            remote: remote.map(str::to_string),
            description: description.into(),
        };
        if let Err(e) = self.tx.try_send(report) {
            trace!(error = %e, "Error report dropped");
        }
    }
}

/// Consumer side.
#[derive(Debug)]
pub struct ErrorSink {
    rx: mpsc::Receiver<ErrorReport>,
}

impl ErrorSink {
    /// Drain reports in a background task until every reporter is gone.
    ///
    /// The task resolves to the number of reports logged.
    pub fn spawn(self) -> JoinHandle<usize> {
        tokio::spawn(self.drain())
    }

    async fn drain(mut self) -> usize {
        let mut count = 0;
        while let Some(report) = self.rx.recv().await {
            count += 1;
            match report.remote {
                Some(remote) => warn!(peer = %remote, "{}", report.description),
                None => warn!("{}", report.description),
            }
        }
        count
    }

    /// Take whatever is queued right now.
    #[cfg(test)]
    pub fn try_collect(&mut self) -> Vec<ErrorReport> {
        let mut reports = Vec::new();
        while let Ok(report) = self.rx.try_recv() {
            reports.push(report);
        }
        reports
    }
}
