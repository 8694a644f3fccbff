//! Progress reporting for analysis runs

use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info};

use super::Stage;
use crate::models::ProgressEvent;

/// Receiver of progress events.
///
/// Implemented for closures and for `crossbeam_channel::Sender`, so a caller
/// can either handle events inline or drain them on another thread.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}

impl ProgressSink for Sender<ProgressEvent> {
    fn report(&self, event: ProgressEvent) {
        // a dropped receiver only means nobody is listening
        if self.send(event).is_err() {
            debug!("Progress receiver dropped");
        }
    }
}

/// Emits stage checkpoints, never letting the percentage go backwards.
pub struct ProgressReporter<'a> {
    sink: Option<&'a dyn ProgressSink>,
    last_percent: AtomicU8,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: Option<&'a dyn ProgressSink>) -> Self {
        Self {
            sink,
            last_percent: AtomicU8::new(0),
        }
    }

    /// Announce entry into `stage`.
    pub fn stage(&self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        let percent = self
            .last_percent
            .fetch_max(stage.percent(), Ordering::SeqCst)
            .max(stage.percent());
        info!("[{:>3}%] {}: {}", percent, stage, message);
        if let Some(sink) = self.sink {
            sink.report(ProgressEvent {
                stage: stage.to_string(),
                percent,
                message,
            });
        }
    }

    pub fn last_percent(&self) -> u8 {
        self.last_percent.load(Ordering::SeqCst)
    }
}
