//! Structured pipeline events.
//!
//! Stage boundaries are reported to an [`EventSink`]; [`LogSink`] forwards
//! them to the `log` facade. Outside of events, the compressor logs a single
//! `info!` summary per request.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{Result, ShrinkError, Stage};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageStarted {
        stage: Stage,
        /// Color count of the candidate being processed, if any.
        colors: Option<u32>,
    },
    StageFinished {
        stage: Stage,
        colors: Option<u32>,
        elapsed: Duration,
    },
    StageFailed {
        stage: Stage,
        colors: Option<u32>,
        error: String,
    },
}

impl PipelineEvent {
    pub fn stage(&self) -> Stage {
        match self {
            Self::StageStarted { stage, .. }
            | Self::StageFinished { stage, .. }
            | Self::StageFailed { stage, .. } => *stage,
        }
    }
}

/// Receives pipeline events. Called from worker threads during batch analysis.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: PipelineEvent) {
        (**self).emit(event);
    }
}

/// Forwards events to `log`: starts and finishes at debug, failures at warn.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::StageStarted { stage, colors } => {
                log::debug!("{stage}: start{}", colors_suffix(colors));
            }
            PipelineEvent::StageFinished {
                stage,
                colors,
                elapsed,
            } => {
                log::debug!(
                    "{stage}: done in {:.2} ms{}",
                    elapsed.as_secs_f64() * 1000.0,
                    colors_suffix(colors)
                );
            }
            PipelineEvent::StageFailed {
                stage,
                colors,
                error,
            } => {
                log::warn!("{stage}: failed{}: {error}", colors_suffix(colors));
            }
        }
    }
}

fn colors_suffix(colors: Option<u32>) -> String {
    colors.map(|c| format!(" ({c} colors)")).unwrap_or_default()
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Run `f` as `stage`, reporting start, finish and failure to `sink`.
pub(crate) fn run_stage<T>(
    sink: &dyn EventSink,
    stage: Stage,
    colors: Option<u32>,
    f: impl FnOnce() -> Result<T, ShrinkError>,
) -> Result<T> {
    sink.emit(PipelineEvent::StageStarted { stage, colors });
    let start = Instant::now();
    match f() {
        Ok(value) => {
            sink.emit(PipelineEvent::StageFinished {
                stage,
                colors,
                elapsed: start.elapsed(),
            });
            Ok(value)
        }
        Err(err) => {
            sink.emit(PipelineEvent::StageFailed {
                stage,
                colors,
                error: err.to_string(),
            });
            Err(err)
        }
    }
}
