//! Iteration notifications.
//!
//! Both optimisation stages report progress through the same
//! [`IterationObserver::on_iteration`] call, once per generation (global) or
//! accepted iterate (local). The history store is the main observer; tests use
//! [`RecordingObserver`].

use ndarray::Array1;

use crate::curve::SimulatedCurve;
use crate::error::Result;
use crate::objective::Stage;

/// Progress of one optimiser step.
#[derive(Debug, Clone, Copy)]
pub struct IterationEvent<'a> {
    pub stage: Stage,

    /// Generation or iteration index, starting at zero
    pub index: usize,

    /// Best error known after this step
    pub error: f64,

    /// Parameters that produced `error`, in linear units
    pub params: &'a Array1<f64>,

    /// Curve simulated at `params`, if the evaluation produced one
    pub curve: Option<&'a SimulatedCurve>,
}

/// Receives one notification per optimiser step.
pub trait IterationObserver {
    /// Handle a step. An `Err` stops the optimiser and is returned to its caller.
    fn on_iteration(&mut self, event: &IterationEvent<'_>) -> Result<()>;
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl IterationObserver for NoopObserver {
    fn on_iteration(&mut self, _event: &IterationEvent<'_>) -> Result<()> {
        Ok(())
    }
}

/// An owned copy of an [`IterationEvent`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedIteration {
    pub stage: Stage,
    pub index: usize,
    pub error: f64,
    pub params: Array1<f64>,
    pub curve: Option<SimulatedCurve>,
}

/// Observer keeping every event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    pub events: Vec<RecordedIteration>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors in notification order.
    pub fn errors(&self) -> Vec<f64> {
        self.events.iter().map(|e| e.error).collect()
    }
}

impl IterationObserver for RecordingObserver {
    fn on_iteration(&mut self, event: &IterationEvent<'_>) -> Result<()> {
        self.events.push(RecordedIteration {
            stage: event.stage,
            index: event.index,
            error: event.error,
            params: event.params.clone(),
            curve: event.curve.cloned(),
        });
        Ok(())
    }
}

/// Forwards events with parameters mapped from log10 to linear units.
///
/// The local stage searches in log10 space; wrapping the history store in this
/// adapter keeps every recorded parameter row linear.
#[derive(Debug)]
pub struct LogToLinear<W> {
    inner: W,
}

impl<W: IterationObserver> LogToLinear<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: IterationObserver> IterationObserver for LogToLinear<W> {
    fn on_iteration(&mut self, event: &IterationEvent<'_>) -> Result<()> {
        let linear = event.params.mapv(|v| 10f64.powf(v));
        self.inner.on_iteration(&IterationEvent {
            params: &linear,
            ..*event
        })
    }
}

impl<T: IterationObserver + ?Sized> IterationObserver for &mut T {
    fn on_iteration(&mut self, event: &IterationEvent<'_>) -> Result<()> {
        (**self).on_iteration(event)
    }
}
