//! Error taxonomy for the keyway cycle.
//!
//! Validation and geometry errors are raised before any motion is planned.
//! Execution faults come from the motion executor and are propagated as-is.

use serde::Serialize;
use thiserror::Error;

/// Cycle parameter a [`ValidationError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Field {
    Depth,
    Length,
    ToolWidth,
    StepPerPass,
    RetractDistance,
    FeedRate,
    Repeats,
    ReturnHome,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Field::Depth => "final depth",
            Field::Length => "keyway length",
            Field::ToolWidth => "tool width",
            Field::StepPerPass => "step per pass",
            Field::RetractDistance => "retract distance",
            Field::FeedRate => "feed rate",
            Field::Repeats => "repeats per pass",
            Field::ReturnHome => "return home",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
pub enum Reason {
    #[error("word is missing")]
    Missing,
    #[error("value is not a finite number")]
    NotFinite,
    #[error("must be positive")]
    NotPositive,
    #[error("must not exceed the final depth")]
    ExceedsDepth,
    #[error("must be at least 1")]
    BelowOne,
    #[error("must be a whole number")]
    NotWhole,
    #[error("must be 0 or 1")]
    NotBoolean,
    #[error("exceeds the supported maximum")]
    TooLarge,
}

/// First parameter constraint violated by an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[error("invalid {word} ({field}): {reason}")]
pub struct ValidationError {
    pub field: Field,
    pub word: char,
    pub reason: Reason,
}

#[derive(Debug, Clone, Copy, PartialEq, Error, Serialize)]
pub enum GeometryError {
    #[error("slot width exceeds bore diameter (half width {half_width:.3} > bore radius {bore_radius:.3})")]
    SlotWiderThanBore { half_width: f64, bore_radius: f64 },
}

/// Plans the controller refuses to build.
#[derive(Debug, Clone, Copy, PartialEq, Error, Serialize)]
pub enum PlanError {
    #[error("depth {depth:.3} at step {step:.3} needs more passes than can be counted")]
    TooManyPasses { depth: f64, step: f64 },
    #[error("{strokes} strokes exceed the limit of {limit}")]
    TooManyStrokes { strokes: u64, limit: u64 },
}

/// Failure reported by a motion executor. The cycle never retries.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum ExecutionFault {
    #[error("motion aborted by emergency stop")]
    Aborted,
    #[error("motion queue did not drain after {ticks} ticks")]
    Stalled { ticks: usize },
    #[error("{axis} target {target:.3} is outside the travel range")]
    OutOfRange { axis: char, target: f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CycleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("motion fault: {0}")]
    Execution(#[from] ExecutionFault),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("no handler registered for M{0}")]
    Unsupported(u32),
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("straight and bore cycles cannot share code M{0}")]
    CodeCollision(u32),
    #[error("tolerance must be a positive finite number, got {0}")]
    BadTolerance(f64),
}
