//! One cycle invocation, start to finish.
//!
//! ```text
//! barrier → sample start pose → correct → plan → submit all → barrier
//! ```
//!
//! Nothing is submitted until the whole plan exists and the executor has
//! accepted every target, so a rejected cycle leaves the machine exactly where
//! it was.

use serde::Serialize;

use crate::diagnostics::Reporter;
use crate::error::CycleError;
use crate::executor::MotionExecutor;
use crate::geometry::{Pose, StartPose, correct};
use crate::params::{CycleKind, CycleParameters};
use crate::planner::{Plan, plan};

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub code: u32,
    pub kind: CycleKind,
    pub start: StartPose,
    pub pass_count: u32,
    pub segments: usize,
    pub final_x: f64,
    pub end_pose: Pose,
}

/// Correct and plan without touching the machine.
pub fn prepare(params: &CycleParameters, start: StartPose, tolerance: f64) -> Result<Plan, CycleError> {
    let geometry = correct(params, start)?;
    Ok(plan(params, start, &geometry, tolerance)?)
}

/// Run one validated cycle on `executor`. Errors are returned, not reported;
/// the caller owns the single error line on the diagnostics stream.
pub fn run_cycle<E: MotionExecutor + ?Sized>(
    code: u32,
    params: &CycleParameters,
    executor: &mut E,
    reporter: &mut Reporter<'_>,
    tolerance: f64,
) -> Result<CycleReport, CycleError> {
    // The start pose is only trustworthy once nothing is moving.
    executor.barrier()?;
    let start = executor.current_pose();

    let plan = prepare(params, start, tolerance)?;
    for segment in plan.motion() {
        executor.accepts(segment)?;
    }

    reporter.start();
    reporter.geometry(params, &plan);
    for planned in plan.segments() {
        reporter.segment(planned);
        executor.submit(&planned.segment)?;
    }

    executor.barrier()?;
    reporter.end();

    Ok(CycleReport {
        code,
        kind: params.kind,
        start,
        pass_count: plan.pass_count,
        segments: plan.len(),
        final_x: plan.final_x,
        end_pose: executor.current_pose(),
    })
}
