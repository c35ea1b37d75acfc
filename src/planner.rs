//! Pass planning: turns validated parameters and geometry into the ordered
//! motion segments of one keyway cycle.
//!
//! Every pass repeats a fixed block `RepeatsPerPass` times:
//!
//! ```text
//!   SAFE   rapid  (safe X, Z0 + R)
//!   DEPTH  feed   (pass X, Z0 + R)
//!   LENGTH feed   (pass X, Z0 - L)
//!   BACKX  rapid  (safe X, Z0 - L)
//!   BACKZ  rapid  (safe X, Z0 + R)
//! ```
//!
//! SAFE and BACKZ are dropped when they would not move the tool. The bore
//! variant runs one zero-penetration pass first. Both variants close with a
//! feed to the exact final X and a rapid return.

use serde::{Deserialize, Serialize};

use crate::error::PlanError;
use crate::geometry::{Geometry, Pose, StartPose};
use crate::params::{CycleKind, CycleParameters};

// Ratios this close to a whole number are float noise, not a partial pass.
const PASS_SNAP: f64 = 1e-9;

/// Upper bound on cutting strokes (passes × repeats) in one plan.
pub const MAX_STROKES: u64 = 100_000;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum MotionClass {
    Rapid,
    Feed,
}

/// Rapid moves carry no feed rate; feed moves always do.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub enum Motion {
    Rapid,
    Feed { rate: f64 },
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub struct MotionSegment {
    pub target: Pose,
    pub motion: Motion,
}

impl MotionSegment {
    pub fn rapid(target: Pose) -> Self {
        Self { target, motion: Motion::Rapid }
    }

    pub fn feed(target: Pose, rate: f64) -> Self {
        Self { target, motion: Motion::Feed { rate } }
    }

    pub fn class(&self) -> MotionClass {
        match self.motion {
            Motion::Rapid => MotionClass::Rapid,
            Motion::Feed { .. } => MotionClass::Feed,
        }
    }

    pub fn feed_rate(&self) -> Option<f64> {
        match self.motion {
            Motion::Rapid => None,
            Motion::Feed { rate } => Some(rate),
        }
    }

    pub fn is_rapid(&self) -> bool {
        matches!(self.motion, Motion::Rapid)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum SegmentRole {
    Safe,
    Depth,
    Length,
    BackX,
    BackZ,
    Finish,
    Return,
}

impl SegmentRole {
    pub fn label(self) -> &'static str {
        match self {
            SegmentRole::Safe => "SAFE",
            SegmentRole::Depth => "DEPTH",
            SegmentRole::Length => "LENGTH",
            SegmentRole::BackX => "BACKX",
            SegmentRole::BackZ => "BACKZ",
            SegmentRole::Finish => "FINISH",
            SegmentRole::Return => "RETURN",
        }
    }
}

/// One segment tagged with where it sits in the cycle. Pass 0 is the bore
/// safety pass; repeats count from 1, and 0 marks the closing moves.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub struct PlannedSegment {
    pub pass: u32,
    pub repeat: u32,
    pub role: SegmentRole,
    pub segment: MotionSegment,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Plan {
    pub kind: CycleKind,
    pub start: StartPose,
    pub geometry: Geometry,
    pub pass_count: u32,
    pub repeats: u32,
    /// Depth actually cut, sag included.
    pub total_depth: f64,
    /// Retracted position between strokes.
    pub safe: Pose,
    pub final_x: f64,
    segments: Vec<PlannedSegment>,
}

impl Plan {
    pub fn segments(&self) -> &[PlannedSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&PlannedSegment> {
        self.segments.last()
    }

    pub fn motion(&self) -> impl Iterator<Item = &MotionSegment> + '_ {
        self.segments.iter().map(|s| &s.segment)
    }
}

/// Whole passes needed to remove `depth` at `step` per pass.
pub fn pass_count(depth: f64, step: f64) -> Result<u32, PlanError> {
    let ratio = depth / step;
    let nearest = ratio.round();
    let passes = if (ratio - nearest).abs() <= PASS_SNAP { nearest } else { ratio.ceil() };
    if !passes.is_finite() || passes > u32::MAX as f64 {
        return Err(PlanError::TooManyPasses { depth, step });
    }
    Ok(passes.max(1.0) as u32)
}

struct PlanBuilder {
    commanded: Pose,
    tolerance: f64,
    segments: Vec<PlannedSegment>,
}

impl PlanBuilder {
    fn new(start: StartPose, tolerance: f64) -> Self {
        Self { commanded: start, tolerance, segments: Vec::new() }
    }

    fn push(&mut self, pass: u32, repeat: u32, role: SegmentRole, segment: MotionSegment) {
        let redundant = matches!(role, SegmentRole::Safe | SegmentRole::BackZ)
            && segment.target.approx_eq(&self.commanded, self.tolerance);
        if redundant {
            return;
        }
        self.commanded = segment.target;
        self.segments.push(PlannedSegment { pass, repeat, role, segment });
    }

    fn stroke(&mut self, pass: u32, repeat: u32, safe: Pose, plunge_x: f64, stroke_z: f64, feed: f64) {
        self.push(pass, repeat, SegmentRole::Safe, MotionSegment::rapid(safe));
        self.push(pass, repeat, SegmentRole::Depth, MotionSegment::feed(Pose::new(plunge_x, safe.z), feed));
        self.push(pass, repeat, SegmentRole::Length, MotionSegment::feed(Pose::new(plunge_x, stroke_z), feed));
        self.push(pass, repeat, SegmentRole::BackX, MotionSegment::rapid(Pose::new(safe.x, stroke_z)));
        self.push(pass, repeat, SegmentRole::BackZ, MotionSegment::rapid(safe));
    }
}

/// Plan every segment of one cycle. Pure: identical inputs give an identical plan.
pub fn plan(
    params: &CycleParameters,
    start: StartPose,
    geometry: &Geometry,
    tolerance: f64,
) -> Result<Plan, PlanError> {
    // Straight slots are cut from outside toward the axis, bore slots from
    // inside outward into the wall.
    let (safe_x, total_depth, direction, final_x) = match geometry {
        Geometry::Plain => (start.x, params.depth, -1.0, start.x - params.depth),
        Geometry::BoreCorrected(c) => (c.corrected_start_x, c.corrected_depth, 1.0, c.final_x),
    };
    let safe = Pose::new(safe_x, start.z + params.retract);
    let stroke_z = start.z - params.length;
    let feed = params.feed_rate;
    let passes = pass_count(total_depth, params.step)?;

    let safety = u64::from(geometry.bore().is_some());
    let strokes = (u64::from(passes) + safety) * u64::from(params.repeats);
    if strokes > MAX_STROKES {
        return Err(PlanError::TooManyStrokes { strokes, limit: MAX_STROKES });
    }

    let mut b = PlanBuilder::new(start, tolerance);

    if geometry.bore().is_some() {
        for rep in 1..=params.repeats {
            b.stroke(0, rep, safe, safe_x, stroke_z, feed);
        }
    }

    for pass in 1..=passes {
        let reach = pass as f64 * params.step;
        let plunge_x = if reach >= total_depth { final_x } else { safe_x + direction * reach };
        for rep in 1..=params.repeats {
            b.stroke(pass, rep, safe, plunge_x, stroke_z, feed);
        }
    }

    // Land on the exact final depth whatever the step rounding did.
    b.push(passes, 0, SegmentRole::Finish, MotionSegment::feed(Pose::new(final_x, safe.z), feed));

    let home = if params.return_home { start } else { safe };
    b.push(passes, 0, SegmentRole::Return, MotionSegment::rapid(home));

    Ok(Plan {
        kind: params.kind,
        start,
        geometry: *geometry,
        pass_count: passes,
        repeats: params.repeats,
        total_depth,
        safe,
        final_x,
        segments: b.segments,
    })
}
