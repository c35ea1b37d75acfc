//! Motion executor boundary and an in-process two-axis lathe.
//!
//! The cycle only ever talks to [`MotionExecutor`]: it reads the current pose,
//! submits segments in order and waits on a barrier. [`SimulatedLathe`] is a
//! complete executor that moves X and Z with a trapezoidal velocity profile.

use std::collections::VecDeque;

use serde::Serialize;

use crate::config::LatheConfig;
use crate::error::ExecutionFault;
use crate::geometry::Pose;
use crate::planner::{Motion, MotionSegment};

pub trait MotionExecutor {
    /// Position in physical length units, never raw actuator steps.
    fn current_pose(&self) -> Pose;

    /// Whether `submit` would take this segment right now. The cycle checks
    /// every target before queueing the first one.
    fn accepts(&self, _segment: &MotionSegment) -> Result<(), ExecutionFault> {
        Ok(())
    }

    /// Enqueue one segment. Segments run strictly in submission order.
    fn submit(&mut self, segment: &MotionSegment) -> Result<(), ExecutionFault>;

    /// Block until every submitted segment has physically completed.
    fn barrier(&mut self) -> Result<(), ExecutionFault>;
}

#[derive(Serialize, Clone, Debug)]
pub struct Axis {
    pub name: char,
    pub position: f64,
    pub target: f64,
    pub velocity: f64, // current speed mm/min
    pub accel: f64,    // mm/s²
    pub min_range: f64,
    pub max_range: f64,
}

impl Axis {
    fn new(name: char, accel: f64, range: (f64, f64)) -> Self {
        Self {
            name,
            position: 0.0,
            target: 0.0,
            velocity: 0.0,
            accel,
            min_range: range.0,
            max_range: range.1,
        }
    }

    fn in_range(&self, value: f64) -> bool {
        value >= self.min_range && value <= self.max_range
    }
}

// Trapezoidal speed update along a path of `remaining` mm. Returns the
// distance to advance this tick and the new path speed (mm/min).
fn advance(remaining: f64, vel: f64, feed: f64, accel: f64, dt_sec: f64) -> (f64, f64) {
    let feed = feed.max(1.0);
    let accel = accel.max(1.0);
    let mut vel = vel.max(0.0);

    // Distance (mm) needed to stop from the current speed.
    let v_mm_s = vel / 60.0;
    let stop_dist = (v_mm_s * v_mm_s) / (2.0 * accel);

    if remaining <= stop_dist + 0.01 {
        vel = (vel - accel * 60.0 * dt_sec).max(0.0);
    } else if vel < feed {
        vel = (vel + accel * 60.0 * dt_sec).min(feed);
    } else {
        vel = feed;
    }

    let mut step = (vel / 60.0) * dt_sec;
    if step <= 0.000001 {
        // Decelerated short of the target: creep the rest of the way.
        vel = (feed * 0.02).max(1.0).min(feed);
        step = (vel / 60.0) * dt_sec;
    }
    (step.min(remaining), vel)
}

#[derive(Clone, Copy, Debug)]
struct ActiveMove {
    segment: MotionSegment,
    from: Pose,
    length: f64,
    travelled: f64,
    velocity: f64,
}

#[derive(Serialize, Clone, Debug)]
pub struct LatheState {
    pub x: Axis,
    pub z: Axis,
    pub estop: bool,
    pub busy: bool,
    pub queued: usize,
    pub feed_override: f64,
    pub completed: Vec<MotionSegment>,
}

pub struct SimulatedLathe {
    x: Axis,
    z: Axis,
    pending: VecDeque<MotionSegment>,
    active: Option<ActiveMove>,
    completed: Vec<MotionSegment>,
    rapid_feed: f64,
    feed_override: f64,
    estop: bool,
    barrier_dt_ms: f64,
    max_barrier_ticks: usize,
}

impl SimulatedLathe {
    pub fn new(config: &LatheConfig) -> Self {
        Self {
            x: Axis::new('X', config.accel, config.x_range),
            z: Axis::new('Z', config.accel, config.z_range),
            pending: VecDeque::new(),
            active: None,
            completed: Vec::new(),
            rapid_feed: config.rapid_feed,
            feed_override: 1.0,
            estop: false,
            barrier_dt_ms: config.barrier_dt_ms,
            max_barrier_ticks: config.max_barrier_ticks,
        }
    }

    pub fn configure(&mut self, config: &LatheConfig) {
        self.x.accel = config.accel;
        self.x.min_range = config.x_range.0;
        self.x.max_range = config.x_range.1;
        self.z.accel = config.accel;
        self.z.min_range = config.z_range.0;
        self.z.max_range = config.z_range.1;
        self.rapid_feed = config.rapid_feed;
        self.barrier_dt_ms = config.barrier_dt_ms;
        self.max_barrier_ticks = config.max_barrier_ticks;
    }

    /// Place the tool without motion, e.g. after a manual jog.
    pub fn set_position(&mut self, pose: Pose) {
        for (ax, v) in [(&mut self.x, pose.x), (&mut self.z, pose.z)] {
            ax.position = v;
            ax.target = v;
            ax.velocity = 0.0;
        }
    }

    pub fn set_feed_override(&mut self, ratio: f64) {
        self.feed_override = ratio.clamp(0.0, 2.0);
    }

    /// Engaging discards every unsent segment and freezes both axes where
    /// they physically are. Motion is refused until released.
    pub fn set_estop(&mut self, engaged: bool) {
        self.estop = engaged;
        if engaged {
            self.pending.clear();
            self.active = None;
            for ax in [&mut self.x, &mut self.z] {
                ax.target = ax.position;
                ax.velocity = 0.0;
            }
            console_log!("E-stop engaged, motion queue cleared");
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.pending.is_empty()
    }

    pub fn completed(&self) -> &[MotionSegment] {
        &self.completed
    }

    pub fn clear_trace(&mut self) {
        self.completed.clear();
    }

    pub fn state(&self) -> LatheState {
        LatheState {
            x: self.x.clone(),
            z: self.z.clone(),
            estop: self.estop,
            busy: !self.is_idle(),
            queued: self.pending.len(),
            feed_override: self.feed_override,
            completed: self.completed.clone(),
        }
    }

    fn activate(&mut self, segment: MotionSegment) {
        let from = self.current_pose();
        self.x.target = segment.target.x;
        self.z.target = segment.target.z;
        let dx = segment.target.x - from.x;
        let dz = segment.target.z - from.z;
        self.active = Some(ActiveMove {
            segment,
            from,
            length: (dx * dx + dz * dz).sqrt(),
            travelled: 0.0,
            velocity: 0.0,
        });
    }

    // Rapids ignore the feed override; a 0% override holds feed moves only.
    fn path_speed(&self, segment: &MotionSegment) -> f64 {
        match segment.motion {
            Motion::Rapid => self.rapid_feed,
            Motion::Feed { rate } => rate * self.feed_override,
        }
    }

    fn finish(&mut self, mv: ActiveMove) {
        for (ax, v) in [(&mut self.x, mv.segment.target.x), (&mut self.z, mv.segment.target.z)] {
            ax.position = v;
            ax.velocity = 0.0;
        }
        self.completed.push(mv.segment);
        self.active = None;
    }

    pub fn tick(&mut self, dt_ms: f64) {
        if self.estop || dt_ms <= 0.0 {
            return;
        }
        let dt_sec = dt_ms / 1000.0;

        if self.active.is_none() {
            match self.pending.pop_front() {
                Some(next) => self.activate(next),
                None => return,
            }
        }
        let Some(mut mv) = self.active else {
            return;
        };

        let speed = self.path_speed(&mv.segment);
        if speed <= 0.0 {
            self.x.velocity = 0.0;
            self.z.velocity = 0.0;
            return;
        }

        let remaining = mv.length - mv.travelled;
        if remaining <= 0.0005 {
            self.finish(mv);
            return;
        }

        let accel = self.x.accel.min(self.z.accel);
        let (step, vel) = advance(remaining, mv.velocity, speed, accel, dt_sec);
        mv.travelled += step;
        mv.velocity = vel;
        if mv.travelled >= mv.length {
            self.finish(mv);
            return;
        }

        // Both axes follow the straight line from the segment start.
        let t = mv.travelled / mv.length;
        let target = mv.segment.target;
        self.x.position = mv.from.x + (target.x - mv.from.x) * t;
        self.z.position = mv.from.z + (target.z - mv.from.z) * t;
        self.x.velocity = vel * ((target.x - mv.from.x).abs() / mv.length);
        self.z.velocity = vel * ((target.z - mv.from.z).abs() / mv.length);
        self.active = Some(mv);
    }
}

impl MotionExecutor for SimulatedLathe {
    fn current_pose(&self) -> Pose {
        Pose::new(self.x.position, self.z.position)
    }

    fn accepts(&self, segment: &MotionSegment) -> Result<(), ExecutionFault> {
        if self.estop {
            return Err(ExecutionFault::Aborted);
        }
        for (ax, v) in [(&self.x, segment.target.x), (&self.z, segment.target.z)] {
            if !ax.in_range(v) {
                return Err(ExecutionFault::OutOfRange { axis: ax.name, target: v });
            }
        }
        Ok(())
    }

    fn submit(&mut self, segment: &MotionSegment) -> Result<(), ExecutionFault> {
        self.accepts(segment)?;
        self.pending.push_back(*segment);
        Ok(())
    }

    fn barrier(&mut self) -> Result<(), ExecutionFault> {
        let mut ticks = 0usize;
        while !self.is_idle() {
            if self.estop {
                return Err(ExecutionFault::Aborted);
            }
            if ticks >= self.max_barrier_ticks {
                return Err(ExecutionFault::Stalled { ticks });
            }
            self.tick(self.barrier_dt_ms);
            ticks += 1;
        }
        if self.estop {
            return Err(ExecutionFault::Aborted);
        }
        Ok(())
    }
}
