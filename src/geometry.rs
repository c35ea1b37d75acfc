//! Start pose and bore sag correction.
//!
//! A tool of finite width S sitting inside a bore of radius R touches the wall
//! with its corners, so its cutting edge lies `sag = R - sqrt(R² - (S/2)²)`
//! inside the true radius. The bore cycle starts that much further in and cuts
//! that much deeper, so the finished keyway floor lands at the requested depth.

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;
use crate::params::{CycleKind, CycleParameters};

/// Machine position in physical length units (mm), X as radius.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug, Default)]
pub struct Pose {
    pub x: f64,
    pub z: f64,
}

impl Pose {
    pub fn new(x: f64, z: f64) -> Self {
        Self { x, z }
    }

    pub fn approx_eq(&self, other: &Pose, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance && (self.z - other.z).abs() <= tolerance
    }
}

/// Pose captured once at cycle entry, after the entry barrier.
pub type StartPose = Pose;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub struct BoreCorrection {
    pub bore_radius: f64,
    pub half_tool_width: f64,
    pub center_distance: f64,
    pub sag: f64,
    pub corrected_start_x: f64,
    pub corrected_depth: f64,
    pub final_x: f64,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub enum Geometry {
    Plain,
    BoreCorrected(BoreCorrection),
}

impl Geometry {
    pub fn bore(&self) -> Option<&BoreCorrection> {
        match self {
            Geometry::Plain => None,
            Geometry::BoreCorrected(c) => Some(c),
        }
    }
}

/// Sag correction for a bore of `bore_radius` cut by a tool `tool_width` wide.
pub fn bore_correction(bore_radius: f64, tool_width: f64, depth: f64) -> Result<BoreCorrection, GeometryError> {
    let half_tool_width = tool_width * 0.5;
    if half_tool_width > bore_radius {
        return Err(GeometryError::SlotWiderThanBore { half_width: half_tool_width, bore_radius });
    }

    let center_distance = (bore_radius * bore_radius - half_tool_width * half_tool_width).sqrt();
    let sag = bore_radius - center_distance;
    let corrected_start_x = bore_radius - sag;
    let corrected_depth = depth + sag;

    Ok(BoreCorrection {
        bore_radius,
        half_tool_width,
        center_distance,
        sag,
        corrected_start_x,
        corrected_depth,
        final_x: corrected_start_x + corrected_depth,
    })
}

/// Geometry for one invocation. Only the bore variant is corrected; the bore
/// radius is the X coordinate at cycle start.
pub fn correct(params: &CycleParameters, start: StartPose) -> Result<Geometry, GeometryError> {
    match (params.kind, params.tool_width) {
        (CycleKind::Bore, Some(width)) => Ok(Geometry::BoreCorrected(bore_correction(start.x, width, params.depth)?)),
        _ => Ok(Geometry::Plain),
    }
}
