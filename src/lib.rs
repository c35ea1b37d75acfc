use std::collections::BTreeMap;

use serde::Serialize;
use wasm_bindgen::prelude::*;

// --- LOGGING ---
#[cfg(target_arch = "wasm32")]
pub(crate) fn log(s: &str) {
    web_sys::console::log_1(&JsValue::from_str(s));
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn log(_s: &str) {}

macro_rules! console_log {
    ($($t:tt)*) => ($crate::log(&format!($($t)*)))
}

pub mod config;
pub mod cycle;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod geometry;
pub mod params;
pub mod planner;

pub use config::{CycleConfig, LatheConfig, Verbosity};
pub use cycle::CycleReport;
pub use diagnostics::{DiagnosticsSink, StreamSink};
pub use dispatch::{CommandHandler, Dispatcher, KeywayCycle, MachineContext};
pub use error::{ConfigError, CycleError, DispatchError, ExecutionFault, GeometryError, PlanError, ValidationError};
pub use executor::{LatheState, MotionExecutor, SimulatedLathe};
pub use geometry::{Pose, StartPose};
pub use params::{CycleKind, CycleParameters, ParserBlock};
pub use planner::{MotionSegment, Plan};

/// Snapshot handed to the host by `get_full_state`.
#[derive(Serialize, Clone, Debug)]
pub struct ControllerState {
    pub lathe: LatheState,
    pub config: CycleConfig,
    pub feed_rate: f64,
    pub last_report: Option<CycleReport>,
}

/// Host-facing lathe controller: one simulated lathe plus the registry of
/// keyway cycles that drive it.
#[wasm_bindgen]
pub struct KeywayController {
    lathe: SimulatedLathe,
    dispatcher: Dispatcher,
    config: CycleConfig,
    feed_rate: f64,
    stream: StreamSink,
    last_report: Option<CycleReport>,
}

#[wasm_bindgen]
impl KeywayController {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        let config = CycleConfig::default();
        console_log!("KeywayController: M{}/M{} ready", config.straight_code, config.bore_code);
        Self {
            lathe: SimulatedLathe::new(&LatheConfig::default()),
            dispatcher: Dispatcher::with_keyway_cycles(&config),
            config,
            feed_rate: 0.0,
            stream: StreamSink::new(true),
            last_report: None,
        }
    }

    /// Replace the cycle configuration. Returns false if `config` does not
    /// deserialize or is inconsistent, leaving the previous one in place.
    pub fn configure(&mut self, config: JsValue) -> bool {
        let applied = serde_wasm_bindgen::from_value::<CycleConfig>(config)
            .map_err(|e| e.to_string())
            .and_then(|cfg| self.apply_config(cfg).map_err(|e| e.to_string()));
        match applied {
            Ok(()) => true,
            Err(e) => {
                console_log!("configure: {}", e);
                false
            }
        }
    }

    pub fn configure_lathe(&mut self, config: JsValue) -> bool {
        match serde_wasm_bindgen::from_value::<LatheConfig>(config) {
            Ok(cfg) => {
                self.apply_lathe_config(&cfg);
                true
            }
            Err(e) => {
                console_log!("configure_lathe: {}", e);
                false
            }
        }
    }

    /// Modal feed rate (mm/min) used by cycles without an F word.
    pub fn set_feed_rate(&mut self, feed: f64) {
        self.feed_rate = feed;
    }

    pub fn set_feed_override(&mut self, ratio: f64) {
        self.lathe.set_feed_override(ratio);
    }

    pub fn set_position(&mut self, x: f64, z: f64) {
        self.lathe.set_position(Pose::new(x, z));
    }

    pub fn set_estop(&mut self, engaged: bool) {
        self.lathe.set_estop(engaged);
    }

    pub fn tick(&mut self, dt_ms: f64) {
        self.lathe.tick(dt_ms);
    }

    /// Run one cycle block. `words` is an object of address letter to value,
    /// e.g. `{ D: 2, L: 10, P: 0.5, R: 2 }`.
    pub fn execute(&mut self, code: u32, words: JsValue) -> bool {
        match block_words(words) {
            Some(words) => self.run_command(code, words).is_ok(),
            None => {
                self.stream.emit(&format!("M{}: words must be an object of letter to number", code));
                false
            }
        }
    }

    /// Plan a block against the current position without moving.
    pub fn preview(&self, code: u32, words: JsValue) -> JsValue {
        let Some(words) = block_words(words) else {
            return JsValue::NULL;
        };
        match self.plan_command(code, words) {
            Ok(plan) => serde_wasm_bindgen::to_value(&plan).unwrap_or(JsValue::NULL),
            Err(e) => {
                console_log!("preview M{}: {}", code, e);
                JsValue::NULL
            }
        }
    }

    /// Drain the diagnostics stream.
    pub fn take_messages(&mut self) -> JsValue {
        serde_wasm_bindgen::to_value(&self.stream.take()).unwrap_or(JsValue::NULL)
    }

    pub fn get_full_state(&self) -> JsValue {
        serde_wasm_bindgen::to_value(&self.state()).unwrap_or(JsValue::NULL)
    }
}

// Letters outside A-Z are dropped; the host cannot send anything else on a
// block.
fn block_words(words: JsValue) -> Option<BTreeMap<char, f64>> {
    let raw: BTreeMap<String, f64> = serde_wasm_bindgen::from_value(words).ok()?;
    Some(
        raw.into_iter()
            .filter_map(|(k, v)| {
                let mut chars = k.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_alphabetic() => Some((c, v)),
                    _ => None,
                }
            })
            .collect(),
    )
}

impl Default for KeywayController {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywayController {
    pub fn apply_config(&mut self, config: CycleConfig) -> Result<(), ConfigError> {
        config.check()?;
        self.dispatcher = Dispatcher::with_keyway_cycles(&config);
        self.config = config;
        Ok(())
    }

    pub fn apply_lathe_config(&mut self, config: &LatheConfig) {
        self.lathe.configure(config);
    }

    pub fn state(&self) -> ControllerState {
        ControllerState {
            lathe: self.lathe.state(),
            config: self.config.clone(),
            feed_rate: self.feed_rate,
            last_report: self.last_report.clone(),
        }
    }

    /// Dispatch one block and wait for its motion to finish.
    pub fn run_command(&mut self, code: u32, words: BTreeMap<char, f64>) -> Result<CycleReport, DispatchError> {
        let mut block = ParserBlock::new(code);
        for (letter, value) in words {
            block.set(letter, value);
        }

        self.lathe.clear_trace();
        let mut ctx = MachineContext {
            executor: &mut self.lathe,
            diagnostics: &mut self.stream,
            modal_feed: self.feed_rate,
            config: &self.config,
        };
        let result = self.dispatcher.dispatch(&mut block, &mut ctx);
        match &result {
            Ok(report) => self.last_report = Some(report.clone()),
            Err(DispatchError::Unsupported(code)) => {
                self.stream.emit(&format!("M{}: unsupported command", code));
            }
            Err(DispatchError::Cycle(_)) => {}
        }
        result
    }

    pub fn plan_command(&self, code: u32, words: BTreeMap<char, f64>) -> Result<Plan, DispatchError> {
        let mut block = ParserBlock::new(code);
        for (letter, value) in words {
            block.set(letter, value);
        }
        self.dispatcher.preview(&block, self.lathe.current_pose(), self.feed_rate, &self.config)
    }

    pub fn lathe(&self) -> &SimulatedLathe {
        &self.lathe
    }

    pub fn messages(&self) -> &[String] {
        self.stream.lines()
    }

    pub fn take_lines(&mut self) -> Vec<String> {
        self.stream.take()
    }

    pub fn last_report(&self) -> Option<&CycleReport> {
        self.last_report.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Motion;

    fn approx_eq(a: f64, b: f64) {
        assert!(
            (a - b).abs() <= 1e-6,
            "expected {:.6}, got {:.6} (|diff|={:.6})",
            b,
            a,
            (a - b).abs()
        );
    }

    fn words(pairs: &[(char, f64)]) -> BTreeMap<char, f64> {
        pairs.iter().copied().collect()
    }

    fn controller_at(x: f64, z: f64) -> KeywayController {
        let mut c = KeywayController::new();
        c.set_position(x, z);
        c.set_feed_rate(600.0);
        c
    }

    #[test]
    fn straight_cycle_cuts_to_depth_and_returns_home() {
        let mut c = controller_at(20.0, 5.0);
        let report = c
            .run_command(800, words(&[('D', 1.0), ('L', 4.0), ('P', 0.5), ('R', 1.0)]))
            .expect("cycle runs");

        assert_eq!(report.pass_count, 2);
        approx_eq(report.final_x, 19.0);
        approx_eq(report.end_pose.x, 20.0);
        approx_eq(report.end_pose.z, 5.0);

        let trace = c.lathe().completed();
        assert_eq!(trace.len(), report.segments);
        let deepest = trace.iter().map(|s| s.target.x).fold(f64::INFINITY, f64::min);
        approx_eq(deepest, 19.0);
        let stroke_end = trace.iter().map(|s| s.target.z).fold(f64::INFINITY, f64::min);
        approx_eq(stroke_end, 1.0);
        assert!(trace.iter().all(|s| match s.motion {
            Motion::Feed { rate } => rate == 600.0,
            Motion::Rapid => true,
        }));

        assert_eq!(c.take_lines(), vec!["M800 CYCLE START", "M800 CYCLE END"]);
        assert!(c.messages().is_empty());

        let state = c.state();
        assert!(!state.lathe.busy);
        assert_eq!(state.last_report, Some(report));
    }

    #[test]
    fn bore_cycle_starts_inboard_and_plunges_outward() {
        let mut c = controller_at(10.0, 0.0);
        let report = c
            .run_command(801, words(&[('D', 2.0), ('Q', 10.0), ('S', 2.0), ('P', 1.0), ('R', 2.0), ('F', 1000.0)]))
            .expect("cycle runs");

        // The sag is absorbed by starting inboard of the bore wall, so the
        // slot bottom still lands at X0 + D.
        let sag = 10.0 - (100.0f64 - 1.0).sqrt();
        approx_eq(report.final_x, 12.0);
        let first = c.lathe().completed()[0].target;
        approx_eq(first.x, 10.0 - sag);
        let deepest = c.lathe().completed().iter().map(|s| s.target.x).fold(f64::NEG_INFINITY, f64::max);
        approx_eq(deepest, report.final_x);
        approx_eq(c.lathe().current_pose().x, 10.0);
    }

    #[test]
    fn bore_without_return_home_stops_at_final_x() {
        let mut c = controller_at(10.0, 0.0);
        let report = c
            .run_command(801, words(&[('D', 2.0), ('Q', 5.0), ('S', 2.0), ('P', 1.0), ('R', 1.0), ('H', 0.0)]))
            .expect("cycle runs");
        let sag = 10.0 - (100.0f64 - 1.0).sqrt();
        approx_eq(report.final_x, 12.0);
        // Parked at the retracted position on the corrected start diameter.
        approx_eq(report.end_pose.x, 10.0 - sag);
        approx_eq(report.end_pose.z, 1.0);
    }

    #[test]
    fn slot_wider_than_bore_reports_once_and_never_moves() {
        let mut c = controller_at(0.5, 0.0);
        let err = c
            .run_command(801, words(&[('D', 1.0), ('Q', 5.0), ('S', 2.0), ('P', 0.5), ('R', 1.0)]))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Cycle(CycleError::Geometry(_))));
        assert!(c.lathe().completed().is_empty());
        assert_eq!(c.lathe().current_pose(), Pose::new(0.5, 0.0));

        let lines = c.take_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("M801: slot width exceeds bore diameter"));
        assert!(c.last_report().is_none());
    }

    #[test]
    fn missing_feed_is_a_validation_error() {
        let mut c = KeywayController::new();
        c.set_position(10.0, 0.0);
        let err = c
            .run_command(800, words(&[('D', 1.0), ('L', 4.0), ('P', 0.5), ('R', 1.0)]))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Cycle(CycleError::Validation(_))));
        assert_eq!(c.take_lines(), vec!["M800: invalid F (feed rate): must be positive"]);
        assert!(c.lathe().completed().is_empty());
    }

    #[test]
    fn unsupported_code_is_reported() {
        let mut c = controller_at(10.0, 0.0);
        let err = c.run_command(3, words(&[('S', 1000.0)])).unwrap_err();
        assert_eq!(err, DispatchError::Unsupported(3));
        assert_eq!(c.take_lines(), vec!["M3: unsupported command"]);
    }

    #[test]
    fn verbose_stream_lists_geometry_and_segments() {
        let mut c = controller_at(10.0, 0.0);
        c.apply_config(CycleConfig { verbosity: Verbosity::Verbose, ..CycleConfig::default() })
            .expect("valid config");
        let report = c
            .run_command(800, words(&[('D', 1.0), ('L', 4.0), ('P', 1.0), ('R', 1.0)]))
            .expect("cycle runs");
        let lines = c.take_lines();
        assert_eq!(lines.first().map(String::as_str), Some("M800 CYCLE START"));
        assert_eq!(lines.last().map(String::as_str), Some("M800 CYCLE END"));
        assert!(lines.iter().any(|l| l.starts_with("M800 GEOMETRY:")));
        assert!(lines.iter().any(|l| l == "M800 PASSES=1 REPEATS=1"));
        assert!(lines.iter().any(|l| l.starts_with("M800 RETURN:")));
        // start, geometry, passes, one line per segment, end
        assert_eq!(lines.len(), 4 + report.segments);
    }

    #[test]
    fn reconfigured_codes_replace_the_defaults() {
        let mut c = controller_at(10.0, 0.0);
        c.apply_config(CycleConfig { straight_code: 850, ..CycleConfig::default() })
            .expect("valid config");
        let block = words(&[('D', 1.0), ('L', 4.0), ('P', 0.5), ('R', 1.0)]);
        assert!(c.run_command(850, block.clone()).is_ok());
        assert_eq!(c.run_command(800, block).unwrap_err(), DispatchError::Unsupported(800));
    }

    #[test]
    fn estop_aborts_the_cycle_with_one_message() {
        let mut c = controller_at(10.0, 0.0);
        c.set_estop(true);
        let err = c
            .run_command(800, words(&[('D', 1.0), ('L', 4.0), ('P', 0.5), ('R', 1.0)]))
            .unwrap_err();
        assert_eq!(err, DispatchError::Cycle(CycleError::Execution(ExecutionFault::Aborted)));
        // The entry barrier already refuses, so no START marker is printed.
        assert_eq!(c.take_lines(), vec!["M800: motion fault: motion aborted by emergency stop"]);
        assert_eq!(c.lathe().current_pose(), Pose::new(10.0, 0.0));
    }

    #[test]
    fn preview_matches_the_executed_path() {
        let mut c = controller_at(15.0, 2.0);
        let block = words(&[('D', 1.5), ('L', 6.0), ('P', 0.5), ('R', 1.0), ('N', 2.0)]);
        let plan = c.plan_command(800, block.clone()).expect("plans");
        assert_eq!(c.lathe().completed().len(), 0);

        c.run_command(800, block).expect("cycle runs");
        let planned: Vec<MotionSegment> = plan.motion().copied().collect();
        assert_eq!(c.lathe().completed(), planned.as_slice());
    }

    #[test]
    fn out_of_range_stroke_leaves_the_machine_untouched() {
        let mut c = controller_at(10.0, 0.0);
        c.apply_lathe_config(&LatheConfig { z_range: (-2.0, 100.0), ..LatheConfig::default() });
        let err = c
            .run_command(800, words(&[('D', 1.0), ('L', 4.0), ('P', 0.5), ('R', 1.0)]))
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Cycle(CycleError::Execution(ExecutionFault::OutOfRange { axis: 'Z', target: -4.0 }))
        );

        let state = c.state();
        assert_eq!(state.lathe.queued, 0);
        assert!(!state.lathe.busy);
        // Nothing left over for the host's tick loop to run.
        for _ in 0..2_000 {
            c.tick(5.0);
        }
        assert_eq!(c.lathe().current_pose(), Pose::new(10.0, 0.0));
        assert!(c.lathe().completed().is_empty());
        assert_eq!(c.take_lines(), vec!["M800: motion fault: Z target -4.000 is outside the travel range"]);
    }

    #[test]
    fn oversized_pass_count_is_refused_without_motion() {
        let mut c = controller_at(10.0, 0.0);
        let err = c
            .run_command(800, words(&[('D', 5.0), ('L', 4.0), ('P', 1e-5), ('R', 1.0)]))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Cycle(CycleError::Plan(PlanError::TooManyStrokes { .. }))));
        assert!(c.lathe().completed().is_empty());
        assert_eq!(c.take_lines().len(), 1);
    }

    #[test]
    fn colliding_codes_are_rejected_and_previous_config_kept() {
        let mut c = controller_at(10.0, 0.0);
        let err = c
            .apply_config(CycleConfig { straight_code: 801, ..CycleConfig::default() })
            .unwrap_err();
        assert_eq!(err, ConfigError::CodeCollision(801));
        assert_eq!(c.state().config, CycleConfig::default());

        let err = c
            .apply_config(CycleConfig { tolerance: f64::NAN, ..CycleConfig::default() })
            .unwrap_err();
        assert!(matches!(err, ConfigError::BadTolerance(_)));

        // The bore handler is still reachable under its own code.
        let block = words(&[('D', 1.0), ('Q', 4.0), ('S', 1.0), ('P', 0.5), ('R', 1.0)]);
        assert_eq!(c.run_command(801, block).map(|r| r.kind), Ok(CycleKind::Bore));
    }
}
