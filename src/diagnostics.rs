//! Text progress stream of a cycle.
//!
//! Minimal verbosity prints only the start and end markers. Verbose adds the
//! computed geometry and one line per planned segment. Errors are printed at
//! either level.

use crate::config::Verbosity;
use crate::error::Field;
use crate::params::CycleParameters;
use crate::planner::{MotionClass, Plan, PlannedSegment, SegmentRole};

pub trait DiagnosticsSink {
    fn emit(&mut self, line: &str);
}

impl DiagnosticsSink for Vec<String> {
    fn emit(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

/// Buffers lines for the host and optionally mirrors them to the console.
#[derive(Debug, Default)]
pub struct StreamSink {
    lines: Vec<String>,
    echo: bool,
}

impl StreamSink {
    pub fn new(echo: bool) -> Self {
        Self { lines: Vec::new(), echo }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }
}

impl DiagnosticsSink for StreamSink {
    fn emit(&mut self, line: &str) {
        if self.echo {
            console_log!("{}", line);
        }
        self.lines.push(line.to_string());
    }
}

/// Formats cycle events for one command code at one verbosity.
pub struct Reporter<'a> {
    sink: &'a mut dyn DiagnosticsSink,
    code: u32,
    verbosity: Verbosity,
}

impl<'a> Reporter<'a> {
    pub fn new(sink: &'a mut dyn DiagnosticsSink, code: u32, verbosity: Verbosity) -> Self {
        Self { sink, code, verbosity }
    }

    fn verbose(&self) -> bool {
        self.verbosity == Verbosity::Verbose
    }

    pub fn start(&mut self) {
        let line = format!("M{} CYCLE START", self.code);
        self.sink.emit(&line);
    }

    pub fn end(&mut self) {
        let line = format!("M{} CYCLE END", self.code);
        self.sink.emit(&line);
    }

    pub fn error(&mut self, err: &dyn std::error::Error) {
        let line = format!("M{}: {}", self.code, err);
        self.sink.emit(&line);
    }

    pub fn geometry(&mut self, params: &CycleParameters, plan: &Plan) {
        if !self.verbose() {
            return;
        }
        let code = self.code;
        // Bore blocks carry the length on Q; L is their repeat count there.
        let length_word = params.kind.word_for(Field::Length).unwrap_or('L');
        let mut line = format!(
            "M{} GEOMETRY: X0={:.3} Z0={:.3} {}={:.3} Feed={:.3}",
            code, plan.start.x, plan.start.z, length_word, params.length, params.feed_rate
        );
        if let Some(width) = params.tool_width {
            line.push_str(&format!(" W={:.3}", width));
        }
        self.sink.emit(&line);

        if let Some(c) = plan.geometry.bore() {
            let sag = format!(
                "M{} SAG: R={:.3} C={:.3} sag={:.3} X_new_start={:.3} Dcorr={:.3} Xfinal={:.3}",
                code,
                c.bore_radius,
                c.half_tool_width * 2.0,
                c.sag,
                c.corrected_start_x,
                c.corrected_depth,
                c.final_x
            );
            self.sink.emit(&sag);
        }

        let passes = format!("M{} PASSES={} REPEATS={}", code, plan.pass_count, plan.repeats);
        self.sink.emit(&passes);
    }

    pub fn segment(&mut self, planned: &PlannedSegment) {
        if !self.verbose() {
            return;
        }
        let line = describe_segment(self.code, planned);
        self.sink.emit(&line);
    }
}

pub fn describe_segment(code: u32, planned: &PlannedSegment) -> String {
    let target = planned.segment.target;
    if planned.role == SegmentRole::Return {
        return format!("M{} RETURN: X={:.3} Z={:.3}", code, target.x, target.z);
    }
    let g = match planned.segment.class() {
        MotionClass::Rapid => "G0",
        MotionClass::Feed => "G1",
    };
    let mut line = format!("M{} {} {}: X={:.3} Z={:.3}", code, g, planned.role.label(), target.x, target.z);
    if planned.repeat > 0 {
        line.push_str(&format!(" (pass={} rep={})", planned.pass, planned.repeat));
    }
    line
}
