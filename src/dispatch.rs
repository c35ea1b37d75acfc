//! Command registry.
//!
//! The dispatcher owns an ordered list of handlers and hands a block to the
//! first one that claims its code. A code nobody claims is reported back to
//! the caller as unsupported.

use crate::config::CycleConfig;
use crate::cycle::{CycleReport, prepare, run_cycle};
use crate::diagnostics::{DiagnosticsSink, Reporter};
use crate::error::{CycleError, DispatchError};
use crate::executor::MotionExecutor;
use crate::geometry::StartPose;
use crate::params::{CycleKind, ParserBlock, validate};
use crate::planner::Plan;

/// Machine services a handler may use while executing one block.
pub struct MachineContext<'a> {
    pub executor: &'a mut dyn MotionExecutor,
    pub diagnostics: &'a mut dyn DiagnosticsSink,
    pub modal_feed: f64,
    pub config: &'a CycleConfig,
}

pub trait CommandHandler {
    fn claims(&self, code: u32) -> bool;

    /// Validate and plan against `start` without moving anything.
    fn preview(&self, block: &ParserBlock, start: StartPose, modal_feed: f64, config: &CycleConfig)
    -> Result<Plan, CycleError>;

    /// Validate, plan and run the block. Errors are reported on the
    /// diagnostics stream exactly once before being returned.
    fn execute(&self, block: &mut ParserBlock, ctx: &mut MachineContext<'_>) -> Result<CycleReport, CycleError>;
}

/// Keyway cycle bound to one command code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywayCycle {
    pub code: u32,
    pub kind: CycleKind,
}

impl CommandHandler for KeywayCycle {
    fn claims(&self, code: u32) -> bool {
        code == self.code
    }

    fn preview(
        &self,
        block: &ParserBlock,
        start: StartPose,
        modal_feed: f64,
        config: &CycleConfig,
    ) -> Result<Plan, CycleError> {
        // Work on a copy so previewing never spends the caller's words.
        let mut scratch = block.clone();
        let params = validate(self.kind, &mut scratch, modal_feed)?;
        prepare(&params, start, config.tolerance)
    }

    fn execute(&self, block: &mut ParserBlock, ctx: &mut MachineContext<'_>) -> Result<CycleReport, CycleError> {
        let mut reporter = Reporter::new(&mut *ctx.diagnostics, self.code, ctx.config.verbosity);
        let result = validate(self.kind, block, ctx.modal_feed)
            .map_err(CycleError::from)
            .and_then(|params| run_cycle(self.code, &params, &mut *ctx.executor, &mut reporter, ctx.config.tolerance));
        if let Err(err) = &result {
            reporter.error(err);
        }
        result
    }
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: Vec<Box<dyn CommandHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the straight and bore keyway cycles under the
    /// configured codes.
    pub fn with_keyway_cycles(config: &CycleConfig) -> Self {
        if config.straight_code == config.bore_code {
            console_log!("M{} claimed by both keyway cycles; the bore cycle is unreachable", config.bore_code);
        }
        let mut dispatcher = Self::new();
        dispatcher.register(Box::new(KeywayCycle { code: config.straight_code, kind: CycleKind::Straight }));
        dispatcher.register(Box::new(KeywayCycle { code: config.bore_code, kind: CycleKind::Bore }));
        dispatcher
    }

    /// Handlers are tried in registration order; the first claim wins.
    pub fn register(&mut self, handler: Box<dyn CommandHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn check(&self, code: u32) -> bool {
        self.find(code).is_some()
    }

    fn find(&self, code: u32) -> Option<&dyn CommandHandler> {
        self.handlers.iter().find(|h| h.claims(code)).map(|h| h.as_ref())
    }

    pub fn dispatch(&self, block: &mut ParserBlock, ctx: &mut MachineContext<'_>) -> Result<CycleReport, DispatchError> {
        let Some(handler) = self.find(block.code) else {
            console_log!("M{} unsupported", block.code);
            return Err(DispatchError::Unsupported(block.code));
        };
        Ok(handler.execute(block, ctx)?)
    }

    pub fn preview(
        &self,
        block: &ParserBlock,
        start: StartPose,
        modal_feed: f64,
        config: &CycleConfig,
    ) -> Result<Plan, DispatchError> {
        let handler = self.find(block.code).ok_or(DispatchError::Unsupported(block.code))?;
        Ok(handler.preview(block, start, modal_feed, config)?)
    }
}
