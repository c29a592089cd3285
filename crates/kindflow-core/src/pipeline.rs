//! Depth-iterated specialization and unboxing
//!
//! Every depth re-runs collection and solving from scratch, because the
//! previous depth rewrote the program underneath the old term graph.

use crate::config::UnboxConfig;
use crate::error::Result;
use crate::ir::{Entity, Program};
use crate::specialize::{analyze, AnalysisContext, RuleRegistry};
use crate::unbox::{self, eligibility, Replacements};
use serde::Serialize;

/// Statistics of one depth iteration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DepthReport {
    pub depth: usize,
    /// Entities given flat storage
    pub replaced: usize,
    /// Candidates left boxed by the consistency check
    pub kept: usize,
    pub rewritten: usize,
    pub removed: usize,
    pub unsatisfied: usize,
    pub iterations: usize,
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub depths: Vec<DepthReport>,
    /// Every descriptor created, across depths
    pub replacements: Replacements,
}

impl PipelineReport {
    pub fn total_replaced(&self) -> usize {
        self.depths.iter().map(|depth| depth.replaced).sum()
    }

    pub fn total_unsatisfied(&self) -> usize {
        self.depths.iter().map(|depth| depth.unsatisfied).sum()
    }
}

/// Runs the collector, solver and transformer over a program
pub struct Unboxer {
    config: UnboxConfig,
    registry: RuleRegistry,
    seed_unsafe: Vec<Entity>,
}

impl Unboxer {
    pub fn new(config: UnboxConfig) -> Self {
        Self {
            config,
            registry: RuleRegistry::new(),
            seed_unsafe: Vec::new(),
        }
    }

    /// Exclude entities from specialization in addition to the computed
    /// unsafe set
    pub fn with_unsafe(mut self, entities: impl IntoIterator<Item = Entity>) -> Self {
        self.seed_unsafe.extend(entities);
        self
    }

    pub fn with_registry(mut self, registry: RuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &UnboxConfig {
        &self.config
    }

    /// Collect and solve without touching the program
    pub fn analyze(&self, program: &Program) -> AnalysisContext {
        analyze(program, &self.registry, &self.config, self.seed_unsafe.iter().copied())
    }

    /// Unbox from the deepest kind (capped by `max_depth`) down to depth 1.
    ///
    /// The run is all or nothing: shapes are checked before the first
    /// rewrite, the depths work on a copy, and `program` is only replaced
    /// once every depth has succeeded. On error `program` is unchanged.
    pub fn run(&self, program: &mut Program) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();
        let mut cx = self.analyze(program);
        let start = cx.deepest().min(self.config.max_depth);
        tracing::info!("unboxing {} depth(s), deepest kind has depth {}", start, cx.deepest());
        eligibility::check_shapes(program, &cx, start)?;

        let mut working = program.clone();
        for depth in (1..=start).rev() {
            if depth != start {
                cx = self.analyze(&working);
            }
            let outcome = unbox::replace_at_depth(&mut working, &cx, depth)?;
            let depth_report = DepthReport {
                depth,
                replaced: outcome.replacements.len(),
                kept: outcome.kept,
                rewritten: outcome.rewritten,
                removed: outcome.removed,
                unsatisfied: cx.unsatisfied().len(),
                iterations: cx.report().map_or(0, |solve| solve.iterations),
            };
            tracing::info!(
                "depth {}: replaced {} entities, kept {}, rewrote {} sites, removed {} statements",
                depth,
                depth_report.replaced,
                depth_report.kept,
                depth_report.rewritten,
                depth_report.removed
            );
            report.depths.push(depth_report);
            report.replacements.extend(outcome.replacements);
        }
        *program = working;
        Ok(report)
    }
}

impl Default for Unboxer {
    fn default() -> Self {
        Self::new(UnboxConfig::default())
    }
}
