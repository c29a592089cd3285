//! Scalar replacement of boxes
//!
//! One depth at a time: [`eligibility::plan`] picks the entities whose
//! specialized kind has that depth, [`rewrite`] gives them flat storage and
//! rewrites every statement touching them, and [`cleanup`] drops what the
//! rewrite neutralized.

pub mod cleanup;
pub mod eligibility;
mod layout;
pub mod rewrite;

pub use eligibility::{ReplacementPlan, Target};
pub use layout::{Layout, Leaf};
pub use rewrite::{Descriptor, Replacements, Storage};

use crate::error::Result;
use crate::ir::Program;
use crate::specialize::AnalysisContext;

/// What one depth of replacement did to the program
#[derive(Debug, Default)]
pub struct DepthOutcome {
    pub replacements: Replacements,
    /// Candidates left boxed
    pub kept: usize,
    pub rewritten: usize,
    pub removed: usize,
}

/// Replace every eligible entity of `depth`. On error the program is
/// untouched.
pub fn replace_at_depth(program: &mut Program, cx: &AnalysisContext, depth: usize) -> Result<DepthOutcome> {
    let plan = eligibility::plan(program, cx, depth)?;
    if plan.targets.is_empty() {
        return Ok(DepthOutcome {
            kept: plan.kept.len(),
            ..DepthOutcome::default()
        });
    }
    let replacements = rewrite::allocate(program, &plan);
    for (entity, desc) in &replacements {
        tracing::debug!("replacing {} ({}) with flat storage", program.describe(entity), desc.kind);
    }
    let rewritten = rewrite::rewrite_program(program, &replacements);
    let removed = cleanup::remove_neutralized(program);
    Ok(DepthOutcome {
        replacements,
        kept: plan.kept.len(),
        rewritten,
        removed,
    })
}
