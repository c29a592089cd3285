//! Constraint-based kind specialization
//!
//! This module infers the runtime kind of every boxed value with:
//! - A kind lattice with lub/glb and a substitution-instance relation
//! - A term graph of constant, variable and monotonic terms
//! - A collector that turns program constructs into inequalities
//! - A worklist fixpoint solver that reports unsatisfied constraints
//! - A query API answering `specialized_kind(entity)`

mod analysis;
mod collector;
mod lattice;
pub mod rules;
mod solver;
mod terms;
mod unsafe_set;

pub use analysis::{analyze, AnalysisContext};
pub use collector::ConstraintCollector;
pub use lattice::{Kind, KindOrdering, MAX_NESTING};
pub use rules::RuleRegistry;
pub use solver::{FixpointSolver, SolveReport, Unsatisfied};
pub use terms::{Inequality, Monotonic, Origin, Term, TermGraph, TermId, TermRole};
pub use unsafe_set::UnsafeSet;
