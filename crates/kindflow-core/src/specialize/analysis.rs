//! Per-run analysis state and the specialization query API

use super::collector::ConstraintCollector;
use super::lattice::Kind;
use super::rules::RuleRegistry;
use super::solver::{FixpointSolver, SolveReport, Unsatisfied};
use super::terms::{Origin, TermGraph, TermId};
use super::unsafe_set::UnsafeSet;
use crate::config::UnboxConfig;
use crate::error::{Result, UnboxError};
use crate::ir::{Entity, Program};
use indexmap::{IndexMap, IndexSet};

/// Everything one collect + solve round knows about the program.
/// Rebuilt from scratch whenever the program changes.
#[derive(Debug, Default)]
pub struct AnalysisContext {
    pub(crate) graph: TermGraph,
    bindings: IndexMap<Entity, TermId>,
    declared: IndexMap<Entity, Kind>,
    unsafe_set: UnsafeSet,
    conflicted: IndexSet<Entity>,
    report: Option<SolveReport>,
}

impl AnalysisContext {
    pub fn new(unsafe_set: UnsafeSet) -> Self {
        Self {
            unsafe_set,
            ..Self::default()
        }
    }

    /// Register an entity without giving it a term
    pub(crate) fn declare(&mut self, entity: Entity, declared: Kind) {
        self.declared.entry(entity).or_insert(declared);
    }

    /// Term for `entity`, created on first reference; unsafe entities get none
    pub(crate) fn bind(&mut self, entity: Entity, declared: Kind) -> Option<TermId> {
        if let Some(&term) = self.bindings.get(&entity) {
            return Some(term);
        }
        self.declare(entity, declared.clone());
        if self.unsafe_set.contains(&entity) {
            return None;
        }
        let term = self.graph.add_variable(declared, Origin::Entity(entity));
        self.bindings.insert(entity, term);
        Some(term)
    }

    pub fn binding(&self, entity: &Entity) -> Option<TermId> {
        self.bindings.get(entity).copied()
    }

    pub fn graph(&self) -> &TermGraph {
        &self.graph
    }

    /// Registered entities in registration order
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.declared.keys()
    }

    pub fn declared_kind(&self, entity: &Entity) -> Option<&Kind> {
        self.declared.get(entity)
    }

    pub fn is_unsafe(&self, entity: &Entity) -> bool {
        self.unsafe_set.contains(entity)
    }

    /// Whether the entity took part in an unsatisfied constraint
    pub fn is_conflicted(&self, entity: &Entity) -> bool {
        self.conflicted.contains(entity)
    }

    pub fn report(&self) -> Option<&SolveReport> {
        self.report.as_ref()
    }

    pub fn unsatisfied(&self) -> &[Unsatisfied] {
        self.report
            .as_ref()
            .map(|report| report.unsatisfied.as_slice())
            .unwrap_or(&[])
    }

    /// Run the solver to its fixed point and attribute every unsatisfied
    /// inequality to the entity it constrains
    pub fn solve(&mut self, program: &Program, config: &UnboxConfig) -> &SolveReport {
        let report = FixpointSolver::solve(&mut self.graph);
        tracing::trace!(
            "kind solver finished after {} iterations ({} updates)",
            report.iterations,
            report.updates
        );

        for unsatisfied in &report.unsatisfied {
            tracing::warn!(
                "unsatisfied constraint: {} ({}) is not below {} ({})",
                self.describe_term(program, unsatisfied.lesser),
                unsatisfied.lesser_value,
                self.describe_term(program, unsatisfied.greater),
                unsatisfied.greater_value
            );
            let blamed = [unsatisfied.greater, unsatisfied.lesser]
                .into_iter()
                .find_map(|term| match self.graph.term(term).origin {
                    Origin::Entity(entity) => Some(entity),
                    _ => None,
                });
            if let Some(entity) = blamed {
                self.conflicted.insert(entity);
            }
        }

        if config.debug {
            tracing::info!("kind assignment:");
            for (entity, term) in &self.bindings {
                tracing::info!("  {}: {}", program.describe(entity), self.graph.value(*term));
            }
        }

        self.report.insert(report)
    }

    /// Solved kind of `entity`, or its declared kind when the entity has
    /// no usable solution (unsafe, retired, never bound, or conflicted)
    pub fn specialized_kind(&self, entity: &Entity) -> Result<Kind> {
        let declared = self
            .declared
            .get(entity)
            .ok_or_else(|| UnboxError::MissingBinding(format!("{:?}", entity)))?;
        if self.conflicted.contains(entity) {
            return Ok(declared.clone());
        }
        match self.bindings.get(entity) {
            Some(term) => Ok(self.graph.value(*term).clone()),
            None => Ok(declared.clone()),
        }
    }

    /// Deepest specialized kind over all fields and locals
    pub fn deepest(&self) -> usize {
        self.declared
            .keys()
            .filter(|entity| !matches!(entity, Entity::Alloc(..)))
            .filter_map(|entity| self.specialized_kind(entity).ok())
            .map(|kind| kind.depth())
            .max()
            .unwrap_or(0)
    }

    fn describe_term(&self, program: &Program, term: TermId) -> String {
        match &self.graph.term(term).origin {
            Origin::Entity(entity) => program.describe(entity),
            Origin::Quantity(id) => match program.quantities.get(id.0) {
                Some(quantity) => format!("quantity {}", quantity.name),
                None => self.graph.describe(term),
            },
            _ => self.graph.describe(term),
        }
    }
}

/// Build and solve the constraint system for `program`
pub fn analyze(
    program: &Program,
    registry: &RuleRegistry,
    config: &UnboxConfig,
    extra_unsafe: impl IntoIterator<Item = Entity>,
) -> AnalysisContext {
    let unsafe_set = UnsafeSet::compute(program, extra_unsafe);
    let mut cx = AnalysisContext::new(unsafe_set);
    ConstraintCollector::new(registry).collect(program, &mut cx);
    cx.solve(program, config);
    cx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{LocalId, Operand, ProgramBuilder, Rvalue, Ty};

    #[test]
    fn test_missing_binding_for_unknown_entity() {
        let program = ProgramBuilder::new().build();
        let cx = analyze(&program, &RuleRegistry::new(), &UnboxConfig::default(), []);
        let err = cx.specialized_kind(&Entity::Field(crate::ir::FieldId(0))).unwrap_err();
        assert!(matches!(err, UnboxError::MissingBinding(_)));
    }

    #[test]
    fn test_seeded_unsafe_keeps_declared_kind() {
        let mut builder = ProgramBuilder::new();
        let func = builder.function("fire", |f| {
            let x = f.local("x", Ty::Boxed(Kind::Unknown));
            f.assign(x, Rvalue::new_box(Kind::Int, vec![Operand::int(1)]));
        });
        let program = builder.build();
        let x = Entity::Local(func, LocalId(0));

        let cx = analyze(&program, &RuleRegistry::new(), &UnboxConfig::default(), []);
        assert_eq!(cx.specialized_kind(&x).unwrap(), Kind::Int);

        let cx = analyze(&program, &RuleRegistry::new(), &UnboxConfig::default(), [x]);
        assert!(cx.is_unsafe(&x));
        assert_eq!(cx.specialized_kind(&x).unwrap(), Kind::Unknown);
    }

    #[test]
    fn test_debug_dump_does_not_change_results() {
        let mut builder = ProgramBuilder::new();
        builder.function("fire", |f| {
            let x = f.local("x", Ty::Boxed(Kind::Unknown));
            f.assign(x, Rvalue::new_box(Kind::Double, vec![]));
        });
        let program = builder.build();
        let quiet = analyze(&program, &RuleRegistry::new(), &UnboxConfig::default(), []);
        let loud = analyze(
            &program,
            &RuleRegistry::new(),
            &UnboxConfig::default().with_debug(true),
            [],
        );
        assert_eq!(quiet.deepest(), loud.deepest());
        assert_eq!(quiet.deepest(), 1);
    }
}
