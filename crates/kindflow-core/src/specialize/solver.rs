//! Worklist-based least-fixpoint solver over the term graph

use super::lattice::Kind;
use super::terms::{TermGraph, TermId};
use std::collections::VecDeque;

/// Hard stop for pathological graphs; reaching it leaves the solution
/// partial and is reported through [`SolveReport::converged`]
const MAX_ITERATIONS: usize = 1_000_000;

/// An inequality that does not hold after solving
#[derive(Debug, Clone, PartialEq)]
pub struct Unsatisfied {
    pub index: usize,
    pub lesser: TermId,
    pub greater: TermId,
    pub lesser_value: Kind,
    pub greater_value: Kind,
}

#[derive(Debug, Clone, Default)]
pub struct SolveReport {
    /// Inequalities popped from the worklist
    pub iterations: usize,
    /// Variables raised during solving
    pub updates: usize,
    pub converged: bool,
    pub unsatisfied: Vec<Unsatisfied>,
}

impl SolveReport {
    pub fn is_satisfied(&self) -> bool {
        self.unsatisfied.is_empty()
    }
}

pub struct FixpointSolver;

impl FixpointSolver {
    /// Raise variable terms until every inequality with a settable greater
    /// side holds, then check all inequalities. Processing order is the
    /// FIFO insertion order, so results are deterministic.
    pub fn solve(graph: &mut TermGraph) -> SolveReport {
        let count = graph.inequalities().len();
        let mut worklist: VecDeque<usize> = (0..count).collect();
        let mut in_worklist = vec![true; count];
        let mut report = SolveReport {
            converged: true,
            ..SolveReport::default()
        };

        while let Some(index) = worklist.pop_front() {
            in_worklist[index] = false;
            report.iterations += 1;

            if report.iterations > MAX_ITERATIONS {
                tracing::warn!("kind solver stopped after {} iterations", MAX_ITERATIONS);
                report.converged = false;
                break;
            }

            let ineq = graph.inequality(index);
            let greater = graph.term(ineq.greater);
            if !greater.is_settable() {
                continue;
            }
            let current = &greater.value;
            let incoming = graph.value(ineq.lesser);
            if incoming.leq(current) {
                continue;
            }

            let raised = current.lub(incoming);
            let admitted = greater.declared().is_some_and(|declared| declared.admits(&raised));
            if !admitted {
                tracing::trace!(
                    "{} cannot rise to {} within its declared kind",
                    graph.describe(ineq.greater),
                    raised
                );
                continue;
            }

            tracing::trace!("raise {} to {}", graph.describe(ineq.greater), raised);
            report.updates += 1;
            for changed in graph.raise(ineq.greater, raised) {
                for &next in graph.lesser_of(changed) {
                    if !in_worklist[next] {
                        in_worklist[next] = true;
                        worklist.push_back(next);
                    }
                }
            }
        }

        report.unsatisfied = Self::check(graph);
        report
    }

    /// Every inequality whose lesser value is not below its greater value
    pub fn check(graph: &TermGraph) -> Vec<Unsatisfied> {
        graph
            .inequalities()
            .iter()
            .enumerate()
            .filter_map(|(index, ineq)| {
                let lesser_value = graph.value(ineq.lesser);
                let greater_value = graph.value(ineq.greater);
                if lesser_value.leq(greater_value) {
                    return None;
                }
                Some(Unsatisfied {
                    index,
                    lesser: ineq.lesser,
                    greater: ineq.greater,
                    lesser_value: lesser_value.clone(),
                    greater_value: greater_value.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specialize::terms::{Monotonic, Origin};
    use smallvec::smallvec;

    fn var(graph: &mut TermGraph, declared: Kind) -> TermId {
        graph.add_variable(declared, Origin::Expr("test"))
    }

    fn constant(graph: &mut TermGraph, kind: Kind) -> TermId {
        graph.add_constant(kind, Origin::Expr("test"))
    }

    #[test]
    fn test_chain_propagates_to_fixpoint() {
        let mut graph = TermGraph::new();
        let c = constant(&mut graph, Kind::Int);
        let a = var(&mut graph, Kind::Unknown);
        let b = var(&mut graph, Kind::Unknown);
        graph.add_inequality(a, b);
        graph.add_inequality(c, a);

        let report = FixpointSolver::solve(&mut graph);
        assert!(report.converged);
        assert!(report.is_satisfied());
        assert_eq!(graph.value(a), &Kind::Int);
        assert_eq!(graph.value(b), &Kind::Int);
    }

    #[test]
    fn test_two_scalars_join_at_scalar() {
        let mut graph = TermGraph::new();
        let i = constant(&mut graph, Kind::Int);
        let d = constant(&mut graph, Kind::Double);
        let x = var(&mut graph, Kind::Unknown);
        graph.add_inequality(i, x);
        graph.add_inequality(d, x);

        FixpointSolver::solve(&mut graph);
        assert_eq!(graph.value(x), &Kind::Scalar);
    }

    #[test]
    fn test_declared_bound_blocks_raise() {
        let mut graph = TermGraph::new();
        let record = constant(&mut graph, Kind::record([("a", Kind::Int)]));
        let slot = var(&mut graph, Kind::array(Kind::Unknown));
        graph.add_inequality(record, slot);

        let report = FixpointSolver::solve(&mut graph);
        assert_eq!(graph.value(slot), &Kind::Unknown);
        assert_eq!(report.unsatisfied.len(), 1);
        assert_eq!(report.unsatisfied[0].greater, slot);
    }

    #[test]
    fn test_constant_greater_side_reported() {
        let mut graph = TermGraph::new();
        let port = constant(&mut graph, Kind::Int);
        let x = var(&mut graph, Kind::Unknown);
        let d = constant(&mut graph, Kind::Double);
        graph.add_inequality(d, x);
        graph.add_inequality(x, port);

        let report = FixpointSolver::solve(&mut graph);
        assert_eq!(graph.value(x), &Kind::Double);
        assert_eq!(report.unsatisfied.len(), 1);
        assert_eq!(report.unsatisfied[0].lesser, x);
        assert_eq!(report.unsatisfied[0].greater_value, Kind::Int);
    }

    #[test]
    fn test_derived_terms_feed_back() {
        let mut graph = TermGraph::new();
        let elem = var(&mut graph, Kind::Unknown);
        let container = var(&mut graph, Kind::Unknown);
        let wrapped = graph.add_derived(Monotonic::ArrayOf(elem), Origin::Expr("array"));
        let lub = graph.add_derived(Monotonic::Lub(smallvec![elem, elem]), Origin::Expr("lub"));
        let result = var(&mut graph, Kind::Unknown);
        graph.add_inequality(wrapped, container);
        graph.add_inequality(lub, result);
        let seed = constant(&mut graph, Kind::Long);
        graph.add_inequality(seed, elem);

        let report = FixpointSolver::solve(&mut graph);
        assert!(report.is_satisfied());
        assert_eq!(graph.value(container), &Kind::array(Kind::Long));
        assert_eq!(graph.value(result), &Kind::Long);
    }

    #[test]
    fn test_cycle_through_array_of_saturates() {
        let mut graph = TermGraph::new();
        let x = var(&mut graph, Kind::Unknown);
        let seed = constant(&mut graph, Kind::Int);
        let wrapped = graph.add_derived(Monotonic::ArrayOf(x), Origin::Expr("array"));
        graph.add_inequality(seed, x);
        graph.add_inequality(wrapped, x);

        let report = FixpointSolver::solve(&mut graph);
        assert!(report.converged);
        assert_eq!(graph.value(x), &Kind::Top);
    }

    #[test]
    fn test_resolving_is_idempotent() {
        let mut graph = TermGraph::new();
        let c = constant(&mut graph, Kind::Int);
        let a = var(&mut graph, Kind::Unknown);
        graph.add_inequality(c, a);
        FixpointSolver::solve(&mut graph);

        let before: Vec<Kind> = graph.terms().map(|(_, t)| t.value.clone()).collect();
        let report = FixpointSolver::solve(&mut graph);
        let after: Vec<Kind> = graph.terms().map(|(_, t)| t.value.clone()).collect();
        assert_eq!(before, after);
        assert_eq!(report.updates, 0);
    }
}
