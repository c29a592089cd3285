//! Term graph: kind-valued terms and the inequalities between them
//!
//! Terms live in an arena indexed by [`TermId`]. Each inequality records
//! `lesser ⊑ greater`; adjacency lists let the solver revisit exactly the
//! inequalities whose lesser side changed.

use super::lattice::Kind;
use crate::ir::{Entity, FieldId, QuantityId};
use smallvec::{smallvec, SmallVec};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermId(pub usize);

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Monotonic function of other terms
#[derive(Debug, Clone, PartialEq)]
pub enum Monotonic {
    /// Least upper bound of the inputs
    Lub(SmallVec<[TermId; 2]>),
    /// Element kind of an array- or matrix-valued term
    ElementOf(TermId),
    /// Array whose elements have the input's kind
    ArrayOf(TermId),
}

impl Monotonic {
    pub fn dependencies(&self) -> SmallVec<[TermId; 2]> {
        match self {
            Monotonic::Lub(inputs) => inputs.clone(),
            Monotonic::ElementOf(t) | Monotonic::ArrayOf(t) => smallvec![*t],
        }
    }

    fn evaluate(&self, terms: &[Term]) -> Kind {
        match self {
            Monotonic::Lub(inputs) => inputs
                .iter()
                .fold(Kind::Unknown, |acc, t| acc.lub(&terms[t.0].value)),
            Monotonic::ElementOf(t) => match &terms[t.0].value {
                Kind::Unknown => Kind::Unknown,
                Kind::Array(elem) | Kind::Matrix(elem) => (**elem).clone(),
                _ => Kind::Top,
            },
            Monotonic::ArrayOf(t) => Kind::array_of(&terms[t.0].value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TermRole {
    /// Fixed kind
    Constant,
    /// Solver-assigned kind, bounded by the storage's declared kind
    Variable { declared: Kind },
    Derived(Monotonic),
}

/// Where a term came from, for diagnostics and conflict attribution
#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    Entity(Entity),
    Quantity(QuantityId),
    Hint(FieldId),
    /// Expression-level term, e.g. a `new` site or an operator result
    Expr(&'static str),
}

#[derive(Debug, Clone)]
pub struct Term {
    pub value: Kind,
    pub role: TermRole,
    pub origin: Origin,
}

impl Term {
    /// Only variables whose declared kind still has holes can be raised
    pub fn is_settable(&self) -> bool {
        match &self.role {
            TermRole::Variable { declared } => !declared.is_constant(),
            _ => false,
        }
    }

    pub fn declared(&self) -> Option<&Kind> {
        match &self.role {
            TermRole::Variable { declared } => Some(declared),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Inequality {
    pub lesser: TermId,
    pub greater: TermId,
}

#[derive(Debug, Default)]
pub struct TermGraph {
    terms: Vec<Term>,
    inequalities: Vec<Inequality>,
    recorded: HashSet<Inequality>,
    /// Per term: inequalities in which it is the lesser side
    lesser_of: Vec<SmallVec<[usize; 4]>>,
    /// Per term: derived terms that read it
    dependents: Vec<SmallVec<[TermId; 2]>>,
}

impl TermGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, term: Term) -> TermId {
        self.terms.push(term);
        self.lesser_of.push(SmallVec::new());
        self.dependents.push(SmallVec::new());
        TermId(self.terms.len() - 1)
    }

    pub fn add_constant(&mut self, kind: Kind, origin: Origin) -> TermId {
        self.push(Term {
            value: kind,
            role: TermRole::Constant,
            origin,
        })
    }

    /// Variable seeded at bottom, or at its declared kind when that kind
    /// leaves nothing to refine
    pub fn add_variable(&mut self, declared: Kind, origin: Origin) -> TermId {
        let value = if declared.is_constant() {
            declared.clone()
        } else {
            Kind::Unknown
        };
        self.push(Term {
            value,
            role: TermRole::Variable { declared },
            origin,
        })
    }

    pub fn add_derived(&mut self, function: Monotonic, origin: Origin) -> TermId {
        let value = function.evaluate(&self.terms);
        let deps = function.dependencies();
        let id = self.push(Term {
            value,
            role: TermRole::Derived(function),
            origin,
        });
        for dep in deps {
            if !self.dependents[dep.0].contains(&id) {
                self.dependents[dep.0].push(id);
            }
        }
        id
    }

    /// Record `lesser ⊑ greater`
    pub fn add_inequality(&mut self, lesser: TermId, greater: TermId) {
        if lesser == greater {
            return;
        }
        let ineq = Inequality { lesser, greater };
        if !self.recorded.insert(ineq) {
            return;
        }
        tracing::debug!("inequality {} <= {}", self.describe(lesser), self.describe(greater));
        self.inequalities.push(ineq);
        self.lesser_of[lesser.0].push(self.inequalities.len() - 1);
    }

    /// Record `a ⊑ b` and `b ⊑ a`
    pub fn add_equality(&mut self, a: TermId, b: TermId) {
        self.add_inequality(a, b);
        self.add_inequality(b, a);
    }

    pub fn term(&self, id: TermId) -> &Term {
        &self.terms[id.0]
    }

    pub fn value(&self, id: TermId) -> &Kind {
        &self.terms[id.0].value
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> impl Iterator<Item = (TermId, &Term)> {
        self.terms.iter().enumerate().map(|(i, t)| (TermId(i), t))
    }

    pub fn inequalities(&self) -> &[Inequality] {
        &self.inequalities
    }

    pub fn inequality(&self, index: usize) -> Inequality {
        self.inequalities[index]
    }

    pub(crate) fn lesser_of(&self, id: TermId) -> &[usize] {
        &self.lesser_of[id.0]
    }

    /// Assign `kind` to a variable and re-evaluate every derived term
    /// downstream of it. Returns all terms whose value changed.
    pub(crate) fn raise(&mut self, id: TermId, kind: Kind) -> Vec<TermId> {
        self.terms[id.0].value = kind;
        let mut changed = vec![id];
        let mut cursor = 0;
        while cursor < changed.len() {
            let current = changed[cursor];
            cursor += 1;
            let dependents = self.dependents[current.0].clone();
            for dependent in dependents {
                let TermRole::Derived(function) = &self.terms[dependent.0].role else {
                    continue;
                };
                let updated = function.evaluate(&self.terms);
                if updated != self.terms[dependent.0].value {
                    self.terms[dependent.0].value = updated;
                    changed.push(dependent);
                }
            }
        }
        changed
    }

    pub fn describe(&self, id: TermId) -> String {
        let term = &self.terms[id.0];
        let origin = match &term.origin {
            Origin::Entity(entity) => format!("{:?}", entity),
            Origin::Quantity(q) => format!("quantity #{}", q.0),
            Origin::Hint(field) => format!("hint on field #{}", field.0),
            Origin::Expr(what) => (*what).to_string(),
        };
        format!("{}[{}: {}]", id, origin, term.value)
    }
}
