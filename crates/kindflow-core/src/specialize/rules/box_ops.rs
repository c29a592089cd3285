//! Rules for methods called on box values

use super::{CallSite, ConstraintRule, ReceiverClass};
use crate::specialize::lattice::Kind;
use crate::specialize::terms::{Monotonic, Origin, TermGraph, TermId};
use smallvec::smallvec;

/// Result has the receiver's kind: `one`, `zero`, shifts, `pow`, ...
pub struct IdentityRule;

const IDENTITY_METHODS: &[&str] = &[
    "one",
    "zero",
    "bitwiseNot",
    "pow",
    "leftShift",
    "rightShift",
    "logicalRightShift",
    "absolute",
];

impl ConstraintRule for IdentityRule {
    fn method_names(&self) -> &'static [&'static str] {
        IDENTITY_METHODS
    }

    fn applies_to(&self, receiver: ReceiverClass<'_>, method: &str) -> bool {
        receiver == ReceiverClass::Box && IDENTITY_METHODS.contains(&method)
    }

    fn constrain(&self, site: &CallSite<'_>, _graph: &mut TermGraph) -> Option<TermId> {
        site.receiver_term
    }
}

/// Result is the least upper bound of receiver and argument
pub struct ArithmeticRule;

const ARITHMETIC_METHODS: &[&str] = &[
    "add",
    "addReverse",
    "subtract",
    "subtractReverse",
    "multiply",
    "multiplyReverse",
    "divide",
    "divideReverse",
    "modulo",
    "moduloReverse",
    "bitwiseAnd",
    "bitwiseOr",
    "bitwiseXor",
];

impl ConstraintRule for ArithmeticRule {
    fn method_names(&self) -> &'static [&'static str] {
        ARITHMETIC_METHODS
    }

    fn applies_to(&self, receiver: ReceiverClass<'_>, method: &str) -> bool {
        receiver == ReceiverClass::Box && ARITHMETIC_METHODS.contains(&method)
    }

    /// The result is the join of both operands; with either operand
    /// untyped there is no sound bound to give it
    fn constrain(&self, site: &CallSite<'_>, graph: &mut TermGraph) -> Option<TermId> {
        let (receiver, arg) = (site.receiver_term?, site.arg(0)?);
        Some(graph.add_derived(
            Monotonic::Lub(smallvec![receiver, arg]),
            Origin::Expr("arithmetic result"),
        ))
    }
}

/// `receiver.convert(arg)`: the argument must fit the receiver's kind
pub struct ConvertRule;

impl ConstraintRule for ConvertRule {
    fn method_names(&self) -> &'static [&'static str] {
        &["convert"]
    }

    fn applies_to(&self, receiver: ReceiverClass<'_>, method: &str) -> bool {
        receiver == ReceiverClass::Box && method == "convert"
    }

    fn constrain(&self, site: &CallSite<'_>, graph: &mut TermGraph) -> Option<TermId> {
        if let (Some(arg), Some(receiver)) = (site.arg(0), site.receiver_term) {
            graph.add_inequality(arg, receiver);
        }
        site.receiver_term
    }
}

/// Element projection: the receiver must be a container of `shape`
fn project_element(site: &CallSite<'_>, graph: &mut TermGraph, shape: Kind) -> Option<TermId> {
    let receiver = site.receiver_term?;
    let container = graph.add_variable(shape, Origin::Expr("container"));
    graph.add_inequality(receiver, container);
    Some(graph.add_derived(Monotonic::ElementOf(container), Origin::Expr("element")))
}

/// `getElement(i)` and `arrayValue()` on array boxes
pub struct ArrayElementRule;

impl ConstraintRule for ArrayElementRule {
    fn method_names(&self) -> &'static [&'static str] {
        &["getElement", "arrayValue"]
    }

    fn applies_to(&self, receiver: ReceiverClass<'_>, method: &str) -> bool {
        receiver == ReceiverClass::Box && matches!(method, "getElement" | "arrayValue")
    }

    fn constrain(&self, site: &CallSite<'_>, graph: &mut TermGraph) -> Option<TermId> {
        project_element(site, graph, Kind::array(Kind::Unknown))
    }
}

/// `getElementAsToken(row, column)` on matrix boxes
pub struct MatrixElementRule;

impl ConstraintRule for MatrixElementRule {
    fn method_names(&self) -> &'static [&'static str] {
        &["getElementAsToken"]
    }

    fn applies_to(&self, receiver: ReceiverClass<'_>, method: &str) -> bool {
        receiver == ReceiverClass::Box && method == "getElementAsToken"
    }

    fn constrain(&self, site: &CallSite<'_>, graph: &mut TermGraph) -> Option<TermId> {
        project_element(site, graph, Kind::matrix(Kind::Unknown))
    }
}
