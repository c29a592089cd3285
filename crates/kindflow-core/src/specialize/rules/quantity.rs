//! Rules for calls on port and parameter handles
//!
//! A handle whose quantity resolves statically contributes that quantity's
//! declared kind as a constant. Quantities whose kind has no concrete box
//! class are left unconstrained.

use super::{CallSite, ConstraintRule, ReceiverClass};
use crate::specialize::terms::{Origin, TermGraph, TermId};

fn quantity_term(site: &CallSite<'_>, graph: &mut TermGraph) -> Option<TermId> {
    let (id, kind) = site.quantity?;
    if !kind.is_instantiable() {
        return None;
    }
    Some(graph.add_constant(kind.clone(), Origin::Quantity(id)))
}

/// `get(channel)` and `getToken()`: result has the quantity's kind
pub struct QuantityReadRule;

impl ConstraintRule for QuantityReadRule {
    fn method_names(&self) -> &'static [&'static str] {
        &["get", "getToken"]
    }

    fn applies_to(&self, receiver: ReceiverClass<'_>, method: &str) -> bool {
        receiver == ReceiverClass::Quantity && matches!(method, "get" | "getToken")
    }

    fn constrain(&self, site: &CallSite<'_>, graph: &mut TermGraph) -> Option<TermId> {
        quantity_term(site, graph)
    }
}

/// `broadcast(value)` and `setToken(value)`: the first argument must fit
pub struct QuantityWriteRule;

impl ConstraintRule for QuantityWriteRule {
    fn method_names(&self) -> &'static [&'static str] {
        &["broadcast", "setToken"]
    }

    fn applies_to(&self, receiver: ReceiverClass<'_>, method: &str) -> bool {
        receiver == ReceiverClass::Quantity && matches!(method, "broadcast" | "setToken")
    }

    fn constrain(&self, site: &CallSite<'_>, graph: &mut TermGraph) -> Option<TermId> {
        if let Some(value) = site.arg(0) {
            if let Some(quantity) = quantity_term(site, graph) {
                graph.add_inequality(value, quantity);
            }
        }
        None
    }
}

/// `send(channel, value)`: the last argument must fit
pub struct SendRule;

impl ConstraintRule for SendRule {
    fn method_names(&self) -> &'static [&'static str] {
        &["send"]
    }

    fn applies_to(&self, receiver: ReceiverClass<'_>, method: &str) -> bool {
        receiver == ReceiverClass::Quantity && method == "send"
    }

    fn constrain(&self, site: &CallSite<'_>, graph: &mut TermGraph) -> Option<TermId> {
        if let Some(value) = site.last_arg() {
            if let Some(quantity) = quantity_term(site, graph) {
                graph.add_inequality(value, quantity);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::QuantityId;
    use crate::specialize::lattice::Kind;

    #[test]
    fn test_get_yields_quantity_kind() {
        let mut graph = TermGraph::new();
        let kind = Kind::Double;
        let site = CallSite {
            receiver: ReceiverClass::Quantity,
            method: "get",
            receiver_term: None,
            args: &[None],
            quantity: Some((QuantityId(0), &kind)),
        };
        let term = QuantityReadRule.constrain(&site, &mut graph).unwrap();
        assert_eq!(graph.value(term), &Kind::Double);
    }

    #[test]
    fn test_abstract_quantity_kind_is_ignored() {
        let mut graph = TermGraph::new();
        let kind = Kind::Scalar;
        let site = CallSite {
            receiver: ReceiverClass::Quantity,
            method: "get",
            receiver_term: None,
            args: &[],
            quantity: Some((QuantityId(0), &kind)),
        };
        assert!(QuantityReadRule.constrain(&site, &mut graph).is_none());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_send_bounds_last_argument() {
        let mut graph = TermGraph::new();
        let value = graph.add_variable(Kind::Unknown, Origin::Expr("value"));
        let kind = Kind::Int;
        let args = [None, Some(value)];
        let site = CallSite {
            receiver: ReceiverClass::Quantity,
            method: "send",
            receiver_term: None,
            args: &args,
            quantity: Some((QuantityId(3), &kind)),
        };
        SendRule.constrain(&site, &mut graph);
        assert_eq!(graph.inequalities().len(), 1);
        assert_eq!(graph.inequalities()[0].lesser, value);
    }

    #[test]
    fn test_unresolved_handle_adds_nothing() {
        let mut graph = TermGraph::new();
        let value = graph.add_variable(Kind::Unknown, Origin::Expr("value"));
        let args = [Some(value)];
        let site = CallSite {
            receiver: ReceiverClass::Quantity,
            method: "broadcast",
            receiver_term: None,
            args: &args,
            quantity: None,
        };
        QuantityWriteRule.constrain(&site, &mut graph);
        assert!(graph.inequalities().is_empty());
    }
}
