//! Per-operation constraint rules
//!
//! Each call the collector meets is dispatched to the rule registered for
//! the receiver family and method name. A rule adds whatever terms and
//! inequalities the operation implies and returns the term standing for
//! the call's result, if the result is a boxed value.

mod box_ops;
mod intrinsics;
mod quantity;

use super::lattice::Kind;
use super::terms::{TermGraph, TermId};
use crate::ir::QuantityId;

pub use box_ops::*;
pub use intrinsics::*;
pub use quantity::*;

/// Family of the call target, resolved from the receiver's static type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverClass<'a> {
    /// Method on a box class
    Box,
    /// Method on a port or parameter handle
    Quantity,
    /// Static call on the named class
    Static(&'a str),
}

/// Everything a rule may look at for one call site
#[derive(Debug)]
pub struct CallSite<'a> {
    pub receiver: ReceiverClass<'a>,
    pub method: &'a str,
    /// Term of the receiver local, for box methods
    pub receiver_term: Option<TermId>,
    /// Terms of the arguments; `None` for unboxed or unsafe arguments
    pub args: &'a [Option<TermId>],
    /// Quantity behind a handle receiver, when it resolves statically
    pub quantity: Option<(QuantityId, &'a Kind)>,
}

impl CallSite<'_> {
    pub fn arg(&self, index: usize) -> Option<TermId> {
        self.args.get(index).copied().flatten()
    }

    pub fn last_arg(&self) -> Option<TermId> {
        self.args.last().copied().flatten()
    }
}

/// Trait for rules that turn one operation into constraints
pub trait ConstraintRule {
    /// Method names this rule answers for
    fn method_names(&self) -> &'static [&'static str];

    /// Check if this rule applies to the given receiver family and method
    fn applies_to(&self, receiver: ReceiverClass<'_>, method: &str) -> bool;

    fn constrain(&self, site: &CallSite<'_>, graph: &mut TermGraph) -> Option<TermId>;
}

/// Registry of all constraint rules
pub struct RuleRegistry {
    rules: Vec<Box<dyn ConstraintRule + Send + Sync>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        let mut registry = Self { rules: Vec::new() };

        // Box operations
        registry.register(Box::new(box_ops::IdentityRule));
        registry.register(Box::new(box_ops::ArithmeticRule));
        registry.register(Box::new(box_ops::ConvertRule));
        registry.register(Box::new(box_ops::ArrayElementRule));
        registry.register(Box::new(box_ops::MatrixElementRule));

        // Quantity operations
        registry.register(Box::new(quantity::QuantityReadRule));
        registry.register(Box::new(quantity::QuantityWriteRule));
        registry.register(Box::new(quantity::SendRule));

        // Intrinsics
        registry.register(Box::new(intrinsics::ArrayCopyRule));

        registry
    }

    pub fn register(&mut self, rule: Box<dyn ConstraintRule + Send + Sync>) {
        self.rules.push(rule);
    }

    pub fn lookup(&self, receiver: ReceiverClass<'_>, method: &str) -> Option<&(dyn ConstraintRule + Send + Sync)> {
        self.rules
            .iter()
            .find(|rule| rule.applies_to(receiver, method))
            .map(|rule| rule.as_ref())
    }

    /// Apply the matching rule, if any; unknown operations add nothing
    pub fn constrain(&self, site: &CallSite<'_>, graph: &mut TermGraph) -> Option<TermId> {
        match self.lookup(site.receiver, site.method) {
            Some(rule) => rule.constrain(site, graph),
            None => {
                tracing::trace!("no constraint rule for {:?}.{}", site.receiver, site.method);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_dispatch_by_family() {
        let registry = RuleRegistry::new();
        assert!(registry.lookup(ReceiverClass::Box, "add").is_some());
        assert!(registry.lookup(ReceiverClass::Box, "moduloReverse").is_some());
        assert!(registry.lookup(ReceiverClass::Quantity, "add").is_none());
        assert!(registry.lookup(ReceiverClass::Quantity, "broadcast").is_some());
        assert!(registry.lookup(ReceiverClass::Static("System"), "arraycopy").is_some());
        assert!(registry.lookup(ReceiverClass::Static("Math"), "arraycopy").is_none());
        assert!(registry.lookup(ReceiverClass::Box, "toString").is_none());
    }

    #[test]
    fn test_every_rule_answers_its_own_names() {
        let registry = RuleRegistry::new();
        assert_eq!(registry.len(), 9);
        for rule in &registry.rules {
            for name in rule.method_names() {
                let answered = [ReceiverClass::Box, ReceiverClass::Quantity, ReceiverClass::Static("System")]
                    .into_iter()
                    .any(|family| rule.applies_to(family, name));
                assert!(answered, "rule does not answer {}", name);
            }
        }
    }
}
