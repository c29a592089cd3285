use super::{CallSite, ConstraintRule, ReceiverClass};
use crate::ir::{ARRAYCOPY_CLASS, ARRAYCOPY_METHOD};
use crate::specialize::terms::{TermGraph, TermId};

/// `System.arraycopy(src, srcPos, dst, dstPos, len)`: both arrays share a kind
pub struct ArrayCopyRule;

impl ConstraintRule for ArrayCopyRule {
    fn method_names(&self) -> &'static [&'static str] {
        &[ARRAYCOPY_METHOD]
    }

    fn applies_to(&self, receiver: ReceiverClass<'_>, method: &str) -> bool {
        receiver == ReceiverClass::Static(ARRAYCOPY_CLASS) && method == ARRAYCOPY_METHOD
    }

    fn constrain(&self, site: &CallSite<'_>, graph: &mut TermGraph) -> Option<TermId> {
        if let (Some(src), Some(dst)) = (site.arg(0), site.arg(2)) {
            graph.add_equality(src, dst);
        }
        None
    }
}
