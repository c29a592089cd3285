//! Constraint collection
//!
//! Walks every function once, binding a variable term to each box-typed
//! field and local and emitting inequalities per construct:
//! - `dst = src` gives `src ⊑ dst`, plus `dst ⊑ src` when both sides are
//!   aliasable box arrays (or `src` allocates one)
//! - array element access shares the array's term
//! - calls go through the [`RuleRegistry`]
//! - hint tags pin field kinds from below

use super::analysis::AnalysisContext;
use super::rules::{CallSite, ReceiverClass, RuleRegistry};
use super::terms::{Monotonic, Origin, TermId};
use super::Kind;
use crate::ir::{Call, Entity, Function, FunctionId, LocalId, Operand, Place, Program, Rvalue, Stmt, Ty};
use smallvec::{smallvec, SmallVec};

pub struct ConstraintCollector<'r> {
    rules: &'r RuleRegistry,
}

impl<'r> ConstraintCollector<'r> {
    pub fn new(rules: &'r RuleRegistry) -> Self {
        Self { rules }
    }

    pub fn collect(&self, program: &Program, cx: &mut AnalysisContext) {
        for (id, field) in program.field_ids() {
            let Some(declared) = field.ty.box_kind() else {
                continue;
            };
            let entity = Entity::Field(id);
            if field.retired {
                cx.declare(entity, declared.clone());
                continue;
            }
            let Some(term) = cx.bind(entity, declared.clone()) else {
                continue;
            };
            if let Some(hint) = &field.hint {
                let pinned = cx.graph.add_constant(hint.clone(), Origin::Hint(id));
                cx.graph.add_inequality(pinned, term);
            }
        }

        for (function_id, function) in program.function_ids() {
            for (local_id, local) in function.local_ids() {
                let Some(declared) = local.ty.box_kind() else {
                    continue;
                };
                let entity = Entity::Local(function_id, local_id);
                if local.retired {
                    cx.declare(entity, declared.clone());
                } else {
                    cx.bind(entity, declared.clone());
                }
            }

            let mut walker = BodyWalker {
                program,
                function_id,
                function,
                rules: self.rules,
                cx: &mut *cx,
                site: 0,
            };
            walker.walk(&function.body);
        }

        tracing::debug!(
            "collected {} terms and {} inequalities",
            cx.graph.len(),
            cx.graph.inequalities().len()
        );
    }
}

struct BodyWalker<'a> {
    program: &'a Program,
    function_id: FunctionId,
    function: &'a Function,
    rules: &'a RuleRegistry,
    cx: &'a mut AnalysisContext,
    /// Pre-order statement counter, used to name allocation sites
    site: usize,
}

impl BodyWalker<'_> {
    fn walk(&mut self, body: &[Stmt]) {
        for stmt in body {
            let site = self.site;
            self.site += 1;
            match stmt {
                Stmt::Assign { dst, src } => self.assign(dst, src, site),
                Stmt::Call(call) => {
                    self.call_term(call);
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    self.rvalue_term(cond, site);
                    self.walk(then_body);
                    self.walk(else_body);
                }
                Stmt::While { cond, body } => {
                    self.rvalue_term(cond, site);
                    self.walk(body);
                }
                Stmt::Return(_) | Stmt::Nop => {}
            }
        }
    }

    fn assign(&mut self, dst: &Place, src: &Rvalue, site: usize) {
        let src_term = self.rvalue_term(src, site);
        let Some(dst_term) = self.place_term(dst) else {
            return;
        };
        let Some(src_term) = src_term else {
            return;
        };
        self.cx.graph.add_inequality(src_term, dst_term);
        if self.place_aliasable(dst) && self.rvalue_aliasable(src) {
            self.cx.graph.add_inequality(dst_term, src_term);
        }
    }

    fn local_entity(&self, local: LocalId) -> Entity {
        Entity::Local(self.function_id, local)
    }

    fn local_term(&self, local: LocalId) -> Option<TermId> {
        self.cx.binding(&self.local_entity(local))
    }

    fn operand_term(&self, operand: &Operand) -> Option<TermId> {
        operand.as_local().and_then(|local| self.local_term(local))
    }

    fn place_term(&self, place: &Place) -> Option<TermId> {
        match place {
            Place::Local(local) => self.local_term(*local),
            Place::Field(field) => self.cx.binding(&Entity::Field(*field)),
            Place::Index { base, .. } => self.local_term(*base),
            Place::Slot { .. } => None,
        }
    }

    fn place_ty(&self, place: &Place) -> Option<&Ty> {
        match place {
            Place::Local(local) => Some(self.function.local_ty(*local)),
            Place::Field(field) => Some(&self.program.field(*field).ty),
            Place::Index { base, .. } => self.function.local_ty(*base).element(),
            Place::Slot { .. } => None,
        }
    }

    /// Storage holding a reference to an array of boxes
    fn place_aliasable(&self, place: &Place) -> bool {
        self.place_ty(place).is_some_and(is_box_array)
    }

    fn rvalue_aliasable(&self, src: &Rvalue) -> bool {
        match src {
            Rvalue::Use(Operand::Local(local)) | Rvalue::Cast(_, Operand::Local(local)) => {
                is_box_array(self.function.local_ty(*local))
            }
            Rvalue::Read(place) => self.place_aliasable(place),
            Rvalue::NewArray { elem, .. } => elem.is_boxed(),
            _ => false,
        }
    }

    fn rvalue_term(&mut self, src: &Rvalue, site: usize) -> Option<TermId> {
        match src {
            Rvalue::Use(operand) | Rvalue::Cast(_, operand) => self.operand_term(operand),
            Rvalue::Read(place) => self.place_term(place),
            Rvalue::NewBox { kind, args } => {
                let constructed = self.cx.graph.add_constant(kind.clone(), Origin::Expr("new box"));
                if !matches!(kind, Kind::Array(_)) || args.len() != 1 {
                    return Some(constructed);
                }
                let Some(elements) = self.operand_term(&args[0]) else {
                    return Some(constructed);
                };
                let wrapped = self
                    .cx
                    .graph
                    .add_derived(Monotonic::ArrayOf(elements), Origin::Expr("array box contents"));
                Some(self.cx.graph.add_derived(
                    Monotonic::Lub(smallvec![constructed, wrapped]),
                    Origin::Expr("new array box"),
                ))
            }
            Rvalue::Singleton { kind, .. } => {
                Some(self.cx.graph.add_constant(kind.clone(), Origin::Expr("singleton")))
            }
            Rvalue::NewArray { elem, .. } => {
                let declared = elem.box_kind()?.clone();
                let alloc = Entity::Alloc(self.function_id, site);
                self.cx.bind(alloc, declared)
            }
            Rvalue::Call(call) => self.call_term(call),
            Rvalue::Length(_)
            | Rvalue::Evaluate(_)
            | Rvalue::Quantity(_)
            | Rvalue::Compare { .. }
            | Rvalue::Binary { .. }
            | Rvalue::Not(_) => None,
        }
    }

    fn call_term(&mut self, call: &Call) -> Option<TermId> {
        let args: SmallVec<[Option<TermId>; 4]> = call.args().iter().map(|arg| self.operand_term(arg)).collect();
        let (receiver, receiver_term, quantity) = match call {
            Call::Method { receiver, .. } => match self.function.local_ty(*receiver) {
                Ty::Boxed(_) => (ReceiverClass::Box, self.local_term(*receiver), None),
                Ty::Handle => {
                    let program = self.program;
                    let quantity = self
                        .function
                        .resolve_quantity(*receiver)
                        .map(|id| (id, &program.quantity(id).kind));
                    (ReceiverClass::Quantity, None, quantity)
                }
                _ => return None,
            },
            Call::Static { class, .. } => (ReceiverClass::Static(class.as_str()), None, None),
        };
        let site = CallSite {
            receiver,
            method: call.method_name(),
            receiver_term,
            args: &args,
            quantity,
        };
        self.rules.constrain(&site, &mut self.cx.graph)
    }
}

fn is_box_array(ty: &Ty) -> bool {
    ty.array_dims() > 0 && ty.is_boxed()
}
