//! Rewriting box traffic onto flat storage
//!
//! Every replaced entity gets a presence flag (`<name>_present`) standing in
//! for the reference and one slot per layout leaf (`<name>_<leaf>`), each
//! with the entity's array dimensions. Statements that move, build, test or
//! take apart replaced boxes are rewritten onto that storage; statements
//! that still mention a replaced entity are neutralized to `dst = null` and
//! left for [`super::cleanup`].

use super::eligibility::ReplacementPlan;
use super::layout::Leaf;
use crate::ir::{
    Call, CmpOp, Constant, Entity, FieldDecl, FieldId, FunctionId, LocalDecl, LocalId, Operand, Place, Program,
    Rvalue, Stmt, Ty,
};
use crate::specialize::Kind;
use indexmap::IndexMap;
use serde::Serialize;
use smallvec::SmallVec;

/// Where a piece of replacement storage lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Storage {
    Local(LocalId),
    Field(FieldId),
}

impl Storage {
    fn place(self) -> Place {
        match self {
            Storage::Local(local) => Place::Local(local),
            Storage::Field(field) => Place::Field(field),
        }
    }

    fn local(self) -> Option<LocalId> {
        match self {
            Storage::Local(local) => Some(local),
            Storage::Field(_) => None,
        }
    }
}

/// Flat storage standing in for one replaced entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Descriptor {
    pub kind: Kind,
    pub dims: usize,
    /// Presence flag; false where the box was null
    pub shadow: Storage,
    pub slots: SmallVec<[(Leaf, Storage); 2]>,
}

impl Descriptor {
    pub fn slot(&self, name: &str) -> Option<Storage> {
        self.slots
            .iter()
            .find(|(leaf, _)| leaf.name == name)
            .map(|(_, storage)| *storage)
    }

    fn is_local(&self) -> bool {
        self.shadow.local().is_some() && self.slots.iter().all(|(_, storage)| storage.local().is_some())
    }
}

pub type Replacements = IndexMap<Entity, Descriptor>;

/// Declare replacement storage for every target and retire the originals
pub fn allocate(program: &mut Program, plan: &ReplacementPlan) -> Replacements {
    let mut replacements = Replacements::new();
    for (entity, target) in &plan.targets {
        let (base, scope) = match *entity {
            Entity::Field(id) => (program.field(id).name.clone(), None),
            Entity::Local(func, local) => (program.function(func).local(local).name.clone(), Some(func)),
            Entity::Alloc(..) => continue,
        };
        let shadow = add_storage(program, scope, format!("{base}_present"), Ty::Bool.with_dims(target.dims));
        let slots = target
            .layout
            .leaves
            .iter()
            .map(|leaf| {
                let ty = leaf.ty.clone().with_dims(target.dims);
                (leaf.clone(), add_storage(program, scope, format!("{base}_{}", leaf.name), ty))
            })
            .collect();
        match *entity {
            Entity::Field(id) => program.fields[id.0].retired = true,
            Entity::Local(func, local) => program.functions[func.0].locals[local.0].retired = true,
            Entity::Alloc(..) => {}
        }
        replacements.insert(
            *entity,
            Descriptor {
                kind: target.kind.clone(),
                dims: target.dims,
                shadow,
                slots,
            },
        );
    }
    replacements
}

fn add_storage(program: &mut Program, scope: Option<FunctionId>, name: String, ty: Ty) -> Storage {
    match scope {
        None => Storage::Field(program.add_field(FieldDecl {
            name,
            ty,
            hint: None,
            retired: false,
        })),
        Some(func) => Storage::Local(program.functions[func.0].add_local(LocalDecl {
            name,
            ty,
            retired: false,
        })),
    }
}

/// Rewrite every function body; returns the number of rewritten sites
pub fn rewrite_program(program: &mut Program, replacements: &Replacements) -> usize {
    if replacements.is_empty() {
        return 0;
    }
    let mut rewritten = 0;
    for (index, function) in program.functions.iter_mut().enumerate() {
        let mut rewriter = Rewriter {
            function_id: FunctionId(index),
            replacements,
            rewritten: 0,
        };
        let body = std::mem::take(&mut function.body);
        function.body = rewriter.block(body);
        rewritten += rewriter.rewritten;
    }
    rewritten
}

/// A replaced entity as seen through one place: the whole entity, or one
/// element of a replaced array
struct Access<'d> {
    desc: &'d Descriptor,
    index: Option<Operand>,
}

impl Access<'_> {
    fn place(&self, storage: Storage) -> Place {
        match (&self.index, storage) {
            (Some(index), Storage::Local(base)) => Place::Index {
                base,
                index: index.clone(),
            },
            (_, storage) => storage.place(),
        }
    }

    fn shadow(&self) -> Place {
        self.place(self.desc.shadow)
    }

    fn slots(&self) -> impl Iterator<Item = (&Leaf, Place)> + '_ {
        self.desc
            .slots
            .iter()
            .map(|(leaf, storage)| (leaf, self.place(*storage)))
    }

    /// Reference to a whole replaced array
    fn is_array_ref(&self) -> bool {
        self.desc.dims > 0 && self.index.is_none()
    }
}

fn load(place: Place) -> Rvalue {
    match place {
        Place::Local(local) => Rvalue::Use(Operand::Local(local)),
        other => Rvalue::Read(other),
    }
}

fn assign(dst: Place, src: Rvalue) -> Stmt {
    Stmt::Assign { dst, src }
}

struct Rewriter<'r> {
    function_id: FunctionId,
    replacements: &'r Replacements,
    rewritten: usize,
}

impl<'r> Rewriter<'r> {
    fn block(&mut self, body: Vec<Stmt>) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(body.len());
        for stmt in body {
            self.stmt(stmt, &mut out);
        }
        out
    }

    fn stmt(&mut self, stmt: Stmt, out: &mut Vec<Stmt>) {
        match stmt {
            Stmt::Assign { dst, src } => self.assign(dst, src, out),
            Stmt::Call(call) => match self.arraycopy(&call) {
                Some(copies) => {
                    self.rewritten += 1;
                    out.extend(copies);
                }
                None => out.push(Stmt::Call(call)),
            },
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let cond = self.rvalue(cond);
                let then_body = self.block(then_body);
                let else_body = self.block(else_body);
                out.push(Stmt::If {
                    cond,
                    then_body,
                    else_body,
                });
            }
            Stmt::While { cond, body } => {
                let cond = self.rvalue(cond);
                let body = self.block(body);
                out.push(Stmt::While { cond, body });
            }
            other => out.push(other),
        }
    }

    fn descriptor(&self, local: LocalId) -> Option<&'r Descriptor> {
        self.replacements.get(&Entity::Local(self.function_id, local))
    }

    fn access(&self, place: &Place) -> Option<Access<'r>> {
        match place {
            Place::Local(local) => self.descriptor(*local).map(|desc| Access { desc, index: None }),
            Place::Field(field) => self
                .replacements
                .get(&Entity::Field(*field))
                .map(|desc| Access { desc, index: None }),
            Place::Index { base, index } => self
                .descriptor(*base)
                .filter(|desc| desc.dims > 0 && desc.is_local())
                .map(|desc| Access {
                    desc,
                    index: Some(index.clone()),
                }),
            Place::Slot { .. } => None,
        }
    }

    /// `x.leaf` of a replaced box becomes its slot storage
    fn slot_place(&self, place: &Place) -> Option<Place> {
        let Place::Slot { base, slot } = place else {
            return None;
        };
        let desc = self.descriptor(*base).filter(|desc| desc.dims == 0)?;
        desc.slot(slot).map(Storage::place)
    }

    fn assign(&mut self, dst: Place, src: Rvalue, out: &mut Vec<Stmt>) {
        let dst = match self.slot_place(&dst) {
            Some(place) => {
                self.rewritten += 1;
                place
            }
            None => dst,
        };
        let src = self.rvalue(src);

        let Some(target) = self.access(&dst) else {
            out.push(assign(dst, src));
            return;
        };

        let source = match &src {
            Rvalue::Use(Operand::Local(local)) | Rvalue::Cast(_, Operand::Local(local)) => {
                self.access(&Place::Local(*local))
            }
            Rvalue::Read(place) => self.access(place),
            _ => None,
        };

        let rewritten: Option<(Vec<Stmt>, bool)> = match (&src, source) {
            (_, Some(source)) => {
                let loads = matches!(&src, Rvalue::Read(Place::Field(_) | Place::Index { .. }));
                Some((copy_all(&target, &source), loads))
            }
            (Rvalue::Use(Operand::Null) | Rvalue::Cast(_, Operand::Null), None) => Some((clear(&target), false)),
            (Rvalue::NewBox { args, .. }, None) => {
                let values = if args.len() == target.desc.slots.len() {
                    args.clone()
                } else {
                    target.slots().map(|(leaf, _)| leaf.default_operand()).collect()
                };
                Some((fill(&target, values), false))
            }
            (Rvalue::Singleton { payload, .. }, None) => {
                let values = if payload.len() == target.desc.slots.len() {
                    payload.iter().cloned().map(Operand::Const).collect()
                } else {
                    target.slots().map(|(leaf, _)| leaf.default_operand()).collect()
                };
                Some((fill(&target, values), false))
            }
            (Rvalue::NewArray { len, .. }, None) if target.is_array_ref() => Some((allocate_arrays(&target, len), false)),
            _ => None,
        };

        match rewritten {
            Some((stmts, loads)) => {
                tracing::trace!("rewrote assignment to {:?}", dst);
                self.rewritten += 1;
                let neutralized = assign(dst, Rvalue::null());
                if loads {
                    out.push(neutralized);
                    out.extend(stmts);
                } else {
                    out.extend(stmts);
                    out.push(neutralized);
                }
            }
            None => out.push(assign(dst, src)),
        }
    }

    fn rvalue(&mut self, src: Rvalue) -> Rvalue {
        match src {
            Rvalue::Read(place) => match self.slot_place(&place) {
                Some(slot) => {
                    self.rewritten += 1;
                    load(slot)
                }
                None => Rvalue::Read(place),
            },
            Rvalue::Length(array) => match self.descriptor(array).and_then(|desc| desc.shadow.local()) {
                Some(shadow) => {
                    self.rewritten += 1;
                    Rvalue::Length(shadow)
                }
                None => Rvalue::Length(array),
            },
            Rvalue::Compare { op, lhs, rhs } => self.compare(op, lhs, rhs),
            other => other,
        }
    }

    /// `x == null` tests the presence flag instead
    fn compare(&mut self, op: CmpOp, lhs: Operand, rhs: Operand) -> Rvalue {
        let tested = match (&lhs, &rhs) {
            (Operand::Local(local), Operand::Null) | (Operand::Null, Operand::Local(local))
                if matches!(op, CmpOp::Eq | CmpOp::Ne) =>
            {
                self.descriptor(*local)
            }
            _ => None,
        };
        let Some(desc) = tested else {
            return Rvalue::Compare { op, lhs, rhs };
        };
        let Some(shadow) = desc.shadow.local() else {
            return Rvalue::Compare { op, lhs, rhs };
        };
        self.rewritten += 1;
        if desc.dims > 0 {
            return Rvalue::Compare {
                op,
                lhs: Operand::Local(shadow),
                rhs: Operand::Null,
            };
        }
        match op {
            CmpOp::Eq => Rvalue::Not(Operand::Local(shadow)),
            _ => Rvalue::Use(Operand::Local(shadow)),
        }
    }

    /// One array copy per presence and slot array
    fn arraycopy(&self, call: &Call) -> Option<Vec<Stmt>> {
        let (src, src_pos, dst, dst_pos, len) = call.as_arraycopy()?;
        let (src, dst) = (self.descriptor(src)?, self.descriptor(dst)?);
        if !src.is_local() || !dst.is_local() || src.slots.len() != dst.slots.len() {
            return None;
        }
        let pairs = std::iter::once((src.shadow, dst.shadow)).chain(
            src.slots
                .iter()
                .zip(dst.slots.iter())
                .map(|((_, from), (_, to))| (*from, *to)),
        );
        pairs
            .map(|(from, to)| {
                Some(Stmt::Call(Call::arraycopy(
                    from.local()?,
                    src_pos.clone(),
                    to.local()?,
                    dst_pos.clone(),
                    len.clone(),
                )))
            })
            .collect()
    }
}

fn copy_all(target: &Access<'_>, source: &Access<'_>) -> Vec<Stmt> {
    let mut stmts = vec![assign(target.shadow(), load(source.shadow()))];
    for ((_, to), (_, from)) in target.slots().zip(source.slots()) {
        stmts.push(assign(to, load(from)));
    }
    stmts
}

fn fill(target: &Access<'_>, values: Vec<Operand>) -> Vec<Stmt> {
    let mut stmts = vec![assign(target.shadow(), Rvalue::Use(Operand::Const(Constant::Bool(true))))];
    for ((_, slot), value) in target.slots().zip(values) {
        stmts.push(assign(slot, Rvalue::Use(value)));
    }
    stmts
}

fn clear(target: &Access<'_>) -> Vec<Stmt> {
    if target.is_array_ref() {
        let mut stmts = vec![assign(target.shadow(), Rvalue::null())];
        stmts.extend(target.slots().map(|(_, slot)| assign(slot, Rvalue::null())));
        return stmts;
    }
    let mut stmts = vec![assign(target.shadow(), Rvalue::Use(Operand::bool(false)))];
    stmts.extend(
        target
            .slots()
            .map(|(leaf, slot)| assign(slot, Rvalue::Use(leaf.default_operand()))),
    );
    stmts
}

fn allocate_arrays(target: &Access<'_>, len: &Operand) -> Vec<Stmt> {
    let dims = target.desc.dims - 1;
    let mut stmts = vec![assign(
        target.shadow(),
        Rvalue::NewArray {
            elem: Ty::Bool.with_dims(dims),
            len: len.clone(),
        },
    )];
    for (leaf, slot) in target.slots() {
        stmts.push(assign(
            slot,
            Rvalue::NewArray {
                elem: leaf.ty.clone().with_dims(dims),
                len: len.clone(),
            },
        ));
    }
    stmts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unbox::eligibility::Target;
    use crate::unbox::layout::Layout;
    use crate::ir::ProgramBuilder;

    fn plan_of(entities: &[(Entity, Kind, usize)]) -> ReplacementPlan {
        let mut plan = ReplacementPlan::default();
        for (entity, kind, dims) in entities {
            let layout = Layout::of(kind).unwrap().unwrap();
            plan.targets.insert(
                *entity,
                Target {
                    kind: kind.clone(),
                    layout,
                    dims: *dims,
                },
            );
        }
        plan
    }

    #[test]
    fn test_allocate_names_and_retires() {
        let mut builder = ProgramBuilder::new();
        let field = builder.field("state", Ty::Boxed(Kind::Unknown));
        let mut program = builder.build();
        let plan = plan_of(&[(Entity::Field(field), Kind::Complex, 0)]);

        let replacements = allocate(&mut program, &plan);
        let desc = &replacements[&Entity::Field(field)];
        assert!(program.field(field).retired);
        assert_eq!(program.field_named("state_present"), Some(FieldId(1)));
        assert_eq!(desc.slot("real"), Some(Storage::Field(FieldId(2))));
        assert_eq!(desc.slot("imag"), Some(Storage::Field(FieldId(3))));
        assert_eq!(program.field(FieldId(3)).ty, Ty::Double);
    }

    #[test]
    fn test_null_compare_becomes_flag_test() {
        let mut builder = ProgramBuilder::new();
        let func = builder.function("fire", |f| {
            let x = f.local("x", Ty::Boxed(Kind::Unknown));
            let b = f.local("b", Ty::Bool);
            f.assign(b, Rvalue::is_null(x));
        });
        let mut program = builder.build();
        let plan = plan_of(&[(Entity::Local(func, LocalId(0)), Kind::Int, 0)]);
        let replacements = allocate(&mut program, &plan);
        let rewritten = rewrite_program(&mut program, &replacements);

        assert_eq!(rewritten, 1);
        assert_eq!(
            program.function(func).body[0],
            Stmt::Assign {
                dst: Place::Local(LocalId(1)),
                src: Rvalue::Not(Operand::Local(LocalId(2))),
            }
        );
    }

    #[test]
    fn test_new_box_fills_slots_then_neutralizes() {
        let mut builder = ProgramBuilder::new();
        let func = builder.function("fire", |f| {
            let x = f.local("x", Ty::Boxed(Kind::Unknown));
            f.assign(x, Rvalue::new_box(Kind::Int, vec![Operand::int(7)]));
        });
        let mut program = builder.build();
        let plan = plan_of(&[(Entity::Local(func, LocalId(0)), Kind::Int, 0)]);
        let replacements = allocate(&mut program, &plan);
        rewrite_program(&mut program, &replacements);

        let body = &program.function(func).body;
        assert_eq!(body.len(), 3);
        assert_eq!(body[0], assign(Place::Local(LocalId(1)), Rvalue::Use(Operand::bool(true))));
        assert_eq!(body[1], assign(Place::Local(LocalId(2)), Rvalue::Use(Operand::int(7))));
        assert_eq!(body[2], assign(Place::Local(LocalId(0)), Rvalue::null()));
    }

    #[test]
    fn test_array_store_copies_into_element_slots() {
        let mut builder = ProgramBuilder::new();
        let func = builder.function("fire", |f| {
            let a = f.local("a", Ty::array(Ty::Boxed(Kind::Unknown)));
            let x = f.local("x", Ty::Boxed(Kind::Unknown));
            let i = f.local("i", Ty::Int);
            f.assign(Place::index(a, i), x);
        });
        let mut program = builder.build();
        let plan = plan_of(&[
            (Entity::Local(func, LocalId(0)), Kind::Double, 1),
            (Entity::Local(func, LocalId(1)), Kind::Double, 0),
        ]);
        let replacements = allocate(&mut program, &plan);
        rewrite_program(&mut program, &replacements);

        let function = program.function(func);
        assert_eq!(function.local_ty(LocalId(3)), &Ty::array(Ty::Bool));
        assert_eq!(function.local_ty(LocalId(4)), &Ty::array(Ty::Double));
        assert_eq!(
            function.body[0],
            assign(Place::index(LocalId(3), LocalId(2)), Rvalue::Use(Operand::Local(LocalId(5))))
        );
        assert_eq!(
            function.body[1],
            assign(Place::index(LocalId(4), LocalId(2)), Rvalue::Use(Operand::Local(LocalId(6))))
        );
        assert_eq!(function.body[2], assign(Place::index(LocalId(0), LocalId(2)), Rvalue::null()));
    }

    #[test]
    fn test_slot_access_redirects_to_storage() {
        let mut builder = ProgramBuilder::new();
        let func = builder.function("fire", |f| {
            let x = f.local("x", Ty::Boxed(Kind::Unknown));
            let re = f.local("re", Ty::Double);
            f.assign(re, Rvalue::read(Place::slot(x, "real")));
        });
        let mut program = builder.build();
        let plan = plan_of(&[(Entity::Local(func, LocalId(0)), Kind::Complex, 0)]);
        let replacements = allocate(&mut program, &plan);
        rewrite_program(&mut program, &replacements);

        assert_eq!(
            program.function(func).body[0],
            assign(Place::Local(LocalId(1)), Rvalue::Use(Operand::Local(LocalId(3))))
        );
    }
}
