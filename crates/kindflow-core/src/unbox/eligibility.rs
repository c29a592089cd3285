//! Which entities can be replaced at a given depth
//!
//! An entity is a candidate when its specialized kind is concrete, has the
//! target depth and a flat layout. Candidates are then grouped into
//! families of entities that hand boxes to each other (copies, loads,
//! stores, element moves, array copies). A family is replaced as a whole
//! or not at all: every member must be a candidate of the same kind and
//! no member may escape into a construct the rewriter cannot express
//! (call receivers and arguments, returns, dynamic evaluation, stores
//! into a live box, comparisons other than against null).

use super::layout::Layout;
use crate::error::{Result, ShapeIssue, UnboxError};
use crate::ir::{
    visit_stmts, Call, CmpOp, Entity, Function, FunctionId, LocalId, Operand, Place, Program, Rvalue, Stmt,
};
use crate::specialize::{AnalysisContext, Kind};
use indexmap::{IndexMap, IndexSet};
use std::ops::RangeInclusive;

/// One entity selected for replacement
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub kind: Kind,
    pub layout: Layout,
    /// Array dimensions of the original storage
    pub dims: usize,
}

#[derive(Debug, Default)]
pub struct ReplacementPlan {
    pub depth: usize,
    pub targets: IndexMap<Entity, Target>,
    /// Candidates left boxed because their family did not qualify
    pub kept: Vec<Entity>,
}

/// Select the entities to replace at `depth`. Fails before anything is
/// rewritten if a candidate has a shape the rewriter cannot address.
pub fn plan(program: &Program, cx: &AnalysisContext, depth: usize) -> Result<ReplacementPlan> {
    let candidates = candidates(program, cx, depth)?;
    let mut families = Families::scan(program);
    let mut by_root: IndexMap<usize, Vec<Entity>> = IndexMap::new();
    for entity in candidates.keys() {
        let id = families.id(*entity);
        by_root.entry(families.find(id)).or_default().push(*entity);
    }

    let mut plan = ReplacementPlan {
        depth,
        ..ReplacementPlan::default()
    };
    for (root, members) in by_root {
        let family = families.members(root);
        match family_blocker(&family, &candidates, &families) {
            None => {
                for entity in members {
                    if let Some(target) = candidates.get(&entity) {
                        plan.targets.insert(entity, target.clone());
                    }
                }
            }
            Some(reason) => {
                for entity in &members {
                    tracing::debug!("keeping {} boxed: {}", program.describe(entity), reason);
                }
                plan.kept.extend(members);
            }
        }
    }
    Ok(plan)
}

fn candidates(program: &Program, cx: &AnalysisContext, depth: usize) -> Result<IndexMap<Entity, Target>> {
    let mut candidates = IndexMap::new();
    for entity in cx.entities() {
        if let Some(target) = target_for(program, cx, entity, depth..=depth)? {
            candidates.insert(*entity, target);
        }
    }
    Ok(candidates)
}

/// Fail if any entity a run down from `max_depth` would consider has a
/// shape the rewriter cannot address. Runs before the first rewrite.
pub fn check_shapes(program: &Program, cx: &AnalysisContext, max_depth: usize) -> Result<()> {
    for entity in cx.entities() {
        target_for(program, cx, entity, 1..=max_depth)?;
    }
    Ok(())
}

/// Replacement target for `entity` when its specialized kind falls in
/// `depths` and is concrete
fn target_for(
    program: &Program,
    cx: &AnalysisContext,
    entity: &Entity,
    depths: RangeInclusive<usize>,
) -> Result<Option<Target>> {
    if matches!(entity, Entity::Alloc(..)) || cx.is_unsafe(entity) || is_retired(program, entity) {
        return Ok(None);
    }
    let Some(ty) = program.entity_ty(entity) else {
        return Ok(None);
    };
    let kind = cx.specialized_kind(entity)?;
    if !depths.contains(&kind.depth()) || !kind.is_instantiable() {
        return Ok(None);
    }
    let dims = ty.array_dims();
    let layout = match Layout::of(&kind) {
        Ok(Some(layout)) => layout,
        Ok(None) => return Ok(None),
        Err(issue) => {
            return Err(UnboxError::UnsupportedShape {
                entity: program.describe(entity),
                kind,
                issue,
            })
        }
    };
    if dims > 1 {
        return Err(UnboxError::UnsupportedShape {
            entity: program.describe(entity),
            kind,
            issue: ShapeIssue::NestedArray,
        });
    }
    Ok(Some(Target { kind, layout, dims }))
}

fn is_retired(program: &Program, entity: &Entity) -> bool {
    match entity {
        Entity::Field(id) => program.field(*id).retired,
        Entity::Local(func, local) => program.function(*func).local(*local).retired,
        Entity::Alloc(..) => false,
    }
}

fn family_blocker(family: &[Entity], candidates: &IndexMap<Entity, Target>, families: &Families) -> Option<String> {
    if family.len() > 1 && family.iter().any(|entity| families.slot_written.contains(entity)) {
        return Some("a shared box is mutated in place".to_string());
    }
    let mut kind: Option<&Kind> = None;
    for entity in family {
        if families.escaped.contains(entity) {
            return Some("its value escapes".to_string());
        }
        let Some(target) = candidates.get(entity) else {
            return Some("it exchanges boxes with storage that stays boxed".to_string());
        };
        match kind {
            None => kind = Some(&target.kind),
            Some(seen) if *seen != target.kind => {
                return Some(format!("its family mixes kinds {} and {}", seen, target.kind));
            }
            Some(_) => {}
        }
    }
    None
}

/// Union-find over box-carrying entities plus the set that escapes
#[derive(Debug, Default)]
struct Families {
    index: IndexMap<Entity, usize>,
    parent: Vec<usize>,
    escaped: IndexSet<Entity>,
    /// Boxes mutated in place through `x.leaf = v`
    slot_written: IndexSet<Entity>,
}

impl Families {
    fn scan(program: &Program) -> Self {
        let mut families = Self::default();
        for (function_id, function) in program.function_ids() {
            let mut scanner = FlowScanner {
                program,
                function_id,
                function,
                families: &mut families,
            };
            visit_stmts(&function.body, &mut |stmt| scanner.scan(stmt));
        }
        families
    }

    fn id(&mut self, entity: Entity) -> usize {
        if let Some(&id) = self.index.get(&entity) {
            return id;
        }
        let id = self.parent.len();
        self.parent.push(id);
        self.index.insert(entity, id);
        id
    }

    fn find(&self, mut id: usize) -> usize {
        while self.parent[id] != id {
            id = self.parent[id];
        }
        id
    }

    fn union(&mut self, a: Entity, b: Entity) {
        let (a, b) = (self.id(a), self.id(b));
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[high] = low;
        }
    }

    /// Every entity in the family rooted at `root`
    fn members(&self, root: usize) -> Vec<Entity> {
        self.index
            .iter()
            .filter(|(_, &id)| self.find(id) == root)
            .map(|(entity, _)| *entity)
            .collect()
    }
}

struct FlowScanner<'a> {
    program: &'a Program,
    function_id: FunctionId,
    function: &'a Function,
    families: &'a mut Families,
}

impl FlowScanner<'_> {
    fn box_local(&self, local: LocalId) -> Option<Entity> {
        self.function
            .local_ty(local)
            .is_boxed()
            .then_some(Entity::Local(self.function_id, local))
    }

    fn box_operand(&self, operand: &Operand) -> Option<Entity> {
        operand.as_local().and_then(|local| self.box_local(local))
    }

    /// Entity whose boxes a place reads or writes; element places map to
    /// their array
    fn box_place(&self, place: &Place) -> Option<Entity> {
        match place {
            Place::Local(local) => self.box_local(*local),
            Place::Field(field) => self
                .program
                .field(*field)
                .ty
                .is_boxed()
                .then_some(Entity::Field(*field)),
            Place::Index { base, .. } => self
                .function
                .local_ty(*base)
                .element()
                .is_some_and(|elem| elem.is_boxed())
                .then_some(Entity::Local(self.function_id, *base)),
            Place::Slot { .. } => None,
        }
    }

    fn escape(&mut self, entity: Option<Entity>) {
        if let Some(entity) = entity {
            self.families.id(entity);
            self.families.escaped.insert(entity);
        }
    }

    fn escape_operands<'o>(&mut self, operands: impl IntoIterator<Item = &'o Operand>) {
        for operand in operands {
            let entity = self.box_operand(operand);
            self.escape(entity);
        }
    }

    fn link(&mut self, a: Option<Entity>, b: Option<Entity>) {
        match (a, b) {
            (Some(a), Some(b)) => self.families.union(a, b),
            (one, other) => {
                self.escape(one);
                self.escape(other);
            }
        }
    }

    fn scan(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assign { dst, src } => self.scan_assign(dst, src),
            Stmt::Call(call) => match call.as_arraycopy() {
                Some((src, _, dst, _, _)) => {
                    let (src, dst) = (self.box_local(src), self.box_local(dst));
                    if src.is_some() || dst.is_some() {
                        self.link(src, dst);
                    }
                }
                None => self.escape_call(call),
            },
            Stmt::If { cond, .. } | Stmt::While { cond, .. } => self.scan_condition(cond),
            Stmt::Return(Some(operand)) => {
                let entity = self.box_operand(operand);
                self.escape(entity);
            }
            Stmt::Return(None) | Stmt::Nop => {}
        }
    }

    fn scan_assign(&mut self, dst: &Place, src: &Rvalue) {
        if let Place::Slot { base, .. } = dst {
            if let Some(entity) = self.box_local(*base) {
                self.families.id(entity);
                self.families.slot_written.insert(entity);
            }
        }
        let target = self.box_place(dst);
        match src {
            Rvalue::Use(Operand::Local(local)) | Rvalue::Cast(_, Operand::Local(local)) => {
                let source = self.box_local(*local);
                if target.is_some() || source.is_some() {
                    self.link(target, source);
                }
            }
            Rvalue::Read(Place::Slot { .. }) => self.escape(target),
            Rvalue::Read(place) => {
                let source = self.box_place(place);
                if target.is_some() || source.is_some() {
                    self.link(target, source);
                }
            }
            Rvalue::Use(_)
            | Rvalue::Cast(..)
            | Rvalue::Singleton { .. }
            | Rvalue::NewArray { .. }
            | Rvalue::Length(_) => {}
            Rvalue::NewBox { args, .. } => self.escape_operands(args),
            Rvalue::Compare { op, lhs, rhs } => self.scan_compare(*op, lhs, rhs),
            Rvalue::Call(call) => {
                self.escape_call(call);
                self.escape(target);
            }
            Rvalue::Evaluate(_) | Rvalue::Quantity(_) | Rvalue::Binary { .. } | Rvalue::Not(_) => {
                self.escape_operands(src.operands());
                self.escape(target);
            }
        }
    }

    fn scan_condition(&mut self, cond: &Rvalue) {
        match cond {
            Rvalue::Compare { op, lhs, rhs } => self.scan_compare(*op, lhs, rhs),
            Rvalue::Call(call) => self.escape_call(call),
            other => self.escape_operands(other.operands()),
        }
    }

    /// Only null tests have a shadow-flag rewrite
    fn scan_compare(&mut self, op: CmpOp, lhs: &Operand, rhs: &Operand) {
        let null_test = matches!(op, CmpOp::Eq | CmpOp::Ne)
            && matches!((lhs, rhs), (Operand::Local(_), Operand::Null) | (Operand::Null, Operand::Local(_)));
        if !null_test {
            self.escape_operands([lhs, rhs]);
        }
    }

    fn escape_call(&mut self, call: &Call) {
        if let Call::Method { receiver, .. } = call {
            let entity = self.box_local(*receiver);
            self.escape(entity);
        }
        self.escape_operands(call.args());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnboxConfig;
    use crate::ir::{ProgramBuilder, Ty};
    use crate::specialize::{analyze, RuleRegistry};

    fn plan_for(program: &Program, depth: usize) -> Result<ReplacementPlan> {
        let cx = analyze(program, &RuleRegistry::new(), &UnboxConfig::default(), []);
        plan(program, &cx, depth)
    }

    #[test]
    fn test_copy_family_replaced_together() {
        let mut builder = ProgramBuilder::new();
        builder.function("fire", |f| {
            let x = f.local("x", Ty::Boxed(Kind::Unknown));
            let y = f.local("y", Ty::Boxed(Kind::Unknown));
            f.assign(x, Rvalue::new_box(Kind::Int, vec![Operand::int(1)]));
            f.assign(y, x);
        });
        let plan = plan_for(&builder.build(), 1).unwrap();
        assert_eq!(plan.targets.len(), 2);
        assert!(plan.kept.is_empty());
    }

    #[test]
    fn test_escape_blocks_whole_family() {
        let mut builder = ProgramBuilder::new();
        let port = builder.quantity("output", Kind::Int);
        builder.function("fire", |f| {
            let out = f.local("out", Ty::Handle);
            let x = f.local("x", Ty::Boxed(Kind::Unknown));
            let y = f.local("y", Ty::Boxed(Kind::Unknown));
            f.assign(out, Rvalue::Quantity(port));
            f.assign(x, Rvalue::new_box(Kind::Int, vec![Operand::int(1)]));
            f.assign(y, x);
            f.call(Call::method(out, "broadcast", vec![Operand::Local(y)]));
        });
        let plan = plan_for(&builder.build(), 1).unwrap();
        assert!(plan.targets.is_empty());
        assert_eq!(plan.kept.len(), 2);
    }

    #[test]
    fn test_mixed_kinds_are_kept() {
        let mut builder = ProgramBuilder::new();
        builder.function("fire", |f| {
            let x = f.local("x", Ty::Boxed(Kind::Unknown));
            let y = f.local("y", Ty::Boxed(Kind::Unknown));
            f.assign(x, Rvalue::new_box(Kind::Int, vec![Operand::int(1)]));
            f.assign(y, x);
            f.assign(y, Rvalue::new_box(Kind::Double, vec![Operand::double(1.0)]));
        });
        let program = builder.build();
        let plan = plan_for(&program, 1).unwrap();
        // y widens to scalar, which has no box class, so x is left alone too
        assert!(plan.targets.is_empty());
    }

    #[test]
    fn test_record_candidate_is_fatal() {
        let mut builder = ProgramBuilder::new();
        builder.function("fire", |f| {
            let r = f.local("r", Ty::Boxed(Kind::Unknown));
            f.assign(
                r,
                Rvalue::new_box(Kind::record([("a", Kind::Int)]), vec![Operand::int(1)]),
            );
        });
        let err = plan_for(&builder.build(), 2).unwrap_err();
        assert!(matches!(
            err,
            UnboxError::UnsupportedShape {
                issue: ShapeIssue::Record,
                ..
            }
        ));
    }

    #[test]
    fn test_nested_box_arrays_are_fatal() {
        let mut builder = ProgramBuilder::new();
        builder.function("fire", |f| {
            let grid = f.local("grid", Ty::Boxed(Kind::Unknown).with_dims(2));
            let row = f.local("row", Ty::Boxed(Kind::Unknown).with_dims(1));
            f.assign(
                row,
                Rvalue::NewArray {
                    elem: Ty::Boxed(Kind::Unknown),
                    len: Operand::int(2),
                },
            );
            f.assign(Place::index(row, Operand::int(0)), Rvalue::new_box(Kind::Int, vec![Operand::int(1)]));
            f.assign(Place::index(grid, Operand::int(0)), row);
        });
        let err = plan_for(&builder.build(), 1).unwrap_err();
        assert!(matches!(
            err,
            UnboxError::UnsupportedShape {
                issue: ShapeIssue::NestedArray,
                ..
            }
        ));
    }

    #[test]
    fn test_check_shapes_covers_every_depth_up_to_the_cap() {
        let mut builder = ProgramBuilder::new();
        builder.function("fire", |f| {
            let x = f.local("x", Ty::Boxed(Kind::Unknown));
            let r = f.local("r", Ty::Boxed(Kind::Unknown));
            f.assign(x, Rvalue::new_box(Kind::array(Kind::array(Kind::Int)), vec![]));
            f.assign(
                r,
                Rvalue::new_box(Kind::record([("a", Kind::Int)]), vec![Operand::int(1)]),
            );
        });
        let program = builder.build();
        let cx = analyze(&program, &RuleRegistry::new(), &UnboxConfig::default(), []);
        // the record sits below the depth-3 box, so the depth-3 plan alone is clean
        assert!(plan(&program, &cx, 3).is_ok());
        assert!(check_shapes(&program, &cx, 1).is_ok());
        assert!(matches!(
            check_shapes(&program, &cx, 3),
            Err(UnboxError::UnsupportedShape {
                issue: ShapeIssue::Record,
                ..
            })
        ));
    }
}
