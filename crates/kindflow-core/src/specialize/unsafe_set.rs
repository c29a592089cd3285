//! Entities whose value cannot be determined statically
//!
//! A local defined by a dynamic `Evaluate` is unsafe, and so is anything
//! written from an unsafe value: locals, fields and the arrays behind
//! element stores, through copies, casts, reads and call results. Unsafe
//! entities get no term and keep their declared kind.

use crate::ir::{visit_stmts, Call, Entity, FunctionId, Operand, Place, Program, Rvalue, Stmt};
use indexmap::IndexSet;

#[derive(Debug, Clone, Default)]
pub struct UnsafeSet {
    entities: IndexSet<Entity>,
}

impl UnsafeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the unsafe closure of `program`, starting from `seed`.
    ///
    /// Fields connect functions, so the closure runs over the whole
    /// program until no function adds anything.
    pub fn compute(program: &Program, seed: impl IntoIterator<Item = Entity>) -> Self {
        let mut set = Self {
            entities: seed.into_iter().collect(),
        };
        loop {
            let mut changed = false;
            for (fid, function) in program.function_ids() {
                visit_stmts(&function.body, &mut |stmt| {
                    let tainted = match stmt {
                        Stmt::Assign { dst, src } if set.taints(fid, src) => written(fid, dst),
                        Stmt::Call(call) => match call.as_arraycopy() {
                            Some((src, _, dst, _, _)) if set.contains(&Entity::Local(fid, src)) => {
                                Some(Entity::Local(fid, dst))
                            }
                            _ => None,
                        },
                        _ => None,
                    };
                    if let Some(entity) = tainted {
                        if set.entities.insert(entity) {
                            tracing::debug!("{} is statically undeterminable", program.describe(&entity));
                            changed = true;
                        }
                    }
                });
            }
            if !changed {
                break;
            }
        }
        set
    }

    fn taints(&self, fid: FunctionId, src: &Rvalue) -> bool {
        let unsafe_local = |local| self.contains(&Entity::Local(fid, local));
        match src {
            Rvalue::Evaluate(_) => true,
            Rvalue::Use(Operand::Local(local)) | Rvalue::Cast(_, Operand::Local(local)) => unsafe_local(*local),
            Rvalue::Read(Place::Local(local))
            | Rvalue::Read(Place::Index { base: local, .. })
            | Rvalue::Read(Place::Slot { base: local, .. }) => unsafe_local(*local),
            Rvalue::Read(Place::Field(field)) => self.contains(&Entity::Field(*field)),
            Rvalue::Call(call) => {
                let receiver = match call {
                    Call::Method { receiver, .. } => unsafe_local(*receiver),
                    Call::Static { .. } => false,
                };
                receiver || call.args().iter().filter_map(Operand::as_local).any(unsafe_local)
            }
            _ => false,
        }
    }

    pub fn insert(&mut self, entity: Entity) -> bool {
        self.entities.insert(entity)
    }

    pub fn contains(&self, entity: &Entity) -> bool {
        self.entities.contains(entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }
}

/// Entity whose value an assignment to `dst` changes
fn written(fid: FunctionId, dst: &Place) -> Option<Entity> {
    match dst {
        Place::Local(local) | Place::Index { base: local, .. } => Some(Entity::Local(fid, *local)),
        Place::Field(field) => Some(Entity::Field(*field)),
        Place::Slot { .. } => None,
    }
}
