//! Removal of neutralized statements

use crate::ir::{Operand, Place, Program, Rvalue, Stmt};

/// Delete every `retired = null` left behind by the rewriter, including
/// inside nested blocks. Empty branches are kept. Returns the number of
/// statements removed.
pub fn remove_neutralized(program: &mut Program) -> usize {
    let retired_fields: Vec<bool> = program.fields.iter().map(|field| field.retired).collect();
    let mut removed = 0;
    for function in &mut program.functions {
        let retired_locals: Vec<bool> = function.locals.iter().map(|local| local.retired).collect();
        let is_retired = |place: &Place| match place {
            Place::Local(local) | Place::Index { base: local, .. } => retired_locals[local.0],
            Place::Field(field) => retired_fields[field.0],
            Place::Slot { .. } => false,
        };
        removed += retain(&mut function.body, &is_retired);
    }
    removed
}

fn retain(body: &mut Vec<Stmt>, is_retired: &impl Fn(&Place) -> bool) -> usize {
    let before = body.len();
    body.retain(|stmt| {
        !matches!(stmt, Stmt::Assign { dst, src: Rvalue::Use(Operand::Null) } if is_retired(dst))
    });
    let mut removed = before - body.len();
    for stmt in body.iter_mut() {
        match stmt {
            Stmt::If {
                then_body, else_body, ..
            } => {
                removed += retain(then_body, is_retired);
                removed += retain(else_body, is_retired);
            }
            Stmt::While { body, .. } => removed += retain(body, is_retired),
            _ => {}
        }
    }
    removed
}
