//! Incremental construction of programs
//!
//! Used by the test suites and by embedders that produce programs
//! directly instead of loading them from JSON.

use super::{
    Call, FieldDecl, FieldId, Function, FunctionId, LocalDecl, LocalId, Operand, Place, Program, Quantity,
    QuantityId, Rvalue, Stmt, Ty,
};
use crate::specialize::Kind;

#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(&mut self, name: &str, ty: Ty) -> FieldId {
        self.program.add_field(FieldDecl {
            name: name.to_string(),
            ty,
            hint: None,
            retired: false,
        })
    }

    /// Field whose kind an earlier pass already pinned
    pub fn hinted_field(&mut self, name: &str, ty: Ty, hint: Kind) -> FieldId {
        self.program.add_field(FieldDecl {
            name: name.to_string(),
            ty,
            hint: Some(hint),
            retired: false,
        })
    }

    pub fn quantity(&mut self, name: &str, kind: Kind) -> QuantityId {
        self.program.quantities.push(Quantity {
            name: name.to_string(),
            kind,
        });
        QuantityId(self.program.quantities.len() - 1)
    }

    pub fn function(&mut self, name: &str, build: impl FnOnce(&mut FunctionBuilder)) -> FunctionId {
        let mut builder = FunctionBuilder::new(name);
        build(&mut builder);
        self.program.functions.push(builder.finish());
        FunctionId(self.program.functions.len() - 1)
    }

    pub fn build(self) -> Program {
        self.program
    }
}

/// Builds one function body; nested blocks are opened by closures
#[derive(Debug)]
pub struct FunctionBuilder {
    function: Function,
    blocks: Vec<Vec<Stmt>>,
}

impl FunctionBuilder {
    fn new(name: &str) -> Self {
        Self {
            function: Function {
                name: name.to_string(),
                locals: Vec::new(),
                body: Vec::new(),
            },
            blocks: vec![Vec::new()],
        }
    }

    pub fn local(&mut self, name: &str, ty: Ty) -> LocalId {
        self.function.add_local(LocalDecl {
            name: name.to_string(),
            ty,
            retired: false,
        })
    }

    pub fn push(&mut self, stmt: Stmt) {
        if let Some(block) = self.blocks.last_mut() {
            block.push(stmt);
        }
    }

    pub fn assign(&mut self, dst: impl Into<Place>, src: impl Into<Rvalue>) {
        self.push(Stmt::Assign {
            dst: dst.into(),
            src: src.into(),
        });
    }

    pub fn call(&mut self, call: Call) {
        self.push(Stmt::Call(call));
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        self.push(Stmt::Return(value));
    }

    pub fn if_else(
        &mut self,
        cond: Rvalue,
        then_body: impl FnOnce(&mut Self),
        else_body: impl FnOnce(&mut Self),
    ) {
        let then_body = self.block(then_body);
        let else_body = self.block(else_body);
        self.push(Stmt::If {
            cond,
            then_body,
            else_body,
        });
    }

    pub fn if_then(&mut self, cond: Rvalue, then_body: impl FnOnce(&mut Self)) {
        self.if_else(cond, then_body, |_| {});
    }

    pub fn while_loop(&mut self, cond: Rvalue, body: impl FnOnce(&mut Self)) {
        let body = self.block(body);
        self.push(Stmt::While { cond, body });
    }

    fn block(&mut self, build: impl FnOnce(&mut Self)) -> Vec<Stmt> {
        self.blocks.push(Vec::new());
        build(self);
        self.blocks.pop().unwrap_or_default()
    }

    fn finish(mut self) -> Function {
        self.function.body = self.blocks.pop().unwrap_or_default();
        self.function
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_blocks_land_in_parent() {
        let mut builder = ProgramBuilder::new();
        let func = builder.function("fire", |f| {
            let x = f.local("x", Ty::Boxed(Kind::Unknown));
            f.if_else(
                Rvalue::is_null(x),
                |f| f.assign(x, Rvalue::new_box(Kind::Int, vec![Operand::int(1)])),
                |f| f.ret(None),
            );
            f.ret(Some(Operand::Local(x)));
        });
        let program = builder.build();
        let body = &program.function(func).body;
        assert_eq!(body.len(), 2);
        match &body[0] {
            Stmt::If {
                then_body, else_body, ..
            } => {
                assert_eq!(then_body.len(), 1);
                assert_eq!(else_body, &vec![Stmt::Return(None)]);
            }
            other => panic!("expected if, got {:?}", other),
        }
    }
}
