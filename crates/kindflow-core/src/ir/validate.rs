//! Id resolution checks for programs read from outside

use super::{Call, Function, LocalId, Operand, Place, Program, Rvalue, Stmt};
use crate::error::{Result, UnboxError};

impl Program {
    /// Check that every local, field and quantity id used in a body refers
    /// to a declaration. Everything downstream indexes by id.
    pub fn validate(&self) -> Result<()> {
        for function in &self.functions {
            let checker = Checker {
                program: self,
                function,
            };
            checker
                .block(&function.body)
                .map_err(|reason| UnboxError::InvalidProgram(format!("in function {}: {}", function.name, reason)))?;
        }
        Ok(())
    }
}

type Check = std::result::Result<(), String>;

struct Checker<'p> {
    program: &'p Program,
    function: &'p Function,
}

impl Checker<'_> {
    fn block(&self, body: &[Stmt]) -> Check {
        body.iter().try_for_each(|stmt| self.stmt(stmt))
    }

    fn stmt(&self, stmt: &Stmt) -> Check {
        match stmt {
            Stmt::Assign { dst, src } => {
                self.place(dst)?;
                self.rvalue(src)
            }
            Stmt::Call(call) => self.call(call),
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                self.rvalue(cond)?;
                self.block(then_body)?;
                self.block(else_body)
            }
            Stmt::While { cond, body } => {
                self.rvalue(cond)?;
                self.block(body)
            }
            Stmt::Return(Some(operand)) => self.operand(operand),
            Stmt::Return(None) | Stmt::Nop => Ok(()),
        }
    }

    fn local(&self, local: LocalId) -> Check {
        if local.0 < self.function.locals.len() {
            Ok(())
        } else {
            Err(format!(
                "local #{} is not declared ({} locals)",
                local.0,
                self.function.locals.len()
            ))
        }
    }

    fn operand(&self, operand: &Operand) -> Check {
        match operand {
            Operand::Local(local) => self.local(*local),
            Operand::Const(_) | Operand::Null => Ok(()),
        }
    }

    fn operands<'o>(&self, operands: impl IntoIterator<Item = &'o Operand>) -> Check {
        operands.into_iter().try_for_each(|operand| self.operand(operand))
    }

    fn place(&self, place: &Place) -> Check {
        match place {
            Place::Local(local) | Place::Slot { base: local, .. } => self.local(*local),
            Place::Field(field) if field.0 >= self.program.fields.len() => {
                Err(format!("field #{} is not declared", field.0))
            }
            Place::Field(_) => Ok(()),
            Place::Index { base, index } => {
                self.local(*base)?;
                self.operand(index)
            }
        }
    }

    fn call(&self, call: &Call) -> Check {
        if let Call::Method { receiver, .. } = call {
            self.local(*receiver)?;
        }
        self.operands(call.args())
    }

    fn rvalue(&self, src: &Rvalue) -> Check {
        match src {
            Rvalue::Read(place) => self.place(place),
            Rvalue::Length(local) => self.local(*local),
            Rvalue::Call(call) => self.call(call),
            Rvalue::Quantity(id) if id.0 >= self.program.quantities.len() => {
                Err(format!("quantity #{} is not declared", id.0))
            }
            other => self.operands(other.operands()),
        }
    }
}
