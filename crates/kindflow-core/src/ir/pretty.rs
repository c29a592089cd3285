//! Human-readable rendering of programs

use super::{BinOp, Call, CmpOp, Constant, Function, Operand, Place, Program, Rvalue, Stmt, Ty};
use std::fmt::{self, Display, Formatter, Write};

impl Display for Ty {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Bool => write!(f, "bool"),
            Ty::Byte => write!(f, "byte"),
            Ty::Int => write!(f, "int"),
            Ty::Long => write!(f, "long"),
            Ty::Double => write!(f, "double"),
            Ty::Str => write!(f, "string"),
            Ty::Handle => write!(f, "handle"),
            Ty::Boxed(kind) => write!(f, "Box<{}>", kind),
            Ty::Array(elem) => write!(f, "{}[]", elem),
        }
    }
}

impl Display for Constant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Byte(b) => write!(f, "{}ub", b),
            Constant::Int(i) => write!(f, "{}", i),
            Constant::Long(l) => write!(f, "{}L", l),
            Constant::Double(d) => write!(f, "{:?}", d),
            Constant::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

/// Name resolution for one function while printing
struct Printer<'a> {
    program: &'a Program,
    function: &'a Function,
}

impl Printer<'_> {
    fn operand(&self, op: &Operand) -> String {
        match op {
            Operand::Local(l) => self.function.local(*l).name.clone(),
            Operand::Const(c) => c.to_string(),
            Operand::Null => "null".to_string(),
        }
    }

    fn operands(&self, ops: &[Operand]) -> String {
        ops.iter().map(|op| self.operand(op)).collect::<Vec<_>>().join(", ")
    }

    fn place(&self, place: &Place) -> String {
        match place {
            Place::Local(l) => self.function.local(*l).name.clone(),
            Place::Field(id) => self.program.field(*id).name.clone(),
            Place::Index { base, index } => {
                format!("{}[{}]", self.function.local(*base).name, self.operand(index))
            }
            Place::Slot { base, slot } => format!("{}.{}", self.function.local(*base).name, slot),
        }
    }

    fn call(&self, call: &Call) -> String {
        match call {
            Call::Method {
                receiver,
                method,
                args,
            } => format!(
                "{}.{}({})",
                self.function.local(*receiver).name,
                method,
                self.operands(args)
            ),
            Call::Static { class, method, args } => {
                format!("{}.{}({})", class, method, self.operands(args))
            }
        }
    }

    fn rvalue(&self, rvalue: &Rvalue) -> String {
        match rvalue {
            Rvalue::Use(op) => self.operand(op),
            Rvalue::Read(place) => self.place(place),
            Rvalue::Cast(ty, op) => format!("({}) {}", ty, self.operand(op)),
            Rvalue::NewBox { kind, args } => format!("new Box<{}>({})", kind, self.operands(args)),
            Rvalue::Singleton { kind, payload } => format!(
                "singleton Box<{}>({})",
                kind,
                payload.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
            ),
            Rvalue::NewArray { elem, len } => format!("new {}[{}]", elem, self.operand(len)),
            Rvalue::Length(l) => format!("lengthof {}", self.function.local(*l).name),
            Rvalue::Call(call) => self.call(call),
            Rvalue::Evaluate(expr) => format!("evaluate({:?})", expr),
            Rvalue::Quantity(q) => format!("@{}", self.program.quantity(*q).name),
            Rvalue::Compare { op, lhs, rhs } => {
                format!("{} {} {}", self.operand(lhs), op.symbol(), self.operand(rhs))
            }
            Rvalue::Binary { op, lhs, rhs } => {
                format!("{} {} {}", self.operand(lhs), op.symbol(), self.operand(rhs))
            }
            Rvalue::Not(op) => format!("!{}", self.operand(op)),
        }
    }

    fn block(&self, out: &mut String, body: &[Stmt], indent: usize) -> fmt::Result {
        let pad = "    ".repeat(indent);
        for stmt in body {
            match stmt {
                Stmt::Assign { dst, src } => {
                    writeln!(out, "{}{} = {}", pad, self.place(dst), self.rvalue(src))?
                }
                Stmt::Call(call) => writeln!(out, "{}{}", pad, self.call(call))?,
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    writeln!(out, "{}if {} {{", pad, self.rvalue(cond))?;
                    self.block(out, then_body, indent + 1)?;
                    if !else_body.is_empty() {
                        writeln!(out, "{}}} else {{", pad)?;
                        self.block(out, else_body, indent + 1)?;
                    }
                    writeln!(out, "{}}}", pad)?;
                }
                Stmt::While { cond, body } => {
                    writeln!(out, "{}while {} {{", pad, self.rvalue(cond))?;
                    self.block(out, body, indent + 1)?;
                    writeln!(out, "{}}}", pad)?;
                }
                Stmt::Return(Some(op)) => writeln!(out, "{}return {}", pad, self.operand(op))?,
                Stmt::Return(None) => writeln!(out, "{}return", pad)?,
                Stmt::Nop => writeln!(out, "{}nop", pad)?,
            }
        }
        Ok(())
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for quantity in &self.quantities {
            writeln!(out, "quantity {}: {}", quantity.name, quantity.kind)?;
        }
        for field in self.fields.iter().filter(|field| !field.retired) {
            match &field.hint {
                Some(hint) => writeln!(out, "field {}: {} #[{}]", field.name, field.ty, hint)?,
                None => writeln!(out, "field {}: {}", field.name, field.ty)?,
            }
        }
        for function in &self.functions {
            writeln!(out, "fn {} {{", function.name)?;
            for local in function.locals.iter().filter(|local| !local.retired) {
                writeln!(out, "    let {}: {}", local.name, local.ty)?;
            }
            Printer {
                program: self,
                function,
            }
            .block(&mut out, &function.body, 1)?;
            writeln!(out, "}}")?;
        }
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{Operand, ProgramBuilder, Rvalue, Ty};
    use crate::specialize::Kind;

    #[test]
    fn test_render_small_program() {
        let mut builder = ProgramBuilder::new();
        let f = builder.field("f", Ty::Boxed(Kind::Unknown));
        builder.function("fire", |b| {
            let x = b.local("x", Ty::Boxed(Kind::Unknown));
            b.assign(x, Rvalue::new_box(Kind::Int, vec![Operand::int(5)]));
            b.if_then(Rvalue::is_not_null(x), |b| b.assign(f, x));
        });
        let text = builder.build().to_string();
        assert_eq!(
            text,
            "field f: Box<unknown>\n\
             fn fire {\n\
             \x20   let x: Box<unknown>\n\
             \x20   x = new Box<int>(5)\n\
             \x20   if x != null {\n\
             \x20       f = x\n\
             \x20   }\n\
             }\n"
        );
    }
}
