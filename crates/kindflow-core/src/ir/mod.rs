//! Program representation consumed by the specializer and the unboxer
//!
//! A deliberately small structured IR:
//! - whole-program storage (`fields`) and named external quantities
//!   (ports, parameters) with a declared kind
//! - functions with typed locals and structured statement bodies
//! - places and right-hand sides precise enough to express every
//!   read, write and compare site the transformer has to rewrite

mod builder;
mod pretty;
mod validate;

pub use builder::{FunctionBuilder, ProgramBuilder};

use crate::specialize::Kind;
use serde::{Deserialize, Serialize};

/// Index of a field in [`Program::fields`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldId(pub usize);

/// Index of a local in [`Function::locals`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(pub usize);

/// Index of a function in [`Program::functions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub usize);

/// Index of a quantity in [`Program::quantities`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuantityId(pub usize);

/// Static representation type of a storage location
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    Bool,
    Byte,
    Int,
    Long,
    Double,
    Str,
    /// Reference to an external quantity (port or parameter object)
    Handle,
    /// Reference to a box class whose declared kind is the payload
    Boxed(Kind),
    Array(Box<Ty>),
}

impl Ty {
    pub fn array(elem: Ty) -> Ty {
        Ty::Array(Box::new(elem))
    }

    /// Wrap `self` in `dims` array dimensions
    pub fn with_dims(self, dims: usize) -> Ty {
        (0..dims).fold(self, |ty, _| Ty::array(ty))
    }

    /// Declared kind of the base box class, looking through array dimensions
    pub fn box_kind(&self) -> Option<&Kind> {
        match self {
            Ty::Boxed(kind) => Some(kind),
            Ty::Array(elem) => elem.box_kind(),
            _ => None,
        }
    }

    pub fn is_boxed(&self) -> bool {
        self.box_kind().is_some()
    }

    pub fn array_dims(&self) -> usize {
        match self {
            Ty::Array(elem) => 1 + elem.array_dims(),
            _ => 0,
        }
    }

    pub fn element(&self) -> Option<&Ty> {
        match self {
            Ty::Array(elem) => Some(elem),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    #[serde(default)]
    pub quantities: Vec<Quantity>,
    #[serde(default)]
    pub functions: Vec<Function>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Ty,
    /// Kind pinned by an earlier pass
    #[serde(default)]
    pub hint: Option<Kind>,
    /// Set once the field has been replaced by flat storage
    #[serde(default)]
    pub retired: bool,
}

/// A named settable quantity living outside the analyzed code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub name: String,
    pub kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default)]
    pub locals: Vec<LocalDecl>,
    #[serde(default)]
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDecl {
    pub name: String,
    pub ty: Ty,
    #[serde(default)]
    pub retired: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Assign { dst: Place, src: Rvalue },
    /// Call whose result is discarded
    Call(Call),
    If {
        cond: Rvalue,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While { cond: Rvalue, body: Vec<Stmt> },
    Return(Option<Operand>),
    Nop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Local(LocalId),
    Const(Constant),
    /// The null sentinel
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Bool(bool),
    Byte(u8),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Place {
    Local(LocalId),
    Field(FieldId),
    Index { base: LocalId, index: Operand },
    /// Leaf storage inside a box, e.g. `x.value`
    Slot { base: LocalId, slot: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rvalue {
    Use(Operand),
    Read(Place),
    Cast(Ty, Operand),
    NewBox { kind: Kind, args: Vec<Operand> },
    /// Reference to a shared, always-this-kind box such as `BooleanToken.TRUE`
    Singleton { kind: Kind, payload: Vec<Constant> },
    NewArray { elem: Ty, len: Operand },
    Length(LocalId),
    Call(Call),
    /// Fully dynamic evaluation of an expression string
    Evaluate(String),
    Quantity(QuantityId),
    Compare { op: CmpOp, lhs: Operand, rhs: Operand },
    Binary { op: BinOp, lhs: Operand, rhs: Operand },
    Not(Operand),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Call {
    /// Virtual call; the receiver's static type selects the target family
    Method {
        receiver: LocalId,
        method: String,
        args: Vec<Operand>,
    },
    Static {
        class: String,
        method: String,
        args: Vec<Operand>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
}

/// Identity of a program quantity the analysis tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Entity {
    Field(FieldId),
    Local(FunctionId, LocalId),
    /// Array allocation site, numbered in pre-order statement position
    Alloc(FunctionId, usize),
}

impl From<LocalId> for Operand {
    fn from(local: LocalId) -> Self {
        Operand::Local(local)
    }
}

impl From<Constant> for Operand {
    fn from(constant: Constant) -> Self {
        Operand::Const(constant)
    }
}

impl From<LocalId> for Place {
    fn from(local: LocalId) -> Self {
        Place::Local(local)
    }
}

impl From<FieldId> for Place {
    fn from(field: FieldId) -> Self {
        Place::Field(field)
    }
}

impl From<Operand> for Rvalue {
    fn from(operand: Operand) -> Self {
        Rvalue::Use(operand)
    }
}

impl From<LocalId> for Rvalue {
    fn from(local: LocalId) -> Self {
        Rvalue::Use(Operand::Local(local))
    }
}

impl From<Call> for Rvalue {
    fn from(call: Call) -> Self {
        Rvalue::Call(call)
    }
}

impl Operand {
    pub fn int(value: i32) -> Self {
        Operand::Const(Constant::Int(value))
    }

    pub fn double(value: f64) -> Self {
        Operand::Const(Constant::Double(value))
    }

    pub fn bool(value: bool) -> Self {
        Operand::Const(Constant::Bool(value))
    }

    pub fn as_local(&self) -> Option<LocalId> {
        match self {
            Operand::Local(local) => Some(*local),
            _ => None,
        }
    }
}

impl Rvalue {
    pub fn read(place: impl Into<Place>) -> Self {
        Rvalue::Read(place.into())
    }

    pub fn new_box(kind: Kind, args: Vec<Operand>) -> Self {
        Rvalue::NewBox { kind, args }
    }

    pub fn null() -> Self {
        Rvalue::Use(Operand::Null)
    }

    pub fn is_null(local: LocalId) -> Self {
        Rvalue::Compare {
            op: CmpOp::Eq,
            lhs: Operand::Local(local),
            rhs: Operand::Null,
        }
    }

    pub fn is_not_null(local: LocalId) -> Self {
        Rvalue::Compare {
            op: CmpOp::Ne,
            lhs: Operand::Local(local),
            rhs: Operand::Null,
        }
    }

    /// Every operand the right-hand side reads, including call arguments
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Rvalue::Use(op) | Rvalue::Cast(_, op) | Rvalue::Not(op) => vec![op],
            Rvalue::Read(place) => place.operands(),
            Rvalue::NewBox { args, .. } => args.iter().collect(),
            Rvalue::NewArray { len, .. } => vec![len],
            Rvalue::Call(call) => call.args().iter().collect(),
            Rvalue::Compare { lhs, rhs, .. } | Rvalue::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Rvalue::Singleton { .. } | Rvalue::Length(_) | Rvalue::Evaluate(_) | Rvalue::Quantity(_) => {
                Vec::new()
            }
        }
    }
}

impl Place {
    pub fn index(base: LocalId, index: impl Into<Operand>) -> Self {
        Place::Index {
            base,
            index: index.into(),
        }
    }

    pub fn slot(base: LocalId, slot: &str) -> Self {
        Place::Slot {
            base,
            slot: slot.to_string(),
        }
    }

    fn operands(&self) -> Vec<&Operand> {
        match self {
            Place::Index { index, .. } => vec![index],
            _ => Vec::new(),
        }
    }
}

impl Call {
    pub fn method(receiver: LocalId, method: &str, args: Vec<Operand>) -> Self {
        Call::Method {
            receiver,
            method: method.to_string(),
            args,
        }
    }

    pub fn arraycopy(src: LocalId, src_pos: Operand, dst: LocalId, dst_pos: Operand, len: Operand) -> Self {
        Call::Static {
            class: ARRAYCOPY_CLASS.to_string(),
            method: ARRAYCOPY_METHOD.to_string(),
            args: vec![Operand::Local(src), src_pos, Operand::Local(dst), dst_pos, len],
        }
    }

    pub fn args(&self) -> &[Operand] {
        match self {
            Call::Method { args, .. } | Call::Static { args, .. } => args,
        }
    }

    pub fn method_name(&self) -> &str {
        match self {
            Call::Method { method, .. } | Call::Static { method, .. } => method,
        }
    }

    /// `(src, src_pos, dst, dst_pos, len)` if this is the array-copy intrinsic
    pub fn as_arraycopy(&self) -> Option<(LocalId, &Operand, LocalId, &Operand, &Operand)> {
        match self {
            Call::Static { class, method, args }
                if class == ARRAYCOPY_CLASS && method == ARRAYCOPY_METHOD && args.len() == 5 =>
            {
                Some((args[0].as_local()?, &args[1], args[2].as_local()?, &args[3], &args[4]))
            }
            _ => None,
        }
    }
}

pub const ARRAYCOPY_CLASS: &str = "System";
pub const ARRAYCOPY_METHOD: &str = "arraycopy";

impl Program {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            quantities: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Parse a program and check that every id in it resolves
    pub fn from_json(source: &str) -> anyhow::Result<Self> {
        let program: Self = serde_json::from_str(source)?;
        program.validate()?;
        Ok(program)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn field(&self, id: FieldId) -> &FieldDecl {
        &self.fields[id.0]
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0]
    }

    pub fn quantity(&self, id: QuantityId) -> &Quantity {
        &self.quantities[id.0]
    }

    pub fn field_named(&self, name: &str) -> Option<FieldId> {
        self.fields.iter().position(|f| f.name == name).map(FieldId)
    }

    pub fn function_named(&self, name: &str) -> Option<FunctionId> {
        self.functions.iter().position(|f| f.name == name).map(FunctionId)
    }

    pub fn add_field(&mut self, decl: FieldDecl) -> FieldId {
        self.fields.push(decl);
        FieldId(self.fields.len() - 1)
    }

    pub fn field_ids(&self) -> impl Iterator<Item = (FieldId, &FieldDecl)> {
        self.fields.iter().enumerate().map(|(i, f)| (FieldId(i), f))
    }

    pub fn function_ids(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions.iter().enumerate().map(|(i, f)| (FunctionId(i), f))
    }

    /// Static type of an entity, `None` for identities that do not exist
    pub fn entity_ty(&self, entity: &Entity) -> Option<&Ty> {
        match entity {
            Entity::Field(id) => self.fields.get(id.0).map(|f| &f.ty),
            Entity::Local(func, local) => self
                .functions
                .get(func.0)
                .and_then(|f| f.locals.get(local.0))
                .map(|l| &l.ty),
            Entity::Alloc(..) => None,
        }
    }

    pub fn describe(&self, entity: &Entity) -> String {
        match entity {
            Entity::Field(id) => match self.fields.get(id.0) {
                Some(field) => format!("field {}", field.name),
                None => format!("field #{}", id.0),
            },
            Entity::Local(func, local) => match self.functions.get(func.0) {
                Some(f) => match f.locals.get(local.0) {
                    Some(decl) => format!("local {}::{}", f.name, decl.name),
                    None => format!("local {}::#{}", f.name, local.0),
                },
                None => format!("local #{}::#{}", func.0, local.0),
            },
            Entity::Alloc(func, site) => match self.functions.get(func.0) {
                Some(f) => format!("allocation {}@{}", f.name, site),
                None => format!("allocation #{}@{}", func.0, site),
            },
        }
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Function {
    pub fn local(&self, id: LocalId) -> &LocalDecl {
        &self.locals[id.0]
    }

    pub fn local_ty(&self, id: LocalId) -> &Ty {
        &self.locals[id.0].ty
    }

    pub fn add_local(&mut self, decl: LocalDecl) -> LocalId {
        self.locals.push(decl);
        LocalId(self.locals.len() - 1)
    }

    pub fn local_ids(&self) -> impl Iterator<Item = (LocalId, &LocalDecl)> {
        self.locals.iter().enumerate().map(|(i, l)| (LocalId(i), l))
    }

    /// Right-hand sides of every assignment to `local`, in pre-order
    pub fn defs_of(&self, local: LocalId) -> Vec<&Rvalue> {
        let mut defs = Vec::new();
        visit_stmts(&self.body, &mut |stmt| {
            if let Stmt::Assign {
                dst: Place::Local(dst),
                src,
            } = stmt
            {
                if *dst == local {
                    defs.push(src);
                }
            }
        });
        defs
    }

    /// Follow single-definition copy chains from a handle local to the
    /// quantity it was loaded from
    pub fn resolve_quantity(&self, local: LocalId) -> Option<QuantityId> {
        let mut current = local;
        let mut seen = Vec::new();
        loop {
            if seen.contains(&current) {
                return None;
            }
            seen.push(current);
            let defs = self.defs_of(current);
            if defs.len() != 1 {
                return None;
            }
            match defs[0] {
                Rvalue::Quantity(q) => return Some(*q),
                Rvalue::Use(Operand::Local(next)) | Rvalue::Cast(_, Operand::Local(next)) => current = *next,
                _ => return None,
            }
        }
    }
}

/// Pre-order walk over a statement tree
pub fn visit_stmts<'a>(body: &'a [Stmt], f: &mut impl FnMut(&'a Stmt)) {
    for stmt in body {
        f(stmt);
        match stmt {
            Stmt::If {
                then_body, else_body, ..
            } => {
                visit_stmts(then_body, f);
                visit_stmts(else_body, f);
            }
            Stmt::While { body, .. } => visit_stmts(body, f),
            _ => {}
        }
    }
}
