//! Reference interpreter
//!
//! Executes a [`Program`] directly: fields are global storage, quantities
//! are FIFO mailboxes, boxes and arrays are shared references. It runs both
//! the boxed input and the rewritten output, so the two can be compared.

use crate::ir::{
    BinOp, Call, CmpOp, Constant, FieldId, FunctionId, Operand, Place, Program, QuantityId, Rvalue, Stmt, Ty,
};
use crate::specialize::Kind;
use crate::unbox::Layout;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

pub const DEFAULT_STEP_LIMIT: usize = 100_000;

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("no function named {0}")]
    UnknownFunction(String),
    #[error("null dereference: {0}")]
    NullDereference(String),
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: String },
    #[error("quantity {0} has no pending value")]
    EmptyQuantity(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("step limit of {0} exceeded")]
    StepLimit(usize),
}

pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Payload of a runtime box
#[derive(Debug, Clone, PartialEq)]
pub struct BoxValue {
    pub kind: Kind,
    pub slots: IndexMap<String, Value>,
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(u8),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
    Box(Rc<RefCell<BoxValue>>),
    Array(Rc<RefCell<Vec<Value>>>),
    Handle(QuantityId),
}

/// Structural equality; the interpreter itself compares references by
/// identity
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Box(a), Value::Box(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Handle(a), Value::Handle(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Byte(b) => write!(f, "{}ub", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}L", l),
            Value::Double(d) => write!(f, "{:?}", d),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Box(b) => {
                let b = b.borrow();
                write!(f, "{}(", b.kind)?;
                for (i, (name, value)) in b.slots.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", name, value)?;
                }
                write!(f, ")")
            }
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, value) in a.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                write!(f, "]")
            }
            Value::Handle(q) => write!(f, "@{}", q.0),
        }
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Byte(b) => Value::Byte(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Long(l) => Value::Long(*l),
            Constant::Double(d) => Value::Double(*d),
            Constant::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl Value {
    /// Box of `kind` whose single `value` slot holds `payload`
    pub fn boxed(kind: Kind, payload: Value) -> Value {
        let mut slots = IndexMap::new();
        slots.insert("value".to_string(), payload);
        Value::Box(Rc::new(RefCell::new(BoxValue { kind, slots })))
    }

    pub fn array(values: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(values)))
    }

    pub fn default_for(ty: &Ty) -> Value {
        match ty {
            Ty::Bool => Value::Bool(false),
            Ty::Byte => Value::Byte(0),
            Ty::Int => Value::Int(0),
            Ty::Long => Value::Long(0),
            Ty::Double => Value::Double(0.0),
            Ty::Str => Value::Str(String::new()),
            Ty::Handle | Ty::Boxed(_) | Ty::Array(_) => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Slot of a box value, `None` for anything else
    pub fn slot(&self, name: &str) -> Option<Value> {
        match self {
            Value::Box(b) => b.borrow().slots.get(name).cloned(),
            _ => None,
        }
    }

    /// Element of an array value, `None` for anything else
    pub fn element(&self, index: usize) -> Option<Value> {
        match self {
            Value::Array(a) => a.borrow().get(index).cloned(),
            _ => None,
        }
    }

    pub fn array_len(&self) -> Option<usize> {
        match self {
            Value::Array(a) => Some(a.borrow().len()),
            _ => None,
        }
    }

    fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Byte(_) => "byte".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Long(_) => "long".to_string(),
            Value::Double(_) => "double".to_string(),
            Value::Str(_) => "string".to_string(),
            Value::Box(b) => format!("box of {}", b.borrow().kind),
            Value::Array(_) => "array".to_string(),
            Value::Handle(_) => "handle".to_string(),
        }
    }

    fn as_bool(&self) -> EvalResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch("bool", other)),
        }
    }

    fn as_long(&self) -> EvalResult<i64> {
        match self {
            Value::Byte(b) => Ok(i64::from(*b)),
            Value::Int(i) => Ok(i64::from(*i)),
            Value::Long(l) => Ok(*l),
            other => Err(mismatch("integer", other)),
        }
    }

    fn as_double(&self) -> EvalResult<f64> {
        match self {
            Value::Double(d) => Ok(*d),
            other => Ok(other.as_long()? as f64),
        }
    }
}

fn mismatch(expected: &'static str, found: &Value) -> EvalError {
    EvalError::TypeMismatch {
        expected,
        found: found.type_name(),
    }
}

enum Flow {
    Next,
    Return(Option<Value>),
}

pub struct Interpreter<'p> {
    program: &'p Program,
    fields: Vec<Value>,
    mailboxes: Vec<VecDeque<Value>>,
    singletons: Vec<(Kind, Vec<Constant>, Value)>,
    steps: usize,
    step_limit: usize,
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            fields: program.fields.iter().map(|field| Value::default_for(&field.ty)).collect(),
            mailboxes: vec![VecDeque::new(); program.quantities.len()],
            singletons: Vec::new(),
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn with_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit;
        self
    }

    /// Queue a value for the next `get` on `quantity`
    pub fn push(&mut self, quantity: QuantityId, value: Value) {
        if let Some(mailbox) = self.mailboxes.get_mut(quantity.0) {
            mailbox.push_back(value);
        }
    }

    /// Values waiting on `quantity`, oldest first
    pub fn pending(&self, quantity: QuantityId) -> impl Iterator<Item = &Value> {
        self.mailboxes.get(quantity.0).into_iter().flatten()
    }

    pub fn field(&self, id: FieldId) -> &Value {
        &self.fields[id.0]
    }

    pub fn field_named(&self, name: &str) -> Option<&Value> {
        self.program.field_named(name).map(|id| self.field(id))
    }

    /// Non-retired fields and their current values, in declaration order
    pub fn live_fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.program
            .fields
            .iter()
            .zip(&self.fields)
            .filter(|(decl, _)| !decl.retired)
            .map(|(decl, value)| (decl.name.as_str(), value))
    }

    pub fn call(&mut self, name: &str) -> EvalResult<Option<Value>> {
        let id = self
            .program
            .function_named(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
        self.run(id)
    }

    pub fn run(&mut self, function: FunctionId) -> EvalResult<Option<Value>> {
        let program = self.program;
        let function = program
            .functions
            .get(function.0)
            .ok_or_else(|| EvalError::UnknownFunction(format!("#{}", function.0)))?;
        tracing::trace!("evaluating {}", function.name);
        let mut frame: Vec<Value> = function.locals.iter().map(|local| Value::default_for(&local.ty)).collect();
        match self.block(&mut frame, &function.body)? {
            Flow::Return(value) => Ok(value),
            Flow::Next => Ok(None),
        }
    }

    fn tick(&mut self) -> EvalResult<()> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(EvalError::StepLimit(self.step_limit));
        }
        Ok(())
    }

    fn block(&mut self, frame: &mut Vec<Value>, body: &[Stmt]) -> EvalResult<Flow> {
        for stmt in body {
            self.tick()?;
            match stmt {
                Stmt::Assign { dst, src } => {
                    let value = self.rvalue(frame, src)?;
                    self.store(frame, dst, value)?;
                }
                Stmt::Call(call) => {
                    self.call_site(frame, call)?;
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    let taken = if self.rvalue(frame, cond)?.as_bool()? {
                        then_body
                    } else {
                        else_body
                    };
                    if let Flow::Return(value) = self.block(frame, taken)? {
                        return Ok(Flow::Return(value));
                    }
                }
                Stmt::While { cond, body } => {
                    while self.rvalue(frame, cond)?.as_bool()? {
                        self.tick()?;
                        if let Flow::Return(value) = self.block(frame, body)? {
                            return Ok(Flow::Return(value));
                        }
                    }
                }
                Stmt::Return(value) => {
                    let value = value.as_ref().map(|op| self.operand(frame, op));
                    return Ok(Flow::Return(value));
                }
                Stmt::Nop => {}
            }
        }
        Ok(Flow::Next)
    }

    fn operand(&self, frame: &[Value], operand: &Operand) -> Value {
        match operand {
            Operand::Local(local) => frame[local.0].clone(),
            Operand::Const(constant) => Value::from(constant),
            Operand::Null => Value::Null,
        }
    }

    fn index(&self, frame: &[Value], base: &Value, index: &Operand) -> EvalResult<(Rc<RefCell<Vec<Value>>>, usize)> {
        let array = match base {
            Value::Array(array) => Rc::clone(array),
            Value::Null => return Err(EvalError::NullDereference("array element access".to_string())),
            other => return Err(mismatch("array", other)),
        };
        let index = self.operand(frame, index).as_long()?;
        let len = array.borrow().len();
        match usize::try_from(index) {
            Ok(i) if i < len => Ok((array, i)),
            _ => Err(EvalError::IndexOutOfBounds { index, len }),
        }
    }

    fn load(&self, frame: &[Value], place: &Place) -> EvalResult<Value> {
        match place {
            Place::Local(local) => Ok(frame[local.0].clone()),
            Place::Field(field) => Ok(self.fields[field.0].clone()),
            Place::Index { base, index } => {
                let (array, i) = self.index(frame, &frame[base.0], index)?;
                let value = array.borrow()[i].clone();
                Ok(value)
            }
            Place::Slot { base, slot } => match &frame[base.0] {
                Value::Box(b) => b
                    .borrow()
                    .slots
                    .get(slot)
                    .cloned()
                    .ok_or_else(|| EvalError::Unsupported(format!("box has no slot `{}`", slot))),
                Value::Null => Err(EvalError::NullDereference(format!("read of slot `{}`", slot))),
                other => Err(mismatch("box", other)),
            },
        }
    }

    fn store(&mut self, frame: &mut [Value], place: &Place, value: Value) -> EvalResult<()> {
        match place {
            Place::Local(local) => frame[local.0] = value,
            Place::Field(field) => self.fields[field.0] = value,
            Place::Index { base, index } => {
                let (array, i) = self.index(frame, &frame[base.0], index)?;
                array.borrow_mut()[i] = value;
            }
            Place::Slot { base, slot } => match &frame[base.0] {
                Value::Box(b) => {
                    b.borrow_mut().slots.insert(slot.clone(), value);
                }
                Value::Null => return Err(EvalError::NullDereference(format!("write of slot `{}`", slot))),
                other => return Err(mismatch("box", other)),
            },
        }
        Ok(())
    }

    fn rvalue(&mut self, frame: &[Value], src: &Rvalue) -> EvalResult<Value> {
        match src {
            Rvalue::Use(operand) => Ok(self.operand(frame, operand)),
            Rvalue::Read(place) => self.load(frame, place),
            Rvalue::Cast(ty, operand) => cast(ty, self.operand(frame, operand)),
            Rvalue::NewBox { kind, args } => {
                let args: Vec<Value> = args.iter().map(|arg| self.operand(frame, arg)).collect();
                Ok(new_box(kind, args))
            }
            Rvalue::Singleton { kind, payload } => Ok(self.singleton(kind, payload)),
            Rvalue::NewArray { elem, len } => {
                let len = self.operand(frame, len).as_long()?;
                let len = usize::try_from(len).map_err(|_| EvalError::IndexOutOfBounds { index: len, len: 0 })?;
                Ok(Value::array(vec![Value::default_for(elem); len]))
            }
            Rvalue::Length(local) => match &frame[local.0] {
                Value::Array(array) => Ok(Value::Int(array.borrow().len() as i32)),
                Value::Null => Err(EvalError::NullDereference("length of null array".to_string())),
                other => Err(mismatch("array", other)),
            },
            Rvalue::Call(call) => Ok(self.call_site(frame, call)?.unwrap_or(Value::Null)),
            Rvalue::Evaluate(expr) => Err(EvalError::Unsupported(format!("dynamic evaluation of `{}`", expr))),
            Rvalue::Quantity(id) => Ok(Value::Handle(*id)),
            Rvalue::Compare { op, lhs, rhs } => {
                let (lhs, rhs) = (self.operand(frame, lhs), self.operand(frame, rhs));
                compare(*op, &lhs, &rhs).map(Value::Bool)
            }
            Rvalue::Binary { op, lhs, rhs } => binary(*op, &self.operand(frame, lhs), &self.operand(frame, rhs)),
            Rvalue::Not(operand) => Ok(Value::Bool(!self.operand(frame, operand).as_bool()?)),
        }
    }

    /// Singletons are shared: every reference yields the same box
    fn singleton(&mut self, kind: &Kind, payload: &[Constant]) -> Value {
        if let Some((_, _, value)) = self
            .singletons
            .iter()
            .find(|(k, p, _)| k == kind && p.as_slice() == payload)
        {
            return value.clone();
        }
        let value = new_box(kind, payload.iter().map(Value::from).collect());
        self.singletons.push((kind.clone(), payload.to_vec(), value.clone()));
        value
    }

    fn call_site(&mut self, frame: &[Value], call: &Call) -> EvalResult<Option<Value>> {
        let args: Vec<Value> = call.args().iter().map(|arg| self.operand(frame, arg)).collect();
        match call {
            Call::Method { receiver, method, .. } => match &frame[receiver.0] {
                Value::Box(b) => box_method(b, method, &args).map(Some),
                Value::Handle(q) => self.quantity_method(*q, method, args),
                Value::Null => Err(EvalError::NullDereference(format!("call of `{}`", method))),
                other => Err(mismatch("box or handle", other)),
            },
            Call::Static { class, method, .. } => {
                if call.as_arraycopy().is_some() {
                    arraycopy(&args)?;
                    return Ok(None);
                }
                Err(EvalError::Unsupported(format!("static call {}.{}", class, method)))
            }
        }
    }

    fn quantity_method(&mut self, quantity: QuantityId, method: &str, mut args: Vec<Value>) -> EvalResult<Option<Value>> {
        let name = || {
            self.program
                .quantities
                .get(quantity.0)
                .map_or_else(|| format!("#{}", quantity.0), |q| q.name.clone())
        };
        let Some(mailbox) = self.mailboxes.get_mut(quantity.0) else {
            return Err(EvalError::Unsupported(format!("unknown quantity {}", name())));
        };
        match method {
            "get" | "getToken" => match mailbox.pop_front() {
                Some(value) => Ok(Some(value)),
                None => Err(EvalError::EmptyQuantity(name())),
            },
            "broadcast" | "setToken" if !args.is_empty() => {
                mailbox.push_back(args.swap_remove(0));
                Ok(None)
            }
            "send" => match args.pop() {
                Some(value) => {
                    mailbox.push_back(value);
                    Ok(None)
                }
                None => Err(EvalError::Unsupported("send without a value".to_string())),
            },
            other => Err(EvalError::Unsupported(format!("quantity method `{}`", other))),
        }
    }
}

fn new_box(kind: &Kind, args: Vec<Value>) -> Value {
    let names: Vec<String> = match (kind, Layout::of(kind)) {
        (_, Ok(Some(layout))) => layout.leaves.iter().map(|leaf| leaf.name.to_string()).collect(),
        (Kind::Record(fields), _) => fields.keys().cloned().collect(),
        _ => vec!["value".to_string()],
    };
    let defaults: Vec<Value> = match Layout::of(kind) {
        Ok(Some(layout)) => layout.leaves.iter().map(|leaf| Value::default_for(&leaf.ty)).collect(),
        _ => vec![Value::Null; names.len()],
    };
    let values = if args.len() == names.len() { args } else { defaults };
    let slots = names.into_iter().zip(values).collect();
    Value::Box(Rc::new(RefCell::new(BoxValue {
        kind: kind.clone(),
        slots,
    })))
}

fn box_method(receiver: &Rc<RefCell<BoxValue>>, method: &str, args: &[Value]) -> EvalResult<Value> {
    let receiver = receiver.borrow();
    match method {
        "add" | "subtract" | "multiply" => {
            let other = match args.first() {
                Some(Value::Box(other)) => other.borrow().clone(),
                Some(Value::Null) | None => {
                    return Err(EvalError::NullDereference(format!("argument of `{}`", method)))
                }
                Some(other) => return Err(mismatch("box", other)),
            };
            let op = match method {
                "add" => BinOp::Add,
                "subtract" => BinOp::Sub,
                _ => BinOp::Mul,
            };
            let kind = receiver.kind.lub(&other.kind);
            let slots = match (receiver.slots.get("value"), other.slots.get("value")) {
                (Some(a), Some(b)) => [("value".to_string(), binary(op, a, b)?)].into_iter().collect(),
                _ => complex(op, &receiver, &other)?,
            };
            Ok(Value::Box(Rc::new(RefCell::new(BoxValue { kind, slots }))))
        }
        "getElement" => {
            let index = args
                .first()
                .ok_or_else(|| EvalError::Unsupported("getElement without an index".to_string()))?
                .as_long()?;
            let array = receiver
                .slots
                .get("value")
                .ok_or_else(|| EvalError::Unsupported("getElement on a non-array box".to_string()))?;
            let len = array.array_len().unwrap_or(0);
            usize::try_from(index)
                .ok()
                .and_then(|i| array.element(i))
                .ok_or(EvalError::IndexOutOfBounds { index, len })
        }
        other => Err(EvalError::Unsupported(format!("box method `{}`", other))),
    }
}

fn complex(op: BinOp, a: &BoxValue, b: &BoxValue) -> EvalResult<IndexMap<String, Value>> {
    let part = |value: &BoxValue, name: &str| -> EvalResult<f64> {
        value
            .slots
            .get(name)
            .ok_or_else(|| EvalError::Unsupported(format!("arithmetic on a box without `{}`", name)))?
            .as_double()
    };
    let (ar, ai, br, bi) = (part(a, "real")?, part(a, "imag")?, part(b, "real")?, part(b, "imag")?);
    let (real, imag) = match op {
        BinOp::Add => (ar + br, ai + bi),
        BinOp::Sub => (ar - br, ai - bi),
        _ => (ar * br - ai * bi, ar * bi + ai * br),
    };
    Ok([
        ("real".to_string(), Value::Double(real)),
        ("imag".to_string(), Value::Double(imag)),
    ]
    .into_iter()
    .collect())
}

fn arraycopy(args: &[Value]) -> EvalResult<()> {
    let [src, src_pos, dst, dst_pos, len] = args else {
        return Err(EvalError::Unsupported("arraycopy takes five arguments".to_string()));
    };
    let (Value::Array(src), Value::Array(dst)) = (src, dst) else {
        return Err(EvalError::NullDereference("arraycopy of a null array".to_string()));
    };
    let (src_pos, dst_pos, len) = (src_pos.as_long()?, dst_pos.as_long()?, len.as_long()?);
    let in_bounds = |pos: i64, total: usize| pos >= 0 && len >= 0 && (pos + len) as usize <= total;
    let (src_len, dst_len) = (src.borrow().len(), dst.borrow().len());
    if !in_bounds(src_pos, src_len) {
        return Err(EvalError::IndexOutOfBounds {
            index: src_pos + len,
            len: src_len,
        });
    }
    if !in_bounds(dst_pos, dst_len) {
        return Err(EvalError::IndexOutOfBounds {
            index: dst_pos + len,
            len: dst_len,
        });
    }
    let copied: Vec<Value> = src.borrow()[src_pos as usize..(src_pos + len) as usize].to_vec();
    let mut dst = dst.borrow_mut();
    for (offset, value) in copied.into_iter().enumerate() {
        dst[dst_pos as usize + offset] = value;
    }
    Ok(())
}

fn cast(ty: &Ty, value: Value) -> EvalResult<Value> {
    let converted = match (ty, &value) {
        (_, Value::Null) => None,
        (Ty::Int, Value::Double(d)) => Some(Value::Int(*d as i32)),
        (Ty::Long, Value::Double(d)) => Some(Value::Long(*d as i64)),
        (Ty::Int, Value::Byte(_) | Value::Int(_) | Value::Long(_)) => Some(Value::Int(value.as_long()? as i32)),
        (Ty::Long, Value::Byte(_) | Value::Int(_) | Value::Long(_)) => Some(Value::Long(value.as_long()?)),
        (Ty::Byte, Value::Byte(_) | Value::Int(_) | Value::Long(_)) => Some(Value::Byte(value.as_long()? as u8)),
        (Ty::Double, Value::Byte(_) | Value::Int(_) | Value::Long(_)) => Some(Value::Double(value.as_double()?)),
        _ => None,
    };
    Ok(converted.unwrap_or(value))
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> EvalResult<bool> {
    if matches!(op, CmpOp::Eq | CmpOp::Ne) {
        let same = identical(lhs, rhs)?;
        return Ok((op == CmpOp::Eq) == same);
    }
    let ordering = if matches!(lhs, Value::Double(_)) || matches!(rhs, Value::Double(_)) {
        lhs.as_double()?.partial_cmp(&rhs.as_double()?)
    } else {
        Some(lhs.as_long()?.cmp(&rhs.as_long()?))
    };
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}

/// Reference identity for boxes and arrays, value equality otherwise
fn identical(lhs: &Value, rhs: &Value) -> EvalResult<bool> {
    Ok(match (lhs, rhs) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Box(a), Value::Box(b)) => Rc::ptr_eq(a, b),
        (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Handle(a), Value::Handle(b)) => a == b,
        (Value::Double(_), _) | (_, Value::Double(_)) => lhs.as_double()? == rhs.as_double()?,
        _ => lhs.as_long()? == rhs.as_long()?,
    })
}

fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    match op {
        BinOp::And => return Ok(Value::Bool(lhs.as_bool()? && rhs.as_bool()?)),
        BinOp::Or => return Ok(Value::Bool(lhs.as_bool()? || rhs.as_bool()?)),
        _ => {}
    }
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) if op == BinOp::Add => Ok(Value::Str(format!("{}{}", a, b))),
        (Value::Double(_), _) | (_, Value::Double(_)) => {
            let (a, b) = (lhs.as_double()?, rhs.as_double()?);
            Ok(Value::Double(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                _ => a % b,
            }))
        }
        (Value::Long(_), _) | (_, Value::Long(_)) => {
            integer(op, lhs.as_long()?, rhs.as_long()?).map(Value::Long)
        }
        _ => integer(op, lhs.as_long()?, rhs.as_long()?).map(|v| Value::Int(v as i32)),
    }
}

fn integer(op: BinOp, a: i64, b: i64) -> EvalResult<i64> {
    match op {
        BinOp::Add => Ok(a.wrapping_add(b)),
        BinOp::Sub => Ok(a.wrapping_sub(b)),
        BinOp::Mul => Ok(a.wrapping_mul(b)),
        BinOp::Div | BinOp::Rem if b == 0 => Err(EvalError::DivisionByZero),
        BinOp::Div => Ok(a.wrapping_div(b)),
        _ => Ok(a.wrapping_rem(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ProgramBuilder, Ty};

    #[test]
    fn test_boxes_compare_by_identity() {
        let mut builder = ProgramBuilder::new();
        let same = builder.field("same", Ty::Bool);
        let other = builder.field("other", Ty::Bool);
        builder.function("fire", |f| {
            let x = f.local("x", Ty::Boxed(Kind::Unknown));
            let y = f.local("y", Ty::Boxed(Kind::Unknown));
            let z = f.local("z", Ty::Boxed(Kind::Unknown));
            f.assign(x, Rvalue::new_box(Kind::Int, vec![Operand::int(1)]));
            f.assign(y, x);
            f.assign(z, Rvalue::new_box(Kind::Int, vec![Operand::int(1)]));
            f.assign(
                same,
                Rvalue::Compare {
                    op: CmpOp::Eq,
                    lhs: Operand::Local(x),
                    rhs: Operand::Local(y),
                },
            );
            f.assign(
                other,
                Rvalue::Compare {
                    op: CmpOp::Eq,
                    lhs: Operand::Local(x),
                    rhs: Operand::Local(z),
                },
            );
        });
        let program = builder.build();
        let mut interp = Interpreter::new(&program);
        interp.call("fire").unwrap();
        assert_eq!(interp.field(same), &Value::Bool(true));
        assert_eq!(interp.field(other), &Value::Bool(false));
    }

    #[test]
    fn test_box_arithmetic_and_quantities() {
        let mut builder = ProgramBuilder::new();
        let input = builder.quantity("input", Kind::Int);
        let output = builder.quantity("output", Kind::Int);
        builder.function("fire", |f| {
            let inp = f.local("inp", Ty::Handle);
            let out = f.local("out", Ty::Handle);
            let a = f.local("a", Ty::Boxed(Kind::Unknown));
            let b = f.local("b", Ty::Boxed(Kind::Unknown));
            f.assign(inp, Rvalue::Quantity(input));
            f.assign(out, Rvalue::Quantity(output));
            f.assign(a, Call::method(inp, "get", vec![]));
            f.assign(b, Call::method(a, "add", vec![Operand::Local(a)]));
            f.call(Call::method(out, "broadcast", vec![Operand::Local(b)]));
        });
        let program = builder.build();
        let mut interp = Interpreter::new(&program);
        interp.push(input, Value::boxed(Kind::Int, Value::Int(21)));
        interp.call("fire").unwrap();
        let sent: Vec<&Value> = interp.pending(output).collect();
        assert_eq!(sent, vec![&Value::boxed(Kind::Int, Value::Int(42))]);
        assert_eq!(interp.pending(input).count(), 0);
    }

    #[test]
    fn test_empty_quantity_is_an_error() {
        let mut builder = ProgramBuilder::new();
        let input = builder.quantity("input", Kind::Int);
        builder.function("fire", |f| {
            let inp = f.local("inp", Ty::Handle);
            let a = f.local("a", Ty::Boxed(Kind::Unknown));
            f.assign(inp, Rvalue::Quantity(input));
            f.assign(a, Call::method(inp, "get", vec![]));
        });
        let program = builder.build();
        let err = Interpreter::new(&program).call("fire").unwrap_err();
        assert_eq!(err, EvalError::EmptyQuantity("input".to_string()));
    }

    #[test]
    fn test_step_limit_stops_runaway_loops() {
        let mut builder = ProgramBuilder::new();
        builder.function("spin", |f| {
            f.while_loop(Rvalue::Use(Operand::bool(true)), |_| {});
        });
        let program = builder.build();
        let err = Interpreter::new(&program).with_step_limit(50).call("spin").unwrap_err();
        assert_eq!(err, EvalError::StepLimit(50));
    }

    #[test]
    fn test_arraycopy_moves_elements() {
        let mut builder = ProgramBuilder::new();
        let out = builder.field("out", Ty::array(Ty::Int));
        builder.function("fire", |f| {
            let a = f.local("a", Ty::array(Ty::Int));
            let b = f.local("b", Ty::array(Ty::Int));
            f.assign(a, Rvalue::NewArray { elem: Ty::Int, len: Operand::int(3) });
            f.assign(b, Rvalue::NewArray { elem: Ty::Int, len: Operand::int(3) });
            f.assign(Place::index(a, Operand::int(2)), Operand::int(9));
            f.call(Call::arraycopy(a, Operand::int(1), b, Operand::int(0), Operand::int(2)));
            f.assign(out, b);
        });
        let program = builder.build();
        let mut interp = Interpreter::new(&program);
        interp.call("fire").unwrap();
        assert_eq!(
            interp.field(out),
            &Value::array(vec![Value::Int(0), Value::Int(9), Value::Int(0)])
        );
    }
}
