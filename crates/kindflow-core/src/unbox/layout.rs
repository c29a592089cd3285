//! Flat storage layout of a box kind

use crate::error::ShapeIssue;
use crate::ir::{Constant, Operand, Ty};
use crate::specialize::Kind;
use serde::Serialize;
use smallvec::{smallvec, SmallVec};

/// One native component of a box payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Leaf {
    pub name: &'static str,
    pub ty: Ty,
}

impl Leaf {
    fn new(name: &'static str, ty: Ty) -> Self {
        Self { name, ty }
    }

    /// Value a slot holds while its box is null
    pub fn default_operand(&self) -> Operand {
        default_operand(&self.ty)
    }
}

/// Leaf components of a box kind, in slot order
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Layout {
    pub leaves: SmallVec<[Leaf; 2]>,
}

impl Layout {
    /// Layout of a concrete kind. `Ok(None)` for kinds with no box class.
    pub fn of(kind: &Kind) -> Result<Option<Layout>, ShapeIssue> {
        let leaves: SmallVec<[Leaf; 2]> = match kind {
            Kind::Boolean => smallvec![Leaf::new("value", Ty::Bool)],
            Kind::UnsignedByte => smallvec![Leaf::new("value", Ty::Byte)],
            Kind::Int => smallvec![Leaf::new("value", Ty::Int)],
            Kind::Long => smallvec![Leaf::new("value", Ty::Long)],
            Kind::Double => smallvec![Leaf::new("value", Ty::Double)],
            Kind::Str => smallvec![Leaf::new("value", Ty::Str)],
            Kind::Complex => smallvec![Leaf::new("real", Ty::Double), Leaf::new("imag", Ty::Double)],
            Kind::Matrix(elem) => match Layout::of(elem)? {
                Some(inner) if inner.is_scalar() => inner
                    .leaves
                    .into_iter()
                    .map(|leaf| Leaf::new(leaf.name, leaf.ty.with_dims(2)))
                    .collect(),
                _ => return Ok(None),
            },
            Kind::Array(elem) => smallvec![Leaf::new("value", Ty::array(Ty::Boxed((**elem).clone())))],
            Kind::Record(_) => return Err(ShapeIssue::Record),
            Kind::Unknown | Kind::Scalar | Kind::Top => return Ok(None),
        };
        Ok(Some(Layout { leaves }))
    }

    fn is_scalar(&self) -> bool {
        self.leaves.iter().all(|leaf| leaf.ty.array_dims() == 0)
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

pub(crate) fn default_operand(ty: &Ty) -> Operand {
    match ty {
        Ty::Bool => Operand::Const(Constant::Bool(false)),
        Ty::Byte => Operand::Const(Constant::Byte(0)),
        Ty::Int => Operand::Const(Constant::Int(0)),
        Ty::Long => Operand::Const(Constant::Long(0)),
        Ty::Double => Operand::Const(Constant::Double(0.0)),
        Ty::Str => Operand::Const(Constant::Str(String::new())),
        Ty::Handle | Ty::Boxed(_) | Ty::Array(_) => Operand::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(kind: &Kind) -> Vec<&'static str> {
        Layout::of(kind)
            .unwrap()
            .unwrap()
            .leaves
            .iter()
            .map(|leaf| leaf.name)
            .collect()
    }

    #[test]
    fn test_scalar_layouts() {
        assert_eq!(names(&Kind::Int), vec!["value"]);
        assert_eq!(names(&Kind::Complex), vec!["real", "imag"]);
    }

    #[test]
    fn test_matrix_leaves_are_two_dimensional() {
        let layout = Layout::of(&Kind::matrix(Kind::Complex)).unwrap().unwrap();
        assert_eq!(layout.len(), 2);
        assert!(layout.leaves.iter().all(|leaf| leaf.ty == Ty::Double.with_dims(2)));
    }

    #[test]
    fn test_array_layout_holds_inner_boxes() {
        let layout = Layout::of(&Kind::array(Kind::Int)).unwrap().unwrap();
        assert_eq!(layout.leaves[0].ty, Ty::array(Ty::Boxed(Kind::Int)));
    }

    #[test]
    fn test_record_is_rejected() {
        let record = Kind::record([("a", Kind::Int)]);
        assert_eq!(Layout::of(&record), Err(ShapeIssue::Record));
    }

    #[test]
    fn test_abstract_kinds_have_no_layout() {
        assert_eq!(Layout::of(&Kind::Scalar), Ok(None));
        assert_eq!(Layout::of(&Kind::Unknown), Ok(None));
    }
}
