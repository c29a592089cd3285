//! Kind lattice
//!
//! Partial order over the kinds a boxed value may carry:
//! - Bottom (`Unknown`) = nothing has flowed in yet
//! - Top = conflicting flows, any kind
//! - Scalar kinds are pairwise incomparable; `Scalar` sits above the numeric ones
//! - Arrays and matrices compare element-wise, records by width subtyping

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Deepest array nesting the lattice will build before saturating to `Top`
pub const MAX_NESTING: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// Bottom element
    #[default]
    Unknown,
    Boolean,
    UnsignedByte,
    Int,
    Long,
    Double,
    Complex,
    Str,
    /// Some numeric scalar, exact kind undetermined
    Scalar,
    /// Top element
    Top,
    Array(Box<Kind>),
    Matrix(Box<Kind>),
    Record(BTreeMap<String, Kind>),
}

/// Result of comparing two kinds in the lattice order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindOrdering {
    Lower,
    Same,
    Higher,
    Incomparable,
}

impl Kind {
    pub fn array(elem: Kind) -> Kind {
        Kind::Array(Box::new(elem))
    }

    pub fn matrix(elem: Kind) -> Kind {
        Kind::Matrix(Box::new(elem))
    }

    pub fn record<S: Into<String>>(fields: impl IntoIterator<Item = (S, Kind)>) -> Kind {
        Kind::Record(fields.into_iter().map(|(label, kind)| (label.into(), kind)).collect())
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            Kind::UnsignedByte | Kind::Int | Kind::Long | Kind::Double | Kind::Complex
        )
    }

    fn is_numeric_or_scalar(&self) -> bool {
        self.is_numeric() || *self == Kind::Scalar
    }

    /// Element kind of an array or matrix
    pub fn element(&self) -> Option<&Kind> {
        match self {
            Kind::Array(elem) | Kind::Matrix(elem) => Some(elem),
            _ => None,
        }
    }

    pub fn compare(&self, other: &Kind) -> KindOrdering {
        if self == other {
            return KindOrdering::Same;
        }
        match (self, other) {
            (Kind::Unknown, _) | (_, Kind::Top) => KindOrdering::Lower,
            (_, Kind::Unknown) | (Kind::Top, _) => KindOrdering::Higher,
            (Kind::Scalar, k) if k.is_numeric() => KindOrdering::Higher,
            (k, Kind::Scalar) if k.is_numeric() => KindOrdering::Lower,
            (Kind::Array(a), Kind::Array(b)) | (Kind::Matrix(a), Kind::Matrix(b)) => a.compare(b),
            (Kind::Record(a), Kind::Record(b)) => match (record_leq(a, b), record_leq(b, a)) {
                (true, true) => KindOrdering::Same,
                (true, false) => KindOrdering::Lower,
                (false, true) => KindOrdering::Higher,
                (false, false) => KindOrdering::Incomparable,
            },
            _ => KindOrdering::Incomparable,
        }
    }

    /// `self ⊑ other`
    pub fn leq(&self, other: &Kind) -> bool {
        matches!(self.compare(other), KindOrdering::Lower | KindOrdering::Same)
    }

    /// Least upper bound
    pub fn lub(&self, other: &Kind) -> Kind {
        match (self, other) {
            (Kind::Unknown, k) | (k, Kind::Unknown) => k.clone(),
            (Kind::Top, _) | (_, Kind::Top) => Kind::Top,
            (a, b) if a == b => a.clone(),
            (Kind::Array(a), Kind::Array(b)) => Kind::array(a.lub(b)),
            (Kind::Matrix(a), Kind::Matrix(b)) => Kind::matrix(a.lub(b)),
            (Kind::Record(a), Kind::Record(b)) => Kind::Record(
                a.iter()
                    .filter_map(|(label, ka)| b.get(label).map(|kb| (label.clone(), ka.lub(kb))))
                    .collect(),
            ),
            (a, b) if a.is_numeric_or_scalar() && b.is_numeric_or_scalar() => Kind::Scalar,
            _ => Kind::Top,
        }
    }

    /// Greatest lower bound; `Unknown` when the kinds share nothing
    pub fn glb(&self, other: &Kind) -> Kind {
        match (self, other) {
            (Kind::Top, k) | (k, Kind::Top) => k.clone(),
            (Kind::Unknown, _) | (_, Kind::Unknown) => Kind::Unknown,
            (a, b) if a == b => a.clone(),
            (Kind::Array(a), Kind::Array(b)) => Kind::array(a.glb(b)),
            (Kind::Matrix(a), Kind::Matrix(b)) => Kind::matrix(a.glb(b)),
            (Kind::Record(a), Kind::Record(b)) => {
                let mut fields = a.clone();
                for (label, kb) in b {
                    let merged = match a.get(label) {
                        Some(ka) => ka.glb(kb),
                        None => kb.clone(),
                    };
                    fields.insert(label.clone(), merged);
                }
                Kind::Record(fields)
            }
            (Kind::Scalar, k) | (k, Kind::Scalar) if k.is_numeric() => k.clone(),
            _ => Kind::Unknown,
        }
    }

    /// Boxing layers a value of this kind carries
    pub fn depth(&self) -> usize {
        match self {
            Kind::Unknown | Kind::Top | Kind::Scalar => 0,
            Kind::Array(elem) => 1 + elem.depth(),
            Kind::Record(fields) => 1 + fields.values().map(Kind::depth).max().unwrap_or(0),
            _ => 1,
        }
    }

    /// Whether a concrete box class exists for this kind
    pub fn is_instantiable(&self) -> bool {
        match self {
            Kind::Unknown | Kind::Top | Kind::Scalar => false,
            Kind::Array(elem) | Kind::Matrix(elem) => elem.is_instantiable(),
            Kind::Record(fields) => fields.values().all(Kind::is_instantiable),
            _ => true,
        }
    }

    /// No `Unknown` anywhere inside, so no solver assignment can refine it
    pub fn is_constant(&self) -> bool {
        match self {
            Kind::Unknown => false,
            Kind::Array(elem) | Kind::Matrix(elem) => elem.is_constant(),
            Kind::Record(fields) => fields.values().all(Kind::is_constant),
            _ => true,
        }
    }

    /// Whether `value` is a substitution instance of `self`, treating
    /// every `Unknown` position as a hole
    pub fn admits(&self, value: &Kind) -> bool {
        match (self, value) {
            (Kind::Unknown, _) => true,
            (Kind::Array(a), Kind::Array(b)) | (Kind::Matrix(a), Kind::Matrix(b)) => a.admits(b),
            (Kind::Record(a), Kind::Record(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(label, ka)| b.get(label).is_some_and(|kb| ka.admits(kb)))
            }
            (a, b) => a == b,
        }
    }

    /// `Array(elem)`, saturating to `Top` past [`MAX_NESTING`] levels
    pub fn array_of(elem: &Kind) -> Kind {
        if elem.array_nesting() >= MAX_NESTING {
            Kind::Top
        } else {
            Kind::array(elem.clone())
        }
    }

    fn array_nesting(&self) -> usize {
        match self {
            Kind::Array(elem) => 1 + elem.array_nesting(),
            _ => 0,
        }
    }
}

fn record_leq(a: &BTreeMap<String, Kind>, b: &BTreeMap<String, Kind>) -> bool {
    b.iter()
        .all(|(label, kb)| a.get(label).is_some_and(|ka| ka.leq(kb)))
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Unknown => write!(f, "unknown"),
            Kind::Boolean => write!(f, "boolean"),
            Kind::UnsignedByte => write!(f, "unsignedByte"),
            Kind::Int => write!(f, "int"),
            Kind::Long => write!(f, "long"),
            Kind::Double => write!(f, "double"),
            Kind::Complex => write!(f, "complex"),
            Kind::Str => write!(f, "string"),
            Kind::Scalar => write!(f, "scalar"),
            Kind::Top => write!(f, "general"),
            Kind::Array(elem) => write!(f, "{{{}}}", elem),
            Kind::Matrix(elem) => write!(f, "[{}]", elem),
            Kind::Record(fields) => {
                write!(f, "{{")?;
                for (i, (label, kind)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", label, kind)?;
                }
                write!(f, "}}")
            }
        }
    }
}
