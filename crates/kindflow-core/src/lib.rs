//! # Kindflow Core
//!
//! Whole-program kind specialization and scalar replacement of boxed values.
//!
//! ## Modules
//!
//! - **[`ir`]** - Structured program representation and builders
//! - **[`specialize`]** - Kind lattice, term graph, constraint collection and
//!   the fixpoint solver
//! - **[`unbox`]** - Replacement storage and statement rewriting
//! - **[`pipeline`]** - The depth-iterated driver tying both together
//! - **[`eval`]** - A reference interpreter for checking rewrites
//!
//! ## Quick Start
//!
//! ```rust
//! use kindflow_core::prelude::*;
//!
//! let mut builder = ProgramBuilder::new();
//! let field = builder.field("f", Ty::Boxed(Kind::Unknown));
//! builder.function("fire", |f| {
//!     let x = f.local("x", Ty::Boxed(Kind::Unknown));
//!     f.assign(x, Rvalue::new_box(Kind::Int, vec![Operand::int(3)]));
//!     f.assign(field, x);
//! });
//! let mut program = builder.build();
//!
//! let report = Unboxer::default().run(&mut program).unwrap();
//! assert_eq!(report.total_replaced(), 2);
//! ```

pub mod config;
pub mod error;
pub mod eval;
pub mod ir;
pub mod pipeline;
pub mod specialize;
pub mod unbox;

pub use config::UnboxConfig;
pub use error::{Result, ShapeIssue, UnboxError};
pub use pipeline::{DepthReport, PipelineReport, Unboxer};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::UnboxConfig;
    pub use crate::error::{ShapeIssue, UnboxError};
    pub use crate::eval::{EvalError, Interpreter, Value};
    pub use crate::ir::{
        Call, CmpOp, Constant, Entity, FieldId, FunctionId, LocalId, Operand, Place, Program, ProgramBuilder,
        Rvalue, Stmt, Ty,
    };
    pub use crate::pipeline::{DepthReport, PipelineReport, Unboxer};
    pub use crate::specialize::{analyze, AnalysisContext, Kind, RuleRegistry};
    pub use crate::unbox::{Descriptor, Storage};
}
