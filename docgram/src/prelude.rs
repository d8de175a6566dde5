//! Convenient re-exports of commonly used types from docgram.
//!
//! Import this prelude module to quickly access the most frequently used
//! types and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docgram::prelude::*;
//! ```

pub use docgram_core::{
    cast::cast,
    delta::Delta,
    document::TrackedDocument,
    driver::DriverCollection,
    error::{CastError, OdmError, OdmResult},
    middleware::{HookContext, HookResult, Interceptor, MiddlewareRegistry, Next, Terminal},
    model::Model,
    query::{Query, QueryOp},
    schema::{MethodTarget, PathSpec, ScalarKind, Schema},
};
