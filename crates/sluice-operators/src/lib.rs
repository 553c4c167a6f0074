#![forbid(unsafe_code)]
//! sluice-operators: the operator capability trait and everything needed to
//! implement it.
//!
//! - `traits`: the [`Operator`] trait every pipeline stage implements.
//! - `stream`: the lazy input/output containers operators hand each other.
//! - `control`: per-run services (diagnostics, cancellation, abort).
//! - `optimize`: the result type of predicate/order pushdown.
//! - `adapter` / `schematic`: build operators from a narrow function
//!   instead of implementing the trait by hand.
//! - `registry`: serialization of operators by name.
//! - builtins: `from_events`, `load_file`, `read_json`, `where`, `rename`,
//!   `pass`, `head`, `sort`, `write_json`, `save_file`, `discard`.

pub mod adapter;
pub mod control;
pub mod error;
pub mod optimize;
pub mod registry;
pub mod schematic;
pub mod stream;
pub mod traits;

pub mod file;
pub mod filter;
pub mod head;
pub mod json;
pub mod map;
pub mod pass;
pub mod sink;
pub mod sort;
pub mod source;

pub use adapter::{
    from_map, from_map_with_ctrl, from_source, from_source_with_ctrl, from_stream,
    from_stream_with_ctrl, Describe, Map, MapFn, Rewrite, Source, SourceFn, Stream, StreamFn,
};
pub use control::{ControlHandle, ControlPlane, LocalControlPlane};
pub use error::OpError;
pub use optimize::{do_not_optimize, order_invariant, EventOrder, OptimizeResult};
pub use registry::{builtins, OperatorSpec, Registry};
pub use schematic::{ProcessOutput, Schematic, SchematicFn};
pub use stream::{generator, Batch, Element, Generator, OperatorInput, OperatorOutput};
pub use traits::{BoxedOperator, DemandSettings, Location, Operator, OperatorExt, Signature};
