//! The closed set of element kinds a pipeline can carry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What flows across an operator boundary.
///
/// `Void` is the input of sources and the output of sinks. During
/// instantiation an `Events`/`Bytes` kind corresponds to a lazy sequence of
/// batches of that kind, while `Void` corresponds to "no input" on the way in
/// and to a lazy sequence of unit values on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Void,
    Events,
    Bytes,
}

impl BatchKind {
    pub const ALL: [BatchKind; 3] = [BatchKind::Void, BatchKind::Events, BatchKind::Bytes];

    /// User-facing name, as printed in type errors.
    pub const fn name(self) -> &'static str {
        match self {
            BatchKind::Void => "void",
            BatchKind::Events => "events",
            BatchKind::Bytes => "bytes",
        }
    }

    pub const fn is_void(self) -> bool {
        matches!(self, BatchKind::Void)
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
