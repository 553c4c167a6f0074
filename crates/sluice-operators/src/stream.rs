//! Element streams handed between operators.
//!
//! Streams are pull-based: an operator's output is a lazy iterator that
//! advances its input only when it is itself advanced. Every stream may
//! yield the kind's no-op element (an empty batch, an empty chunk, or `()`)
//! to hand control back to the scheduler without producing data.

use sluice_core::chunk::ByteChunk;
use sluice_core::kind::BatchKind;
use sluice_core::types::EventBatch;

/// A lazy, resumable sequence of elements.
pub type Generator<T> = Box<dyn Iterator<Item = T> + Send>;

/// Box any sendable iterator as a [`Generator`].
pub fn generator<T, I>(iter: I) -> Generator<T>
where
    I: Iterator<Item = T> + Send + 'static,
{
    Box::new(iter)
}

/// What an operator consumes. `Void` carries nothing: the operator is the
/// start of the pipeline.
pub enum OperatorInput {
    Void,
    Events(Generator<EventBatch>),
    Bytes(Generator<ByteChunk>),
}

impl OperatorInput {
    pub fn kind(&self) -> BatchKind {
        match self {
            OperatorInput::Void => BatchKind::Void,
            OperatorInput::Events(_) => BatchKind::Events,
            OperatorInput::Bytes(_) => BatchKind::Bytes,
        }
    }

    /// An input of `kind` that ends immediately.
    pub fn empty(kind: BatchKind) -> Self {
        match kind {
            BatchKind::Void => OperatorInput::Void,
            BatchKind::Events => OperatorInput::Events(Box::new(std::iter::empty())),
            BatchKind::Bytes => OperatorInput::Bytes(Box::new(std::iter::empty())),
        }
    }
}

impl std::fmt::Debug for OperatorInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OperatorInput::{}", self.kind())
    }
}

/// What an operator produces. A `Void` output still is a generator: a sink
/// yields `()` once per unit of work so that it can be driven step by step.
pub enum OperatorOutput {
    Void(Generator<()>),
    Events(Generator<EventBatch>),
    Bytes(Generator<ByteChunk>),
}

impl OperatorOutput {
    pub fn kind(&self) -> BatchKind {
        match self {
            OperatorOutput::Void(_) => BatchKind::Void,
            OperatorOutput::Events(_) => BatchKind::Events,
            OperatorOutput::Bytes(_) => BatchKind::Bytes,
        }
    }

    /// Feed this output to the next operator. A void output cannot be
    /// consumed; it is handed back unchanged.
    pub fn into_input(self) -> Result<OperatorInput, OperatorOutput> {
        match self {
            OperatorOutput::Events(g) => Ok(OperatorInput::Events(g)),
            OperatorOutput::Bytes(g) => Ok(OperatorInput::Bytes(g)),
            void @ OperatorOutput::Void(_) => Err(void),
        }
    }
}

impl std::fmt::Debug for OperatorOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OperatorOutput::{}", self.kind())
    }
}

/// One of the three element types a stream can carry.
pub trait Element: Send + Sized + 'static {
    const KIND: BatchKind;

    /// The element yielded when there is nothing to report.
    fn noop() -> Self;

    fn is_noop(&self) -> bool;

    /// Rows for events, bytes for chunks, zero for void.
    fn units(&self) -> u64;

    fn approx_bytes(&self) -> u64;

    fn into_output(stream: Generator<Self>) -> OperatorOutput;

    /// Feed a stream of this element to an operator. A void stream carries
    /// nothing and becomes [`OperatorInput::Void`].
    fn into_input(stream: Generator<Self>) -> OperatorInput;
}

/// An element type that can also be consumed, i.e. events or bytes.
pub trait Batch: Element {
    /// Unwrap a matching input; any other kind is handed back.
    fn from_input(input: OperatorInput) -> Result<Generator<Self>, OperatorInput>;
}

impl Element for EventBatch {
    const KIND: BatchKind = BatchKind::Events;

    fn noop() -> Self {
        EventBatch::empty()
    }

    fn is_noop(&self) -> bool {
        self.is_empty()
    }

    fn units(&self) -> u64 {
        self.rows() as u64
    }

    fn approx_bytes(&self) -> u64 {
        EventBatch::approx_bytes(self)
    }

    fn into_output(stream: Generator<Self>) -> OperatorOutput {
        OperatorOutput::Events(stream)
    }

    fn into_input(stream: Generator<Self>) -> OperatorInput {
        OperatorInput::Events(stream)
    }
}

impl Batch for EventBatch {
    fn from_input(input: OperatorInput) -> Result<Generator<Self>, OperatorInput> {
        match input {
            OperatorInput::Events(g) => Ok(g),
            other => Err(other),
        }
    }
}

impl Element for ByteChunk {
    const KIND: BatchKind = BatchKind::Bytes;

    fn noop() -> Self {
        ByteChunk::empty()
    }

    fn is_noop(&self) -> bool {
        self.is_empty()
    }

    fn units(&self) -> u64 {
        self.len() as u64
    }

    fn approx_bytes(&self) -> u64 {
        self.len() as u64
    }

    fn into_output(stream: Generator<Self>) -> OperatorOutput {
        OperatorOutput::Bytes(stream)
    }

    fn into_input(stream: Generator<Self>) -> OperatorInput {
        OperatorInput::Bytes(stream)
    }
}

impl Batch for ByteChunk {
    fn from_input(input: OperatorInput) -> Result<Generator<Self>, OperatorInput> {
        match input {
            OperatorInput::Bytes(g) => Ok(g),
            other => Err(other),
        }
    }
}

impl Element for () {
    const KIND: BatchKind = BatchKind::Void;

    fn noop() -> Self {}

    fn is_noop(&self) -> bool {
        true
    }

    fn units(&self) -> u64 {
        0
    }

    fn approx_bytes(&self) -> u64 {
        0
    }

    fn into_output(stream: Generator<Self>) -> OperatorOutput {
        OperatorOutput::Void(stream)
    }

    fn into_input(_stream: Generator<Self>) -> OperatorInput {
        OperatorInput::Void
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_inputs_have_requested_kind() {
        for kind in BatchKind::ALL {
            assert_eq!(OperatorInput::empty(kind).kind(), kind);
        }
    }

    #[test]
    fn void_output_is_not_an_input() {
        let out = OperatorOutput::Void(generator(std::iter::once(())));
        assert!(out.into_input().is_err());
        let out = OperatorOutput::Bytes(generator(std::iter::empty()));
        assert_eq!(out.into_input().map(|i| i.kind()).ok(), Some(BatchKind::Bytes));
    }
}
