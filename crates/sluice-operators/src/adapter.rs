//! Build full operators from narrow logic.
//!
//! An implementer picks exactly one shape and the matching wrapper turns it
//! into an [`Operator`]:
//!
//! | shape      | trait        | wrapper       | closure constructor            |
//! |------------|--------------|---------------|--------------------------------|
//! | source     | [`SourceFn`] | [`Source`]    | [`from_source`]                |
//! | per-element| [`MapFn`]    | [`Map`]       | [`from_map`]                   |
//! | stream     | [`StreamFn`] | [`Stream`]    | [`from_stream`]                |
//! | per-schema | [`SchematicFn`](crate::schematic::SchematicFn) | [`Schematic`](crate::schematic::Schematic) | none |
//!
//! Each closure constructor has a `_with_ctrl` variant whose closure also
//! receives the control plane. The shape is chosen by the constructor, so
//! an implementation can never match more than one.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use sluice_core::expr::Expression;
use sluice_core::kind::BatchKind;

use crate::control::{ControlHandle, ControlPlane};
use crate::error::OpError;
use crate::optimize::{EventOrder, OptimizeResult};
use crate::registry::OperatorSpec;
use crate::stream::{Batch, Element, Generator, OperatorInput, OperatorOutput};
use crate::traits::{BoxedOperator, DemandSettings, Location, Operator};

/// Everything an adapter-built operator has besides its data path.
pub trait Describe: Clone + fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> String;

    /// Defaults to "do not optimize".
    fn optimize(&self, _filter: &Expression, _order: EventOrder) -> Rewrite<Self> {
        Rewrite::do_not_optimize(self)
    }

    fn location(&self) -> Location {
        Location::Anywhere
    }

    fn detached(&self) -> bool {
        false
    }

    fn internal(&self) -> bool {
        false
    }

    fn input_independent(&self) -> bool {
        false
    }

    fn idle_after(&self) -> Duration {
        Duration::ZERO
    }

    fn demand(&self) -> DemandSettings {
        DemandSettings::default()
    }

    /// Configuration object the registry can rebuild this logic from.
    fn config(&self) -> Result<serde_json::Value, OpError> {
        Err(OpError::NotSerializable(self.name()))
    }
}

/// [`OptimizeResult`] in terms of the logic type; the wrapper boxes the
/// replacement.
#[derive(Debug, Clone)]
pub struct Rewrite<L> {
    pub filter: Option<Expression>,
    pub order: EventOrder,
    pub replacement: Option<L>,
}

impl<L: Clone> Rewrite<L> {
    pub fn do_not_optimize(logic: &L) -> Self {
        Self {
            filter: None,
            order: EventOrder::Ordered,
            replacement: Some(logic.clone()),
        }
    }

    pub fn order_invariant(logic: &L, order: EventOrder) -> Self {
        Self {
            filter: None,
            order,
            replacement: Some(logic.clone()),
        }
    }

    /// Box the replacement with `wrap`. An operator that does not consume
    /// events cannot relax the order upstream of it.
    pub(crate) fn into_result<O, W>(self, input: BatchKind, wrap: W) -> OptimizeResult
    where
        O: Operator,
        W: FnOnce(L) -> O,
    {
        let mut order = self.order;
        if input != BatchKind::Events {
            debug_assert!(
                self.filter
                    .as_ref()
                    .map_or(true, Expression::is_trivially_true),
                "an operator without event input returned a non-trivial filter"
            );
            order = EventOrder::Ordered;
        }
        OptimizeResult::new(
            self.filter,
            order,
            self.replacement
                .map(|logic| Box::new(wrap(logic)) as BoxedOperator),
        )
    }
}

fn spec_of<L: Describe>(logic: &L) -> Result<OperatorSpec, OpError> {
    OperatorSpec::from_config(logic.name(), logic.config()?)
}

fn expect_kind(name: String, expected: BatchKind, input: BatchKind) -> Result<(), OpError> {
    if input == expected {
        Ok(())
    } else {
        Err(OpError::kind_mismatch(name, input))
    }
}

/// Produces a stream from nothing.
pub trait SourceFn: Describe {
    type Output: Element;

    fn produce(&self, ctrl: ControlHandle) -> Result<Generator<Self::Output>, OpError>;
}

/// Maps every input element to exactly one output element.
pub trait MapFn: Describe {
    type Input: Batch;
    type Output: Element;

    fn apply(&self, input: Self::Input, ctrl: &dyn ControlPlane) -> Self::Output;
}

/// Transforms the whole input stream. The returned stream must keep the
/// fairness contract: after pulling the input once it yields at least once
/// before pulling again.
pub trait StreamFn: Describe {
    type Input: Batch;
    type Output: Element;

    fn transform(
        &self,
        input: Generator<Self::Input>,
        ctrl: ControlHandle,
    ) -> Result<Generator<Self::Output>, OpError>;
}

macro_rules! describe_passthrough {
    () => {
        fn name(&self) -> String {
            self.0.name()
        }

        fn copy(&self) -> BoxedOperator {
            Box::new(self.clone())
        }

        fn location(&self) -> Location {
            self.0.location()
        }

        fn detached(&self) -> bool {
            self.0.detached()
        }

        fn internal(&self) -> bool {
            self.0.internal()
        }

        fn input_independent(&self) -> bool {
            self.0.input_independent()
        }

        fn idle_after(&self) -> Duration {
            self.0.idle_after()
        }

        fn demand(&self) -> DemandSettings {
            self.0.demand()
        }

        fn spec(&self) -> Result<OperatorSpec, OpError> {
            spec_of(&self.0)
        }
    };
}

#[derive(Debug, Clone)]
pub struct Source<L>(pub L);

impl<L: SourceFn> Source<L> {
    pub fn new(logic: L) -> Self {
        Self(logic)
    }

    pub fn boxed(logic: L) -> BoxedOperator {
        Box::new(Self(logic))
    }
}

impl<L: SourceFn> Operator for Source<L> {
    describe_passthrough!();

    fn instantiate(
        &self,
        input: OperatorInput,
        ctrl: ControlHandle,
    ) -> Result<OperatorOutput, OpError> {
        expect_kind(self.0.name(), BatchKind::Void, input.kind())?;
        Ok(L::Output::into_output(self.0.produce(ctrl)?))
    }

    fn optimize(&self, filter: &Expression, order: EventOrder) -> OptimizeResult {
        self.0
            .optimize(filter, order)
            .into_result(BatchKind::Void, Source)
    }

    fn infer_type(&self, input: BatchKind) -> Result<BatchKind, OpError> {
        expect_kind(self.0.name(), BatchKind::Void, input)?;
        Ok(L::Output::KIND)
    }
}

#[derive(Debug, Clone)]
pub struct Map<L>(pub L);

impl<L: MapFn> Map<L> {
    pub fn new(logic: L) -> Self {
        Self(logic)
    }

    pub fn boxed(logic: L) -> BoxedOperator {
        Box::new(Self(logic))
    }
}

impl<L: MapFn> Operator for Map<L> {
    describe_passthrough!();

    fn instantiate(
        &self,
        input: OperatorInput,
        ctrl: ControlHandle,
    ) -> Result<OperatorOutput, OpError> {
        let input = L::Input::from_input(input)
            .map_err(|other| OpError::kind_mismatch(self.0.name(), other.kind()))?;
        let logic = self.0.clone();
        let output = input.map(move |element| logic.apply(element, &*ctrl));
        Ok(L::Output::into_output(Box::new(output)))
    }

    fn optimize(&self, filter: &Expression, order: EventOrder) -> OptimizeResult {
        self.0
            .optimize(filter, order)
            .into_result(L::Input::KIND, Map)
    }

    fn infer_type(&self, input: BatchKind) -> Result<BatchKind, OpError> {
        expect_kind(self.0.name(), L::Input::KIND, input)?;
        Ok(L::Output::KIND)
    }
}

#[derive(Debug, Clone)]
pub struct Stream<L>(pub L);

impl<L: StreamFn> Stream<L> {
    pub fn new(logic: L) -> Self {
        Self(logic)
    }

    pub fn boxed(logic: L) -> BoxedOperator {
        Box::new(Self(logic))
    }
}

impl<L: StreamFn> Operator for Stream<L> {
    describe_passthrough!();

    fn instantiate(
        &self,
        input: OperatorInput,
        ctrl: ControlHandle,
    ) -> Result<OperatorOutput, OpError> {
        let input = L::Input::from_input(input)
            .map_err(|other| OpError::kind_mismatch(self.0.name(), other.kind()))?;
        Ok(L::Output::into_output(self.0.transform(input, ctrl)?))
    }

    fn optimize(&self, filter: &Expression, order: EventOrder) -> OptimizeResult {
        self.0
            .optimize(filter, order)
            .into_result(L::Input::KIND, Stream)
    }

    fn infer_type(&self, input: BatchKind) -> Result<BatchKind, OpError> {
        expect_kind(self.0.name(), L::Input::KIND, input)?;
        Ok(L::Output::KIND)
    }
}

// Closure-backed logic. These never serialize and never optimize.

pub struct FnSource<F> {
    name: String,
    f: Arc<F>,
}

pub struct FnMap<In, Out, F> {
    name: String,
    f: Arc<F>,
    _types: PhantomData<fn(In) -> Out>,
}

pub struct FnStream<In, F> {
    name: String,
    f: Arc<F>,
    _types: PhantomData<fn(In)>,
}

macro_rules! closure_logic {
    ($ty:ident < $($p:ident),* >) => {
        impl<$($p),*> fmt::Debug for $ty<$($p),*> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ty)).field("name", &self.name).finish()
            }
        }

        impl<$($p),*> Describe for $ty<$($p),*>
        where
            $($p: 'static,)*
            Self: Send + Sync,
        {
            fn name(&self) -> String {
                self.name.clone()
            }
        }
    };
}

impl<F> Clone for FnSource<F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            f: Arc::clone(&self.f),
        }
    }
}

impl<In, Out, F> Clone for FnMap<In, Out, F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            f: Arc::clone(&self.f),
            _types: PhantomData,
        }
    }
}

impl<In, F> Clone for FnStream<In, F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            f: Arc::clone(&self.f),
            _types: PhantomData,
        }
    }
}

closure_logic!(FnSource<F>);
closure_logic!(FnMap<In, Out, F>);
closure_logic!(FnStream<In, F>);

impl<F, I> SourceFn for FnSource<F>
where
    F: Fn(ControlHandle) -> I + Send + Sync + 'static,
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Element,
{
    type Output = I::Item;

    fn produce(&self, ctrl: ControlHandle) -> Result<Generator<I::Item>, OpError> {
        Ok(Box::new((self.f)(ctrl).into_iter()))
    }
}

impl<In, Out, F> MapFn for FnMap<In, Out, F>
where
    In: Batch,
    Out: Element,
    F: Fn(In, &dyn ControlPlane) -> Out + Send + Sync + 'static,
{
    type Input = In;
    type Output = Out;

    fn apply(&self, input: In, ctrl: &dyn ControlPlane) -> Out {
        (self.f)(input, ctrl)
    }
}

impl<In, F, I> StreamFn for FnStream<In, F>
where
    In: Batch,
    F: Fn(Generator<In>, ControlHandle) -> I + Send + Sync + 'static,
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Element,
{
    type Input = In;
    type Output = I::Item;

    fn transform(
        &self,
        input: Generator<In>,
        ctrl: ControlHandle,
    ) -> Result<Generator<I::Item>, OpError> {
        Ok(Box::new((self.f)(input, ctrl).into_iter()))
    }
}

/// Source operator from a closure producing the output elements.
pub fn from_source<F, I>(name: impl Into<String>, f: F) -> BoxedOperator
where
    F: Fn() -> I + Send + Sync + 'static,
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Element,
{
    from_source_with_ctrl(name, move |_ctrl: ControlHandle| f())
}

pub fn from_source_with_ctrl<F, I>(name: impl Into<String>, f: F) -> BoxedOperator
where
    F: Fn(ControlHandle) -> I + Send + Sync + 'static,
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Element,
{
    Source::boxed(FnSource {
        name: name.into(),
        f: Arc::new(f),
    })
}

/// Per-element operator from a closure.
pub fn from_map<In, Out, F>(name: impl Into<String>, f: F) -> BoxedOperator
where
    In: Batch,
    Out: Element,
    F: Fn(In) -> Out + Send + Sync + 'static,
{
    from_map_with_ctrl(name, move |input: In, _ctrl: &dyn ControlPlane| f(input))
}

pub fn from_map_with_ctrl<In, Out, F>(name: impl Into<String>, f: F) -> BoxedOperator
where
    In: Batch,
    Out: Element,
    F: Fn(In, &dyn ControlPlane) -> Out + Send + Sync + 'static,
{
    Map::boxed(FnMap {
        name: name.into(),
        f: Arc::new(f),
        _types: PhantomData,
    })
}

/// Whole-stream operator from a closure over the input generator.
pub fn from_stream<In, F, I>(name: impl Into<String>, f: F) -> BoxedOperator
where
    In: Batch,
    F: Fn(Generator<In>) -> I + Send + Sync + 'static,
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Element,
{
    from_stream_with_ctrl(name, move |input: Generator<In>, _ctrl: ControlHandle| f(input))
}

pub fn from_stream_with_ctrl<In, F, I>(name: impl Into<String>, f: F) -> BoxedOperator
where
    In: Batch,
    F: Fn(Generator<In>, ControlHandle) -> I + Send + Sync + 'static,
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Element,
{
    Stream::boxed(FnStream {
        name: name.into(),
        f: Arc::new(f),
        _types: PhantomData,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::LocalControlPlane;
    use crate::stream::generator;
    use sluice_core::chunk::ByteChunk;
    use sluice_core::types::EventBatch;

    fn ctrl() -> ControlHandle {
        LocalControlPlane::shared("test")
    }

    #[test]
    fn closure_source_produces_bytes() {
        let op = from_source("hello", || vec![ByteChunk::from("a"), ByteChunk::from("b")]);
        assert_eq!(op.infer_type(BatchKind::Void).ok(), Some(BatchKind::Bytes));
        let OperatorOutput::Bytes(out) = op.instantiate(OperatorInput::Void, ctrl()).unwrap() else {
            panic!("expected bytes");
        };
        assert_eq!(out.map(|c| c.len()).sum::<usize>(), 2);
    }

    #[test]
    fn closure_map_preserves_count() {
        let op = from_map("len", |c: ByteChunk| ByteChunk::from(vec![c.len() as u8]));
        let input = OperatorInput::Bytes(generator(
            vec![ByteChunk::from("abc"), ByteChunk::empty()].into_iter(),
        ));
        let OperatorOutput::Bytes(out) = op.instantiate(input, ctrl()).unwrap() else {
            panic!("expected bytes");
        };
        let lens: Vec<Vec<u8>> = out.map(|c| c.as_bytes().to_vec()).collect();
        assert_eq!(lens, vec![vec![3], vec![0]]);
    }

    #[test]
    fn closure_stream_to_void() {
        let op = from_stream("count", |input: Generator<EventBatch>| input.map(|_| ()));
        assert_eq!(op.infer_type(BatchKind::Events).ok(), Some(BatchKind::Void));
        let err = op.infer_type(BatchKind::Bytes).unwrap_err();
        assert!(err.is_kind_mismatch());
    }

    #[test]
    fn wrong_kind_is_typed_error() {
        let op = from_map("noop", |b: EventBatch| b);
        let err = op.instantiate(OperatorInput::Void, ctrl()).unwrap_err();
        assert_eq!(err.to_string(), "'noop' cannot be used as a source");
        let src = from_source("s", || Vec::<EventBatch>::new());
        let err = src
            .instantiate(OperatorInput::empty(BatchKind::Events), ctrl())
            .unwrap_err();
        assert_eq!(err.to_string(), "'s' does not accept events as input");
    }

    #[test]
    fn closures_do_not_optimize_or_serialize() {
        let op = from_map("noop", |b: EventBatch| b);
        let res = op.optimize(&Expression::trivially_true(), EventOrder::Unordered);
        assert!(res.filter.is_none());
        assert_eq!(res.order, EventOrder::Ordered);
        assert_eq!(res.replacement.map(|r| r.name()).as_deref(), Some("noop"));
        assert!(matches!(op.spec(), Err(OpError::NotSerializable(_))));
    }
}
