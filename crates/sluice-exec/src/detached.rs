//! Detached operators.
//!
//! A detached operator is instantiated like any other, but its output is
//! advanced on a dedicated worker thread so that it may block. The
//! cooperative side talks to the worker through two bounded queues:
//! upstream elements are forwarded with `try_send`, results are collected
//! with `try_recv`. When the worker has nothing ready the bridge yields a
//! no-op instead of waiting.

use std::sync::atomic::AtomicU64;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use sluice_operators::{
    generator, ControlHandle, Element, Generator, OpError, Operator, OperatorInput,
    OperatorOutput,
};

use crate::error::{ExecError, Result};
use crate::metrics::{meter_input, meter_output, MetricHandle};

/// Instantiate `op` behind a worker thread. The returned output never blocks.
pub fn instantiate_detached(
    op: &dyn Operator,
    input: OperatorInput,
    ctrl: ControlHandle,
    capacity: usize,
    handle: &MetricHandle,
    progress: &Arc<AtomicU64>,
) -> Result<OperatorOutput> {
    let name = op.name();
    let (op_input, feed) = match input {
        OperatorInput::Void => (OperatorInput::Void, None),
        OperatorInput::Events(upstream) => {
            let (rx, feed) = Feed::channel(upstream, capacity);
            (OperatorInput::Events(rx), Some(feed))
        }
        OperatorInput::Bytes(upstream) => {
            let (rx, feed) = Feed::channel(upstream, capacity);
            (OperatorInput::Bytes(rx), Some(feed))
        }
    };

    let started = Instant::now();
    let output = op.instantiate(meter_input(op_input, handle), ctrl.clone())?;
    handle.record_starting(started.elapsed());
    tracing::debug!(operator = %name, output = %output.kind(), "spawning detached worker");

    Ok(match meter_output(output, handle, progress) {
        OperatorOutput::Void(g) => {
            OperatorOutput::Void(Bridge::spawn(name, g, feed, ctrl, capacity)?)
        }
        OperatorOutput::Events(g) => {
            OperatorOutput::Events(Bridge::spawn(name, g, feed, ctrl, capacity)?)
        }
        OperatorOutput::Bytes(g) => {
            OperatorOutput::Bytes(Bridge::spawn(name, g, feed, ctrl, capacity)?)
        }
    })
}

/// Moves upstream elements into the worker's input queue.
trait Forward: Send {
    /// Offer at most one upstream element. Returns `false` once upstream is
    /// exhausted or the worker stopped listening.
    fn forward(&mut self) -> bool;
}

struct Feed<T> {
    upstream: Generator<T>,
    tx: SyncSender<T>,
    pending: Option<T>,
}

impl<T: Element> Feed<T> {
    fn channel(upstream: Generator<T>, capacity: usize) -> (Generator<T>, Box<dyn Forward>) {
        let (tx, rx) = sync_channel(capacity);
        let feed = Feed {
            upstream,
            tx,
            pending: None,
        };
        (generator(rx.into_iter()), Box::new(feed))
    }
}

impl<T: Element> Forward for Feed<T> {
    fn forward(&mut self) -> bool {
        let item = match self.pending.take() {
            Some(item) => item,
            None => match self.upstream.next() {
                Some(item) => item,
                None => return false,
            },
        };
        if item.is_noop() {
            return true;
        }
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(item)) => {
                self.pending = Some(item);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

struct Bridge<T> {
    name: String,
    feed: Option<Box<dyn Forward>>,
    rx: Option<Receiver<T>>,
    worker: Option<JoinHandle<()>>,
    ctrl: ControlHandle,
}

impl<T: Element> Bridge<T> {
    fn spawn(
        name: String,
        output: Generator<T>,
        feed: Option<Box<dyn Forward>>,
        ctrl: ControlHandle,
        capacity: usize,
    ) -> Result<Generator<T>> {
        let (tx, rx) = sync_channel(capacity);
        let worker_ctrl = ctrl.clone();
        let worker = thread::Builder::new()
            .name(format!("sluice-{name}"))
            .spawn(move || drive(output, tx, worker_ctrl))
            .map_err(|e| ExecError::Detached {
                operator: name.clone(),
                message: e.to_string(),
            })?;
        Ok(Box::new(Bridge {
            name,
            feed,
            rx: Some(rx),
            worker: Some(worker),
            ctrl,
        }))
    }
}

impl<T> Bridge<T> {
    fn join(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if worker.join().is_err() {
            tracing::error!(operator = %self.name, "detached worker panicked");
            self.ctrl
                .abort(OpError::exec(&self.name, "detached worker panicked"));
        }
    }
}

/// Worker loop: advance the operator and ship everything that is not a
/// no-op. Stops when the output ends, the receiver is gone, or the run was
/// cancelled.
fn drive<T: Element>(output: Generator<T>, tx: SyncSender<T>, ctrl: ControlHandle) {
    for item in output {
        if ctrl.is_cancelled() {
            break;
        }
        if item.is_noop() {
            continue;
        }
        if tx.send(item).is_err() {
            break;
        }
    }
}

impl<T: Element> Iterator for Bridge<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if let Some(feed) = self.feed.as_mut() {
            if !feed.forward() {
                // closes the worker's input queue
                self.feed = None;
            }
        }
        let rx = self.rx.as_ref()?;
        match rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) => Some(T::noop()),
            Err(TryRecvError::Disconnected) => {
                self.feed = None;
                self.rx = None;
                self.join();
                None
            }
        }
    }
}

/// Closing both queues unblocks the worker, so the join below returns once
/// the worker's current element is done.
impl<T> Drop for Bridge<T> {
    fn drop(&mut self) {
        self.feed = None;
        self.rx = None;
        self.join();
    }
}
