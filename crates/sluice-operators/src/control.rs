//! The per-run services an operator sees while it is instantiated and run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use sluice_core::diagnostics::{CollectingHandler, Diagnostic, DiagnosticHandler, LoggingHandler};
use sluice_core::id::RunId;

use crate::error::OpError;

/// Services shared by all operators of one run.
///
/// `abort` is how a running generator reports a typed failure: a generator
/// cannot return an error itself, so it records the error here and ends its
/// stream. The executor checks for it after every step.
pub trait ControlPlane: Send + Sync {
    fn diagnostics(&self) -> &dyn DiagnosticHandler;

    fn run_id(&self) -> RunId;

    /// Textual definition of the running pipeline, for diagnostics.
    fn definition(&self) -> &str;

    /// Record a fatal error. Only the first one is kept.
    fn abort(&self, error: OpError);

    fn take_abort(&self) -> Option<OpError>;

    fn is_cancelled(&self) -> bool;

    fn cancel(&self);
}

pub type ControlHandle = Arc<dyn ControlPlane>;

/// Diagnostics kept per run; everything is still logged.
pub const MAX_COLLECTED_DIAGNOSTICS: usize = 1024;

/// In-process control plane: diagnostics go to `tracing` and the first
/// [`MAX_COLLECTED_DIAGNOSTICS`] are collected.
pub struct LocalControlPlane {
    run_id: RunId,
    definition: String,
    handler: LoggingHandler<CollectingHandler>,
    aborted: Mutex<Option<OpError>>,
    cancelled: AtomicBool,
}

impl LocalControlPlane {
    pub fn new(definition: impl Into<String>) -> Self {
        Self {
            run_id: RunId::new(),
            definition: definition.into(),
            handler: LoggingHandler::new(CollectingHandler::with_limit(MAX_COLLECTED_DIAGNOSTICS)),
            aborted: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn shared(definition: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(definition))
    }

    pub fn collected(&self) -> Vec<Diagnostic> {
        self.handler.inner().diagnostics()
    }

    pub fn error_count(&self) -> usize {
        self.handler.inner().error_count()
    }

    /// Diagnostics that were logged but not collected.
    pub fn dropped_diagnostics(&self) -> usize {
        self.handler.inner().dropped()
    }
}

impl ControlPlane for LocalControlPlane {
    fn diagnostics(&self) -> &dyn DiagnosticHandler {
        &self.handler
    }

    fn run_id(&self) -> RunId {
        self.run_id
    }

    fn definition(&self) -> &str {
        &self.definition
    }

    fn abort(&self, error: OpError) {
        tracing::debug!(error = %error, "operator aborted the run");
        let mut slot = match self.aborted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            *slot = Some(error);
        }
        self.cancelled.store(true, Ordering::Release);
    }

    fn take_abort(&self) -> Option<OpError> {
        match self.aborted.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}
