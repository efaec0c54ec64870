use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use rephrase_core::Trigger;
use rephrase_observability::Tracer;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::runner::{TriggerOutcome, TriggerRunner};

/// Starts a worker per trigger, one at a time.
///
/// A trigger that arrives while a worker runs is dropped, so two workers
/// never interleave their clipboard save and restore.
#[derive(Clone)]
pub struct Dispatcher {
    runner: Arc<TriggerRunner>,
    busy: Arc<AtomicBool>,
    tracer: Tracer,
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Dispatcher {
    pub fn new(runner: Arc<TriggerRunner>, tracer: Tracer) -> Self {
        Self {
            runner,
            busy: Arc::new(AtomicBool::new(false)),
            tracer,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Returns the worker, or `None` when the trigger was dropped.
    pub fn dispatch(&self, trigger: Trigger) -> Option<JoinHandle<TriggerOutcome>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("E_TRIGGER_BUSY: previous request still running, trigger ignored");
            self.tracer.event(
                None,
                "Dispatch",
                "DISPATCH.trigger",
                "skipped",
                Some(json!({"code": "E_TRIGGER_BUSY", "digit": trigger.digit.to_string()})),
            );
            return None;
        }

        let guard = BusyGuard(self.busy.clone());
        let runner = self.runner.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            runner.on_trigger(trigger).await
        }))
    }
}
