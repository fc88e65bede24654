//! Scripted branch actions
//!
//! Actions whose behaviour is set by the test (fail N times, fail forever,
//! sleep) and which record how often and how concurrently they ran.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tcc_core::ActionError;
use tcc_coordinator::{ActionTable, BranchAction, BranchContext, BranchSpec};

#[derive(Debug, Default)]
struct Script {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    always_fail: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    contexts: Mutex<Vec<BranchContext>>,
}

/// Cloneable handle to a scripted action; clones share counters
#[derive(Debug, Clone, Default)]
pub struct ScriptedAction {
    script: Arc<Script>,
}

impl ScriptedAction {
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Fail the first `n` invocations, then succeed
    pub fn failing_times(n: usize) -> Self {
        let action = Self::default();
        action.script.failures_left.store(n, Ordering::SeqCst);
        action
    }

    pub fn always_failing() -> Self {
        let action = Self::default();
        action.set_always_fail(true);
        action
    }

    /// Sleep for `delay` inside every invocation
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.script.delay.lock() = Some(delay);
        self
    }

    pub fn set_always_fail(&self, fail: bool) {
        self.script.always_fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous invocations observed
    pub fn max_concurrency(&self) -> usize {
        self.script.max_in_flight.load(Ordering::SeqCst)
    }

    /// Contexts of every invocation, in call order
    pub fn contexts(&self) -> Vec<BranchContext> {
        self.script.contexts.lock().clone()
    }

    pub fn as_action(&self) -> Arc<dyn BranchAction> {
        Arc::new(self.clone())
    }

    fn should_fail(&self) -> bool {
        if self.script.always_fail.load(Ordering::SeqCst) {
            return true;
        }
        self.script
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BranchAction for ScriptedAction {
    async fn invoke(&self, ctx: &BranchContext) -> Result<(), ActionError> {
        let call = self.script.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.contexts.lock().push(ctx.clone());
        let now = self.script.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.script.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.script.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.should_fail() {
            Err(ActionError::new(format!(
                "{} {} scripted failure #{call}",
                ctx.service_name, ctx.phase
            )))
        } else {
            Ok(())
        }
    }
}

/// Try/Confirm/Cancel scripts for one service
#[derive(Debug, Clone, Default)]
pub struct ServiceScript {
    pub try_action: ScriptedAction,
    pub confirm: ScriptedAction,
    pub cancel: ScriptedAction,
}

impl ServiceScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_try(mut self, action: ScriptedAction) -> Self {
        self.try_action = action;
        self
    }

    pub fn with_confirm(mut self, action: ScriptedAction) -> Self {
        self.confirm = action;
        self
    }

    pub fn with_cancel(mut self, action: ScriptedAction) -> Self {
        self.cancel = action;
        self
    }

    /// Register as `service.try`, `service.confirm`, `service.cancel` and
    /// return a matching branch spec
    pub fn register(&self, table: &ActionTable, service: &str) -> BranchSpec {
        table.register(service, "try", self.try_action.as_action());
        table.register(service, "confirm", self.confirm.as_action());
        table.register(service, "cancel", self.cancel.as_action());
        BranchSpec::new(service, "try", "confirm", "cancel")
    }
}
