//! Transaction manager with injectable failures.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tcc_core::{Result, TccError};
use tcc_coordinator::manager::{
    BeginRootRequest, BeginRootResponse, BranchResultReport, EndRootRequest, EndRootResponse,
    JoinBranchRequest, JoinBranchResponse,
};
use tcc_coordinator::{LocalTransactionManager, TransactionManagerClient};

/// Wraps a [`LocalTransactionManager`] and fails selected calls on demand
#[derive(Debug, Default)]
pub struct FaultyManager {
    inner: Arc<LocalTransactionManager>,
    fail_begin: AtomicBool,
    fail_join: AtomicBool,
    fail_report: AtomicBool,
    fail_end: AtomicBool,
    join_delay: Mutex<Option<Duration>>,
    end_calls: AtomicUsize,
}

impl FaultyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records kept by the wrapped manager
    pub fn records(&self) -> &Arc<LocalTransactionManager> {
        &self.inner
    }

    pub fn fail_begin(&self, fail: bool) {
        self.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn fail_join(&self, fail: bool) {
        self.fail_join.store(fail, Ordering::SeqCst);
    }

    /// Sleep for `delay` before answering each `join_branch`
    pub fn delay_join(&self, delay: Duration) {
        *self.join_delay.lock() = Some(delay);
    }

    pub fn fail_report(&self, fail: bool) {
        self.fail_report.store(fail, Ordering::SeqCst);
    }

    pub fn fail_end(&self, fail: bool) {
        self.fail_end.store(fail, Ordering::SeqCst);
    }

    pub fn end_calls(&self) -> usize {
        self.end_calls.load(Ordering::SeqCst)
    }

    fn check(flag: &AtomicBool, call: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(TccError::transaction_manager(format!(
                "injected {call} failure"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionManagerClient for FaultyManager {
    async fn begin_root(&self, request: BeginRootRequest) -> Result<BeginRootResponse> {
        Self::check(&self.fail_begin, "begin_root")?;
        self.inner.begin_root(request).await
    }

    async fn join_branch(&self, request: JoinBranchRequest) -> Result<JoinBranchResponse> {
        let delay = *self.join_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Self::check(&self.fail_join, "join_branch")?;
        self.inner.join_branch(request).await
    }

    async fn report_branch_result(&self, report: BranchResultReport) -> Result<()> {
        Self::check(&self.fail_report, "report_branch_result")?;
        self.inner.report_branch_result(report).await
    }

    async fn end_root(&self, request: EndRootRequest) -> Result<EndRootResponse> {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_end, "end_root")?;
        self.inner.end_root(request).await
    }
}
