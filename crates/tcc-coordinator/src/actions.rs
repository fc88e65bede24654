//! Branch action table
//!
//! Try/Confirm/Cancel callbacks are addressed by `(service, action)` name
//! pairs. Services register strategy objects here up front and every
//! reference in a [`BranchSpec`](crate::branch::BranchSpec) is resolved at
//! Join time, so an unknown name fails the Join instead of the End.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tcc_core::{ActionError, BranchId, Phase, Result, RootId, TccError};

/// Context handed to every action invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchContext {
    /// Root the branch belongs to
    pub root_id: RootId,
    /// Branch being driven
    pub branch_id: BranchId,
    /// Owning service
    pub service_name: String,
    /// Phase being invoked
    pub phase: Phase,
    /// Whether the branch forwards the transaction context downstream
    pub is_propagator: bool,
}

/// A single Try, Confirm or Cancel callback.
///
/// Confirm and Cancel implementations should be idempotent at the business
/// level too: the coordinator never invokes them twice after a success, but
/// a crash between the action succeeding and the guard recording it is not
/// covered.
#[async_trait]
pub trait BranchAction: Send + Sync {
    async fn invoke(&self, ctx: &BranchContext) -> std::result::Result<(), ActionError>;
}

/// Adapter turning an async closure into a [`BranchAction`]
pub struct FnAction<F>(F);

#[async_trait]
impl<F, Fut> BranchAction for FnAction<F>
where
    F: Fn(BranchContext) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), ActionError>> + Send,
{
    async fn invoke(&self, ctx: &BranchContext) -> std::result::Result<(), ActionError> {
        (self.0)(ctx.clone()).await
    }
}

/// Wrap an async closure as a shareable action
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn BranchAction>
where
    F: Fn(BranchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), ActionError>> + Send + 'static,
{
    Arc::new(FnAction(f))
}

/// The three callbacks of one branch after resolution
#[derive(Clone)]
pub struct ResolvedActions {
    /// Try action
    pub try_action: Arc<dyn BranchAction>,
    /// Confirm action
    pub confirm: Arc<dyn BranchAction>,
    /// Cancel action
    pub cancel: Arc<dyn BranchAction>,
}

impl ResolvedActions {
    /// Action for `phase`
    pub fn for_phase(&self, phase: Phase) -> &Arc<dyn BranchAction> {
        match phase {
            Phase::Try => &self.try_action,
            Phase::Confirm => &self.confirm,
            Phase::Cancel => &self.cancel,
        }
    }
}

impl fmt::Debug for ResolvedActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedActions").finish_non_exhaustive()
    }
}

/// Registry of named actions, keyed by service then action name
#[derive(Default)]
pub struct ActionTable {
    actions: RwLock<HashMap<(String, String), Arc<dyn BranchAction>>>,
}

impl ActionTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `action` as `service.name`, replacing any previous entry
    pub fn register(
        &self,
        service: impl Into<String>,
        name: impl Into<String>,
        action: Arc<dyn BranchAction>,
    ) {
        let key = (service.into(), name.into());
        tracing::debug!(service = %key.0, action = %key.1, "Registered branch action");
        self.actions.write().insert(key, action);
    }

    /// Register an async closure as `service.name`
    pub fn register_fn<F, Fut>(&self, service: impl Into<String>, name: impl Into<String>, f: F)
    where
        F: Fn(BranchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), ActionError>> + Send + 'static,
    {
        self.register(service, name, action_fn(f));
    }

    /// Whether `service.name` is registered
    pub fn contains(&self, service: &str, name: &str) -> bool {
        self.actions
            .read()
            .contains_key(&(service.to_string(), name.to_string()))
    }

    /// Number of registered actions
    pub fn len(&self) -> usize {
        self.actions.read().len()
    }

    /// Whether no action is registered
    pub fn is_empty(&self) -> bool {
        self.actions.read().is_empty()
    }

    fn lookup(&self, service: &str, name: &str, phase: Phase) -> Result<Arc<dyn BranchAction>> {
        self.actions
            .read()
            .get(&(service.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| TccError::ActionNotRegistered {
                service: service.to_string(),
                action: name.to_string(),
                phase,
            })
    }

    /// Resolve all three callbacks of a branch, failing on the first unknown name
    pub fn resolve(
        &self,
        service: &str,
        try_ref: &str,
        confirm_ref: &str,
        cancel_ref: &str,
    ) -> Result<ResolvedActions> {
        Ok(ResolvedActions {
            try_action: self.lookup(service, try_ref, Phase::Try)?,
            confirm: self.lookup(service, confirm_ref, Phase::Confirm)?,
            cancel: self.lookup(service, cancel_ref, Phase::Cancel)?,
        })
    }
}

impl fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionTable")
            .field("registered", &self.len())
            .finish()
    }
}
