use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Why a session bridge was torn down. Checked by identity, never by
/// error-message sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A newer submission superseded this one; exit silently.
    NewRequest,
    /// The Agent finished cleanly; emit the completion footer.
    Finished,
    /// The Agent or the bridge failed; emit the error path.
    Error,
    /// The user ran `/abort`.
    UserAbort,
}

#[derive(Clone)]
pub struct CancelHandle {
    token: CancellationToken,
    reason: Arc<StdMutex<Option<AbortReason>>>,
}

impl CancelHandle {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(StdMutex::new(None)),
        }
    }

    /// Abort with `reason`. The first reason wins; later aborts are no-ops.
    pub fn abort(&self, reason: AbortReason) {
        let mut slot = self.reason.lock().unwrap();
        if slot.is_none() {
            *slot = Some(reason);
            self.token.cancel();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<AbortReason> {
        *self.reason.lock().unwrap()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    fn same_as(&self, other: &CancelHandle) -> bool {
        Arc::ptr_eq(&self.reason, &other.reason)
    }
}

/// Process-wide map of session id → active cancellation handle. At most one
/// handle is live per session.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<Mutex<HashMap<String, CancelHandle>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh handle for `session_id`, aborting any previous one
    /// with [`AbortReason::NewRequest`]. Returns the new handle and whether
    /// a previous submission was superseded.
    pub async fn begin(&self, session_id: &str) -> (CancelHandle, bool) {
        let handle = CancelHandle::new();
        let previous = self
            .inner
            .lock()
            .await
            .insert(session_id.to_string(), handle.clone());

        let superseded = match previous {
            Some(prev) => {
                prev.abort(AbortReason::NewRequest);
                true
            }
            None => false,
        };
        (handle, superseded)
    }

    pub async fn get(&self, session_id: &str) -> Option<CancelHandle> {
        self.inner.lock().await.get(session_id).cloned()
    }

    /// Abort the current handle for `session_id`, if any.
    pub async fn abort(&self, session_id: &str, reason: AbortReason) -> bool {
        match self.inner.lock().await.get(session_id) {
            Some(handle) => {
                handle.abort(reason);
                true
            }
            None => false,
        }
    }

    /// Drop the registry entry if `handle` is still the active one.
    pub async fn finish(&self, session_id: &str, handle: &CancelHandle) {
        let mut inner = self.inner.lock().await;
        if let Some(current) = inner.get(session_id) {
            if current.same_as(handle) {
                inner.remove(session_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_submission_supersedes_previous() {
        let registry = CancelRegistry::new();

        let (first, superseded) = registry.begin("ses_1").await;
        assert!(!superseded);
        assert!(!first.is_aborted());

        let (second, superseded) = registry.begin("ses_1").await;
        assert!(superseded);
        assert!(first.is_aborted());
        assert_eq!(first.reason(), Some(AbortReason::NewRequest));
        assert!(!second.is_aborted());
    }

    #[tokio::test]
    async fn first_abort_reason_wins() {
        let registry = CancelRegistry::new();
        let (handle, _) = registry.begin("ses_1").await;

        handle.abort(AbortReason::Finished);
        handle.abort(AbortReason::Error);
        assert_eq!(handle.reason(), Some(AbortReason::Finished));
    }

    #[tokio::test]
    async fn at_most_one_active_handle_per_session() {
        let registry = CancelRegistry::new();
        let (first, _) = registry.begin("ses_1").await;
        let (second, _) = registry.begin("ses_1").await;

        let active = registry.get("ses_1").await.unwrap();
        assert!(!active.same_as(&first));
        assert!(active.same_as(&second));
    }

    #[tokio::test]
    async fn finish_only_removes_own_handle() {
        let registry = CancelRegistry::new();
        let (stale, _) = registry.begin("ses_1").await;
        let (current, _) = registry.begin("ses_1").await;

        registry.finish("ses_1", &stale).await;
        assert!(registry.get("ses_1").await.is_some());

        registry.finish("ses_1", &current).await;
        assert!(registry.get("ses_1").await.is_none());
    }

    #[tokio::test]
    async fn abort_propagates_through_token() {
        let registry = CancelRegistry::new();
        let (handle, _) = registry.begin("ses_1").await;

        let token = handle.token().clone();
        let waiter = tokio::spawn(async move { token.cancelled().await });

        registry.abort("ses_1", AbortReason::UserAbort).await;
        waiter.await.unwrap();
        assert_eq!(handle.reason(), Some(AbortReason::UserAbort));
    }
}
