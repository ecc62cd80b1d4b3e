use crate::agent::PermissionRequest;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct PendingPermission {
    pub permission_id: String,
    pub session_id: String,
    pub kind: Option<String>,
    pub title: Option<String>,
    pub pattern: Option<String>,
    pub message_id: u64,
    pub directory: PathBuf,
}

/// Pending permission per thread, at most one. Resolution commands consume
/// the entry; a `permission.replied` event clears it as well.
#[derive(Clone, Default)]
pub struct PermissionRegistry {
    inner: Arc<Mutex<HashMap<u64, PendingPermission>>>,
}

impl PermissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, thread_id: u64, pending: PendingPermission) {
        self.inner.lock().await.insert(thread_id, pending);
    }

    pub async fn take(&self, thread_id: u64) -> Option<PendingPermission> {
        self.inner.lock().await.remove(&thread_id)
    }

    pub async fn clear_for_session(&self, session_id: &str) {
        self.inner
            .lock()
            .await
            .retain(|_, pending| pending.session_id != session_id);
    }
}

/// The block posted into the thread when the Agent asks for permission.
pub fn permission_prompt(request: &PermissionRequest) -> String {
    let mut out = String::from("⚠️ **Permission Required**\n");
    if let Some(kind) = &request.kind {
        out.push_str(&format!("Type: `{kind}`\n"));
    }
    if let Some(title) = &request.title {
        out.push_str(&format!("{title}\n"));
    }
    if let Some(pattern) = request.pattern_text() {
        out.push_str(&format!("Pattern: `{pattern}`\n"));
    }
    out.push_str("\nReply with `/accept`, `/accept-always`, or `/reject`.");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(session: &str) -> PendingPermission {
        PendingPermission {
            permission_id: "perm_1".into(),
            session_id: session.into(),
            kind: Some("bash".into()),
            title: Some("Run command".into()),
            pattern: Some("rm -rf *".into()),
            message_id: 1,
            directory: PathBuf::from("/tmp"),
        }
    }

    #[tokio::test]
    async fn one_pending_entry_per_thread() {
        let registry = PermissionRegistry::new();
        registry.set(7, pending("ses_a")).await;
        registry.set(7, pending("ses_b")).await;

        let taken = registry.take(7).await.unwrap();
        assert_eq!(taken.session_id, "ses_b");
        assert!(registry.take(7).await.is_none());
    }

    #[tokio::test]
    async fn replied_event_clears_by_session() {
        let registry = PermissionRegistry::new();
        registry.set(7, pending("ses_a")).await;
        registry.set(8, pending("ses_b")).await;

        registry.clear_for_session("ses_a").await;
        assert!(registry.take(7).await.is_none());
        assert!(registry.take(8).await.is_some());
    }

    #[test]
    fn prompt_mentions_resolution_commands() {
        let request = PermissionRequest {
            id: "perm_1".into(),
            session_id: "ses_1".into(),
            kind: Some("bash".into()),
            title: Some("Run command".into()),
            pattern: Some(serde_json::Value::String("rm -rf *".into())),
        };
        let prompt = permission_prompt(&request);
        assert!(prompt.starts_with("⚠️ **Permission Required**"));
        assert!(prompt.contains("rm -rf *"));
        assert!(prompt.contains("/accept-always"));
    }
}
