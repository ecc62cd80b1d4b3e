use crate::agent::AgentRegistry;
use crate::bridge::{CancelRegistry, PermissionRegistry};
use crate::config::Config;
use crate::store::Store;
use crate::voice::VoiceRegistry;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Everything the handlers share. One value, created in `main`, threaded
/// through as `Arc<AppState>`; the main loop is the single writer of every
/// registry in here.
pub struct AppState {
    pub config: Config,
    pub app_id: String,
    pub store: Store,
    pub agents: AgentRegistry,
    pub cancels: CancelRegistry,
    pub permissions: PermissionRegistry,
    pub voice: VoiceRegistry,
    /// Cache in front of the `part_messages` table; the table stays the
    /// authoritative dedupe key.
    pub sent_parts: Mutex<HashSet<String>>,
    pub http: reqwest::Client,
    shutting_down: AtomicBool,
}

impl AppState {
    pub fn new(config: Config, app_id: String, store: Store, agents: AgentRegistry) -> Self {
        Self {
            config,
            app_id,
            store,
            agents,
            cancels: CancelRegistry::new(),
            permissions: PermissionRegistry::new(),
            voice: VoiceRegistry::new(),
            sent_parts: Mutex::new(HashSet::new()),
            http: reqwest::Client::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn part_already_sent(&self, part_id: &str) -> bool {
        self.sent_parts.lock().unwrap().contains(part_id)
    }

    pub fn mark_part_sent(&self, part_id: &str) {
        self.sent_parts.lock().unwrap().insert(part_id.to_string());
    }
}
