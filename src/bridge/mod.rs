mod cancel;
mod orchestrator;
mod permission;

pub use cancel::{AbortReason, CancelHandle, CancelRegistry};
pub use orchestrator::{
    DISCORD_MAX_LEN, RESUME_PART_LIMIT, SubmitRequest, resume_session, submit, truncate_chars,
};
pub use permission::{PendingPermission, PermissionRegistry, permission_prompt};
