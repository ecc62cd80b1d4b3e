mod client;
mod server;
mod types;

pub use client::{AgentClient, ClientError, PermissionScope, PromptPart};
pub use server::{AgentRegistry, INSTALL_PROMPT};
pub use types::*;
