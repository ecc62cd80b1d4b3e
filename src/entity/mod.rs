pub mod bot_api_keys;
pub mod bot_tokens;
pub mod channel_directories;
pub mod part_messages;
pub mod thread_sessions;
