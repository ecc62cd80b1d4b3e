mod chunker;
mod tables;

pub use chunker::{escape_backticks_in_code_blocks, split_for_discord};
pub use tables::normalize_tables;
