pub mod meta;
pub mod paths;
pub mod sanitize;

pub use meta::BlockMeta;
pub use paths::{parse_block_id, validate_content_length, BlockFilePath};
pub use sanitize::sanitize_meta;

/// Published descriptor; its presence marks a block as complete.
pub const META_FILENAME: &str = "meta.json";
/// Staged descriptor; present only while an upload is in progress.
pub const META_TEMP_FILENAME: &str = "meta.json.temp";
