//! Taskbot Core - shared building blocks for the Taskbot interfaces.
//!
//! - **clock**: Injectable time source
//! - **config**: Storage paths and environment-driven settings
//! - **markdown**: Render AI output into Telegram MarkdownV2
//! - **media_group**: Batch album messages into one logical upload
//! - **store**: Keyed state with per-key locking and expiry

pub mod clock;
pub mod config;
pub mod error;
pub mod markdown;
pub mod media_group;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    config_dir, ensure_all_dirs, env_file, load_env, public_files_dir, state_dir, Settings,
};
pub use error::{CoreError, Result};
pub use markdown::{render, TELEGRAM_TEXT_LIMIT};
pub use media_group::{
    collect_file_ids, first_text, InboundUnit, MediaGroupBuffer, MediaGroupConfig,
    MAX_GROUP_SIZE,
};
pub use store::KeyedStore;
