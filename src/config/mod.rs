mod loader;
mod types;

pub use loader::{ConfigError, BLOCK_ENV_VAR};
pub use types::PtyConfig;
