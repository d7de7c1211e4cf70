//! leash-utils: Common utilities shared across leash crates
//!
//! This crate provides:
//! - Unified error types ([`LeashError`], [`Result`])
//! - Logging infrastructure ([`init_logging`], [`LogConfig`])
//! - XDG-compliant path utilities ([`paths`] module)
//! - Broker runtime discovery file ([`runtime`] module)

pub mod error;
pub mod logging;
pub mod paths;
pub mod runtime;

// Re-export main types at crate root for convenience
pub use error::{LeashError, Result};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogOutput};
pub use runtime::{
    generate_auth_token, load_runtime_config, remove_runtime_config, save_runtime_config,
    RuntimeConfig,
};

// Re-export commonly used path functions
pub use paths::{
    config_dir, ensure_all_dirs, ensure_dir, log_dir, runtime_config_file, runtime_dir, state_dir,
};
