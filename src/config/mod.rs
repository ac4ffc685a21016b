//! Configuration module for tunguard
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use tunguard::config::{load_config, Config};
//!
//! let config = load_config("/etc/tunguard/config.json").unwrap();
//! println!("Session cap: {}", config.engine.max_sessions);
//! ```

mod loader;
mod types;

pub use loader::{
    apply_env_overrides, create_default_config, load_config, load_config_str,
    load_config_with_env, ENV_LOG_LEVEL, ENV_MAX_SESSIONS, ENV_PROC_NET_ROOT,
};
pub use types::{Config, EngineConfig, LogConfig, ProbeConfig, UidCacheConfig};
