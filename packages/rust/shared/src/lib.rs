//! Shared types, error model, and configuration for kbforge.
//!
//! This crate is the foundation depended on by all other kbforge crates.
//! It provides:
//! - [`KbForgeError`]: the unified error type
//! - Domain types ([`TaskRecord`], [`TaskUpdate`], [`TaskStatus`], [`TaskId`], [`MergeMode`])
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AnalysisConfig, AppConfig, ExecutorConfig, GeminiConfig, OutputConfig, RateLimitConfig,
    ServerConfig, TaskStoreConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    resolve_api_key,
};
pub use error::{KbForgeError, Result};
pub use types::{DocumentKind, MergeMode, TaskId, TaskRecord, TaskStatus, TaskUpdate};
