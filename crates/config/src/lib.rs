//! Configuration: typed schema, JSON loading with env substitution, and a
//! watch-based handle for runtime overrides.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{ConfigHandle, config_path, discover_and_load, load_config, save_config, state_dir},
    schema::*,
};
