//! Configuration loading, env substitution and validation.
//!
//! Config files: `switchboard.toml`, `switchboard.yaml` or `switchboard.json`,
//! searched in `./` then in the user config directory.
//!
//! `${ENV_VAR}` and `${ENV_VAR:-fallback}` are substituted in the raw text
//! before parsing, so secrets can stay out of the file.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, data_dir, discover_and_load, find_config_file, load_config},
    schema::SwitchboardConfig,
    validate::{Diagnostic, Severity, ValidationResult},
};
