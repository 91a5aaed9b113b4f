//! Supervisor configuration
//!
//! Configuration is a JSON document deserialized into `SupervisorConfig`.
//! Missing fields fall back to their defaults.

pub mod types;

pub use types::{EncodingMode, RestartPolicy, SupervisorConfig};

use crate::utils::SupervisorResult;
use std::fs;
use std::path::Path;

/// Read and validate a configuration file
pub fn load(path: &Path) -> SupervisorResult<SupervisorConfig> {
    let content = fs::read_to_string(path)?;
    let config = parse(&content)?;

    tracing::debug!("Loaded supervisor config from {:?}", path);

    Ok(config)
}

/// Parse and validate a configuration document
pub fn parse(content: &str) -> SupervisorResult<SupervisorConfig> {
    let config: SupervisorConfig = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
}
