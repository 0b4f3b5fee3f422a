//! Runtime tuning, loadable from TOML.
//!
//! ```toml
//! eager_linking = true
//! max_pending_retries = 8
//! joinpoint_capacity = 256
//! max_call_next_depth = 32
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors loading a [`RuntimeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read runtime config: {0}")]
	Read(#[from] std::io::Error),
	#[error("failed to parse runtime config: {0}")]
	Parse(#[from] toml::de::Error),
}

/// Dispatch runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
	/// Resolve every advice, lifting and original link of a plan when it is composed.
	///
	/// A missing link then fails the first invocation of the joinpoint. When disabled,
	/// links are resolved only by the steps that actually run.
	pub eager_linking: bool,
	/// Drop a pending task after this many failed replays. `None` keeps it forever.
	pub max_pending_retries: Option<u32>,
	/// Initial capacity of the joinpoint arena.
	pub joinpoint_capacity: usize,
	/// Bound on nested call-next re-entries within one invocation.
	pub max_call_next_depth: usize,
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		Self {
			eager_linking: true,
			max_pending_retries: None,
			joinpoint_capacity: 64,
			max_call_next_depth: 64,
		}
	}
}

impl RuntimeConfig {
	/// Parses a TOML document. Missing fields take their defaults.
	pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(src)?)
	}

	/// Reads and parses a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let src = std::fs::read_to_string(path)?;
		Self::from_toml_str(&src)
	}
}
