//! Configuration file support.
//!
//! A `.vcluster-debug.yaml` file placed in the working directory or any of
//! its parents provides extra resource overrides and bootstrap timeouts.
//! Command line flags always win over values from the file.

use std::{
	fs, io,
	path::{Path, PathBuf},
	time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::k8s::bootstrap::BootstrapOptions;

/// The name of the config file looked up from the working directory upward.
pub const CONFIG_FILE_NAME: &str = ".vcluster-debug.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file: {}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("failed to parse config file: {}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_yaml::Error,
	},
}

/// Root of `.vcluster-debug.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugConfig {
	/// Overrides applied to the default host resources, before CLI overrides.
	#[serde(default)]
	pub host_resources: Vec<String>,

	/// Overrides applied to the default virtual resources, before CLI overrides.
	#[serde(default)]
	pub virtual_resources: Vec<String>,

	#[serde(default)]
	pub pod_locate_timeout_seconds: Option<u64>,

	#[serde(default)]
	pub readiness_timeout_seconds: Option<u64>,
}

impl DebugConfig {
	/// Load config by searching from the given directory upward.
	pub fn load_from_directory(start_dir: &Path) -> Result<Option<Self>, ConfigError> {
		match find_config_file(start_dir) {
			Some(path) => Self::load_from_file(&path).map(Some),
			None => Ok(None),
		}
	}

	pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		// an empty file is a valid, empty config
		if content.trim().is_empty() {
			return Ok(Self::default());
		}
		serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Apply the configured timeouts.
	pub fn apply_to(&self, options: &mut BootstrapOptions) {
		if let Some(secs) = self.pod_locate_timeout_seconds {
			options.pod_locate_timeout = Duration::from_secs(secs);
		}
		if let Some(secs) = self.readiness_timeout_seconds {
			options.readiness_timeout = Duration::from_secs(secs);
		}
	}
}

/// Search for a config file starting from `start_dir` and walking up to the filesystem root.
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let start = start_dir
		.canonicalize()
		.unwrap_or_else(|_| start_dir.to_path_buf());

	start
		.ancestors()
		.map(|dir| dir.join(CONFIG_FILE_NAME))
		.find(|candidate| candidate.is_file())
}
